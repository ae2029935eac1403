pub mod chat;
pub mod generator;
pub mod llm;
pub mod persistence;
pub mod prompt;
pub mod session;
