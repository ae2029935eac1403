use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::services::llm::{LlmClient, Speaker, Turn};
use crate::services::prompt::chat_system_instruction;
use crate::story::StoryRecord;

pub const CHAT_KEY_PREFIX: &str = "chatMessages_";

/// Storage key of the transcript that belongs to a story title.
pub fn chat_key(title: &str) -> String {
    format!("{}{}", CHAT_KEY_PREFIX, title)
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Ai,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub author: Author,
    pub text: String,
}

impl Message {
    pub fn new(author: Author, text: impl Into<String>) -> Self {
        Self {
            id: format!("{:016x}", rand::random::<u64>()),
            author,
            text: text.into(),
        }
    }
}

/// The running conversation about one story.
#[derive(Debug, Default, Clone)]
pub struct ChatSession {
    messages: Vec<Message>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Reads a stored transcript. Unreadable transcripts start over empty.
    pub fn from_json(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(messages) => Self { messages },
            Err(e) => {
                log::warn!("Discarding unreadable chat transcript: {}", e);
                Self::new()
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.messages).context("Failed to serialize chat transcript")
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn history(&self) -> Vec<Turn> {
        self.messages
            .iter()
            .map(|m| Turn {
                speaker: match m.author {
                    Author::User => Speaker::User,
                    Author::Ai => Speaker::Model,
                },
                text: m.text.clone(),
            })
            .collect()
    }

    /// Appends the user's message, asks the model with the earlier turns as
    /// history, and appends its reply. If the model fails the user's message
    /// stays in the transcript.
    pub async fn send(&mut self, llm: &dyn LlmClient, story: &StoryRecord, text: &str) -> Result<&Message> {
        let text = text.trim();
        if text.is_empty() {
            bail!("Cannot send an empty message");
        }

        let history = self.history();
        self.messages.push(Message::new(Author::User, text));

        let system = chat_system_instruction(story);
        let reply = llm
            .chat(&system, &history, text)
            .await
            .context("Chat request failed")?;

        self.messages.push(Message::new(Author::Ai, reply));
        self.messages.last().context("transcript is empty")
    }
}
