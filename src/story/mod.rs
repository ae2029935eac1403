pub mod catalog;
pub mod migrate;
pub mod model;
pub mod sidebar;

pub use migrate::{migrate, MalformedInput};
pub use model::{Act, Character, CharacterList, ClearableSection, Language, Relationship, StoryRecord};
