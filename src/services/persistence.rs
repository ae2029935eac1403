use anyhow::{Context, Result};
use std::sync::Arc;

use crate::core::io::Storage;
use crate::services::chat::{chat_key, ChatSession};
use crate::story::migrate::{self, MalformedInput};
use crate::story::StoryRecord;

pub const STORY_KEY: &str = "storyEncyclopedia";
const EXPORT_PREFIX: &str = "webnovel-ai-studio_";

/// Story and transcript persistence on top of a key-value `Storage`.
#[derive(Clone)]
pub struct StoryRepository {
    storage: Arc<dyn Storage>,
}

impl StoryRepository {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// `Ok(None)` when nothing is stored. Stored data that cannot be read as a
    /// story comes back as an error wrapping `MalformedInput`.
    pub async fn load_story(&self) -> Result<Option<StoryRecord>> {
        let Some(text) = self.storage.load(STORY_KEY).await? else {
            return Ok(None);
        };
        let story = migrate::parse(&text).context("Stored story is unreadable")?;
        Ok(Some(story))
    }

    pub async fn save_story(&self, story: &StoryRecord) -> Result<()> {
        let text = serde_json::to_string(story).context("Failed to serialize story")?;
        self.storage.save(STORY_KEY, &text).await
    }

    pub async fn delete_story(&self) -> Result<()> {
        self.storage.delete(STORY_KEY).await
    }

    pub async fn load_chat(&self, title: &str) -> Result<ChatSession> {
        Ok(match self.storage.load(&chat_key(title)).await? {
            Some(text) => ChatSession::from_json(&text),
            None => ChatSession::new(),
        })
    }

    pub async fn save_chat(&self, title: &str, chat: &ChatSession) -> Result<()> {
        self.storage.save(&chat_key(title), &chat.to_json()?).await
    }

    pub async fn delete_chat(&self, title: &str) -> Result<()> {
        self.storage.delete(&chat_key(title)).await
    }
}

/// A story ready to be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub file_name: String,
    pub contents: String,
}

/// `webnovel-ai-studio_<title>.json` with everything but ASCII letters and
/// digits replaced by `_`.
pub fn export_file_name(title: &str) -> String {
    let sanitized: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let stem = if sanitized.is_empty() { "story".to_string() } else { sanitized };
    format!("{}{}.json", EXPORT_PREFIX, stem)
}

pub fn export(story: &StoryRecord) -> Result<Export> {
    Ok(Export {
        file_name: export_file_name(&story.title),
        contents: serde_json::to_string_pretty(story).context("Failed to serialize story")?,
    })
}

/// Reads an uploaded export, including ones written by older versions.
pub fn import(text: &str) -> Result<StoryRecord, MalformedInput> {
    migrate::parse(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
}

/// Coalesces bursts of edits into one write.
///
/// Time is passed in by the caller as milliseconds, so the same state machine
/// runs under a tokio clock, a browser timer, or a test.
#[derive(Debug)]
pub struct Debouncer<T> {
    delay_ms: u64,
    indicator_ms: u64,
    pending: Option<(T, u64)>,
    saved_at: Option<u64>,
}

impl<T> Debouncer<T> {
    pub fn new(delay_ms: u64, indicator_ms: u64) -> Self {
        Self {
            delay_ms,
            indicator_ms,
            pending: None,
            saved_at: None,
        }
    }

    /// Replaces any pending value and restarts the wait.
    pub fn schedule(&mut self, value: T, now: u64) -> SaveStatus {
        self.pending = Some((value, now + self.delay_ms));
        self.saved_at = None;
        SaveStatus::Saving
    }

    /// Hands out the pending value once its deadline has passed.
    pub fn poll(&mut self, now: u64) -> Option<T> {
        match self.next_deadline() {
            Some(deadline) if deadline <= now => self.take(now),
            _ => None,
        }
    }

    /// Hands out the pending value immediately.
    pub fn flush(&mut self, now: u64) -> Option<T> {
        self.take(now)
    }

    /// Records a write made outside the debouncer; anything pending is stale.
    pub fn mark_saved(&mut self, now: u64) {
        self.pending = None;
        self.saved_at = Some(now);
    }

    pub fn cancel(&mut self) {
        self.pending = None;
        self.saved_at = None;
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    pub fn status(&self, now: u64) -> SaveStatus {
        if self.pending.is_some() {
            return SaveStatus::Saving;
        }
        match self.saved_at {
            Some(at) if now < at + self.indicator_ms => SaveStatus::Saved,
            _ => SaveStatus::Idle,
        }
    }

    fn take(&mut self, now: u64) -> Option<T> {
        let (value, _) = self.pending.take()?;
        self.saved_at = Some(now);
        Some(value)
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::services::chat::{Author, Message};
    use crate::story::Language;

    fn repo(dir: &tempfile::TempDir) -> StoryRepository {
        StoryRepository::new(Arc::new(NativeStorage::new(dir.path())))
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(export_file_name("Ashen Crown!"), "webnovel-ai-studio_ashen_crown_.json");
        assert_eq!(export_file_name(""), "webnovel-ai-studio_story.json");
        assert_eq!(export_file_name("Café"), "webnovel-ai-studio_caf_.json");
    }

    #[test]
    fn test_export_then_import() {
        let mut story = StoryRecord::new(Language::Id);
        story.title = "Mahkota Abu".to_string();
        let exported = export(&story).unwrap();
        assert!(exported.contents.contains("\n  \"title\": \"Mahkota Abu\""));
        assert_eq!(import(&exported.contents).unwrap(), story);
        assert!(matches!(import("[]"), Err(MalformedInput::NotAnObject(_))));
    }

    #[tokio::test]
    async fn test_story_round_trip_and_legacy_upgrade() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo = repo(&dir);
        assert!(repo.load_story().await?.is_none());

        let storage = NativeStorage::new(dir.path());
        storage
            .save(STORY_KEY, r#"{"title": "Old", "protagonistName": "Kai", "loveInterest1": "Mira"}"#)
            .await?;
        let story = repo.load_story().await?.unwrap();
        assert_eq!(story.protagonist.name, "Kai");
        assert_eq!(story.love_interests[0].name, "Mira");

        repo.save_story(&story).await?;
        assert_eq!(repo.load_story().await?, Some(story));

        repo.delete_story().await?;
        assert!(repo.load_story().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_story_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        NativeStorage::new(dir.path()).save(STORY_KEY, "not json").await?;
        let err = repo(&dir).load_story().await.unwrap_err();
        assert!(err.downcast_ref::<MalformedInput>().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_chat_is_keyed_by_title() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo = repo(&dir);
        let chat = ChatSession::from_messages(vec![Message::new(Author::User, "hi")]);

        repo.save_chat("A / B", &chat).await?;
        assert_eq!(repo.load_chat("A / B").await?.messages(), chat.messages());
        assert!(repo.load_chat("Other").await?.is_empty());

        repo.delete_chat("A / B").await?;
        assert!(repo.load_chat("A / B").await?.is_empty());
        Ok(())
    }

    #[test]
    fn test_debouncer_coalesces_edits() {
        let mut d = Debouncer::new(1000, 2000);
        assert_eq!(d.status(0), SaveStatus::Idle);

        assert_eq!(d.schedule("a", 0), SaveStatus::Saving);
        assert_eq!(d.schedule("b", 600), SaveStatus::Saving);
        assert_eq!(d.next_deadline(), Some(1600));
        assert_eq!(d.poll(1000), None);
        assert_eq!(d.poll(1600), Some("b"));
        assert_eq!(d.poll(1700), None);

        assert_eq!(d.status(1700), SaveStatus::Saved);
        assert_eq!(d.status(3600), SaveStatus::Idle);
    }

    #[test]
    fn test_debouncer_flush_and_cancel() {
        let mut d = Debouncer::new(1000, 2000);
        d.schedule(1, 0);
        assert_eq!(d.flush(10), Some(1));
        assert_eq!(d.status(10), SaveStatus::Saved);
        assert_eq!(d.flush(20), None);

        d.schedule(2, 30);
        d.cancel();
        assert_eq!(d.next_deadline(), None);
        assert_eq!(d.poll(5000), None);
        assert_eq!(d.status(5000), SaveStatus::Idle);
    }
}
