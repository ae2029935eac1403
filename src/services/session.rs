//! One live story at a time: loading, editing, autosave, import/export and
//! the destructive actions that need the user's consent.

use anyhow::Result;
use std::collections::BTreeSet;

use crate::core::config::AutosaveConfig;
use crate::services::chat::ChatSession;
use crate::services::generator::{self, GenerationError, SectionResult};
use crate::services::llm::LlmClient;
use crate::services::persistence::{self, Debouncer, Export, SaveStatus, StoryRepository};
use crate::services::prompt::Section;
use crate::story::{catalog, Language, StoryRecord};

/// Asks the user to approve a destructive action.
pub trait Confirm {
    fn confirm(&self, message: &str) -> bool;
}

impl<F: Fn(&str) -> bool> Confirm for F {
    fn confirm(&self, message: &str) -> bool {
        self(message)
    }
}

/// A section request that has been started and not yet merged.
#[derive(Debug)]
pub struct PendingSection {
    pub section: Section,
    /// What the request is generated from. Never written back.
    pub story: StoryRecord,
    epoch: u64,
}

/// What became of a finished section request.
#[derive(Debug, Clone, PartialEq)]
pub enum Merged {
    Applied,
    /// The result carries a new title. Commit it with `submit` so the rename
    /// is confirmed.
    Renamed(StoryRecord),
    /// The story was replaced or discarded while the request ran.
    Dropped,
}

pub struct StudioSession {
    repo: StoryRepository,
    story: Option<StoryRecord>,
    chat: ChatSession,
    autosave: Debouncer<StoryRecord>,
    language: Language,
    in_flight: BTreeSet<String>,
    /// Bumped whenever the live story is replaced wholesale.
    epoch: u64,
}

impl StudioSession {
    pub fn new(repo: StoryRepository, autosave: &AutosaveConfig, language: Language) -> Self {
        Self {
            repo,
            story: None,
            chat: ChatSession::new(),
            autosave: Debouncer::new(autosave.debounce_ms, autosave.saved_indicator_ms),
            language,
            in_flight: BTreeSet::new(),
            epoch: 0,
        }
    }

    /// Loads the stored story and its transcript. A stored story that cannot
    /// be read is logged and treated as absent.
    pub async fn open(&mut self) -> Result<()> {
        self.story = match self.repo.load_story().await {
            Ok(story) => story,
            Err(e) => {
                log::error!("Ignoring stored story: {:#}", e);
                None
            }
        };
        self.chat = match &self.story {
            Some(story) => {
                log::info!("Opened story \"{}\"", story.title);
                self.repo.load_chat(&story.title).await?
            }
            None => ChatSession::new(),
        };
        Ok(())
    }

    pub fn story(&self) -> Option<&StoryRecord> {
        self.story.as_ref()
    }

    pub fn chat(&self) -> &ChatSession {
        &self.chat
    }

    /// Language for user-facing prompts: the live story's, else the default.
    pub fn language(&self) -> Language {
        self.story.as_ref().map(|s| s.language).unwrap_or(self.language)
    }

    /// A blank form, or the live story when editing.
    pub fn draft(&self) -> StoryRecord {
        self.story.clone().unwrap_or_else(|| StoryRecord::new(self.language))
    }

    /// Commits a form. Renaming a story that has a title asks first because
    /// the transcript stored under the old title is deleted. Returns false
    /// when the user declined.
    pub async fn submit(&mut self, mut story: StoryRecord, confirm: &dyn Confirm, now: u64) -> Result<bool> {
        story.finalize_for_submit();

        let old_title = self.story.as_ref().map(|s| s.title.clone());
        let renamed = matches!(&old_title, Some(old) if !old.is_empty() && *old != story.title);
        if renamed && !confirm.confirm(catalog::confirm_title_change(self.language())) {
            return Ok(false);
        }

        if let Some(old) = old_title.filter(|_| renamed) {
            log::info!("Story renamed from \"{}\" to \"{}\"", old, story.title);
            self.repo.delete_chat(&old).await?;
        }
        let retitled = self.story.as_ref().map_or(true, |s| s.title != story.title);
        if retitled {
            self.chat = self.repo.load_chat(&story.title).await?;
        }

        self.repo.save_story(&story).await?;
        self.story = Some(story);
        self.autosave.mark_saved(now);
        Ok(true)
    }

    /// Edits the live story in place and schedules a save. The title is not
    /// editable this way; renames go through `submit`.
    pub fn update(&mut self, now: u64, edit: impl FnOnce(&mut StoryRecord)) -> SaveStatus {
        let Some(story) = self.story.as_mut() else {
            return SaveStatus::Idle;
        };
        let title = story.title.clone();
        edit(story);
        if story.title != title {
            log::warn!("Title edits must be submitted; keeping \"{}\"", title);
            story.title = title;
        }
        let snapshot = story.clone();
        self.autosave.schedule(snapshot, now)
    }

    /// Marks `section` as generating and hands out the record to generate
    /// from. `None` without a story or while the same section is generating.
    pub fn begin_generation(&mut self, section: Section) -> Option<PendingSection> {
        let story = self.story.as_ref()?;
        if !self.in_flight.insert(section.to_string()) {
            return None;
        }
        Some(PendingSection {
            section,
            story: story.clone(),
            epoch: self.epoch,
        })
    }

    /// Ids of the sections currently generating, e.g. `loveInterest_1`.
    pub fn generating(&self) -> Vec<String> {
        self.in_flight.iter().cloned().collect()
    }

    /// Merges a finished request into the story as it is now, so edits and
    /// other sections that landed in the meantime are kept.
    pub fn finish_generation(
        &mut self,
        pending: PendingSection,
        outcome: Result<SectionResult, GenerationError>,
        now: u64,
    ) -> Result<Merged, GenerationError> {
        let section = pending.section;
        if pending.epoch != self.epoch {
            log::info!("Dropping section {}: the story was replaced", section);
            return Ok(Merged::Dropped);
        }
        self.in_flight.remove(&section.to_string());

        let result = outcome?;
        let Some(story) = self.story.as_ref() else {
            return Ok(Merged::Dropped);
        };
        let mut next = story.clone();
        generator::apply(&mut next, section, result)?;
        if next.title != story.title {
            return Ok(Merged::Renamed(next));
        }
        self.update(now, |story| *story = next);
        Ok(Merged::Applied)
    }

    /// Generates a section into the live story. A generated title is a rename
    /// and is confirmed like one.
    pub async fn generate(
        &mut self,
        llm: &dyn LlmClient,
        section: Section,
        idea: &str,
        confirm: &dyn Confirm,
        now: u64,
    ) -> Result<bool> {
        let Some(pending) = self.begin_generation(section) else {
            return Ok(false);
        };
        let outcome = generator::generate(llm, section, &pending.story, idea).await;
        match self.finish_generation(pending, outcome, now)? {
            Merged::Applied => Ok(true),
            Merged::Renamed(next) => self.submit(next, confirm, now).await,
            Merged::Dropped => Ok(false),
        }
    }

    /// The story and a copy of its transcript for sending a message outside
    /// the session.
    pub fn begin_chat(&self) -> Option<(StoryRecord, ChatSession)> {
        self.story.as_ref().map(|story| (story.clone(), self.chat.clone()))
    }

    /// Takes back a transcript extended outside the session. Returns false,
    /// and keeps the current transcript, when `title` is no longer live.
    pub fn finish_chat(&mut self, title: &str, chat: ChatSession) -> bool {
        match &self.story {
            Some(story) if story.title == title => {
                self.chat = chat;
                true
            }
            _ => false,
        }
    }

    /// Sends a chat message. The transcript is saved whether or not the model
    /// answered.
    pub async fn send_chat(&mut self, llm: &dyn LlmClient, text: &str) -> Result<String> {
        let Some((story, mut chat)) = self.begin_chat() else {
            anyhow::bail!("Create a story before chatting");
        };
        let reply = chat.send(llm, &story, text).await.map(|m| m.text.clone());
        if self.finish_chat(&story.title, chat) {
            self.repo.save_chat(&story.title, &self.chat).await?;
        }
        reply
    }

    pub fn repository(&self) -> StoryRepository {
        self.repo.clone()
    }

    /// Replaces the live story with an uploaded one. Unreadable uploads fail
    /// before anything is asked or changed.
    pub async fn import(&mut self, text: &str, confirm: &dyn Confirm, now: u64) -> Result<bool> {
        let imported = persistence::import(text)?;

        if let Some(current) = &self.story {
            if !confirm.confirm(catalog::confirm_import(self.language())) {
                return Ok(false);
            }
            if current.title != imported.title {
                self.repo.delete_chat(&current.title).await?;
            }
        }

        self.chat = self.repo.load_chat(&imported.title).await?;
        self.repo.save_story(&imported).await?;
        log::info!("Imported story \"{}\"", imported.title);
        self.story = Some(imported);
        self.replaced();
        self.autosave.mark_saved(now);
        Ok(true)
    }

    pub fn export(&self) -> Result<Option<Export>> {
        self.story.as_ref().map(persistence::export).transpose()
    }

    /// Discards the story and its transcript.
    pub async fn start_new(&mut self, confirm: &dyn Confirm) -> Result<bool> {
        let Some(story) = &self.story else {
            return Ok(true);
        };
        if !confirm.confirm(catalog::confirm_start_new(story.language)) {
            return Ok(false);
        }

        self.autosave.cancel();
        self.repo.delete_chat(&story.title).await?;
        self.repo.delete_story().await?;
        self.story = None;
        self.chat.clear();
        self.replaced();
        Ok(true)
    }

    fn replaced(&mut self) {
        self.epoch += 1;
        self.in_flight.clear();
    }

    /// The pending save once it is due. The caller writes it, see `tick`.
    pub fn due_save(&mut self, now: u64) -> Option<StoryRecord> {
        self.autosave.poll(now)
    }

    /// Performs the pending save once it is due.
    pub async fn tick(&mut self, now: u64) -> Result<SaveStatus> {
        if let Some(story) = self.due_save(now) {
            self.repo.save_story(&story).await?;
            log::debug!("Autosaved \"{}\"", story.title);
        }
        Ok(self.autosave.status(now))
    }

    /// Writes any pending save now.
    pub async fn flush(&mut self, now: u64) -> Result<()> {
        if let Some(story) = self.autosave.flush(now) {
            self.repo.save_story(&story).await?;
        }
        Ok(())
    }

    pub fn save_status(&self, now: u64) -> SaveStatus {
        self.autosave.status(now)
    }

    pub fn next_save_deadline(&self) -> Option<u64> {
        self.autosave.next_deadline()
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::core::io::{NativeStorage, Storage};
    use crate::services::chat::chat_key;
    use crate::services::llm::Turn;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    fn yes(_: &str) -> bool {
        true
    }

    fn no(_: &str) -> bool {
        false
    }

    #[derive(Debug)]
    struct ScriptedLlm(&'static str);

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate_json(&self, _prompt: &str, _schema: &Value) -> Result<String> {
            Ok(self.0.to_string())
        }

        async fn chat(&self, _system: &str, _history: &[Turn], _message: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        storage: Arc<NativeStorage>,
        session: StudioSession,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(NativeStorage::new(dir.path()));
        let repo = StoryRepository::new(storage.clone());
        let session = StudioSession::new(repo, &AutosaveConfig::default(), Language::En);
        Fixture { _dir: dir, storage, session }
    }

    fn titled(title: &str) -> StoryRecord {
        let mut story = StoryRecord::new(Language::En);
        story.title = title.to_string();
        story.genres = vec!["Romance".to_string()];
        story
    }

    #[tokio::test]
    async fn test_open_without_story() -> Result<()> {
        let mut f = fixture();
        f.session.open().await?;
        assert!(f.session.story().is_none());
        assert_eq!(f.session.draft().story_arc[0].title, "Act 1");
        Ok(())
    }

    #[tokio::test]
    async fn test_open_ignores_unreadable_story() -> Result<()> {
        let mut f = fixture();
        f.storage.save(persistence::STORY_KEY, "{broken").await?;
        f.session.open().await?;
        assert!(f.session.story().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_submit_persists_and_reopens() -> Result<()> {
        let mut f = fixture();
        let mut story = titled("Ashen Crown");
        story.world_building = Some("Isles".to_string());
        assert!(f.session.submit(story, &no, 0).await?);

        // Romance does not enable world building.
        assert_eq!(f.session.story().unwrap().world_building.as_deref(), Some(""));
        assert_eq!(f.session.save_status(100), SaveStatus::Saved);

        let repo = StoryRepository::new(f.storage.clone());
        let mut reopened = StudioSession::new(repo, &AutosaveConfig::default(), Language::En);
        reopened.open().await?;
        assert_eq!(reopened.story().unwrap().title, "Ashen Crown");
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_needs_confirmation() -> Result<()> {
        let mut f = fixture();
        f.session.submit(titled("Old"), &yes, 0).await?;
        f.storage.save(&chat_key("Old"), "[]").await?;

        assert!(!f.session.submit(titled("New"), &no, 10).await?);
        assert_eq!(f.session.story().unwrap().title, "Old");
        assert!(f.storage.load(&chat_key("Old")).await?.is_some());

        assert!(f.session.submit(titled("New"), &yes, 20).await?);
        assert_eq!(f.session.story().unwrap().title, "New");
        assert!(f.storage.load(&chat_key("Old")).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_debounces_writes() -> Result<()> {
        let mut f = fixture();
        f.session.submit(titled("Ashen Crown"), &yes, 0).await?;

        assert_eq!(f.session.update(5000, |s| s.main_plot = "one".to_string()), SaveStatus::Saving);
        f.session.update(5500, |s| {
            s.main_plot = "two".to_string();
            s.title = "Sneaky".to_string();
        });
        assert_eq!(f.session.story().unwrap().title, "Ashen Crown");
        assert_eq!(f.session.next_save_deadline(), Some(6500));

        assert_eq!(f.session.tick(6000).await?, SaveStatus::Saving);
        let stored = StoryRepository::new(f.storage.clone()).load_story().await?.unwrap();
        assert_eq!(stored.main_plot, "");

        assert_eq!(f.session.tick(6500).await?, SaveStatus::Saved);
        let stored = StoryRepository::new(f.storage.clone()).load_story().await?.unwrap();
        assert_eq!(stored.main_plot, "two");
        assert_eq!(f.session.tick(9000).await?, SaveStatus::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn test_import_flow() -> Result<()> {
        let mut f = fixture();
        assert!(f.session.import("not json", &yes, 0).await.is_err());
        assert!(f.session.story().is_none());

        assert!(f.session.import(r#"{"title": "First", "protagonistName": "Kai"}"#, &no, 0).await?);
        assert_eq!(f.session.story().unwrap().protagonist.name, "Kai");
        f.storage.save(&chat_key("First"), "[]").await?;

        assert!(!f.session.import(r#"{"title": "Second"}"#, &no, 10).await?);
        assert_eq!(f.session.story().unwrap().title, "First");

        assert!(f.session.import(r#"{"title": "Second"}"#, &yes, 20).await?);
        assert_eq!(f.session.story().unwrap().title, "Second");
        assert!(f.storage.load(&chat_key("First")).await?.is_none());

        let export = f.session.export()?.unwrap();
        assert_eq!(export.file_name, "webnovel-ai-studio_second.json");
        Ok(())
    }

    #[tokio::test]
    async fn test_start_new_discards_everything() -> Result<()> {
        let mut f = fixture();
        f.session.submit(titled("Doomed"), &yes, 0).await?;
        f.session.send_chat(&ScriptedLlm("noted"), "remember this").await?;
        assert!(f.storage.load(&chat_key("Doomed")).await?.is_some());
        f.session.update(100, |s| s.main_plot = "late edit".to_string());

        assert!(!f.session.start_new(&no).await?);
        assert!(f.session.story().is_some());

        assert!(f.session.start_new(&yes).await?);
        assert!(f.session.story().is_none());
        assert!(f.session.chat().is_empty());
        assert_eq!(f.session.next_save_deadline(), None);
        assert!(f.storage.load(persistence::STORY_KEY).await?.is_none());
        assert!(f.storage.load(&chat_key("Doomed")).await?.is_none());

        // A cancelled save must not resurrect the story.
        f.session.tick(10_000).await?;
        assert!(f.storage.load(persistence::STORY_KEY).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_merges_into_live_story() -> Result<()> {
        let mut f = fixture();
        f.session.submit(titled("Ashen Crown"), &yes, 0).await?;

        let llm = ScriptedLlm(r#"{"mainPlot": "A crown that remembers."}"#);
        assert!(f.session.generate(&llm, Section::MainPlot, "", &no, 100).await?);
        assert_eq!(f.session.story().unwrap().main_plot, "A crown that remembers.");
        assert_eq!(f.session.save_status(200), SaveStatus::Saving);

        let llm = ScriptedLlm("oops");
        let err = f.session.generate(&llm, Section::Tone, "", &no, 300).await.unwrap_err();
        let err = err.downcast_ref::<generator::GenerationError>().unwrap();
        assert_eq!(err.section(), "tone");
        Ok(())
    }

    #[tokio::test]
    async fn test_long_non_ascii_title() -> Result<()> {
        let mut f = fixture();
        let title = "重生之我在修仙世界当反派大魔王的那些年：从废柴少年到万界至尊";
        assert!(f.session.submit(titled(title), &no, 0).await?);
        f.session.send_chat(&ScriptedLlm("好"), "你好").await?;

        let repo = StoryRepository::new(f.storage.clone());
        assert_eq!(repo.load_story().await?.unwrap().title, title);
        assert_eq!(repo.load_chat(title).await?.messages().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_untitled_story_gets_a_title_without_asking() -> Result<()> {
        let mut f = fixture();
        f.session.import(r#"{"title": ""}"#, &yes, 0).await?;
        f.storage.save(&chat_key(""), "[]").await?;

        assert!(f.session.submit(titled("Named At Last"), &no, 10).await?);
        assert_eq!(f.session.story().unwrap().title, "Named At Last");
        assert!(f.storage.load(&chat_key("")).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_sections_generate_side_by_side() -> Result<()> {
        let mut f = fixture();
        f.session.submit(titled("Ashen Crown"), &yes, 0).await?;

        let plot = f.session.begin_generation(Section::MainPlot).unwrap();
        let tone = f.session.begin_generation(Section::Tone).unwrap();
        assert!(f.session.begin_generation(Section::MainPlot).is_none());
        assert_eq!(f.session.generating(), vec!["mainPlot".to_string(), "tone".to_string()]);

        // Edits keep working while both requests are out.
        f.session.update(50, |s| s.genres.push("Fantasy".to_string()));

        let llm = ScriptedLlm(r#"{"comedyLevel": "8", "proseStyle": "zzz"}"#);
        let outcome = generator::generate(&llm, Section::Tone, &tone.story, "").await;
        assert_eq!(f.session.finish_generation(tone, outcome, 100)?, Merged::Applied);

        let llm = ScriptedLlm(r#"{"mainPlot": "A crown that remembers.", "comedyLevel": "1"}"#);
        let outcome = generator::generate(&llm, Section::MainPlot, &plot.story, "").await;
        assert_eq!(f.session.finish_generation(plot, outcome, 200)?, Merged::Applied);

        let story = f.session.story().unwrap();
        assert_eq!(story.main_plot, "A crown that remembers.");
        assert_eq!(story.comedy_level, "8");
        assert_eq!(story.genres, vec!["Romance".to_string(), "Fantasy".to_string()]);
        assert!(f.session.generating().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_section_frees_its_slot() -> Result<()> {
        let mut f = fixture();
        f.session.submit(titled("Ashen Crown"), &yes, 0).await?;

        let pending = f.session.begin_generation(Section::Arc).unwrap();
        let outcome = generator::generate(&ScriptedLlm("not json"), Section::Arc, &pending.story, "").await;
        let err = f.session.finish_generation(pending, outcome, 10).unwrap_err();
        assert_eq!(err.section(), "arc");
        assert!(f.session.generating().is_empty());
        assert!(f.session.begin_generation(Section::Arc).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_result_for_a_discarded_story_is_dropped() -> Result<()> {
        let mut f = fixture();
        f.session.submit(titled("Doomed"), &yes, 0).await?;
        let pending = f.session.begin_generation(Section::MainPlot).unwrap();

        f.session.start_new(&yes).await?;
        f.session.submit(titled("Fresh"), &yes, 10).await?;

        let outcome = generator::generate(&ScriptedLlm(r#"{"mainPlot": "stale"}"#), Section::MainPlot, &pending.story, "").await;
        assert_eq!(f.session.finish_generation(pending, outcome, 20)?, Merged::Dropped);
        assert_eq!(f.session.story().unwrap().main_plot, "");
        Ok(())
    }
}
