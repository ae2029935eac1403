use serde_json::{Map, Value};
use thiserror::Error;

use crate::services::llm::LlmClient;
use crate::services::prompt::{section_prompt, section_schema, strip_code_blocks, Section};
use crate::story::catalog;
use crate::story::migrate::{act_from_value, character_from_value, migrate, MalformedInput};
use crate::story::{Act, Character, CharacterList, StoryRecord};

/// Why a section could not be generated. Every variant names the section so
/// the caller can clear its in-flight marker and report against it.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("[{section}] an idea and at least one genre are needed first")]
    MissingIdea { section: String },

    #[error("[{section}] request failed: {message}")]
    Request { section: String, message: String },

    #[error("[{section}] response is not valid JSON: {source}")]
    InvalidJson {
        section: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("[{section}] unusable response: {source}")]
    Malformed {
        section: String,
        #[source]
        source: MalformedInput,
    },
}

impl GenerationError {
    pub fn section(&self) -> &str {
        match self {
            GenerationError::MissingIdea { section }
            | GenerationError::Request { section, .. }
            | GenerationError::InvalidJson { section, .. }
            | GenerationError::Malformed { section, .. } => section,
        }
    }
}

/// What a section produced, before it is merged into the record.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionResult {
    Character(Character),
    Act(Act),
    /// Partial record with top-level keys.
    Fragment(Map<String, Value>),
}

/// Asks the model for one section. The record is only read.
pub async fn generate(
    llm: &dyn LlmClient,
    section: Section,
    story: &StoryRecord,
    idea: &str,
) -> Result<SectionResult, GenerationError> {
    let tag = section.to_string();
    if section == Section::Basic && !story.is_basic_info_ready(idea) {
        return Err(GenerationError::MissingIdea { section: tag });
    }

    let context = serde_json::to_string_pretty(story).unwrap_or_default();
    let prompt = section_prompt(section, story, &context, idea);
    let schema = section_schema(section);

    log::info!("Generating section {}", tag);
    let raw = llm
        .generate_json(&prompt, &schema)
        .await
        .map_err(|e| GenerationError::Request {
            section: tag.clone(),
            message: format!("{:#}", e),
        })?;

    let value: Value = serde_json::from_str(&strip_code_blocks(&raw)).map_err(|source| {
        log::warn!("Section {} returned non-JSON: {}", tag, raw);
        GenerationError::InvalidJson {
            section: tag.clone(),
            source,
        }
    })?;

    let malformed = |source: MalformedInput| GenerationError::Malformed {
        section: tag.clone(),
        source,
    };
    match section {
        Section::Protagonist | Section::LoveInterest(_) | Section::Antagonist(_) => {
            character_from_value(&value).map(SectionResult::Character).map_err(malformed)
        }
        Section::SingleArcAct(_) => act_from_value(&value).map(SectionResult::Act).map_err(malformed),
        _ => match value {
            Value::Object(fragment) => Ok(SectionResult::Fragment(fragment)),
            other => Err(malformed(MalformedInput::NotAnObject(match other {
                Value::Array(_) => "an array",
                _ => "a scalar",
            }))),
        },
    }
}

/// `generate` then `apply`. On error the record is unchanged.
pub async fn generate_into(
    llm: &dyn LlmClient,
    section: Section,
    story: &mut StoryRecord,
    idea: &str,
) -> Result<(), GenerationError> {
    let result = generate(llm, section, story, idea).await?;
    apply(story, section, result)
}

/// Writes a generated result into `story`. Characters and acts land at their
/// exact position; fragments only contribute the keys their section owns.
pub fn apply(story: &mut StoryRecord, section: Section, result: SectionResult) -> Result<(), GenerationError> {
    match (section, result) {
        (Section::Protagonist, SectionResult::Character(c)) => story.protagonist = c,
        (Section::LoveInterest(i), SectionResult::Character(c)) => {
            place_character(story, CharacterList::LoveInterests, i, c)
        }
        (Section::Antagonist(i), SectionResult::Character(c)) => {
            place_character(story, CharacterList::Antagonists, i, c)
        }
        (Section::SingleArcAct(i), SectionResult::Act(act)) => {
            while story.story_arc.len() <= i {
                let title = story.language.act_title(story.story_arc.len() + 1);
                story.story_arc.push(Act::titled(title));
            }
            story.story_arc[i] = act;
        }
        (section, SectionResult::Fragment(fragment)) => merge_fragment(story, section, fragment)?,
        (section, other) => {
            log::warn!("Ignoring {:?} result for section {}", other, section);
        }
    }
    Ok(())
}

fn place_character(story: &mut StoryRecord, list: CharacterList, index: usize, character: Character) {
    let characters = story.characters_mut(list);
    if characters.len() <= index {
        characters.resize_with(index + 1, Character::default);
    }
    characters[index] = character;
}

fn merge_fragment(story: &mut StoryRecord, section: Section, mut fragment: Map<String, Value>) -> Result<(), GenerationError> {
    let malformed = |source: MalformedInput| GenerationError::Malformed {
        section: section.to_string(),
        source,
    };

    let mut current = match serde_json::to_value(&*story) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(malformed(MalformedInput::NotAnObject("a non-object record"))),
        Err(e) => return Err(malformed(MalformedInput::Shape(e))),
    };

    for key in section.fragment_keys() {
        if let Some(value) = fragment.remove(*key) {
            current.insert((*key).to_string(), value);
        }
    }
    if !fragment.is_empty() {
        log::debug!(
            "Section {} returned extra keys, dropped: {:?}",
            section,
            fragment.keys().collect::<Vec<_>>()
        );
    }

    let mut merged = migrate(&Value::Object(current)).map_err(malformed)?;
    if section == Section::Tone {
        // Keep the previous style when nothing in the catalog resembles the reply.
        merged.prose_style = catalog::snap_prose_style(merged.language, &merged.prose_style)
            .map(str::to_string)
            .unwrap_or_else(|| story.prose_style.clone());
    }
    *story = merged;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::Turn;
    use crate::story::Language;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct MockLlmClient {
        reply: Option<String>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl MockLlmClient {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn generate_json(&self, prompt: &str, _schema: &Value) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().ok_or_else(|| anyhow!("connection reset"))
        }

        async fn chat(&self, _system: &str, _history: &[Turn], _message: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    fn story() -> StoryRecord {
        let mut story = StoryRecord::new(Language::En);
        story.title = "Ashen Crown".to_string();
        story.genres = vec!["Fantasy".to_string()];
        story.setting = "A kingdom under a dead sun".to_string();
        story.protagonist = Character::named("Kai");
        story
    }

    #[tokio::test]
    async fn test_love_interest_lands_at_index_and_pads() {
        let llm = MockLlmClient::replying(r#"{"name": "Mira", "gender": "Female", "voiceDescription": "Low"}"#);
        let mut story = story();

        generate_into(&llm, Section::LoveInterest(2), &mut story, "").await.unwrap();
        assert_eq!(story.love_interests.len(), 3);
        assert!(!story.love_interests[1].is_present());
        assert_eq!(story.love_interests[2].name, "Mira");
        assert_eq!(story.love_interests[2].voice_and_speech_style, "Low");
        assert_eq!(story.protagonist.name, "Kai");

        let prompt = llm.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("\"title\": \"Ashen Crown\""));
    }

    #[tokio::test]
    async fn test_fragment_only_merges_owned_keys() {
        let llm = MockLlmClient::replying(r#"```json
{"mainPlot": "The crown is a prison.", "title": "Hijacked"}
```"#);
        let mut story = story();
        generate_into(&llm, Section::MainPlot, &mut story, "").await.unwrap();
        assert_eq!(story.main_plot, "The crown is a prison.");
        assert_eq!(story.title, "Ashen Crown");
    }

    #[tokio::test]
    async fn test_core_fragment_is_reshaped() {
        let llm = MockLlmClient::replying(
            r#"{"mainPlot": "p", "protagonist": {"name": "Kai", "age": 19},
                "loveInterests": [{"name": "Mira"}, {"name": "Sol"}],
                "antagonists": [{"name": "The Regent"}], "worldBuilding": ""}"#,
        );
        let mut story = story();
        generate_into(&llm, Section::Core, &mut story, "").await.unwrap();
        assert_eq!(story.protagonist.age, "19");
        assert_eq!(story.love_interests.len(), 2);
        assert_eq!(story.antagonists[0].name, "The Regent");
        assert_eq!(story.world_building.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_tone_snaps_prose_style() {
        let llm = MockLlmClient::replying(
            r#"{"comedyLevel": "3", "romanceLevel": "8", "actionLevel": "6", "maturityLevel": "1", "proseStyle": "Descriptive and lush"}"#,
        );
        let mut story = story();
        generate_into(&llm, Section::Tone, &mut story, "").await.unwrap();
        assert_eq!(story.romance_level, "8");
        assert_eq!(Some(story.prose_style.as_str()), catalog::snap_prose_style(Language::En, "Descriptive"));

        let llm = MockLlmClient::replying(r#"{"proseStyle": "zzz unknown"}"#);
        let before = story.prose_style.clone();
        generate_into(&llm, Section::Tone, &mut story, "").await.unwrap();
        assert_eq!(story.prose_style, before);
    }

    #[tokio::test]
    async fn test_act_index_past_end_pads_titles() {
        let llm = MockLlmClient::replying(r#"{"title": "The Fall", "description": "Everything burns."}"#);
        let mut story = story();
        generate_into(&llm, Section::SingleArcAct(2), &mut story, "").await.unwrap();
        assert_eq!(story.story_arc.len(), 3);
        assert_eq!(story.story_arc[1].title, "Act 2");
        assert_eq!(story.story_arc[2].title, "The Fall");
    }

    #[tokio::test]
    async fn test_failures_leave_record_untouched() {
        let original = story();

        let mut story = original.clone();
        let err = generate_into(&MockLlmClient::failing(), Section::Arc, &mut story, "").await.unwrap_err();
        assert_eq!(err.section(), "arc");
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(story, original);

        let err = generate_into(&MockLlmClient::replying("not json"), Section::Antagonist(0), &mut story, "")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidJson { .. }));
        assert_eq!(err.section(), "antagonist_0");
        assert_eq!(story, original);

        let err = generate_into(&MockLlmClient::replying("[1, 2]"), Section::Relationships, &mut story, "")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Malformed { .. }));
        assert_eq!(story, original);
    }

    #[tokio::test]
    async fn test_basic_needs_idea() {
        let llm = MockLlmClient::replying(r#"{"title": "T", "setting": "S", "totalChapters": "120", "wordsPerChapter": "2000"}"#);
        let mut story = StoryRecord::new(Language::En);
        story.genres = vec!["Romance".to_string()];

        let err = generate_into(&llm, Section::Basic, &mut story, "  ").await.unwrap_err();
        assert!(matches!(err, GenerationError::MissingIdea { .. }));
        assert!(llm.prompts.lock().unwrap().is_empty());

        generate_into(&llm, Section::Basic, &mut story, "a baker finds a starship").await.unwrap();
        assert_eq!(story.title, "T");
        assert_eq!(story.total_chapters, "120");
    }
}
