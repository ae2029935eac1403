use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::story::catalog;

#[derive(Serialize, Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Id,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Id => "id",
        }
    }

    /// Unknown codes fall back to English.
    pub fn from_code(code: &str) -> Self {
        match code {
            "id" => Language::Id,
            _ => Language::En,
        }
    }

    /// Localized "Act"/"Babak" title for the act at `number` (1-based).
    pub fn act_title(self, number: usize) -> String {
        match self {
            Language::En => format!("Act {}", number),
            Language::Id => format!("Babak {}", number),
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Character {
    pub name: String,
    pub age: String,
    pub gender: String,
    pub physical_description: String,
    pub voice_and_speech_style: String,
    pub personality_traits: String,
    pub habits: String,
    pub goal: String,
    pub principles: String,
    pub conflict: String,
    /// Keys this version does not know about, kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Character {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// A character with a blank name is treated as absent outside the raw lists.
    pub fn is_present(&self) -> bool {
        !self.name.trim().is_empty()
    }

    /// Field by its serialized (camelCase) name.
    pub fn field_mut(&mut self, key: &str) -> Option<&mut String> {
        Some(match key {
            "name" => &mut self.name,
            "age" => &mut self.age,
            "gender" => &mut self.gender,
            "physicalDescription" => &mut self.physical_description,
            "voiceAndSpeechStyle" => &mut self.voice_and_speech_style,
            "personalityTraits" => &mut self.personality_traits,
            "habits" => &mut self.habits,
            "goal" => &mut self.goal,
            "principles" => &mut self.principles,
            "conflict" => &mut self.conflict,
            _ => return None,
        })
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Relationship {
    pub character1: String,
    pub character2: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Act {
    pub title: String,
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Act {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Which character list a positional edit targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CharacterList {
    LoveInterests,
    Antagonists,
}

/// Form sections that can be reset to their empty defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearableSection {
    Core,
    Relationships,
    Arc,
    Tone,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryRecord {
    pub language: Language,

    pub title: String,
    pub genres: Vec<String>,
    pub other_genre: String,
    pub setting: String,
    pub total_chapters: String,
    pub words_per_chapter: String,

    pub main_plot: String,
    pub protagonist: Character,
    pub love_interests: Vec<Character>,
    pub antagonists: Vec<Character>,
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magic_system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_building: Option<String>,

    pub story_arc: Vec<Act>,

    pub comedy_level: String,
    pub romance_level: String,
    pub action_level: String,
    pub maturity_level: String,
    pub prose_style: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for StoryRecord {
    fn default() -> Self {
        Self::new(Language::En)
    }
}

impl StoryRecord {
    /// The blank record a new story starts from.
    pub fn new(language: Language) -> Self {
        Self {
            language,
            title: String::new(),
            genres: Vec::new(),
            other_genre: String::new(),
            setting: String::new(),
            total_chapters: String::new(),
            words_per_chapter: String::new(),
            main_plot: String::new(),
            protagonist: Character::default(),
            love_interests: vec![Character::default()],
            antagonists: vec![Character::default()],
            relationships: Vec::new(),
            magic_system: Some(String::new()),
            world_building: Some(String::new()),
            story_arc: vec![Act::titled(language.act_title(1))],
            comedy_level: catalog::DEFAULT_LEVEL.to_string(),
            romance_level: catalog::DEFAULT_LEVEL.to_string(),
            action_level: catalog::DEFAULT_LEVEL.to_string(),
            maturity_level: catalog::DEFAULT_MATURITY.to_string(),
            prose_style: catalog::default_prose_style().to_string(),
            extra: Map::new(),
        }
    }

    /// Selected genres plus the free-text one, blanks dropped.
    pub fn all_genres(&self) -> Vec<&str> {
        self.genres
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.other_genre.as_str()))
            .filter(|g| !g.is_empty())
            .collect()
    }

    /// Protagonist, love interests and antagonists that have a name.
    /// Relationship editors offer exactly this set; stored relationships are
    /// not checked against it.
    pub fn named_characters(&self) -> Vec<&Character> {
        std::iter::once(&self.protagonist)
            .chain(self.love_interests.iter())
            .chain(self.antagonists.iter())
            .filter(|c| c.is_present())
            .collect()
    }

    /// Relationships whose participants are not (or no longer) named characters.
    pub fn dangling_relationships(&self) -> Vec<&Relationship> {
        let names: Vec<&str> = self.named_characters().iter().map(|c| c.name.as_str()).collect();
        self.relationships
            .iter()
            .filter(|r| {
                !names.contains(&r.character1.as_str()) || !names.contains(&r.character2.as_str())
            })
            .collect()
    }

    pub fn characters_mut(&mut self, list: CharacterList) -> &mut Vec<Character> {
        match list {
            CharacterList::LoveInterests => &mut self.love_interests,
            CharacterList::Antagonists => &mut self.antagonists,
        }
    }

    pub fn shows_world_building(&self) -> bool {
        catalog::enables_world_building(&self.genres)
    }

    pub fn shows_magic_system(&self) -> bool {
        catalog::enables_magic_system(&self.genres)
    }

    pub fn shows_maturity(&self) -> bool {
        catalog::enables_maturity(&self.genres)
    }

    /// Maturity only matters once it is raised above the floor.
    pub fn maturity_above_floor(&self) -> bool {
        self.maturity_level
            .trim()
            .parse::<i64>()
            .map(|level| level > 1)
            .unwrap_or(false)
    }

    /// Adds or removes `genre`. While a new story is being drafted, losing the
    /// last genre that enables a gated field also clears that field.
    pub fn toggle_genre(&mut self, genre: &str, editing: bool) {
        if let Some(pos) = self.genres.iter().position(|g| g == genre) {
            self.genres.remove(pos);
        } else {
            self.genres.push(genre.to_string());
        }

        if !editing {
            if !self.shows_world_building() {
                self.world_building = Some(String::new());
            }
            if !self.shows_magic_system() {
                self.magic_system = Some(String::new());
            }
        }
    }

    pub fn add_character(&mut self, list: CharacterList) {
        self.characters_mut(list).push(Character::default());
    }

    pub fn remove_character(&mut self, list: CharacterList, index: usize) {
        let characters = self.characters_mut(list);
        if index < characters.len() {
            characters.remove(index);
        }
    }

    pub fn add_relationship(&mut self) {
        self.relationships.push(Relationship::default());
    }

    pub fn remove_relationship(&mut self, index: usize) {
        if index < self.relationships.len() {
            self.relationships.remove(index);
        }
    }

    pub fn add_act(&mut self) {
        let title = self.language.act_title(self.story_arc.len() + 1);
        self.story_arc.push(Act::titled(title));
    }

    /// Returns false when the act could not be removed: the arc never drops
    /// below one act.
    pub fn remove_act(&mut self, index: usize) -> bool {
        if self.story_arc.len() <= 1 || index >= self.story_arc.len() {
            return false;
        }
        self.story_arc.remove(index);
        true
    }

    pub fn clear_section(&mut self, section: ClearableSection) {
        match section {
            ClearableSection::Core => {
                self.main_plot.clear();
                self.protagonist = Character::default();
                self.love_interests = vec![Character::default()];
                self.antagonists = vec![Character::default()];
                self.magic_system = Some(String::new());
                self.world_building = Some(String::new());
            }
            ClearableSection::Relationships => {
                self.relationships.clear();
            }
            ClearableSection::Arc => {
                self.story_arc = vec![Act::titled(self.language.act_title(1))];
            }
            ClearableSection::Tone => {
                self.comedy_level = catalog::DEFAULT_LEVEL.to_string();
                self.romance_level = catalog::DEFAULT_LEVEL.to_string();
                self.action_level = catalog::DEFAULT_LEVEL.to_string();
                self.maturity_level = catalog::DEFAULT_MATURITY.to_string();
                self.prose_style = catalog::default_prose_style().to_string();
            }
        }
    }

    /// Drops values for genre-gated fields whose genres are not selected.
    pub fn finalize_for_submit(&mut self) {
        if !self.shows_world_building() {
            self.world_building = Some(String::new());
        }
        if !self.shows_magic_system() {
            self.magic_system = Some(String::new());
        }
        if !self.shows_maturity() {
            self.maturity_level = catalog::DEFAULT_MATURITY.to_string();
        }
    }

    fn has_genre(&self) -> bool {
        !self.genres.is_empty() || !self.other_genre.trim().is_empty()
    }

    /// Basic info can be generated once there is an idea and a genre.
    pub fn is_basic_info_ready(&self, idea: &str) -> bool {
        !idea.trim().is_empty() && self.has_genre()
    }

    pub fn is_basic_info_complete(&self) -> bool {
        !self.title.trim().is_empty() && self.has_genre() && !self.setting.trim().is_empty()
    }

    pub fn is_core_story_complete(&self) -> bool {
        self.is_basic_info_complete()
            && !self.main_plot.trim().is_empty()
            && self.protagonist.is_present()
    }

    pub fn is_story_arc_complete(&self) -> bool {
        self.is_core_story_complete()
            && !self.story_arc.is_empty()
            && self
                .story_arc
                .iter()
                .all(|act| !act.title.trim().is_empty() && !act.description.trim().is_empty())
    }
}
