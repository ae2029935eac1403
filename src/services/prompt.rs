//! Prompt text and response schemas for section generation and chat.

use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use crate::story::{Character, Language, Relationship, StoryRecord};

/// A part of the story the generator can fill in. Indexed sections target a
/// single list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Basic,
    Core,
    MainPlot,
    Protagonist,
    LoveInterest(usize),
    Antagonist(usize),
    Relationships,
    WorldBuilding,
    MagicSystem,
    SingleArcAct(usize),
    Arc,
    Tone,
}

impl Section {
    pub fn id(&self) -> &'static str {
        match self {
            Section::Basic => "basic",
            Section::Core => "core",
            Section::MainPlot => "mainPlot",
            Section::Protagonist => "protagonist",
            Section::LoveInterest(_) => "loveInterest",
            Section::Antagonist(_) => "antagonist",
            Section::Relationships => "relationships",
            Section::WorldBuilding => "worldBuilding",
            Section::MagicSystem => "magicSystem",
            Section::SingleArcAct(_) => "singleArcAct",
            Section::Arc => "arc",
            Section::Tone => "tone",
        }
    }

    /// Parses an id such as `loveInterest` together with an optional index.
    /// Indexed sections default to the first entry.
    pub fn from_id(id: &str, index: Option<usize>) -> Option<Self> {
        let i = index.unwrap_or(0);
        Some(match id {
            "basic" => Section::Basic,
            "core" => Section::Core,
            "mainPlot" => Section::MainPlot,
            "protagonist" => Section::Protagonist,
            "loveInterest" => Section::LoveInterest(i),
            "antagonist" => Section::Antagonist(i),
            "relationships" => Section::Relationships,
            "worldBuilding" => Section::WorldBuilding,
            "magicSystem" => Section::MagicSystem,
            "singleArcAct" => Section::SingleArcAct(i),
            "arc" => Section::Arc,
            "tone" => Section::Tone,
            _ => return None,
        })
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            Section::LoveInterest(i) | Section::Antagonist(i) | Section::SingleArcAct(i) => Some(*i),
            _ => None,
        }
    }

    /// Top-level record keys a fragment result for this section may set.
    pub fn fragment_keys(&self) -> &'static [&'static str] {
        match self {
            Section::Basic => &["title", "setting", "totalChapters", "wordsPerChapter"],
            Section::Core => &["mainPlot", "protagonist", "loveInterests", "antagonists", "worldBuilding", "magicSystem"],
            Section::MainPlot => &["mainPlot"],
            Section::Relationships => &["relationships"],
            Section::WorldBuilding => &["worldBuilding"],
            Section::MagicSystem => &["magicSystem"],
            Section::Arc => &["storyArc"],
            Section::Tone => &["comedyLevel", "romanceLevel", "actionLevel", "maturityLevel", "proseStyle"],
            Section::Protagonist | Section::LoveInterest(_) | Section::Antagonist(_) | Section::SingleArcAct(_) => &[],
        }
    }
}

impl fmt::Display for Section {
    /// Same shape as the in-flight key: `loveInterest_1`, `core`, ...
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            Some(i) => write!(f, "{}_{}", self.id(), i),
            None => f.write_str(self.id()),
        }
    }
}

impl FromStr for Section {
    type Err = String;

    /// Accepts the `Display` form, e.g. `antagonist_0` or `tone`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, index) = match s.rsplit_once('_') {
            Some((id, n)) => (id, Some(n.parse::<usize>().map_err(|_| format!("bad section index in {}", s))?)),
            None => (s, None),
        };
        Section::from_id(id, index).ok_or_else(|| format!("unknown section: {}", s))
    }
}

/// Every section that applies to `story`, in form order. Gated sections only
/// appear when their genres are selected.
pub fn sections_for(story: &StoryRecord) -> Vec<Section> {
    let mut sections = vec![Section::Basic, Section::Core, Section::MainPlot, Section::Protagonist];
    sections.extend((0..story.love_interests.len()).map(Section::LoveInterest));
    sections.extend((0..story.antagonists.len()).map(Section::Antagonist));
    sections.push(Section::Relationships);
    if story.shows_world_building() {
        sections.push(Section::WorldBuilding);
    }
    if story.shows_magic_system() {
        sections.push(Section::MagicSystem);
    }
    sections.extend((0..story.story_arc.len()).map(Section::SingleArcAct));
    sections.push(Section::Arc);
    sections.push(Section::Tone);
    sections
}

pub fn language_instruction(language: Language) -> &'static str {
    match language {
        Language::Id => "Generate the entire JSON response strictly in Bahasa Indonesia, translating any English concepts in the prompt naturally.",
        Language::En => "Generate the entire JSON response strictly in English, translating any Indonesian concepts in the prompt naturally.",
    }
}

const PROFILE_FIELDS: &str = "name, age, gender, physical description, voice & speech style, key personality traits, habits, a primary goal, core principles, and a central conflict";

/// Full prompt for `section`. `context` is the pretty-printed story JSON;
/// `idea` is only read by the basic section.
pub fn section_prompt(section: Section, story: &StoryRecord, context: &str, idea: &str) -> String {
    let body = match section {
        Section::Basic => {
            let genres = story.all_genres().join(", ");
            format!(
                "Based on the user's idea: \"{}\" and their chosen genres: \"{}\", generate the basic info for a webnovel. \
                Come up with a fitting title, a setting, a planned number of chapters (between 100-300), and words per chapter (between 1500-3000).",
                idea, genres
            )
        }
        Section::Core => format!(
            "Based on the following story context: \n\n{}\n\nGenerate all core story elements. This includes:\n\
            1. A compelling main plot summary (3-5 sentences).\n\
            2. A DETAILED profile for the main protagonist (including their gender).\n\
            3. A DETAILED profile for TWO compelling love interests. IMPORTANT: The love interests MUST have a different gender from the protagonist (whose gender is specified in their profile in the context).\n\
            4. A DETAILED profile for ONE compelling antagonist.\n\
            5. For each character, provide: {}.\n\
            6. If the story genres (visible in the context) include Fantasy, Sci-Fi, etc., generate a brief (2-3 sentences) description for 'worldBuilding'. If not relevant, return an empty string.\n\
            7. If the story genres (visible in the context) include System, Fantasy, etc., generate a brief (2-3 sentences) description for 'magicSystem'. If not relevant, return an empty string.",
            context, PROFILE_FIELDS
        ),
        Section::MainPlot => format!(
            "Based on the story context provided below, generate a compelling main plot summary in 3-5 sentences.\n\n{}",
            context
        ),
        Section::Protagonist => format!(
            "Based on the story context provided below, generate a detailed profile for the main protagonist. Provide: {}.\n\n{}",
            PROFILE_FIELDS, context
        ),
        Section::LoveInterest(_) => format!(
            "Based on the story context provided below, create one compelling and unique love interest. \
            The protagonist's details (including gender) are in the context. The love interest you create MUST have a different gender from the protagonist. \
            Provide a detailed profile including: {} related to the protagonist.\n\n{}",
            PROFILE_FIELDS, context
        ),
        Section::Antagonist(_) => format!(
            "Based on the story context provided below, create one compelling antagonist. \
            Provide a detailed profile including: {} with the protagonist.\n\n{}",
            PROFILE_FIELDS, context
        ),
        Section::Relationships => format!(
            "Based on the character profiles in the context below, generate a list of 3-5 interesting and potentially conflict-driving relationships between them. \
            For each relationship, define who is involved, the type of relationship, and a short description of their dynamic.\n\n{}",
            context
        ),
        Section::WorldBuilding => format!(
            "Based on the story context provided below, describe the key world-building details in 2-3 sentences. This is for genres like Fantasy, Sci-Fi, etc.\n\n{}",
            context
        ),
        Section::MagicSystem => format!(
            "Based on the story context provided below, describe the magic or power system in 2-3 sentences. This is for genres like System, Fantasy, Wuxia, etc.\n\n{}",
            context
        ),
        Section::SingleArcAct(index) => {
            let total = if story.story_arc.is_empty() { 4 } else { story.story_arc.len() };
            format!(
                "Based on the story context provided below, generate a title and a 1-2 sentence description for Act {} of a {}-act story structure.\n\n{}",
                index + 1,
                total,
                context
            )
        }
        Section::Arc => format!(
            "Based on the following story context: \n\n{}\n\nGenerate a 4-act story arc. For each act, provide a title and a 1-2 sentence description of what happens.",
            context
        ),
        Section::Tone => format!(
            "Based on the following story context: \n\n{}\n\nSuggest the tone and style. Provide a comedy, romance, and action level from 1-10. \
            If the context contains mature genres, also suggest a maturity level from 1-10, otherwise default maturity to \"1\". Also, choose the most fitting prose style.",
            context
        ),
    };

    format!("{}\n\n{}", language_instruction(story.language), body)
}

fn string_prop(description: Option<&str>) -> Value {
    match description {
        Some(d) => json!({ "type": "STRING", "description": d }),
        None => json!({ "type": "STRING" }),
    }
}

pub fn character_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "name": string_prop(None),
            "age": string_prop(None),
            "gender": string_prop(None),
            "physicalDescription": string_prop(Some("A 1-2 sentence description of their physical appearance.")),
            "voiceAndSpeechStyle": string_prop(Some("A short description of their physical voice AND their typical speech patterns (e.g., speaks quickly, uses sarcasm, has a catchphrase).")),
            "personalityTraits": string_prop(Some("A 1-2 sentence summary of their key personality traits.")),
            "habits": string_prop(Some("A short description of a notable habit or quirk.")),
            "goal": string_prop(Some("Their primary motivation or goal in the story.")),
            "principles": string_prop(Some("A core principle or value they live by.")),
            "conflict": string_prop(Some("The central internal or external conflict they face.")),
        },
        "required": ["name", "age", "gender", "physicalDescription", "voiceAndSpeechStyle", "personalityTraits", "habits", "goal", "principles", "conflict"]
    })
}

fn relationship_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "character1": string_prop(Some("The name of the first character in the relationship.")),
            "character2": string_prop(Some("The name of the second character in the relationship.")),
            "type": string_prop(Some("The type of relationship (e.g., 'Rivals', 'Childhood Friends', 'Mentor-Mentee').")),
            "description": string_prop(Some("A 1-sentence description of their dynamic.")),
        },
        "required": ["character1", "character2", "type", "description"]
    })
}

fn act_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "title": string_prop(None),
            "description": string_prop(None),
        },
        "required": ["title", "description"]
    })
}

fn single_field_schema(key: &str, description: &str) -> Value {
    json!({
        "type": "OBJECT",
        "properties": { key: string_prop(Some(description)) },
        "required": [key]
    })
}

/// Response schema in the Gemini `responseSchema` dialect.
pub fn section_schema(section: Section) -> Value {
    match section {
        Section::Basic => json!({
            "type": "OBJECT",
            "properties": {
                "title": string_prop(Some("The title of the webnovel.")),
                "setting": string_prop(Some("A one or two sentence description of the story's setting.")),
                "totalChapters": string_prop(Some("A number between 100 and 300.")),
                "wordsPerChapter": string_prop(Some("A number between 1500 and 3000.")),
            },
            "required": ["title", "setting", "totalChapters", "wordsPerChapter"]
        }),
        Section::Core => json!({
            "type": "OBJECT",
            "properties": {
                "mainPlot": string_prop(None),
                "protagonist": character_schema(),
                "loveInterests": {
                    "type": "ARRAY",
                    "description": "An array of 2 detailed love interest profiles.",
                    "items": character_schema()
                },
                "antagonists": {
                    "type": "ARRAY",
                    "description": "An array of 1 detailed antagonist profile.",
                    "items": character_schema()
                },
                "worldBuilding": string_prop(Some("Optional: World-building details. Can be an empty string if not relevant to the genre.")),
                "magicSystem": string_prop(Some("Optional: Magic/System rules. Can be an empty string if not relevant to the genre.")),
            },
            "required": ["mainPlot", "protagonist", "loveInterests", "antagonists"]
        }),
        Section::MainPlot => single_field_schema("mainPlot", "A 3-5 sentence summary of the main plot."),
        Section::Protagonist | Section::LoveInterest(_) | Section::Antagonist(_) => character_schema(),
        Section::Relationships => json!({
            "type": "OBJECT",
            "properties": {
                "relationships": { "type": "ARRAY", "items": relationship_schema() }
            },
            "required": ["relationships"]
        }),
        Section::WorldBuilding => single_field_schema("worldBuilding", "Key aspects of the world building."),
        Section::MagicSystem => single_field_schema("magicSystem", "Description of the rules of magic or the 'System'."),
        Section::SingleArcAct(_) => act_schema(),
        Section::Arc => json!({
            "type": "OBJECT",
            "properties": {
                "storyArc": { "type": "ARRAY", "items": act_schema() }
            },
            "required": ["storyArc"]
        }),
        Section::Tone => json!({
            "type": "OBJECT",
            "properties": {
                "comedyLevel": string_prop(Some("A number from 1 to 10.")),
                "romanceLevel": string_prop(Some("A number from 1 to 10.")),
                "actionLevel": string_prop(Some("A number from 1 to 10.")),
                "maturityLevel": string_prop(Some("A number from 1 to 10.")),
                "proseStyle": string_prop(Some("The most fitting prose style.")),
            },
            "required": ["comedyLevel", "romanceLevel", "actionLevel", "maturityLevel", "proseStyle"]
        }),
    }
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

// --- Chat context ---

const SYSTEM_INSTRUCTION_EN: &str = "You are a creative writing partner for a webnovel author. \
Stay consistent with the story encyclopedia below: respect each character's voice, goals and relationships, \
the established setting and rules, and the requested tone and prose style. \
Help brainstorm, outline chapters, draft scenes and give candid feedback. Reply in English.";

const SYSTEM_INSTRUCTION_ID: &str = "Anda adalah mitra menulis kreatif untuk seorang penulis novel web. \
Tetap konsisten dengan ensiklopedia cerita di bawah ini: hormati suara, tujuan, dan hubungan setiap karakter, \
latar dan aturan yang sudah ditetapkan, serta nada dan gaya prosa yang diminta. \
Bantu bertukar ide, menyusun kerangka bab, menulis adegan, dan memberi masukan yang jujur. Balas dalam Bahasa Indonesia.";

fn or_na(value: &str) -> &str {
    if value.is_empty() { "N/A" } else { value }
}

fn format_character(character: &Character, role: &str) -> String {
    if !character.is_present() {
        return format!("\n**{}:** N/A", role);
    }
    format!(
        "\n**{}:**\n- Name: {}\n- Age: {}\n- Gender: {}\n- Physical Description: {}\n- Voice & Speech Style: {}\n- Personality Traits: {}\n- Habits: {}\n- Goal: {}\n- Principles: {}\n- Core Conflict: {}\n",
        role,
        or_na(&character.name),
        or_na(&character.age),
        or_na(&character.gender),
        or_na(&character.physical_description),
        or_na(&character.voice_and_speech_style),
        or_na(&character.personality_traits),
        or_na(&character.habits),
        or_na(&character.goal),
        or_na(&character.principles),
        or_na(&character.conflict),
    )
}

fn format_relationships(relationships: &[Relationship]) -> String {
    if relationships.is_empty() {
        return "N/A".to_string();
    }
    relationships
        .iter()
        .map(|r| format!("- {} & {}: [{}] {}", r.character1, r.character2, r.kind, r.description))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_list(characters: &[Character], role: &str) -> String {
    if characters.is_empty() {
        return "N/A".to_string();
    }
    characters
        .iter()
        .enumerate()
        .map(|(i, c)| format_character(c, &format!("{} #{}", role, i + 1)))
        .collect()
}

/// The story rendered as the context block appended to the chat system
/// instruction.
pub fn story_context(story: &StoryRecord) -> String {
    let arc = story
        .story_arc
        .iter()
        .map(|act| format!("- {}: {}", act.title, act.description))
        .collect::<Vec<_>>()
        .join("\n");

    let world = match story.world_building.as_deref() {
        Some(w) if !w.is_empty() => format!("\n**WORLD BUILDING:** {}", w),
        _ => String::new(),
    };
    let magic = match story.magic_system.as_deref() {
        Some(m) if !m.is_empty() => format!("\n**MAGIC/SYSTEM RULES:** {}", m),
        _ => String::new(),
    };
    let maturity = if story.maturity_above_floor() {
        format!("- Maturity: {}/10", story.maturity_level)
    } else {
        String::new()
    };

    format!(
        "\n--- STORY ENCYCLOPEDIA CONTEXT ---\n\n\
        **TITLE:** {title}\n**GENRE:** {genres}\n**SETTING:** {setting}\n\n\
        **CORE PLOT:** {plot}\n\n\
        **CHARACTERS:**\n{protagonist}\n{love}\n{antagonists}\n\n\
        **RELATIONSHIPS:**\n{relationships}\n\n\
        {world}\n{magic}\n\n\
        **STORY ARC:**\n{arc}\n\n\
        **TONE & STYLE:**\n- Comedy: {comedy}/10\n- Romance: {romance}/10\n- Action: {action}/10\n{maturity}\n- Prose: {prose}\n\n\
        --- END OF CONTEXT ---\n\n\
        Based on this context, assist the user in developing their story.\n",
        title = story.title,
        genres = story.all_genres().join(", "),
        setting = story.setting,
        plot = story.main_plot,
        protagonist = format_character(&story.protagonist, "PROTAGONIST"),
        love = format_list(&story.love_interests, "LOVE INTEREST"),
        antagonists = format_list(&story.antagonists, "ANTAGONIST"),
        relationships = format_relationships(&story.relationships),
        world = world,
        magic = magic,
        arc = arc,
        comedy = story.comedy_level,
        romance = story.romance_level,
        action = story.action_level,
        maturity = maturity,
        prose = story.prose_style,
    )
}

pub fn chat_system_instruction(story: &StoryRecord) -> String {
    let base = match story.language {
        Language::En => SYSTEM_INSTRUCTION_EN,
        Language::Id => SYSTEM_INSTRUCTION_ID,
    };
    format!("{}{}", base, story_context(story))
}
