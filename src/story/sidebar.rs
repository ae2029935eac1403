use std::fmt::Write;

use crate::story::model::{Character, Language, Relationship, StoryRecord};

struct Labels {
    basic: &'static str,
    core: &'static str,
    characters: &'static str,
    relationships: &'static str,
    world: &'static str,
    tone: &'static str,
    prose: &'static str,
    protagonist: &'static str,
    love_interest: &'static str,
    antagonist: &'static str,
    age: &'static str,
    gender: &'static str,
    physical: &'static str,
    voice: &'static str,
    traits: &'static str,
    habits: &'static str,
    goal: &'static str,
    principles: &'static str,
    conflict: &'static str,
    dangling: &'static str,
}

const LABELS_EN: Labels = Labels {
    basic: "Basic Info",
    core: "Core Plot",
    characters: "Characters",
    relationships: "Relationships",
    world: "World & Rules",
    tone: "Tone (out of 10)",
    prose: "Prose Style",
    protagonist: "Protagonist",
    love_interest: "Love Interest",
    antagonist: "Antagonist",
    age: "Age",
    gender: "Gender",
    physical: "Physical Description",
    voice: "Voice & Speech Style",
    traits: "Personality",
    habits: "Habits",
    goal: "Goal",
    principles: "Principles",
    conflict: "Conflict",
    dangling: "names a character who is not in the story",
};

const LABELS_ID: Labels = Labels {
    basic: "Info Dasar",
    core: "Plot Inti",
    characters: "Karakter",
    relationships: "Hubungan",
    world: "Dunia & Aturan",
    tone: "Nada (dari 10)",
    prose: "Gaya Prosa",
    protagonist: "Protagonis",
    love_interest: "Pasangan",
    antagonist: "Antagonis",
    age: "Usia",
    gender: "Gender",
    physical: "Deskripsi Fisik",
    voice: "Suara & Gaya Bicara",
    traits: "Sifat",
    habits: "Kebiasaan",
    goal: "Tujuan",
    principles: "Prinsip",
    conflict: "Konflik",
    dangling: "menyebut karakter yang tidak ada di cerita",
};

fn labels(language: Language) -> &'static Labels {
    match language {
        Language::En => &LABELS_EN,
        Language::Id => &LABELS_ID,
    }
}

fn pair(out: &mut String, label: &str, value: &str) {
    if !value.trim().is_empty() {
        let _ = writeln!(out, "  {}: {}", label, value);
    }
}

fn character(out: &mut String, labels: &Labels, role: &str, c: &Character) {
    if !c.is_present() {
        return;
    }
    let _ = writeln!(out, "  {}: {}", role, c.name);
    for (label, value) in [
        (labels.age, &c.age),
        (labels.gender, &c.gender),
        (labels.physical, &c.physical_description),
        (labels.voice, &c.voice_and_speech_style),
        (labels.traits, &c.personality_traits),
        (labels.habits, &c.habits),
        (labels.goal, &c.goal),
        (labels.principles, &c.principles),
        (labels.conflict, &c.conflict),
    ] {
        if !value.trim().is_empty() {
            let _ = writeln!(out, "    {}: {}", label, value);
        }
    }
}

/// A relationship is only shown once both names and its type are filled in.
pub fn is_displayable(relationship: &Relationship) -> bool {
    !relationship.character1.is_empty() && !relationship.character2.is_empty() && !relationship.kind.is_empty()
}

/// Plain-text rendering of the story overview shown next to the chat.
pub fn render(story: &StoryRecord) -> String {
    let labels = labels(story.language);
    let mut out = String::new();

    let _ = writeln!(out, "[{}]", labels.basic);
    pair(&mut out, "Title", &story.title);
    pair(&mut out, "Genre", &story.all_genres().join(", "));
    pair(&mut out, "Setting", &story.setting);

    let _ = writeln!(out, "[{}]", labels.core);
    pair(&mut out, "Main Plot", &story.main_plot);

    let _ = writeln!(out, "[{}]", labels.characters);
    character(&mut out, labels, labels.protagonist, &story.protagonist);
    for (i, li) in story.love_interests.iter().enumerate() {
        character(&mut out, labels, &format!("{} #{}", labels.love_interest, i + 1), li);
    }
    for (i, ant) in story.antagonists.iter().enumerate() {
        character(&mut out, labels, &format!("{} #{}", labels.antagonist, i + 1), ant);
    }

    let shown: Vec<&Relationship> = story.relationships.iter().filter(|r| is_displayable(r)).collect();
    if !shown.is_empty() {
        let _ = writeln!(out, "[{}]", labels.relationships);
        let dangling = story.dangling_relationships();
        for r in shown {
            let _ = writeln!(out, "  {} & {} [{}] {}", r.character1, r.character2, r.kind, r.description);
            if dangling.contains(&r) {
                let _ = writeln!(out, "    ! {}", labels.dangling);
            }
        }
    }

    let world = story.world_building.as_deref().unwrap_or("");
    let magic = story.magic_system.as_deref().unwrap_or("");
    if !world.is_empty() || !magic.is_empty() {
        let _ = writeln!(out, "[{}]", labels.world);
        pair(&mut out, "World Building", world);
        pair(&mut out, "System/Magic Rules", magic);
    }

    let _ = writeln!(out, "[{}]", labels.tone);
    pair(&mut out, "Comedy", &story.comedy_level);
    pair(&mut out, "Romance", &story.romance_level);
    pair(&mut out, "Action", &story.action_level);
    if story.maturity_above_floor() {
        pair(&mut out, "Maturity", &story.maturity_level);
    }

    let _ = writeln!(out, "[{}]", labels.prose);
    pair(&mut out, "Style", &story.prose_style);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::model::Language;

    #[test]
    fn test_render_hides_unnamed_and_incomplete_entries() {
        let mut story = StoryRecord::new(Language::En);
        story.title = "Ashen Crown".to_string();
        story.protagonist = Character::named("Kai");
        story.love_interests = vec![Character::default(), Character::named("Mira")];
        story.relationships = vec![
            Relationship {
                character1: "Kai".to_string(),
                character2: "Mira".to_string(),
                kind: "Allies".to_string(),
                description: "Reluctant".to_string(),
                ..Relationship::default()
            },
            Relationship {
                character1: "Kai".to_string(),
                ..Relationship::default()
            },
        ];

        let text = render(&story);
        assert!(text.contains("Protagonist: Kai"));
        assert!(text.contains("Love Interest #2: Mira"));
        assert!(!text.contains("Love Interest #1"));
        assert!(text.contains("Kai & Mira [Allies] Reluctant"));
        assert!(!text.contains("[]"));
        assert!(!text.contains("Maturity"));
        assert!(!text.contains("World & Rules"));
        assert!(!text.contains("! "));
    }

    #[test]
    fn test_render_flags_relationship_to_unknown_character() {
        let mut story = StoryRecord::new(Language::En);
        story.protagonist = Character::named("Kai");
        story.relationships = vec![Relationship {
            character1: "Kai".to_string(),
            character2: "Ghost".to_string(),
            kind: "Rivals".to_string(),
            ..Relationship::default()
        }];

        let text = render(&story);
        assert!(text.contains("Kai & Ghost [Rivals]"));
        assert!(text.contains("! names a character who is not in the story"));
    }

    #[test]
    fn test_render_localized_headers() {
        let mut story = StoryRecord::new(Language::Id);
        story.maturity_level = "6".to_string();
        let text = render(&story);
        assert!(text.contains("[Info Dasar]"));
        assert!(text.contains("Maturity: 6"));
    }
}
