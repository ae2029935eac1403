//! Upgrades any previously persisted or imported story value to the current
//! `StoryRecord` shape.
//!
//! The upgrade is a fixed sequence of stages over the raw JSON object. Each
//! stage only touches the keys it owns and leaves already-current data alone,
//! so running the whole sequence on its own output changes nothing. Keys the
//! stages do not know about pass through untouched; only the legacy keys a
//! stage consumes are removed.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::story::catalog;
use crate::story::model::{Act, Character, Language, StoryRecord};

type Object = Map<String, Value>;
type Stage = fn(&mut Object);

#[derive(Debug, Error)]
pub enum MalformedInput {
    #[error("story data is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("story data must be a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("story data could not be brought into shape: {0}")]
    Shape(#[source] serde_json::Error),
}

pub const CHARACTER_FIELDS: &[&str] = &[
    "name",
    "age",
    "gender",
    "physicalDescription",
    "voiceAndSpeechStyle",
    "personalityTraits",
    "habits",
    "goal",
    "principles",
    "conflict",
];

const RELATIONSHIP_FIELDS: &[&str] = &["character1", "character2", "type", "description"];
const ACT_FIELDS: &[&str] = &["title", "description"];
const CHARACTER_LISTS: &[&str] = &["loveInterests", "antagonists"];

const NUMBERED_LOVE_INTERESTS: &[&str] = &["loveInterest1", "loveInterest2", "loveInterest3"];
const SINGLE_ANTAGONIST: &str = "antagonist";
/// Flat legacy protagonist keys and the character field each one feeds.
const FLAT_PROTAGONIST: &[(&str, &str)] = &[
    ("protagonistName", "name"),
    ("protagonistAge", "age"),
    ("protagonistPersonality", "personalityTraits"),
    ("protagonistGoal", "goal"),
    ("protagonistConflict", "conflict"),
];
const LEGACY_VOICE: &str = "voiceDescription";

/// Stage order matters: arrays must exist before their elements are upgraded,
/// and the protagonist must be structured before fields are backfilled on it.
const STAGES: &[(&str, Stage)] = &[
    ("collapse_numbered_fields", collapse_numbered_fields),
    ("promote_flat_protagonist", promote_flat_protagonist),
    ("upgrade_character_arrays", upgrade_character_arrays),
    ("backfill_gender", backfill_gender),
    ("backfill_relationships", backfill_relationships),
    ("rename_voice_field", rename_voice_field),
    ("conform_shapes", conform_shapes),
];

/// Decodes JSON text and migrates it.
pub fn parse(text: &str) -> Result<StoryRecord, MalformedInput> {
    let value: Value = serde_json::from_str(text).map_err(MalformedInput::InvalidJson)?;
    migrate(&value)
}

/// Produces a current-shape record from any JSON object. Only non-object
/// input is rejected.
pub fn migrate(input: &Value) -> Result<StoryRecord, MalformedInput> {
    let Value::Object(object) = input else {
        return Err(MalformedInput::NotAnObject(kind_of(input)));
    };

    let mut object = object.clone();
    upgrade(&mut object);
    serde_json::from_value(Value::Object(object)).map_err(MalformedInput::Shape)
}

/// Runs every stage in order over a raw story object.
pub fn upgrade(object: &mut Object) {
    for (name, stage) in STAGES {
        stage(object);
        log::trace!("story migration stage {} applied", name);
    }
}

/// Reads a single character profile, e.g. one returned by the generator.
pub fn character_from_value(value: &Value) -> Result<Character, MalformedInput> {
    let Value::Object(object) = value else {
        return Err(MalformedInput::NotAnObject(kind_of(value)));
    };
    let mut object = object.clone();
    rename_voice_on(&mut object);
    conform_fields(&mut object, CHARACTER_FIELDS);
    serde_json::from_value(Value::Object(object)).map_err(MalformedInput::Shape)
}

pub fn act_from_value(value: &Value) -> Result<Act, MalformedInput> {
    let Value::Object(object) = value else {
        return Err(MalformedInput::NotAnObject(kind_of(value)));
    };
    let mut object = object.clone();
    conform_fields(&mut object, ACT_FIELDS);
    serde_json::from_value(Value::Object(object)).map_err(MalformedInput::Shape)
}

// --- Stages ---

/// Pre: `loveInterest1..3` and/or a singular `antagonist` string may exist.
/// Post: neither legacy key remains; their non-empty values live in the
/// array fields unless those arrays already existed.
fn collapse_numbered_fields(object: &mut Object) {
    let has_numbered = NUMBERED_LOVE_INTERESTS.iter().any(|k| !is_absent(object, k));
    if has_numbered && is_absent(object, "loveInterests") {
        let collected: Vec<Value> = NUMBERED_LOVE_INTERESTS
            .iter()
            .filter_map(|k| object.get(*k))
            .filter(|v| is_truthy(v))
            .cloned()
            .collect();
        object.insert("loveInterests".to_string(), Value::Array(collected));
    }

    if is_absent(object, "antagonists") {
        if let Some(Value::String(name)) = object.get(SINGLE_ANTAGONIST) {
            if !name.is_empty() {
                let wrapped = Value::Array(vec![Value::String(name.clone())]);
                object.insert("antagonists".to_string(), wrapped);
            }
        }
    }

    for key in NUMBERED_LOVE_INTERESTS {
        object.remove(*key);
    }
    object.remove(SINGLE_ANTAGONIST);
}

/// Pre: flat `protagonist*` keys may exist, or `protagonist` may be missing
/// or not an object.
/// Post: `protagonist` is an object and no flat key remains. Skipped when a
/// structured protagonist exists and there are no flat keys.
fn promote_flat_protagonist(object: &mut Object) {
    let has_flat = FLAT_PROTAGONIST.iter().any(|(flat, _)| object.contains_key(*flat));
    let structured = matches!(object.get("protagonist"), Some(Value::Object(_)));
    if structured && !has_flat {
        return;
    }

    let mut protagonist = empty_character();
    for (flat, field) in FLAT_PROTAGONIST {
        if let Some(value) = object.remove(*flat) {
            protagonist.insert(field.to_string(), Value::String(text_of(&value)));
        }
    }
    object.insert("protagonist".to_string(), Value::Object(protagonist));
}

/// Pre: character arrays may be missing or hold plain name strings.
/// Post: both arrays exist; a list whose first element is a string has been
/// rebuilt as characters named after each entry.
fn upgrade_character_arrays(object: &mut Object) {
    for key in CHARACTER_LISTS {
        match object.get(*key) {
            Some(Value::Array(_)) => {}
            Some(Value::String(name)) if !name.is_empty() => {
                let wrapped = Value::Array(vec![Value::String(name.clone())]);
                object.insert(key.to_string(), wrapped);
            }
            _ => {
                object.insert(key.to_string(), Value::Array(Vec::new()));
            }
        }

        if let Some(Value::Array(items)) = object.get_mut(*key) {
            if matches!(items.first(), Some(Value::String(_))) {
                *items = items
                    .iter()
                    .map(|item| match item {
                        Value::Object(_) => item.clone(),
                        other => Value::Object(named_character(&text_of(other))),
                    })
                    .collect();
            }
        }
    }
}

/// Post: every structured character has a `gender` key.
fn backfill_gender(object: &mut Object) {
    for_each_character(object, |character| {
        character
            .entry("gender")
            .or_insert_with(|| Value::String(String::new()));
    });
}

/// Post: `relationships` exists.
fn backfill_relationships(object: &mut Object) {
    if is_absent(object, "relationships") {
        object.insert("relationships".to_string(), Value::Array(Vec::new()));
    }
}

/// Post: no character carries `voiceDescription`; its value moved to
/// `voiceAndSpeechStyle`.
fn rename_voice_field(object: &mut Object) {
    for_each_character(object, rename_voice_on);
}

/// Post: every known field has its declared shape. Scalars are strings,
/// missing scalars take the blank-story defaults, list elements that are not
/// objects are dropped, and the story arc holds at least one act.
fn conform_shapes(object: &mut Object) {
    let language = Language::from_code(object.get("language").and_then(Value::as_str).unwrap_or(""));
    object.insert("language".to_string(), Value::String(language.code().to_string()));

    let text_defaults: [(&str, &str); 11] = [
        ("title", ""),
        ("otherGenre", ""),
        ("setting", ""),
        ("totalChapters", ""),
        ("wordsPerChapter", ""),
        ("mainPlot", ""),
        ("comedyLevel", catalog::DEFAULT_LEVEL),
        ("romanceLevel", catalog::DEFAULT_LEVEL),
        ("actionLevel", catalog::DEFAULT_LEVEL),
        ("maturityLevel", catalog::DEFAULT_MATURITY),
        ("proseStyle", catalog::default_prose_style()),
    ];
    for (key, default) in text_defaults {
        conform_text(object, key, default);
    }

    for key in ["worldBuilding", "magicSystem"] {
        match object.get(key) {
            None => {}
            Some(Value::Null) => {
                object.remove(key);
            }
            Some(value) => {
                let text = text_of(value);
                object.insert(key.to_string(), Value::String(text));
            }
        }
    }

    let genres: Vec<Value> = match object.get("genres") {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|g| matches!(g, Value::String(_) | Value::Number(_)))
            .map(|g| Value::String(text_of(g)))
            .collect(),
        _ => Vec::new(),
    };
    object.insert("genres".to_string(), Value::Array(genres));

    match object.get_mut("protagonist") {
        Some(Value::Object(protagonist)) => conform_fields(protagonist, CHARACTER_FIELDS),
        _ => {
            object.insert("protagonist".to_string(), Value::Object(empty_character()));
        }
    }

    for key in CHARACTER_LISTS {
        conform_list(object, key, CHARACTER_FIELDS);
    }
    conform_list(object, "relationships", RELATIONSHIP_FIELDS);
    conform_list(object, "storyArc", ACT_FIELDS);

    if let Some(Value::Array(acts)) = object.get_mut("storyArc") {
        if acts.is_empty() {
            let mut act = Object::new();
            act.insert("title".to_string(), Value::String(language.act_title(1)));
            act.insert("description".to_string(), Value::String(String::new()));
            acts.push(Value::Object(act));
        }
    }
}

// --- Helpers ---

fn for_each_character(object: &mut Object, mut f: impl FnMut(&mut Object)) {
    if let Some(Value::Object(protagonist)) = object.get_mut("protagonist") {
        f(protagonist);
    }
    for key in CHARACTER_LISTS {
        if let Some(Value::Array(items)) = object.get_mut(*key) {
            for item in items.iter_mut() {
                if let Value::Object(character) = item {
                    f(character);
                }
            }
        }
    }
}

fn rename_voice_on(character: &mut Object) {
    if let Some(voice) = character.remove(LEGACY_VOICE) {
        character.insert("voiceAndSpeechStyle".to_string(), voice);
    }
}

fn conform_list(object: &mut Object, key: &str, fields: &[&str]) {
    let items: Vec<Value> = match object.remove(key) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(mut entry) => {
                    conform_fields(&mut entry, fields);
                    Some(Value::Object(entry))
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    object.insert(key.to_string(), Value::Array(items));
}

fn conform_fields(object: &mut Object, fields: &[&str]) {
    for field in fields {
        conform_text(object, field, "");
    }
}

fn conform_text(object: &mut Object, key: &str, default: &str) {
    let replacement = match object.get(key) {
        Some(Value::String(_)) => return,
        Some(value @ (Value::Number(_) | Value::Bool(_))) => text_of(value),
        _ => default.to_string(),
    };
    object.insert(key.to_string(), Value::String(replacement));
}

fn empty_character() -> Object {
    CHARACTER_FIELDS
        .iter()
        .map(|f| (f.to_string(), Value::String(String::new())))
        .collect()
}

fn named_character(name: &str) -> Object {
    let mut character = empty_character();
    character.insert("name".to_string(), Value::String(name.to_string()));
    character
}

fn is_absent(object: &Object, key: &str) -> bool {
    matches!(object.get(key), None | Some(Value::Null))
}

/// Loose truthiness used when collecting legacy numbered slots.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn migrated(input: Value) -> StoryRecord {
        migrate(&input).expect("object input must migrate")
    }

    fn remigrated(story: &StoryRecord) -> StoryRecord {
        migrated(serde_json::to_value(story).unwrap())
    }

    fn keys_of(story: &StoryRecord) -> Vec<String> {
        serde_json::to_value(story)
            .unwrap()
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect()
    }

    fn legacy_fixtures() -> Vec<Value> {
        vec![
            json!({}),
            json!({
                "title": "Old Days",
                "loveInterest1": "A",
                "loveInterest2": "B",
                "loveInterest3": "",
                "antagonist": "Villain",
                "protagonistName": "Kai",
                "protagonistGoal": "Survive",
            }),
            json!({
                "protagonist": { "name": "Lin", "voiceDescription": "raspy" },
                "loveInterests": ["Mira", "Sol"],
                "antagonists": [{ "name": "Vex", "gender": "f" }],
                "storyArc": [],
                "comedyLevel": 7,
                "genres": ["Fantasy", 3, null],
                "language": "id",
                "customNote": { "pinned": true },
            }),
            json!({
                "protagonist": "just a string",
                "relationships": null,
                "worldBuilding": null,
                "magicSystem": "Runes",
                "storyArc": [{ "title": "Act 1", "description": "Start" }, "junk"],
            }),
            json!({
                "protagonist": { "name": "Lin" },
                "protagonistName": "Kai",
            }),
        ]
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(matches!(migrate(&json!([1, 2])), Err(MalformedInput::NotAnObject("an array"))));
        assert!(matches!(migrate(&json!("story")), Err(MalformedInput::NotAnObject(_))));
        assert!(matches!(parse("{not json"), Err(MalformedInput::InvalidJson(_))));
        assert!(matches!(parse("null"), Err(MalformedInput::NotAnObject("null"))));
    }

    #[test]
    fn test_migration_is_idempotent() {
        for fixture in legacy_fixtures() {
            let once = migrated(fixture.clone());
            let twice = remigrated(&once);
            assert_eq!(once, twice, "not idempotent for {}", fixture);
        }
    }

    #[test]
    fn test_upgrade_is_a_no_op_on_current_shape() {
        for fixture in legacy_fixtures() {
            let current = serde_json::to_value(migrated(fixture)).unwrap();
            let mut object = current.as_object().unwrap().clone();
            upgrade(&mut object);
            assert_eq!(Value::Object(object), current);
        }
    }

    #[test]
    fn test_every_field_present_with_its_shape() {
        for fixture in legacy_fixtures() {
            let value = serde_json::to_value(migrated(fixture)).unwrap();
            let obj = value.as_object().unwrap();
            for key in ["title", "otherGenre", "setting", "totalChapters", "wordsPerChapter", "mainPlot", "comedyLevel", "romanceLevel", "actionLevel", "maturityLevel", "proseStyle", "language"] {
                assert!(obj[key].is_string(), "{} should be a string", key);
            }
            for key in ["genres", "loveInterests", "antagonists", "relationships", "storyArc"] {
                assert!(obj[key].is_array(), "{} should be an array", key);
            }
            assert!(obj["protagonist"].is_object());
            for field in CHARACTER_FIELDS {
                assert!(obj["protagonist"][*field].is_string());
            }
            assert!(!obj["storyArc"].as_array().unwrap().is_empty());
        }
    }

    #[test]
    fn test_numbered_love_interests_collapse() {
        let story = migrated(json!({
            "loveInterest1": "A",
            "loveInterest2": "B",
            "loveInterest3": "",
        }));
        assert_eq!(story.love_interests, vec![Character::named("A"), Character::named("B")]);
        let keys = keys_of(&story);
        for legacy in NUMBERED_LOVE_INTERESTS {
            assert!(!keys.contains(&legacy.to_string()));
        }
    }

    #[test]
    fn test_numbered_fields_do_not_override_existing_array() {
        let story = migrated(json!({
            "loveInterest1": "Stale",
            "loveInterests": [{ "name": "Current" }],
        }));
        assert_eq!(story.love_interests.len(), 1);
        assert_eq!(story.love_interests[0].name, "Current");
        assert!(!keys_of(&story).contains(&"loveInterest1".to_string()));
    }

    #[test]
    fn test_single_antagonist_wraps() {
        let story = migrated(json!({ "antagonist": "Villain" }));
        assert_eq!(story.antagonists, vec![Character::named("Villain")]);
        assert!(!keys_of(&story).contains(&"antagonist".to_string()));
    }

    #[test]
    fn test_string_array_upgrade() {
        let story = migrated(json!({ "antagonists": ["Villain"] }));
        let value = serde_json::to_value(&story.antagonists).unwrap();
        assert_eq!(
            value,
            json!([{
                "name": "Villain", "age": "", "gender": "", "physicalDescription": "",
                "voiceAndSpeechStyle": "", "personalityTraits": "", "habits": "",
                "goal": "", "principles": "", "conflict": ""
            }])
        );
    }

    #[test]
    fn test_flat_protagonist_promotion() {
        let story = migrated(json!({ "protagonistName": "Kai", "protagonistGoal": "Survive" }));
        let expected = Character {
            name: "Kai".to_string(),
            goal: "Survive".to_string(),
            ..Character::default()
        };
        assert_eq!(story.protagonist, expected);
        assert!(keys_of(&story).iter().all(|k| !k.starts_with("protagonistName") && !k.starts_with("protagonistGoal")));
    }

    #[test]
    fn test_flat_keys_rebuild_a_structured_protagonist() {
        let input = json!({
            "protagonist": { "name": "Lin" },
            "protagonistName": "Kai",
        });
        let story = migrated(input);
        assert_eq!(story.protagonist, Character::named("Kai"));
        assert!(!keys_of(&story).iter().any(|k| k == "protagonistName"));
        assert!(!story.extra.contains_key("protagonistName"));

        assert_eq!(remigrated(&story), story);
    }

    #[test]
    fn test_structured_protagonist_left_alone() {
        let story = migrated(json!({
            "protagonist": { "name": "Lin", "habits": "hums", "gender": "m" },
        }));
        assert_eq!(story.protagonist.name, "Lin");
        assert_eq!(story.protagonist.habits, "hums");
    }

    #[test]
    fn test_gender_backfill() {
        let story = migrated(json!({
            "protagonist": { "name": "Lin" },
            "loveInterests": [{ "name": "Mira", "gender": "f" }, { "name": "Sol" }],
        }));
        assert_eq!(story.protagonist.gender, "");
        assert_eq!(story.love_interests[0].gender, "f");
        assert_eq!(story.love_interests[1].gender, "");
    }

    #[test]
    fn test_voice_rename() {
        let story = migrated(json!({
            "protagonist": { "name": "Lin", "voiceDescription": "raspy" },
            "antagonists": [{ "name": "Vex", "voiceDescription": "silky" }],
        }));
        assert_eq!(story.protagonist.voice_and_speech_style, "raspy");
        assert_eq!(story.antagonists[0].voice_and_speech_style, "silky");
        assert!(!story.protagonist.extra.contains_key(LEGACY_VOICE));
        let value = serde_json::to_value(&story.protagonist).unwrap();
        assert!(value.get(LEGACY_VOICE).is_none());
    }

    #[test]
    fn test_relationships_default() {
        let story = migrated(json!({ "title": "T" }));
        assert!(story.relationships.is_empty());
    }

    #[test]
    fn test_unknown_keys_survive() {
        let story = migrated(json!({
            "customNote": { "pinned": true },
            "protagonist": { "name": "Lin", "nickname": "Ash" },
            "relationships": [{ "character1": "Lin", "character2": "Mo", "type": "Rivals", "since": "childhood" }],
            "storyArc": [{ "title": "Act 1", "description": "Start", "chapters": [1, 2] }],
        }));
        assert_eq!(story.extra.get("customNote"), Some(&json!({ "pinned": true })));
        assert_eq!(story.protagonist.extra.get("nickname"), Some(&json!("Ash")));
        assert_eq!(story.relationships[0].extra.get("since"), Some(&json!("childhood")));
        assert_eq!(story.story_arc[0].extra.get("chapters"), Some(&json!([1, 2])));

        let value = serde_json::to_value(&story).unwrap();
        assert_eq!(value["relationships"][0]["since"], json!("childhood"));
        assert_eq!(remigrated(&story), story);
    }

    #[test]
    fn test_scalars_are_coerced_and_defaulted() {
        let story = migrated(json!({
            "comedyLevel": 7,
            "totalChapters": 120,
            "language": "fr",
            "genres": ["Fantasy", 3, null, { "x": 1 }],
        }));
        assert_eq!(story.comedy_level, "7");
        assert_eq!(story.total_chapters, "120");
        assert_eq!(story.romance_level, "5");
        assert_eq!(story.maturity_level, "1");
        assert_eq!(story.language, Language::En);
        assert_eq!(story.genres, vec!["Fantasy".to_string(), "3".to_string()]);
    }

    #[test]
    fn test_story_arc_never_empty() {
        let story = migrated(json!({ "language": "id", "storyArc": [] }));
        assert_eq!(story.story_arc, vec![Act::titled("Babak 1")]);

        let story = migrated(json!({ "storyArc": [{ "title": "Act 1" }, "junk"] }));
        assert_eq!(story.story_arc.len(), 1);
        assert_eq!(story.story_arc[0].description, "");
    }

    #[test]
    fn test_optional_texts() {
        let story = migrated(json!({ "worldBuilding": null, "magicSystem": "Runes" }));
        assert_eq!(story.world_building, None);
        assert_eq!(story.magic_system.as_deref(), Some("Runes"));
    }

    #[test]
    fn test_round_trip_reproduces_record() {
        let mut story = StoryRecord::new(Language::Id);
        story.title = "Mahkota Abu".to_string();
        story.protagonist = Character::named("Kai");
        story.relationships.push(crate::story::model::Relationship {
            character1: "Kai".to_string(),
            character2: "Nobody".to_string(),
            kind: "Rivals".to_string(),
            description: "Old grudge".to_string(),
            ..Default::default()
        });
        let text = serde_json::to_string(&story).unwrap();
        assert_eq!(parse(&text).unwrap(), story);
    }

    #[test]
    fn test_character_from_generated_value() {
        let character = character_from_value(&json!({
            "name": "Mira",
            "age": 24,
            "voiceDescription": "soft",
        }))
        .unwrap();
        assert_eq!(character.age, "24");
        assert_eq!(character.voice_and_speech_style, "soft");
        assert!(character_from_value(&json!("Mira")).is_err());
    }
}
