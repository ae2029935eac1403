use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, InquireError, MultiSelect, Select, Text};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use webnovel_studio::core::config::Config;
use webnovel_studio::core::io::NativeStorage;
use webnovel_studio::services::chat::Author;
use webnovel_studio::services::generator;
use webnovel_studio::services::llm::create_llm;
use webnovel_studio::services::persistence::{SaveStatus, StoryRepository};
use webnovel_studio::services::prompt::{sections_for, Section};
use webnovel_studio::services::session::StudioSession;
use webnovel_studio::story::migrate::CHARACTER_FIELDS;
use webnovel_studio::story::{catalog, sidebar, CharacterList, ClearableSection, Language, Relationship, StoryRecord};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let storage = Arc::new(NativeStorage::new(&config.data_folder));
    let mut session = StudioSession::new(StoryRepository::new(storage), &config.autosave, config.language);
    session.open().await?;

    loop {
        let status = session.tick(now_ms()).await.unwrap_or_else(|e| {
            log::error!("Autosave failed: {:#}", e);
            SaveStatus::Idle
        });
        let prompt = match status {
            SaveStatus::Idle => "What next?".to_string(),
            SaveStatus::Saving => "What next? (saving...)".to_string(),
            SaveStatus::Saved => "What next? (saved)".to_string(),
        };

        let action = match Select::new(&prompt, menu(&session)).prompt() {
            Ok(action) => action,
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Action::Quit,
            Err(e) => return Err(e.into()),
        };
        if action == Action::Quit {
            break;
        }

        if let Err(e) = run(action, &mut session, &config).await {
            if matches!(e.downcast_ref::<InquireError>(), Some(InquireError::OperationCanceled)) {
                continue;
            }
            eprintln!("Error: {:#}", e);
        }
    }

    session.flush(now_ms()).await?;
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn ask(message: &str) -> bool {
    Confirm::new(message).with_default(false).prompt().unwrap_or(false)
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn edit_text(label: &str, current: &str) -> Result<String> {
    Ok(Text::new(label).with_initial_value(current).prompt()?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    View,
    Create,
    EditBasics,
    EditCharacters,
    EditRelationships,
    EditArc,
    EditTone,
    Generate,
    Clear,
    Chat,
    Export,
    Import,
    StartNew,
    Quit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::View => "View encyclopedia",
            Action::Create => "Create a story",
            Action::EditBasics => "Edit basic info",
            Action::EditCharacters => "Edit characters",
            Action::EditRelationships => "Edit relationships",
            Action::EditArc => "Edit story arc",
            Action::EditTone => "Edit tone & style",
            Action::Generate => "Generate a section with AI",
            Action::Clear => "Clear a section",
            Action::Chat => "Chat about the story",
            Action::Export => "Export to file",
            Action::Import => "Import from file",
            Action::StartNew => "Start a new story",
            Action::Quit => "Quit",
        })
    }
}

fn menu(session: &StudioSession) -> Vec<Action> {
    if session.story().is_none() {
        return vec![Action::Create, Action::Import, Action::Quit];
    }
    vec![
        Action::View,
        Action::Chat,
        Action::Generate,
        Action::EditBasics,
        Action::EditCharacters,
        Action::EditRelationships,
        Action::EditArc,
        Action::EditTone,
        Action::Clear,
        Action::Export,
        Action::Import,
        Action::StartNew,
        Action::Quit,
    ]
}

async fn run(action: Action, session: &mut StudioSession, config: &Config) -> Result<()> {
    match action {
        Action::View => {
            if let Some(story) = session.story() {
                println!("\n{}", sidebar::render(story));
            }
        }
        Action::Create => create_story(session, config).await?,
        Action::EditBasics => edit_basics(session).await?,
        Action::EditCharacters => edit_characters(session)?,
        Action::EditRelationships => edit_relationships(session)?,
        Action::EditArc => edit_arc(session)?,
        Action::EditTone => edit_tone(session)?,
        Action::Generate => generate_section(session, config).await?,
        Action::Clear => {
            let sections = vec![
                ClearableSection::Core,
                ClearableSection::Relationships,
                ClearableSection::Arc,
                ClearableSection::Tone,
            ];
            let labels: Vec<String> = sections.iter().map(|s| format!("{:?}", s)).collect();
            let picked = Select::new("Clear which section?", labels).raw_prompt()?;
            let section = sections[picked.index];
            session.update(now_ms(), |story| story.clear_section(section));
        }
        Action::Chat => chat(session, config).await?,
        Action::Export => {
            if let Some(export) = session.export()? {
                std::fs::write(&export.file_name, export.contents)
                    .with_context(|| format!("Failed to write {}", export.file_name))?;
                println!("Exported to {}", export.file_name);
            }
        }
        Action::Import => {
            let path = Text::new("Path to an exported story (.json):").prompt()?;
            let text = std::fs::read_to_string(path.trim()).with_context(|| format!("Failed to read {}", path))?;
            match session.import(&text, &ask, now_ms()).await {
                Ok(true) => println!("Story imported."),
                Ok(false) => {}
                Err(e) => {
                    log::warn!("Import failed: {:#}", e);
                    println!("{}", catalog::import_failed(session.language()));
                }
            }
        }
        Action::StartNew => {
            if session.start_new(&ask).await? {
                println!("Story discarded.");
            }
        }
        Action::Quit => {}
    }
    Ok(())
}

async fn create_story(session: &mut StudioSession, config: &Config) -> Result<()> {
    let language = Select::new("Language", vec!["en", "id"]).prompt()?;
    let language = Language::from_code(language);
    let mut draft = StoryRecord::new(language);

    let genres = MultiSelect::new("Genres", catalog::genres(language).to_vec()).prompt()?;
    for genre in genres {
        draft.toggle_genre(genre, false);
    }
    draft.other_genre = Text::new("Other genre (optional):").prompt()?;

    let idea = Text::new("Story idea (leave empty to fill in by hand):").prompt()?;
    if draft.is_basic_info_ready(&idea) {
        let llm = create_llm(config, false)?;
        let pb = spinner("Generating basic info...")?;
        let result = generator::generate_into(llm.as_ref(), Section::Basic, &mut draft, &idea).await;
        pb.finish_and_clear();
        if let Err(e) = result {
            eprintln!("{}: {}", catalog::generation_failed(language), e);
        }
    }

    draft.title = edit_text("Title:", &draft.title)?;
    draft.setting = edit_text("Setting:", &draft.setting)?;
    draft.total_chapters = edit_text("Total chapters:", &draft.total_chapters)?;
    draft.words_per_chapter = edit_text("Words per chapter:", &draft.words_per_chapter)?;

    if !draft.is_basic_info_complete() {
        println!("A title, a genre and a setting are required.");
        return Ok(());
    }
    session.submit(draft, &ask, now_ms()).await?;
    Ok(())
}

async fn edit_basics(session: &mut StudioSession) -> Result<()> {
    let Some(story) = session.story().cloned() else {
        return Ok(());
    };

    let mut fields = vec!["Title", "Genres", "Other genre", "Setting", "Total chapters", "Words per chapter", "Main plot"];
    if story.shows_world_building() {
        fields.push("World building");
    }
    if story.shows_magic_system() {
        fields.push("Magic system");
    }

    let now = now_ms();
    match Select::new("Edit which field?", fields).prompt()? {
        "Title" => {
            let mut renamed = story.clone();
            renamed.title = edit_text("Title:", &story.title)?;
            session.submit(renamed, &ask, now).await?;
        }
        "Genres" => {
            let options = catalog::genres(story.language).to_vec();
            let selected: Vec<usize> = options
                .iter()
                .enumerate()
                .filter(|(_, g)| story.genres.iter().any(|s| s == *g))
                .map(|(i, _)| i)
                .collect();
            let picked = MultiSelect::new("Genres", options).with_default(&selected).prompt()?;
            session.update(now, |s| {
                let toggles: Vec<String> = catalog::genres(s.language)
                    .iter()
                    .filter(|g| picked.contains(*g) != s.genres.iter().any(|x| x == **g))
                    .map(|g| g.to_string())
                    .collect();
                for genre in toggles {
                    s.toggle_genre(&genre, true);
                }
            });
        }
        "Other genre" => {
            let value = edit_text("Other genre:", &story.other_genre)?;
            session.update(now, |s| s.other_genre = value);
        }
        "Setting" => {
            let value = edit_text("Setting:", &story.setting)?;
            session.update(now, |s| s.setting = value);
        }
        "Total chapters" => {
            let value = edit_text("Total chapters:", &story.total_chapters)?;
            session.update(now, |s| s.total_chapters = value);
        }
        "Words per chapter" => {
            let value = edit_text("Words per chapter:", &story.words_per_chapter)?;
            session.update(now, |s| s.words_per_chapter = value);
        }
        "Main plot" => {
            let value = edit_text("Main plot:", &story.main_plot)?;
            session.update(now, |s| s.main_plot = value);
        }
        "World building" => {
            let value = edit_text("World building:", story.world_building.as_deref().unwrap_or(""))?;
            session.update(now, |s| s.world_building = Some(value));
        }
        "Magic system" => {
            let value = edit_text("Magic system:", story.magic_system.as_deref().unwrap_or(""))?;
            session.update(now, |s| s.magic_system = Some(value));
        }
        _ => {}
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Protagonist,
    Member(CharacterList, usize),
    Add(CharacterList),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list_name = |list: &CharacterList| match list {
            CharacterList::LoveInterests => "love interest",
            CharacterList::Antagonists => "antagonist",
        };
        match self {
            Slot::Protagonist => f.write_str("Protagonist"),
            Slot::Member(list, i) => write!(f, "{} #{}", list_name(list), i + 1),
            Slot::Add(list) => write!(f, "+ Add {}", list_name(list)),
        }
    }
}

fn edit_characters(session: &mut StudioSession) -> Result<()> {
    let Some(story) = session.story().cloned() else {
        return Ok(());
    };

    let mut slots = vec![Slot::Protagonist];
    slots.extend((0..story.love_interests.len()).map(|i| Slot::Member(CharacterList::LoveInterests, i)));
    slots.extend((0..story.antagonists.len()).map(|i| Slot::Member(CharacterList::Antagonists, i)));
    slots.push(Slot::Add(CharacterList::LoveInterests));
    slots.push(Slot::Add(CharacterList::Antagonists));

    let slot = Select::new("Which character?", slots).prompt()?;
    let character = match slot {
        Slot::Add(list) => {
            session.update(now_ms(), |s| s.add_character(list));
            return Ok(());
        }
        Slot::Protagonist => story.protagonist.clone(),
        Slot::Member(CharacterList::LoveInterests, i) => story.love_interests[i].clone(),
        Slot::Member(CharacterList::Antagonists, i) => story.antagonists[i].clone(),
    };

    let mut options: Vec<&str> = CHARACTER_FIELDS.to_vec();
    if slot != Slot::Protagonist {
        options.push("(remove this character)");
    }
    let field = Select::new("Edit which field?", options).prompt()?;

    if let Slot::Member(list, index) = slot {
        if field == "(remove this character)" {
            session.update(now_ms(), |s| s.remove_character(list, index));
            return Ok(());
        }
    }

    let mut edited = character;
    let Some(value) = edited.field_mut(field) else {
        return Ok(());
    };
    let updated = edit_text(&format!("{}:", field), value)?;
    *value = updated;

    session.update(now_ms(), |s| match slot {
        Slot::Protagonist => s.protagonist = edited,
        Slot::Member(list, index) => {
            if let Some(c) = s.characters_mut(list).get_mut(index) {
                *c = edited;
            }
        }
        Slot::Add(_) => {}
    });
    Ok(())
}

fn edit_relationships(session: &mut StudioSession) -> Result<()> {
    let Some(story) = session.story().cloned() else {
        return Ok(());
    };

    let mut options: Vec<String> = story
        .relationships
        .iter()
        .map(|r| format!("{} & {}: [{}]", r.character1, r.character2, r.kind))
        .collect();
    options.push("+ Add relationship".to_string());
    let picked = Select::new("Which relationship?", options).raw_prompt()?;

    if picked.index < story.relationships.len() {
        if ask("Remove this relationship?") {
            session.update(now_ms(), |s| s.remove_relationship(picked.index));
        }
        return Ok(());
    }

    let names: Vec<String> = story.named_characters().iter().map(|c| c.name.clone()).collect();
    if names.len() < 2 {
        println!("Name at least two characters first.");
        return Ok(());
    }
    let relationship = Relationship {
        character1: Select::new("First character", names.clone()).prompt()?,
        character2: Select::new("Second character", names).prompt()?,
        kind: Text::new("Type (e.g. Rivals):").prompt()?,
        description: Text::new("Description:").prompt()?,
        ..Relationship::default()
    };
    session.update(now_ms(), |s| s.relationships.push(relationship));
    Ok(())
}

fn edit_arc(session: &mut StudioSession) -> Result<()> {
    let Some(story) = session.story().cloned() else {
        return Ok(());
    };

    let mut options: Vec<String> = story.story_arc.iter().map(|a| a.title.clone()).collect();
    options.push("+ Add act".to_string());
    let picked = Select::new("Which act?", options).raw_prompt()?;
    let index = picked.index;

    if index == story.story_arc.len() {
        session.update(now_ms(), |s| s.add_act());
        return Ok(());
    }

    let act = &story.story_arc[index];
    match Select::new("Change", vec!["Title", "Description", "Remove"]).prompt()? {
        "Title" => {
            let value = edit_text("Title:", &act.title)?;
            session.update(now_ms(), |s| s.story_arc[index].title = value);
        }
        "Description" => {
            let value = edit_text("Description:", &act.description)?;
            session.update(now_ms(), |s| s.story_arc[index].description = value);
        }
        _ => {
            let mut removed = false;
            session.update(now_ms(), |s| removed = s.remove_act(index));
            if !removed {
                println!("A story arc needs at least one act.");
            }
        }
    }
    Ok(())
}

fn edit_tone(session: &mut StudioSession) -> Result<()> {
    let Some(story) = session.story().cloned() else {
        return Ok(());
    };

    let mut fields = vec!["Comedy", "Romance", "Action", "Prose style"];
    if story.shows_maturity() {
        fields.push("Maturity");
    }
    let now = now_ms();
    match Select::new("Edit which setting?", fields).prompt()? {
        "Prose style" => {
            let styles = catalog::prose_styles(story.language);
            let labels: Vec<String> = styles.iter().map(|s| format!("{}: {}", s.label, s.description)).collect();
            let picked = Select::new("Prose style", labels).raw_prompt()?;
            let value = styles[picked.index].value;
            session.update(now, |s| s.prose_style = value.to_string());
        }
        field => {
            let current = match field {
                "Comedy" => &story.comedy_level,
                "Romance" => &story.romance_level,
                "Action" => &story.action_level,
                _ => &story.maturity_level,
            };
            let level = inquire::CustomType::<u8>::new(&format!("{} level (1-10):", field))
                .with_starting_input(current)
                .with_validator(|v: &u8| {
                    Ok(if (1..=10).contains(v) {
                        inquire::validator::Validation::Valid
                    } else {
                        inquire::validator::Validation::Invalid("Pick a level from 1 to 10".into())
                    })
                })
                .prompt()?
                .to_string();
            session.update(now, |s| match field {
                "Comedy" => s.comedy_level = level,
                "Romance" => s.romance_level = level,
                "Action" => s.action_level = level,
                _ => s.maturity_level = level,
            });
        }
    }
    Ok(())
}

struct SectionChoice(Section);

impl fmt::Display for SectionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.index() {
            Some(i) => write!(f, "{} #{}", self.0.id(), i + 1),
            None => f.write_str(self.0.id()),
        }
    }
}

async fn generate_section(session: &mut StudioSession, config: &Config) -> Result<()> {
    let Some(story) = session.story().cloned() else {
        return Ok(());
    };

    let choices: Vec<SectionChoice> = sections_for(&story).into_iter().map(SectionChoice).collect();
    let SectionChoice(section) = Select::new("Generate which section?", choices).prompt()?;
    let idea = if section == Section::Basic {
        Text::new("Story idea:").prompt()?
    } else {
        String::new()
    };

    let llm = create_llm(config, false)?;
    let pb = spinner(&format!("Generating {}...", section))?;
    let result = session.generate(llm.as_ref(), section, &idea, &ask, now_ms()).await;
    pb.finish_and_clear();

    match result {
        Ok(_) => println!("Updated {}.", section),
        Err(e) => eprintln!("{}: {:#}", catalog::generation_failed(session.language()), e),
    }
    Ok(())
}

async fn chat(session: &mut StudioSession, config: &Config) -> Result<()> {
    let llm = create_llm(config, config.llm.thinking_mode)?;

    for message in session.chat().messages() {
        let who = match message.author {
            Author::User => "You",
            Author::Ai => "AI",
        };
        println!("{}: {}\n", who, message.text);
    }

    loop {
        let text = Text::new("You:").with_help_message("Empty line to go back").prompt()?;
        if text.trim().is_empty() {
            break;
        }
        let pb = spinner("Thinking...")?;
        let reply = session.send_chat(llm.as_ref(), &text).await;
        pb.finish_and_clear();
        match reply {
            Ok(reply) => println!("AI: {}\n", reply),
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }
    Ok(())
}
