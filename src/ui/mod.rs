use leptos::*;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{Config, GeminiConfig};
use crate::core::io::{Storage, WebStorage};
use crate::services::chat::{Author, Message};
use crate::services::generator;
use crate::services::llm::{create_llm, LlmClient};
use crate::services::persistence::{self, SaveStatus, StoryRepository};
use crate::services::prompt::{sections_for, Section};
use crate::services::session::{Merged, StudioSession};
use crate::story::{catalog, sidebar, ClearableSection, Language, StoryRecord};

const API_KEY_STORAGE: &str = "geminiApiKey";

fn now() -> u64 {
    js_sys::Date::now() as u64
}

fn confirm(message: &str) -> bool {
    window().confirm_with_message(message).unwrap_or(false)
}

/// Holds the session between events. Model calls run on snapshots and only
/// borrow the session to merge their results. Operations that only touch
/// storage move it out; against `localStorage` they finish in one poll.
#[derive(Clone)]
struct SessionCell(Rc<RefCell<Option<StudioSession>>>);

impl SessionCell {
    fn take(&self) -> Option<StudioSession> {
        self.0.borrow_mut().take()
    }

    fn put(&self, session: StudioSession) {
        *self.0.borrow_mut() = Some(session);
    }

    fn with<R>(&self, f: impl FnOnce(&mut StudioSession) -> R) -> Option<R> {
        self.0.borrow_mut().as_mut().map(f)
    }
}

/// Reactive mirror of the session state.
#[derive(Clone, Copy)]
struct Ui {
    story: RwSignal<Option<StoryRecord>>,
    messages: RwSignal<Vec<Message>>,
    status: RwSignal<SaveStatus>,
    error: RwSignal<Option<String>>,
    generating: RwSignal<Vec<String>>,
    chatting: RwSignal<bool>,
    api_key: RwSignal<String>,
}

impl Ui {
    fn new() -> Self {
        Self {
            story: create_rw_signal(None),
            messages: create_rw_signal(Vec::new()),
            status: create_rw_signal(SaveStatus::Idle),
            error: create_rw_signal(None),
            generating: create_rw_signal(Vec::new()),
            chatting: create_rw_signal(false),
            api_key: create_rw_signal(String::new()),
        }
    }

    fn sync(&self, session: &StudioSession) {
        self.story.set(session.story().cloned());
        self.messages.set(session.chat().messages().to_vec());
        self.status.set(session.save_status(now()));
        self.generating.set(session.generating());
    }

    fn language(&self) -> Language {
        self.story
            .with_untracked(|s| s.as_ref().map(|s| s.language))
            .unwrap_or_default()
    }

    fn llm(&self, thinking: bool) -> anyhow::Result<Box<dyn LlmClient>> {
        let mut config = Config::default();
        config.llm.gemini = Some(GeminiConfig {
            api_key: self.api_key.get_untracked(),
            ..GeminiConfig::default()
        });
        create_llm(&config, thinking)
    }
}

/// Runs an async session operation and mirrors the result into the UI.
fn run_op<F, Fut>(cell: &SessionCell, ui: Ui, label: &str, op: F)
where
    F: FnOnce(StudioSession) -> Fut + 'static,
    Fut: Future<Output = (StudioSession, anyhow::Result<()>)> + 'static,
{
    let Some(session) = cell.take() else {
        ui.error.set(Some("Still working on the previous request.".to_string()));
        return;
    };
    log::debug!("Running {}", label);
    let cell = cell.clone();
    spawn_local(async move {
        let (session, result) = op(session).await;
        ui.error.set(result.err().map(|e| format!("{:#}", e)));
        ui.sync(&session);
        cell.put(session);
    });
}

/// Applies a synchronous edit to the live story.
fn edit(cell: &SessionCell, ui: Ui, f: impl FnOnce(&mut StoryRecord)) {
    let applied = cell.with(|session| {
        session.update(now(), f);
        ui.sync(session);
    });
    if applied.is_none() {
        ui.error.set(Some("Still working on the previous request.".to_string()));
    }
}

/// Starts a section request. Other sections, edits and chat stay usable
/// while it runs; the result is merged into whatever the story is by then.
fn generate_section(cell: &SessionCell, ui: Ui, section: Section, llm: Box<dyn LlmClient>) {
    let language = ui.language();
    let Some(pending) = cell.with(|s| {
        let pending = s.begin_generation(section);
        ui.sync(s);
        pending
    })
    .flatten() else {
        return;
    };

    let cell = cell.clone();
    spawn_local(async move {
        let outcome = generator::generate(llm.as_ref(), section, &pending.story, "").await;
        let merged = cell.with(|s| {
            let merged = s.finish_generation(pending, outcome, now());
            ui.sync(s);
            merged
        });
        match merged {
            Some(Ok(Merged::Renamed(next))) => run_op(&cell, ui, "submit", move |mut s| async move {
                let result = s.submit(next, &confirm, now()).await.map(|_| ());
                (s, result)
            }),
            Some(Ok(_)) => ui.error.set(None),
            Some(Err(e)) => ui.error.set(Some(format!("{}: {}", catalog::generation_failed(language), e))),
            None => log::warn!("Session unavailable, dropped section {}", section),
        }
    });
}

fn tick(cell: &SessionCell, ui: Ui) {
    let due = cell
        .with(|s| {
            let due = s.due_save(now()).map(|story| (story, s.repository()));
            ui.status.set(s.save_status(now()));
            due
        })
        .flatten();
    if let Some((story, repo)) = due {
        spawn_local(async move {
            if let Err(e) = repo.save_story(&story).await {
                log::error!("Autosave failed: {:#}", e);
            }
        });
    }
}

#[component]
pub fn App() -> impl IntoView {
    let storage = match WebStorage::new() {
        Ok(s) => Arc::new(s) as Arc<dyn Storage>,
        Err(e) => return view! { <p>"Error loading storage: " {e.to_string()}</p> }.into_view(),
    };

    let ui = Ui::new();
    let cell = SessionCell(Rc::new(RefCell::new(None)));
    let config = Config::default();
    let mut session = StudioSession::new(StoryRepository::new(storage.clone()), &config.autosave, config.language);

    {
        let cell = cell.clone();
        let storage = storage.clone();
        spawn_local(async move {
            if let Err(e) = session.open().await {
                ui.error.set(Some(format!("{:#}", e)));
            }
            if let Ok(Some(key)) = storage.load(API_KEY_STORAGE).await {
                ui.api_key.set(key);
            }
            ui.sync(&session);
            cell.put(session);
        });
    }
    {
        let cell = cell.clone();
        set_interval(move || tick(&cell, ui), Duration::from_millis(250));
    }

    let on_key = move |ev| {
        let key = event_target_value(&ev);
        ui.api_key.set(key.clone());
        let storage = storage.clone();
        spawn_local(async move {
            if let Err(e) = storage.save(API_KEY_STORAGE, &key).await {
                log::warn!("Could not remember API key: {:#}", e);
            }
        });
    };

    let has_story = create_memo(move |_| ui.story.with(Option::is_some));
    let story_cell = cell.clone();
    let setup_cell = cell.clone();

    view! {
        <div class="app-container">
            <header>
                <h1>"Webnovel AI Studio"</h1>
                <SaveIndicator ui=ui/>
                <label>
                    "Gemini API key "
                    <input type="password" prop:value=move || ui.api_key.get() on:input=on_key/>
                </label>
                <Transfer cell=cell.clone() ui=ui/>
            </header>
            {move || ui.error.get().map(|e| view! { <p class="error">{e}</p> })}
            <Show when=move || has_story.get() fallback=move || view! { <SetupForm cell=setup_cell.clone() ui=ui/> }>
                <StoryView cell=story_cell.clone() ui=ui/>
            </Show>
        </div>
    }
    .into_view()
}

#[component]
fn SaveIndicator(ui: Ui) -> impl IntoView {
    view! {
        <span class="save-status">
            {move || match ui.status.get() {
                SaveStatus::Idle => "",
                SaveStatus::Saving => "Saving...",
                SaveStatus::Saved => "Saved",
            }}
        </span>
    }
}

/// Export link, import box and the start-over button.
#[component]
fn Transfer(cell: SessionCell, ui: Ui) -> impl IntoView {
    let upload = create_rw_signal(String::new());

    let import_cell = cell.clone();
    let on_import = move |_| {
        let text = upload.get_untracked();
        let language = ui.language();
        run_op(&import_cell, ui, "import", move |mut s| async move {
            let result = match s.import(&text, &confirm, now()).await {
                Ok(true) => {
                    upload.set(String::new());
                    Ok(())
                }
                Ok(false) => Ok(()),
                Err(e) => {
                    log::warn!("Import failed: {:#}", e);
                    Err(anyhow::anyhow!(catalog::import_failed(language)))
                }
            };
            (s, result)
        });
    };

    let on_start_new = move |_| {
        run_op(&cell, ui, "startNew", move |mut s| async move {
            let result = s.start_new(&confirm).await.map(|_| ());
            (s, result)
        });
    };

    view! {
        <div class="transfer">
            {move || {
                ui.story
                    .get()
                    .and_then(|s| persistence::export(&s).ok())
                    .map(|export| {
                        let href = format!(
                            "data:application/json;charset=utf-8,{}",
                            String::from(js_sys::encode_uri_component(&export.contents))
                        );
                        view! { <a href=href download=export.file_name>"Export"</a> }
                    })
            }}
            <textarea
                placeholder="Paste an exported story here"
                prop:value=move || upload.get()
                on:input=move |ev| upload.set(event_target_value(&ev))
            ></textarea>
            <button on:click=on_import>"Import"</button>
            <Show when=move || ui.story.with(Option::is_some)>
                <button on:click=on_start_new.clone()>"Start new story"</button>
            </Show>
        </div>
    }
}

fn text_input(label: &'static str, get: impl Fn() -> String + 'static, set: impl Fn(String) + 'static) -> impl IntoView {
    view! {
        <label>
            {label}
            <input type="text" prop:value=get on:input=move |ev| set(event_target_value(&ev))/>
        </label>
    }
}

#[component]
fn SetupForm(cell: SessionCell, ui: Ui) -> impl IntoView {
    let draft = create_rw_signal(StoryRecord::new(Language::En));
    let idea = create_rw_signal(String::new());
    let pending = create_rw_signal(false);

    let on_language = move |ev| {
        let language = Language::from_code(&event_target_value(&ev));
        draft.set(StoryRecord::new(language));
    };

    let on_generate = move |_| {
        let llm = match ui.llm(false) {
            Ok(llm) => llm,
            Err(e) => return ui.error.set(Some(format!("{:#}", e))),
        };
        if pending.get_untracked() {
            return;
        }
        let snapshot = draft.get_untracked();
        let idea = idea.get_untracked();
        pending.set(true);
        spawn_local(async move {
            // Merge into the form as it is now; fields typed meanwhile that
            // the section does not own are kept.
            let merged = generator::generate(llm.as_ref(), Section::Basic, &snapshot, &idea)
                .await
                .and_then(|result| {
                    let mut applied = Ok(());
                    draft.update(|d| applied = generator::apply(d, Section::Basic, result));
                    applied
                });
            match merged {
                Ok(()) => ui.error.set(None),
                Err(e) => ui.error.set(Some(format!("{}: {}", catalog::generation_failed(snapshot.language), e))),
            }
            pending.set(false);
        });
    };

    let on_submit = move |_| {
        let story = draft.get_untracked();
        run_op(&cell, ui, "submit", move |mut s| async move {
            let result = s.submit(story, &confirm, now()).await.map(|_| ());
            (s, result)
        });
    };

    view! {
        <section class="setup">
            <h2>"Start a story"</h2>
            <select on:change=on_language>
                <option value="en">"English"</option>
                <option value="id">"Bahasa Indonesia"</option>
            </select>
            <fieldset>
                <legend>"Genres"</legend>
                {move || {
                    catalog::genres(draft.with(|d| d.language))
                        .iter()
                        .map(|genre| {
                            let genre = *genre;
                            view! {
                                <label>
                                    <input
                                        type="checkbox"
                                        prop:checked=move || draft.with(|d| d.genres.iter().any(|g| g == genre))
                                        on:change=move |_| draft.update(|d| d.toggle_genre(genre, false))
                                    />
                                    {genre}
                                </label>
                            }
                        })
                        .collect_view()
                }}
            </fieldset>
            {text_input("Other genre", move || draft.with(|d| d.other_genre.clone()), move |v| draft.update(|d| d.other_genre = v))}
            {text_input("Story idea", move || idea.get(), move |v| idea.set(v))}
            <button
                disabled=move || pending.get() || !draft.with(|d| d.is_basic_info_ready(&idea.get()))
                on:click=on_generate
            >
                "Generate basic info"
            </button>
            {text_input("Title", move || draft.with(|d| d.title.clone()), move |v| draft.update(|d| d.title = v))}
            {text_input("Setting", move || draft.with(|d| d.setting.clone()), move |v| draft.update(|d| d.setting = v))}
            {text_input("Total chapters", move || draft.with(|d| d.total_chapters.clone()), move |v| draft.update(|d| d.total_chapters = v))}
            {text_input("Words per chapter", move || draft.with(|d| d.words_per_chapter.clone()), move |v| draft.update(|d| d.words_per_chapter = v))}
            <button disabled=move || !draft.with(StoryRecord::is_basic_info_complete) on:click=on_submit>
                "Create story"
            </button>
        </section>
    }
}

#[component]
fn StoryView(cell: SessionCell, ui: Ui) -> impl IntoView {
    let chosen = create_rw_signal(String::new());

    let generate_cell = cell.clone();
    let on_generate = move |_| {
        let Ok(section) = chosen.get_untracked().parse::<Section>() else {
            return;
        };
        match ui.llm(false) {
            Ok(llm) => generate_section(&generate_cell, ui, section, llm),
            Err(e) => ui.error.set(Some(format!("{:#}", e))),
        }
    };
    let chosen_busy = move || ui.generating.with(|g| g.contains(&chosen.get()));

    let clear_buttons = [
        (ClearableSection::Core, "Clear core"),
        (ClearableSection::Relationships, "Clear relationships"),
        (ClearableSection::Arc, "Clear arc"),
        (ClearableSection::Tone, "Clear tone"),
    ]
    .into_iter()
    .map(|(section, label)| {
        let cell = cell.clone();
        view! { <button on:click=move |_| edit(&cell, ui, |s| s.clear_section(section))>{label}</button> }
    })
    .collect_view();

    let plot_cell = cell.clone();
    let on_plot = move |ev| {
        let value = event_target_value(&ev);
        edit(&plot_cell, ui, move |s| s.main_plot = value);
    };

    view! {
        <div class="studio">
            <aside>
                <pre>{move || ui.story.with(|s| s.as_ref().map(sidebar::render).unwrap_or_default())}</pre>
            </aside>
            <main>
                <div class="generate">
                    <select on:change=move |ev| chosen.set(event_target_value(&ev))>
                        <option value="">"Choose a section"</option>
                        {move || {
                            ui.story
                                .with(|s| s.as_ref().map(sections_for).unwrap_or_default())
                                .into_iter()
                                .filter(|s| *s != Section::Basic)
                                .map(|s| view! { <option value=s.to_string()>{s.to_string()}</option> })
                                .collect_view()
                        }}
                    </select>
                    <button disabled=chosen_busy on:click=on_generate>
                        {move || if chosen_busy() { "Generating..." } else { "Generate" }}
                    </button>
                    <span class="in-flight">{move || ui.generating.get().join(", ")}</span>
                </div>
                <div class="clear">{clear_buttons}</div>
                <label>
                    "Main plot"
                    <textarea
                        prop:value=move || ui.story.with(|s| s.as_ref().map(|s| s.main_plot.clone()).unwrap_or_default())
                        on:input=on_plot
                    ></textarea>
                </label>
                <ChatPane cell=cell ui=ui/>
            </main>
        </div>
    }
}

#[component]
fn ChatPane(cell: SessionCell, ui: Ui) -> impl IntoView {
    let draft = create_rw_signal(String::new());
    let thinking = create_rw_signal(false);

    let on_send = move |_| {
        let text = draft.get_untracked();
        if text.trim().is_empty() {
            return;
        }
        let llm = match ui.llm(thinking.get_untracked()) {
            Ok(llm) => llm,
            Err(e) => return ui.error.set(Some(format!("{:#}", e))),
        };
        let Some(((story, mut chat), repo)) = cell.with(|s| s.begin_chat().map(|c| (c, s.repository()))).flatten() else {
            return;
        };
        draft.set(String::new());
        ui.chatting.set(true);
        let cell = cell.clone();
        spawn_local(async move {
            let reply = chat.send(llm.as_ref(), &story, &text).await.map(|_| ());
            let kept = cell
                .with(|s| {
                    let kept = s.finish_chat(&story.title, chat.clone());
                    ui.sync(s);
                    kept
                })
                .unwrap_or(false);
            if kept {
                if let Err(e) = repo.save_chat(&story.title, &chat).await {
                    log::error!("Failed to save chat: {:#}", e);
                }
            }
            ui.error.set(reply.err().map(|e| format!("{:#}", e)));
            ui.chatting.set(false);
        });
    };

    view! {
        <section class="chat">
            <For
                each=move || ui.messages.get()
                key=|m| m.id.clone()
                children=move |m: Message| {
                    let who = match m.author {
                        Author::User => "user",
                        Author::Ai => "ai",
                    };
                    view! { <div class=who>{m.text}</div> }
                }
            />
            <label>
                <input type="checkbox" prop:checked=move || thinking.get() on:change=move |_| thinking.update(|t| *t = !*t)/>
                "Thinking mode"
            </label>
            <textarea prop:value=move || draft.get() on:input=move |ev| draft.set(event_target_value(&ev))></textarea>
            <button disabled=move || ui.chatting.get() on:click=on_send>"Send"</button>
        </section>
    }
}
