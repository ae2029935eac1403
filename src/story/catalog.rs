//! Fixed option lists the setup form offers, plus localized UI text.

use crate::story::model::Language;

pub const DEFAULT_LEVEL: &str = "5";
pub const DEFAULT_MATURITY: &str = "1";

pub const GENRES_EN: &[&str] = &[
    "Fantasy",
    "Romance",
    "System",
    "Transmigration",
    "Sci-Fi",
    "Wuxia",
    "Xianxia",
    "Action",
    "Comedy",
    "Drama",
    "Mystery",
    "Horror",
    "Slice of Life",
    "Historical",
    "Mature",
];

pub const GENRES_ID: &[&str] = &[
    "Fantasi",
    "Romansa",
    "Sistem",
    "Transmigrasi",
    "Fiksi Ilmiah",
    "Wuxia",
    "Xianxia",
    "Aksi",
    "Komedi",
    "Drama",
    "Misteri",
    "Horor",
    "Kehidupan Sehari-hari",
    "Sejarah",
    "Dewasa",
];

const WORLD_BUILDING_GENRES: &[&str] = &["Transmigration", "Fantasy", "Sci-Fi", "Transmigrasi", "Fiksi Ilmiah"];
const MAGIC_SYSTEM_GENRES: &[&str] = &["System", "Fantasy", "Wuxia", "Xianxia", "Sistem"];
const MATURE_GENRES: &[&str] = &["Mature", "Dewasa"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProseStyle {
    /// Stored value; identical across languages.
    pub value: &'static str,
    pub label: &'static str,
    pub description: &'static str,
}

pub const PROSE_STYLES_EN: &[ProseStyle] = &[
    ProseStyle {
        value: "Descriptive & Immersive",
        label: "Descriptive & Immersive",
        description: "Rich sensory detail that lets readers sink into the world.",
    },
    ProseStyle {
        value: "Fast-paced & Punchy",
        label: "Fast-paced & Punchy",
        description: "Short sentences, quick scene changes, constant momentum.",
    },
    ProseStyle {
        value: "Witty & Humorous",
        label: "Witty & Humorous",
        description: "Playful narration with banter and comic timing.",
    },
    ProseStyle {
        value: "Lyrical & Poetic",
        label: "Lyrical & Poetic",
        description: "Flowing rhythm and figurative language.",
    },
    ProseStyle {
        value: "Dark & Gritty",
        label: "Dark & Gritty",
        description: "Blunt, unflinching narration with a heavy atmosphere.",
    },
    ProseStyle {
        value: "Light & Casual",
        label: "Light & Casual",
        description: "Easygoing, conversational tone typical of web serials.",
    },
];

pub const PROSE_STYLES_ID: &[ProseStyle] = &[
    ProseStyle {
        value: "Descriptive & Immersive",
        label: "Deskriptif & Imersif",
        description: "Detail indrawi yang kaya agar pembaca tenggelam dalam dunia cerita.",
    },
    ProseStyle {
        value: "Fast-paced & Punchy",
        label: "Cepat & Bertenaga",
        description: "Kalimat pendek, perpindahan adegan cepat, momentum terus terjaga.",
    },
    ProseStyle {
        value: "Witty & Humorous",
        label: "Jenaka & Lucu",
        description: "Narasi yang ceria dengan candaan dan waktu komedi yang pas.",
    },
    ProseStyle {
        value: "Lyrical & Poetic",
        label: "Liris & Puitis",
        description: "Ritme mengalir dan bahasa kiasan.",
    },
    ProseStyle {
        value: "Dark & Gritty",
        label: "Gelap & Keras",
        description: "Narasi lugas tanpa ragu dengan suasana yang berat.",
    },
    ProseStyle {
        value: "Light & Casual",
        label: "Ringan & Santai",
        description: "Nada santai seperti obrolan, khas cerita web.",
    },
];

pub fn genres(language: Language) -> &'static [&'static str] {
    match language {
        Language::En => GENRES_EN,
        Language::Id => GENRES_ID,
    }
}

pub fn prose_styles(language: Language) -> &'static [ProseStyle] {
    match language {
        Language::En => PROSE_STYLES_EN,
        Language::Id => PROSE_STYLES_ID,
    }
}

pub fn default_prose_style() -> &'static str {
    PROSE_STYLES_EN[0].value
}

pub fn find_prose_style(language: Language, value: &str) -> Option<&'static ProseStyle> {
    prose_styles(language).iter().find(|s| s.value == value)
}

/// Maps a free-form style name (e.g. from the model) onto a catalog value by
/// matching its first word against catalog values and labels.
pub fn snap_prose_style(language: Language, generated: &str) -> Option<&'static str> {
    let lowered = generated.trim().to_lowercase();
    let first = lowered.split_whitespace().next()?;
    prose_styles(language)
        .iter()
        .find(|s| s.value.to_lowercase().contains(first) || s.label.to_lowercase().contains(first))
        .map(|s| s.value)
}

fn any_in(genres: &[String], set: &[&str]) -> bool {
    genres.iter().any(|g| set.contains(&g.as_str()))
}

pub fn enables_world_building(genres: &[String]) -> bool {
    any_in(genres, WORLD_BUILDING_GENRES)
}

pub fn enables_magic_system(genres: &[String]) -> bool {
    any_in(genres, MAGIC_SYSTEM_GENRES)
}

pub fn enables_maturity(genres: &[String]) -> bool {
    any_in(genres, MATURE_GENRES)
}

pub fn confirm_start_new(language: Language) -> &'static str {
    match language {
        Language::En => "Are you sure you want to start a new story? Your current story encyclopedia and chat history will be deleted.",
        Language::Id => "Anda yakin ingin memulai cerita baru? Ensiklopedia cerita dan riwayat obrolan Anda saat ini akan dihapus.",
    }
}

pub fn confirm_import(language: Language) -> &'static str {
    match language {
        Language::En => "Uploading a new story will overwrite your current story and chat history. Continue?",
        Language::Id => "Mengunggah cerita baru akan menimpa cerita Anda saat ini dan riwayat obrolan. Lanjutkan?",
    }
}

pub fn confirm_title_change(language: Language) -> &'static str {
    match language {
        Language::En => "You have changed the story title. This will delete the chat history associated with the old title and start a new one. Are you sure?",
        Language::Id => "Anda telah mengubah judul cerita. Riwayat obrolan untuk judul lama akan dihapus dan riwayat baru akan dimulai. Anda yakin?",
    }
}

pub fn import_failed(language: Language) -> &'static str {
    match language {
        Language::En => "Failed to upload file. Please ensure it is a valid JSON export file from Webnovel AI Studio.",
        Language::Id => "Gagal mengunggah file. Pastikan file tersebut adalah file ekspor JSON yang valid dari Webnovel AI Studio.",
    }
}

pub fn generation_failed(language: Language) -> &'static str {
    match language {
        Language::En => "Generation Failed",
        Language::Id => "Pembuatan Gagal",
    }
}
