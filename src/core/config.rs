use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::story::Language;

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_data_folder")]
    pub data_folder: String,

    /// Language a brand-new story starts in.
    #[serde(default)]
    pub language: Language,

    pub llm: LlmConfig,

    #[serde(default)]
    pub autosave: AutosaveConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // only "gemini" for now
    /// Chat with the larger model and a thinking budget.
    #[serde(default)]
    pub thinking_mode: bool,
    pub gemini: Option<GeminiConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_gemini_thinking_model")]
    pub thinking_model: String,
    #[serde(default = "default_thinking_budget")]
    pub thinking_budget: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AutosaveConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_saved_indicator_ms")]
    pub saved_indicator_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            saved_indicator_ms: default_saved_indicator_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_folder: default_data_folder(),
            language: Language::default(),
            llm: LlmConfig::default(),
            autosave: AutosaveConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            thinking_mode: false,
            gemini: Some(GeminiConfig::default()),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_gemini_model(),
            thinking_model: default_gemini_thinking_model(),
            thinking_budget: default_thinking_budget(),
        }
    }
}

fn default_data_folder() -> String {
    "data".to_string()
}
fn default_provider() -> String {
    "gemini".to_string()
}
fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_gemini_thinking_model() -> String {
    "gemini-2.5-pro".to_string()
}
fn default_thinking_budget() -> u32 {
    32768
}
fn default_debounce_ms() -> u64 {
    1000
}
fn default_saved_indicator_ms() -> u64 {
    2000
}

const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];

impl GeminiConfig {
    /// The configured key, or the first non-empty key from the environment.
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.clone());
        }
        API_KEY_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|v| !v.trim().is_empty())
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(CONFIG_FILE, content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_folder)?;
        Ok(())
    }
}
