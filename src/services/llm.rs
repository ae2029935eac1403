use async_trait::async_trait;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

use crate::core::config::Config;

#[cfg(target_arch = "wasm32")]
pub trait LlmBounds {}
#[cfg(target_arch = "wasm32")]
impl<T> LlmBounds for T {}

#[cfg(not(target_arch = "wasm32"))]
pub trait LlmBounds: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync> LlmBounds for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Model,
}

/// One earlier message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait LlmClient: LlmBounds + Debug {
    /// Asks for a JSON document constrained by `schema`; returns the raw text.
    async fn generate_json(&self, prompt: &str, schema: &Value) -> Result<String>;

    async fn chat(&self, system: &str, history: &[Turn], message: &str) -> Result<String>;
}

/// Builds the client for the configured provider. `thinking` selects the
/// larger model with a thinking budget.
pub fn create_llm(config: &Config, thinking: bool) -> Result<Box<dyn LlmClient>> {
    match config.llm.provider.as_str() {
        "gemini" => {
            let cfg = config.llm.gemini.as_ref().context("Gemini config missing")?;
            let api_key = cfg
                .resolved_api_key()
                .context("Gemini API key missing: set llm.gemini.api_key or GEMINI_API_KEY")?;
            let client = if thinking {
                GeminiClient::new(&api_key, &cfg.thinking_model).with_thinking_budget(cfg.thinking_budget)
            } else {
                GeminiClient::new(&api_key, &cfg.model)
            };
            Ok(Box::new(client))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.llm.provider)),
    }
}

// --- Gemini ---

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    thinking_budget: Option<u32>,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            thinking_budget: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }

    fn endpoint(&self) -> Result<url::Url> {
        let base = format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model);
        Ok(url::Url::parse_with_params(&base, &[("key", self.api_key.as_str())])?)
    }

    fn thinking_config(&self) -> Option<GeminiThinkingConfig> {
        self.thinking_budget.map(|thinking_budget| GeminiThinkingConfig { thinking_budget })
    }

    async fn send(&self, request_body: &GeminiRequest) -> Result<String> {
        let resp = self.client.post(self.endpoint()?)
            .json(request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = match serde_json::from_str(&response_text) {
            Ok(r) => r,
            Err(e) => return Err(anyhow!("Failed to parse Gemini response: {}. Body: {}", e, response_text)),
        };

        extract_text(result).map_err(|e| {
            log::debug!("Unusable Gemini body: {}", response_text);
            e
        })
    }
}

fn extract_text(result: GeminiResponse) -> Result<String> {
    if let Some(err) = result.error {
        return Err(anyhow!("Gemini API returned error: {}", err.message));
    }

    let Some(first) = result.candidates.and_then(|c| c.into_iter().next()) else {
        return Err(anyhow!("Gemini response format unexpected or empty"));
    };

    let text: String = first
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        // Blocked or truncated before any text was produced.
        let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
        return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
    }
    Ok(text)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<GeminiThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiThinkingConfig {
    thinking_budget: u32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

fn user_content(text: &str) -> GeminiContent {
    GeminiContent {
        role: "user".to_string(),
        parts: vec![GeminiPart { text: text.to_string() }],
    }
}

fn json_request(prompt: &str, schema: &Value, thinking: Option<GeminiThinkingConfig>) -> GeminiRequest {
    GeminiRequest {
        contents: vec![user_content(prompt)],
        system_instruction: None,
        generation_config: Some(GeminiGenerationConfig {
            response_mime_type: Some("application/json".to_string()),
            response_schema: Some(schema.clone()),
            thinking_config: thinking,
        }),
    }
}

fn chat_request(system: &str, history: &[Turn], message: &str, thinking: Option<GeminiThinkingConfig>) -> GeminiRequest {
    let mut contents: Vec<GeminiContent> = history
        .iter()
        .map(|turn| GeminiContent {
            role: match turn.speaker {
                Speaker::User => "user",
                Speaker::Model => "model",
            }
            .to_string(),
            parts: vec![GeminiPart { text: turn.text.clone() }],
        })
        .collect();
    contents.push(user_content(message));

    GeminiRequest {
        contents,
        system_instruction: Some(GeminiSystemInstruction {
            parts: vec![GeminiPart { text: system.to_string() }],
        }),
        generation_config: thinking.map(|t| GeminiGenerationConfig {
            thinking_config: Some(t),
            ..GeminiGenerationConfig::default()
        }),
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl LlmClient for GeminiClient {
    async fn generate_json(&self, prompt: &str, schema: &Value) -> Result<String> {
        let request_body = json_request(prompt, schema, self.thinking_config());
        self.send(&request_body).await
    }

    async fn chat(&self, system: &str, history: &[Turn], message: &str) -> Result<String> {
        let request_body = chat_request(system, history, message, self.thinking_config());
        self.send(&request_body).await
    }
}
