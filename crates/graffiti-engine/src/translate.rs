use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::response_json_or_error;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TRANSLATION_MODELS: &[&str] = &["gemini-2.0-flash", "gemini-1.5-flash"];

const TRANSLATION_TIMEOUT: Duration = Duration::from_secs(30);

pub trait Translator: Send + Sync {
    /// Returns the English rendering of `text`, or `text` itself on any failure.
    fn translate_to_english(&self, text: &str) -> String;
}

pub fn contains_arabic_script(text: &str) -> bool {
    text.chars().any(|ch| {
        matches!(
            ch,
            '\u{0600}'..='\u{06FF}'
                | '\u{0750}'..='\u{077F}'
                | '\u{08A0}'..='\u{08FF}'
                | '\u{FB50}'..='\u{FDFF}'
                | '\u{FE70}'..='\u{FEFF}'
        )
    })
}

/// Prompt to send for generation. Only Arabic-script prompts reach the translator.
pub fn translate_prompt(translator: &dyn Translator, prompt: &str) -> String {
    if !contains_arabic_script(prompt) {
        return prompt.to_string();
    }
    translator.translate_to_english(prompt)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranslator;

impl Translator for PassthroughTranslator {
    fn translate_to_english(&self, text: &str) -> String {
        text.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct GeminiTranslator {
    http: HttpClient,
    api_key: String,
    api_base: String,
    models: Vec<String>,
}

impl GeminiTranslator {
    pub fn new(api_key: String, api_base: Option<String>, models: Vec<String>) -> Self {
        let models = if models.is_empty() {
            DEFAULT_TRANSLATION_MODELS
                .iter()
                .map(|model| model.to_string())
                .collect()
        } else {
            models
        };
        Self {
            http: HttpClient::new(),
            api_key,
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            models,
        }
    }

    fn request(&self, model: &str, text: &str) -> Result<String> {
        let endpoint = format!("{}/models/{model}:generateContent", self.api_base);
        let payload = json!({
            "contents": [{"role": "user", "parts": [{"text": translation_instruction(text)}]}],
            "generationConfig": {"temperature": 0.2},
        });
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .timeout(TRANSLATION_TIMEOUT)
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini request failed ({model})"))?;
        let body = response_json_or_error("Gemini", response)?;
        extract_text(&body).ok_or_else(|| anyhow!("Gemini returned no text ({model})"))
    }
}

impl Translator for GeminiTranslator {
    fn translate_to_english(&self, text: &str) -> String {
        for model in &self.models {
            match self.request(model, text) {
                Ok(translated) => {
                    debug!(model = %model, "prompt translated");
                    return translated;
                }
                Err(err) => warn!(model = %model, error = %format!("{err:#}"), "translation failed"),
            }
        }
        text.to_string()
    }
}

fn translation_instruction(text: &str) -> String {
    format!(
        "You are a professional translator. Translate the following Arabic text to English \
         for AI image generation. Make it natural, visual and concise.\n\n\
         Arabic Text: {text}\n\n\
         Return ONLY the English translation, nothing else."
    )
}

fn extract_text(body: &Value) -> Option<String> {
    let parts = body
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim().trim_matches('"').trim();
    (!text.is_empty()).then(|| text.to_string())
}
