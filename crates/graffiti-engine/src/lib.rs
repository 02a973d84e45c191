use anyhow::{bail, Context, Result};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod gateway;
pub mod messenger;
pub mod normalizer;
pub mod staging;
pub mod texts;
pub mod translate;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, EngineSettings};
pub use conversation::Conversation;
pub use dispatch::{DispatchOutcome, DispatchPayload, DispatchStatus, Dispatcher};
pub use messenger::{KeyButton, Keyboard, Messenger};
pub use normalizer::NormalizedImage;

pub fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{service} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{service} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{service} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
