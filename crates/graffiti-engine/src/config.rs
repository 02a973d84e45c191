use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use graffiti_contracts::backends::BackendCatalog;
use thiserror::Error;

use crate::dispatch::{Dispatcher, DEFAULT_ATTEMPT_TIMEOUT};
use crate::gateway::GradioGateway;
use crate::normalizer::HttpImageFetcher;
use crate::translate::{GeminiTranslator, PassthroughTranslator, Translator};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} must be a positive whole number, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
    #[error("backend table rejected: {0:#}")]
    Backends(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub hf_token: Option<String>,
    pub backends_path: Option<PathBuf>,
    pub attempt_timeout: Duration,
    pub staging_dir: Option<PathBuf>,
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: Option<String>,
    pub translation_models: Vec<String>,
}

impl EngineSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let attempt_timeout = match lookup("GRAFFITI_ATTEMPT_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("GRAFFITI_ATTEMPT_TIMEOUT_SECS", &raw)?),
            None => DEFAULT_ATTEMPT_TIMEOUT,
        };
        let translation_models = lookup("GRAFFITI_TRANSLATION_MODELS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|model| !model.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            hf_token: lookup("HF_TOKEN"),
            backends_path: lookup("GRAFFITI_BACKENDS").map(PathBuf::from),
            attempt_timeout,
            staging_dir: lookup("GRAFFITI_STAGING_DIR").map(PathBuf::from),
            gemini_api_key: lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY")),
            gemini_api_base: lookup("GEMINI_API_BASE"),
            translation_models,
        })
    }

    pub fn require_gemini_key(&self) -> Result<&str, ConfigError> {
        self.gemini_api_key
            .as_deref()
            .ok_or(ConfigError::Missing("GEMINI_API_KEY"))
    }

    pub fn catalog(&self) -> Result<BackendCatalog, ConfigError> {
        BackendCatalog::load(self.backends_path.as_deref()).map_err(ConfigError::Backends)
    }

    pub fn dispatcher(&self) -> Result<Dispatcher, ConfigError> {
        Ok(Dispatcher::new(
            Arc::new(GradioGateway::new(self.hf_token.clone())),
            Arc::new(HttpImageFetcher::new()),
            self.catalog()?,
        )
        .with_staging_parent(self.staging_dir.clone())
        .with_attempt_timeout(self.attempt_timeout))
    }

    /// Gemini when a key is configured, passthrough otherwise.
    pub fn translator(&self) -> Arc<dyn Translator> {
        match &self.gemini_api_key {
            Some(key) => Arc::new(GeminiTranslator::new(
                key.clone(),
                self.gemini_api_base.clone(),
                self.translation_models.clone(),
            )),
            None => Arc::new(PassthroughTranslator),
        }
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn parse_positive(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| ConfigError::InvalidNumber {
            name,
            value: raw.to_string(),
        })
}
