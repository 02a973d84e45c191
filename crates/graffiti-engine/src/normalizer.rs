use std::fs;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;
use tracing::debug;

use crate::gateway::{remaining, InferenceResult};

/// Deliverable produced from a gateway result.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedImage {
    Bytes(Vec<u8>),
    /// Unrecognized structured value handed to the transport as-is.
    Passthrough(Value),
}

pub trait ImageFetcher: Send + Sync {
    /// Downloads `url`, giving up at `deadline`.
    fn fetch(&self, url: &str, deadline: Instant) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpImageFetcher {
    http: HttpClient,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str, deadline: Instant) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .timeout(remaining(deadline)?)
            .send()
            .with_context(|| format!("image download failed ({url})"))?;
        if !response.status().is_success() {
            bail!("image download failed ({})", response.status().as_u16());
        }
        Ok(response
            .bytes()
            .context("image bytes read failed")?
            .to_vec())
    }
}

pub fn extract_image(
    raw: InferenceResult,
    fetcher: &dyn ImageFetcher,
    deadline: Instant,
) -> Option<NormalizedImage> {
    match raw {
        InferenceResult::List(items) => items
            .into_iter()
            .find_map(|item| usable_bytes(item, fetcher, deadline))
            .map(NormalizedImage::Bytes),
        // Null is an empty result and a leftover string is a broken data URL.
        InferenceResult::Opaque(Value::Null | Value::String(_)) => None,
        InferenceResult::Opaque(value) => Some(NormalizedImage::Passthrough(value)),
        other => usable_bytes(other, fetcher, deadline).map(NormalizedImage::Bytes),
    }
}

fn usable_bytes(
    raw: InferenceResult,
    fetcher: &dyn ImageFetcher,
    deadline: Instant,
) -> Option<Vec<u8>> {
    let bytes = match raw {
        InferenceResult::FilePath(path) => {
            if !path.is_file() {
                debug!(path = %path.display(), "result path does not exist locally");
                return None;
            }
            fs::read(&path).ok()?
        }
        InferenceResult::Url(url) => match fetcher.fetch(&url, deadline) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(error = %format!("{err:#}"), "result url fetch failed");
                return None;
            }
        },
        InferenceResult::Bytes(bytes) => bytes,
        InferenceResult::List(_) | InferenceResult::Opaque(_) => return None,
    };
    (!bytes.is_empty()).then_some(bytes)
}
