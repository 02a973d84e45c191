use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use graffiti_contracts::backends::{
    BackendCatalog, BackendDescriptor, BackendSelector, InputSource, Operation,
};
use graffiti_contracts::session::GarmentType;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::gateway::{InferenceGateway, InferenceRequest, PayloadField, PayloadValue};
use crate::normalizer::{extract_image, ImageFetcher, NormalizedImage};
use crate::staging::StagingArea;

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone)]
pub enum DispatchPayload {
    TryOn {
        person: DynamicImage,
        garment: DynamicImage,
        garment_type: GarmentType,
    },
    Generate {
        prompt: String,
        width: u32,
        height: u32,
    },
}

impl DispatchPayload {
    pub fn operation(&self) -> Operation {
        match self {
            Self::TryOn { .. } => Operation::TryOn,
            Self::Generate { .. } => Operation::GenerateImage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Succeeded,
    ServiceUnavailable,
    AllBackendsFailed,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub status: DispatchStatus,
    pub image: Option<NormalizedImage>,
    /// Backend that produced `image`.
    pub backend: Option<BackendDescriptor>,
    pub message: String,
    pub diagnostic: Option<String>,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == DispatchStatus::Succeeded
    }
}

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("could not reach backend: {0:#}")]
    Acquire(anyhow::Error),
    #[error("payload does not fit backend: {0}")]
    Payload(String),
    #[error("staging failed: {0:#}")]
    Staging(anyhow::Error),
    #[error("invocation failed: {0:#}")]
    Invoke(anyhow::Error),
    #[error("result carried no usable image")]
    Unusable,
}

impl AttemptError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Acquire(_) => "acquire",
            Self::Payload(_) => "payload",
            Self::Staging(_) => "staging",
            Self::Invoke(_) => "invoke",
            Self::Unusable => "unusable",
        }
    }
}

pub struct Dispatcher {
    gateway: Arc<dyn InferenceGateway>,
    fetcher: Arc<dyn ImageFetcher>,
    selector: BackendSelector,
    staging_parent: Option<PathBuf>,
    attempt_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        gateway: Arc<dyn InferenceGateway>,
        fetcher: Arc<dyn ImageFetcher>,
        catalog: BackendCatalog,
    ) -> Self {
        Self {
            gateway,
            fetcher,
            selector: BackendSelector::new(catalog),
            staging_parent: None,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_staging_parent(mut self, parent: Option<PathBuf>) -> Self {
        self.staging_parent = parent;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &BackendCatalog {
        &self.selector.catalog
    }

    /// Runs `payload` against `primary`, then once against its alternate.
    ///
    /// Never fails: every error below this point becomes a status.
    pub fn run(&self, primary: Option<&str>, payload: &DispatchPayload) -> DispatchOutcome {
        let dispatch_id = Uuid::new_v4().simple().to_string();
        let operation = payload.operation();
        let selection = match self.selector.select(primary, operation) {
            Ok(selection) => selection,
            Err(reason) => {
                warn!(dispatch_id = %dispatch_id, reason = %reason, "no backend to dispatch to");
                return unavailable(diagnostic_code(&dispatch_id, &[reason]));
            }
        };
        if let Some(reason) = &selection.fallback_reason {
            info!(dispatch_id = %dispatch_id, reason = %reason, "primary backend substituted");
        }

        let mut staging = StagingArea::new(self.staging_parent.clone());
        let mut failures: Vec<(String, AttemptError)> = Vec::new();
        for (attempt, backend) in selection.attempts().into_iter().enumerate() {
            info!(
                dispatch_id = %dispatch_id,
                backend = %backend.key,
                attempt = attempt + 1,
                operation = operation.as_str(),
                "dispatch attempt started"
            );
            match self.attempt(backend, payload, &mut staging) {
                Ok(image) => {
                    info!(
                        dispatch_id = %dispatch_id,
                        backend = %backend.key,
                        attempt = attempt + 1,
                        "dispatch attempt succeeded"
                    );
                    return DispatchOutcome {
                        status: DispatchStatus::Succeeded,
                        image: Some(image),
                        backend: Some(backend.clone()),
                        message: format!("Generated by {}", backend.name),
                        diagnostic: None,
                    };
                }
                Err(err) => {
                    warn!(
                        dispatch_id = %dispatch_id,
                        backend = %backend.key,
                        attempt = attempt + 1,
                        kind = err.kind(),
                        error = %err,
                        "dispatch attempt failed"
                    );
                    failures.push((backend.key.clone(), err));
                }
            }
        }

        let details: Vec<String> = failures
            .iter()
            .map(|(key, err)| format!("{key}: {err}"))
            .collect();
        let code = diagnostic_code(&dispatch_id, &details);
        let all_unreachable = failures
            .iter()
            .all(|(_, err)| matches!(err, AttemptError::Acquire(_)));
        warn!(dispatch_id = %dispatch_id, code = %code, "dispatch exhausted all backends");
        if all_unreachable {
            unavailable(code)
        } else {
            DispatchOutcome {
                status: DispatchStatus::AllBackendsFailed,
                image: None,
                backend: None,
                message: "All backends are temporarily unavailable. Please try again later."
                    .to_string(),
                diagnostic: Some(code),
            }
        }
    }

    fn attempt(
        &self,
        backend: &BackendDescriptor,
        payload: &DispatchPayload,
        staging: &mut StagingArea,
    ) -> Result<NormalizedImage, AttemptError> {
        let deadline = Instant::now() + self.attempt_timeout;
        let handle = self
            .gateway
            .acquire(backend, deadline)
            .map_err(AttemptError::Acquire)?;
        let fields = build_fields(backend, payload, staging)?;
        let request = InferenceRequest {
            operation: payload.operation(),
            fields,
            deadline,
        };
        let raw = handle.invoke(&request).map_err(AttemptError::Invoke)?;
        check_deadline(deadline)?;
        let image =
            extract_image(raw, self.fetcher.as_ref(), deadline).ok_or(AttemptError::Unusable)?;
        check_deadline(deadline)?;
        Ok(image)
    }
}

fn check_deadline(deadline: Instant) -> Result<(), AttemptError> {
    if Instant::now() > deadline {
        return Err(AttemptError::Invoke(anyhow::anyhow!(
            "attempt deadline exceeded"
        )));
    }
    Ok(())
}

fn build_fields(
    backend: &BackendDescriptor,
    payload: &DispatchPayload,
    staging: &mut StagingArea,
) -> Result<Vec<PayloadField>, AttemptError> {
    if backend.operation != payload.operation() {
        return Err(AttemptError::Payload(format!(
            "backend serves {}",
            backend.operation.as_str()
        )));
    }
    let mut fields = Vec::with_capacity(backend.inputs.len());
    for input in &backend.inputs {
        let value = match (input.from, payload) {
            (InputSource::Literal, _) => {
                PayloadValue::Json(input.value.clone().unwrap_or_default())
            }
            (InputSource::PersonImage, DispatchPayload::TryOn { person, .. }) => {
                PayloadValue::File(
                    staging
                        .stage_image("person", person)
                        .map_err(AttemptError::Staging)?,
                )
            }
            (InputSource::GarmentImage, DispatchPayload::TryOn { garment, .. }) => {
                PayloadValue::File(
                    staging
                        .stage_image("garment", garment)
                        .map_err(AttemptError::Staging)?,
                )
            }
            (InputSource::GarmentType, DispatchPayload::TryOn { garment_type, .. }) => {
                PayloadValue::Text(garment_type.as_str().to_string())
            }
            (InputSource::Prompt, DispatchPayload::Generate { prompt, .. }) => {
                PayloadValue::Text(prompt.clone())
            }
            (InputSource::Width, DispatchPayload::Generate { width, .. }) => {
                PayloadValue::Json((*width).into())
            }
            (InputSource::Height, DispatchPayload::Generate { height, .. }) => {
                PayloadValue::Json((*height).into())
            }
            (source, _) => {
                return Err(AttemptError::Payload(format!(
                    "input '{}' wants {source:?}",
                    input.name
                )))
            }
        };
        fields.push(PayloadField::new(input.name.clone(), value));
    }
    Ok(fields)
}

fn unavailable(code: String) -> DispatchOutcome {
    DispatchOutcome {
        status: DispatchStatus::ServiceUnavailable,
        image: None,
        backend: None,
        message: "The service is temporarily unavailable. Please try again later.".to_string(),
        diagnostic: Some(code),
    }
}

/// Short code shown to users so a report can be matched to the logged failure.
fn diagnostic_code(dispatch_id: &str, details: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dispatch_id.as_bytes());
    for detail in details {
        hasher.update(b"\n");
        hasher.update(detail.as_bytes());
    }
    hex::encode(&hasher.finalize()[..4]).to_uppercase()
}
