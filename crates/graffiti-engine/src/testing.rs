//! In-crate fakes for the remote collaborators.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use graffiti_contracts::backends::BackendDescriptor;
use graffiti_contracts::chat::PhotoRef;
use graffiti_contracts::session::UserId;

use crate::gateway::{
    GatewayHandle, InferenceGateway, InferenceRequest, InferenceResult, PayloadValue,
};
use crate::messenger::{Keyboard, Messenger};
use crate::normalizer::{ImageFetcher, NormalizedImage};
use crate::translate::Translator;

#[derive(Debug, Clone)]
pub(crate) enum Script {
    AcquireFails,
    InvokeFails(&'static str),
    Returns(InferenceResult),
}

type RequestLog = std::sync::Arc<Mutex<Vec<(String, InferenceRequest)>>>;

#[derive(Default)]
pub(crate) struct FakeGateway {
    scripts: HashMap<String, Script>,
    log: RequestLog,
}

impl FakeGateway {
    pub(crate) fn script(mut self, backend: &str, script: Script) -> Self {
        self.scripts.insert(backend.to_string(), script);
        self
    }

    pub(crate) fn requests(&self, backend: &str) -> Vec<InferenceRequest> {
        self.log
            .lock()
            .expect("request log")
            .iter()
            .filter(|(key, _)| key == backend)
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub(crate) fn invocations(&self, backend: &str) -> usize {
        self.requests(backend).len()
    }

    pub(crate) fn staged_paths(&self) -> Vec<PathBuf> {
        self.log
            .lock()
            .expect("request log")
            .iter()
            .flat_map(|(_, request)| request.fields.clone())
            .filter_map(|field| match field.value {
                PayloadValue::File(path) => Some(path),
                _ => None,
            })
            .collect()
    }
}

impl InferenceGateway for FakeGateway {
    fn acquire(
        &self,
        backend: &BackendDescriptor,
        _deadline: Instant,
    ) -> Result<Box<dyn GatewayHandle>> {
        let script = self
            .scripts
            .get(&backend.key)
            .cloned()
            .unwrap_or(Script::InvokeFails("unscripted backend"));
        if matches!(script, Script::AcquireFails) {
            bail!("{} is offline", backend.key);
        }
        Ok(Box::new(FakeHandle {
            backend: backend.key.clone(),
            script,
            log: self.log.clone(),
        }))
    }
}

struct FakeHandle {
    backend: String,
    script: Script,
    log: RequestLog,
}

impl GatewayHandle for FakeHandle {
    fn invoke(&self, request: &InferenceRequest) -> Result<InferenceResult> {
        for field in &request.fields {
            if let PayloadValue::File(path) = &field.value {
                if !path.is_file() {
                    bail!("staged file {} missing", path.display());
                }
            }
        }
        self.log
            .lock()
            .map_err(|_| anyhow!("request log poisoned"))?
            .push((self.backend.clone(), request.clone()));
        match &self.script {
            Script::Returns(result) => Ok(result.clone()),
            Script::InvokeFails(message) => bail!("{message}"),
            Script::AcquireFails => bail!("unreachable"),
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeFetcher {
    responses: HashMap<String, Vec<u8>>,
    delay: Option<Duration>,
    ignore_deadline: bool,
    requested: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub(crate) fn with(mut self, url: &str, bytes: &[u8]) -> Self {
        self.responses.insert(url.to_string(), bytes.to_vec());
        self
    }

    /// Each fetch waits until `delay` passes or the deadline is reached.
    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Like `delayed`, but the fetch always sleeps in full and then succeeds.
    pub(crate) fn stalled(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self.ignore_deadline = true;
        self
    }

    pub(crate) fn requested(&self) -> Vec<String> {
        self.requested.lock().expect("fetch log").clone()
    }
}

impl ImageFetcher for FakeFetcher {
    fn fetch(&self, url: &str, deadline: Instant) -> Result<Vec<u8>> {
        self.requested
            .lock()
            .map_err(|_| anyhow!("fetch log poisoned"))?
            .push(url.to_string());
        if let Some(delay) = self.delay {
            if self.ignore_deadline {
                thread::sleep(delay);
            } else {
                let left = deadline.saturating_duration_since(Instant::now());
                thread::sleep(delay.min(left));
                if delay > left {
                    bail!("download of {url} timed out");
                }
            }
        }
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 for {url}"))
    }
}

pub(crate) struct FakeTranslator {
    output: String,
    calls: Mutex<Vec<String>>,
}

impl FakeTranslator {
    pub(crate) fn new(output: &str) -> Self {
        Self {
            output: output.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("translator log").clone()
    }
}

impl Translator for FakeTranslator {
    fn translate_to_english(&self, text: &str) -> String {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(text.to_string());
        }
        self.output.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Text {
        user_id: UserId,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Edit {
        user_id: UserId,
        text: String,
    },
    Image {
        user_id: UserId,
        image: NormalizedImage,
        caption: Option<String>,
    },
}

#[derive(Default)]
pub(crate) struct FakeMessenger {
    photos: HashMap<String, Vec<u8>>,
    fail_images: bool,
    fail_edits: bool,
    sent: Mutex<Vec<Sent>>,
}

impl FakeMessenger {
    pub(crate) fn with_photo(mut self, file_id: &str, bytes: Vec<u8>) -> Self {
        self.photos.insert(file_id.to_string(), bytes);
        self
    }

    pub(crate) fn failing_images(mut self) -> Self {
        self.fail_images = true;
        self
    }

    pub(crate) fn failing_edits(mut self) -> Self {
        self.fail_edits = true;
        self
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("sent log").clone()
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text { text, .. } | Sent::Edit { text, .. } => Some(text),
                Sent::Image { .. } => None,
            })
            .collect()
    }

    pub(crate) fn images(&self) -> Vec<(NormalizedImage, Option<String>)> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Image { image, caption, .. } => Some((image, caption)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, sent: Sent) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow!("sent log poisoned"))?
            .push(sent);
        Ok(())
    }
}

impl Messenger for FakeMessenger {
    fn send_text(&self, user_id: UserId, text: &str, keyboard: Option<&Keyboard>) -> Result<()> {
        self.record(Sent::Text {
            user_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        })
    }

    fn send_image(
        &self,
        user_id: UserId,
        image: &NormalizedImage,
        caption: Option<&str>,
        _keyboard: Option<&Keyboard>,
    ) -> Result<()> {
        if self.fail_images {
            bail!("photo upload rejected");
        }
        self.record(Sent::Image {
            user_id,
            image: image.clone(),
            caption: caption.map(str::to_string),
        })
    }

    fn edit_last_prompt(
        &self,
        user_id: UserId,
        text: &str,
        _keyboard: Option<&Keyboard>,
    ) -> Result<()> {
        if self.fail_edits {
            bail!("message to edit not found");
        }
        self.record(Sent::Edit {
            user_id,
            text: text.to_string(),
        })
    }

    fn download_photo(&self, photo: &PhotoRef) -> Result<Vec<u8>> {
        self.photos
            .get(&photo.0)
            .cloned()
            .ok_or_else(|| anyhow!("file {} not found", photo.0))
    }
}
