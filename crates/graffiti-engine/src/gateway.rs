use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use graffiti_contracts::backends::{BackendDescriptor, CallingConvention, Operation};
use reqwest::blocking::multipart::Form as MultipartForm;
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};
use tracing::debug;

use crate::{response_json_or_error, truncate_text};

const DEFAULT_HUB_BASE: &str = "https://huggingface.co";

/// Raw output of a remote endpoint, classified at the gateway boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResult {
    FilePath(PathBuf),
    Url(String),
    Bytes(Vec<u8>),
    List(Vec<InferenceResult>),
    Opaque(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    /// Local staged file, uploaded before the call.
    File(PathBuf),
    Text(String),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayloadField {
    pub name: String,
    pub value: PayloadValue,
}

impl PayloadField {
    pub fn new(name: impl Into<String>, value: PayloadValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub operation: Operation,
    pub fields: Vec<PayloadField>,
    pub deadline: Instant,
}

pub trait InferenceGateway: Send + Sync {
    fn acquire(&self, backend: &BackendDescriptor, deadline: Instant)
        -> Result<Box<dyn GatewayHandle>>;
}

pub trait GatewayHandle: Send {
    fn invoke(&self, request: &InferenceRequest) -> Result<InferenceResult>;
}

/// Gateway over the Gradio HTTP queue API used by Hugging Face Spaces.
#[derive(Debug, Clone)]
pub struct GradioGateway {
    http: HttpClient,
    hf_token: Option<String>,
    hub_base: String,
}

impl GradioGateway {
    pub fn new(hf_token: Option<String>) -> Self {
        Self {
            http: HttpClient::new(),
            hf_token,
            hub_base: DEFAULT_HUB_BASE.to_string(),
        }
    }

    pub fn with_hub_base(mut self, hub_base: impl Into<String>) -> Self {
        self.hub_base = hub_base.into().trim_end_matches('/').to_string();
        self
    }

    fn resolve_root(&self, target: &str, deadline: Instant) -> Result<String> {
        let target = target.trim();
        if target.starts_with("http://") || target.starts_with("https://") {
            return Ok(target.trim_end_matches('/').to_string());
        }
        let url = format!("{}/api/spaces/{target}/host", self.hub_base);
        let response = authorize(self.http.get(&url), self.hf_token.as_deref())
            .timeout(remaining(deadline)?)
            .send()
            .with_context(|| format!("Space host lookup failed ({target})"))?;
        let payload = response_json_or_error("Space host lookup", response)?;
        let host = payload
            .get("host")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .ok_or_else(|| anyhow!("Space '{target}' has no running host"))?;
        Ok(host.trim_end_matches('/').to_string())
    }

    fn get_json(&self, url: &str, label: &str, deadline: Instant) -> Result<Value> {
        let response = authorize(self.http.get(url), self.hf_token.as_deref())
            .timeout(remaining(deadline)?)
            .send()
            .with_context(|| format!("{label} request failed ({url})"))?;
        response_json_or_error(label, response)
    }
}

impl InferenceGateway for GradioGateway {
    fn acquire(
        &self,
        backend: &BackendDescriptor,
        deadline: Instant,
    ) -> Result<Box<dyn GatewayHandle>> {
        let root = self.resolve_root(&backend.target, deadline)?;
        let config = self.get_json(&format!("{root}/config"), "Gradio config", deadline)?;
        let api_prefix = config
            .get("api_prefix")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        let parameters = match backend.convention {
            CallingConvention::Positional => None,
            CallingConvention::Named => {
                let info =
                    self.get_json(&format!("{root}{api_prefix}/info"), "Gradio info", deadline)?;
                Some(endpoint_parameters(&info, &backend.api_name)?)
            }
        };
        debug!(
            backend = %backend.key,
            root = %root,
            api_prefix = %api_prefix,
            "gateway handle acquired"
        );
        Ok(Box::new(GradioHandle {
            http: self.http.clone(),
            hf_token: self.hf_token.clone(),
            root,
            api_prefix,
            api_name: backend.api_name.clone(),
            parameters,
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct EndpointParameter {
    name: String,
    default: Option<Value>,
}

struct GradioHandle {
    http: HttpClient,
    hf_token: Option<String>,
    root: String,
    api_prefix: String,
    api_name: String,
    parameters: Option<Vec<EndpointParameter>>,
}

impl GradioHandle {
    fn base(&self) -> String {
        format!("{}{}", self.root, self.api_prefix)
    }

    fn upload(&self, path: &Path, deadline: Instant) -> Result<Value> {
        let form = MultipartForm::new()
            .file("files", path)
            .with_context(|| format!("failed reading staged file {}", path.display()))?;
        let url = format!("{}/upload", self.base());
        let response = authorize(self.http.post(&url), self.hf_token.as_deref())
            .timeout(remaining(deadline)?)
            .multipart(form)
            .send()
            .context("Gradio upload failed")?;
        let payload = response_json_or_error("Gradio upload", response)?;
        let remote_path = payload
            .as_array()
            .and_then(|paths| paths.first())
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Gradio upload returned no file path"))?;
        Ok(json!({
            "path": remote_path,
            "meta": {"_type": "gradio.FileData"},
        }))
    }

    fn field_value(&self, value: &PayloadValue, deadline: Instant) -> Result<Value> {
        match value {
            PayloadValue::File(path) => self.upload(path, deadline),
            PayloadValue::Text(text) => Ok(Value::String(text.clone())),
            PayloadValue::Json(raw) => Ok(raw.clone()),
        }
    }

    fn call(&self, data: Vec<Value>, deadline: Instant) -> Result<Value> {
        let url = format!("{}/call{}", self.base(), self.api_name);
        let response = authorize(self.http.post(&url), self.hf_token.as_deref())
            .timeout(remaining(deadline)?)
            .json(&json!({ "data": data }))
            .send()
            .with_context(|| format!("Gradio call failed ({})", self.api_name))?;
        let payload = response_json_or_error("Gradio call", response)?;
        let event_id = payload
            .get("event_id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Gradio call returned no event id"))?;

        let stream_url = format!("{url}/{event_id}");
        let response = authorize(self.http.get(&stream_url), self.hf_token.as_deref())
            .timeout(remaining(deadline)?)
            .send()
            .with_context(|| format!("Gradio result stream failed ({})", self.api_name))?;
        let status = response.status();
        let body = response
            .text()
            .context("Gradio result stream read failed")?;
        if !status.is_success() {
            bail!(
                "Gradio result stream failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            );
        }
        parse_sse_outcome(&body)
    }
}

impl GatewayHandle for GradioHandle {
    fn invoke(&self, request: &InferenceRequest) -> Result<InferenceResult> {
        let data = match &self.parameters {
            None => request
                .fields
                .iter()
                .map(|field| self.field_value(&field.value, request.deadline))
                .collect::<Result<Vec<_>>>()?,
            Some(parameters) => {
                for field in &request.fields {
                    if !parameters.iter().any(|param| param.name == field.name) {
                        bail!(
                            "endpoint {} has no parameter named '{}'",
                            self.api_name,
                            field.name
                        );
                    }
                }
                let mut data = Vec::with_capacity(parameters.len());
                for param in parameters {
                    let value = match request.fields.iter().find(|f| f.name == param.name) {
                        Some(field) => self.field_value(&field.value, request.deadline)?,
                        None => param.default.clone().unwrap_or(Value::Null),
                    };
                    data.push(value);
                }
                data
            }
        };
        let output = self.call(data, request.deadline)?;
        classify_outputs(output, &format!("{}/file=", self.base()))
    }
}

fn authorize(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
        None => builder,
    }
}

pub(crate) fn remaining(deadline: Instant) -> Result<Duration> {
    match deadline.checked_duration_since(Instant::now()) {
        Some(left) if !left.is_zero() => Ok(left),
        _ => bail!("attempt deadline exceeded"),
    }
}

fn endpoint_parameters(info: &Value, api_name: &str) -> Result<Vec<EndpointParameter>> {
    let endpoint = info
        .get("named_endpoints")
        .and_then(|endpoints| endpoints.get(api_name))
        .ok_or_else(|| anyhow!("endpoint {api_name} is not published"))?;
    let parameters = endpoint
        .get("parameters")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("endpoint {api_name} lists no parameters"))?;
    parameters
        .iter()
        .enumerate()
        .map(|(index, param)| {
            let name = param
                .get("parameter_name")
                .or_else(|| param.get("label"))
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("endpoint {api_name} parameter {index} has no name"))?;
            let has_default = param
                .get("parameter_has_default")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(EndpointParameter {
                name: name.to_string(),
                default: has_default
                    .then(|| param.get("parameter_default").cloned().unwrap_or(Value::Null)),
            })
        })
        .collect()
}

/// Extracts the payload of the `complete` event from an SSE body.
pub fn parse_sse_outcome(body: &str) -> Result<Value> {
    let mut event = "";
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(name) = line.strip_prefix("event:") {
            event = name.trim();
            continue;
        }
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        match event {
            "complete" => {
                return serde_json::from_str(data)
                    .context("Gradio result payload is not valid JSON");
            }
            "error" => bail!("remote endpoint reported an error: {}", truncate_text(data, 512)),
            _ => {}
        }
    }
    bail!("result stream ended without a completion event")
}

fn classify_outputs(output: Value, file_base: &str) -> Result<InferenceResult> {
    match output {
        Value::Null => bail!("endpoint returned no data"),
        Value::Array(items) if items.iter().all(Value::is_null) => {
            bail!("endpoint returned no data")
        }
        Value::Array(mut items) if items.len() == 1 => {
            Ok(classify_output(items.remove(0), file_base))
        }
        Value::Array(items) => Ok(InferenceResult::List(
            items
                .into_iter()
                .map(|item| classify_output(item, file_base))
                .collect(),
        )),
        other => Ok(classify_output(other, file_base)),
    }
}

/// Maps one output value onto the closed result variants.
pub fn classify_output(value: Value, file_base: &str) -> InferenceResult {
    match value {
        Value::String(text) => classify_text(text),
        Value::Array(items) => InferenceResult::List(
            items
                .into_iter()
                .map(|item| classify_output(item, file_base))
                .collect(),
        ),
        Value::Object(map) => {
            if let Some(url) = map.get("url").and_then(Value::as_str) {
                return classify_text(url.to_string());
            }
            if let Some(path) = map.get("path").and_then(Value::as_str) {
                return InferenceResult::Url(format!("{file_base}{path}"));
            }
            if let Some(inner) = map.get("image") {
                return classify_output(inner.clone(), file_base);
            }
            InferenceResult::Opaque(Value::Object(map))
        }
        other => InferenceResult::Opaque(other),
    }
}

fn classify_text(text: String) -> InferenceResult {
    if text.starts_with("http://") || text.starts_with("https://") {
        return InferenceResult::Url(text);
    }
    if let Some(rest) = text.strip_prefix("data:") {
        if let Some((_, encoded)) = rest.split_once(";base64,") {
            if let Ok(bytes) = BASE64.decode(encoded.trim()) {
                return InferenceResult::Bytes(bytes);
            }
        }
        return InferenceResult::Opaque(Value::String(text));
    }
    InferenceResult::FilePath(PathBuf::from(text))
}
