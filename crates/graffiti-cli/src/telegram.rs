use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use graffiti_contracts::chat::{button_data, parse_button, parse_text, EventKind, InboundEvent, PhotoRef};
use graffiti_contracts::session::UserId;
use graffiti_engine::{response_json_or_error, Keyboard, Messenger, NormalizedImage};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::debug;

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// One parsed `getUpdates` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUpdate {
    pub update_id: i64,
    pub event: Option<InboundEvent>,
    pub callback_id: Option<String>,
}

pub struct TelegramClient {
    http: HttpClient,
    token: String,
    api_base: String,
    last_prompt: Mutex<HashMap<UserId, i64>>,
}

impl TelegramClient {
    pub fn new(token: String) -> Self {
        Self {
            http: HttpClient::new(),
            token,
            api_base: API_BASE.to_string(),
            last_prompt: Mutex::new(HashMap::new()),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    fn call(&self, method: &str, payload: &Value, timeout: Duration) -> Result<Value> {
        let response = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(payload)
            .send()
            .with_context(|| format!("Telegram {method} failed"))?;
        api_result(method, response_json_or_error("Telegram", response)?)
    }

    pub fn delete_webhook(&self, drop_pending: bool) -> Result<()> {
        self.call(
            "deleteWebhook",
            &json!({ "drop_pending_updates": drop_pending }),
            REQUEST_TIMEOUT,
        )?;
        Ok(())
    }

    pub fn get_updates(&self, offset: Option<i64>, poll_timeout: u64) -> Result<Vec<Value>> {
        let mut payload = json!({
            "timeout": poll_timeout,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }
        let result = self.call(
            "getUpdates",
            &payload,
            Duration::from_secs(poll_timeout) + REQUEST_TIMEOUT,
        )?;
        match result {
            Value::Array(updates) => Ok(updates),
            _ => bail!("Telegram getUpdates returned a non-list result"),
        }
    }

    pub fn answer_callback(&self, callback_id: &str) -> Result<()> {
        self.call(
            "answerCallbackQuery",
            &json!({ "callback_query_id": callback_id }),
            REQUEST_TIMEOUT,
        )?;
        Ok(())
    }

    fn remember_prompt(&self, user_id: UserId, message: &Value, keyboard: Option<&Keyboard>) {
        let mut prompts = self.prompts();
        match (keyboard, message.get("message_id").and_then(Value::as_i64)) {
            (Some(_), Some(message_id)) => {
                prompts.insert(user_id, message_id);
            }
            _ => {
                prompts.remove(&user_id);
            }
        }
    }

    fn prompts(&self) -> MutexGuard<'_, HashMap<UserId, i64>> {
        self.last_prompt.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Messenger for TelegramClient {
    fn send_text(&self, user_id: UserId, text: &str, keyboard: Option<&Keyboard>) -> Result<()> {
        let mut payload = json!({
            "chat_id": user_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(keyboard) = keyboard {
            payload["reply_markup"] = reply_markup(keyboard);
        }
        let message = self.call("sendMessage", &payload, REQUEST_TIMEOUT)?;
        self.remember_prompt(user_id, &message, keyboard);
        Ok(())
    }

    fn send_image(
        &self,
        user_id: UserId,
        image: &NormalizedImage,
        caption: Option<&str>,
        keyboard: Option<&Keyboard>,
    ) -> Result<()> {
        let message = match image {
            NormalizedImage::Bytes(bytes) => {
                let part = MultipartPart::bytes(bytes.clone())
                    .file_name("graffiti.png")
                    .mime_str("image/png")
                    .context("invalid photo mime type")?;
                let mut form = MultipartForm::new()
                    .text("chat_id", user_id.to_string())
                    .text("parse_mode", "HTML")
                    .part("photo", part);
                if let Some(caption) = caption {
                    form = form.text("caption", caption.to_string());
                }
                if let Some(keyboard) = keyboard {
                    form = form.text("reply_markup", reply_markup(keyboard).to_string());
                }
                let response = self
                    .http
                    .post(self.method_url("sendPhoto"))
                    .timeout(UPLOAD_TIMEOUT)
                    .multipart(form)
                    .send()
                    .context("Telegram sendPhoto failed")?;
                api_result("sendPhoto", response_json_or_error("Telegram", response)?)?
            }
            NormalizedImage::Passthrough(other) => {
                bail!("result of type {} cannot be sent as a photo", json_kind(other))
            }
        };
        self.remember_prompt(user_id, &message, keyboard);
        Ok(())
    }

    fn edit_last_prompt(
        &self,
        user_id: UserId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<()> {
        let message_id = self
            .prompts()
            .get(&user_id)
            .copied()
            .ok_or_else(|| anyhow!("no prompt to edit for {user_id}"))?;
        let mut payload = json!({
            "chat_id": user_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(keyboard) = keyboard {
            payload["reply_markup"] = reply_markup(keyboard);
        }
        self.call("editMessageText", &payload, REQUEST_TIMEOUT)?;
        if keyboard.is_none() {
            self.prompts().remove(&user_id);
        }
        Ok(())
    }

    fn download_photo(&self, photo: &PhotoRef) -> Result<Vec<u8>> {
        let file = self.call("getFile", &json!({ "file_id": photo.0 }), REQUEST_TIMEOUT)?;
        let file_path = file
            .get("file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Telegram getFile returned no file_path"))?;
        let url = format!("{}/file/bot{}/{file_path}", self.api_base, self.token);
        let response = self
            .http
            .get(&url)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .context("Telegram file download failed")?;
        if !response.status().is_success() {
            bail!("Telegram file download failed ({})", response.status().as_u16());
        }
        let bytes = response.bytes().context("Telegram file read failed")?;
        debug!(bytes = bytes.len(), "photo downloaded");
        Ok(bytes.to_vec())
    }
}

fn api_result(method: &str, body: Value) -> Result<Value> {
    if body.get("ok").and_then(Value::as_bool) != Some(true) {
        let description = body
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("no description");
        bail!("Telegram {method} rejected: {description}");
    }
    Ok(body.get("result").cloned().unwrap_or(Value::Null))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn reply_markup(keyboard: &Keyboard) -> Value {
    let rows: Vec<Value> = keyboard
        .rows
        .iter()
        .map(|row| {
            Value::Array(
                row.iter()
                    .map(|key| json!({ "text": key.label, "callback_data": button_data(&key.button) }))
                    .collect(),
            )
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

/// Maps a Telegram update onto an inbound event keyed by chat id.
pub fn parse_update(update: &Value) -> Option<ParsedUpdate> {
    let update_id = update.get("update_id")?.as_i64()?;
    if let Some(callback) = update.get("callback_query") {
        let callback_id = callback.get("id").and_then(Value::as_str).map(str::to_string);
        let chat_id = callback
            .get("message")
            .and_then(|message| message.get("chat"))
            .and_then(|chat| chat.get("id"))
            .and_then(Value::as_i64)
            .or_else(|| callback.get("from")?.get("id")?.as_i64());
        let event = match (chat_id, callback.get("data").and_then(Value::as_str)) {
            (Some(chat_id), Some(data)) => Some(InboundEvent::new(
                chat_id,
                EventKind::Button(parse_button(data)),
            )),
            _ => None,
        };
        return Some(ParsedUpdate {
            update_id,
            event,
            callback_id,
        });
    }

    let event = update.get("message").and_then(|message| {
        let chat_id = message.get("chat")?.get("id")?.as_i64()?;
        let kind = if let Some(sizes) = message.get("photo").and_then(Value::as_array) {
            let file_id = sizes.last()?.get("file_id")?.as_str()?;
            EventKind::Photo(PhotoRef(file_id.to_string()))
        } else if let Some(document) = message.get("document").filter(|document| {
            document
                .get("mime_type")
                .and_then(Value::as_str)
                .map(|mime| mime.starts_with("image/"))
                .unwrap_or(false)
        }) {
            EventKind::Photo(PhotoRef(document.get("file_id")?.as_str()?.to_string()))
        } else {
            parse_text(message.get("text")?.as_str()?)
        };
        Some(InboundEvent::new(chat_id, kind))
    });
    Some(ParsedUpdate {
        update_id,
        event,
        callback_id: None,
    })
}
