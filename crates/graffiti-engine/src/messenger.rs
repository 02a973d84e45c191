use anyhow::Result;
use graffiti_contracts::chat::{Button, PhotoRef};
use graffiti_contracts::session::UserId;

use crate::normalizer::NormalizedImage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyButton {
    pub label: String,
    pub button: Button,
}

impl KeyButton {
    pub fn new(label: impl Into<String>, button: Button) -> Self {
        Self {
            label: label.into(),
            button,
        }
    }
}

/// Inline keyboard, one button per row unless built otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<KeyButton>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn button(mut self, label: impl Into<String>, button: Button) -> Self {
        self.rows.push(vec![KeyButton::new(label, button)]);
        self
    }

    pub fn buttons(&self) -> impl Iterator<Item = &KeyButton> {
        self.rows.iter().flatten()
    }
}

/// Outbound side of the chat transport. Text is HTML-formatted.
pub trait Messenger: Send + Sync {
    fn send_text(&self, user_id: UserId, text: &str, keyboard: Option<&Keyboard>) -> Result<()>;

    fn send_image(
        &self,
        user_id: UserId,
        image: &NormalizedImage,
        caption: Option<&str>,
        keyboard: Option<&Keyboard>,
    ) -> Result<()>;

    /// Replaces the last prompt shown to `user_id`. Fails when there is none to edit.
    fn edit_last_prompt(
        &self,
        user_id: UserId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<()>;

    fn download_photo(&self, photo: &PhotoRef) -> Result<Vec<u8>>;
}
