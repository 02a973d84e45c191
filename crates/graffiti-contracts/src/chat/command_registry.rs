use super::events::{Button, Command};

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: Command,
}

pub(crate) const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "start",
        action: Command::Start,
    },
    CommandSpec {
        command: "menu",
        action: Command::Start,
    },
    CommandSpec {
        command: "help",
        action: Command::Help,
    },
    CommandSpec {
        command: "about",
        action: Command::About,
    },
];

pub const MAIN_MENU_BUTTON: &str = "main_menu";
pub const HELP_BUTTON: &str = "help";
pub const ABOUT_BUTTON: &str = "about";
pub const START_TRYON_BUTTON: &str = "start_tryon";
pub const START_IMAGE_GEN_BUTTON: &str = "start_image_gen";
pub const SELECT_MODEL_BUTTON_PREFIX: &str = "select_model_";
pub const GARMENT_BUTTON_PREFIX: &str = "garment_";

pub(crate) fn fixed_button(data: &str) -> Option<Button> {
    let button = match data {
        MAIN_MENU_BUTTON => Button::MainMenu,
        HELP_BUTTON => Button::Help,
        ABOUT_BUTTON => Button::About,
        START_TRYON_BUTTON => Button::StartTryOn,
        START_IMAGE_GEN_BUTTON => Button::StartImageGeneration,
        _ => return None,
    };
    Some(button)
}

pub const CHAT_HELP_COMMANDS: &[&str] = &["/start", "/help", "/about"];

/// Callback payload for a button. Inverse of `parse_button`.
pub fn button_data(button: &Button) -> String {
    match button {
        Button::SelectModel(key) => format!("{SELECT_MODEL_BUTTON_PREFIX}{key}"),
        Button::GarmentType(kind) => format!("{GARMENT_BUTTON_PREFIX}{}", kind.token()),
        Button::Unknown(raw) => raw.clone(),
        Button::MainMenu => MAIN_MENU_BUTTON.to_string(),
        Button::Help => HELP_BUTTON.to_string(),
        Button::About => ABOUT_BUTTON.to_string(),
        Button::StartTryOn => START_TRYON_BUTTON.to_string(),
        Button::StartImageGeneration => START_IMAGE_GEN_BUTTON.to_string(),
    }
}
