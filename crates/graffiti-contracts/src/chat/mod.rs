mod command_registry;
mod event_parser;
mod events;

pub use command_registry::{
    button_data, ABOUT_BUTTON, CHAT_HELP_COMMANDS, GARMENT_BUTTON_PREFIX, HELP_BUTTON,
    MAIN_MENU_BUTTON, SELECT_MODEL_BUTTON_PREFIX, START_IMAGE_GEN_BUTTON, START_TRYON_BUTTON,
};
pub use event_parser::{parse_button, parse_text};
pub use events::{Button, Command, EventKind, InboundEvent, PhotoRef};
