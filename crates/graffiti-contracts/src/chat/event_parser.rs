use crate::session::GarmentType;

use super::command_registry::{
    fixed_button, CommandSpec, COMMANDS, GARMENT_BUTTON_PREFIX, SELECT_MODEL_BUTTON_PREFIX,
};
use super::events::{Button, Command, EventKind};

fn find_command(command: &str, specs: &[CommandSpec]) -> Option<Command> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

/// Classifies a text message as a slash command or free text.
///
/// Telegram appends `@botname` to commands issued in groups; the suffix is
/// ignored. A lone `/` or a slash followed by whitespace is treated as text.
pub fn parse_text(text: &str) -> EventKind {
    let raw_trimmed = text.trim();
    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            return match find_command(&command, COMMANDS) {
                Some(action) => EventKind::Command(action),
                None => EventKind::UnknownCommand(command),
            };
        }
    }
    EventKind::Text(raw_trimmed.to_string())
}

pub fn parse_button(data: &str) -> Button {
    let data = data.trim();
    if let Some(button) = fixed_button(data) {
        return button;
    }
    if let Some(key) = data.strip_prefix(SELECT_MODEL_BUTTON_PREFIX) {
        if !key.is_empty() {
            return Button::SelectModel(key.to_string());
        }
    }
    if let Some(kind) = data
        .strip_prefix(GARMENT_BUTTON_PREFIX)
        .and_then(GarmentType::from_token)
    {
        return Button::GarmentType(kind);
    }
    Button::Unknown(data.to_string())
}

#[cfg(test)]
mod tests {
    use crate::chat::{button_data, Button, Command, EventKind};
    use crate::session::GarmentType;

    use super::{parse_button, parse_text};

    #[test]
    fn parse_known_commands() {
        assert_eq!(parse_text("/start"), EventKind::Command(Command::Start));
        assert_eq!(parse_text("  /HELP  "), EventKind::Command(Command::Help));
        assert_eq!(parse_text("/about"), EventKind::Command(Command::About));
        assert_eq!(parse_text("/menu"), EventKind::Command(Command::Start));
    }

    #[test]
    fn parse_command_with_bot_suffix() {
        assert_eq!(
            parse_text("/start@GraffitiBot"),
            EventKind::Command(Command::Start)
        );
        assert_eq!(
            parse_text("/start deep-link-payload"),
            EventKind::Command(Command::Start)
        );
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(
            parse_text("/magic foo"),
            EventKind::UnknownCommand("magic".to_string())
        );
    }

    #[test]
    fn parse_plain_text_and_bare_slash() {
        assert_eq!(
            parse_text(" a red car in the rain "),
            EventKind::Text("a red car in the rain".to_string())
        );
        assert_eq!(parse_text("/ hello"), EventKind::Text("/ hello".to_string()));
        assert_eq!(
            parse_text("قطة جميلة في الحديقة"),
            EventKind::Text("قطة جميلة في الحديقة".to_string())
        );
    }

    #[test]
    fn parse_fixed_buttons() {
        assert_eq!(parse_button("main_menu"), Button::MainMenu);
        assert_eq!(parse_button("start_tryon"), Button::StartTryOn);
        assert_eq!(parse_button("start_image_gen"), Button::StartImageGeneration);
        assert_eq!(parse_button("help"), Button::Help);
        assert_eq!(parse_button("about"), Button::About);
    }

    #[test]
    fn parse_parameterised_buttons() {
        assert_eq!(
            parse_button("select_model_g1_pro"),
            Button::SelectModel("g1_pro".to_string())
        );
        assert_eq!(
            parse_button("garment_dress"),
            Button::GarmentType(GarmentType::Dresses)
        );
        assert_eq!(
            parse_button("garment_hat"),
            Button::Unknown("garment_hat".to_string())
        );
        assert_eq!(
            parse_button("select_model_"),
            Button::Unknown("select_model_".to_string())
        );
    }

    #[test]
    fn button_data_is_inverse_of_parse() {
        let buttons = [
            Button::MainMenu,
            Button::Help,
            Button::About,
            Button::StartTryOn,
            Button::StartImageGeneration,
            Button::SelectModel("g1_fast".to_string()),
            Button::GarmentType(GarmentType::LowerBody),
        ];
        for button in buttons {
            assert_eq!(parse_button(&button_data(&button)), button);
        }
    }
}
