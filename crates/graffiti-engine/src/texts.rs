use graffiti_contracts::backends::{BackendCatalog, Operation};
use graffiti_contracts::chat::Button;
use graffiti_contracts::session::GarmentType;

use crate::dispatch::DispatchOutcome;
use crate::messenger::Keyboard;
use crate::workflow::Reply;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Rendered {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    fn with(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn backend_name(catalog: &BackendCatalog, key: &str) -> String {
    let name = catalog
        .get(key)
        .map(|backend| backend.name.as_str())
        .unwrap_or(key);
    escape_html(name)
}

pub fn main_menu_keyboard() -> Keyboard {
    Keyboard::new()
        .button("Virtual try-on", Button::StartTryOn)
        .button("Image generator", Button::StartImageGeneration)
        .button("About Graffiti", Button::About)
        .button("Help", Button::Help)
}

fn back_to_menu() -> Keyboard {
    Keyboard::new().button("Main menu", Button::MainMenu)
}

fn model_keyboard(catalog: &BackendCatalog) -> Keyboard {
    catalog
        .menu(Operation::TryOn)
        .into_iter()
        .fold(Keyboard::new(), |keyboard, backend| {
            keyboard.button(
                backend.name.clone(),
                Button::SelectModel(backend.key.clone()),
            )
        })
        .button("Back", Button::MainMenu)
}

fn garment_keyboard() -> Keyboard {
    GarmentType::ALL
        .into_iter()
        .fold(Keyboard::new(), |keyboard, kind| {
            keyboard.button(kind.label(), Button::GarmentType(kind))
        })
        .button("Change model", Button::StartTryOn)
}

pub fn result_keyboard(operation: Operation) -> Keyboard {
    let again = match operation {
        Operation::TryOn => Button::StartTryOn,
        Operation::GenerateImage => Button::StartImageGeneration,
    };
    Keyboard::new()
        .button("Try again", again)
        .button("Main menu", Button::MainMenu)
}

pub fn render(reply: &Reply, catalog: &BackendCatalog) -> Rendered {
    match reply {
        Reply::MainMenu => Rendered::with(
            "<b>Welcome to Graffiti</b>\n\n\
             Try clothes on a photo of yourself, or turn a text prompt into an image.\n\
             Choose a service to begin.",
            main_menu_keyboard(),
        ),
        Reply::Help => Rendered::with(
            "<b>How to use Graffiti</b>\n\n\
             <b>Virtual try-on</b>\n\
             1. Pick a model.\n\
             2. Pick the garment type if asked.\n\
             3. Send a clear full-body photo of the person.\n\
             4. Send a photo of the garment on a plain background.\n\n\
             <b>Image generator</b>\n\
             Send a description in English or Arabic and get a 1024x1024 image.\n\n\
             Commands: /start, /help, /about",
            Keyboard::new()
                .button("Virtual try-on", Button::StartTryOn)
                .button("Image generator", Button::StartImageGeneration)
                .button("Main menu", Button::MainMenu),
        ),
        Reply::About => Rendered::with(
            "<b>About Graffiti</b>\n\n\
             Graffiti forwards your photos and prompts to hosted AI models and sends \
             the result back. Nothing is stored once a request finishes.",
            back_to_menu(),
        ),
        Reply::ChooseModel => Rendered::with(
            "<b>Virtual try-on</b>\n\nChoose a model:",
            model_keyboard(catalog),
        ),
        Reply::ChooseGarmentType { backend } => Rendered::with(
            format!(
                "<b>{}</b>\n\nWhat kind of garment are you trying on?",
                backend_name(catalog, backend)
            ),
            garment_keyboard(),
        ),
        Reply::AskPerson {
            backend,
            garment_type,
        } => {
            let mut keyboard = Keyboard::new();
            let mut text = format!("<b>{}</b>\n", backend_name(catalog, backend));
            if let Some(kind) = garment_type {
                text.push_str(&format!("Garment type: {}\n", kind.label()));
                keyboard = keyboard.button("Change type", Button::SelectModel(backend.clone()));
            }
            text.push_str("\nStep 1 of 2: send a photo of the person.");
            Rendered::with(text, keyboard.button("Change model", Button::StartTryOn))
        }
        Reply::AskGarment => Rendered::plain(
            "Got it.\n\nStep 2 of 2: send a photo of the garment.",
        ),
        Reply::AskPrompt => Rendered::with(
            "<b>Image generator</b>\n\n\
             Describe the image you want. Arabic prompts are translated automatically.",
            back_to_menu(),
        ),
        Reply::RemindStart => Rendered::with(
            "Please choose a service first.",
            main_menu_keyboard(),
        ),
        Reply::RemindPerson => Rendered::plain("Please send a photo of the person, not text."),
        Reply::RemindGarment => Rendered::plain("Please send a photo of the garment, not text."),
        Reply::RemindPrompt => Rendered::plain("Please send a text description of the image."),
        Reply::UnknownCommand(command) => Rendered::plain(format!(
            "Unknown command /{}. Try /start, /help or /about.",
            escape_html(command)
        )),
        Reply::StaleButton => Rendered::with(
            "That button is no longer active.",
            back_to_menu(),
        ),
        Reply::UnreadablePhoto => Rendered::plain(
            "I could not read that photo. Please send it again as a JPEG or PNG image.",
        ),
        Reply::Busy => Rendered::plain("Still working on your previous request, please wait."),
        Reply::Processing { backend } => Rendered::plain(format!(
            "Processing with <b>{}</b>. This can take up to a minute.",
            backend_name(catalog, backend)
        )),
        Reply::Generating => Rendered::plain("Generating your image. This can take up to a minute."),
    }
}

pub fn try_on_caption(outcome: &DispatchOutcome) -> String {
    let name = outcome
        .backend
        .as_ref()
        .map(|backend| escape_html(&backend.name))
        .unwrap_or_default();
    format!("<b>Graffiti try-on result</b>\n\nModel: {name}")
}

pub fn generation_caption(outcome: &DispatchOutcome, prompt: &str, sent_prompt: &str) -> String {
    let name = outcome
        .backend
        .as_ref()
        .map(|backend| escape_html(&backend.name))
        .unwrap_or_default();
    let mut caption = format!("<b>{name}</b>\n\nPrompt: {}", escape_html(prompt));
    if sent_prompt != prompt {
        caption.push_str(&format!("\nTranslated: {}", escape_html(sent_prompt)));
    }
    caption
}

pub fn failure_text(outcome: &DispatchOutcome) -> String {
    match &outcome.diagnostic {
        Some(code) => format!("{}\n\nReference: <code>{code}</code>", escape_html(&outcome.message)),
        None => escape_html(&outcome.message),
    }
}

pub fn delivery_failed_text() -> &'static str {
    "The result was ready but could not be delivered. Please try again."
}

#[cfg(test)]
mod tests {
    use graffiti_contracts::backends::BackendCatalog;
    use graffiti_contracts::chat::Button;

    use super::{escape_html, render};
    use crate::workflow::Reply;

    #[test]
    fn model_menu_lists_try_on_backends_then_back() {
        let catalog = BackendCatalog::builtin().expect("builtin catalog");
        let rendered = render(&Reply::ChooseModel, &catalog);
        let buttons: Vec<Button> = rendered
            .keyboard
            .expect("keyboard")
            .buttons()
            .map(|key| key.button.clone())
            .collect();
        assert_eq!(
            buttons,
            vec![
                Button::SelectModel("g1_fast".to_string()),
                Button::SelectModel("g1_pro".to_string()),
                Button::MainMenu,
            ]
        );
    }

    #[test]
    fn person_prompt_offers_change_type_for_typed_backends() {
        let catalog = BackendCatalog::builtin().expect("builtin catalog");
        let rendered = render(
            &Reply::AskPerson {
                backend: "g1_pro".to_string(),
                garment_type: Some(graffiti_contracts::session::GarmentType::Dresses),
            },
            &catalog,
        );
        assert!(rendered.text.contains("Graffiti G1 Pro"));
        assert!(rendered.text.contains("Dresses"));
        let first = rendered.keyboard.expect("keyboard").rows[0][0].button.clone();
        assert_eq!(first, Button::SelectModel("g1_pro".to_string()));
    }

    #[test]
    fn escapes_markup_in_user_text() {
        assert_eq!(escape_html("<b>x & y</b>"), "&lt;b&gt;x &amp; y&lt;/b&gt;");
        let catalog = BackendCatalog::builtin().expect("builtin catalog");
        let rendered = render(&Reply::UnknownCommand("<x>".to_string()), &catalog);
        assert!(rendered.text.contains("/&lt;x&gt;"));
    }
}
