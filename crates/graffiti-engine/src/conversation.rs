use std::sync::Arc;

use anyhow::{Context, Result};
use graffiti_contracts::backends::{BackendCatalog, Operation};
use graffiti_contracts::chat::{EventKind, InboundEvent, PhotoRef};
use graffiti_contracts::session::{SessionStore, UserId};
use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchOutcome, DispatchPayload, Dispatcher};
use crate::messenger::Messenger;
use crate::texts;
use crate::translate::{translate_prompt, Translator};
use crate::workflow::{transition, Input, Job, SessionChange};

pub const GENERATION_SIZE: u32 = 1024;

/// Drives one user event through the workflow and its side effects.
///
/// Callers must not run two events of the same user concurrently.
pub struct Conversation {
    sessions: SessionStore,
    dispatcher: Dispatcher,
    translator: Arc<dyn Translator>,
    messenger: Arc<dyn Messenger>,
}

impl Conversation {
    pub fn new(
        sessions: SessionStore,
        dispatcher: Dispatcher,
        translator: Arc<dyn Translator>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            sessions,
            dispatcher,
            translator,
            messenger,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn catalog(&self) -> &BackendCatalog {
        self.dispatcher.catalog()
    }

    pub fn handle(&self, event: InboundEvent) {
        let user_id = event.user_id;
        let kind = event.kind.label();
        let from_button = matches!(event.kind, EventKind::Button(_));
        let input = self.resolve_input(user_id, event.kind);
        let before = self.sessions.step(user_id);
        debug!(user_id, kind, step = before.label(), input = input.label(), "event received");

        let session = self.sessions.take(user_id);
        let result = transition(session, input, self.catalog());
        match result.session {
            SessionChange::Clear => {}
            SessionChange::Start(mode) => self.sessions.create(user_id, mode),
            SessionChange::Store(session) => {
                if !session.is_empty() {
                    self.sessions.update(user_id, |slot| *slot = session);
                }
            }
        }
        let after = self.sessions.step(user_id);
        if after != before {
            info!(user_id, from = before.label(), to = after.label(), "workflow step changed");
        }

        for (index, reply) in result.replies.iter().enumerate() {
            let rendered = texts::render(reply, self.catalog());
            let keyboard = rendered.keyboard.as_ref();
            if from_button && index == 0 {
                match self.messenger.edit_last_prompt(user_id, &rendered.text, keyboard) {
                    Ok(()) => continue,
                    Err(err) => debug!(user_id, error = %format!("{err:#}"), "prompt edit failed"),
                }
            }
            if let Err(err) = self.messenger.send_text(user_id, &rendered.text, keyboard) {
                warn!(user_id, error = %format!("{err:#}"), "reply delivery failed");
            }
        }

        if let Some(job) = result.job {
            self.run_job(user_id, job);
            self.sessions.clear(user_id);
        }
    }

    fn resolve_input(&self, user_id: UserId, kind: EventKind) -> Input {
        match kind {
            EventKind::Command(command) => Input::Command(command),
            EventKind::UnknownCommand(command) => Input::UnknownCommand(command),
            EventKind::Button(button) => Input::Button(button),
            EventKind::Text(text) => Input::Text(text),
            EventKind::Photo(photo) => {
                if !self.sessions.step(user_id).awaits_image() {
                    return Input::UnexpectedPhoto;
                }
                match self.load_photo(&photo) {
                    Ok(image) => Input::Image(image),
                    Err(err) => {
                        warn!(user_id, error = %format!("{err:#}"), "photo could not be read");
                        Input::UnreadablePhoto
                    }
                }
            }
        }
    }

    fn load_photo(&self, photo: &PhotoRef) -> Result<DynamicImage> {
        let bytes = self.messenger.download_photo(photo)?;
        image::load_from_memory(&bytes).context("photo is not a decodable image")
    }

    fn run_job(&self, user_id: UserId, job: Job) {
        match job {
            Job::TryOn {
                backend,
                garment_type,
                person,
                garment,
            } => {
                let payload = DispatchPayload::TryOn {
                    person,
                    garment,
                    garment_type,
                };
                let outcome = self.dispatcher.run(backend.as_deref(), &payload);
                let caption = texts::try_on_caption(&outcome);
                self.deliver(user_id, Operation::TryOn, &outcome, &caption);
            }
            Job::Generate { prompt } => {
                let sent_prompt = translate_prompt(self.translator.as_ref(), &prompt);
                if sent_prompt != prompt {
                    info!(user_id, "prompt translated before generation");
                }
                let payload = DispatchPayload::Generate {
                    prompt: sent_prompt.clone(),
                    width: GENERATION_SIZE,
                    height: GENERATION_SIZE,
                };
                let outcome = self.dispatcher.run(None, &payload);
                let caption = texts::generation_caption(&outcome, &prompt, &sent_prompt);
                self.deliver(user_id, Operation::GenerateImage, &outcome, &caption);
            }
        }
    }

    fn deliver(
        &self,
        user_id: UserId,
        operation: Operation,
        outcome: &DispatchOutcome,
        caption: &str,
    ) {
        let keyboard = texts::result_keyboard(operation);
        let delivered = match &outcome.image {
            Some(image) if outcome.succeeded() => {
                match self
                    .messenger
                    .send_image(user_id, image, Some(caption), Some(&keyboard))
                {
                    Ok(()) => return,
                    Err(err) => {
                        warn!(user_id, error = %format!("{err:#}"), "result delivery failed");
                        self.messenger.send_text(
                            user_id,
                            texts::delivery_failed_text(),
                            Some(&keyboard),
                        )
                    }
                }
            }
            _ => self
                .messenger
                .send_text(user_id, &texts::failure_text(outcome), Some(&keyboard)),
        };
        if let Err(err) = delivered {
            warn!(user_id, error = %format!("{err:#}"), "failure notice delivery failed");
        }
    }
}
