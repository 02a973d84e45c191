use graffiti_contracts::backends::{BackendCatalog, Operation};
use graffiti_contracts::chat::{Button, Command};
use graffiti_contracts::session::{
    GarmentType, GenerationStep, Mode, Session, Step, TryOnStep,
};
use image::DynamicImage;

/// Inbound action after transport details (photo download and decode) are resolved.
#[derive(Debug, Clone)]
pub enum Input {
    Command(Command),
    UnknownCommand(String),
    Button(Button),
    Image(DynamicImage),
    /// Photo sent at a step that takes none; it was not downloaded.
    UnexpectedPhoto,
    /// Photo that could not be downloaded or decoded.
    UnreadablePhoto,
    Text(String),
}

impl Input {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Command(_) | Self::UnknownCommand(_) => "command",
            Self::Button(_) => "button",
            Self::Image(_) | Self::UnexpectedPhoto | Self::UnreadablePhoto => "photo",
            Self::Text(_) => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    MainMenu,
    Help,
    About,
    ChooseModel,
    ChooseGarmentType { backend: String },
    AskPerson {
        backend: String,
        garment_type: Option<GarmentType>,
    },
    AskGarment,
    AskPrompt,
    RemindStart,
    RemindPerson,
    RemindGarment,
    RemindPrompt,
    UnknownCommand(String),
    StaleButton,
    UnreadablePhoto,
    Busy,
    Processing { backend: String },
    Generating,
}

#[derive(Debug, Clone)]
pub enum Job {
    TryOn {
        backend: Option<String>,
        garment_type: GarmentType,
        person: DynamicImage,
        garment: DynamicImage,
    },
    Generate {
        prompt: String,
    },
}

#[derive(Debug, Clone)]
pub enum SessionChange {
    Clear,
    Start(Mode),
    Store(Session),
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub session: SessionChange,
    pub replies: Vec<Reply>,
    pub job: Option<Job>,
}

impl Transition {
    fn keep(session: Session, reply: Reply) -> Self {
        Self::store(session, reply)
    }

    fn store(session: Session, reply: Reply) -> Self {
        Self {
            session: SessionChange::Store(session),
            replies: vec![reply],
            job: None,
        }
    }

    fn clear(reply: Reply) -> Self {
        Self {
            session: SessionChange::Clear,
            replies: vec![reply],
            job: None,
        }
    }

    fn start(mode: Mode, reply: Reply) -> Self {
        Self {
            session: SessionChange::Start(mode),
            replies: vec![reply],
            job: None,
        }
    }
}

/// Next session, replies and optional job for one input.
///
/// Depends only on the session and the input; all effects are left to the caller.
pub fn transition(mut session: Session, input: Input, catalog: &BackendCatalog) -> Transition {
    match input {
        Input::Command(Command::Start) | Input::Button(Button::MainMenu) => {
            return Transition::clear(Reply::MainMenu)
        }
        Input::Command(Command::Help) | Input::Button(Button::Help) => {
            return Transition::keep(session, Reply::Help)
        }
        Input::Command(Command::About) | Input::Button(Button::About) => {
            return Transition::keep(session, Reply::About)
        }
        Input::UnknownCommand(command) => {
            return Transition::keep(session, Reply::UnknownCommand(command))
        }
        Input::Button(Button::Unknown(_)) => return Transition::keep(session, Reply::StaleButton),
        _ => {}
    }

    if matches!(
        session.step,
        Step::TryOn(TryOnStep::Processing) | Step::Generation(GenerationStep::Processing)
    ) {
        return Transition::keep(session, Reply::Busy);
    }

    match input {
        Input::Button(Button::StartTryOn) => {
            return Transition::start(Mode::VirtualTryOn, Reply::ChooseModel)
        }
        Input::Button(Button::StartImageGeneration) => {
            return Transition::start(Mode::ImageGeneration, Reply::AskPrompt)
        }
        _ => {}
    }

    match (session.step, input) {
        (Step::Idle, _) => Transition::clear(Reply::RemindStart),

        (Step::TryOn(_), Input::Button(Button::SelectModel(key))) => {
            let Some(backend) = catalog
                .get(&key)
                .filter(|backend| backend.operation == Operation::TryOn)
            else {
                return Transition::keep(session, Reply::StaleButton);
            };
            session.selected_model = Some(backend.key.clone());
            session.garment_type = GarmentType::default();
            session.person_image = None;
            session.garment_image = None;
            let reply = if backend.requires_garment_type {
                session.step = Step::TryOn(TryOnStep::SelectGarmentType);
                Reply::ChooseGarmentType {
                    backend: backend.key.clone(),
                }
            } else {
                session.step = Step::TryOn(TryOnStep::UploadPerson);
                Reply::AskPerson {
                    backend: backend.key.clone(),
                    garment_type: None,
                }
            };
            Transition::store(session, reply)
        }
        (
            Step::TryOn(TryOnStep::SelectGarmentType),
            Input::Button(Button::GarmentType(garment_type)),
        ) => {
            session.garment_type = garment_type;
            session.step = Step::TryOn(TryOnStep::UploadPerson);
            let backend = session.selected_model.clone().unwrap_or_default();
            Transition::store(
                session,
                Reply::AskPerson {
                    backend,
                    garment_type: Some(garment_type),
                },
            )
        }
        (_, Input::Button(_)) => Transition::keep(session, Reply::StaleButton),

        (_, Input::UnreadablePhoto) if session.awaits_image() => {
            Transition::keep(session, Reply::UnreadablePhoto)
        }

        (Step::TryOn(TryOnStep::SelectModel), _) => Transition::keep(session, Reply::ChooseModel),
        (Step::TryOn(TryOnStep::SelectGarmentType), _) => {
            let backend = session.selected_model.clone().unwrap_or_default();
            Transition::keep(session, Reply::ChooseGarmentType { backend })
        }

        (Step::TryOn(TryOnStep::UploadPerson), Input::Image(image)) => {
            session.person_image = Some(image);
            session.step = Step::TryOn(TryOnStep::UploadGarment);
            Transition::store(session, Reply::AskGarment)
        }
        (Step::TryOn(TryOnStep::UploadPerson), _) => {
            Transition::keep(session, Reply::RemindPerson)
        }

        (Step::TryOn(TryOnStep::UploadGarment), Input::Image(garment)) => {
            let Some(person) = session.person_image.take() else {
                session.step = Step::TryOn(TryOnStep::UploadPerson);
                return Transition::store(session, Reply::RemindPerson);
            };
            session.step = Step::TryOn(TryOnStep::Processing);
            let backend = session.selected_model.clone();
            let job = Job::TryOn {
                backend: backend.clone(),
                garment_type: session.garment_type,
                person,
                garment,
            };
            Transition {
                session: SessionChange::Store(session),
                replies: vec![Reply::Processing {
                    backend: backend.unwrap_or_default(),
                }],
                job: Some(job),
            }
        }
        (Step::TryOn(TryOnStep::UploadGarment), _) => {
            Transition::keep(session, Reply::RemindGarment)
        }

        (Step::Generation(GenerationStep::WaitingPrompt), Input::Text(text)) => {
            let prompt = text.trim();
            if prompt.is_empty() {
                return Transition::keep(session, Reply::RemindPrompt);
            }
            let job = Job::Generate {
                prompt: prompt.to_string(),
            };
            session.step = Step::Generation(GenerationStep::Processing);
            Transition {
                session: SessionChange::Store(session),
                replies: vec![Reply::Generating],
                job: Some(job),
            }
        }
        (Step::Generation(GenerationStep::WaitingPrompt), _) => {
            Transition::keep(session, Reply::RemindPrompt)
        }

        (Step::TryOn(TryOnStep::Processing), _)
        | (Step::Generation(GenerationStep::Processing), _) => {
            Transition::keep(session, Reply::Busy)
        }
    }
}

#[cfg(test)]
mod tests {
    use graffiti_contracts::backends::BackendCatalog;
    use graffiti_contracts::chat::{Button, Command};
    use graffiti_contracts::session::{
        GarmentType, GenerationStep, Mode, Session, Step, TryOnStep,
    };
    use image::{DynamicImage, RgbImage};

    use super::{transition, Input, Job, Reply, SessionChange, Transition};

    fn catalog() -> BackendCatalog {
        BackendCatalog::builtin().expect("builtin catalog")
    }

    fn image(side: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(side, side))
    }

    fn at(step: Step) -> Session {
        Session {
            step,
            ..Session::default()
        }
    }

    fn stored(result: &Transition) -> &Session {
        match &result.session {
            SessionChange::Store(session) => session,
            other => panic!("expected stored session, got {other:?}"),
        }
    }

    #[test]
    fn main_menu_resets_from_any_step() {
        let mut session = at(Step::TryOn(TryOnStep::UploadGarment));
        session.person_image = Some(image(2));
        let result = transition(session, Input::Button(Button::MainMenu), &catalog());
        assert!(matches!(result.session, SessionChange::Clear));
        assert_eq!(result.replies, vec![Reply::MainMenu]);

        let result = transition(
            at(Step::Generation(GenerationStep::Processing)),
            Input::Command(Command::Start),
            &catalog(),
        );
        assert!(matches!(result.session, SessionChange::Clear));
    }

    #[test]
    fn idle_session_resets_on_workflow_input() {
        for input in [
            Input::Text("hello".to_string()),
            Input::UnexpectedPhoto,
            Input::Button(Button::SelectModel("g1_fast".to_string())),
        ] {
            let result = transition(Session::default(), input, &catalog());
            assert!(matches!(result.session, SessionChange::Clear));
            assert_eq!(result.replies, vec![Reply::RemindStart]);
            assert!(result.job.is_none());
        }
    }

    #[test]
    fn start_buttons_open_workflows() {
        let result = transition(Session::default(), Input::Button(Button::StartTryOn), &catalog());
        assert!(matches!(result.session, SessionChange::Start(Mode::VirtualTryOn)));
        assert_eq!(result.replies, vec![Reply::ChooseModel]);

        let result = transition(
            at(Step::TryOn(TryOnStep::UploadPerson)),
            Input::Button(Button::StartImageGeneration),
            &catalog(),
        );
        assert!(matches!(result.session, SessionChange::Start(Mode::ImageGeneration)));
        assert_eq!(result.replies, vec![Reply::AskPrompt]);
    }

    #[test]
    fn model_without_garment_type_goes_to_person_upload() {
        let result = transition(
            at(Step::TryOn(TryOnStep::SelectModel)),
            Input::Button(Button::SelectModel("g1_fast".to_string())),
            &catalog(),
        );
        let session = stored(&result);
        assert_eq!(session.step, Step::TryOn(TryOnStep::UploadPerson));
        assert_eq!(session.selected_model.as_deref(), Some("g1_fast"));
        assert_eq!(
            result.replies,
            vec![Reply::AskPerson {
                backend: "g1_fast".to_string(),
                garment_type: None
            }]
        );
    }

    #[test]
    fn model_with_garment_type_asks_for_it() {
        let result = transition(
            at(Step::TryOn(TryOnStep::SelectModel)),
            Input::Button(Button::SelectModel("g1_pro".to_string())),
            &catalog(),
        );
        assert_eq!(stored(&result).step, Step::TryOn(TryOnStep::SelectGarmentType));

        let result = transition(
            stored(&result).clone(),
            Input::Button(Button::GarmentType(GarmentType::LowerBody)),
            &catalog(),
        );
        let session = stored(&result);
        assert_eq!(session.step, Step::TryOn(TryOnStep::UploadPerson));
        assert_eq!(session.garment_type, GarmentType::LowerBody);
    }

    #[test]
    fn unknown_or_foreign_model_is_stale() {
        for key in ["g9", "g1_image"] {
            let result = transition(
                at(Step::TryOn(TryOnStep::SelectModel)),
                Input::Button(Button::SelectModel(key.to_string())),
                &catalog(),
            );
            assert_eq!(stored(&result).step, Step::TryOn(TryOnStep::SelectModel));
            assert_eq!(result.replies, vec![Reply::StaleButton]);
        }
    }

    #[test]
    fn text_during_person_upload_only_reminds() {
        let mut session = at(Step::TryOn(TryOnStep::UploadPerson));
        session.selected_model = Some("g1_fast".to_string());
        let result = transition(session, Input::Text("here you go".to_string()), &catalog());
        assert_eq!(stored(&result).step, Step::TryOn(TryOnStep::UploadPerson));
        assert_eq!(result.replies, vec![Reply::RemindPerson]);
        assert!(result.job.is_none());
    }

    #[test]
    fn second_image_produces_try_on_job() {
        let mut session = at(Step::TryOn(TryOnStep::UploadPerson));
        session.selected_model = Some("g1_pro".to_string());
        session.garment_type = GarmentType::Dresses;

        let result = transition(session, Input::Image(image(3)), &catalog());
        assert_eq!(result.replies, vec![Reply::AskGarment]);
        let result = transition(stored(&result).clone(), Input::Image(image(5)), &catalog());

        assert_eq!(stored(&result).step, Step::TryOn(TryOnStep::Processing));
        match result.job {
            Some(Job::TryOn {
                backend,
                garment_type,
                person,
                garment,
            }) => {
                assert_eq!(backend.as_deref(), Some("g1_pro"));
                assert_eq!(garment_type, GarmentType::Dresses);
                assert_eq!(person.width(), 3);
                assert_eq!(garment.width(), 5);
            }
            other => panic!("expected try-on job, got {other:?}"),
        }
    }

    #[test]
    fn unreadable_photo_keeps_step() {
        let result = transition(
            at(Step::TryOn(TryOnStep::UploadGarment)),
            Input::UnreadablePhoto,
            &catalog(),
        );
        assert_eq!(stored(&result).step, Step::TryOn(TryOnStep::UploadGarment));
        assert_eq!(result.replies, vec![Reply::UnreadablePhoto]);
    }

    #[test]
    fn prompt_produces_generation_job() {
        let result = transition(
            at(Step::Generation(GenerationStep::WaitingPrompt)),
            Input::Text("  a lighthouse at dusk ".to_string()),
            &catalog(),
        );
        assert!(matches!(
            result.job,
            Some(Job::Generate { ref prompt }) if prompt == "a lighthouse at dusk"
        ));
        assert_eq!(result.replies, vec![Reply::Generating]);

        let result = transition(
            at(Step::Generation(GenerationStep::WaitingPrompt)),
            Input::UnexpectedPhoto,
            &catalog(),
        );
        assert_eq!(result.replies, vec![Reply::RemindPrompt]);
        assert!(result.job.is_none());
    }

    #[test]
    fn processing_step_answers_busy() {
        let result = transition(
            at(Step::TryOn(TryOnStep::Processing)),
            Input::Button(Button::StartTryOn),
            &catalog(),
        );
        assert_eq!(result.replies, vec![Reply::Busy]);
        assert!(result.job.is_none());
    }

    #[test]
    fn outcome_ignores_pending_images_and_model() {
        let steps = [
            Step::TryOn(TryOnStep::SelectModel),
            Step::TryOn(TryOnStep::SelectGarmentType),
            Step::TryOn(TryOnStep::UploadPerson),
            Step::TryOn(TryOnStep::UploadGarment),
            Step::Generation(GenerationStep::WaitingPrompt),
        ];
        for step in steps {
            let plain = transition(at(step), Input::Text("x".to_string()), &catalog());
            let mut loaded = at(step);
            loaded.person_image = Some(image(2));
            loaded.selected_model = Some("g1_pro".to_string());
            let busy = transition(loaded, Input::Text("x".to_string()), &catalog());

            let next = |result: &Transition| match &result.session {
                SessionChange::Store(session) => Some(session.step),
                _ => None,
            };
            assert_eq!(next(&plain), next(&busy), "step {}", step.label());
            assert_eq!(plain.job.is_some(), busy.job.is_some());
        }
    }
}
