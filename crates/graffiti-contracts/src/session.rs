use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::DynamicImage;

pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    None,
    VirtualTryOn,
    ImageGeneration,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::VirtualTryOn => "virtual_tryon",
            Self::ImageGeneration => "image_generation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryOnStep {
    SelectModel,
    SelectGarmentType,
    UploadPerson,
    UploadGarment,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStep {
    WaitingPrompt,
    Processing,
}

/// Workflow position. The owning mode is encoded in the variant, so a step can
/// never be read against the wrong workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
    #[default]
    Idle,
    TryOn(TryOnStep),
    Generation(GenerationStep),
}

impl Step {
    pub fn initial(mode: Mode) -> Self {
        match mode {
            Mode::None => Self::Idle,
            Mode::VirtualTryOn => Self::TryOn(TryOnStep::SelectModel),
            Mode::ImageGeneration => Self::Generation(GenerationStep::WaitingPrompt),
        }
    }

    pub fn mode(self) -> Mode {
        match self {
            Self::Idle => Mode::None,
            Self::TryOn(_) => Mode::VirtualTryOn,
            Self::Generation(_) => Mode::ImageGeneration,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::TryOn(TryOnStep::SelectModel) => "select_model",
            Self::TryOn(TryOnStep::SelectGarmentType) => "select_garment_type",
            Self::TryOn(TryOnStep::UploadPerson) => "upload_person",
            Self::TryOn(TryOnStep::UploadGarment) => "upload_garment",
            Self::TryOn(TryOnStep::Processing) => "processing",
            Self::Generation(GenerationStep::WaitingPrompt) => "waiting_prompt",
            Self::Generation(GenerationStep::Processing) => "generating",
        }
    }

    pub fn awaits_image(self) -> bool {
        matches!(
            self,
            Self::TryOn(TryOnStep::UploadPerson) | Self::TryOn(TryOnStep::UploadGarment)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GarmentType {
    #[default]
    UpperBody,
    LowerBody,
    Dresses,
}

impl GarmentType {
    pub const ALL: [GarmentType; 3] = [Self::UpperBody, Self::LowerBody, Self::Dresses];

    /// Value sent to try-on backends.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpperBody => "upper_body",
            Self::LowerBody => "lower_body",
            Self::Dresses => "dresses",
        }
    }

    /// Short token used in button payloads.
    pub fn token(self) -> &'static str {
        match self {
            Self::UpperBody => "upper",
            Self::LowerBody => "lower",
            Self::Dresses => "dress",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::UpperBody => "Upper body",
            Self::LowerBody => "Lower body",
            Self::Dresses => "Dresses",
        }
    }

    pub fn from_token(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.token() == normalized || kind.as_str() == normalized)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub step: Step,
    pub selected_model: Option<String>,
    pub garment_type: GarmentType,
    pub person_image: Option<DynamicImage>,
    pub garment_image: Option<DynamicImage>,
}

impl Session {
    pub fn started(mode: Mode) -> Self {
        Self {
            step: Step::initial(mode),
            ..Self::default()
        }
    }

    pub fn mode(&self) -> Mode {
        self.step.mode()
    }

    pub fn is_empty(&self) -> bool {
        self.step == Step::Idle
            && self.selected_model.is_none()
            && self.garment_type == GarmentType::default()
            && self.person_image.is_none()
            && self.garment_image.is_none()
    }

    pub fn awaits_image(&self) -> bool {
        self.step.awaits_image()
    }
}

/// Process-wide per-user session map.
///
/// Every operation is last-writer-wins. Callers guarantee that at most one event
/// per user is in flight, so no per-key versioning is kept.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<UserId, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, user_id: UserId, mode: Mode) {
        self.lock().insert(user_id, Session::started(mode));
    }

    pub fn get(&self, user_id: UserId) -> Session {
        self.lock().get(&user_id).cloned().unwrap_or_default()
    }

    pub fn update(&self, user_id: UserId, apply: impl FnOnce(&mut Session)) {
        let mut sessions = self.lock();
        apply(sessions.entry(user_id).or_default());
    }

    /// Removes the session and hands it to the caller.
    pub fn take(&self, user_id: UserId) -> Session {
        self.lock().remove(&user_id).unwrap_or_default()
    }

    pub fn clear(&self, user_id: UserId) {
        self.lock().remove(&user_id);
    }

    pub fn is_in_mode(&self, user_id: UserId, mode: Mode) -> bool {
        self.lock()
            .get(&user_id)
            .map(|session| session.mode() == mode)
            .unwrap_or(false)
    }

    /// Current step without cloning pending images.
    pub fn step(&self, user_id: UserId) -> Step {
        self.lock()
            .get(&user_id)
            .map(|session| session.step)
            .unwrap_or_default()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.lock().contains_key(&user_id)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, Session>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
