use crate::session::{GarmentType, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    About,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Button {
    MainMenu,
    Help,
    About,
    StartTryOn,
    StartImageGeneration,
    SelectModel(String),
    GarmentType(GarmentType),
    Unknown(String),
}

/// Transport reference to an uploaded photo, resolved lazily by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRef(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Command(Command),
    UnknownCommand(String),
    Button(Button),
    Photo(PhotoRef),
    Text(String),
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Command(_) | Self::UnknownCommand(_) => "command",
            Self::Button(_) => "button",
            Self::Photo(_) => "photo",
            Self::Text(_) => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub user_id: UserId,
    pub kind: EventKind,
}

impl InboundEvent {
    pub fn new(user_id: UserId, kind: EventKind) -> Self {
        Self { user_id, kind }
    }
}
