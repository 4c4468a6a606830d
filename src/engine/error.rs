use ulid::Ulid;

use crate::message::MessageError;
use crate::model::AppointmentStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The proposed span overlaps this existing, non-cancelled appointment.
    SlotTaken(Ulid),
    /// `from` is `None` when the status was rejected at creation.
    InvalidTransition {
        from: Option<AppointmentStatus>,
        to: AppointmentStatus,
    },
    Invalid(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotTaken(id) => write!(f, "slot taken by appointment {id}"),
            EngineError::InvalidTransition { from: None, to } => {
                write!(f, "appointments cannot be created as {}", to.as_str())
            }
            EngineError::InvalidTransition { from: Some(from), to } => {
                write!(f, "cannot move appointment from {} to {}", from.as_str(), to.as_str())
            }
            EngineError::Invalid(msg) => write!(f, "invalid: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<MessageError> for EngineError {
    fn from(e: MessageError) -> Self {
        match e {
            MessageError::MissingContact => EngineError::Invalid("client name and phone are required"),
        }
    }
}
