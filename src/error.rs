//! Error taxonomy for swap and rating operations
//!
//! Every variant except [`CoreError::Storage`] is locally recoverable: the
//! caller can retry, re-fetch, or surface a specific message. Storage errors
//! carry the driver error unmodified.

use serde::Serialize;
use uuid::Uuid;

use crate::swap::{SwapAction, SwapStatus};

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Coarse error class, stable for callers that map errors to responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Validation,
    NotEligible,
    NotParticipant,
    Forbidden,
    WrongReviewee,
    DuplicateRating,
    Conflict,
    NotFound,
    Storage,
}

/// Business-rule violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Ineligibility {
    #[error("receiver {0} does not exist")]
    ReceiverNotFound(String),

    #[error("receiver {0} is banned")]
    ReceiverBanned(String),

    #[error("receiver {0} is not active")]
    ReceiverInactive(String),

    #[error("cannot request a swap with yourself")]
    SelfSwap,

    #[error("receiver does not offer skill '{0}'")]
    SkillNotOffered(String),

    #[error("requester does not offer skill '{0}'")]
    OfferedSkillNotHeld(String),

    #[error("a pending swap ({0}) already exists between these users")]
    DuplicatePending(Uuid),

    #[error("cannot {action} a swap that is {status}")]
    InvalidTransition {
        action: SwapAction,
        status: SwapStatus,
    },

    #[error("swap {0} is not completed")]
    SwapNotCompleted(Uuid),

    #[error("the edit window for rating {0} has closed")]
    EditWindowClosed(Uuid),
}

impl Ineligibility {
    /// The request field a caller should highlight, if any
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Ineligibility::ReceiverNotFound(_)
            | Ineligibility::ReceiverBanned(_)
            | Ineligibility::ReceiverInactive(_)
            | Ineligibility::SelfSwap => Some("receiver"),
            Ineligibility::SkillNotOffered(_) => Some("requested_skill"),
            Ineligibility::OfferedSkillNotHeld(_) => Some("offered_skill"),
            Ineligibility::DuplicatePending(_) => Some("receiver"),
            Ineligibility::InvalidTransition { .. } => Some("action"),
            Ineligibility::SwapNotCompleted(_) => Some("swap_id"),
            Ineligibility::EditWindowClosed(_) => Some("rating_id"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("not eligible: {0}")]
    NotEligible(Ineligibility),

    #[error("user {user_id} is not a participant of swap {swap_id}")]
    NotParticipant { user_id: String, swap_id: Uuid },

    #[error("user {user_id} may not {action}")]
    Forbidden { user_id: String, action: String },

    #[error("reviewee must be {expected}, got {actual}")]
    WrongReviewee { expected: String, actual: String },

    #[error("user {reviewer} has already rated swap {swap_id}")]
    DuplicateRating { swap_id: Uuid, reviewer: String },

    #[error("{entity} {id} was modified concurrently (expected {expected}, found {found})")]
    Conflict {
        entity: &'static str,
        id: Uuid,
        expected: String,
        found: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("storage unavailable: {0}")]
    Storage(#[from] sqlx::Error),
}

impl CoreError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn forbidden(user_id: &str, action: impl Into<String>) -> Self {
        CoreError::Forbidden {
            user_id: user_id.to_string(),
            action: action.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation { .. } => ErrorKind::Validation,
            CoreError::NotEligible(_) => ErrorKind::NotEligible,
            CoreError::NotParticipant { .. } => ErrorKind::NotParticipant,
            CoreError::Forbidden { .. } => ErrorKind::Forbidden,
            CoreError::WrongReviewee { .. } => ErrorKind::WrongReviewee,
            CoreError::DuplicateRating { .. } => ErrorKind::DuplicateRating,
            CoreError::Conflict { .. } => ErrorKind::Conflict,
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// The offending input field, when the error points at one
    pub fn field(&self) -> Option<&'static str> {
        match self {
            CoreError::Validation { field, .. } => Some(*field),
            CoreError::NotEligible(reason) => reason.field(),
            CoreError::NotParticipant { .. } | CoreError::Forbidden { .. } => Some("actor"),
            CoreError::WrongReviewee { .. } => Some("reviewee"),
            CoreError::DuplicateRating { .. } => Some("swap_id"),
            CoreError::Conflict { .. } => Some("status"),
            CoreError::NotFound { .. } | CoreError::Storage(_) => None,
        }
    }

    /// Only storage failures are fatal
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CoreError::Storage(_))
    }
}

impl From<Ineligibility> for CoreError {
    fn from(reason: Ineligibility) -> Self {
        CoreError::NotEligible(reason)
    }
}
