//! Error taxonomy for the trip lifecycle core

/// Machine-readable error class surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    StateConflict,
    Fatal,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::NotFound => "not_found",
            Self::StateConflict => "state_conflict",
            Self::Fatal => "fatal",
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("Coordinates out of range: lat {lat}, lng {lng}")]
    InvalidCoordinates { lat: f64, lng: f64 },
    #[error("startAt is not an RFC 3339 timestamp: {0}")]
    InvalidStartTime(String),
    #[error("startAt must be in the future")]
    StartNotInFuture,
    #[error("totalDurationMinutes must be between 1 and {max}, got {got}")]
    InvalidDuration { got: u32, max: u32 },
    #[error("Price must be greater than zero")]
    InvalidPrice,
    #[error("Unknown end reason: {0}")]
    InvalidEndReason(String),
}

#[derive(thiserror::Error, Debug)]
pub enum TripError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("State conflict: {0}")]
    StateConflict(String),
    #[error("Trip store failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Corrupt trip record: {0}")]
    Codec(String),
    #[error("Call transport failure: {0}")]
    Transport(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl TripError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::StateConflict(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::StateConflict(_) => ErrorKind::StateConflict,
            Self::Storage(_) | Self::Codec(_) | Self::Transport(_) | Self::Internal(_) => {
                ErrorKind::Fatal
            }
        }
    }

    /// Message safe to hand back to a client. Infrastructure failures are
    /// reduced to a generic text.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Fatal => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}
