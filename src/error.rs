use thiserror::Error;

/// Errors surfaced by the task store and the timer session.
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Cannot {command} while {state}")]
    InvalidTransition {
        state: &'static str,
        command: &'static str,
    },

    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Session journal error: {0}")]
    Journal(String),
}

impl TimerError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

pub type TimerResult<T> = Result<T, TimerError>;
