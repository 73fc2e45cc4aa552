//! Error types for the controller.

use thiserror::Error;

/// Result type for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors that can occur inside the controller and its collaborators.
///
/// None of these are fatal to a worker thread. They are logged through the
/// reporter and the enclosing loop resumes.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// A collaborator (catalog client, loader, persistence) reported a failure.
    #[error("{source_name}: {message}")]
    Collaborator {
        /// Name of the failing collaborator.
        source_name: String,
        /// Error message.
        message: String,
    },

    /// The operation observed the close flag and stopped early.
    #[error("operation cancelled")]
    Cancelled,

    /// A collaborator panicked; the panic was contained.
    #[error("panic in {0}")]
    Panicked(String),

    /// The publish context has exited and can no longer accept work.
    #[error("publish context closed")]
    ContextClosed,

    /// Settings store error.
    #[error("settings error: {0}")]
    Settings(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed journal or settings data.
    #[error("json error: {0}")]
    Json(String),
}

impl ControllerError {
    /// Creates a collaborator error.
    pub fn collaborator(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error is cooperative cancellation, which is
    /// absorbed silently instead of being logged.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ControllerError::Cancelled)
    }
}

impl From<serde_json::Error> for ControllerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_recognised() {
        assert!(ControllerError::Cancelled.is_cancelled());
        assert!(!ControllerError::ContextClosed.is_cancelled());
        assert!(!ControllerError::collaborator("catalog-a", "timeout").is_cancelled());
    }

    #[test]
    fn error_display() {
        let err = ControllerError::collaborator("catalog-a", "connection reset");
        assert_eq!(err.to_string(), "catalog-a: connection reset");

        let err = ControllerError::Panicked("history loader".into());
        assert_eq!(err.to_string(), "panic in history loader");
    }

    #[test]
    fn json_error_converts() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: ControllerError = parse.unwrap_err().into();
        assert!(matches!(err, ControllerError::Json(_)));
    }
}
