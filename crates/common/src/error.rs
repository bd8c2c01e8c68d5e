//! Error types shared across Findr crates.

/// Top-level error type for Findr operations.
#[derive(Debug, thiserror::Error)]
pub enum FindrError {
    /// Bad or missing pipeline/capability configuration. Raised before any
    /// resource is allocated.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Another session holds the admission token.
    #[error("System is busy with an active session ({active})")]
    AdmissionRejected { active: String },

    /// A capability operation was invoked outside its valid lifecycle state.
    #[error("Illegal state: cannot {operation} capability '{capability}' while {state}")]
    IllegalState {
        capability: String,
        state: String,
        operation: String,
    },

    /// Frame acquisition could not start or ended abnormally.
    #[error("Source error: {message}")]
    Source { message: String },

    /// A capability failed while processing a live frame.
    #[error("Inference error in '{capability}': {message}")]
    Inference { capability: String, message: String },

    /// A capability wrote a key its manifest does not declare.
    #[error("Capability '{capability}' produced undeclared key '{key}'")]
    UndeclaredOutput { capability: String, key: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Pipeline not initialized for session {id}")]
    PipelineNotInitialized { id: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using FindrError.
pub type FindrResult<T> = Result<T, FindrError>;

/// Coarse classification used by the transport layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    NotFound,
    Conflict,
    Internal,
}

impl FindrError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn admission_rejected(active: impl Into<String>) -> Self {
        Self::AdmissionRejected {
            active: active.into(),
        }
    }

    pub fn illegal_state(
        capability: impl Into<String>,
        state: impl std::fmt::Display,
        operation: impl Into<String>,
    ) -> Self {
        Self::IllegalState {
            capability: capability.into(),
            state: state.to_string(),
            operation: operation.into(),
        }
    }

    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source {
            message: msg.into(),
        }
    }

    pub fn inference(capability: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Inference {
            capability: capability.into(),
            message: msg.into(),
        }
    }

    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound { id: id.into() }
    }

    /// Which status family this error maps to at the transport boundary.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration { .. } | Self::PipelineNotInitialized { .. } | Self::Json(_) => {
                ErrorClass::BadRequest
            }
            Self::SessionNotFound { .. } => ErrorClass::NotFound,
            Self::AdmissionRejected { .. } => ErrorClass::Conflict,
            Self::IllegalState { .. }
            | Self::Source { .. }
            | Self::Inference { .. }
            | Self::UndeclaredOutput { .. }
            | Self::Io(_)
            | Self::Image(_)
            | Self::Other(_) => ErrorClass::Internal,
        }
    }

    /// Whether the caller can retry without any session or resources having
    /// been committed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::AdmissionRejected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            FindrError::configuration("missing key").class(),
            ErrorClass::BadRequest
        );
        assert_eq!(
            FindrError::admission_rejected("abc").class(),
            ErrorClass::Conflict
        );
        assert_eq!(
            FindrError::session_not_found("abc").class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            FindrError::inference("detection", "boom").class(),
            ErrorClass::Internal
        );
        assert_eq!(FindrError::source("eof").class(), ErrorClass::Internal);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(FindrError::configuration("x").is_recoverable());
        assert!(FindrError::admission_rejected("x").is_recoverable());
        assert!(!FindrError::source("x").is_recoverable());
        assert!(!FindrError::inference("x", "y").is_recoverable());
    }

    #[test]
    fn test_messages_preserve_origin() {
        let err = FindrError::inference("pose_estimation", "tensor shape mismatch");
        assert_eq!(
            err.to_string(),
            "Inference error in 'pose_estimation': tensor shape mismatch"
        );

        let err = FindrError::illegal_state("captioning", "unloaded", "process");
        assert!(err.to_string().contains("cannot process"));
    }
}
