//! Error type for every binding operation

use crate::ffi::loader::LoadError;
use crate::ffi::types::ErrorKind;
use thiserror::Error;

/// Errors surfaced by the binding
///
/// Every variant is terminal for the invocation that produced it; no
/// foreign handle or buffer outlives the error.
#[derive(Error, Debug)]
pub enum StanError {
    /// A configuration precondition failed before any foreign call
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// The model reports no free parameters
    #[error("Model has no parameters.")]
    NoParameters,

    /// A configuration slot the binding accepts but does not implement
    #[error("unsupported option: {0}")]
    Unsupported(&'static str),

    /// Error object returned across the boundary
    #[error("Exception from Stan:\n{message}")]
    Foreign { kind: ErrorKind, message: String },

    #[error("failed to allocate {bytes} bytes of foreign memory")]
    Allocation { bytes: usize },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("text passed to Stan contains an interior nul byte at offset {0}")]
    InteriorNul(usize),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl StanError {
    /// Message reported by the foreign side, if this is a foreign error
    pub fn foreign_message(&self) -> Option<&str> {
        match self {
            StanError::Foreign { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StanError::Validation(_))
    }
}

/// Result type for binding operations
pub type StanResult<T> = Result<T, StanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_error_display() {
        let err = StanError::Foreign {
            kind: ErrorKind::Config,
            message: "bad data".to_string(),
        };
        assert_eq!(err.to_string(), "Exception from Stan:\nbad data");
        assert_eq!(err.foreign_message(), Some("bad data"));
    }

    #[test]
    fn test_validation_error_display() {
        let err = StanError::Validation("num_chains must be at least 1".to_string());
        assert!(err.is_validation());
        assert!(err.to_string().contains("num_chains"));
    }
}
