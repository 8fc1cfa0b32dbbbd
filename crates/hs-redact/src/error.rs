//! Error types for the redaction engine.

use thiserror::Error;

/// Result type for redaction operations.
pub type Result<T> = std::result::Result<T, RedactionError>;

/// Errors that can occur while configuring or applying redaction.
#[derive(Error, Debug)]
pub enum RedactionError {
    /// Invalid rule set, hash algorithm or trim length. Raised before any
    /// record is processed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to compile a rule's regex pattern.
    #[error("pattern error in rule '{rule}': {message}")]
    Pattern { rule: String, message: String },

    /// Failed to load or generate the hashing key.
    #[error("key error: {0}")]
    Key(String),

    /// I/O error during key or rules file operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error in a rules or key file.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A classified span could not be replaced by its token.
    /// The message never carries the value being redacted.
    #[error("redaction invariant violated in field '{field}' (details redacted for safety)")]
    InvariantViolation { field: String },
}

impl RedactionError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        RedactionError::Config(message.into())
    }

    /// Fail-closed error for a field that could not be redacted.
    pub fn invariant(field: &str) -> Self {
        RedactionError::InvariantViolation {
            field: field.to_string(),
        }
    }

    /// Whether this error belongs to the pre-run configuration class.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RedactionError::Config(_)
                | RedactionError::Pattern { .. }
                | RedactionError::Key(_)
                | RedactionError::Json(_)
        )
    }
}
