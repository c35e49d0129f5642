//! Error type for the shared data model.

use thiserror::Error;

/// Result type for `aios-types` operations.
pub type Result<T> = std::result::Result<T, TypesError>;

/// Errors raised while constructing or canonicalizing core data-model values.
#[derive(Error, Debug)]
pub enum TypesError {
    /// A payload could not be canonicalized for hashing (non-UTF-8 bytes,
    /// unsupported JSON shape).
    #[error("failed to canonicalize payload: {0}")]
    Canonicalize(String),

    /// Serialization/deserialization of a core type failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A field required by an invariant was missing or malformed.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}
