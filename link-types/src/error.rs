//! Error types for devlink wire types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding devlink messages.
#[derive(Debug, Error)]
pub enum LinkError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Envelope is missing a required field, or one is blank
    #[error("Invalid message format. Must include targetId, serializedJson, and messageType.")]
    InvalidEnvelope,

    /// Target id is neither a device UUID nor the broadcast sentinel
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget {
        /// The offending target id.
        target: String,
        /// Why it could not be parsed.
        reason: String,
    },
}
