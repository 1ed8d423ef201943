//! Error types for devlink-relay.

use link_types::{DeviceId, FileId};

/// Main error type for hub operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The device id already has a pending or connected entry.
    #[error("UUID already pending or registered.")]
    AlreadyRegistered {
        /// The duplicate device id.
        device_id: DeviceId,
    },

    /// Handshake token is unknown, already claimed or expired.
    #[error("Invalid or unregistered UUID. Must register first.")]
    UnknownToken {
        /// The raw token as presented.
        token: String,
    },

    /// Malformed input from a device or client.
    #[error("{0}")]
    Validation(String),

    /// Target device is not connected.
    #[error("Target '{target}' not found or offline.")]
    DeviceOffline {
        /// The target id as it appeared in the envelope.
        target: String,
    },

    /// No stored file under this id.
    #[error("file not found: {file_id}")]
    NotFound {
        /// The missing file id.
        file_id: FileId,
    },

    /// Uploaded file exceeds the size limit.
    #[error("File exceeds {} MB", .limit / (1024 * 1024))]
    FileTooLarge {
        /// Actual size of the file.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },

    /// Rate limit exceeded.
    #[error("{reason}")]
    RateLimited {
        /// Reason for rate limiting.
        reason: String,
    },

    /// Wire encoding error.
    #[error(transparent)]
    Wire(#[from] link_types::LinkError),
}

/// Result type alias for hub operations.
pub type HubResult<T> = std::result::Result<T, HubError>;
