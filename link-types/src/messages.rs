//! Payload types the hub produces or consumes.
//!
//! These are the structures that end up inside an [`Envelope`]'s
//! `serializedJson` field, plus the [`DeviceInfo`] a device registers with.
//!
//! [`Envelope`]: crate::Envelope

use serde::{Deserialize, Serialize};

use crate::{DeviceId, FileId};

/// What a device announces about itself when it registers.
///
/// Immutable once created; broadcast verbatim in lifecycle events and
/// returned by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Device identifier (also the handshake token).
    pub id: DeviceId,
    /// Human-readable device name
    #[serde(default)]
    pub name: String,
    /// Opaque client metadata, passed through untouched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl DeviceInfo {
    /// Create a DeviceInfo without metadata.
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Error codes carried in an `error` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The message could not be parsed, validated or handled.
    ProcessingError,
    /// The target device is not connected.
    DeviceOffline,
}

/// Payload of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Machine-readable code.
    pub error_code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorPayload {
    /// Create a new error payload.
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
        }
    }
}

/// Lightweight notice that a file is waiting for the target to download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOffer {
    /// Id to download the file with.
    pub file_id: FileId,
    /// Original file name.
    pub file_name: String,
    /// Size in bytes.
    pub length: u64,
    /// Device that uploaded the file.
    pub sender_id: DeviceId,
}
