//! Envelope - the routing unit exchanged over the duplex channel.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DeviceId, DeviceInfo, ErrorCode, ErrorPayload, FileOffer, LinkError};

/// Sentinel `targetId` used for lifecycle broadcasts from the hub.
pub const BROADCAST_TARGET: &str = "all";

/// Message types the hub produces itself.
///
/// Clients may use any other string; the hub only routes on `targetId`.
pub mod message_type {
    /// Error reported back to the sender of a message.
    pub const ERROR: &str = "error";
    /// A device completed its handshake.
    pub const DEVICE_CONNECTED: &str = "device_connected";
    /// A device left.
    pub const DEVICE_DISCONNECTED: &str = "device_disconnected";
    /// A file was uploaded for the target.
    pub const FILE_OFFER: &str = "file_offer";
}

/// Where an envelope is going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A single device.
    Device(DeviceId),
    /// Every connected device (hub-originated only).
    All,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Device(id) => write!(f, "{}", id),
            Target::All => f.write_str(BROADCAST_TARGET),
        }
    }
}

/// The envelope wraps every message with routing metadata.
///
/// `serialized_json` is opaque to the hub: it is never parsed, and relayed
/// envelopes are forwarded as the exact text the sender produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Target device id, or `"all"`.
    pub target_id: String,
    /// Free-form message type tag.
    pub message_type: String,
    /// Pre-serialized payload.
    pub serialized_json: String,
}

/// Lenient decoding shape: absent and `null` fields become validation errors
/// instead of parse errors.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(default)]
    target_id: Option<String>,
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    serialized_json: Option<String>,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(
        target: Target,
        message_type: impl Into<String>,
        serialized_json: impl Into<String>,
    ) -> Self {
        Self {
            target_id: target.to_string(),
            message_type: message_type.into(),
            serialized_json: serialized_json.into(),
        }
    }

    /// Build an `error` envelope addressed back to `sender`.
    pub fn error(
        sender: DeviceId,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Result<Self, LinkError> {
        let payload = ErrorPayload::new(code, message);
        let json = serde_json::to_string(&payload).map_err(LinkError::Serialization)?;
        Ok(Self::new(Target::Device(sender), message_type::ERROR, json))
    }

    /// Build a lifecycle broadcast carrying the subject's [`DeviceInfo`].
    pub fn lifecycle(event: &str, device: &DeviceInfo) -> Result<Self, LinkError> {
        let json = serde_json::to_string(device).map_err(LinkError::Serialization)?;
        Ok(Self::new(Target::All, event, json))
    }

    /// Build a `file_offer` envelope for `target`.
    pub fn file_offer(target: DeviceId, offer: &FileOffer) -> Result<Self, LinkError> {
        let json = serde_json::to_string(offer).map_err(LinkError::Serialization)?;
        Ok(Self::new(Target::Device(target), message_type::FILE_OFFER, json))
    }

    /// Parse and validate an envelope received from a device.
    ///
    /// All three fields must be present and not blank.
    pub fn parse(text: &str) -> Result<Self, LinkError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(LinkError::Deserialization)?;

        match (raw.target_id, raw.message_type, raw.serialized_json) {
            (Some(target_id), Some(message_type), Some(serialized_json))
                if !target_id.trim().is_empty()
                    && !message_type.trim().is_empty()
                    && !serialized_json.trim().is_empty() =>
            {
                Ok(Self {
                    target_id,
                    message_type,
                    serialized_json,
                })
            }
            _ => Err(LinkError::InvalidEnvelope),
        }
    }

    /// Resolve `target_id` into a [`Target`].
    pub fn target(&self) -> Result<Target, LinkError> {
        if self.target_id == BROADCAST_TARGET {
            return Ok(Target::All);
        }
        self.target_id
            .parse::<DeviceId>()
            .map(Target::Device)
            .map_err(|e| LinkError::InvalidTarget {
                target: self.target_id.clone(),
                reason: e.to_string(),
            })
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, LinkError> {
        serde_json::to_string(self).map_err(LinkError::Serialization)
    }
}
