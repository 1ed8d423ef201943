//! Lifecycle fan-out: tell every other connected device that one came or went.

use crate::registry::Registry;
use link_types::{DeviceInfo, Envelope};

/// Result of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Recipients whose queue accepted the envelope.
    pub delivered: usize,
    /// Recipients that were closed or whose queue was full.
    pub failed: usize,
}

/// Send a lifecycle `event` about `device` to every other connected device.
///
/// This is fire-and-forget: each recipient gets the same pre-serialized
/// envelope, a failure for one recipient is logged and never affects the
/// others.
pub fn notify(registry: &Registry, device: &DeviceInfo, event: &str) -> Delivery {
    tracing::debug!(
        "{} notification for device: {:?}, name: {}",
        event,
        device.id,
        device.name
    );

    let text = match Envelope::lifecycle(event, device).and_then(|e| e.to_json()) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to serialize {} notification: {}", event, e);
            return Delivery::default();
        }
    };

    let mut delivery = Delivery::default();
    for (recipient, handle) in registry.recipients(&device.id) {
        if !handle.is_open() {
            delivery.failed += 1;
            continue;
        }
        match handle.send_text(text.clone()) {
            Ok(()) => {
                tracing::debug!("Sent {} notification to device: {:?}", event, recipient);
                delivery.delivered += 1;
            }
            Err(e) => {
                tracing::warn!(
                    "Error sending {} notification to device {:?}: {}",
                    event,
                    recipient,
                    e
                );
                delivery.failed += 1;
            }
        }
    }

    delivery
}
