//! Relay routing for messages received from a connected device.

use crate::error::{HubError, HubResult};
use crate::hub::Hub;
use crate::peer::{PeerHandle, SendError};
use link_types::{DeviceId, Envelope, ErrorCode, LinkError, Target};
use std::sync::atomic::Ordering;

/// Route one text message from `sender`.
///
/// On success the original text is queued, unmodified, for the target.
/// Any failure is reported back to the sender as an `error` envelope over
/// `reply`; nothing here ends the sender's session.
pub fn handle_text(hub: &Hub, sender: &DeviceId, reply: &PeerHandle, text: &str) {
    tracing::debug!("Received message from {:?}: {} bytes", sender, text.len());

    match route(hub, sender, text) {
        Ok(target) => {
            tracing::debug!("Message successfully relayed to {:?}", target);
        }
        Err(err) => {
            match &err {
                HubError::DeviceOffline { target } => {
                    tracing::warn!("Target device {} not found or offline", target)
                }
                other => tracing::warn!("Error processing message from {:?}: {}", sender, other),
            }
            report(hub, sender, reply, &err);
        }
    }
}

/// Forward `text` to the device named in its envelope.
fn route(hub: &Hub, sender: &DeviceId, text: &str) -> HubResult<DeviceId> {
    if let Err(e) = hub.rate_limits().check_message(sender) {
        hub.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        return Err(HubError::RateLimited {
            reason: e.to_string(),
        });
    }

    let envelope = Envelope::parse(text)?;
    let target = match envelope.target()? {
        Target::Device(id) => id,
        Target::All => {
            return Err(LinkError::InvalidTarget {
                target: envelope.target_id,
                reason: "reserved for hub broadcasts".into(),
            }
            .into())
        }
    };

    tracing::debug!(
        "Message relay request from {:?} to {:?} of type {}",
        sender,
        target,
        envelope.message_type
    );

    let offline = || HubError::DeviceOffline {
        target: envelope.target_id.clone(),
    };

    let handle = hub
        .registry()
        .lookup(&target)
        .map(|device| device.handle)
        .filter(PeerHandle::is_open)
        .ok_or_else(offline)?;

    match handle.send_text(text) {
        Ok(()) => {
            hub.metrics().messages_relayed.fetch_add(1, Ordering::Relaxed);
            Ok(target)
        }
        Err(SendError::Full) => {
            tracing::warn!("Outbound queue full for {:?}, message dropped", target);
            hub.metrics().sends_dropped.fetch_add(1, Ordering::Relaxed);
            Ok(target)
        }
        Err(SendError::Closed) => Err(offline()),
    }
}

/// Error envelope describing `err`, addressed back to `sender`.
pub fn error_envelope(sender: &DeviceId, err: &HubError) -> Result<Envelope, LinkError> {
    let code = match err {
        HubError::DeviceOffline { .. } => ErrorCode::DeviceOffline,
        _ => ErrorCode::ProcessingError,
    };
    Envelope::error(*sender, code, err.to_string())
}

/// Send `err` back to `sender` as an `error` envelope.
pub fn report(hub: &Hub, sender: &DeviceId, reply: &PeerHandle, err: &HubError) {
    let text = match error_envelope(sender, err).and_then(|e| e.to_json()) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode error envelope for {:?}: {}", sender, e);
            return;
        }
    };

    match reply.send_text(text) {
        Ok(()) => {
            hub.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            tracing::warn!("Could not report error to {:?}: {}", sender, e);
            hub.metrics().sends_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::peer::Outbound;
    use link_types::{message_type, DeviceInfo, ErrorPayload};
    use tokio::sync::mpsc;

    fn connect(hub: &Hub, name: &str) -> (DeviceId, PeerHandle, mpsc::Receiver<Outbound>) {
        let info = DeviceInfo::new(DeviceId::random(), name);
        hub.register(info.clone()).unwrap();
        let (handle, rx) = PeerHandle::channel(16);
        hub.connect(&info.id.to_string(), handle.clone()).unwrap();
        (info.id, handle, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(Outbound::Text(text)) = rx.try_recv() {
            out.push(text);
        }
        out
    }

    fn only_error(rx: &mut mpsc::Receiver<Outbound>) -> (Envelope, ErrorPayload) {
        let texts = drain(rx);
        assert_eq!(texts.len(), 1, "expected exactly one error, got {:?}", texts);
        let envelope = Envelope::parse(&texts[0]).unwrap();
        assert_eq!(envelope.message_type, message_type::ERROR);
        let payload = serde_json::from_str(&envelope.serialized_json).unwrap();
        (envelope, payload)
    }

    fn ping(target: &str) -> String {
        format!(r#"{{"targetId":"{target}","messageType":"ping","serializedJson":"{{\"n\":1}}"}}"#)
    }

    #[test]
    fn forwards_original_text_byte_identical() {
        let hub = Hub::new(Config::default());
        let (a, a_handle, mut a_rx) = connect(&hub, "a");
        let (b, _b_handle, mut b_rx) = connect(&hub, "b");
        drain(&mut a_rx);
        drain(&mut b_rx);

        // Extra whitespace and field order must survive the relay
        let text = format!(
            "{{ \"serializedJson\": \"{{}}\",\n \"targetId\": \"{}\", \"messageType\": \"ping\", \"extra\": 1 }}",
            b
        );
        handle_text(&hub, &a, &a_handle, &text);

        assert_eq!(drain(&mut b_rx), vec![text]);
        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(hub.metrics().messages_relayed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unknown_target_yields_one_device_offline_error() {
        let hub = Hub::new(Config::default());
        let (a, a_handle, mut a_rx) = connect(&hub, "a");
        let z = DeviceId::random();

        handle_text(&hub, &a, &a_handle, &ping(&z.to_string()));

        let (envelope, payload) = only_error(&mut a_rx);
        assert_eq!(envelope.target_id, a.to_string());
        assert_eq!(payload.error_code, ErrorCode::DeviceOffline);
        assert_eq!(payload.message, format!("Target '{}' not found or offline.", z));
    }

    #[test]
    fn closed_target_is_offline() {
        let hub = Hub::new(Config::default());
        let (a, a_handle, mut a_rx) = connect(&hub, "a");
        let (b, _b_handle, b_rx) = connect(&hub, "b");
        drain(&mut a_rx);
        drop(b_rx);

        handle_text(&hub, &a, &a_handle, &ping(&b.to_string()));
        let (_, payload) = only_error(&mut a_rx);
        assert_eq!(payload.error_code, ErrorCode::DeviceOffline);
    }

    #[test]
    fn blank_field_is_processing_error() {
        let hub = Hub::new(Config::default());
        let (a, a_handle, mut a_rx) = connect(&hub, "a");

        let text = r#"{"targetId":"  ","messageType":"ping","serializedJson":"{}"}"#;
        handle_text(&hub, &a, &a_handle, text);

        let (envelope, payload) = only_error(&mut a_rx);
        assert_eq!(envelope.target_id, a.to_string());
        assert_eq!(payload.error_code, ErrorCode::ProcessingError);
        assert_eq!(
            payload.message,
            "Invalid message format. Must include targetId, serializedJson, and messageType."
        );
    }

    #[test]
    fn malformed_json_and_bad_targets_are_processing_errors() {
        let hub = Hub::new(Config::default());
        let (a, a_handle, mut a_rx) = connect(&hub, "a");

        for text in ["not json".to_string(), ping("not-a-uuid"), ping("all")] {
            handle_text(&hub, &a, &a_handle, &text);
            let (_, payload) = only_error(&mut a_rx);
            assert_eq!(payload.error_code, ErrorCode::ProcessingError);
        }
    }

    #[test]
    fn errors_do_not_stop_later_messages() {
        let hub = Hub::new(Config::default());
        let (a, a_handle, mut a_rx) = connect(&hub, "a");
        let (b, _b_handle, mut b_rx) = connect(&hub, "b");
        drain(&mut a_rx);

        handle_text(&hub, &a, &a_handle, "garbage");
        handle_text(&hub, &a, &a_handle, &ping(&b.to_string()));

        assert_eq!(drain(&mut a_rx).len(), 1);
        assert_eq!(drain(&mut b_rx), vec![ping(&b.to_string())]);
    }

    #[test]
    fn rate_limited_sender_gets_processing_error() {
        let mut config = Config::default();
        config.limits.messages_per_minute = 1;
        let hub = Hub::new(config);
        let (a, a_handle, mut a_rx) = connect(&hub, "a");
        let (b, _b_handle, mut b_rx) = connect(&hub, "b");
        drain(&mut a_rx);

        handle_text(&hub, &a, &a_handle, &ping(&b.to_string()));
        handle_text(&hub, &a, &a_handle, &ping(&b.to_string()));

        assert_eq!(drain(&mut b_rx).len(), 1);
        let (_, payload) = only_error(&mut a_rx);
        assert_eq!(payload.error_code, ErrorCode::ProcessingError);
        assert_eq!(payload.message, "message rate limit exceeded");
    }

    #[test]
    fn per_sender_order_is_preserved() {
        let hub = Hub::new(Config::default());
        let (a, a_handle, _a_rx) = connect(&hub, "a");
        let (b, _b_handle, mut b_rx) = connect(&hub, "b");

        let texts: Vec<String> = (0..5)
            .map(|n| {
                format!(
                    r#"{{"targetId":"{b}","messageType":"seq","serializedJson":"{n}"}}"#
                )
            })
            .collect();
        for text in &texts {
            handle_text(&hub, &a, &a_handle, text);
        }
        assert_eq!(drain(&mut b_rx), texts);
    }
}
