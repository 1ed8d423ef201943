//! Per-connection session management.
//!
//! Each connected device gets a Session that runs its receive loop. The loop
//! is transport-agnostic: the WebSocket layer feeds it [`Inbound`] frames and
//! drains the device's [`PeerHandle`] queue on the other side.

use crate::error::HubError;
use crate::hub::Hub;
use crate::peer::{PeerHandle, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL};
use crate::router;
use futures_util::{Stream, StreamExt};
use link_types::DeviceInfo;
use std::sync::Arc;

/// Close reason for a normal shutdown.
pub const CLOSE_REASON_NORMAL: &str = "Closing";
/// Close reason after a transport fault.
pub const CLOSE_REASON_FAULT: &str = "An unexpected error occurred";

/// A complete frame received from a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete text message.
    Text(String),
    /// A complete binary message.
    Binary(Vec<u8>),
    /// The device asked to close.
    Close,
    /// The transport failed.
    Fault(String),
    /// Control traffic the session does not act on (ping, pong).
    Ignored,
}

/// Session state machine states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Relaying messages.
    Active,
    /// Leaving the loop; the channel will be closed with this status.
    Closing {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: &'static str,
    },
}

/// A per-connection session.
pub struct Session {
    hub: Arc<Hub>,
    device: DeviceInfo,
    handle: PeerHandle,
    state: SessionState,
}

impl Session {
    /// Create a session for a device that completed its handshake.
    pub fn new(hub: Arc<Hub>, device: DeviceInfo, handle: PeerHandle) -> Self {
        Self {
            hub,
            device,
            handle,
            state: SessionState::Active,
        }
    }

    /// Run the session until the device leaves or the transport fails.
    ///
    /// Every exit goes through a single teardown that removes the device
    /// from the registry, broadcasts its departure once and queues the
    /// close frame. Returns the final state.
    pub async fn run<S>(mut self, mut inbound: S) -> SessionState
    where
        S: Stream<Item = Inbound> + Unpin,
    {
        let device_id = self.device.id;
        tracing::debug!("Session started for {:?}", device_id);

        while self.state == SessionState::Active {
            match inbound.next().await {
                Some(Inbound::Text(text)) => {
                    router::handle_text(&self.hub, &device_id, &self.handle, &text);
                }
                Some(Inbound::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => router::handle_text(&self.hub, &device_id, &self.handle, &text),
                    Err(_) => {
                        let err = HubError::Validation("binary message is not valid UTF-8".into());
                        tracing::warn!("Error processing message from {:?}: {}", device_id, err);
                        router::report(&self.hub, &device_id, &self.handle, &err);
                    }
                },
                Some(Inbound::Ignored) => {}
                Some(Inbound::Close) | None => {
                    tracing::info!("Device disconnected: {:?}", device_id);
                    self.state = SessionState::Closing {
                        code: CLOSE_NORMAL,
                        reason: CLOSE_REASON_NORMAL,
                    };
                }
                Some(Inbound::Fault(e)) => {
                    tracing::error!("Unexpected error in connection for {:?}: {}", device_id, e);
                    self.state = SessionState::Closing {
                        code: CLOSE_INTERNAL_ERROR,
                        reason: CLOSE_REASON_FAULT,
                    };
                }
            }
        }

        self.finish().await
    }

    /// Teardown shared by every exit path.
    async fn finish(self) -> SessionState {
        self.hub.disconnect(&self.device.id);

        if let SessionState::Closing { code, reason } = self.state {
            if let Err(e) = self.handle.close(code, reason).await {
                tracing::debug!("Close frame for {:?} not queued: {}", self.device.id, e);
            }
        }
        self.state
    }
}
