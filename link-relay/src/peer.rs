//! Transport handle for a connected device.
//!
//! A [`PeerHandle`] is the sending side of a bounded outbound queue. The
//! queue is drained by a writer task that owns the actual WebSocket sink,
//! so any connection task can push to any peer without awaiting the network.
//! When the queue is full the message is dropped rather than stalling the
//! sender.

use std::time::Duration;
use tokio::sync::mpsc;

/// WebSocket close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// WebSocket close code for a policy violation (bad handshake token).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// WebSocket close code for an internal server error.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// How long a close frame may wait for room in a full queue.
const CLOSE_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// A frame queued for delivery to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A complete text message.
    Text(String),
    /// Close the channel with this status.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: &'static str,
    },
}

/// Why a send did not reach the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The peer's queue is full; the message was dropped.
    #[error("outbound queue full")]
    Full,
    /// The peer's writer has stopped.
    #[error("channel closed")]
    Closed,
}

/// Cloneable handle used to push frames to one device.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    tx: mpsc::Sender<Outbound>,
}

impl PeerHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Whether the writer side is still alive.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a text message without waiting.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.tx
            .try_send(Outbound::Text(text.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::Full,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    /// Queue a close frame.
    ///
    /// Waits briefly for room so the close is not lost behind a full queue.
    pub async fn close(&self, code: u16, reason: &'static str) -> Result<(), SendError> {
        match tokio::time::timeout(
            CLOSE_ENQUEUE_TIMEOUT,
            self.tx.send(Outbound::Close { code, reason }),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Closed),
            Err(_) => Err(SendError::Full),
        }
    }
}
