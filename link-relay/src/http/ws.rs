//! WebSocket upgrade: bridges an axum socket to a hub [`Session`].

use crate::hub::Hub;
use crate::peer::{Outbound, PeerHandle, CLOSE_POLICY_VIOLATION};
use crate::session::{Inbound, Session};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::Query;
use axum::response::Response;
use axum::Extension;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Close reason sent when the handshake token is rejected.
const CLOSE_REASON_REJECTED: &str = "Invalid registration";

/// How long the writer may take to flush after the session ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Query string of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Handshake token (the registered device id).
    #[serde(default)]
    pub uuid: Option<String>,
}

/// `GET /ws?uuid=<token>`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    Extension(hub): Extension<Arc<Hub>>,
) -> Response {
    let token = params.uuid.unwrap_or_default();
    ws.on_upgrade(move |socket| handle_socket(hub, socket, token))
}

async fn handle_socket(hub: Arc<Hub>, socket: WebSocket, token: String) {
    let (sink, stream) = socket.split();
    let (handle, rx) = PeerHandle::channel(hub.config().limits.outbound_queue_len);
    let mut writer = tokio::spawn(write_loop(sink, rx));

    match hub.connect(&token, handle.clone()) {
        Ok(device) => {
            let inbound = stream.map(|frame| match frame {
                Ok(Message::Text(text)) => Inbound::Text(text),
                Ok(Message::Binary(bytes)) => Inbound::Binary(bytes),
                Ok(Message::Close(_)) => Inbound::Close,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Inbound::Ignored,
                Err(e) => Inbound::Fault(e.to_string()),
            });
            Session::new(hub, device, handle).run(inbound).await;
        }
        Err(e) => {
            tracing::warn!("Invalid or unregistered UUID in WebSocket connection: {}", token);
            let _ = handle.send_text(e.to_string());
            let _ = handle.close(CLOSE_POLICY_VIOLATION, CLOSE_REASON_REJECTED).await;
            drop(handle);
        }
    }

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        tracing::debug!("Writer did not finish in time, aborting");
        writer.abort();
    }
}

/// Drain the outbound queue into the socket until a close frame or error.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(frame) = rx.recv().await {
        match frame {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::debug!("WebSocket send failed: {}", e);
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let close = Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                }));
                if let Err(e) = sink.send(close).await {
                    tracing::debug!("WebSocket close failed: {}", e);
                }
                break;
            }
        }
    }
}
