//! Prometheus metrics endpoint.

use crate::hub::Hub;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(hub): Extension<Arc<Hub>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&hub),
    )
}

fn render(hub: &Hub) -> String {
    let m = hub.metrics();

    // Gauges — current state
    let connected = hub.registry().len();
    let pending = hub.ledger().len();
    let files = hub.blobs().len();
    let file_bytes = hub.blobs().total_bytes();
    let limiter_keys = hub.rate_limits().message_keys_count();

    // Counters — monotonic since startup
    let registrations = m.registrations_total.load(Ordering::Relaxed);
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let rejected = m.handshakes_rejected.load(Ordering::Relaxed);
    let relayed = m.messages_relayed.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);
    let broadcasts = m.broadcasts_delivered.load(Ordering::Relaxed);
    let dropped = m.sends_dropped.load(Ordering::Relaxed);
    let stored = m.files_stored.load(Ordering::Relaxed);
    let downloaded = m.files_downloaded.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);

    format!(
        r#"# HELP devlink_devices_connected Devices with an open channel
# TYPE devlink_devices_connected gauge
devlink_devices_connected {connected}

# HELP devlink_registrations_pending Registrations waiting for their upgrade
# TYPE devlink_registrations_pending gauge
devlink_registrations_pending {pending}

# HELP devlink_files_stored Files waiting for download
# TYPE devlink_files_stored gauge
devlink_files_stored {files}

# HELP devlink_file_bytes Bytes held in the file store
# TYPE devlink_file_bytes gauge
devlink_file_bytes {file_bytes}

# HELP devlink_rate_limiter_keys Devices tracked by the message rate limiter
# TYPE devlink_rate_limiter_keys gauge
devlink_rate_limiter_keys {limiter_keys}

# HELP devlink_info Server information
# TYPE devlink_info gauge
devlink_info{{version="{version}"}} 1

# HELP devlink_registrations_total Successful registrations
# TYPE devlink_registrations_total counter
devlink_registrations_total {registrations}

# HELP devlink_connections_total Handshakes completed
# TYPE devlink_connections_total counter
devlink_connections_total {conns_total}

# HELP devlink_handshakes_rejected_total Upgrades rejected for an unknown token
# TYPE devlink_handshakes_rejected_total counter
devlink_handshakes_rejected_total {rejected}

# HELP devlink_messages_relayed_total Envelopes forwarded to their target
# TYPE devlink_messages_relayed_total counter
devlink_messages_relayed_total {relayed}

# HELP devlink_errors_total Error envelopes sent back to senders
# TYPE devlink_errors_total counter
devlink_errors_total {errors}

# HELP devlink_broadcasts_delivered_total Lifecycle notifications delivered
# TYPE devlink_broadcasts_delivered_total counter
devlink_broadcasts_delivered_total {broadcasts}

# HELP devlink_sends_dropped_total Sends dropped on a closed or full queue
# TYPE devlink_sends_dropped_total counter
devlink_sends_dropped_total {dropped}

# HELP devlink_files_stored_total Files accepted for upload
# TYPE devlink_files_stored_total counter
devlink_files_stored_total {stored}

# HELP devlink_files_downloaded_total Files handed out
# TYPE devlink_files_downloaded_total counter
devlink_files_downloaded_total {downloaded}

# HELP devlink_rate_limit_hits_total Total rate limit rejections
# TYPE devlink_rate_limit_hits_total counter
devlink_rate_limit_hits_total {rate_limits}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}
