//! Main Hub coordination.
//!
//! The Hub owns the registration ledger, the connection registry and the
//! blob store, and drives the handshake state machine between them:
//!
//! ```text
//! Unregistered --register--> Pending --connect--> Connected --disconnect--> Disconnected
//! ```

use crate::blobs::{BlobStore, FileBlob};
use crate::broadcast::{self, Delivery};
use crate::config::Config;
use crate::error::{HubError, HubResult};
use crate::ledger::{Ledger, PendingConnection};
use crate::limits::RateLimits;
use crate::peer::{PeerHandle, SendError};
use crate::registry::Registry;
use link_types::{message_type, DeviceId, DeviceInfo, Envelope, FileId, FileOffer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Operational metrics for monitoring hub activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct HubMetrics {
    /// Successful registrations.
    pub registrations_total: AtomicU64,
    /// Handshakes that reached the connected state.
    pub connections_total: AtomicU64,
    /// Handshakes rejected for an unknown token.
    pub handshakes_rejected: AtomicU64,
    /// Envelopes forwarded to their target.
    pub messages_relayed: AtomicU64,
    /// Error envelopes sent back to senders.
    pub errors_total: AtomicU64,
    /// Lifecycle notifications accepted by recipients.
    pub broadcasts_delivered: AtomicU64,
    /// Sends dropped because the recipient was closed or its queue full.
    pub sends_dropped: AtomicU64,
    /// Files accepted for upload.
    pub files_stored: AtomicU64,
    /// Files handed out by download.
    pub files_downloaded: AtomicU64,
    /// Rate limit rejections.
    pub rate_limit_hits: AtomicU64,
}

impl HubMetrics {
    fn record(&self, delivery: Delivery) {
        self.broadcasts_delivered
            .fetch_add(delivery.delivered as u64, Ordering::Relaxed);
        self.sends_dropped
            .fetch_add(delivery.failed as u64, Ordering::Relaxed);
    }
}

/// What one cleanup sweep removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired pending registrations.
    pub registrations: usize,
    /// Expired files.
    pub files: usize,
}

/// The rendezvous and relay hub.
pub struct Hub {
    config: Config,
    ledger: Ledger,
    registry: Registry,
    blobs: BlobStore,
    rate_limits: RateLimits,
    metrics: HubMetrics,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("pending", &self.ledger.len())
            .field("connected", &self.registry.len())
            .field("files", &self.blobs.len())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Create a new Hub with the given config.
    pub fn new(config: Config) -> Self {
        let ledger = Ledger::new(Duration::from_secs(config.storage.pending_ttl_secs));
        let blobs = BlobStore::new(
            config.storage.max_file_size,
            Duration::from_secs(config.storage.file_ttl_secs),
        );
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            ledger,
            registry: Registry::new(),
            blobs,
            rate_limits,
            metrics: HubMetrics::default(),
        }
    }

    /// Get the hub configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the registration ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Get access to the connection registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get access to the blob store.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &HubMetrics {
        &self.metrics
    }

    /// Register a device (Unregistered -> Pending).
    ///
    /// Fails with [`HubError::AlreadyRegistered`] when the id is pending or
    /// connected. The returned future resolves once the device connects;
    /// callers are free to drop it.
    pub fn register(&self, mut info: DeviceInfo) -> HubResult<PendingConnection> {
        if let Err(e) = self.rate_limits.check_registration() {
            tracing::warn!("Registration rate limited: {}", e);
            self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            return Err(HubError::RateLimited {
                reason: e.to_string(),
            });
        }

        info.name = truncate_device_name(&info.name, self.config.limits.max_device_name_len);
        let device_id = info.id;

        let pending = self
            .ledger
            .register_unless(info, |id| self.registry.contains(id))
            .inspect_err(|_| {
                tracing::warn!(
                    "Failed to register device {:?}: already pending or registered",
                    device_id
                );
            })?;

        self.metrics
            .registrations_total
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "Device registered and pending WebSocket connection: {:?}",
            device_id
        );
        Ok(pending)
    }

    /// Complete a handshake (Pending -> Connected).
    ///
    /// Claims the ledger entry for `token`, publishes the device in the
    /// registry under the same lock, resolves the registration future and
    /// announces `device_connected` to everyone else.
    pub fn connect(&self, token: &str, handle: PeerHandle) -> HubResult<DeviceInfo> {
        let unknown = || HubError::UnknownToken {
            token: token.to_string(),
        };

        let device_id: DeviceId = token.parse().map_err(|_| unknown())?;

        let pending = match self.ledger.claim_then(&device_id, |info| {
            self.registry.upsert(info.clone(), handle.clone());
        }) {
            Ok(pending) => pending,
            Err(e) => {
                self.metrics
                    .handshakes_rejected
                    .fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let info = pending.resolve(handle);
        self.metrics
            .connections_total
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "Device registered and connected: {:?}, name: {}",
            info.id,
            info.name
        );

        let delivery = broadcast::notify(&self.registry, &info, message_type::DEVICE_CONNECTED);
        self.metrics.record(delivery);
        Ok(info)
    }

    /// Tear down a connection (Connected -> Disconnected).
    ///
    /// Removes the registry entry and, if one was removed, announces
    /// `device_disconnected`. Returns whether a device was removed, so a
    /// repeated call is a no-op that broadcasts nothing.
    pub fn disconnect(&self, device_id: &DeviceId) -> bool {
        match self.registry.remove(device_id) {
            Some(removed) => {
                let delivery = broadcast::notify(
                    &self.registry,
                    &removed.info,
                    message_type::DEVICE_DISCONNECTED,
                );
                self.metrics.record(delivery);
                tracing::info!("Device disconnected: {:?}", device_id);
                true
            }
            None => false,
        }
    }

    /// Point-in-time list of connected devices.
    pub fn connected_devices(&self) -> Vec<DeviceInfo> {
        self.registry.snapshot()
    }

    /// Deliver `envelope` to `target` if it is connected.
    ///
    /// Best effort: the send is queued, never awaited.
    pub fn send_if_connected(&self, target: &DeviceId, envelope: &Envelope) -> HubResult<()> {
        let text = envelope.to_json()?;
        match self.registry.lookup(target).map(|device| device.handle) {
            Some(handle) if handle.is_open() => self.queue(target, &handle, text),
            _ => Err(HubError::DeviceOffline {
                target: target.to_string(),
            }),
        }
    }

    /// Queue `text` on `handle`, counting drops.
    pub(crate) fn queue(&self, target: &DeviceId, handle: &PeerHandle, text: String) -> HubResult<()> {
        match handle.send_text(text) {
            Ok(()) => Ok(()),
            Err(SendError::Full) => {
                tracing::warn!("Outbound queue full for {:?}, message dropped", target);
                self.metrics.sends_dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SendError::Closed) => {
                self.metrics.sends_dropped.fetch_add(1, Ordering::Relaxed);
                Err(HubError::DeviceOffline {
                    target: target.to_string(),
                })
            }
        }
    }

    /// Store an uploaded file and offer it to `target`.
    ///
    /// The offer is dropped silently when the target is offline; the file
    /// stays downloadable until it expires.
    pub fn offer_file(
        &self,
        target: DeviceId,
        sender: DeviceId,
        name: String,
        content_type: String,
        bytes: Vec<u8>,
    ) -> HubResult<FileId> {
        let length = bytes.len() as u64;
        let file_id = self.blobs.put(name.clone(), content_type, bytes, sender)?;
        self.metrics.files_stored.fetch_add(1, Ordering::Relaxed);

        let offer = FileOffer {
            file_id,
            file_name: name,
            length,
            sender_id: sender,
        };
        let envelope = Envelope::file_offer(target, &offer)?;

        match self.send_if_connected(&target, &envelope) {
            Ok(()) => tracing::debug!("Offered file {:?} to {:?}", file_id, target),
            Err(HubError::DeviceOffline { .. }) => {
                tracing::debug!("File offer {:?} dropped: {:?} offline", file_id, target)
            }
            Err(e) => return Err(e),
        }
        Ok(file_id)
    }

    /// Hand out a stored file exactly once.
    pub fn take_file(&self, file_id: &FileId) -> HubResult<FileBlob> {
        let blob = self
            .blobs
            .take(file_id)
            .ok_or(HubError::NotFound { file_id: *file_id })?;
        self.metrics
            .files_downloaded
            .fetch_add(1, Ordering::Relaxed);
        Ok(blob)
    }

    /// Expire stale registrations and files, and shrink limiter state.
    pub fn sweep(&self) -> SweepReport {
        let report = SweepReport {
            registrations: self.ledger.expire(),
            files: self.blobs.expire(),
        };
        self.rate_limits.shrink();
        report
    }
}

/// Truncate a device name to a maximum character length.
///
/// Uses char boundaries to avoid splitting multi-byte UTF-8.
fn truncate_device_name(name: &str, max_chars: usize) -> String {
    if name.chars().count() <= max_chars {
        name.to_string()
    } else {
        name.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::Outbound;
    use link_types::BROADCAST_TARGET;
    use tokio::sync::mpsc;

    fn hub() -> Hub {
        Hub::new(Config::default())
    }

    fn connect(hub: &Hub, name: &str) -> (DeviceInfo, mpsc::Receiver<Outbound>) {
        let info = DeviceInfo::new(DeviceId::random(), name);
        hub.register(info.clone()).unwrap();
        let (handle, rx) = PeerHandle::channel(16);
        let connected = hub.connect(&info.id.to_string(), handle).unwrap();
        (connected, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(Outbound::Text(text)) = rx.try_recv() {
            out.push(Envelope::parse(&text).unwrap());
        }
        out
    }

    #[test]
    fn register_twice_while_pending_fails() {
        let hub = hub();
        let info = DeviceInfo::new(DeviceId::random(), "first");
        hub.register(info.clone()).unwrap();

        let err = hub
            .register(DeviceInfo::new(info.id, "second"))
            .unwrap_err();
        assert!(matches!(err, HubError::AlreadyRegistered { .. }));
        assert_eq!(hub.ledger().len(), 1);
    }

    #[test]
    fn register_while_connected_fails() {
        let hub = hub();
        let (info, _rx) = connect(&hub, "online");

        let err = hub.register(info.clone()).unwrap_err();
        assert!(matches!(err, HubError::AlreadyRegistered { .. }));
        assert!(!hub.ledger().contains(&info.id));
        assert!(hub.registry().contains(&info.id));
    }

    #[test]
    fn connect_moves_device_from_ledger_to_registry() {
        let hub = hub();
        let info = DeviceInfo::new(DeviceId::random(), "laptop");
        hub.register(info.clone()).unwrap();
        assert!(hub.connected_devices().is_empty());

        let (handle, _rx) = PeerHandle::channel(4);
        hub.connect(&info.id.to_string(), handle).unwrap();

        assert!(!hub.ledger().contains(&info.id));
        assert_eq!(hub.connected_devices(), vec![info]);
    }

    #[test]
    fn unknown_or_reused_token_leaves_registry_unchanged() {
        let hub = hub();
        let (info, _rx) = connect(&hub, "a");

        let (handle, _rx2) = PeerHandle::channel(4);
        assert!(matches!(
            hub.connect(&info.id.to_string(), handle.clone()),
            Err(HubError::UnknownToken { .. })
        ));
        assert!(matches!(
            hub.connect("not-a-uuid", handle.clone()),
            Err(HubError::UnknownToken { .. })
        ));
        assert!(matches!(
            hub.connect(&DeviceId::random().to_string(), handle),
            Err(HubError::UnknownToken { .. })
        ));
        assert_eq!(hub.registry().len(), 1);
        assert_eq!(hub.metrics().handshakes_rejected.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn registration_future_resolves_on_connect() {
        let hub = hub();
        let info = DeviceInfo::new(DeviceId::random(), "phone");
        let pending = hub.register(info.clone()).unwrap();

        let (handle, _rx) = PeerHandle::channel(4);
        hub.connect(&info.id.to_string(), handle).unwrap();
        assert!(pending.connected().await.is_some());
    }

    #[test]
    fn connect_announces_to_others_only() {
        let hub = hub();
        let (_a, mut a_rx) = connect(&hub, "a");
        let (b, mut b_rx) = connect(&hub, "b");

        let announced = drain(&mut a_rx);
        assert_eq!(announced.len(), 1);
        assert_eq!(announced[0].target_id, BROADCAST_TARGET);
        assert_eq!(announced[0].message_type, message_type::DEVICE_CONNECTED);
        let info: DeviceInfo = serde_json::from_str(&announced[0].serialized_json).unwrap();
        assert_eq!(info, b);

        assert!(drain(&mut b_rx).is_empty());
    }

    #[test]
    fn disconnect_broadcasts_exactly_once() {
        let hub = hub();
        let (a, _a_rx) = connect(&hub, "a");
        let (_b, mut b_rx) = connect(&hub, "b");
        let (_c, mut c_rx) = connect(&hub, "c");
        drain(&mut b_rx);
        drain(&mut c_rx);

        assert!(hub.disconnect(&a.id));
        assert!(!hub.disconnect(&a.id));

        for rx in [&mut b_rx, &mut c_rx] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].message_type, message_type::DEVICE_DISCONNECTED);
        }
        assert!(!hub.registry().contains(&a.id));
    }

    #[test]
    fn disconnected_devices_hear_nothing_more() {
        let hub = hub();
        let (a, mut a_rx) = connect(&hub, "a");
        let (b, _b_rx) = connect(&hub, "b");
        drain(&mut a_rx);

        hub.disconnect(&a.id);
        hub.disconnect(&b.id);
        assert!(drain(&mut a_rx).is_empty());
    }

    #[test]
    fn device_names_are_truncated() {
        let mut config = Config::default();
        config.limits.max_device_name_len = 4;
        let hub = Hub::new(config);

        let info = DeviceInfo::new(DeviceId::random(), "日本語デバイス");
        hub.register(info.clone()).unwrap();
        let (handle, _rx) = PeerHandle::channel(4);
        let connected = hub.connect(&info.id.to_string(), handle).unwrap();
        assert_eq!(connected.name, "日本語デ");
    }

    #[test]
    fn registration_rate_limit() {
        let mut config = Config::default();
        config.limits.registrations_per_second = 1;
        let hub = Hub::new(config);

        hub.register(DeviceInfo::new(DeviceId::random(), "a")).unwrap();
        let err = hub
            .register(DeviceInfo::new(DeviceId::random(), "b"))
            .unwrap_err();
        assert!(matches!(err, HubError::RateLimited { .. }));
    }

    #[test]
    fn file_offer_reaches_connected_target() {
        let hub = hub();
        let (sender, _s_rx) = connect(&hub, "sender");
        let (target, mut t_rx) = connect(&hub, "target");
        drain(&mut t_rx);

        let file_id = hub
            .offer_file(
                target.id,
                sender.id,
                "photo.jpg".into(),
                "image/jpeg".into(),
                vec![1, 2, 3],
            )
            .unwrap();

        let offers = drain(&mut t_rx);
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].message_type, message_type::FILE_OFFER);
        assert_eq!(offers[0].target_id, target.id.to_string());
        let offer: FileOffer = serde_json::from_str(&offers[0].serialized_json).unwrap();
        assert_eq!(offer.file_id, file_id);
        assert_eq!(offer.file_name, "photo.jpg");
        assert_eq!(offer.length, 3);
        assert_eq!(offer.sender_id, sender.id);

        let blob = hub.take_file(&file_id).unwrap();
        assert_eq!(blob.bytes, vec![1, 2, 3]);
        assert!(matches!(
            hub.take_file(&file_id),
            Err(HubError::NotFound { .. })
        ));
    }

    #[test]
    fn file_offer_to_offline_target_is_dropped_silently() {
        let hub = hub();
        let (sender, mut s_rx) = connect(&hub, "sender");

        let file_id = hub
            .offer_file(
                DeviceId::random(),
                sender.id,
                "a.txt".into(),
                "text/plain".into(),
                b"hi".to_vec(),
            )
            .unwrap();

        // No error envelope goes back to the uploader
        assert!(drain(&mut s_rx).is_empty());
        assert!(hub.take_file(&file_id).is_ok());
    }

    #[test]
    fn concurrent_lifecycle_keeps_one_disconnect_per_connect() {
        use std::sync::atomic::AtomicUsize;

        const ROUNDS: usize = 200;
        const ATTEMPTS: usize = 20;

        let mut config = Config::default();
        config.limits.registrations_per_second = 0;
        let hub = Hub::new(config);

        let listener = DeviceInfo::new(DeviceId::random(), "listener");
        hub.register(listener.clone()).unwrap();
        let (handle, mut events) = PeerHandle::channel(4 * ATTEMPTS + 8);
        hub.connect(&listener.id.to_string(), handle).unwrap();

        for _ in 0..ROUNDS {
            let info = DeviceInfo::new(DeviceId::random(), "racer");
            let token = info.id.to_string();
            let connects = AtomicUsize::new(0);
            let disconnects = AtomicUsize::new(0);

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    for _ in 0..ATTEMPTS {
                        let _ = hub.register(info.clone());
                        std::thread::yield_now();
                    }
                });
                scope.spawn(|| {
                    for _ in 0..ATTEMPTS {
                        let (handle, _rx) = PeerHandle::channel(4);
                        if hub.connect(&token, handle).is_ok() {
                            connects.fetch_add(1, Ordering::SeqCst);
                        }
                        std::thread::yield_now();
                    }
                });
                scope.spawn(|| {
                    for _ in 0..ATTEMPTS {
                        if hub.disconnect(&info.id) {
                            disconnects.fetch_add(1, Ordering::SeqCst);
                        }
                        std::thread::yield_now();
                    }
                });
            });

            assert!(
                !(hub.ledger().contains(&info.id) && hub.registry().contains(&info.id)),
                "device is both pending and connected"
            );

            if hub.disconnect(&info.id) {
                disconnects.fetch_add(1, Ordering::SeqCst);
            }
            let connects = connects.load(Ordering::SeqCst);
            assert_eq!(disconnects.load(Ordering::SeqCst), connects);

            let mut connected = 0;
            let mut disconnected = 0;
            for event in drain(&mut events) {
                let subject: DeviceInfo = serde_json::from_str(&event.serialized_json).unwrap();
                assert_eq!(subject.id, info.id);
                match event.message_type.as_str() {
                    message_type::DEVICE_CONNECTED => connected += 1,
                    message_type::DEVICE_DISCONNECTED => disconnected += 1,
                    other => panic!("unexpected event {}", other),
                }
            }
            assert_eq!(connected, connects);
            assert_eq!(disconnected, connects);
            assert!(hub.registry().contains(&listener.id));
        }
    }

    #[test]
    fn sweep_expires_stale_state() {
        let mut config = Config::default();
        config.storage.pending_ttl_secs = 0;
        config.storage.file_ttl_secs = 0;
        let hub = Hub::new(config);

        hub.register(DeviceInfo::new(DeviceId::random(), "stale")).unwrap();
        hub.blobs()
            .put("f", "x/y", vec![0], DeviceId::random())
            .unwrap();

        let report = hub.sweep();
        assert_eq!(
            report,
            SweepReport {
                registrations: 1,
                files: 1
            }
        );
    }
}
