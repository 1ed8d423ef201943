//! Registration ledger: devices that registered but have not connected yet.
//!
//! Each pending entry is keyed by its handshake token (the device id) and
//! carries a one-shot sender that resolves with the device's transport
//! handle once the WebSocket upgrade claims the entry.

use crate::error::{HubError, HubResult};
use crate::peer::PeerHandle;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use link_types::{DeviceId, DeviceInfo};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// A registration waiting for its WebSocket upgrade.
#[derive(Debug)]
pub struct PendingRegistration {
    /// What the device registered with.
    pub info: DeviceInfo,
    resolver: oneshot::Sender<PeerHandle>,
    registered_at: Instant,
}

impl PendingRegistration {
    /// Resolve the registration's future with the live transport handle.
    ///
    /// Returns the device info. Nobody awaiting the future is not an error.
    pub fn resolve(self, handle: PeerHandle) -> DeviceInfo {
        let _ = self.resolver.send(handle);
        self.info
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.registered_at.elapsed() >= ttl
    }
}

/// Future side of a registration: resolves once the device connects.
#[derive(Debug)]
pub struct PendingConnection {
    rx: oneshot::Receiver<PeerHandle>,
}

impl PendingConnection {
    /// Wait for the upgrade. `None` if the registration expired or was dropped.
    pub async fn connected(self) -> Option<PeerHandle> {
        self.rx.await.ok()
    }
}

/// Store of pending registrations keyed by handshake token.
#[derive(Debug)]
pub struct Ledger {
    pending: DashMap<DeviceId, PendingRegistration>,
    ttl: Duration,
}

impl Ledger {
    /// Create an empty ledger whose entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    /// Register a device.
    ///
    /// Fails with [`HubError::AlreadyRegistered`] if a live pending entry
    /// exists. A stale entry is replaced.
    pub fn register(&self, info: DeviceInfo) -> HubResult<PendingConnection> {
        self.register_unless(info, |_| false)
    }

    /// Register a device unless `taken` reports the id as in use elsewhere.
    ///
    /// `taken` runs while this id's entry is locked, so a concurrent claim of
    /// the same id cannot slip in between the check and the insert.
    pub fn register_unless<F>(&self, info: DeviceInfo, taken: F) -> HubResult<PendingConnection>
    where
        F: FnOnce(&DeviceId) -> bool,
    {
        let device_id = info.id;
        let (resolver, rx) = oneshot::channel();
        let registration = PendingRegistration {
            info,
            resolver,
            registered_at: Instant::now(),
        };

        match self.pending.entry(device_id) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_expired(self.ttl) || taken(&device_id) {
                    return Err(HubError::AlreadyRegistered { device_id });
                }
                tracing::debug!("Replacing expired registration for {:?}", device_id);
                entry.insert(registration);
            }
            Entry::Vacant(entry) => {
                if taken(&device_id) {
                    return Err(HubError::AlreadyRegistered { device_id });
                }
                entry.insert(registration);
            }
        }

        Ok(PendingConnection { rx })
    }

    /// Atomically remove and return the pending entry for `token`.
    pub fn claim(&self, token: &DeviceId) -> HubResult<PendingRegistration> {
        self.claim_then(token, |_| {})
    }

    /// Claim `token`, running `publish` before the entry disappears.
    ///
    /// `publish` runs while the entry is still locked, so the device is never
    /// observable as neither pending nor published.
    pub fn claim_then<F>(&self, token: &DeviceId, publish: F) -> HubResult<PendingRegistration>
    where
        F: FnOnce(&DeviceInfo),
    {
        match self.pending.entry(*token) {
            Entry::Occupied(entry) if !entry.get().is_expired(self.ttl) => {
                publish(&entry.get().info);
                Ok(entry.remove())
            }
            Entry::Occupied(entry) => {
                tracing::debug!("Handshake token {:?} expired", token);
                entry.remove();
                Err(HubError::UnknownToken {
                    token: token.to_string(),
                })
            }
            Entry::Vacant(_) => Err(HubError::UnknownToken {
                token: token.to_string(),
            }),
        }
    }

    /// Drop registrations older than the TTL. Returns how many were removed.
    pub fn expire(&self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, pending| !pending.is_expired(self.ttl));
        before.saturating_sub(self.pending.len())
    }

    /// Whether `id` has a pending entry.
    pub fn contains(&self, id: &DeviceId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of pending registrations.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no registrations are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    fn device(name: &str) -> DeviceInfo {
        DeviceInfo::new(DeviceId::random(), name)
    }

    #[test]
    fn register_then_claim() {
        let ledger = Ledger::new(TTL);
        let info = device("laptop");
        let id = info.id;

        ledger.register(info).unwrap();
        assert!(ledger.contains(&id));

        let pending = ledger.claim(&id).unwrap();
        assert_eq!(pending.info.name, "laptop");
        assert!(!ledger.contains(&id));
    }

    #[test]
    fn duplicate_registration_keeps_original() {
        let ledger = Ledger::new(TTL);
        let first = device("first");
        let id = first.id;
        ledger.register(first).unwrap();

        let second = DeviceInfo::new(id, "second");
        let err = ledger.register(second).unwrap_err();
        assert!(matches!(err, HubError::AlreadyRegistered { device_id } if device_id == id));

        let pending = ledger.claim(&id).unwrap();
        assert_eq!(pending.info.name, "first");
    }

    #[test]
    fn claim_twice_is_unknown_token() {
        let ledger = Ledger::new(TTL);
        let info = device("phone");
        let id = info.id;
        ledger.register(info).unwrap();

        ledger.claim(&id).unwrap();
        assert!(matches!(
            ledger.claim(&id),
            Err(HubError::UnknownToken { .. })
        ));
    }

    #[test]
    fn register_unless_respects_external_check() {
        let ledger = Ledger::new(TTL);
        let info = device("tablet");
        let id = info.id;

        let err = ledger.register_unless(info, |_| true).unwrap_err();
        assert!(matches!(err, HubError::AlreadyRegistered { .. }));
        assert!(!ledger.contains(&id));
    }

    #[test]
    fn claim_then_publishes_before_removal() {
        let ledger = Ledger::new(TTL);
        let info = device("desk");
        let id = info.id;
        ledger.register(info).unwrap();

        let mut published = None;
        ledger
            .claim_then(&id, |info| published = Some(info.name.clone()))
            .unwrap();
        assert_eq!(published.as_deref(), Some("desk"));
    }

    #[tokio::test]
    async fn resolving_completes_the_future() {
        let ledger = Ledger::new(TTL);
        let info = device("tv");
        let id = info.id;
        let future = ledger.register(info).unwrap();

        let (handle, _rx) = PeerHandle::channel(1);
        ledger.claim(&id).unwrap().resolve(handle);

        let resolved = future.connected().await.unwrap();
        assert!(resolved.is_open());
    }

    #[tokio::test]
    async fn expired_entries_are_swept_and_rejected() {
        let ledger = Ledger::new(Duration::ZERO);
        let info = device("old");
        let id = info.id;
        let future = ledger.register(info).unwrap();

        assert!(matches!(
            ledger.claim(&id),
            Err(HubError::UnknownToken { .. })
        ));
        assert!(future.connected().await.is_none());

        ledger.register(device("a")).unwrap();
        ledger.register(device("b")).unwrap();
        assert_eq!(ledger.expire(), 2);
        assert!(ledger.is_empty());
    }

    #[test]
    fn expired_entry_can_be_registered_again() {
        let ledger = Ledger::new(Duration::ZERO);
        let info = device("again");
        let id = info.id;
        ledger.register(info.clone()).unwrap();
        ledger.register(info).unwrap();
        assert!(ledger.contains(&id));
    }
}
