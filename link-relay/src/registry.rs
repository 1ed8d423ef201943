//! Connection registry: every device with a live duplex channel.

use crate::peer::PeerHandle;
use dashmap::DashMap;
use link_types::{DeviceId, DeviceInfo};

/// A device with an open channel.
#[derive(Debug, Clone)]
pub struct ConnectedDevice {
    /// What the device registered with.
    pub info: DeviceInfo,
    /// Live transport handle.
    pub handle: PeerHandle,
}

/// Concurrent map from device id to its connection.
#[derive(Debug, Default)]
pub struct Registry {
    devices: DashMap<DeviceId, ConnectedDevice>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the connection for `info.id`.
    pub fn upsert(&self, info: DeviceInfo, handle: PeerHandle) -> Option<ConnectedDevice> {
        let id = info.id;
        let previous = self.devices.insert(id, ConnectedDevice { info, handle });

        tracing::debug!(
            "Registered connection: device={:?} (total: {})",
            id,
            self.devices.len()
        );
        previous
    }

    /// Remove and return the connection for `id`.
    pub fn remove(&self, id: &DeviceId) -> Option<ConnectedDevice> {
        let removed = self.devices.remove(id).map(|(_, device)| device);

        if removed.is_some() {
            tracing::debug!(
                "Unregistered connection: device={:?} (remaining: {})",
                id,
                self.devices.len()
            );
        }
        removed
    }

    /// Look up a connected device.
    pub fn lookup(&self, id: &DeviceId) -> Option<ConnectedDevice> {
        self.devices.get(id).map(|entry| entry.value().clone())
    }

    /// Point-in-time list of connected devices. Order is unspecified.
    pub fn snapshot(&self) -> Vec<DeviceInfo> {
        self.devices
            .iter()
            .map(|entry| entry.value().info.clone())
            .collect()
    }

    /// Handles of every connected device except `exclude`.
    pub fn recipients(&self, exclude: &DeviceId) -> Vec<(DeviceId, PeerHandle)> {
        self.devices
            .iter()
            .filter(|entry| entry.key() != exclude)
            .map(|entry| (*entry.key(), entry.value().handle.clone()))
            .collect()
    }

    /// Whether `id` is connected.
    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    /// Number of connected devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no devices are connected.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
