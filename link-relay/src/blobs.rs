//! Ephemeral file store.
//!
//! Uploaded files wait here until the first download, which removes them.
//! Files nobody downloads are dropped after the configured TTL.

use crate::error::{HubError, HubResult};
use dashmap::DashMap;
use link_types::{DeviceId, FileId};
use std::time::{Duration, Instant};

/// An uploaded file.
#[derive(Debug, Clone)]
pub struct FileBlob {
    /// Hub-assigned id.
    pub id: FileId,
    /// Original file name.
    pub name: String,
    /// Content type given by the uploader.
    pub content_type: String,
    /// File contents.
    pub bytes: Vec<u8>,
    /// Device that uploaded the file.
    pub sender_id: DeviceId,
    stored_at: Instant,
}

/// Concurrent map from file id to blob, consumed at most once.
#[derive(Debug)]
pub struct BlobStore {
    files: DashMap<FileId, FileBlob>,
    max_size: usize,
    ttl: Duration,
}

impl BlobStore {
    /// Create an empty store.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            files: DashMap::new(),
            max_size,
            ttl,
        }
    }

    /// Maximum accepted file size in bytes.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Store a file and return its fresh id.
    pub fn put(
        &self,
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
        sender_id: DeviceId,
    ) -> HubResult<FileId> {
        if bytes.len() > self.max_size {
            return Err(HubError::FileTooLarge {
                size: bytes.len(),
                limit: self.max_size,
            });
        }

        let id = FileId::new();
        let blob = FileBlob {
            id,
            name: name.into(),
            content_type: content_type.into(),
            bytes,
            sender_id,
            stored_at: Instant::now(),
        };

        tracing::debug!(
            "Stored file {:?} '{}' ({} bytes) from {:?}",
            id,
            blob.name,
            blob.bytes.len(),
            sender_id
        );
        self.files.insert(id, blob);
        Ok(id)
    }

    /// Remove and return the file. A second call for the same id returns `None`.
    pub fn take(&self, id: &FileId) -> Option<FileBlob> {
        self.files
            .remove(id)
            .map(|(_, blob)| blob)
            .filter(|blob| blob.stored_at.elapsed() < self.ttl)
    }

    /// Drop files older than the TTL. Returns how many were removed.
    pub fn expire(&self) -> usize {
        let before = self.files.len();
        self.files
            .retain(|_, blob| blob.stored_at.elapsed() < self.ttl);
        before.saturating_sub(self.files.len())
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total bytes held.
    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|entry| entry.value().bytes.len()).sum()
    }
}
