//! Rate limiting for devlink-relay.
//!
//! Provides protection against registration flooding and message spam:
//! - **DeviceId** keyed limiter for relayed messages
//! - a global limiter for `/api/register`
//!
//! Both use the governor crate; the keyed one is backed by DashMap.
//! A quota of zero disables the corresponding limiter.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use link_types::DeviceId;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the hub.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits relayed messages per device.
    ///
    /// Configured via `limits.messages_per_minute`.
    message_limiter: Option<Arc<KeyedLimiter<DeviceId>>>,

    /// Limits registrations across all clients.
    ///
    /// Configured via `limits.registrations_per_second`.
    registration_limiter: Option<Arc<DirectLimiter>>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("message_limiter", &self.message_limiter.is_some())
            .field("registration_limiter", &self.registration_limiter.is_some())
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    pub fn new(config: &LimitsConfig) -> Self {
        let message_limiter = NonZeroU32::new(config.messages_per_minute)
            .map(|per_minute| Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))));

        let registration_limiter = NonZeroU32::new(config.registrations_per_second)
            .map(|per_second| Arc::new(RateLimiter::direct(Quota::per_second(per_second))));

        Self {
            message_limiter,
            registration_limiter,
        }
    }

    /// Check if `device_id` may relay another message.
    pub fn check_message(&self, device_id: &DeviceId) -> Result<(), RateLimitError> {
        match &self.message_limiter {
            Some(limiter) => limiter
                .check_key(device_id)
                .map_err(|_| RateLimitError::MessageLimitExceeded),
            None => Ok(()),
        }
    }

    /// Check if another registration is allowed.
    pub fn check_registration(&self) -> Result<(), RateLimitError> {
        match &self.registration_limiter {
            Some(limiter) => limiter
                .check()
                .map_err(|_| RateLimitError::RegistrationLimitExceeded),
            None => Ok(()),
        }
    }

    /// Get the number of tracked message keys (for metrics).
    pub fn message_keys_count(&self) -> usize {
        self.message_limiter
            .as_ref()
            .map(|limiter| limiter.len())
            .unwrap_or(0)
    }

    /// Evict idle devices from the keyed limiter.
    ///
    /// `retain_recent()` removes entries whose cells have fully recharged.
    /// Called periodically from the cleanup task.
    pub fn shrink(&self) {
        if let Some(limiter) = &self.message_limiter {
            limiter.retain_recent();
        }
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many messages from this device.
    #[error("message rate limit exceeded")]
    MessageLimitExceeded,
    /// Too many registrations across all clients.
    #[error("registration rate limit exceeded")]
    RegistrationLimitExceeded,
}
