//! # link-types
//!
//! Wire format types for the devlink rendezvous and relay hub.
//!
//! This crate provides the types shared by the hub and its clients:
//! - [`DeviceId`], [`FileId`] - Identity types
//! - [`DeviceInfo`] - What a device announces when it registers
//! - [`Envelope`], [`Target`] - The routing unit exchanged over the duplex channel
//! - [`ErrorPayload`], [`FileOffer`] - Payloads the hub itself produces
//! - [`LinkError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;

pub use envelope::{message_type, Envelope, Target, BROADCAST_TARGET};
pub use error::LinkError;
pub use ids::{DeviceId, FileId};
pub use messages::{DeviceInfo, ErrorCode, ErrorPayload, FileOffer};
