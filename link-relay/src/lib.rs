//! # devlink-relay
//!
//! Rendezvous and relay hub for devices that cannot reach each other directly.
//!
//! This crate implements a hub that:
//! - Registers devices over HTTP and bridges each registration to exactly
//!   one WebSocket upgrade
//! - Relays opaque JSON envelopes between connected devices
//! - Broadcasts connect/disconnect lifecycle events to everyone else
//! - Holds uploaded files until their first download
//!
//! ## Architecture
//!
//! ```text
//! Device A ──┐                      ┌── Device B
//!            │   WebSocket /ws      │
//!            ├─────────────────────►│
//!            │                      │
//!        ┌───┴──────────────────────┴───┐
//!        │         devlink-relay        │
//!        │  Ledger ─► Registry ─► Blobs │
//!        └──────────────────────────────┘
//! ```
//!
//! ## Handshake
//!
//! `POST /api/register` puts the device in the ledger (pending).
//! `GET /ws?uuid=<id>` claims the entry and moves the device into the
//! registry (connected). Closing the socket removes it again.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blobs;
pub mod broadcast;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod hub;
pub mod ledger;
pub mod limits;
pub mod peer;
pub mod registry;
pub mod router;
pub mod session;

pub use config::Config;
pub use error::{HubError, HubResult};
pub use hub::Hub;
