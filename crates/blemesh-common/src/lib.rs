// ============================================
// File: crates/blemesh-common/src/lib.rs
// ============================================
//! # BLE Mesh Common - Shared Types Library
//!
//! ## Creation Reason
//! Provides the small value types every layer of the mesh node agrees on:
//! addresses, key indexes, the IV index, model identifiers and the
//! log/step encodings used by configuration messages.
//!
//! ## Main Functionality
//! - [`types`]: Addresses, key indexes, IV index, model ids, feature bits
//! - [`time`]: Transmit parameters, publish periods, heartbeat log encodings
//! - [`error`]: Common error types and result aliases
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               blemesh-node                          │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   blemesh-core         blemesh-bearer               │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             blemesh-common  ◄── You are here        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate is the foundation - changes affect everything
//! - No key material lives here; secrets belong in `blemesh-core`
//! - Address ranges follow the mesh address map exactly
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, Result};
pub use types::{Address, AppKeyIndex, Features, IvIndex, ModelId, NetKeyIndex};
