// ============================================
// File: crates/blemesh-node/src/lib.rs
// ============================================
//! # Mesh Node Library
//!
//! ## Creation Reason
//! Security and relay core of a mesh node: everything between the raw
//! PDUs on a bearer and the access models of the application.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: TOML node configuration
//! - [`context`]: `MeshContext`, the whole mutable state of one node
//! - [`services`]: Key store, replay list, elements, heartbeat,
//!   configuration server
//! - [`handlers`]: Network, transport and access layers
//! - [`effects`]: Side effects produced by the layers
//! - [`node`]: The async node task and its handle
//! - [`error`]: Node error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          MeshNode                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐    │
//! │  │ NodeConfig  │────►│ MeshContext │◄────│    Pipeline     │    │
//! │  └─────────────┘     └──────┬──────┘     │ net/trans/access│    │
//! │                             │            └────────┬────────┘    │
//! │         ┌───────────────────┼───────────────────┬─┘             │
//! │         ▼                   ▼                   ▼               │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐        │
//! │  │  KeyStore   │     │ElementTable │     │  Heartbeat  │        │
//! │  └─────────────┘     └─────────────┘     └─────────────┘        │
//! │                                                                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │         Bearer (send_raw / recv)      Persistence (store/load)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//! Bearer → Network (decrypt, relay) → Transport (reassemble, decrypt) → Access → Model
//! Bearer ← Network (encrypt)        ← Transport (encrypt, segment)    ← Access ← Model
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - One task owns all security state; talk to it through `NodeHandle`
//! - Authentication and replay failures are dropped without a trace above
//!   `trace` level
//!
//! ## Last Modified
//! v0.1.0 - Initial node library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod effects;
pub mod error;
pub mod handlers;
pub mod node;
pub mod services;

// Re-export primary types
pub use config::NodeConfig;
pub use context::MeshContext;
pub use effects::{DeliveryFailure, NodeNotification};
pub use error::{NodeError, Result};
pub use handlers::{MessageContext, Model, Security, SendRequest};
pub use node::{MeshNode, NodeHandle};
pub use services::{HeartbeatPublication, HeartbeatReport};
