// ============================================
// File: crates/blemesh-node/src/handlers/mod.rs
// ============================================
//! # Protocol Handlers
//!
//! ## Creation Reason
//! PDU processing of the node, layer by layer, kept synchronous so the
//! whole stack can be driven by tests without a runtime.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`network`]: Network PDU open/seal, message cache, relay, replay
//! - [`transport`]: Upper transport crypto, SAR transmitter and receiver
//! - [`access`]: Opcode dispatch, `Model` trait, Configuration Server entry
//! - [`pipeline`]: The three layers chained, config outcomes applied
//!
//! ## Handler Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Pipeline                             │
//! │                                                             │
//! │   raw PDU                                        Outbox     │
//! │     │                                              ▲        │
//! │     ▼                                              │        │
//! │  ┌──────────────┐  relay ─────────────────────────┤        │
//! │  │ NetworkLayer │                                  │        │
//! │  └──────┬───────┘                                  │        │
//! │         ▼                                          │        │
//! │  ┌────────────────┐  acks, segments, timers ───────┤        │
//! │  │ TransportLayer │                                │        │
//! │  └──────┬─────────┘                                │        │
//! │         ▼                                          │        │
//! │  ┌──────────────┐   replies, persist, notify ──────┘        │
//! │  │ AccessLayer  │──▶ ConfigServer / Model                   │
//! │  └──────────────┘                                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Handlers own no node state; everything goes through `MeshContext`
//! - Crypto and replay failures are expected and must stay quiet
//!
//! ## Last Modified
//! v0.1.0 - Initial handlers structure

pub mod access;
pub mod network;
pub mod pipeline;
pub mod transport;

// Re-export primary types
pub use access::{AccessAction, AccessLayer, Model};
pub use network::{NetworkLayer, ReceivedPdu};
pub use pipeline::Pipeline;
pub use transport::{MessageContext, Security, SendRequest, TransportLayer, UpperMessage};
