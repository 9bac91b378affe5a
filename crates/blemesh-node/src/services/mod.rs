// ============================================
// File: crates/blemesh-node/src/services/mod.rs
// ============================================
//! # Node Services
//!
//! ## Creation Reason
//! State owners of the node, separated from PDU processing so each can
//! be tested without a network stack.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`keystore`]: Subnets, application keys, key refresh
//! - [`replay`]: Replay protection list and network message cache
//! - [`elements`]: Elements, model bindings, subscriptions, publication
//! - [`heartbeat`]: Heartbeat publication and subscription
//! - [`config_server`]: Configuration Server state machine
//!
//! ## Service Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ConfigServer                            │
//! │        (request → status reply + StateChange list)          │
//! └──────┬──────────────────┬───────────────────┬───────────────┘
//!        │                  │                   │
//!        ▼                  ▼                   ▼
//! ┌─────────────┐   ┌───────────────┐   ┌──────────────┐
//! │  KeyStore   │   │ ElementTable  │   │  Heartbeat   │
//! │ NetKeys     │   │ bindings      │   │ publication  │
//! │ AppKeys     │   │ subscriptions │   │ subscription │
//! │ KR phases   │   │ publication   │   │              │
//! └─────────────┘   └───────────────┘   └──────────────┘
//!
//! ┌─────────────────────────────┐
//! │ ReplayList / MessageCache   │  (network layer only)
//! └─────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Services never perform I/O; storage writes come back as effects
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod config_server;
pub mod elements;
pub mod heartbeat;
pub mod keystore;
pub mod replay;

// Re-export primary types
pub use config_server::{ConfigOutcome, ConfigServer, StateChange};
pub use elements::{Element, ElementTable, ModelState, Publication, Subscription};
pub use heartbeat::{Heartbeat, HeartbeatPublication, HeartbeatReport, HeartbeatSubscription};
pub use keystore::{AppKey, KeyRefreshPhase, KeySlot, KeyStore, Subnet};
pub use replay::{MessageCache, ReplayList};
