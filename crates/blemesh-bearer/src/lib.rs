// ============================================
// File: crates/blemesh-bearer/src/lib.rs
// ============================================
//! # BLE Mesh Bearer - Collaborator Interfaces
//!
//! ## Creation Reason
//! Separates the mesh node from the things it does not own: the link that
//! carries network PDUs and the storage that keeps keys across restarts.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `Bearer` and `Persistence` traits, stored record types
//! - [`udp`]: UDP datagram bearer for running nodes on hosts
//! - [`store`]: JSON file persistence
//! - [`mock`]: in-memory bearer and store for tests
//! - [`error`]: bearer and storage errors
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              blemesh-node                           │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   blemesh-core         blemesh-bearer               │
//! │                        You are here ◄──             │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             blemesh-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always go through the traits so the node stays testable
//! - `send_raw` transmits once; repetition is the node's job
//!
//! ## Last Modified
//! v0.1.0 - Initial bearer layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod mock;
pub mod store;
pub mod traits;
pub mod udp;

// Re-export primary types
pub use error::{BearerError, Result};
pub use mock::{MemoryStore, MockBearer};
pub use store::JsonFileStore;
pub use traits::{
    AppKeyRecord, Bearer, HeartbeatPubRecord, ModelRecord, NodeStateRecord, Persistence,
    ReplayRecord, SequenceRecord, StoredState, SubnetRecord, MAX_PDU_SIZE,
};
pub use udp::UdpBearer;
