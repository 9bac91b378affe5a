// ============================================
// File: crates/blemesh-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Wire formats of the mesh stack, from the obfuscated network PDU down to
//! configuration message parameters.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`network`]: Network PDU encryption, obfuscation and header parsing
//! - [`lower`]: Lower transport PDUs, segmentation headers, SegmentAck and Heartbeat
//! - [`access`]: Opcodes and access payloads
//! - [`config`]: Configuration Server requests and status replies
//! - [`composition`]: Composition Data page 0
//! - [`codec`]: Shared `Codec` trait and buffer helpers
//!
//! ## Layering
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ access / config     opcode || params         │
//! ├──────────────────────────────────────────────┤
//! │ upper transport     AES-CCM with app/dev key │
//! ├──────────────────────────────────────────────┤
//! │ lower               SEG/AKF/AID, SeqZero...  │
//! ├──────────────────────────────────────────────┤
//! │ network             IVI/NID, obfuscated hdr  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format Principles
//! - Network and lower transport headers are big-endian
//! - Access parameters are little-endian
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod access;
pub mod codec;
pub mod composition;
pub mod config;
pub mod lower;
pub mod network;

// Re-export primary types
pub use access::{AccessCodec, AccessMessage, Opcode, MAX_ACCESS_PAYLOAD};
pub use codec::Codec;
pub use composition::{CompositionCodec, CompositionData, ElementDescriptor, VendorModel};
pub use config::{ConfigRequest, ConfigResponse, Status};
pub use lower::{HeartbeatMessage, LowerCodec, LowerPdu, SegmentAck, SegmentInfo};
pub use network::{NetworkCodec, NetworkPdu};
