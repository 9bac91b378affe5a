// ============================================
// File: crates/blemesh-core/src/lib.rs
// ============================================
//! # BLE Mesh Core - Protocol & Cryptography Library
//!
//! ## Creation Reason
//! Holds everything about the mesh that is pure computation: key
//! derivation, AES-CCM, and the wire formats of every layer. Nothing here
//! owns state or spawns tasks, so the node crate can drive it from a
//! single event loop and tests can drive it directly.
//!
//! ## Main Functionality
//!
//! ### Crypto Module ([`crypto`])
//! - `Key128` with constant-time comparison and zeroize-on-drop
//! - s1, k1, k2, k3, k4 key derivation on AES-CMAC
//! - `MeshCipher` trait with the AES-CCM implementation
//!
//! ### Protocol Module ([`protocol`])
//! - Network PDU encode/decode with privacy obfuscation
//! - Lower transport segmentation headers
//! - Access opcodes and configuration messages
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              blemesh-node                           │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   blemesh-core  ◄──     blemesh-bearer              │
//! │   You are here        │                             │
//! │         │             │                             │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             blemesh-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Guarantees
//! - **Confidentiality**: AES-CCM at the network and upper transport layers
//! - **Integrity**: NetMIC and TransMIC on every message
//! - **Privacy**: header obfuscation with the privacy key
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL cryptographic code uses audited RustCrypto implementations
//! - NEVER implement custom crypto primitives
//! - ALL keys MUST implement Zeroize for secure cleanup
//! - Test vectors come from the Mesh Profile sample data
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod error;
pub mod protocol;

// Re-export commonly used items
pub use crypto::{AesCcmCipher, Key128, MeshCipher, MicSize, NetworkKeys};
pub use error::{CoreError, Result};
pub use protocol::{
    AccessMessage, CompositionData, ConfigRequest, ConfigResponse, LowerPdu, NetworkPdu,
    Opcode, Status,
};
