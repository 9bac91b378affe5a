// ============================================
// File: crates/blemesh-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Centralizes all cryptographic operations of the mesh node on top of
//! audited RustCrypto implementations (AES-128, AES-CMAC, AES-CCM).
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`keys`]: `Key128` and the derived `NetworkKeys`
//! - [`kdf`]: s1, k1, k2, k3, k4 and virtual address hashing
//! - [`ccm`]: AES-CCM seal/open, ECB and nonce construction
//!
//! ## Cryptographic Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Upper Transport                           │
//! │   AppKey/DevKey + app/dev nonce ──► AES-CCM ──► TransMIC    │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Network                               │
//! │   EncryptionKey + net nonce ──► AES-CCM ──► NetMIC          │
//! │   PrivacyKey + ciphertext[0..7] ──► AES-ECB ──► obfuscation │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL implementations use RustCrypto
//! - ALL key types implement Zeroize
//! - Test vectors come from the published mesh sample data
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto implementation

pub mod ccm;
pub mod kdf;
pub mod keys;

pub use self::ccm::{AesCcmCipher, MeshCipher, MicSize};
pub use keys::{Key128, NetworkKeys};

// ============================================
// Constants
// ============================================

/// Size of every mesh key in bytes.
pub const KEY_SIZE: usize = 16;

/// Size of an AES-CCM nonce in bytes.
pub const NONCE_SIZE: usize = 13;
