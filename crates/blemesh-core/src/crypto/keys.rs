// ============================================
// File: crates/blemesh-core/src/crypto/keys.rs
// ============================================
//! # Key Types
//!
//! ## Creation Reason
//! Wraps raw 128-bit mesh keys so they are zeroed on drop, never printed,
//! and compared in constant time.
//!
//! ## Main Functionality
//! - `Key128`: NetKey / AppKey / DevKey / derived key material
//! - `NetworkKeys`: everything derived from one NetKey
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  NetKey (16 bytes, distributed by the provisioner)         │
//! │  ├─ k2(N, 0x00) ─► NID, EncryptionKey, PrivacyKey          │
//! │  ├─ k3(N)       ─► Network ID                              │
//! │  ├─ k1(N, "nkbk") ─► BeaconKey                             │
//! │  └─ k1(N, "nkik") ─► IdentityKey                           │
//! │                                                            │
//! │  AppKey (16 bytes)                                         │
//! │  └─ k4(A)       ─► AID (6 bits)                            │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL key types MUST implement Zeroize
//! - Never log `as_bytes()`; use `Debug` which is redacted
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;

use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::kdf;
use super::KEY_SIZE;
use crate::error::{CoreError, Result};

// ============================================
// Key128
// ============================================

/// A 128-bit symmetric key.
///
/// # Security
/// - Zeroed on drop
/// - Never logged
/// - Constant-time comparison
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Key128([u8; KEY_SIZE]);

impl Key128 {
    /// Creates a key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a key from a slice of exactly 16 bytes.
    ///
    /// # Errors
    /// Returns `PduTooShort` / `PduTooLarge` when the slice length is wrong.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            if bytes.len() < KEY_SIZE {
                CoreError::too_short(KEY_SIZE, bytes.len())
            } else {
                CoreError::too_large(KEY_SIZE, bytes.len())
            }
        })?;
        Ok(Self(arr))
    }

    /// Parses a 32-character hex string.
    ///
    /// # Errors
    /// Returns `MalformedPdu` if the string is not valid hex of the right length.
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = hex::decode(s.trim())
            .map_err(|e| CoreError::malformed(format!("key hex: {e}")))?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }

    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns the raw key bytes.
    ///
    /// # Security Warning
    /// Do not log or persist the returned bytes in unprotected storage.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Key128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key128([REDACTED])")
    }
}

impl PartialEq for Key128 {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Key128 {}

// ============================================
// NetworkKeys
// ============================================

/// Keys and identifiers derived from a single NetKey.
#[derive(Clone, Debug)]
pub struct NetworkKeys {
    /// The NetKey itself.
    pub net_key: Key128,
    /// 7-bit network identifier carried in the first PDU byte.
    pub nid: u8,
    /// 64-bit public network identifier.
    pub network_id: [u8; 8],
    /// AES-CCM key for network PDUs.
    pub encryption_key: Key128,
    /// Obfuscation key.
    pub privacy_key: Key128,
    /// Secure network beacon authentication key.
    pub beacon_key: Key128,
    /// Node identity advertisement key.
    pub identity_key: Key128,
}

impl NetworkKeys {
    /// Derives every network-layer key from `net_key`.
    ///
    /// Deterministic.
    #[must_use]
    pub fn derive(net_key: &Key128) -> Self {
        let (nid, encryption_key, privacy_key) = kdf::k2(net_key.as_bytes(), &[0x00]);
        trace!(nid = format_args!("{nid:#04x}"), "Network keys derived");
        Self {
            net_key: net_key.clone(),
            nid,
            network_id: kdf::k3(net_key.as_bytes()),
            encryption_key,
            privacy_key,
            beacon_key: kdf::k1(net_key.as_bytes(), &kdf::s1(b"nkbk"), b"id128\x01"),
            identity_key: kdf::k1(net_key.as_bytes(), &kdf::s1(b"nkik"), b"id128\x01"),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_debug_redacted() {
        let key = Key128::generate();
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains(&hex::encode(key.as_bytes())));
    }

    #[test]
    fn test_key_from_hex() {
        let key = Key128::from_hex("7dd7364cd842ad18c17c2b820c84c3d6").unwrap();
        assert_eq!(key.as_bytes()[0], 0x7d);
        assert_eq!(key.as_bytes()[15], 0xd6);

        assert!(Key128::from_hex("7dd7").is_err());
        assert!(Key128::from_hex("zz").is_err());
    }

    #[test]
    fn test_key_equality() {
        let a = Key128::from_bytes([1u8; 16]);
        let b = Key128::from_bytes([1u8; 16]);
        let c = Key128::from_bytes([2u8; 16]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_network_keys_derivation() {
        let net_key = Key128::from_hex("f7a2a44f8e8a8029064f173ddc1e2b00").unwrap();
        let keys = NetworkKeys::derive(&net_key);
        assert_eq!(keys.nid, 0x7f);
        assert_eq!(
            hex::encode(keys.encryption_key.as_bytes()),
            "9f589181a0f50de73c8070c7a6d27f46"
        );
        assert_eq!(
            hex::encode(keys.privacy_key.as_bytes()),
            "4c715bd4a64b938f99b453351653124f"
        );
        assert_eq!(hex::encode(keys.network_id), "ff046958233db014");
    }
}
