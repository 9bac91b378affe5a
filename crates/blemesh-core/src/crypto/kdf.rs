// ============================================
// File: crates/blemesh-core/src/crypto/kdf.rs
// ============================================
//! # Key Derivation Functions
//!
//! ## Main Functionality
//! - `aes_cmac`: AES-CMAC over a list of message parts
//! - `s1`: salt generation, `s1(M) = AES-CMAC(0^128, M)`
//! - `k1`: generic derivation, `AES-CMAC(AES-CMAC(salt, N), P)`
//! - `k2`: NID / EncryptionKey / PrivacyKey
//! - `k3`: 64-bit Network ID
//! - `k4`: 6-bit AID
//! - `virtual_address`: label UUID hash
//!
//! ## Last Modified
//! v0.1.0 - Initial mesh key derivation

use aes::cipher::generic_array::GenericArray;
use aes::Aes128;
use cmac::{Cmac, Mac};

use super::keys::Key128;
use super::KEY_SIZE;

// ============================================
// Primitives
// ============================================

/// AES-CMAC of the concatenation of `parts` under `key`.
#[must_use]
pub fn aes_cmac(key: &[u8; KEY_SIZE], parts: &[&[u8]]) -> [u8; KEY_SIZE] {
    let mut mac = <Cmac<Aes128> as Mac>::new(GenericArray::from_slice(key));
    for part in parts {
        mac.update(part);
    }
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; KEY_SIZE];
    out.copy_from_slice(&tag);
    out
}

/// Salt generation function.
#[must_use]
pub fn s1(m: &[u8]) -> [u8; KEY_SIZE] {
    aes_cmac(&[0u8; KEY_SIZE], &[m])
}

// ============================================
// k-functions
// ============================================

/// Derives a key from `n` using `salt` and `p`.
#[must_use]
pub fn k1(n: &[u8], salt: &[u8; KEY_SIZE], p: &[u8]) -> Key128 {
    let t = aes_cmac(salt, &[n]);
    Key128::from_bytes(aes_cmac(&t, &[p]))
}

/// Network key material derivation.
///
/// Returns `(nid, encryption_key, privacy_key)`.
///
/// ```text
/// T  = AES-CMAC(s1("smk2"), N)
/// T1 = AES-CMAC(T, P || 0x01)
/// T2 = AES-CMAC(T, T1 || P || 0x02)
/// T3 = AES-CMAC(T, T2 || P || 0x03)
/// NID = T1[15] & 0x7F, EncryptionKey = T2, PrivacyKey = T3
/// ```
#[must_use]
pub fn k2(n: &[u8; KEY_SIZE], p: &[u8]) -> (u8, Key128, Key128) {
    let t = aes_cmac(&s1(b"smk2"), &[n]);
    let t1 = aes_cmac(&t, &[p, &[0x01]]);
    let t2 = aes_cmac(&t, &[&t1, p, &[0x02]]);
    let t3 = aes_cmac(&t, &[&t2, p, &[0x03]]);
    (t1[15] & 0x7F, Key128::from_bytes(t2), Key128::from_bytes(t3))
}

/// Derives the public 64-bit Network ID.
#[must_use]
pub fn k3(n: &[u8; KEY_SIZE]) -> [u8; 8] {
    let t = aes_cmac(&s1(b"smk3"), &[n]);
    let full = aes_cmac(&t, &[b"id64", &[0x01]]);
    let mut out = [0u8; 8];
    out.copy_from_slice(&full[8..]);
    out
}

/// Derives the 6-bit application key identifier.
#[must_use]
pub fn k4(n: &[u8; KEY_SIZE]) -> u8 {
    let t = aes_cmac(&s1(b"smk4"), &[n]);
    let full = aes_cmac(&t, &[b"id6", &[0x01]]);
    full[15] & 0x3F
}

/// Hashes a 128-bit label UUID into a virtual address.
#[must_use]
pub fn virtual_address(label: &[u8; KEY_SIZE]) -> u16 {
    let hash = aes_cmac(&s1(b"vtad"), &[label]);
    (u16::from_be_bytes([hash[14], hash[15]]) & 0x3FFF) | 0x8000
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn h16(s: &str) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&hex::decode(s).unwrap());
        out
    }

    #[test]
    fn test_s1_vector() {
        assert_eq!(hex::encode(s1(b"test")), "b73cefbd641ef2ea598c2b6efb62f79c");
    }

    #[test]
    fn test_k1_vector() {
        let n = h16("3216d1509884b533248541792b877f98");
        let salt = h16("2ba14ffa0df84a2831938d57d276cab4");
        let p = hex::decode("5a09d60797eeb4478aada59db3352a0d").unwrap();
        let key = k1(&n, &salt, &p);
        assert_eq!(hex::encode(key.as_bytes()), "f6ed15a8934afbe7d83e8dcb57fcf5d7");
    }

    #[test]
    fn test_k2_vector() {
        let n = h16("f7a2a44f8e8a8029064f173ddc1e2b00");
        let (nid, enc, privacy) = k2(&n, &[0x00]);
        assert_eq!(nid, 0x7f);
        assert_eq!(hex::encode(enc.as_bytes()), "9f589181a0f50de73c8070c7a6d27f46");
        assert_eq!(hex::encode(privacy.as_bytes()), "4c715bd4a64b938f99b453351653124f");
    }

    #[test]
    fn test_k3_vector() {
        let n = h16("f7a2a44f8e8a8029064f173ddc1e2b00");
        assert_eq!(hex::encode(k3(&n)), "ff046958233db014");
    }

    #[test]
    fn test_k4_vector() {
        let n = h16("3216d1509884b533248541792b877f98");
        assert_eq!(k4(&n), 0x38);
    }

    #[test]
    fn test_virtual_address_range() {
        let label = h16("0073e7e4d8b9440faf8415df4c56c0e1");
        let addr = virtual_address(&label);
        assert_eq!(addr, 0xb529);
        assert_eq!(addr & 0xC000, 0x8000);
    }
}
