// ============================================
// File: crates/blemesh-core/src/crypto/ccm.rs
// ============================================
//! # AES-CCM Sealing
//!
//! ## Creation Reason
//! Network PDUs and upper transport PDUs are both protected with AES-CCM
//! under a 13-byte nonce. Only the nonce layout and the MIC size differ.
//!
//! ## Main Functionality
//! - `MeshCipher`: Trait for seal/open/ECB operations
//! - `AesCcmCipher`: RustCrypto implementation
//! - Nonce builders for network, application and device nonces
//!
//! ## Nonce Layouts
//! ```text
//! network:     0x00 | CTL<<7|TTL | SEQ(3) | SRC(2) | 0x0000  | IV(4)
//! application: 0x01 | ASZMIC<<7  | SEQ(3) | SRC(2) | DST(2)  | IV(4)
//! device:      0x02 | ASZMIC<<7  | SEQ(3) | SRC(2) | DST(2)  | IV(4)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - A (key, nonce) pair must never repeat: the sequence number is the only
//!   thing that makes nonces unique
//! - Virtual destinations pass the label UUID as associated data
//!
//! ## Last Modified
//! v0.1.0 - Initial AES-CCM implementation

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit as BlockKeyInit};
use aes::Aes128;
use ccm::aead::{Aead, Payload};
use ccm::consts::{U13, U4, U8};
use ccm::Ccm;

use super::keys::Key128;
use super::{KEY_SIZE, NONCE_SIZE};
use crate::error::{CoreError, Result};

type Ccm32 = Ccm<Aes128, U4, U13>;
type Ccm64 = Ccm<Aes128, U8, U13>;

// ============================================
// MicSize
// ============================================

/// Length of the message integrity check appended by CCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicSize {
    /// 32-bit MIC.
    Short,
    /// 64-bit MIC.
    Long,
}

impl MicSize {
    /// Size in bytes.
    #[must_use]
    pub const fn len(self) -> usize {
        match self {
            Self::Short => 4,
            Self::Long => 8,
        }
    }

    /// Chooses the size from a "big MIC" flag (CTL or SZMIC).
    #[must_use]
    pub const fn from_flag(long: bool) -> Self {
        if long {
            Self::Long
        } else {
            Self::Short
        }
    }
}

// ============================================
// MeshCipher Trait
// ============================================

/// Symmetric primitives used by the network and transport layers.
///
/// # Purpose
/// Lets tests and alternative backends (hardware AES) replace the
/// software implementation.
pub trait MeshCipher: Send + Sync {
    /// Encrypts `plaintext` and appends the MIC.
    ///
    /// # Errors
    /// - `Encryption`: cipher failure (does not happen with valid inputs)
    fn seal(
        &self,
        key: &Key128,
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
        aad: &[u8],
        mic: MicSize,
    ) -> Result<Vec<u8>>;

    /// Verifies the trailing MIC and decrypts.
    ///
    /// # Errors
    /// - `AuthenticationFailed`: MIC mismatch or input shorter than the MIC
    fn open(
        &self,
        key: &Key128,
        nonce: &[u8; NONCE_SIZE],
        sealed: &[u8],
        aad: &[u8],
        mic: MicSize,
    ) -> Result<Vec<u8>>;

    /// Single-block AES-128 encryption, `e(key, block)`.
    fn ecb(&self, key: &Key128, block: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE];
}

// ============================================
// AesCcmCipher
// ============================================

/// Default software implementation on top of RustCrypto.
#[derive(Debug, Default, Clone)]
pub struct AesCcmCipher;

impl AesCcmCipher {
    /// Creates a new instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MeshCipher for AesCcmCipher {
    fn seal(
        &self,
        key: &Key128,
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
        aad: &[u8],
        mic: MicSize,
    ) -> Result<Vec<u8>> {
        let key = GenericArray::from_slice(key.as_bytes());
        let nonce = GenericArray::from_slice(nonce);
        let payload = Payload { msg: plaintext, aad };
        let sealed = match mic {
            MicSize::Short => Ccm32::new(key).encrypt(nonce, payload),
            MicSize::Long => Ccm64::new(key).encrypt(nonce, payload),
        };
        sealed.map_err(|_| CoreError::encryption("AES-CCM seal failed"))
    }

    fn open(
        &self,
        key: &Key128,
        nonce: &[u8; NONCE_SIZE],
        sealed: &[u8],
        aad: &[u8],
        mic: MicSize,
    ) -> Result<Vec<u8>> {
        if sealed.len() < mic.len() {
            return Err(CoreError::too_short(mic.len(), sealed.len()));
        }
        let key = GenericArray::from_slice(key.as_bytes());
        let nonce = GenericArray::from_slice(nonce);
        let payload = Payload { msg: sealed, aad };
        let opened = match mic {
            MicSize::Short => Ccm32::new(key).decrypt(nonce, payload),
            MicSize::Long => Ccm64::new(key).decrypt(nonce, payload),
        };
        opened.map_err(|_| CoreError::trans_auth())
    }

    fn ecb(&self, key: &Key128, block: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
        let cipher = <Aes128 as BlockKeyInit>::new(GenericArray::from_slice(key.as_bytes()));
        let mut buf = GenericArray::clone_from_slice(block);
        cipher.encrypt_block(&mut buf);
        let mut out = [0u8; KEY_SIZE];
        out.copy_from_slice(&buf);
        out
    }
}

// ============================================
// Nonces
// ============================================

fn put_seq(nonce: &mut [u8; NONCE_SIZE], seq: u32) {
    nonce[2..5].copy_from_slice(&seq.to_be_bytes()[1..]);
}

/// Network nonce.
#[must_use]
pub fn network_nonce(ctl: bool, ttl: u8, seq: u32, src: u16, iv_index: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0] = 0x00;
    nonce[1] = (u8::from(ctl) << 7) | (ttl & 0x7F);
    put_seq(&mut nonce, seq);
    nonce[5..7].copy_from_slice(&src.to_be_bytes());
    nonce[9..13].copy_from_slice(&iv_index.to_be_bytes());
    nonce
}

/// Application (0x01) or device (0x02) nonce.
#[must_use]
pub fn access_nonce(
    dev_key: bool,
    aszmic: bool,
    seq: u32,
    src: u16,
    dst: u16,
    iv_index: u32,
) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0] = if dev_key { 0x02 } else { 0x01 };
    nonce[1] = u8::from(aszmic) << 7;
    put_seq(&mut nonce, seq);
    nonce[5..7].copy_from_slice(&src.to_be_bytes());
    nonce[7..9].copy_from_slice(&dst.to_be_bytes());
    nonce[9..13].copy_from_slice(&iv_index.to_be_bytes());
    nonce
}

// ============================================
// Tests
// ============================================
