// ============================================
// File: crates/blemesh-core/src/protocol/network.rs
// ============================================
//! # Network PDU
//!
//! ## Creation Reason
//! Builds and parses the outermost mesh PDU: header obfuscation with the
//! PrivacyKey and AES-CCM over destination + transport PDU with the
//! EncryptionKey.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────────────────────────┬───────────────────────┬────────┐
//! │ IVI|NID  │ CTL|TTL  SEQ(3)  SRC(2)      │ DST(2) TransportPDU   │ NetMIC │
//! │ 1 byte   │ obfuscated (6 bytes)         │ encrypted             │ 4 / 8  │
//! └──────────┴──────────────────────────────┴───────────────────────┴────────┘
//! PECB = e(PrivacyKey, 0x0000000000 || IV index || ciphertext[0..7])
//! obfuscated = header[1..7] XOR PECB[0..6]
//! ```
//!
//! ## Main Logical Flow
//! 1. Encode: seal DST||TransportPDU, derive PECB from the first 7
//!    ciphertext bytes, XOR the header
//! 2. Decode: derive PECB from the received ciphertext, recover the
//!    header, rebuild the nonce, open
//!
//! ## ⚠️ Important Note for Next Developer
//! - The NetMIC size is chosen by CTL, never by the caller
//! - Decode errors under a foreign key are normal; callers try all subnets
//!
//! ## Last Modified
//! v0.1.0 - Initial network PDU codec

use bytes::{BufMut, Bytes, BytesMut};

use blemesh_common::types::{Address, TTL_MAX};

use crate::crypto::ccm::network_nonce;
use crate::crypto::{AesCcmCipher, MeshCipher, MicSize, NetworkKeys, KEY_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Bytes before the encrypted part (IVI/NID + obfuscated header).
pub const NETWORK_HEADER_SIZE: usize = 7;

/// Largest network PDU on the advertising bearer.
pub const MAX_NETWORK_PDU_SIZE: usize = 29;

/// Smallest valid network PDU (access, one transport byte).
pub const MIN_NETWORK_PDU_SIZE: usize = 14;

/// Largest transport PDU for access messages (32-bit NetMIC).
pub const MAX_ACCESS_TRANSPORT_PDU: usize = 16;

/// Largest transport PDU for control messages (64-bit NetMIC).
pub const MAX_CONTROL_TRANSPORT_PDU: usize = 12;

// ============================================
// NetworkPdu
// ============================================

/// Plaintext view of a network PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPdu {
    /// Control (true) or access (false) message.
    pub ctl: bool,
    /// Time to live.
    pub ttl: u8,
    /// 24-bit sequence number.
    pub seq: u32,
    /// Source element address.
    pub src: Address,
    /// Destination address.
    pub dst: Address,
    /// Lower transport PDU.
    pub transport_pdu: Bytes,
}

impl NetworkPdu {
    /// NetMIC size implied by `ctl`.
    #[must_use]
    pub const fn mic_size(&self) -> MicSize {
        MicSize::from_flag(self.ctl)
    }

    /// Largest transport PDU this message kind may carry.
    #[must_use]
    pub const fn max_transport_len(ctl: bool) -> usize {
        if ctl {
            MAX_CONTROL_TRANSPORT_PDU
        } else {
            MAX_ACCESS_TRANSPORT_PDU
        }
    }
}

// ============================================
// NetworkCodec
// ============================================

/// Seals and opens network PDUs with a `MeshCipher`.
#[derive(Debug, Default, Clone)]
pub struct NetworkCodec<C: MeshCipher = AesCcmCipher> {
    cipher: C,
}

impl NetworkCodec<AesCcmCipher> {
    /// Creates a codec backed by the software cipher.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cipher: AesCcmCipher::new(),
        }
    }
}

impl<C: MeshCipher> NetworkCodec<C> {
    /// Creates a codec with a custom cipher backend.
    pub const fn with_cipher(cipher: C) -> Self {
        Self { cipher }
    }

    /// Returns the IVI bit and NID of a raw PDU without decrypting it.
    ///
    /// # Errors
    /// `PduTooShort` for PDUs below the minimum size.
    pub fn peek_ivi_nid(raw: &[u8]) -> Result<(u8, u8)> {
        if raw.len() < MIN_NETWORK_PDU_SIZE {
            return Err(CoreError::too_short(MIN_NETWORK_PDU_SIZE, raw.len()));
        }
        Ok((raw[0] >> 7, raw[0] & 0x7F))
    }

    fn pecb(&self, keys: &NetworkKeys, iv_index: u32, privacy_random: &[u8]) -> [u8; KEY_SIZE] {
        let mut block = [0u8; KEY_SIZE];
        block[5..9].copy_from_slice(&iv_index.to_be_bytes());
        block[9..16].copy_from_slice(&privacy_random[..7]);
        self.cipher.ecb(&keys.privacy_key, &block)
    }

    /// Encrypts and obfuscates `pdu` under `keys`.
    ///
    /// # Errors
    /// - `PduTooLarge`: transport PDU exceeds the bearer limit
    /// - `MalformedPdu`: empty transport PDU or TTL above 127
    pub fn encode(&self, pdu: &NetworkPdu, keys: &NetworkKeys, iv_index: u32) -> Result<Bytes> {
        let max = NetworkPdu::max_transport_len(pdu.ctl);
        if pdu.transport_pdu.len() > max {
            return Err(CoreError::too_large(max, pdu.transport_pdu.len()));
        }
        if pdu.transport_pdu.is_empty() {
            return Err(CoreError::malformed("empty transport PDU"));
        }
        if pdu.ttl > TTL_MAX {
            return Err(CoreError::malformed(format!("ttl {} above 127", pdu.ttl)));
        }

        let mut plaintext = BytesMut::with_capacity(2 + pdu.transport_pdu.len());
        plaintext.put_u16(pdu.dst.value());
        plaintext.put_slice(&pdu.transport_pdu);

        let nonce = network_nonce(pdu.ctl, pdu.ttl, pdu.seq, pdu.src.value(), iv_index);
        let sealed = self
            .cipher
            .seal(&keys.encryption_key, &nonce, &plaintext, &[], pdu.mic_size())?;

        let mut header = [0u8; 6];
        header[0] = (u8::from(pdu.ctl) << 7) | pdu.ttl;
        header[1..4].copy_from_slice(&pdu.seq.to_be_bytes()[1..]);
        header[4..6].copy_from_slice(&pdu.src.to_be_bytes());

        let pecb = self.pecb(keys, iv_index, &sealed);
        for (byte, pad) in header.iter_mut().zip(pecb.iter()) {
            *byte ^= pad;
        }

        let mut out = BytesMut::with_capacity(NETWORK_HEADER_SIZE + sealed.len());
        out.put_u8((((iv_index & 1) as u8) << 7) | keys.nid);
        out.put_slice(&header);
        out.put_slice(&sealed);
        Ok(out.freeze())
    }

    /// Deobfuscates and decrypts `raw` under `keys`.
    ///
    /// # Errors
    /// - `PduTooShort` / `PduTooLarge`: length outside bearer limits
    /// - `AuthenticationFailed`: NID mismatch or NetMIC failure
    pub fn decode(&self, raw: &[u8], keys: &NetworkKeys, iv_index: u32) -> Result<NetworkPdu> {
        let (_, nid) = Self::peek_ivi_nid(raw)?;
        if raw.len() > MAX_NETWORK_PDU_SIZE {
            return Err(CoreError::too_large(MAX_NETWORK_PDU_SIZE, raw.len()));
        }
        if nid != keys.nid {
            return Err(CoreError::net_auth());
        }

        let pecb = self.pecb(keys, iv_index, &raw[NETWORK_HEADER_SIZE..]);
        let mut header = [0u8; 6];
        for (i, byte) in header.iter_mut().enumerate() {
            *byte = raw[1 + i] ^ pecb[i];
        }

        let ctl = header[0] & 0x80 != 0;
        let ttl = header[0] & 0x7F;
        let seq = u32::from_be_bytes([0, header[1], header[2], header[3]]);
        let src = Address::new(u16::from_be_bytes([header[4], header[5]]));

        let mic = MicSize::from_flag(ctl);
        // DST plus at least one transport byte
        if raw.len() < NETWORK_HEADER_SIZE + 3 + mic.len() {
            return Err(CoreError::too_short(NETWORK_HEADER_SIZE + 3 + mic.len(), raw.len()));
        }

        let nonce = network_nonce(ctl, ttl, seq, src.value(), iv_index);
        let plaintext = self
            .cipher
            .open(&keys.encryption_key, &nonce, &raw[NETWORK_HEADER_SIZE..], &[], mic)
            .map_err(|_| CoreError::net_auth())?;

        let dst = Address::new(u16::from_be_bytes([plaintext[0], plaintext[1]]));
        Ok(NetworkPdu {
            ctl,
            ttl,
            seq,
            src,
            dst,
            transport_pdu: Bytes::copy_from_slice(&plaintext[2..]),
        })
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Key128;
    use proptest::prelude::*;

    fn keys() -> NetworkKeys {
        NetworkKeys::derive(&Key128::from_hex("7dd7364cd842ad18c17c2b820c84c3d6").unwrap())
    }

    fn sample(ctl: bool) -> NetworkPdu {
        NetworkPdu {
            ctl,
            ttl: 4,
            seq: 0x0000_3129,
            src: Address::new(0x0003),
            dst: Address::new(0x1201),
            transport_pdu: Bytes::from_static(&[0x03, 0x04, 0x00, 0x00, 0x00]),
        }
    }

    #[test]
    fn test_encode_decode_access() {
        let codec = NetworkCodec::new();
        let keys = keys();
        let pdu = sample(false);

        let wire = codec.encode(&pdu, &keys, 0x1234_5678).unwrap();
        assert_eq!(wire.len(), NETWORK_HEADER_SIZE + 2 + 5 + 4);
        assert_eq!(wire[0] & 0x7F, keys.nid);
        assert_eq!(wire[0] >> 7, 0);

        let decoded = codec.decode(&wire, &keys, 0x1234_5678).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn test_encode_decode_control_uses_long_mic() {
        let codec = NetworkCodec::new();
        let keys = keys();
        let pdu = sample(true);

        let wire = codec.encode(&pdu, &keys, 1).unwrap();
        assert_eq!(wire.len(), NETWORK_HEADER_SIZE + 2 + 5 + 8);
        assert_eq!(wire[0] >> 7, 1);
        assert_eq!(codec.decode(&wire, &keys, 1).unwrap(), pdu);
    }

    #[test]
    fn test_header_is_obfuscated() {
        let codec = NetworkCodec::new();
        let wire = codec.encode(&sample(false), &keys(), 0).unwrap();
        // plaintext SRC would be 00 03 at offset 5
        assert_ne!(&wire[1..7], &[0x04, 0x00, 0x31, 0x29, 0x00, 0x03]);
    }

    #[test]
    fn test_decode_rejects_wrong_key() {
        let codec = NetworkCodec::new();
        let wire = codec.encode(&sample(false), &keys(), 0).unwrap();
        let mut other = NetworkKeys::derive(&Key128::generate());
        other.nid = keys().nid;
        let err = codec.decode(&wire, &other, 0).unwrap_err();
        assert!(err.is_silent_drop());
    }

    #[test]
    fn test_decode_rejects_wrong_iv_index() {
        let codec = NetworkCodec::new();
        let wire = codec.encode(&sample(false), &keys(), 5).unwrap();
        assert!(codec.decode(&wire, &keys(), 6).is_err());
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let codec = NetworkCodec::new();
        let mut pdu = sample(true);
        pdu.transport_pdu = Bytes::from(vec![0u8; MAX_CONTROL_TRANSPORT_PDU + 1]);
        assert!(matches!(
            codec.encode(&pdu, &keys(), 0),
            Err(CoreError::PduTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_short() {
        let codec = NetworkCodec::new();
        assert!(matches!(
            codec.decode(&[0u8; 10], &keys(), 0),
            Err(CoreError::PduTooShort { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_network_roundtrip(
            ctl in any::<bool>(),
            ttl in 0u8..=127,
            seq in 0u32..=0x00FF_FFFF,
            src in 1u16..=0x7FFF,
            dst in 1u16..=0xFFFF,
            iv in any::<u32>(),
            body in proptest::collection::vec(any::<u8>(), 1..=12),
        ) {
            let codec = NetworkCodec::new();
            let keys = keys();
            let pdu = NetworkPdu {
                ctl,
                ttl,
                seq,
                src: Address::new(src),
                dst: Address::new(dst),
                transport_pdu: Bytes::from(body),
            };
            let wire = codec.encode(&pdu, &keys, iv).unwrap();
            prop_assert_eq!(codec.decode(&wire, &keys, iv).unwrap(), pdu);
        }
    }
}
