// ============================================
// File: crates/blemesh-core/src/protocol/access.rs
// ============================================
//! # Access Messages
//!
//! ## Main Functionality
//! - `Opcode`: 1, 2 or 3 byte access opcode
//! - `AccessMessage` + `AccessCodec`: opcode followed by parameters
//!
//! ## Opcode Encoding
//! ```text
//! 0xxxxxxx                      1 byte  (0x7F reserved)
//! 10xxxxxx xxxxxxxx             2 bytes
//! 11xxxxxx CompanyID(LE16)      3 bytes (vendor)
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial access codec

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::codec::{ensure_remaining, Codec};
use crate::error::{CoreError, Result};

/// Largest access payload (32 segments x 12 bytes minus a 4 byte TransMIC).
pub const MAX_ACCESS_PAYLOAD: usize = 380;

// ============================================
// Opcode
// ============================================

/// Access layer opcode.
///
/// Stored as the value used by model tables: 1-byte opcodes as-is,
/// 2-byte opcodes big-endian, vendor opcodes as `byte0 << 16 | company`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(u32);

impl Opcode {
    /// Single-byte SIG opcode.
    #[must_use]
    pub const fn sig1(op: u8) -> Self {
        Self(op as u32)
    }

    /// Two-byte SIG opcode (`0x8000..=0xBFFF`).
    #[must_use]
    pub const fn sig2(op: u16) -> Self {
        Self(op as u32)
    }

    /// Three-byte vendor opcode.
    #[must_use]
    pub const fn vendor(op: u8, company: u16) -> Self {
        Self((((op | 0xC0) as u32) << 16) | company as u32)
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Encoded length in bytes.
    #[must_use]
    pub const fn len(self) -> usize {
        if self.0 < 0x7F {
            1
        } else if self.0 <= 0xFFFF {
            2
        } else {
            3
        }
    }

    /// Vendor company id, if this is a vendor opcode.
    #[must_use]
    pub const fn company(self) -> Option<u16> {
        if self.len() == 3 {
            Some(self.0 as u16)
        } else {
            None
        }
    }

    /// Writes the wire form.
    pub fn put(self, buf: &mut impl BufMut) {
        match self.len() {
            1 => buf.put_u8(self.0 as u8),
            2 => buf.put_u16(self.0 as u16),
            _ => {
                buf.put_u8((self.0 >> 16) as u8);
                buf.put_u16_le(self.0 as u16);
            }
        }
    }

    /// Reads the wire form.
    ///
    /// # Errors
    /// - `UnknownOpcode`: the reserved 0x7F opcode
    /// - `PduTooShort`: truncated multi-byte opcode
    pub fn get(buf: &mut Bytes) -> Result<Self> {
        ensure_remaining(&*buf, 1)?;
        let first = buf.get_u8();
        match first >> 6 {
            0 | 1 => {
                if first == 0x7F {
                    return Err(CoreError::UnknownOpcode(0x7F));
                }
                Ok(Self::sig1(first))
            }
            2 => {
                ensure_remaining(&*buf, 1)?;
                Ok(Self::sig2(u16::from_be_bytes([first, buf.get_u8()])))
            }
            _ => {
                ensure_remaining(&*buf, 2)?;
                Ok(Self::vendor(first, buf.get_u16_le()))
            }
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.len() {
            1 => write!(f, "0x{:02x}", self.0),
            2 => write!(f, "0x{:04x}", self.0),
            _ => write!(f, "0x{:06x}", self.0),
        }
    }
}

// ============================================
// AccessMessage
// ============================================

/// Decrypted access payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessMessage {
    /// Message opcode.
    pub opcode: Opcode,
    /// Opcode-specific parameters.
    pub params: Bytes,
}

impl AccessMessage {
    /// Builds a message from an opcode and parameters.
    pub fn new(opcode: Opcode, params: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            params: params.into(),
        }
    }

    /// Serialized form.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.opcode.len() + self.params.len());
        AccessCodec.encode(self, &mut buf);
        buf.freeze()
    }
}

/// Codec for access payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessCodec;

impl Codec<AccessMessage> for AccessCodec {
    fn encode(&self, msg: &AccessMessage, buf: &mut BytesMut) {
        msg.opcode.put(buf);
        buf.put_slice(&msg.params);
    }

    fn decode(&self, buf: &mut Bytes) -> Result<AccessMessage> {
        if buf.remaining() > MAX_ACCESS_PAYLOAD {
            return Err(CoreError::too_large(MAX_ACCESS_PAYLOAD, buf.remaining()));
        }
        let opcode = Opcode::get(buf)?;
        Ok(AccessMessage {
            opcode,
            params: buf.split_to(buf.remaining()),
        })
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::decode_from_slice;

    #[test]
    fn test_opcode_lengths() {
        assert_eq!(Opcode::sig1(0x00).len(), 1);
        assert_eq!(Opcode::sig1(0x7E).len(), 1);
        assert_eq!(Opcode::sig2(0x8049).len(), 2);
        assert_eq!(Opcode::vendor(0xC1, 0x02E5).len(), 3);
        assert_eq!(Opcode::vendor(0xC1, 0x02E5).company(), Some(0x02E5));
    }

    #[test]
    fn test_vendor_opcode_wire() {
        let msg = AccessMessage::new(Opcode::vendor(0xC3, 0x02E5), vec![0xAA]);
        let wire = msg.to_bytes();
        assert_eq!(&wire[..], &[0xC3, 0xE5, 0x02, 0xAA]);
        assert_eq!(decode_from_slice(&AccessCodec, &wire).unwrap(), msg);
    }

    #[test]
    fn test_two_byte_opcode_wire() {
        let msg = AccessMessage::new(Opcode::sig2(0x803D), vec![0x01, 0x00]);
        let wire = msg.to_bytes();
        assert_eq!(&wire[..3], &[0x80, 0x3D, 0x01]);
        assert_eq!(decode_from_slice(&AccessCodec, &wire).unwrap(), msg);
    }

    #[test]
    fn test_reserved_opcode_rejected() {
        assert!(matches!(
            decode_from_slice(&AccessCodec, &[0x7F, 0x00]),
            Err(CoreError::UnknownOpcode(0x7F))
        ));
    }

    #[test]
    fn test_truncated_opcode_rejected() {
        assert!(decode_from_slice(&AccessCodec, &[0x80]).is_err());
        assert!(decode_from_slice(&AccessCodec, &[0xC0, 0x01]).is_err());
    }
}
