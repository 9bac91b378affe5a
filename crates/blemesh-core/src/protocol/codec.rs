// ============================================
// File: crates/blemesh-core/src/protocol/codec.rs
// ============================================
//! # Protocol Codec
//!
//! ## Creation Reason
//! Common encode/decode interface for the plaintext mesh PDUs, plus the
//! byte helpers the individual codecs share.
//!
//! ## Main Functionality
//! - `Codec` trait: Generic encode/decode interface
//! - `ensure_remaining`: length guard returning `PduTooShort`
//! - 24-bit big-endian helpers for sequence numbers
//!
//! ## Wire Format
//! Network and transport headers are big-endian. Access-layer parameters
//! (configuration messages, composition data) are little-endian.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always call `ensure_remaining` before `get_*`; `bytes` panics on underflow
//!
//! ## Last Modified
//! v0.1.0 - Initial codec implementation

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CoreError, Result};

// ============================================
// Codec Trait
// ============================================

/// Trait for encoding and decoding plaintext PDUs.
///
/// # Type Parameters
/// * `T` - The message type to encode/decode
pub trait Codec<T> {
    /// Encodes a message into a byte buffer.
    fn encode(&self, msg: &T, buf: &mut BytesMut);

    /// Decodes a message from bytes.
    ///
    /// # Errors
    /// Returns a protocol error when the buffer is truncated or malformed.
    fn decode(&self, buf: &mut Bytes) -> Result<T>;
}

// ============================================
// Helpers
// ============================================

/// Fails with `PduTooShort` unless `buf` holds at least `needed` bytes.
///
/// # Errors
/// `PduTooShort` when fewer bytes remain.
pub fn ensure_remaining(buf: &impl Buf, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(CoreError::too_short(needed, buf.remaining()));
    }
    Ok(())
}

/// Reads a 24-bit big-endian value.
pub fn get_u24_be(buf: &mut impl Buf) -> u32 {
    let hi = u32::from(buf.get_u8());
    let lo = u32::from(buf.get_u16());
    (hi << 16) | lo
}

/// Writes the low 24 bits of `value` big-endian.
pub fn put_u24_be(buf: &mut impl BufMut, value: u32) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u16(value as u16);
}

/// Encodes `msg` with `codec` into a fresh buffer.
pub fn encode_to_bytes<T, C: Codec<T>>(codec: &C, msg: &T) -> Bytes {
    let mut buf = BytesMut::new();
    codec.encode(msg, &mut buf);
    buf.freeze()
}

/// Decodes a `T` from a byte slice.
///
/// # Errors
/// Propagates the codec's decode error.
pub fn decode_from_slice<T, C: Codec<T>>(codec: &C, data: &[u8]) -> Result<T> {
    let mut bytes = Bytes::copy_from_slice(data);
    codec.decode(&mut bytes)
}

// ============================================
// Tests
// ============================================
