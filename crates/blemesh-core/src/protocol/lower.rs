// ============================================
// File: crates/blemesh-core/src/protocol/lower.rs
// ============================================
//! # Lower Transport PDUs
//!
//! ## Creation Reason
//! Parses and builds the lower transport layer that sits inside a network
//! PDU: unsegmented and segmented access messages, unsegmented and
//! segmented control messages, and the two control messages the node
//! handles itself (Segment Acknowledgment, Heartbeat).
//!
//! ## Wire Format
//! ```text
//! Unsegmented access:  0 | AKF | AID(6)            | UpperTransportPDU (≤15)
//! Segmented access:    1 | AKF | AID(6)            | SZMIC | SeqZero(13) | SegO(5) | SegN(5) | segment (≤12)
//! Unsegmented control: 0 | Opcode(7)               | parameters (≤11)
//! Segmented control:   1 | Opcode(7)               | RFU   | SeqZero(13) | SegO(5) | SegN(5) | segment (≤8)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The CTL bit lives in the network header; pick `LowerCodec::access()`
//!   or `LowerCodec::control()` accordingly
//! - SeqAuth must be rebuilt from SeqZero and the segment's own SEQ; see
//!   `seq_auth_from_seq_zero`
//!
//! ## Last Modified
//! v0.1.0 - Initial lower transport codec

use bytes::{Buf, BufMut, Bytes, BytesMut};

use blemesh_common::types::Features;

use super::codec::{ensure_remaining, Codec};
use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Segment payload size for access messages.
pub const SEG_LEN_ACCESS: usize = 12;

/// Segment payload size for control messages.
pub const SEG_LEN_CONTROL: usize = 8;

/// Largest upper transport PDU carried unsegmented (access).
pub const UNSEG_MAX_ACCESS: usize = 15;

/// Largest control parameters carried unsegmented.
pub const UNSEG_MAX_CONTROL: usize = 11;

/// Maximum number of segments in one message.
pub const MAX_SEGMENTS: usize = 32;

/// Mask for the 13-bit SeqZero field.
pub const SEQ_ZERO_MASK: u16 = 0x1FFF;

/// Segment payload size for the given message kind.
#[must_use]
pub const fn seg_len(ctl: bool) -> usize {
    if ctl {
        SEG_LEN_CONTROL
    } else {
        SEG_LEN_ACCESS
    }
}

/// Bitmap with bits `0..=seg_n` set.
#[must_use]
pub const fn block_complete(seg_n: u8) -> u32 {
    if seg_n >= 31 {
        u32::MAX
    } else {
        (1u32 << (seg_n + 1)) - 1
    }
}

/// SeqAuth of a message whose first segment used `seq`.
#[must_use]
pub const fn seq_auth(iv_index: u32, seq: u32) -> u64 {
    ((iv_index as u64) << 24) | (seq as u64 & 0x00FF_FFFF)
}

/// Rebuilds SeqAuth from a segment's SEQ and the SeqZero it carries.
///
/// SEQ(0) = SEQ(n) - ((SEQ(n)[13:0] - SeqZero) mod 2^13)
#[must_use]
pub const fn seq_auth_from_seq_zero(iv_index: u32, seq: u32, seq_zero: u16) -> u64 {
    let delta = ((seq & 0x3FFF).wrapping_sub(seq_zero as u32)) & (SEQ_ZERO_MASK as u32);
    seq_auth(iv_index, seq.wrapping_sub(delta))
}

// ============================================
// SegmentInfo
// ============================================

/// Segmentation fields shared by access and control segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Low 13 bits of the first segment's SEQ.
    pub seq_zero: u16,
    /// Offset of this segment.
    pub seg_o: u8,
    /// Index of the last segment.
    pub seg_n: u8,
}

impl SegmentInfo {
    fn put(self, flag: bool, buf: &mut BytesMut) {
        buf.put_u8((u8::from(flag) << 7) | ((self.seq_zero >> 6) as u8 & 0x7F));
        buf.put_u8((((self.seq_zero & 0x3F) as u8) << 2) | (self.seg_o >> 3));
        buf.put_u8(((self.seg_o & 0x07) << 5) | (self.seg_n & 0x1F));
    }

    fn get(buf: &mut Bytes) -> Result<(bool, Self)> {
        ensure_remaining(&*buf, 3)?;
        let b0 = buf.get_u8();
        let b1 = buf.get_u8();
        let b2 = buf.get_u8();
        let flag = b0 & 0x80 != 0;
        let seq_zero = (u16::from(b0 & 0x7F) << 6) | u16::from(b1 >> 2);
        let seg_o = ((b1 & 0x03) << 3) | (b2 >> 5);
        let seg_n = b2 & 0x1F;
        if seg_o > seg_n {
            return Err(CoreError::malformed(format!("SegO {seg_o} > SegN {seg_n}")));
        }
        Ok((flag, Self { seq_zero, seg_o, seg_n }))
    }
}

// ============================================
// LowerPdu
// ============================================

/// Lower transport PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerPdu {
    /// Access message in a single PDU.
    UnsegmentedAccess {
        /// Application key flag.
        akf: bool,
        /// Application key identifier (6 bits).
        aid: u8,
        /// Encrypted access payload + TransMIC.
        upper: Bytes,
    },
    /// One segment of an access message.
    SegmentedAccess {
        /// Application key flag.
        akf: bool,
        /// Application key identifier (6 bits).
        aid: u8,
        /// 64-bit TransMIC in use.
        szmic: bool,
        /// Segmentation fields.
        seg: SegmentInfo,
        /// Segment payload.
        segment: Bytes,
    },
    /// Control message in a single PDU.
    UnsegmentedControl {
        /// Control opcode (7 bits).
        opcode: u8,
        /// Parameters.
        params: Bytes,
    },
    /// One segment of a control message.
    SegmentedControl {
        /// Control opcode (7 bits).
        opcode: u8,
        /// Segmentation fields.
        seg: SegmentInfo,
        /// Segment payload.
        segment: Bytes,
    },
}

impl LowerPdu {
    /// Segmentation fields, if segmented.
    #[must_use]
    pub const fn segment_info(&self) -> Option<SegmentInfo> {
        match self {
            Self::SegmentedAccess { seg, .. } | Self::SegmentedControl { seg, .. } => Some(*seg),
            _ => None,
        }
    }
}

// ============================================
// LowerCodec
// ============================================

/// Codec for lower transport PDUs of one message kind.
#[derive(Debug, Clone, Copy)]
pub struct LowerCodec {
    ctl: bool,
}

impl LowerCodec {
    /// Codec for access (CTL = 0) PDUs.
    #[must_use]
    pub const fn access() -> Self {
        Self { ctl: false }
    }

    /// Codec for control (CTL = 1) PDUs.
    #[must_use]
    pub const fn control() -> Self {
        Self { ctl: true }
    }

    /// Codec for the given CTL bit.
    #[must_use]
    pub const fn for_ctl(ctl: bool) -> Self {
        Self { ctl }
    }
}

impl Codec<LowerPdu> for LowerCodec {
    fn encode(&self, msg: &LowerPdu, buf: &mut BytesMut) {
        match msg {
            LowerPdu::UnsegmentedAccess { akf, aid, upper } => {
                buf.put_u8((u8::from(*akf) << 6) | (aid & 0x3F));
                buf.put_slice(upper);
            }
            LowerPdu::SegmentedAccess { akf, aid, szmic, seg, segment } => {
                buf.put_u8(0x80 | (u8::from(*akf) << 6) | (aid & 0x3F));
                seg.put(*szmic, buf);
                buf.put_slice(segment);
            }
            LowerPdu::UnsegmentedControl { opcode, params } => {
                buf.put_u8(opcode & 0x7F);
                buf.put_slice(params);
            }
            LowerPdu::SegmentedControl { opcode, seg, segment } => {
                buf.put_u8(0x80 | (opcode & 0x7F));
                seg.put(false, buf);
                buf.put_slice(segment);
            }
        }
    }

    fn decode(&self, buf: &mut Bytes) -> Result<LowerPdu> {
        ensure_remaining(&*buf, 1)?;
        let hdr = buf.get_u8();
        let segmented = hdr & 0x80 != 0;

        if self.ctl {
            let opcode = hdr & 0x7F;
            if segmented {
                let (_, seg) = SegmentInfo::get(buf)?;
                ensure_remaining(&*buf, 1)?;
                return Ok(LowerPdu::SegmentedControl {
                    opcode,
                    seg,
                    segment: buf.split_to(buf.remaining()),
                });
            }
            return Ok(LowerPdu::UnsegmentedControl {
                opcode,
                params: buf.split_to(buf.remaining()),
            });
        }

        let akf = hdr & 0x40 != 0;
        let aid = hdr & 0x3F;
        if segmented {
            let (szmic, seg) = SegmentInfo::get(buf)?;
            ensure_remaining(&*buf, 1)?;
            return Ok(LowerPdu::SegmentedAccess {
                akf,
                aid,
                szmic,
                seg,
                segment: buf.split_to(buf.remaining()),
            });
        }
        // TransMIC alone is 4 bytes, an access payload needs at least one more
        ensure_remaining(&*buf, 5)?;
        Ok(LowerPdu::UnsegmentedAccess {
            akf,
            aid,
            upper: buf.split_to(buf.remaining()),
        })
    }
}

// ============================================
// Control Messages
// ============================================

/// Segment Acknowledgment control message (opcode 0x00).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentAck {
    /// Sent on behalf of a Low Power node.
    pub obo: bool,
    /// SeqZero of the acknowledged message.
    pub seq_zero: u16,
    /// Received-segment bitmap; 0 means the receiver gave up.
    pub block_ack: u32,
}

impl SegmentAck {
    /// Control opcode.
    pub const OPCODE: u8 = 0x00;

    /// Serializes the parameters.
    #[must_use]
    pub fn to_params(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u16((u16::from(self.obo) << 15) | ((self.seq_zero << 2) & 0x7FFC));
        buf.put_u32(self.block_ack);
        buf.freeze()
    }

    /// Parses the parameters.
    ///
    /// # Errors
    /// `PduTooShort` when fewer than 6 bytes are present.
    pub fn from_params(mut params: Bytes) -> Result<Self> {
        ensure_remaining(&params, 6)?;
        let head = params.get_u16();
        Ok(Self {
            obo: head & 0x8000 != 0,
            seq_zero: (head >> 2) & SEQ_ZERO_MASK,
            block_ack: params.get_u32(),
        })
    }
}

/// Heartbeat control message (opcode 0x0A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatMessage {
    /// TTL the heartbeat was sent with.
    pub init_ttl: u8,
    /// Features active on the sender.
    pub features: Features,
}

impl HeartbeatMessage {
    /// Control opcode.
    pub const OPCODE: u8 = 0x0A;

    /// Serializes the parameters.
    #[must_use]
    pub fn to_params(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3);
        buf.put_u8(self.init_ttl & 0x7F);
        buf.put_u16(self.features.bits());
        buf.freeze()
    }

    /// Parses the parameters.
    ///
    /// # Errors
    /// `PduTooShort` when fewer than 3 bytes are present.
    pub fn from_params(mut params: Bytes) -> Result<Self> {
        ensure_remaining(&params, 3)?;
        Ok(Self {
            init_ttl: params.get_u8() & 0x7F,
            features: Features::from_bits(params.get_u16()),
        })
    }

    /// Hop count for a heartbeat received with `rx_ttl`.
    #[must_use]
    pub const fn hops(&self, rx_ttl: u8) -> u8 {
        self.init_ttl.wrapping_sub(rx_ttl).wrapping_add(1)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{decode_from_slice, encode_to_bytes};

    #[test]
    fn test_segmented_access_header_layout() {
        let pdu = LowerPdu::SegmentedAccess {
            akf: true,
            aid: 0x26,
            szmic: false,
            seg: SegmentInfo {
                seq_zero: 0x1ABC,
                seg_o: 9,
                seg_n: 17,
            },
            segment: Bytes::from_static(&[0xEE; 12]),
        };
        let wire = encode_to_bytes(&LowerCodec::access(), &pdu);
        assert_eq!(wire[0], 0x80 | 0x40 | 0x26);
        // SZMIC=0, SeqZero high 7 bits
        assert_eq!(wire[1], (0x1ABC >> 6) as u8);
        assert_eq!(wire[2], ((0x1ABC & 0x3F) << 2) as u8 | (9 >> 3));
        assert_eq!(wire[3], ((9 & 7) << 5) | 17);
        assert_eq!(decode_from_slice(&LowerCodec::access(), &wire).unwrap(), pdu);
    }

    #[test]
    fn test_unsegmented_access_roundtrip() {
        let pdu = LowerPdu::UnsegmentedAccess {
            akf: false,
            aid: 0,
            upper: Bytes::from_static(&[1, 2, 3, 4, 5, 6]),
        };
        let wire = encode_to_bytes(&LowerCodec::access(), &pdu);
        assert_eq!(wire[0], 0x00);
        assert_eq!(decode_from_slice(&LowerCodec::access(), &wire).unwrap(), pdu);
    }

    #[test]
    fn test_control_decoding() {
        let wire = [0x0A, 0x05, 0x00, 0x03];
        match decode_from_slice(&LowerCodec::control(), &wire).unwrap() {
            LowerPdu::UnsegmentedControl { opcode, params } => {
                assert_eq!(opcode, HeartbeatMessage::OPCODE);
                let hb = HeartbeatMessage::from_params(params).unwrap();
                assert_eq!(hb.init_ttl, 5);
                assert_eq!(hb.features, Features::RELAY | Features::PROXY);
                assert_eq!(hb.hops(3), 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_sego_above_segn_rejected() {
        let wire = [0x80, 0x00, 0x01, 0x20, 0xAA];
        assert!(decode_from_slice(&LowerCodec::access(), &wire).is_err());
    }

    #[test]
    fn test_segment_ack_params() {
        let ack = SegmentAck {
            obo: true,
            seq_zero: 0x1FFF,
            block_ack: 0x0000_0007,
        };
        let params = ack.to_params();
        assert_eq!(&params[..], &[0xFF, 0xFC, 0x00, 0x00, 0x00, 0x07]);
        assert_eq!(SegmentAck::from_params(params).unwrap(), ack);
    }

    #[test]
    fn test_block_complete() {
        assert_eq!(block_complete(0), 0b1);
        assert_eq!(block_complete(3), 0b1111);
        assert_eq!(block_complete(31), u32::MAX);
    }

    #[test]
    fn test_seq_auth_from_seq_zero() {
        // first segment seq 0x3129ab, later segment 0x3129ad
        let seq_zero = (0x0031_29ab & 0x1FFF) as u16;
        assert_eq!(
            seq_auth_from_seq_zero(0x1234_5678, 0x0031_29ad, seq_zero),
            seq_auth(0x1234_5678, 0x0031_29ab)
        );
        // wrap of the 13-bit window
        let seq_zero = (0x0000_1FFF & 0x1FFF) as u16;
        assert_eq!(seq_auth_from_seq_zero(0, 0x0000_2001, seq_zero), seq_auth(0, 0x1FFF));
    }
}
