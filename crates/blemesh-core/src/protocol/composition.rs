// ============================================
// File: crates/blemesh-core/src/protocol/composition.rs
// ============================================
//! # Composition Data
//!
//! ## Creation Reason
//! Describes the node's elements and models. The node reads it at start-up
//! to build its element table and returns page 0 on Composition Data Get.
//!
//! ## Wire Format (page 0, little-endian)
//! ```text
//! CID(2) PID(2) VID(2) CRPL(2) Features(2)
//! repeat per element:
//!   Loc(2) NumS(1) NumV(1) SIG model ids(2 x NumS) vendor ids(4 x NumV)
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial composition data

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use blemesh_common::types::ModelId;

use super::codec::{ensure_remaining, Codec};
use crate::error::{CoreError, Result};

// ============================================
// Types
// ============================================

/// Vendor model identifier as it appears in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorModel {
    /// Company identifier.
    pub company: u16,
    /// Model identifier.
    pub id: u16,
}

/// One element of the node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementDescriptor {
    /// GATT Bluetooth namespace location descriptor.
    #[serde(default)]
    pub location: u16,
    /// SIG model ids.
    #[serde(default)]
    pub sig_models: Vec<u16>,
    /// Vendor models.
    #[serde(default)]
    pub vendor_models: Vec<VendorModel>,
}

impl ElementDescriptor {
    /// All models of the element, SIG models first.
    pub fn models(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.sig_models.iter().map(|id| ModelId::Sig(*id)).chain(
            self.vendor_models
                .iter()
                .map(|v| ModelId::Vendor { company: v.company, id: v.id }),
        )
    }
}

/// Composition Data page 0.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompositionData {
    /// Company identifier.
    pub cid: u16,
    /// Product identifier.
    pub pid: u16,
    /// Version identifier.
    pub vid: u16,
    /// Minimum number of replay protection list entries.
    pub crpl: u16,
    /// Supported features bitmap.
    pub features: u16,
    /// Elements in address order; the first one is the primary element.
    pub elements: Vec<ElementDescriptor>,
}

impl CompositionData {
    /// Encodes page 0.
    #[must_use]
    pub fn page0(&self) -> Bytes {
        let mut buf = BytesMut::new();
        CompositionCodec.encode(self, &mut buf);
        buf.freeze()
    }
}

// ============================================
// CompositionCodec
// ============================================

/// Codec for Composition Data page 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompositionCodec;

impl Codec<CompositionData> for CompositionCodec {
    fn encode(&self, msg: &CompositionData, buf: &mut BytesMut) {
        buf.put_u16_le(msg.cid);
        buf.put_u16_le(msg.pid);
        buf.put_u16_le(msg.vid);
        buf.put_u16_le(msg.crpl);
        buf.put_u16_le(msg.features);
        for elem in &msg.elements {
            buf.put_u16_le(elem.location);
            buf.put_u8(elem.sig_models.len() as u8);
            buf.put_u8(elem.vendor_models.len() as u8);
            for id in &elem.sig_models {
                buf.put_u16_le(*id);
            }
            for vnd in &elem.vendor_models {
                buf.put_u16_le(vnd.company);
                buf.put_u16_le(vnd.id);
            }
        }
    }

    fn decode(&self, buf: &mut Bytes) -> Result<CompositionData> {
        ensure_remaining(&*buf, 10)?;
        let mut comp = CompositionData {
            cid: buf.get_u16_le(),
            pid: buf.get_u16_le(),
            vid: buf.get_u16_le(),
            crpl: buf.get_u16_le(),
            features: buf.get_u16_le(),
            elements: Vec::new(),
        };
        while buf.has_remaining() {
            ensure_remaining(&*buf, 4)?;
            let location = buf.get_u16_le();
            let num_s = usize::from(buf.get_u8());
            let num_v = usize::from(buf.get_u8());
            ensure_remaining(&*buf, num_s * 2 + num_v * 4)?;
            let sig_models = (0..num_s).map(|_| buf.get_u16_le()).collect();
            let vendor_models = (0..num_v)
                .map(|_| VendorModel {
                    company: buf.get_u16_le(),
                    id: buf.get_u16_le(),
                })
                .collect();
            comp.elements.push(ElementDescriptor {
                location,
                sig_models,
                vendor_models,
            });
        }
        if comp.elements.is_empty() {
            return Err(CoreError::malformed("composition data without elements"));
        }
        Ok(comp)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::decode_from_slice;

    fn sample() -> CompositionData {
        CompositionData {
            cid: 0x02E5,
            pid: 0x0001,
            vid: 0x0002,
            crpl: 32,
            features: 0x0003,
            elements: vec![
                ElementDescriptor {
                    location: 0x0100,
                    sig_models: vec![0x0000, 0x1000],
                    vendor_models: vec![VendorModel { company: 0x02E5, id: 0x0001 }],
                },
                ElementDescriptor {
                    location: 0x0101,
                    sig_models: vec![0x1000],
                    vendor_models: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_page0_layout() {
        let page = sample().page0();
        assert_eq!(&page[..10], &[0xE5, 0x02, 0x01, 0x00, 0x02, 0x00, 0x20, 0x00, 0x03, 0x00]);
        // first element header: loc 0x0100, NumS 2, NumV 1
        assert_eq!(&page[10..14], &[0x00, 0x01, 0x02, 0x01]);
        assert_eq!(page.len(), 10 + (4 + 4 + 4) + (4 + 2));
    }

    #[test]
    fn test_page0_decode() {
        let page = sample().page0();
        assert_eq!(decode_from_slice(&CompositionCodec, &page).unwrap(), sample());
    }

    #[test]
    fn test_truncated_element_rejected() {
        let page = sample().page0();
        assert!(decode_from_slice(&CompositionCodec, &page[..page.len() - 1]).is_err());
    }

    #[test]
    fn test_models_iterator_order() {
        let models: Vec<_> = sample().elements[0].models().collect();
        assert_eq!(models[0], ModelId::CONFIG_SERVER);
        assert_eq!(models[1], ModelId::Sig(0x1000));
        assert!(models[2].is_vendor());
    }
}
