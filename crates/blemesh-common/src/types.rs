// ============================================
// File: crates/blemesh-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the value types that travel between the network, transport
//! and access layers so that address kinds and 12-bit key indexes are
//! checked once at construction instead of at every use.
//!
//! ## Main Functionality
//! - `Address`: 16-bit mesh address with range classification
//! - `NetKeyIndex` / `AppKeyIndex`: 12-bit global key indexes
//! - `IvIndex`: IV index plus the update-in-progress flag
//! - `ModelId`: SIG or vendor model identifier
//! - `Features`: heartbeat feature bitmap
//!
//! ## Address Map
//! ```text
//! 0x0000            unassigned
//! 0x0001..=0x7FFF   unicast
//! 0x8000..=0xBFFF   virtual
//! 0xC000..=0xFEFF   group
//! 0xFF00..=0xFFFB   RFU (group range, reserved)
//! 0xFFFC..=0xFFFF   fixed groups (proxies, friends, relays, nodes)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Key indexes are 12 bits on the wire; the constructors reject larger values
//! - `IvIndex::rx_index` must stay in sync with the IVI bit semantics of
//!   the network layer
//!
//! ## Last Modified
//! v0.1.0 - Initial mesh type definitions

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, Result};

// ============================================
// Constants
// ============================================

/// Largest TTL a node may configure or send.
pub const TTL_MAX: u8 = 0x7F;

/// TTL value that means "use the node's default TTL".
pub const TTL_DEFAULT: u8 = 0xFF;

/// Largest 24-bit sequence number.
pub const SEQ_MAX: u32 = 0x00FF_FFFF;

/// Largest 12-bit key index.
pub const KEY_INDEX_MAX: u16 = 0x0FFF;

// ============================================
// Address
// ============================================

/// A 16-bit mesh address.
///
/// # Example
/// ```
/// use blemesh_common::types::Address;
///
/// assert!(Address::new(0x0001).is_unicast());
/// assert!(Address::new(0xC000).is_group());
/// assert!(Address::ALL_NODES.is_fixed_group());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(u16);

impl Address {
    /// The unassigned address.
    pub const UNASSIGNED: Self = Self(0x0000);
    /// All proxies fixed group.
    pub const ALL_PROXIES: Self = Self(0xFFFC);
    /// All friends fixed group.
    pub const ALL_FRIENDS: Self = Self(0xFFFD);
    /// All relays fixed group.
    pub const ALL_RELAYS: Self = Self(0xFFFE);
    /// All nodes fixed group.
    pub const ALL_NODES: Self = Self(0xFFFF);

    /// Wraps a raw address.
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw address value.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Returns the big-endian wire representation.
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// `true` for 0x0000.
    #[must_use]
    pub const fn is_unassigned(self) -> bool {
        self.0 == 0
    }

    /// `true` for 0x0001..=0x7FFF.
    #[must_use]
    pub const fn is_unicast(self) -> bool {
        self.0 != 0 && self.0 & 0x8000 == 0
    }

    /// `true` for 0x8000..=0xBFFF.
    #[must_use]
    pub const fn is_virtual(self) -> bool {
        self.0 & 0xC000 == 0x8000
    }

    /// `true` for 0xC000..=0xFFFF (includes RFU and fixed groups).
    #[must_use]
    pub const fn is_group(self) -> bool {
        self.0 & 0xC000 == 0xC000
    }

    /// `true` for the reserved 0xFF00..=0xFFFB range.
    #[must_use]
    pub const fn is_rfu(self) -> bool {
        self.0 >= 0xFF00 && self.0 <= 0xFFFB
    }

    /// `true` for the four fixed group addresses.
    #[must_use]
    pub const fn is_fixed_group(self) -> bool {
        self.0 >= 0xFFFC
    }

    /// `true` for any address a model may subscribe to.
    #[must_use]
    pub const fn is_subscribable(self) -> bool {
        (self.is_group() && !self.is_rfu() && self.0 != 0xFFFF) || self.is_virtual()
    }
}

impl Address {
    /// Checks that `raw` is a unicast address.
    ///
    /// # Errors
    /// `InvalidAddress` for unassigned, group and virtual addresses.
    pub fn unicast(raw: u16) -> Result<Self> {
        let address = Self(raw);
        if address.is_unicast() {
            Ok(address)
        } else {
            Err(CommonError::invalid_address(raw, "unicast"))
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

impl From<u16> for Address {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<Address> for u16 {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

// ============================================
// Key Indexes
// ============================================

/// Global index of a network key (12 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetKeyIndex(u16);

impl NetKeyIndex {
    /// The primary subnet index.
    pub const PRIMARY: Self = Self(0);

    /// Creates an index, rejecting values above 0x0FFF.
    #[must_use]
    pub const fn new(raw: u16) -> Option<Self> {
        if raw > KEY_INDEX_MAX {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Creates an index by masking to 12 bits.
    #[must_use]
    pub const fn masked(raw: u16) -> Self {
        Self(raw & KEY_INDEX_MAX)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for NetKeyIndex {
    type Error = CommonError;

    fn try_from(raw: u16) -> Result<Self> {
        Self::new(raw).ok_or_else(|| CommonError::out_of_range("net_key_index", raw, 0, KEY_INDEX_MAX))
    }
}

impl fmt::Display for NetKeyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#05x}", self.0)
    }
}

/// Global index of an application key (12 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppKeyIndex(u16);

impl AppKeyIndex {
    /// Creates an index, rejecting values above 0x0FFF.
    #[must_use]
    pub const fn new(raw: u16) -> Option<Self> {
        if raw > KEY_INDEX_MAX {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Creates an index by masking to 12 bits.
    #[must_use]
    pub const fn masked(raw: u16) -> Self {
        Self(raw & KEY_INDEX_MAX)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for AppKeyIndex {
    type Error = CommonError;

    fn try_from(raw: u16) -> Result<Self> {
        Self::new(raw).ok_or_else(|| CommonError::out_of_range("app_key_index", raw, 0, KEY_INDEX_MAX))
    }
}

impl fmt::Display for AppKeyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#05x}", self.0)
    }
}

// ============================================
// IvIndex
// ============================================

/// Network-wide IV index.
///
/// While an IV update is in progress `value` already holds the new index
/// but transmissions keep using `value - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IvIndex {
    /// Current IV index.
    pub value: u32,
    /// IV Update procedure in progress.
    #[serde(default)]
    pub update_in_progress: bool,
}

impl IvIndex {
    /// Creates an IV index in normal operation.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self {
            value,
            update_in_progress: false,
        }
    }

    /// Index used for outgoing PDUs.
    #[must_use]
    pub const fn tx_index(&self) -> u32 {
        if self.update_in_progress {
            self.value.wrapping_sub(1)
        } else {
            self.value
        }
    }

    /// Resolves the index of a received PDU from its IVI bit.
    ///
    /// Returns the index and whether it is the previous one.
    #[must_use]
    pub const fn rx_index(&self, ivi: u8) -> (u32, bool) {
        if (self.value & 1) as u8 == ivi & 1 {
            (self.value, false)
        } else {
            (self.value.wrapping_sub(1), true)
        }
    }
}

impl fmt::Display for IvIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.update_in_progress {
            write!(f, "{} (updating)", self.value)
        } else {
            write!(f, "{}", self.value)
        }
    }
}

// ============================================
// ModelId
// ============================================

/// Identifier of a model: 16-bit SIG id or vendor company + id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelId {
    /// Bluetooth SIG defined model.
    Sig(u16),
    /// Vendor model.
    Vendor {
        /// Company identifier.
        company: u16,
        /// Vendor-assigned model id.
        id: u16,
    },
}

impl ModelId {
    /// Configuration Server model.
    pub const CONFIG_SERVER: Self = Self::Sig(0x0000);
    /// Configuration Client model.
    pub const CONFIG_CLIENT: Self = Self::Sig(0x0001);
    /// Health Server model.
    pub const HEALTH_SERVER: Self = Self::Sig(0x0002);

    /// Packs the id the way it appears in 32-bit configuration fields.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::Sig(id) => id as u32,
            Self::Vendor { company, id } => ((company as u32) << 16) | id as u32,
        }
    }

    /// `true` for vendor models.
    #[must_use]
    pub const fn is_vendor(self) -> bool {
        matches!(self, Self::Vendor { .. })
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sig(id) => write!(f, "{id:04x}"),
            Self::Vendor { company, id } => write!(f, "{company:04x}:{id:04x}"),
        }
    }
}

// ============================================
// Features
// ============================================

/// Heartbeat feature bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Features(u16);

impl Features {
    /// Relay feature bit.
    pub const RELAY: Self = Self(0x0001);
    /// Proxy feature bit.
    pub const PROXY: Self = Self(0x0002);
    /// Friend feature bit.
    pub const FRIEND: Self = Self(0x0004);
    /// Low Power feature bit.
    pub const LOW_POWER: Self = Self(0x0008);
    /// All defined bits.
    pub const ALL: Self = Self(0x000F);

    /// Wraps raw bits; undefined bits are kept as received.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// `true` if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `true` if any bit of `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Sets or clears the bits of `other`.
    pub fn set(&mut self, other: Self, enabled: bool) {
        if enabled {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl std::ops::BitOr for Features {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_classification() {
        assert!(Address::UNASSIGNED.is_unassigned());
        assert!(!Address::UNASSIGNED.is_unicast());

        assert!(Address::new(0x0001).is_unicast());
        assert!(Address::new(0x7FFF).is_unicast());
        assert!(!Address::new(0x8000).is_unicast());

        assert!(Address::new(0x8000).is_virtual());
        assert!(Address::new(0xBFFF).is_virtual());
        assert!(!Address::new(0xC000).is_virtual());

        assert!(Address::new(0xC000).is_group());
        assert!(Address::new(0xFF00).is_rfu());
        assert!(Address::new(0xFFFB).is_rfu());
        assert!(!Address::ALL_PROXIES.is_rfu());
        assert!(Address::ALL_RELAYS.is_fixed_group());
    }

    #[test]
    fn test_address_subscribable() {
        assert!(Address::new(0xC001).is_subscribable());
        assert!(Address::new(0x8123).is_subscribable());
        assert!(Address::ALL_PROXIES.is_subscribable());
        assert!(!Address::ALL_NODES.is_subscribable());
        assert!(!Address::new(0xFF10).is_subscribable());
        assert!(!Address::new(0x0002).is_subscribable());
    }

    #[test]
    fn test_key_index_bounds() {
        assert!(NetKeyIndex::new(0x0FFF).is_some());
        assert!(NetKeyIndex::new(0x1000).is_none());
        assert_eq!(AppKeyIndex::masked(0xF123).value(), 0x0123);
    }

    #[test]
    fn test_iv_index_rx_selection() {
        let iv = IvIndex::new(0x1235);
        assert_eq!(iv.rx_index(1), (0x1235, false));
        assert_eq!(iv.rx_index(0), (0x1234, true));

        let updating = IvIndex {
            value: 0x1235,
            update_in_progress: true,
        };
        assert_eq!(updating.tx_index(), 0x1234);
    }

    #[test]
    fn test_model_id_packing() {
        assert_eq!(ModelId::Sig(0x1000).to_u32(), 0x1000);
        let vendor = ModelId::Vendor {
            company: 0x02E5,
            id: 0x0001,
        };
        assert_eq!(vendor.to_u32(), 0x02E5_0001);
        assert!(vendor.is_vendor());
        assert_eq!(vendor.to_string(), "02e5:0001");
    }

    #[test]
    fn test_features_bits() {
        let mut f = Features::RELAY | Features::FRIEND;
        assert!(f.contains(Features::RELAY));
        assert!(!f.contains(Features::PROXY));
        f.set(Features::RELAY, false);
        assert_eq!(f.bits(), 0x0004);
        assert!(f.intersects(Features::ALL));
    }

    #[test]
    fn test_checked_conversions() {
        assert_eq!(Address::unicast(0x0001).unwrap(), Address::new(0x0001));
        assert!(matches!(
            Address::unicast(0xC000),
            Err(CommonError::InvalidAddress { address: 0xC000, .. })
        ));
        assert!(Address::unicast(0x0000).is_err());

        assert_eq!(NetKeyIndex::try_from(0x0FFF).unwrap().value(), 0x0FFF);
        let err = AppKeyIndex::try_from(0x1000).unwrap_err();
        assert!(err.to_string().contains("app_key_index"));
    }
}
