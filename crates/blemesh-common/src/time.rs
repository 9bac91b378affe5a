// ============================================
// File: crates/blemesh-common/src/time.rs
// ============================================
//! # Time Encodings
//!
//! ## Creation Reason
//! Configuration messages never carry durations directly. They carry
//! packed step counts and base-2 logarithms. This module converts those
//! encodings to `Duration`s and counts in one place.
//!
//! ## Main Functionality
//! - `TransmitParams`: network / relay transmit byte (count + 10 ms steps)
//! - `PublishRetransmit`: model publication retransmit byte (count + 50 ms steps)
//! - `PublishPeriod`: model publication period byte (steps + resolution)
//! - `hb_log` / `hb_pub_count_log` / `hb_pwr2`: heartbeat log encodings
//!
//! ## ⚠️ Important Note for Next Developer
//! - `hb_pwr2` treats both 0xFF and 0x11 as "indefinite" (0xFFFF)
//! - Log helpers are used for status replies; never feed them durations
//!   in milliseconds
//!
//! ## Last Modified
//! v0.1.0 - Initial encodings

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================
// TransmitParams
// ============================================

/// Network or relay transmit parameters.
///
/// # Wire Format
/// ```text
/// bit 7..3: interval steps (interval = (steps + 1) * 10 ms)
/// bit 2..0: transmit count (transmissions = count + 1)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransmitParams {
    /// Additional transmissions (0..=7).
    pub count: u8,
    /// Interval steps (0..=31).
    pub interval_steps: u8,
}

impl TransmitParams {
    /// Creates parameters, masking out-of-range fields.
    #[must_use]
    pub const fn new(count: u8, interval_steps: u8) -> Self {
        Self {
            count: count & 0x07,
            interval_steps: interval_steps & 0x1F,
        }
    }

    /// Decodes the packed byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self {
            count: byte & 0x07,
            interval_steps: byte >> 3,
        }
    }

    /// Encodes to the packed byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        (self.interval_steps << 3) | (self.count & 0x07)
    }

    /// Gap between two transmissions.
    #[must_use]
    pub const fn interval(self) -> Duration {
        Duration::from_millis((self.interval_steps as u64 + 1) * 10)
    }
}

// ============================================
// PublishRetransmit
// ============================================

/// Model publication retransmit parameters.
///
/// `count` in the low 3 bits, interval steps of 50 ms in the high 5 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublishRetransmit {
    /// Retransmissions (0..=7).
    pub count: u8,
    /// Interval steps (0..=31).
    pub interval_steps: u8,
}

impl PublishRetransmit {
    /// Decodes the packed byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self {
            count: byte & 0x07,
            interval_steps: byte >> 3,
        }
    }

    /// Encodes to the packed byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        (self.interval_steps << 3) | (self.count & 0x07)
    }

    /// Gap between retransmissions.
    #[must_use]
    pub const fn interval(self) -> Duration {
        Duration::from_millis((self.interval_steps as u64 + 1) * 50)
    }
}

// ============================================
// PublishPeriod
// ============================================

/// Model publication period byte.
///
/// # Wire Format
/// ```text
/// bit 7..6: resolution (100 ms, 1 s, 10 s, 10 min)
/// bit 5..0: number of steps
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishPeriod(u8);

impl PublishPeriod {
    /// Wraps the raw period byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Returns the raw period byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        self.0
    }

    /// Decoded period; zero means periodic publishing is disabled.
    #[must_use]
    pub const fn duration(self) -> Duration {
        let steps = (self.0 & 0x3F) as u64;
        match self.0 >> 6 {
            0 => Duration::from_millis(steps * 100),
            1 => Duration::from_secs(steps),
            2 => Duration::from_secs(steps * 10),
            _ => Duration::from_secs(steps * 600),
        }
    }
}

// ============================================
// Heartbeat Log Encodings
// ============================================

/// Encodes a 16-bit value as the heartbeat "log" field.
///
/// 0 → 0, 0xFFFF → 0xFF, otherwise `floor(log2(v)) + 1`.
#[must_use]
pub const fn hb_log(value: u32) -> u8 {
    match value {
        0 => 0x00,
        0xFFFF => 0xFF,
        v => (32 - v.leading_zeros()) as u8,
    }
}

/// Encodes a remaining publication count as the CountLog field.
///
/// Rounds up so that a count of 3 reports 2^(3-1) = 4.
#[must_use]
pub const fn hb_pub_count_log(count: u16) -> u8 {
    match count {
        0 => 0x00,
        1 => 0x01,
        0xFFFF => 0xFF,
        v => (32 - ((v as u32) - 1).leading_zeros()) as u8 + 1,
    }
}

/// Decodes a heartbeat log field, `2^(v - sub)`.
///
/// 0 → 0; 0xFF and 0x11 → 0xFFFF (indefinite).
#[must_use]
pub const fn hb_pwr2(value: u8, sub: u8) -> u16 {
    match value {
        0x00 => 0x0000,
        0xFF | 0x11 => 0xFFFF,
        v => 1u16 << (v - sub),
    }
}

// ============================================
// Tests
// ============================================
