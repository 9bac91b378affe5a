// ============================================
// File: crates/blemesh-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Base error type for value validation shared by every mesh crate.
//!
//! ## Main Functionality
//! - `CommonError`: Range and address-kind errors for typed conversions
//! - `Result<T>`: Type alias using `CommonError`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never include key bytes in error messages
//! - Higher crates wrap this type with `#[from]`
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::fmt;
use thiserror::Error;

// ============================================
// Result Type Alias
// ============================================

/// Common result type for operations that may fail.
pub type Result<T> = std::result::Result<T, CommonError>;

// ============================================
// CommonError
// ============================================

/// Common error types shared across mesh crates.
///
/// # Example
/// ```
/// use blemesh_common::error::{CommonError, Result};
///
/// fn check_ttl(ttl: u8) -> Result<()> {
///     if ttl > 0x7F {
///         return Err(CommonError::out_of_range("ttl", ttl, 0, 0x7F));
///     }
///     Ok(())
/// }
/// assert!(check_ttl(0x80).is_err());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Value is out of acceptable range.
    #[error("Value out of range for '{field}': {value} not in [{min}, {max}]")]
    OutOfRange {
        /// Field being validated
        field: &'static str,
        /// The value that was out of range
        value: String,
        /// Minimum acceptable value
        min: String,
        /// Maximum acceptable value
        max: String,
    },

    /// Address is not of the kind the operation requires.
    #[error("Invalid address 0x{address:04x}: expected {expected}")]
    InvalidAddress {
        /// Offending address
        address: u16,
        /// Required address kind (unicast, group, ...)
        expected: &'static str,
    },
}

impl CommonError {
    /// Creates an `OutOfRange` error.
    pub fn out_of_range(
        field: &'static str,
        value: impl fmt::Display,
        min: impl fmt::Display,
        max: impl fmt::Display,
    ) -> Self {
        Self::OutOfRange {
            field,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    /// Creates an `InvalidAddress` error.
    #[must_use]
    pub const fn invalid_address(address: u16, expected: &'static str) -> Self {
        Self::InvalidAddress { address, expected }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommonError::invalid_address(0xC000, "unicast");
        assert!(err.to_string().contains("0xc000"));
        assert!(err.to_string().contains("unicast"));

        let err = CommonError::out_of_range("default_ttl", 200, 0, 127);
        assert!(err.to_string().contains("default_ttl"));
        assert!(err.to_string().contains("200"));
    }

}
