// ============================================
// File: crates/blemesh-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines the error taxonomy shared by key derivation, PDU sealing and
//! the wire codecs. The node crate maps most of these to silent drops or
//! configuration status codes.
//!
//! ## Error Categories
//! 1. **Crypto Errors**: MIC mismatch, cipher setup, key derivation
//! 2. **Protocol Errors**: truncated, oversized or malformed PDUs
//! 3. **Security Errors**: replayed sequence numbers
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - `AuthenticationFailed` is expected noise from foreign networks;
//!   log it at trace level only
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use blemesh_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for PDU crypto and parsing.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Cryptographic Errors
    // ========================================

    /// NetMIC or TransMIC did not validate under any candidate key.
    #[error("Authentication failed: {layer} MIC mismatch")]
    AuthenticationFailed {
        /// Layer that rejected the PDU ("network", "transport")
        layer: &'static str,
    },

    /// Encryption operation failed.
    #[error("Encryption failed: {context}")]
    Encryption {
        /// What was being encrypted
        context: String,
    },

    /// Key derivation failed.
    #[error("Key derivation failed: {reason}")]
    KeyDerivation {
        /// Why derivation failed
        reason: String,
    },

    // ========================================
    // Protocol Errors
    // ========================================

    /// PDU is malformed.
    #[error("Malformed PDU: {reason}")]
    MalformedPdu {
        /// What's wrong with the PDU
        reason: String,
    },

    /// PDU is too short to be valid.
    #[error("PDU too short: expected at least {expected} bytes, got {actual}")]
    PduTooShort {
        /// Minimum expected length
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    /// PDU exceeds the maximum allowed size.
    #[error("PDU too large: max {max} bytes, got {actual}")]
    PduTooLarge {
        /// Maximum allowed size
        max: usize,
        /// Actual size
        actual: usize,
    },

    /// Unknown or reserved opcode.
    #[error("Unknown opcode: 0x{0:06x}")]
    UnknownOpcode(u32),

    // ========================================
    // Security Errors
    // ========================================

    /// Sequence number not newer than the last one seen from `src`.
    #[error("Replay detected: src 0x{src:04x} seq {seq:#08x}")]
    ReplayDetected {
        /// Source address
        src: u16,
        /// Rejected sequence number
        seq: u32,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates an `AuthenticationFailed` error for the network layer.
    #[must_use]
    pub const fn net_auth() -> Self {
        Self::AuthenticationFailed { layer: "network" }
    }

    /// Creates an `AuthenticationFailed` error for the transport layer.
    #[must_use]
    pub const fn trans_auth() -> Self {
        Self::AuthenticationFailed { layer: "transport" }
    }

    /// Creates a `MalformedPdu` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPdu {
            reason: reason.into(),
        }
    }

    /// Creates a `PduTooShort` error.
    #[must_use]
    pub const fn too_short(expected: usize, actual: usize) -> Self {
        Self::PduTooShort { expected, actual }
    }

    /// Creates a `PduTooLarge` error.
    #[must_use]
    pub const fn too_large(max: usize, actual: usize) -> Self {
        Self::PduTooLarge { max, actual }
    }

    /// Creates a `ReplayDetected` error.
    #[must_use]
    pub const fn replay(src: u16, seq: u32) -> Self {
        Self::ReplayDetected { src, seq }
    }

    /// Creates an `Encryption` error.
    pub fn encryption(context: impl Into<String>) -> Self {
        Self::Encryption {
            context: context.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this is a cryptographic error.
    #[must_use]
    pub const fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::Encryption { .. } | Self::KeyDerivation { .. }
        )
    }

    /// Returns `true` if this is a protocol error.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedPdu { .. }
                | Self::PduTooShort { .. }
                | Self::PduTooLarge { .. }
                | Self::UnknownOpcode(_)
        )
    }

    /// Returns `true` if the PDU should be dropped without any report.
    ///
    /// MIC failures and replays look exactly like radio noise from
    /// neighbouring networks.
    #[must_use]
    pub const fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::ReplayDetected { .. }
        )
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
        let err = CoreError::net_auth();
        assert!(err.to_string().contains("network"));

        let err = CoreError::too_short(14, 9);
        assert!(err.to_string().contains("14"));
        assert!(err.to_string().contains('9'));

        let err = CoreError::replay(0x0102, 7);
        assert!(err.to_string().contains("0x0102"));
    }

    #[test]
    fn test_error_classification() {
        assert!(CoreError::trans_auth().is_crypto_error());
        assert!(CoreError::trans_auth().is_silent_drop());
        assert!(CoreError::replay(1, 1).is_silent_drop());
        assert!(!CoreError::replay(1, 1).is_crypto_error());
        assert!(CoreError::UnknownOpcode(0x7F).is_protocol_error());
        assert!(!CoreError::malformed("x").is_silent_drop());
    }

    #[test]
    fn test_common_error_conversion() {
        let common = CommonError::out_of_range("ttl", 200, 0, 127);
        let core: CoreError = common.into();
        assert!(matches!(core, CoreError::Common(_)));
    }
}
