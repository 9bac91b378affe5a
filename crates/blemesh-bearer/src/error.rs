// ============================================
// File: crates/blemesh-bearer/src/error.rs
// ============================================
//! # Bearer Error Types
//!
//! ## Creation Reason
//! Errors raised by the collaborators the node talks to: the bearer that
//! moves raw network PDUs and the persistence layer that stores keys and
//! configuration.
//!
//! ## Error Categories
//! 1. **Bearer Errors**: bind, send and receive failures
//! 2. **Storage Errors**: read, write and decode failures of stored state
//! 3. **Lifecycle Errors**: operations after shutdown, full queues
//!
//! ## ⚠️ Important Note for Next Developer
//! - Send failures are transient; the node logs them and moves on
//! - Storage failures surface as `StorageFailure` status on config replies
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use blemesh_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for bearer and persistence operations.
pub type Result<T> = std::result::Result<T, BearerError>;

// ============================================
// BearerError
// ============================================

/// Bearer and persistence error types.
#[derive(Error, Debug)]
pub enum BearerError {
    // ========================================
    // Bearer Errors
    // ========================================

    /// Failed to bind the bearer socket.
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed {
        /// Address we tried to bind to
        addr: SocketAddr,
        /// Why binding failed
        reason: String,
    },

    /// Send operation failed.
    #[error("Failed to send PDU: {reason}")]
    SendFailed {
        /// Why send failed
        reason: String,
    },

    /// Receive operation failed.
    #[error("Failed to receive PDU: {reason}")]
    ReceiveFailed {
        /// Why receive failed
        reason: String,
    },

    /// Address string could not be parsed.
    #[error("Invalid bearer address: {addr}")]
    InvalidAddress {
        /// The invalid address string
        addr: String,
    },

    /// Outgoing PDU exceeds what the bearer can carry.
    #[error("PDU of {actual} bytes exceeds bearer limit of {max}")]
    PduTooLarge {
        /// Bearer limit
        max: usize,
        /// Offered size
        actual: usize,
    },

    // ========================================
    // Storage Errors
    // ========================================

    /// Stored state could not be read or written.
    #[error("Storage {operation} failed: {reason}")]
    Storage {
        /// What was being done
        operation: &'static str,
        /// Why it failed
        reason: String,
    },

    // ========================================
    // Lifecycle Errors
    // ========================================

    /// A bounded queue is full.
    #[error("Queue full: {queue}")]
    QueueFull {
        /// Which queue
        queue: &'static str,
    },

    /// The bearer is shutting down.
    #[error("Bearer is shutting down")]
    ShuttingDown,

    // ========================================
    // Wrapped Errors
    // ========================================

    /// I/O error from the system.
    #[error("I/O error: {context}")]
    Io {
        /// What was happening when the error occurred
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl BearerError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `BindFailed` error.
    pub fn bind_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Creates a `SendFailed` error.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed {
            reason: reason.into(),
        }
    }

    /// Creates a `Storage` error.
    pub fn storage(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            reason: reason.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if retrying the operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SendFailed { .. } | Self::ReceiveFailed { .. } | Self::QueueFull { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Returns `true` if this is a persistence error.
    #[must_use]
    pub const fn is_storage_error(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<io::Error> for BearerError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            context: "unspecified I/O operation".into(),
            source: err,
        }
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
        let err = BearerError::bind_failed("127.0.0.1:7000".parse().unwrap(), "address in use");
        assert!(err.to_string().contains("127.0.0.1:7000"));
        assert!(err.to_string().contains("address in use"));
    }

    #[test]
    fn test_error_classification() {
        assert!(BearerError::send_failed("no route").is_retryable());
        assert!(!BearerError::ShuttingDown.is_retryable());

        let storage = BearerError::storage("write", "disk full");
        assert!(storage.is_storage_error());
        assert!(!storage.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Interrupted, "interrupted");
        let err: BearerError = io_err.into();
        assert!(err.is_retryable());
    }
}
