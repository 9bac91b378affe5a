// ============================================
// File: crates/blemesh-node/src/error.rs
// ============================================
//! # Node Error Types
//!
//! ## Creation Reason
//! One error type for everything above the codecs: key store, element
//! table, transport state, configuration server and the node task.
//!
//! ## Main Functionality
//! - `NodeError`: categorized errors
//! - `Status::from(&NodeError)`: mapping onto configuration status codes
//! - Classifiers used by the pipeline to decide between a silent drop,
//!   a status reply and a log line
//!
//! ## ⚠️ Important Note for Next Developer
//! - Crypto and replay failures are radio noise; keep them silent
//! - Every configuration failure must map to a status code, add the arm
//!   in `status_for` when a variant is added
//!
//! ## Last Modified
//! v0.1.0 - Initial node errors

use std::io;

use thiserror::Error;

use blemesh_bearer::error::BearerError;
use blemesh_common::error::CommonError;
use blemesh_common::types::Address;
use blemesh_core::error::CoreError;
use blemesh_core::protocol::Status;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

// ============================================
// NodeError
// ============================================

/// Node error types.
#[derive(Error, Debug)]
pub enum NodeError {
    // ========================================
    // Configuration Errors
    // ========================================

    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        /// File path
        path: String,
        /// Failure description
        reason: String,
    },

    /// Configuration value out of range.
    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        /// Offending field
        field: String,
        /// Failure description
        reason: String,
    },

    /// Required configuration value is absent.
    #[error("Missing required configuration: {field}")]
    ConfigMissing {
        /// Missing field
        field: String,
    },

    // ========================================
    // Key Store Errors
    // ========================================

    /// Lookup of a key that is not stored.
    #[error("{kind} key {index:#05x} not found")]
    KeyNotFound {
        /// "net" or "app"
        kind: &'static str,
        /// Key index
        index: u16,
    },

    /// NetKey index does not name a known subnet.
    #[error("Invalid NetKey index {0:#05x}")]
    InvalidNetKey(u16),

    /// AppKey index does not name a known application key.
    #[error("Invalid AppKey index {0:#05x}")]
    InvalidAppKeyIndex(u16),

    /// Index already used with a different key value.
    #[error("Key index {index:#05x} already stored")]
    KeyIndexAlreadyStored {
        /// Key index
        index: u16,
    },

    /// Bounded table is full.
    #[error("Insufficient resources: {resource} limit {limit} reached")]
    InsufficientResources {
        /// Table name
        resource: &'static str,
        /// Table capacity
        limit: usize,
    },

    /// Illegal key refresh phase change.
    #[error("Invalid key refresh transition from phase {from} to {to}")]
    InvalidTransition {
        /// Current phase
        from: u8,
        /// Requested transition
        to: u8,
    },

    /// Key update rejected in the current state.
    #[error("Cannot update key: {reason}")]
    CannotUpdate {
        /// Why
        reason: &'static str,
    },

    /// Key removal rejected in the current state.
    #[error("Cannot remove key: {reason}")]
    CannotRemove {
        /// Why
        reason: &'static str,
    },

    /// AppKey belongs to a different subnet.
    #[error("AppKey {app_idx:#05x} is not bound to NetKey {net_idx:#05x}")]
    InvalidBinding {
        /// NetKey index given
        net_idx: u16,
        /// AppKey index given
        app_idx: u16,
    },

    // ========================================
    // Model Errors
    // ========================================

    /// No element at the address.
    #[error("Invalid element address {0}")]
    InvalidAddress(Address),

    /// Model not present on the element.
    #[error("Model {model} not found on element {element}")]
    InvalidModel {
        /// Element address
        element: Address,
        /// Model id as u32
        model: u32,
    },

    /// Model cannot take AppKey bindings.
    #[error("Cannot bind AppKey to model {model:#06x}")]
    CannotBind {
        /// Model id as u32
        model: u32,
    },

    /// Publication parameters rejected.
    #[error("Invalid publish parameters: {reason}")]
    InvalidPublishParameters {
        /// Why
        reason: &'static str,
    },

    /// Node does not support the requested feature.
    #[error("Feature not supported: {feature}")]
    FeatureNotSupported {
        /// Feature name
        feature: &'static str,
    },

    /// Value cannot be set.
    #[error("Cannot set {field}")]
    CannotSet {
        /// Field name
        field: &'static str,
    },

    // ========================================
    // Transport Errors
    // ========================================

    /// Segmented transmission ran out of retransmissions.
    #[error("Segmented transmission to {dst} timed out")]
    SegmentationTimeout {
        /// Destination
        dst: Address,
    },

    /// Message arrived under a key the model is not bound to.
    #[error("Unauthorized: opcode {opcode:#x} under AppKey {app_idx:?}")]
    Unauthorized {
        /// Access opcode
        opcode: u32,
        /// AppKey index, `None` for the device key
        app_idx: Option<u16>,
    },

    /// A segmented transmission to the destination is already running.
    #[error("Segmented transmission to {dst} already in progress")]
    Busy {
        /// Destination
        dst: Address,
    },

    /// Sequence number space is exhausted for this IV index.
    #[error("Sequence number exhausted")]
    SequenceExhausted,

    // ========================================
    // Lifecycle Errors
    // ========================================

    /// Node failed to start.
    #[error("Node failed to start: {reason}")]
    StartupFailed {
        /// Why
        reason: String,
    },

    /// Node is shutting down.
    #[error("Node is shutting down")]
    ShuttingDown,

    /// Unexpected internal state.
    #[error("Internal error: {message}")]
    Internal {
        /// Description
        message: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Error from core crate.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from bearer crate.
    #[error(transparent)]
    Bearer(#[from] BearerError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NodeError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a config load error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a config validation error.
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a missing-config error.
    pub fn config_missing(field: impl Into<String>) -> Self {
        Self::ConfigMissing { field: field.into() }
    }

    /// Creates a full-table error.
    #[must_use]
    pub const fn insufficient(resource: &'static str, limit: usize) -> Self {
        Self::InsufficientResources { resource, limit }
    }

    /// Creates a startup error.
    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed { reason: reason.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    // ========================================
    // Classification
    // ========================================

    /// `true` for failures that are dropped without any reply or warning.
    #[must_use]
    pub const fn is_silent_drop(&self) -> bool {
        match self {
            Self::Core(e) => e.is_silent_drop(),
            Self::Unauthorized { .. } | Self::KeyNotFound { .. } => true,
            _ => false,
        }
    }

    /// `true` for configuration errors.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. } | Self::ConfigInvalid { .. } | Self::ConfigMissing { .. }
        )
    }

    /// `true` for errors that stop the node from starting.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. } | Self::ConfigMissing { .. } | Self::StartupFailed { .. }
        )
    }

    /// `true` when the operation may succeed if repeated later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Bearer(e) => e.is_retryable(),
            Self::Busy { .. } | Self::SegmentationTimeout { .. } => true,
            _ => false,
        }
    }
}

// ============================================
// Status Mapping
// ============================================

impl From<&NodeError> for Status {
    fn from(err: &NodeError) -> Self {
        match err {
            NodeError::InvalidNetKey(_) => Self::InvalidNetKeyIndex,
            NodeError::KeyNotFound { kind: "net", .. } => Self::InvalidNetKeyIndex,
            NodeError::KeyNotFound { .. } | NodeError::InvalidAppKeyIndex(_) => {
                Self::InvalidAppKeyIndex
            }
            NodeError::KeyIndexAlreadyStored { .. } => Self::KeyIndexAlreadyStored,
            NodeError::InsufficientResources { .. } => Self::InsufficientResources,
            NodeError::InvalidTransition { .. } | NodeError::CannotUpdate { .. } => {
                Self::CannotUpdate
            }
            NodeError::CannotRemove { .. } => Self::CannotRemove,
            NodeError::InvalidBinding { .. } => Self::InvalidBinding,
            NodeError::InvalidAddress(_) => Self::InvalidAddress,
            NodeError::InvalidModel { .. } => Self::InvalidModel,
            NodeError::CannotBind { .. } => Self::CannotBind,
            NodeError::InvalidPublishParameters { .. } => Self::InvalidPublishParameters,
            NodeError::FeatureNotSupported { .. } => Self::FeatureNotSupported,
            NodeError::CannotSet { .. } => Self::CannotSet,
            NodeError::Bearer(e) if e.is_storage_error() => Self::StorageFailure,
            _ => Self::UnspecifiedError,
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
        let err = NodeError::config_load("/etc/blemesh.toml", "file not found");
        assert!(err.to_string().contains("/etc/blemesh.toml"));

        let err = NodeError::InvalidTransition { from: 0, to: 2 };
        assert!(err.to_string().contains("phase 0"));
    }

    #[test]
    fn test_error_classification() {
        let config_err = NodeError::config_invalid("limits.subnets", "must be > 0");
        assert!(config_err.is_config_error());
        assert!(!config_err.is_fatal());

        assert!(NodeError::config_missing("provisioning.dev_key").is_fatal());
        assert!(NodeError::Core(CoreError::net_auth()).is_silent_drop());
        assert!(NodeError::Core(CoreError::replay(0x0001, 7)).is_silent_drop());
        assert!(!NodeError::InvalidNetKey(1).is_silent_drop());
        assert!(NodeError::Busy { dst: Address::new(0x0002) }.is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Status::from(&NodeError::InvalidNetKey(3)), Status::InvalidNetKeyIndex);
        assert_eq!(
            Status::from(&NodeError::KeyNotFound { kind: "app", index: 1 }),
            Status::InvalidAppKeyIndex
        );
        assert_eq!(
            Status::from(&NodeError::KeyIndexAlreadyStored { index: 0 }),
            Status::KeyIndexAlreadyStored
        );
        assert_eq!(
            Status::from(&NodeError::insufficient("app_keys", 16)),
            Status::InsufficientResources
        );
        assert_eq!(
            Status::from(&NodeError::InvalidTransition { from: 0, to: 2 }),
            Status::CannotUpdate
        );
        assert_eq!(Status::from(&NodeError::SequenceExhausted), Status::UnspecifiedError);
    }
}
