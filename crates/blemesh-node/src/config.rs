// ============================================
// File: crates/blemesh-node/src/config.rs
// ============================================
//! # Node Configuration
//!
//! ## Creation Reason
//! Node settings loaded from a TOML file: provisioning data, element
//! composition, table sizes, feature states and SAR timing.
//!
//! ## Main Functionality
//! - `NodeConfig`: root configuration structure
//! - Section types with defaults and validation
//! - `SarConfig`: segmentation and reassembly timing derived from the
//!   step values used on air
//!
//! ## Configuration File Example
//! ```toml
//! [node]
//! log_level = "info"
//! store_path = "/var/lib/blemesh/state.json"
//!
//! [bearer]
//! bind_addr = "0.0.0.0:47110"
//! peers = ["192.168.1.20:47110"]
//!
//! [provisioning]
//! net_key = "7dd7364cd842ad18c17c2b820c84c3d6"
//! dev_key = "9d6dd0e96eb25dc19a40ed9914f8f03f"
//! unicast_address = 0x1201
//! iv_index = 0x12345678
//!
//! [features]
//! relay = "enabled"
//! default_ttl = 7
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every section has defaults; an empty file is a valid (but
//!   unprovisioned) configuration
//! - Keys are only checked for format here; `MeshNode::new` decides
//!   whether they are required
//!
//! ## Last Modified
//! v0.1.0 - Initial node configuration

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use blemesh_common::time::TransmitParams;
use blemesh_common::types::{Address, Features, IvIndex, ModelId, NetKeyIndex, TTL_MAX};
use blemesh_core::crypto::Key128;
use blemesh_core::protocol::{CompositionData, ElementDescriptor};

use crate::error::{NodeError, Result};

// ============================================
// NodeConfig
// ============================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Process-level settings.
    #[serde(default)]
    pub node: NodeSection,

    /// Bearer settings.
    #[serde(default)]
    pub bearer: BearerConfig,

    /// Keys and addresses assigned at provisioning.
    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    /// Elements and models.
    #[serde(default = "default_composition")]
    pub composition: CompositionData,

    /// Table sizes.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Feature and network state at first start.
    #[serde(default)]
    pub features: FeaturesConfig,

    /// Segmentation and reassembly timing.
    #[serde(default)]
    pub sar: SarConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSection::default(),
            bearer: BearerConfig::default(),
            provisioning: ProvisioningConfig::default(),
            composition: default_composition(),
            limits: LimitsConfig::default(),
            features: FeaturesConfig::default(),
            sar: SarConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// - `ConfigLoad`: file cannot be read or parsed
    /// - `ConfigInvalid`: a value is out of range
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NodeError::config_load(path.display().to_string(), e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| NodeError::config_load(path.display().to_string(), e.to_string()))?;

        config.validate()?;
        debug!("Configuration loaded: {} element(s)", config.composition.elements.len());
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    /// Same as [`NodeConfig::load`].
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| NodeError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    /// `ConfigInvalid` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.node.validate()?;
        self.provisioning.validate()?;
        validate_composition(&self.composition, self.provisioning.unicast_address)?;
        self.limits.validate()?;
        self.features.validate()?;
        self.sar.validate()?;
        Ok(())
    }

    /// Serializes the configuration to TOML.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

// ============================================
// Node Section
// ============================================

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Depth of the node event queue.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// JSON state file; state is kept in memory when absent.
    #[serde(default)]
    pub store_path: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_queue_depth() -> usize {
    256
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            queue_depth: default_queue_depth(),
            store_path: None,
        }
    }
}

impl NodeSection {
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(NodeError::config_invalid(
                "node.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }
        if self.queue_depth == 0 {
            return Err(NodeError::config_invalid("node.queue_depth", "must be > 0"));
        }
        Ok(())
    }
}

// ============================================
// Bearer Section
// ============================================

/// UDP bearer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerConfig {
    /// Local socket address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Peers every PDU is sent to.
    #[serde(default)]
    pub peers: Vec<SocketAddr>,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 47110))
}

impl Default for BearerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            peers: Vec::new(),
        }
    }
}

// ============================================
// Provisioning Section
// ============================================

/// Data normally delivered by the provisioner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Primary NetKey, hex.
    #[serde(default)]
    pub net_key: Option<String>,

    /// Index of the primary NetKey.
    #[serde(default)]
    pub net_key_index: u16,

    /// Device key, hex.
    #[serde(default)]
    pub dev_key: Option<String>,

    /// Address of the primary element.
    #[serde(default = "default_unicast")]
    pub unicast_address: u16,

    /// Current IV index.
    #[serde(default)]
    pub iv_index: u32,

    /// IV update in progress.
    #[serde(default)]
    pub iv_update: bool,
}

const fn default_unicast() -> u16 {
    0x0001
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            net_key: None,
            net_key_index: 0,
            dev_key: None,
            unicast_address: default_unicast(),
            iv_index: 0,
            iv_update: false,
        }
    }
}

impl ProvisioningConfig {
    fn validate(&self) -> Result<()> {
        if let Some(key) = &self.net_key {
            Key128::from_hex(key)
                .map_err(|e| NodeError::config_invalid("provisioning.net_key", e.to_string()))?;
        }
        if let Some(key) = &self.dev_key {
            Key128::from_hex(key)
                .map_err(|e| NodeError::config_invalid("provisioning.dev_key", e.to_string()))?;
        }
        NetKeyIndex::try_from(self.net_key_index)
            .map_err(|e| NodeError::config_invalid("provisioning.net_key_index", e.to_string()))?;
        Address::unicast(self.unicast_address)
            .map_err(|e| NodeError::config_invalid("provisioning.unicast_address", e.to_string()))?;
        Ok(())
    }

    /// Parsed primary NetKey.
    ///
    /// # Errors
    /// `ConfigMissing` if no key is configured.
    pub fn net_key(&self) -> Result<Key128> {
        let hex = self
            .net_key
            .as_deref()
            .ok_or_else(|| NodeError::config_missing("provisioning.net_key"))?;
        Key128::from_hex(hex)
            .map_err(|e| NodeError::config_invalid("provisioning.net_key", e.to_string()))
    }

    /// Parsed device key.
    ///
    /// # Errors
    /// `ConfigMissing` if no key is configured.
    pub fn dev_key(&self) -> Result<Key128> {
        let hex = self
            .dev_key
            .as_deref()
            .ok_or_else(|| NodeError::config_missing("provisioning.dev_key"))?;
        Key128::from_hex(hex)
            .map_err(|e| NodeError::config_invalid("provisioning.dev_key", e.to_string()))
    }

    /// Primary element address.
    #[must_use]
    pub const fn primary(&self) -> Address {
        Address::new(self.unicast_address)
    }

    /// Primary NetKey index.
    #[must_use]
    pub const fn net_idx(&self) -> NetKeyIndex {
        NetKeyIndex::masked(self.net_key_index)
    }

    /// IV index state.
    #[must_use]
    pub const fn iv(&self) -> IvIndex {
        IvIndex {
            value: self.iv_index,
            update_in_progress: self.iv_update,
        }
    }
}

// ============================================
// Composition Section
// ============================================

fn default_composition() -> CompositionData {
    CompositionData {
        cid: 0x02E5,
        pid: 0x0000,
        vid: 0x0000,
        crpl: 32,
        features: (Features::RELAY | Features::PROXY | Features::FRIEND).bits(),
        elements: vec![ElementDescriptor {
            location: 0x0000,
            sig_models: vec![0x0000],
            vendor_models: Vec::new(),
        }],
    }
}

fn validate_composition(comp: &CompositionData, primary: u16) -> Result<()> {
    let Some(first) = comp.elements.first() else {
        return Err(NodeError::config_invalid("composition.elements", "at least one element required"));
    };
    if !first.models().any(|m| m == ModelId::CONFIG_SERVER) {
        return Err(NodeError::config_invalid(
            "composition.elements",
            "primary element must contain the configuration server (0x0000)",
        ));
    }
    let last = u32::from(primary) + comp.elements.len() as u32 - 1;
    if last > 0x7FFF {
        return Err(NodeError::config_invalid(
            "composition.elements",
            "element addresses exceed the unicast range",
        ));
    }
    Ok(())
}

// ============================================
// Limits Section
// ============================================

/// Capacities of the bounded tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Subnets (NetKeys).
    #[serde(default = "default_subnets")]
    pub subnets: usize,
    /// Application keys.
    #[serde(default = "default_app_keys")]
    pub app_keys: usize,
    /// AppKey bindings per model.
    #[serde(default = "default_model_slots")]
    pub model_app_keys: usize,
    /// Subscriptions per model.
    #[serde(default = "default_model_slots")]
    pub model_subscriptions: usize,
    /// Replay protection list entries.
    #[serde(default = "default_replay_list")]
    pub replay_list: usize,
    /// Network message cache entries.
    #[serde(default = "default_message_cache")]
    pub message_cache: usize,
    /// Concurrent reassemblies.
    #[serde(default = "default_sar_slots")]
    pub rx_reassemblies: usize,
    /// Concurrent outgoing segmented messages.
    #[serde(default = "default_sar_slots")]
    pub tx_segmented: usize,
}

const fn default_subnets() -> usize {
    4
}

const fn default_app_keys() -> usize {
    16
}

const fn default_model_slots() -> usize {
    4
}

const fn default_replay_list() -> usize {
    32
}

const fn default_message_cache() -> usize {
    32
}

const fn default_sar_slots() -> usize {
    4
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            subnets: default_subnets(),
            app_keys: default_app_keys(),
            model_app_keys: default_model_slots(),
            model_subscriptions: default_model_slots(),
            replay_list: default_replay_list(),
            message_cache: default_message_cache(),
            rx_reassemblies: default_sar_slots(),
            tx_segmented: default_sar_slots(),
        }
    }
}

impl LimitsConfig {
    fn validate(&self) -> Result<()> {
        let fields = [
            ("limits.subnets", self.subnets),
            ("limits.app_keys", self.app_keys),
            ("limits.model_app_keys", self.model_app_keys),
            ("limits.model_subscriptions", self.model_subscriptions),
            ("limits.replay_list", self.replay_list),
            ("limits.message_cache", self.message_cache),
            ("limits.rx_reassemblies", self.rx_reassemblies),
            ("limits.tx_segmented", self.tx_segmented),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(NodeError::config_invalid(field, "must be > 0"));
            }
        }
        Ok(())
    }
}

// ============================================
// Features Section
// ============================================

/// Three-state feature setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureState {
    /// Supported, off.
    Disabled,
    /// Supported, on.
    Enabled,
    /// Not supported.
    NotSupported,
}

impl FeatureState {
    /// Wire value (0, 1, 2).
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Disabled => 0x00,
            Self::Enabled => 0x01,
            Self::NotSupported => 0x02,
        }
    }

    /// Parses a wire value.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Disabled),
            0x01 => Some(Self::Enabled),
            0x02 => Some(Self::NotSupported),
            _ => None,
        }
    }

    /// `true` when enabled.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }

    /// `true` unless not supported.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::NotSupported)
    }
}

/// Feature and network state at first start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// Relay feature.
    #[serde(default = "default_relay")]
    pub relay: FeatureState,
    /// GATT proxy feature.
    #[serde(default = "default_unsupported")]
    pub gatt_proxy: FeatureState,
    /// Friend feature.
    #[serde(default = "default_unsupported")]
    pub friend: FeatureState,
    /// Secure network beacon broadcasting.
    #[serde(default)]
    pub beacon: bool,
    /// Default TTL for outgoing messages.
    #[serde(default = "default_ttl")]
    pub default_ttl: u8,
    /// Relay retransmissions.
    #[serde(default = "default_transmit")]
    pub relay_retransmit: TransmitParams,
    /// Retransmissions of locally originated PDUs.
    #[serde(default = "default_transmit")]
    pub network_transmit: TransmitParams,
}

const fn default_relay() -> FeatureState {
    FeatureState::Enabled
}

const fn default_unsupported() -> FeatureState {
    FeatureState::NotSupported
}

const fn default_ttl() -> u8 {
    7
}

const fn default_transmit() -> TransmitParams {
    TransmitParams::new(2, 1)
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            relay: default_relay(),
            gatt_proxy: default_unsupported(),
            friend: default_unsupported(),
            beacon: false,
            default_ttl: default_ttl(),
            relay_retransmit: default_transmit(),
            network_transmit: default_transmit(),
        }
    }
}

impl FeaturesConfig {
    fn validate(&self) -> Result<()> {
        if self.default_ttl == 1 || self.default_ttl > TTL_MAX {
            return Err(NodeError::config_invalid(
                "features.default_ttl",
                "must be 0 or 2..=127",
            ));
        }
        if self.relay_retransmit.count > 7 || self.relay_retransmit.interval_steps > 31 {
            return Err(NodeError::config_invalid(
                "features.relay_retransmit",
                "count <= 7 and interval_steps <= 31",
            ));
        }
        if self.network_transmit.count > 7 || self.network_transmit.interval_steps > 31 {
            return Err(NodeError::config_invalid(
                "features.network_transmit",
                "count <= 7 and interval_steps <= 31",
            ));
        }
        Ok(())
    }
}

// ============================================
// SAR Section
// ============================================

/// Segmentation and reassembly timing, expressed as the step values of
/// the SAR Transmitter and SAR Receiver states.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SarConfig {
    /// Interval between segments: `(n + 1) * 10` ms.
    pub segment_interval_step: u8,
    /// Retransmissions of unacknowledged segments to a unicast address.
    pub unicast_retrans_count: u8,
    /// Retransmissions without progress to a unicast address.
    pub unicast_retrans_without_progress_count: u8,
    /// Unicast retransmit interval: `(n + 1) * 25` ms.
    pub unicast_retrans_interval_step: u8,
    /// Per-hop increment of the unicast interval: `(n + 1) * 25` ms.
    pub unicast_retrans_interval_increment: u8,
    /// Retransmissions to a group or virtual address.
    pub multicast_retrans_count: u8,
    /// Multicast retransmit interval: `(n + 1) * 25` ms.
    pub multicast_retrans_interval_step: u8,
    /// Acknowledgment delay increment: `n + 1.5` segments.
    pub ack_delay_increment: u8,
    /// Extra acknowledgments sent for long messages.
    pub ack_retrans_count: u8,
    /// Incomplete reassembly lifetime: `(n + 1) * 5` s.
    pub discard_timeout: u8,
    /// Receiver segment interval: `(n + 1) * 10` ms.
    pub receiver_segment_interval_step: u8,
    /// Segment count above which acknowledgments are repeated.
    pub segments_threshold: u8,
}

impl Default for SarConfig {
    fn default() -> Self {
        Self {
            segment_interval_step: 5,
            unicast_retrans_count: 2,
            unicast_retrans_without_progress_count: 2,
            unicast_retrans_interval_step: 7,
            unicast_retrans_interval_increment: 1,
            multicast_retrans_count: 2,
            multicast_retrans_interval_step: 3,
            ack_delay_increment: 1,
            ack_retrans_count: 0,
            discard_timeout: 1,
            receiver_segment_interval_step: 5,
            segments_threshold: 3,
        }
    }
}

impl SarConfig {
    fn validate(&self) -> Result<()> {
        let four_bit = [
            ("sar.segment_interval_step", self.segment_interval_step),
            ("sar.unicast_retrans_count", self.unicast_retrans_count),
            (
                "sar.unicast_retrans_without_progress_count",
                self.unicast_retrans_without_progress_count,
            ),
            ("sar.unicast_retrans_interval_step", self.unicast_retrans_interval_step),
            ("sar.unicast_retrans_interval_increment", self.unicast_retrans_interval_increment),
            ("sar.multicast_retrans_count", self.multicast_retrans_count),
            ("sar.multicast_retrans_interval_step", self.multicast_retrans_interval_step),
            ("sar.discard_timeout", self.discard_timeout),
            ("sar.receiver_segment_interval_step", self.receiver_segment_interval_step),
        ];
        for (field, value) in four_bit {
            if value > 0x0F {
                return Err(NodeError::config_invalid(field, "must be <= 15"));
            }
        }
        if self.ack_delay_increment > 7 {
            return Err(NodeError::config_invalid("sar.ack_delay_increment", "must be <= 7"));
        }
        if self.ack_retrans_count > 3 {
            return Err(NodeError::config_invalid("sar.ack_retrans_count", "must be <= 3"));
        }
        if self.segments_threshold > 0x1F {
            return Err(NodeError::config_invalid("sar.segments_threshold", "must be <= 31"));
        }
        Ok(())
    }

    /// Gap between consecutive segments of one message.
    #[must_use]
    pub fn segment_interval(&self) -> Duration {
        Duration::from_millis((u64::from(self.segment_interval_step) + 1) * 10)
    }

    /// Retransmit timer for a unicast destination sent with `ttl`.
    #[must_use]
    pub fn unicast_retransmit_interval(&self, ttl: u8) -> Duration {
        let base = (u64::from(self.unicast_retrans_interval_step) + 1) * 25;
        if ttl == 0 {
            return Duration::from_millis(base);
        }
        let increment = (u64::from(self.unicast_retrans_interval_increment) + 1) * 25;
        Duration::from_millis(base + increment * u64::from(ttl - 1))
    }

    /// Retransmit timer for a group or virtual destination.
    #[must_use]
    pub fn multicast_retransmit_interval(&self) -> Duration {
        Duration::from_millis((u64::from(self.multicast_retrans_interval_step) + 1) * 25)
    }

    /// Lifetime of an incomplete reassembly without new segments.
    #[must_use]
    pub fn discard_timeout(&self) -> Duration {
        Duration::from_secs((u64::from(self.discard_timeout) + 1) * 5)
    }

    /// Receiver segment interval.
    #[must_use]
    pub fn receiver_segment_interval(&self) -> Duration {
        Duration::from_millis((u64::from(self.receiver_segment_interval_step) + 1) * 10)
    }

    /// Delay before acknowledging a message of `seg_n + 1` segments.
    #[must_use]
    pub fn ack_timeout(&self, seg_n: u8) -> Duration {
        // tenths of a segment interval
        let by_segments = u64::from(seg_n) * 10 + 5;
        let by_increment = u64::from(self.ack_delay_increment) * 10 + 15;
        let rx = self.receiver_segment_interval().as_millis() as u64;
        Duration::from_millis(by_segments.min(by_increment) * rx / 10)
    }

    /// Minimum spacing between acknowledgments of a completed message.
    #[must_use]
    pub fn ack_period(&self) -> Duration {
        let rx = self.receiver_segment_interval().as_millis() as u64;
        Duration::from_millis((u64::from(self.ack_delay_increment) * 10 + 15) * rx / 10)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits.app_keys, 16);
        assert_eq!(config.features.default_ttl, 7);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [provisioning]
            net_key = "7dd7364cd842ad18c17c2b820c84c3d6"
            dev_key = "9d6dd0e96eb25dc19a40ed9914f8f03f"
            unicast_address = 0x1201
            iv_index = 0x12345678

            [features]
            relay = "disabled"
            default_ttl = 5

            [sar]
            discard_timeout = 3
        "#;

        let config = NodeConfig::from_str(toml).unwrap();
        assert_eq!(config.provisioning.primary(), Address::new(0x1201));
        assert_eq!(config.features.relay, FeatureState::Disabled);
        assert_eq!(config.sar.discard_timeout(), Duration::from_secs(20));
        assert_eq!(config.composition.elements.len(), 1);
        assert!(config.provisioning.net_key().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            "[features]\ndefault_ttl = 1",
            "[features]\ndefault_ttl = 200",
            "[provisioning]\nunicast_address = 0xC000",
            "[provisioning]\nnet_key_index = 0x1000",
            "[provisioning]\nnet_key = \"zz\"",
            "[limits]\nsubnets = 0",
            "[sar]\nack_retrans_count = 4",
            "[node]\nlog_level = \"loud\"",
        ];
        for case in cases {
            let err = NodeConfig::from_str(case).unwrap_err();
            assert!(err.is_config_error(), "{case}: {err}");
        }
    }

    #[test]
    fn test_composition_requires_config_server() {
        let toml = r"
            [composition]
            cid = 1
            pid = 0
            vid = 0
            crpl = 8
            features = 0
            [[composition.elements]]
            sig_models = [0x1000]
        ";
        let err = NodeConfig::from_str(toml).unwrap_err();
        assert!(err.to_string().contains("composition.elements"));
    }

    #[test]
    fn test_missing_keys() {
        let config = NodeConfig::default();
        assert!(matches!(config.provisioning.dev_key(), Err(NodeError::ConfigMissing { .. })));
    }

    #[test]
    fn test_sar_defaults() {
        let sar = SarConfig::default();
        assert_eq!(sar.segment_interval(), Duration::from_millis(60));
        assert_eq!(sar.unicast_retransmit_interval(0), Duration::from_millis(200));
        assert_eq!(sar.unicast_retransmit_interval(3), Duration::from_millis(300));
        assert_eq!(sar.multicast_retransmit_interval(), Duration::from_millis(100));
        assert_eq!(sar.discard_timeout(), Duration::from_secs(10));
        // min(0.5, 2.5) * 60 ms
        assert_eq!(sar.ack_timeout(0), Duration::from_millis(30));
        // min(5.5, 2.5) * 60 ms
        assert_eq!(sar.ack_timeout(5), Duration::from_millis(150));
        assert_eq!(sar.ack_period(), Duration::from_millis(150));
    }

    #[test]
    fn test_feature_state_bytes() {
        assert_eq!(FeatureState::from_byte(2), Some(FeatureState::NotSupported));
        assert_eq!(FeatureState::from_byte(3), None);
        assert!(FeatureState::Disabled.is_supported());
        assert!(!FeatureState::NotSupported.is_enabled());
    }

    #[test]
    fn test_to_toml_roundtrips() {
        let config = NodeConfig::from_str("").unwrap();
        let text = config.to_toml();
        let again = NodeConfig::from_str(&text).unwrap();
        assert_eq!(again.limits.subnets, config.limits.subnets);
    }
}
