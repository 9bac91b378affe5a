// ============================================
// File: crates/blemesh-node/src/context.rs
// ============================================
//! # Mesh Context
//!
//! ## Creation Reason
//! All mutable node state lives in one `MeshContext` owned by the node
//! task. Layers receive `&mut MeshContext` instead of reaching for
//! globals.
//!
//! ## Main Functionality
//! - `NodeState`: relay, proxy, friend, beacon, default TTL and transmit
//!   parameters with their stored form
//! - `MeshContext`: key store, element table, heartbeat, replay list,
//!   message cache, IV index and sequence number
//!
//! ## Ownership
//! ```text
//! MeshNode task
//!   └── MeshContext
//!         ├── KeyStore        (subnets, app keys)
//!         ├── ElementTable    (bindings, subscriptions, publication)
//!         ├── NodeState       (feature states)
//!         ├── Heartbeat       (publication, subscription)
//!         ├── ReplayList
//!         └── MessageCache
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - A feature that is `NotSupported` in the configuration stays that way;
//!   stored records and configuration messages cannot enable it
//! - The sequence number survives `reset()`
//! - Sequence numbers are reserved in blocks of `SEQ_STORE_INTERVAL`; the
//!   reservation must be stored before any PDU using it goes out, and a
//!   restart resumes at the stored reservation
//!
//! ## Last Modified
//! v0.1.0 - Initial mesh context

use tracing::{debug, info, trace, warn};

use blemesh_bearer::traits::{NodeStateRecord, SequenceRecord, StoredState};
use blemesh_common::time::TransmitParams;
use blemesh_common::types::{Address, Features, IvIndex, NetKeyIndex, SEQ_MAX};
use blemesh_core::crypto::Key128;
use blemesh_core::protocol::CompositionData;

use crate::config::{FeatureState, FeaturesConfig, NodeConfig};
use crate::error::{NodeError, Result};
use crate::services::elements::ElementTable;
use crate::services::heartbeat::{Heartbeat, HeartbeatPublication};
use crate::services::keystore::KeyStore;
use crate::services::replay::{MessageCache, ReplayList};

/// Sequence numbers reserved per storage write.
pub const SEQ_STORE_INTERVAL: u32 = 128;

// ============================================
// NodeState
// ============================================

/// Node-wide configuration states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeState {
    /// Relay feature.
    pub relay: FeatureState,
    /// Relay retransmit parameters.
    pub relay_retransmit: TransmitParams,
    /// GATT proxy feature.
    pub gatt_proxy: FeatureState,
    /// Friend feature.
    pub friend: FeatureState,
    /// Secure network beacon broadcast.
    pub beacon: bool,
    /// TTL used when a sender asks for the default.
    pub default_ttl: u8,
    /// Repetitions of locally originated PDUs.
    pub network_transmit: TransmitParams,
}

impl NodeState {
    /// Initial state from configuration.
    #[must_use]
    pub const fn from_config(features: &FeaturesConfig) -> Self {
        Self {
            relay: features.relay,
            relay_retransmit: features.relay_retransmit,
            gatt_proxy: features.gatt_proxy,
            friend: features.friend,
            beacon: features.beacon,
            default_ttl: features.default_ttl,
            network_transmit: features.network_transmit,
        }
    }

    /// Stored form.
    #[must_use]
    pub const fn to_record(&self) -> NodeStateRecord {
        NodeStateRecord {
            relay: self.relay.as_byte(),
            relay_retransmit: self.relay_retransmit.to_byte(),
            beacon: self.beacon as u8,
            gatt_proxy: self.gatt_proxy.as_byte(),
            friend: self.friend.as_byte(),
            default_ttl: self.default_ttl,
            network_transmit: self.network_transmit.to_byte(),
        }
    }

    /// Applies a stored record. Unsupported features are left alone.
    pub fn apply_record(&mut self, record: &NodeStateRecord) {
        fn merge(current: &mut FeatureState, stored: u8) {
            if !current.is_supported() {
                return;
            }
            if let Some(state) = FeatureState::from_byte(stored).filter(|s| s.is_supported()) {
                *current = state;
            }
        }
        merge(&mut self.relay, record.relay);
        merge(&mut self.gatt_proxy, record.gatt_proxy);
        merge(&mut self.friend, record.friend);
        self.relay_retransmit = TransmitParams::from_byte(record.relay_retransmit);
        self.network_transmit = TransmitParams::from_byte(record.network_transmit);
        self.beacon = record.beacon == 1;
        if record.default_ttl != 1 && record.default_ttl <= blemesh_common::types::TTL_MAX {
            self.default_ttl = record.default_ttl;
        }
    }

    /// Features currently enabled.
    #[must_use]
    pub fn active_features(&self) -> Features {
        let mut features = Features::default();
        features.set(Features::RELAY, self.relay.is_enabled());
        features.set(Features::PROXY, self.gatt_proxy.is_enabled());
        features.set(Features::FRIEND, self.friend.is_enabled());
        features
    }

    /// Features the node supports.
    #[must_use]
    pub fn supported_features(&self) -> Features {
        let mut features = Features::default();
        features.set(Features::RELAY, self.relay.is_supported());
        features.set(Features::PROXY, self.gatt_proxy.is_supported());
        features.set(Features::FRIEND, self.friend.is_supported());
        features
    }
}

// ============================================
// MeshContext
// ============================================

/// All mutable state of a node.
#[derive(Debug)]
pub struct MeshContext {
    /// Subnets and application keys.
    pub keys: KeyStore,
    /// Elements and model configuration.
    pub elements: ElementTable,
    /// Feature states.
    pub state: NodeState,
    /// States restored on node reset.
    pub defaults: NodeState,
    /// Heartbeat publication and subscription.
    pub heartbeat: Heartbeat,
    /// Replay protection.
    pub replay: ReplayList,
    /// Network message cache.
    pub cache: MessageCache,
    /// IV index.
    pub iv: IvIndex,
    /// Composition data page 0.
    pub composition: CompositionData,
    dev_key: Key128,
    seq: u32,
    seq_limit: u32,
    seq_unsaved: bool,
}

impl MeshContext {
    /// Builds the context of an unprovisioned node from configuration.
    #[must_use]
    pub fn new(config: &NodeConfig, dev_key: Key128) -> Self {
        let limits = &config.limits;
        let state = NodeState::from_config(&config.features);
        let composition = config.composition.clone();
        Self {
            keys: KeyStore::new(limits.subnets, limits.app_keys),
            elements: ElementTable::from_composition(
                config.provisioning.primary(),
                &composition,
                limits.model_app_keys,
                limits.model_subscriptions,
            ),
            state,
            defaults: state,
            heartbeat: Heartbeat::new(),
            replay: ReplayList::new(limits.replay_list),
            cache: MessageCache::new(limits.message_cache),
            iv: config.provisioning.iv(),
            composition,
            dev_key,
            seq: 0,
            seq_limit: 0,
            seq_unsaved: false,
        }
    }

    /// Installs the provisioned primary NetKey.
    ///
    /// # Errors
    /// Key store errors when the index is already used by another key.
    pub fn provision(&mut self, net_idx: NetKeyIndex, net_key: &Key128) -> Result<()> {
        let identity = self.default_node_identity();
        self.keys.add_subnet(net_idx, net_key, identity)?;
        info!(
            primary = %self.primary(),
            net_idx = %net_idx,
            iv = %self.iv,
            "Node provisioned"
        );
        Ok(())
    }

    /// Replaces keys, bindings and node state with stored records.
    ///
    /// Returns `false` when the store holds no subnet and nothing was
    /// loaded.
    ///
    /// The sequence reservation is applied either way; it outlives a
    /// node reset.
    pub fn restore(&mut self, stored: &StoredState) -> bool {
        if let Some(record) = &stored.sequence {
            self.restore_sequence(record);
        }
        if stored.subnets.is_empty() {
            return false;
        }
        self.keys.load(&stored.subnets, &stored.app_keys);
        self.elements.load(&stored.models);
        if let Some(record) = &stored.node {
            self.state.apply_record(record);
        }
        if let Some(record) = &stored.heartbeat_pub {
            self.heartbeat
                .set_publication(HeartbeatPublication::from_record(record));
        }
        self.replay.load(&stored.replay);
        info!(
            subnets = self.keys.subnet_count(),
            app_keys = self.keys.app_keys().count(),
            models = stored.models.len(),
            replay = self.replay.len(),
            seq = self.seq,
            "State restored"
        );
        true
    }

    fn restore_sequence(&mut self, record: &SequenceRecord) {
        if record.seq > self.seq {
            self.seq = record.seq;
        }
        self.seq_limit = self.seq;
        self.iv = IvIndex {
            value: record.iv_index,
            update_in_progress: record.iv_update,
        };
    }

    /// Device key.
    #[must_use]
    pub const fn dev_key(&self) -> &Key128 {
        &self.dev_key
    }

    /// Allocates the next sequence number.
    ///
    /// # Errors
    /// `SequenceExhausted` once the 24-bit space is used up.
    pub fn next_seq(&mut self) -> Result<u32> {
        if self.seq > SEQ_MAX {
            warn!("Sequence number space exhausted");
            return Err(NodeError::SequenceExhausted);
        }
        let seq = self.seq;
        self.seq += 1;
        if seq >= self.seq_limit {
            self.seq_limit = seq.saturating_add(SEQ_STORE_INTERVAL).min(SEQ_MAX + 1);
            self.seq_unsaved = true;
            trace!(limit = self.seq_limit, "Sequence block reserved");
        }
        Ok(seq)
    }

    /// Stored form of the sequence reservation and IV index.
    #[must_use]
    pub const fn sequence_record(&self) -> SequenceRecord {
        SequenceRecord {
            seq: self.seq_limit,
            iv_index: self.iv.value,
            iv_update: self.iv.update_in_progress,
        }
    }

    /// Takes the reservation if it changed since the last call.
    pub fn take_sequence_record(&mut self) -> Option<SequenceRecord> {
        let unsaved = std::mem::take(&mut self.seq_unsaved);
        unsaved.then(|| self.sequence_record())
    }

    /// Next sequence number without allocating it.
    #[must_use]
    pub const fn peek_seq(&self) -> u32 {
        self.seq
    }

    /// Primary element address.
    #[must_use]
    pub fn primary(&self) -> Address {
        self.elements.primary()
    }

    /// `true` once at least one subnet is known.
    #[must_use]
    pub fn is_provisioned(&self) -> bool {
        self.keys.subnet_count() > 0
    }

    /// `true` for one of the node's element addresses.
    #[must_use]
    pub fn is_local(&self, address: Address) -> bool {
        self.elements.is_local(address)
    }

    /// Features currently enabled.
    #[must_use]
    pub fn features(&self) -> Features {
        self.state.active_features()
    }

    /// Node identity state given to new subnets.
    #[must_use]
    pub const fn default_node_identity(&self) -> u8 {
        if self.state.gatt_proxy.is_supported() {
            0
        } else {
            2
        }
    }

    /// `true` if a PDU to `dst` is processed locally.
    #[must_use]
    pub fn accepts(&self, dst: Address) -> bool {
        if dst.is_unicast() {
            return self.is_local(dst);
        }
        if self.heartbeat.is_subscription_dst(dst) {
            return true;
        }
        match dst {
            Address::ALL_NODES => true,
            Address::ALL_RELAYS => self.state.relay.is_enabled(),
            Address::ALL_FRIENDS => self.state.friend.is_enabled(),
            Address::ALL_PROXIES => self.state.gatt_proxy.is_enabled(),
            _ => self.elements.is_subscribed(dst),
        }
    }

    /// Returns the node to its unprovisioned state.
    pub fn reset(&mut self) {
        self.keys.reset();
        self.elements.reset();
        self.state = self.defaults;
        self.heartbeat.disable_publication();
        self.heartbeat.reset_subscription();
        self.replay.clear();
        self.cache.clear();
        debug!(seq = self.seq, "Context reset");
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use blemesh_common::types::ModelId;

    use crate::services::elements::Subscription;

    fn context() -> MeshContext {
        let mut config = NodeConfig::default();
        config.provisioning.unicast_address = 0x0100;
        let mut ctx = MeshContext::new(&config, Key128::from_bytes([0x11; 16]));
        ctx.provision(NetKeyIndex::PRIMARY, &Key128::from_bytes([0x22; 16]))
            .unwrap();
        ctx
    }

    #[test]
    fn test_sequence_allocation() {
        let mut ctx = context();
        assert_eq!(ctx.next_seq().unwrap(), 0);
        assert_eq!(ctx.next_seq().unwrap(), 1);
        assert_eq!(ctx.peek_seq(), 2);
        ctx.seq = SEQ_MAX + 1;
        assert!(matches!(ctx.next_seq(), Err(NodeError::SequenceExhausted)));
    }

    #[test]
    fn test_accepts_fixed_groups_by_feature() {
        let mut ctx = context();
        assert!(ctx.accepts(Address::new(0x0100)));
        assert!(!ctx.accepts(Address::new(0x0200)));
        assert!(ctx.accepts(Address::ALL_NODES));
        assert!(ctx.accepts(Address::ALL_RELAYS));
        assert!(!ctx.accepts(Address::ALL_PROXIES));
        assert!(!ctx.accepts(Address::ALL_FRIENDS));

        ctx.state.relay = FeatureState::Disabled;
        assert!(!ctx.accepts(Address::ALL_RELAYS));
    }

    #[test]
    fn test_accepts_subscriptions() {
        let mut ctx = context();
        let group = Address::new(0xC001);
        assert!(!ctx.accepts(group));
        ctx.elements
            .subscribe(Address::new(0x0100), ModelId::CONFIG_SERVER, Subscription::group(group))
            .unwrap();
        assert!(ctx.accepts(group));
    }

    #[test]
    fn test_record_keeps_unsupported() {
        let mut state = NodeState::from_config(&FeaturesConfig::default());
        let record = NodeStateRecord {
            relay: 0,
            relay_retransmit: 0x21,
            beacon: 1,
            gatt_proxy: 1,
            friend: 1,
            default_ttl: 5,
            network_transmit: 0x10,
        };
        state.apply_record(&record);
        assert_eq!(state.relay, FeatureState::Disabled);
        assert_eq!(state.gatt_proxy, FeatureState::NotSupported);
        assert_eq!(state.friend, FeatureState::NotSupported);
        assert!(state.beacon);
        assert_eq!(state.default_ttl, 5);
        assert_eq!(state.to_record().relay_retransmit, 0x21);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut ctx = context();
        ctx.state.default_ttl = 3;
        ctx.next_seq().unwrap();
        ctx.reset();
        assert!(!ctx.is_provisioned());
        assert_eq!(ctx.state, ctx.defaults);
        assert_eq!(ctx.peek_seq(), 1);
    }

    /// What a store holds after the node ran with `ctx`.
    fn stored(ctx: &mut MeshContext) -> StoredState {
        StoredState {
            subnets: ctx.keys.subnets().map(|s| s.to_record()).collect(),
            sequence: ctx.take_sequence_record(),
            heartbeat_pub: Some(ctx.heartbeat.publication().to_record()),
            replay: ctx.replay.take_pending(),
            ..StoredState::default()
        }
    }

    fn fresh() -> MeshContext {
        let mut config = NodeConfig::default();
        config.provisioning.unicast_address = 0x0100;
        MeshContext::new(&config, Key128::from_bytes([0x11; 16]))
    }

    #[test]
    fn test_sequence_reserved_in_blocks() {
        let mut ctx = context();
        assert!(ctx.take_sequence_record().is_none());
        ctx.next_seq().unwrap();
        let record = ctx.take_sequence_record().unwrap();
        assert_eq!(record.seq, SEQ_STORE_INTERVAL);
        assert!(ctx.take_sequence_record().is_none());

        for _ in 1..SEQ_STORE_INTERVAL {
            ctx.next_seq().unwrap();
        }
        assert!(ctx.take_sequence_record().is_none());
        assert_eq!(ctx.next_seq().unwrap(), SEQ_STORE_INTERVAL);
        assert_eq!(
            ctx.take_sequence_record().map(|r| r.seq),
            Some(2 * SEQ_STORE_INTERVAL)
        );
    }

    #[test]
    fn test_sequence_never_reused_after_restore() {
        let mut ctx = context();
        let used: Vec<u32> = (0..5).map(|_| ctx.next_seq().unwrap()).collect();
        let state = stored(&mut ctx);

        let mut restarted = fresh();
        assert!(restarted.restore(&state));
        assert!(restarted.peek_seq() > *used.iter().max().unwrap());
        assert_eq!(restarted.next_seq().unwrap(), SEQ_STORE_INTERVAL);
        assert_eq!(
            restarted.take_sequence_record().map(|r| r.seq),
            Some(2 * SEQ_STORE_INTERVAL)
        );
    }

    #[test]
    fn test_sequence_restored_without_subnets() {
        let mut ctx = context();
        ctx.iv = IvIndex::new(7);
        ctx.next_seq().unwrap();
        let state = StoredState {
            sequence: ctx.take_sequence_record(),
            ..StoredState::default()
        };

        let mut restarted = fresh();
        assert!(!restarted.restore(&state));
        assert_eq!(restarted.peek_seq(), SEQ_STORE_INTERVAL);
        assert_eq!(restarted.iv, IvIndex::new(7));
    }

    #[test]
    fn test_restore_heartbeat_and_replay() {
        let mut ctx = context();
        ctx.heartbeat.set_publication(HeartbeatPublication {
            dst: Address::new(0xC000),
            count: 4,
            period_log: 3,
            ttl: 7,
            features: Features::RELAY,
            net_idx: NetKeyIndex::PRIMARY,
        });
        let remote = Address::new(0x0200);
        ctx.replay.check_and_update(remote, 40, false).unwrap();
        let state = stored(&mut ctx);

        let mut restarted = fresh();
        assert!(restarted.restore(&state));
        assert_eq!(restarted.heartbeat.publication(), ctx.heartbeat.publication());
        assert!(restarted.heartbeat.publication().is_periodic());
        assert!(restarted.replay.check_and_update(remote, 40, false).is_err());
        assert!(restarted.replay.check_and_update(remote, 41, false).is_ok());
    }

    #[test]
    fn test_restore_empty_store() {
        let mut ctx = context();
        assert!(!ctx.restore(&StoredState::default()));
        assert!(ctx.is_provisioned());
    }
}
