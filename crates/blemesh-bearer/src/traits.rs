// ============================================
// File: crates/blemesh-bearer/src/traits.rs
// ============================================
//! # Collaborator Traits
//!
//! ## Creation Reason
//! The node never talks to a radio or a flash driver directly. It sees a
//! `Bearer` that moves raw network PDUs and a `Persistence` store that
//! keeps keys and configuration across restarts.
//!
//! ## Main Functionality
//! - `Bearer`: send/receive raw network PDUs
//! - `Persistence`: store/load/remove subnets, app keys, model bindings,
//!   node state, sequence reservation, heartbeat publication and replay
//!   entries
//! - Plain record types shared by every store implementation
//!
//! ## ⚠️ Important Note for Next Developer
//! - Implementations must be Send + Sync; the node holds them in `Arc`
//! - Records carry raw key bytes; never log them
//! - `StoredState` upserts are keyed by index, callers rely on that
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use blemesh_common::types::{Address, ModelId};

use crate::error::Result;

/// Largest network PDU an advertising bearer carries.
pub const MAX_PDU_SIZE: usize = 29;

// ============================================
// Bearer Trait
// ============================================

/// Abstract interface for the link that carries network PDUs.
///
/// # Example
/// ```ignore
/// async fn pump<B: Bearer>(bearer: &B) -> Result<()> {
///     loop {
///         let pdu = bearer.recv().await?;
///         handle(&pdu);
///     }
/// }
/// ```
#[async_trait]
pub trait Bearer: Send + Sync {
    /// Transmits one raw network PDU, once.
    ///
    /// # Errors
    /// Returns error if the bearer could not queue the PDU.
    async fn send_raw(&self, pdu: &[u8]) -> Result<()>;

    /// Waits for the next raw network PDU.
    ///
    /// # Errors
    /// `ShuttingDown` once the bearer is closed.
    async fn recv(&self) -> Result<Bytes>;

    /// Stops the bearer; pending and later `recv` calls fail.
    ///
    /// # Errors
    /// Returns error if shutdown fails.
    async fn shutdown(&self) -> Result<()>;

    /// Returns `true` while the bearer accepts traffic.
    fn is_active(&self) -> bool;
}

// ============================================
// Records
// ============================================

/// Stored form of a subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetRecord {
    /// NetKey index.
    pub net_idx: u16,
    /// Key refresh phase (0, 1 or 2).
    pub phase: u8,
    /// Current key.
    pub key: [u8; 16],
    /// Updated key during key refresh.
    pub new_key: Option<[u8; 16]>,
    /// Node identity state.
    pub node_identity: u8,
}

/// Stored form of an application key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppKeyRecord {
    /// AppKey index.
    pub app_idx: u16,
    /// Owning NetKey index.
    pub net_idx: u16,
    /// Current key.
    pub key: [u8; 16],
    /// Updated key during key refresh.
    pub new_key: Option<[u8; 16]>,
}

/// Stored bindings and subscriptions of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Element address.
    pub element: Address,
    /// Model identifier.
    pub model: ModelId,
    /// Bound AppKey indexes.
    pub app_keys: Vec<u16>,
    /// Group and virtual subscription addresses.
    pub subscriptions: Vec<Address>,
    /// Label UUIDs backing virtual subscriptions.
    #[serde(default)]
    pub labels: Vec<[u8; 16]>,
}

/// Stored node-wide configuration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeStateRecord {
    /// Relay state.
    pub relay: u8,
    /// Relay retransmit, wire encoding.
    pub relay_retransmit: u8,
    /// Secure network beacon state.
    pub beacon: u8,
    /// GATT proxy state.
    pub gatt_proxy: u8,
    /// Friend state.
    pub friend: u8,
    /// Default TTL.
    pub default_ttl: u8,
    /// Network transmit, wire encoding.
    pub network_transmit: u8,
}

/// Stored sequence number reservation and IV index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SequenceRecord {
    /// First sequence number not yet reserved; sending resumes here.
    pub seq: u32,
    /// IV index.
    pub iv_index: u32,
    /// IV update procedure in progress.
    pub iv_update: bool,
}

/// Stored heartbeat publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPubRecord {
    /// Destination; unassigned when publication is off.
    pub dst: Address,
    /// Remaining messages.
    pub count: u16,
    /// Log-encoded period.
    pub period_log: u8,
    /// TTL.
    pub ttl: u8,
    /// Feature bits triggering a heartbeat.
    pub features: u16,
    /// NetKey index used for publishing.
    pub net_idx: u16,
}

/// Stored replay protection entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRecord {
    /// Source address.
    pub src: Address,
    /// Last accepted sequence number.
    pub seq: u32,
    /// Accepted under the previous IV index.
    pub old_iv: bool,
}

/// Everything a store holds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoredState {
    /// Subnets by NetKey index.
    #[serde(default)]
    pub subnets: Vec<SubnetRecord>,
    /// Application keys by AppKey index.
    #[serde(default)]
    pub app_keys: Vec<AppKeyRecord>,
    /// Model bindings.
    #[serde(default)]
    pub models: Vec<ModelRecord>,
    /// Node state, absent until first configured.
    #[serde(default)]
    pub node: Option<NodeStateRecord>,
    /// Sequence reservation, absent until the first send.
    #[serde(default)]
    pub sequence: Option<SequenceRecord>,
    /// Heartbeat publication, absent until first configured.
    #[serde(default)]
    pub heartbeat_pub: Option<HeartbeatPubRecord>,
    /// Replay protection entries by source.
    #[serde(default)]
    pub replay: Vec<ReplayRecord>,
}

impl StoredState {
    /// Inserts or replaces a subnet.
    pub fn upsert_subnet(&mut self, record: SubnetRecord) {
        match self.subnets.iter_mut().find(|s| s.net_idx == record.net_idx) {
            Some(slot) => *slot = record,
            None => self.subnets.push(record),
        }
    }

    /// Removes a subnet.
    pub fn remove_subnet(&mut self, net_idx: u16) {
        self.subnets.retain(|s| s.net_idx != net_idx);
    }

    /// Inserts or replaces an application key.
    pub fn upsert_app_key(&mut self, record: AppKeyRecord) {
        match self.app_keys.iter_mut().find(|a| a.app_idx == record.app_idx) {
            Some(slot) => *slot = record,
            None => self.app_keys.push(record),
        }
    }

    /// Removes an application key.
    pub fn remove_app_key(&mut self, app_idx: u16) {
        self.app_keys.retain(|a| a.app_idx != app_idx);
    }

    /// Inserts or replaces replay entries by source.
    pub fn upsert_replay(&mut self, records: Vec<ReplayRecord>) {
        for record in records {
            match self.replay.iter_mut().find(|r| r.src == record.src) {
                Some(slot) => *slot = record,
                None => self.replay.push(record),
            }
        }
    }

    /// Erases keys and configuration but keeps the sequence reservation.
    pub fn reset(&mut self) {
        *self = Self {
            sequence: self.sequence,
            ..Self::default()
        };
    }

    /// Inserts or replaces a model record; an empty record is removed.
    pub fn upsert_model(&mut self, record: ModelRecord) {
        self.models
            .retain(|m| !(m.element == record.element && m.model == record.model));
        if !record.app_keys.is_empty() || !record.subscriptions.is_empty() {
            self.models.push(record);
        }
    }
}

// ============================================
// Persistence Trait
// ============================================

/// Storage for keys and configuration.
///
/// Every committed configuration change is pushed here; `load` is called
/// once at start-up.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Stores or replaces a subnet.
    ///
    /// # Errors
    /// `Storage` if the write fails.
    async fn store_subnet(&self, record: SubnetRecord) -> Result<()>;

    /// Removes a subnet.
    ///
    /// # Errors
    /// `Storage` if the write fails.
    async fn remove_subnet(&self, net_idx: u16) -> Result<()>;

    /// Stores or replaces an application key.
    ///
    /// # Errors
    /// `Storage` if the write fails.
    async fn store_app_key(&self, record: AppKeyRecord) -> Result<()>;

    /// Removes an application key.
    ///
    /// # Errors
    /// `Storage` if the write fails.
    async fn remove_app_key(&self, app_idx: u16) -> Result<()>;

    /// Stores the bindings of one model.
    ///
    /// # Errors
    /// `Storage` if the write fails.
    async fn store_model(&self, record: ModelRecord) -> Result<()>;

    /// Stores node-wide state.
    ///
    /// # Errors
    /// `Storage` if the write fails.
    async fn store_node_state(&self, record: NodeStateRecord) -> Result<()>;

    /// Stores the sequence reservation and IV index.
    ///
    /// # Errors
    /// `Storage` if the write fails.
    async fn store_sequence(&self, record: SequenceRecord) -> Result<()>;

    /// Stores the heartbeat publication.
    ///
    /// # Errors
    /// `Storage` if the write fails.
    async fn store_heartbeat_pub(&self, record: HeartbeatPubRecord) -> Result<()>;

    /// Stores replay protection entries, replacing those of the same source.
    ///
    /// # Errors
    /// `Storage` if the write fails.
    async fn store_replay(&self, records: Vec<ReplayRecord>) -> Result<()>;

    /// Loads everything stored.
    ///
    /// # Errors
    /// `Storage` if the stored data cannot be read or decoded.
    async fn load(&self) -> Result<StoredState>;

    /// Erases everything stored except the sequence reservation, which
    /// must never move backwards under a reused key.
    ///
    /// # Errors
    /// `Storage` if the erase fails.
    async fn clear(&self) -> Result<()>;
}

// ============================================
// Tests
// ============================================
