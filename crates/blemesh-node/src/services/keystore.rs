// ============================================
// File: crates/blemesh-node/src/services/keystore.rs
// ============================================
//! # Key Store
//!
//! ## Creation Reason
//! Owns every NetKey and AppKey of the node together with the material
//! derived from them, and drives the key refresh procedure.
//!
//! ## Main Functionality
//! - `Subnet`: NetKey slots (current, updated) with derived keys
//! - `AppKey`: AppKey slots with their AIDs
//! - `KeyStore`: bounded slot arenas, lookups, add/update/delete and the
//!   key refresh phase machine
//!
//! ## Key Refresh
//! ```text
//!   Normal ──NetKeyUpdate──▶ InProgress ──transition 2──▶ Finishing
//!     ▲                                                     │
//!     └──────────────── transition 3 (revoke old) ──────────┘
//!
//!   rx: current + updated while refreshing
//!   tx: current in Normal/InProgress, updated in Finishing
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - A failed operation must leave the store untouched; check everything
//!   before writing a slot
//! - `KeyStore` never talks to persistence, callers turn the returned
//!   changes into records
//!
//! ## Last Modified
//! v0.1.0 - Initial key store

use tracing::{debug, info};

use blemesh_bearer::traits::{AppKeyRecord, SubnetRecord};
use blemesh_common::types::{AppKeyIndex, NetKeyIndex};
use blemesh_core::crypto::{kdf, Key128, NetworkKeys};

use crate::error::{NodeError, Result};

// ============================================
// Derivation
// ============================================

/// Derives NID, Network ID and the network-layer keys of a NetKey.
#[must_use]
pub fn derive_network_keys(net_key: &Key128) -> NetworkKeys {
    NetworkKeys::derive(net_key)
}

/// Derives the 6-bit AID of an AppKey.
#[must_use]
pub fn derive_app_aid(app_key: &Key128) -> u8 {
    kdf::k4(app_key.as_bytes())
}

// ============================================
// KeyRefreshPhase
// ============================================

/// Key refresh phase of a subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyRefreshPhase {
    /// Normal operation (phase 0).
    #[default]
    Normal,
    /// New key distributed, old key still used for transmission (phase 1).
    InProgress,
    /// New key used for transmission (phase 2).
    Finishing,
}

impl KeyRefreshPhase {
    /// Wire value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::InProgress => 1,
            Self::Finishing => 2,
        }
    }

    /// Parses a stored value.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Normal),
            1 => Some(Self::InProgress),
            2 => Some(Self::Finishing),
            _ => None,
        }
    }
}

/// Which key of a subnet or AppKey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySlot {
    /// The key in use before the refresh.
    Current,
    /// The key delivered by the refresh.
    Updated,
}

// ============================================
// Subnet
// ============================================

/// One subnet with its NetKey material.
#[derive(Debug, Clone)]
pub struct Subnet {
    net_idx: NetKeyIndex,
    phase: KeyRefreshPhase,
    current: NetworkKeys,
    updated: Option<NetworkKeys>,
    /// Node identity state (0 stopped, 1 running, 2 not supported).
    pub node_identity: u8,
}

impl Subnet {
    /// Creates a subnet in phase Normal.
    #[must_use]
    pub fn new(net_idx: NetKeyIndex, key: &Key128, node_identity: u8) -> Self {
        Self {
            net_idx,
            phase: KeyRefreshPhase::Normal,
            current: derive_network_keys(key),
            updated: None,
            node_identity,
        }
    }

    /// NetKey index.
    #[must_use]
    pub const fn net_idx(&self) -> NetKeyIndex {
        self.net_idx
    }

    /// Key refresh phase.
    #[must_use]
    pub const fn phase(&self) -> KeyRefreshPhase {
        self.phase
    }

    /// Keys of one slot.
    #[must_use]
    pub fn keys(&self, slot: KeySlot) -> Option<&NetworkKeys> {
        match slot {
            KeySlot::Current => Some(&self.current),
            KeySlot::Updated => self.updated.as_ref(),
        }
    }

    /// Keys used for transmission.
    #[must_use]
    pub fn tx_keys(&self) -> &NetworkKeys {
        match (self.phase, &self.updated) {
            (KeyRefreshPhase::Finishing, Some(updated)) => updated,
            _ => &self.current,
        }
    }

    /// Slot used for transmission.
    #[must_use]
    pub fn tx_slot(&self) -> KeySlot {
        if self.phase == KeyRefreshPhase::Finishing && self.updated.is_some() {
            KeySlot::Updated
        } else {
            KeySlot::Current
        }
    }

    /// Keys accepted on receive, current first.
    pub fn rx_keys(&self) -> impl Iterator<Item = (KeySlot, &NetworkKeys)> {
        std::iter::once((KeySlot::Current, &self.current))
            .chain(self.updated.iter().map(|k| (KeySlot::Updated, k)))
    }

    /// Stored form.
    #[must_use]
    pub fn to_record(&self) -> SubnetRecord {
        SubnetRecord {
            net_idx: self.net_idx.value(),
            phase: self.phase.as_byte(),
            key: *self.current.net_key.as_bytes(),
            new_key: self.updated.as_ref().map(|k| *k.net_key.as_bytes()),
            node_identity: self.node_identity,
        }
    }

    fn from_record(record: &SubnetRecord) -> Option<Self> {
        let net_idx = NetKeyIndex::new(record.net_idx)?;
        let phase = KeyRefreshPhase::from_byte(record.phase)?;
        let updated = record
            .new_key
            .map(|k| derive_network_keys(&Key128::from_bytes(k)));
        if phase != KeyRefreshPhase::Normal && updated.is_none() {
            return None;
        }
        Some(Self {
            net_idx,
            phase,
            current: derive_network_keys(&Key128::from_bytes(record.key)),
            updated,
            node_identity: record.node_identity,
        })
    }
}

// ============================================
// AppKey
// ============================================

/// One application key.
#[derive(Debug, Clone)]
pub struct AppKey {
    app_idx: AppKeyIndex,
    net_idx: NetKeyIndex,
    key: Key128,
    aid: u8,
    updated: Option<(Key128, u8)>,
}

impl AppKey {
    fn new(app_idx: AppKeyIndex, net_idx: NetKeyIndex, key: Key128) -> Self {
        let aid = derive_app_aid(&key);
        Self {
            app_idx,
            net_idx,
            key,
            aid,
            updated: None,
        }
    }

    /// AppKey index.
    #[must_use]
    pub const fn app_idx(&self) -> AppKeyIndex {
        self.app_idx
    }

    /// Owning subnet.
    #[must_use]
    pub const fn net_idx(&self) -> NetKeyIndex {
        self.net_idx
    }

    /// `true` once AppKeyUpdate stored a new key.
    #[must_use]
    pub const fn is_updated(&self) -> bool {
        self.updated.is_some()
    }

    /// Key and AID of one slot.
    #[must_use]
    pub fn key(&self, slot: KeySlot) -> Option<(&Key128, u8)> {
        match slot {
            KeySlot::Current => Some((&self.key, self.aid)),
            KeySlot::Updated => self.updated.as_ref().map(|(k, aid)| (k, *aid)),
        }
    }

    /// Keys tried on receive, current first.
    pub fn rx_keys(&self) -> impl Iterator<Item = (&Key128, u8)> {
        std::iter::once((&self.key, self.aid))
            .chain(self.updated.iter().map(|(k, aid)| (k, *aid)))
    }

    /// Stored form.
    #[must_use]
    pub fn to_record(&self) -> AppKeyRecord {
        AppKeyRecord {
            app_idx: self.app_idx.value(),
            net_idx: self.net_idx.value(),
            key: *self.key.as_bytes(),
            new_key: self.updated.as_ref().map(|(k, _)| *k.as_bytes()),
        }
    }

    fn from_record(record: &AppKeyRecord) -> Option<Self> {
        let mut key = Self::new(
            AppKeyIndex::new(record.app_idx)?,
            NetKeyIndex::new(record.net_idx)?,
            Key128::from_bytes(record.key),
        );
        key.updated = record.new_key.map(|k| {
            let k = Key128::from_bytes(k);
            let aid = derive_app_aid(&k);
            (k, aid)
        });
        Some(key)
    }

    fn promote(&mut self) {
        if let Some((key, aid)) = self.updated.take() {
            self.key = key;
            self.aid = aid;
        }
    }
}

// ============================================
// KeyStore
// ============================================

/// Bounded store of subnets and application keys.
#[derive(Debug)]
pub struct KeyStore {
    subnets: Vec<Option<Subnet>>,
    app_keys: Vec<Option<AppKey>>,
}

impl KeyStore {
    /// Creates an empty store with fixed capacities.
    #[must_use]
    pub fn new(max_subnets: usize, max_app_keys: usize) -> Self {
        Self {
            subnets: vec![None; max_subnets],
            app_keys: vec![None; max_app_keys],
        }
    }

    // ========================================
    // Lookups
    // ========================================

    /// Subnet by index.
    ///
    /// # Errors
    /// `KeyNotFound` if absent.
    pub fn lookup_subnet(&self, net_idx: NetKeyIndex) -> Result<&Subnet> {
        self.subnet(net_idx).ok_or(NodeError::KeyNotFound {
            kind: "net",
            index: net_idx.value(),
        })
    }

    /// AppKey by index.
    ///
    /// # Errors
    /// `KeyNotFound` if absent.
    pub fn lookup_app_key(&self, app_idx: AppKeyIndex) -> Result<&AppKey> {
        self.app_key(app_idx).ok_or(NodeError::KeyNotFound {
            kind: "app",
            index: app_idx.value(),
        })
    }

    /// Subnet by index.
    #[must_use]
    pub fn subnet(&self, net_idx: NetKeyIndex) -> Option<&Subnet> {
        self.subnets().find(|s| s.net_idx == net_idx)
    }

    fn subnet_mut(&mut self, net_idx: NetKeyIndex) -> Option<&mut Subnet> {
        self.subnets.iter_mut().flatten().find(|s| s.net_idx == net_idx)
    }

    /// AppKey by index.
    #[must_use]
    pub fn app_key(&self, app_idx: AppKeyIndex) -> Option<&AppKey> {
        self.app_keys().find(|k| k.app_idx == app_idx)
    }

    /// All subnets.
    pub fn subnets(&self) -> impl Iterator<Item = &Subnet> {
        self.subnets.iter().flatten()
    }

    /// All application keys.
    pub fn app_keys(&self) -> impl Iterator<Item = &AppKey> {
        self.app_keys.iter().flatten()
    }

    /// Application keys of a subnet whose AID matches, with the key to try.
    pub fn app_keys_for_aid(
        &self,
        net_idx: NetKeyIndex,
        aid: u8,
    ) -> impl Iterator<Item = (AppKeyIndex, &Key128)> {
        self.app_keys()
            .filter(move |k| k.net_idx == net_idx)
            .flat_map(move |k| {
                k.rx_keys()
                    .filter(move |(_, a)| *a == aid)
                    .map(move |(key, _)| (k.app_idx, key))
            })
    }

    /// Key and AID used to send with an AppKey.
    ///
    /// # Errors
    /// `KeyNotFound` if the AppKey or its subnet is absent.
    pub fn app_tx_key(&self, app_idx: AppKeyIndex) -> Result<(NetKeyIndex, &Key128, u8)> {
        let app = self.lookup_app_key(app_idx)?;
        let subnet = self.lookup_subnet(app.net_idx)?;
        let slot = match subnet.phase {
            KeyRefreshPhase::Finishing if app.is_updated() => KeySlot::Updated,
            _ => KeySlot::Current,
        };
        let (key, aid) = app
            .key(slot)
            .ok_or_else(|| NodeError::internal("updated AppKey slot empty"))?;
        Ok((app.net_idx, key, aid))
    }

    /// Sorted NetKey indexes.
    #[must_use]
    pub fn net_indexes(&self) -> Vec<u16> {
        let mut list: Vec<u16> = self.subnets().map(|s| s.net_idx.value()).collect();
        list.sort_unstable();
        list
    }

    /// Sorted AppKey indexes of a subnet.
    #[must_use]
    pub fn app_indexes(&self, net_idx: NetKeyIndex) -> Vec<u16> {
        let mut list: Vec<u16> = self
            .app_keys()
            .filter(|k| k.net_idx == net_idx)
            .map(|k| k.app_idx.value())
            .collect();
        list.sort_unstable();
        list
    }

    /// Number of stored subnets.
    #[must_use]
    pub fn subnet_count(&self) -> usize {
        self.subnets().count()
    }

    // ========================================
    // NetKeys
    // ========================================

    /// Adds a subnet. Returns `false` when the same key is already stored.
    ///
    /// # Errors
    /// - `KeyIndexAlreadyStored`: index in use with a different key
    /// - `InsufficientResources`: no free slot
    pub fn add_subnet(
        &mut self,
        net_idx: NetKeyIndex,
        key: &Key128,
        node_identity: u8,
    ) -> Result<bool> {
        if let Some(existing) = self.subnet(net_idx) {
            if existing.current.net_key == *key {
                return Ok(false);
            }
            return Err(NodeError::KeyIndexAlreadyStored {
                index: net_idx.value(),
            });
        }
        let limit = self.subnets.len();
        let slot = self
            .subnets
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(NodeError::insufficient("subnets", limit))?;
        *slot = Some(Subnet::new(net_idx, key, node_identity));
        info!(net_idx = %net_idx, "Subnet added");
        Ok(true)
    }

    /// Stores a new NetKey and enters phase InProgress. Returns `false`
    /// when the same new key was already stored.
    ///
    /// # Errors
    /// - `InvalidNetKey`: unknown subnet
    /// - `CannotUpdate`: key equals the current key, differs from an
    ///   already stored new key, or phase is Finishing
    pub fn update_subnet(&mut self, net_idx: NetKeyIndex, key: &Key128) -> Result<bool> {
        let subnet = self
            .subnet_mut(net_idx)
            .ok_or(NodeError::InvalidNetKey(net_idx.value()))?;
        match subnet.phase {
            KeyRefreshPhase::Normal => {
                if subnet.current.net_key == *key {
                    return Err(NodeError::CannotUpdate {
                        reason: "new key equals current key",
                    });
                }
                subnet.updated = Some(derive_network_keys(key));
                subnet.phase = KeyRefreshPhase::InProgress;
                info!(net_idx = %net_idx, "Key refresh started");
                Ok(true)
            }
            KeyRefreshPhase::InProgress => match &subnet.updated {
                Some(updated) if updated.net_key == *key => Ok(false),
                _ => Err(NodeError::CannotUpdate {
                    reason: "different key already stored",
                }),
            },
            KeyRefreshPhase::Finishing => Err(NodeError::CannotUpdate {
                reason: "key refresh is finishing",
            }),
        }
    }

    /// Deletes a subnet. Returns `false` when it did not exist.
    ///
    /// # Errors
    /// `CannotRemove` for the last subnet or while AppKeys reference it.
    pub fn delete_subnet(&mut self, net_idx: NetKeyIndex) -> Result<bool> {
        if self.subnet(net_idx).is_none() {
            return Ok(false);
        }
        if self.subnet_count() == 1 {
            return Err(NodeError::CannotRemove {
                reason: "last subnet",
            });
        }
        if self.app_keys().any(|k| k.net_idx == net_idx) {
            return Err(NodeError::CannotRemove {
                reason: "AppKeys still bound to the subnet",
            });
        }
        for slot in &mut self.subnets {
            if slot.as_ref().is_some_and(|s| s.net_idx == net_idx) {
                *slot = None;
            }
        }
        info!(net_idx = %net_idx, "Subnet deleted");
        Ok(true)
    }

    /// Applies a Key Refresh Phase transition (2 or 3).
    ///
    /// Returns the resulting phase and whether anything changed.
    ///
    /// # Errors
    /// - `InvalidNetKey`: unknown subnet
    /// - `InvalidTransition`: illegal transition, nothing is changed
    pub fn set_phase(
        &mut self,
        net_idx: NetKeyIndex,
        transition: u8,
    ) -> Result<(KeyRefreshPhase, bool)> {
        let subnet = self
            .subnet_mut(net_idx)
            .ok_or(NodeError::InvalidNetKey(net_idx.value()))?;
        let from = subnet.phase;
        match (from, transition) {
            (KeyRefreshPhase::Finishing, 2) | (KeyRefreshPhase::Normal, 3) => Ok((from, false)),
            (KeyRefreshPhase::InProgress, 2) => {
                subnet.phase = KeyRefreshPhase::Finishing;
                info!(net_idx = %net_idx, "Key refresh phase 2");
                Ok((KeyRefreshPhase::Finishing, true))
            }
            (KeyRefreshPhase::Finishing, 3) => {
                self.revoke(net_idx);
                Ok((KeyRefreshPhase::Normal, true))
            }
            _ => Err(NodeError::InvalidTransition {
                from: from.as_byte(),
                to: transition,
            }),
        }
    }

    /// Drops the old keys of a subnet and its AppKeys.
    fn revoke(&mut self, net_idx: NetKeyIndex) {
        if let Some(subnet) = self.subnet_mut(net_idx) {
            if let Some(updated) = subnet.updated.take() {
                subnet.current = updated;
            }
            subnet.phase = KeyRefreshPhase::Normal;
        }
        for key in self.app_keys.iter_mut().flatten() {
            if key.net_idx == net_idx {
                key.promote();
            }
        }
        info!(net_idx = %net_idx, "Key refresh complete, old keys revoked");
    }

    /// Updates the node identity state of a subnet.
    ///
    /// # Errors
    /// `InvalidNetKey` if the subnet is absent.
    pub fn set_node_identity(&mut self, net_idx: NetKeyIndex, identity: u8) -> Result<()> {
        let subnet = self
            .subnet_mut(net_idx)
            .ok_or(NodeError::InvalidNetKey(net_idx.value()))?;
        subnet.node_identity = identity;
        Ok(())
    }

    /// Sets node identity on every subnet.
    pub fn set_node_identity_all(&mut self, identity: u8) {
        for subnet in self.subnets.iter_mut().flatten() {
            subnet.node_identity = identity;
        }
    }

    // ========================================
    // AppKeys
    // ========================================

    /// Adds an AppKey. Returns `false` when the same key is already stored.
    ///
    /// # Errors
    /// - `InvalidNetKey`: unknown subnet, or index owned by another subnet
    /// - `KeyIndexAlreadyStored`: index in use with a different key
    /// - `InsufficientResources`: no free slot
    pub fn add_app_key(
        &mut self,
        net_idx: NetKeyIndex,
        app_idx: AppKeyIndex,
        key: &Key128,
    ) -> Result<bool> {
        if self.subnet(net_idx).is_none() {
            return Err(NodeError::InvalidNetKey(net_idx.value()));
        }
        if let Some(existing) = self.app_key(app_idx) {
            if existing.net_idx != net_idx {
                return Err(NodeError::InvalidNetKey(net_idx.value()));
            }
            if existing.key == *key {
                return Ok(false);
            }
            return Err(NodeError::KeyIndexAlreadyStored {
                index: app_idx.value(),
            });
        }
        let limit = self.app_keys.len();
        let slot = self
            .app_keys
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(NodeError::insufficient("app_keys", limit))?;
        *slot = Some(AppKey::new(app_idx, net_idx, key.clone()));
        debug!(net_idx = %net_idx, app_idx = %app_idx, "AppKey added");
        Ok(true)
    }

    /// Stores a new value for an AppKey during key refresh. Returns
    /// `false` when the same new key was already stored.
    ///
    /// # Errors
    /// - `InvalidNetKey`: unknown subnet
    /// - `InvalidAppKeyIndex`: unknown AppKey
    /// - `InvalidBinding`: AppKey owned by another subnet
    /// - `CannotUpdate`: subnet not in phase InProgress, or a different
    ///   new key was already stored
    pub fn update_app_key(
        &mut self,
        net_idx: NetKeyIndex,
        app_idx: AppKeyIndex,
        key: &Key128,
    ) -> Result<bool> {
        let phase = self
            .subnet(net_idx)
            .ok_or(NodeError::InvalidNetKey(net_idx.value()))?
            .phase;
        let existing = self
            .app_keys
            .iter_mut()
            .flatten()
            .find(|k| k.app_idx == app_idx)
            .ok_or(NodeError::InvalidAppKeyIndex(app_idx.value()))?;
        if existing.net_idx != net_idx {
            return Err(NodeError::InvalidBinding {
                net_idx: net_idx.value(),
                app_idx: app_idx.value(),
            });
        }
        if phase != KeyRefreshPhase::InProgress {
            return Err(NodeError::CannotUpdate {
                reason: "subnet is not in key refresh phase 1",
            });
        }
        if let Some((stored, _)) = &existing.updated {
            if stored == key {
                return Ok(false);
            }
            return Err(NodeError::CannotUpdate {
                reason: "different key already stored",
            });
        }
        existing.updated = Some((key.clone(), derive_app_aid(key)));
        debug!(net_idx = %net_idx, app_idx = %app_idx, "AppKey updated");
        Ok(true)
    }

    /// Deletes an AppKey. Returns `false` when it did not exist.
    ///
    /// # Errors
    /// - `InvalidNetKey`: unknown subnet
    /// - `InvalidBinding`: AppKey owned by another subnet
    pub fn delete_app_key(&mut self, net_idx: NetKeyIndex, app_idx: AppKeyIndex) -> Result<bool> {
        if self.subnet(net_idx).is_none() {
            return Err(NodeError::InvalidNetKey(net_idx.value()));
        }
        let Some(slot) = self
            .app_keys
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|k| k.app_idx == app_idx))
        else {
            return Ok(false);
        };
        if slot.as_ref().is_some_and(|k| k.net_idx != net_idx) {
            return Err(NodeError::InvalidBinding {
                net_idx: net_idx.value(),
                app_idx: app_idx.value(),
            });
        }
        *slot = None;
        debug!(net_idx = %net_idx, app_idx = %app_idx, "AppKey deleted");
        Ok(true)
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Replaces the content with stored records; invalid records are skipped.
    pub fn load(&mut self, subnets: &[SubnetRecord], app_keys: &[AppKeyRecord]) {
        self.reset();
        for (slot, record) in self.subnets.iter_mut().zip(subnets) {
            *slot = Subnet::from_record(record);
        }
        let known: Vec<NetKeyIndex> = self.subnets().map(Subnet::net_idx).collect();
        let valid = app_keys
            .iter()
            .filter_map(AppKey::from_record)
            .filter(|k| known.contains(&k.net_idx));
        for (slot, key) in self.app_keys.iter_mut().zip(valid) {
            *slot = Some(key);
        }
    }

    /// Removes every key.
    pub fn reset(&mut self) {
        self.subnets.iter_mut().for_each(|s| *s = None);
        self.app_keys.iter_mut().for_each(|k| *k = None);
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn net(idx: u16) -> NetKeyIndex {
        NetKeyIndex::new(idx).unwrap()
    }

    fn app(idx: u16) -> AppKeyIndex {
        AppKeyIndex::new(idx).unwrap()
    }

    fn key(byte: u8) -> Key128 {
        Key128::from_bytes([byte; 16])
    }

    fn store() -> KeyStore {
        let mut store = KeyStore::new(2, 2);
        store.add_subnet(net(0), &key(1), 0).unwrap();
        store
    }

    #[test]
    fn test_app_key_add_and_duplicate() {
        let mut store = store();
        assert!(store.add_app_key(net(0), app(0), &key(0xAA)).unwrap());
        assert!(!store.add_app_key(net(0), app(0), &key(0xAA)).unwrap());
        assert!(matches!(
            store.add_app_key(net(0), app(0), &key(0xBB)),
            Err(NodeError::KeyIndexAlreadyStored { index: 0 })
        ));
        assert!(matches!(
            store.add_app_key(net(5), app(1), &key(0xBB)),
            Err(NodeError::InvalidNetKey(5))
        ));
    }

    #[test]
    fn test_app_key_capacity() {
        let mut store = store();
        store.add_app_key(net(0), app(0), &key(0xA0)).unwrap();
        store.add_app_key(net(0), app(1), &key(0xA1)).unwrap();
        let err = store.add_app_key(net(0), app(2), &key(0xA2)).unwrap_err();
        assert!(matches!(err, NodeError::InsufficientResources { .. }));
        assert_eq!(store.app_indexes(net(0)), vec![0, 1]);
    }

    #[test]
    fn test_aid_lookup() {
        let mut store = store();
        store.add_app_key(net(0), app(3), &key(0xA3)).unwrap();
        let aid = derive_app_aid(&key(0xA3));
        let found: Vec<_> = store.app_keys_for_aid(net(0), aid).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, app(3));
        assert_eq!(store.app_keys_for_aid(net(1), aid).count(), 0);
    }

    #[test]
    fn test_key_refresh_full_cycle() {
        let mut store = store();
        store.add_app_key(net(0), app(0), &key(0xA0)).unwrap();

        // updates only allowed in phase 1
        assert!(matches!(
            store.update_app_key(net(0), app(0), &key(0xB0)),
            Err(NodeError::CannotUpdate { .. })
        ));

        assert!(store.update_subnet(net(0), &key(2)).unwrap());
        assert_eq!(store.subnet(net(0)).unwrap().phase(), KeyRefreshPhase::InProgress);
        assert_eq!(store.subnet(net(0)).unwrap().rx_keys().count(), 2);
        assert_eq!(store.subnet(net(0)).unwrap().tx_slot(), KeySlot::Current);

        assert!(store.update_app_key(net(0), app(0), &key(0xB0)).unwrap());
        assert!(!store.update_app_key(net(0), app(0), &key(0xB0)).unwrap());

        let (phase, changed) = store.set_phase(net(0), 2).unwrap();
        assert_eq!(phase, KeyRefreshPhase::Finishing);
        assert!(changed);
        assert_eq!(store.subnet(net(0)).unwrap().tx_slot(), KeySlot::Updated);
        let (_, tx_key, aid) = store.app_tx_key(app(0)).unwrap();
        assert_eq!(*tx_key, key(0xB0));
        assert_eq!(aid, derive_app_aid(&key(0xB0)));

        let (phase, _) = store.set_phase(net(0), 3).unwrap();
        assert_eq!(phase, KeyRefreshPhase::Normal);
        let subnet = store.subnet(net(0)).unwrap();
        assert_eq!(subnet.rx_keys().count(), 1);
        assert_eq!(subnet.tx_keys().net_key, key(2));
        assert!(!store.app_key(app(0)).unwrap().is_updated());
    }

    #[test]
    fn test_invalid_transitions_leave_state() {
        let mut store = store();
        let err = store.set_phase(net(0), 2).unwrap_err();
        assert!(matches!(err, NodeError::InvalidTransition { from: 0, to: 2 }));
        assert_eq!(store.subnet(net(0)).unwrap().phase(), KeyRefreshPhase::Normal);

        // same-phase requests are no-ops
        assert_eq!(store.set_phase(net(0), 3).unwrap(), (KeyRefreshPhase::Normal, false));

        store.update_subnet(net(0), &key(2)).unwrap();
        assert!(store.set_phase(net(0), 3).is_err());
        assert!(store.set_phase(net(0), 1).is_err());
        assert_eq!(store.subnet(net(0)).unwrap().phase(), KeyRefreshPhase::InProgress);
        assert!(matches!(store.set_phase(net(7), 2), Err(NodeError::InvalidNetKey(7))));
    }

    #[test]
    fn test_net_key_update_rules() {
        let mut store = store();
        assert!(store.update_subnet(net(0), &key(1)).is_err());
        store.update_subnet(net(0), &key(2)).unwrap();
        assert!(!store.update_subnet(net(0), &key(2)).unwrap());
        assert!(store.update_subnet(net(0), &key(3)).is_err());
        store.set_phase(net(0), 2).unwrap();
        assert!(store.update_subnet(net(0), &key(2)).is_err());
    }

    #[test]
    fn test_delete_subnet_rules() {
        let mut store = store();
        assert!(matches!(store.delete_subnet(net(0)), Err(NodeError::CannotRemove { .. })));
        store.add_subnet(net(1), &key(9), 0).unwrap();
        store.add_app_key(net(1), app(0), &key(0xA0)).unwrap();
        assert!(matches!(store.delete_subnet(net(1)), Err(NodeError::CannotRemove { .. })));
        assert!(store.delete_app_key(net(1), app(0)).unwrap());
        assert!(store.delete_subnet(net(1)).unwrap());
        assert!(!store.delete_subnet(net(1)).unwrap());
    }

    #[test]
    fn test_delete_app_key_binding() {
        let mut store = store();
        store.add_subnet(net(1), &key(9), 0).unwrap();
        store.add_app_key(net(0), app(0), &key(0xA0)).unwrap();
        assert!(matches!(
            store.delete_app_key(net(1), app(0)),
            Err(NodeError::InvalidBinding { .. })
        ));
        assert!(!store.delete_app_key(net(0), app(4)).unwrap());
    }

    #[test]
    fn test_records_reload() {
        let mut store = store();
        store.add_app_key(net(0), app(0), &key(0xA0)).unwrap();
        store.update_subnet(net(0), &key(2)).unwrap();
        let subnets: Vec<_> = store.subnets().map(Subnet::to_record).collect();
        let apps: Vec<_> = store.app_keys().map(AppKey::to_record).collect();

        let mut reloaded = KeyStore::new(2, 2);
        reloaded.load(&subnets, &apps);
        let subnet = reloaded.subnet(net(0)).unwrap();
        assert_eq!(subnet.phase(), KeyRefreshPhase::InProgress);
        assert_eq!(subnet.keys(KeySlot::Updated).unwrap().net_key, key(2));
        assert!(reloaded.app_key(app(0)).is_some());
    }
}
