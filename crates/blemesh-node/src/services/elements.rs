// ============================================
// File: crates/blemesh-node/src/services/elements.rs
// ============================================
//! # Element Table
//!
//! ## Creation Reason
//! Per-model configuration state: AppKey bindings, subscriptions and
//! publication. Built from the composition data at start-up.
//!
//! ## Main Functionality
//! - `ElementTable::from_composition`: one element per descriptor,
//!   addresses assigned from the primary address upwards
//! - Binding and subscription operations with per-model capacities
//! - `targets`: elements an incoming message is delivered to
//!
//! ## ⚠️ Important Note for Next Developer
//! - Capacity checks happen before any write so a rejected request
//!   leaves the model unchanged
//!
//! ## Last Modified
//! v0.1.0 - Initial element table

use blemesh_bearer::traits::ModelRecord;
use blemesh_common::time::{PublishPeriod, PublishRetransmit};
use blemesh_common::types::{Address, AppKeyIndex, ModelId};
use blemesh_core::crypto::kdf;
use blemesh_core::protocol::CompositionData;

use crate::error::{NodeError, Result};

// ============================================
// Model State
// ============================================

/// A subscription entry; virtual addresses keep their label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    /// Group or virtual address.
    pub address: Address,
    /// Label UUID for virtual addresses.
    pub label: Option<[u8; 16]>,
}

impl Subscription {
    /// Subscription to a group address.
    #[must_use]
    pub const fn group(address: Address) -> Self {
        Self {
            address,
            label: None,
        }
    }

    /// Subscription to the virtual address of a label.
    #[must_use]
    pub fn virtual_label(label: [u8; 16]) -> Self {
        Self {
            address: Address::new(kdf::virtual_address(&label)),
            label: Some(label),
        }
    }
}

/// Publication state of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publication {
    /// Publish address.
    pub address: Address,
    /// Label UUID for virtual publish addresses.
    pub label: Option<[u8; 16]>,
    /// AppKey used for publishing.
    pub app_idx: AppKeyIndex,
    /// Friendship credential flag.
    pub credential: bool,
    /// Publish TTL.
    pub ttl: u8,
    /// Publish period.
    pub period: PublishPeriod,
    /// Publish retransmissions.
    pub retransmit: PublishRetransmit,
}

/// Configuration state of one model instance.
#[derive(Debug, Clone)]
pub struct ModelState {
    id: ModelId,
    app_keys: Vec<AppKeyIndex>,
    subscriptions: Vec<Subscription>,
    publication: Option<Publication>,
}

impl ModelState {
    fn new(id: ModelId) -> Self {
        Self {
            id,
            app_keys: Vec::new(),
            subscriptions: Vec::new(),
            publication: None,
        }
    }

    /// Model identifier.
    #[must_use]
    pub const fn id(&self) -> ModelId {
        self.id
    }

    /// Bound AppKeys.
    #[must_use]
    pub fn app_keys(&self) -> &[AppKeyIndex] {
        &self.app_keys
    }

    /// `true` if the AppKey is bound.
    #[must_use]
    pub fn is_bound(&self, app_idx: AppKeyIndex) -> bool {
        self.app_keys.contains(&app_idx)
    }

    /// Subscriptions in insertion order.
    #[must_use]
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// `true` if subscribed to the address.
    #[must_use]
    pub fn is_subscribed(&self, address: Address) -> bool {
        self.subscriptions.iter().any(|s| s.address == address)
    }

    /// Publication, if configured.
    #[must_use]
    pub const fn publication(&self) -> Option<&Publication> {
        self.publication.as_ref()
    }
}

/// One element and its models.
#[derive(Debug, Clone)]
pub struct Element {
    address: Address,
    location: u16,
    models: Vec<ModelState>,
}

impl Element {
    /// Element address.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Location descriptor.
    #[must_use]
    pub const fn location(&self) -> u16 {
        self.location
    }

    /// Models of the element.
    #[must_use]
    pub fn models(&self) -> &[ModelState] {
        &self.models
    }

    /// Model by id.
    #[must_use]
    pub fn model(&self, id: ModelId) -> Option<&ModelState> {
        self.models.iter().find(|m| m.id == id)
    }
}

// ============================================
// ElementTable
// ============================================

/// All elements of the node.
#[derive(Debug, Clone)]
pub struct ElementTable {
    elements: Vec<Element>,
    max_app_keys: usize,
    max_subscriptions: usize,
}

impl ElementTable {
    /// Builds the table from composition data.
    #[must_use]
    pub fn from_composition(
        primary: Address,
        comp: &CompositionData,
        max_app_keys: usize,
        max_subscriptions: usize,
    ) -> Self {
        let elements = comp
            .elements
            .iter()
            .enumerate()
            .map(|(i, desc)| Element {
                address: Address::new(primary.value().wrapping_add(i as u16)),
                location: desc.location,
                models: desc.models().map(ModelState::new).collect(),
            })
            .collect();
        Self {
            elements,
            max_app_keys,
            max_subscriptions,
        }
    }

    /// Address of the primary element.
    #[must_use]
    pub fn primary(&self) -> Address {
        self.elements
            .first()
            .map_or(Address::UNASSIGNED, |e| e.address)
    }

    /// All elements.
    #[must_use]
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Element by address.
    #[must_use]
    pub fn element(&self, address: Address) -> Option<&Element> {
        self.elements.iter().find(|e| e.address == address)
    }

    /// `true` if the address belongs to one of the node's elements.
    #[must_use]
    pub fn is_local(&self, address: Address) -> bool {
        self.element(address).is_some()
    }

    /// Model lookup with configuration status errors.
    ///
    /// # Errors
    /// `InvalidAddress` for an unknown element, `InvalidModel` for an
    /// unknown model.
    pub fn model(&self, element: Address, id: ModelId) -> Result<&ModelState> {
        self.element(element)
            .ok_or(NodeError::InvalidAddress(element))?
            .model(id)
            .ok_or(NodeError::InvalidModel {
                element,
                model: id.to_u32(),
            })
    }

    fn model_mut(&mut self, element: Address, id: ModelId) -> Result<&mut ModelState> {
        self.elements
            .iter_mut()
            .find(|e| e.address == element)
            .ok_or(NodeError::InvalidAddress(element))?
            .models
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(NodeError::InvalidModel {
                element,
                model: id.to_u32(),
            })
    }

    /// Elements a message to `dst` is delivered to.
    ///
    /// Fixed group addresses reach the primary element; the caller decides
    /// whether the matching feature is enabled.
    #[must_use]
    pub fn targets(&self, dst: Address) -> Vec<Address> {
        if dst.is_unicast() {
            return self.element(dst).map(|e| vec![e.address]).unwrap_or_default();
        }
        if dst.is_fixed_group() {
            return self.elements.first().map(|e| vec![e.address]).unwrap_or_default();
        }
        self.elements
            .iter()
            .filter(|e| e.models.iter().any(|m| m.is_subscribed(dst)))
            .map(|e| e.address)
            .collect()
    }

    /// `true` if any model subscribes to the address.
    #[must_use]
    pub fn is_subscribed(&self, address: Address) -> bool {
        self.elements
            .iter()
            .flat_map(|e| e.models.iter())
            .any(|m| m.is_subscribed(address))
    }

    /// Label UUIDs subscribed under a virtual address.
    #[must_use]
    pub fn labels_for(&self, address: Address) -> Vec<[u8; 16]> {
        let mut labels: Vec<[u8; 16]> = self
            .elements
            .iter()
            .flat_map(|e| e.models.iter())
            .flat_map(|m| m.subscriptions.iter())
            .filter(|s| s.address == address)
            .filter_map(|s| s.label)
            .collect();
        labels.dedup();
        labels
    }

    // ========================================
    // Bindings
    // ========================================

    /// Binds an AppKey. Returns `false` if it was already bound.
    ///
    /// # Errors
    /// `InvalidAddress`, `InvalidModel`, `InsufficientResources`.
    pub fn bind(&mut self, element: Address, id: ModelId, app_idx: AppKeyIndex) -> Result<bool> {
        let limit = self.max_app_keys;
        let model = self.model_mut(element, id)?;
        if model.is_bound(app_idx) {
            return Ok(false);
        }
        if model.app_keys.len() >= limit {
            return Err(NodeError::insufficient("model_app_keys", limit));
        }
        model.app_keys.push(app_idx);
        Ok(true)
    }

    /// Unbinds an AppKey and clears a publication using it. Returns
    /// `false` if it was not bound.
    ///
    /// # Errors
    /// `InvalidAddress`, `InvalidModel`.
    pub fn unbind(&mut self, element: Address, id: ModelId, app_idx: AppKeyIndex) -> Result<bool> {
        let model = self.model_mut(element, id)?;
        Ok(Self::unbind_model(model, app_idx))
    }

    fn unbind_model(model: &mut ModelState, app_idx: AppKeyIndex) -> bool {
        let before = model.app_keys.len();
        model.app_keys.retain(|k| *k != app_idx);
        if model.publication.is_some_and(|p| p.app_idx == app_idx) {
            model.publication = None;
        }
        model.app_keys.len() != before
    }

    /// Unbinds an AppKey from every model; returns the models changed.
    pub fn unbind_all(&mut self, app_idx: AppKeyIndex) -> Vec<(Address, ModelId)> {
        let mut changed = Vec::new();
        for element in &mut self.elements {
            for model in &mut element.models {
                if Self::unbind_model(model, app_idx) {
                    changed.push((element.address, model.id));
                }
            }
        }
        changed
    }

    // ========================================
    // Subscriptions
    // ========================================

    /// Adds a subscription. Returns `false` if already present.
    ///
    /// # Errors
    /// `InvalidAddress`, `InvalidModel`, `InsufficientResources`.
    pub fn subscribe(&mut self, element: Address, id: ModelId, sub: Subscription) -> Result<bool> {
        let limit = self.max_subscriptions;
        let model = self.model_mut(element, id)?;
        if model.subscriptions.contains(&sub) {
            return Ok(false);
        }
        if model.subscriptions.len() >= limit {
            return Err(NodeError::insufficient("model_subscriptions", limit));
        }
        model.subscriptions.push(sub);
        Ok(true)
    }

    /// Removes a subscription. Returns `false` if it was not present.
    ///
    /// # Errors
    /// `InvalidAddress`, `InvalidModel`.
    pub fn unsubscribe(&mut self, element: Address, id: ModelId, sub: Subscription) -> Result<bool> {
        let model = self.model_mut(element, id)?;
        let before = model.subscriptions.len();
        model.subscriptions.retain(|s| *s != sub);
        Ok(model.subscriptions.len() != before)
    }

    /// Replaces every subscription with one entry.
    ///
    /// # Errors
    /// `InvalidAddress`, `InvalidModel`.
    pub fn overwrite_subscriptions(
        &mut self,
        element: Address,
        id: ModelId,
        sub: Subscription,
    ) -> Result<()> {
        let model = self.model_mut(element, id)?;
        model.subscriptions.clear();
        model.subscriptions.push(sub);
        Ok(())
    }

    /// Removes every subscription.
    ///
    /// # Errors
    /// `InvalidAddress`, `InvalidModel`.
    pub fn clear_subscriptions(&mut self, element: Address, id: ModelId) -> Result<()> {
        self.model_mut(element, id)?.subscriptions.clear();
        Ok(())
    }

    // ========================================
    // Publication
    // ========================================

    /// Sets or clears the publication.
    ///
    /// # Errors
    /// `InvalidAddress`, `InvalidModel`.
    pub fn set_publication(
        &mut self,
        element: Address,
        id: ModelId,
        publication: Option<Publication>,
    ) -> Result<()> {
        self.model_mut(element, id)?.publication = publication;
        Ok(())
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Stored form of one model.
    ///
    /// # Errors
    /// `InvalidAddress`, `InvalidModel`.
    pub fn record(&self, element: Address, id: ModelId) -> Result<ModelRecord> {
        let model = self.model(element, id)?;
        Ok(ModelRecord {
            element,
            model: id,
            app_keys: model.app_keys.iter().map(|k| k.value()).collect(),
            subscriptions: model.subscriptions.iter().map(|s| s.address).collect(),
            labels: model.subscriptions.iter().filter_map(|s| s.label).collect(),
        })
    }

    /// Restores bindings and subscriptions; unknown models are skipped.
    pub fn load(&mut self, records: &[ModelRecord]) {
        for record in records {
            let (max_keys, max_subs) = (self.max_app_keys, self.max_subscriptions);
            let Ok(model) = self.model_mut(record.element, record.model) else {
                continue;
            };
            model.app_keys = record
                .app_keys
                .iter()
                .filter_map(|k| AppKeyIndex::new(*k))
                .take(max_keys)
                .collect();
            let mut labels = record.labels.iter();
            model.subscriptions = record
                .subscriptions
                .iter()
                .map(|addr| {
                    if addr.is_virtual() {
                        Subscription {
                            address: *addr,
                            label: labels.next().copied(),
                        }
                    } else {
                        Subscription::group(*addr)
                    }
                })
                .take(max_subs)
                .collect();
        }
    }

    /// Drops every binding, subscription and publication.
    pub fn reset(&mut self) {
        for model in self.elements.iter_mut().flat_map(|e| e.models.iter_mut()) {
            model.app_keys.clear();
            model.subscriptions.clear();
            model.publication = None;
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use blemesh_core::protocol::ElementDescriptor;

    const PRIMARY: Address = Address::new(0x0001);
    const GENERIC: ModelId = ModelId::Sig(0x1000);

    fn table() -> ElementTable {
        let comp = CompositionData {
            cid: 0x02E5,
            pid: 0,
            vid: 0,
            crpl: 8,
            features: 0,
            elements: vec![
                ElementDescriptor {
                    location: 0,
                    sig_models: vec![0x0000, 0x1000],
                    vendor_models: vec![],
                },
                ElementDescriptor {
                    location: 1,
                    sig_models: vec![0x1000],
                    vendor_models: vec![],
                },
            ],
        };
        ElementTable::from_composition(PRIMARY, &comp, 2, 2)
    }

    fn app(idx: u16) -> AppKeyIndex {
        AppKeyIndex::new(idx).unwrap()
    }

    #[test]
    fn test_addresses_assigned() {
        let table = table();
        assert_eq!(table.primary(), PRIMARY);
        assert!(table.is_local(Address::new(0x0002)));
        assert!(!table.is_local(Address::new(0x0003)));
    }

    #[test]
    fn test_model_lookup_errors() {
        let table = table();
        assert!(matches!(
            table.model(Address::new(0x0009), GENERIC),
            Err(NodeError::InvalidAddress(_))
        ));
        assert!(matches!(
            table.model(Address::new(0x0002), ModelId::CONFIG_SERVER),
            Err(NodeError::InvalidModel { .. })
        ));
    }

    #[test]
    fn test_bind_capacity_and_unbind() {
        let mut table = table();
        assert!(table.bind(PRIMARY, GENERIC, app(0)).unwrap());
        assert!(!table.bind(PRIMARY, GENERIC, app(0)).unwrap());
        assert!(table.bind(PRIMARY, GENERIC, app(1)).unwrap());
        assert!(matches!(
            table.bind(PRIMARY, GENERIC, app(2)),
            Err(NodeError::InsufficientResources { .. })
        ));
        assert_eq!(table.model(PRIMARY, GENERIC).unwrap().app_keys().len(), 2);

        table
            .set_publication(
                PRIMARY,
                GENERIC,
                Some(Publication {
                    address: Address::new(0xC000),
                    label: None,
                    app_idx: app(1),
                    credential: false,
                    ttl: 5,
                    period: PublishPeriod::default(),
                    retransmit: PublishRetransmit::default(),
                }),
            )
            .unwrap();
        assert_eq!(table.unbind_all(app(1)), vec![(PRIMARY, GENERIC)]);
        assert!(table.model(PRIMARY, GENERIC).unwrap().publication().is_none());
        assert!(!table.unbind(PRIMARY, GENERIC, app(1)).unwrap());
    }

    #[test]
    fn test_subscription_targets() {
        let mut table = table();
        let group = Address::new(0xC001);
        table.subscribe(Address::new(0x0002), GENERIC, Subscription::group(group)).unwrap();
        assert_eq!(table.targets(group), vec![Address::new(0x0002)]);
        assert_eq!(table.targets(Address::ALL_NODES), vec![PRIMARY]);
        assert_eq!(table.targets(Address::new(0x0002)), vec![Address::new(0x0002)]);
        assert!(table.targets(Address::new(0x0042)).is_empty());
        assert!(table.targets(Address::new(0xC002)).is_empty());
    }

    #[test]
    fn test_virtual_subscription_labels() {
        let mut table = table();
        let label = [0x5A; 16];
        let sub = Subscription::virtual_label(label);
        assert!(sub.address.is_virtual());
        table.subscribe(PRIMARY, GENERIC, sub).unwrap();
        assert_eq!(table.labels_for(sub.address), vec![label]);

        let record = table.record(PRIMARY, GENERIC).unwrap();
        let mut reloaded = self::table();
        reloaded.load(&[record]);
        assert_eq!(reloaded.labels_for(sub.address), vec![label]);
    }

    #[test]
    fn test_overwrite_and_reset() {
        let mut table = table();
        table.subscribe(PRIMARY, GENERIC, Subscription::group(Address::new(0xC001))).unwrap();
        table.subscribe(PRIMARY, GENERIC, Subscription::group(Address::new(0xC002))).unwrap();
        assert!(table
            .subscribe(PRIMARY, GENERIC, Subscription::group(Address::new(0xC003)))
            .is_err());
        table
            .overwrite_subscriptions(PRIMARY, GENERIC, Subscription::group(Address::new(0xC003)))
            .unwrap();
        assert_eq!(table.model(PRIMARY, GENERIC).unwrap().subscriptions().len(), 1);
        table.reset();
        assert!(!table.is_subscribed(Address::new(0xC003)));
    }
}
