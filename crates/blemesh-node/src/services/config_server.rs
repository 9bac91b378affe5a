// ============================================
// File: crates/blemesh-node/src/services/config_server.rs
// ============================================
//! # Configuration Server
//!
//! ## Creation Reason
//! State machine behind the Configuration Server model. Each request
//! mutates at most one piece of node state and produces a status reply
//! plus a list of `StateChange` values the node turns into storage
//! writes, heartbeat triggers and resets.
//!
//! ## Main Functionality
//! - `ConfigServer::handle`: typed request → `ConfigOutcome`
//! - `StateChange`: one variant per kind of committed mutation
//! - `StateChange::persist_ops`: storage writes for a change
//!
//! ## Request Flow
//! ```text
//! AccessMessage ──parse──▶ ConfigRequest ──handle──▶ ConfigOutcome
//!                                                     ├── response (reply under device key)
//!                                                     └── changes  ──▶ persist / heartbeat / reset
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Requests with prohibited values get no reply at all; only
//!   recoverable problems are reported through a status code
//! - Failed requests leave state untouched; checks run before writes
//! - Node reset is only signalled here; the node resets after the
//!   reply has been queued
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration server

use tokio::time::Instant;
use tracing::{debug, info, warn};

use blemesh_common::time::{hb_pwr2, PublishPeriod, PublishRetransmit, TransmitParams};
use blemesh_common::types::{
    Address, AppKeyIndex, Features, ModelId, NetKeyIndex, KEY_INDEX_MAX, TTL_DEFAULT, TTL_MAX,
};
use blemesh_core::crypto::kdf;
use blemesh_core::protocol::config::{
    ConfigRequest, ConfigResponse, HeartbeatPubParams, MeshAddress, PublicationParams, Status,
};

use crate::config::FeatureState;
use crate::context::MeshContext;
use crate::effects::PersistOp;
use crate::error::NodeError;
use crate::services::elements::{Publication, Subscription};
use crate::services::heartbeat::HeartbeatPublication;
use crate::services::keystore::KeyRefreshPhase;

// ============================================
// StateChange
// ============================================

/// A committed configuration mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// Subnet added.
    NetKeyAdded(NetKeyIndex),
    /// New NetKey stored, key refresh started.
    NetKeyUpdated(NetKeyIndex),
    /// Subnet removed.
    NetKeyDeleted(NetKeyIndex),
    /// AppKey added.
    AppKeyAdded(AppKeyIndex),
    /// New AppKey value stored.
    AppKeyUpdated(AppKeyIndex),
    /// AppKey removed together with its bindings.
    AppKeyDeleted {
        /// Removed key.
        app_idx: AppKeyIndex,
        /// Models that lost the binding.
        unbound: Vec<(Address, ModelId)>,
    },
    /// Key refresh phase changed.
    KeyRefresh {
        /// Subnet.
        net_idx: NetKeyIndex,
        /// New phase.
        phase: KeyRefreshPhase,
    },
    /// Node identity of one subnet changed.
    NodeIdentity(NetKeyIndex),
    /// Secure network beacon state changed.
    Beacon(bool),
    /// Default TTL changed.
    DefaultTtl(u8),
    /// GATT proxy state set.
    GattProxy {
        /// New state.
        state: FeatureState,
        /// `true` when enabled/disabled flipped.
        toggled: bool,
    },
    /// Friend state set.
    Friend {
        /// New state.
        state: FeatureState,
        /// `true` when enabled/disabled flipped.
        toggled: bool,
    },
    /// Relay state set.
    Relay {
        /// New state.
        state: FeatureState,
        /// New relay retransmit.
        retransmit: TransmitParams,
        /// `true` when enabled/disabled flipped.
        toggled: bool,
    },
    /// Network transmit changed.
    NetworkTransmit(TransmitParams),
    /// Publication of a model changed.
    ModelPublication {
        /// Element.
        element: Address,
        /// Model.
        model: ModelId,
    },
    /// Subscription list of a model changed.
    ModelSubscription {
        /// Element.
        element: Address,
        /// Model.
        model: ModelId,
    },
    /// AppKey binding of a model changed.
    ModelAppBinding {
        /// Element.
        element: Address,
        /// Model.
        model: ModelId,
    },
    /// Heartbeat publication replaced.
    HeartbeatPublication {
        /// A heartbeat is due right away.
        immediate: bool,
    },
    /// Heartbeat subscription replaced.
    HeartbeatSubscription,
    /// Node reset requested.
    NodeReset,
}

impl StateChange {
    /// Feature bits flipped by this change.
    #[must_use]
    pub fn toggled_features(&self) -> Features {
        match self {
            Self::Relay { toggled: true, .. } => Features::RELAY,
            Self::GattProxy { toggled: true, .. } => Features::PROXY,
            Self::Friend { toggled: true, .. } => Features::FRIEND,
            _ => Features::default(),
        }
    }

    /// Storage writes that make this change durable.
    #[must_use]
    pub fn persist_ops(&self, ctx: &MeshContext) -> Vec<PersistOp> {
        let subnet = |net_idx: NetKeyIndex| {
            ctx.keys
                .subnet(net_idx)
                .map(|s| PersistOp::Subnet(s.to_record()))
        };
        let model = |element: Address, model: ModelId| {
            ctx.elements
                .record(element, model)
                .ok()
                .map(PersistOp::Model)
        };
        let node_state = PersistOp::NodeState(ctx.state.to_record());

        match self {
            Self::NetKeyAdded(net_idx) | Self::NetKeyUpdated(net_idx) | Self::NodeIdentity(net_idx) => {
                subnet(*net_idx).into_iter().collect()
            }
            Self::NetKeyDeleted(net_idx) => vec![PersistOp::RemoveSubnet(net_idx.value())],
            Self::AppKeyAdded(app_idx) | Self::AppKeyUpdated(app_idx) => ctx
                .keys
                .app_key(*app_idx)
                .map(|k| PersistOp::AppKey(k.to_record()))
                .into_iter()
                .collect(),
            Self::AppKeyDeleted { app_idx, unbound } => {
                let mut ops = vec![PersistOp::RemoveAppKey(app_idx.value())];
                ops.extend(unbound.iter().filter_map(|(e, m)| model(*e, *m)));
                ops
            }
            Self::KeyRefresh { net_idx, .. } => {
                // phase 3 promotes the AppKeys of the subnet as well
                let mut ops: Vec<PersistOp> = subnet(*net_idx).into_iter().collect();
                ops.extend(
                    ctx.keys
                        .app_keys()
                        .filter(|k| k.net_idx() == *net_idx)
                        .map(|k| PersistOp::AppKey(k.to_record())),
                );
                ops
            }
            Self::GattProxy { state, .. } if !state.is_enabled() => {
                let mut ops: Vec<PersistOp> = ctx
                    .keys
                    .subnets()
                    .map(|s| PersistOp::Subnet(s.to_record()))
                    .collect();
                ops.push(node_state);
                ops
            }
            Self::Beacon(_)
            | Self::DefaultTtl(_)
            | Self::GattProxy { .. }
            | Self::Friend { .. }
            | Self::Relay { .. }
            | Self::NetworkTransmit(_) => vec![node_state],
            Self::ModelPublication { element, model: id }
            | Self::ModelSubscription { element, model: id }
            | Self::ModelAppBinding { element, model: id } => {
                model(*element, *id).into_iter().collect()
            }
            Self::HeartbeatPublication { .. } => vec![PersistOp::HeartbeatPublication(
                ctx.heartbeat.publication().to_record(),
            )],
            // subscription windows do not survive a restart
            Self::HeartbeatSubscription => Vec::new(),
            Self::NodeReset => vec![PersistOp::Clear],
        }
    }
}

// ============================================
// ConfigOutcome
// ============================================

/// Result of one configuration request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOutcome {
    /// Reply to send, `None` when the request is ignored.
    pub response: Option<ConfigResponse>,
    /// Committed mutations.
    pub changes: Vec<StateChange>,
}

impl ConfigOutcome {
    fn ignored() -> Self {
        Self::default()
    }

    fn reply(response: ConfigResponse) -> Self {
        Self {
            response: Some(response),
            changes: Vec::new(),
        }
    }

    fn with(mut self, change: StateChange) -> Self {
        self.changes.push(change);
        self
    }

    fn with_if(self, committed: bool, change: StateChange) -> Self {
        if committed {
            self.with(change)
        } else {
            self
        }
    }

    /// Status code of the reply, if it carries one.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        self.response.as_ref().and_then(ConfigResponse::status)
    }
}

/// Maps a mutation result to `(status, committed)`.
fn outcome(result: Result<bool, NodeError>) -> (Status, bool) {
    match result {
        Ok(changed) => (Status::Success, changed),
        Err(e) => {
            debug!(error = %e, "Configuration request rejected");
            (Status::from(&e), false)
        }
    }
}

// ============================================
// ConfigServer
// ============================================

/// Configuration Server model logic.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigServer;

impl ConfigServer {
    /// Handles one request.
    ///
    /// `rx_net_idx` is the subnet the request arrived on.
    #[allow(clippy::too_many_lines)]
    pub fn handle(
        ctx: &mut MeshContext,
        request: ConfigRequest,
        rx_net_idx: NetKeyIndex,
        now: Instant,
    ) -> ConfigOutcome {
        match request {
            // ---------------- AppKeys ----------------
            ConfigRequest::AppKeyAdd { net_idx, app_idx, key } => {
                let (net, app) = (NetKeyIndex::masked(net_idx), AppKeyIndex::masked(app_idx));
                let (status, committed) = outcome(ctx.keys.add_app_key(net, app, &key));
                ConfigOutcome::reply(ConfigResponse::AppKeyStatus { status, net_idx, app_idx })
                    .with_if(committed, StateChange::AppKeyAdded(app))
            }
            ConfigRequest::AppKeyUpdate { net_idx, app_idx, key } => {
                let (net, app) = (NetKeyIndex::masked(net_idx), AppKeyIndex::masked(app_idx));
                let (status, committed) = outcome(ctx.keys.update_app_key(net, app, &key));
                ConfigOutcome::reply(ConfigResponse::AppKeyStatus { status, net_idx, app_idx })
                    .with_if(committed, StateChange::AppKeyUpdated(app))
            }
            ConfigRequest::AppKeyDelete { net_idx, app_idx } => {
                let (net, app) = (NetKeyIndex::masked(net_idx), AppKeyIndex::masked(app_idx));
                let (status, committed) = outcome(ctx.keys.delete_app_key(net, app));
                let unbound = if committed {
                    ctx.elements.unbind_all(app)
                } else {
                    Vec::new()
                };
                ConfigOutcome::reply(ConfigResponse::AppKeyStatus { status, net_idx, app_idx })
                    .with_if(committed, StateChange::AppKeyDeleted { app_idx: app, unbound })
            }
            ConfigRequest::AppKeyGet { net_idx } => {
                let Some(net) = NetKeyIndex::new(net_idx) else {
                    return ConfigOutcome::ignored();
                };
                let (status, app_indexes) = if ctx.keys.subnet(net).is_some() {
                    (Status::Success, ctx.keys.app_indexes(net))
                } else {
                    (Status::InvalidNetKeyIndex, Vec::new())
                };
                ConfigOutcome::reply(ConfigResponse::AppKeyList {
                    status,
                    net_idx,
                    app_indexes,
                })
            }

            // ---------------- NetKeys ----------------
            ConfigRequest::NetKeyAdd { net_idx, key } => {
                let Some(net) = NetKeyIndex::new(net_idx) else {
                    return ConfigOutcome::ignored();
                };
                let identity = ctx.default_node_identity();
                let (status, committed) = outcome(ctx.keys.add_subnet(net, &key, identity));
                ConfigOutcome::reply(ConfigResponse::NetKeyStatus { status, net_idx })
                    .with_if(committed, StateChange::NetKeyAdded(net))
            }
            ConfigRequest::NetKeyUpdate { net_idx, key } => {
                let Some(net) = NetKeyIndex::new(net_idx) else {
                    return ConfigOutcome::ignored();
                };
                let (status, committed) = outcome(ctx.keys.update_subnet(net, &key));
                ConfigOutcome::reply(ConfigResponse::NetKeyStatus { status, net_idx })
                    .with_if(committed, StateChange::NetKeyUpdated(net))
            }
            ConfigRequest::NetKeyDelete { net_idx } => {
                let Some(net) = NetKeyIndex::new(net_idx) else {
                    return ConfigOutcome::ignored();
                };
                let (status, committed) = if ctx.keys.subnet(net).is_none() {
                    (Status::Success, false)
                } else if net == rx_net_idx {
                    warn!(net_idx = %net, "Refusing to delete the subnet of the request");
                    (Status::CannotRemove, false)
                } else {
                    outcome(ctx.keys.delete_subnet(net))
                };
                ConfigOutcome::reply(ConfigResponse::NetKeyStatus { status, net_idx })
                    .with_if(committed, StateChange::NetKeyDeleted(net))
            }
            ConfigRequest::NetKeyGet => ConfigOutcome::reply(ConfigResponse::NetKeyList {
                net_indexes: ctx.keys.net_indexes(),
            }),

            // ---------------- Node states ----------------
            ConfigRequest::CompositionDataGet { page } => {
                if page != 0 {
                    debug!(page, "Composition page not available, returning page 0");
                }
                ConfigOutcome::reply(ConfigResponse::CompositionDataStatus {
                    page: 0,
                    data: ctx.composition.page0(),
                })
            }
            ConfigRequest::BeaconGet => ConfigOutcome::reply(beacon_status(ctx)),
            ConfigRequest::BeaconSet { beacon } => {
                if beacon > 1 {
                    return ConfigOutcome::ignored();
                }
                let enabled = beacon == 1;
                let changed = ctx.state.beacon != enabled;
                ctx.state.beacon = enabled;
                ConfigOutcome::reply(beacon_status(ctx)).with_if(changed, StateChange::Beacon(enabled))
            }
            ConfigRequest::DefaultTtlGet => ConfigOutcome::reply(ConfigResponse::DefaultTtlStatus {
                ttl: ctx.state.default_ttl,
            }),
            ConfigRequest::DefaultTtlSet { ttl } => {
                if ttl == 1 || ttl > TTL_MAX {
                    return ConfigOutcome::ignored();
                }
                let changed = ctx.state.default_ttl != ttl;
                ctx.state.default_ttl = ttl;
                ConfigOutcome::reply(ConfigResponse::DefaultTtlStatus { ttl })
                    .with_if(changed, StateChange::DefaultTtl(ttl))
            }
            ConfigRequest::GattProxyGet => ConfigOutcome::reply(ConfigResponse::GattProxyStatus {
                proxy: ctx.state.gatt_proxy.as_byte(),
            }),
            ConfigRequest::GattProxySet { proxy } => Self::gatt_proxy_set(ctx, proxy),
            ConfigRequest::FriendGet => ConfigOutcome::reply(ConfigResponse::FriendStatus {
                friend: ctx.state.friend.as_byte(),
            }),
            ConfigRequest::FriendSet { friend } => Self::friend_set(ctx, friend),
            ConfigRequest::RelayGet => ConfigOutcome::reply(relay_status(ctx)),
            ConfigRequest::RelaySet { relay, retransmit } => Self::relay_set(ctx, relay, retransmit),
            ConfigRequest::NetworkTransmitGet => {
                ConfigOutcome::reply(ConfigResponse::NetworkTransmitStatus {
                    transmit: ctx.state.network_transmit,
                })
            }
            ConfigRequest::NetworkTransmitSet { transmit } => {
                ctx.state.network_transmit = transmit;
                ConfigOutcome::reply(ConfigResponse::NetworkTransmitStatus { transmit })
                    .with(StateChange::NetworkTransmit(transmit))
            }

            // ---------------- Key refresh / identity ----------------
            ConfigRequest::KeyRefreshPhaseGet { net_idx } => {
                let Some(net) = NetKeyIndex::new(net_idx) else {
                    return ConfigOutcome::ignored();
                };
                let (status, phase) = match ctx.keys.subnet(net) {
                    Some(s) => (Status::Success, s.phase().as_byte()),
                    None => (Status::InvalidNetKeyIndex, 0),
                };
                ConfigOutcome::reply(ConfigResponse::KeyRefreshPhaseStatus { status, net_idx, phase })
            }
            ConfigRequest::KeyRefreshPhaseSet { net_idx, transition } => {
                Self::key_refresh_set(ctx, net_idx, transition)
            }
            ConfigRequest::NodeIdentityGet { net_idx } => {
                let Some(net) = NetKeyIndex::new(net_idx) else {
                    return ConfigOutcome::ignored();
                };
                let (status, identity) = match ctx.keys.subnet(net) {
                    Some(s) => (Status::Success, s.node_identity),
                    None => (Status::InvalidNetKeyIndex, 0),
                };
                ConfigOutcome::reply(ConfigResponse::NodeIdentityStatus { status, net_idx, identity })
            }
            ConfigRequest::NodeIdentitySet { net_idx, identity } => {
                Self::node_identity_set(ctx, net_idx, identity)
            }

            // ---------------- Models ----------------
            ConfigRequest::ModelPublicationGet { element, model } => {
                if !element.is_unicast() {
                    return ConfigOutcome::ignored();
                }
                let response = match ctx.elements.model(element, model) {
                    Ok(state) => pub_status(Status::Success, element, model, state.publication()),
                    Err(e) => pub_status(Status::from(&e), element, model, None),
                };
                ConfigOutcome::reply(response)
            }
            ConfigRequest::ModelPublicationSet { element, params, model } => {
                Self::publication_set(ctx, element, &params, model)
            }
            ConfigRequest::ModelSubscriptionAdd { element, address, model } => {
                Self::subscription_change(ctx, SubOp::Add, element, address, model)
            }
            ConfigRequest::ModelSubscriptionDelete { element, address, model } => {
                Self::subscription_change(ctx, SubOp::Delete, element, address, model)
            }
            ConfigRequest::ModelSubscriptionOverwrite { element, address, model } => {
                Self::subscription_change(ctx, SubOp::Overwrite, element, address, model)
            }
            ConfigRequest::ModelSubscriptionDeleteAll { element, model } => {
                if !element.is_unicast() {
                    return ConfigOutcome::ignored();
                }
                let (status, committed) = match ctx.elements.clear_subscriptions(element, model) {
                    Ok(()) => (Status::Success, true),
                    Err(e) => (Status::from(&e), false),
                };
                ConfigOutcome::reply(ConfigResponse::ModelSubscriptionStatus {
                    status,
                    element,
                    address: Address::UNASSIGNED,
                    model,
                })
                .with_if(committed, StateChange::ModelSubscription { element, model })
            }
            ConfigRequest::ModelSubscriptionGet { element, model } => {
                if !element.is_unicast() {
                    return ConfigOutcome::ignored();
                }
                let (status, addresses) = match ctx.elements.model(element, model) {
                    Ok(state) => (
                        Status::Success,
                        state.subscriptions().iter().map(|s| s.address).collect(),
                    ),
                    Err(e) => (Status::from(&e), Vec::new()),
                };
                ConfigOutcome::reply(ConfigResponse::ModelSubscriptionList {
                    status,
                    element,
                    model,
                    addresses,
                })
            }
            ConfigRequest::ModelAppBind { element, app_idx, model } => {
                Self::app_binding(ctx, true, element, app_idx, model)
            }
            ConfigRequest::ModelAppUnbind { element, app_idx, model } => {
                Self::app_binding(ctx, false, element, app_idx, model)
            }
            ConfigRequest::ModelAppGet { element, model } => {
                if !element.is_unicast() {
                    return ConfigOutcome::ignored();
                }
                let (status, app_indexes) = match ctx.elements.model(element, model) {
                    Ok(state) => (
                        Status::Success,
                        state.app_keys().iter().map(|k| k.value()).collect(),
                    ),
                    Err(e) => (Status::from(&e), Vec::new()),
                };
                ConfigOutcome::reply(ConfigResponse::ModelAppList {
                    status,
                    element,
                    model,
                    app_indexes,
                })
            }

            // ---------------- Heartbeat ----------------
            ConfigRequest::HeartbeatPublicationGet => {
                ConfigOutcome::reply(ConfigResponse::HeartbeatPublicationStatus {
                    status: Status::Success,
                    params: ctx.heartbeat.publication().to_params(),
                })
            }
            ConfigRequest::HeartbeatPublicationSet(params) => Self::heartbeat_pub_set(ctx, params),
            ConfigRequest::HeartbeatSubscriptionGet => {
                ConfigOutcome::reply(ConfigResponse::HeartbeatSubscriptionStatus {
                    status: Status::Success,
                    params: ctx.heartbeat.subscription().to_params(now),
                })
            }
            ConfigRequest::HeartbeatSubscriptionSet { src, dst, period_log } => {
                if !(src.is_unassigned() || src.is_unicast()) {
                    return ConfigOutcome::ignored();
                }
                if dst.is_virtual() || dst.is_rfu() || (dst.is_unicast() && dst != ctx.primary()) {
                    return ConfigOutcome::ignored();
                }
                if period_log > 0x11 {
                    return ConfigOutcome::ignored();
                }
                let params = ctx.heartbeat.set_subscription(src, dst, period_log, now);
                ConfigOutcome::reply(ConfigResponse::HeartbeatSubscriptionStatus {
                    status: Status::Success,
                    params,
                })
                .with(StateChange::HeartbeatSubscription)
            }

            // ---------------- Misc ----------------
            ConfigRequest::LpnPollTimeoutGet { lpn } => {
                if !lpn.is_unicast() {
                    return ConfigOutcome::ignored();
                }
                ConfigOutcome::reply(ConfigResponse::LpnPollTimeoutStatus { lpn, timeout: 0 })
            }
            ConfigRequest::NodeReset => {
                info!(primary = %ctx.primary(), "Node reset requested");
                ConfigOutcome::reply(ConfigResponse::NodeResetStatus).with(StateChange::NodeReset)
            }
        }
    }

    // ========================================
    // Feature states
    // ========================================

    fn gatt_proxy_set(ctx: &mut MeshContext, proxy: u8) -> ConfigOutcome {
        let Some(requested) = FeatureState::from_byte(proxy).filter(|_| proxy <= 1) else {
            return ConfigOutcome::ignored();
        };
        let current = ctx.state.gatt_proxy;
        if !current.is_supported() {
            return ConfigOutcome::reply(ConfigResponse::GattProxyStatus {
                proxy: current.as_byte(),
            });
        }
        let toggled = current != requested;
        ctx.state.gatt_proxy = requested;
        if !requested.is_enabled() {
            ctx.keys.set_node_identity_all(0);
        }
        ConfigOutcome::reply(ConfigResponse::GattProxyStatus {
            proxy: requested.as_byte(),
        })
        .with_if(
            toggled,
            StateChange::GattProxy {
                state: requested,
                toggled,
            },
        )
    }

    fn friend_set(ctx: &mut MeshContext, friend: u8) -> ConfigOutcome {
        let Some(requested) = FeatureState::from_byte(friend).filter(|_| friend <= 1) else {
            return ConfigOutcome::ignored();
        };
        let current = ctx.state.friend;
        if !current.is_supported() {
            return ConfigOutcome::reply(ConfigResponse::FriendStatus {
                friend: current.as_byte(),
            });
        }
        let toggled = current != requested;
        ctx.state.friend = requested;
        ConfigOutcome::reply(ConfigResponse::FriendStatus {
            friend: requested.as_byte(),
        })
        .with_if(
            toggled,
            StateChange::Friend {
                state: requested,
                toggled,
            },
        )
    }

    fn relay_set(ctx: &mut MeshContext, relay: u8, retransmit: TransmitParams) -> ConfigOutcome {
        let Some(requested) = FeatureState::from_byte(relay).filter(|_| relay <= 1) else {
            return ConfigOutcome::ignored();
        };
        if !ctx.state.relay.is_supported() {
            return ConfigOutcome::reply(relay_status(ctx));
        }
        let toggled = ctx.state.relay != requested;
        let changed = toggled || ctx.state.relay_retransmit != retransmit;
        ctx.state.relay = requested;
        ctx.state.relay_retransmit = retransmit;
        ConfigOutcome::reply(relay_status(ctx)).with_if(
            changed,
            StateChange::Relay {
                state: requested,
                retransmit,
                toggled,
            },
        )
    }

    // ========================================
    // Key refresh / node identity
    // ========================================

    fn key_refresh_set(ctx: &mut MeshContext, net_idx: u16, transition: u8) -> ConfigOutcome {
        let Some(net) = NetKeyIndex::new(net_idx) else {
            return ConfigOutcome::ignored();
        };
        let Some(current) = ctx.keys.subnet(net).map(|s| s.phase()) else {
            return ConfigOutcome::reply(ConfigResponse::KeyRefreshPhaseStatus {
                status: Status::InvalidNetKeyIndex,
                net_idx,
                phase: 0,
            });
        };
        match ctx.keys.set_phase(net, transition) {
            Ok((phase, changed)) => ConfigOutcome::reply(ConfigResponse::KeyRefreshPhaseStatus {
                status: Status::Success,
                net_idx,
                phase: phase.as_byte(),
            })
            .with_if(changed, StateChange::KeyRefresh { net_idx: net, phase }),
            Err(e) => {
                debug!(net_idx = %net, error = %e, "Key refresh transition rejected");
                ConfigOutcome::reply(ConfigResponse::KeyRefreshPhaseStatus {
                    status: Status::CannotUpdate,
                    net_idx,
                    phase: current.as_byte(),
                })
            }
        }
    }

    fn node_identity_set(ctx: &mut MeshContext, net_idx: u16, identity: u8) -> ConfigOutcome {
        let Some(net) = NetKeyIndex::new(net_idx) else {
            return ConfigOutcome::ignored();
        };
        if identity > 1 {
            return ConfigOutcome::ignored();
        }
        let Some(current) = ctx.keys.subnet(net).map(|s| s.node_identity) else {
            return ConfigOutcome::reply(ConfigResponse::NodeIdentityStatus {
                status: Status::InvalidNetKeyIndex,
                net_idx,
                identity,
            });
        };
        let mut changed = false;
        if ctx.state.gatt_proxy.is_enabled() && current != identity {
            changed = ctx.keys.set_node_identity(net, identity).is_ok();
        }
        let identity = ctx.keys.subnet(net).map_or(current, |s| s.node_identity);
        ConfigOutcome::reply(ConfigResponse::NodeIdentityStatus {
            status: Status::Success,
            net_idx,
            identity,
        })
        .with_if(changed, StateChange::NodeIdentity(net))
    }

    // ========================================
    // Models
    // ========================================

    fn publication_set(
        ctx: &mut MeshContext,
        element: Address,
        params: &PublicationParams,
        model: ModelId,
    ) -> ConfigOutcome {
        if !element.is_unicast() {
            return ConfigOutcome::ignored();
        }
        if params.ttl > TTL_MAX && params.ttl != TTL_DEFAULT {
            return ConfigOutcome::ignored();
        }
        let fail = |status| ConfigOutcome::reply(pub_status(status, element, model, None));

        if let Err(e) = ctx.elements.model(element, model) {
            return fail(Status::from(&e));
        }
        if params.credential {
            return fail(Status::FeatureNotSupported);
        }

        let (address, label) = match params.address {
            MeshAddress::Plain(addr) => (addr, None),
            MeshAddress::Label(label) => (Address::new(kdf::virtual_address(&label)), Some(label)),
        };

        let publication = if address.is_unassigned() {
            None
        } else {
            let app_idx = AppKeyIndex::masked(params.app_idx);
            if ctx.keys.app_key(app_idx).is_none() {
                return fail(Status::InvalidAppKeyIndex);
            }
            if !ctx
                .elements
                .model(element, model)
                .is_ok_and(|m| m.is_bound(app_idx))
            {
                return fail(Status::InvalidBinding);
            }
            Some(Publication {
                address,
                label,
                app_idx,
                credential: params.credential,
                ttl: params.ttl,
                period: params.period,
                retransmit: params.retransmit,
            })
        };

        if let Err(e) = ctx.elements.set_publication(element, model, publication) {
            return fail(Status::from(&e));
        }
        debug!(element = %element, model = %model, address = %address, "Publication set");
        ConfigOutcome::reply(pub_status(Status::Success, element, model, publication.as_ref()))
            .with(StateChange::ModelPublication { element, model })
    }

    fn subscription_change(
        ctx: &mut MeshContext,
        op: SubOp,
        element: Address,
        address: MeshAddress,
        model: ModelId,
    ) -> ConfigOutcome {
        if !element.is_unicast() {
            return ConfigOutcome::ignored();
        }
        let subscription = match address {
            MeshAddress::Plain(addr) => Subscription::group(addr),
            MeshAddress::Label(label) => Subscription::virtual_label(label),
        };
        let reply = |status| ConfigResponse::ModelSubscriptionStatus {
            status,
            element,
            address: subscription.address,
            model,
        };

        if let Err(e) = ctx.elements.model(element, model) {
            return ConfigOutcome::reply(reply(Status::from(&e)));
        }
        if subscription.label.is_none()
            && !(subscription.address.is_subscribable() && !subscription.address.is_virtual())
        {
            return ConfigOutcome::reply(reply(Status::InvalidAddress));
        }

        let result = match op {
            SubOp::Add => ctx.elements.subscribe(element, model, subscription),
            SubOp::Delete => ctx.elements.unsubscribe(element, model, subscription),
            SubOp::Overwrite => ctx
                .elements
                .overwrite_subscriptions(element, model, subscription)
                .map(|()| true),
        };
        let (status, committed) = outcome(result);
        ConfigOutcome::reply(reply(status))
            .with_if(committed, StateChange::ModelSubscription { element, model })
    }

    fn app_binding(
        ctx: &mut MeshContext,
        bind: bool,
        element: Address,
        app_idx: u16,
        model: ModelId,
    ) -> ConfigOutcome {
        if !element.is_unicast() {
            return ConfigOutcome::ignored();
        }
        let reply = |status| {
            ConfigOutcome::reply(ConfigResponse::ModelAppStatus {
                status,
                element,
                app_idx,
                model,
            })
        };
        if let Err(e) = ctx.elements.model(element, model) {
            return reply(Status::from(&e));
        }
        if model == ModelId::CONFIG_SERVER {
            return reply(Status::CannotBind);
        }
        let app = AppKeyIndex::masked(app_idx);
        if ctx.keys.app_key(app).is_none() {
            return reply(Status::InvalidAppKeyIndex);
        }
        let result = if bind {
            ctx.elements.bind(element, model, app)
        } else {
            ctx.elements.unbind(element, model, app)
        };
        let (status, committed) = outcome(result);
        reply(status).with_if(committed, StateChange::ModelAppBinding { element, model })
    }

    // ========================================
    // Heartbeat
    // ========================================

    fn heartbeat_pub_set(ctx: &mut MeshContext, params: HeartbeatPubParams) -> ConfigOutcome {
        let fail = |status| {
            ConfigOutcome::reply(ConfigResponse::HeartbeatPublicationStatus { status, params })
        };
        if params.dst.is_virtual() {
            return fail(Status::InvalidAddress);
        }
        if params.count_log > 0x11 && params.count_log != 0xFF {
            return fail(Status::CannotSet);
        }
        if params.period_log > 0x10 {
            return fail(Status::CannotSet);
        }
        if params.ttl > TTL_MAX && params.ttl != TTL_DEFAULT {
            return ConfigOutcome::ignored();
        }
        if params.net_idx > KEY_INDEX_MAX {
            return ConfigOutcome::ignored();
        }
        let net_idx = NetKeyIndex::masked(params.net_idx);
        if ctx.keys.subnet(net_idx).is_none() {
            return fail(Status::InvalidNetKeyIndex);
        }

        let supported = ctx.state.supported_features();
        let features = Features::from_bits(params.features.bits() & supported.bits());
        let immediate = ctx.heartbeat.set_publication(HeartbeatPublication {
            dst: params.dst,
            count: hb_pwr2(params.count_log, 1),
            period_log: params.period_log,
            ttl: params.ttl,
            features,
            net_idx,
        });
        ConfigOutcome::reply(ConfigResponse::HeartbeatPublicationStatus {
            status: Status::Success,
            params: ctx.heartbeat.publication().to_params(),
        })
        .with(StateChange::HeartbeatPublication { immediate })
    }
}

#[derive(Debug, Clone, Copy)]
enum SubOp {
    Add,
    Delete,
    Overwrite,
}

// ============================================
// Status builders
// ============================================

fn beacon_status(ctx: &MeshContext) -> ConfigResponse {
    ConfigResponse::BeaconStatus {
        beacon: u8::from(ctx.state.beacon),
    }
}

fn relay_status(ctx: &MeshContext) -> ConfigResponse {
    ConfigResponse::RelayStatus {
        relay: ctx.state.relay.as_byte(),
        retransmit: ctx.state.relay_retransmit,
    }
}

/// Publication status; failures report zeroed publication fields.
fn pub_status(
    status: Status,
    element: Address,
    model: ModelId,
    publication: Option<&Publication>,
) -> ConfigResponse {
    let publication = publication.filter(|_| status == Status::Success);
    ConfigResponse::ModelPublicationStatus {
        status,
        element,
        address: publication.map_or(Address::UNASSIGNED, |p| p.address),
        app_idx: publication.map_or(0, |p| p.app_idx.value()),
        credential: publication.is_some_and(|p| p.credential),
        ttl: publication.map_or(0, |p| p.ttl),
        period: publication.map_or(PublishPeriod::default(), |p| p.period),
        retransmit: publication.map_or(PublishRetransmit::default(), |p| p.retransmit),
        model,
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use blemesh_bearer::traits::HeartbeatPubRecord;
    use blemesh_core::crypto::Key128;
    use blemesh_core::protocol::ElementDescriptor;

    use crate::config::NodeConfig;

    const PRIMARY: Address = Address::new(0x0001);
    const GENERIC_ONOFF: ModelId = ModelId::Sig(0x1000);

    fn context() -> MeshContext {
        let mut config = NodeConfig::default();
        config.provisioning.unicast_address = PRIMARY.value();
        config.composition.elements = vec![ElementDescriptor {
            location: 0,
            sig_models: vec![0x0000, 0x1000],
            vendor_models: Vec::new(),
        }];
        config.limits.app_keys = 2;
        let mut ctx = MeshContext::new(&config, Key128::from_bytes([0xDD; 16]));
        ctx.provision(NetKeyIndex::PRIMARY, &Key128::from_bytes([0x01; 16]))
            .unwrap();
        ctx
    }

    fn handle(ctx: &mut MeshContext, request: ConfigRequest) -> ConfigOutcome {
        ConfigServer::handle(ctx, request, NetKeyIndex::PRIMARY, Instant::now())
    }

    fn app_key_add(app_idx: u16, byte: u8) -> ConfigRequest {
        ConfigRequest::AppKeyAdd {
            net_idx: 0,
            app_idx,
            key: Key128::from_bytes([byte; 16]),
        }
    }

    #[test]
    fn test_app_key_add_then_conflict() {
        let mut ctx = context();
        let first = handle(&mut ctx, app_key_add(0, 0xAA));
        assert_eq!(first.status(), Some(Status::Success));
        assert_eq!(first.changes, vec![StateChange::AppKeyAdded(AppKeyIndex::masked(0))]);

        let again = handle(&mut ctx, app_key_add(0, 0xAA));
        assert_eq!(again.status(), Some(Status::Success));
        assert!(again.changes.is_empty());

        let other = handle(&mut ctx, app_key_add(0, 0xBB));
        assert_eq!(other.status(), Some(Status::KeyIndexAlreadyStored));
        assert!(other.changes.is_empty());
    }

    #[test]
    fn test_app_key_unknown_subnet() {
        let mut ctx = context();
        let out = handle(
            &mut ctx,
            ConfigRequest::AppKeyAdd {
                net_idx: 5,
                app_idx: 0,
                key: Key128::from_bytes([1; 16]),
            },
        );
        assert_eq!(out.status(), Some(Status::InvalidNetKeyIndex));
    }

    #[test]
    fn test_app_key_capacity_leaves_table_unchanged() {
        let mut ctx = context();
        handle(&mut ctx, app_key_add(0, 1));
        handle(&mut ctx, app_key_add(1, 2));
        let out = handle(&mut ctx, app_key_add(2, 3));
        assert_eq!(out.status(), Some(Status::InsufficientResources));
        assert_eq!(ctx.keys.app_indexes(NetKeyIndex::PRIMARY), vec![0, 1]);
    }

    #[test]
    fn test_bind_requires_app_key() {
        let mut ctx = context();
        let bind = ConfigRequest::ModelAppBind {
            element: PRIMARY,
            app_idx: 0,
            model: GENERIC_ONOFF,
        };
        let before = handle(&mut ctx, bind.clone());
        assert_eq!(before.status(), Some(Status::InvalidAppKeyIndex));

        handle(&mut ctx, app_key_add(0, 0xAA));
        let after = handle(&mut ctx, bind);
        assert_eq!(after.status(), Some(Status::Success));
        assert_eq!(
            after.changes,
            vec![StateChange::ModelAppBinding {
                element: PRIMARY,
                model: GENERIC_ONOFF
            }]
        );
    }

    #[test]
    fn test_bind_config_server_refused() {
        let mut ctx = context();
        handle(&mut ctx, app_key_add(0, 0xAA));
        let out = handle(
            &mut ctx,
            ConfigRequest::ModelAppBind {
                element: PRIMARY,
                app_idx: 0,
                model: ModelId::CONFIG_SERVER,
            },
        );
        assert_eq!(out.status(), Some(Status::CannotBind));
    }

    #[test]
    fn test_bind_unknown_model_and_ignored_element() {
        let mut ctx = context();
        let out = handle(
            &mut ctx,
            ConfigRequest::ModelAppBind {
                element: PRIMARY,
                app_idx: 0,
                model: ModelId::Sig(0x1300),
            },
        );
        assert_eq!(out.status(), Some(Status::InvalidModel));

        let ignored = handle(
            &mut ctx,
            ConfigRequest::ModelAppBind {
                element: Address::new(0xC000),
                app_idx: 0,
                model: GENERIC_ONOFF,
            },
        );
        assert!(ignored.response.is_none());
    }

    #[test]
    fn test_app_key_delete_unbinds() {
        let mut ctx = context();
        handle(&mut ctx, app_key_add(0, 0xAA));
        ctx.elements
            .bind(PRIMARY, GENERIC_ONOFF, AppKeyIndex::masked(0))
            .unwrap();
        let out = handle(&mut ctx, ConfigRequest::AppKeyDelete { net_idx: 0, app_idx: 0 });
        assert_eq!(out.status(), Some(Status::Success));
        assert!(!ctx
            .elements
            .model(PRIMARY, GENERIC_ONOFF)
            .unwrap()
            .is_bound(AppKeyIndex::masked(0)));
        let ops = out.changes[0].persist_ops(&ctx);
        assert_eq!(ops[0], PersistOp::RemoveAppKey(0));
        assert!(matches!(ops[1], PersistOp::Model(_)));

        let missing = handle(&mut ctx, ConfigRequest::AppKeyDelete { net_idx: 0, app_idx: 0 });
        assert_eq!(missing.status(), Some(Status::Success));
        assert!(missing.changes.is_empty());
    }

    #[test]
    fn test_net_key_delete_rules() {
        let mut ctx = context();
        let rx_subnet = handle(&mut ctx, ConfigRequest::NetKeyDelete { net_idx: 0 });
        assert_eq!(rx_subnet.status(), Some(Status::CannotRemove));

        let missing = handle(&mut ctx, ConfigRequest::NetKeyDelete { net_idx: 7 });
        assert_eq!(missing.status(), Some(Status::Success));

        handle(
            &mut ctx,
            ConfigRequest::NetKeyAdd {
                net_idx: 1,
                key: Key128::from_bytes([0x02; 16]),
            },
        );
        let removed = handle(&mut ctx, ConfigRequest::NetKeyDelete { net_idx: 1 });
        assert_eq!(removed.status(), Some(Status::Success));
        assert_eq!(ctx.keys.net_indexes(), vec![0]);

        let ignored = handle(&mut ctx, ConfigRequest::NetKeyDelete { net_idx: 0x1000 });
        assert!(ignored.response.is_none());
    }

    #[test]
    fn test_key_refresh_sequence() {
        let mut ctx = context();
        let krp = |transition| ConfigRequest::KeyRefreshPhaseSet { net_idx: 0, transition };

        let early = handle(&mut ctx, krp(2));
        assert_eq!(
            early.response,
            Some(ConfigResponse::KeyRefreshPhaseStatus {
                status: Status::CannotUpdate,
                net_idx: 0,
                phase: 0
            })
        );

        let update = handle(
            &mut ctx,
            ConfigRequest::NetKeyUpdate {
                net_idx: 0,
                key: Key128::from_bytes([0x03; 16]),
            },
        );
        assert_eq!(update.status(), Some(Status::Success));

        let phase2 = handle(&mut ctx, krp(2));
        assert_eq!(phase2.status(), Some(Status::Success));
        let phase3 = handle(&mut ctx, krp(3));
        assert_eq!(
            phase3.changes,
            vec![StateChange::KeyRefresh {
                net_idx: NetKeyIndex::PRIMARY,
                phase: KeyRefreshPhase::Normal
            }]
        );
        assert!(phase3.response.is_some());
    }

    #[test]
    fn test_key_refresh_invalid_transition_replies() {
        let mut ctx = context();
        let krp = |transition| ConfigRequest::KeyRefreshPhaseSet { net_idx: 0, transition };
        let status = |phase| {
            Some(ConfigResponse::KeyRefreshPhaseStatus {
                status: Status::CannotUpdate,
                net_idx: 0,
                phase,
            })
        };

        handle(
            &mut ctx,
            ConfigRequest::NetKeyUpdate {
                net_idx: 0,
                key: Key128::from_bytes([0x03; 16]),
            },
        );
        assert_eq!(handle(&mut ctx, krp(2)).status(), Some(Status::Success));

        // Finishing back to InProgress
        let back = handle(&mut ctx, krp(1));
        assert_eq!(back.response, status(2));
        assert!(back.changes.is_empty());
        assert_eq!(handle(&mut ctx, krp(0)).response, status(2));
        assert_eq!(handle(&mut ctx, krp(4)).response, status(2));
        assert_eq!(
            ctx.keys.subnet(NetKeyIndex::PRIMARY).unwrap().phase(),
            KeyRefreshPhase::Finishing
        );

        assert_eq!(handle(&mut ctx, krp(3)).status(), Some(Status::Success));
        assert_eq!(handle(&mut ctx, krp(1)).response, status(0));
    }

    #[test]
    fn test_default_ttl_range() {
        let mut ctx = context();
        assert!(handle(&mut ctx, ConfigRequest::DefaultTtlSet { ttl: 1 }).response.is_none());
        assert!(handle(&mut ctx, ConfigRequest::DefaultTtlSet { ttl: 0x80 }).response.is_none());
        let out = handle(&mut ctx, ConfigRequest::DefaultTtlSet { ttl: 10 });
        assert_eq!(out.response, Some(ConfigResponse::DefaultTtlStatus { ttl: 10 }));
        assert_eq!(ctx.state.default_ttl, 10);
    }

    #[test]
    fn test_unsupported_proxy_unchanged() {
        let mut ctx = context();
        let out = handle(&mut ctx, ConfigRequest::GattProxySet { proxy: 1 });
        assert_eq!(out.response, Some(ConfigResponse::GattProxyStatus { proxy: 2 }));
        assert!(out.changes.is_empty());
    }

    #[test]
    fn test_relay_toggle_reports_feature() {
        let mut ctx = context();
        let out = handle(
            &mut ctx,
            ConfigRequest::RelaySet {
                relay: 0,
                retransmit: TransmitParams::new(1, 2),
            },
        );
        assert_eq!(out.changes.len(), 1);
        assert_eq!(out.changes[0].toggled_features(), Features::RELAY);
        assert!(matches!(out.changes[0].persist_ops(&ctx)[0], PersistOp::NodeState(_)));
    }

    #[test]
    fn test_subscription_lifecycle() {
        let mut ctx = context();
        let group = Address::new(0xC100);
        let add = ConfigRequest::ModelSubscriptionAdd {
            element: PRIMARY,
            address: MeshAddress::Plain(group),
            model: GENERIC_ONOFF,
        };
        assert_eq!(handle(&mut ctx, add).status(), Some(Status::Success));
        assert!(ctx.accepts(group));

        let bad = handle(
            &mut ctx,
            ConfigRequest::ModelSubscriptionAdd {
                element: PRIMARY,
                address: MeshAddress::Plain(Address::ALL_NODES),
                model: GENERIC_ONOFF,
            },
        );
        assert_eq!(bad.status(), Some(Status::InvalidAddress));

        let label = [0x5A; 16];
        let va = handle(
            &mut ctx,
            ConfigRequest::ModelSubscriptionOverwrite {
                element: PRIMARY,
                address: MeshAddress::Label(label),
                model: GENERIC_ONOFF,
            },
        );
        let expected = Address::new(kdf::virtual_address(&label));
        assert!(matches!(
            va.response,
            Some(ConfigResponse::ModelSubscriptionStatus { status: Status::Success, address, .. })
                if address == expected
        ));
        assert!(!ctx.accepts(group));
        assert!(ctx.accepts(expected));

        let all = handle(
            &mut ctx,
            ConfigRequest::ModelSubscriptionDeleteAll {
                element: PRIMARY,
                model: GENERIC_ONOFF,
            },
        );
        assert!(matches!(
            all.response,
            Some(ConfigResponse::ModelSubscriptionStatus { address: Address::UNASSIGNED, .. })
        ));
    }

    #[test]
    fn test_publication_requires_bound_key() {
        let mut ctx = context();
        handle(&mut ctx, app_key_add(0, 0xAA));
        let params = PublicationParams {
            address: MeshAddress::Plain(Address::new(0xC000)),
            app_idx: 0,
            credential: false,
            ttl: 5,
            period: PublishPeriod::default(),
            retransmit: PublishRetransmit::default(),
        };
        let set = ConfigRequest::ModelPublicationSet {
            element: PRIMARY,
            params,
            model: GENERIC_ONOFF,
        };
        let unbound = handle(&mut ctx, set.clone());
        assert!(matches!(
            unbound.response,
            Some(ConfigResponse::ModelPublicationStatus {
                status: Status::InvalidBinding,
                address: Address::UNASSIGNED,
                ttl: 0,
                ..
            })
        ));

        ctx.elements
            .bind(PRIMARY, GENERIC_ONOFF, AppKeyIndex::masked(0))
            .unwrap();
        let bound = handle(&mut ctx, set);
        assert_eq!(bound.status(), Some(Status::Success));
        assert!(ctx
            .elements
            .model(PRIMARY, GENERIC_ONOFF)
            .unwrap()
            .publication()
            .is_some());

        let bad_ttl = ConfigRequest::ModelPublicationSet {
            element: PRIMARY,
            params: PublicationParams { ttl: 0x80, ..params },
            model: GENERIC_ONOFF,
        };
        assert!(handle(&mut ctx, bad_ttl).response.is_none());
    }

    #[test]
    fn test_heartbeat_publication_set() {
        let mut ctx = context();
        let params = HeartbeatPubParams {
            dst: Address::new(0xC000),
            count_log: 2,
            period_log: 2,
            ttl: 5,
            features: Features::ALL,
            net_idx: 0,
        };
        let out = handle(&mut ctx, ConfigRequest::HeartbeatPublicationSet(params));
        assert_eq!(out.status(), Some(Status::Success));
        assert_eq!(out.changes, vec![StateChange::HeartbeatPublication { immediate: true }]);
        assert_eq!(ctx.heartbeat.publication().count, 2);
        assert_eq!(ctx.heartbeat.publication().features, Features::RELAY);
        assert_eq!(
            out.changes[0].persist_ops(&ctx),
            vec![PersistOp::HeartbeatPublication(HeartbeatPubRecord {
                dst: Address::new(0xC000),
                count: 2,
                period_log: 2,
                ttl: 5,
                features: Features::RELAY.bits(),
                net_idx: 0,
            })]
        );

        let bad_period = handle(
            &mut ctx,
            ConfigRequest::HeartbeatPublicationSet(HeartbeatPubParams {
                period_log: 0x11,
                ..params
            }),
        );
        assert_eq!(
            bad_period.response,
            Some(ConfigResponse::HeartbeatPublicationStatus {
                status: Status::CannotSet,
                params: HeartbeatPubParams {
                    period_log: 0x11,
                    ..params
                }
            })
        );

        let unknown_net = handle(
            &mut ctx,
            ConfigRequest::HeartbeatPublicationSet(HeartbeatPubParams { net_idx: 3, ..params }),
        );
        assert_eq!(unknown_net.status(), Some(Status::InvalidNetKeyIndex));
    }

    #[test]
    fn test_heartbeat_subscription_filters() {
        let mut ctx = context();
        let ignored = handle(
            &mut ctx,
            ConfigRequest::HeartbeatSubscriptionSet {
                src: Address::new(0x0005),
                dst: Address::new(0x0002),
                period_log: 3,
            },
        );
        assert!(ignored.response.is_none());

        let out = handle(
            &mut ctx,
            ConfigRequest::HeartbeatSubscriptionSet {
                src: Address::new(0x0005),
                dst: PRIMARY,
                period_log: 3,
            },
        );
        assert_eq!(out.status(), Some(Status::Success));
        assert!(ctx.heartbeat.is_subscription_dst(PRIMARY));
    }

    #[test]
    fn test_node_reset_signalled() {
        let mut ctx = context();
        let out = handle(&mut ctx, ConfigRequest::NodeReset);
        assert_eq!(out.response, Some(ConfigResponse::NodeResetStatus));
        assert_eq!(out.changes, vec![StateChange::NodeReset]);
        assert_eq!(out.changes[0].persist_ops(&ctx), vec![PersistOp::Clear]);
        // state is left for the node to reset after replying
        assert!(ctx.is_provisioned());
    }

    #[test]
    fn test_composition_always_page_zero() {
        let mut ctx = context();
        let out = handle(&mut ctx, ConfigRequest::CompositionDataGet { page: 0xFF });
        let Some(ConfigResponse::CompositionDataStatus { page, data }) = out.response else {
            panic!("expected composition status");
        };
        assert_eq!(page, 0);
        assert_eq!(data, ctx.composition.page0());
    }
}
