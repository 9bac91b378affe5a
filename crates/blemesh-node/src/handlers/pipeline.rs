// ============================================
// File: crates/blemesh-node/src/handlers/pipeline.rs
// ============================================
//! # Protocol Pipeline
//!
//! ## Creation Reason
//! Chains the network, transport and access layers for one node and
//! turns Configuration Server outcomes into replies, storage writes,
//! heartbeat triggers and resets.
//!
//! ## Main Functionality
//! - `Pipeline::on_inbound`: raw PDU through all layers
//! - `Pipeline::on_timer`: SAR and heartbeat timers
//! - `Pipeline::send` / `Pipeline::cancel`: application traffic
//! - `Pipeline::configure_heartbeat`: local heartbeat publication
//!
//! ## Configuration Request Handling
//! ```text
//! AccessAction::Config
//!   1. status reply, encoded now under the device key
//!   2. per StateChange:
//!        persist ops
//!        feature heartbeat (relay/proxy/friend toggled)
//!        heartbeat publication timer start/stop
//!        node reset (last)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All methods are synchronous; side effects are left in the `Outbox`
//! - A failed reply send is logged, the state change still applies
//!
//! ## Last Modified
//! v0.1.0 - Initial pipeline

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use blemesh_common::types::{Address, Features};
use blemesh_core::protocol::HeartbeatMessage;

use super::access::{AccessAction, AccessLayer, Model};
use super::network::NetworkLayer;
use super::transport::{ControlTarget, Security, SendRequest, TransportLayer};
use crate::config::NodeConfig;
use crate::context::MeshContext;
use crate::effects::{NodeNotification, Outbox, PersistOp, TimerKey};
use crate::error::Result;
use crate::services::config_server::StateChange;
use crate::services::heartbeat::{HeartbeatPublication, PublishTick};

/// Network, transport and access layers of one node.
#[derive(Debug)]
pub struct Pipeline {
    network: NetworkLayer,
    transport: TransportLayer,
    access: AccessLayer,
}

impl Pipeline {
    /// Creates the layers from configuration.
    #[must_use]
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            network: NetworkLayer::new(),
            transport: TransportLayer::new(config.sar.clone(), &config.limits),
            access: AccessLayer::new(),
        }
    }

    /// Registers an application model.
    ///
    /// # Errors
    /// See [`AccessLayer::register`].
    pub fn register_model(
        &mut self,
        ctx: &MeshContext,
        element: Address,
        model: Box<dyn Model>,
    ) -> Result<()> {
        self.access.register(ctx, element, model)
    }

    // ========================================
    // Inbound
    // ========================================

    /// Processes one PDU from the bearer.
    ///
    /// # Errors
    /// Layer errors; callers drop the PDU. Check
    /// [`NodeError::is_silent_drop`](crate::error::NodeError::is_silent_drop)
    /// before logging.
    pub fn on_inbound(
        &mut self,
        ctx: &mut MeshContext,
        raw: &[u8],
        now: Instant,
        out: &mut Outbox,
    ) -> Result<()> {
        let Some(rx) = self.network.receive(ctx, raw, out)? else {
            return Ok(());
        };
        let Some(upper) = self.transport.receive(ctx, &self.network, &rx, now, out)? else {
            return Ok(());
        };
        for action in self.access.dispatch(ctx, &upper, now)? {
            self.apply(ctx, action, out);
        }
        Ok(())
    }

    fn apply(&mut self, ctx: &mut MeshContext, action: AccessAction, out: &mut Outbox) {
        match action {
            AccessAction::Reply(request) => {
                if let Err(e) = self.transport.send(ctx, &self.network, &request, out) {
                    debug!(dst = %request.dst, error = %e, "Model reply not sent");
                }
            }
            AccessAction::Config {
                net_idx,
                requester,
                element,
                outcome,
            } => {
                if let Some(response) = &outcome.response {
                    let reply = SendRequest::new(
                        requester,
                        Security::DeviceKey(net_idx),
                        response.to_message(),
                    )
                    .with_src(element);
                    if let Err(e) = self.transport.send(ctx, &self.network, &reply, out) {
                        warn!(dst = %requester, error = %e, "Configuration status not sent");
                    }
                }
                self.apply_changes(ctx, &outcome.changes, out);
            }
        }
    }

    fn apply_changes(&mut self, ctx: &mut MeshContext, changes: &[StateChange], out: &mut Outbox) {
        for change in changes {
            for op in change.persist_ops(ctx) {
                out.persist(op);
            }

            let toggled = change.toggled_features();
            if toggled != Features::default() {
                if let Some(tick) = ctx.heartbeat.feature_heartbeat(toggled, ctx.features()) {
                    debug!(features = toggled.bits(), "Feature change heartbeat");
                    self.send_heartbeat(ctx, tick, out);
                }
            }

            match change {
                StateChange::HeartbeatPublication { immediate: true } => {
                    out.start_timer(TimerKey::HeartbeatPublish, Duration::ZERO);
                }
                StateChange::HeartbeatPublication { immediate: false } => {
                    out.cancel_timer(TimerKey::HeartbeatPublish);
                }
                StateChange::NodeReset => self.reset_node(ctx, out),
                _ => {}
            }
        }
    }

    /// Returns the node to the unprovisioned state and erases storage.
    pub fn reset_node(&mut self, ctx: &mut MeshContext, out: &mut Outbox) {
        info!(primary = %ctx.primary(), "Node reset");
        ctx.reset();
        self.transport.reset();
        out.cancel_all_timers();
        out.persist(PersistOp::Clear);
        out.notify(NodeNotification::Reset);
    }

    // ========================================
    // Timers
    // ========================================

    /// Handles an expired timer.
    ///
    /// # Errors
    /// Encoding errors while sending.
    pub fn on_timer(&mut self, ctx: &mut MeshContext, key: TimerKey, out: &mut Outbox) -> Result<()> {
        match key {
            TimerKey::HeartbeatPublish => {
                self.heartbeat_tick(ctx, out);
                Ok(())
            }
            TimerKey::ReplayStore => {
                let records = ctx.replay.take_pending();
                if !records.is_empty() {
                    debug!(entries = records.len(), "Storing replay list");
                    out.persist(PersistOp::Replay(records));
                }
                Ok(())
            }
            // repeats are replayed by the node from its own buffer
            TimerKey::NetworkRepeat(_) => Ok(()),
            _ => self.transport.on_timer(ctx, &self.network, key, out),
        }
    }

    fn heartbeat_tick(&mut self, ctx: &mut MeshContext, out: &mut Outbox) {
        let net_idx = ctx.heartbeat.publication().net_idx;
        let subnet_exists = ctx.keys.subnet(net_idx).is_some();
        let active = ctx.features();
        let Some(tick) = ctx.heartbeat.publish_tick(subnet_exists, active) else {
            return;
        };
        if let Some(next) = tick.next {
            out.start_timer(TimerKey::HeartbeatPublish, next);
        }
        self.send_heartbeat(ctx, tick, out);
    }

    fn send_heartbeat(&mut self, ctx: &mut MeshContext, tick: PublishTick, out: &mut Outbox) {
        let target = ControlTarget {
            net_idx: tick.net_idx,
            src: ctx.primary(),
            dst: tick.dst,
            ttl: tick.ttl,
        };
        let params = tick.message.to_params();
        if let Err(e) = self.transport.send_control(
            ctx,
            &self.network,
            target,
            HeartbeatMessage::OPCODE,
            &params,
            out,
        ) {
            warn!(dst = %tick.dst, error = %e, "Heartbeat not sent");
        }
    }

    // ========================================
    // Local API
    // ========================================

    /// Sends an access message.
    ///
    /// # Errors
    /// See [`TransportLayer::send`].
    pub fn send(&mut self, ctx: &mut MeshContext, request: &SendRequest, out: &mut Outbox) -> Result<bool> {
        self.transport.send(ctx, &self.network, request, out)
    }

    /// Cancels the segmented message to `dst`.
    pub fn cancel(&mut self, dst: Address, out: &mut Outbox) -> bool {
        self.transport.cancel(dst, out)
    }

    /// Replaces the heartbeat publication from the local application.
    pub fn configure_heartbeat(
        &mut self,
        ctx: &mut MeshContext,
        publication: HeartbeatPublication,
        out: &mut Outbox,
    ) {
        let immediate = ctx.heartbeat.set_publication(publication);
        out.persist(PersistOp::HeartbeatPublication(
            ctx.heartbeat.publication().to_record(),
        ));
        if immediate {
            out.start_timer(TimerKey::HeartbeatPublish, Duration::ZERO);
        } else {
            out.cancel_timer(TimerKey::HeartbeatPublish);
        }
    }
}

// ============================================
// Tests
// ============================================
