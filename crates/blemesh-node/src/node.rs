// ============================================
// File: crates/blemesh-node/src/node.rs
// ============================================
//! # Mesh Node
//!
//! ## Creation Reason
//! Runs the synchronous protocol pipeline inside one tokio task and
//! executes the effects it produces against the bearer, the store and
//! the timer wheel.
//!
//! ## Main Functionality
//! - `MeshNode`: owns `MeshContext` and `Pipeline`, consumes `NodeEvent`s
//! - `NodeHandle`: cloneable entry point for the application
//! - Bearer receive task forwarding raw PDUs into the queue
//! - Keyed timers with generation numbers, network PDU repeats
//!
//! ## Task Layout
//! ```text
//!   bearer.recv() ──▶ [rx task] ──┐
//!                                 │  NodeEvent
//!   NodeHandle ───────────────────┼──────────────▶ mpsc ──▶ MeshNode::run
//!                                 │                              │
//!   sleep(after) ──▶ [timer] ─────┘                              │
//!                                                                ▼
//!                                          Pipeline ──▶ Outbox ──▶ effects
//!                                                                  ├─ bearer.send_raw
//!                                                                  ├─ timers
//!                                                                  ├─ Persistence
//!                                                                  └─ broadcast<NodeNotification>
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Security state is touched only by the node task, there are no locks
//! - A timer event whose generation no longer matches is stale and dropped
//! - `CancelAllTimers` (node reset) keeps pending network repeats so the
//!   reset status still goes out
//!
//! ## Last Modified
//! v0.1.0 - Initial node task

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use blemesh_bearer::traits::{Bearer, Persistence};
use blemesh_common::time::TransmitParams;
use blemesh_common::types::Address;
use blemesh_core::crypto::Key128;

use crate::config::NodeConfig;
use crate::context::MeshContext;
use crate::effects::{Effect, NodeNotification, Outbox, PersistOp, TimerKey};
use crate::error::{NodeError, Result};
use crate::handlers::{Model, Pipeline, SendRequest};
use crate::services::heartbeat::HeartbeatPublication;

/// Capacity of the notification broadcast channel.
const NOTIFICATION_CAPACITY: usize = 64;

/// Time each task gets to finish during shutdown.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================
// NodeEvent
// ============================================

/// Work item of the node task.
enum NodeEvent {
    /// Raw network PDU from the bearer.
    Inbound(Bytes),
    /// Expired timer.
    Timer { key: TimerKey, generation: u64 },
    /// Access message from the application.
    Send {
        request: SendRequest,
        reply: oneshot::Sender<Result<bool>>,
    },
    /// Cancel of a segmented message.
    Cancel {
        dst: Address,
        reply: oneshot::Sender<bool>,
    },
    /// Local heartbeat publication change.
    ConfigureHeartbeat(HeartbeatPublication),
    /// Stop the node.
    Shutdown,
}

/// Network PDU waiting for its next repetition.
struct PendingRepeat {
    pdu: Bytes,
    remaining: u8,
    interval: Duration,
}

// ============================================
// MeshNode
// ============================================

/// A mesh node driven by one tokio task.
///
/// # Example
/// ```ignore
/// let node = MeshNode::new(config, bearer, store).await?;
/// let handle = node.handle();
/// tokio::spawn(node.run());
/// handle.send(request).await?;
/// ```
pub struct MeshNode {
    ctx: MeshContext,
    pipeline: Pipeline,
    bearer: Arc<dyn Bearer>,
    store: Arc<dyn Persistence>,
    events_tx: mpsc::Sender<NodeEvent>,
    events_rx: mpsc::Receiver<NodeEvent>,
    notify_tx: broadcast::Sender<NodeNotification>,
    shutdown: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    timers: HashMap<TimerKey, (u64, JoinHandle<()>)>,
    generation: u64,
    repeats: HashMap<u64, PendingRepeat>,
    next_repeat: u64,
}

impl MeshNode {
    /// Builds the node and loads its stored state.
    ///
    /// Stored subnets win over the `[provisioning]` section. When the store
    /// is empty and a NetKey is configured, the node provisions itself and
    /// stores the subnet.
    ///
    /// # Errors
    /// - `ConfigInvalid`: malformed configured keys
    /// - `Bearer`: the store cannot be read
    pub async fn new(
        config: NodeConfig,
        bearer: Arc<dyn Bearer>,
        store: Arc<dyn Persistence>,
    ) -> Result<Self> {
        let dev_key = if config.provisioning.dev_key.is_some() {
            config.provisioning.dev_key()?
        } else {
            warn!("No device key configured, generated a random one");
            Key128::generate()
        };

        let mut ctx = MeshContext::new(&config, dev_key);
        let stored = store.load().await?;
        if !ctx.restore(&stored) && config.provisioning.net_key.is_some() {
            let net_idx = config.provisioning.net_idx();
            ctx.provision(net_idx, &config.provisioning.net_key()?)?;
            if let Some(subnet) = ctx.keys.subnet(net_idx) {
                store.store_subnet(subnet.to_record()).await?;
            }
        }
        if !ctx.is_provisioned() {
            info!(primary = %ctx.primary(), "Node starts unprovisioned");
        }

        let (events_tx, events_rx) = mpsc::channel(config.node.queue_depth);
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            pipeline: Pipeline::new(&config),
            ctx,
            bearer,
            store,
            events_tx,
            events_rx,
            notify_tx,
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            timers: HashMap::new(),
            generation: 0,
            repeats: HashMap::new(),
            next_repeat: 0,
        })
    }

    /// Registers an application model on one of the node's elements.
    ///
    /// # Errors
    /// See [`Pipeline::register_model`].
    pub fn register_model(&mut self, element: Address, model: Box<dyn Model>) -> Result<()> {
        self.pipeline.register_model(&self.ctx, element, model)
    }

    /// Node state, for inspection before `run`.
    #[must_use]
    pub const fn context(&self) -> &MeshContext {
        &self.ctx
    }

    /// Creates a handle for the application.
    #[must_use]
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            events: self.events_tx.clone(),
            notifications: self.notify_tx.clone(),
            shutdown: Arc::clone(&self.shutdown),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    // ========================================
    // Main Loop
    // ========================================

    /// Runs the node until [`NodeHandle::shutdown`] is called.
    ///
    /// # Errors
    /// Currently always `Ok`; per-event failures are logged and dropped.
    pub async fn run(mut self) -> Result<()> {
        info!(
            primary = %self.ctx.primary(),
            elements = self.ctx.composition.elements.len(),
            "Starting mesh node v{}",
            env!("CARGO_PKG_VERSION")
        );

        if self.ctx.heartbeat.publication().is_periodic() {
            debug!("Resuming stored heartbeat publication");
            self.start_timer(TimerKey::HeartbeatPublish, Duration::ZERO);
        }

        let rx_task = self.spawn_bearer_task();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Node task received shutdown signal");
                    break;
                }
                event = self.events_rx.recv() => {
                    match event {
                        Some(NodeEvent::Shutdown) | None => break,
                        Some(event) => self.handle_event(event).await,
                    }
                }
            }
        }

        self.stop(rx_task).await;
        Ok(())
    }

    async fn stop(&mut self, rx_task: JoinHandle<()>) {
        info!("Shutting down mesh node...");
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        for (_, (_, handle)) in self.timers.drain() {
            handle.abort();
        }
        self.repeats.clear();

        let replay = self.ctx.replay.take_pending();
        if !replay.is_empty() {
            self.persist(PersistOp::Replay(replay)).await;
        }

        if let Err(e) = self.bearer.shutdown().await {
            warn!(error = %e, "Bearer shutdown failed");
        }

        match tokio::time::timeout(TASK_JOIN_TIMEOUT, rx_task).await {
            Ok(Ok(())) => debug!("Bearer task completed"),
            Ok(Err(e)) => warn!("Bearer task panicked: {}", e),
            Err(_) => warn!("Bearer task timed out during shutdown"),
        }

        info!("Mesh node shutdown complete");
    }

    /// Spawns the task that forwards bearer PDUs into the event queue.
    fn spawn_bearer_task(&self) -> JoinHandle<()> {
        let bearer = Arc::clone(&self.bearer);
        let events = self.events_tx.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Bearer task received shutdown signal");
                        break;
                    }
                    result = bearer.recv() => {
                        match result {
                            Ok(pdu) => {
                                trace!(len = pdu.len(), "Bearer PDU received");
                                if events.send(NodeEvent::Inbound(pdu)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                if !shutdown.load(Ordering::SeqCst) {
                                    error!("Bearer receive error: {}", e);
                                }
                                break;
                            }
                        }
                    }
                }
            }

            debug!("Bearer task exiting");
        })
    }

    // ========================================
    // Event Handling
    // ========================================

    async fn handle_event(&mut self, event: NodeEvent) {
        let mut out = Outbox::new();

        match event {
            NodeEvent::Inbound(raw) => {
                if let Err(e) = self
                    .pipeline
                    .on_inbound(&mut self.ctx, &raw, Instant::now(), &mut out)
                {
                    if e.is_silent_drop() {
                        trace!(error = %e, "PDU dropped");
                    } else {
                        debug!(error = %e, "PDU handling error");
                    }
                }
            }
            NodeEvent::Timer { key, generation } => {
                if !self.take_timer(key, generation) {
                    trace!(?key, "Stale timer ignored");
                    return;
                }
                if let TimerKey::NetworkRepeat(id) = key {
                    self.repeat(id).await;
                    return;
                }
                if let Err(e) = self.pipeline.on_timer(&mut self.ctx, key, &mut out) {
                    debug!(?key, error = %e, "Timer handling error");
                }
            }
            NodeEvent::Send { request, reply } => {
                let result = self.pipeline.send(&mut self.ctx, &request, &mut out);
                if let Err(e) = &result {
                    debug!(dst = %request.dst, error = %e, "Send rejected");
                }
                let _ = reply.send(result);
            }
            NodeEvent::Cancel { dst, reply } => {
                let _ = reply.send(self.pipeline.cancel(dst, &mut out));
            }
            NodeEvent::ConfigureHeartbeat(publication) => {
                self.pipeline
                    .configure_heartbeat(&mut self.ctx, publication, &mut out);
            }
            NodeEvent::Shutdown => {}
        }

        self.execute(&mut out).await;
    }

    async fn execute(&mut self, out: &mut Outbox) {
        // a new sequence block is stored before any PDU using it is sent
        if let Some(record) = self.ctx.take_sequence_record() {
            self.persist(PersistOp::Sequence(record)).await;
        }
        for effect in out.drain() {
            match effect {
                Effect::Transmit { pdu, transmit } => self.transmit(pdu, transmit).await,
                Effect::StartTimer { key, after } => self.start_timer(key, after),
                Effect::CancelTimer(key) => self.cancel_timer(key),
                Effect::CancelAllTimers => self.cancel_all_timers(),
                Effect::Persist(op) => self.persist(op).await,
                Effect::Notify(notification) => {
                    // no subscribers is fine
                    let _ = self.notify_tx.send(notification);
                }
            }
        }
    }

    // ========================================
    // Transmission
    // ========================================

    async fn transmit(&mut self, pdu: Bytes, transmit: TransmitParams) {
        self.send_raw(&pdu).await;
        if transmit.count == 0 {
            return;
        }
        let id = self.next_repeat;
        self.next_repeat = self.next_repeat.wrapping_add(1);
        let interval = transmit.interval();
        self.repeats.insert(
            id,
            PendingRepeat {
                pdu,
                remaining: transmit.count,
                interval,
            },
        );
        self.start_timer(TimerKey::NetworkRepeat(id), interval);
    }

    async fn repeat(&mut self, id: u64) {
        let Some(entry) = self.repeats.get_mut(&id) else {
            return;
        };
        entry.remaining -= 1;
        let pdu = entry.pdu.clone();
        let next = (entry.remaining > 0).then_some(entry.interval);
        if next.is_none() {
            self.repeats.remove(&id);
        }

        self.send_raw(&pdu).await;
        if let Some(interval) = next {
            self.start_timer(TimerKey::NetworkRepeat(id), interval);
        }
    }

    async fn send_raw(&self, pdu: &[u8]) {
        if let Err(e) = self.bearer.send_raw(pdu).await {
            warn!(len = pdu.len(), error = %e, "Bearer send failed");
        }
    }

    // ========================================
    // Timers
    // ========================================

    fn start_timer(&mut self, key: TimerKey, after: Duration) {
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        let events = self.events_tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(NodeEvent::Timer { key, generation }).await;
        });

        if let Some((_, previous)) = self.timers.insert(key, (generation, handle)) {
            previous.abort();
        }
        trace!(?key, ?after, "Timer started");
    }

    fn cancel_timer(&mut self, key: TimerKey) {
        if let Some((_, handle)) = self.timers.remove(&key) {
            handle.abort();
            trace!(?key, "Timer cancelled");
        }
    }

    fn cancel_all_timers(&mut self) {
        self.timers.retain(|key, (_, handle)| {
            if matches!(key, TimerKey::NetworkRepeat(_)) {
                return true;
            }
            handle.abort();
            false
        });
    }

    /// Removes the timer if `generation` is still current.
    fn take_timer(&mut self, key: TimerKey, generation: u64) -> bool {
        let current = self.timers.get(&key).map(|(g, _)| *g);
        if current != Some(generation) {
            return false;
        }
        self.timers.remove(&key);
        true
    }

    // ========================================
    // Persistence
    // ========================================

    async fn persist(&self, op: PersistOp) {
        let result = match op {
            PersistOp::Subnet(record) => self.store.store_subnet(record).await,
            PersistOp::RemoveSubnet(net_idx) => self.store.remove_subnet(net_idx).await,
            PersistOp::AppKey(record) => self.store.store_app_key(record).await,
            PersistOp::RemoveAppKey(app_idx) => self.store.remove_app_key(app_idx).await,
            PersistOp::Model(record) => self.store.store_model(record).await,
            PersistOp::NodeState(record) => self.store.store_node_state(record).await,
            PersistOp::Sequence(record) => self.store.store_sequence(record).await,
            PersistOp::HeartbeatPublication(record) => {
                self.store.store_heartbeat_pub(record).await
            }
            PersistOp::Replay(records) => self.store.store_replay(records).await,
            PersistOp::Clear => self.store.clear().await,
        };
        if let Err(e) = result {
            error!(error = %e, "Persistence write failed");
        }
    }
}

impl std::fmt::Debug for MeshNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshNode")
            .field("primary", &self.ctx.primary())
            .field("provisioned", &self.ctx.is_provisioned())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

// ============================================
// NodeHandle
// ============================================

/// Cloneable handle to a running [`MeshNode`].
#[derive(Clone)]
pub struct NodeHandle {
    events: mpsc::Sender<NodeEvent>,
    notifications: broadcast::Sender<NodeNotification>,
    shutdown: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl NodeHandle {
    /// Feeds a raw PDU received outside the node's own bearer.
    ///
    /// # Errors
    /// `ShuttingDown` once the node has stopped.
    pub async fn on_receive(&self, pdu: impl Into<Bytes>) -> Result<()> {
        self.post(NodeEvent::Inbound(pdu.into())).await
    }

    /// Sends an access message.
    ///
    /// Returns `true` when the message went out segmented; its outcome
    /// arrives later as a `Delivered` or `DeliveryFailed` notification.
    ///
    /// # Errors
    /// Transport errors, or `ShuttingDown`.
    pub async fn send(&self, request: SendRequest) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.post(NodeEvent::Send { request, reply }).await?;
        rx.await.map_err(|_| NodeError::ShuttingDown)?
    }

    /// Cancels the segmented message to `dst`.
    ///
    /// # Errors
    /// `ShuttingDown` once the node has stopped.
    pub async fn cancel(&self, dst: Address) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.post(NodeEvent::Cancel { dst, reply }).await?;
        rx.await.map_err(|_| NodeError::ShuttingDown)
    }

    /// Replaces the heartbeat publication.
    ///
    /// # Errors
    /// `ShuttingDown` once the node has stopped.
    pub async fn configure_heartbeat_publication(
        &self,
        publication: HeartbeatPublication,
    ) -> Result<()> {
        self.post(NodeEvent::ConfigureHeartbeat(publication)).await
    }

    /// Subscribes to node notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NodeNotification> {
        self.notifications.subscribe()
    }

    /// Asks the node to stop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        let _ = self.events.try_send(NodeEvent::Shutdown);
    }

    /// `true` once shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    async fn post(&self, event: NodeEvent) -> Result<()> {
        if self.is_shutdown() {
            return Err(NodeError::ShuttingDown);
        }
        self.events
            .send(event)
            .await
            .map_err(|_| NodeError::ShuttingDown)
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    use blemesh_bearer::mock::{MemoryStore, MockBearer};
    use blemesh_bearer::traits::{StoredState, SubnetRecord};
    use blemesh_common::types::{Features, NetKeyIndex};
    use blemesh_core::protocol::config::op;
    use blemesh_core::protocol::{AccessMessage, NetworkCodec, NetworkPdu};

    use crate::handlers::network::{local_pdu, NetworkLayer};
    use crate::handlers::Security;

    const NET_KEY: &str = "7d7d7d7d7d7d7d7d7d7d7d7d7d7d7d7d";
    const DEV_KEY: &str = "11111111111111111111111111111111";

    fn config(primary: u16) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.provisioning.unicast_address = primary;
        config.provisioning.net_key = Some(NET_KEY.to_string());
        config.provisioning.dev_key = Some(DEV_KEY.to_string());
        config.features.network_transmit = TransmitParams::new(0, 0);
        config.features.relay_retransmit = TransmitParams::new(0, 0);
        config
    }

    async fn start(config: NodeConfig) -> (Arc<MockBearer>, Arc<MemoryStore>, NodeHandle, JoinHandle<Result<()>>) {
        let bearer = Arc::new(MockBearer::new());
        let store = Arc::new(MemoryStore::new());
        let node = MeshNode::new(config, bearer.clone(), store.clone())
            .await
            .unwrap();
        let handle = node.handle();
        let task = tokio::spawn(node.run());
        (bearer, store, handle, task)
    }

    fn sender_context(src: u16) -> MeshContext {
        let mut ctx = MeshContext::new(&config(src), Key128::from_hex(DEV_KEY).unwrap());
        ctx.provision(NetKeyIndex::PRIMARY, &Key128::from_hex(NET_KEY).unwrap())
            .unwrap();
        ctx
    }

    /// Encodes a PDU as node `src` would put it on the air.
    fn foreign_pdu(src: u16, dst: u16, ttl: u8, seq: u32) -> Bytes {
        let ctx = sender_context(src);
        let pdu: NetworkPdu = local_pdu(
            false,
            ttl,
            seq,
            Address::new(src),
            Address::new(dst),
            Bytes::from_static(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05]),
        );
        NetworkLayer::new()
            .encode(&ctx, NetKeyIndex::PRIMARY, &pdu)
            .unwrap()
    }

    #[tokio::test]
    async fn test_provisions_from_config_and_persists() {
        let bearer = Arc::new(MockBearer::new());
        let store = Arc::new(MemoryStore::new());
        let node = MeshNode::new(config(0x0001), bearer, store.clone())
            .await
            .unwrap();

        assert!(node.context().is_provisioned());
        let stored = store.snapshot();
        assert_eq!(stored.subnets.len(), 1);
        assert_eq!(stored.subnets[0].net_idx, 0);
    }

    #[tokio::test]
    async fn test_stored_state_wins_over_config() {
        let stored = StoredState {
            subnets: vec![SubnetRecord {
                net_idx: 0x0123,
                phase: 0,
                key: [0x42; 16],
                new_key: None,
                node_identity: 2,
            }],
            ..StoredState::default()
        };
        let store = Arc::new(MemoryStore::with_state(stored));
        let node = MeshNode::new(config(0x0001), Arc::new(MockBearer::new()), store)
            .await
            .unwrap();

        let keys = &node.context().keys;
        assert!(keys.subnet(NetKeyIndex::masked(0x0123)).is_some());
        assert!(keys.subnet(NetKeyIndex::PRIMARY).is_none());
    }

    #[tokio::test]
    async fn test_unprovisioned_without_net_key() {
        let mut config = config(0x0001);
        config.provisioning.net_key = None;
        let node = MeshNode::new(config, Arc::new(MockBearer::new()), Arc::new(MemoryStore::new()))
            .await
            .unwrap();
        assert!(!node.context().is_provisioned());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_publication_three_periods() {
        let (bearer, _store, handle, task) = start(config(0x0001)).await;
        let started = Instant::now();

        handle
            .configure_heartbeat_publication(HeartbeatPublication {
                dst: Address::new(0xC000),
                count: 3,
                period_log: 2,
                ttl: 5,
                features: Features::default(),
                net_idx: NetKeyIndex::PRIMARY,
            })
            .await
            .unwrap();

        bearer.wait_sent(1).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        bearer.wait_sent(2).await;
        assert!(started.elapsed() >= Duration::from_secs(2));
        bearer.wait_sent(3).await;
        assert!(started.elapsed() >= Duration::from_secs(4));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(bearer.sent_count(), 3);

        handle.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_one_not_relayed() {
        let (bearer, _store, handle, task) = start(config(0x0001)).await;

        bearer.inject(foreign_pdu(0x0700, 0x0900, 1, 1));
        bearer.inject(foreign_pdu(0x0700, 0x0900, 5, 2));
        bearer.wait_sent(1).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let sent = bearer.take_sent();
        assert_eq!(sent.len(), 1);
        let ctx = sender_context(0x0700);
        let subnet = ctx.keys.subnet(NetKeyIndex::PRIMARY).unwrap();
        let relayed = NetworkCodec::new()
            .decode(&sent[0], subnet.tx_keys(), ctx.iv.tx_index())
            .unwrap();
        assert_eq!(relayed.seq, 2);
        assert_eq!(relayed.ttl, 4);

        handle.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_transmit_repeats() {
        let mut config = config(0x0001);
        config.features.network_transmit = TransmitParams::new(2, 1);
        let (bearer, _store, handle, task) = start(config).await;

        let request = SendRequest::new(
            Address::new(0x0002),
            Security::DeviceKey(NetKeyIndex::PRIMARY),
            AccessMessage::new(op::DEFAULT_TTL_GET, Bytes::new()),
        );
        assert!(!handle.send(request).await.unwrap());

        bearer.wait_sent(3).await;
        let sent = bearer.take_sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|pdu| pdu == &sent[0]));

        handle.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_send_error_returned_to_caller() {
        let (_bearer, _store, handle, task) = start(config(0x0001)).await;

        let request = SendRequest::new(
            Address::UNASSIGNED,
            Security::DeviceKey(NetKeyIndex::PRIMARY),
            AccessMessage::new(op::DEFAULT_TTL_GET, Bytes::new()),
        );
        assert!(handle.send(request).await.is_err());

        handle.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_resumes_after_restart() {
        let (bearer, store, handle, task) = start(config(0x0001)).await;
        let request = SendRequest::new(
            Address::new(0x0002),
            Security::DeviceKey(NetKeyIndex::PRIMARY),
            AccessMessage::new(op::DEFAULT_TTL_GET, Bytes::new()),
        );
        handle.send(request).await.unwrap();
        bearer.wait_sent(1).await;
        handle.shutdown();
        task.await.unwrap().unwrap();

        let ctx = sender_context(0x0001);
        let subnet = ctx.keys.subnet(NetKeyIndex::PRIMARY).unwrap();
        let first = NetworkCodec::new()
            .decode(&bearer.take_sent()[0], subnet.tx_keys(), ctx.iv.tx_index())
            .unwrap();

        let stored = store.snapshot();
        let reserved = stored.sequence.unwrap().seq;
        assert!(reserved > first.seq);

        let restarted = MeshNode::new(
            config(0x0001),
            Arc::new(MockBearer::new()),
            Arc::new(MemoryStore::with_state(stored)),
        )
        .await
        .unwrap();
        assert_eq!(restarted.context().peek_seq(), reserved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_and_heartbeat_survive_restart() {
        let (bearer, store, handle, task) = start(config(0x0001)).await;
        handle
            .configure_heartbeat_publication(HeartbeatPublication {
                dst: Address::new(0xC000),
                count: 0xFFFF,
                period_log: 4,
                ttl: 5,
                features: Features::RELAY,
                net_idx: NetKeyIndex::PRIMARY,
            })
            .await
            .unwrap();

        // undecryptable upper layer, but the network layer accepts it
        bearer.inject(foreign_pdu(0x0700, 0x0001, 5, 7));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.snapshot().replay.len(), 1);

        handle.shutdown();
        task.await.unwrap().unwrap();

        let stored = store.snapshot();
        assert_eq!(stored.replay[0].src, Address::new(0x0700));
        assert_eq!(stored.replay[0].seq, 7);
        assert_eq!(stored.heartbeat_pub.map(|h| h.dst), Some(Address::new(0xC000)));

        let mut restarted = MeshNode::new(
            config(0x0001),
            Arc::new(MockBearer::new()),
            Arc::new(MemoryStore::with_state(stored)),
        )
        .await
        .unwrap();
        assert!(restarted.context().heartbeat.publication().is_periodic());
        assert!(restarted
            .ctx
            .replay
            .check_and_update(Address::new(0x0700), 7, false)
            .is_err());
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let (_bearer, _store, handle, task) = start(config(0x0001)).await;
        handle.shutdown();
        task.await.unwrap().unwrap();

        assert!(handle.is_shutdown());
        assert!(matches!(
            handle.cancel(Address::new(0x0002)).await,
            Err(NodeError::ShuttingDown)
        ));
    }
}
