// ============================================
// File: crates/blemesh-bearer/src/mock.rs
// ============================================
//! # In-Memory Collaborators
//!
//! ## Creation Reason
//! Lets the whole node pipeline run in tests without a radio or a disk.
//!
//! ## Main Functionality
//! - `MockBearer`: injected receive queue, captured transmit queue
//! - `MemoryStore`: `Persistence` backed by a `StoredState` in memory
//!
//! ## Usage in Tests
//! ```
//! use blemesh_bearer::{Bearer, MockBearer};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bearer = MockBearer::new();
//! bearer.inject(vec![0x68, 0x01]);
//! assert_eq!(&bearer.recv().await.unwrap()[..], &[0x68, 0x01]);
//!
//! bearer.send_raw(&[0xAA]).await.unwrap();
//! assert_eq!(bearer.take_sent().len(), 1);
//! # }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Testing only; queues are bounded and overflow panics on inject
//!
//! ## Last Modified
//! v0.1.0 - Initial mock implementation

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{BearerError, Result};
use crate::traits::{
    AppKeyRecord, Bearer, HeartbeatPubRecord, ModelRecord, NodeStateRecord, Persistence,
    ReplayRecord, SequenceRecord, StoredState, SubnetRecord,
};

// ============================================
// Constants
// ============================================

/// Maximum number of PDUs to queue in either direction.
const MAX_QUEUE_SIZE: usize = 1000;

// ============================================
// MockBearer
// ============================================

/// Mock bearer for testing.
///
/// PDUs passed to `inject` are returned by `recv`; PDUs passed to
/// `send_raw` are captured for `take_sent`.
pub struct MockBearer {
    /// PDUs waiting to be received
    rx_queue: Mutex<VecDeque<Bytes>>,
    /// PDUs that have been sent
    tx_queue: Mutex<VecDeque<Bytes>>,
    /// Set once `shutdown` is called
    closed: AtomicBool,
    /// Wakes a pending `recv`
    rx_notify: Notify,
    /// Wakes `wait_sent` callers
    tx_notify: Notify,
}

impl MockBearer {
    /// Creates an empty mock bearer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rx_queue: Mutex::new(VecDeque::with_capacity(64)),
            tx_queue: Mutex::new(VecDeque::with_capacity(64)),
            closed: AtomicBool::new(false),
            rx_notify: Notify::new(),
            tx_notify: Notify::new(),
        }
    }

    /// Queues a PDU to be returned by the next `recv()` call.
    ///
    /// # Panics
    /// Panics if the queue is full (> `MAX_QUEUE_SIZE` PDUs).
    pub fn inject(&self, pdu: impl Into<Bytes>) {
        let mut queue = self.rx_queue.lock();
        assert!(queue.len() < MAX_QUEUE_SIZE, "Mock bearer receive queue overflow");
        queue.push_back(pdu.into());
        drop(queue);
        self.rx_notify.notify_one();
    }

    /// Takes every PDU sent so far.
    #[must_use]
    pub fn take_sent(&self) -> Vec<Bytes> {
        self.tx_queue.lock().drain(..).collect()
    }

    /// Number of PDUs sent and not yet taken.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.tx_queue.lock().len()
    }

    /// Number of injected PDUs not yet received.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.rx_queue.lock().len()
    }

    /// Waits until at least `count` PDUs have been sent and not taken.
    pub async fn wait_sent(&self, count: usize) {
        loop {
            let notified = self.tx_notify.notified();
            if self.sent_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Bearer for MockBearer {
    async fn send_raw(&self, pdu: &[u8]) -> Result<()> {
        if !self.is_active() {
            return Err(BearerError::ShuttingDown);
        }
        let mut queue = self.tx_queue.lock();
        if queue.len() >= MAX_QUEUE_SIZE {
            return Err(BearerError::QueueFull { queue: "mock tx" });
        }
        queue.push_back(Bytes::copy_from_slice(pdu));
        drop(queue);
        self.tx_notify.notify_waiters();
        Ok(())
    }

    async fn recv(&self) -> Result<Bytes> {
        loop {
            let notified = self.rx_notify.notified();
            if !self.is_active() {
                return Err(BearerError::ShuttingDown);
            }
            if let Some(pdu) = self.rx_queue.lock().pop_front() {
                return Ok(pdu);
            }
            notified.await;
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.rx_notify.notify_waiters();
        self.rx_notify.notify_one();
        Ok(())
    }

    fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

impl Default for MockBearer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockBearer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBearer")
            .field("active", &self.is_active())
            .field("pending_rx", &self.pending_count())
            .field("sent", &self.sent_count())
            .finish()
    }
}

// ============================================
// MemoryStore
// ============================================

/// `Persistence` kept in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoredState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-loaded with `state`.
    #[must_use]
    pub fn with_state(state: StoredState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> StoredState {
        self.state.lock().clone()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn store_subnet(&self, record: SubnetRecord) -> Result<()> {
        self.state.lock().upsert_subnet(record);
        Ok(())
    }

    async fn remove_subnet(&self, net_idx: u16) -> Result<()> {
        self.state.lock().remove_subnet(net_idx);
        Ok(())
    }

    async fn store_app_key(&self, record: AppKeyRecord) -> Result<()> {
        self.state.lock().upsert_app_key(record);
        Ok(())
    }

    async fn remove_app_key(&self, app_idx: u16) -> Result<()> {
        self.state.lock().remove_app_key(app_idx);
        Ok(())
    }

    async fn store_model(&self, record: ModelRecord) -> Result<()> {
        self.state.lock().upsert_model(record);
        Ok(())
    }

    async fn store_node_state(&self, record: NodeStateRecord) -> Result<()> {
        self.state.lock().node = Some(record);
        Ok(())
    }

    async fn store_sequence(&self, record: SequenceRecord) -> Result<()> {
        self.state.lock().sequence = Some(record);
        Ok(())
    }

    async fn store_heartbeat_pub(&self, record: HeartbeatPubRecord) -> Result<()> {
        self.state.lock().heartbeat_pub = Some(record);
        Ok(())
    }

    async fn store_replay(&self, records: Vec<ReplayRecord>) -> Result<()> {
        self.state.lock().upsert_replay(records);
        Ok(())
    }

    async fn load(&self) -> Result<StoredState> {
        Ok(self.snapshot())
    }

    async fn clear(&self) -> Result<()> {
        self.state.lock().reset();
        Ok(())
    }
}

// ============================================
// Tests
// ============================================
