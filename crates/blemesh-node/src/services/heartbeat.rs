// ============================================
// File: crates/blemesh-node/src/services/heartbeat.rs
// ============================================
//! # Heartbeat Scheduler
//!
//! ## Creation Reason
//! Heartbeat publication and subscription state of the node. Publication
//! produces periodic Heartbeat control messages; subscription collects
//! hop statistics from a configured source.
//!
//! ## Main Functionality
//! - `Heartbeat::publish_tick`: one periodic publication step
//! - `Heartbeat::feature_heartbeat`: extra message on feature change
//! - `Heartbeat::set_subscription` / `receive`: subscription window and
//!   statistics, optional callback
//!
//! ## Publication Timeline
//! ```text
//!  set(count=3, period=2s)
//!   t=0 send (count 3→2) ─ t=2 send (2→1) ─ t=4 send (1→0) ─ idle
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This type only decides; sending and timers live in the pipeline
//! - Count 0xFFFF means publish indefinitely and is never decremented
//!
//! ## Last Modified
//! v0.1.0 - Initial heartbeat scheduler

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use blemesh_bearer::traits::HeartbeatPubRecord;
use blemesh_common::time::{hb_log, hb_pub_count_log, hb_pwr2};
use blemesh_common::types::{Address, Features, NetKeyIndex, TTL_MAX};
use blemesh_core::protocol::config::{HeartbeatPubParams, HeartbeatSubParams};
use blemesh_core::protocol::HeartbeatMessage;

// ============================================
// Types
// ============================================

/// Heartbeat publication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPublication {
    /// Destination; unassigned disables publication.
    pub dst: Address,
    /// Remaining messages, 0xFFFF for indefinite.
    pub count: u16,
    /// Log-encoded period.
    pub period_log: u8,
    /// TTL of published messages.
    pub ttl: u8,
    /// Features whose change triggers a heartbeat.
    pub features: Features,
    /// Subnet used for publishing.
    pub net_idx: NetKeyIndex,
}

impl Default for HeartbeatPublication {
    fn default() -> Self {
        Self {
            dst: Address::UNASSIGNED,
            count: 0,
            period_log: 0,
            ttl: 0,
            features: Features::default(),
            net_idx: NetKeyIndex::PRIMARY,
        }
    }
}

impl HeartbeatPublication {
    /// Publication period.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_secs(u64::from(hb_pwr2(self.period_log, 1)))
    }

    /// `true` when periodic messages are still due.
    #[must_use]
    pub fn is_periodic(&self) -> bool {
        !self.dst.is_unassigned() && self.count > 0 && self.period_log > 0
    }

    /// Stored form.
    #[must_use]
    pub fn to_record(&self) -> HeartbeatPubRecord {
        HeartbeatPubRecord {
            dst: self.dst,
            count: self.count,
            period_log: self.period_log,
            ttl: self.ttl,
            features: self.features.bits(),
            net_idx: self.net_idx.value(),
        }
    }

    /// Publication from its stored form.
    #[must_use]
    pub fn from_record(record: &HeartbeatPubRecord) -> Self {
        Self {
            dst: record.dst,
            count: record.count,
            period_log: record.period_log,
            ttl: record.ttl,
            features: Features::from_bits(record.features),
            net_idx: NetKeyIndex::masked(record.net_idx),
        }
    }

    /// Wire form for status messages.
    #[must_use]
    pub fn to_params(&self) -> HeartbeatPubParams {
        HeartbeatPubParams {
            dst: self.dst,
            count_log: hb_pub_count_log(self.count),
            period_log: self.period_log,
            ttl: self.ttl,
            features: self.features,
            net_idx: self.net_idx.value(),
        }
    }
}

/// Heartbeat subscription state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSubscription {
    /// Accepted source.
    pub src: Address,
    /// Accepted destination.
    pub dst: Address,
    /// Heartbeats received in the window (saturating).
    pub count: u16,
    /// Minimum hops seen.
    pub min_hops: u8,
    /// Maximum hops seen.
    pub max_hops: u8,
    /// End of the window.
    pub expiry: Option<Instant>,
}

impl Default for HeartbeatSubscription {
    fn default() -> Self {
        Self {
            src: Address::UNASSIGNED,
            dst: Address::UNASSIGNED,
            count: 0,
            min_hops: 0,
            max_hops: 0,
            expiry: None,
        }
    }
}

impl HeartbeatSubscription {
    /// `true` while the window is open.
    #[must_use]
    pub fn is_active(&self, now: Instant) -> bool {
        self.expiry.is_some_and(|e| now <= e)
    }

    /// Wire form for status messages.
    #[must_use]
    pub fn to_params(&self, now: Instant) -> HeartbeatSubParams {
        let remaining = self
            .expiry
            .map_or(0, |e| e.saturating_duration_since(now).as_secs());
        HeartbeatSubParams {
            src: self.src,
            dst: self.dst,
            period_log: hb_log(u32::try_from(remaining).unwrap_or(u32::MAX).min(0xFFFF)),
            count_log: hb_log(u32::from(self.count)),
            min_hops: self.min_hops,
            max_hops: self.max_hops,
        }
    }
}

/// A heartbeat accepted by the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Source.
    pub src: Address,
    /// Destination.
    pub dst: Address,
    /// Hops travelled.
    pub hops: u8,
    /// Features active at the source.
    pub features: Features,
}

/// Callback for accepted heartbeats.
pub type HeartbeatCallback = Box<dyn Fn(&HeartbeatReport) + Send + Sync>;

/// A heartbeat message to send now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishTick {
    /// Destination.
    pub dst: Address,
    /// Subnet.
    pub net_idx: NetKeyIndex,
    /// Network TTL, also the message's initial TTL.
    pub ttl: u8,
    /// Message content.
    pub message: HeartbeatMessage,
    /// Delay until the next tick, if another is due.
    pub next: Option<Duration>,
}

// ============================================
// Heartbeat
// ============================================

/// Heartbeat publication and subscription.
#[derive(Default)]
pub struct Heartbeat {
    publication: HeartbeatPublication,
    subscription: HeartbeatSubscription,
    callback: Option<HeartbeatCallback>,
}

impl fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heartbeat")
            .field("publication", &self.publication)
            .field("subscription", &self.subscription)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Heartbeat {
    /// Creates disabled publication and subscription.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the subscription callback.
    pub fn set_callback(&mut self, callback: HeartbeatCallback) {
        self.callback = Some(callback);
    }

    // ========================================
    // Publication
    // ========================================

    /// Current publication.
    #[must_use]
    pub const fn publication(&self) -> &HeartbeatPublication {
        &self.publication
    }

    /// Replaces the publication; an unassigned destination disables it.
    ///
    /// Returns `true` when a tick is due immediately.
    pub fn set_publication(&mut self, publication: HeartbeatPublication) -> bool {
        if publication.dst.is_unassigned() {
            self.disable_publication();
            return false;
        }
        self.publication = publication;
        debug!(
            dst = %publication.dst,
            count = publication.count,
            period_s = publication.period().as_secs(),
            "Heartbeat publication set"
        );
        publication.is_periodic()
    }

    /// Clears destination, count, period and ttl.
    pub fn disable_publication(&mut self) {
        self.publication.dst = Address::UNASSIGNED;
        self.publication.count = 0;
        self.publication.period_log = 0;
        self.publication.ttl = 0;
    }

    /// One periodic publication step.
    ///
    /// `subnet_exists` tells whether the publication subnet is still
    /// present; publication is disabled when it is not.
    pub fn publish_tick(&mut self, subnet_exists: bool, active: Features) -> Option<PublishTick> {
        if !subnet_exists {
            self.publication.dst = Address::UNASSIGNED;
            return None;
        }
        let publication = self.publication;
        if publication.dst.is_unassigned() || publication.count == 0 {
            return None;
        }
        let next = (publication.period_log > 0 && publication.count > 1)
            .then(|| publication.period());
        if publication.count != 0xFFFF {
            self.publication.count -= 1;
        }
        trace!(dst = %publication.dst, remaining = self.publication.count, "Heartbeat tick");
        Some(self.tick(active, next))
    }

    /// Heartbeat sent because a feature in `changed` was toggled.
    #[must_use]
    pub fn feature_heartbeat(&self, changed: Features, active: Features) -> Option<PublishTick> {
        if self.publication.dst.is_unassigned() || !self.publication.features.intersects(changed) {
            return None;
        }
        Some(self.tick(active, None))
    }

    fn tick(&self, active: Features, next: Option<Duration>) -> PublishTick {
        PublishTick {
            dst: self.publication.dst,
            net_idx: self.publication.net_idx,
            ttl: self.publication.ttl,
            message: HeartbeatMessage {
                init_ttl: self.publication.ttl,
                features: active,
            },
            next,
        }
    }

    // ========================================
    // Subscription
    // ========================================

    /// Current subscription.
    #[must_use]
    pub const fn subscription(&self) -> &HeartbeatSubscription {
        &self.subscription
    }

    /// `true` if heartbeats to `dst` must be accepted by the transport.
    #[must_use]
    pub fn is_subscription_dst(&self, dst: Address) -> bool {
        !dst.is_unassigned() && self.subscription.dst == dst
    }

    /// Applies a subscription set and returns the status to report.
    ///
    /// Addresses and period must already be validated.
    pub fn set_subscription(
        &mut self,
        src: Address,
        dst: Address,
        period_log: u8,
        now: Instant,
    ) -> HeartbeatSubParams {
        let sub = &mut self.subscription;
        if src.is_unassigned() || dst.is_unassigned() || period_log == 0 {
            if src.is_unassigned() || dst.is_unassigned() {
                sub.src = Address::UNASSIGNED;
                sub.dst = Address::UNASSIGNED;
                sub.min_hops = TTL_MAX;
                sub.max_hops = 0;
                sub.count = 0;
            }
            sub.expiry = None;
        } else {
            sub.src = src;
            sub.dst = dst;
            sub.min_hops = TTL_MAX;
            sub.max_hops = 0;
            sub.count = 0;
            let period = Duration::from_secs(u64::from(hb_pwr2(period_log, 1)));
            sub.expiry = Some(now + period);
        }
        let status = sub.to_params(now);
        if sub.expiry.is_none() {
            sub.min_hops = 0;
        }
        debug!(src = %src, dst = %dst, period_log, "Heartbeat subscription set");
        status
    }

    /// Handles a received heartbeat. Returns the report when accepted.
    pub fn receive(
        &mut self,
        src: Address,
        dst: Address,
        message: &HeartbeatMessage,
        rx_ttl: u8,
        now: Instant,
    ) -> Option<HeartbeatReport> {
        let sub = &mut self.subscription;
        if src != sub.src || dst != sub.dst {
            trace!(src = %src, dst = %dst, "No subscription for heartbeat");
            return None;
        }
        if !sub.is_active(now) {
            trace!(src = %src, "Heartbeat subscription expired");
            return None;
        }
        let hops = message.hops(rx_ttl);
        sub.min_hops = sub.min_hops.min(hops);
        sub.max_hops = sub.max_hops.max(hops);
        sub.count = sub.count.saturating_add(1);
        debug!(
            src = %src,
            hops,
            min = sub.min_hops,
            max = sub.max_hops,
            count = sub.count,
            "Heartbeat received"
        );
        let report = HeartbeatReport {
            src,
            dst,
            hops,
            features: message.features,
        };
        if let Some(callback) = &self.callback {
            callback(&report);
        }
        Some(report)
    }

    /// Clears subscription addresses and expiry.
    pub fn reset_subscription(&mut self) {
        self.subscription.src = Address::UNASSIGNED;
        self.subscription.dst = Address::UNASSIGNED;
        self.subscription.expiry = None;
    }
}

// ============================================
// Tests
// ============================================
