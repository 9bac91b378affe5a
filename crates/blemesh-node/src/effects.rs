// ============================================
// File: crates/blemesh-node/src/effects.rs
// ============================================
//! # Pipeline Effects
//!
//! ## Creation Reason
//! The protocol layers are synchronous. They record what has to happen
//! outside the node state (radio, timers, storage, application) in an
//! `Outbox`, and the node task executes it after each event.
//!
//! ## Main Functionality
//! - `Effect`: transmit, timer start/cancel, persistence, notification
//! - `TimerKey`: identity of every timer the node runs
//! - `PersistOp`: one write to the `Persistence` collaborator
//! - `NodeNotification`: events published to the application
//!
//! ## ⚠️ Important Note for Next Developer
//! - Effects are executed in order; a reply queued before a reset is sent
//!   with the keys that existed when it was encoded
//!
//! ## Last Modified
//! v0.1.0 - Initial effect types

use std::time::Duration;

use bytes::Bytes;

use blemesh_bearer::traits::{
    AppKeyRecord, HeartbeatPubRecord, ModelRecord, NodeStateRecord, ReplayRecord, SequenceRecord,
    SubnetRecord,
};
use blemesh_common::time::TransmitParams;
use blemesh_common::types::Address;

use crate::services::heartbeat::HeartbeatReport;

// ============================================
// TimerKey
// ============================================

/// Identity of a node timer. Starting a timer with a key that is already
/// running replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Next segment of an outgoing segmented message.
    SarSegment(Address),
    /// Retransmission round of an outgoing segmented message.
    SarRetransmit(Address),
    /// Acknowledgment of an incoming segmented message.
    SarAck {
        /// Sender of the message.
        src: Address,
        /// Destination of the message.
        dst: Address,
    },
    /// Discard of an incomplete reassembly.
    SarDiscard {
        /// Sender of the message.
        src: Address,
        /// Destination of the message.
        dst: Address,
    },
    /// Periodic heartbeat publication.
    HeartbeatPublish,
    /// Batched write of replay list entries.
    ReplayStore,
    /// Repetition of a network PDU.
    NetworkRepeat(u64),
}

// ============================================
// PersistOp
// ============================================

/// One write to persistent storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOp {
    /// Store or replace a subnet.
    Subnet(SubnetRecord),
    /// Remove a subnet.
    RemoveSubnet(u16),
    /// Store or replace an AppKey.
    AppKey(AppKeyRecord),
    /// Remove an AppKey.
    RemoveAppKey(u16),
    /// Store a model's bindings.
    Model(ModelRecord),
    /// Store node-wide state.
    NodeState(NodeStateRecord),
    /// Store the sequence reservation and IV index.
    Sequence(SequenceRecord),
    /// Store the heartbeat publication.
    HeartbeatPublication(HeartbeatPubRecord),
    /// Store replay list entries.
    Replay(Vec<ReplayRecord>),
    /// Erase everything but the sequence reservation.
    Clear,
}

// ============================================
// NodeNotification
// ============================================

/// Why an outgoing segmented message failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Retransmissions exhausted.
    Timeout,
    /// Cancelled locally.
    Cancelled,
    /// Receiver answered with an empty acknowledgment.
    Rejected,
}

/// Event published to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeNotification {
    /// Segmented message fully acknowledged, or multicast rounds done.
    Delivered {
        /// Destination.
        dst: Address,
    },
    /// Segmented message failed.
    DeliveryFailed {
        /// Destination.
        dst: Address,
        /// Failure kind.
        reason: DeliveryFailure,
    },
    /// Heartbeat accepted by the subscription.
    Heartbeat(HeartbeatReport),
    /// Node was reset by its configuration client.
    Reset,
}

// ============================================
// Effect / Outbox
// ============================================

/// Work for the node task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a network PDU, then repeat it `transmit.count` times.
    Transmit {
        /// Encoded network PDU.
        pdu: Bytes,
        /// Repetitions.
        transmit: TransmitParams,
    },
    /// Start or restart a timer.
    StartTimer {
        /// Timer identity.
        key: TimerKey,
        /// Delay.
        after: Duration,
    },
    /// Cancel a timer.
    CancelTimer(TimerKey),
    /// Cancel every timer.
    CancelAllTimers,
    /// Write to storage.
    Persist(PersistOp),
    /// Publish to the application.
    Notify(NodeNotification),
}

/// Ordered list of effects produced while handling one event.
#[derive(Debug, Default)]
pub struct Outbox {
    effects: Vec<Effect>,
}

impl Outbox {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a PDU transmission.
    pub fn transmit(&mut self, pdu: Bytes, transmit: TransmitParams) {
        self.effects.push(Effect::Transmit { pdu, transmit });
    }

    /// Queues a timer start.
    pub fn start_timer(&mut self, key: TimerKey, after: Duration) {
        self.effects.push(Effect::StartTimer { key, after });
    }

    /// Queues a timer cancel.
    pub fn cancel_timer(&mut self, key: TimerKey) {
        self.effects.push(Effect::CancelTimer(key));
    }

    /// Queues a cancel of every timer.
    pub fn cancel_all_timers(&mut self) {
        self.effects.push(Effect::CancelAllTimers);
    }

    /// Queues a storage write.
    pub fn persist(&mut self, op: PersistOp) {
        self.effects.push(Effect::Persist(op));
    }

    /// Queues an application notification.
    pub fn notify(&mut self, notification: NodeNotification) {
        self.effects.push(Effect::Notify(notification));
    }

    /// Queued effects in order.
    #[must_use]
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Takes every queued effect.
    pub fn drain(&mut self) -> std::vec::Drain<'_, Effect> {
        self.effects.drain(..)
    }

    /// `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Encoded PDUs queued for transmission.
    pub fn transmissions(&self) -> impl Iterator<Item = &Bytes> {
        self.effects.iter().filter_map(|e| match e {
            Effect::Transmit { pdu, .. } => Some(pdu),
            _ => None,
        })
    }

    /// Notifications queued.
    pub fn notifications(&self) -> impl Iterator<Item = &NodeNotification> {
        self.effects.iter().filter_map(|e| match e {
            Effect::Notify(n) => Some(n),
            _ => None,
        })
    }

    /// `true` if a start of `key` is queued.
    #[must_use]
    pub fn starts_timer(&self, key: TimerKey) -> bool {
        self.effects
            .iter()
            .any(|e| matches!(e, Effect::StartTimer { key: k, .. } if *k == key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_order_and_filters() {
        let mut out = Outbox::new();
        out.transmit(Bytes::from_static(b"a"), TransmitParams::new(0, 0));
        out.start_timer(TimerKey::HeartbeatPublish, Duration::from_secs(2));
        out.notify(NodeNotification::Reset);
        out.transmit(Bytes::from_static(b"b"), TransmitParams::new(1, 0));

        assert_eq!(out.transmissions().count(), 2);
        assert!(out.starts_timer(TimerKey::HeartbeatPublish));
        assert!(!out.starts_timer(TimerKey::SarRetransmit(Address::new(1))));
        assert_eq!(out.notifications().count(), 1);

        let drained: Vec<_> = out.drain().collect();
        assert!(matches!(drained[0], Effect::Transmit { .. }));
        assert!(matches!(drained[2], Effect::Notify(NodeNotification::Reset)));
        assert!(out.is_empty());
    }
}
