// ============================================
// File: crates/blemesh-node/src/handlers/network.rs
// ============================================
//! # Network Layer
//!
//! ## Creation Reason
//! Opens incoming network PDUs with the matching subnet keys, filters
//! them, relays what is not addressed to this node only, and seals
//! locally originated PDUs.
//!
//! ## Main Functionality
//! - `NetworkLayer::receive`: decode → cache → address checks → relay →
//!   local acceptance → replay protection
//! - `NetworkLayer::send`: seal with the subnet transmit key and queue
//!   with network transmit repetitions
//!
//! ## Receive Pipeline
//! ```text
//! raw bytes
//!   │ IVI/NID peek, IV index selection
//!   ▼
//! try each subnet key with matching NID (current, then updated)
//!   │ none validates → AuthenticationFailed (silent)
//!   ▼
//! message cache ── duplicate → drop
//!   │
//! src unicast? dst assigned? src not local?
//!   │
//!   ├── dst not a local element, ttl > 1, relay on ──▶ re-encode ttl-1, relay
//!   │
//! accepted locally? ── no → done
//!   │
//! replay list ── old seq → ReplayDetected (silent)
//!   ▼
//! ReceivedPdu → transport
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Relayed PDUs are sealed again with the transmit key of the subnet,
//!   so a node in key refresh phase 2 relays under the new key
//! - The message cache is updated before relaying; a PDU is relayed at
//!   most once
//!
//! ## Last Modified
//! v0.1.0 - Initial network layer

use bytes::Bytes;
use tracing::{debug, trace};

use blemesh_common::types::{Address, NetKeyIndex};
use blemesh_core::error::CoreError;
use blemesh_core::protocol::{NetworkCodec, NetworkPdu};

use crate::context::MeshContext;
use crate::effects::{Outbox, TimerKey};
use crate::error::Result;
use crate::services::replay::REPLAY_STORE_DELAY;

// ============================================
// ReceivedPdu
// ============================================

/// A network PDU accepted for local processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPdu {
    /// Subnet whose key opened the PDU.
    pub net_idx: NetKeyIndex,
    /// IV index used to open the PDU.
    pub iv_index: u32,
    /// Decrypted PDU.
    pub pdu: NetworkPdu,
}

// ============================================
// NetworkLayer
// ============================================

/// Network PDU processing.
#[derive(Debug, Default, Clone)]
pub struct NetworkLayer {
    codec: NetworkCodec,
}

impl NetworkLayer {
    /// Creates the layer with the software cipher.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            codec: NetworkCodec::new(),
        }
    }

    /// Processes a raw PDU from the bearer.
    ///
    /// Returns `Ok(None)` for PDUs that were handled here (dropped or
    /// relayed only).
    ///
    /// # Errors
    /// - `AuthenticationFailed`: no subnet key opens the PDU
    /// - `ReplayDetected`: sequence number already seen
    /// - `PduTooShort` / `PduTooLarge`: bad length
    pub fn receive(
        &self,
        ctx: &mut MeshContext,
        raw: &[u8],
        out: &mut Outbox,
    ) -> Result<Option<ReceivedPdu>> {
        let (ivi, nid) = <NetworkCodec>::peek_ivi_nid(raw)?;
        let (iv_index, old_iv) = ctx.iv.rx_index(ivi);

        let (net_idx, pdu) = self.open(ctx, raw, nid, iv_index)?;

        if !ctx.cache.insert(pdu.src, pdu.seq) {
            trace!(src = %pdu.src, seq = pdu.seq, "Duplicate network PDU");
            return Ok(None);
        }
        if !pdu.src.is_unicast() {
            debug!(src = %pdu.src, "Network PDU from non-unicast source");
            return Ok(None);
        }
        if pdu.dst.is_unassigned() {
            debug!(src = %pdu.src, "Network PDU to unassigned address");
            return Ok(None);
        }
        if ctx.is_local(pdu.src) {
            trace!(src = %pdu.src, "Own network PDU echoed back");
            return Ok(None);
        }

        trace!(
            net_idx = %net_idx,
            src = %pdu.src,
            dst = %pdu.dst,
            seq = pdu.seq,
            ttl = pdu.ttl,
            ctl = pdu.ctl,
            "Network PDU received"
        );

        if !ctx.is_local(pdu.dst) && pdu.ttl > 1 && ctx.state.relay.is_enabled() {
            self.relay(ctx, net_idx, &pdu, iv_index, out)?;
        }

        if !ctx.accepts(pdu.dst) {
            return Ok(None);
        }

        let store_due = !ctx.replay.has_pending();
        ctx.replay.check_and_update(pdu.src, pdu.seq, old_iv)?;
        if store_due {
            out.start_timer(TimerKey::ReplayStore, REPLAY_STORE_DELAY);
        }

        Ok(Some(ReceivedPdu {
            net_idx,
            iv_index,
            pdu,
        }))
    }

    /// Tries every subnet key whose NID matches.
    fn open(
        &self,
        ctx: &MeshContext,
        raw: &[u8],
        nid: u8,
        iv_index: u32,
    ) -> Result<(NetKeyIndex, NetworkPdu)> {
        for subnet in ctx.keys.subnets() {
            for (slot, keys) in subnet.rx_keys() {
                if keys.nid != nid {
                    continue;
                }
                match self.codec.decode(raw, keys, iv_index) {
                    Ok(pdu) => {
                        trace!(net_idx = %subnet.net_idx(), ?slot, "Network PDU opened");
                        return Ok((subnet.net_idx(), pdu));
                    }
                    Err(e) if e.is_silent_drop() => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        trace!(nid, len = raw.len(), "No subnet key opens network PDU");
        Err(CoreError::net_auth().into())
    }

    /// Re-encodes a PDU with a decremented TTL and queues it.
    fn relay(
        &self,
        ctx: &MeshContext,
        net_idx: NetKeyIndex,
        pdu: &NetworkPdu,
        iv_index: u32,
        out: &mut Outbox,
    ) -> Result<()> {
        let subnet = ctx.keys.lookup_subnet(net_idx)?;
        let relayed = NetworkPdu {
            ttl: pdu.ttl - 1,
            ..pdu.clone()
        };
        let raw = self.codec.encode(&relayed, subnet.tx_keys(), iv_index)?;
        debug!(
            src = %pdu.src,
            dst = %pdu.dst,
            seq = pdu.seq,
            ttl = relayed.ttl,
            "Relaying network PDU"
        );
        out.transmit(raw, ctx.state.relay_retransmit);
        Ok(())
    }

    /// Seals a locally originated PDU and queues it with the network
    /// transmit repetitions.
    ///
    /// # Errors
    /// - `KeyNotFound`: unknown subnet
    /// - `PduTooLarge` / `MalformedPdu`: invalid transport PDU or TTL
    pub fn send(
        &self,
        ctx: &MeshContext,
        net_idx: NetKeyIndex,
        pdu: &NetworkPdu,
        out: &mut Outbox,
    ) -> Result<()> {
        let raw = self.encode(ctx, net_idx, pdu)?;
        trace!(
            net_idx = %net_idx,
            src = %pdu.src,
            dst = %pdu.dst,
            seq = pdu.seq,
            ttl = pdu.ttl,
            "Network PDU queued"
        );
        out.transmit(raw, ctx.state.network_transmit);
        Ok(())
    }

    /// Seals a PDU under the subnet transmit key and the transmit IV index.
    ///
    /// # Errors
    /// See [`NetworkLayer::send`].
    pub fn encode(&self, ctx: &MeshContext, net_idx: NetKeyIndex, pdu: &NetworkPdu) -> Result<Bytes> {
        let subnet = ctx.keys.lookup_subnet(net_idx)?;
        Ok(self.codec.encode(pdu, subnet.tx_keys(), ctx.iv.tx_index())?)
    }
}

/// Builds a network PDU header for locally originated traffic.
#[must_use]
pub fn local_pdu(
    ctl: bool,
    ttl: u8,
    seq: u32,
    src: Address,
    dst: Address,
    transport_pdu: Bytes,
) -> NetworkPdu {
    NetworkPdu {
        ctl,
        ttl,
        seq,
        src,
        dst,
        transport_pdu,
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use blemesh_core::crypto::Key128;

    use crate::config::{FeatureState, NodeConfig};
    use crate::effects::Effect;

    const NET_KEY: [u8; 16] = [0x7D; 16];

    fn context(primary: u16) -> MeshContext {
        let mut config = NodeConfig::default();
        config.provisioning.unicast_address = primary;
        let mut ctx = MeshContext::new(&config, Key128::from_bytes([0x11; 16]));
        ctx.provision(NetKeyIndex::PRIMARY, &Key128::from_bytes(NET_KEY))
            .unwrap();
        ctx
    }

    fn remote_pdu(ctx: &MeshContext, ttl: u8, seq: u32, dst: u16) -> Bytes {
        let pdu = local_pdu(
            false,
            ttl,
            seq,
            Address::new(0x0200),
            Address::new(dst),
            Bytes::from_static(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05]),
        );
        NetworkLayer::new()
            .encode(ctx, NetKeyIndex::PRIMARY, &pdu)
            .unwrap()
    }

    #[test]
    fn test_local_delivery_and_replay() {
        let mut ctx = context(0x0100);
        let layer = NetworkLayer::new();
        let raw = remote_pdu(&ctx, 5, 10, 0x0100);

        let mut out = Outbox::new();
        let rx = layer.receive(&mut ctx, &raw, &mut out).unwrap().unwrap();
        assert_eq!(rx.pdu.src, Address::new(0x0200));
        assert_eq!(rx.net_idx, NetKeyIndex::PRIMARY);
        assert_eq!(out.transmissions().count(), 0);
        assert!(out.starts_timer(TimerKey::ReplayStore));
        assert!(ctx.replay.has_pending());

        // same bytes are stopped by the message cache
        assert!(layer.receive(&mut ctx, &raw, &mut out).unwrap().is_none());

        // a lower seq that is not cached is stopped by the replay list
        ctx.cache.clear();
        let older = remote_pdu(&ctx, 5, 9, 0x0100);
        let err = layer.receive(&mut ctx, &older, &mut out).unwrap_err();
        assert!(err.is_silent_drop());

        // one store per batch of accepted entries
        let mut out = Outbox::new();
        let newer = remote_pdu(&ctx, 5, 11, 0x0100);
        layer.receive(&mut ctx, &newer, &mut out).unwrap().unwrap();
        assert!(!out.starts_timer(TimerKey::ReplayStore));
    }

    #[test]
    fn test_unknown_key_is_silent() {
        let mut ctx = context(0x0100);
        let mut other = context(0x0300);
        other.keys.reset();
        other
            .provision(NetKeyIndex::PRIMARY, &Key128::from_bytes([0x01; 16]))
            .unwrap();
        let raw = remote_pdu(&other, 5, 1, 0x0100);
        let err = NetworkLayer::new()
            .receive(&mut ctx, &raw, &mut Outbox::new())
            .unwrap_err();
        assert!(err.is_silent_drop());
    }

    #[test]
    fn test_relay_decrements_ttl() {
        let mut ctx = context(0x0100);
        let layer = NetworkLayer::new();
        let raw = remote_pdu(&ctx, 5, 1, 0x0300);
        let mut out = Outbox::new();
        assert!(layer.receive(&mut ctx, &raw, &mut out).unwrap().is_none());

        let relayed: Vec<_> = out.transmissions().cloned().collect();
        assert_eq!(relayed.len(), 1);
        assert_ne!(relayed[0], raw);
        let subnet = ctx.keys.subnet(NetKeyIndex::PRIMARY).unwrap();
        let decoded = NetworkCodec::new()
            .decode(&relayed[0], subnet.tx_keys(), ctx.iv.tx_index())
            .unwrap();
        assert_eq!(decoded.ttl, 4);
        assert_eq!(decoded.seq, 1);
        assert!(matches!(
            out.effects()[0],
            Effect::Transmit { transmit, .. } if transmit == ctx.state.relay_retransmit
        ));
    }

    #[test]
    fn test_ttl_one_not_relayed() {
        let mut ctx = context(0x0100);
        let raw = remote_pdu(&ctx, 1, 1, 0x0300);
        let mut out = Outbox::new();
        assert!(NetworkLayer::new()
            .receive(&mut ctx, &raw, &mut out)
            .unwrap()
            .is_none());
        assert_eq!(out.transmissions().count(), 0);
    }

    #[test]
    fn test_relay_disabled() {
        let mut ctx = context(0x0100);
        ctx.state.relay = FeatureState::Disabled;
        let raw = remote_pdu(&ctx, 5, 1, 0x0300);
        let mut out = Outbox::new();
        NetworkLayer::new().receive(&mut ctx, &raw, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_group_is_relayed_and_accepted() {
        let mut ctx = context(0x0100);
        let raw = remote_pdu(&ctx, 3, 1, 0xFFFF);
        let mut out = Outbox::new();
        let rx = NetworkLayer::new().receive(&mut ctx, &raw, &mut out).unwrap();
        assert!(rx.is_some());
        assert_eq!(out.transmissions().count(), 1);
    }

    #[test]
    fn test_own_source_dropped() {
        let mut ctx = context(0x0100);
        let pdu = local_pdu(
            false,
            5,
            1,
            Address::new(0x0100),
            Address::new(0xFFFF),
            Bytes::from_static(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05]),
        );
        let layer = NetworkLayer::new();
        let raw = layer.encode(&ctx, NetKeyIndex::PRIMARY, &pdu).unwrap();
        let mut out = Outbox::new();
        assert!(layer.receive(&mut ctx, &raw, &mut out).unwrap().is_none());
        assert!(out.is_empty());
    }
}
