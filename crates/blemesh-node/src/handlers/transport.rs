// ============================================
// File: crates/blemesh-node/src/handlers/transport.rs
// ============================================
//! # Transport Layer
//!
//! ## Creation Reason
//! Upper transport encryption plus lower transport segmentation and
//! reassembly (SAR) for access and control messages.
//!
//! ## Main Functionality
//! - `TransportLayer::send`: seal with AppKey or device key, send
//!   unsegmented or as a SAR transmission
//! - `TransportLayer::receive`: reassemble, acknowledge, decrypt
//! - `TransportLayer::on_timer`: segment pacing, retransmissions,
//!   acknowledgment and discard timers
//! - Segment Acknowledgment and Heartbeat control messages
//!
//! ## SAR Transmitter
//! ```text
//! send ──▶ round: unacked segments, one per segment interval
//!            │
//!            ▼
//!       retransmit timer ──▶ unicast: retries left? ──no──▶ DeliveryFailed(Timeout)
//!            ▲                multicast: rounds left? ─no──▶ Delivered
//!            │
//!       Segment Ack ──▶ all acked → Delivered
//!                       zero bitmap → DeliveryFailed(Rejected)
//!                       progress → reset no-progress counter
//! ```
//!
//! ## SAR Receiver
//! ```text
//! segment ──▶ (src, dst) slot ── older SeqAuth → drop
//!                              ── newer SeqAuth → replace
//!                              ── complete      → re-ack (rate limited)
//!              │
//!              ▼
//!        store, restart discard timer, arm ack timer (unicast only)
//!              │ all segments
//!              ▼
//!        ack, assemble, decrypt → UpperMessage
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - One outgoing segmented message per destination; a second is `Busy`
//! - Only reassemblies in progress count against the receive limit;
//!   finished records stay to answer late segments
//! - Every segment transmission takes a fresh SEQ; SeqZero comes from
//!   the first one
//!
//! ## Last Modified
//! v0.1.0 - Initial SAR transport

use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use blemesh_common::types::{Address, AppKeyIndex, NetKeyIndex, TTL_DEFAULT, TTL_MAX};
use blemesh_core::crypto::ccm::access_nonce;
use blemesh_core::crypto::{kdf, AesCcmCipher, Key128, MeshCipher, MicSize};
use blemesh_core::error::CoreError;
use blemesh_core::protocol::codec::{decode_from_slice, encode_to_bytes};
use blemesh_core::protocol::lower::{
    self, MAX_SEGMENTS, SEG_LEN_ACCESS, SEG_LEN_CONTROL, SEQ_ZERO_MASK, UNSEG_MAX_ACCESS,
    UNSEG_MAX_CONTROL,
};
use blemesh_core::protocol::{
    AccessMessage, HeartbeatMessage, LowerCodec, LowerPdu, SegmentAck, SegmentInfo,
};

use super::network::{local_pdu, NetworkLayer, ReceivedPdu};
use crate::config::{LimitsConfig, SarConfig};
use crate::context::MeshContext;
use crate::effects::{DeliveryFailure, NodeNotification, Outbox, TimerKey};
use crate::error::{NodeError, Result};

const SEQ_MASK: u64 = 0x00FF_FFFF;

// ============================================
// Public Types
// ============================================

/// Key used for upper transport encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// This node's device key, sent on the given subnet.
    DeviceKey(NetKeyIndex),
    /// An application key; the subnet is the key's owner.
    AppKey(AppKeyIndex),
}

/// An access message to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// Source element, primary element when `None`.
    pub src: Option<Address>,
    /// Destination.
    pub dst: Address,
    /// Label UUID for virtual destinations.
    pub label: Option<[u8; 16]>,
    /// Encryption key.
    pub security: Security,
    /// TTL, `TTL_DEFAULT` for the node's default TTL.
    pub ttl: u8,
    /// Use a 64-bit TransMIC (forces segmentation).
    pub szmic: bool,
    /// Message.
    pub message: AccessMessage,
}

impl SendRequest {
    /// Request from the primary element with the default TTL.
    #[must_use]
    pub fn new(dst: Address, security: Security, message: AccessMessage) -> Self {
        Self {
            src: None,
            dst,
            label: None,
            security,
            ttl: TTL_DEFAULT,
            szmic: false,
            message,
        }
    }

    /// Request to a virtual address.
    #[must_use]
    pub fn to_label(label: [u8; 16], security: Security, message: AccessMessage) -> Self {
        Self {
            label: Some(label),
            ..Self::new(Address::new(kdf::virtual_address(&label)), security, message)
        }
    }

    /// Sets the source element.
    #[must_use]
    pub fn with_src(mut self, src: Address) -> Self {
        self.src = Some(src);
        self
    }

    /// Sets the TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Requests the 64-bit TransMIC.
    #[must_use]
    pub fn with_szmic(mut self, szmic: bool) -> Self {
        self.szmic = szmic;
        self
    }
}

/// Security context of a received access message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageContext {
    /// Subnet.
    pub net_idx: NetKeyIndex,
    /// AppKey, `None` for the device key.
    pub app_idx: Option<AppKeyIndex>,
    /// Sender.
    pub src: Address,
    /// Destination.
    pub dst: Address,
    /// TTL the last hop used.
    pub recv_ttl: u8,
    /// Label UUID when `dst` is virtual.
    pub label: Option<[u8; 16]>,
}

/// A decrypted access payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpperMessage {
    /// Security context.
    pub context: MessageContext,
    /// Opcode and parameters.
    pub payload: Bytes,
}

/// Addressing of a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlTarget {
    /// Subnet.
    pub net_idx: NetKeyIndex,
    /// Local source element.
    pub src: Address,
    /// Destination.
    pub dst: Address,
    /// TTL.
    pub ttl: u8,
}

// ============================================
// Internal State
// ============================================

/// Lower transport header fields shared by all segments of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegHeader {
    Access { akf: bool, aid: u8, szmic: bool },
    Control { opcode: u8 },
}

impl SegHeader {
    const fn is_control(self) -> bool {
        matches!(self, Self::Control { .. })
    }

    const fn seg_len(self) -> usize {
        lower::seg_len(self.is_control())
    }

    fn segment(self, seg: SegmentInfo, segment: Bytes) -> LowerPdu {
        match self {
            Self::Access { akf, aid, szmic } => LowerPdu::SegmentedAccess {
                akf,
                aid,
                szmic,
                seg,
                segment,
            },
            Self::Control { opcode } => LowerPdu::SegmentedControl {
                opcode,
                seg,
                segment,
            },
        }
    }
}

/// Outgoing segmented message.
#[derive(Debug)]
struct SegTx {
    net_idx: NetKeyIndex,
    src: Address,
    ttl: u8,
    header: SegHeader,
    seq_zero: u16,
    first_seq: Option<u32>,
    segments: Vec<Bytes>,
    acked: u32,
    round: VecDeque<u8>,
    unicast_left: u8,
    no_progress_left: u8,
    multicast_left: u8,
}

impl SegTx {
    fn seg_n(&self) -> u8 {
        // at most MAX_SEGMENTS entries
        (self.segments.len() - 1) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    InProgress,
    Complete,
    Discarded,
}

/// Incoming segmented message.
#[derive(Debug)]
struct SegRx {
    net_idx: NetKeyIndex,
    seq_auth: u64,
    header: SegHeader,
    seg_n: u8,
    ttl: u8,
    parts: Vec<Option<Bytes>>,
    received: u32,
    state: RxState,
    ack_pending: bool,
    acks_left: u8,
    last_ack: Option<Instant>,
    touched: Instant,
}

impl SegRx {
    fn seq_zero(&self) -> u16 {
        (self.seq_auth & u64::from(SEQ_ZERO_MASK)) as u16
    }

    fn assemble(&mut self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.parts.len() * self.header.seg_len());
        for part in self.parts.drain(..).flatten() {
            buf.extend_from_slice(&part);
        }
        buf.freeze()
    }
}

// ============================================
// TransportLayer
// ============================================

/// Upper and lower transport with SAR state.
#[derive(Debug)]
pub struct TransportLayer {
    sar: SarConfig,
    max_tx: usize,
    max_rx: usize,
    tx: HashMap<Address, SegTx>,
    rx: HashMap<(Address, Address), SegRx>,
    cipher: AesCcmCipher,
}

impl TransportLayer {
    /// Creates the layer with SAR timing and table limits.
    #[must_use]
    pub fn new(sar: SarConfig, limits: &LimitsConfig) -> Self {
        Self {
            sar,
            max_tx: limits.tx_segmented,
            max_rx: limits.rx_reassemblies,
            tx: HashMap::new(),
            rx: HashMap::new(),
            cipher: AesCcmCipher::new(),
        }
    }

    /// `true` while a segmented transmission to `dst` is outstanding.
    #[must_use]
    pub fn is_busy(&self, dst: Address) -> bool {
        self.tx.contains_key(&dst)
    }

    /// Reassemblies currently in progress.
    #[must_use]
    pub fn reassemblies(&self) -> usize {
        self.rx
            .values()
            .filter(|r| r.state == RxState::InProgress)
            .count()
    }

    /// Drops all SAR state.
    pub fn reset(&mut self) {
        self.tx.clear();
        self.rx.clear();
    }

    // ========================================
    // Send
    // ========================================

    /// Encrypts and sends an access message.
    ///
    /// Returns `true` when the message went out segmented; the outcome
    /// of a segmented message is reported through a notification.
    ///
    /// # Errors
    /// - `InvalidAddress`: source is not a local element or destination
    ///   is unassigned
    /// - `KeyNotFound`: unknown AppKey or subnet
    /// - `Busy`: segmented message to `dst` already outstanding
    /// - `InsufficientResources`: too many segmented transmissions
    /// - `PduTooLarge`: payload above 32 segments
    /// - `SequenceExhausted`
    pub fn send(
        &mut self,
        ctx: &mut MeshContext,
        network: &NetworkLayer,
        request: &SendRequest,
        out: &mut Outbox,
    ) -> Result<bool> {
        let src = request.src.unwrap_or_else(|| ctx.primary());
        if !ctx.is_local(src) {
            return Err(NodeError::InvalidAddress(src));
        }
        let dst = request.dst;
        if dst.is_unassigned() {
            return Err(NodeError::InvalidAddress(dst));
        }
        let ttl = if request.ttl == TTL_DEFAULT {
            ctx.state.default_ttl
        } else {
            request.ttl
        };
        if ttl == 1 || ttl > TTL_MAX {
            return Err(CoreError::malformed(format!("TTL {ttl} cannot be sent")).into());
        }

        let (net_idx, key, akf, aid) = match request.security {
            Security::DeviceKey(net_idx) => {
                ctx.keys.lookup_subnet(net_idx)?;
                (net_idx, ctx.dev_key().clone(), false, 0)
            }
            Security::AppKey(app_idx) => {
                let (net_idx, key, aid) = ctx.keys.app_tx_key(app_idx)?;
                (net_idx, key.clone(), true, aid)
            }
        };

        let payload = request.message.to_bytes();
        let segmented = request.szmic || payload.len() + MicSize::Short.len() > UNSEG_MAX_ACCESS;
        let szmic = segmented && request.szmic;
        let mic = MicSize::from_flag(szmic);
        let max = MAX_SEGMENTS * SEG_LEN_ACCESS;
        if payload.len() + mic.len() > max {
            return Err(CoreError::too_large(max, payload.len() + mic.len()).into());
        }
        if segmented {
            self.check_tx_slot(dst)?;
        }

        let seq = ctx.next_seq()?;
        let iv_index = ctx.iv.tx_index();
        let nonce = access_nonce(!akf, szmic, seq, src.value(), dst.value(), iv_index);
        let aad: &[u8] = match &request.label {
            Some(label) => label,
            None => &[],
        };
        let sealed = Bytes::from(self.cipher.seal(&key, &nonce, &payload, aad, mic)?);

        debug!(
            src = %src,
            dst = %dst,
            net_idx = %net_idx,
            opcode = %request.message.opcode,
            seq,
            len = sealed.len(),
            segmented,
            "Sending access message"
        );

        if !segmented {
            let lower = LowerPdu::UnsegmentedAccess {
                akf,
                aid,
                upper: sealed,
            };
            let transport_pdu = encode_to_bytes(&LowerCodec::access(), &lower);
            network.send(ctx, net_idx, &local_pdu(false, ttl, seq, src, dst, transport_pdu), out)?;
            return Ok(false);
        }

        let header = SegHeader::Access { akf, aid, szmic };
        self.start_segmented(ctx, network, net_idx, src, dst, ttl, header, seq, &sealed, out)?;
        Ok(true)
    }

    /// Sends a transport control message, segmented when it does not fit
    /// one PDU.
    ///
    /// # Errors
    /// Same as [`TransportLayer::send`].
    pub fn send_control(
        &mut self,
        ctx: &mut MeshContext,
        network: &NetworkLayer,
        target: ControlTarget,
        opcode: u8,
        params: &Bytes,
        out: &mut Outbox,
    ) -> Result<()> {
        if params.len() <= UNSEG_MAX_CONTROL {
            return send_unsegmented_control(ctx, network, target, opcode, params.clone(), out);
        }
        let max = MAX_SEGMENTS * SEG_LEN_CONTROL;
        if params.len() > max {
            return Err(CoreError::too_large(max, params.len()).into());
        }
        self.check_tx_slot(target.dst)?;
        let seq = ctx.next_seq()?;
        self.start_segmented(
            ctx,
            network,
            target.net_idx,
            target.src,
            target.dst,
            target.ttl,
            SegHeader::Control { opcode },
            seq,
            params,
            out,
        )
    }

    fn check_tx_slot(&self, dst: Address) -> Result<()> {
        if self.tx.contains_key(&dst) {
            return Err(NodeError::Busy { dst });
        }
        if self.tx.len() >= self.max_tx {
            return Err(NodeError::insufficient("segmented transmissions", self.max_tx));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn start_segmented(
        &mut self,
        ctx: &mut MeshContext,
        network: &NetworkLayer,
        net_idx: NetKeyIndex,
        src: Address,
        dst: Address,
        ttl: u8,
        header: SegHeader,
        seq: u32,
        upper: &Bytes,
        out: &mut Outbox,
    ) -> Result<()> {
        let segments: Vec<Bytes> = upper
            .chunks(header.seg_len())
            .map(Bytes::copy_from_slice)
            .collect();
        trace!(dst = %dst, segments = segments.len(), seq_zero = seq & 0x1FFF, "SAR transmission started");
        self.tx.insert(
            dst,
            SegTx {
                net_idx,
                src,
                ttl,
                header,
                seq_zero: (seq & u32::from(SEQ_ZERO_MASK)) as u16,
                first_seq: Some(seq),
                segments,
                acked: 0,
                round: VecDeque::new(),
                unicast_left: self.sar.unicast_retrans_count,
                no_progress_left: self.sar.unicast_retrans_without_progress_count,
                multicast_left: self.sar.multicast_retrans_count,
            },
        );
        self.begin_round(ctx, network, dst, out)
    }

    /// Queues every unacknowledged segment and sends the first.
    fn begin_round(
        &mut self,
        ctx: &mut MeshContext,
        network: &NetworkLayer,
        dst: Address,
        out: &mut Outbox,
    ) -> Result<()> {
        let Some(tx) = self.tx.get_mut(&dst) else {
            return Ok(());
        };
        let acked = tx.acked;
        tx.round = (0..=tx.seg_n()).filter(|o| acked & (1 << o) == 0).collect();
        self.send_next_segment(ctx, network, dst, out)
    }

    fn send_next_segment(
        &mut self,
        ctx: &mut MeshContext,
        network: &NetworkLayer,
        dst: Address,
        out: &mut Outbox,
    ) -> Result<()> {
        let Some(tx) = self.tx.get_mut(&dst) else {
            return Ok(());
        };
        let Some(seg_o) = tx.round.pop_front() else {
            return Ok(());
        };
        let seq = match tx.first_seq.take() {
            Some(seq) => seq,
            None => ctx.next_seq()?,
        };
        let info = SegmentInfo {
            seq_zero: tx.seq_zero,
            seg_o,
            seg_n: tx.seg_n(),
        };
        let ctl = tx.header.is_control();
        let lower = tx.header.segment(info, tx.segments[usize::from(seg_o)].clone());
        let transport_pdu = encode_to_bytes(&LowerCodec::for_ctl(ctl), &lower);
        network.send(ctx, tx.net_idx, &local_pdu(ctl, tx.ttl, seq, tx.src, dst, transport_pdu), out)?;
        trace!(dst = %dst, seg_o, seg_n = info.seg_n, seq, "Segment sent");

        if tx.round.is_empty() {
            let interval = if dst.is_unicast() {
                self.sar.unicast_retransmit_interval(tx.ttl)
            } else {
                self.sar.multicast_retransmit_interval()
            };
            out.start_timer(TimerKey::SarRetransmit(dst), interval);
        } else {
            out.start_timer(TimerKey::SarSegment(dst), self.sar.segment_interval());
        }
        Ok(())
    }

    fn on_retransmit(
        &mut self,
        ctx: &mut MeshContext,
        network: &NetworkLayer,
        dst: Address,
        out: &mut Outbox,
    ) -> Result<()> {
        let Some(tx) = self.tx.get_mut(&dst) else {
            return Ok(());
        };
        if dst.is_unicast() {
            if tx.unicast_left == 0 || tx.no_progress_left == 0 {
                let err = NodeError::SegmentationTimeout { dst };
                warn!(dst = %dst, acked = format_args!("{:#x}", tx.acked), "{err}");
                self.finish(dst, Some(DeliveryFailure::Timeout), out);
                return Ok(());
            }
            tx.unicast_left -= 1;
            tx.no_progress_left -= 1;
        } else {
            if tx.multicast_left == 0 {
                self.finish(dst, None, out);
                return Ok(());
            }
            tx.multicast_left -= 1;
        }
        debug!(dst = %dst, "Retransmitting segments");
        self.begin_round(ctx, network, dst, out)
    }

    fn on_segment_ack(&mut self, from: Address, to: Address, ack: SegmentAck, out: &mut Outbox) {
        let Some(tx) = self.tx.get_mut(&from) else {
            trace!(src = %from, "Segment ack without transmission");
            return;
        };
        if !from.is_unicast() || tx.src != to || tx.seq_zero != ack.seq_zero {
            trace!(src = %from, seq_zero = ack.seq_zero, "Segment ack for another message");
            return;
        }
        if ack.block_ack == 0 {
            debug!(dst = %from, "Segmented message rejected by receiver");
            self.finish(from, Some(DeliveryFailure::Rejected), out);
            return;
        }
        let complete = lower::block_complete(tx.seg_n());
        if ack.block_ack & !complete != 0 {
            debug!(dst = %from, block_ack = format_args!("{:#x}", ack.block_ack), "Ack names unknown segments");
            return;
        }
        let progress = ack.block_ack & !tx.acked;
        tx.acked |= ack.block_ack;
        trace!(dst = %from, acked = format_args!("{:#x}", tx.acked), "Segment ack");
        if tx.acked == complete {
            self.finish(from, None, out);
            return;
        }
        if progress != 0 {
            tx.no_progress_left = self.sar.unicast_retrans_without_progress_count;
            let acked = tx.acked;
            tx.round.retain(|o| acked & (1 << o) == 0);
            if tx.round.is_empty() {
                out.start_timer(TimerKey::SarRetransmit(from), std::time::Duration::ZERO);
            }
        }
    }

    fn finish(&mut self, dst: Address, failure: Option<DeliveryFailure>, out: &mut Outbox) {
        if self.tx.remove(&dst).is_none() {
            return;
        }
        out.cancel_timer(TimerKey::SarSegment(dst));
        out.cancel_timer(TimerKey::SarRetransmit(dst));
        match failure {
            None => {
                debug!(dst = %dst, "Segmented message delivered");
                out.notify(NodeNotification::Delivered { dst });
            }
            Some(reason) => out.notify(NodeNotification::DeliveryFailed { dst, reason }),
        }
    }

    /// Abandons the outstanding segmented message to `dst`.
    ///
    /// Returns `false` when nothing was outstanding.
    pub fn cancel(&mut self, dst: Address, out: &mut Outbox) -> bool {
        if !self.tx.contains_key(&dst) {
            return false;
        }
        debug!(dst = %dst, "Segmented transmission cancelled");
        self.finish(dst, Some(DeliveryFailure::Cancelled), out);
        true
    }

    // ========================================
    // Receive
    // ========================================

    /// Processes the transport PDU of an accepted network PDU.
    ///
    /// Returns the decrypted access payload once a message is complete.
    ///
    /// # Errors
    /// - `AuthenticationFailed`: no key opens the upper transport PDU
    /// - `MalformedPdu` / `PduTooShort`: bad lower transport PDU
    pub fn receive(
        &mut self,
        ctx: &mut MeshContext,
        network: &NetworkLayer,
        rx: &ReceivedPdu,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<Option<UpperMessage>> {
        let pdu = &rx.pdu;
        let lower: LowerPdu = decode_from_slice(&LowerCodec::for_ctl(pdu.ctl), &pdu.transport_pdu)?;
        match lower {
            LowerPdu::UnsegmentedAccess { akf, aid, upper } => {
                let seq_auth = lower::seq_auth(rx.iv_index, pdu.seq);
                self.open_access(ctx, rx, akf, aid, false, seq_auth, &upper)
                    .map(Some)
            }
            LowerPdu::UnsegmentedControl { opcode, params } => {
                self.control(ctx, rx, opcode, params, now, out)?;
                Ok(None)
            }
            LowerPdu::SegmentedAccess {
                akf,
                aid,
                szmic,
                seg,
                segment,
            } => {
                let header = SegHeader::Access { akf, aid, szmic };
                self.segment(ctx, network, rx, header, seg, segment, now, out)
            }
            LowerPdu::SegmentedControl {
                opcode,
                seg,
                segment,
            } => {
                let header = SegHeader::Control { opcode };
                self.segment(ctx, network, rx, header, seg, segment, now, out)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn segment(
        &mut self,
        ctx: &mut MeshContext,
        network: &NetworkLayer,
        rx: &ReceivedPdu,
        header: SegHeader,
        seg: SegmentInfo,
        segment: Bytes,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<Option<UpperMessage>> {
        let pdu = &rx.pdu;
        let key = (pdu.src, pdu.dst);
        let seq_auth = lower::seq_auth_from_seq_zero(rx.iv_index, pdu.seq, seg.seq_zero);

        if let Some(existing) = self.rx.get_mut(&key) {
            if seq_auth < existing.seq_auth {
                trace!(src = %pdu.src, seq_auth, "Segment of an older message");
                return Ok(None);
            }
            if seq_auth == existing.seq_auth {
                match existing.state {
                    RxState::Complete => {
                        let due = existing
                            .last_ack
                            .map_or(true, |t| now.duration_since(t) >= self.sar.ack_period());
                        if pdu.dst.is_unicast() && due {
                            existing.last_ack = Some(now);
                            let block = existing.received;
                            let seq_zero = existing.seq_zero();
                            let net_idx = existing.net_idx;
                            let ttl = existing.ttl;
                            send_ack(ctx, network, net_idx, pdu.src, pdu.dst, ttl, seq_zero, block, out)?;
                        }
                        return Ok(None);
                    }
                    RxState::Discarded => return Ok(None),
                    RxState::InProgress => {}
                }
            } else {
                debug!(src = %pdu.src, dst = %pdu.dst, seq_auth, "Newer message replaces reassembly");
                self.rx.remove(&key);
                out.cancel_timer(TimerKey::SarAck {
                    src: pdu.src,
                    dst: pdu.dst,
                });
                out.cancel_timer(TimerKey::SarDiscard {
                    src: pdu.src,
                    dst: pdu.dst,
                });
            }
        }

        if !self.rx.contains_key(&key) {
            if self.reassemblies() >= self.max_rx {
                debug!(src = %pdu.src, limit = self.max_rx, "Reassembly table full");
                if pdu.dst.is_unicast() {
                    send_ack(ctx, network, rx.net_idx, pdu.src, pdu.dst, pdu.ttl, seg.seq_zero, 0, out)?;
                }
                return Ok(None);
            }
            self.prune_finished();
            self.rx.insert(
                key,
                SegRx {
                    net_idx: rx.net_idx,
                    seq_auth,
                    header,
                    seg_n: seg.seg_n,
                    ttl: pdu.ttl,
                    parts: vec![None; usize::from(seg.seg_n) + 1],
                    received: 0,
                    state: RxState::InProgress,
                    ack_pending: false,
                    acks_left: 0,
                    last_ack: None,
                    touched: now,
                },
            );
        }

        let Some(entry) = self.rx.get_mut(&key) else {
            return Ok(None);
        };
        if entry.header != header || entry.seg_n != seg.seg_n {
            debug!(src = %pdu.src, "Segment header does not match reassembly");
            return Ok(None);
        }
        let bit = 1u32 << seg.seg_o;
        if entry.received & bit != 0 {
            trace!(src = %pdu.src, seg_o = seg.seg_o, "Duplicate segment");
            return Ok(None);
        }
        let seg_len = header.seg_len();
        if seg.seg_o < seg.seg_n && segment.len() != seg_len {
            return Err(CoreError::malformed(format!(
                "segment {} has {} bytes, expected {seg_len}",
                seg.seg_o,
                segment.len()
            ))
            .into());
        }
        if segment.len() > seg_len {
            return Err(CoreError::too_large(seg_len, segment.len()).into());
        }

        entry.parts[usize::from(seg.seg_o)] = Some(segment);
        entry.received |= bit;
        entry.touched = now;
        trace!(src = %pdu.src, seg_o = seg.seg_o, seg_n = seg.seg_n, "Segment stored");

        let ack_key = TimerKey::SarAck {
            src: pdu.src,
            dst: pdu.dst,
        };
        let discard_key = TimerKey::SarDiscard {
            src: pdu.src,
            dst: pdu.dst,
        };

        if entry.received != lower::block_complete(entry.seg_n) {
            out.start_timer(discard_key, self.sar.discard_timeout());
            if pdu.dst.is_unicast() && !entry.ack_pending {
                entry.ack_pending = true;
                entry.acks_left = if entry.seg_n > self.sar.segments_threshold {
                    self.sar.ack_retrans_count
                } else {
                    0
                };
                out.start_timer(ack_key, self.sar.ack_timeout(entry.seg_n));
            }
            return Ok(None);
        }

        entry.state = RxState::Complete;
        entry.ack_pending = false;
        out.cancel_timer(ack_key);
        out.cancel_timer(discard_key);
        let upper = entry.assemble();
        let (net_idx, block, seq_zero, ttl) = (entry.net_idx, entry.received, entry.seq_zero(), entry.ttl);
        if pdu.dst.is_unicast() {
            entry.last_ack = Some(now);
            send_ack(ctx, network, net_idx, pdu.src, pdu.dst, ttl, seq_zero, block, out)?;
        }
        debug!(src = %pdu.src, dst = %pdu.dst, len = upper.len(), "Segmented message reassembled");

        match header {
            SegHeader::Access { akf, aid, szmic } => self
                .open_access(ctx, rx, akf, aid, szmic, seq_auth, &upper)
                .map(Some),
            SegHeader::Control { opcode } => {
                self.control(ctx, rx, opcode, upper, now, out)?;
                Ok(None)
            }
        }
    }

    /// Keeps finished records below the reassembly limit.
    fn prune_finished(&mut self) {
        let finished = self.rx.len() - self.reassemblies();
        if finished < self.max_rx {
            return;
        }
        let oldest = self
            .rx
            .iter()
            .filter(|(_, r)| r.state != RxState::InProgress)
            .min_by_key(|(_, r)| r.touched)
            .map(|(k, _)| *k);
        if let Some(key) = oldest {
            self.rx.remove(&key);
        }
    }

    fn on_ack_timer(
        &mut self,
        ctx: &mut MeshContext,
        network: &NetworkLayer,
        src: Address,
        dst: Address,
        out: &mut Outbox,
    ) -> Result<()> {
        let Some(entry) = self.rx.get_mut(&(src, dst)) else {
            return Ok(());
        };
        if entry.state != RxState::InProgress {
            return Ok(());
        }
        if entry.acks_left > 0 {
            entry.acks_left -= 1;
            out.start_timer(TimerKey::SarAck { src, dst }, self.sar.receiver_segment_interval());
        } else {
            entry.ack_pending = false;
        }
        let (net_idx, ttl, seq_zero, block) = (entry.net_idx, entry.ttl, entry.seq_zero(), entry.received);
        send_ack(ctx, network, net_idx, src, dst, ttl, seq_zero, block, out)
    }

    fn on_discard_timer(&mut self, src: Address, dst: Address, out: &mut Outbox) {
        let Some(entry) = self.rx.get_mut(&(src, dst)) else {
            return;
        };
        if entry.state != RxState::InProgress {
            return;
        }
        debug!(
            src = %src,
            dst = %dst,
            received = format_args!("{:#x}", entry.received),
            "Incomplete reassembly discarded"
        );
        entry.state = RxState::Discarded;
        entry.parts.clear();
        out.cancel_timer(TimerKey::SarAck { src, dst });
    }

    // ========================================
    // Timers
    // ========================================

    /// Handles a SAR timer. Other keys are ignored.
    ///
    /// # Errors
    /// Encoding errors while sending segments or acks.
    pub fn on_timer(
        &mut self,
        ctx: &mut MeshContext,
        network: &NetworkLayer,
        key: TimerKey,
        out: &mut Outbox,
    ) -> Result<()> {
        match key {
            TimerKey::SarSegment(dst) => self.guard_tx(dst, out, |layer, out| {
                layer.send_next_segment(ctx, network, dst, out)
            }),
            TimerKey::SarRetransmit(dst) => self.guard_tx(dst, out, |layer, out| {
                layer.on_retransmit(ctx, network, dst, out)
            }),
            TimerKey::SarAck { src, dst } => self.on_ack_timer(ctx, network, src, dst, out),
            TimerKey::SarDiscard { src, dst } => {
                self.on_discard_timer(src, dst, out);
                Ok(())
            }
            TimerKey::HeartbeatPublish | TimerKey::ReplayStore | TimerKey::NetworkRepeat(_) => Ok(()),
        }
    }

    /// Fails the transmission to `dst` when a step of it errors, so the
    /// destination does not stay busy.
    fn guard_tx<F>(&mut self, dst: Address, out: &mut Outbox, step: F) -> Result<()>
    where
        F: FnOnce(&mut Self, &mut Outbox) -> Result<()>,
    {
        let result = step(self, out);
        if let Err(e) = &result {
            warn!(dst = %dst, error = %e, "Segmented transmission aborted");
            self.finish(dst, Some(DeliveryFailure::Timeout), out);
        }
        result
    }

    // ========================================
    // Upper Transport
    // ========================================

    #[allow(clippy::too_many_arguments)]
    fn open_access(
        &self,
        ctx: &MeshContext,
        rx: &ReceivedPdu,
        akf: bool,
        aid: u8,
        szmic: bool,
        seq_auth: u64,
        upper: &Bytes,
    ) -> Result<UpperMessage> {
        let pdu = &rx.pdu;
        let mic = MicSize::from_flag(szmic);
        let iv_index = (seq_auth >> 24) as u32;
        let seq = (seq_auth & SEQ_MASK) as u32;
        let nonce = access_nonce(!akf, szmic, seq, pdu.src.value(), pdu.dst.value(), iv_index);

        let labels: Vec<Option<[u8; 16]>> = if pdu.dst.is_virtual() {
            ctx.elements.labels_for(pdu.dst).into_iter().map(Some).collect()
        } else {
            vec![None]
        };

        let context = |app_idx, label| MessageContext {
            net_idx: rx.net_idx,
            app_idx,
            src: pdu.src,
            dst: pdu.dst,
            recv_ttl: pdu.ttl,
            label,
        };

        let mut keys: Vec<(Option<AppKeyIndex>, &Key128)> = Vec::new();
        if akf {
            keys.extend(
                ctx.keys
                    .app_keys_for_aid(rx.net_idx, aid)
                    .map(|(idx, key)| (Some(idx), key)),
            );
        } else {
            keys.push((None, ctx.dev_key()));
        }

        for (app_idx, key) in keys {
            for label in &labels {
                let aad: &[u8] = match label {
                    Some(label) => label,
                    None => &[],
                };
                if let Ok(payload) = self.cipher.open(key, &nonce, upper, aad, mic) {
                    trace!(src = %pdu.src, app_idx = ?app_idx, "Upper transport PDU opened");
                    return Ok(UpperMessage {
                        context: context(app_idx, *label),
                        payload: Bytes::from(payload),
                    });
                }
            }
        }
        trace!(src = %pdu.src, akf, aid, "No key opens upper transport PDU");
        Err(CoreError::trans_auth().into())
    }

    fn control(
        &mut self,
        ctx: &mut MeshContext,
        rx: &ReceivedPdu,
        opcode: u8,
        params: Bytes,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<()> {
        let pdu = &rx.pdu;
        match opcode {
            SegmentAck::OPCODE => {
                if ctx.is_local(pdu.dst) {
                    let ack = SegmentAck::from_params(params)?;
                    self.on_segment_ack(pdu.src, pdu.dst, ack, out);
                }
            }
            HeartbeatMessage::OPCODE => {
                let message = HeartbeatMessage::from_params(params)?;
                if let Some(report) = ctx.heartbeat.receive(pdu.src, pdu.dst, &message, pdu.ttl, now) {
                    out.notify(NodeNotification::Heartbeat(report));
                }
            }
            other => {
                trace!(src = %pdu.src, opcode = other, "Unsupported control opcode");
            }
        }
        Ok(())
    }
}

// ============================================
// Control Helpers
// ============================================

fn send_unsegmented_control(
    ctx: &mut MeshContext,
    network: &NetworkLayer,
    target: ControlTarget,
    opcode: u8,
    params: Bytes,
    out: &mut Outbox,
) -> Result<()> {
    let seq = ctx.next_seq()?;
    let lower = LowerPdu::UnsegmentedControl { opcode, params };
    let transport_pdu = encode_to_bytes(&LowerCodec::control(), &lower);
    network.send(
        ctx,
        target.net_idx,
        &local_pdu(true, target.ttl, seq, target.src, target.dst, transport_pdu),
        out,
    )
}

/// Acknowledges segments of the message `src` sent to `dst`.
#[allow(clippy::too_many_arguments)]
fn send_ack(
    ctx: &mut MeshContext,
    network: &NetworkLayer,
    net_idx: NetKeyIndex,
    src: Address,
    dst: Address,
    rx_ttl: u8,
    seq_zero: u16,
    block_ack: u32,
    out: &mut Outbox,
) -> Result<()> {
    let ack = SegmentAck {
        obo: false,
        seq_zero,
        block_ack,
    };
    let target = ControlTarget {
        net_idx,
        src: dst,
        dst: src,
        ttl: if rx_ttl == 0 { 0 } else { ctx.state.default_ttl },
    };
    trace!(dst = %src, seq_zero, block_ack = format_args!("{block_ack:#x}"), "Sending segment ack");
    send_unsegmented_control(ctx, network, target, SegmentAck::OPCODE, ack.to_params(), out)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use blemesh_core::protocol::{NetworkCodec, NetworkPdu, Opcode};
    use proptest::prelude::*;

    use crate::config::NodeConfig;
    use crate::effects::Effect;

    const NET_KEY: [u8; 16] = [0x7D; 16];
    const APP_KEY: [u8; 16] = [0x63; 16];
    const APP: AppKeyIndex = AppKeyIndex::masked(0);

    fn node(primary: u16) -> (MeshContext, TransportLayer) {
        let mut config = NodeConfig::default();
        config.provisioning.unicast_address = primary;
        config.composition.elements[0].sig_models.push(0x1000);
        let mut ctx = MeshContext::new(&config, Key128::from_bytes([0x11; 16]));
        ctx.provision(NetKeyIndex::PRIMARY, &Key128::from_bytes(NET_KEY))
            .unwrap();
        ctx.keys
            .add_app_key(NetKeyIndex::PRIMARY, APP, &Key128::from_bytes(APP_KEY))
            .unwrap();
        let layer = TransportLayer::new(config.sar.clone(), &config.limits);
        (ctx, layer)
    }

    fn message(len: usize) -> AccessMessage {
        let params: Vec<u8> = (0..len).map(|i| i as u8).collect();
        AccessMessage::new(Opcode::sig1(0x20), params)
    }

    /// Decodes network PDUs produced by `ctx`.
    fn open(ctx: &MeshContext, out: &Outbox) -> Vec<ReceivedPdu> {
        let subnet = ctx.keys.subnet(NetKeyIndex::PRIMARY).unwrap();
        out.transmissions()
            .map(|raw| ReceivedPdu {
                net_idx: NetKeyIndex::PRIMARY,
                iv_index: ctx.iv.tx_index(),
                pdu: NetworkCodec::new()
                    .decode(raw, subnet.tx_keys(), ctx.iv.tx_index())
                    .unwrap(),
            })
            .collect()
    }

    /// Sends and runs the segment timer until the round is out.
    fn send_all(
        ctx: &mut MeshContext,
        layer: &mut TransportLayer,
        request: &SendRequest,
    ) -> (bool, Vec<ReceivedPdu>, Outbox) {
        let net = NetworkLayer::new();
        let mut out = Outbox::new();
        let segmented = layer.send(ctx, &net, request, &mut out).unwrap();
        let mut pdus = open(ctx, &out);
        while out.starts_timer(TimerKey::SarSegment(request.dst)) {
            out = Outbox::new();
            layer
                .on_timer(ctx, &net, TimerKey::SarSegment(request.dst), &mut out)
                .unwrap();
            pdus.extend(open(ctx, &out));
        }
        (segmented, pdus, out)
    }

    fn acks(ctx: &MeshContext, out: &Outbox) -> Vec<SegmentAck> {
        open(ctx, out)
            .into_iter()
            .filter(|rx| rx.pdu.ctl)
            .map(|rx| {
                let lower = decode_from_slice(&LowerCodec::control(), &rx.pdu.transport_pdu).unwrap();
                match lower {
                    LowerPdu::UnsegmentedControl { opcode: 0, params } => {
                        SegmentAck::from_params(params).unwrap()
                    }
                    other => panic!("unexpected control PDU {other:?}"),
                }
            })
            .collect()
    }

    #[test]
    fn test_unsegmented_app_message() {
        let (mut tx_ctx, mut tx) = node(0x0100);
        let (mut rx_ctx, mut rx) = node(0x0200);
        let msg = message(6);
        let request = SendRequest::new(Address::new(0x0200), Security::AppKey(APP), msg.clone());

        let (segmented, pdus, _) = send_all(&mut tx_ctx, &mut tx, &request);
        assert!(!segmented);
        assert_eq!(pdus.len(), 1);

        let net = NetworkLayer::new();
        let mut out = Outbox::new();
        let upper = rx
            .receive(&mut rx_ctx, &net, &pdus[0], Instant::now(), &mut out)
            .unwrap()
            .unwrap();
        assert_eq!(upper.payload, msg.to_bytes());
        assert_eq!(upper.context.app_idx, Some(APP));
        assert_eq!(upper.context.src, Address::new(0x0100));
        assert!(out.is_empty());
    }

    #[test]
    fn test_device_key_message() {
        let (mut tx_ctx, mut tx) = node(0x0100);
        let (mut rx_ctx, mut rx) = node(0x0200);
        let request = SendRequest::new(
            Address::new(0x0200),
            Security::DeviceKey(NetKeyIndex::PRIMARY),
            message(3),
        );
        let (_, pdus, _) = send_all(&mut tx_ctx, &mut tx, &request);
        let upper = rx
            .receive(&mut rx_ctx, &NetworkLayer::new(), &pdus[0], Instant::now(), &mut Outbox::new())
            .unwrap()
            .unwrap();
        assert_eq!(upper.context.app_idx, None);
    }

    #[test]
    fn test_wrong_app_key_fails_silently() {
        let (mut tx_ctx, mut tx) = node(0x0100);
        let (mut rx_ctx, mut rx) = node(0x0200);
        rx_ctx.keys.reset();
        rx_ctx
            .provision(NetKeyIndex::PRIMARY, &Key128::from_bytes(NET_KEY))
            .unwrap();
        let request = SendRequest::new(Address::new(0x0200), Security::AppKey(APP), message(4));
        let (_, pdus, _) = send_all(&mut tx_ctx, &mut tx, &request);
        let err = rx
            .receive(&mut rx_ctx, &NetworkLayer::new(), &pdus[0], Instant::now(), &mut Outbox::new())
            .unwrap_err();
        assert!(err.is_silent_drop());
    }

    #[test]
    fn test_segmented_out_of_order_with_duplicates() {
        let (mut tx_ctx, mut tx) = node(0x0100);
        let (mut rx_ctx, mut rx) = node(0x0200);
        let msg = message(30);
        let request = SendRequest::new(Address::new(0x0200), Security::AppKey(APP), msg.clone());

        let (segmented, mut pdus, out) = send_all(&mut tx_ctx, &mut tx, &request);
        assert!(segmented);
        // 1 opcode + 30 params + 4 MIC = 35 bytes → 3 segments
        assert_eq!(pdus.len(), 3);
        assert!(out.starts_timer(TimerKey::SarRetransmit(Address::new(0x0200))));
        assert!(tx.is_busy(Address::new(0x0200)));

        pdus.reverse();
        let net = NetworkLayer::new();
        let now = Instant::now();
        let mut out = Outbox::new();
        assert!(rx.receive(&mut rx_ctx, &net, &pdus[0], now, &mut out).unwrap().is_none());
        assert!(out.starts_timer(TimerKey::SarAck {
            src: Address::new(0x0100),
            dst: Address::new(0x0200),
        }));
        assert!(rx.receive(&mut rx_ctx, &net, &pdus[0], now, &mut out).unwrap().is_none());
        assert!(rx.receive(&mut rx_ctx, &net, &pdus[1], now, &mut out).unwrap().is_none());
        assert_eq!(rx.reassemblies(), 1);

        let mut out = Outbox::new();
        let upper = rx
            .receive(&mut rx_ctx, &net, &pdus[2], now, &mut out)
            .unwrap()
            .unwrap();
        assert_eq!(upper.payload, msg.to_bytes());
        assert_eq!(rx.reassemblies(), 0);
        let sent = acks(&rx_ctx, &out);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].block_ack, 0b111);

        // late segment of the finished message: one re-ack per period
        let mut out = Outbox::new();
        let later = now + Duration::from_millis(10);
        assert!(rx.receive(&mut rx_ctx, &net, &pdus[1], later, &mut out).unwrap().is_none());
        assert!(acks(&rx_ctx, &out).is_empty());
        let much_later = now + Duration::from_secs(1);
        rx.receive(&mut rx_ctx, &net, &pdus[1], much_later, &mut out).unwrap();
        assert_eq!(acks(&rx_ctx, &out).len(), 1);

        // the ack completes the transmission
        let ack_pdu = open(&rx_ctx, &out).remove(0);
        let mut out = Outbox::new();
        tx.receive(&mut tx_ctx, &net, &ack_pdu, much_later, &mut out).unwrap();
        assert!(!tx.is_busy(Address::new(0x0200)));
        assert_eq!(
            out.notifications().next(),
            Some(&NodeNotification::Delivered {
                dst: Address::new(0x0200)
            })
        );
        assert!(out
            .effects()
            .contains(&Effect::CancelTimer(TimerKey::SarRetransmit(Address::new(0x0200)))));
    }

    #[test]
    fn test_busy_destination() {
        let (mut ctx, mut layer) = node(0x0100);
        let request = SendRequest::new(Address::new(0x0200), Security::AppKey(APP), message(40));
        send_all(&mut ctx, &mut layer, &request);
        let seq = ctx.peek_seq();
        let err = layer
            .send(&mut ctx, &NetworkLayer::new(), &request, &mut Outbox::new())
            .unwrap_err();
        assert!(matches!(err, NodeError::Busy { .. }));
        assert_eq!(ctx.peek_seq(), seq);

        // unsegmented traffic is not blocked
        let small = SendRequest::new(Address::new(0x0200), Security::AppKey(APP), message(2));
        assert!(!layer
            .send(&mut ctx, &NetworkLayer::new(), &small, &mut Outbox::new())
            .unwrap());
    }

    #[test]
    fn test_unicast_retransmit_exhaustion() {
        let (mut ctx, mut layer) = node(0x0100);
        let dst = Address::new(0x0200);
        let request = SendRequest::new(dst, Security::AppKey(APP), message(40));
        send_all(&mut ctx, &mut layer, &request);
        let net = NetworkLayer::new();

        let mut rounds = 0;
        loop {
            let mut out = Outbox::new();
            layer
                .on_timer(&mut ctx, &net, TimerKey::SarRetransmit(dst), &mut out)
                .unwrap();
            while out.starts_timer(TimerKey::SarSegment(dst)) {
                out = Outbox::new();
                layer.on_timer(&mut ctx, &net, TimerKey::SarSegment(dst), &mut out).unwrap();
            }
            if let Some(n) = out.notifications().next() {
                assert_eq!(
                    n,
                    &NodeNotification::DeliveryFailed {
                        dst,
                        reason: DeliveryFailure::Timeout
                    }
                );
                break;
            }
            rounds += 1;
        }
        assert_eq!(rounds, 2);
        assert!(!layer.is_busy(dst));
    }

    #[test]
    fn test_zero_ack_rejects() {
        let (mut ctx, mut layer) = node(0x0100);
        let dst = Address::new(0x0200);
        send_all(&mut ctx, &mut layer, &SendRequest::new(dst, Security::AppKey(APP), message(40)));
        let seq_zero = layer.tx[&dst].seq_zero;
        let mut out = Outbox::new();
        layer.on_segment_ack(
            dst,
            Address::new(0x0100),
            SegmentAck {
                obo: false,
                seq_zero,
                block_ack: 0,
            },
            &mut out,
        );
        assert_eq!(
            out.notifications().next(),
            Some(&NodeNotification::DeliveryFailed {
                dst,
                reason: DeliveryFailure::Rejected
            })
        );
    }

    #[test]
    fn test_multicast_rounds_then_delivered() {
        let (mut ctx, mut layer) = node(0x0100);
        let dst = Address::new(0xC000);
        let (_, first, _) = send_all(&mut ctx, &mut layer, &SendRequest::new(dst, Security::AppKey(APP), message(40)));
        assert_eq!(first.len(), 4);
        let net = NetworkLayer::new();
        let mut sent = 0;
        loop {
            let mut out = Outbox::new();
            layer.on_timer(&mut ctx, &net, TimerKey::SarRetransmit(dst), &mut out).unwrap();
            if out.notifications().next() == Some(&NodeNotification::Delivered { dst }) {
                break;
            }
            sent += out.transmissions().count();
            while out.starts_timer(TimerKey::SarSegment(dst)) {
                out = Outbox::new();
                layer.on_timer(&mut ctx, &net, TimerKey::SarSegment(dst), &mut out).unwrap();
                sent += out.transmissions().count();
            }
        }
        assert_eq!(sent, 8);
    }

    #[test]
    fn test_cancel() {
        let (mut ctx, mut layer) = node(0x0100);
        let dst = Address::new(0x0200);
        send_all(&mut ctx, &mut layer, &SendRequest::new(dst, Security::AppKey(APP), message(40)));
        let mut out = Outbox::new();
        assert!(layer.cancel(dst, &mut out));
        assert!(!layer.cancel(dst, &mut out));
        assert!(out.notifications().any(|n| matches!(
            n,
            NodeNotification::DeliveryFailed {
                reason: DeliveryFailure::Cancelled,
                ..
            }
        )));
    }

    #[test]
    fn test_discard_and_full_table() {
        let (mut tx_ctx, mut tx) = node(0x0100);
        let (mut rx_ctx, mut rx) = node(0x0200);
        rx.max_rx = 1;
        let net = NetworkLayer::new();
        let now = Instant::now();

        let to_rx = SendRequest::new(Address::new(0x0200), Security::AppKey(APP), message(40));
        let (_, pdus, _) = send_all(&mut tx_ctx, &mut tx, &to_rx);
        rx.receive(&mut rx_ctx, &net, &pdus[0], now, &mut Outbox::new()).unwrap();

        // second sender while the only slot is busy gets a zero ack
        let (mut other_ctx, mut other) = node(0x0300);
        let (_, other_pdus, _) = send_all(&mut other_ctx, &mut other, &to_rx);
        let mut out = Outbox::new();
        rx.receive(&mut rx_ctx, &net, &other_pdus[0], now, &mut out).unwrap();
        assert_eq!(acks(&rx_ctx, &out)[0].block_ack, 0);

        // discard frees the slot; the discarded message stays dead
        let mut out = Outbox::new();
        let key = TimerKey::SarDiscard {
            src: Address::new(0x0100),
            dst: Address::new(0x0200),
        };
        rx.on_timer(&mut rx_ctx, &net, key, &mut out).unwrap();
        assert_eq!(rx.reassemblies(), 0);
        for pdu in &pdus[1..] {
            assert!(rx.receive(&mut rx_ctx, &net, pdu, now, &mut out).unwrap().is_none());
        }
        assert_eq!(rx.reassemblies(), 0);
    }

    #[test]
    fn test_group_segments_not_acked() {
        let (mut tx_ctx, mut tx) = node(0x0100);
        let (mut rx_ctx, mut rx) = node(0x0200);
        rx_ctx.elements.subscribe(
            Address::new(0x0200),
            blemesh_common::types::ModelId::Sig(0x1000),
            crate::services::elements::Subscription::group(Address::new(0xC001)),
        )
        .unwrap();
        let msg = message(40);
        let (_, pdus, _) = send_all(
            &mut tx_ctx,
            &mut tx,
            &SendRequest::new(Address::new(0xC001), Security::AppKey(APP), msg.clone()),
        );
        let net = NetworkLayer::new();
        let mut out = Outbox::new();
        let mut delivered = None;
        for pdu in &pdus {
            if let Some(upper) = rx.receive(&mut rx_ctx, &net, pdu, Instant::now(), &mut out).unwrap() {
                delivered = Some(upper);
            }
        }
        assert_eq!(delivered.unwrap().payload, msg.to_bytes());
        assert_eq!(out.transmissions().count(), 0);
    }

    #[test]
    fn test_heartbeat_control_reported() {
        let (mut ctx, mut layer) = node(0x0200);
        let now = Instant::now();
        ctx.heartbeat
            .set_subscription(Address::new(0x0100), Address::new(0x0200), 0x05, now);
        let message = HeartbeatMessage {
            init_ttl: 5,
            features: blemesh_common::types::Features::RELAY,
        };
        let transport_pdu = encode_to_bytes(
            &LowerCodec::control(),
            &LowerPdu::UnsegmentedControl {
                opcode: HeartbeatMessage::OPCODE,
                params: message.to_params(),
            },
        );
        let rx = ReceivedPdu {
            net_idx: NetKeyIndex::PRIMARY,
            iv_index: 0,
            pdu: NetworkPdu {
                ctl: true,
                ttl: 3,
                seq: 1,
                src: Address::new(0x0100),
                dst: Address::new(0x0200),
                transport_pdu,
            },
        };
        let mut out = Outbox::new();
        assert!(layer
            .receive(&mut ctx, &NetworkLayer::new(), &rx, now, &mut out)
            .unwrap()
            .is_none());
        match out.notifications().next() {
            Some(NodeNotification::Heartbeat(report)) => assert_eq!(report.hops, 3),
            other => panic!("unexpected {other:?}"),
        };
    }

    proptest! {
        #[test]
        fn prop_reassembly_any_order(
            len in 12usize..=370,
            order in proptest::collection::vec(any::<u32>(), 32),
        ) {
            let (mut tx_ctx, mut tx) = node(0x0100);
            let (mut rx_ctx, mut rx) = node(0x0200);
            let msg = message(len);
            let request = SendRequest::new(Address::new(0x0200), Security::AppKey(APP), msg.clone());
            let (_, pdus, _) = send_all(&mut tx_ctx, &mut tx, &request);

            let mut indexes: Vec<usize> = (0..pdus.len()).collect();
            indexes.sort_by_key(|i| order[*i]);

            let net = NetworkLayer::new();
            let mut delivered = Vec::new();
            for i in indexes {
                let mut out = Outbox::new();
                if let Some(upper) = rx.receive(&mut rx_ctx, &net, &pdus[i], Instant::now(), &mut out).unwrap() {
                    delivered.push(upper.payload);
                }
            }
            prop_assert_eq!(delivered, vec![msg.to_bytes()]);
        }
    }
}
