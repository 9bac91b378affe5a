// ============================================
// File: crates/blemesh-core/src/protocol/config.rs
// ============================================
//! # Configuration Messages
//!
//! ## Creation Reason
//! Wire layer of the Configuration Server model. Requests are parsed into
//! a typed enum and replies are built from a typed enum, so the state
//! machine never touches raw parameter bytes.
//!
//! ## Main Functionality
//! - `op`: configuration opcodes
//! - `Status`: configuration status codes
//! - `ConfigRequest::parse`: access message → typed request
//! - `ConfigResponse::to_message`: typed reply → access message
//! - Key index packing (two 12-bit indexes in 3 bytes)
//!
//! ## Key Index Packing
//! ```text
//! pair:  LE16(idx1 | (idx2 & 0x00F) << 12) || (idx2 >> 4)
//! odd:   LE16(idx)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Parameters are little-endian, unlike network/transport headers
//! - A request with the wrong length is malformed and gets no reply
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration message codec

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use blemesh_common::time::{PublishPeriod, PublishRetransmit, TransmitParams};
use blemesh_common::types::{Address, Features, ModelId};

use super::access::{AccessMessage, Opcode};
use super::codec::ensure_remaining;
use crate::crypto::Key128;
use crate::error::{CoreError, Result};

// ============================================
// Opcodes
// ============================================

/// Configuration model opcodes.
#[allow(missing_docs)]
pub mod op {
    use super::Opcode;

    pub const APP_KEY_ADD: Opcode = Opcode::sig1(0x00);
    pub const APP_KEY_UPDATE: Opcode = Opcode::sig1(0x01);
    pub const COMPOSITION_DATA_STATUS: Opcode = Opcode::sig1(0x02);
    pub const MODEL_PUB_SET: Opcode = Opcode::sig1(0x03);
    pub const HEARTBEAT_PUB_STATUS: Opcode = Opcode::sig1(0x06);
    pub const APP_KEY_DEL: Opcode = Opcode::sig2(0x8000);
    pub const APP_KEY_GET: Opcode = Opcode::sig2(0x8001);
    pub const APP_KEY_LIST: Opcode = Opcode::sig2(0x8002);
    pub const APP_KEY_STATUS: Opcode = Opcode::sig2(0x8003);
    pub const COMPOSITION_DATA_GET: Opcode = Opcode::sig2(0x8008);
    pub const BEACON_GET: Opcode = Opcode::sig2(0x8009);
    pub const BEACON_SET: Opcode = Opcode::sig2(0x800A);
    pub const BEACON_STATUS: Opcode = Opcode::sig2(0x800B);
    pub const DEFAULT_TTL_GET: Opcode = Opcode::sig2(0x800C);
    pub const DEFAULT_TTL_SET: Opcode = Opcode::sig2(0x800D);
    pub const DEFAULT_TTL_STATUS: Opcode = Opcode::sig2(0x800E);
    pub const FRIEND_GET: Opcode = Opcode::sig2(0x800F);
    pub const FRIEND_SET: Opcode = Opcode::sig2(0x8010);
    pub const FRIEND_STATUS: Opcode = Opcode::sig2(0x8011);
    pub const GATT_PROXY_GET: Opcode = Opcode::sig2(0x8012);
    pub const GATT_PROXY_SET: Opcode = Opcode::sig2(0x8013);
    pub const GATT_PROXY_STATUS: Opcode = Opcode::sig2(0x8014);
    pub const KRP_GET: Opcode = Opcode::sig2(0x8015);
    pub const KRP_SET: Opcode = Opcode::sig2(0x8016);
    pub const KRP_STATUS: Opcode = Opcode::sig2(0x8017);
    pub const MODEL_PUB_GET: Opcode = Opcode::sig2(0x8018);
    pub const MODEL_PUB_STATUS: Opcode = Opcode::sig2(0x8019);
    pub const MODEL_PUB_VA_SET: Opcode = Opcode::sig2(0x801A);
    pub const MODEL_SUB_ADD: Opcode = Opcode::sig2(0x801B);
    pub const MODEL_SUB_DEL: Opcode = Opcode::sig2(0x801C);
    pub const MODEL_SUB_DEL_ALL: Opcode = Opcode::sig2(0x801D);
    pub const MODEL_SUB_OVERWRITE: Opcode = Opcode::sig2(0x801E);
    pub const MODEL_SUB_STATUS: Opcode = Opcode::sig2(0x801F);
    pub const MODEL_SUB_VA_ADD: Opcode = Opcode::sig2(0x8020);
    pub const MODEL_SUB_VA_DEL: Opcode = Opcode::sig2(0x8021);
    pub const MODEL_SUB_VA_OVERWRITE: Opcode = Opcode::sig2(0x8022);
    pub const NET_TRANSMIT_GET: Opcode = Opcode::sig2(0x8023);
    pub const NET_TRANSMIT_SET: Opcode = Opcode::sig2(0x8024);
    pub const NET_TRANSMIT_STATUS: Opcode = Opcode::sig2(0x8025);
    pub const RELAY_GET: Opcode = Opcode::sig2(0x8026);
    pub const RELAY_SET: Opcode = Opcode::sig2(0x8027);
    pub const RELAY_STATUS: Opcode = Opcode::sig2(0x8028);
    pub const SIG_MODEL_SUB_GET: Opcode = Opcode::sig2(0x8029);
    pub const SIG_MODEL_SUB_LIST: Opcode = Opcode::sig2(0x802A);
    pub const VND_MODEL_SUB_GET: Opcode = Opcode::sig2(0x802B);
    pub const VND_MODEL_SUB_LIST: Opcode = Opcode::sig2(0x802C);
    pub const LPN_TIMEOUT_GET: Opcode = Opcode::sig2(0x802D);
    pub const LPN_TIMEOUT_STATUS: Opcode = Opcode::sig2(0x802E);
    pub const HEARTBEAT_PUB_GET: Opcode = Opcode::sig2(0x8038);
    pub const HEARTBEAT_PUB_SET: Opcode = Opcode::sig2(0x8039);
    pub const HEARTBEAT_SUB_GET: Opcode = Opcode::sig2(0x803A);
    pub const HEARTBEAT_SUB_SET: Opcode = Opcode::sig2(0x803B);
    pub const HEARTBEAT_SUB_STATUS: Opcode = Opcode::sig2(0x803C);
    pub const MODEL_APP_BIND: Opcode = Opcode::sig2(0x803D);
    pub const MODEL_APP_STATUS: Opcode = Opcode::sig2(0x803E);
    pub const MODEL_APP_UNBIND: Opcode = Opcode::sig2(0x803F);
    pub const NET_KEY_ADD: Opcode = Opcode::sig2(0x8040);
    pub const NET_KEY_DEL: Opcode = Opcode::sig2(0x8041);
    pub const NET_KEY_GET: Opcode = Opcode::sig2(0x8042);
    pub const NET_KEY_LIST: Opcode = Opcode::sig2(0x8043);
    pub const NET_KEY_STATUS: Opcode = Opcode::sig2(0x8044);
    pub const NET_KEY_UPDATE: Opcode = Opcode::sig2(0x8045);
    pub const NODE_IDENTITY_GET: Opcode = Opcode::sig2(0x8046);
    pub const NODE_IDENTITY_SET: Opcode = Opcode::sig2(0x8047);
    pub const NODE_IDENTITY_STATUS: Opcode = Opcode::sig2(0x8048);
    pub const NODE_RESET: Opcode = Opcode::sig2(0x8049);
    pub const NODE_RESET_STATUS: Opcode = Opcode::sig2(0x804A);
    pub const SIG_MODEL_APP_GET: Opcode = Opcode::sig2(0x804B);
    pub const SIG_MODEL_APP_LIST: Opcode = Opcode::sig2(0x804C);
    pub const VND_MODEL_APP_GET: Opcode = Opcode::sig2(0x804D);
    pub const VND_MODEL_APP_LIST: Opcode = Opcode::sig2(0x804E);
}

// ============================================
// Status
// ============================================

/// Configuration status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Request applied.
    Success = 0x00,
    /// Address not valid for this request.
    InvalidAddress = 0x01,
    /// Model not present on the element.
    InvalidModel = 0x02,
    /// AppKey index not known.
    InvalidAppKeyIndex = 0x03,
    /// NetKey index not known.
    InvalidNetKeyIndex = 0x04,
    /// A bounded table is full.
    InsufficientResources = 0x05,
    /// Index already stored with a different key.
    KeyIndexAlreadyStored = 0x06,
    /// Publication parameters rejected.
    InvalidPublishParameters = 0x07,
    /// Model does not support subscription.
    NotASubscribeModel = 0x08,
    /// Persistent storage failed.
    StorageFailure = 0x09,
    /// Feature not supported by this node.
    FeatureNotSupported = 0x0A,
    /// Key update not allowed now.
    CannotUpdate = 0x0B,
    /// Key removal not allowed now.
    CannotRemove = 0x0C,
    /// Binding not allowed.
    CannotBind = 0x0D,
    /// State temporarily locked.
    TemporarilyUnableToChangeState = 0x0E,
    /// Value cannot be set.
    CannotSet = 0x0F,
    /// Any other failure.
    UnspecifiedError = 0x10,
    /// AppKey bound to a different NetKey.
    InvalidBinding = 0x11,
}

impl Status {
    /// Wire value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses a wire value.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Self::Success,
            0x01 => Self::InvalidAddress,
            0x02 => Self::InvalidModel,
            0x03 => Self::InvalidAppKeyIndex,
            0x04 => Self::InvalidNetKeyIndex,
            0x05 => Self::InsufficientResources,
            0x06 => Self::KeyIndexAlreadyStored,
            0x07 => Self::InvalidPublishParameters,
            0x08 => Self::NotASubscribeModel,
            0x09 => Self::StorageFailure,
            0x0A => Self::FeatureNotSupported,
            0x0B => Self::CannotUpdate,
            0x0C => Self::CannotRemove,
            0x0D => Self::CannotBind,
            0x0E => Self::TemporarilyUnableToChangeState,
            0x0F => Self::CannotSet,
            0x10 => Self::UnspecifiedError,
            0x11 => Self::InvalidBinding,
            _ => return None,
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}(0x{:02x})", self.as_byte())
    }
}

// ============================================
// Key Index Packing
// ============================================

/// Writes two 12-bit indexes in 3 bytes.
pub fn put_key_index_pair(buf: &mut impl BufMut, idx1: u16, idx2: u16) {
    buf.put_u16_le((idx1 & 0x0FFF) | ((idx2 & 0x000F) << 12));
    buf.put_u8((idx2 >> 4) as u8);
}

/// Reads two 12-bit indexes from 3 bytes.
///
/// # Errors
/// `PduTooShort` when fewer than 3 bytes remain.
pub fn get_key_index_pair(buf: &mut impl Buf) -> Result<(u16, u16)> {
    ensure_remaining(&*buf, 3)?;
    let b0 = u16::from(buf.get_u8());
    let b1 = u16::from(buf.get_u8());
    let b2 = u16::from(buf.get_u8());
    Ok(((b0 | (b1 << 8)) & 0x0FFF, (b1 | (b2 << 8)) >> 4))
}

/// Writes a list of indexes, two per 3 bytes, a trailing odd one in 2 bytes.
pub fn put_key_index_list(buf: &mut impl BufMut, indexes: &[u16]) {
    let mut chunks = indexes.chunks_exact(2);
    for pair in &mut chunks {
        put_key_index_pair(buf, pair[0], pair[1]);
    }
    if let [last] = chunks.remainder() {
        buf.put_u16_le(last & 0x0FFF);
    }
}

/// Reads a packed index list.
///
/// # Errors
/// `MalformedPdu` for a dangling single byte.
pub fn get_key_index_list(buf: &mut impl Buf) -> Result<Vec<u16>> {
    let mut out = Vec::new();
    while buf.remaining() >= 3 {
        let (a, b) = get_key_index_pair(buf)?;
        out.push(a);
        out.push(b);
    }
    match buf.remaining() {
        0 => Ok(out),
        2 => {
            out.push(buf.get_u16_le() & 0x0FFF);
            Ok(out)
        }
        n => Err(CoreError::malformed(format!("{n} trailing bytes in key index list"))),
    }
}

// ============================================
// Request Parameter Types
// ============================================

/// Address field of subscription and publication requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshAddress {
    /// Plain 16-bit address.
    Plain(Address),
    /// 128-bit label UUID of a virtual address.
    Label([u8; 16]),
}

/// Model publication parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicationParams {
    /// Publish address.
    pub address: MeshAddress,
    /// AppKey index used for publishing.
    pub app_idx: u16,
    /// Friendship credential flag.
    pub credential: bool,
    /// Publish TTL (0xFF = default TTL).
    pub ttl: u8,
    /// Publish period.
    pub period: PublishPeriod,
    /// Publish retransmit.
    pub retransmit: PublishRetransmit,
}

/// Heartbeat publication parameters as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatPubParams {
    /// Destination.
    pub dst: Address,
    /// Log-encoded count.
    pub count_log: u8,
    /// Log-encoded period.
    pub period_log: u8,
    /// TTL for heartbeat messages.
    pub ttl: u8,
    /// Features that trigger extra heartbeats.
    pub features: Features,
    /// Subnet used for publishing.
    pub net_idx: u16,
}

/// Heartbeat subscription status fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatSubParams {
    /// Source filter.
    pub src: Address,
    /// Destination filter.
    pub dst: Address,
    /// Log-encoded remaining period.
    pub period_log: u8,
    /// Log-encoded received count.
    pub count_log: u8,
    /// Minimum hops seen.
    pub min_hops: u8,
    /// Maximum hops seen.
    pub max_hops: u8,
}

// ============================================
// ConfigRequest
// ============================================

/// A parsed configuration request.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ConfigRequest {
    AppKeyAdd { net_idx: u16, app_idx: u16, key: Key128 },
    AppKeyUpdate { net_idx: u16, app_idx: u16, key: Key128 },
    AppKeyDelete { net_idx: u16, app_idx: u16 },
    AppKeyGet { net_idx: u16 },
    NetKeyAdd { net_idx: u16, key: Key128 },
    NetKeyUpdate { net_idx: u16, key: Key128 },
    NetKeyDelete { net_idx: u16 },
    NetKeyGet,
    CompositionDataGet { page: u8 },
    BeaconGet,
    BeaconSet { beacon: u8 },
    DefaultTtlGet,
    DefaultTtlSet { ttl: u8 },
    GattProxyGet,
    GattProxySet { proxy: u8 },
    FriendGet,
    FriendSet { friend: u8 },
    RelayGet,
    RelaySet { relay: u8, retransmit: TransmitParams },
    NetworkTransmitGet,
    NetworkTransmitSet { transmit: TransmitParams },
    KeyRefreshPhaseGet { net_idx: u16 },
    KeyRefreshPhaseSet { net_idx: u16, transition: u8 },
    NodeIdentityGet { net_idx: u16 },
    NodeIdentitySet { net_idx: u16, identity: u8 },
    ModelPublicationGet { element: Address, model: ModelId },
    ModelPublicationSet { element: Address, params: PublicationParams, model: ModelId },
    ModelSubscriptionAdd { element: Address, address: MeshAddress, model: ModelId },
    ModelSubscriptionDelete { element: Address, address: MeshAddress, model: ModelId },
    ModelSubscriptionOverwrite { element: Address, address: MeshAddress, model: ModelId },
    ModelSubscriptionDeleteAll { element: Address, model: ModelId },
    ModelSubscriptionGet { element: Address, model: ModelId },
    ModelAppBind { element: Address, app_idx: u16, model: ModelId },
    ModelAppUnbind { element: Address, app_idx: u16, model: ModelId },
    ModelAppGet { element: Address, model: ModelId },
    HeartbeatPublicationGet,
    HeartbeatPublicationSet(HeartbeatPubParams),
    HeartbeatSubscriptionGet,
    HeartbeatSubscriptionSet { src: Address, dst: Address, period_log: u8 },
    LpnPollTimeoutGet { lpn: Address },
    NodeReset,
}

fn expect_len(params: &Bytes, len: usize) -> Result<()> {
    if params.len() < len {
        return Err(CoreError::too_short(len, params.len()));
    }
    if params.len() > len {
        return Err(CoreError::too_large(len, params.len()));
    }
    Ok(())
}

fn get_key(buf: &mut Bytes) -> Result<Key128> {
    ensure_remaining(&*buf, 16)?;
    let key = Key128::from_slice(&buf[..16]);
    buf.advance(16);
    key
}

fn get_label(buf: &mut Bytes) -> Result<[u8; 16]> {
    ensure_remaining(&*buf, 16)?;
    let mut label = [0u8; 16];
    buf.copy_to_slice(&mut label);
    Ok(label)
}

fn get_addr(buf: &mut Bytes) -> Result<Address> {
    ensure_remaining(&*buf, 2)?;
    Ok(Address::new(buf.get_u16_le()))
}

/// Trailing model id: 2 bytes SIG, 4 bytes vendor.
fn get_model_tail(buf: &mut Bytes) -> Result<ModelId> {
    match buf.remaining() {
        2 => Ok(ModelId::Sig(buf.get_u16_le())),
        4 => Ok(ModelId::Vendor {
            company: buf.get_u16_le(),
            id: buf.get_u16_le(),
        }),
        n => Err(CoreError::malformed(format!("model id of {n} bytes"))),
    }
}

fn get_model_fixed(buf: &mut Bytes, vendor: bool) -> Result<ModelId> {
    expect_len(buf, if vendor { 4 } else { 2 })?;
    get_model_tail(buf)
}

fn put_model(buf: &mut BytesMut, model: ModelId) {
    match model {
        ModelId::Sig(id) => buf.put_u16_le(id),
        ModelId::Vendor { company, id } => {
            buf.put_u16_le(company);
            buf.put_u16_le(id);
        }
    }
}

fn get_one_byte(params: &Bytes) -> Result<u8> {
    expect_len(params, 1)?;
    Ok(params[0])
}

impl ConfigRequest {
    /// Parses a configuration request.
    ///
    /// # Errors
    /// - `UnknownOpcode`: not a configuration server opcode
    /// - `PduTooShort` / `PduTooLarge` / `MalformedPdu`: bad parameters
    #[allow(clippy::too_many_lines)]
    pub fn parse(msg: &AccessMessage) -> Result<Self> {
        let mut p = msg.params.clone();
        let req = match msg.opcode {
            op::APP_KEY_ADD | op::APP_KEY_UPDATE => {
                expect_len(&p, 19)?;
                let (net_idx, app_idx) = get_key_index_pair(&mut p)?;
                let key = get_key(&mut p)?;
                if msg.opcode == op::APP_KEY_ADD {
                    Self::AppKeyAdd { net_idx, app_idx, key }
                } else {
                    Self::AppKeyUpdate { net_idx, app_idx, key }
                }
            }
            op::APP_KEY_DEL => {
                expect_len(&p, 3)?;
                let (net_idx, app_idx) = get_key_index_pair(&mut p)?;
                Self::AppKeyDelete { net_idx, app_idx }
            }
            op::APP_KEY_GET => {
                expect_len(&p, 2)?;
                Self::AppKeyGet { net_idx: p.get_u16_le() }
            }
            op::NET_KEY_ADD | op::NET_KEY_UPDATE => {
                expect_len(&p, 18)?;
                let net_idx = p.get_u16_le();
                let key = get_key(&mut p)?;
                if msg.opcode == op::NET_KEY_ADD {
                    Self::NetKeyAdd { net_idx, key }
                } else {
                    Self::NetKeyUpdate { net_idx, key }
                }
            }
            op::NET_KEY_DEL => {
                expect_len(&p, 2)?;
                Self::NetKeyDelete { net_idx: p.get_u16_le() }
            }
            op::NET_KEY_GET => {
                expect_len(&p, 0)?;
                Self::NetKeyGet
            }
            op::COMPOSITION_DATA_GET => Self::CompositionDataGet { page: get_one_byte(&p)? },
            op::BEACON_GET => {
                expect_len(&p, 0)?;
                Self::BeaconGet
            }
            op::BEACON_SET => Self::BeaconSet { beacon: get_one_byte(&p)? },
            op::DEFAULT_TTL_GET => {
                expect_len(&p, 0)?;
                Self::DefaultTtlGet
            }
            op::DEFAULT_TTL_SET => Self::DefaultTtlSet { ttl: get_one_byte(&p)? },
            op::GATT_PROXY_GET => {
                expect_len(&p, 0)?;
                Self::GattProxyGet
            }
            op::GATT_PROXY_SET => Self::GattProxySet { proxy: get_one_byte(&p)? },
            op::FRIEND_GET => {
                expect_len(&p, 0)?;
                Self::FriendGet
            }
            op::FRIEND_SET => Self::FriendSet { friend: get_one_byte(&p)? },
            op::RELAY_GET => {
                expect_len(&p, 0)?;
                Self::RelayGet
            }
            op::RELAY_SET => {
                expect_len(&p, 2)?;
                Self::RelaySet {
                    relay: p.get_u8(),
                    retransmit: TransmitParams::from_byte(p.get_u8()),
                }
            }
            op::NET_TRANSMIT_GET => {
                expect_len(&p, 0)?;
                Self::NetworkTransmitGet
            }
            op::NET_TRANSMIT_SET => Self::NetworkTransmitSet {
                transmit: TransmitParams::from_byte(get_one_byte(&p)?),
            },
            op::KRP_GET => {
                expect_len(&p, 2)?;
                Self::KeyRefreshPhaseGet { net_idx: p.get_u16_le() }
            }
            op::KRP_SET => {
                expect_len(&p, 3)?;
                Self::KeyRefreshPhaseSet {
                    net_idx: p.get_u16_le(),
                    transition: p.get_u8(),
                }
            }
            op::NODE_IDENTITY_GET => {
                expect_len(&p, 2)?;
                Self::NodeIdentityGet { net_idx: p.get_u16_le() }
            }
            op::NODE_IDENTITY_SET => {
                expect_len(&p, 3)?;
                Self::NodeIdentitySet {
                    net_idx: p.get_u16_le(),
                    identity: p.get_u8(),
                }
            }
            op::MODEL_PUB_GET => {
                let element = get_addr(&mut p)?;
                Self::ModelPublicationGet {
                    element,
                    model: get_model_tail(&mut p)?,
                }
            }
            op::MODEL_PUB_SET | op::MODEL_PUB_VA_SET => {
                let element = get_addr(&mut p)?;
                let address = if msg.opcode == op::MODEL_PUB_SET {
                    MeshAddress::Plain(get_addr(&mut p)?)
                } else {
                    MeshAddress::Label(get_label(&mut p)?)
                };
                ensure_remaining(&p, 5)?;
                let idx_cred = p.get_u16_le();
                let params = PublicationParams {
                    address,
                    app_idx: idx_cred & 0x0FFF,
                    credential: idx_cred & 0x1000 != 0,
                    ttl: p.get_u8(),
                    period: PublishPeriod::from_byte(p.get_u8()),
                    retransmit: PublishRetransmit::from_byte(p.get_u8()),
                };
                Self::ModelPublicationSet {
                    element,
                    params,
                    model: get_model_tail(&mut p)?,
                }
            }
            op::MODEL_SUB_ADD | op::MODEL_SUB_DEL | op::MODEL_SUB_OVERWRITE => {
                let element = get_addr(&mut p)?;
                let address = MeshAddress::Plain(get_addr(&mut p)?);
                let model = get_model_tail(&mut p)?;
                Self::subscription(msg.opcode, element, address, model)
            }
            op::MODEL_SUB_VA_ADD | op::MODEL_SUB_VA_DEL | op::MODEL_SUB_VA_OVERWRITE => {
                let element = get_addr(&mut p)?;
                let address = MeshAddress::Label(get_label(&mut p)?);
                let model = get_model_tail(&mut p)?;
                Self::subscription(msg.opcode, element, address, model)
            }
            op::MODEL_SUB_DEL_ALL => {
                let element = get_addr(&mut p)?;
                Self::ModelSubscriptionDeleteAll {
                    element,
                    model: get_model_tail(&mut p)?,
                }
            }
            op::SIG_MODEL_SUB_GET | op::VND_MODEL_SUB_GET => {
                let element = get_addr(&mut p)?;
                let model = get_model_fixed(&mut p, msg.opcode == op::VND_MODEL_SUB_GET)?;
                Self::ModelSubscriptionGet { element, model }
            }
            op::MODEL_APP_BIND | op::MODEL_APP_UNBIND => {
                let element = get_addr(&mut p)?;
                ensure_remaining(&p, 2)?;
                let app_idx = p.get_u16_le() & 0x0FFF;
                let model = get_model_tail(&mut p)?;
                if msg.opcode == op::MODEL_APP_BIND {
                    Self::ModelAppBind { element, app_idx, model }
                } else {
                    Self::ModelAppUnbind { element, app_idx, model }
                }
            }
            op::SIG_MODEL_APP_GET | op::VND_MODEL_APP_GET => {
                let element = get_addr(&mut p)?;
                let model = get_model_fixed(&mut p, msg.opcode == op::VND_MODEL_APP_GET)?;
                Self::ModelAppGet { element, model }
            }
            op::HEARTBEAT_PUB_GET => {
                expect_len(&p, 0)?;
                Self::HeartbeatPublicationGet
            }
            op::HEARTBEAT_PUB_SET => {
                expect_len(&p, 9)?;
                Self::HeartbeatPublicationSet(HeartbeatPubParams {
                    dst: Address::new(p.get_u16_le()),
                    count_log: p.get_u8(),
                    period_log: p.get_u8(),
                    ttl: p.get_u8(),
                    features: Features::from_bits(p.get_u16_le()),
                    net_idx: p.get_u16_le(),
                })
            }
            op::HEARTBEAT_SUB_GET => {
                expect_len(&p, 0)?;
                Self::HeartbeatSubscriptionGet
            }
            op::HEARTBEAT_SUB_SET => {
                expect_len(&p, 5)?;
                Self::HeartbeatSubscriptionSet {
                    src: Address::new(p.get_u16_le()),
                    dst: Address::new(p.get_u16_le()),
                    period_log: p.get_u8(),
                }
            }
            op::LPN_TIMEOUT_GET => {
                expect_len(&p, 2)?;
                Self::LpnPollTimeoutGet {
                    lpn: Address::new(p.get_u16_le()),
                }
            }
            op::NODE_RESET => {
                expect_len(&p, 0)?;
                Self::NodeReset
            }
            other => return Err(CoreError::UnknownOpcode(other.value())),
        };
        Ok(req)
    }

    fn subscription(opcode: Opcode, element: Address, address: MeshAddress, model: ModelId) -> Self {
        match opcode {
            op::MODEL_SUB_ADD | op::MODEL_SUB_VA_ADD => Self::ModelSubscriptionAdd { element, address, model },
            op::MODEL_SUB_DEL | op::MODEL_SUB_VA_DEL => Self::ModelSubscriptionDelete { element, address, model },
            _ => Self::ModelSubscriptionOverwrite { element, address, model },
        }
    }

    /// `true` if `opcode` belongs to the Configuration Server.
    #[must_use]
    pub fn is_server_opcode(opcode: Opcode) -> bool {
        matches!(
            opcode,
            op::APP_KEY_ADD
                | op::APP_KEY_UPDATE
                | op::MODEL_PUB_SET
                | op::APP_KEY_DEL
                | op::APP_KEY_GET
                | op::COMPOSITION_DATA_GET
                | op::BEACON_GET
                | op::BEACON_SET
                | op::DEFAULT_TTL_GET
                | op::DEFAULT_TTL_SET
                | op::FRIEND_GET
                | op::FRIEND_SET
                | op::GATT_PROXY_GET
                | op::GATT_PROXY_SET
                | op::KRP_GET
                | op::KRP_SET
                | op::MODEL_PUB_GET
                | op::MODEL_PUB_VA_SET
                | op::MODEL_SUB_ADD
                | op::MODEL_SUB_DEL
                | op::MODEL_SUB_DEL_ALL
                | op::MODEL_SUB_OVERWRITE
                | op::MODEL_SUB_VA_ADD
                | op::MODEL_SUB_VA_DEL
                | op::MODEL_SUB_VA_OVERWRITE
                | op::NET_TRANSMIT_GET
                | op::NET_TRANSMIT_SET
                | op::RELAY_GET
                | op::RELAY_SET
                | op::SIG_MODEL_SUB_GET
                | op::VND_MODEL_SUB_GET
                | op::LPN_TIMEOUT_GET
                | op::HEARTBEAT_PUB_GET
                | op::HEARTBEAT_PUB_SET
                | op::HEARTBEAT_SUB_GET
                | op::HEARTBEAT_SUB_SET
                | op::MODEL_APP_BIND
                | op::MODEL_APP_UNBIND
                | op::NET_KEY_ADD
                | op::NET_KEY_DEL
                | op::NET_KEY_GET
                | op::NET_KEY_UPDATE
                | op::NODE_IDENTITY_GET
                | op::NODE_IDENTITY_SET
                | op::NODE_RESET
                | op::SIG_MODEL_APP_GET
                | op::VND_MODEL_APP_GET
        )
    }
}

// ============================================
// ConfigResponse
// ============================================

/// A configuration status reply.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ConfigResponse {
    AppKeyStatus { status: Status, net_idx: u16, app_idx: u16 },
    AppKeyList { status: Status, net_idx: u16, app_indexes: Vec<u16> },
    NetKeyStatus { status: Status, net_idx: u16 },
    NetKeyList { net_indexes: Vec<u16> },
    CompositionDataStatus { page: u8, data: Bytes },
    BeaconStatus { beacon: u8 },
    DefaultTtlStatus { ttl: u8 },
    GattProxyStatus { proxy: u8 },
    FriendStatus { friend: u8 },
    RelayStatus { relay: u8, retransmit: TransmitParams },
    NetworkTransmitStatus { transmit: TransmitParams },
    KeyRefreshPhaseStatus { status: Status, net_idx: u16, phase: u8 },
    NodeIdentityStatus { status: Status, net_idx: u16, identity: u8 },
    ModelPublicationStatus {
        status: Status,
        element: Address,
        address: Address,
        app_idx: u16,
        credential: bool,
        ttl: u8,
        period: PublishPeriod,
        retransmit: PublishRetransmit,
        model: ModelId,
    },
    ModelSubscriptionStatus { status: Status, element: Address, address: Address, model: ModelId },
    ModelSubscriptionList { status: Status, element: Address, model: ModelId, addresses: Vec<Address> },
    ModelAppStatus { status: Status, element: Address, app_idx: u16, model: ModelId },
    ModelAppList { status: Status, element: Address, model: ModelId, app_indexes: Vec<u16> },
    HeartbeatPublicationStatus { status: Status, params: HeartbeatPubParams },
    HeartbeatSubscriptionStatus { status: Status, params: HeartbeatSubParams },
    LpnPollTimeoutStatus { lpn: Address, timeout: u32 },
    NodeResetStatus,
}

impl ConfigResponse {
    /// Status code carried by the reply, if any.
    #[must_use]
    pub const fn status(&self) -> Option<Status> {
        match self {
            Self::AppKeyStatus { status, .. }
            | Self::AppKeyList { status, .. }
            | Self::NetKeyStatus { status, .. }
            | Self::KeyRefreshPhaseStatus { status, .. }
            | Self::NodeIdentityStatus { status, .. }
            | Self::ModelPublicationStatus { status, .. }
            | Self::ModelSubscriptionStatus { status, .. }
            | Self::ModelSubscriptionList { status, .. }
            | Self::ModelAppStatus { status, .. }
            | Self::ModelAppList { status, .. }
            | Self::HeartbeatPublicationStatus { status, .. }
            | Self::HeartbeatSubscriptionStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Builds the access message for this reply.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn to_message(&self) -> AccessMessage {
        let mut b = BytesMut::new();
        let opcode = match self {
            Self::AppKeyStatus { status, net_idx, app_idx } => {
                b.put_u8(status.as_byte());
                put_key_index_pair(&mut b, *net_idx, *app_idx);
                op::APP_KEY_STATUS
            }
            Self::AppKeyList { status, net_idx, app_indexes } => {
                b.put_u8(status.as_byte());
                b.put_u16_le(*net_idx);
                put_key_index_list(&mut b, app_indexes);
                op::APP_KEY_LIST
            }
            Self::NetKeyStatus { status, net_idx } => {
                b.put_u8(status.as_byte());
                b.put_u16_le(*net_idx);
                op::NET_KEY_STATUS
            }
            Self::NetKeyList { net_indexes } => {
                put_key_index_list(&mut b, net_indexes);
                op::NET_KEY_LIST
            }
            Self::CompositionDataStatus { page, data } => {
                b.put_u8(*page);
                b.put_slice(data);
                op::COMPOSITION_DATA_STATUS
            }
            Self::BeaconStatus { beacon } => {
                b.put_u8(*beacon);
                op::BEACON_STATUS
            }
            Self::DefaultTtlStatus { ttl } => {
                b.put_u8(*ttl);
                op::DEFAULT_TTL_STATUS
            }
            Self::GattProxyStatus { proxy } => {
                b.put_u8(*proxy);
                op::GATT_PROXY_STATUS
            }
            Self::FriendStatus { friend } => {
                b.put_u8(*friend);
                op::FRIEND_STATUS
            }
            Self::RelayStatus { relay, retransmit } => {
                b.put_u8(*relay);
                b.put_u8(retransmit.to_byte());
                op::RELAY_STATUS
            }
            Self::NetworkTransmitStatus { transmit } => {
                b.put_u8(transmit.to_byte());
                op::NET_TRANSMIT_STATUS
            }
            Self::KeyRefreshPhaseStatus { status, net_idx, phase } => {
                b.put_u8(status.as_byte());
                b.put_u16_le(*net_idx);
                b.put_u8(*phase);
                op::KRP_STATUS
            }
            Self::NodeIdentityStatus { status, net_idx, identity } => {
                b.put_u8(status.as_byte());
                b.put_u16_le(*net_idx);
                b.put_u8(*identity);
                op::NODE_IDENTITY_STATUS
            }
            Self::ModelPublicationStatus {
                status,
                element,
                address,
                app_idx,
                credential,
                ttl,
                period,
                retransmit,
                model,
            } => {
                b.put_u8(status.as_byte());
                b.put_u16_le(element.value());
                b.put_u16_le(address.value());
                b.put_u16_le((app_idx & 0x0FFF) | (u16::from(*credential) << 12));
                b.put_u8(*ttl);
                b.put_u8(period.to_byte());
                b.put_u8(retransmit.to_byte());
                put_model(&mut b, *model);
                op::MODEL_PUB_STATUS
            }
            Self::ModelSubscriptionStatus { status, element, address, model } => {
                b.put_u8(status.as_byte());
                b.put_u16_le(element.value());
                b.put_u16_le(address.value());
                put_model(&mut b, *model);
                op::MODEL_SUB_STATUS
            }
            Self::ModelSubscriptionList { status, element, model, addresses } => {
                b.put_u8(status.as_byte());
                b.put_u16_le(element.value());
                put_model(&mut b, *model);
                for addr in addresses {
                    b.put_u16_le(addr.value());
                }
                if model.is_vendor() {
                    op::VND_MODEL_SUB_LIST
                } else {
                    op::SIG_MODEL_SUB_LIST
                }
            }
            Self::ModelAppStatus { status, element, app_idx, model } => {
                b.put_u8(status.as_byte());
                b.put_u16_le(element.value());
                b.put_u16_le(*app_idx);
                put_model(&mut b, *model);
                op::MODEL_APP_STATUS
            }
            Self::ModelAppList { status, element, model, app_indexes } => {
                b.put_u8(status.as_byte());
                b.put_u16_le(element.value());
                put_model(&mut b, *model);
                put_key_index_list(&mut b, app_indexes);
                if model.is_vendor() {
                    op::VND_MODEL_APP_LIST
                } else {
                    op::SIG_MODEL_APP_LIST
                }
            }
            Self::HeartbeatPublicationStatus { status, params } => {
                b.put_u8(status.as_byte());
                b.put_u16_le(params.dst.value());
                b.put_u8(params.count_log);
                b.put_u8(params.period_log);
                b.put_u8(params.ttl);
                b.put_u16_le(params.features.bits());
                b.put_u16_le(params.net_idx);
                op::HEARTBEAT_PUB_STATUS
            }
            Self::HeartbeatSubscriptionStatus { status, params } => {
                b.put_u8(status.as_byte());
                b.put_u16_le(params.src.value());
                b.put_u16_le(params.dst.value());
                b.put_u8(params.period_log);
                b.put_u8(params.count_log);
                b.put_u8(params.min_hops);
                b.put_u8(params.max_hops);
                op::HEARTBEAT_SUB_STATUS
            }
            Self::LpnPollTimeoutStatus { lpn, timeout } => {
                b.put_u16_le(lpn.value());
                b.put_u16_le(*timeout as u16);
                b.put_u8((*timeout >> 16) as u8);
                op::LPN_TIMEOUT_STATUS
            }
            Self::NodeResetStatus => op::NODE_RESET_STATUS,
        };
        AccessMessage::new(opcode, b.freeze())
    }
}

// ============================================
// Tests
// ============================================
