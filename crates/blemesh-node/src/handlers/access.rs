// ============================================
// File: crates/blemesh-node/src/handlers/access.rs
// ============================================
//! # Access Layer
//!
//! ## Creation Reason
//! Routes decrypted access messages to the Configuration Server or to
//! application models registered on the node's elements.
//!
//! ## Main Functionality
//! - `Model`: trait implemented by application models
//! - `AccessLayer::register`: attach a model to an element
//! - `AccessLayer::dispatch`: opcode decode, element targeting, key
//!   checks, handler invocation
//!
//! ## Dispatch Rules
//! ```text
//! UpperMessage ──opcode──▶ Configuration Server opcode?
//!   │ yes: primary element only, device key only ──▶ ConfigServer::handle
//!   │ no:  every target element
//!   ▼
//! registered model with the opcode?  no → dropped
//!   │
//! AppKey bound to the model?         no → Unauthorized (dropped)
//!   ▼
//! Model::handle → optional reply under the same AppKey
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Models must exist in the composition data; the table of bindings
//!   lives in `ElementTable`, not in the model object
//!
//! ## Last Modified
//! v0.1.0 - Initial access dispatch

use tokio::time::Instant;
use tracing::{debug, trace};

use blemesh_common::types::{Address, ModelId, NetKeyIndex};
use blemesh_core::protocol::codec::decode_from_slice;
use blemesh_core::protocol::{AccessCodec, AccessMessage, ConfigRequest, Opcode};

use super::transport::{MessageContext, Security, SendRequest, UpperMessage};
use crate::context::MeshContext;
use crate::error::{NodeError, Result};
use crate::services::config_server::{ConfigOutcome, ConfigServer};

// ============================================
// Model Trait
// ============================================

/// An application model served by this node.
///
/// # Implementation Notes
/// `handle` runs on the node task; it must not block.
pub trait Model: Send + Sync {
    /// Model identifier, as listed in the composition data.
    fn id(&self) -> ModelId;

    /// Opcodes the model accepts.
    fn opcodes(&self) -> &[Opcode];

    /// Processes a message. A returned message is sent back to the
    /// sender under the same AppKey.
    fn handle(&mut self, context: &MessageContext, message: &AccessMessage)
        -> Option<AccessMessage>;
}

// ============================================
// AccessAction
// ============================================

/// Result of dispatching one message.
#[derive(Debug)]
pub enum AccessAction {
    /// Application model reply.
    Reply(SendRequest),
    /// Configuration Server outcome; the reply goes out under the device
    /// key before any change is applied.
    Config {
        /// Subnet the request came in on.
        net_idx: NetKeyIndex,
        /// Configuration client address.
        requester: Address,
        /// Element that served the request.
        element: Address,
        /// Status and committed changes.
        outcome: ConfigOutcome,
    },
}

// ============================================
// AccessLayer
// ============================================

struct Registered {
    element: Address,
    model: Box<dyn Model>,
}

/// Opcode dispatch over the node's elements.
#[derive(Default)]
pub struct AccessLayer {
    models: Vec<Registered>,
}

impl std::fmt::Debug for AccessLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.models.iter().map(|r| (r.element, r.model.id())))
            .finish()
    }
}

impl AccessLayer {
    /// Creates a layer with no application models.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a model to an element, replacing a previous handler for
    /// the same model.
    ///
    /// # Errors
    /// - `InvalidAddress` / `InvalidModel`: not in the composition data
    /// - `CannotBind`: the Configuration Server is built in
    pub fn register(
        &mut self,
        ctx: &MeshContext,
        element: Address,
        model: Box<dyn Model>,
    ) -> Result<()> {
        let id = model.id();
        if id == ModelId::CONFIG_SERVER {
            return Err(NodeError::CannotBind { model: id.to_u32() });
        }
        ctx.elements.model(element, id)?;
        self.models
            .retain(|r| !(r.element == element && r.model.id() == id));
        debug!(element = %element, model = %id, "Model registered");
        self.models.push(Registered { element, model });
        Ok(())
    }

    /// Number of registered application models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// `true` when no application model is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Dispatches a decrypted access payload.
    ///
    /// # Errors
    /// `MalformedPdu` / `PduTooShort` for an undecodable opcode.
    pub fn dispatch(
        &mut self,
        ctx: &mut MeshContext,
        upper: &UpperMessage,
        now: Instant,
    ) -> Result<Vec<AccessAction>> {
        let message: AccessMessage = decode_from_slice(&AccessCodec, &upper.payload)?;
        let context = upper.context;
        let mut actions = Vec::new();

        for element in ctx.elements.targets(context.dst) {
            if ConfigRequest::is_server_opcode(message.opcode) {
                if element != ctx.primary() {
                    continue;
                }
                if let Some(action) = Self::config(ctx, &context, &message, element, now) {
                    actions.push(action);
                }
                continue;
            }
            self.application(ctx, &context, &message, element, &mut actions);
        }

        if actions.is_empty() {
            trace!(
                src = %context.src,
                dst = %context.dst,
                opcode = %message.opcode,
                "Access message not handled"
            );
        }
        Ok(actions)
    }

    fn config(
        ctx: &mut MeshContext,
        context: &MessageContext,
        message: &AccessMessage,
        element: Address,
        now: Instant,
    ) -> Option<AccessAction> {
        if let Some(app_idx) = context.app_idx {
            let err = NodeError::Unauthorized {
                opcode: message.opcode.value(),
                app_idx: Some(app_idx.value()),
            };
            debug!(src = %context.src, "{err}");
            return None;
        }
        let request = match ConfigRequest::parse(message) {
            Ok(request) => request,
            Err(e) => {
                debug!(src = %context.src, opcode = %message.opcode, error = %e, "Bad configuration request");
                return None;
            }
        };
        trace!(src = %context.src, ?request, "Configuration request");
        let outcome = ConfigServer::handle(ctx, request, context.net_idx, now);
        Some(AccessAction::Config {
            net_idx: context.net_idx,
            requester: context.src,
            element,
            outcome,
        })
    }

    fn application(
        &mut self,
        ctx: &MeshContext,
        context: &MessageContext,
        message: &AccessMessage,
        element: Address,
        actions: &mut Vec<AccessAction>,
    ) {
        for registered in self
            .models
            .iter_mut()
            .filter(|r| r.element == element && r.model.opcodes().contains(&message.opcode))
        {
            let id = registered.model.id();
            let bound = context.app_idx.filter(|&app_idx| {
                ctx.elements
                    .model(element, id)
                    .is_ok_and(|m| m.is_bound(app_idx))
            });
            let Some(app_idx) = bound else {
                let err = NodeError::Unauthorized {
                    opcode: message.opcode.value(),
                    app_idx: context.app_idx.map(|i| i.value()),
                };
                debug!(element = %element, model = %id, "{err}");
                continue;
            };
            if let Some(reply) = registered.model.handle(context, message) {
                actions.push(AccessAction::Reply(
                    SendRequest::new(context.src, Security::AppKey(app_idx), reply).with_src(element),
                ));
            }
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use blemesh_common::types::AppKeyIndex;
    use blemesh_core::crypto::Key128;
    use blemesh_core::protocol::config::{op, ConfigResponse};

    use crate::config::NodeConfig;

    const APP: AppKeyIndex = AppKeyIndex::masked(0);
    const GET: Opcode = Opcode::sig2(0x8201);
    const STATUS: Opcode = Opcode::sig1(0x04);

    struct OnOff {
        calls: Arc<AtomicUsize>,
    }

    impl Model for OnOff {
        fn id(&self) -> ModelId {
            ModelId::Sig(0x1000)
        }

        fn opcodes(&self) -> &[Opcode] {
            &[GET]
        }

        fn handle(&mut self, _: &MessageContext, _: &AccessMessage) -> Option<AccessMessage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(AccessMessage::new(STATUS, vec![0x01]))
        }
    }

    fn setup() -> (MeshContext, AccessLayer, Arc<AtomicUsize>) {
        let mut config = NodeConfig::default();
        config.provisioning.unicast_address = 0x0001;
        config.composition.elements[0].sig_models.push(0x1000);
        let mut ctx = MeshContext::new(&config, Key128::from_bytes([0x11; 16]));
        ctx.provision(NetKeyIndex::PRIMARY, &Key128::from_bytes([0x22; 16]))
            .unwrap();
        ctx.keys
            .add_app_key(NetKeyIndex::PRIMARY, APP, &Key128::from_bytes([0x33; 16]))
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut access = AccessLayer::new();
        access
            .register(&ctx, Address::new(0x0001), Box::new(OnOff { calls: calls.clone() }))
            .unwrap();
        (ctx, access, calls)
    }

    fn upper(app_idx: Option<AppKeyIndex>, dst: u16, message: &AccessMessage) -> UpperMessage {
        UpperMessage {
            context: MessageContext {
                net_idx: NetKeyIndex::PRIMARY,
                app_idx,
                src: Address::new(0x0700),
                dst: Address::new(dst),
                recv_ttl: 5,
                label: None,
            },
            payload: message.to_bytes(),
        }
    }

    #[test]
    fn test_register_requires_composition() {
        let (ctx, mut access, calls) = setup();
        let err = access
            .register(&ctx, Address::new(0x0002), Box::new(OnOff { calls }))
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidAddress(_)));
        assert_eq!(access.len(), 1);
    }

    #[test]
    fn test_unbound_key_is_unauthorized() {
        let (mut ctx, mut access, calls) = setup();
        let msg = AccessMessage::new(GET, Bytes::new());
        let actions = access
            .dispatch(&mut ctx, &upper(Some(APP), 0x0001, &msg), Instant::now())
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        ctx.elements
            .bind(Address::new(0x0001), ModelId::Sig(0x1000), APP)
            .unwrap();
        let actions = access
            .dispatch(&mut ctx, &upper(Some(APP), 0x0001, &msg), Instant::now())
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match &actions[..] {
            [AccessAction::Reply(reply)] => {
                assert_eq!(reply.dst, Address::new(0x0700));
                assert_eq!(reply.security, Security::AppKey(APP));
                assert_eq!(reply.message.opcode, STATUS);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_device_key_message_to_app_model_dropped() {
        let (mut ctx, mut access, calls) = setup();
        let msg = AccessMessage::new(GET, Bytes::new());
        let actions = access
            .dispatch(&mut ctx, &upper(None, 0x0001, &msg), Instant::now())
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_opcode_dropped() {
        let (mut ctx, mut access, _) = setup();
        let msg = AccessMessage::new(Opcode::sig2(0x8299), Bytes::new());
        let actions = access
            .dispatch(&mut ctx, &upper(Some(APP), 0x0001, &msg), Instant::now())
            .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn test_config_server_needs_device_key() {
        let (mut ctx, mut access, _) = setup();
        let msg = AccessMessage::new(op::DEFAULT_TTL_GET, Bytes::new());

        let actions = access
            .dispatch(&mut ctx, &upper(Some(APP), 0x0001, &msg), Instant::now())
            .unwrap();
        assert!(actions.is_empty());

        let actions = access
            .dispatch(&mut ctx, &upper(None, 0x0001, &msg), Instant::now())
            .unwrap();
        match &actions[..] {
            [AccessAction::Config { requester, outcome, .. }] => {
                assert_eq!(*requester, Address::new(0x0700));
                assert!(matches!(
                    outcome.response,
                    Some(ConfigResponse::DefaultTtlStatus { .. })
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_config_to_other_node_ignored() {
        let (mut ctx, mut access, _) = setup();
        let msg = AccessMessage::new(op::DEFAULT_TTL_GET, Bytes::new());
        let actions = access
            .dispatch(&mut ctx, &upper(None, 0x0009, &msg), Instant::now())
            .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn test_group_delivery_to_subscribed_element() {
        let (mut ctx, mut access, calls) = setup();
        ctx.elements
            .bind(Address::new(0x0001), ModelId::Sig(0x1000), APP)
            .unwrap();
        ctx.elements
            .subscribe(
                Address::new(0x0001),
                ModelId::Sig(0x1000),
                crate::services::elements::Subscription::group(Address::new(0xC000)),
            )
            .unwrap();
        let msg = AccessMessage::new(GET, Bytes::new());
        access
            .dispatch(&mut ctx, &upper(Some(APP), 0xC000, &msg), Instant::now())
            .unwrap();
        access
            .dispatch(&mut ctx, &upper(Some(APP), 0xC001, &msg), Instant::now())
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bad_config_parameters_dropped() {
        let (mut ctx, mut access, _) = setup();
        // AppKey Add needs 19 parameter bytes
        let msg = AccessMessage::new(op::APP_KEY_ADD, vec![0x00, 0x01]);
        let actions = access
            .dispatch(&mut ctx, &upper(None, 0x0001, &msg), Instant::now())
            .unwrap();
        assert!(actions.is_empty());
    }
}
