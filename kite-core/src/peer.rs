//! The RPC peer (spec §4.3): owns a session, the outbound-callback table,
//! the handler registry, a property bag, and dispatches inbound messages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::warn;

use crate::dnode::{self, ArgNode, CallbackFn, CallbackSender, MethodId, Partial, PathComponent};
use crate::error::Result;
use crate::transport::Session;

/// Whether inbound dispatch runs each message on its own task (default) or
/// serializes dispatch into receive order (spec §4.3, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Parallel,
    Serial,
}

/// A method handler: takes the owning peer and the deferred-decode
/// arguments, and runs to completion asynchronously. Kite-layer envelope
/// handling (spec §4.4) is built on top of this.
pub type MethodHandler = Arc<dyn Fn(Arc<RpcPeer>, Partial) -> BoxFuture<'static, ()> + Send + Sync>;

struct OutboundEntry {
    #[allow(dead_code)]
    path: Vec<PathComponent>,
    body: CallbackFn,
}

/// The map of callback ids to the path they occupied in the just-sent
/// message (spec §4.3's "outgoing-id map").
pub type OutgoingIds = HashMap<u64, Vec<PathComponent>>;

/// Owns one bidirectional dnode session and everything needed to make and
/// serve RPC calls on it.
pub struct RpcPeer {
    session: Session,
    next_id: AtomicU64,
    outbound: DashMap<u64, OutboundEntry>,
    handlers: DashMap<String, MethodHandler>,
    properties: DashMap<String, Value>,
    concurrency: Concurrency,
    wrap_method_args: Arc<dyn Fn(Vec<ArgNode>) -> Vec<ArgNode> + Send + Sync>,
    on_method_not_found: Arc<dyn Fn(Arc<RpcPeer>, String, Partial) + Send + Sync>,
}

struct PeerCallbackSender(Arc<RpcPeer>);

impl CallbackSender for PeerCallbackSender {
    fn invoke(&self, id: u64, args: Vec<ArgNode>) -> Result<()> {
        self.0.send_callback_reply(id, args)
    }
}

impl RpcPeer {
    /// Construct an unconfigured peer. Set hooks with `set_*` before
    /// wrapping in `Arc` and calling `start` — hook installation takes
    /// `&mut self` since it only ever happens during setup.
    pub fn new(session: Session, concurrency: Concurrency) -> RpcPeer {
        RpcPeer {
            session,
            next_id: AtomicU64::new(0),
            outbound: DashMap::new(),
            handlers: DashMap::new(),
            properties: DashMap::new(),
            concurrency,
            wrap_method_args: Arc::new(|args| args),
            on_method_not_found: Arc::new(|_, name, _| warn!("method not found: {name}")),
        }
    }

    /// Begin reading inbound frames and dispatching them. Call once per
    /// peer after construction.
    pub fn start(self: &Arc<Self>) {
        let peer = Arc::clone(self);
        tokio::spawn(async move {
            let mut incoming = match peer.session.take_incoming().await {
                Some(rx) => rx,
                None => return,
            };
            loop {
                let Some(text) = incoming.recv().await else { break };
                match peer.concurrency {
                    Concurrency::Parallel => {
                        let peer2 = Arc::clone(&peer);
                        tokio::spawn(async move { peer2.dispatch(text).await });
                    }
                    Concurrency::Serial => {
                        let peer2 = Arc::clone(&peer);
                        peer2.dispatch(text).await;
                    }
                }
            }
        });
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn register_handler(&self, name: impl Into<String>, handler: MethodHandler) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn set_property(&self, key: impl Into<String>, value: Value) {
        self.properties.insert(key.into(), value);
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties.get(key).map(|v| v.clone())
    }

    /// Install a hook that transforms outbound positional arguments before
    /// encoding (spec §4.3 `wrapMethodArgs`) — the Kite envelope layer uses
    /// this to wrap user args into `{withArgs, kite, authentication,
    /// responseCallback}`.
    pub fn set_wrap_method_args(&mut self, f: Arc<dyn Fn(Vec<ArgNode>) -> Vec<ArgNode> + Send + Sync>) {
        self.wrap_method_args = f;
    }

    pub fn set_on_method_not_found(&mut self, f: Arc<dyn Fn(Arc<RpcPeer>, String, Partial) + Send + Sync>) {
        self.on_method_not_found = f;
    }

    /// Make an outbound call: wraps, encodes, registers any callables found
    /// in the argument tree, and sends (spec §4.3).
    pub async fn call(self: &Arc<Self>, method: impl Into<String>, args: Vec<ArgNode>) -> Result<OutgoingIds> {
        let wrapped = (self.wrap_method_args)(args);
        let next_id = &self.next_id;
        let (message, pending) = dnode::encode(MethodId::Name(method.into()), wrapped, &mut || next_id.fetch_add(1, Ordering::SeqCst));

        let text = dnode::serialize(&message)?;

        for p in &pending {
            self.outbound.insert(
                p.id,
                OutboundEntry {
                    path: p.path.clone(),
                    body: p.body.clone(),
                },
            );
        }

        if let Err(e) = self.session.send(text).await {
            for p in &pending {
                self.outbound.remove(&p.id);
            }
            return Err(e);
        }

        Ok(message.callbacks)
    }

    /// Drop a single outstanding outbound callback (spec §4.3 "Callback
    /// removal").
    pub fn remove_callback(&self, id: u64) {
        self.outbound.remove(&id);
    }

    pub fn outstanding_callback_count(&self) -> usize {
        self.outbound.len()
    }

    fn send_callback_reply(&self, id: u64, args: Vec<ArgNode>) -> Result<()> {
        let next_id = &self.next_id;
        let (message, pending) = dnode::encode(MethodId::Callback(id), args, &mut || next_id.fetch_add(1, Ordering::SeqCst));
        for p in &pending {
            self.outbound.insert(
                p.id,
                OutboundEntry {
                    path: p.path.clone(),
                    body: p.body.clone(),
                },
            );
        }
        let text = dnode::serialize(&message)?;
        let session = self.session.session_handle();
        tokio::spawn(async move {
            if let Err(e) = session.send(text).await {
                warn!("callback reply send failed: {e}");
            }
        });
        Ok(())
    }

    async fn dispatch(self: Arc<Self>, text: String) {
        let sender: Arc<dyn CallbackSender> = Arc::new(PeerCallbackSender(Arc::clone(&self)));
        let (method, partial) = match dnode::decode(&text, Some(sender)) {
            Ok(v) => v,
            Err(e) => {
                warn!("dropping unparsable frame: {e}");
                return;
            }
        };

        match method {
            MethodId::Name(name) => {
                let handler = self.handlers.get(&name).map(|h| h.clone());
                match handler {
                    Some(handler) => handler(Arc::clone(&self), partial).await,
                    None => (self.on_method_not_found.clone())(Arc::clone(&self), name, partial),
                }
            }
            MethodId::Callback(id) => match self.outbound.get(&id).map(|e| e.body.clone()) {
                Some(body) => {
                    let args: Vec<Value> = partial.as_list().unwrap_or_default().iter().map(|p| p.raw().clone()).collect();
                    body(args);
                }
                None => warn!("callback not found: {id}"),
            },
        }
    }
}
