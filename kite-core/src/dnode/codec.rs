//! Encode/decode (spec §4.1).
//!
//! The codec itself holds no state — the outgoing-callback counter and
//! tables live in the peer that calls it (spec §4.1 "Concurrency").

use std::sync::Arc;

use serde_json::Value;

use crate::dnode::message::{CallbackTable, Links, Message, MethodId, PathComponent, FUNCTION_PLACEHOLDER};
use crate::dnode::partial::{CallbackSender, Partial};
use crate::error::{KiteError, Result};

/// A callable argument: a boxed closure invoked with the arguments the
/// remote side sent back (spec design notes — callables are
/// identifier-plus-peer handle on the wire, bodies stay local).
pub type CallbackFn = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// A dynamically-typed argument tree that may contain callables (spec §3,
/// design notes: `Scalar | List | Map | Function`).
#[derive(Clone)]
pub enum ArgNode {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<ArgNode>),
    Map(Vec<(String, ArgNode)>),
    Function(CallbackFn),
}

impl std::fmt::Debug for ArgNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgNode::Null => write!(f, "Null"),
            ArgNode::Bool(b) => write!(f, "Bool({b})"),
            ArgNode::Number(n) => write!(f, "Number({n})"),
            ArgNode::String(s) => write!(f, "String({s:?})"),
            ArgNode::List(items) => write!(f, "List({items:?})"),
            ArgNode::Map(pairs) => write!(f, "Map({pairs:?})"),
            ArgNode::Function(_) => write!(f, "Function(..)"),
        }
    }
}

impl From<Value> for ArgNode {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => ArgNode::Null,
            Value::Bool(b) => ArgNode::Bool(b),
            Value::Number(n) => ArgNode::Number(n),
            Value::String(s) => ArgNode::String(s),
            Value::Array(items) => ArgNode::List(items.into_iter().map(ArgNode::from).collect()),
            Value::Object(map) => ArgNode::Map(map.into_iter().map(|(k, v)| (k, ArgNode::from(v))).collect()),
        }
    }
}

impl From<&str> for ArgNode {
    fn from(s: &str) -> Self {
        ArgNode::String(s.to_string())
    }
}

impl From<String> for ArgNode {
    fn from(s: String) -> Self {
        ArgNode::String(s)
    }
}

impl From<i64> for ArgNode {
    fn from(n: i64) -> Self {
        ArgNode::Number(n.into())
    }
}

impl From<bool> for ArgNode {
    fn from(b: bool) -> Self {
        ArgNode::Bool(b)
    }
}

/// A callback pulled out of an outbound argument tree during encoding,
/// ready for the peer to register in its outbound table (spec §4.1, §4.3).
pub struct PendingCallback {
    pub id: u64,
    pub path: Vec<PathComponent>,
    pub body: CallbackFn,
}

/// Walk `args` depth-first, replacing every `ArgNode::Function` with the
/// `"[Function]"` placeholder and recording its path, then produce the
/// wire `Message` plus the callables the peer must remember (spec §4.1).
pub fn encode(method: MethodId, args: Vec<ArgNode>, next_id: &mut dyn FnMut() -> u64) -> (Message, Vec<PendingCallback>) {
    let mut pending = Vec::new();
    let arguments = args
        .into_iter()
        .enumerate()
        .map(|(i, node)| walk(node, &mut vec![PathComponent::Index(i)], next_id, &mut pending))
        .collect();

    let mut callbacks = CallbackTable::new();
    for p in &pending {
        callbacks.insert(p.id, p.path.clone());
    }

    (
        Message {
            method,
            arguments,
            callbacks,
            links: Links,
        },
        pending,
    )
}

fn walk(node: ArgNode, path: &mut Vec<PathComponent>, next_id: &mut dyn FnMut() -> u64, pending: &mut Vec<PendingCallback>) -> Value {
    match node {
        ArgNode::Null => Value::Null,
        ArgNode::Bool(b) => Value::Bool(b),
        ArgNode::Number(n) => Value::Number(n),
        ArgNode::String(s) => Value::String(s),
        ArgNode::List(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    path.push(PathComponent::Index(i));
                    let v = walk(item, path, next_id, pending);
                    path.pop();
                    v
                })
                .collect(),
        ),
        ArgNode::Map(pairs) => {
            let mut obj = serde_json::Map::new();
            for (key, value) in pairs {
                path.push(PathComponent::Key(key.clone()));
                let v = walk(value, path, next_id, pending);
                path.pop();
                obj.insert(key, v);
            }
            Value::Object(obj)
        }
        ArgNode::Function(body) => {
            let id = next_id();
            pending.push(PendingCallback {
                id,
                path: path.clone(),
                body,
            });
            Value::String(FUNCTION_PLACEHOLDER.to_string())
        }
    }
}

/// Parse a wire frame and build the deferred-decode `Partial` over its
/// arguments, wiring callback placeholders to `sender` for rehydration
/// (spec §4.1 decoding).
pub fn decode(text: &str, sender: Option<Arc<dyn CallbackSender>>) -> Result<(MethodId, Partial)> {
    let message: Message = serde_json::from_str(text).map_err(|e| KiteError::Argument(format!("invalid dnode message: {e}")))?;
    let partial = Partial::from_message(message.arguments, &message.callbacks, sender);
    Ok((message.method, partial))
}

/// Serialize an already-built `Message` to wire text.
pub fn serialize(message: &Message) -> Result<String> {
    serde_json::to_string(message).map_err(|e| KiteError::Argument(format!("serialize error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct Counter(AtomicU64);
    impl Counter {
        fn next(&self) -> u64 {
            self.0.fetch_add(1, Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingSender(Mutex<Vec<(u64, Vec<ArgNode>)>>);
    impl CallbackSender for RecordingSender {
        fn invoke(&self, id: u64, args: Vec<ArgNode>) -> Result<()> {
            self.0.lock().unwrap().push((id, args));
            Ok(())
        }
    }

    #[test]
    fn round_trip_scalars_and_callback_positions() {
        let counter = Counter(AtomicU64::new(0));
        let noop: CallbackFn = Arc::new(|_| {});

        let args = vec![
            ArgNode::Number(3.into()),
            ArgNode::Map(vec![
                ("onDone".to_string(), ArgNode::Function(noop.clone())),
                ("label".to_string(), ArgNode::String("square".into())),
            ]),
        ];

        let (message, pending) = encode(MethodId::Name("square".into()), args, &mut || counter.next());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].path, vec![PathComponent::Index(1), PathComponent::Key("onDone".into())]);

        let wire = serialize(&message).unwrap();
        assert!(wire.contains(FUNCTION_PLACEHOLDER));

        let sender: Arc<dyn CallbackSender> = Arc::new(RecordingSender::default());
        let (method, partial) = decode(&wire, Some(sender)).unwrap();
        assert_eq!(method, MethodId::Name("square".into()));
        assert_eq!(partial.index(0).unwrap().as_i64().unwrap(), 3);

        let cb = partial.index(1).unwrap().field("onDone").unwrap().as_function().unwrap();
        assert_eq!(cb.id(), 0);
        let label = partial.index(1).unwrap().field("label").unwrap();
        assert_eq!(label.as_str().unwrap(), "square");
    }

    #[test]
    fn callback_ids_increment_per_message() {
        let counter = Counter(AtomicU64::new(0));
        let noop: CallbackFn = Arc::new(|_| {});
        let args = vec![ArgNode::Function(noop.clone()), ArgNode::Function(noop)];
        let (_message, pending) = encode(MethodId::Name("m".into()), args, &mut || counter.next());
        assert_eq!(pending.iter().map(|p| p.id).collect::<Vec<_>>(), vec![0, 1]);
    }
}
