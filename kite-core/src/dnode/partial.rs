//! `Partial` — a deferred-decode argument wrapper (spec §3, §4.1, design notes).
//!
//! Eagerly parsing into a `serde_json::Value` tree (rather than holding raw
//! unparsed bytes) gives the same "don't commit to a shape until a handler
//! asks" property `serde_json::Value` already is a dynamically-typed,
//! decode-on-demand representation, and it lets every typed accessor below
//! be a safe, ordinary match instead of re-implementing a JSON scanner. See
//! DESIGN.md for the tradeoff.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::dnode::codec::ArgNode;
use crate::dnode::message::{CallbackTable, PathComponent};
use crate::error::{KiteError, Result};

/// Sends a reply frame on behalf of a rehydrated callback placeholder.
/// Implemented by the RPC peer that owns the transport.
pub trait CallbackSender: Send + Sync {
    fn invoke(&self, id: u64, args: Vec<ArgNode>) -> Result<()>;
}

/// A callable rehydrated from a `"[Function]"` placeholder. Invoking it
/// sends a message whose `method` is the callback id and whose `arguments`
/// are the caller-supplied values (spec §4.1).
#[derive(Clone)]
pub struct Callback {
    id: u64,
    sender: Arc<dyn CallbackSender>,
}

impl Callback {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn call(&self, args: Vec<ArgNode>) -> Result<()> {
        self.sender.invoke(self.id, args)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({})", self.id)
    }
}

/// A callback-spec still attached to a `Partial`: the path remaining from
/// this `Partial`'s own root to where the placeholder lives, plus the id it
/// should rehydrate into once that path bottoms out (spec §3, §4.1).
#[derive(Debug, Clone)]
pub struct CallbackSpec {
    pub path: Vec<PathComponent>,
    pub id: u64,
}

/// A deferred-decode argument value.
#[derive(Clone)]
pub struct Partial {
    value: Value,
    specs: Vec<CallbackSpec>,
    sender: Option<Arc<dyn CallbackSender>>,
}

fn component_matches(requested: &PathComponent, spec: &PathComponent) -> bool {
    if requested == spec {
        return true;
    }
    // A numeric string in a list context is parsed as an index (spec §4.1).
    match (requested, spec) {
        (PathComponent::Index(i), PathComponent::Key(k)) | (PathComponent::Key(k), PathComponent::Index(i)) => {
            k.parse::<usize>().map(|n| n == *i).unwrap_or(false)
        }
        _ => false,
    }
}

impl Partial {
    /// Build the top-level Partial over a message's `arguments` array plus
    /// its full `callbacks` side-table (spec §4.1 decoding).
    pub fn from_message(arguments: Vec<Value>, callbacks: &CallbackTable, sender: Option<Arc<dyn CallbackSender>>) -> Self {
        let specs = callbacks
            .iter()
            .map(|(id, path)| CallbackSpec {
                path: path.clone(),
                id: *id,
            })
            .collect();
        Partial {
            value: Value::Array(arguments),
            specs,
            sender,
        }
    }

    /// Descend one path component. Returns `None` if the component does not
    /// address an existing slot in the underlying value (non-fatal per
    /// spec §4.1 — invalid/out-of-range paths are simply dropped by the
    /// caller, which for navigation means "nothing there").
    pub fn get(&self, component: PathComponent) -> Option<Partial> {
        let child_value = match (&self.value, &component) {
            (Value::Array(items), PathComponent::Index(i)) => items.get(*i).cloned(),
            (Value::Array(items), PathComponent::Key(k)) => k.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
            (Value::Object(map), PathComponent::Key(k)) => map.get(k).cloned(),
            (Value::Object(map), PathComponent::Index(i)) => map.get(&i.to_string()).cloned(),
            _ => None,
        }?;

        let child_specs = self
            .specs
            .iter()
            .filter_map(|spec| {
                let (head, rest) = spec.path.split_first()?;
                if component_matches(&component, head) {
                    Some(CallbackSpec {
                        path: rest.to_vec(),
                        id: spec.id,
                    })
                } else {
                    None
                }
            })
            .collect();

        Some(Partial {
            value: child_value,
            specs: child_specs,
            sender: self.sender.clone(),
        })
    }

    pub fn index(&self, i: usize) -> Option<Partial> {
        self.get(PathComponent::Index(i))
    }

    pub fn field(&self, key: &str) -> Option<Partial> {
        self.get(PathComponent::Key(key.to_string()))
    }

    /// If this exact slot is a rehydrated callback placeholder, return it.
    pub fn as_function(&self) -> Option<Callback> {
        let spec = self.specs.iter().find(|s| s.path.is_empty())?;
        let sender = self.sender.clone()?;
        Some(Callback { id: spec.id, sender })
    }

    pub fn is_function_placeholder(&self) -> bool {
        self.as_function().is_some() || matches!(&self.value, Value::String(s) if s == crate::dnode::message::FUNCTION_PLACEHOLDER)
    }

    pub fn as_str(&self) -> Result<&str> {
        self.value
            .as_str()
            .ok_or_else(|| KiteError::Argument(format!("expected string, got {}", kind_name(&self.value))))
    }

    pub fn as_f64(&self) -> Result<f64> {
        self.value
            .as_f64()
            .ok_or_else(|| KiteError::Argument(format!("expected number, got {}", kind_name(&self.value))))
    }

    pub fn as_i64(&self) -> Result<i64> {
        self.value
            .as_i64()
            .ok_or_else(|| KiteError::Argument(format!("expected integer, got {}", kind_name(&self.value))))
    }

    pub fn as_bool(&self) -> Result<bool> {
        self.value
            .as_bool()
            .ok_or_else(|| KiteError::Argument(format!("expected bool, got {}", kind_name(&self.value))))
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn len(&self) -> Result<usize> {
        match &self.value {
            Value::Array(items) => Ok(items.len()),
            _ => Err(KiteError::Argument(format!("expected list, got {}", kind_name(&self.value)))),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }

    pub fn as_list(&self) -> Result<Vec<Partial>> {
        let len = self.len()?;
        Ok((0..len).map(|i| self.index(i).expect("index within bounds")).collect())
    }

    pub fn as_map(&self) -> Result<Vec<(String, Partial)>> {
        match &self.value {
            Value::Object(map) => Ok(map
                .keys()
                .map(|k| (k.clone(), self.field(k).expect("key present")))
                .collect()),
            _ => Err(KiteError::Argument(format!("expected map, got {}", kind_name(&self.value)))),
        }
    }

    /// The raw JSON value, for callers that want to `serde_json::from_value`
    /// into their own type directly.
    pub fn raw(&self) -> &Value {
        &self.value
    }
}

impl fmt::Debug for Partial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partial")
            .field("value", &self.value)
            .field("pending_callbacks", &self.specs.len())
            .finish()
    }
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSender(Mutex<Vec<(u64, Vec<ArgNode>)>>);
    impl CallbackSender for RecordingSender {
        fn invoke(&self, id: u64, args: Vec<ArgNode>) -> Result<()> {
            self.0.lock().unwrap().push((id, args));
            Ok(())
        }
    }

    #[test]
    fn navigates_nested_structures() {
        let args = vec![serde_json::json!({"a": [1, 2, {"b": "hi"}]})];
        let partial = Partial::from_message(args, &CallbackTable::new(), None);
        let nested = partial.index(0).unwrap().field("a").unwrap().index(2).unwrap().field("b").unwrap();
        assert_eq!(nested.as_str().unwrap(), "hi");
    }

    #[test]
    fn rehydrates_callback_at_recorded_path() {
        let args = vec![serde_json::json!(["[Function]", {"nested": "[Function]"}])];
        let mut table = CallbackTable::new();
        table.insert(0, vec![PathComponent::Index(0), PathComponent::Index(0)]);
        table.insert(1, vec![PathComponent::Index(0), PathComponent::Index(1), PathComponent::Key("nested".into())]);

        let sender: Arc<dyn CallbackSender> = Arc::new(RecordingSender(Mutex::new(vec![])));
        let partial = Partial::from_message(args, &table, Some(sender.clone()));

        let top_fn = partial.index(0).unwrap().index(0).unwrap();
        let cb = top_fn.as_function().expect("callback at [0,0]");
        assert_eq!(cb.id(), 0);

        let nested_fn = partial.index(0).unwrap().index(1).unwrap().field("nested").unwrap();
        let cb2 = nested_fn.as_function().expect("callback at [0,1,nested]");
        assert_eq!(cb2.id(), 1);

        cb.call(vec![ArgNode::String("hi".into())]).unwrap();
    }

    #[test]
    fn out_of_range_path_is_non_fatal() {
        let args = vec![serde_json::json!([1, 2])];
        let partial = Partial::from_message(args, &CallbackTable::new(), None);
        assert!(partial.index(0).unwrap().index(99).is_none());
    }
}
