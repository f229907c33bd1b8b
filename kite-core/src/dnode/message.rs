//! The wire message shape (spec §3, §6): `{method, arguments, callbacks, links}`.

use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A path component: list index or mapping/record key (spec §4.1).
/// A numeric string encountered in a list context is parsed as an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathComponent {
    Index(usize),
    Key(String),
}

impl Serialize for PathComponent {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            PathComponent::Index(i) => s.serialize_u64(*i as u64),
            PathComponent::Key(k) => s.serialize_str(k),
        }
    }
}

impl<'de> Deserialize<'de> for PathComponent {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct PathComponentVisitor;
        impl<'de> Visitor<'de> for PathComponentVisitor {
            type Value = PathComponent;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a path component: string key or non-negative integer index")
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<PathComponent, E> {
                Ok(PathComponent::Key(v.to_string()))
            }
            fn visit_string<E: de::Error>(self, v: String) -> Result<PathComponent, E> {
                Ok(PathComponent::Key(v))
            }
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<PathComponent, E> {
                Ok(PathComponent::Index(v as usize))
            }
            fn visit_i64<E: de::Error>(self, v: i64) -> Result<PathComponent, E> {
                if v < 0 {
                    return Err(de::Error::custom("path index must be non-negative"));
                }
                Ok(PathComponent::Index(v as usize))
            }
        }
        d.deserialize_any(PathComponentVisitor)
    }
}

/// A method identifier: a name (outbound call) or a callback id (reply).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodId {
    Name(String),
    Callback(u64),
}

impl Serialize for MethodId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            MethodId::Name(n) => s.serialize_str(n),
            MethodId::Callback(id) => s.serialize_u64(*id),
        }
    }
}

impl<'de> Deserialize<'de> for MethodId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct MethodIdVisitor;
        impl<'de> Visitor<'de> for MethodIdVisitor {
            type Value = MethodId;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a method name or a non-negative callback id")
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<MethodId, E> {
                Ok(MethodId::Name(v.to_string()))
            }
            fn visit_string<E: de::Error>(self, v: String) -> Result<MethodId, E> {
                Ok(MethodId::Name(v))
            }
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<MethodId, E> {
                Ok(MethodId::Callback(v))
            }
            fn visit_i64<E: de::Error>(self, v: i64) -> Result<MethodId, E> {
                if v < 0 {
                    return Err(de::Error::custom("callback method id must be non-negative"));
                }
                Ok(MethodId::Callback(v as u64))
            }
        }
        d.deserialize_any(MethodIdVisitor)
    }
}

/// The callbacks side-table: stringified callback id → path (spec §3, §6).
pub type CallbackTable = HashMap<u64, Vec<PathComponent>>;

fn serialize_callbacks<S: Serializer>(table: &CallbackTable, s: S) -> Result<S::Ok, S::Error> {
    let mut map = s.serialize_map(Some(table.len()))?;
    for (id, path) in table {
        map.serialize_entry(&id.to_string(), path)?;
    }
    map.end()
}

fn deserialize_callbacks<'de, D: Deserializer<'de>>(d: D) -> Result<CallbackTable, D::Error> {
    struct CallbacksVisitor;
    impl<'de> Visitor<'de> for CallbacksVisitor {
        type Value = CallbackTable;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping from stringified callback id to a path")
        }
        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<CallbackTable, A::Error> {
            let mut table = CallbackTable::new();
            while let Some((key, path)) = map.next_entry::<String, Vec<PathComponent>>()? {
                let id: u64 = key.parse().map_err(de::Error::custom)?;
                table.insert(id, path);
            }
            Ok(table)
        }
    }
    d.deserialize_map(CallbacksVisitor)
}

/// Reserved, always emitted empty (spec §3, §6).
#[derive(Debug, Clone, Default)]
pub struct Links;

impl Serialize for Links {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_seq(Some(0))?.end()
    }
}

impl<'de> Deserialize<'de> for Links {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let _ignored: Vec<serde_json::Value> = Deserialize::deserialize(d)?;
        Ok(Links)
    }
}

/// The dnode wire message: `{method, arguments, callbacks, links}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub method: MethodId,
    pub arguments: Vec<serde_json::Value>,
    #[serde(serialize_with = "serialize_callbacks", deserialize_with = "deserialize_callbacks")]
    pub callbacks: CallbackTable,
    #[serde(default)]
    pub links: Links,
}

/// The exact string a function placeholder is replaced with on the wire
/// (spec §4.1, §6).
pub const FUNCTION_PLACEHOLDER: &str = "[Function]";
