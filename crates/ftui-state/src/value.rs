#![forbid(unsafe_code)]

//! Dynamic state values.
//!
//! Widgets declare state fields of arbitrary shape, so holders carry a
//! [`Value`]: either a primitive or an [`Aggregate`] handle.
//!
//! # Equality
//!
//! `PartialEq` is the equality holders use for dirty-checking: primitives
//! compare by value, aggregates by identity (two handles to the same storage).
//! Structural comparison is [`Value::deep_eq`].
//!
//! `Number(f64::NAN) != Number(f64::NAN)`, so writing NaN over NaN notifies.

use std::fmt;

use crate::observed::{Aggregate, ObservedObject, RawObject};

/// A tracked value: a primitive or a handle to an aggregate.
#[derive(Clone, Default)]
pub enum Value {
    /// No value. Also the "no source" marker for sync bindings.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(Aggregate),
}

impl Value {
    /// Whether this value is a structured aggregate.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn as_aggregate(&self) -> Option<&Aggregate> {
        match self {
            Self::Object(aggregate) => Some(aggregate),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read member `member` of an aggregate value. `None` for primitives and
    /// missing members.
    #[must_use]
    pub fn member(&self, member: &str) -> Option<Value> {
        self.as_aggregate()?.get(member)
    }

    /// Short type tag for log messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Object(aggregate) => aggregate.kind_name(),
        }
    }

    /// Structural equality: aggregates are compared member by member,
    /// regardless of identity or wrapping state.
    #[must_use]
    pub fn deep_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => a.deep_eq(b),
            _ => self == other,
        }
    }

    /// Copy sharing no mutable sub-state with `self`. Primitives are cloned.
    #[must_use]
    pub fn deep_copy(&self) -> Value {
        match self {
            Self::Object(aggregate) => Self::Object(aggregate.deep_copy()),
            other => other.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Object(aggregate) => fmt::Debug::fmt(aggregate, f),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Aggregate> for Value {
    fn from(value: Aggregate) -> Self {
        Self::Object(value)
    }
}

impl From<RawObject> for Value {
    fn from(value: RawObject) -> Self {
        Self::Object(Aggregate::Raw(value))
    }
}

impl From<ObservedObject> for Value {
    fn from(value: ObservedObject) -> Self {
        Self::Object(Aggregate::Observed(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Undefined, Into::into)
    }
}

#[cfg(feature = "json")]
mod json {
    //! Interop with `serde_json`, for fixtures and diagnostics.
    //!
    //! The value model has no sequence type, so a JSON array converts to an
    //! object keyed `"0"`, `"1"`, ... and serializes back as an object with
    //! lexically ordered keys (`"10"` before `"2"`). Arrays do not round-trip;
    //! only objects and scalars do.

    use serde::ser::{Serialize, SerializeMap, Serializer};

    use super::Value;
    use crate::observed::RawObject;

    impl From<serde_json::Value> for Value {
        fn from(value: serde_json::Value) -> Self {
            match value {
                serde_json::Value::Null => Self::Null,
                serde_json::Value::Bool(b) => Self::Bool(b),
                serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
                serde_json::Value::String(s) => Self::String(s),
                serde_json::Value::Array(items) => Self::from(RawObject::from_members(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(index, item)| (index.to_string(), Value::from(item))),
                )),
                serde_json::Value::Object(map) => Self::from(RawObject::from_members(
                    map.into_iter().map(|(key, item)| (key, Value::from(item))),
                )),
            }
        }
    }

    /// Serialization descends at most this many aggregate levels, which also
    /// bounds self-referencing aggregates.
    const MAX_DEPTH: usize = 32;

    struct Bounded<'a> {
        value: &'a Value,
        depth: usize,
    }

    impl Serialize for Bounded<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self.value {
                Value::Undefined | Value::Null => serializer.serialize_unit(),
                Value::Bool(b) => serializer.serialize_bool(*b),
                Value::Number(n) => serializer.serialize_f64(*n),
                Value::String(s) => serializer.serialize_str(s),
                Value::Object(_) if self.depth >= MAX_DEPTH => serializer.serialize_unit(),
                Value::Object(aggregate) => {
                    let members = aggregate.members();
                    let mut map = serializer.serialize_map(Some(members.len()))?;
                    for (key, member) in &members {
                        map.serialize_entry(
                            key,
                            &Bounded {
                                value: member,
                                depth: self.depth + 1,
                            },
                        )?;
                    }
                    map.end()
                }
            }
        }
    }

    impl Serialize for Value {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            Bounded {
                value: self,
                depth: 0,
            }
            .serialize(serializer)
        }
    }

    impl Value {
        /// Snapshot as a `serde_json::Value`.
        #[must_use]
        pub fn to_json(&self) -> serde_json::Value {
            serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
        }
    }
}
