//! Values: the dynamically-typed tree exchanged between components
//!
//! Every argument a component receives and every export it publishes is a
//! [`Value`]. Mappings keep insertion order for iteration and rendering but
//! compare without regard to order. Capsules carry opaque capability handles
//! that only compare equal to themselves.

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::duration::parse_duration;

/// Keyed mapping of values; iteration follows insertion order
pub type ValueMap = IndexMap<String, Value>;

/// A dynamically-typed value
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(ValueMap),
    Capsule(Capsule),
}

/// The tag of a [`Value`], used in error messages and type checks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    Capsule,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
            Self::Capsule => "capsule",
        };
        f.write_str(name)
    }
}

// ── Numbers ──────────────────────────────────────────────────────────

/// A number that remembers whether it was written as an integer
#[derive(Clone, Copy, Debug)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    /// Integer view; floats convert only when they hold an exact integer
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(i) => Some(i),
            Self::Float(f) => {
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                    Some(f as i64)
                } else {
                    None
                }
            }
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            _ => self.as_f64() == other.as_f64(),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
        }
    }
}

// ── Capsules ─────────────────────────────────────────────────────────

/// Opaque capability handle carried through the graph
///
/// Equality is identity: two capsules are equal only if they share the
/// same allocation.
#[derive(Clone)]
pub struct Capsule {
    type_name: String,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Capsule {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>().to_string(),
            inner: Arc::new(value),
        }
    }

    /// Wrap a value under an explicit capability name
    pub fn named<T: Any + Send + Sync>(type_name: impl Into<String>, value: T) -> Self {
        Self {
            type_name: type_name.into(),
            inner: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl PartialEq for Capsule {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Capsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capsule({})", self.type_name)
    }
}

// ── Value API ────────────────────────────────────────────────────────

impl Value {
    /// Build an object value from key/value pairs
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::Bool(_) => ValueType::Bool,
            Self::Number(_) => ValueType::Number,
            Self::String(_) => ValueType::String,
            Self::Array(_) => ValueType::Array,
            Self::Object(_) => ValueType::Object,
            Self::Capsule(_) => ValueType::Capsule,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().and_then(|n| n.as_i64())
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().map(|n| n.as_f64())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ValueMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_capsule(&self) -> Option<&Capsule> {
        match self {
            Self::Capsule(c) => Some(c),
            _ => None,
        }
    }

    /// Interpret the value as a duration (duration string or whole seconds)
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::String(s) => parse_duration(s).ok(),
            Self::Number(n) => n
                .as_i64()
                .and_then(|secs| u64::try_from(secs).ok())
                .map(Duration::from_secs),
            _ => None,
        }
    }

    /// Look up a field of an object value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(field))
    }

    /// Short description used in error messages, e.g. `string "abc"`
    pub fn describe(&self) -> String {
        match self {
            Self::String(s) => format!("string {s:?}"),
            Self::Number(n) => format!("number {n}"),
            Self::Bool(b) => format!("bool {b}"),
            Self::Capsule(c) => format!("capsule({})", c.type_name()),
            other => other.value_type().to_string(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Number(Number::Int(i))
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Number(Number::Int(i64::from(i)))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Number(Number::Float(f))
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Self::Object(map)
    }
}

impl From<Capsule> for Value {
    fn from(c: Capsule) -> Self {
        Self::Capsule(c)
    }
}

/// Renders values in configuration syntax
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(map) if map.is_empty() => f.write_str("{}"),
            Self::Object(map) => {
                f.write_str("{ ")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key} = {value}")?;
                }
                f.write_str(" }")
            }
            Self::Capsule(c) => write!(f, "capsule({})", c.type_name()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(Number::Int(i)) => serializer.serialize_i64(*i),
            Self::Number(Number::Float(f)) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Self::Capsule(c) => serializer.serialize_str(&format!("capsule({})", c.type_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_equality_is_numeric() {
        assert_eq!(Number::Int(1), Number::Float(1.0));
        assert_ne!(Number::Int(1), Number::Float(1.5));
        assert_eq!(Value::from(3), Value::from(3.0));
    }

    #[test]
    fn test_float_to_int_is_exact_only() {
        assert_eq!(Number::Float(4.0).as_i64(), Some(4));
        assert_eq!(Number::Float(4.5).as_i64(), None);
        assert_eq!(Number::Float(f64::INFINITY).as_i64(), None);
    }

    #[test]
    fn test_object_equality_ignores_order() {
        let a = Value::object([("x", Value::from(1)), ("y", Value::from("two"))]);
        let b = Value::object([("y", Value::from("two")), ("x", Value::from(1))]);
        assert_eq!(a, b);

        let keys: Vec<&str> = a.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["x", "y"]);
    }

    #[test]
    fn test_capsule_identity() {
        let handle = Capsule::named("receiver", 42u32);
        let same = handle.clone();
        let other = Capsule::named("receiver", 42u32);

        assert_eq!(Value::from(handle.clone()), Value::from(same));
        assert_ne!(Value::from(handle.clone()), Value::from(other));
        assert_eq!(handle.downcast_ref::<u32>(), Some(&42));
        assert_eq!(handle.type_name(), "receiver");
    }

    #[test]
    fn test_display_uses_config_syntax() {
        let v = Value::object([
            ("name", Value::from("a\"b")),
            ("items", Value::Array(vec![Value::from(1), Value::from(2.5), Value::Null])),
            ("on", Value::from(true)),
        ]);
        assert_eq!(v.to_string(), r#"{ name = "a\"b", items = [1, 2.5, null], on = true }"#);
        assert_eq!(Value::Object(ValueMap::new()).to_string(), "{}");
    }

    #[test]
    fn test_as_duration() {
        assert_eq!(
            Value::from("1m30s").as_duration(),
            Some(Duration::from_secs(90))
        );
        assert_eq!(Value::from(5).as_duration(), Some(Duration::from_secs(5)));
        assert_eq!(Value::from(-5).as_duration(), None);
        assert_eq!(Value::from("soon").as_duration(), None);
    }

    #[test]
    fn test_serialize_to_json() {
        let v = Value::object([
            ("count", Value::from(3)),
            ("ratio", Value::from(0.5)),
            ("tags", Value::Array(vec![Value::from("a")])),
            ("handle", Value::from(Capsule::named("sink", ()))),
        ]);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "count": 3,
                "ratio": 0.5,
                "tags": ["a"],
                "handle": "capsule(sink)"
            })
        );
    }

    #[test]
    fn test_get_field() {
        let v = Value::object([("inner", Value::object([("n", Value::from(7))]))]);
        assert_eq!(v.get("inner").and_then(|i| i.get("n")), Some(&Value::from(7)));
        assert!(v.get("missing").is_none());
        assert!(Value::from(1).get("n").is_none());
    }
}
