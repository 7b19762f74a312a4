//! Typed schemas for component arguments and exports
//!
//! A [`Schema`] is an ordered list of [`FieldSpec`]s. Binding a set of
//! evaluated attributes against a schema rejects unknown fields, reports
//! every missing required field, fills in defaults and coerces each value
//! to its declared [`TypeSpec`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::duration::parse_duration;
use crate::error::EvalError;
use crate::value::{Number, Value, ValueMap, ValueType};

/// Declared type of a field
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeSpec {
    /// Accepts any value unchanged
    Any,
    Bool,
    Number,
    /// Whole number; floats are accepted only when exact
    Int,
    String,
    /// Duration literal string (whole numbers are read as seconds)
    Duration,
    Array(Box<TypeSpec>),
    Object,
    /// Capability handle with the given type name (empty matches any)
    Capsule(String),
}

impl TypeSpec {
    /// Whether a value of type `self` may be wired into a field of type `consumer`
    pub fn is_compatible_with(&self, consumer: &TypeSpec) -> bool {
        use TypeSpec::*;
        match (self, consumer) {
            (Any, _) | (_, Any) => true,
            (Number, Int) | (Int, Number) => true,
            (String, Duration) | (Duration, String) => true,
            (Int, Duration) => true,
            (Array(a), Array(b)) => a.is_compatible_with(b),
            (Capsule(a), Capsule(b)) => a.is_empty() || b.is_empty() || a == b,
            (a, b) => a == b,
        }
    }

    /// Convert `value` to this type, failing instead of truncating
    pub fn coerce(&self, value: Value) -> Result<Value, EvalError> {
        match (self, value) {
            (Self::Any, v) => Ok(v),
            (Self::Bool, v @ Value::Bool(_)) => Ok(v),
            (Self::Number, v @ Value::Number(_)) => Ok(v),
            (Self::Int, Value::Number(n)) => match n.as_i64() {
                Some(i) => Ok(Value::Number(Number::Int(i))),
                None => Err(EvalError::mismatch("int", format!("number {n}"))),
            },
            (Self::String, v @ Value::String(_)) => Ok(v),
            (Self::Duration, Value::String(s)) => match parse_duration(&s) {
                Ok(_) => Ok(Value::String(s)),
                Err(_) => Err(EvalError::mismatch("duration", format!("string {s:?}"))),
            },
            (Self::Duration, Value::Number(n)) => match n.as_i64() {
                Some(secs) if secs >= 0 => Ok(Value::String(format!("{secs}s"))),
                _ => Err(EvalError::mismatch("duration", format!("number {n}"))),
            },
            (Self::Array(inner), Value::Array(items)) => items
                .into_iter()
                .map(|item| inner.coerce(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (Self::Object, v @ Value::Object(_)) => Ok(v),
            (Self::Capsule(name), Value::Capsule(c)) => {
                if name.is_empty() || c.type_name() == name {
                    Ok(Value::Capsule(c))
                } else {
                    Err(EvalError::mismatch(
                        format!("capsule({name})"),
                        format!("capsule({})", c.type_name()),
                    ))
                }
            }
            (ty, other) => Err(EvalError::mismatch(ty.to_string(), other.describe())),
        }
    }

    /// Best-effort static type of a value
    pub fn of(value: &Value) -> TypeSpec {
        match value.value_type() {
            ValueType::Null => Self::Any,
            ValueType::Bool => Self::Bool,
            ValueType::Number => Self::Number,
            ValueType::String => Self::String,
            ValueType::Array => Self::Array(Box::new(Self::Any)),
            ValueType::Object => Self::Object,
            ValueType::Capsule => Self::Capsule(
                value
                    .as_capsule()
                    .map(|c| c.type_name().to_string())
                    .unwrap_or_default(),
            ),
        }
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Bool => write!(f, "bool"),
            Self::Number => write!(f, "number"),
            Self::Int => write!(f, "int"),
            Self::String => write!(f, "string"),
            Self::Duration => write!(f, "duration"),
            Self::Array(inner) => write!(f, "array({inner})"),
            Self::Object => write!(f, "object"),
            Self::Capsule(name) if name.is_empty() => write!(f, "capsule"),
            Self::Capsule(name) => write!(f, "capsule({name})"),
        }
    }
}

/// A named field in a schema
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    /// Field name (used as key)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Declared type
    pub ty: TypeSpec,
    /// Whether the caller must supply this field
    pub required: bool,
    /// Value used when an optional field is not supplied
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, ty: TypeSpec) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ty,
            required: true,
            default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.required = false;
        self.default = Some(default.into());
        self
    }
}

/// Problem found while binding values to a schema
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindError {
    #[error("missing required field {0:?}")]
    Missing(String),

    #[error("unknown field {0:?}")]
    Unknown(String),

    #[error("field {field:?}: {source}")]
    Invalid {
        field: String,
        #[source]
        source: EvalError,
    },
}

/// Ordered set of typed fields
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    fields: Vec<FieldSpec>,
    open: bool,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema that accepts any field, typed or not
    pub fn open() -> Self {
        Self {
            fields: Vec::new(),
            open: true,
        }
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.open || self.field(name).is_some()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn required_fields(&self) -> Vec<&FieldSpec> {
        self.fields.iter().filter(|f| f.required).collect()
    }

    /// Bind supplied values, producing an object in schema order
    ///
    /// Unsupplied optional fields take their default, or null when they
    /// have none. Every problem is reported, not just the first.
    pub fn bind(&self, mut values: ValueMap) -> Result<Value, Vec<BindError>> {
        let mut bound = ValueMap::new();
        let mut errors = Vec::new();

        for spec in &self.fields {
            match values.shift_remove(&spec.name) {
                Some(value) => match spec.ty.coerce(value) {
                    Ok(v) => {
                        bound.insert(spec.name.clone(), v);
                    }
                    Err(source) => errors.push(BindError::Invalid {
                        field: spec.name.clone(),
                        source,
                    }),
                },
                None if spec.required => errors.push(BindError::Missing(spec.name.clone())),
                None => {
                    bound.insert(spec.name.clone(), spec.default.clone().unwrap_or_default());
                }
            }
        }

        for (name, value) in values {
            if self.open {
                bound.insert(name, value);
            } else {
                errors.push(BindError::Unknown(name));
            }
        }

        if errors.is_empty() {
            Ok(Value::Object(bound))
        } else {
            Err(errors)
        }
    }
}
