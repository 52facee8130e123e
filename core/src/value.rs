//! Logical values and their strict normalization.
//!
//! Every field value an application hands the engine is normalized into one
//! of these variants before it is encoded. Normalization is strict: an
//! unsigned integer above `i64::MAX` is rejected rather than wrapped, and
//! there is exactly one `Value` (and therefore one encoding) per logical
//! value.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum Value {
    Null,
    Bytes(Vec<u8>),
    String(String),
    Tuple(Vec<Value>),
    Int(i64),
    Float(f64),
    /// Seconds since the Unix epoch.
    Timestamp(f64),
    Bool(bool),
    Uuid(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Null,
    Bytes,
    String,
    Tuple,
    Int,
    Float,
    Timestamp,
    Bool,
    Uuid,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::String(_) => ValueKind::String,
            Value::Tuple(_) => ValueKind::Tuple,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Bool(_) => ValueKind::Bool,
            Value::Uuid(_) => ValueKind::Uuid,
        }
    }
}

impl Value {
    /// Rank of the variant in the canonical cross-type order. Must agree with
    /// the tuple codec's type tags.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bytes(_) => 1,
            Value::String(_) => 2,
            Value::Tuple(_) => 3,
            Value::Int(_) => 4,
            Value::Float(_) => 5,
            Value::Timestamp(_) => 6,
            Value::Bool(_) => 7,
            Value::Uuid(_) => 8,
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    pub fn from_unsigned(v: u64) -> Result<Self> {
        i64::try_from(v).map(Value::Int).map_err(|_| Error::UnsupportedType(format!("unsigned integer {v} exceeds i64::MAX")))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for Value {
    /// Total order identical to the byte-lexicographic order of the tuple
    /// encoding: variants order by type rank, floats by IEEE total order
    /// (so -0.0 < 0.0 and NaN sorts deterministically).
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Tuple(a), Value::Tuple(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.total_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.as_bytes().cmp(b.as_bytes()),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bytes(b) => b.hash(state),
            Value::String(s) => s.hash(state),
            Value::Tuple(t) => t.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Timestamp(v) => v.to_bits().hash(state),
            Value::Bool(v) => v.hash(state),
            Value::Uuid(v) => v.hash(state),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bytes(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::String(s) => write!(f, "{s}"),
            Value::Tuple(t) => {
                write!(f, "(")?;
                for (i, v) in t.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "@{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Uuid(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self { Value::Int(v as i64) }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self { Value::Int(v as i64) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v as i64) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int(v) }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self { Value::Int(v as i64) }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self { Value::Int(v as i64) }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self { Value::Int(v as i64) }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self { Value::Float(v as f64) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Bytes(v) }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self { Value::Bytes(v.to_vec()) }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self { Value::Uuid(v) }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self { Value::Timestamp(v.timestamp_micros() as f64 / 1_000_000.0) }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self { Value::Tuple(v) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Value::Null) }
}
