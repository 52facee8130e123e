//! Persistable-type declarations.
//!
//! A type registers a compile-time vtable of field extractors (no runtime
//! reflection): a static slice of `(field name, fn(&T) -> Value)`. Everything
//! downstream of extraction — index maintenance, planning, filtering — works
//! on the type-erased [`RecordValues`] produced here.

pub mod catalog;
pub mod index;

use crate::error::{Error, Result};
use crate::value::Value;
use index::IndexDescriptor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of a type's field vtable.
pub struct FieldExtractor<T> {
    pub name: &'static str,
    pub get: fn(&T) -> Value,
}

/// An application record type the engine can store and index.
///
/// Implementations are expected to be mechanical: a `type_name`, a vtable
/// listing every declared field, and a descriptor carrying the schema
/// (fields, primary key, directory template, indexes).
pub trait Persistable: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn type_name() -> &'static str;

    fn vtable() -> &'static [FieldExtractor<Self>];

    fn descriptor() -> TypeDescriptor;
}

/// Logical field types. Every one maps onto a tuple-codec element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    String,
    Bytes,
    Timestamp,
    Uuid,
    Tuple,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

/// One segment of a directory path template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DirSegment {
    Static(String),
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub type_name: String,
    pub fields: Vec<FieldDef>,
    pub primary_key: Vec<String>,
    pub directory: Vec<DirSegment>,
    pub indexes: Vec<IndexDescriptor>,
}

impl TypeDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), fields: Vec::new(), primary_key: Vec::new(), directory: Vec::new(), indexes: Vec::new() }
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef { name: name.into(), kind });
        self
    }

    pub fn primary_key<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn directory<I>(mut self, segments: I) -> Self
    where I: IntoIterator<Item = DirSegment> {
        self.directory = segments.into_iter().collect();
        self
    }

    pub fn index(mut self, descriptor: IndexDescriptor) -> Self {
        self.indexes.push(descriptor);
        self
    }

    pub fn field_kind(&self, name: &str) -> Option<FieldKind> { self.fields.iter().find(|f| f.name == name).map(|f| f.kind) }

    pub fn index_named(&self, name: &str) -> Option<&IndexDescriptor> { self.indexes.iter().find(|i| i.name == name) }

    /// Fields named by `Field` segments of the directory template, in
    /// template order. Non-empty means the type is dynamically partitioned.
    pub fn partition_fields(&self) -> Vec<&str> {
        self.directory
            .iter()
            .filter_map(|seg| match seg {
                DirSegment::Field(path) => Some(path.as_str()),
                DirSegment::Static(_) => None,
            })
            .collect()
    }

    /// Schema-construction-time validation. Catches dangling key paths and
    /// kind/field mismatches before anything touches the store.
    pub fn validate(&self) -> Result<()> {
        if self.primary_key.is_empty() {
            return Err(Error::Schema(format!("type {} declares no primary key", self.type_name)));
        }
        for path in &self.primary_key {
            if self.field_kind(path).is_none() {
                return Err(Error::Schema(format!("primary key path {path} is not a declared field of {}", self.type_name)));
            }
        }
        for seg in &self.directory {
            if let DirSegment::Field(path) = seg {
                if self.field_kind(path).is_none() {
                    return Err(Error::Schema(format!("directory template references undeclared field {path}")));
                }
            }
        }
        let mut seen = std::collections::HashSet::new();
        for idx in &self.indexes {
            if !seen.insert(idx.name.as_str()) {
                return Err(Error::Schema(format!("duplicate index name {}", idx.name)));
            }
            idx.validate(self)?;
        }
        Ok(())
    }
}

/// Type-erased field values of one record instance, extracted through the
/// vtable exactly once per maintainer pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordValues {
    values: BTreeMap<String, Value>,
}

impl RecordValues {
    pub fn extract<T: Persistable>(record: &T) -> Self {
        let values = T::vtable().iter().map(|f| (f.name.to_string(), (f.get)(record))).collect();
        Self { values }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Self { values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect() }
    }

    pub fn get(&self, path: &str) -> Option<&Value> { self.values.get(path) }

    /// Value at `path`, with absence normalized to `Null`.
    pub fn get_or_null(&self, path: &str) -> Value { self.values.get(path).cloned().unwrap_or(Value::Null) }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> { self.values.iter().map(|(k, v)| (k.as_str(), v)) }

    /// The primary-key tuple of this record under `descriptor`. Every
    /// component must be present and non-null.
    pub fn id_tuple(&self, descriptor: &TypeDescriptor) -> Result<Vec<Value>> {
        let mut id = Vec::with_capacity(descriptor.primary_key.len());
        for path in &descriptor.primary_key {
            match self.values.get(path) {
                Some(Value::Null) | None => {
                    return Err(Error::Schema(format!("primary key field {path} of {} is null or missing", descriptor.type_name)))
                }
                Some(v) => id.push(v.clone()),
            }
        }
        Ok(id)
    }
}

/// Evaluation adapter used by the executor's post-filters.
pub trait FieldAccess {
    fn field_value(&self, path: &str) -> Option<Value>;
}

impl FieldAccess for RecordValues {
    fn field_value(&self, path: &str) -> Option<Value> { self.values.get(path).cloned() }
}

pub(crate) fn kind_matches(kind: FieldKind, value: &Value) -> bool {
    matches!(
        (kind, value),
        (_, Value::Null)
            | (FieldKind::Bool, Value::Bool(_))
            | (FieldKind::Int, Value::Int(_))
            | (FieldKind::Float, Value::Float(_))
            | (FieldKind::Float, Value::Int(_))
            | (FieldKind::String, Value::String(_))
            | (FieldKind::Bytes, Value::Bytes(_))
            | (FieldKind::Timestamp, Value::Timestamp(_))
            | (FieldKind::Uuid, Value::Uuid(_))
            | (FieldKind::Tuple, Value::Tuple(_))
    )
}
