//! Directory resolver: maps a type's path template (static segments plus
//! field references) to a physical key subspace.
//!
//! Each resolved path component becomes one tuple element under the resolver
//! root, standing in for the KV store's directory layer. The subspace cache
//! is process-wide shared state behind a single mutex; a lookup takes one
//! critical section.

use crate::error::{Error, Result};
use crate::schema::{DirSegment, RecordValues, TypeDescriptor};
use crate::subspace::Subspace;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Mutex;

pub struct DirectoryResolver {
    root: Subspace,
    cache: Mutex<HashMap<String, Subspace>>,
}

impl DirectoryResolver {
    pub fn new(root: Subspace) -> Self { Self { root, cache: Mutex::new(HashMap::new()) } }

    pub fn root(&self) -> &Subspace { &self.root }

    /// Resolve for a save operation: partition values are extracted from the
    /// record instance itself.
    pub fn resolve_for_record(&self, descriptor: &TypeDescriptor, values: &RecordValues) -> Result<Subspace> {
        self.resolve_with(descriptor, |field| values.get(field).cloned())
    }

    /// Resolve for a fetch/query: the caller must have bound every partition
    /// field explicitly. A partitioned type with no bindings at all fails
    /// with `PartitionRequired`; a partial binding with
    /// `MissingPartitionFields`.
    pub fn resolve(&self, descriptor: &TypeDescriptor, bindings: &HashMap<String, Value>) -> Result<Subspace> {
        let required = descriptor.partition_fields();
        if !required.is_empty() && bindings.is_empty() {
            return Err(Error::PartitionRequired { fields: required.iter().map(|s| s.to_string()).collect() });
        }
        self.resolve_with(descriptor, |field| bindings.get(field).cloned())
    }

    fn resolve_with(&self, descriptor: &TypeDescriptor, lookup: impl Fn(&str) -> Option<Value>) -> Result<Subspace> {
        let mut components = Vec::with_capacity(descriptor.directory.len());
        let mut missing = Vec::new();
        for segment in &descriptor.directory {
            match segment {
                DirSegment::Static(s) => components.push(s.clone()),
                DirSegment::Field(field) => match lookup(field) {
                    Some(Value::Null) | None => missing.push(field.clone()),
                    Some(value) => components.push(value.to_string()),
                },
            }
        }
        if !missing.is_empty() {
            return Err(Error::MissingPartitionFields { type_name: descriptor.type_name.clone(), missing });
        }

        let path = components.join("/");
        let mut cache = self.cache.lock().unwrap();
        if let Some(subspace) = cache.get(&path) {
            return Ok(subspace.clone());
        }
        let elements: Vec<Value> = components.into_iter().map(Value::String).collect();
        let subspace = self.root.subspace(&elements)?;
        cache.insert(path, subspace.clone());
        Ok(subspace)
    }
}
