//! Byte-prefix subspaces of the KV keyspace.

use crate::error::{Error, Result};
use crate::tuple;
use crate::value::Value;
use lamina_kv::strinc;

/// A contiguous byte-prefix region of the keyspace. Keys are formed by
/// appending tuple-encoded elements to the prefix; `unpack` strips the prefix
/// back off.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subspace {
    prefix: Vec<u8>,
}

impl Subspace {
    pub fn new(prefix: Vec<u8>) -> Self { Self { prefix } }

    pub fn from_elements(elements: &[Value]) -> Result<Self> { Ok(Self { prefix: tuple::pack(elements)? }) }

    pub fn prefix(&self) -> &[u8] { &self.prefix }

    /// Child subspace: this prefix extended by the given tuple elements.
    pub fn subspace(&self, elements: &[Value]) -> Result<Subspace> {
        let mut prefix = self.prefix.clone();
        prefix.extend(tuple::pack(elements)?);
        Ok(Subspace { prefix })
    }

    pub fn pack(&self, elements: &[Value]) -> Result<Vec<u8>> {
        let mut key = self.prefix.clone();
        key.extend(tuple::pack(elements)?);
        Ok(key)
    }

    pub fn pack_one(&self, element: &Value) -> Result<Vec<u8>> { self.pack(std::slice::from_ref(element)) }

    pub fn unpack(&self, key: &[u8]) -> Result<Vec<Value>> {
        let rest = key
            .strip_prefix(self.prefix.as_slice())
            .ok_or_else(|| Error::corrupt(format!("key does not belong to subspace (prefix {} bytes)", self.prefix.len())))?;
        tuple::unpack(rest)
    }

    pub fn contains(&self, key: &[u8]) -> bool { key.starts_with(&self.prefix) }

    /// The `[begin, end)` range covering every key in this subspace.
    pub fn range(&self) -> (Vec<u8>, Vec<u8>) { (self.prefix.clone(), strinc(&self.prefix)) }
}
