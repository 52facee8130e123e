//! Persistent per-type schema catalog with a TTL-guarded cache.
//!
//! The catalog entry for a type lives at `S/_catalog/<TypeName>` as JSON and
//! is written idempotently at container initialization, gated on the engine
//! version tuple at `S/_meta/schema/version`. Index lifecycle states live at
//! `S/_meta/index/<IndexName>/state`.

use crate::error::{Error, Result};
use crate::schema::index::IndexState;
use crate::schema::TypeDescriptor;
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::value::Value;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Engine schema version written to `_meta/schema/version`.
pub const SCHEMA_VERSION: (i64, i64, i64) = (1, 0, 0);

const STATE_READABLE: u8 = 0;
const STATE_WRITE_ONLY: u8 = 1;
const STATE_DISABLED: u8 = 2;

fn catalog_key(subspace: &Subspace, type_name: &str) -> Result<Vec<u8>> {
    subspace.pack(&[Value::from("_catalog"), Value::from(type_name)])
}

fn version_key(subspace: &Subspace) -> Result<Vec<u8>> {
    subspace.pack(&[Value::from("_meta"), Value::from("schema"), Value::from("version")])
}

fn state_key(subspace: &Subspace, index_name: &str) -> Result<Vec<u8>> {
    subspace.pack(&[Value::from("_meta"), Value::from("index"), Value::from(index_name), Value::from("state")])
}

/// Process-wide catalog service. Cache entries are keyed by
/// `(subspace prefix, type name)` so independent containers never alias.
pub struct SchemaCatalog {
    ttl: Duration,
    types: DashMap<(Vec<u8>, String), (TypeDescriptor, Instant)>,
    states: DashMap<(Vec<u8>, String), (IndexState, Instant)>,
}

impl Default for SchemaCatalog {
    fn default() -> Self { Self::new(Duration::from_secs(300)) }
}

impl SchemaCatalog {
    pub fn new(ttl: Duration) -> Self { Self { ttl, types: DashMap::new(), states: DashMap::new() } }

    /// Write the catalog entry for `descriptor` if none exists yet. A
    /// present entry is left untouched — it may carry indexes added by
    /// migration after the type was compiled — so repeated initialization
    /// commits nothing.
    pub async fn initialize(&self, txn: &Transaction, subspace: &Subspace, descriptor: &TypeDescriptor) -> Result<()> {
        descriptor.validate()?;
        self.check_version(txn, subspace).await?;

        let key = catalog_key(subspace, &descriptor.type_name)?;
        let cached = match txn.get(&key).await? {
            Some(existing) => serde_json::from_slice(&existing)?,
            None => {
                tracing::debug!(type_name = %descriptor.type_name, "catalog.write");
                txn.set(&key, &serde_json::to_vec(descriptor)?)?;
                descriptor.clone()
            }
        };
        self.types.insert((subspace.prefix().to_vec(), descriptor.type_name.clone()), (cached, Instant::now()));
        Ok(())
    }

    /// Version gate: a container written by an engine with a greater major
    /// version is refused; otherwise our version tuple is (re)written.
    async fn check_version(&self, txn: &Transaction, subspace: &Subspace) -> Result<()> {
        let key = version_key(subspace)?;
        let ours = crate::tuple::pack(&[Value::Int(SCHEMA_VERSION.0), Value::Int(SCHEMA_VERSION.1), Value::Int(SCHEMA_VERSION.2)])?;
        match txn.get(&key).await? {
            None => txn.set(&key, &ours)?,
            Some(existing) => {
                let stored = crate::tuple::unpack(&existing)?;
                let major = stored.first().and_then(Value::as_int).ok_or_else(|| Error::corrupt("malformed schema version tuple"))?;
                if major > SCHEMA_VERSION.0 {
                    return Err(Error::Schema(format!(
                        "container initialized by engine major version {major}, this engine is {}",
                        SCHEMA_VERSION.0
                    )));
                }
                if existing != ours {
                    txn.set(&key, &ours)?;
                }
            }
        }
        Ok(())
    }

    /// Load a type's catalog entry, serving from cache within the TTL.
    pub async fn load(&self, txn: &Transaction, subspace: &Subspace, type_name: &str) -> Result<TypeDescriptor> {
        let cache_key = (subspace.prefix().to_vec(), type_name.to_string());
        if let Some(entry) = self.types.get(&cache_key) {
            if entry.1.elapsed() < self.ttl {
                return Ok(entry.0.clone());
            }
        }

        let key = catalog_key(subspace, type_name)?;
        let raw = txn.get(&key).await?.ok_or_else(|| Error::UnknownType(type_name.to_string()))?;
        let descriptor: TypeDescriptor = serde_json::from_slice(&raw)?;
        self.types.insert(cache_key, (descriptor.clone(), Instant::now()));
        Ok(descriptor)
    }

    /// Persist a mutated catalog entry (add-index / drop-index migrations)
    /// and invalidate the cache line.
    pub async fn persist(&self, txn: &Transaction, subspace: &Subspace, descriptor: &TypeDescriptor) -> Result<()> {
        descriptor.validate()?;
        let key = catalog_key(subspace, &descriptor.type_name)?;
        txn.set(&key, &serde_json::to_vec(descriptor)?)?;
        self.types.remove(&(subspace.prefix().to_vec(), descriptor.type_name.clone()));
        Ok(())
    }

    pub fn invalidate(&self, subspace: &Subspace, type_name: &str) {
        self.types.remove(&(subspace.prefix().to_vec(), type_name.to_string()));
        let prefix = subspace.prefix().to_vec();
        self.states.retain(|(p, _), _| *p != prefix);
    }

    /// Current lifecycle state of an index. An index with no state key is
    /// readable (the initial state of indexes declared at type creation).
    pub async fn index_state(&self, txn: &Transaction, subspace: &Subspace, index_name: &str) -> Result<IndexState> {
        let cache_key = (subspace.prefix().to_vec(), index_name.to_string());
        if let Some(entry) = self.states.get(&cache_key) {
            if entry.1.elapsed() < self.ttl {
                return Ok(entry.0);
            }
        }

        let state = match txn.get(&state_key(subspace, index_name)?).await? {
            None => IndexState::Readable,
            Some(raw) => match raw.first() {
                Some(&STATE_READABLE) => IndexState::Readable,
                Some(&STATE_WRITE_ONLY) => IndexState::WriteOnly,
                Some(&STATE_DISABLED) => IndexState::Disabled,
                _ => return Err(Error::corrupt(format!("malformed state for index {index_name}"))),
            },
        };
        self.states.insert(cache_key, (state, Instant::now()));
        Ok(state)
    }

    pub async fn set_index_state(&self, txn: &Transaction, subspace: &Subspace, index_name: &str, state: IndexState) -> Result<()> {
        let byte = match state {
            IndexState::Readable => STATE_READABLE,
            IndexState::WriteOnly => STATE_WRITE_ONLY,
            IndexState::Disabled => STATE_DISABLED,
        };
        tracing::debug!(index = index_name, ?state, "index.state");
        txn.set(&state_key(subspace, index_name)?, &[byte])?;
        self.states.remove(&(subspace.prefix().to_vec(), index_name.to_string()));
        Ok(())
    }
}
