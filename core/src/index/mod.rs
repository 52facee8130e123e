//! Index maintenance: one maintainer per index kind, dispatched per record
//! transition.
//!
//! Maintainers are type-erased: they see a [`RecordValues`] extracted through
//! the record type's vtable, never the concrete record type. The kind set is
//! sealed; maintainers are bound to kinds in a registry built at process
//! startup.

pub mod aggregate;
pub mod bitmap;
pub mod graph;
pub mod history;
pub mod leaderboard;
pub mod ordered;
pub mod ranked;
pub mod sketch;
pub mod spatial;
pub mod text;
pub mod vector;

use crate::error::{Error, Result};
use crate::schema::index::{IndexDescriptor, IndexKind};
use crate::schema::{RecordValues, TypeDescriptor};
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::value::Value;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Everything a maintainer needs to address one index of one record type
/// within one transaction.
pub struct IndexContext<'a> {
    pub txn: &'a Transaction,
    /// The container subspace resolved through the directory layer.
    pub container: &'a Subspace,
    pub descriptor: &'a TypeDescriptor,
    pub index: &'a IndexDescriptor,
}

impl<'a> IndexContext<'a> {
    /// `S/I/<IndexName>` — the subspace all of this index's entries live in.
    pub fn index_space(&self) -> Result<Subspace> {
        self.container.subspace(&[Value::from("I"), Value::from(self.index.name.as_str())])
    }
}

/// Per-kind updater. `update` handles every record transition (insert has no
/// `old`, delete no `new`, replace both); `scan_for_build` is the online
/// index build path; `expected_keys` supports offline verification and
/// returns the exact entry keys a record contributes — empty for kinds whose
/// contribution is not a per-record entry (aggregates, sketches, history).
#[async_trait]
pub trait IndexMaintainer: Send + Sync {
    async fn update(&self, ctx: &IndexContext<'_>, id: &[Value], old: Option<&RecordValues>, new: Option<&RecordValues>) -> Result<()>;

    async fn scan_for_build(&self, ctx: &IndexContext<'_>, id: &[Value], record: &RecordValues) -> Result<()> {
        self.update(ctx, id, None, Some(record)).await
    }

    fn expected_keys(&self, ctx: &IndexContext<'_>, id: &[Value], record: &RecordValues) -> Result<BTreeSet<Vec<u8>>>;
}

/// Maintainer registry: sealed kind id to concrete implementation. Built
/// once at startup; kinds can be rebound (e.g. a custom tokenizer) before
/// the store is opened.
pub struct MaintainerRegistry {
    maintainers: HashMap<IndexKind, Arc<dyn IndexMaintainer>>,
}

impl Default for MaintainerRegistry {
    fn default() -> Self { Self::standard() }
}

impl MaintainerRegistry {
    pub fn empty() -> Self { Self { maintainers: HashMap::new() } }

    /// The standard binding of every kind in the closed set.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        let ordered = Arc::new(ordered::OrderedMaintainer);
        registry.register(IndexKind::Ordered, ordered.clone());
        registry.register(IndexKind::Unique, ordered);
        let aggregate = Arc::new(aggregate::AggregateMaintainer);
        for kind in [IndexKind::Count, IndexKind::Sum, IndexKind::Min, IndexKind::Max, IndexKind::Average] {
            registry.register(kind, aggregate.clone());
        }
        registry.register(IndexKind::Distinct, Arc::new(sketch::DistinctMaintainer));
        registry.register(IndexKind::Percentile, Arc::new(sketch::PercentileMaintainer));
        registry.register(IndexKind::Ranked, Arc::new(ranked::RankedMaintainer));
        registry.register(IndexKind::Leaderboard, Arc::new(leaderboard::LeaderboardMaintainer));
        registry.register(IndexKind::Text, Arc::new(text::TextMaintainer::default()));
        registry.register(IndexKind::Vector, Arc::new(vector::VectorMaintainer));
        registry.register(IndexKind::Spatial, Arc::new(spatial::SpatialMaintainer));
        registry.register(IndexKind::Graph, Arc::new(graph::GraphMaintainer));
        registry.register(IndexKind::Bitmap, Arc::new(bitmap::BitmapMaintainer));
        registry.register(IndexKind::History, Arc::new(history::HistoryMaintainer));
        registry
    }

    pub fn register(&mut self, kind: IndexKind, maintainer: Arc<dyn IndexMaintainer>) {
        self.maintainers.insert(kind, maintainer);
    }

    pub fn get(&self, kind: IndexKind) -> Result<&Arc<dyn IndexMaintainer>> {
        self.maintainers
            .get(&kind)
            .ok_or_else(|| Error::Schema(format!("no maintainer registered for index kind {}", kind.label())))
    }
}

/// The index key-column values of a record, in key-path order. Missing
/// fields normalize to `Null` so every record has a well-defined entry.
pub fn key_column_values(index: &IndexDescriptor, record: &RecordValues) -> Vec<Value> {
    index.key_paths.iter().map(|path| record.get_or_null(path)).collect()
}

/// Tuple-encoded stored fields for covering entries; empty for non-covering
/// indexes.
pub fn covering_value(index: &IndexDescriptor, record: &RecordValues) -> Result<Vec<u8>> {
    if index.stored_fields.is_empty() {
        return Ok(Vec::new());
    }
    let values: Vec<Value> = index.stored_fields.iter().map(|path| record.get_or_null(path)).collect();
    crate::tuple::pack(&values)
}
