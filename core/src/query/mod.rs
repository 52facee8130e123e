//! Query surface: a builder over predicates, ordering, limits, hints and
//! partition bindings, planned and executed against the store.

pub mod cost;
pub mod executor;
pub mod plan;
pub mod planner;
pub mod predicate;

use crate::error::Result;
use crate::schema::Persistable;
use crate::store::{Partition, RecordStore};
use crate::value::Value;
use plan::SortSpec;
use planner::{PlanHint, QuerySpec};
use predicate::Predicate;
use std::marker::PhantomData;

/// A query under construction. Obtained from [`RecordStore::query`];
/// consumed by `fetch`, `fetch_ids` or `explain`.
pub struct Query<'s, T: Persistable> {
    store: &'s RecordStore,
    spec: QuerySpec,
    partition: Partition,
    _marker: PhantomData<T>,
}

impl<'s, T: Persistable> Query<'s, T> {
    pub(crate) fn new(store: &'s RecordStore) -> Self {
        Self { store, spec: QuerySpec::default(), partition: Partition::new(), _marker: PhantomData }
    }

    /// Add a predicate; multiple calls conjoin.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.spec.predicate = std::mem::replace(&mut self.spec.predicate, Predicate::True).and(predicate);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.spec.sort.push(SortSpec { field: field.into(), descending });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.spec.offset = offset;
        self
    }

    /// Force the named index, bypassing plan selection.
    pub fn using_index(mut self, name: impl Into<String>) -> Self {
        self.spec.hint = Some(PlanHint::UseIndex(name.into()));
        self
    }

    /// Force a full type scan, bypassing plan selection.
    pub fn forcing_scan(mut self) -> Self {
        self.spec.hint = Some(PlanHint::ForceScan);
        self
    }

    /// Bind one partition field for a dynamically partitioned type.
    pub fn partition(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.partition = self.partition.bind(field, value);
        self
    }

    pub async fn fetch(self) -> Result<Vec<T>> { self.store.run_query::<T>(self.spec, &self.partition).await }

    /// Ids only; record fetches are skipped when the plan is index-only.
    pub async fn fetch_ids(self) -> Result<Vec<Vec<Value>>> { self.store.run_query_ids::<T>(self.spec, &self.partition).await }

    /// The selected plan, rendered.
    pub async fn explain(self) -> Result<String> { self.store.explain::<T>(self.spec, &self.partition).await }
}
