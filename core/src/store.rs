//! Record store: the engine's front door.
//!
//! Wires the directory resolver, envelope, schema catalog, maintainer
//! registry, planner and executor together behind save/fetch/delete/query
//! operations, plus the online index lifecycle (write-only build, state
//! flips, verification).

use crate::directory::DirectoryResolver;
use crate::envelope;
use crate::error::{Error, Result};
use crate::index::{IndexContext, MaintainerRegistry};
use crate::query::cost::CostModel;
use crate::query::executor::Executor;
use crate::query::planner::{Planner, QuerySpec};
use crate::query::Query;
use crate::schema::catalog::SchemaCatalog;
use crate::schema::index::{IndexDescriptor, IndexState};
use crate::schema::{kind_matches, Persistable, RecordValues, TypeDescriptor};
use crate::subspace::Subspace;
use crate::transaction::{Database, ScanOptions, Transaction};
use crate::value::Value;
use dashmap::DashSet;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Records walked per transaction during an online index build.
const BUILD_BATCH: usize = 200;

/// Explicit partition-field bindings for fetches and queries against
/// dynamically partitioned types.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    bindings: HashMap<String, Value>,
}

impl Partition {
    pub fn new() -> Self { Self::default() }

    pub fn bind(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(field.into(), value.into());
        self
    }

    pub fn bindings(&self) -> &HashMap<String, Value> { &self.bindings }
}

/// Outcome of an index verification pass.
#[derive(Debug, Default)]
pub struct IndexVerification {
    pub records_checked: usize,
    pub missing_entries: Vec<Vec<u8>>,
    pub stray_entries: Vec<Vec<u8>>,
}

impl IndexVerification {
    pub fn is_clean(&self) -> bool { self.missing_entries.is_empty() && self.stray_entries.is_empty() }
}

#[derive(Clone)]
pub struct RecordStore {
    db: Database,
    resolver: Arc<DirectoryResolver>,
    catalog: Arc<SchemaCatalog>,
    registry: Arc<MaintainerRegistry>,
    cost: CostModel,
    initialized: Arc<DashSet<Vec<u8>>>,
}

impl RecordStore {
    pub fn new(db: Database) -> Result<Self> {
        let root = Subspace::from_elements(&[Value::from("lamina")])?;
        Ok(Self {
            db,
            resolver: Arc::new(DirectoryResolver::new(root)),
            catalog: Arc::new(SchemaCatalog::default()),
            registry: Arc::new(MaintainerRegistry::standard()),
            cost: CostModel::default(),
            initialized: Arc::new(DashSet::new()),
        })
    }

    pub fn with_registry(mut self, registry: MaintainerRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_cost_model(mut self, cost: CostModel) -> Self {
        self.cost = cost;
        self
    }

    pub fn database(&self) -> &Database { &self.db }

    fn record_key(container: &Subspace, descriptor: &TypeDescriptor, id: &[Value]) -> Result<Vec<u8>> {
        let mut elements = vec![Value::from("R"), Value::from(descriptor.type_name.as_str())];
        elements.extend_from_slice(id);
        container.pack(&elements)
    }

    fn blob_space(container: &Subspace, descriptor: &TypeDescriptor, id: &[Value]) -> Result<Subspace> {
        let mut elements = vec![Value::from("B"), Value::from(descriptor.type_name.as_str())];
        elements.extend_from_slice(id);
        container.subspace(&elements)
    }

    /// The catalog entry governing this container: the persisted one when
    /// present (it may carry migrated indexes), the compiled one otherwise.
    async fn effective_descriptor<T: Persistable>(&self, txn: &Transaction, container: &Subspace) -> Result<TypeDescriptor> {
        match self.catalog.load(txn, container, T::type_name()).await {
            Ok(descriptor) => Ok(descriptor),
            Err(Error::UnknownType(_)) => Ok(T::descriptor()),
            Err(other) => Err(other),
        }
    }

    fn container_marker(container: &Subspace, descriptor: &TypeDescriptor) -> Vec<u8> {
        let mut marker = container.prefix().to_vec();
        marker.extend(descriptor.type_name.as_bytes());
        marker
    }

    /// Idempotent catalog initialization. The marker set is only updated by
    /// callers after a successful commit, so an aborted first transaction
    /// re-initializes on the next attempt.
    async fn ensure_container(&self, txn: &Transaction, container: &Subspace, descriptor: &TypeDescriptor) -> Result<()> {
        if self.initialized.contains(&Self::container_marker(container, descriptor)) {
            return Ok(());
        }
        self.catalog.initialize(txn, container, descriptor).await
    }

    /// Dispatch every non-disabled index maintainer for one record
    /// transition.
    async fn maintain(
        &self,
        txn: &Transaction,
        container: &Subspace,
        descriptor: &TypeDescriptor,
        id: &[Value],
        old: Option<&RecordValues>,
        new: Option<&RecordValues>,
    ) -> Result<()> {
        for index in &descriptor.indexes {
            if self.catalog.index_state(txn, container, &index.name).await? == IndexState::Disabled {
                continue;
            }
            let ctx = IndexContext { txn, container, descriptor, index };
            self.registry.get(index.kind)?.update(&ctx, id, old, new).await?;
        }
        Ok(())
    }

    /// Insert or replace a record. Partition values come from the record
    /// itself; the primary key must stay fixed across replacements.
    pub async fn save<T: Persistable>(&self, record: &T) -> Result<()> {
        let compiled = T::descriptor();
        compiled.validate()?;
        let values = RecordValues::extract(record);
        for field in &compiled.fields {
            if let Some(value) = values.get(&field.name) {
                if !kind_matches(field.kind, value) {
                    return Err(Error::UnsupportedType(format!(
                        "field {} of {} declared {:?} but holds {value}",
                        field.name, compiled.type_name, field.kind
                    )));
                }
            }
        }
        let container = self.resolver.resolve_for_record(&compiled, &values)?;
        let payload = bincode::serialize(record)?;
        let marker = Self::container_marker(&container, &compiled);

        let store = self.clone();
        self.db
            .run(move |txn| {
                let (store, compiled, values, container, payload) =
                    (store.clone(), compiled.clone(), values.clone(), container.clone(), payload.clone());
                async move {
                    store.ensure_container(&txn, &container, &compiled).await?;
                    let descriptor = store.effective_descriptor::<T>(&txn, &container).await?;
                    let id = values.id_tuple(&descriptor)?;

                    let record_key = Self::record_key(&container, &descriptor, &id)?;
                    let blob_space = Self::blob_space(&container, &descriptor, &id)?;
                    let old: Option<T> = match envelope::read(&txn, &record_key, false).await? {
                        Some(raw) => Some(bincode::deserialize(&raw)?),
                        None => None,
                    };
                    let old_values = old.as_ref().map(RecordValues::extract);

                    envelope::write(&txn, &record_key, &blob_space, &payload).await?;
                    store.maintain(&txn, &container, &descriptor, &id, old_values.as_ref(), Some(&values)).await?;
                    tracing::debug!(type_name = %descriptor.type_name, "record.save");
                    Ok(())
                }
            })
            .await?;
        self.initialized.insert(marker);
        Ok(())
    }

    /// Fetch by primary key. Partition values must be bound explicitly.
    pub async fn fetch<T: Persistable>(&self, id: &[Value], partition: &Partition) -> Result<Option<T>> {
        let compiled = T::descriptor();
        let container = self.resolver.resolve(&compiled, partition.bindings())?;
        let id = id.to_vec();
        self.db
            .run(move |txn| {
                let (compiled, container, id) = (compiled.clone(), container.clone(), id.clone());
                async move {
                    let record_key = Self::record_key(&container, &compiled, &id)?;
                    match envelope::read(&txn, &record_key, false).await? {
                        Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
                        None => Ok(None),
                    }
                }
            })
            .await
    }

    /// Delete by primary key. Returns whether a record existed.
    pub async fn delete<T: Persistable>(&self, id: &[Value], partition: &Partition) -> Result<bool> {
        let compiled = T::descriptor();
        let container = self.resolver.resolve(&compiled, partition.bindings())?;
        let id = id.to_vec();
        let store = self.clone();
        self.db
            .run(move |txn| {
                let (store, container, id) = (store.clone(), container.clone(), id.clone());
                async move {
                    let descriptor = store.effective_descriptor::<T>(&txn, &container).await?;
                    let record_key = Self::record_key(&container, &descriptor, &id)?;
                    let old: Option<T> = match envelope::read(&txn, &record_key, false).await? {
                        Some(raw) => Some(bincode::deserialize(&raw)?),
                        None => return Ok(false),
                    };
                    let old_values = old.as_ref().map(RecordValues::extract);

                    envelope::delete(&txn, &record_key, &Self::blob_space(&container, &descriptor, &id)?)?;
                    store.maintain(&txn, &container, &descriptor, &id, old_values.as_ref(), None).await?;
                    tracing::debug!(type_name = %descriptor.type_name, "record.delete");
                    Ok(true)
                }
            })
            .await
    }

    pub fn query<T: Persistable>(&self) -> Query<'_, T> { Query::new(self) }

    /// Plan and execute a query spec, returning records.
    pub(crate) async fn run_query<T: Persistable>(&self, spec: QuerySpec, partition: &Partition) -> Result<Vec<T>> {
        let compiled = T::descriptor();
        let container = self.resolver.resolve(&compiled, partition.bindings())?;
        let store = self.clone();
        self.db
            .run(move |txn| {
                let (store, container, mut spec) = (store.clone(), container.clone(), spec.clone());
                async move {
                    let descriptor = store.effective_descriptor::<T>(&txn, &container).await?;
                    spec.readable_indexes = Some(store.readable_indexes(&txn, &container, &descriptor).await?);
                    let plan = Planner::new(store.cost.clone()).plan(&descriptor, &spec)?;
                    tracing::debug!(plan = %plan, "query.plan");
                    let executor = Executor::<T>::new(&txn, &container, &descriptor);
                    Ok(executor.execute_records(&plan.root).await?.into_iter().map(|(_, record)| record).collect())
                }
            })
            .await
    }

    /// Plan and execute, returning ids only (index-only when possible).
    pub(crate) async fn run_query_ids<T: Persistable>(&self, spec: QuerySpec, partition: &Partition) -> Result<Vec<Vec<Value>>> {
        let compiled = T::descriptor();
        let container = self.resolver.resolve(&compiled, partition.bindings())?;
        let store = self.clone();
        self.db
            .run(move |txn| {
                let (store, container, mut spec) = (store.clone(), container.clone(), spec.clone());
                async move {
                    let descriptor = store.effective_descriptor::<T>(&txn, &container).await?;
                    spec.readable_indexes = Some(store.readable_indexes(&txn, &container, &descriptor).await?);
                    let plan = Planner::new(store.cost.clone()).plan(&descriptor, &spec)?;
                    let executor = Executor::<T>::new(&txn, &container, &descriptor);
                    executor.execute_ids(&plan.root).await
                }
            })
            .await
    }

    /// Render the selected plan without executing it.
    pub(crate) async fn explain<T: Persistable>(&self, spec: QuerySpec, partition: &Partition) -> Result<String> {
        let compiled = T::descriptor();
        let container = self.resolver.resolve(&compiled, partition.bindings())?;
        let store = self.clone();
        self.db
            .run(move |txn| {
                let (store, container, mut spec) = (store.clone(), container.clone(), spec.clone());
                async move {
                    let descriptor = store.effective_descriptor::<T>(&txn, &container).await?;
                    spec.readable_indexes = Some(store.readable_indexes(&txn, &container, &descriptor).await?);
                    let plan = Planner::new(store.cost.clone()).plan(&descriptor, &spec)?;
                    Ok(plan.to_string())
                }
            })
            .await
    }

    async fn readable_indexes(
        &self,
        txn: &Transaction,
        container: &Subspace,
        descriptor: &TypeDescriptor,
    ) -> Result<std::collections::HashSet<String>> {
        let mut readable = std::collections::HashSet::new();
        for index in &descriptor.indexes {
            if self.catalog.index_state(txn, container, &index.name).await? == IndexState::Readable {
                readable.insert(index.name.clone());
            }
        }
        Ok(readable)
    }

    /// Add an index to a live type: persist the catalog entry in write-only
    /// state, backfill it online, then flip it readable.
    pub async fn add_index<T: Persistable>(&self, index: IndexDescriptor, partition: &Partition) -> Result<()> {
        let compiled = T::descriptor();
        let container = self.resolver.resolve(&compiled, partition.bindings())?;
        let marker = Self::container_marker(&container, &compiled);

        let store = self.clone();
        let index_in = index.clone();
        self.db
            .run(move |txn| {
                let (store, compiled, container, index) = (store.clone(), compiled.clone(), container.clone(), index_in.clone());
                async move {
                    store.ensure_container(&txn, &container, &compiled).await?;
                    let mut descriptor = store.effective_descriptor::<T>(&txn, &container).await?;
                    if descriptor.index_named(&index.name).is_some() {
                        return Err(Error::Schema(format!("index {} already exists", index.name)));
                    }
                    descriptor.indexes.push(index.clone());
                    store.catalog.persist(&txn, &container, &descriptor).await?;
                    store.catalog.set_index_state(&txn, &container, &index.name, IndexState::WriteOnly).await
                }
            })
            .await?;
        self.initialized.insert(marker);

        self.build_index::<T>(&index.name, partition).await
    }

    /// Online build: walk the record space in bounded batches, each in its
    /// own transaction, then mark the index readable.
    pub async fn build_index<T: Persistable>(&self, index_name: &str, partition: &Partition) -> Result<()> {
        let compiled = T::descriptor();
        let container = self.resolver.resolve(&compiled, partition.bindings())?;
        let record_space = container.subspace(&[Value::from("R"), Value::from(T::type_name())])?;
        let mut cursor = record_space.range().0;
        let end = record_space.range().1;

        loop {
            let store = self.clone();
            let (cursor_in, end_in, space_in, name_in) = (cursor.clone(), end.clone(), record_space.clone(), index_name.to_string());
            let container_in = container.clone();
            let progressed: Option<Vec<u8>> = self
                .db
                .run(move |txn| {
                    let (store, cursor, end, space, name, container) = (
                        store.clone(),
                        cursor_in.clone(),
                        end_in.clone(),
                        space_in.clone(),
                        name_in.clone(),
                        container_in.clone(),
                    );
                    async move {
                        let descriptor = store.effective_descriptor::<T>(&txn, &container).await?;
                        let index = descriptor.index_named(&name).ok_or_else(|| Error::UnknownIndex(name.clone()))?.clone();
                        let maintainer = store.registry.get(index.kind)?;

                        let mut scan =
                            txn.range_scan(cursor, end, ScanOptions { batch_size: BUILD_BATCH, ..Default::default() }.with_limit(BUILD_BATCH));
                        let mut last_key = None;
                        while let Some(entry) = scan.next().await? {
                            let id = space.unpack(&entry.key)?;
                            let payload = envelope::decode_body(&txn, &entry.value, false).await?;
                            let record: T = bincode::deserialize(&payload)?;
                            let values = RecordValues::extract(&record);
                            let ctx = IndexContext { txn: &txn, container: &container, descriptor: &descriptor, index: &index };
                            maintainer.scan_for_build(&ctx, &id, &values).await?;
                            last_key = Some(entry.key);
                        }
                        drop(scan);
                        Ok(last_key)
                    }
                })
                .await?;

            match progressed {
                Some(last) => {
                    cursor = last;
                    cursor.push(0x00);
                }
                None => break,
            }
        }

        let store = self.clone();
        let (container_in, name_in) = (container.clone(), index_name.to_string());
        self.db
            .run(move |txn| {
                let (store, container, name) = (store.clone(), container_in.clone(), name_in.clone());
                async move { store.catalog.set_index_state(&txn, &container, &name, IndexState::Readable).await }
            })
            .await?;
        tracing::info!(index = index_name, "index build complete");
        Ok(())
    }

    /// Flip an index's lifecycle state directly. `WriteOnly` keeps the
    /// maintainers running while hiding the index from the planner;
    /// `Disabled` stops both.
    pub async fn set_index_state<T: Persistable>(&self, index_name: &str, partition: &Partition, state: IndexState) -> Result<()> {
        let compiled = T::descriptor();
        let container = self.resolver.resolve(&compiled, partition.bindings())?;
        let store = self.clone();
        let name_in = index_name.to_string();
        self.db
            .run(move |txn| {
                let (store, container, name) = (store.clone(), container.clone(), name_in.clone());
                async move { store.catalog.set_index_state(&txn, &container, &name, state).await }
            })
            .await
    }

    /// Drop an index: remove its catalog entry, clear its subspace and its
    /// state key.
    pub async fn drop_index<T: Persistable>(&self, index_name: &str, partition: &Partition) -> Result<()> {
        let compiled = T::descriptor();
        let container = self.resolver.resolve(&compiled, partition.bindings())?;
        let store = self.clone();
        let name_in = index_name.to_string();
        self.db
            .run(move |txn| {
                let (store, container, name) = (store.clone(), container.clone(), name_in.clone());
                async move {
                    let mut descriptor = store.effective_descriptor::<T>(&txn, &container).await?;
                    let before = descriptor.indexes.len();
                    descriptor.indexes.retain(|index| index.name != name);
                    if descriptor.indexes.len() == before {
                        return Err(Error::UnknownIndex(name.clone()));
                    }
                    store.catalog.persist(&txn, &container, &descriptor).await?;
                    store.catalog.set_index_state(&txn, &container, &name, IndexState::Disabled).await?;
                    let space = container.subspace(&[Value::from("I"), Value::from(name.as_str())])?;
                    let (begin, end) = space.range();
                    txn.clear_range(&begin, &end)
                }
            })
            .await
    }

    /// Verify a per-record-entry index against recomputed expected keys.
    pub async fn verify_index<T: Persistable>(&self, index_name: &str, partition: &Partition) -> Result<IndexVerification> {
        let compiled = T::descriptor();
        let container = self.resolver.resolve(&compiled, partition.bindings())?;
        let store = self.clone();
        let name_in = index_name.to_string();
        self.db
            .run(move |txn| {
                let (store, container, name) = (store.clone(), container.clone(), name_in.clone());
                async move {
                    let descriptor = store.effective_descriptor::<T>(&txn, &container).await?;
                    let index = descriptor.index_named(&name).ok_or_else(|| Error::UnknownIndex(name.clone()))?.clone();
                    let maintainer = store.registry.get(index.kind)?;
                    let ctx = IndexContext { txn: &txn, container: &container, descriptor: &descriptor, index: &index };

                    let mut expected: BTreeSet<Vec<u8>> = BTreeSet::new();
                    let space = container.subspace(&[Value::from("R"), Value::from(descriptor.type_name.as_str())])?;
                    let (begin, end) = space.range();
                    let mut verification = IndexVerification::default();
                    let entries = txn.get_range(&begin, &end, lamina_kv::RangeOptions::default()).await?;
                    for entry in entries {
                        let id = space.unpack(&entry.key)?;
                        let payload = envelope::decode_body(&txn, &entry.value, false).await?;
                        let record: T = bincode::deserialize(&payload)?;
                        let values = RecordValues::extract(&record);
                        expected.extend(maintainer.expected_keys(&ctx, &id, &values)?);
                        verification.records_checked += 1;
                    }

                    for key in &expected {
                        if txn.get(key).await?.is_none() {
                            verification.missing_entries.push(key.clone());
                        }
                    }

                    // Stray detection only where expected_keys enumerates the
                    // index exhaustively.
                    use crate::schema::index::IndexKind;
                    if matches!(index.kind, IndexKind::Ordered | IndexKind::Unique | IndexKind::Graph | IndexKind::Spatial) {
                        let index_space = container.subspace(&[Value::from("I"), Value::from(name.as_str())])?;
                        let (begin, end) = index_space.range();
                        for entry in txn.get_range(&begin, &end, lamina_kv::RangeOptions::default()).await? {
                            if !expected.contains(&entry.key) {
                                verification.stray_entries.push(entry.key);
                            }
                        }
                    }
                    Ok(verification)
                }
            })
            .await
    }
}

/// Query sides of the specialized index kinds. Each delegates into the
/// maintainer module's reader within one retrying transaction.
impl RecordStore {
    fn container_for<T: Persistable>(&self, partition: &Partition) -> Result<Subspace> {
        self.resolver.resolve(&T::descriptor(), partition.bindings())
    }

    fn ranked_list<'a>(txn: &'a Transaction, container: &Subspace, index_name: &str, fanout: u32) -> Result<crate::index::ranked::SkipList<'a>> {
        let space = container.subspace(&[Value::from("I"), Value::from(index_name)])?;
        Ok(crate::index::ranked::SkipList::new(txn, space, fanout))
    }

    fn ranked_fanout<T: Persistable>(index_name: &str) -> u32 {
        T::descriptor().index_named(index_name).map(|i| i.config.ranked_fanout).unwrap_or(2)
    }

    pub async fn ranked_count<T: Persistable>(&self, index_name: &str, partition: &Partition) -> Result<u64> {
        let container = self.container_for::<T>(partition)?;
        let (name, fanout) = (index_name.to_string(), Self::ranked_fanout::<T>(index_name));
        self.db
            .run(move |txn| {
                let (container, name) = (container.clone(), name.clone());
                async move { Self::ranked_list(&txn, &container, &name, fanout)?.count().await }
            })
            .await
    }

    /// Greatest `k` `(score, id)` entries, best first.
    pub async fn ranked_top_k<T: Persistable>(&self, index_name: &str, partition: &Partition, k: usize) -> Result<Vec<(Value, Vec<Value>)>> {
        let container = self.container_for::<T>(partition)?;
        let (name, fanout) = (index_name.to_string(), Self::ranked_fanout::<T>(index_name));
        self.db
            .run(move |txn| {
                let (container, name) = (container.clone(), name.clone());
                async move {
                    let elements = Self::ranked_list(&txn, &container, &name, fanout)?.top_k(k).await?;
                    Ok(elements.into_iter().map(split_score).collect())
                }
            })
            .await
    }

    /// Leaderboard rank of one record: 0 is the highest score. `None` when
    /// the record is not in the list.
    pub async fn ranked_rank<T: Persistable>(
        &self,
        index_name: &str,
        partition: &Partition,
        score: Value,
        id: &[Value],
    ) -> Result<Option<u64>> {
        let container = self.container_for::<T>(partition)?;
        let (name, fanout) = (index_name.to_string(), Self::ranked_fanout::<T>(index_name));
        let mut element = vec![score];
        element.extend_from_slice(id);
        self.db
            .run(move |txn| {
                let (container, name, element) = (container.clone(), name.clone(), element.clone());
                async move {
                    let list = Self::ranked_list(&txn, &container, &name, fanout)?;
                    match list.ascending_rank(&element).await? {
                        Some(ascending) => Ok(Some(list.count().await? - 1 - ascending)),
                        None => Ok(None),
                    }
                }
            })
            .await
    }

    /// The `(score, id)` holding leaderboard rank `rank` (0 = highest).
    pub async fn ranked_by_rank<T: Persistable>(
        &self,
        index_name: &str,
        partition: &Partition,
        rank: u64,
    ) -> Result<Option<(Value, Vec<Value>)>> {
        let container = self.container_for::<T>(partition)?;
        let (name, fanout) = (index_name.to_string(), Self::ranked_fanout::<T>(index_name));
        self.db
            .run(move |txn| {
                let (container, name) = (container.clone(), name.clone());
                async move {
                    let list = Self::ranked_list(&txn, &container, &name, fanout)?;
                    let count = list.count().await?;
                    if rank >= count {
                        return Ok(None);
                    }
                    Ok(list.by_ascending_rank(count - 1 - rank).await?.map(split_score))
                }
            })
            .await
    }

    /// The `(score, id)` at quantile `p` of the ascending score order.
    pub async fn ranked_percentile<T: Persistable>(
        &self,
        index_name: &str,
        partition: &Partition,
        p: f64,
    ) -> Result<Option<(Value, Vec<Value>)>> {
        let container = self.container_for::<T>(partition)?;
        let (name, fanout) = (index_name.to_string(), Self::ranked_fanout::<T>(index_name));
        self.db
            .run(move |txn| {
                let (container, name) = (container.clone(), name.clone());
                async move { Ok(Self::ranked_list(&txn, &container, &name, fanout)?.percentile(p).await?.map(split_score)) }
            })
            .await
    }

    /// Greatest `k` `(score, id)` entries of one leaderboard window bucket.
    pub async fn leaderboard_top_k<T: Persistable>(
        &self,
        index_name: &str,
        partition: &Partition,
        bucket: i64,
        k: usize,
    ) -> Result<Vec<(Value, Vec<Value>)>> {
        let container = self.container_for::<T>(partition)?;
        let (name, fanout) = (index_name.to_string(), Self::ranked_fanout::<T>(index_name));
        self.db
            .run(move |txn| {
                let (container, name) = (container.clone(), name.clone());
                async move {
                    let space = container
                        .subspace(&[Value::from("I"), Value::from(name.as_str())])?
                        .subspace(&[Value::Int(bucket)])?;
                    let list = crate::index::ranked::SkipList::new(&txn, space, fanout);
                    Ok(list.top_k(k).await?.into_iter().map(split_score).collect())
                }
            })
            .await
    }

    /// Count/sum value of one aggregate group.
    pub async fn aggregate_counter<T: Persistable>(&self, index_name: &str, partition: &Partition, group: &[Value]) -> Result<i64> {
        let container = self.container_for::<T>(partition)?;
        let index = Self::aggregate_index::<T>(index_name)?;
        let group = group.to_vec();
        self.db
            .run(move |txn| {
                let (container, index, group) = (container.clone(), index.clone(), group.clone());
                async move { crate::index::aggregate::AggregateReader::new(&txn, container, index).counter(&group).await }
            })
            .await
    }

    pub async fn aggregate_extremum<T: Persistable>(
        &self,
        index_name: &str,
        partition: &Partition,
        group: &[Value],
    ) -> Result<Option<i64>> {
        let container = self.container_for::<T>(partition)?;
        let index = Self::aggregate_index::<T>(index_name)?;
        let group = group.to_vec();
        self.db
            .run(move |txn| {
                let (container, index, group) = (container.clone(), index.clone(), group.clone());
                async move { crate::index::aggregate::AggregateReader::new(&txn, container, index).extremum(&group).await }
            })
            .await
    }

    pub async fn aggregate_average<T: Persistable>(
        &self,
        index_name: &str,
        partition: &Partition,
        group: &[Value],
    ) -> Result<Option<f64>> {
        let container = self.container_for::<T>(partition)?;
        let index = Self::aggregate_index::<T>(index_name)?;
        let group = group.to_vec();
        self.db
            .run(move |txn| {
                let (container, index, group) = (container.clone(), index.clone(), group.clone());
                async move { crate::index::aggregate::AggregateReader::new(&txn, container, index).average(&group).await }
            })
            .await
    }

    fn aggregate_index<T: Persistable>(index_name: &str) -> Result<IndexDescriptor> {
        T::descriptor().index_named(index_name).cloned().ok_or_else(|| Error::UnknownIndex(index_name.to_string()))
    }

    pub async fn distinct_estimate<T: Persistable>(&self, index_name: &str, partition: &Partition, group: &[Value]) -> Result<f64> {
        let container = self.container_for::<T>(partition)?;
        let (name, group) = (index_name.to_string(), group.to_vec());
        self.db
            .run(move |txn| {
                let (container, name, group) = (container.clone(), name.clone(), group.clone());
                async move { crate::index::sketch::estimate_distinct(&txn, &container, &name, &group).await }
            })
            .await
    }

    pub async fn percentile_estimate<T: Persistable>(
        &self,
        index_name: &str,
        partition: &Partition,
        group: &[Value],
        q: f64,
    ) -> Result<Option<f64>> {
        let container = self.container_for::<T>(partition)?;
        let (name, group) = (index_name.to_string(), group.to_vec());
        self.db
            .run(move |txn| {
                let (container, name, group) = (container.clone(), name.clone(), group.clone());
                async move { crate::index::sketch::estimate_percentile(&txn, &container, &name, &group, q).await }
            })
            .await
    }

    /// BM25-ranked full-text search; `(score, id)` pairs, best first.
    pub async fn text_search<T: Persistable>(
        &self,
        index_name: &str,
        partition: &Partition,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(f64, Vec<Value>)>> {
        let container = self.container_for::<T>(partition)?;
        let (name, query) = (index_name.to_string(), query.to_string());
        self.db
            .run(move |txn| {
                let (container, name, query) = (container.clone(), name.clone(), query.clone());
                async move { crate::index::text::TextReader::new(&txn, &container, &name)?.bm25(&query, limit).await }
            })
            .await
    }

    pub async fn graph_traverse<T: Persistable>(
        &self,
        index_name: &str,
        partition: &Partition,
        permutation: crate::index::graph::Permutation,
        bound: &[Value],
    ) -> Result<Vec<crate::index::graph::Edge>> {
        let container = self.container_for::<T>(partition)?;
        let (name, bound) = (index_name.to_string(), bound.to_vec());
        self.db
            .run(move |txn| {
                let (container, name, bound) = (container.clone(), name.clone(), bound.clone());
                async move { crate::index::graph::traverse(&txn, &container, &name, permutation, &bound).await }
            })
            .await
    }

    pub async fn bitmap_contains<T: Persistable>(
        &self,
        index_name: &str,
        partition: &Partition,
        group: &[Value],
        value: i64,
    ) -> Result<bool> {
        let container = self.container_for::<T>(partition)?;
        let (name, group) = (index_name.to_string(), group.to_vec());
        self.db
            .run(move |txn| {
                let (container, name, group) = (container.clone(), name.clone(), group.clone());
                async move { crate::index::bitmap::BitmapReader::new(&txn, &container, &name)?.contains(&group, value).await }
            })
            .await
    }

    pub async fn bitmap_cardinality<T: Persistable>(&self, index_name: &str, partition: &Partition, group: &[Value]) -> Result<u64> {
        let container = self.container_for::<T>(partition)?;
        let (name, group) = (index_name.to_string(), group.to_vec());
        self.db
            .run(move |txn| {
                let (container, name, group) = (container.clone(), name.clone(), group.clone());
                async move { crate::index::bitmap::BitmapReader::new(&txn, &container, &name)?.cardinality(&group).await }
            })
            .await
    }

    pub async fn history_series<T: Persistable>(
        &self,
        index_name: &str,
        partition: &Partition,
        id: &[Value],
    ) -> Result<Vec<crate::index::history::HistoryEntry>> {
        let container = self.container_for::<T>(partition)?;
        let (name, id) = (index_name.to_string(), id.to_vec());
        self.db
            .run(move |txn| {
                let (container, name, id) = (container.clone(), name.clone(), id.clone());
                async move { crate::index::history::HistoryReader::new(&txn, &container, &name)?.series(&id).await }
            })
            .await
    }

    pub async fn history_at_version<T: Persistable>(
        &self,
        index_name: &str,
        partition: &Partition,
        id: &[Value],
        version: u64,
    ) -> Result<Option<crate::index::history::HistoryEntry>> {
        let container = self.container_for::<T>(partition)?;
        let (name, id) = (index_name.to_string(), id.to_vec());
        self.db
            .run(move |txn| {
                let (container, name, id) = (container.clone(), name.clone(), id.clone());
                async move { crate::index::history::HistoryReader::new(&txn, &container, &name)?.at_version(&id, version).await }
            })
            .await
    }
}

fn split_score(mut element: Vec<Value>) -> (Value, Vec<Value>) {
    let id = element.split_off(1);
    (element.pop().unwrap_or(Value::Null), id)
}
