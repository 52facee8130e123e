//! Plan execution over the KV store.
//!
//! Operators produce `Row`s carrying the record id plus whatever field
//! values the access path already yielded (index key columns, covering
//! stored fields, the primary key). Records are deserialized lazily: a
//! post-filter or sort touching uncovered fields triggers the record fetch,
//! otherwise index-only execution carries through. Union and intersection
//! children run as concurrently-joined cooperative tasks; a failing child
//! cancels its siblings at the join.

use super::plan::{PlanNode, ScanRange, SortSpec};
use super::predicate::TextOp;
use crate::envelope;
use crate::error::{Error, Result};
use crate::index::spatial::{search_bbox, Point};
use crate::index::text::TextReader;
use crate::index::vector;
use crate::schema::{Persistable, RecordValues, TypeDescriptor};
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::value::Value;
use futures::future::BoxFuture;
use futures::FutureExt;
use lamina_kv::strinc;
use std::collections::HashSet;
use std::marker::PhantomData;

pub struct Row<T> {
    pub id: Vec<Value>,
    pub record: Option<T>,
    pub values: Option<RecordValues>,
}

pub struct Executor<'a, T: Persistable> {
    txn: &'a Transaction,
    container: &'a Subspace,
    descriptor: &'a TypeDescriptor,
    _marker: PhantomData<T>,
}

impl<'a, T: Persistable> Executor<'a, T> {
    pub fn new(txn: &'a Transaction, container: &'a Subspace, descriptor: &'a TypeDescriptor) -> Self {
        Self { txn, container, descriptor, _marker: PhantomData }
    }

    /// Execute and return full records in plan order.
    pub async fn execute_records(&self, plan: &PlanNode) -> Result<Vec<(Vec<Value>, T)>> {
        let rows = self.exec(plan).await?;
        let mut out = Vec::with_capacity(rows.len());
        for mut row in rows {
            if row.record.is_none() {
                row = self.fetch_record(row).await?;
            }
            match row.record {
                Some(record) => out.push((row.id, record)),
                // The record vanished between index read and fetch within
                // this transaction's view; index and record are maintained
                // atomically, so this is corruption.
                None => return Err(Error::corrupt("index entry references a missing record")),
            }
        }
        Ok(out)
    }

    /// Execute and return only ids, never fetching records that the plan
    /// itself did not need.
    pub async fn execute_ids(&self, plan: &PlanNode) -> Result<Vec<Vec<Value>>> {
        Ok(self.exec(plan).await?.into_iter().map(|row| row.id).collect())
    }

    fn record_key(&self, id: &[Value]) -> Result<Vec<u8>> {
        let mut elements = vec![Value::from("R"), Value::from(self.descriptor.type_name.as_str())];
        elements.extend_from_slice(id);
        self.container.pack(&elements)
    }

    fn record_space(&self) -> Result<Subspace> {
        self.container.subspace(&[Value::from("R"), Value::from(self.descriptor.type_name.as_str())])
    }

    fn index_space(&self, index: &str) -> Result<Subspace> { self.container.subspace(&[Value::from("I"), Value::from(index)]) }

    async fn fetch_record(&self, mut row: Row<T>) -> Result<Row<T>> {
        if let Some(payload) = envelope::read(self.txn, &self.record_key(&row.id)?, false).await? {
            let record: T = bincode::deserialize(&payload)?;
            row.values = Some(RecordValues::extract(&record));
            row.record = Some(record);
        }
        Ok(row)
    }

    async fn ensure_values(&self, row: Row<T>, fields: &[String]) -> Result<Row<T>> {
        let covered = row
            .values
            .as_ref()
            .map(|values| fields.iter().all(|f| values.get(f).is_some()))
            .unwrap_or(false);
        if covered || row.record.is_some() {
            return Ok(row);
        }
        self.fetch_record(row).await
    }

    /// Parse one index entry into a row. The entry key yields the key
    /// columns and the id; the entry value yields covering stored fields.
    fn entry_row(&self, index_name: &str, key: &[u8], value: &[u8]) -> Result<Row<T>> {
        let index = self
            .descriptor
            .index_named(index_name)
            .ok_or_else(|| Error::UnknownIndex(index_name.to_string()))?;
        let elements = self.index_space(index_name)?.unpack(key)?;
        if elements.len() != index.key_paths.len() + self.descriptor.primary_key.len() {
            return Err(Error::corrupt(format!("index {index_name} entry has unexpected arity")));
        }
        let (columns, id) = elements.split_at(index.key_paths.len());

        let mut pairs: Vec<(String, Value)> = index.key_paths.iter().cloned().zip(columns.iter().cloned()).collect();
        pairs.extend(self.descriptor.primary_key.iter().cloned().zip(id.iter().cloned()));
        if !index.stored_fields.is_empty() && !value.is_empty() {
            let stored = crate::tuple::unpack(value)?;
            if stored.len() == index.stored_fields.len() {
                pairs.extend(index.stored_fields.iter().cloned().zip(stored));
            }
        }
        Ok(Row { id: id.to_vec(), record: None, values: Some(RecordValues::from_pairs(pairs)) })
    }

    fn exec<'b>(&'b self, node: &'b PlanNode) -> BoxFuture<'b, Result<Vec<Row<T>>>> {
        async move {
            match node {
                PlanNode::FullScan => self.exec_full_scan().await,
                PlanNode::IndexSeek { index, seeks } => self.exec_seeks(index, seeks).await,
                PlanNode::IndexScan { index, range, reverse } => self.exec_scan(index, range, *reverse).await,
                PlanNode::Union { children, deduplicate } => {
                    let results = futures::future::try_join_all(children.iter().map(|child| self.exec(child))).await?;
                    let mut seen: HashSet<Vec<Value>> = HashSet::new();
                    let mut out = Vec::new();
                    for rows in results {
                        for row in rows {
                            if !deduplicate || seen.insert(row.id.clone()) {
                                out.push(row);
                            }
                        }
                    }
                    Ok(out)
                }
                PlanNode::Intersection { children } => {
                    let mut results = futures::future::try_join_all(children.iter().map(|child| self.exec(child))).await?;
                    if results.is_empty() {
                        return Ok(Vec::new());
                    }
                    let first = results.remove(0);
                    let rest: Vec<HashSet<Vec<Value>>> =
                        results.into_iter().map(|rows| rows.into_iter().map(|row| row.id).collect()).collect();
                    let mut seen = HashSet::new();
                    Ok(first
                        .into_iter()
                        .filter(|row| rest.iter().all(|ids| ids.contains(&row.id)) && seen.insert(row.id.clone()))
                        .collect())
                }
                PlanNode::Filter { child, predicate } => {
                    let rows = self.exec(child).await?;
                    let mut fields = Vec::new();
                    predicate.referenced_fields(&mut fields);
                    let mut out = Vec::with_capacity(rows.len());
                    for row in rows {
                        let row = self.ensure_values(row, &fields).await?;
                        let matched = match (&row.values, &row.record) {
                            (Some(values), _) => predicate.evaluate(values)?,
                            (None, _) => false,
                        };
                        if matched {
                            out.push(row);
                        }
                    }
                    Ok(out)
                }
                PlanNode::Sort { child, order } => {
                    let rows = self.exec(child).await?;
                    let fields: Vec<String> = order.iter().map(|s| s.field.clone()).collect();
                    let mut hydrated = Vec::with_capacity(rows.len());
                    for row in rows {
                        hydrated.push(self.ensure_values(row, &fields).await?);
                    }
                    hydrated.sort_by(|a, b| compare_rows(a, b, order));
                    Ok(hydrated)
                }
                PlanNode::Limit { child, limit, offset } => {
                    let mut rows = self.exec(child).await?;
                    let mut rows = if *offset >= rows.len() { Vec::new() } else { rows.split_off(*offset) };
                    if let Some(limit) = limit {
                        rows.truncate(*limit);
                    }
                    Ok(rows)
                }
                PlanNode::FullTextScan { index, op, query } => {
                    let reader = TextReader::new(self.txn, self.container, index)?;
                    let ids = match op {
                        TextOp::All => reader.search_and(query).await?,
                        TextOp::Any => reader.search_or(query).await?,
                        TextOp::Phrase => reader.search_phrase(query).await?,
                    };
                    Ok(ids.into_iter().map(|id| Row { id, record: None, values: None }).collect())
                }
                PlanNode::VectorSearch { index, target, k } => {
                    let descriptor = self
                        .descriptor
                        .index_named(index)
                        .ok_or_else(|| Error::UnknownIndex(index.clone()))?;
                    let options = descriptor
                        .config
                        .vector
                        .as_ref()
                        .ok_or_else(|| Error::Schema(format!("vector index {index} has no options")))?;
                    let found = vector::nearest(self.txn, self.container, index, options, target, *k).await?;
                    Ok(found.into_iter().map(|(_, id)| Row { id, record: None, values: None }).collect())
                }
                PlanNode::SpatialScan { index, min, max } => {
                    let descriptor = self
                        .descriptor
                        .index_named(index)
                        .ok_or_else(|| Error::UnknownIndex(index.clone()))?;
                    let ids = search_bbox(
                        self.txn,
                        self.container,
                        index,
                        &descriptor.config.spatial_levels,
                        Point::new(min.0, min.1),
                        Point::new(max.0, max.1),
                    )
                    .await?;
                    Ok(ids.into_iter().map(|id| Row { id, record: None, values: None }).collect())
                }
            }
        }
        .boxed()
    }

    async fn exec_full_scan(&self) -> Result<Vec<Row<T>>> {
        let space = self.record_space()?;
        let (begin, end) = space.range();
        let mut scan = self.txn.range_scan(begin, end, crate::transaction::ScanOptions::default());
        let mut out = Vec::new();
        while let Some(entry) = scan.next().await? {
            let id = space.unpack(&entry.key)?;
            let payload = envelope::decode_body(self.txn, &entry.value, false).await?;
            let record: T = bincode::deserialize(&payload)?;
            let values = RecordValues::extract(&record);
            out.push(Row { id, record: Some(record), values: Some(values) });
        }
        Ok(out)
    }

    async fn exec_seeks(&self, index_name: &str, seeks: &[Vec<Value>]) -> Result<Vec<Row<T>>> {
        let space = self.index_space(index_name)?;
        let mut ordered: Vec<&Vec<Value>> = seeks.iter().collect();
        ordered.sort();
        let mut out = Vec::new();
        for seek in ordered {
            let seek_space = space.subspace(seek)?;
            let (begin, end) = seek_space.range();
            let mut scan = self.txn.range_scan(begin, end, crate::transaction::ScanOptions::default());
            while let Some(entry) = scan.next().await? {
                out.push(self.entry_row(index_name, &entry.key, &entry.value)?);
            }
        }
        Ok(out)
    }

    async fn exec_scan(&self, index_name: &str, range: &ScanRange, reverse: bool) -> Result<Vec<Row<T>>> {
        let space = self.index_space(index_name)?.subspace(&range.prefix)?;
        let (mut begin, mut end) = space.range();
        if let Some(low) = &range.low {
            let bound = space.pack_one(&low.value)?;
            begin = if low.inclusive { bound } else { strinc(&bound) };
        }
        if let Some(high) = &range.high {
            let bound = space.pack_one(&high.value)?;
            end = if high.inclusive { strinc(&bound) } else { bound };
        }

        let opts = if reverse { crate::transaction::ScanOptions::default().reversed() } else { crate::transaction::ScanOptions::default() };
        let mut scan = self.txn.range_scan(begin, end, opts);
        let mut out = Vec::new();
        while let Some(entry) = scan.next().await? {
            out.push(self.entry_row(index_name, &entry.key, &entry.value)?);
        }
        Ok(out)
    }
}

fn compare_rows<T>(a: &Row<T>, b: &Row<T>, order: &[SortSpec]) -> std::cmp::Ordering {
    for spec in order {
        let left = a.values.as_ref().and_then(|v| v.get(&spec.field).cloned()).unwrap_or(Value::Null);
        let right = b.values.as_ref().and_then(|v| v.get(&spec.field).cloned()).unwrap_or(Value::Null);
        let ordering = left.cmp(&right);
        let ordering = if spec.descending { ordering.reverse() } else { ordering };
        if ordering != std::cmp::Ordering::Equal {
            return ordering;
        }
    }
    a.id.cmp(&b.id)
}
