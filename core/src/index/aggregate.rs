//! Keyed aggregates maintained by atomic mutations: count, sum, min, max,
//! average.
//!
//! Count and sum are pure atomic adds (delete emits the negation) and never
//! read. Average is two adds, sum and count, divided at read time. Min and
//! max are atomic byte-order min/max over a sign-biased encoding; deleting
//! the current extremum recomputes the group from a backing ordered value
//! index, and is refused when none is configured.

use super::{IndexContext, IndexMaintainer};
use crate::error::{Error, Result};
use crate::schema::index::{IndexDescriptor, IndexKind};
use crate::schema::RecordValues;
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::value::Value;
use async_trait::async_trait;
use lamina_kv::{AtomicOp, RangeOptions};
use std::collections::BTreeSet;

/// Order-preserving bias of `i64` into `u64`, so the KV store's unsigned
/// little-endian min/max agrees with signed comparison.
fn bias(v: i64) -> u64 { (v ^ i64::MIN) as u64 }

fn unbias(v: u64) -> i64 { (v as i64) ^ i64::MIN }

fn decode_i64(raw: &[u8]) -> Result<i64> {
    raw.try_into().map(i64::from_le_bytes).map_err(|_| Error::corrupt("malformed aggregate counter"))
}

fn decode_u64(raw: &[u8]) -> Result<u64> {
    raw.try_into().map(u64::from_le_bytes).map_err(|_| Error::corrupt("malformed aggregate extremum"))
}

struct Contribution {
    group: Vec<Value>,
    value: Option<i64>,
}

pub struct AggregateMaintainer;

impl AggregateMaintainer {
    fn contribution(index: &IndexDescriptor, record: &RecordValues) -> Option<Contribution> {
        let group: Vec<Value> = index.group_paths().iter().map(|path| record.get_or_null(path)).collect();
        if index.kind == IndexKind::Count {
            return Some(Contribution { group, value: None });
        }
        // A null value column contributes nothing to the aggregate.
        let value = record.get_or_null(index.value_path()?).as_int()?;
        Some(Contribution { group, value: Some(value) })
    }

    fn group_key(ctx: &IndexContext<'_>, group: &[Value]) -> Result<Vec<u8>> { ctx.index_space()?.pack(group) }

    fn avg_keys(ctx: &IndexContext<'_>, group: &[Value]) -> Result<(Vec<u8>, Vec<u8>)> {
        let space = ctx.index_space()?.subspace(group)?;
        Ok((space.pack_one(&Value::from("sum"))?, space.pack_one(&Value::from("count"))?))
    }

    async fn apply(&self, ctx: &IndexContext<'_>, id: &[Value], contribution: &Contribution, sign: i64) -> Result<()> {
        match ctx.index.kind {
            IndexKind::Count => ctx.txn.atomic_add(&Self::group_key(ctx, &contribution.group)?, sign),
            IndexKind::Sum => ctx.txn.atomic_add(&Self::group_key(ctx, &contribution.group)?, sign * contribution.value.unwrap_or(0)),
            IndexKind::Average => {
                let (sum_key, count_key) = Self::avg_keys(ctx, &contribution.group)?;
                ctx.txn.atomic_add(&sum_key, sign * contribution.value.unwrap_or(0))?;
                ctx.txn.atomic_add(&count_key, sign)
            }
            IndexKind::Min | IndexKind::Max => {
                let value = contribution.value.unwrap_or(0);
                if sign > 0 {
                    let op = if ctx.index.kind == IndexKind::Min { AtomicOp::Min } else { AtomicOp::Max };
                    ctx.txn.atomic_op(&Self::group_key(ctx, &contribution.group)?, &bias(value).to_le_bytes(), op)
                } else {
                    self.retract_extremum(ctx, id, contribution, value).await
                }
            }
            other => Err(Error::Schema(format!("aggregate maintainer dispatched for {}", other.label()))),
        }
    }

    /// Deletion path for min/max. When the removed value did not equal the
    /// stored extremum the aggregate is untouched; otherwise the group is
    /// recomputed from the backing value index, excluding the departing id.
    async fn retract_extremum(&self, ctx: &IndexContext<'_>, id: &[Value], contribution: &Contribution, value: i64) -> Result<()> {
        let key = Self::group_key(ctx, &contribution.group)?;
        let current = match ctx.txn.get(&key).await? {
            Some(raw) => unbias(decode_u64(&raw)?),
            None => return Ok(()),
        };
        if current != value {
            return Ok(());
        }

        let backing_name = ctx.index.config.backing_index.as_ref().ok_or_else(|| Error::UnsupportedAggregationDelete {
            index: ctx.index.name.clone(),
            kind: ctx.index.kind.label(),
        })?;
        let backing = ctx
            .descriptor
            .index_named(backing_name)
            .ok_or_else(|| Error::UnknownIndex(backing_name.clone()))?;
        let backing_space = ctx
            .container
            .subspace(&[Value::from("I"), Value::from(backing.name.as_str())])?
            .subspace(&contribution.group)?;

        let (begin, end) = backing_space.range();
        let reverse = ctx.index.kind == IndexKind::Max;
        // The departing record's backing entry may still be present in this
        // transaction (maintainer order is not fixed), so skip its id.
        let entries = ctx.txn.get_range(&begin, &end, RangeOptions { limit: None, reverse, snapshot: false }).await?;
        let mut replacement: Option<i64> = None;
        for entry in entries {
            let elements = backing_space.unpack(&entry.key)?;
            let (entry_value, entry_id) = elements
                .split_first()
                .ok_or_else(|| Error::corrupt("backing index entry missing value column"))?;
            if entry_id == id {
                continue;
            }
            replacement = entry_value.as_int();
            break;
        }
        match replacement {
            Some(v) => ctx.txn.set(&key, &bias(v).to_le_bytes())?,
            None => ctx.txn.clear(&key)?,
        }
        Ok(())
    }
}

#[async_trait]
impl IndexMaintainer for AggregateMaintainer {
    async fn update(&self, ctx: &IndexContext<'_>, id: &[Value], old: Option<&RecordValues>, new: Option<&RecordValues>) -> Result<()> {
        let old_contribution = old.and_then(|record| Self::contribution(ctx.index, record));
        let new_contribution = new.and_then(|record| Self::contribution(ctx.index, record));

        if let (Some(a), Some(b)) = (&old_contribution, &new_contribution) {
            if a.group == b.group && a.value == b.value {
                return Ok(());
            }
        }
        if let Some(contribution) = &old_contribution {
            self.apply(ctx, id, contribution, -1).await?;
        }
        if let Some(contribution) = &new_contribution {
            self.apply(ctx, id, contribution, 1).await?;
        }
        Ok(())
    }

    fn expected_keys(&self, _ctx: &IndexContext<'_>, _id: &[Value], _record: &RecordValues) -> Result<BTreeSet<Vec<u8>>> {
        // Aggregates materialize shared group keys, not per-record entries.
        Ok(BTreeSet::new())
    }
}

/// Read side of the aggregate family.
pub struct AggregateReader<'a> {
    txn: &'a Transaction,
    container: Subspace,
    index: IndexDescriptor,
}

impl<'a> AggregateReader<'a> {
    pub fn new(txn: &'a Transaction, container: Subspace, index: IndexDescriptor) -> Self { Self { txn, container, index } }

    fn space(&self) -> Result<Subspace> { self.container.subspace(&[Value::from("I"), Value::from(self.index.name.as_str())]) }

    /// Snapshot read: aggregate reads never conflict with concurrent atomic
    /// mutations.
    pub async fn counter(&self, group: &[Value]) -> Result<i64> {
        match self.txn.get_snapshot(&self.space()?.pack(group)?).await? {
            Some(raw) => decode_i64(&raw),
            None => Ok(0),
        }
    }

    pub async fn extremum(&self, group: &[Value]) -> Result<Option<i64>> {
        match self.txn.get_snapshot(&self.space()?.pack(group)?).await? {
            Some(raw) => Ok(Some(unbias(decode_u64(&raw)?))),
            None => Ok(None),
        }
    }

    pub async fn average(&self, group: &[Value]) -> Result<Option<f64>> {
        let space = self.space()?.subspace(group)?;
        let sum = self.txn.get_snapshot(&space.pack_one(&Value::from("sum"))?).await?;
        let count = self.txn.get_snapshot(&space.pack_one(&Value::from("count"))?).await?;
        match (sum, count) {
            (Some(sum), Some(count)) => {
                let count = decode_i64(&count)?;
                if count == 0 {
                    return Ok(None);
                }
                Ok(Some(decode_i64(&sum)? as f64 / count as f64))
            }
            _ => Ok(None),
        }
    }
}
