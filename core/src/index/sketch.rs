//! Probabilistic aggregates: distinct-count and percentile sketches.
//!
//! Distinct uses a stochastic-averaging Flajolet-Martin sketch: 64 bitmap
//! registers, one bit set per observation through an atomic bit-or, so
//! concurrent updates need no read and never conflict. Percentile keeps a
//! bounded list of (mean, weight) centroids merged on insert; updates are
//! read-modify-write and carry the write conflict that implies.

use super::{IndexContext, IndexMaintainer};
use crate::error::{Error, Result};
use crate::schema::RecordValues;
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::tuple;
use crate::value::Value;
use async_trait::async_trait;
use lamina_kv::AtomicOp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const FM_REGISTERS: usize = 64;
const FM_BYTES: usize = FM_REGISTERS * 8;
/// Stochastic-averaging correction factor.
const FM_PHI: f64 = 0.77351;

const MAX_CENTROIDS: usize = 64;

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn group_of(ctx: &IndexContext<'_>, record: &RecordValues) -> Vec<Value> {
    ctx.index.group_paths().iter().map(|path| record.get_or_null(path)).collect()
}

fn observed_value(ctx: &IndexContext<'_>, record: &RecordValues) -> Option<Value> {
    let value = record.get_or_null(ctx.index.value_path()?);
    (!value.is_null()).then_some(value)
}

pub struct DistinctMaintainer;

impl DistinctMaintainer {
    fn sketch_key(ctx: &IndexContext<'_>, group: &[Value]) -> Result<Vec<u8>> { ctx.index_space()?.pack(group) }

    fn observation_param(value: &Value) -> Result<Vec<u8>> {
        let hash = fnv1a64(&tuple::pack_one(value)?);
        let register = (hash & (FM_REGISTERS as u64 - 1)) as usize;
        let rank = ((hash >> 6).trailing_zeros() as usize).min(63);
        let mut param = vec![0u8; FM_BYTES];
        let bit = register * 64 + rank;
        param[bit / 8] = 1 << (bit % 8);
        Ok(param)
    }
}

#[async_trait]
impl IndexMaintainer for DistinctMaintainer {
    async fn update(&self, ctx: &IndexContext<'_>, _id: &[Value], old: Option<&RecordValues>, new: Option<&RecordValues>) -> Result<()> {
        // A sketch cannot retract observations; only the new version feeds it.
        let record = match new {
            Some(record) => record,
            None => return Ok(()),
        };
        let value = match observed_value(ctx, record) {
            Some(value) => value,
            None => return Ok(()),
        };
        if let Some(previous) = old.and_then(|record| observed_value(ctx, record)) {
            if previous == value && group_of(ctx, old.unwrap()) == group_of(ctx, record) {
                return Ok(());
            }
        }
        let key = Self::sketch_key(ctx, &group_of(ctx, record))?;
        ctx.txn.atomic_op(&key, &Self::observation_param(&value)?, AtomicOp::BitOr)
    }

    fn expected_keys(&self, _ctx: &IndexContext<'_>, _id: &[Value], _record: &RecordValues) -> Result<BTreeSet<Vec<u8>>> {
        Ok(BTreeSet::new())
    }
}

/// Estimate the number of distinct observed values in a group.
pub async fn estimate_distinct(txn: &Transaction, container: &Subspace, index_name: &str, group: &[Value]) -> Result<f64> {
    let key = container.subspace(&[Value::from("I"), Value::from(index_name)])?.pack(group)?;
    let raw = match txn.get_snapshot(&key).await? {
        Some(raw) => raw,
        None => return Ok(0.0),
    };
    if raw.len() != FM_BYTES {
        return Err(Error::corrupt("malformed distinct sketch"));
    }
    let mut rank_sum = 0u32;
    for register in 0..FM_REGISTERS {
        let bits = u64::from_le_bytes(raw[register * 8..register * 8 + 8].try_into().unwrap());
        rank_sum += bits.trailing_ones();
    }
    let mean_rank = rank_sum as f64 / FM_REGISTERS as f64;
    Ok(FM_REGISTERS as f64 / FM_PHI * 2f64.powf(mean_rank))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Centroid {
    mean: f64,
    weight: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Digest {
    centroids: Vec<Centroid>,
}

impl Digest {
    fn add(&mut self, value: f64) {
        let position = self.centroids.partition_point(|c| c.mean < value);
        self.centroids.insert(position, Centroid { mean: value, weight: 1 });
        if self.centroids.len() > MAX_CENTROIDS {
            self.compress();
        }
    }

    fn remove(&mut self, value: f64) {
        // Best-effort retraction: shed one unit of weight from the nearest
        // centroid.
        if let Some(nearest) = (0..self.centroids.len()).min_by(|&a, &b| {
            let da = (self.centroids[a].mean - value).abs();
            let db = (self.centroids[b].mean - value).abs();
            da.total_cmp(&db)
        }) {
            if self.centroids[nearest].weight <= 1 {
                self.centroids.remove(nearest);
            } else {
                self.centroids[nearest].weight -= 1;
            }
        }
    }

    /// Merge the pair of adjacent centroids with the closest means.
    fn compress(&mut self) {
        while self.centroids.len() > MAX_CENTROIDS {
            let mut best = 0;
            let mut best_gap = f64::INFINITY;
            for i in 0..self.centroids.len() - 1 {
                let gap = self.centroids[i + 1].mean - self.centroids[i].mean;
                if gap < best_gap {
                    best_gap = gap;
                    best = i;
                }
            }
            let right = self.centroids.remove(best + 1);
            let left = &mut self.centroids[best];
            let total = left.weight + right.weight;
            left.mean = (left.mean * left.weight as f64 + right.mean * right.weight as f64) / total as f64;
            left.weight = total;
        }
    }

    fn total_weight(&self) -> u64 { self.centroids.iter().map(|c| c.weight).sum() }

    fn quantile(&self, q: f64) -> Option<f64> {
        let total = self.total_weight();
        if total == 0 {
            return None;
        }
        let target = q.clamp(0.0, 1.0) * (total - 1) as f64;
        let mut cumulative = 0f64;
        for centroid in &self.centroids {
            let next = cumulative + centroid.weight as f64;
            if target < next {
                return Some(centroid.mean);
            }
            cumulative = next;
        }
        self.centroids.last().map(|c| c.mean)
    }
}

pub struct PercentileMaintainer;

impl PercentileMaintainer {
    fn digest_key(ctx: &IndexContext<'_>, group: &[Value]) -> Result<Vec<u8>> { ctx.index_space()?.pack(group) }

    fn numeric(value: &Value) -> Option<f64> { value.as_float() }
}

#[async_trait]
impl IndexMaintainer for PercentileMaintainer {
    async fn update(&self, ctx: &IndexContext<'_>, _id: &[Value], old: Option<&RecordValues>, new: Option<&RecordValues>) -> Result<()> {
        let old_obs = old.and_then(|r| observed_value(ctx, r).and_then(|v| Self::numeric(&v).map(|n| (group_of(ctx, r), n))));
        let new_obs = new.and_then(|r| observed_value(ctx, r).and_then(|v| Self::numeric(&v).map(|n| (group_of(ctx, r), n))));
        if old_obs == new_obs {
            return Ok(());
        }

        let mut touched: Vec<&Vec<Value>> = Vec::new();
        for group in [old_obs.as_ref().map(|(g, _)| g), new_obs.as_ref().map(|(g, _)| g)].into_iter().flatten() {
            if !touched.contains(&group) {
                touched.push(group);
            }
        }
        for group in touched {
            let key = Self::digest_key(ctx, group)?;
            let mut digest: Digest = match ctx.txn.get(&key).await? {
                Some(raw) => bincode::deserialize(&raw)?,
                None => Digest::default(),
            };
            if let Some((g, value)) = &old_obs {
                if g == group {
                    digest.remove(*value);
                }
            }
            if let Some((g, value)) = &new_obs {
                if g == group {
                    digest.add(*value);
                }
            }
            ctx.txn.set(&key, &bincode::serialize(&digest)?)?;
        }
        Ok(())
    }

    fn expected_keys(&self, _ctx: &IndexContext<'_>, _id: &[Value], _record: &RecordValues) -> Result<BTreeSet<Vec<u8>>> {
        Ok(BTreeSet::new())
    }
}

/// Approximate `q`-quantile of a group's observed values.
pub async fn estimate_percentile(txn: &Transaction, container: &Subspace, index_name: &str, group: &[Value], q: f64) -> Result<Option<f64>> {
    let key = container.subspace(&[Value::from("I"), Value::from(index_name)])?.pack(group)?;
    match txn.get_snapshot(&key).await? {
        Some(raw) => {
            let digest: Digest = bincode::deserialize(&raw)?;
            Ok(digest.quantile(q))
        }
        None => Ok(None),
    }
}
