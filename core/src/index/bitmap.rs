//! Bitmap index: a set of integers per group, containerized by the high bits
//! of the value.
//!
//! Each container covers one 65536-value span (`value >> 16`) and is stored
//! at `S/I/<name>/<group…>/<high>` in whichever representation is smallest
//! on write: a sorted array of low 16-bit values, a run list, or a packed
//! 8 KiB bitset. Mutation is read-modify-write on a single container.

use super::{IndexContext, IndexMaintainer};
use crate::error::{Error, Result};
use crate::schema::RecordValues;
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::value::Value;
use async_trait::async_trait;
use lamina_kv::RangeOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Container {
    /// Sorted low 16-bit members.
    Array(Vec<u16>),
    /// `(start, length - 1)` runs, sorted.
    Runs(Vec<(u16, u16)>),
    /// 65536-bit set.
    Bitmap(Vec<u8>),
}

impl Container {
    fn members(&self) -> Vec<u16> {
        match self {
            Container::Array(members) => members.clone(),
            Container::Runs(runs) => {
                runs.iter().flat_map(|&(start, len)| (0..=len).map(move |i| start + i)).collect()
            }
            Container::Bitmap(bits) => {
                (0..=u16::MAX).filter(|&v| bits[(v / 8) as usize] & (1 << (v % 8)) != 0).collect()
            }
        }
    }

    fn contains(&self, low: u16) -> bool {
        match self {
            Container::Array(members) => members.binary_search(&low).is_ok(),
            Container::Runs(runs) => runs.iter().any(|&(start, len)| low >= start && low - start <= len),
            Container::Bitmap(bits) => bits[(low / 8) as usize] & (1 << (low % 8)) != 0,
        }
    }

    fn cardinality(&self) -> u64 {
        match self {
            Container::Array(members) => members.len() as u64,
            Container::Runs(runs) => runs.iter().map(|&(_, len)| len as u64 + 1).sum(),
            Container::Bitmap(bits) => bits.iter().map(|b| b.count_ones() as u64).sum(),
        }
    }

    /// Re-encode the member set in its smallest representation.
    fn canonical(members: Vec<u16>) -> Option<Container> {
        if members.is_empty() {
            return None;
        }

        let mut runs: Vec<(u16, u16)> = Vec::new();
        for &member in &members {
            match runs.last_mut() {
                Some((start, len)) if member as u32 == *start as u32 + *len as u32 + 1 => *len += 1,
                _ => runs.push((member, 0)),
            }
        }

        let array_cost = 4 + members.len() * 2;
        let runs_cost = 4 + runs.len() * 4;
        let bitmap_cost = 4 + 8192;
        if runs_cost <= array_cost && runs_cost <= bitmap_cost {
            Some(Container::Runs(runs))
        } else if array_cost <= bitmap_cost {
            Some(Container::Array(members))
        } else {
            let mut bits = vec![0u8; 8192];
            for member in members {
                bits[(member / 8) as usize] |= 1 << (member % 8);
            }
            Some(Container::Bitmap(bits))
        }
    }
}

fn split(value: i64) -> (i64, u16) { (value >> 16, (value & 0xffff) as u16) }

pub struct BitmapMaintainer;

impl BitmapMaintainer {
    fn member_of(ctx: &IndexContext<'_>, record: &RecordValues) -> Option<(Vec<Value>, i64)> {
        let group: Vec<Value> = ctx.index.group_paths().iter().map(|path| record.get_or_null(path)).collect();
        let value = record.get_or_null(ctx.index.value_path()?).as_int()?;
        Some((group, value))
    }

    fn container_key(ctx: &IndexContext<'_>, group: &[Value], high: i64) -> Result<Vec<u8>> {
        let mut elements = group.to_vec();
        elements.push(Value::Int(high));
        ctx.index_space()?.pack(&elements)
    }

    async fn mutate(ctx: &IndexContext<'_>, group: &[Value], value: i64, insert: bool) -> Result<()> {
        let (high, low) = split(value);
        let key = Self::container_key(ctx, group, high)?;
        let members = match ctx.txn.get(&key).await? {
            Some(raw) => {
                let container: Container = bincode::deserialize(&raw)?;
                container.members()
            }
            None => Vec::new(),
        };

        let mut set: BTreeSet<u16> = members.into_iter().collect();
        let changed = if insert { set.insert(low) } else { set.remove(&low) };
        if !changed {
            return Ok(());
        }
        match Container::canonical(set.into_iter().collect()) {
            Some(container) => ctx.txn.set(&key, &bincode::serialize(&container)?),
            None => ctx.txn.clear(&key),
        }
    }
}

#[async_trait]
impl IndexMaintainer for BitmapMaintainer {
    async fn update(&self, ctx: &IndexContext<'_>, _id: &[Value], old: Option<&RecordValues>, new: Option<&RecordValues>) -> Result<()> {
        let old_member = old.and_then(|record| Self::member_of(ctx, record));
        let new_member = new.and_then(|record| Self::member_of(ctx, record));
        if old_member == new_member {
            return Ok(());
        }
        if let Some((group, value)) = old_member {
            Self::mutate(ctx, &group, value, false).await?;
        }
        if let Some((group, value)) = new_member {
            Self::mutate(ctx, &group, value, true).await?;
        }
        Ok(())
    }

    fn expected_keys(&self, ctx: &IndexContext<'_>, _id: &[Value], record: &RecordValues) -> Result<BTreeSet<Vec<u8>>> {
        match Self::member_of(ctx, record) {
            Some((group, value)) => Ok(BTreeSet::from([Self::container_key(ctx, &group, split(value).0)?])),
            None => Ok(BTreeSet::new()),
        }
    }
}

pub struct BitmapReader<'a> {
    txn: &'a Transaction,
    space: Subspace,
}

impl<'a> BitmapReader<'a> {
    pub fn new(txn: &'a Transaction, container: &Subspace, index_name: &str) -> Result<Self> {
        Ok(Self { txn, space: container.subspace(&[Value::from("I"), Value::from(index_name)])? })
    }

    pub async fn contains(&self, group: &[Value], value: i64) -> Result<bool> {
        let (high, low) = split(value);
        let mut elements = group.to_vec();
        elements.push(Value::Int(high));
        match self.txn.get_snapshot(&self.space.pack(&elements)?).await? {
            Some(raw) => {
                let container: Container = bincode::deserialize(&raw)?;
                Ok(container.contains(low))
            }
            None => Ok(false),
        }
    }

    pub async fn cardinality(&self, group: &[Value]) -> Result<u64> {
        let group_space = self.space.subspace(group)?;
        let (begin, end) = group_space.range();
        let mut total = 0u64;
        for entry in self.txn.get_range(&begin, &end, RangeOptions::default().snapshot()).await? {
            let container: Container = bincode::deserialize(&entry.value)?;
            total += container.cardinality();
        }
        Ok(total)
    }

    /// All members of a group, ascending. Intended for modest sets and
    /// verification, not bulk export.
    pub async fn members(&self, group: &[Value]) -> Result<Vec<i64>> {
        let group_space = self.space.subspace(group)?;
        let (begin, end) = group_space.range();
        let mut out = Vec::new();
        for entry in self.txn.get_range(&begin, &end, RangeOptions::default().snapshot()).await? {
            let elements = group_space.unpack(&entry.key)?;
            let high = elements
                .first()
                .and_then(Value::as_int)
                .ok_or_else(|| Error::corrupt("bitmap container key missing high bits"))?;
            let container: Container = bincode::deserialize(&entry.value)?;
            out.extend(container.members().into_iter().map(|low| (high << 16) | low as i64));
        }
        Ok(out)
    }
}
