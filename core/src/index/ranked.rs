//! Ranked index: a persistent skip list with per-level span counters.
//!
//! Every level's forward edges are KV entries under
//! `S/I/<name>/<level>/<score, id…>` whose value is the edge's span: the
//! number of level-0 elements in `[entry, next-entry-at-level)`. Each level
//! additionally materializes a head sentinel at the bare level key whose span
//! counts the elements before the first entry at that level. With the
//! sentinel present the head-insert case needs no special arithmetic, and the
//! per-level invariant is simply: the spans at any level sum to the element
//! count.
//!
//! Rank queries are answered in leaderboard order — rank 0 is the greatest
//! (score, id) — while the structure itself is kept ascending; the two views
//! differ only by `count - 1 - rank`.
//!
//! Concurrent inserts are serialized per-list by the KV store's conflict
//! detection on the descent's reads; the structure takes no locks of its own.

use super::{IndexContext, IndexMaintainer};
use crate::error::{Error, Result};
use crate::schema::RecordValues;
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::tuple;
use crate::value::Value;
use async_trait::async_trait;
use lamina_kv::RangeOptions;
use std::collections::BTreeSet;

pub const MAX_LEVEL: usize = 6;

/// Entries fetched per descent step. Expected occupancy per level step is the
/// fanout, so a small page almost always suffices.
const WALK_BATCH: usize = 32;

pub struct SkipList<'a> {
    txn: &'a Transaction,
    space: Subspace,
    fanout: u32,
}

struct Descent {
    /// Per level: (entry key, stored span, rank of the entry).
    update: Vec<(Vec<u8>, u64, u64)>,
    /// Elements strictly less than the target.
    target_rank: u64,
    /// Whether the level-0 predecessor is the head sentinel.
    at_head: bool,
}

fn decode_span(raw: &[u8]) -> Result<u64> {
    raw.try_into().map(u64::from_le_bytes).map_err(|_| Error::corrupt("malformed skip-list span"))
}

impl<'a> SkipList<'a> {
    pub fn new(txn: &'a Transaction, space: Subspace, fanout: u32) -> Self { Self { txn, space, fanout } }

    fn level_space(&self, level: usize) -> Result<Subspace> { self.space.subspace(&[Value::Int(level as i64)]) }

    fn head_key(&self, level: usize) -> Result<Vec<u8>> { Ok(self.level_space(level)?.prefix().to_vec()) }

    fn entry_key(&self, level: usize, element: &[u8]) -> Result<Vec<u8>> {
        let mut key = self.head_key(level)?;
        key.extend_from_slice(element);
        Ok(key)
    }

    /// Create the head sentinels if this list has never been written.
    async fn ensure_initialized(&self) -> Result<()> {
        if self.txn.get(&self.head_key(0)?).await?.is_some() {
            return Ok(());
        }
        for level in 0..MAX_LEVEL {
            self.txn.set(&self.head_key(level)?, &0u64.to_le_bytes())?;
        }
        Ok(())
    }

    async fn span_at(&self, key: &[u8]) -> Result<Option<u64>> {
        match self.txn.get(key).await? {
            Some(raw) => Ok(Some(decode_span(&raw)?)),
            None => Ok(None),
        }
    }

    /// Walk from the top level down to level 0, recording the rightmost entry
    /// strictly left of `element` at every level, with its stored span and
    /// rank.
    async fn descend(&self, element: &[u8]) -> Result<Descent> {
        let mut update = vec![(Vec::new(), 0u64, 0u64); MAX_LEVEL];
        let mut pos_element: Vec<u8> = Vec::new();
        let mut rank: u64 = 0;

        for level in (0..MAX_LEVEL).rev() {
            let mut pos_key = self.entry_key(level, &pos_element)?;
            let mut pos_span = self
                .span_at(&pos_key)
                .await?
                .ok_or_else(|| Error::corrupt("skip-list position vanished during descent"))?;

            'walk: loop {
                let mut begin = pos_key.clone();
                begin.push(0x00);
                let end = self.entry_key(level, element)?;
                if begin >= end {
                    break 'walk;
                }
                let batch = self.txn.get_range(&begin, &end, RangeOptions::limit(WALK_BATCH)).await?;
                let exhausted = batch.len() < WALK_BATCH;
                for entry in batch {
                    rank += pos_span;
                    pos_span = decode_span(&entry.value)?;
                    pos_element = entry.key[self.head_key(level)?.len()..].to_vec();
                    pos_key = entry.key;
                }
                if exhausted {
                    break 'walk;
                }
            }
            update[level] = (pos_key, pos_span, rank);
        }

        let at_head = pos_element.is_empty();
        let target_rank = rank + if at_head { 0 } else { 1 };
        Ok(Descent { update, target_rank, at_head })
    }

    /// Geometric level draw: a node occupies levels `0..L` where each next
    /// level is reached with probability `1/fanout`.
    fn draw_level(&self) -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && rand::random::<u32>() % self.fanout == 0 {
            level += 1;
        }
        level
    }

    /// Insert `(score, id…)`. Re-inserting a present element is a no-op.
    pub async fn insert(&self, score_id: &[Value]) -> Result<()> {
        self.ensure_initialized().await?;
        let element = tuple::pack(score_id)?;
        if self.span_at(&self.entry_key(0, &element)?).await?.is_some() {
            return Ok(());
        }

        let descent = self.descend(&element).await?;
        let node_level = self.draw_level();
        let target_rank = descent.target_rank;

        for (level, (update_key, update_span, update_rank)) in descent.update.into_iter().enumerate() {
            if level < node_level {
                // Split the predecessor's interval at the new element.
                let left = target_rank - update_rank;
                let right = update_span + 1 - left;
                self.txn.set(&update_key, &left.to_le_bytes())?;
                self.txn.set(&self.entry_key(level, &element)?, &right.to_le_bytes())?;
            } else {
                // The element lands inside this interval without an entry.
                self.txn.set(&update_key, &(update_span + 1).to_le_bytes())?;
            }
        }
        Ok(())
    }

    /// Delete `(score, id…)`. Removing an absent element is a no-op.
    pub async fn delete(&self, score_id: &[Value]) -> Result<()> {
        self.ensure_initialized().await?;
        let element = tuple::pack(score_id)?;
        if self.span_at(&self.entry_key(0, &element)?).await?.is_none() {
            return Ok(());
        }

        let descent = self.descend(&element).await?;
        for (level, (update_key, update_span, _)) in descent.update.into_iter().enumerate() {
            let element_key = self.entry_key(level, &element)?;
            match self.span_at(&element_key).await? {
                Some(element_span) => {
                    // Merge the element's interval back into its predecessor.
                    self.txn.set(&update_key, &(update_span + element_span - 1).to_le_bytes())?;
                    self.txn.clear(&element_key)?;
                }
                None => {
                    self.txn.set(&update_key, &(update_span - 1).to_le_bytes())?;
                }
            }
        }
        Ok(())
    }

    /// Total element count: the spans of the sparsest level sum to it.
    pub async fn count(&self) -> Result<u64> {
        let (begin, end) = self.level_space(MAX_LEVEL - 1)?.range();
        let mut total = 0u64;
        let entries = self.txn.get_range(&begin, &end, RangeOptions::default()).await?;
        if entries.is_empty() {
            return Ok(0);
        }
        for entry in entries {
            total += decode_span(&entry.value)?;
        }
        Ok(total)
    }

    /// Elements strictly less than `(score, id…)` in ascending order, or
    /// `None` when the element is not present.
    pub async fn ascending_rank(&self, score_id: &[Value]) -> Result<Option<u64>> {
        let element = tuple::pack(score_id)?;
        if self.span_at(&self.entry_key(0, &element)?).await?.is_none() {
            return Ok(None);
        }
        let descent = self.descend(&element).await?;
        Ok(Some(if descent.at_head { 0 } else { descent.target_rank }))
    }

    /// The element with exactly `rank` elements strictly less than it.
    pub async fn by_ascending_rank(&self, rank: u64) -> Result<Option<Vec<Value>>> {
        let mut pos_element: Vec<u8> = Vec::new();
        let mut pos_rank = 0u64;

        for level in (0..MAX_LEVEL).rev() {
            loop {
                let pos_key = self.entry_key(level, &pos_element)?;
                let pos_span = match self.span_at(&pos_key).await? {
                    Some(span) => span,
                    None => return Ok(None), // uninitialized list
                };
                let mut begin = pos_key.clone();
                begin.push(0x00);
                let (_, end) = self.level_space(level)?.range();
                let next = self.txn.get_range(&begin, &end, RangeOptions::limit(1)).await?;
                match next.first() {
                    Some(entry) if pos_rank + pos_span <= rank => {
                        pos_rank += pos_span;
                        pos_element = entry.key[self.head_key(level)?.len()..].to_vec();
                    }
                    _ => break,
                }
            }
        }

        if pos_element.is_empty() || pos_rank != rank {
            return Ok(None);
        }
        tuple::unpack(&pos_element).map(Some)
    }

    /// Greatest `k` elements, descending.
    pub async fn top_k(&self, k: usize) -> Result<Vec<Vec<Value>>> {
        let head = self.head_key(0)?;
        let mut begin = head.clone();
        begin.push(0x00);
        let (_, end) = self.level_space(0)?.range();
        let entries = self.txn.get_range(&begin, &end, RangeOptions::limit(k).reversed()).await?;
        entries.into_iter().map(|entry| tuple::unpack(&entry.key[head.len()..])).collect()
    }

    /// The element at quantile `p` of the ascending order (`p` clamped to
    /// `[0, 1]`), or `None` for an empty list.
    pub async fn percentile(&self, p: f64) -> Result<Option<Vec<Value>>> {
        let count = self.count().await?;
        if count == 0 {
            return Ok(None);
        }
        let rank = (p.clamp(0.0, 1.0) * (count - 1) as f64).floor() as u64;
        self.by_ascending_rank(rank).await
    }

    /// Verification helper: the spans at `level` must sum to the element
    /// count at level 0.
    pub async fn level_span_total(&self, level: usize) -> Result<u64> {
        let (begin, end) = self.level_space(level)?.range();
        let mut total = 0u64;
        for entry in self.txn.get_range(&begin, &end, RangeOptions::default()).await? {
            total += decode_span(&entry.value)?;
        }
        Ok(total)
    }
}

pub struct RankedMaintainer;

impl RankedMaintainer {
    fn score_id(ctx: &IndexContext<'_>, id: &[Value], record: &RecordValues) -> Vec<Value> {
        let mut element = vec![record.get_or_null(&ctx.index.key_paths[0])];
        element.extend_from_slice(id);
        element
    }
}

#[async_trait]
impl IndexMaintainer for RankedMaintainer {
    async fn update(&self, ctx: &IndexContext<'_>, id: &[Value], old: Option<&RecordValues>, new: Option<&RecordValues>) -> Result<()> {
        let space = ctx.index_space()?;
        let list = SkipList::new(ctx.txn, space, ctx.index.config.ranked_fanout);
        let old_element = old.map(|record| Self::score_id(ctx, id, record));
        let new_element = new.map(|record| Self::score_id(ctx, id, record));
        if old_element == new_element {
            return Ok(());
        }
        if let Some(element) = old_element {
            list.delete(&element).await?;
        }
        if let Some(element) = new_element {
            list.insert(&element).await?;
        }
        Ok(())
    }

    fn expected_keys(&self, ctx: &IndexContext<'_>, id: &[Value], record: &RecordValues) -> Result<BTreeSet<Vec<u8>>> {
        // Only the level-0 edge is deterministic; upper levels depend on the
        // level draw.
        let space = ctx.index_space()?;
        let mut key = space.subspace(&[Value::Int(0)])?.prefix().to_vec();
        key.extend(tuple::pack(&Self::score_id(ctx, id, record))?);
        Ok(BTreeSet::from([key]))
    }
}
