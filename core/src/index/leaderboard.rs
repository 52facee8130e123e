//! Leaderboard index: a ranked skip list per time-window bucket.
//!
//! The window bucket is derived from the record's timestamp column; each
//! bucket holds an independent span skip list under
//! `S/I/<name>/<bucket>/<level>/<score, id…>`.

use super::ranked::SkipList;
use super::{IndexContext, IndexMaintainer};
use crate::error::{Error, Result};
use crate::schema::index::TimeWindow;
use crate::schema::RecordValues;
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::value::Value;
use async_trait::async_trait;
use std::collections::BTreeSet;

pub struct LeaderboardMaintainer;

impl LeaderboardMaintainer {
    fn window(ctx: &IndexContext<'_>) -> Result<TimeWindow> {
        ctx.index.config.window.ok_or_else(|| Error::Schema(format!("leaderboard index {} has no window", ctx.index.name)))
    }

    /// (bucket, score-id element) of one record version; `None` when the
    /// timestamp column is null (the record simply stays out of the board).
    fn placement(ctx: &IndexContext<'_>, id: &[Value], record: &RecordValues) -> Result<Option<(i64, Vec<Value>)>> {
        let timestamp = match record.get_or_null(&ctx.index.key_paths[0]) {
            Value::Timestamp(ts) => ts,
            Value::Float(ts) => ts,
            Value::Int(ts) => ts as f64,
            Value::Null => return Ok(None),
            other => return Err(Error::UnsupportedType(format!("leaderboard timestamp column holds {other}"))),
        };
        let bucket = Self::window(ctx)?.bucket(timestamp);
        let mut element = vec![record.get_or_null(&ctx.index.key_paths[1])];
        element.extend_from_slice(id);
        Ok(Some((bucket, element)))
    }

    pub fn bucket_space(ctx: &IndexContext<'_>, bucket: i64) -> Result<Subspace> {
        ctx.index_space()?.subspace(&[Value::Int(bucket)])
    }

    /// Reader for one window bucket.
    pub fn bucket_list<'a>(txn: &'a Transaction, ctx: &IndexContext<'_>, bucket: i64) -> Result<SkipList<'a>> {
        Ok(SkipList::new(txn, Self::bucket_space(ctx, bucket)?, ctx.index.config.ranked_fanout))
    }
}

#[async_trait]
impl IndexMaintainer for LeaderboardMaintainer {
    async fn update(&self, ctx: &IndexContext<'_>, id: &[Value], old: Option<&RecordValues>, new: Option<&RecordValues>) -> Result<()> {
        let old_placement = old.map(|record| Self::placement(ctx, id, record)).transpose()?.flatten();
        let new_placement = new.map(|record| Self::placement(ctx, id, record)).transpose()?.flatten();
        if old_placement == new_placement {
            return Ok(());
        }
        if let Some((bucket, element)) = old_placement {
            let list = SkipList::new(ctx.txn, Self::bucket_space(ctx, bucket)?, ctx.index.config.ranked_fanout);
            list.delete(&element).await?;
        }
        if let Some((bucket, element)) = new_placement {
            let list = SkipList::new(ctx.txn, Self::bucket_space(ctx, bucket)?, ctx.index.config.ranked_fanout);
            list.insert(&element).await?;
        }
        Ok(())
    }

    fn expected_keys(&self, ctx: &IndexContext<'_>, id: &[Value], record: &RecordValues) -> Result<BTreeSet<Vec<u8>>> {
        match Self::placement(ctx, id, record)? {
            None => Ok(BTreeSet::new()),
            Some((bucket, element)) => {
                let mut key = Self::bucket_space(ctx, bucket)?.subspace(&[Value::Int(0)])?.prefix().to_vec();
                key.extend(crate::tuple::pack(&element)?);
                Ok(BTreeSet::from([key]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::index::{IndexConfig, IndexDescriptor, IndexKind};
    use crate::schema::{FieldKind, TypeDescriptor};
    use crate::transaction::Database;
    use lamina_kv::memory::MemoryKv;
    use std::sync::Arc;

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new("Play")
            .field("id", FieldKind::String)
            .field("at", FieldKind::Timestamp)
            .field("score", FieldKind::Int)
            .primary_key(["id"])
            .index(IndexDescriptor::new("Play_daily", IndexKind::Leaderboard, ["at", "score"]).with_config(IndexConfig {
                window: Some(TimeWindow::Daily),
                ..IndexConfig::default()
            }))
    }

    fn play(id: &str, day: i64, score: i64) -> RecordValues {
        RecordValues::from_pairs([
            ("id", Value::from(id)),
            ("at", Value::Timestamp((day * 86_400) as f64 + 60.0)),
            ("score", Value::Int(score)),
        ])
    }

    #[tokio::test]
    async fn windows_are_independent() {
        let db = Database::new(Arc::new(MemoryKv::new()));
        let descriptor = descriptor();

        for (id, day, score) in [("p1", 0, 10), ("p2", 0, 30), ("p3", 1, 20)] {
            let descriptor = descriptor.clone();
            db.run(move |txn| {
                let descriptor = descriptor.clone();
                async move {
                    let container = Subspace::from_elements(&[Value::from("lb")])?;
                    let ctx = IndexContext { txn: &txn, container: &container, descriptor: &descriptor, index: &descriptor.indexes[0] };
                    let record = play(id, day, score);
                    let id = vec![Value::from(id)];
                    LeaderboardMaintainer.update(&ctx, &id, None, Some(&record)).await
                }
            })
            .await
            .unwrap();
        }

        let descriptor_in = descriptor.clone();
        db.run(move |txn| {
            let descriptor = descriptor_in.clone();
            async move {
                let container = Subspace::from_elements(&[Value::from("lb")])?;
                let ctx = IndexContext { txn: &txn, container: &container, descriptor: &descriptor, index: &descriptor.indexes[0] };
                let day0 = LeaderboardMaintainer::bucket_list(&txn, &ctx, 0)?;
                assert_eq!(day0.count().await?, 2);
                assert_eq!(day0.top_k(1).await?, vec![vec![Value::Int(30), Value::from("p2")]]);
                let day1 = LeaderboardMaintainer::bucket_list(&txn, &ctx, 1)?;
                assert_eq!(day1.count().await?, 1);
                Ok(())
            }
        })
        .await
        .unwrap();
    }
}
