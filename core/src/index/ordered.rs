//! Ordered and unique-ordered index maintenance.
//!
//! Entries live at `S/I/<name>/<value-tuple…>/<id…>` with an empty value, or
//! the tuple-encoded stored fields for covering indexes. Updates are
//! diff-based: compute the old and new key sets, clear `old \ new`, write
//! `new \ old`, and rewrite the intersection only when the covering payload
//! changed. Replaying the same diff is a no-op.

use super::{covering_value, key_column_values, IndexContext, IndexMaintainer};
use crate::error::{Error, Result};
use crate::schema::RecordValues;
use crate::value::Value;
use async_trait::async_trait;
use lamina_kv::RangeOptions;
use std::collections::BTreeSet;

pub struct OrderedMaintainer;

impl OrderedMaintainer {
    fn entry_key(ctx: &IndexContext<'_>, values: &[Value], id: &[Value]) -> Result<Vec<u8>> {
        let mut elements = Vec::with_capacity(values.len() + id.len());
        elements.extend_from_slice(values);
        elements.extend_from_slice(id);
        ctx.index_space()?.pack(&elements)
    }

    /// Unique probe: any entry under the value prefix held by a different id
    /// fails the transaction. The serializable range read doubles as the
    /// conflict that serializes concurrent duplicate inserts — exactly one
    /// commits.
    async fn check_unique(ctx: &IndexContext<'_>, values: &[Value], id: &[Value]) -> Result<()> {
        let prefix_space = ctx.index_space()?.subspace(values)?;
        let (begin, end) = prefix_space.range();
        let existing = ctx.txn.get_range(&begin, &end, RangeOptions::limit(2)).await?;
        for entry in existing {
            let existing_id = prefix_space.unpack(&entry.key)?;
            if existing_id != id {
                return Err(Error::UniquenessViolation {
                    index: ctx.index.name.clone(),
                    field: ctx.index.key_paths.join(","),
                    value: single_or_tuple(values),
                    existing_id: single_or_tuple(&existing_id),
                });
            }
        }
        Ok(())
    }
}

fn single_or_tuple(values: &[Value]) -> Value {
    match values {
        [single] => single.clone(),
        many => Value::Tuple(many.to_vec()),
    }
}

#[async_trait]
impl IndexMaintainer for OrderedMaintainer {
    async fn update(&self, ctx: &IndexContext<'_>, id: &[Value], old: Option<&RecordValues>, new: Option<&RecordValues>) -> Result<()> {
        let old_key = match old {
            Some(record) => Some(Self::entry_key(ctx, &key_column_values(ctx.index, record), id)?),
            None => None,
        };
        let (new_key, new_values) = match new {
            Some(record) => {
                let values = key_column_values(ctx.index, record);
                (Some(Self::entry_key(ctx, &values, id)?), Some(values))
            }
            None => (None, None),
        };

        if ctx.index.is_unique() {
            if let Some(values) = &new_values {
                // Only probe when this save introduces the key.
                let introduces = old.map(|o| key_column_values(ctx.index, o) != *values).unwrap_or(true);
                if introduces && !values.iter().all(Value::is_null) {
                    Self::check_unique(ctx, values, id).await?;
                }
            }
        }

        match (old_key, new_key) {
            (Some(old_key), Some(new_key)) if old_key == new_key => {
                // Key unchanged; refresh the entry only if the covering
                // payload moved.
                let (old_stored, new_stored) =
                    (covering_value(ctx.index, old.unwrap())?, covering_value(ctx.index, new.unwrap())?);
                if old_stored != new_stored {
                    ctx.txn.set(&new_key, &new_stored)?;
                }
            }
            (old_key, new_key) => {
                if let Some(key) = old_key {
                    ctx.txn.clear(&key)?;
                }
                if let Some(key) = new_key {
                    ctx.txn.set(&key, &covering_value(ctx.index, new.unwrap())?)?;
                }
            }
        }
        Ok(())
    }

    fn expected_keys(&self, ctx: &IndexContext<'_>, id: &[Value], record: &RecordValues) -> Result<BTreeSet<Vec<u8>>> {
        Ok(BTreeSet::from([Self::entry_key(ctx, &key_column_values(ctx.index, record), id)?]))
    }
}
