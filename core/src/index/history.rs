//! Version-history index: an append-only series per record, keyed by the
//! commit versionstamp.
//!
//! Every record transition appends `S/I/<name>/<id…>/<versionstamp>` with a
//! presence flag plus the tuple-encoded stored fields. The versionstamp is
//! substituted by the store at commit, so entries order by commit time by
//! construction. A point-in-time read fetches the newest entry at or below
//! the target version.

use super::{covering_value, IndexContext, IndexMaintainer};
use crate::error::{Error, Result};
use crate::schema::RecordValues;
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::tuple;
use crate::value::Value;
use async_trait::async_trait;
use lamina_kv::{RangeOptions, VERSIONSTAMP_LEN};
use std::collections::BTreeSet;

const ENTRY_PRESENT: u8 = 1;
const ENTRY_DELETED: u8 = 0;

fn series_prefix(ctx: &IndexContext<'_>, id: &[Value]) -> Result<Vec<u8>> {
    let space = ctx.index_space()?;
    let mut prefix = space.prefix().to_vec();
    prefix.extend(tuple::pack(id)?);
    Ok(prefix)
}

pub struct HistoryMaintainer;

#[async_trait]
impl IndexMaintainer for HistoryMaintainer {
    async fn update(&self, ctx: &IndexContext<'_>, id: &[Value], old: Option<&RecordValues>, new: Option<&RecordValues>) -> Result<()> {
        if old.is_none() && new.is_none() {
            return Ok(());
        }
        let mut key = series_prefix(ctx, id)?;
        let offset = key.len();
        key.extend([0u8; VERSIONSTAMP_LEN]);

        let mut payload = Vec::new();
        match new {
            Some(record) => {
                payload.push(ENTRY_PRESENT);
                payload.extend(covering_value(ctx.index, record)?);
            }
            None => payload.push(ENTRY_DELETED),
        }
        ctx.txn.set_versionstamped_key(&key, offset, &payload)
    }

    async fn scan_for_build(&self, _ctx: &IndexContext<'_>, _id: &[Value], _record: &RecordValues) -> Result<()> {
        // History cannot be rebuilt from current state; an online build
        // starts the series at the build's own commit.
        Ok(())
    }

    fn expected_keys(&self, _ctx: &IndexContext<'_>, _id: &[Value], _record: &RecordValues) -> Result<BTreeSet<Vec<u8>>> {
        // Entry keys embed commit versionstamps and cannot be recomputed.
        Ok(BTreeSet::new())
    }
}

/// One history entry.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub version: u64,
    pub batch: u16,
    /// `None` marks a deletion.
    pub stored: Option<Vec<Value>>,
}

fn parse_entry(suffix: &[u8], value: &[u8]) -> Result<HistoryEntry> {
    if suffix.len() != VERSIONSTAMP_LEN {
        return Err(Error::corrupt("history key has malformed versionstamp"));
    }
    let version = u64::from_be_bytes(suffix[..8].try_into().unwrap());
    let batch = u16::from_be_bytes(suffix[8..].try_into().unwrap());
    let stored = match value.first() {
        Some(&ENTRY_PRESENT) => Some(tuple::unpack(&value[1..])?),
        Some(&ENTRY_DELETED) => None,
        _ => return Err(Error::corrupt("history entry missing presence flag")),
    };
    Ok(HistoryEntry { version, batch, stored })
}

pub struct HistoryReader<'a> {
    txn: &'a Transaction,
    space: Subspace,
}

impl<'a> HistoryReader<'a> {
    pub fn new(txn: &'a Transaction, container: &Subspace, index_name: &str) -> Result<Self> {
        Ok(Self { txn, space: container.subspace(&[Value::from("I"), Value::from(index_name)])? })
    }

    fn prefix(&self, id: &[Value]) -> Result<Vec<u8>> {
        let mut prefix = self.space.prefix().to_vec();
        prefix.extend(tuple::pack(id)?);
        Ok(prefix)
    }

    /// Full series for one record, oldest first.
    pub async fn series(&self, id: &[Value]) -> Result<Vec<HistoryEntry>> {
        let prefix = self.prefix(id)?;
        let (begin, end) = lamina_kv::prefix_range(&prefix);
        let mut out = Vec::new();
        for entry in self.txn.get_range(&begin, &end, RangeOptions::default().snapshot()).await? {
            out.push(parse_entry(&entry.key[prefix.len()..], &entry.value)?);
        }
        Ok(out)
    }

    /// Newest entry at or below `version`; `None` when the record had no
    /// history yet at that version.
    pub async fn at_version(&self, id: &[Value], version: u64) -> Result<Option<HistoryEntry>> {
        let prefix = self.prefix(id)?;
        let mut end = prefix.clone();
        end.extend((version + 1).to_be_bytes());
        end.extend([0u8; 2]);
        let entries = self.txn.get_range(&prefix, &end, RangeOptions::limit(1).reversed().snapshot()).await?;
        entries.first().map(|entry| parse_entry(&entry.key[prefix.len()..], &entry.value)).transpose()
    }
}
