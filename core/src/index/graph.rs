//! Graph-adjacency index over directed labeled edges.
//!
//! A record carrying (from, label, to) columns is indexed as
//! `S/I/<name>/<perm>/<a>/<b>/<c>/<id…>` for each configured permutation:
//! the forward/reverse pair by default, or the full hexastore set of six,
//! which makes any bound prefix of the triple scannable.

use super::{covering_value, IndexContext, IndexMaintainer};
use crate::error::Result;
use crate::schema::RecordValues;
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::value::Value;
use async_trait::async_trait;
use lamina_kv::RangeOptions;
use std::collections::BTreeSet;

/// (subject, predicate, object) orderings. `Spo` serves forward traversal,
/// `Osp` reverse; the rest complete the hexastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permutation {
    Spo,
    Sop,
    Pso,
    Pos,
    Osp,
    Ops,
}

impl Permutation {
    pub const DEFAULT_PAIR: [Permutation; 2] = [Permutation::Spo, Permutation::Osp];
    pub const HEXASTORE: [Permutation; 6] =
        [Permutation::Spo, Permutation::Sop, Permutation::Pso, Permutation::Pos, Permutation::Osp, Permutation::Ops];

    pub fn tag(&self) -> &'static str {
        match self {
            Permutation::Spo => "spo",
            Permutation::Sop => "sop",
            Permutation::Pso => "pso",
            Permutation::Pos => "pos",
            Permutation::Osp => "osp",
            Permutation::Ops => "ops",
        }
    }

    fn order(&self, triple: &[Value; 3]) -> [Value; 3] {
        let [s, p, o] = triple.clone();
        match self {
            Permutation::Spo => [s, p, o],
            Permutation::Sop => [s, o, p],
            Permutation::Pso => [p, s, o],
            Permutation::Pos => [p, o, s],
            Permutation::Osp => [o, s, p],
            Permutation::Ops => [o, p, s],
        }
    }

    /// Reorder back to (subject, predicate, object).
    fn restore(&self, stored: &[Value; 3]) -> [Value; 3] {
        let [a, b, c] = stored.clone();
        match self {
            Permutation::Spo => [a, b, c],
            Permutation::Sop => [a, c, b],
            Permutation::Pso => [b, a, c],
            Permutation::Pos => [c, a, b],
            Permutation::Osp => [b, c, a],
            Permutation::Ops => [c, b, a],
        }
    }
}

pub struct GraphMaintainer;

impl GraphMaintainer {
    fn permutations(ctx: &IndexContext<'_>) -> &'static [Permutation] {
        if ctx.index.config.hexastore {
            &Permutation::HEXASTORE
        } else {
            &Permutation::DEFAULT_PAIR
        }
    }

    fn triple_of(ctx: &IndexContext<'_>, record: &RecordValues) -> Option<[Value; 3]> {
        let from = record.get_or_null(&ctx.index.key_paths[0]);
        let label = record.get_or_null(&ctx.index.key_paths[1]);
        let to = record.get_or_null(&ctx.index.key_paths[2]);
        if from.is_null() || to.is_null() {
            return None;
        }
        Some([from, label, to])
    }

    fn keys_for(ctx: &IndexContext<'_>, id: &[Value], triple: &[Value; 3]) -> Result<BTreeSet<Vec<u8>>> {
        let space = ctx.index_space()?;
        let mut keys = BTreeSet::new();
        for permutation in Self::permutations(ctx) {
            let ordered = permutation.order(triple);
            let mut elements = vec![Value::from(permutation.tag())];
            elements.extend(ordered);
            elements.extend_from_slice(id);
            keys.insert(space.pack(&elements)?);
        }
        Ok(keys)
    }
}

#[async_trait]
impl IndexMaintainer for GraphMaintainer {
    async fn update(&self, ctx: &IndexContext<'_>, id: &[Value], old: Option<&RecordValues>, new: Option<&RecordValues>) -> Result<()> {
        let old_keys = match old.and_then(|record| Self::triple_of(ctx, record)) {
            Some(triple) => Self::keys_for(ctx, id, &triple)?,
            None => BTreeSet::new(),
        };
        let new_keys = match new.and_then(|record| Self::triple_of(ctx, record)) {
            Some(triple) => Self::keys_for(ctx, id, &triple)?,
            None => BTreeSet::new(),
        };

        for key in old_keys.difference(&new_keys) {
            ctx.txn.clear(key)?;
        }
        let stored = match new {
            Some(record) => covering_value(ctx.index, record)?,
            None => Vec::new(),
        };
        for key in new_keys.difference(&old_keys) {
            ctx.txn.set(key, &stored)?;
        }
        if !old_keys.is_empty() && old_keys == new_keys {
            let old_stored = covering_value(ctx.index, old.unwrap())?;
            if old_stored != stored {
                for key in &new_keys {
                    ctx.txn.set(key, &stored)?;
                }
            }
        }
        Ok(())
    }

    fn expected_keys(&self, ctx: &IndexContext<'_>, id: &[Value], record: &RecordValues) -> Result<BTreeSet<Vec<u8>>> {
        match Self::triple_of(ctx, record) {
            Some(triple) => Self::keys_for(ctx, id, &triple),
            None => Ok(BTreeSet::new()),
        }
    }
}

/// One traversal hit: the restored triple plus the owning record id.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from: Value,
    pub label: Value,
    pub to: Value,
    pub id: Vec<Value>,
}

/// Scan one permutation with a bound prefix of its ordering. With the
/// default pair use `Spo` for forward and `Osp` for reverse traversal; with
/// hexastore any prefix has a serving permutation.
pub async fn traverse(
    txn: &Transaction,
    container: &Subspace,
    index_name: &str,
    permutation: Permutation,
    bound: &[Value],
) -> Result<Vec<Edge>> {
    let space = container.subspace(&[Value::from("I"), Value::from(index_name)])?;
    let mut prefix = vec![Value::from(permutation.tag())];
    prefix.extend_from_slice(bound);
    let scan_space = space.subspace(&prefix)?;
    let (begin, end) = scan_space.range();

    let mut out = Vec::new();
    for entry in txn.get_range(&begin, &end, RangeOptions::default()).await? {
        let mut elements = space.subspace(&[Value::from(permutation.tag())])?.unpack(&entry.key)?;
        if elements.len() < 3 {
            continue;
        }
        let id = elements.split_off(3);
        let stored: [Value; 3] = [elements[0].clone(), elements[1].clone(), elements[2].clone()];
        let [from, label, to] = permutation.restore(&stored);
        out.push(Edge { from, label, to, id });
    }
    Ok(out)
}
