//! In-memory ordered KV engine with optimistic concurrency.
//!
//! Single-process stand-in for the real store: a `BTreeMap` keyspace, a
//! monotonic commit version, a bounded commit log for conflict validation,
//! and the full atomic-mutation family. Reads observe the current committed
//! state; serializability is enforced at commit time by intersecting the
//! transaction's read ranges with the write sets of every commit newer than
//! its read version.

use crate::{
    AtomicOp, ConflictRangeKind, KeyValue, KvDatabase, KvError, KvErrorKind, KvResult, KvTransaction, RangeOptions, MAX_VALUE_SIZE,
    VERSIONSTAMP_LEN,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex};

/// How many commits the engine retains for conflict validation. A transaction
/// whose read version predates the retained window fails with
/// `TransactionTooOld`.
const COMMIT_LOG_WINDOW: usize = 4096;

#[derive(Clone, Default)]
pub struct MemoryKv {
    shared: Arc<Mutex<Store>>,
}

#[derive(Default)]
struct Store {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    version: i64,
    /// (commit version, write ranges) of recent commits, oldest first.
    commit_log: Vec<(i64, Vec<(Vec<u8>, Vec<u8>)>)>,
    oldest_retained: i64,
}

impl MemoryKv {
    pub fn new() -> Self { Self::default() }

    /// Committed version, for test assertions.
    pub fn current_version(&self) -> i64 { self.shared.lock().unwrap().version }

    /// Number of committed keys, for test assertions.
    pub fn key_count(&self) -> usize { self.shared.lock().unwrap().data.len() }

    /// Committed keys under a prefix, for test assertions.
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        let store = self.shared.lock().unwrap();
        store.data.range(prefix.to_vec()..).take_while(|(k, _)| k.starts_with(prefix)).map(|(k, _)| k.clone()).collect()
    }
}

#[async_trait]
impl KvDatabase for MemoryKv {
    async fn begin(&self) -> KvResult<Arc<dyn KvTransaction>> {
        Ok(Arc::new(MemoryTransaction { shared: self.shared.clone(), state: Mutex::new(TxnState::default()) }))
    }
}

#[derive(Debug, Clone)]
enum MutOp {
    Set(Vec<u8>, Vec<u8>),
    Clear(Vec<u8>),
    ClearRange(Vec<u8>, Vec<u8>),
    Atomic(Vec<u8>, Vec<u8>, AtomicOp),
    /// Key template, placeholder offset, value.
    VersionstampedSet(Vec<u8>, usize, Vec<u8>),
}

#[derive(Default)]
struct TxnState {
    read_version: Option<i64>,
    ops: Vec<MutOp>,
    read_ranges: Vec<(Vec<u8>, Vec<u8>)>,
    write_ranges: Vec<(Vec<u8>, Vec<u8>)>,
    committed: bool,
    cancelled: bool,
}

pub struct MemoryTransaction {
    shared: Arc<Mutex<Store>>,
    state: Mutex<TxnState>,
}

fn point_range(key: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut end = key.to_vec();
    end.push(0x00);
    (key.to_vec(), end)
}

fn ranges_intersect(a: &(Vec<u8>, Vec<u8>), b: &(Vec<u8>, Vec<u8>)) -> bool { a.0 < b.1 && b.0 < a.1 }

/// Apply one atomic operator, FDB-style: the existing value is zero-extended
/// or truncated to the operand length first. A missing value is zero for
/// `Add` and the bit operators, and absent for `Min`/`Max` (the operand is
/// stored as-is).
fn apply_atomic(current: Option<&[u8]>, param: &[u8], op: AtomicOp) -> Vec<u8> {
    let mut cur = match (current, op) {
        (None, AtomicOp::Min | AtomicOp::Max) => return param.to_vec(),
        (None, _) => vec![0u8; param.len()],
        (Some(v), _) => {
            let mut v = v.to_vec();
            v.resize(param.len(), 0);
            v
        }
    };
    match op {
        AtomicOp::Add => {
            let mut carry = 0u16;
            for (c, p) in cur.iter_mut().zip(param.iter()) {
                let sum = *c as u16 + *p as u16 + carry;
                *c = sum as u8;
                carry = sum >> 8;
            }
            cur
        }
        AtomicOp::Min | AtomicOp::Max => {
            // Little-endian unsigned comparison: most significant byte last.
            let cur_less = cur.iter().rev().lt(param.iter().rev());
            let keep_cur = if op == AtomicOp::Min { cur_less } else { !cur_less };
            if keep_cur { cur } else { param.to_vec() }
        }
        AtomicOp::BitOr => {
            for (c, p) in cur.iter_mut().zip(param.iter()) {
                *c |= p;
            }
            cur
        }
        AtomicOp::BitAnd => {
            for (c, p) in cur.iter_mut().zip(param.iter()) {
                *c &= p;
            }
            cur
        }
        AtomicOp::BitXor => {
            for (c, p) in cur.iter_mut().zip(param.iter()) {
                *c ^= p;
            }
            cur
        }
    }
}

impl MemoryTransaction {
    fn check_usable(state: &TxnState) -> KvResult<()> {
        if state.cancelled {
            return Err(KvError::new(KvErrorKind::Cancelled, "transaction cancelled"));
        }
        if state.committed {
            return Err(KvError::new(KvErrorKind::UsedAfterCommit, "operation after commit"));
        }
        Ok(())
    }

    /// Resolve a key through the transaction's own mutation log on top of the
    /// committed state.
    fn resolve(store: &Store, ops: &[MutOp], key: &[u8]) -> Option<Vec<u8>> {
        let mut value = store.data.get(key).cloned();
        for op in ops {
            match op {
                MutOp::Set(k, v) if k == key => value = Some(v.clone()),
                MutOp::Clear(k) if k == key => value = None,
                MutOp::ClearRange(b, e) if key >= b.as_slice() && key < e.as_slice() => value = None,
                MutOp::Atomic(k, param, op) if k == key => value = Some(apply_atomic(value.as_deref(), param, *op)),
                _ => {}
            }
        }
        value
    }

    fn fix_read_version(&self, state: &mut TxnState) -> i64 {
        *state.read_version.get_or_insert_with(|| self.shared.lock().unwrap().version)
    }
}

#[async_trait]
impl KvTransaction for MemoryTransaction {
    async fn get(&self, key: &[u8], snapshot: bool) -> KvResult<Option<Vec<u8>>> {
        let mut state = self.state.lock().unwrap();
        Self::check_usable(&state)?;
        self.fix_read_version(&mut state);
        if !snapshot {
            let range = point_range(key);
            state.read_ranges.push(range);
        }
        let store = self.shared.lock().unwrap();
        Ok(Self::resolve(&store, &state.ops, key))
    }

    async fn get_range(&self, begin: &[u8], end: &[u8], opts: RangeOptions) -> KvResult<Vec<KeyValue>> {
        let mut state = self.state.lock().unwrap();
        Self::check_usable(&state)?;
        self.fix_read_version(&mut state);
        if !opts.snapshot {
            state.read_ranges.push((begin.to_vec(), end.to_vec()));
        }

        let store = self.shared.lock().unwrap();
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = store
            .data
            .range((Bound::Included(begin.to_vec()), Bound::Excluded(end.to_vec())))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for op in &state.ops {
            match op {
                MutOp::Set(k, v) if k.as_slice() >= begin && k.as_slice() < end => {
                    merged.insert(k.clone(), v.clone());
                }
                MutOp::Clear(k) => {
                    merged.remove(k);
                }
                MutOp::ClearRange(b, e) => {
                    let doomed: Vec<_> = merged.range(b.clone()..e.clone()).map(|(k, _)| k.clone()).collect();
                    for k in doomed {
                        merged.remove(&k);
                    }
                }
                MutOp::Atomic(k, param, op) if k.as_slice() >= begin && k.as_slice() < end => {
                    let current = merged.get(k).map(|v| v.to_vec());
                    merged.insert(k.clone(), apply_atomic(current.as_deref(), param, *op));
                }
                _ => {}
            }
        }

        let mut out: Vec<KeyValue> = merged.into_iter().map(|(key, value)| KeyValue { key, value }).collect();
        if opts.reverse {
            out.reverse();
        }
        if let Some(limit) = opts.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(KvError::new(KvErrorKind::ValueTooLarge, format!("value of {} bytes exceeds {MAX_VALUE_SIZE}", value.len())));
        }
        let mut state = self.state.lock().unwrap();
        Self::check_usable(&state)?;
        state.write_ranges.push(point_range(key));
        state.ops.push(MutOp::Set(key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn clear(&self, key: &[u8]) -> KvResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_usable(&state)?;
        state.write_ranges.push(point_range(key));
        state.ops.push(MutOp::Clear(key.to_vec()));
        Ok(())
    }

    fn clear_range(&self, begin: &[u8], end: &[u8]) -> KvResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_usable(&state)?;
        state.write_ranges.push((begin.to_vec(), end.to_vec()));
        state.ops.push(MutOp::ClearRange(begin.to_vec(), end.to_vec()));
        Ok(())
    }

    fn atomic_op(&self, key: &[u8], param: &[u8], op: AtomicOp) -> KvResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_usable(&state)?;
        // Atomic mutations conflict as writes but never as reads.
        state.write_ranges.push(point_range(key));
        state.ops.push(MutOp::Atomic(key.to_vec(), param.to_vec(), op));
        Ok(())
    }

    fn set_versionstamped_key(&self, key: &[u8], offset: usize, value: &[u8]) -> KvResult<()> {
        if offset + VERSIONSTAMP_LEN > key.len() {
            return Err(KvError::storage(format!("versionstamp offset {offset} out of bounds for key of {} bytes", key.len())));
        }
        let mut state = self.state.lock().unwrap();
        Self::check_usable(&state)?;
        state.ops.push(MutOp::VersionstampedSet(key.to_vec(), offset, value.to_vec()));
        Ok(())
    }

    fn add_conflict_range(&self, begin: &[u8], end: &[u8], kind: ConflictRangeKind) -> KvResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_usable(&state)?;
        match kind {
            ConflictRangeKind::Read => state.read_ranges.push((begin.to_vec(), end.to_vec())),
            ConflictRangeKind::Write => state.write_ranges.push((begin.to_vec(), end.to_vec())),
        }
        Ok(())
    }

    async fn get_read_version(&self) -> KvResult<i64> {
        let mut state = self.state.lock().unwrap();
        Self::check_usable(&state)?;
        Ok(self.fix_read_version(&mut state))
    }

    fn set_read_version(&self, version: i64) -> KvResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_usable(&state)?;
        state.read_version = Some(version);
        Ok(())
    }

    async fn commit(&self) -> KvResult<i64> {
        let mut state = self.state.lock().unwrap();
        Self::check_usable(&state)?;

        let mut store = self.shared.lock().unwrap();
        let read_version = state.read_version.unwrap_or(store.version);

        if read_version < store.oldest_retained {
            return Err(KvError::new(KvErrorKind::TransactionTooOld, "read version outside retained window"));
        }
        for (commit_version, writes) in &store.commit_log {
            if *commit_version <= read_version {
                continue;
            }
            for write in writes {
                if state.read_ranges.iter().any(|r| ranges_intersect(r, write)) {
                    return Err(KvError::not_committed());
                }
            }
        }

        let commit_version = store.version + 1;
        store.version = commit_version;

        let mut batch: u16 = 0;
        let ops = std::mem::take(&mut state.ops);
        for op in ops {
            match op {
                MutOp::Set(k, v) => {
                    store.data.insert(k, v);
                }
                MutOp::Clear(k) => {
                    store.data.remove(&k);
                }
                MutOp::ClearRange(b, e) => {
                    let doomed: Vec<_> = store.data.range(b..e).map(|(k, _)| k.clone()).collect();
                    for k in doomed {
                        store.data.remove(&k);
                    }
                }
                MutOp::Atomic(k, param, op) => {
                    let next = apply_atomic(store.data.get(&k).map(|v| v.as_slice()), &param, op);
                    store.data.insert(k, next);
                }
                MutOp::VersionstampedSet(mut key, offset, value) => {
                    key[offset..offset + 8].copy_from_slice(&(commit_version as u64).to_be_bytes());
                    key[offset + 8..offset + VERSIONSTAMP_LEN].copy_from_slice(&batch.to_be_bytes());
                    batch = batch.wrapping_add(1);
                    let range = point_range(&key);
                    state.write_ranges.push(range);
                    store.data.insert(key, value);
                }
            }
        }

        let writes = std::mem::take(&mut state.write_ranges);
        store.commit_log.push((commit_version, writes));
        if store.commit_log.len() > COMMIT_LOG_WINDOW {
            let drop_count = store.commit_log.len() - COMMIT_LOG_WINDOW;
            store.commit_log.drain(..drop_count);
            store.oldest_retained = store.commit_log.first().map(|(v, _)| *v).unwrap_or(commit_version);
        }

        state.committed = true;
        Ok(commit_version)
    }

    fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        state.cancelled = true;
        state.ops.clear();
    }

    fn approximate_size(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .ops
            .iter()
            .map(|op| match op {
                MutOp::Set(k, v) | MutOp::Atomic(k, v, _) => k.len() + v.len(),
                MutOp::Clear(k) => k.len(),
                MutOp::ClearRange(b, e) => b.len() + e.len(),
                MutOp::VersionstampedSet(k, _, v) => k.len() + v.len(),
            })
            .sum()
    }
}
