//! Contract for the ordered key-value store the engine runs on top of.
//!
//! The engine consumes exactly this surface: multi-key ACID transactions with
//! optimistic concurrency, byte-lexicographic range scans, atomic mutations,
//! conflict-range control and commit versionstamps. Any store providing these
//! semantics can sit underneath; [`memory::MemoryKv`] is the hermetic engine
//! used by the test suites.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub type KvResult<T> = Result<T, KvError>;

/// Number of bytes in a commit versionstamp: 8 bytes of commit version plus
/// 2 bytes of intra-commit batch order, both big-endian.
pub const VERSIONSTAMP_LEN: usize = 10;

/// The store rejects single values larger than this. Callers that need more
/// must chunk above this layer.
pub const MAX_VALUE_SIZE: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvErrorKind {
    /// Optimistic conflict: a concurrent commit intersected this
    /// transaction's read set. Retryable.
    NotCommitted,
    /// The transaction's read version fell behind the store's retention
    /// window. Retryable with a fresh read version.
    TransactionTooOld,
    /// The commit outcome could not be determined. Retryable for idempotent
    /// work.
    CommitUnknownResult,
    /// The transaction was cancelled by the caller.
    Cancelled,
    /// A mutation was submitted after commit completed.
    UsedAfterCommit,
    ValueTooLarge,
    KeyTooLarge,
    /// Anything the storage engine reports that has no dedicated kind.
    Storage,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct KvError {
    pub kind: KvErrorKind,
    pub message: String,
}

impl KvError {
    pub fn new(kind: KvErrorKind, message: impl Into<String>) -> Self { Self { kind, message: message.into() } }

    pub fn not_committed() -> Self { Self::new(KvErrorKind::NotCommitted, "transaction conflict") }

    pub fn storage(message: impl Into<String>) -> Self { Self::new(KvErrorKind::Storage, message) }

    /// Whether the transaction runtime may re-execute the user closure.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, KvErrorKind::NotCommitted | KvErrorKind::TransactionTooOld | KvErrorKind::CommitUnknownResult)
    }
}

/// Atomic mutation operators. Each is associative and commutes with other
/// mutations of the same operator, so the store can apply them without read
/// conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    /// Little-endian integer addition; shorter operand is zero-extended.
    Add,
    /// Byte-wise minimum, comparing operands as little-endian unsigned
    /// integers after zero-extension.
    Min,
    /// Byte-wise maximum, same comparison as `Min`.
    Max,
    BitOr,
    BitAnd,
    BitXor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictRangeKind {
    Read,
    Write,
}

/// Scheduling priority hint for one transaction. Advisory: engines without
/// prioritized admission ignore it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionPriority {
    #[default]
    Normal,
    /// Background work that should yield to foreground traffic.
    Batch,
    /// Latency-critical system work.
    Immediate,
}

#[derive(Debug, Clone, Default)]
pub struct RangeOptions {
    pub limit: Option<usize>,
    pub reverse: bool,
    /// Snapshot scans add no read-conflict range.
    pub snapshot: bool,
}

impl RangeOptions {
    pub fn limit(n: usize) -> Self { Self { limit: Some(n), ..Self::default() } }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn snapshot(mut self) -> Self {
        self.snapshot = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// A single optimistic transaction.
///
/// Mutation methods take `&self`: a transaction handle is shared behind an
/// `Arc` by the layers above, and the implementation is expected to buffer
/// writes internally. Reads observe the transaction's own uncommitted writes.
#[async_trait]
pub trait KvTransaction: Send + Sync {
    /// Apply a scheduling priority. Advisory; the default implementation
    /// drops it.
    fn set_priority(&self, _priority: TransactionPriority) {}

    async fn get(&self, key: &[u8], snapshot: bool) -> KvResult<Option<Vec<u8>>>;

    /// Scan `[begin, end)` in key order (reversed when requested). The result
    /// is bounded by `opts.limit`; callers page by re-issuing with a narrowed
    /// range.
    async fn get_range(&self, begin: &[u8], end: &[u8], opts: RangeOptions) -> KvResult<Vec<KeyValue>>;

    fn set(&self, key: &[u8], value: &[u8]) -> KvResult<()>;

    fn clear(&self, key: &[u8]) -> KvResult<()>;

    fn clear_range(&self, begin: &[u8], end: &[u8]) -> KvResult<()>;

    fn atomic_op(&self, key: &[u8], param: &[u8], op: AtomicOp) -> KvResult<()>;

    /// Register `key` for commit-time versionstamp substitution: the
    /// `VERSIONSTAMP_LEN` bytes at `offset` are replaced with the commit
    /// versionstamp before the write is applied.
    fn set_versionstamped_key(&self, key: &[u8], offset: usize, value: &[u8]) -> KvResult<()>;

    fn add_conflict_range(&self, begin: &[u8], end: &[u8], kind: ConflictRangeKind) -> KvResult<()>;

    async fn get_read_version(&self) -> KvResult<i64>;

    fn set_read_version(&self, version: i64) -> KvResult<()>;

    /// Commit and return the committed version. After a successful commit the
    /// transaction accepts no further operations.
    async fn commit(&self) -> KvResult<i64>;

    fn cancel(&self);

    /// Approximate byte footprint of buffered mutations, used by the
    /// large-transaction monitor above this layer.
    fn approximate_size(&self) -> usize;
}

#[async_trait]
pub trait KvDatabase: Send + Sync {
    async fn begin(&self) -> KvResult<Arc<dyn KvTransaction>>;
}

/// Smallest key strictly greater than every key prefixed by `prefix`.
/// Trailing 0xff bytes are stripped before incrementing; an all-0xff prefix
/// has no upper bound and yields a sentinel past any practical key.
pub fn strinc(prefix: &[u8]) -> Vec<u8> {
    let mut out = prefix.to_vec();
    while let Some(&last) = out.last() {
        if last == 0xff {
            out.pop();
        } else {
            *out.last_mut().unwrap() += 1;
            return out;
        }
    }
    vec![0xff; 16]
}

/// The key range covering exactly the keys with `prefix`.
pub fn prefix_range(prefix: &[u8]) -> (Vec<u8>, Vec<u8>) { (prefix.to_vec(), strinc(prefix)) }
