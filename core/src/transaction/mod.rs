//! Transaction runtime: retry loop, backoff, read-version caching, commit
//! hooks and iterator fencing over the raw KV contract.
//!
//! The user closure is a value the runtime can re-invoke — one invocation per
//! attempt — so it must be free of external side effects. Operations inside
//! one transaction are serial; the closure may suspend freely at every KV
//! I/O point.

pub mod hooks;
pub mod monitor;
pub mod options;
pub mod read_version;
pub mod tracker;

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use hooks::{CommitHook, HookRegistry, ListenerRegistry, PostCommitAction, TransactionListener};
use lamina_kv::{AtomicOp, ConflictRangeKind, KeyValue, KvDatabase, KvTransaction, RangeOptions};
use monitor::TransactionMonitor;
use options::{CheckMode, DatabaseOptions};
use read_version::ReadVersionCache;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracker::{IteratorGuard, IteratorTracker};

/// Result of a committed `run_with_report` call: the committed version plus
/// the collected post-commit action outcomes (never thrown into the caller).
pub struct CommitReport {
    pub committed_version: i64,
    pub post_commit: Vec<Result<()>>,
}

struct DatabaseInner {
    kv: Arc<dyn KvDatabase>,
    options: DatabaseOptions,
    read_versions: ReadVersionCache,
    hooks: HookRegistry,
    listeners: ListenerRegistry,
    monitor: TransactionMonitor,
}

/// Handle to one engine database. Cheap to clone; all shared state (the
/// read-version cache, the hook registry, the transaction monitor) lives
/// behind this handle rather than in process-global singletons.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn new(kv: Arc<dyn KvDatabase>) -> Self { Self::with_options(kv, DatabaseOptions::default()) }

    pub fn with_options(kv: Arc<dyn KvDatabase>, options: DatabaseOptions) -> Self {
        let monitor = TransactionMonitor::new(options.large_transaction_threshold);
        Self {
            inner: Arc::new(DatabaseInner {
                kv,
                options,
                read_versions: ReadVersionCache::new(),
                hooks: HookRegistry::new(),
                listeners: ListenerRegistry::new(),
                monitor,
            }),
        }
    }

    pub fn options(&self) -> &DatabaseOptions { &self.inner.options }

    pub fn register_hook(&self, hook: Arc<dyn CommitHook>) { self.inner.hooks.register(hook); }

    pub fn register_listener(&self, listener: Arc<dyn TransactionListener>) { self.inner.listeners.register(listener); }

    /// Run `body` inside a retrying transaction and return its result.
    pub async fn run<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: Fn(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_report(body).await.map(|(value, _)| value)
    }

    /// As `run`, additionally returning the commit report.
    pub async fn run_with_report<T, F, Fut>(&self, body: F) -> Result<(T, CommitReport)>
    where
        F: Fn(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retry = &self.inner.options.transaction.retry;
        let mut last_error: Option<Error> = None;

        for attempt in 0..=retry.retry_limit {
            let txn = self.begin().await?;
            for listener in self.inner.listeners.snapshot() {
                listener.on_attempt(attempt);
            }

            if attempt == 0 {
                if let Some(version) = self.inner.read_versions.get(self.inner.options.transaction.read_version) {
                    txn.set_read_version(version)?;
                }
            }

            match self.attempt(&txn, &body).await {
                Ok((value, committed_version)) => {
                    self.inner.read_versions.update(committed_version);
                    for hook in self.inner.hooks.snapshot() {
                        hook.after_commit(committed_version);
                    }
                    for listener in self.inner.listeners.snapshot() {
                        listener.on_commit(committed_version, attempt + 1);
                    }
                    let actions = txn.take_post_commit();
                    let post_commit = hooks::run_post_commit(actions).await;
                    return Ok((value, CommitReport { committed_version, post_commit }));
                }
                Err(err) => {
                    txn.cancel();
                    for listener in self.inner.listeners.snapshot() {
                        listener.on_abort(&err, attempt);
                    }
                    if err.is_retryable() && attempt < retry.retry_limit {
                        let delay = retry.backoff(attempt);
                        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "transaction retry");
                        tokio::time::sleep(delay).await;
                        last_error = Some(err);
                    } else if err.is_retryable() {
                        return Err(Error::RetryLimitExceeded { attempts: attempt + 1, last: Box::new(err) });
                    } else {
                        return Err(err);
                    }
                }
            }
        }

        Err(Error::RetryLimitExceeded {
            attempts: retry.retry_limit + 1,
            last: Box::new(last_error.unwrap_or(Error::Cancelled)),
        })
    }

    async fn begin(&self) -> Result<Transaction> {
        let kv = self.inner.kv.begin().await?;
        kv.set_priority(self.inner.options.transaction.priority);
        Ok(Transaction {
            inner: Arc::new(TransactionInner {
                kv,
                db: self.inner.clone(),
                tracker: Arc::new(IteratorTracker::new()),
                bytes_written: AtomicUsize::new(0),
                size_warned: AtomicBool::new(false),
                checks: Mutex::new(Vec::new()),
                post_commit: Mutex::new(Vec::new()),
            }),
        })
    }

    /// One attempt: closure, pre-commit checks, iterator fence, commit.
    /// Wrapped in the configured timeout; expiry is non-retryable.
    async fn attempt<T, F, Fut>(&self, txn: &Transaction, body: &F) -> Result<(T, i64)>
    where
        F: Fn(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let work = async {
            let value = body(txn.clone()).await?;
            self.run_pre_commit(txn).await?;

            if !txn.inner.tracker.quiesce(self.inner.options.iterator_fence_timeout).await {
                tracing::warn!(active = txn.inner.tracker.active(), "committing with undrained range iterators");
            }

            let committed_version = txn.inner.kv.commit().await?;
            Ok((value, committed_version))
        };

        match self.inner.options.transaction.timeout {
            None => work.await,
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(limit.as_millis() as u64)),
            },
        }
    }

    async fn run_pre_commit(&self, txn: &Transaction) -> Result<()> {
        for hook in self.inner.hooks.snapshot() {
            hook.before_commit(txn)?;
        }

        let checks = txn.take_checks();
        match self.inner.options.transaction.check_mode {
            CheckMode::FailFast => {
                for check in checks {
                    check.future.await.map_err(|e| annotate_check(check.name, e))?;
                }
            }
            CheckMode::CollectAll => {
                let mut first: Option<Error> = None;
                for check in checks {
                    if let Err(err) = check.future.await {
                        let err = annotate_check(check.name, err);
                        if first.is_none() {
                            first = Some(err);
                        } else {
                            tracing::warn!(error = %err, "additional pre-commit check failure");
                        }
                    }
                }
                if let Some(err) = first {
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

fn annotate_check(name: String, err: Error) -> Error {
    match err {
        Error::ValidationFailed { message, .. } => Error::ValidationFailed { check: name, message },
        other => other,
    }
}

struct PreCommitCheck {
    name: String,
    future: BoxFuture<'static, Result<()>>,
}

struct TransactionInner {
    kv: Arc<dyn KvTransaction>,
    db: Arc<DatabaseInner>,
    tracker: Arc<IteratorTracker>,
    bytes_written: AtomicUsize,
    size_warned: AtomicBool,
    checks: Mutex<Vec<PreCommitCheck>>,
    post_commit: Mutex<Vec<Arc<dyn PostCommitAction>>>,
}

/// Handle to one transaction attempt. Clones share the attempt; the runtime
/// hands a clone to the user closure on every retry.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    /// Serializable read: adds a read-conflict range for the key.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> { Ok(self.inner.kv.get(key, false).await?) }

    /// Snapshot read: no read-conflict range, cannot cause a serialization
    /// failure.
    pub async fn get_snapshot(&self, key: &[u8]) -> Result<Option<Vec<u8>>> { Ok(self.inner.kv.get(key, true).await?) }

    /// One-shot bounded range read.
    pub async fn get_range(&self, begin: &[u8], end: &[u8], opts: RangeOptions) -> Result<Vec<KeyValue>> {
        Ok(self.inner.kv.get_range(begin, end, opts).await?)
    }

    /// Tracked, paging range iterator. The commit fence waits for every live
    /// `RangeScan` to drop.
    pub fn range_scan(&self, begin: Vec<u8>, end: Vec<u8>, opts: ScanOptions) -> RangeScan {
        RangeScan {
            txn: self.inner.clone(),
            _guard: self.inner.tracker.register(),
            begin,
            end,
            opts,
            buffer: std::collections::VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.observe_size(key.len() + value.len());
        Ok(self.inner.kv.set(key, value)?)
    }

    pub fn clear(&self, key: &[u8]) -> Result<()> {
        self.observe_size(key.len());
        Ok(self.inner.kv.clear(key)?)
    }

    pub fn clear_range(&self, begin: &[u8], end: &[u8]) -> Result<()> {
        self.observe_size(begin.len() + end.len());
        Ok(self.inner.kv.clear_range(begin, end)?)
    }

    pub fn atomic_op(&self, key: &[u8], param: &[u8], op: AtomicOp) -> Result<()> {
        self.observe_size(key.len() + param.len());
        Ok(self.inner.kv.atomic_op(key, param, op)?)
    }

    /// Lock-free counter increment (negative deltas decrement).
    pub fn atomic_add(&self, key: &[u8], delta: i64) -> Result<()> { self.atomic_op(key, &delta.to_le_bytes(), AtomicOp::Add) }

    pub fn set_versionstamped_key(&self, key: &[u8], offset: usize, value: &[u8]) -> Result<()> {
        self.observe_size(key.len() + value.len());
        Ok(self.inner.kv.set_versionstamped_key(key, offset, value)?)
    }

    pub fn add_read_conflict_range(&self, begin: &[u8], end: &[u8]) -> Result<()> {
        Ok(self.inner.kv.add_conflict_range(begin, end, ConflictRangeKind::Read)?)
    }

    pub fn add_write_conflict_range(&self, begin: &[u8], end: &[u8]) -> Result<()> {
        Ok(self.inner.kv.add_conflict_range(begin, end, ConflictRangeKind::Write)?)
    }

    /// Serializable compare-and-set. Returns whether the swap applied.
    pub async fn compare_and_set(&self, key: &[u8], expected: Option<&[u8]>, next: Option<&[u8]>) -> Result<bool> {
        let current = self.get(key).await?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        match next {
            Some(value) => self.set(key, value)?,
            None => self.clear(key)?,
        }
        Ok(true)
    }

    pub async fn read_version(&self) -> Result<i64> { Ok(self.inner.kv.get_read_version().await?) }

    pub fn set_read_version(&self, version: i64) -> Result<()> { Ok(self.inner.kv.set_read_version(version)?) }

    /// Register an async pre-commit check for this attempt. Checks run after
    /// the closure and before commit, in registration order.
    pub fn defer_check(&self, name: impl Into<String>, check: impl Future<Output = Result<()>> + Send + 'static) {
        self.inner.checks.lock().unwrap().push(PreCommitCheck { name: name.into(), future: Box::pin(check) });
    }

    /// Register a post-commit action; it runs only if this attempt commits.
    pub fn add_post_commit(&self, action: Arc<dyn PostCommitAction>) { self.inner.post_commit.lock().unwrap().push(action); }

    /// Abort the current attempt. Buffered mutations are discarded and
    /// post-commit actions will not run.
    pub fn cancel(&self) { self.inner.kv.cancel(); }

    pub fn approximate_size(&self) -> usize { self.inner.kv.approximate_size() }

    fn observe_size(&self, added: usize) {
        self.inner.db.monitor.observe(&self.inner.bytes_written, &self.inner.size_warned, added);
    }

    fn take_checks(&self) -> Vec<PreCommitCheck> { std::mem::take(&mut self.inner.checks.lock().unwrap()) }

    fn take_post_commit(&self) -> Vec<Arc<dyn PostCommitAction>> { std::mem::take(&mut self.inner.post_commit.lock().unwrap()) }
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Per-page fetch size.
    pub batch_size: usize,
    /// Overall cap on yielded entries.
    pub limit: Option<usize>,
    pub reverse: bool,
    pub snapshot: bool,
}

impl Default for ScanOptions {
    fn default() -> Self { Self { batch_size: 256, limit: None, reverse: false, snapshot: false } }
}

impl ScanOptions {
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn snapshot(mut self) -> Self {
        self.snapshot = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Paging async iterator over a key range. Registered with the transaction's
/// iterator tracker for the lifetime of the value.
pub struct RangeScan {
    txn: Arc<TransactionInner>,
    _guard: IteratorGuard,
    begin: Vec<u8>,
    end: Vec<u8>,
    opts: ScanOptions,
    buffer: std::collections::VecDeque<KeyValue>,
    exhausted: bool,
}

impl RangeScan {
    pub async fn next(&mut self) -> Result<Option<KeyValue>> {
        if self.opts.limit == Some(0) {
            return Ok(None);
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        match self.buffer.pop_front() {
            Some(entry) => {
                if let Some(limit) = self.opts.limit.as_mut() {
                    *limit -= 1;
                }
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    pub async fn collect_all(mut self) -> Result<Vec<KeyValue>> {
        let mut out = Vec::new();
        while let Some(entry) = self.next().await? {
            out.push(entry);
        }
        Ok(out)
    }

    async fn fill(&mut self) -> Result<()> {
        let page = self.opts.batch_size.min(self.opts.limit.unwrap_or(usize::MAX)).max(1);
        let opts = RangeOptions { limit: Some(page), reverse: self.opts.reverse, snapshot: self.opts.snapshot };
        let batch = self.txn.kv.get_range(&self.begin, &self.end, opts).await?;
        if batch.len() < page {
            self.exhausted = true;
        }
        if let Some(last) = batch.last() {
            if self.opts.reverse {
                // Next page ends just before the smallest key seen.
                self.end = last.key.clone();
            } else {
                let mut next = last.key.clone();
                next.push(0x00);
                self.begin = next;
            }
        }
        self.buffer.extend(batch);
        Ok(())
    }
}
