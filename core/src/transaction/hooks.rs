//! Commit hooks and post-commit actions.
//!
//! A [`CommitHook`] is registered process-wide and sees every transaction:
//! `before_commit` runs synchronously and may veto the commit; `after_commit`
//! runs once the commit is durable, with failures logged only. A
//! [`PostCommitAction`] is registered on a single transaction; actions are
//! grouped by priority class, classes run highest-first, actions within a
//! class run concurrently, and each action's result is collected rather than
//! thrown.

use crate::error::{Error, Result};
use crate::transaction::Transaction;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};

pub trait CommitHook: Send + Sync {
    fn name(&self) -> &str;

    /// Higher priorities run first.
    fn priority(&self) -> i32 { 0 }

    /// Synchronous pre-commit validation. An error aborts the commit.
    fn before_commit(&self, _txn: &Transaction) -> Result<()> { Ok(()) }

    /// Post-commit side effect. Must not fail the caller; any panic-free
    /// error handling is the hook's own business.
    fn after_commit(&self, _committed_version: i64) {}
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn CommitHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&self, hook: Arc<dyn CommitHook>) {
        let mut hooks = self.hooks.write().unwrap();
        hooks.push(hook);
        hooks.sort_by_key(|h| std::cmp::Reverse(h.priority()));
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn CommitHook>> { self.hooks.read().unwrap().clone() }
}

/// Observer of transaction lifecycle events, for metrics and logging
/// surfaces. Callbacks must be cheap and must not touch the transaction.
pub trait TransactionListener: Send + Sync {
    fn on_attempt(&self, _attempt: usize) {}

    fn on_commit(&self, _committed_version: i64, _attempts: usize) {}

    fn on_abort(&self, _error: &Error, _attempt: usize) {}
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn TransactionListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&self, listener: Arc<dyn TransactionListener>) { self.listeners.write().unwrap().push(listener); }

    pub fn snapshot(&self) -> Vec<Arc<dyn TransactionListener>> { self.listeners.read().unwrap().clone() }
}

#[async_trait]
pub trait PostCommitAction: Send + Sync {
    fn name(&self) -> &str { "post-commit" }

    /// Actions with a higher class run (and complete) before lower classes
    /// start; actions sharing a class run concurrently.
    fn priority_class(&self) -> u8 { 0 }

    async fn run(&self) -> Result<()>;
}

/// Run the given actions by descending priority class; within a class all
/// actions run concurrently. Results come back in registration order.
pub async fn run_post_commit(actions: Vec<Arc<dyn PostCommitAction>>) -> Vec<Result<()>> {
    let mut indexed: Vec<(usize, Arc<dyn PostCommitAction>)> = actions.into_iter().enumerate().collect();
    indexed.sort_by_key(|(i, a)| (std::cmp::Reverse(a.priority_class()), *i));

    let mut results: Vec<Option<Result<()>>> = (0..indexed.len()).map(|_| None).collect();
    let mut cursor = 0;
    while cursor < indexed.len() {
        let class = indexed[cursor].1.priority_class();
        let mut batch = Vec::new();
        while cursor < indexed.len() && indexed[cursor].1.priority_class() == class {
            batch.push(indexed[cursor].clone());
            cursor += 1;
        }
        let outcomes = futures::future::join_all(batch.iter().map(|(_, action)| action.run())).await;
        for ((original, action), outcome) in batch.into_iter().zip(outcomes) {
            if let Err(err) = &outcome {
                tracing::warn!(action = action.name(), error = %err, "post-commit action failed");
            }
            results[original] = Some(outcome);
        }
    }
    results.into_iter().map(|r| r.unwrap_or_else(|| Err(Error::Cancelled))).collect()
}
