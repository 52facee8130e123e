use lamina_kv::TransactionPriority;
use std::time::Duration;

/// How `Database::run` obtains a read version for the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadVersionPolicy {
    /// Always ask the store. Never uses the cache.
    Server,
    /// Use the cached version whenever one is present.
    Cached,
    /// Use the cached version if it is at most this old (monotonic clock).
    Stale(Duration),
}

/// Pre-commit check execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// Stop at the first failing check.
    FailFast,
    /// Run every check; report the first failure, log the rest.
    CollectAll,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retry_limit: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { retry_limit: 10, initial_delay: Duration::from_millis(10), max_delay: Duration::from_secs(1) } }
}

impl RetryPolicy {
    /// Full-jitter exponential backoff: `min(initial * 2^attempt, max)` plus
    /// a uniform random component of up to half that. The exponent is capped
    /// at 10 so the shift cannot overflow.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exp = attempt.min(10) as u32;
        let cap = self.initial_delay.saturating_mul(1u32 << exp).min(self.max_delay);
        let jitter_micros = if cap.as_micros() == 0 { 0 } else { rand::random::<u64>() % (cap.as_micros() as u64 / 2 + 1) };
        cap + Duration::from_micros(jitter_micros)
    }
}

#[derive(Debug, Clone)]
pub struct TransactionOptions {
    pub retry: RetryPolicy,
    pub read_version: ReadVersionPolicy,
    pub timeout: Option<Duration>,
    pub check_mode: CheckMode,
    /// Forwarded to the KV transaction at every attempt.
    pub priority: TransactionPriority,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            read_version: ReadVersionPolicy::Server,
            timeout: None,
            check_mode: CheckMode::FailFast,
            priority: TransactionPriority::Normal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub transaction: TransactionOptions,
    /// Byte threshold of the large-transaction warning.
    pub large_transaction_threshold: usize,
    /// How long commit waits for outstanding range iterators to drain.
    pub iterator_fence_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            transaction: TransactionOptions::default(),
            large_transaction_threshold: 5 * 1024 * 1024,
            iterator_fence_timeout: Duration::from_secs(5),
        }
    }
}
