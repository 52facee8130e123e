//! Large-transaction monitor: warns once per transaction when its buffered
//! mutation footprint crosses the configured threshold.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub struct TransactionMonitor {
    threshold: usize,
}

impl TransactionMonitor {
    pub fn new(threshold: usize) -> Self { Self { threshold } }

    pub fn observe(&self, bytes: &AtomicUsize, warned: &AtomicBool, added: usize) {
        let total = bytes.fetch_add(added, Ordering::Relaxed) + added;
        if total > self.threshold && !warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(bytes = total, threshold = self.threshold, "transaction exceeds size threshold");
        }
    }
}
