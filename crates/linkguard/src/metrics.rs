/// Moderation counters.
///
/// Relaxed atomics: these are statistics, read for reporting only, and
/// never used to make decisions.
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters shared by every component of one service instance.
#[derive(Debug, Default)]
pub struct ModerationMetrics {
    pub messages_seen: AtomicU64,
    pub actions_enqueued: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub deletions_ok: AtomicU64,
    pub deletions_failed: AtomicU64,
    pub warnings_sent: AtomicU64,
    pub expulsions: AtomicU64,
    pub removal_failures: AtomicU64,
    pub fetch_attempts: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
}

/// Point-in-time copy of [`ModerationMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_seen: u64,
    pub actions_enqueued: u64,
    pub duplicates_dropped: u64,
    pub deletions_ok: u64,
    pub deletions_failed: u64,
    pub warnings_sent: u64,
    pub expulsions: u64,
    pub removal_failures: u64,
    pub fetch_attempts: u64,
    pub fetch_failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl ModerationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            messages_seen: get(&self.messages_seen),
            actions_enqueued: get(&self.actions_enqueued),
            duplicates_dropped: get(&self.duplicates_dropped),
            deletions_ok: get(&self.deletions_ok),
            deletions_failed: get(&self.deletions_failed),
            warnings_sent: get(&self.warnings_sent),
            expulsions: get(&self.expulsions),
            removal_failures: get(&self.removal_failures),
            fetch_attempts: get(&self.fetch_attempts),
            fetch_failures: get(&self.fetch_failures),
            cache_hits: get(&self.cache_hits),
            cache_misses: get(&self.cache_misses),
        }
    }
}
