/// ActionQueue — per-group serialized processing of moderation actions.
///
/// Each group drains its own FIFO in batches. A global budget bounds how
/// many groups drain at once; a group that cannot get a slot retries
/// shortly after without blocking the caller. Within a group, actions are
/// processed strictly in enqueue order.
///
/// ```text
///   enqueue ──► [dup window] ──► group FIFO ──► drain task (holds 1 budget slot)
///                                                 │ batch of N, sequential
///                                                 │ pause between batches
///                                                 └─ empty → idle (same lock as enqueue)
/// ```
pub mod ledger;
pub(crate) mod processor;

use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::QueueConfig;
use crate::metrics::{bump, ModerationMetrics};
use crate::types::{GroupId, UserId};

pub use ledger::{ViolationOutcome, WarningLedger};
pub(crate) use processor::ActionProcessor;

/// A message scheduled for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub group: GroupId,
    pub message_id: String,
    pub sender: UserId,
    /// Message text, forwarded to the log chat.
    pub text: String,
}

/// Result of [`ActionQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Same (group, message) seen inside the duplicate window.
    Duplicate,
    ShuttingDown,
}

struct QueueState {
    pending: HashMap<GroupId, VecDeque<PendingAction>>,
    /// Groups with a drain task, running or waiting for budget.
    draining: HashSet<GroupId>,
    /// First-enqueue time per (group, message id).
    recent: LruCache<(GroupId, String), Instant>,
}

struct Inner {
    state: Mutex<QueueState>,
    budget: Arc<Semaphore>,
    config: QueueConfig,
    processor: ActionProcessor,
    cancel: CancellationToken,
    tracker: TaskTracker,
    idle: Notify,
    metrics: Arc<ModerationMetrics>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending_nonempty(&self, group: &GroupId) -> bool {
        self.state().pending.get(group).is_some_and(|q| !q.is_empty())
    }

    /// Mark `group` idle and wake idle waiters if nothing drains anymore.
    fn finish(&self, group: &GroupId) {
        let all_idle = {
            let mut state = self.state();
            state.draining.remove(group);
            if state.pending.get(group).is_some_and(|q| q.is_empty()) {
                state.pending.remove(group);
            }
            state.draining.is_empty()
        };
        if all_idle {
            self.idle.notify_waiters();
        }
    }
}

pub struct ActionQueue {
    inner: Arc<Inner>,
}

impl ActionQueue {
    pub(crate) fn new(
        config: QueueConfig,
        processor: ActionProcessor,
        cancel: CancellationToken,
        metrics: Arc<ModerationMetrics>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.duplicate_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    pending: HashMap::new(),
                    draining: HashSet::new(),
                    recent: LruCache::new(capacity),
                }),
                budget: Arc::new(Semaphore::new(config.max_active_groups.max(1))),
                config,
                processor,
                cancel,
                tracker: TaskTracker::new(),
                idle: Notify::new(),
                metrics,
            }),
        }
    }

    /// Queue an action. Never waits: a drain is spawned if the group has
    /// none. Must be called from within a tokio runtime.
    pub fn enqueue(&self, action: PendingAction) -> EnqueueOutcome {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return EnqueueOutcome::ShuttingDown;
        }

        let group = action.group.clone();
        let start_drain = {
            let mut state = inner.state();
            let key = (group.clone(), action.message_id.clone());
            let now = Instant::now();
            let duplicate = state
                .recent
                .peek(&key)
                .is_some_and(|first| now.duration_since(*first) < inner.config.duplicate_window);
            if duplicate {
                drop(state);
                bump(&inner.metrics.duplicates_dropped);
                tracing::debug!(group = %group, message_id = %action.message_id, "duplicate action dropped");
                return EnqueueOutcome::Duplicate;
            }
            state.recent.put(key, now);
            state.pending.entry(group.clone()).or_default().push_back(action);
            state.draining.insert(group.clone())
        };

        bump(&inner.metrics.actions_enqueued);
        if start_drain {
            tracing::debug!(group = %group, "starting drain");
            inner.tracker.spawn(drain(inner.clone(), group));
        }
        EnqueueOutcome::Queued
    }

    /// Actions waiting in `group`'s queue.
    pub fn pending(&self, group: &GroupId) -> usize {
        self.inner.state().pending.get(group).map_or(0, VecDeque::len)
    }

    /// Groups that currently own a drain.
    pub fn draining_groups(&self) -> usize {
        self.inner.state().draining.len()
    }

    /// Resolves once no group is draining.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.state().draining.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting work, discard queued actions and the duplicate
    /// window, then wait for in-flight actions to settle.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.cancel.cancel();
        let discarded: usize = {
            let mut state = inner.state();
            let n = state.pending.values().map(VecDeque::len).sum();
            state.pending.clear();
            state.recent.clear();
            n
        };
        if discarded > 0 {
            tracing::info!(discarded, "discarding queued actions on shutdown");
        }
        inner.tracker.close();
        inner.tracker.wait().await;
    }
}

/// Acquire a budget slot, retrying after `budget_retry_delay` while the
/// budget is exhausted. `None` on shutdown.
async fn acquire_budget(inner: &Inner, group: &GroupId) -> Option<OwnedSemaphorePermit> {
    loop {
        if inner.cancel.is_cancelled() {
            return None;
        }
        match inner.budget.clone().try_acquire_owned() {
            Ok(permit) => return Some(permit),
            Err(_) => {
                tracing::debug!(group = %group, "drain budget exhausted, retrying");
                tokio::select! {
                    biased;
                    _ = inner.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(inner.config.budget_retry_delay) => {}
                }
            }
        }
    }
}

async fn drain(inner: Arc<Inner>, group: GroupId) {
    let Some(_permit) = acquire_budget(&inner, &group).await else {
        inner.finish(&group);
        return;
    };

    loop {
        if inner.cancel.is_cancelled() {
            break;
        }

        // The empty check and the idle transition share the lock with
        // enqueue, so a late arrival either lands in this batch or sees
        // the group idle and starts a new drain.
        let batch: Vec<PendingAction> = {
            let mut state = inner.state();
            let queue = state.pending.get_mut(&group);
            let batch: Vec<_> = match queue {
                Some(q) => {
                    let n = inner.config.batch_size.min(q.len());
                    q.drain(..n).collect()
                }
                None => Vec::new(),
            };
            if batch.is_empty() {
                state.pending.remove(&group);
                state.draining.remove(&group);
                let all_idle = state.draining.is_empty();
                drop(state);
                if all_idle {
                    inner.idle.notify_waiters();
                }
                tracing::debug!(group = %group, "drain finished");
                return;
            }
            batch
        };

        for action in &batch {
            if inner.cancel.is_cancelled() {
                break;
            }
            let outcome = inner.processor.process(action).await;
            tracing::debug!(group = %group, message_id = %action.message_id, ?outcome, "action processed");
        }

        if inner.pending_nonempty(&group) {
            tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => break,
                _ = tokio::time::sleep(inner.config.batch_delay) => {}
            }
        }
    }

    inner.finish(&group);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarningConfig;
    use crate::directory::{GroupDirectory, MemoryDirectory};
    use std::time::Duration;

    fn queue(dir: &MemoryDirectory, config: QueueConfig) -> ActionQueue {
        let metrics = Arc::new(ModerationMetrics::new());
        let cancel = CancellationToken::new();
        let directory: Arc<dyn GroupDirectory> = Arc::new(dir.clone());
        let ledger = Arc::new(WarningLedger::new(
            WarningConfig {
                max_warns: 100,
                remove_on_max: true,
            },
            directory.clone(),
            metrics.clone(),
        ));
        let processor = ActionProcessor::new(
            directory,
            ledger,
            None,
            config.delete_retry,
            cancel.clone(),
            metrics.clone(),
        );
        ActionQueue::new(config, processor, cancel, metrics)
    }

    fn with_budget(max_active_groups: usize) -> QueueConfig {
        QueueConfig {
            max_active_groups,
            ..QueueConfig::default()
        }
    }

    fn action(group: &str, id: &str) -> PendingAction {
        PendingAction {
            group: GroupId::new(group),
            message_id: id.to_string(),
            sender: UserId::new("u@x"),
            text: "spam.io".to_string(),
        }
    }

    fn deletes_in(dir: &MemoryDirectory, group: &str) -> Vec<String> {
        let group = GroupId::new(group);
        dir.calls()
            .into_iter()
            .filter_map(|c| match c {
                crate::directory::DirectoryCall::Delete { group: g, message_id } if g == group => {
                    Some(message_id)
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn processes_in_enqueue_order_with_batch_pause() {
        let dir = MemoryDirectory::new();
        let q = queue(&dir, QueueConfig::default());
        let start = Instant::now();

        let ids: Vec<String> = (1..=7).map(|i| format!("m{i}")).collect();
        for id in &ids {
            assert_eq!(q.enqueue(action("1@g.us", id)), EnqueueOutcome::Queued);
        }
        q.wait_idle().await;

        assert_eq!(dir.delete_attempts(), ids);
        // Two batches (5 + 2) with one pause between them.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(800));
        assert!(elapsed < Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_limits_concurrent_groups() {
        let dir = MemoryDirectory::new();
        let q = queue(&dir, with_budget(1));

        q.enqueue(action("1@g.us", "a1"));
        q.enqueue(action("2@g.us", "b1"));
        q.enqueue(action("1@g.us", "a2"));
        q.enqueue(action("2@g.us", "b2"));
        q.wait_idle().await;

        assert_eq!(dir.delete_attempts(), vec!["a1", "a2", "b1", "b2"]);
        assert_eq!(q.draining_groups(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_group_retries_budget_while_delete_backs_off() {
        let dir = MemoryDirectory::new();
        dir.fail_deletes_of("a1", 1);
        let q = queue(&dir, with_budget(1));
        let start = Instant::now();

        q.enqueue(action("1@g.us", "a1"));
        q.enqueue(action("2@g.us", "b1"));

        // a1 fails at 0ms and is retried at 400ms. Group 2 polls the budget
        // every 150ms and gets in on the first poll after that, at 450ms.
        let timeline = [
            (10, vec!["a1"]),
            (390, vec!["a1"]),
            (410, vec!["a1", "a1"]),
            (440, vec!["a1", "a1"]),
            (460, vec!["a1", "a1", "b1"]),
        ];
        for (at_ms, expected) in timeline {
            tokio::time::sleep_until(start + Duration::from_millis(at_ms)).await;
            assert_eq!(dir.delete_attempts(), expected, "at {at_ms}ms");
        }

        q.wait_idle().await;
        assert_eq!(q.draining_groups(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn order_holds_per_group_under_any_budget() {
        let dir = MemoryDirectory::new();
        let q = queue(&dir, with_budget(2));
        for i in 0..12 {
            let group = ["1@g.us", "2@g.us", "3@g.us"][i % 3];
            q.enqueue(action(group, &format!("{group}-{i}")));
        }
        q.wait_idle().await;

        for (k, group) in ["1@g.us", "2@g.us", "3@g.us"].iter().enumerate() {
            let expected: Vec<String> = (0..12)
                .filter(|i| i % 3 == k)
                .map(|i| format!("{group}-{i}"))
                .collect();
            assert_eq!(deletes_in(&dir, group), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_inside_window_are_dropped() {
        let dir = MemoryDirectory::new();
        let q = queue(&dir, QueueConfig::default());

        assert_eq!(q.enqueue(action("1@g.us", "m1")), EnqueueOutcome::Queued);
        assert_eq!(q.enqueue(action("1@g.us", "m1")), EnqueueOutcome::Duplicate);
        // Same id in another group is a different message.
        assert_eq!(q.enqueue(action("2@g.us", "m1")), EnqueueOutcome::Queued);
        q.wait_idle().await;
        assert_eq!(deletes_in(&dir, "1@g.us"), vec!["m1"]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(q.enqueue(action("1@g.us", "m1")), EnqueueOutcome::Queued);
        q.wait_idle().await;
        assert_eq!(deletes_in(&dir, "1@g.us"), vec!["m1", "m1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_does_not_stop_the_drain() {
        let dir = MemoryDirectory::new();
        dir.fail_deletes_of("m1", 5);
        let q = queue(&dir, QueueConfig::default());

        q.enqueue(action("1@g.us", "m1"));
        q.enqueue(action("1@g.us", "m2"));
        q.wait_idle().await;

        assert_eq!(dir.delete_attempts(), vec!["m1", "m1", "m2"]);
        assert_eq!(dir.sent_to(&GroupId::new("1@g.us")).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_arrival_after_idle_starts_new_drain() {
        let dir = MemoryDirectory::new();
        let q = queue(&dir, QueueConfig::default());

        q.enqueue(action("1@g.us", "m1"));
        q.wait_idle().await;
        q.enqueue(action("1@g.us", "m2"));
        q.wait_idle().await;
        assert_eq!(dir.delete_attempts(), vec!["m1", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_discards_queued_actions() {
        let dir = MemoryDirectory::new();
        let q = queue(&dir, QueueConfig::default());

        for i in 1..=7 {
            q.enqueue(action("1@g.us", &format!("m{i}")));
        }
        // First batch done, drain now pausing before the second.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(q.pending(&GroupId::new("1@g.us")), 2);

        q.shutdown().await;
        assert_eq!(dir.delete_attempts().len(), 5);
        assert_eq!(q.pending(&GroupId::new("1@g.us")), 0);
        assert_eq!(q.draining_groups(), 0);
        assert_eq!(q.enqueue(action("1@g.us", "m8")), EnqueueOutcome::ShuttingDown);
    }
}
