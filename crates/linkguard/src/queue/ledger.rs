/// WarningLedger — per (group, user) violation counter.
///
/// Counters are created on the first violation. Reaching the threshold
/// with removal enabled expels the user and clears the counter; a failed
/// removal is logged and the counter is left where it is.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::WarningConfig;
use crate::directory::GroupDirectory;
use crate::metrics::{bump, ModerationMetrics};
use crate::types::{GroupId, UserId};

/// Result of recording one violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationOutcome {
    /// Violations counted for the user, including this one.
    pub count: u32,
    /// The user was removed from the group.
    pub expelled: bool,
}

pub struct WarningLedger {
    counts: Mutex<HashMap<(GroupId, UserId), u32>>,
    config: WarningConfig,
    directory: Arc<dyn GroupDirectory>,
    metrics: Arc<ModerationMetrics>,
}

impl WarningLedger {
    pub fn new(
        config: WarningConfig,
        directory: Arc<dyn GroupDirectory>,
        metrics: Arc<ModerationMetrics>,
    ) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            config,
            directory,
            metrics,
        }
    }

    fn counts(&self) -> MutexGuard<'_, HashMap<(GroupId, UserId), u32>> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn max_warns(&self) -> u32 {
        self.config.max_warns
    }

    /// Current count for a user (0 if none).
    pub fn count(&self, group: &GroupId, user: &UserId) -> u32 {
        self.counts()
            .get(&(group.clone(), user.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub async fn record_violation(&self, group: &GroupId, user: &UserId) -> ViolationOutcome {
        let key = (group.clone(), user.clone());
        let count = {
            let mut counts = self.counts();
            let entry = counts.entry(key.clone()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };

        if count < self.config.max_warns || !self.config.remove_on_max {
            return ViolationOutcome {
                count,
                expelled: false,
            };
        }

        match self.directory.remove_participant(group, user).await {
            Ok(()) => {
                self.counts().remove(&key);
                bump(&self.metrics.expulsions);
                tracing::info!(group = %group, user = %user, count, "user removed after repeated link violations");
                ViolationOutcome {
                    count,
                    expelled: true,
                }
            }
            Err(e) => {
                bump(&self.metrics.removal_failures);
                tracing::warn!(group = %group, user = %user, count, error = %e, "failed to remove user");
                ViolationOutcome {
                    count,
                    expelled: false,
                }
            }
        }
    }

    /// Drop every counter.
    pub fn clear(&self) {
        self.counts().clear();
    }
}
