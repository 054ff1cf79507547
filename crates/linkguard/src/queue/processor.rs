/// Processing of one queued action: delete → log → ledger → notify.
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::directory::{GroupDirectory, OutboundMessage};
use crate::metrics::{bump, ModerationMetrics};
use crate::notify;
use crate::queue::ledger::WarningLedger;
use crate::queue::PendingAction;
use crate::retry::{retry, RetryError};
use crate::types::GroupId;

/// What happened to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActionOutcome {
    /// Deleted and the sender warned (`count` violations so far).
    Warned { count: u32 },
    /// Deleted and the sender removed from the group.
    Expelled,
    /// Every delete attempt failed; nothing else was done.
    DeleteFailed,
    /// Shutdown before the delete could be attempted.
    Cancelled,
}

pub(crate) struct ActionProcessor {
    directory: Arc<dyn GroupDirectory>,
    ledger: Arc<WarningLedger>,
    log_target: Option<GroupId>,
    delete_retry: RetryPolicy,
    cancel: CancellationToken,
    metrics: Arc<ModerationMetrics>,
}

impl ActionProcessor {
    pub(crate) fn new(
        directory: Arc<dyn GroupDirectory>,
        ledger: Arc<WarningLedger>,
        log_target: Option<GroupId>,
        delete_retry: RetryPolicy,
        cancel: CancellationToken,
        metrics: Arc<ModerationMetrics>,
    ) -> Self {
        Self {
            directory,
            ledger,
            log_target,
            delete_retry,
            cancel,
            metrics,
        }
    }

    pub(crate) async fn process(&self, action: &PendingAction) -> ActionOutcome {
        let directory = &*self.directory;
        let (group, message_id, sender) = (&action.group, action.message_id.as_str(), &action.sender);

        let deleted = retry(
            self.delete_retry,
            &self.cancel,
            move |_attempt| directory.delete_message(group, message_id, sender),
            |attempt, err| {
                tracing::warn!(group = %group, message_id, attempt, error = %err, "delete attempt failed");
            },
        )
        .await;

        match deleted {
            Ok(()) => {
                bump(&self.metrics.deletions_ok);
                tracing::info!(group = %group, sender = %sender, message_id, "deleted message with link");
            }
            Err(RetryError::Cancelled) => return ActionOutcome::Cancelled,
            Err(RetryError::Exhausted { attempts, last }) => {
                bump(&self.metrics.deletions_failed);
                tracing::error!(group = %group, message_id, attempts, error = %last, "giving up on delete");
                return ActionOutcome::DeleteFailed;
            }
        }

        if let Some(target) = &self.log_target {
            self.send(target, notify::log_forward(group, sender, &action.text))
                .await;
        }

        let outcome = self.ledger.record_violation(group, sender).await;
        if outcome.expelled {
            if let Some(target) = &self.log_target {
                self.send(target, notify::expulsion(sender, self.ledger.max_warns()))
                    .await;
            }
            return ActionOutcome::Expelled;
        }

        let warning = notify::warning(sender, outcome.count, self.ledger.max_warns());
        if self.send(group, warning).await {
            bump(&self.metrics.warnings_sent);
        }
        ActionOutcome::Warned {
            count: outcome.count,
        }
    }

    /// Best effort; a failed send is only logged.
    async fn send(&self, target: &GroupId, message: OutboundMessage) -> bool {
        match self.directory.send_message(target, message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(target_chat = %target, error = %e, "failed to send notification");
                false
            }
        }
    }
}
