/// AuthorizationOracle — "is this user an admin of this group".
///
/// Answers from the membership cache when it can and fetches on a miss.
/// Never fails: anything that prevents a definite answer yields `false`.
use std::collections::HashSet;
use std::sync::Arc;

use crate::directory::Participant;
use crate::membership::{AdminLookup, MembershipCache, RetryingFetcher};
use crate::metrics::{bump, ModerationMetrics};
use crate::types::{GroupId, UserId};

/// Admin identities of a membership snapshot.
pub fn admin_set(participants: &[Participant]) -> HashSet<UserId> {
    participants
        .iter()
        .filter(|p| p.is_admin())
        .map(|p| p.id.clone())
        .collect()
}

pub struct AuthorizationOracle {
    cache: Arc<MembershipCache>,
    fetcher: Arc<RetryingFetcher>,
    group_suffix: String,
    metrics: Arc<ModerationMetrics>,
}

impl AuthorizationOracle {
    pub fn new(
        cache: Arc<MembershipCache>,
        fetcher: Arc<RetryingFetcher>,
        group_suffix: String,
        metrics: Arc<ModerationMetrics>,
    ) -> Self {
        Self {
            cache,
            fetcher,
            group_suffix,
            metrics,
        }
    }

    /// Whether `user` administers `group`.
    ///
    /// `is_self_action` short-circuits to true for actions attributed to
    /// the bot itself. Private chats are never administered. A failed
    /// fetch answers false and leaves the cache untouched.
    pub async fn is_admin(&self, group: &GroupId, user: &UserId, is_self_action: bool) -> bool {
        if is_self_action {
            return true;
        }
        if !group.is_group_scoped(&self.group_suffix) {
            return false;
        }

        match self.cache.lookup(group, user) {
            AdminLookup::Admin => {
                bump(&self.metrics.cache_hits);
                return true;
            }
            AdminLookup::NotAdmin => {
                bump(&self.metrics.cache_hits);
                return false;
            }
            AdminLookup::Unknown => bump(&self.metrics.cache_misses),
        }

        let snapshot = match self.fetcher.fetch(group).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(group = %group, user = %user, error = %e, "admin check failed, treating as non-admin");
                return false;
            }
        };

        let admins = admin_set(&snapshot.participants);
        let answer = admins.contains(user);
        if !self.cache.populate_since(group, admins, snapshot.epoch()) {
            tracing::debug!(group = %group, "membership changed during fetch, snapshot not cached");
        }
        answer
    }
}
