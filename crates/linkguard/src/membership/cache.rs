/// MembershipCache — admin sets per group.
///
/// Entries are filled from a successful membership fetch and then kept
/// current by membership events: promote/demote edit the set in place,
/// anything structural drops the entry so the next lookup refetches.
/// Nothing expires on a timer unless a `max_age` policy is configured.
///
/// A fetch registers an [`EpochGuard`] before it starts and only installs
/// its result if no event touched the group in between, so a snapshot taken
/// before a promotion can never overwrite the promotion. Epochs are only
/// kept for groups with a guard alive.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;

use crate::config::CachePolicy;
use crate::membership::events::MembershipDelta;
use crate::types::{GroupId, UserId};

/// Result of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminLookup {
    Admin,
    NotAdmin,
    /// No entry for the group.
    Unknown,
}

/// Direction of a role change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleDirection {
    Promote,
    Demote,
}

/// Opaque token identifying the cache state of one group at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEpoch {
    generation: u64,
    group: u64,
}

#[derive(Debug)]
struct AdminCacheEntry {
    admins: HashSet<UserId>,
    populated_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<GroupId, AdminCacheEntry>,
    /// Mutation counters of watched groups only.
    epochs: HashMap<GroupId, u64>,
    /// Live [`EpochGuard`]s per group.
    watchers: HashMap<GroupId, usize>,
    /// Bumped by `invalidate_all`.
    generation: u64,
}

impl CacheState {
    fn bump(&mut self, group: &GroupId) {
        if self.watchers.contains_key(group) {
            *self.epochs.entry(group.clone()).or_insert(0) += 1;
        }
    }

    fn epoch(&self, group: &GroupId) -> CacheEpoch {
        CacheEpoch {
            generation: self.generation,
            group: self.epochs.get(group).copied().unwrap_or(0),
        }
    }
}

type SharedState = Arc<Mutex<CacheState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Keeps a group's epoch tracked while a fetch result may still be installed.
///
/// Dropping the last guard of a group forgets its epoch.
pub struct EpochGuard {
    state: SharedState,
    group: GroupId,
    epoch: CacheEpoch,
}

impl EpochGuard {
    /// Epoch of the group when the guard was taken.
    pub fn epoch(&self) -> CacheEpoch {
        self.epoch
    }
}

impl fmt::Debug for EpochGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochGuard")
            .field("group", &self.group)
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl Drop for EpochGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        let remaining = match state.watchers.get_mut(&self.group) {
            Some(n) => {
                *n = n.saturating_sub(1);
                *n
            }
            None => return,
        };
        if remaining == 0 {
            state.watchers.remove(&self.group);
            state.epochs.remove(&self.group);
        }
    }
}

/// Process-wide admin cache. One instance per moderation service.
pub struct MembershipCache {
    state: SharedState,
    policy: CachePolicy,
}

impl MembershipCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            policy,
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        lock(&self.state)
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Admin, not admin, or unknown when the group has no entry.
    pub fn lookup(&self, group: &GroupId, user: &UserId) -> AdminLookup {
        let mut state = self.state();
        let expired = match state.entries.get(group) {
            None => return AdminLookup::Unknown,
            Some(entry) => self
                .policy
                .max_age
                .is_some_and(|max| entry.populated_at.elapsed() >= max),
        };
        if expired {
            state.entries.remove(group);
            state.bump(group);
            return AdminLookup::Unknown;
        }

        match state.entries.get(group) {
            Some(entry) if entry.admins.contains(user) => AdminLookup::Admin,
            Some(_) => AdminLookup::NotAdmin,
            None => AdminLookup::Unknown,
        }
    }

    /// Current admin set of a group, sorted, if cached.
    pub fn admins(&self, group: &GroupId) -> Option<Vec<UserId>> {
        let state = self.state();
        let entry = state.entries.get(group)?;
        let mut admins: Vec<UserId> = entry.admins.iter().cloned().collect();
        admins.sort();
        Some(admins)
    }

    pub fn contains(&self, group: &GroupId) -> bool {
        self.state().entries.contains_key(group)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Start watching `group` before fetching it. Events arriving while the
    /// guard lives make [`populate_since`](Self::populate_since) refuse the
    /// guard's epoch.
    pub fn begin_fetch(&self, group: &GroupId) -> EpochGuard {
        let mut state = self.state();
        *state.watchers.entry(group.clone()).or_insert(0) += 1;
        EpochGuard {
            state: self.state.clone(),
            group: group.clone(),
            epoch: state.epoch(group),
        }
    }

    /// Number of groups whose epoch is currently tracked.
    pub fn tracked_epochs(&self) -> usize {
        self.state().epochs.len()
    }

    // ── Mutations ────────────────────────────────────────────────────────

    /// Install or replace the entry outright.
    pub fn populate(&self, group: &GroupId, admins: impl IntoIterator<Item = UserId>) {
        let mut state = self.state();
        state.bump(group);
        state.entries.insert(
            group.clone(),
            AdminCacheEntry {
                admins: admins.into_iter().collect(),
                populated_at: Instant::now(),
            },
        );
    }

    /// Install the entry only if nothing touched the group since `epoch`.
    ///
    /// Returns false when the snapshot is stale and was discarded.
    pub fn populate_since(
        &self,
        group: &GroupId,
        admins: impl IntoIterator<Item = UserId>,
        epoch: CacheEpoch,
    ) -> bool {
        let mut state = self.state();
        if state.epoch(group) != epoch {
            return false;
        }
        state.bump(group);
        state.entries.insert(
            group.clone(),
            AdminCacheEntry {
                admins: admins.into_iter().collect(),
                populated_at: Instant::now(),
            },
        );
        true
    }

    /// Add or remove users from an existing entry. No-op without an entry.
    ///
    /// Returns whether an entry was present.
    pub fn apply_role_change(&self, group: &GroupId, users: &[UserId], direction: RoleDirection) -> bool {
        let mut state = self.state();
        state.bump(group);
        let Some(entry) = state.entries.get_mut(group) else {
            return false;
        };
        match direction {
            RoleDirection::Promote => entry.admins.extend(users.iter().cloned()),
            RoleDirection::Demote => {
                for user in users {
                    entry.admins.remove(user);
                }
            }
        }
        true
    }

    /// Drop the entry of one group. Returns whether one existed.
    pub fn invalidate(&self, group: &GroupId) -> bool {
        let mut state = self.state();
        state.bump(group);
        state.entries.remove(group).is_some()
    }

    /// Drop every entry.
    pub fn invalidate_all(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.epochs.clear();
        state.generation += 1;
    }

    /// Apply a membership delta for a group. Never fetches.
    pub fn apply(&self, group: &GroupId, delta: &MembershipDelta) {
        match delta {
            MembershipDelta::Promoted(users) => {
                self.apply_role_change(group, users, RoleDirection::Promote);
            }
            MembershipDelta::Demoted(users) => {
                self.apply_role_change(group, users, RoleDirection::Demote);
            }
            MembershipDelta::StructuralChange => {
                self.invalidate(group);
            }
            MembershipDelta::Unknown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn g(s: &str) -> GroupId {
        GroupId::new(s)
    }

    fn u(s: &str) -> UserId {
        UserId::new(s)
    }

    fn cache() -> MembershipCache {
        MembershipCache::new(CachePolicy::default())
    }

    #[test]
    fn miss_is_unknown() {
        let c = cache();
        assert_eq!(c.lookup(&g("1@g.us"), &u("a@x")), AdminLookup::Unknown);
    }

    #[test]
    fn populate_is_authoritative() {
        let c = cache();
        let grp = g("1@g.us");
        c.populate(&grp, [u("a@x"), u("b@x")]);
        assert_eq!(c.lookup(&grp, &u("a@x")), AdminLookup::Admin);
        assert_eq!(c.lookup(&grp, &u("B:2@X")), AdminLookup::Admin);
        assert_eq!(c.lookup(&grp, &u("c@x")), AdminLookup::NotAdmin);

        // Replaces, does not merge.
        c.populate(&grp, [u("c@x")]);
        assert_eq!(c.lookup(&grp, &u("a@x")), AdminLookup::NotAdmin);
        assert_eq!(c.lookup(&grp, &u("c@x")), AdminLookup::Admin);
    }

    #[test]
    fn promote_then_demote_restores() {
        let c = cache();
        let grp = g("1@g.us");
        c.populate(&grp, [u("a@x")]);
        assert!(c.apply_role_change(&grp, &[u("b@x")], RoleDirection::Promote));
        assert_eq!(c.lookup(&grp, &u("b@x")), AdminLookup::Admin);
        assert!(c.apply_role_change(&grp, &[u("b@x")], RoleDirection::Demote));
        assert_eq!(c.lookup(&grp, &u("b@x")), AdminLookup::NotAdmin);
        assert_eq!(c.admins(&grp), Some(vec![u("a@x")]));
    }

    #[test]
    fn role_change_without_entry_is_noop() {
        let c = cache();
        let grp = g("1@g.us");
        assert!(!c.apply_role_change(&grp, &[u("a@x")], RoleDirection::Promote));
        assert!(!c.contains(&grp));
        assert_eq!(c.lookup(&grp, &u("a@x")), AdminLookup::Unknown);
    }

    #[test]
    fn structural_change_drops_entry() {
        let c = cache();
        let grp = g("1@g.us");
        c.populate(&grp, [u("a@x")]);
        c.apply(&grp, &MembershipDelta::StructuralChange);
        assert_eq!(c.lookup(&grp, &u("a@x")), AdminLookup::Unknown);
    }

    #[test]
    fn unknown_delta_leaves_entry() {
        let c = cache();
        let grp = g("1@g.us");
        c.populate(&grp, [u("a@x")]);
        c.apply(&grp, &MembershipDelta::Unknown);
        assert_eq!(c.lookup(&grp, &u("a@x")), AdminLookup::Admin);
    }

    #[test]
    fn invalidate_all_clears() {
        let c = cache();
        c.populate(&g("1@g.us"), [u("a@x")]);
        c.populate(&g("2@g.us"), [u("a@x")]);
        assert_eq!(c.len(), 2);
        c.invalidate_all();
        assert!(c.is_empty());
    }

    #[test]
    fn stale_snapshot_is_discarded() {
        let c = cache();
        let grp = g("1@g.us");
        let before = c.begin_fetch(&grp);
        // Event lands while the fetch is in flight.
        c.apply(&grp, &MembershipDelta::Promoted(vec![u("b@x")]));
        assert!(!c.populate_since(&grp, [u("a@x")], before.epoch()));
        assert!(!c.contains(&grp));

        let fresh = c.begin_fetch(&grp);
        assert!(c.populate_since(&grp, [u("a@x")], fresh.epoch()));
        assert!(c.contains(&grp));
    }

    #[test]
    fn events_for_unwatched_groups_leave_no_epoch_behind() {
        let c = cache();
        for i in 0..50 {
            let grp = g(&format!("{i}@g.us"));
            c.apply(&grp, &MembershipDelta::Promoted(vec![u("b@x")]));
            c.apply(&grp, &MembershipDelta::StructuralChange);
        }
        assert_eq!(c.tracked_epochs(), 0);

        let grp = g("1@g.us");
        let first = c.begin_fetch(&grp);
        let second = c.begin_fetch(&grp);
        c.apply(&grp, &MembershipDelta::StructuralChange);
        assert_eq!(c.tracked_epochs(), 1);

        drop(first);
        // A guard is still alive, so the event stays visible to it.
        assert!(!c.populate_since(&grp, [u("a@x")], second.epoch()));
        drop(second);
        assert_eq!(c.tracked_epochs(), 0);
    }

    #[test]
    fn invalidate_all_stales_every_epoch() {
        let c = cache();
        let grp = g("1@g.us");
        let before = c.begin_fetch(&grp);
        c.invalidate_all();
        assert!(!c.populate_since(&grp, [u("a@x")], before.epoch()));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_never_expire_by_default() {
        let c = cache();
        let grp = g("1@g.us");
        c.populate(&grp, [u("a@x")]);
        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
        assert_eq!(c.lookup(&grp, &u("a@x")), AdminLookup::Admin);
    }

    #[tokio::test(start_paused = true)]
    async fn optional_max_age_expires() {
        let c = MembershipCache::new(CachePolicy {
            max_age: Some(Duration::from_secs(60)),
        });
        let grp = g("1@g.us");
        c.populate(&grp, [u("a@x")]);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(c.lookup(&grp, &u("a@x")), AdminLookup::Unknown);
        assert!(!c.contains(&grp));
    }
}
