/// RetryingFetcher — membership fetch with retries and request coalescing.
///
/// Concurrent callers asking for the same group share one outstanding
/// fetch and all observe its outcome. An empty snapshot counts as a
/// failed attempt; a partial one is never returned.
///
/// Each snapshot carries the cache epoch guard taken when its fetch started,
/// so callers that joined late still validate against the right point in
/// time. The guard is released once every caller drops the snapshot.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::directory::{GroupDirectory, Participant};
use crate::error::FetchError;
use crate::membership::cache::{CacheEpoch, EpochGuard, MembershipCache};
use crate::metrics::{bump, ModerationMetrics};
use crate::retry::{retry, RetryError};
use crate::types::GroupId;

/// A successful fetch.
#[derive(Debug)]
pub struct MembershipSnapshot {
    pub participants: Vec<Participant>,
    guard: EpochGuard,
}

impl MembershipSnapshot {
    /// Cache epoch of the group when the fetch started.
    pub fn epoch(&self) -> CacheEpoch {
        self.guard.epoch()
    }
}

/// Immutable membership snapshot shared between coalesced callers.
pub type Membership = Arc<MembershipSnapshot>;

type InFlight = Shared<BoxFuture<'static, Result<Membership, FetchError>>>;
type InFlightMap = Arc<Mutex<HashMap<GroupId, InFlight>>>;

fn lock(map: &InFlightMap) -> MutexGuard<'_, HashMap<GroupId, InFlight>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct RetryingFetcher {
    directory: Arc<dyn GroupDirectory>,
    cache: Arc<MembershipCache>,
    policy: RetryPolicy,
    in_flight: InFlightMap,
    cancel: CancellationToken,
    metrics: Arc<ModerationMetrics>,
}

impl RetryingFetcher {
    pub fn new(
        directory: Arc<dyn GroupDirectory>,
        cache: Arc<MembershipCache>,
        policy: RetryPolicy,
        cancel: CancellationToken,
        metrics: Arc<ModerationMetrics>,
    ) -> Self {
        Self {
            directory,
            cache,
            policy,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            cancel,
            metrics,
        }
    }

    /// Fetch the membership of `group`, joining an outstanding fetch if any.
    pub async fn fetch(&self, group: &GroupId) -> Result<Membership, FetchError> {
        let shared = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(group) {
                Some(existing) => {
                    tracing::debug!(group = %group, "joining in-flight membership fetch");
                    existing.clone()
                }
                None => {
                    let fut = fetch_with_retries(
                        self.directory.clone(),
                        group.clone(),
                        self.cache.begin_fetch(group),
                        self.policy,
                        self.cancel.clone(),
                        self.metrics.clone(),
                        self.in_flight.clone(),
                    )
                    .boxed()
                    .shared();
                    in_flight.insert(group.clone(), fut.clone());
                    fut
                }
            }
        };
        shared.await
    }

    /// Number of groups with a fetch outstanding.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Forget outstanding fetches. Callers already awaiting keep their handle.
    pub fn clear(&self) {
        lock(&self.in_flight).clear();
    }
}

async fn fetch_with_retries(
    directory: Arc<dyn GroupDirectory>,
    group: GroupId,
    guard: EpochGuard,
    policy: RetryPolicy,
    cancel: CancellationToken,
    metrics: Arc<ModerationMetrics>,
    in_flight: InFlightMap,
) -> Result<Membership, FetchError> {
    let outcome = retry(
        policy,
        &cancel,
        |_attempt| {
            let directory = &directory;
            let group = &group;
            let metrics = &metrics;
            async move {
                bump(&metrics.fetch_attempts);
                match directory.fetch_membership(group).await {
                    Ok(participants) if !participants.is_empty() => Ok(participants),
                    Ok(_) => Err(FetchError::EmptyMembership {
                        group: group.clone(),
                    }),
                    Err(source) => Err(FetchError::Directory {
                        group: group.clone(),
                        source,
                    }),
                }
            }
        },
        |attempt, err| {
            tracing::warn!(group = %group, attempt, error = %err, "membership fetch attempt failed");
        },
    )
    .await;

    lock(&in_flight).remove(&group);

    match outcome {
        Ok(participants) => Ok(Arc::new(MembershipSnapshot { participants, guard })),
        Err(RetryError::Cancelled) => Err(FetchError::Cancelled),
        Err(RetryError::Exhausted { attempts, last }) => {
            bump(&metrics.fetch_failures);
            tracing::error!(group = %group, attempts, error = %last, "membership fetch exhausted");
            Err(FetchError::Exhausted {
                group,
                attempts,
                last: Box::new(last),
            })
        }
    }
}
