/// Bounded retry with linear backoff.
///
/// An explicit attempt → sleep → attempt sequence. The sleep races the
/// shutdown token, so a cancelled service never starts another attempt.
use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RetryError<E> {
    /// Every attempt failed; carries the last error.
    Exhausted { attempts: u32, last: E },
    /// Shutdown was requested before an attempt could start.
    Cancelled,
}

/// Run `op` until it succeeds or `policy.attempts` is used up.
///
/// `on_failure` sees every failed attempt (1-based) before the backoff.
pub(crate) async fn retry<T, E, F, Fut, L>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
    mut on_failure: L,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    L: FnMut(u32, &E),
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        on_failure(attempt, &err);

        if attempt >= attempts {
            return Err(RetryError::Exhausted { attempts, last: err });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(policy.delay_after(attempt)) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    const POLICY: RetryPolicy = RetryPolicy::new(3, Duration::from_millis(300));

    /// Paused-clock timers may land up to a tick past their deadline.
    fn about(actual: Duration, expected_ms: u64) -> bool {
        let expected = Duration::from_millis(expected_ms);
        actual >= expected && actual < expected + Duration::from_millis(5)
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_second_attempt_after_one_backoff() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let out: Result<u32, RetryError<&str>> = retry(
            POLICY,
            &CancellationToken::new(),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { if attempt == 2 { Ok(attempt) } else { Err("nope") } }
            },
            |_, _| {},
        )
        .await;

        assert_eq!(out, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(about(start.elapsed(), 300));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_waits_linear_backoff_and_no_trailing_sleep() {
        let mut failures = Vec::new();
        let start = Instant::now();
        let out: Result<(), RetryError<u32>> = retry(
            POLICY,
            &CancellationToken::new(),
            |attempt| async move { Err(attempt) },
            |attempt, _| failures.push((attempt, start.elapsed())),
        )
        .await;

        assert_eq!(out, Err(RetryError::Exhausted { attempts: 3, last: 3 }));
        let attempts: Vec<u32> = failures.iter().map(|(a, _)| *a).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert!(about(failures[0].1, 0));
        assert!(about(failures[1].1, 300));
        assert!(about(failures[2].1, 900));
        assert!(about(start.elapsed(), 900));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_before_next_attempt() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let out: Result<(), RetryError<()>> = retry(
            POLICY,
            &cancel,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(()) }
            },
            |_, _| cancel.cancel(),
        )
        .await;

        assert_eq!(out, Err(RetryError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
