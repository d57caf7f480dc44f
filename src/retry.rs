//! Generic exponential-backoff retry wrapper with a pluggable
//! retriable? classifier. Generalized from the near-identical
//! `execute_with_retry` loops duplicated per scraper
//! (`PolymarketScraper`, `HashdiveScraper`) into one reusable function
//! plus two named preconfigured policies.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// 3 attempts, fixed 2s delay, always retriable by the caller's
    /// classifier.
    pub fn auth() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(2),
        }
    }

    /// 8 attempts, exponential from 2s. Retriable on network failure,
    /// 5xx, and 429; explicitly not on 409 (duplicate, treated as
    /// success by the marketplace adapter itself before this ever sees
    /// it as an error).
    pub fn marketplace() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// What a classifier tells the retrier about a failed attempt.
pub struct Failure {
    pub retriable: bool,
    /// If the failure carried a `Retry-After`, honor it for this sleep
    /// instead of the running backoff delay. The backoff delay still
    /// advances for the next iteration regardless.
    pub retry_after: Option<Duration>,
}

pub async fn retry<T, E, F, Fut, C>(policy: &RetryPolicy, mut op: F, classify: C) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Failure,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let failure = classify(&err);
                if !failure.retriable || attempt >= policy.max_attempts {
                    return Err(err);
                }

                let sleep_for = failure
                    .retry_after
                    .map(|ra| ra + Duration::from_secs(1))
                    .unwrap_or(delay);
                warn!(attempt, sleep_ms = sleep_for.as_millis() as u64, "retrying after failure");
                tokio::time::sleep(sleep_for).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * policy.backoff_factor).min(policy.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn always_retriable(_: &&'static str) -> Failure {
        Failure { retriable: true, retry_after: None }
    }

    fn never_retriable(_: &&'static str) -> Failure {
        Failure { retriable: false, retry_after: None }
    }

    #[tokio::test]
    async fn succeeds_without_retrying_on_first_try() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { max_attempts: 3, initial_delay: Duration::from_millis(1), backoff_factor: 1.0, max_delay: Duration::from_millis(1) };

        let result: Result<u32, &'static str> = retry(
            &policy,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            },
            always_retriable,
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts_then_gives_up() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { max_attempts: 3, initial_delay: Duration::from_millis(1), backoff_factor: 1.0, max_delay: Duration::from_millis(1) };

        let result: Result<u32, &'static str> = retry(
            &policy,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
            always_retriable,
        )
        .await;

        assert_eq!(result, Err("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retriable_failure_stops_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { max_attempts: 5, initial_delay: Duration::from_millis(1), backoff_factor: 1.0, max_delay: Duration::from_millis(1) };

        let result: Result<u32, &'static str> = retry(
            &policy,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("conflict") }
            },
            never_retriable,
        )
        .await;

        assert_eq!(result, Err("conflict"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { max_attempts: 5, initial_delay: Duration::from_millis(1), backoff_factor: 1.0, max_delay: Duration::from_millis(1) };

        let result: Result<u32, &'static str> = retry(
            &policy,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("transient") } else { Ok(7) } }
            },
            always_retriable,
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
