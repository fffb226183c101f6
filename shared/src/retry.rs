use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Exponential backoff used by compensators and recovery.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max: max.max(initial) }
    }

    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(5))
    }
}

/// Runs `op` until it succeeds, sleeping between attempts.
///
/// There is no attempt limit: callers use this only for operations that are
/// idempotent and must eventually land.
pub async fn retry_until_ok<T, E, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = policy.initial;
    let mut attempt: u64 = 1;
    loop {
        match op().await {
            Ok(value) => return value,
            Err(e) => {
                warn!(attempt, error = %e, "{} failed, retrying in {:?}", what, delay);
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(35));
        assert_eq!(policy.next_delay(Duration::from_millis(10)), Duration::from_millis(20));
        assert_eq!(policy.next_delay(Duration::from_millis(20)), Duration::from_millis(35));
        assert_eq!(policy.next_delay(Duration::from_millis(35)), Duration::from_millis(35));
    }

    #[test]
    fn max_is_never_below_initial() {
        let policy = RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(policy.max, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn retries_until_the_operation_succeeds() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2));

        let value = retry_until_ok(policy, "flaky op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
