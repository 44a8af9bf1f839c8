use std::future::Future;

use tracing::{debug, warn};

use crate::chain::ChainId;
use crate::config::RetryPolicy;
use crate::error::Result;
use crate::traits::Clock;

/// Runs a read RPC under a fixed attempt budget.
///
/// Only transient failures are retried; anything else is returned at once.
/// After the last attempt the final transient error is returned.
pub(crate) async fn with_retry<T, F, Fut>(
    clock: &dyn Clock,
    policy: RetryPolicy,
    chain: ChainId,
    operation: &'static str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                debug!(
                    chain = %chain,
                    operation,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    event = "rpc_retry"
                );
                attempt += 1;
                clock.sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Turns an exhausted retry budget into "undetermined" (`fallback`)
pub(crate) fn undetermined<T>(
    result: Result<T>,
    fallback: T,
    chain: ChainId,
    operation: &'static str,
) -> Result<T> {
    match result {
        Err(e) if e.is_transient() => {
            warn!(
                chain = %chain,
                operation,
                error = %e,
                event = "rpc_undetermined"
            );
            Ok(fallback)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClock;
    use crate::XCallError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn unavailable() -> XCallError {
        XCallError::RpcUnavailable {
            chain: ChainId::IconMainnet,
            reason: "connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let clock = FakeClock::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(
            &clock,
            RetryPolicy::default(),
            ChainId::IconMainnet,
            "test",
            move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(unavailable())
                } else {
                    Ok(7u64)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1); 3]);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_undetermined() {
        let clock = FakeClock::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<Option<u64>> = with_retry(
            &clock,
            RetryPolicy::default(),
            ChainId::IconMainnet,
            "test",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(clock.sleeps().len(), 9);
        let result = undetermined(result, None, ChainId::IconMainnet, "test");
        assert_eq!(result.unwrap(), None);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let clock = FakeClock::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u64> = with_retry(
            &clock,
            RetryPolicy::default(),
            ChainId::Archway,
            "test",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(XCallError::InvalidConfig("bad contract".to_string()))
            },
        )
        .await;

        assert!(matches!(result, Err(XCallError::InvalidConfig(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }
}
