//! Exponential-backoff retry for transient chain errors.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use fusionx_core::{ErrorClass, SwapError};

/// Run `operation` up to `attempts` times, doubling the delay after each
/// transient failure. Non-transient errors (and `AlreadyDone`) short-circuit
/// immediately; only the chain's weather is worth waiting out.
pub async fn with_backoff<T, F, Fut>(
    what: &str,
    attempts: u32,
    base_delay: Duration,
    mut operation: F,
) -> Result<T, SwapError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SwapError>>,
{
    let attempts = attempts.max(1);
    let mut delay = base_delay;
    let mut last_err = None;
    for attempt in 1..=attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.class() == ErrorClass::Transient && attempt < attempts => {
                warn!(what, attempt, error = %e, delay_ms = delay.as_millis() as u64,
                      "transient failure; backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| SwapError::Other(format!("{what}: retries exhausted"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusionx_core::ChainId;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> SwapError {
        SwapError::Rpc { chain: ChainId(1), reason: "flaky".into() }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("probe", 3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(transient()) } else { Ok(42) } }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff("probe", 3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SwapError::InsufficientFunds { need: 10, have: 1 }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry on permanent errors");
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let result: Result<(), _> =
            with_backoff("probe", 2, Duration::from_millis(1), || async { Err(transient()) }).await;
        assert!(matches!(result, Err(SwapError::Rpc { .. })));
    }
}
