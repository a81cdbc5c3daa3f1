//! Retryable-call primitive
//!
//! Every suspension point in the pipeline goes through `call_with_retry`:
//! explicit per-call timeout, exponential backoff (1s -> 2s -> 4s), and a
//! retry predicate that distinguishes transient failures from fatal ones.

use crate::error::PortError;
use std::future::Future;
use std::time::Duration;

/// Retry policy: attempt count and base backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// Backoff before retry number `attempt` (1-based): base * 2^(attempt-1)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

/// Run `op` under `timeout` per attempt, retrying transient and parse
/// failures with exponential backoff until the attempt budget is spent.
///
/// Timeouts count as transient. The last error is returned unchanged so the
/// caller can distinguish a parse failure after the final attempt from a
/// provider failure.
pub async fn call_with_retry<T, F, Fut>(
    name: &str,
    timeout: Duration,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, PortError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PortError>>,
{
    let mut attempt = 1;
    loop {
        let outcome = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(PortError::Transient(format!(
                "{} timed out after {:?}",
                name, timeout
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let backoff = policy.backoff_for(attempt);
                tracing::warn!(
                    call = name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Retryable call failed, backing off"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::warn!(call = name, attempt, error = %err, "Call failed");
                return Err(err);
            }
        }
    }
}
