//! Per-provider rate limiting
//!
//! The token buckets are the only mutable process-wide state in the agent.
//! Acquisition is bounded: if no token is granted within the configured
//! wait, the call fails soft with `PortError::RateLimited` instead of
//! queueing indefinitely.

use crate::error::PortError;
use std::num::NonZeroU32;
use std::time::Duration;

type DirectLimiter = governor::RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Token bucket for one upstream provider
pub struct ProviderLimiter {
    name: &'static str,
    limiter: DirectLimiter,
}

impl ProviderLimiter {
    /// Bucket refilled at `per_minute` tokens per minute (Discogs: 60)
    pub fn per_minute(name: &'static str, per_minute: u32) -> Self {
        // Safe: caller passes a compile-time non-zero quota
        let quota = governor::Quota::per_minute(NonZeroU32::new(per_minute.max(1)).unwrap());
        Self {
            name,
            limiter: governor::RateLimiter::direct(quota),
        }
    }

    /// Bucket refilled at `per_second` tokens per second (MusicBrainz: 1)
    pub fn per_second(name: &'static str, per_second: u32) -> Self {
        let quota = governor::Quota::per_second(NonZeroU32::new(per_second.max(1)).unwrap());
        Self {
            name,
            limiter: governor::RateLimiter::direct(quota),
        }
    }

    /// Wait for a token, at most `wait_budget`
    pub async fn acquire(&self, wait_budget: Duration) -> Result<(), PortError> {
        match tokio::time::timeout(wait_budget, self.limiter.until_ready()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!(
                    provider = self.name,
                    wait_ms = wait_budget.as_millis() as u64,
                    "Rate limit token not granted within bounded wait"
                );
                Err(PortError::RateLimited)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_token_is_immediate() {
        let limiter = ProviderLimiter::per_second("test", 1);
        assert!(limiter.acquire(Duration::from_millis(100)).await.is_ok());
    }

    #[tokio::test]
    async fn exhausted_bucket_fails_soft_within_budget() {
        let limiter = ProviderLimiter::per_minute("test", 1);
        assert!(limiter.acquire(Duration::from_millis(50)).await.is_ok());
        // Second token would take ~a minute; the bounded wait gives up first
        let second = limiter.acquire(Duration::from_millis(50)).await;
        assert!(matches!(second, Err(PortError::RateLimited)));
    }
}
