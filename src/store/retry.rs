use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::StoreError;

/// Fixed retry budget for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(10);

    /// `attempts` is clamped to at least one.
    pub const fn new(attempts: u32, backoff: Duration) -> Self {
        let attempts = if attempts == 0 { 1 } else { attempts };
        Self { attempts, backoff }
    }

    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub const fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ATTEMPTS, Self::DEFAULT_BACKOFF)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the budget is spent.
///
/// Each attempt must be a complete unit of work: a transient failure means the
/// attempt did not take effect. Sleeps `backoff * attempt` between attempts.
pub(crate) async fn with_retries<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(StoreError::Transient(reason)) if attempt < policy.attempts() => {
                warn!(
                    operation = label,
                    attempt,
                    budget = policy.attempts(),
                    %reason,
                    "transient store failure, retrying"
                );
                tokio::time::sleep(policy.backoff() * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
