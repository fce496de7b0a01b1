use crate::config::RetryConfig;
use crate::ratelimit::FailureClass;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Decision returned by the retry policy after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Pause, then make attempt number `attempt` (0-based).
    Retry { attempt: u32 },
    /// Fatal failure or retries exhausted: report the failure.
    GiveUp,
}

/// Bounded retry policy for transient failures.
///
/// Attempt 0 is the first call; at most `max_retries` further attempts follow,
/// each preceded by a fixed `backoff` pause. Fatal failures are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, Duration::from_secs(config.backoff_secs))
    }

    /// Decide what follows a failure of the 0-based `attempt`.
    pub fn decide(&self, attempt: u32, class: FailureClass) -> RetryDecision {
        match class {
            FailureClass::Transient if attempt < self.max_retries => RetryDecision::Retry {
                attempt: attempt + 1,
            },
            _ => RetryDecision::GiveUp,
        }
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Run `attempt_fn` until it succeeds, fails fatally, or retries run out.
///
/// `attempt_fn` receives the 0-based attempt index. `classify` maps an error
/// to transient or fatal.
pub async fn run_with_retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    classify: C,
    mut attempt_fn: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> FailureClass,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        let error = match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        match policy.decide(attempt, classify(&error)) {
            RetryDecision::Retry { attempt: next } => {
                warn!(
                    error = %error,
                    attempt = next,
                    max_retries = policy.max_retries,
                    backoff_secs = policy.backoff.as_secs(),
                    "transient failure, retrying in {} seconds...",
                    policy.backoff.as_secs()
                );
                tokio::time::sleep(policy.backoff).await;
                attempt = next;
            }
            RetryDecision::GiveUp => return Err(error),
        }
    }
}
