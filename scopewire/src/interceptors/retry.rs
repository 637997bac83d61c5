//! Retry interceptor with backoff strategies.

use crate::core::Message;
use crate::wire::{Interceptor, Next};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy)]
pub enum BackoffStrategy {
    /// Constant delay between retries.
    Constant(Duration),
    /// Linear increase: delay * attempt.
    Linear(Duration),
    /// Exponential: delay * 2^(attempt - 1).
    Exponential(Duration),
}

impl BackoffStrategy {
    /// Calculates the delay after a given failed attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Constant(d) => *d,
            Self::Linear(d) => *d * attempt,
            Self::Exponential(d) => *d * 2u32.saturating_pow(attempt.saturating_sub(1)),
        }
    }
}

/// Jitter strategy for adding randomness to delays.
#[derive(Debug, Clone, Copy)]
pub enum JitterStrategy {
    /// No jitter.
    None,
    /// Full jitter: [0, delay].
    Full,
    /// Equal jitter: [delay/2, delay].
    Equal,
    /// Decorrelated jitter: [delay, 3 * delay].
    Decorrelated,
}

impl JitterStrategy {
    /// Applies jitter to a delay.
    #[must_use]
    pub fn apply(&self, delay: Duration) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let mut rng = rand::thread_rng();

        match self {
            Self::None => delay,
            Self::Full => Duration::from_millis(rng.gen_range(0..=millis)),
            Self::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + rng.gen_range(0..=half))
            }
            Self::Decorrelated => {
                Duration::from_millis(rng.gen_range(millis..=millis.saturating_mul(3)))
            }
        }
    }
}

/// Re-runs the rest of the chain while it returns retryable faults.
///
/// `max_attempts` counts every run, the first included. Non-retryable
/// faults and successful replies are returned at once.
pub struct RetryInterceptor {
    max_attempts: u32,
    backoff: BackoffStrategy,
    jitter: JitterStrategy,
}

impl RetryInterceptor {
    /// Creates a new retry interceptor.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: BackoffStrategy, jitter: JitterStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            jitter,
        }
    }

    /// Creates a retry interceptor with constant delay.
    #[must_use]
    pub fn constant(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, BackoffStrategy::Constant(delay), JitterStrategy::None)
    }

    /// Creates an exponential backoff retry interceptor.
    #[must_use]
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self::new(
            max_attempts,
            BackoffStrategy::Exponential(base_delay),
            JitterStrategy::Full,
        )
    }

    /// Returns the maximum number of runs.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.backoff.delay(attempt))
    }
}

#[async_trait]
impl Interceptor for RetryInterceptor {
    fn name(&self) -> &str {
        "retry"
    }

    async fn invoke(&self, message: Message, next: Next) -> Message {
        let mut attempt = 1;
        loop {
            let reply = next.clone().run(message.clone()).await;
            let retryable = reply.fault().is_some_and(|f| f.retryable);
            if !retryable {
                return reply;
            }
            if attempt >= self.max_attempts {
                warn!(
                    operation = %message.operation().name(),
                    attempts = attempt,
                    "Retries exhausted"
                );
                return reply;
            }

            let delay = self.calculate_delay(attempt);
            debug!(
                operation = %message.operation().name(),
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retrying after retryable fault"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl std::fmt::Debug for RetryInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryInterceptor")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .finish()
    }
}
