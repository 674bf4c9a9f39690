//! Generic retry-with-backoff primitive.
//!
//! [`BackoffPolicy`] is pure delay math (shared by the in-process
//! [`RetryExecutor`] and the queue's re-enqueue backoff). The executor is
//! domain-agnostic: retryability is decided by a predicate supplied per
//! error domain (see [`crate::error`] for the signature predicates).

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Shape of the delay curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Constant delay between attempts.
    Fixed,
    /// Delay grows linearly with the attempt number.
    Linear,
    /// Delay grows by `multiplier` per attempt.
    Exponential,
}

impl Default for BackoffKind {
    fn default() -> Self {
        Self::Exponential
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (including the first; 0 behaves as 1).
    pub max_attempts: u32,
    /// Base delay before the second attempt.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
    /// Growth factor for exponential backoff.
    pub multiplier: f64,
    /// Delay curve shape.
    pub kind: BackoffKind,
    /// Multiply each delay by a uniform random factor in `[0.75, 1.25]`.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            kind: BackoffKind::Exponential,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Policy with constant delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            kind: BackoffKind::Fixed,
            ..Default::default()
        }
    }

    /// Policy with exponential backoff (doubling).
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic delay before attempt `attempt` (1-indexed; the first
    /// attempt has no delay).
    ///
    /// Exponential: `min(max_delay, base_delay * multiplier^(attempt - 2))`.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.kind {
            BackoffKind::Fixed => base_ms,
            BackoffKind::Linear => base_ms * (attempt - 1) as f64,
            BackoffKind::Exponential => base_ms * self.multiplier.powi((attempt - 2) as i32),
        };

        Duration::from_millis(delay_ms.min(max_ms) as u64)
    }

    /// Delay before attempt `attempt`, with jitter applied when enabled.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_before_attempt(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }

        let factor: f64 = rand::thread_rng().gen_range(0.75..=1.25);
        let jittered = (base.as_millis() as f64 * factor).max(0.0);
        Duration::from_millis(jittered as u64)
    }

    /// Whether another attempt is allowed after `attempts` so far.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Successful execution result.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

/// Terminal failure: the last error plus attempt accounting.
#[derive(Debug)]
pub struct RetryError<E> {
    pub error: E,
    pub attempts: u32,
    pub elapsed: Duration,
}

type Predicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type AttemptHook<E> = Box<dyn Fn(&E, u32) + Send + Sync>;
type ExhaustedHook<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Executes an operation with retries, backoff, and classified retry
/// conditions.
///
/// The executor itself knows nothing about error domains; callers attach a
/// `retry_if` predicate. A predicate returning `false` stops retrying
/// immediately regardless of remaining attempts.
pub struct RetryExecutor<E> {
    policy: BackoffPolicy,
    retry_if: Predicate<E>,
    on_retry: Option<AttemptHook<E>>,
    on_exhausted: Option<ExhaustedHook<E>>,
}

impl<E> RetryExecutor<E> {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            retry_if: Box::new(|_| true),
            on_retry: None,
            on_exhausted: None,
        }
    }

    /// Retry only when the predicate holds for the error.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Box::new(predicate);
        self
    }

    /// Invoked with the error and the failed attempt number before each wait.
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&E, u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Box::new(hook));
        self
    }

    /// Invoked once when the executor gives up (attempts exhausted or a
    /// non-retryable error).
    pub fn on_exhausted<F>(mut self, hook: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.on_exhausted = Some(Box::new(hook));
        self
    }

    /// Run `op` up to `max_attempts` times, sleeping the policy delay between
    /// attempts.
    pub fn execute<T, Op>(&self, mut op: Op) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        Op: FnMut() -> Result<T, E>,
    {
        let start = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match op() {
                Ok(value) => {
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    if attempt >= max_attempts || !(self.retry_if)(&error) {
                        if let Some(hook) = &self.on_exhausted {
                            hook(&error);
                        }
                        return Err(RetryError {
                            error,
                            attempts: attempt,
                            elapsed: start.elapsed(),
                        });
                    }

                    if let Some(hook) = &self.on_retry {
                        hook(&error, attempt);
                    }
                    std::thread::sleep(self.policy.next_delay(attempt + 1));
                }
            }
        }

        unreachable!("loop returns on success or final failure")
    }
}

/// Pre-built policies: same executor, different numbers per error domain.
/// Pair these with the matching predicate from [`crate::error`].
pub mod policies {
    use super::*;

    /// Network calls: generous retries, delays padded for remote recovery.
    pub fn network() -> BackoffPolicy {
        BackoffPolicy::exponential(5, Duration::from_millis(500), Duration::from_secs(30))
            .with_jitter(true)
    }

    /// Database operations: deadlocks clear quickly, keep delays short.
    pub fn database() -> BackoffPolicy {
        BackoffPolicy::exponential(4, Duration::from_millis(200), Duration::from_secs(5))
            .with_jitter(true)
    }

    /// Filesystem contention: brief and bounded.
    pub fn filesystem() -> BackoffPolicy {
        BackoffPolicy::exponential(3, Duration::from_millis(100), Duration::from_secs(2))
            .with_jitter(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn exponential_delays_follow_spec_sequence() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            multiplier: 2.0,
            kind: BackoffKind::Exponential,
            jitter: false,
        };

        let delays: Vec<u64> = (2..=8)
            .map(|n| policy.delay_before_attempt(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000, 10_000]);
    }

    #[test]
    fn first_attempt_has_no_delay() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_before_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_before_attempt(1), Duration::ZERO);
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = BackoffPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(policy.delay_before_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_before_attempt(4), Duration::from_millis(500));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            kind: BackoffKind::Linear,
            jitter: false,
        };

        assert_eq!(policy.delay_before_attempt(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before_attempt(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before_attempt(4), Duration::from_millis(300));
    }

    #[test]
    fn jitter_stays_within_quarter_band() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            jitter: true,
            ..Default::default()
        };

        for _ in 0..200 {
            let d = policy.next_delay(2).as_millis() as u64;
            assert!((750..=1250).contains(&d), "jittered delay {d} out of band");
        }
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn executor_returns_value_and_attempt_count() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::<String>::new(BackoffPolicy::fixed(5, Duration::from_millis(1)));

        let outcome = executor
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err("transient".to_string()) } else { Ok(n) }
            })
            .unwrap();

        assert_eq!(outcome.value, 3);
        assert_eq!(outcome.attempts, 3);
    }

    #[test]
    fn non_retryable_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::<String>::new(BackoffPolicy::fixed(5, Duration::from_millis(1)))
            .retry_if(|e| e != "unauthorized");

        let err = executor
            .execute::<(), _>(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("unauthorized".to_string())
            })
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts, 1);
        assert_eq!(err.error, "unauthorized");
    }

    #[test]
    fn exhaustion_reports_attempts_and_fires_hooks() {
        let retries = std::sync::Arc::new(AtomicU32::new(0));
        let exhausted = std::sync::Arc::new(AtomicU32::new(0));

        let r = retries.clone();
        let x = exhausted.clone();
        let executor = RetryExecutor::<String>::new(BackoffPolicy::fixed(3, Duration::from_millis(1)))
            .on_retry(move |_, _| {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .on_exhausted(move |_| {
                x.fetch_add(1, Ordering::SeqCst);
            });

        let err = executor
            .execute::<(), _>(|| Err("always".to_string()))
            .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
        assert_eq!(exhausted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_max_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let mut policy = BackoffPolicy::no_retry();
        policy.max_attempts = 0;
        let executor = RetryExecutor::<String>::new(policy);

        let outcome = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            })
            .unwrap();

        assert_eq!(outcome.value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: without jitter, delays never decrease with the attempt
        /// number and never exceed the cap.
        #[test]
        fn backoff_is_monotonic_and_capped(
            base_ms in 1u64..5_000,
            max_ms in 1u64..120_000,
            multiplier in 1.0f64..4.0,
            attempt in 2u32..12,
        ) {
            let policy = BackoffPolicy {
                max_attempts: 20,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                multiplier,
                kind: BackoffKind::Exponential,
                jitter: false,
            };

            let current = policy.delay_before_attempt(attempt);
            let next = policy.delay_before_attempt(attempt + 1);
            prop_assert!(next >= current);
            prop_assert!(current <= Duration::from_millis(max_ms));
        }
    }
}
