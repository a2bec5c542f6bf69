use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Exponential Backoff Retry Executor
// ============================================================================
//
// Wraps one fallible operation with bounded re-invocation. Only errors the
// caller classifies as retryable are retried; anything else propagates on the
// spot. When the attempt budget is spent, a recovery callback decides between
// a substitute result and a terminal error.
//
// Default policy: 3 attempts, 1s initial delay, multiplier 2
//   attempt 1 at t=0, attempt 2 at t=1s, attempt 3 at t=3s
//
// The executor keeps no state between calls and never sleeps while holding a
// lock.
//
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay slept after the `failed_attempt`-th failure (1-based):
    /// `initial_delay * multiplier^(failed_attempt - 1)`, capped at `max_delay`.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Result of a retried operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded
    Success(T),
    /// Operation failed on every attempt
    Exhausted { error: E, attempts: u32 },
    /// Operation failed with a non-retryable error
    PermanentFailure(E),
}

/// Final outcome reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
    Permanent { attempts: u32 },
}

/// Write-only sink for attempt and outcome reporting.
pub trait RetryObserver: Send + Sync {
    fn on_attempt(&self, operation: &str, attempt: u32);
    fn on_outcome(&self, operation: &str, outcome: RetryOutcome);
}

#[derive(Clone)]
pub struct RetryExecutor {
    operation: String,
    policy: RetryPolicy,
    observer: Option<Arc<dyn RetryObserver>>,
}

impl RetryExecutor {
    pub fn new(operation: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            operation: operation.into(),
            policy,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn run<F, Fut, T, E, P>(&self, mut operation: F, is_retryable: P) -> RetryResult<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.policy.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            tracing::debug!(
                operation = %self.operation,
                attempt = attempt,
                max_attempts = max_attempts,
                "Attempting operation"
            );
            if let Some(observer) = &self.observer {
                observer.on_attempt(&self.operation, attempt);
            }

            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(
                            operation = %self.operation,
                            attempt = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    self.report(RetryOutcome::Succeeded { attempts: attempt });
                    return RetryResult::Success(result);
                }
                Err(error) => {
                    if !is_retryable(&error) {
                        tracing::error!(
                            operation = %self.operation,
                            attempt = attempt,
                            error = %error,
                            "Permanent failure detected, not retrying"
                        );
                        self.report(RetryOutcome::Permanent { attempts: attempt });
                        return RetryResult::PermanentFailure(error);
                    }

                    if attempt >= max_attempts {
                        tracing::error!(
                            operation = %self.operation,
                            attempt = attempt,
                            error = %error,
                            "Operation failed after all retries"
                        );
                        self.report(RetryOutcome::Exhausted { attempts: attempt });
                        return RetryResult::Exhausted {
                            error,
                            attempts: attempt,
                        };
                    }

                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        operation = %self.operation,
                        attempt = attempt,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying after delay"
                    );

                    sleep(delay).await;
                }
            }
        }
    }

    /// Retry `operation` over `input`, handing the final error to `recover`
    /// once the attempt budget is exhausted.
    ///
    /// Non-retryable errors are returned as-is and never reach `recover`.
    pub async fn execute_with_retry<'a, I, F, Fut, T, E, P, R>(
        &self,
        input: &'a I,
        mut operation: F,
        is_retryable: P,
        recover: R,
    ) -> Result<T, E>
    where
        I: ?Sized,
        F: FnMut(&'a I, u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
        R: FnOnce(E, u32, &'a I) -> Result<T, E>,
    {
        match self.run(|attempt| operation(input, attempt), is_retryable).await {
            RetryResult::Success(value) => Ok(value),
            RetryResult::PermanentFailure(error) => Err(error),
            RetryResult::Exhausted { error, attempts } => recover(error, attempts, input),
        }
    }

    fn report(&self, outcome: RetryOutcome) {
        if let Some(observer) = &self.observer {
            observer.on_outcome(&self.operation, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Business,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn retryable(e: &TestError) -> bool {
        *e == TestError::Transient
    }

    #[derive(Default)]
    struct RecordingObserver {
        attempts: Mutex<Vec<u32>>,
        outcomes: Mutex<Vec<RetryOutcome>>,
    }

    impl RetryObserver for RecordingObserver {
        fn on_attempt(&self, _operation: &str, attempt: u32) {
            self.attempts.lock().push(attempt);
        }

        fn on_outcome(&self, _operation: &str, outcome: RetryOutcome) {
            self.outcomes.lock().push(outcome);
        }
    }

    #[test]
    fn test_default_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
        assert_eq!(policy.delay_after(40), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_twice_then_success_waits_one_then_two_seconds() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new("save_order", RetryPolicy::default());
        let started = Instant::now();

        let result = executor
            .run(
                |_attempt| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(TestError::Transient)
                        } else {
                            Ok("saved")
                        }
                    }
                },
                retryable,
            )
            .await;

        assert!(matches!(result, RetryResult::Success("saved")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_business_error_fails_immediately() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new("save_order", RetryPolicy::default());
        let started = Instant::now();

        let result = executor
            .run(
                |_attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(TestError::Business) }
                },
                retryable,
            )
            .await;

        assert!(matches!(result, RetryResult::PermanentFailure(TestError::Business)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_receives_final_error_and_input() {
        let executor = RetryExecutor::new("save_order", RetryPolicy::default());
        let input = String::from("order-42");

        let result = executor
            .execute_with_retry(
                &input,
                |_input, _attempt| async { Err::<String, _>(TestError::Transient) },
                retryable,
                |error, attempts, input: &String| {
                    assert_eq!(error, TestError::Transient);
                    assert_eq!(attempts, 3);
                    Ok(format!("fallback for {}", input))
                },
            )
            .await;

        assert_eq!(result.unwrap(), "fallback for order-42");
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_can_raise_terminal_error() {
        let executor = RetryExecutor::new("save_order", RetryPolicy::default());

        let result = executor
            .execute_with_retry(
                &(),
                |_, _| async { Err::<(), _>(TestError::Transient) },
                retryable,
                |error, _, _| Err(error),
            )
            .await;

        assert_eq!(result.unwrap_err(), TestError::Transient);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_not_called_for_permanent_error() {
        let executor = RetryExecutor::new("save_order", RetryPolicy::default());

        let result = executor
            .execute_with_retry(
                &(),
                |_, _| async { Err::<(), _>(TestError::Business) },
                retryable,
                |_, _, _| panic!("recovery must not run for business errors"),
            )
            .await;

        assert_eq!(result.unwrap_err(), TestError::Business);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_every_attempt() {
        let observer = Arc::new(RecordingObserver::default());
        let executor = RetryExecutor::new("publish", RetryPolicy::default())
            .with_observer(observer.clone());

        let _ = executor
            .run(|_| async { Err::<(), _>(TestError::Transient) }, retryable)
            .await;

        assert_eq!(*observer.attempts.lock(), vec![1, 2, 3]);
        assert_eq!(
            *observer.outcomes.lock(),
            vec![RetryOutcome::Exhausted { attempts: 3 }]
        );
    }
}
