use crate::backoff::IntervalFunction;
use std::sync::Arc;
use std::time::Duration;

/// Determines whether an error should be retried.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Combines the backoff strategy with which errors are eligible for retry.
///
/// Attempt counting lives on the owning `RetryConfig`, not here — this type
/// only knows how long to wait and whether a given error warrants another try.
pub struct RetryPolicy<E> {
    pub(crate) interval_fn: Arc<dyn IntervalFunction>,
    pub(crate) retry_predicate: Option<RetryPredicate<E>>,
}

impl<E> RetryPolicy<E> {
    pub fn new(interval_fn: Arc<dyn IntervalFunction>) -> Self {
        Self {
            interval_fn,
            retry_predicate: None,
        }
    }

    /// Retries everything unless a predicate has narrowed that down.
    pub fn should_retry(&self, error: &E) -> bool {
        match &self.retry_predicate {
            Some(predicate) => predicate(error),
            None => true,
        }
    }

    pub fn next_backoff(&self, attempt: usize) -> Duration {
        self.interval_fn.next_interval(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::FixedInterval;

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    #[test]
    fn retries_all_by_default() {
        let policy: RetryPolicy<TestError> =
            RetryPolicy::new(Arc::new(FixedInterval::new(Duration::from_secs(1))));
        assert!(policy.should_retry(&TestError { retryable: false }));
    }

    #[test]
    fn honors_retry_predicate() {
        let mut policy: RetryPolicy<TestError> =
            RetryPolicy::new(Arc::new(FixedInterval::new(Duration::from_secs(1))));
        policy.retry_predicate = Some(Arc::new(|e: &TestError| e.retryable));

        assert!(policy.should_retry(&TestError { retryable: true }));
        assert!(!policy.should_retry(&TestError { retryable: false }));
    }

    #[test]
    fn backoff_computation_delegates_to_interval_fn() {
        let policy: RetryPolicy<TestError> =
            RetryPolicy::new(Arc::new(FixedInterval::new(Duration::from_secs(2))));
        assert_eq!(policy.next_backoff(0), Duration::from_secs(2));
        assert_eq!(policy.next_backoff(5), Duration::from_secs(2));
    }
}
