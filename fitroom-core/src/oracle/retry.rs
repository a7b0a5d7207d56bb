use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetrySection;
use crate::error::FitroomError;

/// Bounded retry with a fixed delay between sequential attempts.
///
/// Only errors whose [`FitroomError::is_retryable`] is true are repeated;
/// permission failures and a missing client surface on the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A single attempt.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn from_config(section: &RetrySection) -> Self {
        Self::new(section.max_attempts, Duration::from_millis(section.delay_ms))
    }

    pub fn should_retry(&self, attempt: u32, error: &FitroomError) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or attempts are exhausted. The last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> crate::error::Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Oracle attempt failed"
                    );
                    if !self.should_retry(attempt, &e) {
                        return Err(e);
                    }
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::{OracleError, ValidationError};

    fn empty() -> FitroomError {
        OracleError::EmptyResponse("The AI failed to generate an image preview.".into()).into()
    }

    #[tokio::test(start_paused = true)]
    async fn retries_once_with_fixed_delay() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result: crate::error::Result<()> = RetryPolicy::default()
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(empty()) }
            })
            .await;

        assert!(matches!(
            result,
            Err(FitroomError::Oracle(OracleError::EmptyResponse(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn second_attempt_can_succeed() {
        let result = RetryPolicy::default()
            .run("test", |attempt| async move {
                if attempt == 1 { Err(empty()) } else { Ok(attempt) }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn permission_denied_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: crate::error::Result<()> = RetryPolicy::new(5, Duration::ZERO)
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OracleError::from_api_error(Some(403), None, None).into()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn should_retry_respects_kind_and_bound() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1, &empty()));
        assert!(!policy.should_retry(2, &empty()));
        assert!(!policy.should_retry(1, &ValidationError::NoGarmentSelected.into()));
        assert!(!policy.should_retry(
            1,
            &OracleError::Unavailable("missing key".into()).into()
        ));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
        assert_eq!(RetryPolicy::once().max_attempts, 1);
    }

    #[test]
    fn from_config_uses_section_values() {
        let policy = RetryPolicy::from_config(&RetrySection {
            max_attempts: 3,
            delay_ms: 25,
        });
        assert_eq!(policy, RetryPolicy::new(3, Duration::from_millis(25)));
    }
}
