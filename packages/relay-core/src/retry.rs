//! Retry and backoff for RPC calls and transaction submission
//!
//! Every call the relay makes to a node goes through [`with_retry`]. The policy
//! is data carried by each chain spec, so a congested chain can retry more and
//! back off longer than a quiet one.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{RelayError, Result, RpcErrorKind};

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    Fixed,
    Exponential { multiplier: f64 },
}

/// Per-chain retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    pub backoff: BackoffStrategy,
    /// Timeout applied to each individual attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff: BackoffStrategy::Exponential { multiplier: 2.0 },
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs = match self.backoff {
            BackoffStrategy::Fixed => self.initial_delay.as_secs_f64(),
            BackoffStrategy::Exponential { multiplier } => {
                self.initial_delay.as_secs_f64() * multiplier.powi(attempt as i32)
            }
        };
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if another attempt is allowed after `attempts` have been made
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Temporary failure (timeouts, rate limits, connection problems)
    Transient,
    /// The endpoint refused the block range of a log query
    RangeTooLarge,
    /// The node already holds this exact transaction
    AlreadyKnown,
    /// The nonce was consumed by another transaction
    NonceTooLow,
    /// Do not retry (bad configuration, reverts, malformed requests)
    Permanent,
    /// Unrecognised; retried with backoff
    Unknown,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::Unknown)
    }
}

/// Classify an error message for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("block range")
        || error_lower.contains("range too large")
        || error_lower.contains("range is too large")
        || error_lower.contains("exceed maximum block range")
        || error_lower.contains("query returned more than")
        || error_lower.contains("too many blocks")
        || error_lower.contains("logs matched by query exceeds")
    {
        return ErrorClass::RangeTooLarge;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("429")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
        || error_lower.contains("header not found")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("already known")
        || error_lower.contains("known transaction")
        || error_lower.contains("already imported")
    {
        return ErrorClass::AlreadyKnown;
    }

    if error_lower.contains("nonce too low") {
        return ErrorClass::NonceTooLow;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("underpriced")
        || error_lower.contains("intrinsic gas too low")
        || error_lower.contains("invalid sender")
        || error_lower.contains("invalid params")
        || error_lower.contains("method not found")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

/// Classify a relay error; only RPC and connection failures are candidates for retry
pub fn classify(error: &RelayError) -> ErrorClass {
    match error {
        RelayError::Rpc {
            kind: RpcErrorKind::Transport,
            message,
        } => match classify_error(message) {
            ErrorClass::Unknown => ErrorClass::Transient,
            class => class,
        },
        RelayError::Rpc {
            kind: RpcErrorKind::Rejected,
            message,
        } => match classify_error(message) {
            // A node that answers with an unrecognised error will answer the same way again
            ErrorClass::Unknown => ErrorClass::Permanent,
            class => class,
        },
        RelayError::Connection { .. } | RelayError::Journal(_) => ErrorClass::Transient,
        RelayError::Configuration(_)
        | RelayError::Decode(_)
        | RelayError::Signing(_)
        | RelayError::InvalidWindow { .. }
        | RelayError::Reverted { .. }
        | RelayError::DoubleSubmissionRisk { .. }
        | RelayError::DeadlineExceeded(_)
        | RelayError::TransientFailure { .. } => ErrorClass::Permanent,
    }
}

/// Run `operation` under `policy`, bounding each attempt by the attempt timeout.
///
/// Errors that are not retryable are returned unchanged. When attempts run out
/// the last error is wrapped in [`RelayError::TransientFailure`].
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let result = match tokio::time::timeout(policy.attempt_timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::transport(format!(
                "{} timed out after {:?}",
                operation, policy.attempt_timeout
            ))),
        };

        let err = match result {
            Ok(value) => {
                if attempts > 1 {
                    debug!(operation, attempts, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !classify(&err).is_retryable() {
            return Err(err);
        }

        if !policy.should_retry(attempts) {
            warn!(
                operation,
                attempts,
                error = %err,
                "Retries exhausted"
            );
            return Err(RelayError::TransientFailure {
                operation: operation.to_string(),
                attempts,
                last_error: err.to_string(),
            });
        }

        let delay = policy.delay_for_attempt(attempts - 1);
        warn!(
            operation,
            attempt = attempts,
            max = policy.max_attempts,
            ?delay,
            error = %err,
            "Retrying after backoff"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff: BackoffStrategy::Fixed,
            attempt_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy {
            max_attempts: 8,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff: BackoffStrategy::Exponential { multiplier: 2.0 },
            attempt_timeout: Duration::from_secs(10),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(32));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(60)); // capped
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = RetryPolicy {
            backoff: BackoffStrategy::Fixed,
            initial_delay: Duration::from_secs(3),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(3));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(3));
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("connection refused"), ErrorClass::Transient);
        assert_eq!(classify_error("429 Too Many Requests"), ErrorClass::Transient);
        assert_eq!(
            classify_error("query returned more than 10000 results"),
            ErrorClass::RangeTooLarge
        );
        assert_eq!(
            classify_error("exceed maximum block range: 5000"),
            ErrorClass::RangeTooLarge
        );
        assert_eq!(classify_error("already known"), ErrorClass::AlreadyKnown);
        assert_eq!(classify_error("nonce too low"), ErrorClass::NonceTooLow);
        assert_eq!(classify_error("execution reverted"), ErrorClass::Permanent);
        assert_eq!(classify_error("some unknown error"), ErrorClass::Unknown);
    }

    #[test]
    fn test_relay_error_classification() {
        assert_eq!(
            classify(&RelayError::transport("socket hang up")),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&RelayError::rejected("rate limit exceeded")),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&RelayError::rejected("something odd")),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify(&RelayError::configuration("unknown chain")),
            ErrorClass::Permanent
        );
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(5), "eth_blockNumber", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(RelayError::transport("connection reset"))
            } else {
                Ok(42u64)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_yields_transient_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<u64> = with_retry(&fast_policy(3), "eth_getLogs", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::transport("503 service unavailable"))
        })
        .await;

        match result {
            Err(RelayError::TransientFailure {
                operation,
                attempts,
                last_error,
            }) => {
                assert_eq!(operation, "eth_getLogs");
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("expected TransientFailure, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_configuration_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<u64> = with_retry(&fast_policy(5), "connect", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::configuration("unknown chain 'foo'"))
        })
        .await;

        assert!(matches!(result, Err(RelayError::Configuration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_retried() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "eth_gasPrice", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(7u128)
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
