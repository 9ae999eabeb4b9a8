// Retry handling for idempotent bare metal API requests.
// Only transport level failures are retried; provisioning failures never are.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, FibonacciBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use super::errors::BaremetalError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A configuration that performs exactly one attempt
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryHandler {
    config: RetryConfig,
}

impl Default for RetryHandler {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn delays(&self) -> Vec<Duration> {
        let retries = self.config.max_attempts.saturating_sub(1) as usize;
        let backoff = FibonacciBackoff::from_millis(self.config.base_delay_ms.max(1))
            .max_delay(Duration::from_millis(self.config.max_delay_ms))
            .take(retries);
        if self.config.jitter {
            backoff.map(jitter).collect()
        } else {
            backoff.collect()
        }
    }

    /// Run `operation`, retrying it with Fibonacci backoff while it fails
    /// with a retryable error
    pub async fn execute_with_retry<F, Fut, R>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<R, BaremetalError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, BaremetalError>>,
    {
        let mut attempt = 0u32;
        RetryIf::spawn(
            self.delays(),
            || {
                attempt += 1;
                debug!(operation = operation_name, attempt, "Sending bare metal API request");
                operation()
            },
            |error: &BaremetalError| {
                let retry = should_retry(error);
                if retry {
                    warn!(operation = operation_name, error = %error, "Retryable bare metal API failure");
                }
                retry
            },
        )
        .await
    }
}

/// Node locked (409), service unavailable and gateway errors, and connection
/// level failures are retried. Everything else surfaces immediately.
pub fn should_retry(error: &BaremetalError) -> bool {
    match error {
        BaremetalError::Api { status, .. } => matches!(status, 409 | 502 | 503 | 504),
        BaremetalError::Http(err) => err.is_connect() || err.is_timeout(),
        BaremetalError::NotFound { .. }
        | BaremetalError::Transition { .. }
        | BaremetalError::Timeout { .. }
        | BaremetalError::InvalidArgument(_)
        | BaremetalError::InvalidResponse(_)
        | BaremetalError::Config(_)
        | BaremetalError::Io(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_handler(max_attempts: u32) -> RetryHandler {
        RetryHandler::new(RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter: false,
        })
    }

    #[tokio::test]
    async fn test_retry_success_after_node_locked() {
        let retry_handler = fast_handler(3);
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result = retry_handler
            .execute_with_retry("set_provision_state", move || {
                let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(BaremetalError::Api {
                            status: 409,
                            message: "Node is locked by host conductor-1".to_string(),
                        })
                    } else {
                        Ok("accepted")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "accepted");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let retry_handler = fast_handler(5);
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result: Result<(), _> = retry_handler
            .execute_with_retry("get_node", move || {
                attempt_count_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(BaremetalError::node_not_found("missing")) }
            })
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let retry_handler = fast_handler(2);
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result: Result<(), _> = retry_handler
            .execute_with_retry("get_node", move || {
                attempt_count_clone.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(BaremetalError::Api {
                        status: 503,
                        message: "Service Unavailable".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(result.unwrap_err().status(), Some(503));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(should_retry(&BaremetalError::Api {
            status: 409,
            message: String::new()
        }));
        assert!(!should_retry(&BaremetalError::Api {
            status: 400,
            message: String::new()
        }));
        assert!(!should_retry(&BaremetalError::Transition {
            node: "n".to_string(),
            state: None,
            message: String::new()
        }));
    }

    #[test]
    fn test_disabled_config_has_no_delays() {
        let handler = RetryHandler::new(RetryConfig::disabled());
        assert!(handler.delays().is_empty());
    }
}
