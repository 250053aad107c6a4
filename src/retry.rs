//! Classification of coordination-service errors and bounded backoff retry (spec §4.2, §4.7).

use std::thread;
use std::time::Duration;

use rand::Rng;
use zookeeper::ZkError;

use super::config::RetryConfig;
use super::metrics::BACKEND_RETRIES;

/// Whether `err` represents a transient failure that should be retried rather
/// than surfaced to the caller (spec §4.2, §8: `retryable(CONNECTION_LOSS) == true`).
pub fn retryable(err: &ZkError) -> bool {
    matches!(
        err,
        ZkError::ConnectionLoss | ZkError::OperationTimeout | ZkError::SessionMoved
    )
}

/// Bounded exponential backoff with jitter, reset by constructing a new instance
/// per logical operation.
pub struct Backoff {
    attempt: u32,
    config: RetryConfig,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Backoff {
        Backoff { attempt: 0, config }
    }

    /// Whether another retry is still permitted under `max_retries`.
    pub fn has_budget(&self) -> bool {
        self.attempt < self.config.max_retries
    }

    /// Sleep for the next backoff slice and advance the attempt counter.
    pub fn sleep_and_advance(&mut self) {
        let exp = 1u64.checked_shl(self.attempt).unwrap_or(u64::max_value());
        let capped = self
            .config
            .initial_backoff_ms
            .saturating_mul(exp)
            .min(self.config.max_backoff_ms);
        let jittered = rand::thread_rng().gen_range(capped / 2 + 1, capped + 1);
        thread::sleep(Duration::from_millis(jittered));
        self.attempt += 1;
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, or the retry
/// budget in `config` is exhausted.
pub fn with_retry<T, F>(config: &RetryConfig, mut op: F) -> Result<T, ZkError>
where
    F: FnMut() -> Result<T, ZkError>,
{
    let mut backoff = Backoff::new(config.clone());
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(ref err) if retryable(err) && backoff.has_budget() => {
                BACKEND_RETRIES.inc();
                backoff.sleep_and_advance();
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_loss_is_retryable() {
        assert!(retryable(&ZkError::ConnectionLoss));
    }

    #[test]
    fn operation_timeout_is_retryable() {
        assert!(retryable(&ZkError::OperationTimeout));
    }

    #[test]
    fn session_moved_is_retryable() {
        assert!(retryable(&ZkError::SessionMoved));
    }

    #[test]
    fn node_exists_is_not_retryable() {
        assert!(!retryable(&ZkError::NodeExists));
    }

    #[test]
    fn no_node_is_not_retryable() {
        assert!(!retryable(&ZkError::NoNode));
    }

    #[test]
    fn with_retry_succeeds_after_transient_errors() {
        let config = RetryConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            max_retries: 5,
        };
        let mut calls = 0;
        let result = with_retry(&config, || {
            calls += 1;
            if calls < 3 {
                Err(ZkError::ConnectionLoss)
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
    }

    #[test]
    fn with_retry_gives_up_on_fatal_error() {
        let config = RetryConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            max_retries: 5,
        };
        let mut calls = 0;
        let result = with_retry(&config, || {
            calls += 1;
            Err(ZkError::NoAuth)
        });
        assert_eq!(result, Err(ZkError::NoAuth));
        assert_eq!(calls, 1);
    }
}
