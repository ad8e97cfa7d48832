use std::{future::Future, sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{config::EngineConfig, errors::{EntitlementError, RequestType}};

use super::{backoff_calculator::BackoffCalculator, rate_limiter::RateLimiter};

/// Runs outbound backend calls behind the rate limiter, retrying the ones
/// that failed for transient reasons.
pub(crate) struct RetryCoordinator {
    max_retries: u32,
    min_delay_seconds: i64,
    backoff: BackoffCalculator,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl RetryCoordinator {
    pub(crate) fn new(config: &EngineConfig, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            max_retries: config.max_retries,
            min_delay_seconds: config.retry_min_delay_seconds,
            backoff: BackoffCalculator::new(config.retry_max_delay_seconds),
            rate_limiter,
        }
    }

    /// Performs `request` exactly once.
    pub(crate) async fn execute_once<T, F, Fut>(
        &self,
        request_type: RequestType,
        argument_hash: u64,
        request: F,
    ) -> Result<T, EntitlementError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EntitlementError>>,
    {
        self.check_rate_limit(request_type, argument_hash)?;
        request().await
    }

    /// Performs `request`, retrying network failures and server errors up to
    /// `max_retries` times. The first retry is immediate, later ones wait for
    /// the backoff delay. Any other error is returned straight away; after the
    /// last retry the last error is returned.
    pub(crate) async fn execute<T, F, Fut>(
        &self,
        request_type: RequestType,
        argument_hash: u64,
        mut request: F,
    ) -> Result<T, EntitlementError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EntitlementError>>,
    {
        self.check_rate_limit(request_type, argument_hash)?;

        let mut attempt_index = 0;
        loop {
            let error = match request().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if attempt_index >= self.max_retries || !error.is_retryable() {
                return Err(error);
            }

            if attempt_index > 0 {
                let delay = self.backoff.delay(
                    self.min_delay_seconds,
                    attempt_index - 1,
                    &mut rand::thread_rng(),
                );
                match delay {
                    Ok(seconds) => {
                        debug!(
                            "{:?} request failed ({}), retrying in {}s.",
                            request_type, error, seconds
                        );
                        tokio::time::sleep(Duration::from_secs(seconds)).await;
                    }
                    Err(delay_error) => {
                        warn!(
                            "Could not compute retry delay ({}), retrying {:?} request immediately.",
                            delay_error, request_type
                        );
                    }
                }
            } else {
                debug!(
                    "{:?} request failed ({}), retrying immediately.",
                    request_type, error
                );
            }
            attempt_index += 1;
        }
    }

    fn check_rate_limit(
        &self,
        request_type: RequestType,
        argument_hash: u64,
    ) -> Result<(), EntitlementError> {
        if self.rate_limiter.is_exceeded(request_type, argument_hash) {
            warn!("Rate limit exceeded for {:?} request.", request_type);
            return Err(EntitlementError::RateLimitExceeded(request_type));
        }
        self.rate_limiter.record_attempt(request_type, argument_hash);
        Ok(())
    }
}
