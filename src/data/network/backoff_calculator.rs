use rand::Rng;

use crate::errors::EntitlementError;

const DEFAULT_FACTOR: f64 = 2.4;
const DEFAULT_JITTER: f64 = 0.4;
const DEFAULT_MAX_DELAY_SECONDS: u64 = 1000;

/// Jittered exponential delay between retries, in whole seconds:
///
/// ```text
/// base   = min_delay + factor ^ retry_index
/// jitter = uniform(0, round(base * 0.4) + 1)
/// delay  = min(round(base + jitter), max_delay)
/// ```
#[derive(Debug, Clone)]
pub(crate) struct BackoffCalculator {
    factor: f64,
    jitter: f64,
    max_delay_seconds: u64,
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DELAY_SECONDS)
    }
}

impl BackoffCalculator {
    pub(crate) fn new(max_delay_seconds: u64) -> Self {
        Self {
            factor: DEFAULT_FACTOR,
            jitter: DEFAULT_JITTER,
            max_delay_seconds,
        }
    }

    /// retry_index:
    ///   0 for the first delayed retry.
    pub(crate) fn delay<R: Rng>(
        &self,
        min_delay_seconds: i64,
        retry_index: u32,
        rng: &mut R,
    ) -> Result<u64, EntitlementError> {
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let base = min_delay_seconds as f64 + self.factor.powi(exponent);
        let jitter_bound = (base * self.jitter).round() + 1.0;
        if jitter_bound <= 0.0 {
            return Err(EntitlementError::InvalidArgument(format!(
                "backoff jitter bound must be positive (min delay {min_delay_seconds}s)"
            )));
        }
        // Also keeps an infinite base out of the jitter range.
        if !base.is_finite() || base >= self.max_delay_seconds as f64 {
            return Ok(self.max_delay_seconds);
        }
        let delay = (base + rng.gen_range(0.0..jitter_bound)).round();
        Ok(delay.clamp(0.0, self.max_delay_seconds as f64) as u64)
    }
}
