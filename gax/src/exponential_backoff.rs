// Copyright 2026 Kusto Ingest Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Truncated exponential backoff with jitter.
//!
//! Implements [BackoffPolicy]. This is the default backoff used by
//! [crate::retry_driver::RetryDriver]'s `Exponential` model and by every
//! client-level retry policy in `kusto-ingest`.

use crate::error::Error;
use crate::Result;
use std::time::Duration;

/// Builds an [ExponentialBackoff] policy.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffBuilder {
    initial_delay: Duration,
    maximum_delay: Duration,
    scaling: f64,
}

impl ExponentialBackoffBuilder {
    /// Creates a builder with the default parameters (1s initial delay, 60s
    /// maximum delay, scaling factor 2.0).
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            maximum_delay: Duration::from_secs(60),
            scaling: 2.0,
        }
    }

    pub fn with_initial_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.initial_delay = v.into();
        self
    }

    pub fn with_maximum_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.maximum_delay = v.into();
        self
    }

    pub fn with_scaling<V: Into<f64>>(mut self, v: V) -> Self {
        self.scaling = v.into();
        self
    }

    /// Builds the policy, validating that the parameters are sane.
    pub fn build(self) -> Result<ExponentialBackoff> {
        if let Some(error) = self.validate() {
            return Err(error);
        }
        Ok(ExponentialBackoff {
            maximum_delay: self.maximum_delay,
            scaling: self.scaling,
            initial_delay: self.initial_delay,
        })
    }

    fn validate(&self) -> Option<Error> {
        if self.scaling < 1.0 {
            return Some(Error::other(format!(
                "scaling ({}) must be >= 1.0",
                self.scaling
            )));
        }
        if self.initial_delay.is_zero() {
            return Some(Error::other(
                "initial delay must be greater than zero".to_string(),
            ));
        }
        if self.maximum_delay < self.initial_delay {
            return Some(Error::other(format!(
                "maximum delay ({:?}) must be greater or equal to the initial delay ({:?})",
                self.maximum_delay, self.initial_delay
            )));
        }
        None
    }
}

impl Default for ExponentialBackoffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements truncated exponential backoff with full jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    maximum_delay: Duration,
    scaling: f64,
}

impl ExponentialBackoff {
    fn delay(&self, attempt_count: u32) -> Duration {
        let exp = attempt_count.saturating_sub(1) as i32;
        let scaling = self.scaling.powi(exp);
        if scaling >= self.maximum_delay.div_duration_f64(self.initial_delay) {
            self.maximum_delay
        } else {
            self.initial_delay.mul_f64(scaling)
        }
    }

    fn delay_with_jitter(&self, attempt_count: u32, rng: &mut impl rand::Rng) -> Duration {
        let delay = self.delay(attempt_count);
        rng.gen_range(Duration::ZERO..=delay)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            maximum_delay: Duration::from_secs(60),
            scaling: 2.0,
        }
    }
}

impl crate::backoff_policy::BackoffPolicy for ExponentialBackoff {
    fn on_failure(&self, _loop_start: std::time::Instant, attempt_count: u32) -> Duration {
        self.delay_with_jitter(attempt_count, &mut rand::thread_rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff_policy::BackoffPolicy;

    #[test]
    fn build_rejects_invalid_params() {
        assert!(ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::ZERO)
            .build()
            .is_err());
        assert!(ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_maximum_delay(Duration::from_secs(5))
            .build()
            .is_err());
        assert!(ExponentialBackoffBuilder::new()
            .with_scaling(0.5)
            .build()
            .is_err());
    }

    #[test]
    fn scaling_doubles_until_capped() {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_maximum_delay(Duration::from_secs(4))
            .with_scaling(2.0)
            .build()
            .unwrap();
        assert_eq!(b.delay(1), Duration::from_secs(1));
        assert_eq!(b.delay(2), Duration::from_secs(2));
        assert_eq!(b.delay(3), Duration::from_secs(4));
        assert_eq!(b.delay(4), Duration::from_secs(4));
    }

    #[test]
    fn full_jitter_spans_zero_to_delay() {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_maximum_delay(Duration::from_secs(10))
            .build()
            .unwrap();
        let mut rng = rand::rngs::mock::StepRng::new(0, 0);
        assert_eq!(b.delay_with_jitter(1, &mut rng), Duration::ZERO);
        let mut rng = rand::rngs::mock::StepRng::new(u64::MAX, 0);
        assert_eq!(b.delay_with_jitter(1, &mut rng), Duration::from_secs(10));
    }

    #[test]
    fn on_failure_bounded_by_cap() {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_maximum_delay(Duration::from_secs(4))
            .with_scaling(2.0)
            .build()
            .unwrap();
        let now = std::time::Instant::now();
        for attempt in 1..=5 {
            let d = b.on_failure(now, attempt);
            assert!(d <= Duration::from_secs(4), "{d:?}");
        }
    }
}
