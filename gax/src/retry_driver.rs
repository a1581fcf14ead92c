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

//! Generic bounded retry with jittered backoff (C8).
//!
//! The driver wraps a fallible async closure in one of five retry models:
//! call the attempt, classify the error, sleep for the backoff delay,
//! repeat -- generalized here to also poll a cancellation token between the
//! delay and the next attempt, matching §5's concurrency model.
//!
//! [RetryModel::Policy] is the escape hatch for callers who need the full
//! `RetryPolicy`/`BackoffPolicy` trait pair (time- and attempt-limit
//! decorators, custom classification) rather than one of the four fixed
//! schedules §4.8 names; `ingest::resource_manager::ResourceManager` uses it
//! to make its background refresh loop's retry behavior overridable.

use crate::backoff_policy::BackoffPolicyArg;
use crate::error::Error;
use crate::retry_policy::RetryPolicyArg;
use crate::retry_result::RetryResult;
use crate::Result;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The retry model used by a [RetryDriver].
#[derive(Clone, Debug)]
pub enum RetryModel {
    /// Never retry; the first failure is returned to the caller.
    NoRetry,
    /// Retry at a fixed interval, up to `total_retries` times.
    Simple {
        interval: Duration,
        total_retries: u32,
    },
    /// Retry using the n-th entry of `intervals` as the delay before the
    /// n-th retry. Exhausted once the attempt index reaches `intervals.len()`.
    Custom { intervals: Vec<Duration> },
    /// Retry with truncated exponential backoff and jitter:
    /// `delay = base_secs * 2^attempt + rand(0, max_jitter_secs)`.
    Exponential {
        max_attempts: u32,
        base_secs: f64,
        max_jitter_secs: f64,
    },
    /// Defers both the continue/exhausted decision and the delay to an
    /// injected [RetryPolicy][crate::retry_policy::RetryPolicy]/
    /// [BackoffPolicy][crate::backoff_policy::BackoffPolicy] pair, letting
    /// callers override the default retry behavior per request.
    Policy {
        retry_policy: RetryPolicyArg,
        backoff_policy: BackoffPolicyArg,
        idempotent: bool,
    },
}

impl RetryModel {
    /// The default managed-streaming retry schedule from §4.7:
    /// `{0, 1s, 2s, 4s, 8s, 16s}`.
    pub fn managed_streaming_default() -> Self {
        Self::Custom {
            intervals: [0, 1, 2, 4, 8, 16]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        }
    }

    /// `None` means "keep retrying" (exhaustion decided elsewhere, e.g. by
    /// [RetryModel::NoRetry] matching on the first call).
    fn delay_for_retry(&self, retry_index: u32) -> Option<Duration> {
        match self {
            Self::NoRetry => None,
            Self::Simple {
                interval,
                total_retries,
            } => (retry_index < *total_retries).then_some(*interval),
            Self::Custom { intervals } => intervals.get(retry_index as usize).copied(),
            Self::Exponential {
                max_attempts,
                base_secs,
                max_jitter_secs,
            } => {
                if retry_index >= *max_attempts {
                    return None;
                }
                let scaled = base_secs * 2f64.powi(retry_index as i32);
                let jitter = rand::Rng::gen_range(&mut rand::thread_rng(), 0.0..=*max_jitter_secs);
                Some(Duration::from_secs_f64(scaled + jitter))
            }
            Self::Policy { .. } => unreachable!("RetryDriver::run special-cases RetryModel::Policy before calling delay_for_retry"),
        }
    }
}

/// Drives a bounded retry loop.
#[derive(Clone, Debug)]
pub struct RetryDriver {
    model: RetryModel,
}

impl RetryDriver {
    pub fn new(model: RetryModel) -> Self {
        Self { model }
    }

    /// Runs `attempt` until it succeeds, the retry model is exhausted, or
    /// the error is permanent.
    ///
    /// `attempt` receives the 1-based attempt count. `on_retry` is invoked
    /// with the error and the chosen delay before each retry sleep;
    /// `on_error` is invoked with every error observed, including the final
    /// one. `cancel` is polled before each sleep and before each attempt;
    /// if set, the loop returns [Error::canceled].
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut attempt: F,
        mut on_retry: impl FnMut(&Error, Duration),
        mut on_error: impl FnMut(&Error),
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let loop_start = Instant::now();
        let mut attempt_count: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::canceled());
            }
            attempt_count += 1;
            match attempt(attempt_count).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    on_error(&error);
                    if error.is_permanent() {
                        return Err(error);
                    }

                    if let RetryModel::Policy {
                        retry_policy,
                        backoff_policy,
                        idempotent,
                    } = &self.model
                    {
                        match retry_policy.0.on_error(loop_start, attempt_count, *idempotent, error) {
                            RetryResult::Permanent(error) | RetryResult::Exhausted(error) => return Err(error),
                            RetryResult::Continue(error) => {
                                let delay = backoff_policy.0.on_failure(loop_start, attempt_count);
                                on_retry(&error, delay);
                                tokio::select! {
                                    _ = tokio::time::sleep(delay) => {}
                                    _ = cancel.cancelled() => return Err(Error::canceled()),
                                }
                            }
                        }
                        continue;
                    }

                    let retry_index = attempt_count - 1;
                    match self.model.delay_for_retry(retry_index) {
                        None => return Err(error),
                        Some(delay) => {
                            on_retry(&error, delay);
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = cancel.cancelled() => return Err(Error::canceled()),
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn no_retry_stops_immediately() {
        let driver = RetryDriver::new(RetryModel::NoRetry);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<()> = driver
            .run(
                &cancel,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::service("boom", false)) }
                },
                |_, _| {},
                |_| {},
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_intervals_exhaust_after_len() {
        let driver = RetryDriver::new(RetryModel::Custom {
            intervals: vec![Duration::from_secs(0), Duration::from_secs(1)],
        });
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<()> = driver
            .run(
                &cancel,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::service("boom", false)) }
                },
                |_, _| {},
                |_| {},
            )
            .await;
        assert!(result.is_err());
        // initial attempt + 2 retries (one per interval) = 3 calls, then exhausted.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_short_circuits() {
        let driver = RetryDriver::new(RetryModel::Simple {
            interval: Duration::from_secs(1),
            total_retries: 5,
        });
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<()> = driver
            .run(
                &cancel,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::client("bad request")) }
                },
                |_, _| {},
                |_| {},
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_retries() {
        let driver = RetryDriver::new(RetryModel::Simple {
            interval: Duration::from_millis(10),
            total_retries: 5,
        });
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result = driver
            .run(
                &cancel,
                |n| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 3 {
                            Err(Error::service("boom", false))
                        } else {
                            Ok(42)
                        }
                    }
                },
                |_, _| {},
                |_| {},
            )
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let driver = RetryDriver::new(RetryModel::Simple {
            interval: Duration::from_secs(30),
            total_retries: 5,
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> = driver
            .run(&cancel, |_| async { Err(Error::service("boom", false)) }, |_, _| {}, |_| {})
            .await;
        match result {
            Err(e) => assert_eq!(e.kind(), crate::error::ErrorKind::Canceled),
            Ok(_) => panic!("expected cancellation"),
        }
    }
}
