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

//! Defines the trait used to classify errors as retryable or permanent.

use crate::error::Error;
use crate::retry_result::RetryResult;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Determines how errors are handled in a retry loop.
///
/// Implementations decide whether an error is retryable, and for how long
/// the retry loop may continue. [crate::error::Error::is_permanent] always
/// short-circuits the loop regardless of what the policy returns; policies
/// only get a say over the *retryable* errors.
pub trait RetryPolicy: Send + Sync + Debug {
    /// Query the retry policy after an error.
    ///
    /// # Parameters
    /// * `loop_start` - when the retry loop started.
    /// * `attempt_count` - the number of attempts, including the initial one.
    /// * `idempotent` - whether the operation is safe to retry blindly.
    /// * `error` - the error from the last attempt.
    fn on_error(
        &self,
        loop_start: Instant,
        attempt_count: u32,
        idempotent: bool,
        error: Error,
    ) -> RetryResult;

    /// The remaining time in the retry policy, if time-bounded.
    fn remaining_time(&self, _loop_start: Instant, _attempt_count: u32) -> Option<Duration> {
        None
    }
}

/// A helper type to use [RetryPolicy] in client and request options.
#[derive(Clone)]
pub struct RetryPolicyArg(pub(crate) Arc<dyn RetryPolicy>);

impl Debug for RetryPolicyArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<T> From<T> for RetryPolicyArg
where
    T: RetryPolicy + 'static,
{
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl From<Arc<dyn RetryPolicy>> for RetryPolicyArg {
    fn from(value: Arc<dyn RetryPolicy>) -> Self {
        Self(value)
    }
}

/// Extension trait for [`RetryPolicy`].
pub trait RetryPolicyExt: RetryPolicy + Sized {
    /// Decorate a [`RetryPolicy`] to limit the total elapsed time in the
    /// retry loop.
    fn with_time_limit(self, maximum_duration: Duration) -> LimitedElapsedTime<Self> {
        LimitedElapsedTime {
            inner: self,
            maximum_duration,
        }
    }

    /// Decorate a [RetryPolicy] to limit the number of retry attempts.
    fn with_attempt_limit(self, maximum_attempts: u32) -> LimitedAttemptCount<Self> {
        LimitedAttemptCount {
            inner: self,
            maximum_attempts,
        }
    }
}

impl<T: RetryPolicy> RetryPolicyExt for T {}

/// Decorates an inner [RetryPolicy], stopping the loop once `maximum_duration`
/// of wall-clock time has elapsed since `loop_start`.
#[derive(Clone, Debug)]
pub struct LimitedElapsedTime<P> {
    inner: P,
    maximum_duration: Duration,
}

impl<P: RetryPolicy> RetryPolicy for LimitedElapsedTime<P> {
    fn on_error(
        &self,
        loop_start: Instant,
        attempt_count: u32,
        idempotent: bool,
        error: Error,
    ) -> RetryResult {
        let flow = self.inner.on_error(loop_start, attempt_count, idempotent, error);
        match flow {
            RetryResult::Continue(error) if loop_start.elapsed() >= self.maximum_duration => {
                RetryResult::Exhausted(error)
            }
            other => other,
        }
    }

    fn remaining_time(&self, loop_start: Instant, attempt_count: u32) -> Option<Duration> {
        let elapsed = loop_start.elapsed();
        let remaining = self.maximum_duration.saturating_sub(elapsed);
        match self.inner.remaining_time(loop_start, attempt_count) {
            Some(inner) => Some(std::cmp::min(inner, remaining)),
            None => Some(remaining),
        }
    }
}

/// Decorates an inner [RetryPolicy], stopping the loop once `maximum_attempts`
/// have been made.
#[derive(Clone, Debug)]
pub struct LimitedAttemptCount<P> {
    inner: P,
    maximum_attempts: u32,
}

impl<P: RetryPolicy> RetryPolicy for LimitedAttemptCount<P> {
    fn on_error(
        &self,
        loop_start: Instant,
        attempt_count: u32,
        idempotent: bool,
        error: Error,
    ) -> RetryResult {
        let flow = self.inner.on_error(loop_start, attempt_count, idempotent, error);
        match flow {
            RetryResult::Continue(error) if attempt_count >= self.maximum_attempts => {
                RetryResult::Exhausted(error)
            }
            other => other,
        }
    }

    fn remaining_time(&self, loop_start: Instant, attempt_count: u32) -> Option<Duration> {
        self.inner.remaining_time(loop_start, attempt_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct AlwaysContinue;
    impl RetryPolicy for AlwaysContinue {
        fn on_error(
            &self,
            _loop_start: Instant,
            _attempt_count: u32,
            _idempotent: bool,
            error: Error,
        ) -> RetryResult {
            RetryResult::Continue(error)
        }
    }

    #[test]
    fn attempt_limit_exhausts() {
        let policy = AlwaysContinue.with_attempt_limit(3);
        let now = Instant::now();
        let flow = policy.on_error(now, 2, true, Error::other("x"));
        assert!(flow.is_continue());
        let flow = policy.on_error(now, 3, true, Error::other("x"));
        assert!(flow.is_exhausted());
    }

    #[test]
    fn time_limit_exhausts() {
        let policy = AlwaysContinue.with_time_limit(Duration::from_millis(0));
        let now = Instant::now() - Duration::from_millis(50);
        let flow = policy.on_error(now, 1, true, Error::other("x"));
        assert!(flow.is_exhausted());
    }
}
