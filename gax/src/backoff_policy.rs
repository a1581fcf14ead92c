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

//! Defines the trait used to control the delay between retry attempts.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Controls the backoff delay between retry attempts.
pub trait BackoffPolicy: Send + Sync + Debug {
    /// Returns the delay to wait before the next attempt.
    ///
    /// # Parameters
    /// * `loop_start` - when the retry loop started.
    /// * `attempt_count` - the number of attempts so far, including the
    ///   initial (non-retry) attempt.
    fn on_failure(&self, loop_start: Instant, attempt_count: u32) -> Duration;
}

/// A helper type to use [BackoffPolicy] in client and request options.
#[derive(Clone, Debug)]
pub struct BackoffPolicyArg(pub(crate) Arc<dyn BackoffPolicy>);

impl<T> From<T> for BackoffPolicyArg
where
    T: BackoffPolicy + 'static,
{
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl From<Arc<dyn BackoffPolicy>> for BackoffPolicyArg {
    fn from(value: Arc<dyn BackoffPolicy>) -> Self {
        Self(value)
    }
}
