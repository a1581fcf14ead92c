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

//! Retry loop control types.

use crate::error::Error;

/// The result of a loop control decision.
///
/// Returned by [RetryPolicy::on_error][crate::retry_policy::RetryPolicy::on_error]
/// to tell the retry driver whether to stop or to keep retrying.
#[derive(Debug)]
pub enum RetryResult {
    /// The error is non-retryable, stop the loop immediately.
    Permanent(Error),
    /// The error is retryable, but the policy has decided to stop the loop
    /// (attempt limit or time limit reached).
    Exhausted(Error),
    /// The error is retryable and the policy allows another attempt.
    Continue(Error),
}

impl RetryResult {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue(_))
    }

    /// Unwraps the inner error regardless of variant.
    pub fn into_error(self) -> Error {
        match self {
            Self::Permanent(e) | Self::Exhausted(e) | Self::Continue(e) => e,
        }
    }
}
