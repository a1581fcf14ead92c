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

//! Generic error, retry, and backoff primitives for the Kusto ingestion client.
//!
//! This crate contains no Kusto-specific logic. It defines the error
//! taxonomy (§7), the `RetryPolicy` and `BackoffPolicy` traits, and the
//! `RetryDriver` (C8) that every other component in `kusto-ingest` builds on.

/// An alias of [std::result::Result] where the error is always [Error][crate::error::Error].
pub type Result<T> = std::result::Result<T, crate::error::Error>;

pub mod backoff_policy;
pub mod error;
pub mod exponential_backoff;
pub mod retry_driver;
pub mod retry_policy;
pub mod retry_result;
