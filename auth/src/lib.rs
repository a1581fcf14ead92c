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

//! The narrow authentication surface consumed by the ingestion client.
//!
//! Authentication/token acquisition (§1) is an external collaborator: only
//! the [TokenProvider] contract lives here. This crate defines that
//! contract plus a small refreshing cache, so `kusto-ingest` never has to
//! know how a token was obtained (AAD client secret, managed identity,
//! device code, ...).

pub mod token;
pub mod token_cache;

pub use token::{Token, TokenProvider};
pub use token_cache::TokenCache;
