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

//! Core ingestion pipeline for a Kusto (Azure Data Explorer) client SDK.
//!
//! This crate implements four tightly coupled subsystems: resource
//! discovery and caching ([resource_manager]), health-ranked
//! storage-account selection
//! ([ranked_accounts], [round_robin]), the upload engine ([upload]), and
//! the managed-streaming router ([managed_router]) that decides between
//! direct streaming ingest ([streaming_client]) and the queued path
//! ([queued_client]).

pub use ingest_gax::error::{Error, ErrorKind};
pub use ingest_gax::Result;

pub mod endpoint;
pub mod managed_router;
pub mod management_command;
pub mod model;
pub mod queued_client;
pub mod ranked_accounts;
pub mod resource_manager;
pub mod round_robin;
pub mod status_tracker;
pub mod storage_backend;
pub mod streaming_client;
pub mod upload;
