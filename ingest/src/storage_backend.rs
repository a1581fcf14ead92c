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

//! Narrow storage interfaces consumed by the upload, queue, and status
//! subsystems.
//!
//! A full blob/queue/table SDK is out of scope; only the handful of
//! operations the ingestion pipeline actually calls are modeled here, as
//! traits so tests can supply in-memory fakes instead of talking to a real
//! storage account.

use async_trait::async_trait;
use bytes::Bytes;
use ingest_gax::Result;

/// Block-blob upload primitives. A real implementation wraps an Azure
/// Storage Blob SDK client (or equivalent) scoped to one container.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Uploads `data` as a single blob in one shot.
    async fn put_blob(&self, container_endpoint: &str, sas: &str, blob_name: &str, data: Bytes) -> Result<u64>;

    /// Stages one block of a block blob; `block_id` must be a valid,
    /// base64-safe block identifier chosen by the caller.
    async fn stage_block(
        &self,
        container_endpoint: &str,
        sas: &str,
        blob_name: &str,
        block_id: &str,
        data: Bytes,
    ) -> Result<()>;

    /// Commits a previously staged block list, in order, as the blob's
    /// final content.
    async fn commit_block_list(
        &self,
        container_endpoint: &str,
        sas: &str,
        blob_name: &str,
        block_ids: &[String],
    ) -> Result<()>;
}

/// Queue enqueue primitives for the aggregation, success, and failure
/// queues.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Enqueues a base64-encoded message body.
    async fn enqueue(&self, queue_endpoint: &str, sas: &str, message_base64: &str) -> Result<()>;
}

/// Row-level primitives for the ingestion status table.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Inserts or replaces the row identified by `(partition_key, row_key)`.
    async fn upsert_row(
        &self,
        table_endpoint: &str,
        sas: &str,
        partition_key: &str,
        row_key: &str,
        row_json: String,
    ) -> Result<()>;

    /// Reads the row identified by `(partition_key, row_key)`, if present.
    async fn read_row(
        &self,
        table_endpoint: &str,
        sas: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<String>>;
}
