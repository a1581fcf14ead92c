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

//! The queued-ingest path (C6, §4.6): uploads a local source if needed,
//! writes a pending status row, then enqueues the aggregation-queue
//! message the Data Management service picks up.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::Serialize;

use ingest_gax::error::Error;
use ingest_gax::Result;

use crate::model::{IngestOperation, IngestionMethod, IngestionProperties, IngestionSource, SourceId, SourcePayload};
use crate::resource_manager::{QueueRef, ResourceManager, TableRef};
use crate::status_tracker::StatusRow;
use crate::storage_backend::{QueueStore, TableStore};
use crate::upload::{BlobSource, UploadConfig, Uploader};

/// The `AdditionalProperties` bag carried on the enqueue message, mirroring
/// the subset of [IngestionProperties] the service consumes at ingest time.
#[derive(Serialize)]
struct AdditionalProperties {
    format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "ingestionMappingReference")]
    ingestion_mapping_reference: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(rename = "ingestIfNotExists")]
    ingest_if_not_exists: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "creationTime")]
    creation_time: Option<chrono::DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "validationPolicy")]
    validation_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "authorizationContext")]
    authorization_context: Option<String>,
}

/// Points the service at the status row [Self::write_pending_status] wrote,
/// so it updates that row rather than inserting a new one (§4.6 step 3).
#[derive(Serialize)]
struct IngestionStatusInTable {
    #[serde(rename = "TableConnectionString")]
    table_connection_string: String,
    #[serde(rename = "PartitionKey")]
    partition_key: SourceId,
    #[serde(rename = "RowKey")]
    row_key: SourceId,
}

/// The JSON document enqueued on the secured ready-for-aggregation queue.
#[derive(Serialize)]
struct EnqueueMessage {
    #[serde(rename = "Id")]
    id: SourceId,
    #[serde(rename = "BlobPath")]
    blob_path: String,
    #[serde(rename = "RawDataSize")]
    raw_data_size: u64,
    #[serde(rename = "DatabaseName")]
    database_name: String,
    #[serde(rename = "TableName")]
    table_name: String,
    #[serde(rename = "RetainBlobOnSuccess")]
    retain_blob_on_success: bool,
    #[serde(rename = "FlushImmediately")]
    flush_immediately: bool,
    #[serde(rename = "ReportLevel")]
    report_level: u8,
    #[serde(rename = "ReportMethod")]
    report_method: u8,
    #[serde(rename = "AdditionalProperties")]
    additional_properties: AdditionalProperties,
    #[serde(rename = "IngestionStatusInTable")]
    ingestion_status_in_table: Option<IngestionStatusInTable>,
}

/// Uploads (if needed), records pending status, and enqueues an ingestion
/// source for asynchronous processing by the Data Management service.
pub struct QueuedClient {
    resource_manager: Arc<ResourceManager>,
    uploader: Uploader,
    queue_store: Arc<dyn QueueStore>,
    table_store: Arc<dyn TableStore>,
}

impl QueuedClient {
    pub fn new(
        resource_manager: Arc<ResourceManager>,
        blob_store: Arc<dyn crate::storage_backend::BlobStore>,
        queue_store: Arc<dyn QueueStore>,
        table_store: Arc<dyn TableStore>,
    ) -> Self {
        let uploader = Uploader::new(Arc::clone(&resource_manager), blob_store, UploadConfig::default());
        Self {
            resource_manager,
            uploader,
            queue_store,
            table_store,
        }
    }

    pub async fn queue(&self, source: IngestionSource, props: &IngestionProperties) -> Result<IngestOperation> {
        props.validate()?;

        let retain_blob_on_success = matches!(source.payload, SourcePayload::Blob { .. });
        let blob: BlobSource = self.uploader.upload(source, props).await?;

        let ingestion_status_in_table = if matches!(
            props.report_method,
            crate::model::ReportMethod::Table | crate::model::ReportMethod::QueueAndTable
        ) {
            let table = self.write_pending_status(blob.source_id, props).await?;
            Some(IngestionStatusInTable {
                table_connection_string: format!("{}?{}", table.endpoint, table.sas),
                partition_key: blob.source_id,
                row_key: blob.source_id,
            })
        } else {
            None
        };

        let message = EnqueueMessage {
            id: blob.source_id,
            blob_path: blob.url.clone(),
            raw_data_size: blob.exact_size,
            database_name: props.database.clone(),
            table_name: props.table.clone(),
            retain_blob_on_success,
            flush_immediately: props.flush_immediately,
            report_level: props.report_level as u8,
            report_method: props.report_method as u8,
            additional_properties: AdditionalProperties {
                format: props.format.as_str().to_string(),
                ingestion_mapping_reference: match &props.ingestion_mapping {
                    Some(crate::model::IngestionMapping::Reference { name, .. }) => Some(name.clone()),
                    _ => None,
                },
                tags: props.additional_tags.clone(),
                ingest_if_not_exists: props.ingest_if_not_exists_tags.clone(),
                creation_time: props.creation_time,
                validation_policy: props.validation_policy.as_ref().map(|v| format!("{v:?}")),
                authorization_context: props.authorization_context.clone(),
            },
            ingestion_status_in_table,
        };

        let body = serde_json::to_vec(&message).map_err(Error::serde)?;
        let encoded = BASE64.encode(body);

        self.enqueue_with_walk(&encoded).await?;

        Ok(IngestOperation::new(IngestionMethod::Queued, props.database.clone(), props.table.clone(), Utc::now())
            .with_source_ids(vec![blob.source_id]))
    }

    /// Writes the pending status row and returns the table it was written
    /// to, so the caller can reference the same row in the enqueue message.
    async fn write_pending_status(&self, source_id: SourceId, props: &IngestionProperties) -> Result<TableRef> {
        let table = self
            .resource_manager
            .status_table()?
            .ok_or_else(|| Error::service("no status table advertised by the data management service", false))?;

        let row = StatusRow::pending(source_id, source_id, props.database.clone(), props.table.clone());
        let row_json = serde_json::to_string(&row).map_err(Error::serde)?;
        let key = source_id.to_string();
        self.table_store.upsert_row(&table.endpoint, &table.sas, &key, &key, row_json).await?;
        Ok(table)
    }

    /// Enqueues on a queue chosen from the ranked/interleaved list, walking
    /// to the next queue on transient failure, matching the upload engine's
    /// container walk discipline (§4.2).
    async fn enqueue_with_walk(&self, encoded_message: &str) -> Result<()> {
        let queues = self.resource_manager.shuffled_queues()?;
        if queues.is_empty() {
            return Err(Error::no_available_queues());
        }
        let start = self.resource_manager.queue_start_index(queues.len())?;

        let mut last_error = None;
        for offset in 0..queues.len() {
            let queue: &QueueRef = &queues[(start + offset) % queues.len()];
            match self.queue_store.enqueue(&queue.endpoint, &queue.sas, encoded_message).await {
                Ok(()) => {
                    self.resource_manager.record_account_result(&queue.account, true);
                    return Ok(());
                }
                Err(error) => {
                    self.resource_manager.record_account_result(&queue.account, false);
                    let permanent = error.is_permanent();
                    last_error = Some(error);
                    if permanent {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(Error::no_available_queues))
    }
}
