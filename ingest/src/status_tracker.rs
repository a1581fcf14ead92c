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

//! Ingestion-status polling (C9, §4.9).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ingest_gax::error::Error;
use ingest_gax::Result;

use crate::model::{IngestOperation, SourceId, StatusCounts};
use crate::resource_manager::TableRef;
use crate::storage_backend::TableStore;

/// The terminal and non-terminal states a [StatusRow] can be in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum IngestionStatus {
    Pending,
    Succeeded,
    Failed,
    PartiallySucceeded,
    Canceled,
}

impl IngestionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IngestionStatus::Pending)
    }
}

/// A single ingestion-status table row (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusRow {
    pub partition_key: SourceId,
    pub row_key: SourceId,
    pub status: IngestionStatus,
    pub error_code: Option<String>,
    pub failure_status: Option<String>,
    pub ingestion_source_id: SourceId,
    pub operation_id: SourceId,
    pub table: String,
    pub database: String,
    pub ingestion_source_path: Option<String>,
    pub updated_on: chrono::DateTime<chrono::Utc>,
}

impl StatusRow {
    pub fn pending(source_id: SourceId, operation_id: SourceId, database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            partition_key: source_id,
            row_key: source_id,
            status: IngestionStatus::Pending,
            error_code: None,
            failure_status: None,
            ingestion_source_id: source_id,
            operation_id,
            table: table.into(),
            database: database.into(),
            ingestion_source_path: None,
            updated_on: chrono::Utc::now(),
        }
    }
}

/// A summary tally over every status row belonging to an [IngestOperation].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub succeeded: u64,
    pub failed: u64,
    pub in_progress: u64,
    pub canceled: u64,
    pub total: u64,
}

impl From<&[StatusRow]> for StatusSummary {
    fn from(rows: &[StatusRow]) -> Self {
        let mut summary = StatusSummary {
            total: rows.len() as u64,
            ..Default::default()
        };
        for row in rows {
            match row.status {
                IngestionStatus::Succeeded => summary.succeeded += 1,
                IngestionStatus::Failed => summary.failed += 1,
                IngestionStatus::PartiallySucceeded => summary.failed += 1,
                IngestionStatus::Canceled => summary.canceled += 1,
                IngestionStatus::Pending => summary.in_progress += 1,
            }
        }
        summary
    }
}

impl From<StatusSummary> for StatusCounts {
    fn from(summary: StatusSummary) -> Self {
        StatusCounts {
            succeeded: summary.succeeded,
            failed: summary.failed,
            in_progress: summary.in_progress,
            canceled: summary.canceled,
        }
    }
}

/// Reads back ingestion-status rows produced at enqueue time.
pub struct StatusTracker {
    table_store: Arc<dyn TableStore>,
}

impl StatusTracker {
    pub fn new(table_store: Arc<dyn TableStore>) -> Self {
        Self { table_store }
    }

    /// Table mode: reads each row by `(partition_key, row_key)`. Rows that
    /// have not yet been written (the service has not processed the
    /// ingestion yet) are treated as still [IngestionStatus::Pending].
    pub async fn get_statuses(&self, table: &TableRef, source_ids: &[SourceId]) -> Result<Vec<StatusRow>> {
        let mut rows = Vec::with_capacity(source_ids.len());
        for &id in source_ids {
            let key = id.to_string();
            match self.table_store.read_row(&table.endpoint, &table.sas, &key, &key).await? {
                Some(json) => {
                    let row: StatusRow = serde_json::from_str(&json).map_err(Error::serde)?;
                    rows.push(row);
                }
                None => rows.push(StatusRow::pending(id, id, "", "")),
            }
        }
        Ok(rows)
    }

    pub fn summary(rows: &[StatusRow]) -> StatusSummary {
        StatusSummary::from(rows)
    }

    /// Applies a freshly read summary onto an operation's status counts.
    pub async fn refresh(&self, table: &TableRef, operation: &mut IngestOperation) -> Result<StatusSummary> {
        let rows = self.get_statuses(table, &operation.source_ids).await?;
        let summary = Self::summary(&rows);
        operation.status_counts = summary.into();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeTableStore {
        rows: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl TableStore for FakeTableStore {
        async fn upsert_row(&self, _e: &str, _s: &str, partition_key: &str, _r: &str, row_json: String) -> Result<()> {
            self.rows.lock().unwrap().insert(partition_key.to_string(), row_json);
            Ok(())
        }

        async fn read_row(&self, _e: &str, _s: &str, partition_key: &str, _r: &str) -> Result<Option<String>> {
            Ok(self.rows.lock().unwrap().get(partition_key).cloned())
        }
    }

    #[test]
    fn status_row_json_round_trips() {
        let row = StatusRow::pending(SourceId::new(), SourceId::new(), "db", "table");
        let json = serde_json::to_string(&row).unwrap();
        let back: StatusRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back.partition_key, row.partition_key);
        assert_eq!(back.status, row.status);
        assert_eq!(back.database, row.database);
    }

    #[tokio::test]
    async fn unwritten_rows_report_as_pending() {
        let table_store = Arc::new(FakeTableStore { rows: Mutex::new(HashMap::new()) });
        let tracker = StatusTracker::new(table_store);
        let table = TableRef {
            endpoint: "https://acct.table.core.windows.net/status".to_string(),
            sas: "sv=1".to_string(),
        };
        let id = SourceId::new();
        let rows = tracker.get_statuses(&table, &[id]).await.unwrap();
        assert_eq!(rows[0].status, IngestionStatus::Pending);
    }

    #[test]
    fn summary_counts_partially_succeeded_as_failed() {
        let rows = vec![
            StatusRow {
                status: IngestionStatus::PartiallySucceeded,
                ..StatusRow::pending(SourceId::new(), SourceId::new(), "d", "t")
            },
            StatusRow {
                status: IngestionStatus::Succeeded,
                ..StatusRow::pending(SourceId::new(), SourceId::new(), "d", "t")
            },
        ];
        let summary = StatusTracker::summary(&rows);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.total, 2);
    }
}
