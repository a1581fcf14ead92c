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

//! [IngestOperation], the client-side handle tracking an in-flight or
//! completed ingestion (§3, §9).

use super::source::SourceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which path an ingestion took.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionMethod {
    Streaming,
    Queued,
}

/// A tally of per-blob statuses observed for a batch operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub succeeded: u64,
    pub failed: u64,
    pub in_progress: u64,
    pub canceled: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed + self.in_progress + self.canceled
    }

    pub fn is_final(&self) -> bool {
        self.in_progress == 0
    }
}

/// The client's handle on one ingestion call, which may have fanned out into
/// several per-blob status rows (queued path) or completed synchronously
/// (streaming path).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestOperation {
    pub method: IngestionMethod,
    pub database: String,
    pub table: String,
    pub start_time: DateTime<Utc>,
    pub source_ids: Vec<SourceId>,
    pub status_counts: StatusCounts,
}

impl IngestOperation {
    pub fn new(
        method: IngestionMethod,
        database: impl Into<String>,
        table: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            method,
            database: database.into(),
            table: table.into(),
            start_time,
            source_ids: Vec::new(),
            status_counts: StatusCounts::default(),
        }
    }

    pub fn with_source_ids(mut self, ids: Vec<SourceId>) -> Self {
        self.source_ids = ids;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.status_counts.is_final()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_all_fields() {
        let op = IngestOperation::new(IngestionMethod::Queued, "db", "t", Utc::now())
            .with_source_ids(vec![SourceId::new(), SourceId::new()]);
        let mut op = op;
        op.status_counts = StatusCounts {
            succeeded: 1,
            failed: 0,
            in_progress: 1,
            canceled: 0,
        };

        let json = serde_json::to_string(&op).expect("serialize");
        let round_tripped: IngestOperation = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(round_tripped.method, op.method);
        assert_eq!(round_tripped.database, op.database);
        assert_eq!(round_tripped.table, op.table);
        assert_eq!(round_tripped.start_time, op.start_time);
        assert_eq!(round_tripped.source_ids, op.source_ids);
        assert_eq!(round_tripped.status_counts, op.status_counts);
    }

    #[test]
    fn is_complete_reflects_in_progress_count() {
        let mut op = IngestOperation::new(IngestionMethod::Streaming, "db", "t", Utc::now());
        assert!(op.is_complete());
        op.status_counts.in_progress = 1;
        assert!(!op.is_complete());
    }
}
