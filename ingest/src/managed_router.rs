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

//! Chooses between direct streaming ingest and the queued path per request,
//! tracks per-table streaming health, and falls back to queued on
//! classified streaming failure (C7, §4.7).

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use ingest_gax::retry_driver::{RetryDriver, RetryModel};
use ingest_gax::Result;

use crate::model::{IngestOperation, IngestionMethod, IngestionProperties, IngestionSource, SourcePayload};
use crate::queued_client::QueuedClient;
use crate::streaming_client::{StreamingClient, StreamingErrorCategory, DEFAULT_MAX_STREAMING_BODY_BYTES};
use crate::upload;

const DEFAULT_TIME_UNTIL_RESUMING_STREAMING_INGEST: Duration = Duration::from_secs(15 * 60);
const DEFAULT_THROTTLE_BACKOFF_PERIOD: Duration = Duration::from_secs(10);

/// Tunables for [ManagedRouter], all defaulted per §4.7.
#[derive(Clone, Debug)]
pub struct ManagedRouterConfig {
    /// Multiplies [DEFAULT_MAX_STREAMING_BODY_BYTES] to get the size
    /// threshold above which a request routes directly to the queued path.
    pub data_size_factor: f64,
    pub time_until_resuming_streaming_ingest: Duration,
    pub throttle_backoff_period: Duration,
    /// When `true`, a `STREAMING_INGESTION_OFF` (or
    /// `TABLE_CONFIGURATION_PREVENTS_STREAMING`) classification falls back
    /// to queued ingestion instead of surfacing as a permanent failure, and
    /// later calls for the same table skip the streaming attempt entirely
    /// until the reset window elapses.
    pub continue_when_streaming_ingestion_unavailable: bool,
}

impl Default for ManagedRouterConfig {
    fn default() -> Self {
        Self {
            data_size_factor: 1.0,
            time_until_resuming_streaming_ingest: DEFAULT_TIME_UNTIL_RESUMING_STREAMING_INGEST,
            throttle_backoff_period: DEFAULT_THROTTLE_BACKOFF_PERIOD,
            continue_when_streaming_ingestion_unavailable: false,
        }
    }
}

struct ErrorStateEntry {
    reset_at: Instant,
    category: StreamingErrorCategory,
    sequence: u64,
}

/// Per-`(database, table)` streaming health, owned by the router. A plain
/// `Mutex`-guarded map with a monotonic sequence number stands in for the
/// compare-and-set semantics §5 asks for: a write only lands if its
/// sequence number is newer than what is already recorded, so an
/// out-of-order callback can never widen a window a more recent event has
/// already narrowed.
struct ManagedErrorState {
    entries: Mutex<HashMap<(String, String), ErrorStateEntry>>,
    sequence: AtomicU64,
}

impl ManagedErrorState {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    fn should_default_to_queued(&self, database: &str, table: &str, continue_when_unavailable: bool) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(&(database.to_string(), table.to_string())) {
            Some(entry) if Instant::now() < entry.reset_at => match entry.category {
                StreamingErrorCategory::StreamingIngestionOff | StreamingErrorCategory::TableConfigurationPreventsStreaming => {
                    continue_when_unavailable
                }
                _ => true,
            },
            _ => false,
        }
    }

    /// Records a classified failure. `reset_at = None` means "do not cache
    /// state for this category" (`RequestPropertiesPreventStreaming`).
    fn record(&self, database: &str, table: &str, category: StreamingErrorCategory, reset_at: Option<Instant>) {
        let Some(reset_at) = reset_at else { return };
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let key = (database.to_string(), table.to_string());
        let mut entries = self.entries.lock().unwrap();
        let should_write = entries.get(&key).map(|existing| sequence > existing.sequence).unwrap_or(true);
        if should_write {
            entries.insert(key, ErrorStateEntry { reset_at, category, sequence });
        }
    }
}

/// Decides, per ingest call, between direct streaming and the queued path;
/// falls back from one to the other on classified streaming failure.
pub struct ManagedRouter {
    streaming_client: StreamingClient,
    queued_client: QueuedClient,
    error_state: ManagedErrorState,
    config: ManagedRouterConfig,
    stream_retry: RetryDriver,
}

impl ManagedRouter {
    pub fn new(streaming_client: StreamingClient, queued_client: QueuedClient, config: ManagedRouterConfig) -> Self {
        Self {
            streaming_client,
            queued_client,
            error_state: ManagedErrorState::new(),
            config,
            stream_retry: RetryDriver::new(RetryModel::managed_streaming_default()),
        }
    }

    pub async fn ingest(&self, mut source: IngestionSource, props: &IngestionProperties) -> Result<IngestOperation> {
        props.validate()?;

        let threshold = (DEFAULT_MAX_STREAMING_BODY_BYTES as f64 * self.config.data_size_factor) as u64;
        let effective_size = source.known_size().unwrap_or(DEFAULT_MAX_STREAMING_BODY_BYTES + 1);
        let is_blob = matches!(source.payload, SourcePayload::Blob { .. });

        if is_blob || effective_size > threshold {
            return self.queued_client.queue(source, props).await;
        }

        if self
            .error_state
            .should_default_to_queued(&props.database, &props.table, self.config.continue_when_streaming_ingestion_unavailable)
        {
            return self.queued_client.queue(source, props).await;
        }

        let source_id = source.source_id();
        let format = source.format;
        let raw = upload::read_raw_payload(&mut source).await?;
        let should_compress = source.should_compress();
        let body = if should_compress {
            upload::gzip_compress(raw.clone()).await?
        } else {
            raw.clone()
        };

        let cancel = CancellationToken::new();
        let stream_result = self
            .stream_retry
            .run(
                &cancel,
                |_attempt| {
                    let body = Bytes::from(body.clone());
                    async move { self.streaming_client.stream(body, should_compress, props).await }
                },
                |_, _| {},
                |_| {},
            )
            .await;

        match stream_result {
            Ok(()) => Ok(IngestOperation::new(IngestionMethod::Streaming, props.database.clone(), props.table.clone(), Utc::now())
                .with_source_ids(vec![source_id])),
            Err(error) => {
                let category = error
                    .as_inner::<StreamingErrorCategory>()
                    .copied()
                    .unwrap_or(StreamingErrorCategory::UnknownErrors);
                let reset_at = match category {
                    StreamingErrorCategory::StreamingIngestionOff | StreamingErrorCategory::TableConfigurationPreventsStreaming => {
                        Some(Instant::now() + self.config.time_until_resuming_streaming_ingest)
                    }
                    StreamingErrorCategory::Throttled => Some(Instant::now() + self.config.throttle_backoff_period),
                    StreamingErrorCategory::RequestPropertiesPreventStreaming => None,
                    StreamingErrorCategory::OtherErrors | StreamingErrorCategory::UnknownErrors => None,
                };
                self.error_state.record(&props.database, &props.table, category, reset_at);

                if self.should_fall_back(category, error.is_permanent()) {
                    let replay = IngestionSource::from_stream(Box::pin(Cursor::new(raw)), None, false, format).with_source_id(source_id);
                    self.queued_client.queue(replay, props).await
                } else {
                    Err(error)
                }
            }
        }
    }

    /// §4.7 step 3: fall back to queued only if the error is non-permanent.
    /// `StreamingIngestionOff`/`TableConfigurationPreventsStreaming` are
    /// permanent by default too, but `continue_when_streaming_ingestion_unavailable`
    /// is an explicit opt-in to fall back anyway, so permanence alone
    /// doesn't gate them. `Other`/`Unknown` have no such override: a
    /// permanent classification there (e.g. `@permanent=true` on an
    /// `UnknownErrors` envelope) must surface directly.
    fn should_fall_back(&self, category: StreamingErrorCategory, permanent: bool) -> bool {
        match category {
            StreamingErrorCategory::RequestPropertiesPreventStreaming => false,
            StreamingErrorCategory::StreamingIngestionOff | StreamingErrorCategory::TableConfigurationPreventsStreaming => {
                self.config.continue_when_streaming_ingestion_unavailable
            }
            StreamingErrorCategory::Throttled => true,
            StreamingErrorCategory::OtherErrors | StreamingErrorCategory::UnknownErrors => !permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceFormat;
    use crate::resource_manager::{DmClient, ResourceManager};
    use crate::storage_backend::{BlobStore, QueueStore, TableStore};
    use async_trait::async_trait;
    use httptest::matchers::*;
    use httptest::responders::*;
    use httptest::Server;
    use ingest_auth::{Token, TokenProvider};
    use std::sync::Arc;

    struct FakeDm;

    #[async_trait]
    impl DmClient for FakeDm {
        async fn get_ingestion_resources(&self) -> Result<Vec<(String, String)>> {
            Ok(vec![
                (
                    "TempStorage".to_string(),
                    "https://acct1.blob.core.windows.net/c1?sv=1".to_string(),
                ),
                (
                    "SecuredReadyForAggregationQueue".to_string(),
                    "https://acct1.queue.core.windows.net/q1?sv=1".to_string(),
                ),
            ])
        }

        async fn get_identity_token(&self) -> Result<Vec<String>> {
            Ok(vec!["ctx".to_string()])
        }
    }

    struct NoopBlobStore;
    #[async_trait]
    impl BlobStore for NoopBlobStore {
        async fn put_blob(&self, _e: &str, _s: &str, _b: &str, data: Bytes) -> Result<u64> {
            Ok(data.len() as u64)
        }
        async fn stage_block(&self, _e: &str, _s: &str, _b: &str, _id: &str, _d: Bytes) -> Result<()> {
            Ok(())
        }
        async fn commit_block_list(&self, _e: &str, _s: &str, _b: &str, _ids: &[String]) -> Result<()> {
            Ok(())
        }
    }

    struct NoopQueueStore;
    #[async_trait]
    impl QueueStore for NoopQueueStore {
        async fn enqueue(&self, _e: &str, _s: &str, _m: &str) -> Result<()> {
            Ok(())
        }
    }

    struct NoopTableStore;
    #[async_trait]
    impl TableStore for NoopTableStore {
        async fn upsert_row(&self, _e: &str, _s: &str, _pk: &str, _rk: &str, _row: String) -> Result<()> {
            Ok(())
        }
        async fn read_row(&self, _e: &str, _s: &str, _pk: &str, _rk: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[derive(Debug)]
    struct FakeTokenProvider;
    #[async_trait]
    impl TokenProvider for FakeTokenProvider {
        async fn token(&self) -> Result<Token> {
            Ok(Token {
                token: "fake-token".to_string(),
                token_type: "Bearer".to_string(),
                expires_at: None,
            })
        }
    }

    async fn make_router(engine_endpoint: String, config: ManagedRouterConfig) -> ManagedRouter {
        let manager = Arc::new(ResourceManager::connect(Arc::new(FakeDm), None).await.unwrap());
        let queued_client = QueuedClient::new(
            Arc::clone(&manager),
            Arc::new(NoopBlobStore),
            Arc::new(NoopQueueStore),
            Arc::new(NoopTableStore),
        );
        let streaming_client = StreamingClient::new(reqwest::Client::new(), engine_endpoint, Arc::new(FakeTokenProvider));
        ManagedRouter::new(streaming_client, queued_client, config)
    }

    fn small_source() -> IngestionSource {
        let reader: std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send>> = Box::pin(Cursor::new(b"a,b,c\n1,2,3\n".to_vec()));
        IngestionSource::from_stream(reader, Some(12), false, SourceFormat::Csv)
    }

    #[tokio::test]
    async fn successful_stream_reports_streaming_method() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(request::method_path("POST", "/v1/rest/ingest/db/table"))
                .respond_with(status_code(200)),
        );
        let router = make_router(format!("http://{}", server.addr()), ManagedRouterConfig::default()).await;

        let props = IngestionProperties::new("db", "table", SourceFormat::Csv);
        let op = router.ingest(small_source(), &props).await.unwrap();
        assert_eq!(op.method, IngestionMethod::Streaming);
    }

    #[tokio::test]
    async fn table_configuration_failure_without_continue_flag_surfaces_error() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(request::method_path("POST", "/v1/rest/ingest/db/table"))
                .times(1)
                .respond_with(status_code(400).body(
                    r#"{"error":{"code":"General_BadRequest","message":"x","@message":"streaming ingestion policy disabled","@permanent":true}}"#,
                )),
        );
        let router = make_router(format!("http://{}", server.addr()), ManagedRouterConfig::default()).await;

        let props = IngestionProperties::new("db", "table", SourceFormat::Csv);
        let result = router.ingest(small_source(), &props).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn table_configuration_failure_with_continue_flag_falls_back_to_queued() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(request::method_path("POST", "/v1/rest/ingest/db/table"))
                .times(1)
                .respond_with(status_code(400).body(
                    r#"{"error":{"code":"General_BadRequest","message":"x","@message":"streaming ingestion policy disabled","@permanent":true}}"#,
                )),
        );
        let config = ManagedRouterConfig {
            continue_when_streaming_ingestion_unavailable: true,
            ..Default::default()
        };
        let router = make_router(format!("http://{}", server.addr()), config).await;

        let props = IngestionProperties::new("db", "table", SourceFormat::Csv);
        let op = router.ingest(small_source(), &props).await.unwrap();
        assert_eq!(op.method, IngestionMethod::Queued);
    }

    #[tokio::test]
    async fn permanent_unknown_error_surfaces_instead_of_falling_back() {
        let server = Server::run();
        server.expect(
            httptest::Expectation::matching(request::method_path("POST", "/v1/rest/ingest/db/table"))
                .times(1)
                .respond_with(status_code(400).body(
                    r#"{"error":{"code":"General_BadRequest","message":"x","@message":"something unrecognized","@permanent":true}}"#,
                )),
        );
        let router = make_router(format!("http://{}", server.addr()), ManagedRouterConfig::default()).await;

        let props = IngestionProperties::new("db", "table", SourceFormat::Csv);
        let result = router.ingest(small_source(), &props).await;
        let error = result.expect_err("a permanent Unknown classification must not fall back to queued");
        assert!(error.is_permanent());
    }

    #[tokio::test]
    async fn oversized_source_routes_directly_to_queued() {
        let router = make_router("http://unused.invalid".to_string(), ManagedRouterConfig::default()).await;
        let reader: std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send>> = Box::pin(Cursor::new(vec![0u8; 16]));
        let source = IngestionSource::from_stream(reader, Some(DEFAULT_MAX_STREAMING_BODY_BYTES + 100), false, SourceFormat::Csv);
        let props = IngestionProperties::new("db", "table", SourceFormat::Csv);

        let op = router.ingest(source, &props).await.unwrap();
        assert_eq!(op.method, IngestionMethod::Queued);
    }

    #[test]
    fn cached_throttle_state_diverts_regardless_of_continue_flag() {
        let state = ManagedErrorState::new();
        state.record("db", "t", StreamingErrorCategory::Throttled, Some(Instant::now() + Duration::from_secs(10)));
        assert!(state.should_default_to_queued("db", "t", false));
        assert!(state.should_default_to_queued("db", "t", true));
    }

    #[test]
    fn later_record_call_always_wins_even_with_a_narrower_window() {
        // `record` assigns its sequence number at call time, so the call
        // that lands second -- regardless of which window it carries -- is
        // the one a reader observes: the CAS never lets an earlier sequence
        // overwrite a newer one.
        let state = ManagedErrorState::new();
        let far = Instant::now() + Duration::from_secs(900);
        let near = Instant::now() + Duration::from_secs(1);
        state.record("db", "t", StreamingErrorCategory::StreamingIngestionOff, Some(far));
        state.record("db", "t", StreamingErrorCategory::StreamingIngestionOff, Some(near));
        let entries = state.entries.lock().unwrap();
        let entry = entries.get(&("db".to_string(), "t".to_string())).unwrap();
        assert_eq!(entry.reset_at, near);
    }
}
