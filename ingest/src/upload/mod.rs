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

//! The upload engine (C4, §4.4): compresses, sizes, names, and uploads a
//! local source to a selected storage container, retrying across
//! containers on failure.

mod blob_name;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write as _;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use ingest_gax::error::Error;
use ingest_gax::retry_driver::{RetryDriver, RetryModel};
use ingest_gax::Result;

use crate::model::{IngestionProperties, IngestionSource, SourcePayload};
use crate::resource_manager::ResourceManager;
use crate::storage_backend::BlobStore;

pub const UPLOAD_MAX_SINGLE_SIZE_BYTES: u64 = 256 * 1024 * 1024;
pub const DEFAULT_MAX_DATA_SIZE_BYTES: u64 = 4 * 1024 * 1024 * 1024;
pub const DEFAULT_BLOCK_SIZE_BYTES: usize = 4 * 1024 * 1024;
pub const MAX_BLOCK_COUNT: usize = 50_000;
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// `estimatedRawSize = compressedSize * 11` (§4.4), applied uniformly to
/// every compression type, including zstd/zip where it under-estimates
/// (see DESIGN.md).
const RAW_SIZE_MULTIPLIER: u64 = 11;

/// The finer-grained classification behind [ingest_gax::error::ErrorKind::Upload],
/// recovered via [Error::as_inner].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadErrorKind {
    NoContainersAvailable,
    SourceIsEmpty,
    SourceNotReadable,
    SourceSizeLimitExceeded,
    UploadFailed,
    NetworkError,
}

impl fmt::Display for UploadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoContainersAvailable => write!(f, "no containers available"),
            Self::SourceIsEmpty => write!(f, "source is empty"),
            Self::SourceNotReadable => write!(f, "source is not readable"),
            Self::SourceSizeLimitExceeded => write!(f, "source size limit exceeded"),
            Self::UploadFailed => write!(f, "upload failed"),
            Self::NetworkError => write!(f, "network error"),
        }
    }
}

impl std::error::Error for UploadErrorKind {}

fn upload_error(kind: UploadErrorKind) -> Error {
    let permanent = matches!(kind, UploadErrorKind::SourceSizeLimitExceeded | UploadErrorKind::SourceIsEmpty);
    Error::upload(kind).with_permanent(permanent)
}

/// The result of a successful upload: a signed URL plus the size actually
/// written, ready to be embedded in a streaming request or an enqueue
/// message.
#[derive(Clone, Debug)]
pub struct BlobSource {
    pub url: String,
    pub exact_size: u64,
    pub source_id: crate::model::SourceId,
}

/// Tunables for [Uploader], all defaulted per §4.4.
#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub max_single_shot_bytes: u64,
    pub max_data_size_bytes: u64,
    pub ignore_size_limit: bool,
    pub block_size_bytes: usize,
    pub max_concurrency: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_single_shot_bytes: UPLOAD_MAX_SINGLE_SIZE_BYTES,
            max_data_size_bytes: DEFAULT_MAX_DATA_SIZE_BYTES,
            ignore_size_limit: false,
            block_size_bytes: DEFAULT_BLOCK_SIZE_BYTES,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

pub struct Uploader {
    resource_manager: Arc<ResourceManager>,
    blob_store: Arc<dyn BlobStore>,
    config: UploadConfig,
    block_retry: RetryDriver,
}

impl Uploader {
    pub fn new(resource_manager: Arc<ResourceManager>, blob_store: Arc<dyn BlobStore>, config: UploadConfig) -> Self {
        Self {
            resource_manager,
            blob_store,
            config,
            block_retry: RetryDriver::new(RetryModel::Simple {
                interval: std::time::Duration::from_millis(500),
                total_retries: 3,
            }),
        }
    }

    /// Reads the full payload into memory, compressing it first if
    /// `source.should_compress()`. Returns `(bytes, compressed)`.
    async fn materialize(source: &mut IngestionSource) -> Result<(Vec<u8>, bool)> {
        let raw = read_raw_payload(source).await?;

        if source.should_compress() {
            let compressed = gzip_compress(raw).await?;
            Ok((compressed, true))
        } else {
            Ok((raw, false))
        }
    }

    fn check_size(&self, raw_size: u64) -> Result<()> {
        if !self.config.ignore_size_limit && raw_size > self.config.max_data_size_bytes {
            return Err(upload_error(UploadErrorKind::SourceSizeLimitExceeded));
        }
        Ok(())
    }

    /// Uploads `source`, walking the ranked container list until success or
    /// exhaustion, and returns the resulting [BlobSource].
    pub async fn upload(&self, mut source: IngestionSource, props: &IngestionProperties) -> Result<BlobSource> {
        if let SourcePayload::Blob { url, exact_size } = &source.payload {
            return Ok(BlobSource {
                url: url.clone(),
                exact_size: exact_size.unwrap_or(0),
                source_id: source.source_id(),
            });
        }

        let known_size = source.known_size();
        let source_id = source.source_id();
        let format_ext = source.format.extension().to_string();
        let basename = match &source.payload {
            SourcePayload::File { path, .. } => {
                path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "source".to_string())
            }
            _ => "stream".to_string(),
        };

        let (payload, compressed) = Self::materialize(&mut source).await?;
        let payload_len = payload.len() as u64;

        let estimated_raw_size = match known_size {
            Some(size) => size,
            None if compressed => payload_len * RAW_SIZE_MULTIPLIER,
            None => payload_len,
        };
        self.check_size(estimated_raw_size)?;

        let extension = if compressed { ".gz".to_string() } else { format_ext };
        let blob_name = blob_name::derive_blob_name(&props.database, &props.table, source_id, &basename, &extension);

        let containers = self.resource_manager.shuffled_containers()?;
        if containers.is_empty() {
            return Err(upload_error(UploadErrorKind::NoContainersAvailable));
        }
        let start = self.resource_manager.container_start_index(containers.len())?;

        let mut last_error = None;
        for offset in 0..containers.len() {
            let container = &containers[(start + offset) % containers.len()];
            let data = Bytes::from(payload.clone());
            match self.upload_to_container(container, &blob_name, data).await {
                Ok(uploaded_bytes) => {
                    self.resource_manager.record_account_result(&container.account, true);
                    return Ok(BlobSource {
                        url: format!("{}/{}?{}", container.endpoint, blob_name, container.sas),
                        exact_size: uploaded_bytes,
                        source_id,
                    });
                }
                Err(error) => {
                    self.resource_manager.record_account_result(&container.account, false);
                    let permanent = error.is_permanent();
                    last_error = Some(error);
                    if permanent {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| upload_error(UploadErrorKind::NoContainersAvailable)))
    }

    async fn upload_to_container(
        &self,
        container: &crate::resource_manager::ContainerRef,
        blob_name: &str,
        data: Bytes,
    ) -> Result<u64> {
        let len = data.len() as u64;
        if data.len() as u64 <= self.config.max_single_shot_bytes {
            let cancel = CancellationToken::new();
            self.block_retry
                .run(
                    &cancel,
                    |_attempt| {
                        let data = data.clone();
                        async {
                            self.blob_store
                                .put_blob(&container.endpoint, &container.sas, blob_name, data)
                                .await
                        }
                    },
                    |_, _| {},
                    |_| {},
                )
                .await?;
            return Ok(len);
        }

        self.upload_blocks(container, blob_name, data).await?;
        Ok(len)
    }

    async fn upload_blocks(&self, container: &crate::resource_manager::ContainerRef, blob_name: &str, data: Bytes) -> Result<()> {
        let block_size = self.config.block_size_bytes;
        let blocks: Vec<Bytes> = data.chunks(block_size).map(Bytes::copy_from_slice).collect();
        if blocks.len() > MAX_BLOCK_COUNT {
            return Err(upload_error(UploadErrorKind::SourceSizeLimitExceeded));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let block_ids: Vec<String> = (0..blocks.len()).map(|i| format!("{i:08}")).collect();

        let mut tasks = Vec::with_capacity(blocks.len());
        for (block, block_id) in blocks.into_iter().zip(block_ids.iter().cloned()) {
            let semaphore = Arc::clone(&semaphore);
            let blob_store = Arc::clone(&self.blob_store);
            let endpoint = container.endpoint.clone();
            let sas = container.sas.clone();
            let blob_name = blob_name.to_string();
            let cancel = CancellationToken::new();
            let driver = self.block_retry.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                driver
                    .run(
                        &cancel,
                        |_attempt| {
                            let block = block.clone();
                            let block_id = block_id.clone();
                            async {
                                blob_store.stage_block(&endpoint, &sas, &blob_name, &block_id, block).await
                            }
                        },
                        |_, _| {},
                        |_| {},
                    )
                    .await
            }));
        }

        for task in tasks {
            task.await.map_err(|e| upload_error(UploadErrorKind::UploadFailed).with_code(e.to_string()))??;
        }

        self.blob_store
            .commit_block_list(&container.endpoint, &container.sas, blob_name, &block_ids)
            .await
    }
}

/// Reads a local or in-memory source's raw bytes, uncompressed. Shared by
/// [Uploader::materialize] and the managed router's streaming-then-queued
/// fallback, which needs the same bytes twice.
pub(crate) async fn read_raw_payload(source: &mut IngestionSource) -> Result<Vec<u8>> {
    let raw = match &mut source.payload {
        SourcePayload::File { path, .. } => read_file(path).await?,
        SourcePayload::Stream { reader, .. } => {
            let mut buf = Vec::new();
            reader
                .read_to_end(&mut buf)
                .await
                .map_err(|e| upload_error(UploadErrorKind::SourceNotReadable).with_permanent(false).with_code(e.to_string()))?;
            buf
        }
        SourcePayload::Blob { .. } => {
            return Err(Error::client("read_raw_payload called on an already-uploaded BlobSource"));
        }
    };

    if raw.is_empty() {
        return Err(upload_error(UploadErrorKind::SourceIsEmpty));
    }
    Ok(raw)
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| upload_error(UploadErrorKind::SourceNotReadable).with_code(e.to_string()))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .await
        .map_err(|e| upload_error(UploadErrorKind::SourceNotReadable).with_code(e.to_string()))?;
    Ok(buf)
}

pub(crate) async fn gzip_compress(raw: Vec<u8>) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).map_err(Error::io)?;
        encoder.finish().map_err(Error::io)
    })
    .await
    .map_err(|e| Error::io(e.to_string()))?
}
