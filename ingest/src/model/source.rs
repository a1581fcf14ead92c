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

//! [IngestionSource] and its associated format/compression types (§3).

use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;

use tokio::io::AsyncRead;
use uuid::Uuid;

/// The 128-bit identifier carried by every [IngestionSource].
///
/// Immutable once created: it threads through the blob name, the enqueue
/// message `Id`, and the status-table partition/row key, so the service and
/// the client agree on which row describes which upload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SourceId(pub Uuid);

impl SourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceId({})", self.0)
    }
}

/// The data format of an ingestion payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Tsv,
    Json,
    Multijson,
    Avro,
    Apacheavro,
    Parquet,
    Orc,
    W3clog,
    Sstream,
    Txt,
    Raw,
}

impl SourceFormat {
    /// Binary/self-describing formats are never compressed client-side;
    /// the service either rejects compression or the format already embeds
    /// its own (block) compression.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            SourceFormat::Parquet
                | SourceFormat::Orc
                | SourceFormat::Avro
                | SourceFormat::Apacheavro
                | SourceFormat::Sstream
        )
    }

    /// The lowercase wire string used in the `streamFormat` query parameter
    /// and the enqueue message's `format` property.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Tsv => "tsv",
            SourceFormat::Json => "json",
            SourceFormat::Multijson => "multijson",
            SourceFormat::Avro => "avro",
            SourceFormat::Apacheavro => "apacheavro",
            SourceFormat::Parquet => "parquet",
            SourceFormat::Orc => "orc",
            SourceFormat::W3clog => "w3clog",
            SourceFormat::Sstream => "sstream",
            SourceFormat::Txt => "txt",
            SourceFormat::Raw => "raw",
        }
    }

    /// The canonical file extension used when deriving a blob name.
    pub fn extension(&self) -> &'static str {
        match self {
            SourceFormat::Csv => ".csv",
            SourceFormat::Tsv => ".tsv",
            SourceFormat::Json => ".json",
            SourceFormat::Multijson => ".json",
            SourceFormat::Avro => ".avro",
            SourceFormat::Apacheavro => ".avro",
            SourceFormat::Parquet => ".parquet",
            SourceFormat::Orc => ".orc",
            SourceFormat::W3clog => ".log",
            SourceFormat::Sstream => ".ss",
            SourceFormat::Txt => ".txt",
            SourceFormat::Raw => ".raw",
        }
    }
}

/// The compression applied to a payload before upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
    Zstd,
    Zip,
}

/// The payload carried by an [IngestionSource]. A sum type: exactly one
/// representation is populated, enforced by construction rather than by a
/// runtime check.
pub enum SourcePayload {
    File {
        path: PathBuf,
        size: Option<u64>,
    },
    Stream {
        reader: Pin<Box<dyn AsyncRead + Send>>,
        size: Option<u64>,
    },
    Blob {
        url: String,
        exact_size: Option<u64>,
    },
}

impl fmt::Debug for SourcePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcePayload::File { path, size } => {
                f.debug_struct("File").field("path", path).field("size", size).finish()
            }
            SourcePayload::Stream { size, .. } => {
                f.debug_struct("Stream").field("size", size).finish()
            }
            SourcePayload::Blob { url, exact_size } => f
                .debug_struct("Blob")
                .field("url", url)
                .field("exact_size", exact_size)
                .finish(),
        }
    }
}

/// A file, stream, or already-uploaded blob to ingest.
#[derive(Debug)]
pub struct IngestionSource {
    pub payload: SourcePayload,
    pub format: SourceFormat,
    pub compression_type: CompressionType,
    source_id: SourceId,
}

impl IngestionSource {
    pub fn from_file(path: impl Into<PathBuf>, format: SourceFormat) -> Self {
        Self {
            payload: SourcePayload::File {
                path: path.into(),
                size: None,
            },
            format,
            compression_type: CompressionType::None,
            source_id: SourceId::new(),
        }
    }

    pub fn from_file_with_size(path: impl Into<PathBuf>, size: u64, format: SourceFormat) -> Self {
        Self {
            payload: SourcePayload::File {
                path: path.into(),
                size: Some(size),
            },
            format,
            compression_type: CompressionType::None,
            source_id: SourceId::new(),
        }
    }

    pub fn from_stream(
        reader: Pin<Box<dyn AsyncRead + Send>>,
        size: Option<u64>,
        compressed: bool,
        format: SourceFormat,
    ) -> Self {
        Self {
            payload: SourcePayload::Stream { reader, size },
            format,
            compression_type: if compressed {
                CompressionType::Gzip
            } else {
                CompressionType::None
            },
            source_id: SourceId::new(),
        }
    }

    pub fn from_blob(url: impl Into<String>, exact_size: Option<u64>, format: SourceFormat) -> Self {
        Self {
            payload: SourcePayload::Blob {
                url: url.into(),
                exact_size,
            },
            format,
            compression_type: CompressionType::None,
            source_id: SourceId::new(),
        }
    }

    /// Overrides the auto-generated [SourceId]. Intended for tests and for
    /// callers resuming a previously-tracked upload.
    pub fn with_source_id(mut self, id: SourceId) -> Self {
        self.source_id = id;
        self
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression_type = compression;
        self
    }

    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    /// `shouldCompress = format not in {parquet, orc, avro, apacheavro, sstream} and compressionType = none`.
    pub fn should_compress(&self) -> bool {
        !self.format.is_binary() && self.compression_type == CompressionType::None
    }

    /// The known size of the payload, if any.
    pub fn known_size(&self) -> Option<u64> {
        match &self.payload {
            SourcePayload::File { size, .. } => *size,
            SourcePayload::Stream { size, .. } => *size,
            SourcePayload::Blob { exact_size, .. } => *exact_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(SourceFormat::Csv, CompressionType::None, true)]
    #[test_case(SourceFormat::Json, CompressionType::Gzip, false)]
    #[test_case(SourceFormat::Parquet, CompressionType::None, false)]
    #[test_case(SourceFormat::Avro, CompressionType::None, false)]
    #[test_case(SourceFormat::Orc, CompressionType::None, false)]
    #[test_case(SourceFormat::Sstream, CompressionType::None, false)]
    fn should_compress_matches_rule(format: SourceFormat, compression: CompressionType, want: bool) {
        let source = IngestionSource::from_file("x.csv", format).with_compression(compression);
        assert_eq!(source.should_compress(), want);
    }

    #[test]
    fn source_id_is_stable_across_accessors() {
        let source = IngestionSource::from_file("x.csv", SourceFormat::Csv);
        let id = source.source_id();
        assert_eq!(source.source_id(), id);
    }
}
