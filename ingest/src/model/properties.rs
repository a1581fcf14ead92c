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

//! [IngestionProperties] and its nested enums (§3).

use super::source::SourceFormat;
use chrono::{DateTime, Utc};
use ingest_gax::error::Error;
use ingest_gax::Result;

/// How much detail the service reports back about an ingestion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum ReportLevel {
    None = 0,
    #[default]
    FailuresOnly = 1,
    FailuresAndSuccesses = 2,
}

/// Where the service reports ingestion results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum ReportMethod {
    Queue = 0,
    #[default]
    Table = 1,
    QueueAndTable = 2,
}

/// Server-side validation strictness for the ingested data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationPolicy {
    DoNotValidate,
    ValidateCsvInputConstantColumns,
    ValidateCsvInputColumnLevelOnly,
}

/// A column-mapping reference (by name) or an inline mapping definition.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum IngestionMapping {
    Reference {
        name: String,
        kind: MappingKind,
    },
    Inline {
        kind: MappingKind,
        columns: Vec<serde_json::Value>,
    },
}

impl IngestionMapping {
    pub fn kind(&self) -> MappingKind {
        match self {
            IngestionMapping::Reference { kind, .. } => *kind,
            IngestionMapping::Inline { kind, .. } => *kind,
        }
    }
}

/// The mapping kind, which must agree with [SourceFormat] when a mapping is
/// supplied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingKind {
    Csv,
    Json,
    Avro,
    Parquet,
    Orc,
    W3clog,
}

impl MappingKind {
    fn matches_format(&self, format: SourceFormat) -> bool {
        matches!(
            (self, format),
            (MappingKind::Csv, SourceFormat::Csv | SourceFormat::Tsv | SourceFormat::Txt)
                | (MappingKind::Json, SourceFormat::Json | SourceFormat::Multijson)
                | (MappingKind::Avro, SourceFormat::Avro | SourceFormat::Apacheavro)
                | (MappingKind::Parquet, SourceFormat::Parquet)
                | (MappingKind::Orc, SourceFormat::Orc)
                | (MappingKind::W3clog, SourceFormat::W3clog)
        )
    }
}

/// Ingestion properties shared by the streaming and queued paths (§3).
#[derive(Clone, Debug)]
pub struct IngestionProperties {
    pub database: String,
    pub table: String,
    pub format: SourceFormat,
    pub flush_immediately: bool,
    pub report_level: ReportLevel,
    pub report_method: ReportMethod,
    pub ingestion_mapping: Option<IngestionMapping>,
    pub additional_tags: Vec<String>,
    pub ingest_by_tags: Vec<String>,
    pub drop_by_tags: Vec<String>,
    pub ingest_if_not_exists_tags: Vec<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub validation_policy: Option<ValidationPolicy>,
    /// Filled in by the client from [crate::resource_manager::ResourceManager::auth_context].
    pub authorization_context: Option<String>,
}

impl IngestionProperties {
    pub fn new(database: impl Into<String>, table: impl Into<String>, format: SourceFormat) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            format,
            flush_immediately: false,
            report_level: ReportLevel::default(),
            report_method: ReportMethod::default(),
            ingestion_mapping: None,
            additional_tags: Vec::new(),
            ingest_by_tags: Vec::new(),
            drop_by_tags: Vec::new(),
            ingest_if_not_exists_tags: Vec::new(),
            creation_time: None,
            validation_policy: None,
            authorization_context: None,
        }
    }

    pub fn with_mapping(mut self, mapping: IngestionMapping) -> Self {
        self.ingestion_mapping = Some(mapping);
        self
    }

    /// Validates the cross-field invariants from §3: the mapping kind (when
    /// present) must match the source format.
    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(Error::client("database name must not be empty"));
        }
        if self.table.is_empty() {
            return Err(Error::client("table name must not be empty"));
        }
        if let Some(mapping) = &self.ingestion_mapping {
            if !mapping.kind().matches_format(self.format) {
                return Err(Error::client(format!(
                    "ingestion mapping kind {:?} does not match source format {:?}",
                    mapping.kind(),
                    self.format
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_database_or_table() {
        let props = IngestionProperties::new("", "t", SourceFormat::Csv);
        assert!(props.validate().is_err());
        let props = IngestionProperties::new("d", "", SourceFormat::Csv);
        assert!(props.validate().is_err());
    }

    #[test]
    fn rejects_mismatched_mapping_kind() {
        let props = IngestionProperties::new("d", "t", SourceFormat::Json).with_mapping(
            IngestionMapping::Reference {
                name: "m".into(),
                kind: MappingKind::Csv,
            },
        );
        assert!(props.validate().is_err());
    }

    #[test]
    fn accepts_matching_mapping_kind() {
        let props = IngestionProperties::new("d", "t", SourceFormat::Json).with_mapping(
            IngestionMapping::Reference {
                name: "m".into(),
                kind: MappingKind::Json,
            },
        );
        assert!(props.validate().is_ok());
    }
}
