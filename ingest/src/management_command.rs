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

//! Parsing of DM management-command responses (§6).
//!
//! The DM answers `.get ingestion resources` and `.get kusto identity
//! token` with a result table. This module only understands the two
//! column shapes the ingestion pipeline consumes; it is not a general CSL
//! result-set decoder.

use ingest_gax::error::Error;
use ingest_gax::Result;

/// A single `.get ingestion resources` row, before it has been split into
/// `(endpoint, sas)` and grouped by account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRow {
    pub kind: ResourceKind,
    pub storage_root: String,
}

/// The `ResourceTypeName` column's known values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    SecuredReadyForAggregationQueue,
    FailedIngestionsQueue,
    SuccessfulIngestionsQueue,
    TempStorage,
    IngestionsStatusTable,
}

impl ResourceKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SecuredReadyForAggregationQueue" => Some(Self::SecuredReadyForAggregationQueue),
            "FailedIngestionsQueue" => Some(Self::FailedIngestionsQueue),
            "SuccessfulIngestionsQueue" => Some(Self::SuccessfulIngestionsQueue),
            "TempStorage" => Some(Self::TempStorage),
            "IngestionsStatusTable" => Some(Self::IngestionsStatusTable),
            _ => None,
        }
    }
}

/// Parses the `.get ingestion resources` response body. Unrecognized
/// `ResourceTypeName` values are skipped rather than treated as fatal, so
/// a DM rolling out a new resource kind does not break older clients.
pub fn parse_ingestion_resources(rows: &[(String, String)]) -> Vec<ResourceRow> {
    rows.iter()
        .filter_map(|(kind, storage_root)| {
            ResourceKind::parse(kind).map(|kind| ResourceRow {
                kind,
                storage_root: storage_root.clone(),
            })
        })
        .collect()
}

/// Parses the `.get kusto identity token` response body, which carries a
/// single `AuthorizationContext` row.
pub fn parse_identity_token(rows: &[String]) -> Result<String> {
    rows.first()
        .cloned()
        .ok_or_else(|| Error::service("identity token response contained no rows", false))
}

/// Splits a storage-root URL into `(endpoint, sas)` on the first `?`, per
/// §4.3.
pub fn split_endpoint_and_sas(storage_root: &str) -> Result<(String, String)> {
    storage_root
        .split_once('?')
        .map(|(endpoint, sas)| (endpoint.to_string(), sas.to_string()))
        .ok_or_else(|| Error::client(format!("storage root missing SAS token: {storage_root}")))
}

/// Extracts the storage-account name from an endpoint URL, e.g.
/// `https://myaccount.blob.core.windows.net/container` → `myaccount`.
pub fn account_name_from_endpoint(endpoint: &str) -> Result<String> {
    let url = url::Url::parse(endpoint).map_err(|e| Error::client(format!("invalid storage endpoint: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::client(format!("storage endpoint has no host: {endpoint}")))?;
    host.split('.')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::client(format!("could not derive account name from host: {host}")))
}
