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

//! Direct streaming ingest against the engine's `/v1/rest/ingest` endpoint
//! (C5, §4.5).

use std::fmt;

use serde::Deserialize;

use ingest_auth::TokenProvider;
use ingest_gax::error::Error;
use ingest_gax::Result;

use crate::model::IngestionProperties;

pub const DEFAULT_MAX_STREAMING_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// The six streaming-failure categories the managed router must recognize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamingErrorCategory {
    RequestPropertiesPreventStreaming,
    TableConfigurationPreventsStreaming,
    StreamingIngestionOff,
    Throttled,
    OtherErrors,
    UnknownErrors,
}

impl StreamingErrorCategory {
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::RequestPropertiesPreventStreaming | Self::TableConfigurationPreventsStreaming | Self::StreamingIngestionOff
        )
    }
}

impl fmt::Display for StreamingErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RequestPropertiesPreventStreaming => "REQUEST_PROPERTIES_PREVENT_STREAMING",
            Self::TableConfigurationPreventsStreaming => "TABLE_CONFIGURATION_PREVENTS_STREAMING",
            Self::StreamingIngestionOff => "STREAMING_INGESTION_OFF",
            Self::Throttled => "THROTTLED",
            Self::OtherErrors => "OTHER_ERRORS",
            Self::UnknownErrors => "UNKNOWN_ERRORS",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for StreamingErrorCategory {}

/// The Kusto error envelope returned in a non-2xx streaming response body.
#[derive(Clone, Debug, Deserialize)]
pub struct KustoErrorEnvelope {
    pub error: KustoErrorDetail,
}

#[derive(Clone, Debug, Deserialize)]
pub struct KustoErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(rename = "@type", default)]
    pub at_type: Option<String>,
    #[serde(rename = "@message", default)]
    pub at_message: Option<String>,
    #[serde(rename = "@context", default)]
    pub at_context: Option<serde_json::Value>,
    #[serde(rename = "@permanent", default)]
    pub at_permanent: Option<bool>,
}

/// Classifies a parsed Kusto error envelope plus the response's HTTP status
/// into a [StreamingErrorCategory], per §4.5's rules.
pub fn classify(envelope: &KustoErrorEnvelope, http_status: u16) -> StreamingErrorCategory {
    let detail = &envelope.error;
    let message = detail.at_message.as_deref().unwrap_or(&detail.message);

    if matches!(
        detail.code.as_str(),
        "BadRequest_MissingStreamingIngestionProperty" | "BadRequest_InvalidStreamingIngestRequest"
    ) {
        return StreamingErrorCategory::RequestPropertiesPreventStreaming;
    }
    if detail.code == "General_BadRequest" && message.to_lowercase().contains("streaming ingestion policy") {
        return StreamingErrorCategory::TableConfigurationPreventsStreaming;
    }
    if message.to_lowercase().contains("streaming ingestion is disabled") {
        return StreamingErrorCategory::StreamingIngestionOff;
    }
    if http_status == 429 || message.to_lowercase().contains("too many requests") {
        return StreamingErrorCategory::Throttled;
    }
    if detail.at_permanent == Some(false) || detail.at_permanent.is_none() {
        return StreamingErrorCategory::OtherErrors;
    }
    StreamingErrorCategory::UnknownErrors
}

/// Turns a classified envelope into the [Error] the rest of the pipeline
/// propagates, with the category recoverable via [Error::as_inner].
pub fn classified_error(envelope: KustoErrorEnvelope, http_status: u16) -> Error {
    let category = classify(&envelope, http_status);
    let permanent = envelope.error.at_permanent.unwrap_or(category.is_permanent());
    Error::service(category, permanent).with_code(envelope.error.code.clone())
}

/// Posts a (possibly compressed) payload to the engine's streaming ingest
/// endpoint.
pub struct StreamingClient {
    http: reqwest::Client,
    engine_endpoint: String,
    token_provider: std::sync::Arc<dyn TokenProvider>,
    max_body_bytes: u64,
}

impl StreamingClient {
    pub fn new(http: reqwest::Client, engine_endpoint: impl Into<String>, token_provider: std::sync::Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            engine_endpoint: engine_endpoint.into(),
            token_provider,
            max_body_bytes: DEFAULT_MAX_STREAMING_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max: u64) -> Self {
        self.max_body_bytes = max;
        self
    }

    pub async fn stream(&self, body: bytes::Bytes, compressed: bool, props: &IngestionProperties) -> Result<()> {
        if body.len() as u64 > self.max_body_bytes {
            return Err(Error::client(format!(
                "streaming body of {} bytes exceeds the {} byte limit",
                body.len(),
                self.max_body_bytes
            )));
        }

        let mut url = format!(
            "{}/v1/rest/ingest/{}/{}?streamFormat={}",
            self.engine_endpoint, props.database, props.table, props.format.as_str()
        );
        if let Some(mapping) = &props.ingestion_mapping {
            if let crate::model::IngestionMapping::Reference { name, .. } = mapping {
                url.push_str(&format!("&mappingName={name}"));
            }
        }

        let token = self.token_provider.token().await?;
        let mut request = self
            .http
            .post(&url)
            .header("Authorization", token.header_value())
            .header("x-ms-client-request-id", uuid::Uuid::new_v4().to_string())
            .body(body);
        if compressed {
            request = request.header("Content-Encoding", "gzip");
        }

        let response = request.send().await.map_err(|e| Error::service(e.to_string(), false))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let http_status = status.as_u16();
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<KustoErrorEnvelope>(&text) {
            Ok(envelope) => Err(classified_error(envelope, http_status)),
            Err(_) => Err(Error::service(format!("streaming ingest failed with status {http_status}: {text}"), false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn envelope(code: &str, message: &str, at_message: Option<&str>, permanent: Option<bool>) -> KustoErrorEnvelope {
        KustoErrorEnvelope {
            error: KustoErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
                at_type: None,
                at_message: at_message.map(str::to_string),
                at_context: None,
                at_permanent: permanent,
            },
        }
    }

    #[test_case("BadRequest_MissingStreamingIngestionProperty", "x", None, None, 400, StreamingErrorCategory::RequestPropertiesPreventStreaming)]
    #[test_case("General_BadRequest", "x", Some("streaming ingestion policy violated"), Some(true), 400, StreamingErrorCategory::TableConfigurationPreventsStreaming)]
    #[test_case("Other", "x", Some("Streaming ingestion is disabled"), Some(true), 400, StreamingErrorCategory::StreamingIngestionOff)]
    #[test_case("Other", "too many requests", None, None, 429, StreamingErrorCategory::Throttled)]
    #[test_case("Other", "transient hiccup", None, Some(false), 500, StreamingErrorCategory::OtherErrors)]
    #[test_case("Other", "mystery", None, Some(true), 500, StreamingErrorCategory::UnknownErrors)]
    fn classifies_per_spec_rules(
        code: &str,
        message: &str,
        at_message: Option<&str>,
        permanent: Option<bool>,
        http_status: u16,
        want: StreamingErrorCategory,
    ) {
        let envelope = envelope(code, message, at_message, permanent);
        assert_eq!(classify(&envelope, http_status), want);
    }

    #[test]
    fn envelope_deserializes_from_wire_shape() {
        let json = r#"{"error":{"code":"General_BadRequest","message":"bad","@message":"streaming ingestion policy","@permanent":true}}"#;
        let parsed: KustoErrorEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.error.code, "General_BadRequest");
        assert_eq!(classify(&parsed, 400), StreamingErrorCategory::TableConfigurationPreventsStreaming);
    }
}
