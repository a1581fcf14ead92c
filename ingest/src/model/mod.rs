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

//! The wire- and API-facing data model (§3).

mod operation;
mod properties;
mod source;

pub use operation::{IngestOperation, IngestionMethod, StatusCounts};
pub use properties::{
    IngestionMapping, IngestionProperties, ReportLevel, ReportMethod, ValidationPolicy,
};
pub use source::{CompressionType, IngestionSource, SourceFormat, SourceId};
