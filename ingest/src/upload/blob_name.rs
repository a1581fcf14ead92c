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

//! Blob-name derivation and sanitization (§4.4 step 2).

use crate::model::SourceId;

const MAX_BLOB_NAME_LEN: usize = 128;
const TRUNC_SUFFIX: &str = "__trunc";

/// Replaces every character in `{cr, lf, whitespace, '{', '}', '|', '/',
/// '\\', '?', '#', ';'}` plus ASCII control characters with `-`.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_whitespace()
                || c.is_control()
                || matches!(c, '{' | '}' | '|' | '/' | '\\' | '?' | '#' | ';')
            {
                '-'
            } else {
                c
            }
        })
        .collect()
}

fn truncate_with_marker(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }
    let keep = max_len.saturating_sub(TRUNC_SUFFIX.len());
    let truncated: String = name.chars().take(keep).collect();
    format!("{truncated}{TRUNC_SUFFIX}")
}

/// `"{table}__{db}__{sourceId}__{sanitized-basename}{ext}"`, truncated to
/// 128 characters (appending `__trunc`) if it would otherwise overflow.
pub fn derive_blob_name(
    database: &str,
    table: &str,
    source_id: SourceId,
    basename: &str,
    extension: &str,
) -> String {
    let sanitized_basename = sanitize(basename);
    let name = format!("{table}__{database}__{source_id}__{sanitized_basename}{extension}");
    truncate_with_marker(&name, MAX_BLOB_NAME_LEN)
}
