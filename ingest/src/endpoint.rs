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

//! Cluster-endpoint normalization and trusted-endpoint policy (§6).

use std::net::IpAddr;
use std::sync::{Mutex, OnceLock};

use ingest_gax::error::Error;
use ingest_gax::Result;
use url::Url;

const INGEST_PREFIX: &str = "ingest-";
const FED_SUFFIX: &str = ";fed=true";
const ONEBOX_HOST: &str = "onebox.dev.kusto.windows.net";

const TRUSTED_SUFFIXES: &[&str] = &[
    ".kusto.windows.net",
    ".kusto.chinacloudapi.cn",
    ".kusto.usgovcloudapi.net",
    ".kusto.core.eaglex.ic.gov",
    ".kusto.core.microsoft.scloud",
    ".kusto.data.microsoft.com",
    ".kusto.fabric.microsoft.com",
    ".kusto.azuresynapse.net",
];

/// Process-wide additive allow-list and optional override predicate,
/// mirroring the source's trusted-endpoint singleton (§9's "global mutable
/// state" note) behind an explicit, resettable registry.
struct TrustedEndpointRegistry {
    extra_suffixes: Vec<String>,
    override_fn: Option<fn(&str) -> Option<bool>>,
}

fn registry() -> &'static Mutex<TrustedEndpointRegistry> {
    static REGISTRY: OnceLock<Mutex<TrustedEndpointRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        Mutex::new(TrustedEndpointRegistry {
            extra_suffixes: Vec::new(),
            override_fn: None,
        })
    })
}

/// Adds an additional trusted hostname suffix (e.g. a private cloud's
/// Kusto domain).
pub fn add_trusted_suffix(suffix: impl Into<String>) {
    registry().lock().expect("trusted endpoint registry poisoned").extra_suffixes.push(suffix.into());
}

/// Installs a predicate that forces accept (`Some(true)`), reject
/// (`Some(false)`), or defers to the suffix list (`None`) for every host.
pub fn set_override(predicate: fn(&str) -> Option<bool>) {
    registry().lock().expect("trusted endpoint registry poisoned").override_fn = Some(predicate);
}

/// Restores the registry to its empty, default state. Exposed for tests
/// that must not leak overrides across cases.
pub fn reset_trusted_endpoints() {
    let mut guard = registry().lock().expect("trusted endpoint registry poisoned");
    guard.extra_suffixes.clear();
    guard.override_fn = None;
}

pub fn is_trusted_host(host: &str) -> bool {
    let guard = registry().lock().expect("trusted endpoint registry poisoned");
    if let Some(predicate) = guard.override_fn {
        if let Some(decision) = predicate(host) {
            return decision;
        }
    }
    TRUSTED_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
        || guard.extra_suffixes.iter().any(|suffix| host.ends_with(suffix.as_str()))
}

fn is_localhost_or_ip(host: &str) -> bool {
    host == "localhost" || host == ONEBOX_HOST || host.parse::<IpAddr>().is_ok()
}

fn strip_fed_suffix(raw: &str) -> &str {
    raw.strip_suffix(FED_SUFFIX).unwrap_or(raw)
}

fn parse(raw: &str) -> Result<Url> {
    Url::parse(strip_fed_suffix(raw)).map_err(|e| Error::client(format!("invalid endpoint url: {e}")))
}

/// Strips a leading `ingest-` host prefix, producing the query/engine URL.
pub fn normalize_engine(raw: &str) -> Result<String> {
    let mut url = parse(raw)?;
    if let Some(host) = url.host_str() {
        if !is_localhost_or_ip(host) {
            if let Some(stripped) = host.strip_prefix(INGEST_PREFIX) {
                let stripped = stripped.to_string();
                url.set_host(Some(&stripped))
                    .map_err(|_| Error::client(format!("invalid host after stripping ingest- prefix: {stripped}")))?;
            }
        }
    }
    Ok(url.to_string().trim_end_matches('/').to_string())
}

/// Adds an `ingest-` host prefix, producing the data-ingestion URL.
pub fn normalize_ingestion(raw: &str) -> Result<String> {
    let mut url = parse(raw)?;
    if let Some(host) = url.host_str() {
        if !is_localhost_or_ip(host) && !host.starts_with(INGEST_PREFIX) {
            let prefixed = format!("{INGEST_PREFIX}{host}");
            url.set_host(Some(&prefixed))
                .map_err(|_| Error::client(format!("invalid host after adding ingest- prefix: {prefixed}")))?;
        }
    }
    Ok(url.to_string().trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn strips_ingest_prefix_for_engine() {
        let got = normalize_engine("https://ingest-cluster.kusto.windows.net").unwrap();
        assert_eq!(got, "https://cluster.kusto.windows.net");
    }

    #[test]
    fn adds_ingest_prefix_and_drops_fed_suffix() {
        let got = normalize_ingestion("https://cluster.kusto.windows.net;fed=true").unwrap();
        assert_eq!(got, "https://ingest-cluster.kusto.windows.net");

        let engine = normalize_engine("https://cluster.kusto.windows.net;fed=true").unwrap();
        assert_eq!(engine, "https://cluster.kusto.windows.net");
    }

    #[test]
    fn leaves_ip_literals_untouched() {
        let engine = normalize_engine("https://127.0.0.1:8080").unwrap();
        let ingestion = normalize_ingestion("https://127.0.0.1:8080").unwrap();
        assert_eq!(engine, "https://127.0.0.1:8080");
        assert_eq!(ingestion, "https://127.0.0.1:8080");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_engine("https://ingest-cluster.kusto.windows.net").unwrap();
        let twice = normalize_engine(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    #[serial]
    fn trusted_suffix_list_covers_builtin_clouds() {
        reset_trusted_endpoints();
        assert!(is_trusted_host("mycluster.kusto.windows.net"));
        assert!(is_trusted_host("mycluster.kusto.usgovcloudapi.net"));
        assert!(!is_trusted_host("evil.example.com"));
    }

    #[test]
    #[serial]
    fn additive_allowlist_and_override_compose() {
        reset_trusted_endpoints();
        add_trusted_suffix(".private.cloud");
        assert!(is_trusted_host("cluster.private.cloud"));

        set_override(|host| if host == "forced.example.com" { Some(true) } else { None });
        assert!(is_trusted_host("forced.example.com"));
        assert!(is_trusted_host("cluster.private.cloud"));
        assert!(!is_trusted_host("still.untrusted.com"));
        reset_trusted_endpoints();
    }
}
