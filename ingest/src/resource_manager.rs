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

//! Background-refreshed catalog of containers, queues, the status table,
//! and the authorization context (C3, §4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ingest_gax::backoff_policy::BackoffPolicyArg;
use ingest_gax::error::Error;
use ingest_gax::exponential_backoff::ExponentialBackoff;
use ingest_gax::retry_driver::{RetryDriver, RetryModel};
use ingest_gax::retry_policy::{RetryPolicy, RetryPolicyArg, RetryPolicyExt};
use ingest_gax::retry_result::RetryResult;
use ingest_gax::Result;

use crate::management_command::{self, ResourceKind, ResourceRow};
use crate::ranked_accounts::RankedStorageAccountSet;
use crate::round_robin::{interleave_round_robin, RoundRobinSelector};

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
const DEFAULT_REFRESH_MAX_ATTEMPTS: u32 = 5;

/// Retries every refresh failure that the driver hasn't already classified
/// as permanent (§4.3's note that the retry loop must specifically handle
/// `ThrottleException`, a transient kind C3 doesn't treat specially -- any
/// non-permanent error is retryable here).
#[derive(Debug)]
struct AlwaysRetryTransient;

impl RetryPolicy for AlwaysRetryTransient {
    fn on_error(&self, _loop_start: std::time::Instant, _attempt_count: u32, _idempotent: bool, error: Error) -> RetryResult {
        RetryResult::Continue(error)
    }
}

/// Builds the default refresh retry policy: retry every transient failure,
/// capped at [DEFAULT_REFRESH_MAX_ATTEMPTS] attempts with bounded
/// exponential backoff (§4.3).
fn default_refresh_retry_policy() -> RetryPolicyArg {
    AlwaysRetryTransient.with_attempt_limit(DEFAULT_REFRESH_MAX_ATTEMPTS).into()
}

fn default_refresh_backoff_policy() -> BackoffPolicyArg {
    ExponentialBackoff::default().into()
}

/// A storage container endpoint plus its time-boxed SAS token.
#[derive(Clone, Debug)]
pub struct ContainerRef {
    pub endpoint: String,
    pub sas: String,
    pub account: String,
}

/// A queue endpoint plus its time-boxed SAS token.
#[derive(Clone, Debug)]
pub struct QueueRef {
    pub endpoint: String,
    pub sas: String,
    pub account: String,
}

/// The ingestion-status table endpoint plus its SAS token.
#[derive(Clone, Debug)]
pub struct TableRef {
    pub endpoint: String,
    pub sas: String,
}

impl ContainerRef {
    pub fn full_url(&self) -> String {
        format!("{}?{}", self.endpoint, self.sas)
    }
}

/// The client through which C3 issues the two DM management commands.
/// Deliberately narrow: parsing lives in [crate::management_command],
/// transport and authentication are the caller's concern.
#[async_trait]
pub trait DmClient: Send + Sync {
    async fn get_ingestion_resources(&self) -> Result<Vec<(String, String)>>;
    async fn get_identity_token(&self) -> Result<Vec<String>>;
}

/// A self-consistent snapshot of every DM-advertised resource plus the
/// authorization context. Replaced wholesale on every successful refresh;
/// readers that hold a clone of the returned `Arc` keep observing it even
/// after a newer bundle is installed.
pub struct ResourceBundle {
    containers: HashMap<String, Vec<ContainerRef>>,
    queues: HashMap<String, Vec<QueueRef>>,
    failed_queue: Option<QueueRef>,
    success_queue: Option<QueueRef>,
    status_table: Option<TableRef>,
    auth_context: String,
    container_selector: RoundRobinSelector,
    queue_selector: RoundRobinSelector,
}

impl ResourceBundle {
    fn from_rows(rows: Vec<ResourceRow>, auth_context: String) -> Result<Self> {
        let mut containers: HashMap<String, Vec<ContainerRef>> = HashMap::new();
        let mut queues: HashMap<String, Vec<QueueRef>> = HashMap::new();
        let mut failed_queue = None;
        let mut success_queue = None;
        let mut status_table = None;

        for row in rows {
            let (endpoint, sas) = management_command::split_endpoint_and_sas(&row.storage_root)?;
            match row.kind {
                ResourceKind::TempStorage => {
                    let account = management_command::account_name_from_endpoint(&endpoint)?;
                    containers.entry(account.clone()).or_default().push(ContainerRef {
                        endpoint,
                        sas,
                        account,
                    });
                }
                ResourceKind::SecuredReadyForAggregationQueue => {
                    let account = management_command::account_name_from_endpoint(&endpoint)?;
                    queues.entry(account.clone()).or_default().push(QueueRef {
                        endpoint,
                        sas,
                        account,
                    });
                }
                ResourceKind::FailedIngestionsQueue => {
                    let account = management_command::account_name_from_endpoint(&endpoint)?;
                    failed_queue = Some(QueueRef { endpoint, sas, account });
                }
                ResourceKind::SuccessfulIngestionsQueue => {
                    let account = management_command::account_name_from_endpoint(&endpoint)?;
                    success_queue = Some(QueueRef { endpoint, sas, account });
                }
                ResourceKind::IngestionsStatusTable => {
                    status_table = Some(TableRef { endpoint, sas });
                }
            }
        }

        Ok(Self {
            containers,
            queues,
            failed_queue,
            success_queue,
            status_table,
            auth_context,
            container_selector: RoundRobinSelector::new(),
            queue_selector: RoundRobinSelector::new(),
        })
    }

    /// All accounts appearing in either `containers` or `queues`, the set
    /// C1 must be kept in sync with (§3's `ResourceBundle` invariant).
    fn accounts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.containers.keys().chain(self.queues.keys()).cloned().collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Round-robin within each rank tier, flattened top-first (§4.3).
    pub fn shuffled_containers(&self, ranked: &RankedStorageAccountSet) -> Vec<ContainerRef> {
        let ordered_accounts = ranked.ranked_shuffled();
        let lists: Vec<Vec<ContainerRef>> = ordered_accounts
            .iter()
            .filter_map(|account| self.containers.get(account).cloned())
            .collect();
        interleave_round_robin(lists)
    }

    pub fn shuffled_queues(&self, ranked: &RankedStorageAccountSet) -> Vec<QueueRef> {
        let ordered_accounts = ranked.ranked_shuffled();
        let lists: Vec<Vec<QueueRef>> = ordered_accounts
            .iter()
            .filter_map(|account| self.queues.get(account).cloned())
            .collect();
        interleave_round_robin(lists)
    }

    /// Shared by every upload attached to this bundle, per §4.2's sharing
    /// contract: the bundle (and therefore the selector) is replaced as a
    /// unit on refresh.
    pub fn container_selector(&self) -> &RoundRobinSelector {
        &self.container_selector
    }

    pub fn queue_selector(&self) -> &RoundRobinSelector {
        &self.queue_selector
    }

    pub fn status_table(&self) -> Option<&TableRef> {
        self.status_table.as_ref()
    }

    pub fn failed_queue(&self) -> Option<&QueueRef> {
        self.failed_queue.as_ref()
    }

    pub fn success_queue(&self) -> Option<&QueueRef> {
        self.success_queue.as_ref()
    }

    pub fn auth_context(&self) -> &str {
        &self.auth_context
    }
}

/// Owns the background-refreshed [ResourceBundle] and the [RankedStorageAccountSet]
/// it keeps in sync.
pub struct ResourceManager {
    bundle: Arc<ArcSwapOption<ResourceBundle>>,
    ranked: Arc<RankedStorageAccountSet>,
    refresh_notify: Arc<Notify>,
    cancel: CancellationToken,
}

impl ResourceManager {
    /// Performs the forced first refresh (blocking, per §4.3) then spawns
    /// the background refresh task, using the default refresh retry policy
    /// (retry every transient failure, bounded exponential backoff, capped
    /// at [DEFAULT_REFRESH_MAX_ATTEMPTS] attempts per refresh cycle).
    pub async fn connect(dm_client: Arc<dyn DmClient>, refresh_interval: Option<Duration>) -> Result<Self> {
        Self::connect_with_retry_policy(
            dm_client,
            refresh_interval,
            default_refresh_retry_policy(),
            default_refresh_backoff_policy(),
        )
        .await
    }

    /// As [Self::connect], but with the background refresh's retry and
    /// backoff behavior overridden. Lets advanced callers plug in, e.g., a
    /// policy that treats `ThrottleException` specially or a longer time
    /// budget via a
    /// [RetryPolicyArg][ingest_gax::retry_policy::RetryPolicyArg] override.
    pub async fn connect_with_retry_policy(
        dm_client: Arc<dyn DmClient>,
        refresh_interval: Option<Duration>,
        retry_policy: impl Into<RetryPolicyArg>,
        backoff_policy: impl Into<BackoffPolicyArg>,
    ) -> Result<Self> {
        let ranked = Arc::new(RankedStorageAccountSet::new());
        let bundle = Arc::new(ArcSwapOption::<ResourceBundle>::from(None));
        let refresh_notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let fresh = Self::fetch_bundle(dm_client.as_ref(), &ranked).await?;
        bundle.store(Some(Arc::new(fresh)));

        let task_bundle = Arc::clone(&bundle);
        let task_ranked = Arc::clone(&ranked);
        let task_notify = Arc::clone(&refresh_notify);
        let task_cancel = cancel.clone();
        let interval = refresh_interval.unwrap_or(DEFAULT_REFRESH_INTERVAL);
        let retry_model = RetryModel::Policy {
            retry_policy: retry_policy.into(),
            backoff_policy: backoff_policy.into(),
            idempotent: true,
        };
        tokio::spawn(async move {
            Self::refresh_loop(dm_client, task_bundle, task_ranked, task_notify, task_cancel, interval, retry_model).await;
        });

        Ok(Self {
            bundle,
            ranked,
            refresh_notify,
            cancel,
        })
    }

    async fn fetch_bundle(dm_client: &dyn DmClient, ranked: &RankedStorageAccountSet) -> Result<ResourceBundle> {
        let resource_rows = dm_client.get_ingestion_resources().await?;
        let rows = management_command::parse_ingestion_resources(&resource_rows);
        let identity_rows = dm_client.get_identity_token().await?;
        let auth_context = management_command::parse_identity_token(&identity_rows)?;

        let bundle = ResourceBundle::from_rows(rows, auth_context)?;
        for account in bundle.accounts() {
            ranked.register(&account);
        }
        Ok(bundle)
    }

    async fn refresh_loop(
        dm_client: Arc<dyn DmClient>,
        bundle: Arc<ArcSwapOption<ResourceBundle>>,
        ranked: Arc<RankedStorageAccountSet>,
        notify: Arc<Notify>,
        cancel: CancellationToken,
        interval: Duration,
        retry_model: RetryModel,
    ) {
        let driver = RetryDriver::new(retry_model);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return,
            }

            let result = driver
                .run(
                    &cancel,
                    |_attempt| Self::fetch_bundle(dm_client.as_ref(), &ranked),
                    |error, delay| debug!(?delay, %error, "resource refresh retrying"),
                    |error| warn!(%error, "resource refresh attempt failed"),
                )
                .await;

            match result {
                Ok(fresh) => {
                    bundle.store(Some(Arc::new(fresh)));
                    notify.notify_waiters();
                }
                Err(error) => {
                    warn!(%error, "resource refresh exhausted retries; serving previous bundle");
                }
            }

            if cancel.is_cancelled() {
                return;
            }
        }
    }

    fn current(&self) -> Result<Arc<ResourceBundle>> {
        self.bundle
            .load_full()
            .ok_or_else(|| Error::service("no resource bundle has been fetched yet", false))
    }

    pub fn shuffled_containers(&self) -> Result<Vec<ContainerRef>> {
        Ok(self.current()?.shuffled_containers(&self.ranked))
    }

    pub fn shuffled_queues(&self) -> Result<Vec<QueueRef>> {
        Ok(self.current()?.shuffled_queues(&self.ranked))
    }

    pub fn status_table(&self) -> Result<Option<TableRef>> {
        Ok(self.current()?.status_table().cloned())
    }

    pub fn failed_queue(&self) -> Result<Option<QueueRef>> {
        Ok(self.current()?.failed_queue().cloned())
    }

    pub fn success_queue(&self) -> Result<Option<QueueRef>> {
        Ok(self.current()?.success_queue().cloned())
    }

    pub fn auth_context(&self) -> Result<String> {
        Ok(self.current()?.auth_context().to_string())
    }

    /// Records the outcome of an attempted container or queue use against
    /// the account it belongs to, feeding back into future `ranked_shuffled`
    /// calls.
    pub fn record_account_result(&self, account: &str, success: bool) {
        self.ranked.record(account, success);
    }

    /// A starting offset into the given bundle's container list, shared by
    /// every concurrent upload attached to that bundle (§4.2).
    pub fn container_start_index(&self, len: usize) -> Result<usize> {
        Ok(self.current()?.container_selector().next_start_index(len))
    }

    pub fn queue_start_index(&self, len: usize) -> Result<usize> {
        Ok(self.current()?.queue_selector().next_start_index(len))
    }

    /// Resolves once the bundle currently in effect has been replaced by a
    /// subsequent background refresh. Intended for tests.
    pub async fn wait_for_next_refresh(&self) {
        self.refresh_notify.notified().await;
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeDmClient {
        rows: Vec<(String, String)>,
        identity: Vec<String>,
        calls: AtomicU32,
        fail_first_n: u32,
        // Exact call indices (0-based) to fail on, independent of
        // `fail_first_n`; lets a test make a later call fail without also
        // failing the forced first fetch `connect` depends on.
        fail_on_calls: Vec<u32>,
    }

    #[async_trait]
    impl DmClient for FakeDmClient {
        async fn get_ingestion_resources(&self) -> Result<Vec<(String, String)>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_n || self.fail_on_calls.contains(&call) {
                return Err(Error::throttled("simulated throttle"));
            }
            Ok(self.rows.clone())
        }

        async fn get_identity_token(&self) -> Result<Vec<String>> {
            Ok(self.identity.clone())
        }
    }

    fn sample_rows() -> Vec<(String, String)> {
        vec![
            (
                "TempStorage".to_string(),
                "https://acct1.blob.core.windows.net/c1?sv=1".to_string(),
            ),
            (
                "SecuredReadyForAggregationQueue".to_string(),
                "https://acct1.queue.core.windows.net/q1?sv=1".to_string(),
            ),
            (
                "FailedIngestionsQueue".to_string(),
                "https://acct1.queue.core.windows.net/failed?sv=1".to_string(),
            ),
            (
                "SuccessfulIngestionsQueue".to_string(),
                "https://acct1.queue.core.windows.net/success?sv=1".to_string(),
            ),
            (
                "IngestionsStatusTable".to_string(),
                "https://acct1.table.core.windows.net/status?sv=1".to_string(),
            ),
        ]
    }

    #[tokio::test]
    async fn connect_fetches_and_exposes_containers() {
        let client = Arc::new(FakeDmClient {
            rows: sample_rows(),
            identity: vec!["ctx".to_string()],
            calls: AtomicU32::new(0),
            fail_first_n: 0,
            fail_on_calls: Vec::new(),
        });
        let manager = ResourceManager::connect(client, Some(Duration::from_secs(3600))).await.unwrap();

        let containers = manager.shuffled_containers().unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].account, "acct1");
        assert_eq!(manager.auth_context().unwrap(), "ctx");
        assert!(manager.status_table().unwrap().is_some());
        manager.shutdown();
    }

    #[tokio::test]
    async fn reads_fail_before_any_bundle_is_fetched() {
        let client = Arc::new(FakeDmClient {
            rows: sample_rows(),
            identity: vec!["ctx".to_string()],
            calls: AtomicU32::new(0),
            fail_first_n: 100,
            fail_on_calls: Vec::new(),
        });
        let result = ResourceManager::connect(client, None).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn background_refresh_recovers_after_transient_failures() {
        let client = Arc::new(FakeDmClient {
            rows: sample_rows(),
            identity: vec!["ctx".to_string()],
            calls: AtomicU32::new(0),
            fail_first_n: 0,
            fail_on_calls: Vec::new(),
        });
        let manager = ResourceManager::connect(Arc::clone(&client) as Arc<dyn DmClient>, Some(Duration::from_secs(1)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        manager.wait_for_next_refresh().await;
        assert!(manager.shuffled_containers().unwrap().len() == 1);
        manager.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn connect_with_retry_policy_honors_the_injected_schedule() {
        // Call 0 is the forced first fetch `connect_with_retry_policy` needs
        // to succeed before it returns at all. Call 1 is the first
        // background refresh attempt, which fails once; its retry (call 2,
        // allowed by the attempt-limit-2 policy below) succeeds.
        let client = Arc::new(FakeDmClient {
            rows: sample_rows(),
            identity: vec!["ctx".to_string()],
            calls: AtomicU32::new(0),
            fail_first_n: 0,
            fail_on_calls: vec![1],
        });
        let manager = ResourceManager::connect_with_retry_policy(
            Arc::clone(&client) as Arc<dyn DmClient>,
            Some(Duration::from_secs(1)),
            AlwaysRetryTransient.with_attempt_limit(2),
            ExponentialBackoff::default(),
        )
        .await
        .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        manager.wait_for_next_refresh().await;
        assert!(manager.shuffled_containers().unwrap().len() == 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        manager.shutdown();
    }
}
