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

//! Health-ranked storage-account bookkeeping (§3, §4.1).
//!
//! Every storage account advertised by the resource manager gets a
//! [RankedAccount] tracking recent success/failure in a ring of time
//! buckets. [RankedStorageAccountSet] groups accounts into rank tiers and
//! shuffles within each tier so uploads spread across healthy accounts
//! first, without starving a recovering one.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::time::Instant;

use ingest_gax::error::Error;
use ingest_gax::Result;

const DEFAULT_BUCKET_COUNT: usize = 6;
const DEFAULT_BUCKET_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_TIERS: [f64; 4] = [0.90, 0.70, 0.30, 0.0];

#[derive(Clone, Copy, Debug, Default)]
struct Bucket {
    success: u64,
    failure: u64,
}

impl Bucket {
    fn is_empty(&self) -> bool {
        self.success == 0 && self.failure == 0
    }
}

/// Per-account sliding-window success/failure state.
///
/// The ring holds `bucket_count` buckets, newest at index 0. `record`
/// rotates the ring forward whenever wall-clock time has advanced by one
/// or more `bucket_duration` since `last_action`.
struct RankedAccount {
    buckets: Vec<Bucket>,
    last_action: Instant,
    bucket_duration: Duration,
}

impl RankedAccount {
    fn new(bucket_count: usize, bucket_duration: Duration, now: Instant) -> Self {
        Self {
            buckets: vec![Bucket::default(); bucket_count],
            last_action: now,
            bucket_duration,
        }
    }

    /// Rotates in `min(k, len)` empty buckets for `k` elapsed bucket
    /// periods, per §4.1's `record` rule.
    fn rotate(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_action);
        if elapsed < self.bucket_duration {
            return;
        }
        let k = (elapsed.as_secs_f64() / self.bucket_duration.as_secs_f64()).floor() as usize;
        let len = self.buckets.len();
        if k >= len {
            self.buckets = vec![Bucket::default(); len];
        } else {
            self.buckets.truncate(len - k);
            for _ in 0..k {
                self.buckets.insert(0, Bucket::default());
            }
        }
        self.last_action = now;
    }

    fn record(&mut self, success: bool, now: Instant) {
        self.rotate(now);
        let bucket = &mut self.buckets[0];
        if success {
            bucket.success += 1;
        } else {
            bucket.failure += 1;
        }
        self.last_action = now;
    }

    /// `rank = Σ(successᵢ/(successᵢ+failureᵢ) · weightᵢ) / Σ weightᵢ`, newest
    /// bucket weighted `N`, oldest weighted `1`. An account with no
    /// observations ranks `1.0`.
    fn rank(&self) -> f64 {
        let len = self.buckets.len();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (i, bucket) in self.buckets.iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let weight = (len - i) as f64;
            let rate = bucket.success as f64 / (bucket.success + bucket.failure) as f64;
            weighted_sum += rate * weight;
            weight_total += weight;
        }
        if weight_total == 0.0 {
            1.0
        } else {
            weighted_sum / weight_total
        }
    }
}

/// Tracks every advertised storage account's recent health and produces a
/// tier-ordered, within-tier-shuffled ranking for the round-robin selector.
pub struct RankedStorageAccountSet {
    accounts: Mutex<HashMap<String, RankedAccount>>,
    bucket_count: usize,
    bucket_duration: Duration,
    tiers: Vec<f64>,
}

impl Default for RankedStorageAccountSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RankedStorageAccountSet {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            bucket_count: DEFAULT_BUCKET_COUNT,
            bucket_duration: DEFAULT_BUCKET_DURATION,
            tiers: DEFAULT_TIERS.to_vec(),
        }
    }

    #[cfg(test)]
    fn with_bucket_duration(bucket_count: usize, bucket_duration: Duration) -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            bucket_count,
            bucket_duration,
            tiers: DEFAULT_TIERS.to_vec(),
        }
    }

    /// Idempotent registration; the strict variant C3 relies on to detect
    /// accidental double-registration during a refresh.
    pub fn register(&self, account: &str) {
        let mut accounts = self.accounts.lock().expect("ranked accounts lock poisoned");
        accounts
            .entry(account.to_string())
            .or_insert_with(|| RankedAccount::new(self.bucket_count, self.bucket_duration, Instant::now()));
    }

    /// Registration used by callers that must reject duplicates outright.
    pub fn register_strict(&self, account: &str) -> Result<()> {
        let mut accounts = self.accounts.lock().expect("ranked accounts lock poisoned");
        if accounts.contains_key(account) {
            return Err(Error::client(format!("account {account} already registered")));
        }
        accounts.insert(
            account.to_string(),
            RankedAccount::new(self.bucket_count, self.bucket_duration, Instant::now()),
        );
        Ok(())
    }

    pub fn record(&self, account: &str, success: bool) {
        let mut accounts = self.accounts.lock().expect("ranked accounts lock poisoned");
        let entry = accounts
            .entry(account.to_string())
            .or_insert_with(|| RankedAccount::new(self.bucket_count, self.bucket_duration, Instant::now()));
        entry.record(success, Instant::now());
    }

    fn tier_of(&self, rank: f64) -> usize {
        self.tiers
            .iter()
            .position(|&lower_bound| rank >= lower_bound)
            .unwrap_or(self.tiers.len() - 1)
    }

    /// Snapshots every account's rank, groups into tiers (lowest tier index
    /// first = healthiest), shuffles within each tier, and flattens.
    pub fn ranked_shuffled(&self) -> Vec<String> {
        let snapshot: Vec<(String, f64)> = {
            let accounts = self.accounts.lock().expect("ranked accounts lock poisoned");
            accounts.iter().map(|(name, account)| (name.clone(), account.rank())).collect()
        };

        let mut tiers: Vec<Vec<String>> = vec![Vec::new(); self.tiers.len()];
        for (name, rank) in snapshot {
            let tier = self.tier_of(rank);
            tiers[tier].push(name);
        }

        let mut rng = rand::thread_rng();
        let mut out = Vec::new();
        for tier in tiers.iter_mut() {
            tier.shuffle(&mut rng);
            out.extend(tier.drain(..));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_account_ranks_perfect() {
        let set = RankedStorageAccountSet::new();
        set.register("a");
        let ranked = set.ranked_shuffled();
        assert_eq!(ranked, vec!["a".to_string()]);
    }

    #[test]
    fn tier_assignment_orders_healthiest_first() {
        let set = RankedStorageAccountSet::new();
        for (name, successes, failures) in [("a", 19, 1), ("b", 8, 2), ("c", 1, 2), ("d", 0, 5)] {
            for _ in 0..successes {
                set.record(name, true);
            }
            for _ in 0..failures {
                set.record(name, false);
            }
        }
        let ranked = set.ranked_shuffled();
        assert_eq!(ranked, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn singleton_tiers_are_stable_across_calls() {
        let set = RankedStorageAccountSet::new();
        set.record("a", true);
        for _ in 0..8 {
            assert_eq!(set.ranked_shuffled(), vec!["a".to_string()]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_rotation_ages_out_old_observations() {
        let set = RankedStorageAccountSet::with_bucket_duration(3, Duration::from_secs(10));
        set.record("a", false);
        set.record("a", false);
        assert!(set.ranked_shuffled().is_empty() == false);

        tokio::time::advance(Duration::from_secs(35)).await;
        set.record("a", true);
        // All prior failures have rotated out; only the fresh success remains.
        let accounts = set.accounts.lock().unwrap();
        let rank = accounts.get("a").unwrap().rank();
        drop(accounts);
        assert_eq!(rank, 1.0);
    }
}
