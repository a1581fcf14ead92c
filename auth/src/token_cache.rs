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

//! A background-refreshed cache over a [TokenProvider].
//!
//! A `tokio::spawn`ed loop owns the single source of truth and publishes
//! new tokens through a `tokio::sync::watch` channel; readers never drive
//! the refresh, they only observe its latest value (or block on the first
//! one).

use crate::token::{Token, TokenProvider};
use ingest_gax::error::Error;
use ingest_gax::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};

const NORMAL_REFRESH_SLACK: Duration = Duration::from_secs(240);
const SHORT_REFRESH_SLACK: Duration = Duration::from_secs(10);

type TokenResult = std::result::Result<Arc<Token>, String>;

/// Wraps a [TokenProvider], refreshing its token on a background task
/// before it expires.
#[derive(Debug)]
pub struct TokenCache {
    rx: watch::Receiver<Option<TokenResult>>,
}

impl Clone for TokenCache {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl TokenCache {
    pub fn new<T>(provider: T) -> Self
    where
        T: TokenProvider + 'static,
    {
        let (tx, rx) = watch::channel::<Option<TokenResult>>(None);
        let provider = Arc::new(provider);
        tokio::spawn(refresh_loop(provider, tx));
        Self { rx }
    }

    /// Returns the most recently cached, non-expired token, blocking on the
    /// first refresh if none has completed yet.
    pub async fn token(&self) -> Result<Arc<Token>> {
        let mut rx = self.rx.clone();
        let current = rx.borrow_and_update().clone();
        match current {
            Some(Ok(token)) => match token.expires_at {
                Some(expiry) if expiry <= Instant::now() => Self::wait_for_next(rx).await,
                _ => Ok(token),
            },
            Some(Err(message)) => Err(Error::service(message, true)),
            None => Self::wait_for_next(rx).await,
        }
    }

    async fn wait_for_next(mut rx: watch::Receiver<Option<TokenResult>>) -> Result<Arc<Token>> {
        rx.changed()
            .await
            .map_err(|_| Error::service("token refresh task terminated", true))?;
        match rx.borrow().clone() {
            Some(Ok(token)) => Ok(token),
            Some(Err(message)) => Err(Error::service(message, true)),
            None => Err(Error::service("no token available", true)),
        }
    }
}

async fn refresh_loop<T: TokenProvider>(provider: Arc<T>, tx: watch::Sender<Option<TokenResult>>) {
    loop {
        let result = provider.token().await;
        let (to_publish, keep_going, next_sleep) = match result {
            Ok(token) => {
                let token = Arc::new(token);
                let delay = match token.expires_at {
                    None => None, // never expires, one refresh is enough
                    Some(expiry) => match expiry.checked_duration_since(Instant::now()) {
                        None => Some(Duration::ZERO),
                        Some(remaining) if remaining > NORMAL_REFRESH_SLACK => {
                            Some(remaining - NORMAL_REFRESH_SLACK)
                        }
                        Some(remaining) if remaining > SHORT_REFRESH_SLACK => {
                            Some(SHORT_REFRESH_SLACK)
                        }
                        Some(_) => Some(Duration::ZERO),
                    },
                };
                let keep_going = token.expires_at.is_some();
                (Ok(token), keep_going, delay)
            }
            Err(error) => (Err(error.to_string()), false, None),
        };
        if tx.send(Some(to_publish)).is_err() {
            return; // no readers left
        }
        if !keep_going {
            tracing::debug!("token refresh loop stopping: token does not expire or refresh failed");
            return;
        }
        if let Some(delay) = next_sleep {
            sleep(delay).await;
        }
    }
}
