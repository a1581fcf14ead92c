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

//! Types and the trait used to work with bearer tokens.

use ingest_gax::Result;
use tokio::time::Instant;

/// An AAD bearer token used for both the DM management commands and the
/// queued-ingest `authorizationContext`.
#[derive(Clone, PartialEq)]
pub struct Token {
    /// The value used in the `Authorization:` header, without the
    /// `token_type` prefix.
    pub token: String,
    /// Usually `"Bearer"`.
    pub token_type: String,
    /// The instant at which the token expires. `None` means it never does.
    pub expires_at: Option<Instant>,
}

impl Token {
    pub fn header_value(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("token", &"[censored]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies bearer tokens to the ingestion client.
///
/// This is the only authentication contract the ingestion client depends
/// on. Implementations acquire the token however is appropriate for the
/// deployment (AAD client credentials, managed identity, cached device
/// code, ...); that mechanism is explicitly out of scope for this crate.
#[async_trait::async_trait]
pub trait TokenProvider: std::fmt::Debug + Send + Sync {
    async fn token(&self) -> Result<Token>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    mockall::mock! {
        #[derive(Debug)]
        pub TokenProvider {}

        #[async_trait::async_trait]
        impl TokenProvider for TokenProvider {
            async fn token(&self) -> Result<Token>;
        }
    }

    #[test]
    fn debug_censors_token_value() {
        let token = Token {
            token: "super-secret".into(),
            token_type: "Bearer".into(),
            expires_at: None,
        };
        let debug = format!("{token:?}");
        assert!(!debug.contains("super-secret"), "{debug}");
        assert!(debug.contains("[censored]"), "{debug}");
    }

    #[test]
    fn header_value_combines_type_and_token() {
        let token = Token {
            token: "abc".into(),
            token_type: "Bearer".into(),
            expires_at: None,
        };
        assert_eq!(token.header_value(), "Bearer abc");
    }
}
