// Copyright 2025 Google LLC
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

//! Obtain, cache, and refresh access tokens.
//!
//! A [GrantFlow] owns the access token for one client. Every call to
//! [authorize][crate::authorizer::RequestAuthorizer::authorize] picks the
//! first applicable strategy:
//!
//! 1. Reuse the cached access token, if it has not expired.
//! 2. Refresh, if a refresh token is in storage.
//! 3. Run the initial grant, for example using the resource owner's
//!    username and password.
//!
//! Concurrent callers share a single token request. The request runs as a
//! Tokio task, so it completes and updates the flow state even if every
//! caller waiting on it is dropped. Failures are returned to every caller
//! waiting on that request and leave the flow state unchanged. The flow never
//! retries on its own.
//!
//! # Example
//! ```no_run
//! # use identity_kit::authorizer::{BasicAuthorizer, RequestExt};
//! # use identity_kit::flow::{Builder, PasswordGrant};
//! # use identity_kit::transport::HttpRequest;
//! # async fn sample(request: HttpRequest) -> identity_kit::Result<()> {
//! let flow = Builder::new(
//!     "https://auth.example.com/oauth/token",
//!     PasswordGrant::with_credentials("alice", "s3cr3t"),
//! )
//! .with_scope("read write")
//! .with_client_authorizer(BasicAuthorizer::new("my-client", "my-secret"))
//! .build()?;
//! let request = request.authorized(&flow).await?;
//! # Ok(()) }
//! ```

mod grant;

pub use grant::{
    ClientCredentialsGrant, CredentialsProvider, GrantType, PasswordGrant, StaticCredentials,
    UsernamePassword,
};

use crate::Result;
use crate::authorizer::{FORM_CONTENT_TYPE, NoAuthorizer, RequestAuthorizer, with_credential};
use crate::errors::Error;
use crate::scope::Scope;
use crate::storage::{MemoryStorage, Storage, StorageKey};
use crate::token::{AccessTokenResponse, ExpirationPolicy, NeverExpires};
use crate::transport::{HttpRequest, Transport};
use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use grant::GRANT_TYPE;
use http::header::{ACCEPT, CONTENT_TYPE};
use std::sync::{Arc, Mutex, MutexGuard};

type TokenRequest = Shared<BoxFuture<'static, Result<AccessTokenResponse>>>;

/// A builder for [GrantFlow].
///
/// Only the token endpoint and the initial grant are required. By default the
/// flow uses [ReqwestTransport][crate::transport::ReqwestTransport] (if the
/// `reqwest` feature is enabled), an in-memory refresh token store, no client
/// authentication, and treats tokens without `expires_in` as never expiring.
pub struct Builder {
    token_endpoint: String,
    grant: Arc<dyn GrantType>,
    scope: Option<Scope>,
    transport: Option<Arc<dyn Transport>>,
    storage: Arc<dyn Storage>,
    storage_key: StorageKey,
    client_authorizer: Arc<dyn RequestAuthorizer>,
    expiration_policy: Arc<dyn ExpirationPolicy>,
    retain_refresh_token: bool,
}

impl Builder {
    pub fn new<S: Into<String>, G: GrantType + 'static>(token_endpoint: S, grant: G) -> Self {
        Self {
            token_endpoint: token_endpoint.into(),
            grant: Arc::new(grant),
            scope: None,
            transport: None,
            storage: Arc::new(MemoryStorage::new()),
            storage_key: StorageKey::default(),
            client_authorizer: Arc::new(NoAuthorizer),
            expiration_policy: Arc::new(NeverExpires),
            retain_refresh_token: true,
        }
    }

    /// The scope requested on initial grants and refreshes.
    pub fn with_scope<S: Into<Scope>>(mut self, scope: S) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Where the refresh token is persisted.
    pub fn with_storage<T: Storage + 'static>(mut self, storage: T) -> Self {
        self.storage = Arc::new(storage);
        self
    }

    /// The key used for the refresh token.
    ///
    /// Only one flow should own a given key in a given storage.
    pub fn with_storage_key<K: Into<StorageKey>>(mut self, key: K) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Authenticates the token requests themselves.
    pub fn with_client_authorizer<A: RequestAuthorizer + 'static>(mut self, authorizer: A) -> Self {
        self.client_authorizer = Arc::new(authorizer);
        self
    }

    /// Decides whether tokens without `expires_in` have expired.
    pub fn with_expiration_policy<P: ExpirationPolicy + 'static>(mut self, policy: P) -> Self {
        self.expiration_policy = Arc::new(policy);
        self
    }

    /// Keep the stored refresh token when a refresh response omits a new one.
    ///
    /// Servers are not required to rotate refresh tokens, so this is enabled
    /// by default. Disabling it clears the stored refresh token in that case.
    pub fn with_refresh_token_retention(mut self, retain: bool) -> Self {
        self.retain_refresh_token = retain;
        self
    }

    /// Returns a [GrantFlow] with the configured settings.
    ///
    /// # Errors
    /// Fails if the token endpoint is not a valid URL, or if no transport is
    /// configured and the `reqwest` feature is disabled.
    pub fn build(self) -> Result<GrantFlow> {
        url::Url::parse(&self.token_endpoint).map_err(|e| {
            Error::invalid_request(format!(
                "invalid token endpoint `{}`: {e}",
                self.token_endpoint
            ))
        })?;
        let transport = match self.transport {
            Some(t) => t,
            None => default_transport()?,
        };
        Ok(GrantFlow {
            inner: Arc::new(Inner {
                token_endpoint: self.token_endpoint,
                grant: self.grant,
                scope: self.scope,
                transport,
                storage: self.storage,
                storage_key: self.storage_key,
                client_authorizer: self.client_authorizer,
                expiration_policy: self.expiration_policy,
                retain_refresh_token: self.retain_refresh_token,
                state: Mutex::new(State::default()),
            }),
        })
    }
}

#[cfg(feature = "reqwest")]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(crate::transport::ReqwestTransport::new()))
}

#[cfg(not(feature = "reqwest"))]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Err(Error::invalid_request(
        "a transport must be configured when the `reqwest` feature is disabled",
    ))
}

/// Manages the access token for one client.
///
/// Clones share the cached token and the in-flight token request.
#[derive(Clone, Debug)]
pub struct GrantFlow {
    inner: Arc<Inner>,
}

struct Inner {
    token_endpoint: String,
    grant: Arc<dyn GrantType>,
    scope: Option<Scope>,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn Storage>,
    storage_key: StorageKey,
    client_authorizer: Arc<dyn RequestAuthorizer>,
    expiration_policy: Arc<dyn ExpirationPolicy>,
    retain_refresh_token: bool,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    cached: Option<AccessTokenResponse>,
    // At most one token request runs at a time, all callers await it.
    in_flight: Option<TokenRequest>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantFlow")
            .field("token_endpoint", &self.token_endpoint)
            .field("grant", &self.grant)
            .field("scope", &self.scope)
            .field("transport", &self.transport)
            .field("storage", &self.storage)
            .field("storage_key", &self.storage_key)
            .field("client_authorizer", &self.client_authorizer)
            .field("retain_refresh_token", &self.retain_refresh_token)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug)]
enum Strategy {
    Refresh,
    InitialGrant,
}

impl Strategy {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
            Self::InitialGrant => "initial_grant",
        }
    }
}

impl GrantFlow {
    /// Returns a usable access token, requesting one if needed.
    ///
    /// # Errors
    /// Besides the token request failures, this fails with
    /// [Error::InvalidRequest] if a token request is needed and the caller is
    /// not running inside a Tokio runtime.
    pub async fn access_token(&self) -> Result<AccessTokenResponse> {
        let request = {
            let mut state = self.inner.state();
            if let Some(cached) = state.cached.as_ref().filter(|c| !c.is_expired()) {
                tracing::debug!(strategy = "reuse", "using the cached access token");
                return Ok(cached.clone());
            }
            match &state.in_flight {
                Some(request) => {
                    tracing::debug!("awaiting the token request already in progress");
                    request.clone()
                }
                None => {
                    let request = Inner::start(self.inner.clone())?;
                    state.in_flight = Some(request.clone());
                    request
                }
            }
        };
        request.await
    }

    /// A snapshot of the cached access token, which may have expired.
    pub fn credential(&self) -> Option<AccessTokenResponse> {
        self.inner.state().cached.clone()
    }

    /// Discards the cached access token.
    ///
    /// Call this when a resource server rejects the token (for example with
    /// a 401). The next authorization refreshes or runs the initial grant.
    ///
    /// A token request already in progress is not affected, its result is
    /// cached when it completes.
    pub fn invalidate(&self) {
        self.inner.state().cached = None;
    }

    /// Reads the stored refresh token.
    pub async fn refresh_token(&self) -> Result<Option<String>> {
        self.inner
            .storage
            .get(self.inner.storage_key.as_str())
            .await
    }

    /// Removes the stored refresh token.
    ///
    /// Call this when a refresh fails with
    /// [InvalidGrant][crate::errors::ErrorCode::InvalidGrant], so the next
    /// authorization runs the initial grant. The cached access token, if
    /// any, is kept.
    ///
    /// If a token request is in progress, this waits for it to complete
    /// first, so the refresh token it stores is the one removed.
    pub async fn discard_refresh_token(&self) -> Result<()> {
        let pending = self.inner.state().in_flight.clone();
        if let Some(request) = pending {
            // The outcome is reported to the callers of `access_token()`.
            let _ = request.await;
        }
        tracing::debug!("discarding the stored refresh token");
        self.inner
            .storage
            .set(self.inner.storage_key.as_str(), None)
            .await
    }
}

#[async_trait::async_trait]
impl RequestAuthorizer for GrantFlow {
    async fn authorize(&self, request: &HttpRequest) -> Result<HttpRequest> {
        let credential = self.access_token().await?;
        with_credential(request, &credential)
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        // State updates are single assignments, a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Called with the state lock held. The task cannot update the state
    // before the caller records the request as in flight.
    fn start(inner: Arc<Inner>) -> Result<TokenRequest> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::invalid_request(format!("token requests require a Tokio runtime: {e}"))
        })?;
        let weak = Arc::downgrade(&inner);
        let task = runtime.spawn(async move {
            let result = inner.fetch().await;
            let mut state = inner.state();
            state.in_flight = None;
            if let Ok(credential) = &result {
                state.cached = Some(credential.clone());
            }
            result
        });
        let request = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    // The task panicked or the runtime shut down before
                    // clearing its own state.
                    if let Some(inner) = weak.upgrade() {
                        inner.state().in_flight = None;
                    }
                    Err(Error::transport(e))
                }
            }
        };
        Ok(request.boxed().shared())
    }

    async fn fetch(&self) -> Result<AccessTokenResponse> {
        let stored = self.storage.get(self.storage_key.as_str()).await?;
        let (strategy, mut parameters) = match &stored {
            Some(refresh_token) => (
                Strategy::Refresh,
                vec![
                    (GRANT_TYPE.to_string(), "refresh_token".to_string()),
                    ("refresh_token".to_string(), refresh_token.clone()),
                ],
            ),
            None => (Strategy::InitialGrant, self.grant.parameters().await?),
        };
        if let Some(scope) = self.scope.as_ref().filter(|s| !s.is_empty()) {
            parameters.push(("scope".to_string(), scope.value()));
        }
        tracing::debug!(
            strategy = strategy.as_str(),
            token_endpoint = %self.token_endpoint,
            "requesting an access token"
        );

        let request = self.token_request(&parameters)?;
        let request = self.client_authorizer.authorize(&request).await?;
        let response = self
            .transport
            .perform(request)
            .await
            .map_err(Error::Transport)?;
        let credential = match AccessTokenResponse::from_response(&response) {
            Ok(c) => c.with_expiration_policy(self.expiration_policy.clone()),
            Err(e) => {
                tracing::warn!(
                    strategy = strategy.as_str(),
                    status = %response.status(),
                    "the token request failed: {e}"
                );
                return Err(e);
            }
        };

        let credential = match (credential.refresh_token(), &stored) {
            (None, Some(old)) if self.retain_refresh_token => {
                credential.with_refresh_token(Some(old.clone()))
            }
            _ => credential,
        };
        let refresh_token = credential.refresh_token().map(str::to_string);
        if refresh_token != stored {
            self.storage
                .set(self.storage_key.as_str(), refresh_token)
                .await?;
        }
        tracing::debug!(
            strategy = strategy.as_str(),
            expires_in = ?credential.expires_in(),
            "obtained an access token"
        );
        Ok(credential)
    }

    fn token_request(&self, parameters: &[(String, String)]) -> Result<HttpRequest> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(parameters)
            .finish();
        http::Request::builder()
            .method(http::Method::POST)
            .uri(&self.token_endpoint)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(ACCEPT, "application/json")
            .body(Bytes::from(body))
            .map_err(|e| Error::invalid_request(format!("cannot build the token request: {e}")))
    }
}
