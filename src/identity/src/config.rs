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

//! Client settings loaded from JSON.
//!
//! Applications often keep the OAuth2 client registration in a file:
//!
//! ```json
//! {
//!   "token_uri": "https://auth.example.com/oauth/token",
//!   "client_id": "my-client",
//!   "client_secret": "my-secret",
//!   "client_auth": "basic",
//!   "scope": "read write"
//! }
//! ```

use crate::Result;
use crate::authorizer::{
    BasicAuthorizer, ClientSecretPostAuthorizer, NoAuthorizer, RequestAuthorizer,
};
use crate::errors::Error;
use crate::flow::{Builder, GrantType};
use crate::scope::Scope;
use serde::Deserialize;
use std::sync::Arc;

/// How the client authenticates to the token endpoint.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuthentication {
    /// HTTP Basic, the default.
    #[default]
    Basic,
    /// `client_id` and `client_secret` in the request body.
    Post,
    /// Public clients.
    None,
}

/// The registration of an OAuth2 client.
#[derive(Clone, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub token_uri: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_auth: ClientAuthentication,
    #[serde(default)]
    pub scope: Option<Scope>,
}

impl ClientConfig {
    /// Parses the configuration from a JSON value.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::invalid_request(format!("invalid client configuration: {e}")))
    }

    /// Returns the authorizer for token requests.
    ///
    /// # Errors
    /// Fails if the authentication method needs a `client_id` or
    /// `client_secret` that is not configured.
    pub fn client_authorizer(&self) -> Result<Arc<dyn RequestAuthorizer>> {
        let client_id = || {
            self.client_id.clone().ok_or_else(|| {
                Error::invalid_request("the client configuration is missing `client_id`")
            })
        };
        let authorizer: Arc<dyn RequestAuthorizer> = match (self.client_auth, &self.client_secret) {
            (ClientAuthentication::None, _) => Arc::new(NoAuthorizer),
            (ClientAuthentication::Basic, Some(secret)) => {
                Arc::new(BasicAuthorizer::new(client_id()?, secret.clone()))
            }
            (ClientAuthentication::Post, Some(secret)) => {
                Arc::new(ClientSecretPostAuthorizer::new(client_id()?, secret.clone()))
            }
            (ClientAuthentication::Post, None) => {
                Arc::new(ClientSecretPostAuthorizer::public(client_id()?))
            }
            (ClientAuthentication::Basic, None) => {
                return Err(Error::invalid_request(
                    "HTTP Basic client authentication requires `client_secret`",
                ));
            }
        };
        Ok(authorizer)
    }

    /// Returns a [Builder] for `grant`, with the endpoint, client
    /// authentication, and scope from this configuration.
    pub fn builder<G: GrantType + 'static>(&self, grant: G) -> Result<Builder> {
        let builder = Builder::new(self.token_uri.clone(), grant)
            .with_client_authorizer(self.client_authorizer()?);
        Ok(match &self.scope {
            Some(scope) => builder.with_scope(scope.clone()),
            None => builder,
        })
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[censored]"))
            .field("client_auth", &self.client_auth)
            .field("scope", &self.scope)
            .finish()
    }
}
