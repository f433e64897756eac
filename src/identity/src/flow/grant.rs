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

//! Payload builders for initial grants.

use crate::Result;
use std::sync::Arc;

pub(crate) const GRANT_TYPE: &str = "grant_type";

/// The form parameters of an initial grant request.
///
/// The [GrantFlow][super::GrantFlow] adds `scope` and any client
/// authentication, implementations only return the grant-specific values,
/// including `grant_type`.
#[async_trait::async_trait]
pub trait GrantType: std::fmt::Debug + Send + Sync {
    async fn parameters(&self) -> Result<Vec<(String, String)>>;
}

/// A resource owner's username and password.
#[derive(Clone, PartialEq, Eq)]
pub struct UsernamePassword {
    username: String,
    password: String,
}

impl UsernamePassword {
    pub fn new<S: Into<String>, T: Into<String>>(username: S, password: T) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for UsernamePassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsernamePassword")
            .field("username", &self.username)
            .field("password", &"[censored]")
            .finish()
    }
}

/// Supplies the resource owner's credentials when an initial grant is needed.
///
/// Applications typically prompt the user, or read a secure store. The
/// provider is only consulted when there is no usable access token and no
/// refresh token.
#[async_trait::async_trait]
pub trait CredentialsProvider: std::fmt::Debug + Send + Sync {
    async fn credentials(&self) -> Result<UsernamePassword>;
}

/// A [CredentialsProvider] that always returns the same credentials.
#[derive(Clone, Debug)]
pub struct StaticCredentials(UsernamePassword);

impl StaticCredentials {
    pub fn new<S: Into<String>, T: Into<String>>(username: S, password: T) -> Self {
        Self(UsernamePassword::new(username, password))
    }
}

#[async_trait::async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn credentials(&self) -> Result<UsernamePassword> {
        Ok(self.0.clone())
    }
}

/// The [resource owner password credentials] grant.
///
/// [resource owner password credentials]: https://datatracker.ietf.org/doc/html/rfc6749#section-4.3
#[derive(Clone, Debug)]
pub struct PasswordGrant {
    source: Arc<dyn CredentialsProvider>,
}

impl PasswordGrant {
    pub fn new<P: CredentialsProvider + 'static>(source: P) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// A grant using fixed credentials.
    pub fn with_credentials<S: Into<String>, T: Into<String>>(username: S, password: T) -> Self {
        Self::new(StaticCredentials::new(username, password))
    }
}

#[async_trait::async_trait]
impl GrantType for PasswordGrant {
    async fn parameters(&self) -> Result<Vec<(String, String)>> {
        let credentials = self.source.credentials().await?;
        Ok(vec![
            (GRANT_TYPE.to_string(), "password".to_string()),
            ("username".to_string(), credentials.username),
            ("password".to_string(), credentials.password),
        ])
    }
}

/// The [client credentials] grant.
///
/// The client authenticates as itself, so this grant is always used with a
/// client authorizer such as [BasicAuthorizer][crate::authorizer::BasicAuthorizer].
///
/// [client credentials]: https://datatracker.ietf.org/doc/html/rfc6749#section-4.4
#[derive(Clone, Copy, Debug, Default)]
pub struct ClientCredentialsGrant;

#[async_trait::async_trait]
impl GrantType for ClientCredentialsGrant {
    async fn parameters(&self) -> Result<Vec<(String, String)>> {
        Ok(vec![(GRANT_TYPE.to_string(), "client_credentials".to_string())])
    }
}
