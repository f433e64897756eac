// Copyright 2024 Google LLC
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

//! Types and functions to work with [access token responses].
//!
//! [access token responses]: https://datatracker.ietf.org/doc/html/rfc6749#section-5.1

use crate::Result;
use crate::errors::{Error, ProtocolError, ResponseError};
use crate::scope::Scope;
use crate::transport::HttpResponse;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
// Using tokio's wrapper makes expiration testable without relying on clock times.
use tokio::time::Instant;

/// The names of the parameters defined by RFC 6749 for a token response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Parameter(&'static str);

impl Parameter {
    pub const ACCESS_TOKEN: Parameter = Parameter("access_token");
    pub const TOKEN_TYPE: Parameter = Parameter("token_type");
    pub const EXPIRES_IN: Parameter = Parameter("expires_in");
    pub const REFRESH_TOKEN: Parameter = Parameter("refresh_token");
    pub const SCOPE: Parameter = Parameter("scope");

    pub fn name(&self) -> &'static str {
        self.0
    }
}

/// Decides whether a credential without a declared lifetime has expired.
///
/// This is only consulted when the server omitted `expires_in`. Any
/// `Fn(&AccessTokenResponse) -> bool` can be used as a policy.
pub trait ExpirationPolicy: Send + Sync {
    fn is_expired(&self, credential: &AccessTokenResponse) -> bool;
}

impl<F> ExpirationPolicy for F
where
    F: Fn(&AccessTokenResponse) -> bool + Send + Sync,
{
    fn is_expired(&self, credential: &AccessTokenResponse) -> bool {
        self(credential)
    }
}

/// The default policy: the credential is used until the server rejects it.
///
/// The authorization server should document the lifetime of its tokens when
/// it omits `expires_in`. If a token turns out to be invalid, the failed
/// request tells the application to discard it and authorize again.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverExpires;

impl ExpirationPolicy for NeverExpires {
    fn is_expired(&self, _credential: &AccessTokenResponse) -> bool {
        false
    }
}

/// Treats credentials without `expires_in` as if they declared `lifetime`.
#[derive(Clone, Copy, Debug)]
pub struct AssumedLifetime(pub Duration);

impl ExpirationPolicy for AssumedLifetime {
    fn is_expired(&self, credential: &AccessTokenResponse) -> bool {
        credential.elapsed() >= self.0
    }
}

/// An access token issued by the authorization server, plus its metadata.
///
/// Instances are created once per successful grant and never modified. The
/// creation time is captured at construction, [is_expired][Self::is_expired]
/// is computed from it on every call.
#[derive(Clone)]
pub struct AccessTokenResponse {
    access_token: String,
    token_type: String,
    expires_in: Option<Duration>,
    // The `expires_in` value as sent by the server, returned by `parameters()`.
    expires_in_value: Option<Value>,
    refresh_token: Option<String>,
    scope: Option<Scope>,
    additional_parameters: Map<String, Value>,
    created_at: Instant,
    expiration_policy: Arc<dyn ExpirationPolicy>,
}

impl AccessTokenResponse {
    /// Creates an instance with the minimum required parameters.
    ///
    /// # Errors
    /// Fails if `access_token` or `token_type` are empty.
    pub fn new<S, T>(
        access_token: S,
        token_type: T,
        expires_in: Option<Duration>,
        refresh_token: Option<String>,
        scope: Option<Scope>,
    ) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(ResponseError::MissingField(Parameter::ACCESS_TOKEN.name()).into());
        }
        let token_type = token_type.into();
        if token_type.is_empty() {
            return Err(ResponseError::MissingField(Parameter::TOKEN_TYPE.name()).into());
        }
        Ok(Self {
            access_token,
            token_type,
            expires_in,
            expires_in_value: None,
            refresh_token,
            scope,
            additional_parameters: Map::new(),
            created_at: Instant::now(),
            expiration_policy: Arc::new(NeverExpires),
        })
    }

    /// Creates an instance from the parameters of a token response.
    ///
    /// Parameters not defined by RFC 6749 are preserved in
    /// [additional_parameters][Self::additional_parameters].
    ///
    /// # Errors
    /// Fails if `access_token` or `token_type` are missing, empty, or not
    /// strings, or if any of the optional known parameters has the wrong type.
    pub fn from_parameters(mut parameters: Map<String, Value>) -> Result<Self> {
        let access_token = take_required(&mut parameters, Parameter::ACCESS_TOKEN)?;
        let token_type = take_required(&mut parameters, Parameter::TOKEN_TYPE)?;
        let expires_in_value = parameters
            .remove(Parameter::EXPIRES_IN.name())
            .filter(|v| !v.is_null());
        let expires_in = expires_in_value.as_ref().map(parse_lifetime).transpose()?;
        let refresh_token = take_optional(&mut parameters, Parameter::REFRESH_TOKEN)?;
        let scope = take_optional(&mut parameters, Parameter::SCOPE)?
            .map(|s| Scope::from(s.as_str()));

        let mut response = Self::new(access_token, token_type, expires_in, refresh_token, scope)?;
        response.expires_in_value = expires_in_value;
        response.additional_parameters = parameters;
        Ok(response)
    }

    /// Classifies a token endpoint response.
    ///
    /// A JSON object with an `error` member becomes [Error::Protocol],
    /// whatever the status code. Otherwise, a non-2xx status becomes
    /// [ResponseError::Status], a body that is not a JSON object becomes
    /// [ResponseError::Malformed], and a successful response is validated by
    /// [from_parameters][Self::from_parameters].
    pub fn from_response(response: &HttpResponse) -> Result<Self> {
        let status = response.status();
        let parameters = serde_json::from_slice::<Map<String, Value>>(response.body());
        if let Ok(parameters) = &parameters {
            if let Some(error) = ProtocolError::from_parameters(parameters) {
                return Err(error.with_status(status).into());
            }
        }
        if !status.is_success() {
            let body = String::from_utf8_lossy(response.body()).to_string();
            return Err(ResponseError::Status { status, body }.into());
        }
        let parameters = parameters.map_err(ResponseError::malformed)?;
        Self::from_parameters(parameters)
    }

    /// Installs the policy consulted when `expires_in` was not declared.
    pub fn with_expiration_policy(mut self, policy: Arc<dyn ExpirationPolicy>) -> Self {
        self.expiration_policy = policy;
        self
    }

    // Used when the server does not rotate the refresh token.
    pub(crate) fn with_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    /// The token value, used in the `Authorization:` header.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// The type of the token, typically `"Bearer"`.
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// The lifetime declared by the server.
    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_in
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    /// Any parameters not defined by RFC 6749.
    pub fn additional_parameters(&self) -> &Map<String, Value> {
        &self.additional_parameters
    }

    /// All parameters, including additional ones.
    pub fn parameters(&self) -> Map<String, Value> {
        let mut parameters = self.additional_parameters.clone();
        parameters.insert(
            Parameter::ACCESS_TOKEN.name().to_string(),
            Value::from(self.access_token.as_str()),
        );
        parameters.insert(
            Parameter::TOKEN_TYPE.name().to_string(),
            Value::from(self.token_type.as_str()),
        );
        let expires_in = self
            .expires_in_value
            .clone()
            .or_else(|| self.expires_in.map(lifetime_value));
        if let Some(expires_in) = expires_in {
            parameters.insert(Parameter::EXPIRES_IN.name().to_string(), expires_in);
        }
        if let Some(refresh_token) = &self.refresh_token {
            parameters.insert(
                Parameter::REFRESH_TOKEN.name().to_string(),
                Value::from(refresh_token.as_str()),
            );
        }
        if let Some(scope) = &self.scope {
            parameters.insert(Parameter::SCOPE.name().to_string(), Value::from(scope.value()));
        }
        parameters
    }

    /// The time elapsed since this instance was created.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Returns `true` once the declared lifetime has fully elapsed.
    ///
    /// If the server did not declare a lifetime, the installed
    /// [ExpirationPolicy] decides. The default is [NeverExpires].
    pub fn is_expired(&self) -> bool {
        match self.expires_in {
            Some(expires_in) => self.elapsed() >= expires_in,
            None => self.expiration_policy.is_expired(self),
        }
    }
}

fn take_required(parameters: &mut Map<String, Value>, name: Parameter) -> Result<String> {
    match parameters.remove(name.name()) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) | Some(Value::Null) | None => {
            Err(ResponseError::MissingField(name.name()).into())
        }
        Some(_) => Err(ResponseError::InvalidField(name.name()).into()),
    }
}

fn take_optional(parameters: &mut Map<String, Value>, name: Parameter) -> Result<Option<String>> {
    match parameters.remove(name.name()) {
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(ResponseError::InvalidField(name.name()).into()),
    }
}

// Some servers send `expires_in` as a string, accept both encodings.
fn parse_lifetime(value: &Value) -> Result<Duration> {
    let invalid = || Error::from(ResponseError::InvalidField(Parameter::EXPIRES_IN.name()));
    let seconds = match value {
        Value::Number(n) => n.as_f64().ok_or_else(invalid)?,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    Duration::try_from_secs_f64(seconds).map_err(|_| invalid())
}

fn lifetime_value(lifetime: Duration) -> Value {
    if lifetime.subsec_nanos() == 0 {
        return Value::from(lifetime.as_secs());
    }
    Value::from(lifetime.as_secs_f64())
}

impl PartialEq for AccessTokenResponse {
    fn eq(&self, other: &Self) -> bool {
        self.access_token == other.access_token
            && self.token_type == other.token_type
            && self.expires_in == other.expires_in
            && self.refresh_token == other.refresh_token
            && self.scope == other.scope
            && self.additional_parameters == other.additional_parameters
    }
}

impl std::fmt::Debug for AccessTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenResponse")
            .field("access_token", &"[censored]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[censored]"),
            )
            .field("scope", &self.scope)
            .field("additional_parameters", &self.additional_parameters)
            .field("created_at", &self.created_at)
            .finish()
    }
}
