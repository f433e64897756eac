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

//! Authorize outbound requests.
//!
//! A [RequestAuthorizer] takes a request and returns an authorized copy, for
//! example one with an `Authorization:` header. The input request is never
//! modified, so on failure the caller still holds the original.
//!
//! Authorizers compose. A [GrantFlow][crate::flow::GrantFlow] is itself an
//! authorizer that injects bearer tokens, and it uses a second authorizer
//! (such as [BasicAuthorizer]) to authenticate its own token requests.
//!
//! The asynchronous [RequestAuthorizer::authorize] is the primary interface.
//! [authorize_with] and [authorize_blocking] offer the same operation to
//! callback-driven and synchronous code.

use crate::Result;
use crate::errors::Error;
use crate::token::AccessTokenResponse;
use crate::transport::HttpRequest;
use base64::Engine;
use bytes::Bytes;
use http::HeaderValue;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use std::sync::Arc;

pub(crate) const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A type that authorizes HTTP requests.
#[async_trait::async_trait]
pub trait RequestAuthorizer: std::fmt::Debug + Send + Sync {
    /// Returns an authorized copy of `request`.
    async fn authorize(&self, request: &HttpRequest) -> Result<HttpRequest>;
}

#[async_trait::async_trait]
impl<T: RequestAuthorizer + ?Sized> RequestAuthorizer for Arc<T> {
    async fn authorize(&self, request: &HttpRequest) -> Result<HttpRequest> {
        self.as_ref().authorize(request).await
    }
}

#[async_trait::async_trait]
impl<T: RequestAuthorizer + ?Sized> RequestAuthorizer for Box<T> {
    async fn authorize(&self, request: &HttpRequest) -> Result<HttpRequest> {
        self.as_ref().authorize(request).await
    }
}

/// Authorizes `request` and reports the outcome to `handler`.
///
/// The authorization runs as a task on `handle`, and `handler` is invoked from
/// that task. On success the handler receives the authorized request and
/// `None`. On failure it receives the original request and the error.
pub fn authorize_with<A, F>(
    handle: &tokio::runtime::Handle,
    authorizer: Arc<A>,
    request: HttpRequest,
    handler: F,
) where
    A: RequestAuthorizer + ?Sized + 'static,
    F: FnOnce(HttpRequest, Option<Error>) + Send + 'static,
{
    handle.spawn(async move {
        match authorizer.authorize(&request).await {
            Ok(authorized) => handler(authorized, None),
            Err(e) => handler(request, Some(e)),
        }
    });
}

/// Authorizes `request`, blocking the current thread until done.
///
/// This may perform network requests. The authorization runs on `handle`
/// while the calling thread waits. Do not call this function from a thread
/// that drives the runtime behind `handle` (for example, from inside a
/// current-thread runtime): the task can never run and the call never returns.
pub fn authorize_blocking<A>(
    handle: &tokio::runtime::Handle,
    authorizer: Arc<A>,
    request: &HttpRequest,
) -> Result<HttpRequest>
where
    A: RequestAuthorizer + ?Sized + 'static,
{
    let (tx, rx) = std::sync::mpsc::sync_channel(1);
    authorize_with(handle, authorizer, request.clone(), move |r, e| {
        let _ = tx.send(match e {
            None => Ok(r),
            Some(e) => Err(e),
        });
    });
    rx.recv().map_err(|_| {
        Error::invalid_request("the authorization task ended without reporting a result")
    })?
}

/// Authorize a request using a given authorizer.
#[async_trait::async_trait]
pub trait RequestExt {
    /// Returns a copy of the request, authorized by `authorizer`.
    async fn authorized(&self, authorizer: &dyn RequestAuthorizer) -> Result<HttpRequest>;
}

#[async_trait::async_trait]
impl RequestExt for HttpRequest {
    async fn authorized(&self, authorizer: &dyn RequestAuthorizer) -> Result<HttpRequest> {
        authorizer.authorize(self).await
    }
}

/// An authorizer that returns requests unchanged.
///
/// Use it as the client authorizer for public clients.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuthorizer;

#[async_trait::async_trait]
impl RequestAuthorizer for NoAuthorizer {
    async fn authorize(&self, request: &HttpRequest) -> Result<HttpRequest> {
        Ok(request.clone())
    }
}

/// Authenticates a client using [HTTP Basic] with its id and secret.
///
/// [HTTP Basic]: https://datatracker.ietf.org/doc/html/rfc6749#section-2.3.1
#[derive(Clone)]
pub struct BasicAuthorizer {
    client_id: String,
    secret: String,
}

impl BasicAuthorizer {
    pub fn new<S: Into<String>, T: Into<String>>(client_id: S, secret: T) -> Self {
        Self {
            client_id: client_id.into(),
            secret: secret.into(),
        }
    }

    fn header_value(&self) -> Result<HeaderValue> {
        // RFC 6749 requires form-encoding both values before joining them.
        let encode =
            |s: &str| url::form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>();
        let plain = format!("{}:{}", encode(&self.client_id), encode(&self.secret));
        let encoded = base64::engine::general_purpose::STANDARD.encode(plain);
        let mut value = HeaderValue::from_str(&format!("Basic {encoded}")).map_err(|e| {
            Error::invalid_request(format!("cannot build the authentication header: {e}"))
        })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl std::fmt::Debug for BasicAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthorizer")
            .field("client_id", &self.client_id)
            .field("secret", &"[censored]")
            .finish()
    }
}

#[async_trait::async_trait]
impl RequestAuthorizer for BasicAuthorizer {
    async fn authorize(&self, request: &HttpRequest) -> Result<HttpRequest> {
        let mut authorized = request.clone();
        authorized
            .headers_mut()
            .insert(AUTHORIZATION, self.header_value()?);
        Ok(authorized)
    }
}

/// Authenticates a client by adding its id and secret to a form-encoded body.
///
/// RFC 6749 discourages this method and recommends [BasicAuthorizer], but
/// some authorization servers only support this one.
#[derive(Clone)]
pub struct ClientSecretPostAuthorizer {
    client_id: String,
    secret: Option<String>,
}

impl ClientSecretPostAuthorizer {
    pub fn new<S: Into<String>, T: Into<String>>(client_id: S, secret: T) -> Self {
        Self {
            client_id: client_id.into(),
            secret: Some(secret.into()),
        }
    }

    /// Sends only `client_id`, as public clients do.
    pub fn public<S: Into<String>>(client_id: S) -> Self {
        Self {
            client_id: client_id.into(),
            secret: None,
        }
    }
}

impl std::fmt::Debug for ClientSecretPostAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecretPostAuthorizer")
            .field("client_id", &self.client_id)
            .field("secret", &self.secret.as_ref().map(|_| "[censored]"))
            .finish()
    }
}

#[async_trait::async_trait]
impl RequestAuthorizer for ClientSecretPostAuthorizer {
    async fn authorize(&self, request: &HttpRequest) -> Result<HttpRequest> {
        let is_form = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(FORM_CONTENT_TYPE));
        if !is_form {
            return Err(Error::invalid_request(format!(
                "client credentials can only be added to `{FORM_CONTENT_TYPE}` bodies"
            )));
        }

        let mut body = String::from_utf8(request.body().to_vec())
            .map_err(|e| Error::invalid_request(format!("the request body is not UTF-8: {e}")))?;
        // The existing body is treated as a prefix, which adds `&` when needed.
        let mut serializer = url::form_urlencoded::Serializer::for_suffix(&mut body, 0);
        serializer.append_pair("client_id", &self.client_id);
        if let Some(secret) = &self.secret {
            serializer.append_pair("client_secret", secret);
        }
        serializer.finish();

        let mut authorized = request.clone();
        *authorized.body_mut() = Bytes::from(body);
        Ok(authorized)
    }
}

/// Injects an access token into requests.
#[derive(Clone, Debug)]
pub struct BearerAuthorizer {
    credential: AccessTokenResponse,
}

impl BearerAuthorizer {
    pub fn new(credential: AccessTokenResponse) -> Self {
        Self { credential }
    }
}

#[async_trait::async_trait]
impl RequestAuthorizer for BearerAuthorizer {
    async fn authorize(&self, request: &HttpRequest) -> Result<HttpRequest> {
        with_credential(request, &self.credential)
    }
}

/// Returns a copy of `request` with `Authorization: <type> <token>`.
pub(crate) fn with_credential(
    request: &HttpRequest,
    credential: &AccessTokenResponse,
) -> Result<HttpRequest> {
    let value = format!("{} {}", credential.token_type(), credential.access_token());
    let mut value = HeaderValue::from_str(&value).map_err(|e| {
        Error::invalid_request(format!("the access token is not a valid header value: {e}"))
    })?;
    value.set_sensitive(true);
    let mut authorized = request.clone();
    authorized.headers_mut().insert(AUTHORIZATION, value);
    Ok(authorized)
}

/// Applies several authorizers in order.
///
/// Each authorizer receives the output of the previous one. The first failure
/// stops the chain.
#[derive(Clone, Debug, Default)]
pub struct AuthorizerChain {
    authorizers: Vec<Arc<dyn RequestAuthorizer>>,
}

impl AuthorizerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<A: RequestAuthorizer + 'static>(mut self, authorizer: A) -> Self {
        self.authorizers.push(Arc::new(authorizer));
        self
    }

    pub fn with_shared(mut self, authorizer: Arc<dyn RequestAuthorizer>) -> Self {
        self.authorizers.push(authorizer);
        self
    }
}

#[async_trait::async_trait]
impl RequestAuthorizer for AuthorizerChain {
    async fn authorize(&self, request: &HttpRequest) -> Result<HttpRequest> {
        let mut current = request.clone();
        for authorizer in &self.authorizers {
            current = authorizer.authorize(&current).await?;
        }
        Ok(current)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use http::header::HeaderName;

    type TestResult = anyhow::Result<()>;

    mockall::mock! {
        #[derive(Debug)]
        pub RequestAuthorizer { }

        #[async_trait::async_trait]
        impl RequestAuthorizer for RequestAuthorizer {
            async fn authorize(&self, request: &HttpRequest) -> Result<HttpRequest>;
        }
    }

    pub(crate) fn form_request(body: &'static str) -> HttpRequest {
        http::Request::builder()
            .method(http::Method::POST)
            .uri("https://example.com/token")
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap()
    }

    fn header<'a>(request: &'a HttpRequest, name: &HeaderName) -> Option<&'a str> {
        request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn no_authorizer() -> TestResult {
        let request = form_request("a=b");
        let got = NoAuthorizer.authorize(&request).await?;
        assert_eq!(got.headers(), request.headers());
        assert_eq!(got.body(), request.body());
        Ok(())
    }

    #[tokio::test]
    async fn basic() -> TestResult {
        let request = form_request("grant_type=password");
        let got = BasicAuthorizer::new("client_id", "supersecret")
            .authorize(&request)
            .await?;
        assert_eq!(
            header(&got, &AUTHORIZATION),
            Some("Basic Y2xpZW50X2lkOnN1cGVyc2VjcmV0")
        );
        assert!(got.headers()[AUTHORIZATION].is_sensitive());
        // The input is not modified.
        assert!(request.headers().get(AUTHORIZATION).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn basic_encodes_reserved_characters() -> TestResult {
        let got = BasicAuthorizer::new("my client", "p@ss:word")
            .authorize(&form_request(""))
            .await?;
        let value = header(&got, &AUTHORIZATION).unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(value.trim_start_matches("Basic "))?;
        assert_eq!(String::from_utf8(decoded)?, "my+client:p%40ss%3Aword");
        Ok(())
    }

    #[test]
    fn basic_debug() {
        let fmt = format!("{:?}", BasicAuthorizer::new("client-test-only", "secret-test-only"));
        assert!(fmt.contains("client-test-only"), "{fmt}");
        assert!(!fmt.contains("secret-test-only"), "{fmt}");
    }

    #[tokio::test]
    async fn client_secret_post() -> TestResult {
        let request = form_request("grant_type=client_credentials");
        let got = ClientSecretPostAuthorizer::new("id", "s3cr3t&more")
            .authorize(&request)
            .await?;
        assert_eq!(
            got.body().as_ref(),
            b"grant_type=client_credentials&client_id=id&client_secret=s3cr3t%26more"
        );
        assert_eq!(request.body().as_ref(), b"grant_type=client_credentials");
        Ok(())
    }

    #[tokio::test]
    async fn client_secret_post_empty_body() -> TestResult {
        let got = ClientSecretPostAuthorizer::public("id")
            .authorize(&form_request(""))
            .await?;
        assert_eq!(got.body().as_ref(), b"client_id=id");
        Ok(())
    }

    #[tokio::test]
    async fn client_secret_post_requires_form() -> TestResult {
        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri("https://example.com/token")
            .header(CONTENT_TYPE, "application/json")
            .body(Bytes::from_static(b"{}"))?;
        let e = ClientSecretPostAuthorizer::new("id", "secret")
            .authorize(&request)
            .await
            .unwrap_err();
        assert!(matches!(e, Error::InvalidRequest(_)), "{e:?}");
        Ok(())
    }

    #[tokio::test]
    async fn bearer() -> TestResult {
        let credential = AccessTokenResponse::new("abc", "Bearer", None, None, None)?;
        let got = BearerAuthorizer::new(credential)
            .authorize(&form_request(""))
            .await?;
        assert_eq!(header(&got, &AUTHORIZATION), Some("Bearer abc"));
        assert!(got.headers()[AUTHORIZATION].is_sensitive());
        Ok(())
    }

    #[tokio::test]
    async fn bearer_invalid_header() -> TestResult {
        let credential = AccessTokenResponse::new("abc\ndef", "Bearer", None, None, None)?;
        let e = BearerAuthorizer::new(credential)
            .authorize(&form_request(""))
            .await
            .unwrap_err();
        assert!(matches!(e, Error::InvalidRequest(_)), "{e:?}");
        Ok(())
    }

    #[tokio::test]
    async fn chain_applies_in_order() -> TestResult {
        let credential = AccessTokenResponse::new("abc", "Bearer", None, None, None)?;
        let chain = AuthorizerChain::new()
            .with(ClientSecretPostAuthorizer::public("id"))
            .with(BasicAuthorizer::new("client_id", "supersecret"))
            .with(BearerAuthorizer::new(credential));
        let got = chain.authorize(&form_request("a=b")).await?;
        // The last authorizer wins for the same header.
        assert_eq!(header(&got, &AUTHORIZATION), Some("Bearer abc"));
        assert_eq!(got.body().as_ref(), b"a=b&client_id=id");
        Ok(())
    }

    #[tokio::test]
    async fn chain_stops_on_failure() -> TestResult {
        let mut failing = MockRequestAuthorizer::new();
        failing
            .expect_authorize()
            .times(1)
            .returning(|_| Err(Error::invalid_request("test-only")));
        let mut never = MockRequestAuthorizer::new();
        never.expect_authorize().never();

        let chain = AuthorizerChain::new().with(failing).with(never);
        let e = chain.authorize(&form_request("")).await.unwrap_err();
        assert!(e.to_string().contains("test-only"), "{e}");
        Ok(())
    }

    #[tokio::test]
    async fn request_ext() -> TestResult {
        let request = form_request("");
        let got = request
            .authorized(&BasicAuthorizer::new("client_id", "supersecret"))
            .await?;
        assert!(got.headers().contains_key(AUTHORIZATION));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn callback_success() -> TestResult {
        let (tx, rx) = tokio::sync::oneshot::channel();
        authorize_with(
            &tokio::runtime::Handle::current(),
            Arc::new(BasicAuthorizer::new("client_id", "supersecret")),
            form_request(""),
            move |request, error| {
                let _ = tx.send((request, error));
            },
        );
        let (request, error) = rx.await?;
        assert!(error.is_none(), "{error:?}");
        assert!(request.headers().contains_key(AUTHORIZATION));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn callback_failure_returns_original() -> TestResult {
        let mut mock = MockRequestAuthorizer::new();
        mock.expect_authorize()
            .returning(|_| Err(Error::invalid_request("test-only")));
        let (tx, rx) = tokio::sync::oneshot::channel();
        authorize_with(
            &tokio::runtime::Handle::current(),
            Arc::new(mock),
            form_request("original"),
            move |request, error| {
                let _ = tx.send((request, error));
            },
        );
        let (request, error) = rx.await?;
        assert!(error.is_some());
        assert_eq!(request.body().as_ref(), b"original");
        Ok(())
    }

    #[test]
    fn blocking() -> TestResult {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        let request = form_request("");
        let got = authorize_blocking(
            runtime.handle(),
            Arc::new(BasicAuthorizer::new("client_id", "supersecret")),
            &request,
        )?;
        assert!(got.headers().contains_key(AUTHORIZATION));

        let mut mock = MockRequestAuthorizer::new();
        mock.expect_authorize()
            .returning(|_| Err(Error::invalid_request("test-only")));
        let e = authorize_blocking(runtime.handle(), Arc::new(mock), &request).unwrap_err();
        assert!(matches!(e, Error::InvalidRequest(_)), "{e:?}");
        Ok(())
    }
}
