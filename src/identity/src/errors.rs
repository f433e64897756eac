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

//! Errors returned by the token lifecycle and verifier resolution.
//!
//! Every failure reported by this crate is an [Error]. The variants are the
//! categories applications care about when deciding what to do next:
//!
//! * [Error::Transport]: the HTTP transport could not complete the request.
//!   Future attempts may succeed.
//! * [Error::Protocol]: the authorization server returned a [RFC 6749]
//!   error response, such as `invalid_grant`.
//! * [Error::InvalidResponse]: the token endpoint replied with something that
//!   is not a valid access token response.
//! * [Error::NoVerifier]: no registered provider can verify a token.
//! * [Error::Signature]: the matched verifier rejected a token.
//!
//! [RFC 6749]: https://datatracker.ietf.org/doc/html/rfc6749#section-5.2

use http::StatusCode;
use std::error::Error as StdError;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

type BoxError = Arc<dyn StdError + Send + Sync + 'static>;

/// The error type for all operations in this crate.
///
/// The type is `Clone` so the outcome of a single token request can be shared
/// with every caller waiting on it.
#[derive(thiserror::Error, Clone, Debug)]
pub enum Error {
    /// The transport collaborator reported an error.
    #[error("the token request could not be sent, but future attempts may succeed: {0}")]
    Transport(#[source] TransportError),

    /// The server returned a recognized OAuth2 error response.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server response is not a valid access token response.
    #[error("invalid access token response: {0}")]
    InvalidResponse(#[from] ResponseError),

    /// The credentials source could not supply the secret material for a grant.
    #[error("cannot obtain credentials for the grant: {0}")]
    CredentialSource(#[source] BoxError),

    /// The persistent storage collaborator failed.
    #[error("cannot access the refresh token storage: {0}")]
    Storage(#[source] BoxError),

    /// The request could not be built or authorized locally.
    #[error("cannot authorize the request: {0}")]
    InvalidRequest(String),

    /// No registered provider can produce a verifier for the token.
    #[error(transparent)]
    NoVerifier(#[from] NoVerifierError),

    /// A verifier rejected the token.
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

impl Error {
    /// Creates a transport error from any error type.
    pub fn transport<T>(source: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        Error::Transport(TransportError::new(source))
    }

    /// Creates a credentials source error from any error type.
    pub fn credential_source<T>(source: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        Error::CredentialSource(Arc::new(source))
    }

    /// Creates a storage error from any error type.
    pub fn storage<T>(source: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        Error::Storage(Arc::new(source))
    }

    pub(crate) fn invalid_request<T: Into<String>>(message: T) -> Self {
        Error::InvalidRequest(message.into())
    }

    /// The transport could not complete the request.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// The authorization server returned an OAuth2 error response.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// The token endpoint response could not be parsed or validated.
    pub fn is_invalid_response(&self) -> bool {
        matches!(self, Error::InvalidResponse(_))
    }

    /// No verifier provider matched the token.
    pub fn is_no_verifier(&self) -> bool {
        matches!(self, Error::NoVerifier(_))
    }

    /// A verifier rejected the token.
    pub fn is_signature(&self) -> bool {
        matches!(self, Error::Signature(_))
    }

    /// Returns the OAuth2 error details, if this is a protocol error.
    pub fn protocol(&self) -> Option<&ProtocolError> {
        match self {
            Error::Protocol(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` if repeating the whole authorization may succeed.
    ///
    /// The library never retries on its own. Applications should use
    /// [Exponential backoff] in their retry loops.
    ///
    /// [Exponential backoff]: https://en.wikipedia.org/wiki/Exponential_backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::InvalidResponse(ResponseError::Status { status, .. }) => is_retryable(*status),
            Error::Storage(_) => true,
            _ => false,
        }
    }
}

/// Wraps the error reported by a [Transport][crate::transport::Transport].
#[derive(Clone)]
pub struct TransportError(BoxError);

impl TransportError {
    pub fn new<T>(source: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(source))
    }
}

impl Debug for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.0.as_ref())
    }
}

/// An error code defined by [RFC 6749 section 5.2].
///
/// [RFC 6749 section 5.2]: https://datatracker.ietf.org/doc/html/rfc6749#section-5.2
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
    /// A code not defined by RFC 6749, such as an extension error.
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::InvalidClient => "invalid_client",
            ErrorCode::InvalidGrant => "invalid_grant",
            ErrorCode::UnauthorizedClient => "unauthorized_client",
            ErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            ErrorCode::InvalidScope => "invalid_scope",
            ErrorCode::Other(code) => code,
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(value: &str) -> Self {
        match value {
            "invalid_request" => ErrorCode::InvalidRequest,
            "invalid_client" => ErrorCode::InvalidClient,
            "invalid_grant" => ErrorCode::InvalidGrant,
            "unauthorized_client" => ErrorCode::UnauthorizedClient,
            "unsupported_grant_type" => ErrorCode::UnsupportedGrantType,
            "invalid_scope" => ErrorCode::InvalidScope,
            other => ErrorCode::Other(other.to_string()),
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An OAuth2 error response returned by the authorization server.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolError {
    code: ErrorCode,
    description: Option<String>,
    uri: Option<String>,
    status: Option<StatusCode>,
}

impl ProtocolError {
    pub fn new<C: Into<ErrorCode>>(code: C) -> Self {
        Self {
            code: code.into(),
            description: None,
            uri: None,
            status: None,
        }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_uri<S: Into<String>>(mut self, uri: S) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Recognizes the standard error response shape in a JSON object.
    ///
    /// Returns `None` unless the object has a string `error` member.
    pub fn from_parameters(
        parameters: &serde_json::Map<String, serde_json::Value>,
    ) -> Option<Self> {
        let code = parameters.get("error")?.as_str()?;
        let text = |name: &str| {
            parameters
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Some(Self {
            code: ErrorCode::from(code),
            description: text("error_description"),
            uri: text("error_uri"),
            status: None,
        })
    }

    /// The `error` code.
    pub fn code(&self) -> &ErrorCode {
        &self.code
    }

    /// The `error_description`, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The `error_uri`, if any.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// The HTTP status of the response carrying the error, if known.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "the authorization server returned `{}`", self.code)?;
        if let Some(description) = &self.description {
            write!(f, ": {description}")?;
        }
        if let Some(uri) = &self.uri {
            write!(f, " (see {uri})")?;
        }
        Ok(())
    }
}

impl StdError for ProtocolError {}

/// The reasons a token endpoint response is rejected.
#[derive(thiserror::Error, Clone, Debug)]
pub enum ResponseError {
    /// A non-2xx status without a recognized error body.
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: StatusCode, body: String },
    /// The body is not a JSON object.
    #[error("cannot parse the response body: {0}")]
    Malformed(#[source] BoxError),
    /// A required parameter is missing or empty.
    #[error("the `{0}` parameter is missing")]
    MissingField(&'static str),
    /// A parameter has the wrong type.
    #[error("the `{0}` parameter has an invalid value")]
    InvalidField(&'static str),
}

impl ResponseError {
    pub(crate) fn malformed<T>(source: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        ResponseError::Malformed(Arc::new(source))
    }
}

/// No registered provider could produce a verifier for a token.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
#[error("no verifier available for token with alg={algorithm:?} kid={key_id:?}")]
pub struct NoVerifierError {
    /// The `alg` header of the token, if present.
    pub algorithm: Option<String>,
    /// The `kid` header of the token, if present.
    pub key_id: Option<String>,
}

/// The error type for signature verifier failures.
#[derive(thiserror::Error, Clone, Debug)]
#[error(transparent)]
pub struct SignatureError(SignatureErrorKind);

impl SignatureError {
    /// The token is not a well-formed compact JWS.
    pub fn is_malformed(&self) -> bool {
        matches!(self.0, SignatureErrorKind::Malformed(_))
    }

    /// The signature does not match, or the key cannot verify this token.
    pub fn is_untrusted_signer(&self) -> bool {
        matches!(
            self.0,
            SignatureErrorKind::UntrustedSigner(_) | SignatureErrorKind::UnsupportedAlgorithm(_)
        )
    }

    /// The token is expired, not yet valid, or a claim is invalid.
    pub fn is_invalid_claims(&self) -> bool {
        matches!(
            self.0,
            SignatureErrorKind::Expired
                | SignatureErrorKind::NotYetValid
                | SignatureErrorKind::InvalidClaim(_, _)
        )
    }

    /// The token expired.
    pub fn is_expired(&self) -> bool {
        matches!(self.0, SignatureErrorKind::Expired)
    }

    pub fn malformed<T: Into<String>>(message: T) -> Self {
        Self(SignatureErrorKind::Malformed(message.into()))
    }

    pub fn unsupported_algorithm<T: Into<String>>(algorithm: T) -> Self {
        Self(SignatureErrorKind::UnsupportedAlgorithm(algorithm.into()))
    }

    pub fn untrusted_signer<T: Into<String>>(message: T) -> Self {
        Self(SignatureErrorKind::UntrustedSigner(message.into()))
    }

    pub fn expired() -> Self {
        Self(SignatureErrorKind::Expired)
    }

    pub fn not_yet_valid() -> Self {
        Self(SignatureErrorKind::NotYetValid)
    }

    pub fn invalid_claim<S: Into<String>, T: Into<String>>(claim: S, message: T) -> Self {
        Self(SignatureErrorKind::InvalidClaim(claim.into(), message.into()))
    }

    /// The cryptographic backend failed for reasons unrelated to the token.
    pub fn backend<T>(source: T) -> Self
    where
        T: StdError + Send + Sync + 'static,
    {
        Self(SignatureErrorKind::Backend(Arc::new(source)))
    }
}

#[derive(thiserror::Error, Clone, Debug)]
enum SignatureErrorKind {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("unsupported signing algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    #[error("untrusted signer: {0}")]
    UntrustedSigner(String),
    #[error("the token has expired")]
    Expired,
    #[error("the token is not valid yet")]
    NotYetValid,
    #[error("the `{0}` claim is invalid: {1}")]
    InvalidClaim(String, String),
    #[error("signature backend failure: {0}")]
    Backend(#[source] BoxError),
}

pub(crate) fn is_retryable(c: StatusCode) -> bool {
    match c {
        // Internal server errors do not indicate that there is anything wrong
        // with our request, so we retry them.
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(StatusCode::INTERNAL_SERVER_ERROR)]
    #[test_case(StatusCode::SERVICE_UNAVAILABLE)]
    #[test_case(StatusCode::REQUEST_TIMEOUT)]
    #[test_case(StatusCode::TOO_MANY_REQUESTS)]
    fn retryable(c: StatusCode) {
        assert!(is_retryable(c));
        let e = Error::from(ResponseError::Status {
            status: c,
            body: String::new(),
        });
        assert!(e.is_retryable(), "{e}");
    }

    #[test_case(StatusCode::NOT_FOUND)]
    #[test_case(StatusCode::UNAUTHORIZED)]
    #[test_case(StatusCode::BAD_REQUEST)]
    #[test_case(StatusCode::BAD_GATEWAY)]
    fn non_retryable(c: StatusCode) {
        assert!(!is_retryable(c));
    }

    #[test_case("invalid_request", ErrorCode::InvalidRequest)]
    #[test_case("invalid_client", ErrorCode::InvalidClient)]
    #[test_case("invalid_grant", ErrorCode::InvalidGrant)]
    #[test_case("unauthorized_client", ErrorCode::UnauthorizedClient)]
    #[test_case("unsupported_grant_type", ErrorCode::UnsupportedGrantType)]
    #[test_case("invalid_scope", ErrorCode::InvalidScope)]
    #[test_case("slow_down", ErrorCode::Other("slow_down".into()))]
    fn error_code(input: &str, want: ErrorCode) {
        let got = ErrorCode::from(input);
        assert_eq!(got, want);
        assert_eq!(got.as_str(), input);
    }

    #[test]
    fn protocol_from_parameters() {
        let json = serde_json::json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked",
            "error_uri": "https://example.com/errors/invalid_grant",
        });
        let got = ProtocolError::from_parameters(json.as_object().unwrap()).unwrap();
        assert_eq!(got.code(), &ErrorCode::InvalidGrant);
        assert_eq!(got.description(), Some("refresh token revoked"));
        assert_eq!(got.uri(), Some("https://example.com/errors/invalid_grant"));
        assert_eq!(got.status(), None);

        let fmt = got.to_string();
        assert!(fmt.contains("invalid_grant"), "{fmt}");
        assert!(fmt.contains("refresh token revoked"), "{fmt}");
    }

    #[test]
    fn protocol_from_parameters_not_an_error() {
        let json = serde_json::json!({"access_token": "abc", "token_type": "Bearer"});
        assert!(ProtocolError::from_parameters(json.as_object().unwrap()).is_none());
        let json = serde_json::json!({"error": 42});
        assert!(ProtocolError::from_parameters(json.as_object().unwrap()).is_none());
    }

    #[test]
    fn predicates() {
        let e = Error::transport(std::io::Error::other("connection reset"));
        assert!(e.is_transport() && e.is_retryable(), "{e:?}");
        assert!(e.to_string().contains("future attempts may succeed"), "{e}");

        let e = Error::from(ProtocolError::new("invalid_client"));
        assert!(e.is_protocol() && !e.is_retryable(), "{e:?}");
        assert_eq!(e.protocol().map(|p| p.code()), Some(&ErrorCode::InvalidClient));

        let e = Error::from(ResponseError::MissingField("access_token"));
        assert!(e.is_invalid_response() && !e.is_retryable(), "{e:?}");
        assert!(e.protocol().is_none());

        let e = Error::from(NoVerifierError {
            algorithm: Some("RS256".into()),
            key_id: None,
        });
        assert!(e.is_no_verifier() && !e.is_retryable(), "{e:?}");

        let e = Error::from(SignatureError::expired());
        assert!(e.is_signature() && !e.is_retryable(), "{e:?}");
    }

    #[test]
    fn signature_kinds() {
        assert!(SignatureError::malformed("x").is_malformed());
        assert!(SignatureError::untrusted_signer("x").is_untrusted_signer());
        assert!(SignatureError::unsupported_algorithm("none").is_untrusted_signer());
        assert!(SignatureError::expired().is_invalid_claims());
        assert!(SignatureError::not_yet_valid().is_invalid_claims());
        assert!(SignatureError::invalid_claim("aud", "mismatch").is_invalid_claims());

        let e = SignatureError::backend(std::io::Error::other("hsm offline"));
        assert!(!e.is_malformed() && !e.is_untrusted_signer() && !e.is_invalid_claims());
        assert!(e.to_string().contains("hsm offline"), "{e}");
    }

    #[test]
    fn transport_source() {
        let e = Error::transport(std::io::Error::other("test-only-err-123"));
        let source = e.source().and_then(|s| s.source()).unwrap();
        assert!(source.to_string().contains("test-only-err-123"), "{source}");
    }
}
