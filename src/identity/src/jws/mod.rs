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

//! Verify signed tokens ([JWS] compact serialization, as used by JWTs).
//!
//! A [VerifierRegistry] holds an ordered list of [VerifierProvider]s. To
//! verify a token, the registry asks each provider, in registration order,
//! for a [SignatureVerifier] able to check it. The first verifier returned
//! performs the check, the registry itself does no cryptography.
//!
//! # Example
//! ```
//! # use identity_kit::jws::{Jwt, SignatureVerifier, VerifierRegistry};
//! # use std::sync::Arc;
//! #[derive(Debug)]
//! struct AcceptAll;
//! impl SignatureVerifier for AcceptAll {
//!     fn verify(&self, _token: &Jwt) -> identity_kit::Result<()> { Ok(()) }
//! }
//!
//! let registry = VerifierRegistry::new();
//! registry.register(|token: &Jwt| {
//!     (token.algorithm() == "HS256").then(|| Arc::new(AcceptAll) as Arc<dyn SignatureVerifier>)
//! });
//! // {"alg":"HS256"} . {} . signature
//! let token = registry.verify_str("eyJhbGciOiJIUzI1NiJ9.e30.c2ln")?;
//! assert_eq!(token.algorithm(), "HS256");
//! # Ok::<(), identity_kit::errors::Error>(())
//! ```
//!
//! [JWS]: https://datatracker.ietf.org/doc/html/rfc7515

#[cfg(feature = "jsonwebtoken")]
pub mod keys;

use crate::Result;
use crate::errors::{NoVerifierError, SignatureError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
/// The JSON objects in a token header and claims.
pub use serde_json::Map;
pub use serde_json::Value;
use std::sync::{Arc, OnceLock, RwLock};

/// A parsed, unverified, compact JWS.
#[derive(Clone, PartialEq)]
pub struct Jwt {
    raw: String,
    // Offset of the `.` separating the claims from the signature.
    signing_input_end: usize,
    algorithm: String,
    header: Map<String, Value>,
    claims: Map<String, Value>,
    signature: Vec<u8>,
}

impl Jwt {
    /// Parses `header.claims.signature`.
    ///
    /// # Errors
    /// Fails with a [malformed][SignatureError::is_malformed] error if the
    /// token does not have three base64url segments, if the header or claims
    /// are not JSON objects, or if the header has no `alg`.
    pub fn parse(token: &str) -> Result<Self> {
        let mut segments = token.split('.');
        let (Some(header), Some(claims), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(SignatureError::malformed("expected three `.`-separated segments").into());
        };

        let header = decode_object(header, "header")?;
        let claims = decode_object(claims, "claims")?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| SignatureError::malformed(format!("cannot decode the signature: {e}")))?;
        let algorithm = match header.get("alg") {
            Some(Value::String(alg)) if !alg.is_empty() => alg.clone(),
            _ => return Err(SignatureError::malformed("the header has no `alg`").into()),
        };

        Ok(Self {
            raw: token.to_string(),
            signing_input_end: token.rfind('.').unwrap_or_default(),
            algorithm,
            header,
            claims,
            signature,
        })
    }

    /// The `alg` header parameter.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// The `kid` header parameter, if present.
    pub fn key_id(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }

    pub fn header(&self) -> &Map<String, Value> {
        &self.header
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// The bytes covered by the signature: `header.claims` as encoded.
    pub fn signing_input(&self) -> &[u8] {
        self.raw[..self.signing_input_end].as_bytes()
    }

    /// The decoded signature.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// The signature as encoded in the token.
    pub fn encoded_signature(&self) -> &str {
        &self.raw[self.signing_input_end + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn decode_object(segment: &str, name: &str) -> Result<Map<String, Value>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| SignatureError::malformed(format!("cannot decode the {name}: {e}")))?;
    serde_json::from_slice::<Map<String, Value>>(&bytes).map_err(|e| {
        SignatureError::malformed(format!("the {name} is not a JSON object: {e}")).into()
    })
}

impl std::str::FromStr for Jwt {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Debug for Jwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Bearer tokens are credentials, print the metadata only.
        f.debug_struct("Jwt")
            .field("header", &self.header)
            .field("claims", &"[censored]")
            .finish_non_exhaustive()
    }
}

/// Checks the signature of a token against a specific key and algorithm.
pub trait SignatureVerifier: Send + Sync {
    /// # Errors
    /// Returns a [SignatureError][crate::errors::SignatureError] describing
    /// why the token was rejected.
    fn verify(&self, token: &Jwt) -> Result<()>;
}

impl<F> SignatureVerifier for F
where
    F: Fn(&Jwt) -> Result<()> + Send + Sync,
{
    fn verify(&self, token: &Jwt) -> Result<()> {
        self(token)
    }
}

/// Supplies a [SignatureVerifier] for the tokens it recognizes.
///
/// Providers only inspect the token metadata (for example `alg` and `kid`),
/// they never verify the signature.
pub trait VerifierProvider: Send + Sync {
    fn provide(&self, token: &Jwt) -> Option<Arc<dyn SignatureVerifier>>;
}

impl<F> VerifierProvider for F
where
    F: Fn(&Jwt) -> Option<Arc<dyn SignatureVerifier>> + Send + Sync,
{
    fn provide(&self, token: &Jwt) -> Option<Arc<dyn SignatureVerifier>> {
        self(token)
    }
}

/// An ordered list of [VerifierProvider]s.
///
/// Providers are tried in registration order and the first one that returns
/// a verifier wins. Providers are never removed.
///
/// Most applications create their own registry. [global][Self::global]
/// returns a process-wide instance for convenience.
#[derive(Default)]
pub struct VerifierRegistry {
    providers: RwLock<Vec<Arc<dyn VerifierProvider>>>,
}

impl VerifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry, initially empty.
    pub fn global() -> &'static VerifierRegistry {
        static GLOBAL: OnceLock<VerifierRegistry> = OnceLock::new();
        GLOBAL.get_or_init(VerifierRegistry::new)
    }

    /// Appends a provider.
    pub fn register<P: VerifierProvider + 'static>(&self, provider: P) {
        self.register_shared(Arc::new(provider));
    }

    pub fn register_shared(&self, provider: Arc<dyn VerifierProvider>) {
        self.providers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(provider);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn VerifierProvider>> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Returns the verifier from the first provider that recognizes `token`.
    ///
    /// # Errors
    /// Fails with [NoVerifier][crate::errors::Error::NoVerifier] if no
    /// provider recognizes the token.
    pub fn resolve(&self, token: &Jwt) -> Result<Arc<dyn SignatureVerifier>> {
        // Providers run without holding the lock, they may register more providers.
        let found = self.snapshot().iter().find_map(|p| p.provide(token));
        found.ok_or_else(|| {
            tracing::debug!(
                alg = token.algorithm(),
                kid = token.key_id(),
                "no verifier provider recognizes the token"
            );
            NoVerifierError {
                algorithm: Some(token.algorithm().to_string()),
                key_id: token.key_id().map(str::to_string),
            }
            .into()
        })
    }

    /// Verifies `token` using the first matching provider.
    ///
    /// Errors from the verifier are returned unchanged.
    pub fn verify(&self, token: &Jwt) -> Result<()> {
        self.resolve(token)?.verify(token)
    }

    /// Parses and verifies `token`, returning it on success.
    pub fn verify_str(&self, token: &str) -> Result<Jwt> {
        let token = Jwt::parse(token)?;
        self.verify(&token)?;
        Ok(token)
    }
}

impl SignatureVerifier for VerifierRegistry {
    fn verify(&self, token: &Jwt) -> Result<()> {
        VerifierRegistry::verify(self, token)
    }
}

impl std::fmt::Debug for VerifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierRegistry")
            .field("providers", &self.len())
            .finish()
    }
}
