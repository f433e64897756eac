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

//! Verifiers backed by [jsonwebtoken] keys.

use super::{Jwt, SignatureVerifier, Value, VerifierProvider};
use crate::Result;
use crate::errors::SignatureError;
pub use jsonwebtoken::{Algorithm, DecodingKey};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Verifies tokens signed with one key and algorithm.
///
/// Optionally, it also rejects tokens whose `exp` has passed or whose `nbf`
/// is in the future.
#[derive(Clone)]
pub struct KeyVerifier {
    algorithm: Algorithm,
    key: DecodingKey,
    // `None` disables the time-based claim checks.
    leeway: Option<Duration>,
}

impl KeyVerifier {
    pub fn new(algorithm: Algorithm, key: DecodingKey) -> Self {
        Self {
            algorithm,
            key,
            leeway: None,
        }
    }

    /// Validates `exp` and `nbf`, allowing `leeway` of clock skew.
    pub fn with_time_validation(mut self, leeway: Duration) -> Self {
        self.leeway = Some(leeway);
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn accepts(&self, token: &Jwt) -> bool {
        token
            .algorithm()
            .parse::<Algorithm>()
            .is_ok_and(|a| a == self.algorithm)
    }

    fn validate_time(&self, token: &Jwt, leeway: Duration) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let leeway = leeway.as_secs_f64();
        if let Some(exp) = numeric_date(token, "exp")? {
            if now >= exp + leeway {
                return Err(SignatureError::expired().into());
            }
        }
        if let Some(nbf) = numeric_date(token, "nbf")? {
            if now + leeway < nbf {
                return Err(SignatureError::not_yet_valid().into());
            }
        }
        Ok(())
    }
}

fn numeric_date(token: &Jwt, claim: &'static str) -> Result<Option<f64>> {
    match token.claims().get(claim) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| SignatureError::invalid_claim(claim, "not a valid NumericDate").into()),
        Some(_) => Err(SignatureError::invalid_claim(claim, "expected a number").into()),
    }
}

impl SignatureVerifier for KeyVerifier {
    fn verify(&self, token: &Jwt) -> Result<()> {
        // The key decides the algorithm, whatever the token header claims.
        if !self.accepts(token) {
            return Err(SignatureError::unsupported_algorithm(token.algorithm()).into());
        }
        let valid = jsonwebtoken::crypto::verify(
            token.encoded_signature(),
            token.signing_input(),
            &self.key,
            self.algorithm,
        )
        .map_err(|e| {
            if matches!(e.kind(), jsonwebtoken::errors::ErrorKind::Base64(_)) {
                SignatureError::malformed(format!("cannot decode the signature: {e}"))
            } else {
                SignatureError::backend(e)
            }
        })?;
        if !valid {
            return Err(
                SignatureError::untrusted_signer("the signature does not match the key").into(),
            );
        }
        match self.leeway {
            Some(leeway) => self.validate_time(token, leeway),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for KeyVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVerifier")
            .field("algorithm", &self.algorithm)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

/// Provides a [KeyVerifier] for tokens with its algorithm and, optionally,
/// a given `kid`.
#[derive(Clone, Debug)]
pub struct KeyProvider {
    key_id: Option<String>,
    verifier: Arc<KeyVerifier>,
}

impl KeyProvider {
    pub fn new(verifier: KeyVerifier) -> Self {
        Self {
            key_id: None,
            verifier: Arc::new(verifier),
        }
    }

    /// Only match tokens with this `kid` header.
    pub fn with_key_id<S: Into<String>>(mut self, key_id: S) -> Self {
        self.key_id = Some(key_id.into());
        self
    }
}

impl VerifierProvider for KeyProvider {
    fn provide(&self, token: &Jwt) -> Option<Arc<dyn SignatureVerifier>> {
        if !self.verifier.accepts(token) {
            return None;
        }
        if self.key_id.is_some() && self.key_id.as_deref() != token.key_id() {
            return None;
        }
        Some(self.verifier.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::jws::VerifierRegistry;
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;

    type TestResult = anyhow::Result<()>;

    const SECRET: &[u8] = b"test-only-secret-with-enough-bytes";

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn sign(kid: Option<&str>, claims: Value) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    fn verifier() -> KeyVerifier {
        KeyVerifier::new(Algorithm::HS256, DecodingKey::from_secret(SECRET))
    }

    fn signature_error(e: Error) -> SignatureError {
        match e {
            Error::Signature(s) => s,
            e => panic!("unexpected error {e:?}"),
        }
    }

    #[test]
    fn valid_signature() -> TestResult {
        let token = Jwt::parse(&sign(None, json!({"sub": "alice"})))?;
        verifier().verify(&token)?;
        Ok(())
    }

    #[test]
    fn wrong_key() -> TestResult {
        let token = Jwt::parse(&sign(None, json!({"sub": "alice"})))?;
        let other = KeyVerifier::new(
            Algorithm::HS256,
            DecodingKey::from_secret(b"another-test-only-secret-with-enough-bytes"),
        );
        let e = signature_error(other.verify(&token).unwrap_err());
        assert!(e.is_untrusted_signer(), "{e:?}");
        Ok(())
    }

    #[test]
    fn tampered_claims() -> TestResult {
        let raw = sign(None, json!({"sub": "alice"}));
        let (_, rest) = raw.split_once('.').unwrap();
        let (_, signature) = rest.split_once('.').unwrap();
        let forged = crate::jws::tests::encode(
            json!({"alg": "HS256", "typ": "JWT"}),
            json!({"sub": "mallory"}),
            &[],
        );
        let forged = format!("{}.{signature}", forged.trim_end_matches('.'));
        let e = signature_error(verifier().verify(&Jwt::parse(&forged)?).unwrap_err());
        assert!(e.is_untrusted_signer(), "{e:?}");
        Ok(())
    }

    #[test]
    fn algorithm_mismatch() -> TestResult {
        let token = Jwt::parse(&crate::jws::tests::encode(
            json!({"alg": "HS384"}),
            json!({}),
            b"sig",
        ))?;
        let e = signature_error(verifier().verify(&token).unwrap_err());
        assert!(e.is_untrusted_signer(), "{e:?}");
        assert!(KeyProvider::new(verifier()).provide(&token).is_none());
        Ok(())
    }

    #[test]
    fn expired() -> TestResult {
        let token = Jwt::parse(&sign(None, json!({"exp": now() - 120})))?;
        // Without time validation only the signature is checked.
        verifier().verify(&token)?;

        let e = signature_error(
            verifier()
                .with_time_validation(Duration::from_secs(10))
                .verify(&token)
                .unwrap_err(),
        );
        assert!(e.is_expired(), "{e:?}");
        assert!(e.is_invalid_claims(), "{e:?}");

        verifier()
            .with_time_validation(Duration::from_secs(300))
            .verify(&token)?;
        Ok(())
    }

    #[test]
    fn not_yet_valid() -> TestResult {
        let token = Jwt::parse(&sign(None, json!({"nbf": now() + 3600, "exp": now() + 7200})))?;
        let e = signature_error(
            verifier()
                .with_time_validation(Duration::from_secs(10))
                .verify(&token)
                .unwrap_err(),
        );
        assert!(e.is_invalid_claims(), "{e:?}");
        assert!(!e.is_expired(), "{e:?}");
        Ok(())
    }

    #[test]
    fn invalid_exp() -> TestResult {
        let token = Jwt::parse(&sign(None, json!({"exp": "tomorrow"})))?;
        let e = signature_error(
            verifier()
                .with_time_validation(Duration::ZERO)
                .verify(&token)
                .unwrap_err(),
        );
        assert!(e.is_invalid_claims(), "{e:?}");
        Ok(())
    }

    #[test]
    fn provider_matches_key_id() -> TestResult {
        let provider = KeyProvider::new(verifier()).with_key_id("k1");
        assert!(provider.provide(&Jwt::parse(&sign(Some("k1"), json!({})))?).is_some());
        assert!(provider.provide(&Jwt::parse(&sign(Some("k2"), json!({})))?).is_none());
        assert!(provider.provide(&Jwt::parse(&sign(None, json!({})))?).is_none());

        let any = KeyProvider::new(verifier());
        assert!(any.provide(&Jwt::parse(&sign(Some("k2"), json!({})))?).is_some());
        Ok(())
    }

    #[test]
    fn registry_with_keys() -> TestResult {
        let registry = VerifierRegistry::new();
        registry.register(
            KeyProvider::new(KeyVerifier::new(
                Algorithm::HS256,
                DecodingKey::from_secret(b"old-test-only-secret-with-enough-bytes"),
            ))
            .with_key_id("old"),
        );
        registry.register(KeyProvider::new(verifier()).with_key_id("current"));

        let token = registry.verify_str(&sign(Some("current"), json!({"sub": "alice"})))?;
        assert_eq!(token.claims().get("sub"), Some(&json!("alice")));

        // Resolved by `kid` to the old key, which rejects the signature.
        let e = registry
            .verify_str(&sign(Some("old"), json!({})))
            .unwrap_err();
        assert!(signature_error(e).is_untrusted_signer());

        let e = registry
            .verify_str(&sign(Some("unknown"), json!({})))
            .unwrap_err();
        assert!(e.is_no_verifier(), "{e:?}");
        Ok(())
    }
}
