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

//! OAuth2 and OIDC client components.
//!
//! This crate acquires, caches, and refreshes OAuth2 access tokens, attaches
//! them to outgoing requests, and verifies signed tokens (JWTs) received from
//! an identity provider.
//!
//! Outgoing requests are authorized by a [authorizer::RequestAuthorizer].
//! The [flow::GrantFlow] authorizer manages the access token lifecycle:
//! reusing a cached token, refreshing it, or running an initial grant. The
//! token requests themselves can be authenticated by another authorizer, for
//! example [authorizer::BasicAuthorizer].
//!
//! Inbound tokens are verified by a [jws::VerifierRegistry], which resolves
//! the right [jws::SignatureVerifier] for each token.
//!
//! The HTTP [transport::Transport] and the refresh token
//! [storage::Storage] are pluggable. The `reqwest` feature (enabled by
//! default) provides a transport, and the `jsonwebtoken` feature (enabled by
//! default) provides key-based verifiers.

pub mod errors;

/// Request authorization and client authentication.
pub mod authorizer;

/// Client registration settings.
pub mod config;

pub mod flow;

/// Signed token verification.
pub mod jws;

pub mod scope;

pub mod storage;

/// Access token responses.
pub mod token;

pub mod transport;

/// A `Result` alias where the `Err` case is `identity_kit::errors::Error`.
pub type Result<T> = std::result::Result<T, crate::errors::Error>;
