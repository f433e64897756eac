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

//! The HTTP transport used to reach the token endpoint.
//!
//! The library does not make any assumptions about how requests are sent.
//! Applications provide an implementation of [Transport], or use
//! [ReqwestTransport] (enabled by the `reqwest` feature).

use crate::errors::TransportError;
use bytes::Bytes;

/// The outbound request type authorized by this crate.
pub type HttpRequest = http::Request<Bytes>;

/// The response type returned by a [Transport].
pub type HttpResponse = http::Response<Bytes>;

/// Sends a single HTTP request and returns the response.
///
/// Implementations make exactly one attempt and do not retry. Any status
/// code, including errors, is a successful transport outcome: only failures
/// to obtain a response are reported as [TransportError].
#[async_trait::async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync {
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(feature = "reqwest")]
pub use reqwest_transport::ReqwestTransport;

#[cfg(feature = "reqwest")]
mod reqwest_transport {
    use super::*;

    /// A [Transport] backed by a [reqwest::Client].
    #[derive(Clone, Debug, Default)]
    pub struct ReqwestTransport {
        inner: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Uses an existing client, for example one with custom timeouts or
        /// proxies.
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { inner: client }
        }
    }

    #[async_trait::async_trait]
    impl Transport for ReqwestTransport {
        async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let request = reqwest::Request::try_from(request).map_err(TransportError::new)?;
            let response = self
                .inner
                .execute(request)
                .await
                .map_err(TransportError::new)?;

            let mut builder = http::Response::builder()
                .status(response.status())
                .version(response.version());
            if let Some(headers) = builder.headers_mut() {
                headers.extend(
                    response
                        .headers()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
            }
            let body = response.bytes().await.map_err(TransportError::new)?;
            builder.body(body).map_err(TransportError::new)
        }
    }

}
