//! Transport used by the cache strategies and the replay queue.
//!
//! `Transport::fetch` resolves for any HTTP status a server returns; it only
//! fails when the server could not be reached. Interpreting the status is
//! left to the caller, the same contract the page's own fetches follow.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::{debug, warn};
use url::Url;

use super::types::{Request, Response, ResponseType};
use crate::error::FetchError;

/// HTTP request timeout in seconds. Slower requests count as unreachable.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Timeout for the lightweight reachability probe.
const PROBE_TIMEOUT_SECS: u64 = 5;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    origin: Url,
}

impl HttpTransport {
    pub fn new(origin: Url) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client, origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Cheap reachability check against the origin. Any HTTP answer counts
    /// as online; only a transport failure counts as offline.
    pub async fn probe(&self) -> bool {
        match self
            .client
            .head(self.origin.clone())
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(response) => {
                debug!(status = response.status().as_u16(), "Connectivity probe answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }

    fn classify(&self, request: &Request, headers: &header::HeaderMap) -> ResponseType {
        if request.is_same_origin(&self.origin) {
            ResponseType::Basic
        } else if headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN) {
            ResponseType::Cors
        } else {
            ResponseType::Opaque
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            warn!(url = %request.url, error = %e, "Request failed before a response arrived");
            FetchError::Transport(e)
        })?;

        let status = response.status().as_u16();
        let response_type = self.classify(request, response.headers());
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let url = response.url().to_string();
        let body = response.bytes().await?.to_vec();

        debug!(url = %url, status, ?response_type, bytes = body.len(), "Fetched");

        Ok(Response {
            url,
            status,
            headers,
            body,
            response_type,
        })
    }
}
