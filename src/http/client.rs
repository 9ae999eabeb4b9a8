use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::baremetal::errors::BaremetalError;
use crate::baremetal::types::{ApiVersion, API_VERSION_HEADER};
use crate::config::{EndpointConfig, RateLimitConfig};
use crate::observability::baremetal_metrics;

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Rate-limited HTTP client for the bare metal API.
///
/// Every request carries the auth token and the requested microversion and
/// waits for a permit from the rate limiter before it is sent.
#[derive(Debug, Clone)]
pub struct RateLimitedHttpClient {
    client: Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    base_url: Url,
}

impl RateLimitedHttpClient {
    /// Create a new rate-limited HTTP client
    pub fn new(endpoint: &EndpointConfig, rate_limit: &RateLimitConfig) -> Result<Self, BaremetalError> {
        let base_url = Url::parse(&endpoint.url).map_err(|e| {
            BaremetalError::Config(format!("invalid bare metal endpoint {:?}: {e}", endpoint.url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(BaremetalError::Config(format!(
                "bare metal endpoint {:?} cannot be used as a base URL",
                endpoint.url
            )));
        }

        let per_second = NonZeroU32::new(rate_limit.requests_per_second).ok_or_else(|| {
            BaremetalError::Config("rate_limit.requests_per_second must be positive".to_string())
        })?;
        let burst = NonZeroU32::new(rate_limit.burst_capacity).ok_or_else(|| {
            BaremetalError::Config("rate_limit.burst_capacity must be positive".to_string())
        })?;
        let rate_limiter = Arc::new(RateLimiter::direct(
            Quota::per_second(per_second).allow_burst(burst),
        ));

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = endpoint.token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(token)
                .map_err(|_| BaremetalError::Config("auth token contains invalid characters".to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTH_TOKEN_HEADER, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(endpoint.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            rate_limiter,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build a URL below the endpoint from path segments, escaping each one
    pub fn url(&self, segments: &[&str]) -> Result<Url, BaremetalError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BaremetalError::Config(format!("cannot extend endpoint {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Start a request pinned to the given microversion
    pub fn request(&self, method: Method, url: Url, version: ApiVersion) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(API_VERSION_HEADER, version.to_string())
    }

    /// Wait for a rate limit permit and send the request
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, BaremetalError> {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
            .await;

        baremetal_metrics().record_request();
        let response = request.send().await.inspect_err(|_| {
            baremetal_metrics().record_error();
        })?;
        debug!(
            status = response.status().as_u16(),
            url = %response.url(),
            "Bare metal API response"
        );
        Ok(response)
    }
}
