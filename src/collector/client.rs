//! HTTP client for the Envoy's local REST API
//!
//! The gateway serves HTTPS with a self-signed certificate, so certificate
//! verification is disabled for this client only. Requests carry the bearer
//! token from the token manager; endpoints that reject the token answer with
//! an HTML login page rather than an HTTP error, so HTML bodies are sniffed
//! and classified into typed errors.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use tracing::debug;
use url::Url;

use crate::auth::TokenManager;
use crate::error::{CollectResult, CollectorError};

/// Placeholder substituted with the configured gateway IP at request time
const ENVOY_IP_PLACEHOLDER: &str = "{envoy_ip}";

/// Async HTTP client for one Envoy gateway.
#[derive(Clone)]
pub struct EnvoyClient {
    client: Client,
    envoy_ip: String,
    tokens: Arc<TokenManager>,
}

impl EnvoyClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `envoy_ip` - Local IP address of the gateway
    /// * `timeout_ms` - Request timeout in milliseconds
    /// * `tokens` - Shared token manager for bearer injection
    pub fn new(
        envoy_ip: &str,
        timeout_ms: u64,
        tokens: Arc<TokenManager>,
    ) -> CollectResult<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(CollectorError::HttpClientInit)?;

        Ok(Self {
            client,
            envoy_ip: envoy_ip.to_string(),
            tokens,
        })
    }

    /// Substitute the `{envoy_ip}` placeholder and validate the result.
    pub fn resolve_url(&self, template: &str) -> CollectResult<Url> {
        let resolved = template.replace(ENVOY_IP_PLACEHOLDER, &self.envoy_ip);
        Url::parse(&resolved).map_err(|source| CollectorError::InvalidUrl {
            url: resolved,
            source,
        })
    }

    /// Fetch one endpoint and return its raw body.
    ///
    /// HTML bodies and empty bodies are rejected with typed errors; JSON
    /// decoding is left to the caller so parse failures can be reported per
    /// query.
    pub async fn fetch(&self, url_template: &str) -> CollectResult<String> {
        let url = self.resolve_url(url_template)?;
        debug!(url = %url, "Fetching Envoy endpoint");

        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");

        let token = self.tokens.token();
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(CollectorError::HttpRequest)?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(CollectorError::HttpResponse)?;

        if let Some(error) = classify_html_body(&body, status) {
            return Err(error);
        }

        if body.is_empty() {
            return Err(CollectorError::EmptyResponse);
        }

        Ok(body)
    }
}

/// Recognize an HTML response and extract the most useful failure cause.
fn classify_html_body(body: &str, status: u16) -> Option<CollectorError> {
    if !body.trim_start().starts_with('<') {
        return None;
    }

    if body.contains("401") || body.contains("Unauthorized") {
        Some(CollectorError::AuthenticationFailed)
    } else if body.contains("404") || body.contains("Not Found") {
        Some(CollectorError::EndpointNotFound)
    } else if body.contains("403") || body.contains("Forbidden") {
        Some(CollectorError::AccessForbidden)
    } else {
        Some(CollectorError::HtmlResponse { status })
    }
}
