//! reqwest-backed remote API client

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};

use super::rate_limit::{RateLimiterSet, resource_of};
use super::{RemoteApi, RemoteRequest, RemoteResponse, TokenProvider};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::queue::HttpMethod;

type Result<T> = std::result::Result<T, RemoteError>;

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// HTTP client for an arbitrary REST backend
pub struct HttpRemote {
    http: HttpClient,
    base_url: String,
    idempotency_header: Option<String>,
    tokens: Option<Arc<dyn TokenProvider>>,
    rate_limiters: RateLimiterSet,
}

impl HttpRemote {
    /// Create a client from the remote section of the engine config
    pub fn new(config: &RemoteConfig, tokens: Option<Arc<dyn TokenProvider>>) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            idempotency_header: config.idempotency_header.clone(),
            tokens,
            rate_limiters: RateLimiterSet::new(config.rate_limit_per_second),
        })
    }

    /// Resolve an endpoint against the base URL
    pub fn url_for(&self, endpoint: &str) -> Result<String> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(endpoint.to_string());
        }
        if self.base_url.is_empty() {
            return Err(RemoteError::InvalidUrl(format!(
                "relative endpoint '{}' with no remote.base_url configured",
                endpoint
            )));
        }
        Ok(format!(
            "{}/{}",
            self.base_url,
            endpoint.trim_start_matches('/')
        ))
    }

    async fn dispatch(
        &self,
        request: &RemoteRequest,
        url: &str,
        token: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut builder = self.http.request(request.method.into(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let (Some(header), Some(key)) = (&self.idempotency_header, &request.idempotency_key) {
            builder = builder.header(header.as_str(), key.as_str());
        }
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        Ok(builder.send().await?)
    }

    async fn current_token(&self) -> Option<String> {
        match &self.tokens {
            Some(tokens) => tokens.token().await,
            None => None,
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse> {
        let url = self.url_for(&request.endpoint)?;
        let resource = resource_of(&request.endpoint);

        self.rate_limiters.wait_for(&resource).await;

        let token = self.current_token().await;
        let mut response = self.dispatch(request, &url, token.as_deref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            // Try to refresh token once
            let refreshed = match &self.tokens {
                Some(tokens) => tokens.refresh().await,
                None => None,
            };
            if let Some(token) = refreshed {
                log::debug!("Token refreshed after 401, retrying {}", url);
                response = self.dispatch(request, &url, Some(&token)).await?;
            }
        }

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.rate_limiters.activate(&resource);
        }

        let body = response.bytes().await?.to_vec();
        log::debug!("{} {} -> {}", request.method, url, status.as_u16());

        Ok(RemoteResponse {
            status: status.as_u16(),
            body,
        })
    }
}
