//! Page text extraction through the Jina Reader proxy.

use async_trait::async_trait;
use reqwest::Client;

use crate::config::UpstreamConfig;
use crate::retry::{parse_retry_after, RetryPolicy, UpstreamError};

const SERVICE: &str = "jina";

/// Turns a URL into readable page text.
///
/// Implementations never fail: any error becomes an empty string.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> String;
}

/// Fetches `<base_url><url>` with a bearer token and returns the raw body.
pub struct JinaFetcher {
    client: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl JinaFetcher {
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(client: Client, upstream: &UpstreamConfig) -> Self {
        Self::new(
            client,
            upstream.jina_base_url.clone(),
            upstream.jina_api_key.clone(),
        )
        .with_retry_policy(upstream.retry.clone())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The proxy endpoint for `url`.
    pub fn proxy_url(&self, url: &str) -> String {
        format!("{}{}", self.base_url, url)
    }

    async fn try_fetch(&self, url: &str) -> Result<String, UpstreamError> {
        let response = self
            .client
            .get(self.proxy_url(url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(
                SERVICE,
                status.as_u16(),
                body,
                retry_after,
            ));
        }

        response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))
    }
}

#[async_trait]
impl PageFetcher for JinaFetcher {
    async fn fetch(&self, url: &str) -> String {
        match self.retry.run("jina fetch", || self.try_fetch(url)).await {
            Ok(text) => {
                tracing::debug!("Fetched {} ({} bytes)", url, text.len());
                text
            }
            Err(e) => {
                tracing::warn!("Fetch of {} failed: {}", url, e);
                String::new()
            }
        }
    }
}
