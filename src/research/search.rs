//! Web search: query string in, ordered result URLs out.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::UpstreamConfig;
use crate::retry::{parse_retry_after, RetryPolicy, UpstreamError};

const SERVICE: &str = "serpapi";

/// Source of result URLs for a search query.
///
/// Implementations never fail: any error becomes an empty list.
#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str) -> Vec<String>;
}

/// SerpAPI search response (only the fields we read).
#[derive(Debug, Deserialize)]
struct SerpApiResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    link: Option<String>,
}

/// Search via SerpAPI (`engine=google` by default).
pub struct SerpApiSearcher {
    client: Client,
    endpoint: String,
    api_key: String,
    engine: String,
    retry: RetryPolicy,
}

impl SerpApiSearcher {
    pub fn new(client: Client, endpoint: String, api_key: String, engine: String) -> Self {
        Self {
            client,
            endpoint,
            api_key,
            engine,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(client: Client, upstream: &UpstreamConfig) -> Self {
        Self::new(
            client,
            upstream.serpapi_url.clone(),
            upstream.serpapi_api_key.clone(),
            upstream.search_engine.clone(),
        )
        .with_retry_policy(upstream.retry.clone())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn try_search(&self, query: &str) -> Result<Vec<String>, UpstreamError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("api_key", self.api_key.as_str()),
                ("engine", self.engine.as_str()),
            ])
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

        let parsed: SerpApiResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        Ok(links(parsed))
    }
}

fn links(response: SerpApiResponse) -> Vec<String> {
    response
        .organic_results
        .into_iter()
        .filter_map(|result| result.link)
        .collect()
}

#[async_trait]
impl WebSearcher for SerpApiSearcher {
    async fn search(&self, query: &str) -> Vec<String> {
        match self.retry.run("serpapi search", || self.try_search(query)).await {
            Ok(links) => {
                tracing::debug!("Search for {:?} returned {} links", query, links.len());
                links
            }
            Err(e) => {
                tracing::warn!("Search for {:?} failed: {}", query, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/search", addr)
    }

    fn searcher(endpoint: String) -> SerpApiSearcher {
        SerpApiSearcher::new(Client::new(), endpoint, "key".into(), "google".into())
            .with_retry_policy(RetryPolicy::none())
    }

    #[test]
    fn test_links_skip_results_without_link() {
        let parsed: SerpApiResponse = serde_json::from_value(json!({
            "organic_results": [
                {"link": "https://a.example", "title": "A"},
                {"title": "no link"},
                {"link": "https://b.example"}
            ]
        }))
        .unwrap();
        assert_eq!(links(parsed), vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn test_missing_organic_results_is_empty() {
        let parsed: SerpApiResponse = serde_json::from_value(json!({"error": "none"})).unwrap();
        assert!(links(parsed).is_empty());
    }

    #[tokio::test]
    async fn test_search_sends_fixed_parameters() {
        let app = Router::new().route(
            "/search",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("engine").map(String::as_str), Some("google"));
                assert_eq!(params.get("api_key").map(String::as_str), Some("key"));
                let q = params.get("q").cloned().unwrap_or_default();
                Json(json!({
                    "organic_results": [{"link": format!("https://example.com/{}", q.replace(' ', "-"))}]
                }))
            }),
        );
        let endpoint = spawn_server(app).await;
        let links = searcher(endpoint).search("caffeine sleep").await;
        assert_eq!(links, vec!["https://example.com/caffeine-sleep"]);
    }

    #[tokio::test]
    async fn test_http_500_yields_empty_list() {
        let app = Router::new().route(
            "/search",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let endpoint = spawn_server(app).await;
        assert!(searcher(endpoint).search("anything").await.is_empty());
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/search",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err((StatusCode::SERVICE_UNAVAILABLE, "busy"))
                    } else {
                        Ok(Json::<Value>(json!({"organic_results": [{"link": "https://ok.example"}]})))
                    }
                }
            }),
        );
        let endpoint = spawn_server(app).await;
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
        };
        let links = searcher(endpoint).with_retry_policy(policy).search("q").await;
        assert_eq!(links, vec!["https://ok.example"]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_host_yields_empty_list() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let links = searcher(format!("http://{}/search", addr)).search("q").await;
        assert!(links.is_empty());
    }
}
