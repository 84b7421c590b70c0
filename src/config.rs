//! Configuration management for the research service.
//!
//! Configuration is set via environment variables:
//! - `OPENROUTER_API_KEY` - Required. Language model access.
//! - `SERPAPI_API_KEY` - Required. Web search access.
//! - `JINA_API_KEY` - Required. Page text extraction access.
//! - `DEFAULT_MODEL` - Optional. Defaults to `google/gemini-flash-1.5`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `SERPAPI_URL` - Optional. Defaults to `https://serpapi.com/search`.
//! - `SEARCH_ENGINE` - Optional. SerpAPI engine selector. Defaults to `google`.
//! - `JINA_BASE_URL` - Optional. Defaults to `https://r.jina.ai/`.
//! - `DEFAULT_ITERATION_LIMIT` - Optional. Defaults to `2`.
//! - `MAX_ITERATION_LIMIT` - Optional. Upper clamp for requests. Defaults to `10`.
//! - `MAX_URLS_PER_ITERATION` - Optional. Defaults to `10`.
//! - `MAX_QUERIES` - Optional. Queries kept per planner/refiner reply. Defaults to `4`.
//! - `PAGE_TEXT_LIMIT` - Optional. Characters of page text sent to the model. Defaults to `20000`.
//! - `UPSTREAM_MAX_RETRIES` - Optional. Retries per outbound call. Defaults to `2`.
//! - `UPSTREAM_RETRY_BASE_MS` - Optional. Base backoff delay. Defaults to `500`.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Knobs the research loop reads on every run.
#[derive(Debug, Clone)]
pub struct ResearchSettings {
    /// Iteration limit used when a request does not specify one
    pub default_iteration_limit: usize,

    /// Largest iteration limit a request may ask for
    pub max_iteration_limit: usize,

    /// URLs considered per iteration, across all queries
    pub max_urls_per_iteration: usize,

    /// Queries kept from a planner or refiner reply
    pub max_queries: usize,

    /// Characters of page text forwarded to the relevance and extraction prompts
    pub page_text_limit: usize,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            default_iteration_limit: 2,
            max_iteration_limit: 10,
            max_urls_per_iteration: 10,
            max_queries: 4,
            page_text_limit: 20_000,
        }
    }
}

/// Endpoints and credentials for the search and extraction services.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub serpapi_api_key: String,
    pub serpapi_url: String,
    pub search_engine: String,
    pub jina_api_key: String,
    pub jina_base_url: String,
    pub retry: RetryPolicy,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key
    pub api_key: String,

    /// LLM model identifier (OpenRouter format)
    pub default_model: String,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    pub upstream: UpstreamConfig,

    pub research: ResearchSettings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if an API key is not set, and
    /// `ConfigError::InvalidValue` for unparseable numbers or URLs.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = required("OPENROUTER_API_KEY")?;
        let serpapi_api_key = required("SERPAPI_API_KEY")?;
        let jina_api_key = required("JINA_API_KEY")?;

        let default_model = optional("DEFAULT_MODEL", "google/gemini-flash-1.5");
        let host = optional("HOST", "127.0.0.1");
        let port = parsed("PORT", 3000u16)?;

        let serpapi_url = url_var("SERPAPI_URL", "https://serpapi.com/search")?;
        let jina_base_url = url_var("JINA_BASE_URL", "https://r.jina.ai/")?;
        let search_engine = optional("SEARCH_ENGINE", "google");

        let retry = RetryPolicy::new(
            parsed("UPSTREAM_MAX_RETRIES", 2u32)?,
            Duration::from_millis(parsed("UPSTREAM_RETRY_BASE_MS", 500u64)?),
        );

        let defaults = ResearchSettings::default();
        let research = ResearchSettings {
            default_iteration_limit: parsed(
                "DEFAULT_ITERATION_LIMIT",
                defaults.default_iteration_limit,
            )?,
            max_iteration_limit: parsed("MAX_ITERATION_LIMIT", defaults.max_iteration_limit)?,
            max_urls_per_iteration: parsed(
                "MAX_URLS_PER_ITERATION",
                defaults.max_urls_per_iteration,
            )?,
            max_queries: parsed("MAX_QUERIES", defaults.max_queries)?,
            page_text_limit: parsed("PAGE_TEXT_LIMIT", defaults.page_text_limit)?,
        };
        research.validate()?;

        Ok(Self {
            api_key,
            default_model,
            host,
            port,
            upstream: UpstreamConfig {
                serpapi_api_key,
                serpapi_url,
                search_engine,
                jina_api_key,
                jina_base_url,
                retry,
            },
            research,
        })
    }

    /// Create a config with placeholder credentials (useful for testing).
    pub fn new(api_key: String, default_model: String) -> Self {
        Self {
            api_key,
            default_model,
            host: "127.0.0.1".to_string(),
            port: 3000,
            upstream: UpstreamConfig {
                serpapi_api_key: String::new(),
                serpapi_url: "https://serpapi.com/search".to_string(),
                search_engine: "google".to_string(),
                jina_api_key: String::new(),
                jina_base_url: "https://r.jina.ai/".to_string(),
                retry: RetryPolicy::default(),
            },
            research: ResearchSettings::default(),
        }
    }
}

impl ResearchSettings {
    /// Reject settings that would make every run a no-op.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("DEFAULT_ITERATION_LIMIT", self.default_iteration_limit),
            ("MAX_ITERATION_LIMIT", self.max_iteration_limit),
            ("MAX_URLS_PER_ITERATION", self.max_urls_per_iteration),
            ("MAX_QUERIES", self.max_queries),
            ("PAGE_TEXT_LIMIT", self.page_text_limit),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    name.to_string(),
                    "must be at least 1".to_string(),
                ));
            }
        }
        if self.default_iteration_limit > self.max_iteration_limit {
            return Err(ConfigError::InvalidValue(
                "DEFAULT_ITERATION_LIMIT".to_string(),
                format!("exceeds MAX_ITERATION_LIMIT ({})", self.max_iteration_limit),
            ));
        }
        Ok(())
    }

    /// Resolve a requested iteration limit against the defaults and the clamp.
    pub fn resolve_iteration_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_iteration_limit)
            .min(self.max_iteration_limit)
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

fn url_var(name: &str, default: &str) -> Result<String, ConfigError> {
    let value = optional(name, default);
    url::Url::parse(&value)
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e)))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_iteration_limit() {
        let settings = ResearchSettings::default();
        assert_eq!(settings.resolve_iteration_limit(None), 2);
        assert_eq!(settings.resolve_iteration_limit(Some(5)), 5);
        assert_eq!(settings.resolve_iteration_limit(Some(500)), 10);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let settings = ResearchSettings {
            max_urls_per_iteration: 0,
            ..ResearchSettings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("MAX_URLS_PER_ITERATION"));
    }

    #[test]
    fn test_validate_rejects_default_above_max() {
        let settings = ResearchSettings {
            default_iteration_limit: 11,
            ..ResearchSettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(ResearchSettings::default().validate().is_ok());
    }

    #[test]
    fn test_new_uses_defaults() {
        let config = Config::new("key".into(), "test/model".into());
        assert_eq!(config.port, 3000);
        assert_eq!(config.upstream.search_engine, "google");
        assert_eq!(config.research.page_text_limit, 20_000);
    }
}
