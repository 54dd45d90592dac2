//! The single upstream service and the HTTP client used to reach it.

use std::time::Duration;

use reqwest::{Client, Url, redirect};

use crate::error::{ProxyError, Result};

/// Default upstream base URL.
pub const DEFAULT_TARGET: &str = "https://owa.h-ka.de";

/// Outbound request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Browser-like user agent the upstream expects.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36";

/// Login form endpoint, relative to the base URL.
pub const LOGIN_PATH: &str = "/lm_auth_proxy?LMLogon";

/// Text only present on the standalone upstream login page.
pub const LOGIN_PAGE_MARKER: &str = "Welcome to HKA MFA-protected Services.";

/// Substring of redirect targets that point at the upstream login proxy.
pub const LOGIN_REDIRECT_MARKER: &str = "lm_auth_proxy";

/// Configuration for reaching the upstream.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TARGET.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Normalized base URL plus a client that never follows redirects.
#[derive(Debug, Clone)]
pub struct Upstream {
    base_url: String,
    user_agent: String,
    client: Client,
}

impl Upstream {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let base_url = normalize_base_url(&config.base_url)?;

        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProxyError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            user_agent: config.user_agent,
            client,
        })
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Absolute URL for an upstream-relative request URI.
    pub fn url(&self, request_uri: &str) -> Result<Url> {
        Url::parse(&format!("{}{}", self.base_url, request_uri))
            .map_err(|e| ProxyError::InvalidRequest(format!("Bad upstream URI {request_uri}: {e}")))
    }
}

/// Strip trailing slashes and require an absolute http(s) URL.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed)
        .map_err(|e| ProxyError::Config(format!("Invalid target URL '{}': {}", raw, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ProxyError::Config(format!(
            "Target URL must be an absolute http(s) URL: {}",
            raw
        )));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://owa.h-ka.de/").unwrap(),
            "https://owa.h-ka.de"
        );
        assert_eq!(
            normalize_base_url("http://127.0.0.1:8081//").unwrap(),
            "http://127.0.0.1:8081"
        );
        assert_eq!(
            normalize_base_url("https://host/prefix/").unwrap(),
            "https://host/prefix"
        );
    }

    #[test]
    fn test_normalize_rejects_bad_urls() {
        assert!(normalize_base_url("owa.h-ka.de").is_err());
        assert!(normalize_base_url("ftp://owa.h-ka.de").is_err());
        assert!(normalize_base_url("").is_err());
    }

    #[test]
    fn test_upstream_url_join() {
        let upstream = Upstream::new(UpstreamConfig::new("https://owa.h-ka.de/")).unwrap();
        assert_eq!(upstream.base_url(), "https://owa.h-ka.de");
        assert_eq!(
            upstream.url("/owa/?x=1").unwrap().as_str(),
            "https://owa.h-ka.de/owa/?x=1"
        );
        assert_eq!(upstream.url("/").unwrap().as_str(), "https://owa.h-ka.de/");
    }

    #[test]
    fn test_default_config() {
        let config = UpstreamConfig::default();
        assert_eq!(config.base_url, DEFAULT_TARGET);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.user_agent.starts_with("Mozilla/5.0"));
    }
}
