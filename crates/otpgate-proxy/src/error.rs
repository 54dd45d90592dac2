//! Error types for the session proxy.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors that can occur while authenticating against or proxying to the upstream.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Startup configuration is unusable (secret, access key, target URL, username).
    #[error("Config error: {0}")]
    Config(String),

    /// The inbound path did not carry the configured access key.
    #[error("unauthorized")]
    Unauthorized,

    /// The upstream did not answer within the outbound timeout.
    #[error("Upstream timeout: {0}")]
    Timeout(String),

    /// Network/HTTP error talking to the upstream.
    #[error("Network error: {0}")]
    Network(String),

    /// The upstream answered with its login page or a redirect to it.
    #[error("session invalidated: {0}")]
    SessionInvalidated(String),

    /// The login handshake did not produce an authenticated session.
    #[error("login failed: {0}")]
    Login(String),

    /// The upstream answered in a shape we cannot work with.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The inbound request could not be turned into an upstream request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    /// Whether the error is an outbound timeout, which is never retried.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProxyError::Timeout(_))
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProxyError::Timeout(e.to_string())
        } else {
            ProxyError::Network(e.to_string())
        }
    }
}
