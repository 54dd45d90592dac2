//! Path-embedded access key check.
//!
//! With a key `k` configured, clients address the upstream as
//! `/_/k/<upstream path>`. Requests without the exact key never reach the
//! upstream.

use crate::error::{ProxyError, Result};

/// Path segment that introduces the access key.
pub const KEY_SEGMENT: &str = "_";

/// Shared secret carried in the request path. Restricted to `[A-Za-z0-9_-]`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessKey(String);

impl AccessKey {
    /// Validate a configured key. An empty string means "no key".
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        if raw.is_empty() {
            return Ok(None);
        }
        let valid = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ProxyError::Config(
                "access key must contain only alphanumeric characters, hyphens, and underscores"
                    .to_string(),
            ));
        }
        Ok(Some(Self(raw.to_string())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path prefix clients use, e.g. `/_/k`.
    pub fn prefix(&self) -> String {
        format!("/{}/{}", KEY_SEGMENT, self.0)
    }
}

impl std::fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessKey(<redacted>)")
    }
}

/// Resolves inbound paths to upstream-relative request URIs.
#[derive(Debug, Clone, Default)]
pub struct AccessGate {
    key: Option<AccessKey>,
}

impl AccessGate {
    pub fn new(key: Option<AccessKey>) -> Self {
        Self { key }
    }

    pub fn key(&self) -> Option<&AccessKey> {
        self.key.as_ref()
    }

    /// Inbound path with the access key masked, for logging.
    pub fn redact(&self, path: &str) -> String {
        match &self.key {
            Some(key) => match path.strip_prefix(&key.prefix()) {
                Some(rest) => format!("/{}/***{}", KEY_SEGMENT, rest),
                None => path.to_string(),
            },
            None => path.to_string(),
        }
    }

    /// Upstream request URI (path plus query) for an inbound path and query.
    pub fn resolve(&self, path: &str, query: Option<&str>) -> Result<String> {
        let resolved = match &self.key {
            None => path.to_string(),
            Some(key) => strip_key(path, key.as_str()).ok_or(ProxyError::Unauthorized)?,
        };

        Ok(match query {
            Some(q) if !q.is_empty() => format!("{}?{}", resolved, q),
            _ => resolved,
        })
    }
}

/// `/_/<key>` -> `/`, `/_/<key>/<rest>` -> `/<rest>`, anything else -> `None`.
fn strip_key(path: &str, key: &str) -> Option<String> {
    let mut parts = path.splitn(4, '/');
    if parts.next() != Some("") || parts.next() != Some(KEY_SEGMENT) || parts.next() != Some(key)
    {
        return None;
    }
    match parts.next() {
        None => Some("/".to_string()),
        Some(rest) => Some(format!("/{}", rest)),
    }
}
