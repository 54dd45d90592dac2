//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [upstream]       # target URL and outbound timeout
//! [credentials]    # login username and OTP secret
//! [server]         # listener, access key, body limit
//! [startup]        # retrying the initial login
//! ```
//!
//! Every field is optional so partial files can be layered. Effective values
//! fall back to the defaults below.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

pub mod defaults {
    pub const TARGET: &str = "https://owa.h-ka.de";
    pub const TIMEOUT_SECS: u64 = 10;
    pub const BIND: &str = "0.0.0.0";
    pub const PORT: u16 = 8080;
    pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_DELAY_SECS: u64 = 30;
}

fn overlay<T>(base: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *base = other;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpgateConfig {
    pub upstream: UpstreamSection,
    pub credentials: CredentialsSection,
    pub server: ServerSection,
    pub startup: StartupSection,
}

impl OtpgateConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Merge another config on top of this one, field by field (other takes priority).
    pub fn merge(&mut self, other: OtpgateConfig) {
        self.upstream.merge(other.upstream);
        self.credentials.merge(other.credentials);
        self.server.merge(other.server);
        self.startup.merge(other.startup);
    }

    /// Whether any layer put the OTP secret into a file.
    pub fn has_plaintext_secret(&self) -> bool {
        self.credentials
            .secret
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// `[upstream]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    /// Base URL of the protected service.
    pub target: Option<String>,
    /// Outbound request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl UpstreamSection {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.target, other.target);
        overlay(&mut self.timeout_secs, other.timeout_secs);
    }

    pub fn target(&self) -> &str {
        self.target.as_deref().unwrap_or(defaults::TARGET)
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(defaults::TIMEOUT_SECS)
    }
}

/// `[credentials]`
#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsSection {
    pub username: Option<String>,
    /// Base32 OTP seed. Prefer `OTPGATE_SECRET` over storing it here.
    pub secret: Option<String>,
}

impl CredentialsSection {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.username, other.username);
        overlay(&mut self.secret, other.secret);
    }
}

impl std::fmt::Debug for CredentialsSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsSection")
            .field("username", &self.username)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// `[server]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub port: Option<u16>,
    /// Path-embedded access key; empty disables the check.
    pub access_key: Option<String>,
    /// Defer the first login until a request needs it.
    pub skip_initial_auth: Option<bool>,
    pub max_body_bytes: Option<usize>,
}

impl ServerSection {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.bind, other.bind);
        overlay(&mut self.port, other.port);
        overlay(&mut self.access_key, other.access_key);
        overlay(&mut self.skip_initial_auth, other.skip_initial_auth);
        overlay(&mut self.max_body_bytes, other.max_body_bytes);
    }

    pub fn bind(&self) -> &str {
        self.bind.as_deref().unwrap_or(defaults::BIND)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(defaults::PORT)
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes.unwrap_or(defaults::MAX_BODY_BYTES)
    }
}

/// `[startup]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupSection {
    pub retry_on_auth_failure: Option<bool>,
    /// Extra login attempts after the first one fails.
    pub max_retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
}

impl StartupSection {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.retry_on_auth_failure, other.retry_on_auth_failure);
        overlay(&mut self.max_retries, other.max_retries);
        overlay(&mut self.retry_delay_secs, other.retry_delay_secs);
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(defaults::MAX_RETRIES)
    }

    pub fn retry_delay_secs(&self) -> u64 {
        self.retry_delay_secs.unwrap_or(defaults::RETRY_DELAY_SECS)
    }
}
