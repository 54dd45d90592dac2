//! Time-based one-time passwords for the upstream login form.
//!
//! The upstream accepts each code only once, so the login flow always waits
//! for a fresh interval before generating the code it submits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::error::{ProxyError, Result};

/// TOTP time step in seconds.
pub const TOTP_STEP: u64 = 30;

/// Number of digits in a generated code.
pub const TOTP_DIGITS: usize = 6;

// ============================================================================
// OtpSource Trait
// ============================================================================

/// Source of one-time passwords used by the authentication flow.
#[async_trait]
pub trait OtpSource: Send + Sync + std::fmt::Debug {
    /// Code valid during the interval containing `time`.
    fn generate(&self, time: DateTime<Utc>) -> String;

    /// Resolve once the next interval boundary after "now" has passed.
    async fn wait_for_next_interval(&self);
}

/// Shared OTP source for use across async contexts.
pub type SharedOtpSource = Arc<dyn OtpSource>;

// ============================================================================
// TotpGenerator
// ============================================================================

/// RFC 6238 generator (SHA-1, 6 digits, 30 second step).
pub struct TotpGenerator {
    totp: TOTP,
}

impl TotpGenerator {
    /// Decode a Base32 secret and build a generator from it.
    ///
    /// Lowercase letters, whitespace and trailing `=` padding are accepted.
    pub fn from_base32(secret: &str) -> Result<Self> {
        let normalized: String = secret
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .trim_end_matches('=')
            .to_ascii_uppercase();

        if normalized.is_empty() {
            return Err(ProxyError::Config("OTP secret is empty".to_string()));
        }

        let bytes = Secret::Encoded(normalized)
            .to_bytes()
            .map_err(|_| ProxyError::Config("OTP secret is not valid Base32".to_string()))?;

        Self::from_bytes(bytes)
    }

    /// Build a generator from an already decoded secret.
    pub fn from_bytes(secret: Vec<u8>) -> Result<Self> {
        if secret.is_empty() {
            return Err(ProxyError::Config(
                "OTP secret decodes to zero bytes".to_string(),
            ));
        }

        // Unchecked: upstream secrets may be shorter than the 128 bits TOTP::new insists on.
        let totp = TOTP::new_unchecked(Algorithm::SHA1, TOTP_DIGITS, 1, TOTP_STEP, secret);
        Ok(Self { totp })
    }

    /// Wrap into a shared source.
    pub fn shared(self) -> SharedOtpSource {
        Arc::new(self)
    }
}

impl std::fmt::Debug for TotpGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotpGenerator")
            .field("step", &TOTP_STEP)
            .field("digits", &TOTP_DIGITS)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl OtpSource for TotpGenerator {
    fn generate(&self, time: DateTime<Utc>) -> String {
        let secs = u64::try_from(time.timestamp()).unwrap_or(0);
        self.totp.generate(secs)
    }

    async fn wait_for_next_interval(&self) {
        let now = Utc::now();
        let boundary = next_interval_boundary(now, TOTP_STEP);
        let wait = (boundary - now).to_std().unwrap_or(Duration::ZERO);
        tracing::debug!(wait_ms = wait.as_millis() as u64, "Waiting for next OTP interval");
        tokio::time::sleep(wait).await;
    }
}

/// First interval boundary strictly after `now`.
pub fn next_interval_boundary(now: DateTime<Utc>, step: u64) -> DateTime<Utc> {
    let step = step.max(1) as i64;
    let next = (now.timestamp().div_euclid(step) + 1) * step;
    DateTime::from_timestamp(next, 0).unwrap_or(now)
}
