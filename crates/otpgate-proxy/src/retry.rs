//! Per-request retry policy.
//!
//! ```text
//! Attempt --ok--> Done
//!    |--unauthorized--> Done (401)
//!    |--timeout--> Failed (504)
//!    `--other--> Invalidated --> Reauthenticating --ok--> Retry --ok--> Done
//!                                       |                   `--err--> Failed (502)
//!                                       `--err--> Failed (502)
//! ```
//!
//! No phase leads back to `Attempt`, so a request causes at most one login
//! and at most two upstream forwards.

use std::sync::Arc;

use reqwest::StatusCode;

use crate::auth::{Authenticator, Reauth};
use crate::engine::{InboundRequest, ProxiedResponse, ProxyEngine};
use crate::error::{ProxyError, Result};
use crate::gate::{AccessGate, AccessKey};
use crate::otp::SharedOtpSource;
use crate::session::SessionStore;
use crate::upstream::{Upstream, UpstreamConfig};

/// Prefix of the 502 body when the login attempt fails.
pub const REAUTH_FAILED: &str = "re-authentication failed: ";

/// Prefix of the 502 body when the retried forward fails.
pub const RETRY_FAILED: &str = "proxy error after re-authentication: ";

/// Prefix of the 504 body.
pub const TIMED_OUT: &str = "request timed out: ";

/// What the client receives.
#[derive(Debug)]
pub enum Outcome {
    /// The (possibly retried) upstream response.
    Forwarded(ProxiedResponse),
    /// The access key did not match.
    Rejected,
    /// Terminal failure with a plain-text explanation.
    Failed { status: StatusCode, message: String },
}

impl Outcome {
    pub fn status(&self) -> StatusCode {
        match self {
            Outcome::Forwarded(response) => response.status,
            Outcome::Rejected => StatusCode::UNAUTHORIZED,
            Outcome::Failed { status, .. } => *status,
        }
    }
}

#[derive(Debug)]
enum Phase {
    Attempt,
    Invalidated(ProxyError),
    Reauthenticating,
    Retry,
    Done(Outcome),
    Failed { status: StatusCode, message: String },
}

/// Runs the engine with one re-authentication and one retry on failure.
#[derive(Debug, Clone)]
pub struct RetryController {
    engine: ProxyEngine,
    auth: Authenticator,
}

impl RetryController {
    pub fn new(engine: ProxyEngine, auth: Authenticator) -> Self {
        Self { engine, auth }
    }

    /// Wire engine and authenticator around one fresh, unauthenticated
    /// session. No network traffic happens here.
    pub fn build(
        config: UpstreamConfig,
        username: &str,
        otp: SharedOtpSource,
        access_key: Option<AccessKey>,
    ) -> Result<Self> {
        let upstream = Upstream::new(config)?;
        let session = Arc::new(SessionStore::new());
        let auth = Authenticator::new(upstream.clone(), session.clone(), otp, username)?;
        let engine = ProxyEngine::new(upstream, session, AccessGate::new(access_key));
        Ok(Self::new(engine, auth))
    }

    pub fn engine(&self) -> &ProxyEngine {
        &self.engine
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    /// Drive one request to a terminal outcome.
    pub async fn handle(&self, request: &InboundRequest) -> Outcome {
        let path = self.engine.gate().redact(&request.path);
        let observed_generation = self.auth.session().generation().await;
        let mut phase = Phase::Attempt;

        loop {
            phase = match phase {
                Phase::Attempt => match self.engine.forward(request).await {
                    Ok(response) => Phase::Done(Outcome::Forwarded(response)),
                    Err(ProxyError::Unauthorized) => {
                        tracing::warn!(method = %request.method, path = %path, "Rejected request without valid access key");
                        Phase::Done(Outcome::Rejected)
                    }
                    Err(ProxyError::Timeout(detail)) => Phase::Failed {
                        status: StatusCode::GATEWAY_TIMEOUT,
                        message: format!("{TIMED_OUT}{detail}"),
                    },
                    Err(e) => Phase::Invalidated(e),
                },
                Phase::Invalidated(cause) => {
                    tracing::warn!(
                        method = %request.method,
                        path = %path,
                        cause = %cause,
                        "Proxying failed, re-authenticating"
                    );
                    Phase::Reauthenticating
                }
                Phase::Reauthenticating => match self.auth.reauthenticate(observed_generation).await {
                    Ok(Reauth::LoggedIn) => Phase::Retry,
                    Ok(Reauth::Reused) => {
                        tracing::debug!(path = %path, "Retrying with session renewed by another request");
                        Phase::Retry
                    }
                    Err(e) => Phase::Failed {
                        status: StatusCode::BAD_GATEWAY,
                        message: format!("{REAUTH_FAILED}{e}"),
                    },
                },
                Phase::Retry => match self.engine.forward(request).await {
                    Ok(response) => Phase::Done(Outcome::Forwarded(response)),
                    Err(e) => Phase::Failed {
                        status: StatusCode::BAD_GATEWAY,
                        message: format!("{RETRY_FAILED}{e}"),
                    },
                },
                Phase::Done(outcome) => return outcome,
                Phase::Failed { status, message } => {
                    tracing::error!(
                        method = %request.method,
                        path = %path,
                        status = status.as_u16(),
                        error = %message,
                        "Request failed"
                    );
                    return Outcome::Failed { status, message };
                }
            };
        }
    }
}
