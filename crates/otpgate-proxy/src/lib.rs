//! Session-keeping reverse proxy for an OTP-protected upstream.
//!
//! Logs in to the upstream with a generated TOTP code, holds the resulting
//! session cookies and forwards client requests under that session. When the
//! upstream drops the session the proxy logs in again and retries once.
//!
//! # Components
//!
//! - [`otp`]: TOTP generation and interval waiting
//! - [`session`]: Shared cookie jar with state and generation tracking
//! - [`auth`]: Upstream login handshake
//! - [`gate`]: Path-embedded access key
//! - [`rewrite`]: HTML and `Location` substitutions
//! - [`upstream`]: Upstream base URL and HTTP client
//! - [`engine`]: Single forward of one request
//! - [`retry`]: Re-authentication and retry policy
//! - [`server`]: Axum-based proxy server

pub mod auth;
pub mod engine;
pub mod error;
pub mod gate;
pub mod otp;
pub mod retry;
pub mod rewrite;
pub mod server;
pub mod session;
pub mod upstream;

pub use auth::{Authenticator, LoginPhase, Reauth};
pub use engine::{InboundRequest, ProxiedResponse, ProxyEngine};
pub use error::{ProxyError, Result};
pub use gate::{AccessGate, AccessKey};
pub use otp::{OtpSource, SharedOtpSource, TotpGenerator};
pub use retry::{Outcome, RetryController};
pub use rewrite::Rewriter;
pub use server::{ProxyServer, ServerConfig};
pub use session::{SessionState, SessionStore};
pub use upstream::{Upstream, UpstreamConfig};
