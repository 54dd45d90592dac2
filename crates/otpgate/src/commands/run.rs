//! Run command - authenticates against the upstream and serves the proxy.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;

use otpgate_config::OtpgateConfig;
use otpgate_proxy::{
    AccessKey, ProxyError, ProxyServer, RetryController, ServerConfig, TotpGenerator,
    UpstreamConfig,
};

use super::{Context, require};

/// Arguments for the run command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Upstream login username
    #[arg(short, long, env = "OTPGATE_USERNAME")]
    pub username: Option<String>,

    /// Base32 OTP secret
    #[arg(short, long, env = "OTPGATE_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Port to listen on [default: 8080]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to [default: 0.0.0.0]
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Upstream base URL [default: https://owa.h-ka.de]
    #[arg(short, long)]
    pub target: Option<String>,

    /// Do not log in before the first request needs a session
    #[arg(long)]
    pub skip_auth: bool,

    /// Require /_/<key>/ as path prefix on every request
    #[arg(short = 'k', long, env = "OTPGATE_AUTH_KEY", hide_env_values = true)]
    pub auth_key: Option<String>,

    /// Retry the initial login when it fails
    #[arg(short, long)]
    pub retry_on_auth_failure: bool,

    /// Extra initial login attempts [default: 3]
    #[arg(short, long)]
    pub max_retries: Option<u32>,

    /// Seconds between initial login attempts [default: 30]
    #[arg(short = 'd', long)]
    pub retry_delay: Option<u64>,

    /// Upstream request timeout in seconds [default: 10]
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Effective settings after layering CLI and env over config files.
struct Settings {
    username: String,
    secret: String,
    target: String,
    timeout: Duration,
    bind_addr: SocketAddr,
    access_key: Option<AccessKey>,
    skip_auth: bool,
    startup: StartupRetry,
    max_body_bytes: usize,
}

/// How often the initial login is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("target", &self.target)
            .field("bind_addr", &self.bind_addr)
            .field("access_key", &self.access_key)
            .field("skip_auth", &self.skip_auth)
            .field("startup", &self.startup)
            .finish_non_exhaustive()
    }
}

impl Settings {
    fn resolve(args: RunArgs, config: &OtpgateConfig) -> Result<Self> {
        let username = require(
            args.username.as_deref(),
            config.credentials.username.as_deref(),
            "username",
            "set --username, OTPGATE_USERNAME or [credentials] username",
        )?;
        let secret = require(
            args.secret.as_deref(),
            config.credentials.secret.as_deref(),
            "secret",
            "set --secret, OTPGATE_SECRET or [credentials] secret",
        )?;

        let bind = args.bind.as_deref().unwrap_or(config.server.bind());
        let ip: IpAddr = bind
            .parse()
            .with_context(|| format!("invalid bind address '{}'", bind))?;
        let port = args.port.unwrap_or(config.server.port());

        let raw_key = args
            .auth_key
            .as_deref()
            .or(config.server.access_key.as_deref())
            .unwrap_or("");

        let retry = args.retry_on_auth_failure
            || config.startup.retry_on_auth_failure.unwrap_or(false);
        let startup = StartupRetry {
            attempts: if retry {
                1 + args.max_retries.unwrap_or(config.startup.max_retries())
            } else {
                1
            },
            delay: Duration::from_secs(
                args.retry_delay
                    .unwrap_or(config.startup.retry_delay_secs()),
            ),
        };

        Ok(Self {
            username,
            secret,
            target: args
                .target
                .unwrap_or_else(|| config.upstream.target().to_string()),
            timeout: Duration::from_secs(args.timeout.unwrap_or(config.upstream.timeout_secs())),
            bind_addr: SocketAddr::new(ip, port),
            access_key: AccessKey::parse(raw_key)?,
            skip_auth: args.skip_auth || config.server.skip_initial_auth.unwrap_or(false),
            startup,
            max_body_bytes: config.server.max_body_bytes(),
        })
    }
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let settings = Settings::resolve(args, &loaded.config)?;

    // Everything that can be rejected offline is rejected before any traffic.
    let otp = TotpGenerator::from_base32(&settings.secret)?.shared();
    let upstream = UpstreamConfig::new(settings.target.as_str()).with_timeout(settings.timeout);
    let keyed = settings.access_key.is_some();
    let controller =
        RetryController::build(upstream, &settings.username, otp, settings.access_key.clone())?;

    if settings.skip_auth {
        tracing::info!("Skipping initial authentication");
    } else {
        let auth = controller.authenticator();
        authenticate_with_retries(settings.startup, || auth.authenticate())
            .await
            .context("initial authentication failed")?;
    }

    tracing::info!(
        target_url = %settings.target,
        bind = %settings.bind_addr,
        access_key = keyed,
        "Proxy configured"
    );
    if keyed {
        println!("Proxy listening on http://{}/_/<key>/", settings.bind_addr);
    } else {
        println!("Proxy listening on http://{}", settings.bind_addr);
    }

    let config = ServerConfig::new(settings.bind_addr).with_max_body_bytes(settings.max_body_bytes);
    let server = ProxyServer::new(config, controller);

    tokio::select! {
        result = server.run() => result.context("proxy server failed")?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }
    Ok(())
}

/// Call `attempt` up to `policy.attempts` times, sleeping `policy.delay`
/// between failures.
pub async fn authenticate_with_retries<F, Fut>(
    policy: StartupRetry,
    mut attempt: F,
) -> std::result::Result<(), ProxyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<(), ProxyError>>,
{
    let attempts = policy.attempts.max(1);
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) if tries < attempts => {
                tracing::warn!(
                    attempt = tries,
                    of = attempts,
                    error = %e,
                    delay_secs = policy.delay.as_secs(),
                    "Initial authentication failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
