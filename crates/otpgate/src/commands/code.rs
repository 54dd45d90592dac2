//! Code command - prints the one-time password for the current interval.

use anyhow::Result;
use chrono::Utc;
use clap::Args;

use otpgate_proxy::otp::{OtpSource, TOTP_STEP, TotpGenerator, next_interval_boundary};

use super::{Context, require};

/// Arguments for the code command.
#[derive(Args, Debug)]
pub struct CodeArgs {
    /// Base32 OTP secret (overrides config)
    #[arg(short, long, env = "OTPGATE_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
}

/// Run the code command.
pub async fn run(args: CodeArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let secret = require(
        args.secret.as_deref(),
        loaded.config.credentials.secret.as_deref(),
        "secret",
        "set --secret, OTPGATE_SECRET or [credentials] secret",
    )?;
    let generator = TotpGenerator::from_base32(&secret)?;

    let now = Utc::now();
    println!("{}", generator.generate(now));

    if ctx.verbose {
        let remaining = (next_interval_boundary(now, TOTP_STEP) - now).num_seconds();
        eprintln!("valid for {}s", remaining);
    }
    Ok(())
}
