//! otpgate - reverse proxy that keeps an OTP-protected upstream session alive.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{code, run};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Definition
// ─────────────────────────────────────────────────────────────────────────────

/// otpgate - OTP session proxy
///
/// Logs in to an MFA-protected web service with a generated one-time
/// password and proxies requests under that session.
#[derive(Parser)]
#[command(name = "otpgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file (overrides default discovery)
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Authenticate and start the proxy server
    Run(run::RunArgs),

    /// Print the current one-time password
    Code(code::CodeArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main Entry Point
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "otpgate=debug,otpgate_proxy=debug,otpgate_config=debug,tower_http=debug,info"
    } else {
        "otpgate=info,otpgate_proxy=info,tower_http=info,warn"
    };

    let log_dir = otpgate_config::xdg_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| std::path::PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "otpgate.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            // stdout is reserved for command output (`otpgate code`).
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "otpgate=trace,otpgate_proxy=trace,otpgate_config=trace,tower_http=debug,info",
                )),
        )
        .init();

    let ctx = commands::Context {
        config_path: cli.config,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Code(args) => code::run(args, &ctx).await,
    }
}
