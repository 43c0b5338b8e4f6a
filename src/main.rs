//! Podlike - pod-like sibling-container supervisor
//!
//! Runs inside a container, reads a compose-style stack description,
//! and supervises the described components as sibling containers
//! sharing this container's kernel namespaces.

use anyhow::Result;
use clap::Parser;
use tracing::error;

use podlike::config::Configuration;

mod cmd;

#[derive(Parser)]
#[command(name = "podlike")]
#[command(about = "Pod-like sibling-container supervisor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<cmd::Commands>,

    /// Stack files describing the components ('-' reads standard input)
    #[arg(default_value = "podlike.yml")]
    files: Vec<String>,

    /// Always pull component images before creating them
    #[arg(long)]
    pull: bool,

    /// Share the supervisor's PID namespace with the components
    #[arg(long)]
    pids: bool,

    /// Share the supervisor's volumes with the components
    #[arg(long)]
    volumes: bool,

    /// Default stop grace period in seconds
    #[arg(long, default_value_t = 10)]
    grace: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("podlike={}", log_level).into()),
        )
        .init();

    match cli.command {
        Some(cmd::Commands::Diagnostics) => {
            cmd::diagnostics::run().await?;
        }
        None => {
            let configuration = Configuration {
                always_pull: cli.pull,
                share_pids: cli.pids,
                share_volumes: cli.volumes,
                stop_grace_period: std::time::Duration::from_secs(cli.grace),
            };

            match cmd::root::run(&cli.files, configuration).await {
                Ok(0) => {}
                Ok(code) => std::process::exit(code),
                Err(e) => {
                    error!("Startup error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
