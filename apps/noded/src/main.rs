//! sharemeshd: the mesh node daemon.
//!
//! Usage:
//!   sharemeshd [--config /etc/sharemesh/node.toml]
//!
//! Runs both listeners until interrupted.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::info;

use sharemesh_node::{Node, NodeConfig};

#[derive(Parser, Debug)]
#[command(name = "sharemeshd", version, about = "sharemesh node daemon")]
struct Cli {
    /// Path to node.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SHAREMESH_CONFIG",
        default_value = "/etc/sharemesh/node.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SHAREMESH_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "SHAREMESH_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "sharemeshd starting"
    );

    let config = NodeConfig::load(&cli.config)?;
    let node = Node::start(config, false).await?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    node.shutdown().await;
    Ok(())
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
