//! # defra-relay
//!
//! HTTP relay in front of a DefraDB node and a MongoDB server, also serving
//! the front-end's static files.
//!
//! ```bash
//! defra-relay --config ./relay.toml
//! ```
//!
//! Without `--config` every setting takes its default and the relay listens
//! on `127.0.0.1:8787`.

use clap::Parser;
use std::path::PathBuf;

use defra_tools::{config, logging, server};

/// HTTP relay for DefraDB and MongoDB.
#[derive(Parser)]
#[command(name = "defra-relay", version)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging.
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.dev);

    let cfg = config::load_config(cli.config.as_deref())?;
    server::run_relay(&cfg).await
}
