//! # defra-rag
//!
//! Retrieval-augmented generation demo: asks an LLM a question, loads a
//! JSONL knowledge base into an in-memory DefraDB node, and asks again with
//! the most similar articles as context.
//!
//! Needs the `defradb` binary and an OpenAI-compatible server (Ollama by
//! default) with the chat and embedding models pulled.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use defra_tools::node::{self, NodeOptions, NodeStore};
use defra_tools::{config, logging, rag};

/// RAG demo on top of DefraDB vector search.
#[derive(Parser)]
#[command(name = "defra-rag", version)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging, node output passed through.
    #[arg(long)]
    dev: bool,

    /// JSONL knowledge base, overriding `[rag].data_path`.
    #[arg(long)]
    data: Option<PathBuf>,

    /// Question to ask, overriding `[rag].question`.
    #[arg(long)]
    question: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.dev);

    let cfg = config::load_config(cli.config.as_deref())?;
    let data_path = cli.data.unwrap_or_else(|| cfg.rag.data_path.clone());
    let question = cli.question.unwrap_or_else(|| cfg.rag.question.clone());

    let node_options = NodeOptions {
        defradb_bin: cfg.node.defradb_bin.clone(),
        store: NodeStore::Memory,
        attach_url: None,
        keyring_secret: node::resolve_keyring_secret(None),
        dev: cli.dev,
        startup_timeout: Duration::from_secs(cfg.node.startup_timeout_secs),
    };

    rag::run_demo(&cfg.rag, node_options, &question, &data_path)
        .await
        .context("RAG demo failed")?;
    Ok(())
}
