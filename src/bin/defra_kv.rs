//! # defra-kv
//!
//! Runs one GraphQL query or mutation against a DefraDB node holding the
//! `KV` collection and prints `{"data": ...}` to stdout.
//!
//! ## Usage
//!
//! ```bash
//! defra-kv --query 'query { KV { key value } }'
//! echo 'mutation { create_KV(input: {key: "a", value: 1}) { _docID } }' | defra-kv
//! defra-kv --url http://localhost:9181/api/v0 --pretty=false --query '...'
//! ```
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Query succeeded |
//! | 1 | Query returned errors (printed to stderr), setup failed, or the run was interrupted |
//! | 2 | No query given |
//!
//! SIGINT and SIGTERM cancel the run. During node start-up that is a setup
//! failure; during the query it is reported as a query error. The node is
//! closed either way.

use anyhow::bail;
use clap::{ArgAction, Parser};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use defra_tools::config;
use defra_tools::defra::{DefraClient, GqlResponse};
use defra_tools::logging;
use defra_tools::node::{self, Node, NodeOptions, NodeStore};
use defra_tools::query::{self, QueryRequest};
use defra_tools::schema::{self, KV_SCHEMA};

/// Run a single GraphQL request against a DefraDB node.
#[derive(Parser)]
#[command(name = "defra-kv", version)]
struct Cli {
    /// Node data directory. `~/` is expanded and the directory created.
    #[arg(long, default_value_os_t = node::default_rootdir())]
    rootdir: PathBuf,

    /// Keyring secret. Falls back to $DEFRA_KEYRING_SECRET, then a dev default.
    #[arg(long)]
    keyring_secret: Option<String>,

    /// GraphQL query or mutation. Read from stdin when empty.
    #[arg(long, default_value = "")]
    query: String,

    /// Variables as a JSON object.
    #[arg(long, default_value = "")]
    vars: String,

    /// Indent the output.
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pretty: bool,

    /// Request timeout, e.g. `10s` or `1m30s`.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Verbose logging, node output passed through.
    #[arg(long)]
    dev: bool,

    /// Attach to a running node instead of starting one.
    #[arg(long)]
    url: Option<String>,

    /// Path to the `defradb` binary.
    #[arg(long, env = "DEFRADB_BIN", default_value_os_t = config::default_defradb_bin())]
    defradb_bin: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_tracing(cli.dev);
    let keyring_secret = node::resolve_keyring_secret(cli.keyring_secret.as_deref());

    // Nothing to read from an interactive terminal.
    let stdin = std::io::stdin();
    let input: Box<dyn Read> = if stdin.is_terminal() {
        Box::new(std::io::empty())
    } else {
        Box::new(stdin.lock())
    };
    let Some(query_text) = query::read_query(&cli.query, input)? else {
        eprintln!("no query provided (use --query or pipe it on stdin)");
        return Ok(ExitCode::from(2));
    };
    let request = QueryRequest {
        query: query_text,
        variables: query::parse_vars(&cli.vars)?,
        timeout: cli.timeout,
    };

    let store = match cli.url {
        // Ignored when attaching.
        Some(_) => NodeStore::Memory,
        None => NodeStore::Persistent(node::resolve_rootdir(&cli.rootdir)?),
    };
    // One listener for the whole run, so a signal between start-up and the
    // query is not lost.
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    // A start-up cut short drops the child, which kills it.
    let node = tokio::select! {
        node = Node::open(NodeOptions {
            defradb_bin: cli.defradb_bin,
            store,
            attach_url: cli.url,
            keyring_secret,
            dev: cli.dev,
            startup_timeout: Duration::from_secs(config::default_startup_timeout()),
        }) => node?,
        _ = &mut shutdown => bail!("interrupted while starting the node"),
    };

    let outcome = tokio::select! {
        result = execute(node.db(), &request) => result,
        _ = &mut shutdown => Ok(GqlResponse::from_error(CANCELED)),
    };

    if let Err(e) = node.close().await {
        tracing::warn!(error = %e, "failed to close node");
    }

    let response = outcome?;
    if !response.is_ok() {
        eprintln!("{}", query::render_errors(&response)?);
        return Ok(ExitCode::from(1));
    }
    println!("{}", query::render_data(&response.data, cli.pretty)?);
    Ok(ExitCode::SUCCESS)
}

/// Query error reported when a signal cancels the run.
const CANCELED: &str = "request canceled by signal";

async fn execute(db: &DefraClient, request: &QueryRequest) -> anyhow::Result<GqlResponse> {
    schema::ensure_schema(db, "KV", KV_SCHEMA).await?;
    query::run_query(db, request).await
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
