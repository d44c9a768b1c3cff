//! Database node lifecycle.
//!
//! A [`Node`] is a DefraDB instance owned by the calling program. In owned
//! mode the `defradb` binary is started as a child process listening on a
//! free loopback port with P2P disabled; closing the node stops the child.
//! In attached mode the node talks to an already running instance and
//! closing it is a no-op.
//!
//! ```text
//! Node::open ──▶ spawn `defradb start` ──▶ wait for port ──▶ DefraClient
//!     │                                                        │
//!     └──────── close(): SIGTERM, wait, kill after grace ◀────┘
//! ```

use anyhow::{bail, Context, Result};
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

use crate::defra::DefraClient;

/// Environment variable holding the node's keyring secret.
pub const KEYRING_SECRET_ENV: &str = "DEFRA_KEYRING_SECRET";

/// Keyring secret used when neither the flag nor the environment sets one.
pub const DEV_KEYRING_SECRET: &str = "dev-dev-dev";

/// How long a spawned node gets to exit after SIGTERM before it is killed.
pub const GRACEFUL_STOP: Duration = Duration::from_secs(5);

/// Where a spawned node keeps its data.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeStore {
    /// Persistent Badger store under the given root directory.
    Persistent(PathBuf),
    /// In-memory store, discarded when the node stops.
    Memory,
}

#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub defradb_bin: PathBuf,
    pub store: NodeStore,
    /// Attach to this API URL instead of spawning a node.
    pub attach_url: Option<String>,
    pub keyring_secret: String,
    /// When false the child's output is discarded and its log level lowered.
    pub dev: bool,
    pub startup_timeout: Duration,
}

/// An open database node.
pub struct Node {
    client: DefraClient,
    child: Option<Child>,
}

impl Node {
    pub async fn open(options: NodeOptions) -> Result<Self> {
        let http = reqwest::Client::new();

        if let Some(url) = &options.attach_url {
            tracing::debug!(url = %url, "attaching to running node");
            return Ok(Self {
                client: DefraClient::new(http, url.clone()),
                child: None,
            });
        }

        let addr = free_loopback_addr()?;
        let mut cmd = Command::new(&options.defradb_bin);
        cmd.args(start_args(&options.store, addr))
            .env(KEYRING_SECRET_ENV, &options.keyring_secret)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if options.dev {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null())
                .stderr(Stdio::null())
                .env("LOG_LEVEL", "error");
        }

        tracing::debug!(bin = %options.defradb_bin.display(), %addr, "starting node");
        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to start '{}' (is DefraDB installed?)",
                options.defradb_bin.display()
            )
        })?;

        if let Err(e) = wait_until_listening(&mut child, addr, options.startup_timeout).await {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(e);
        }

        Ok(Self {
            client: DefraClient::new(http, format!("http://{}/api/v0", addr)),
            child: Some(child),
        })
    }

    pub fn db(&self) -> &DefraClient {
        &self.client
    }

    /// Stops the node if this process started it, giving it
    /// [`GRACEFUL_STOP`] to flush its store.
    pub async fn close(mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            let status = stop_child(&mut child, GRACEFUL_STOP).await?;
            tracing::debug!(?status, "node stopped");
        }
        Ok(())
    }
}

/// Sends SIGTERM and waits up to `grace` for the child to exit, then kills
/// it. Where SIGTERM is unavailable the child is killed straight away.
pub async fn stop_child(child: &mut Child, grace: Duration) -> Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }
    if request_termination(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => return status.context("failed to reap node"),
            Err(_) => tracing::warn!(?grace, "node ignored SIGTERM, killing it"),
        }
    }
    child.start_kill().context("failed to stop node")?;
    child.wait().await.context("failed to reap node")
}

#[cfg(unix)]
fn request_termination(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: `pid` is our own unreaped child, so it cannot have been recycled.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) -> bool {
    false
}

/// Arguments for `defradb start`.
pub fn start_args(store: &NodeStore, addr: SocketAddr) -> Vec<String> {
    let mut args = vec![
        "start".to_string(),
        "--url".to_string(),
        addr.to_string(),
        "--no-p2p".to_string(),
    ];
    match store {
        NodeStore::Persistent(rootdir) => {
            args.push("--rootdir".to_string());
            args.push(rootdir.display().to_string());
            args.push("--store".to_string());
            args.push("badger".to_string());
        }
        NodeStore::Memory => {
            args.push("--store".to_string());
            args.push("memory".to_string());
        }
    }
    args
}

fn free_loopback_addr() -> Result<SocketAddr> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .context("failed to reserve a loopback port for the node")?;
    Ok(listener.local_addr()?)
}

async fn wait_until_listening(child: &mut Child, addr: SocketAddr, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            bail!("node exited during startup ({})", status);
        }
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("node did not start listening on {} within {:?}", addr, timeout);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// `<cwd>/.defra-kv`, or a relative `.defra-kv` if the cwd is unknown.
pub fn default_rootdir() -> PathBuf {
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(".defra-kv"),
        Err(_) => PathBuf::from(".defra-kv"),
    }
}

/// Expands a leading `~/`.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Expands `~/`, makes the path absolute and creates it if missing.
pub fn resolve_rootdir(path: &Path) -> Result<PathBuf> {
    let mut path = expand_home(path);
    if !path.is_absolute() {
        path = std::env::current_dir()
            .context("failed to read current directory")?
            .join(path);
    }
    std::fs::create_dir_all(&path)
        .with_context(|| format!("create rootdir: {}", path.display()))?;
    Ok(path)
}

/// Flag value first, then the environment, then [`DEV_KEYRING_SECRET`].
pub fn pick_keyring_secret(flag: Option<&str>, env: Option<&str>) -> String {
    [flag, env]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .unwrap_or(DEV_KEYRING_SECRET)
        .to_string()
}

/// Resolves the keyring secret and exports it as [`KEYRING_SECRET_ENV`].
pub fn resolve_keyring_secret(flag: Option<&str>) -> String {
    let env = std::env::var(KEYRING_SECRET_ENV).ok();
    let secret = pick_keyring_secret(flag, env.as_deref());
    std::env::set_var(KEYRING_SECRET_ENV, &secret);
    secret
}
