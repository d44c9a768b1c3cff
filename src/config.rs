//! TOML configuration for the relay and the RAG demo.
//!
//! Every field has a default, so a missing `--config` flag yields
//! [`Config::default()`] and a partial file only overrides what it names.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub defradb: DefraConfig,
    #[serde(default)]
    pub mongodb: MongoConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub rag: RagConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory served for `GET`/`HEAD` requests.
    #[serde(default = "default_static_root")]
    pub static_root: PathBuf,
    /// Single-page-app entry document, relative to `static_root`.
    #[serde(default = "default_spa_entry")]
    pub spa_entry: PathBuf,
    #[serde(default = "default_csp")]
    pub content_security_policy: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_root: default_static_root(),
            spa_entry: default_spa_entry(),
            content_security_policy: default_csp(),
        }
    }
}

impl ServerConfig {
    pub fn spa_entry_path(&self) -> PathBuf {
        self.static_root.join(&self.spa_entry)
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}
fn default_static_root() -> PathBuf {
    PathBuf::from("./public")
}
fn default_spa_entry() -> PathBuf {
    PathBuf::from("index.html")
}
fn default_csp() -> String {
    "default-src 'self'; connect-src 'self'; img-src 'self' data:; style-src 'self' 'unsafe-inline'"
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DefraConfig {
    /// Base URL of the node's HTTP API, including the `/api/v0` prefix.
    #[serde(default = "default_defra_url")]
    pub url: String,
}

impl Default for DefraConfig {
    fn default() -> Self {
        Self {
            url: default_defra_url(),
        }
    }
}

pub fn default_defra_url() -> String {
    "http://localhost:9181/api/v0".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MongoConfig {
    #[serde(default = "default_mongo_uri")]
    pub uri: String,
    /// Database used by `command` when the request names none.
    #[serde(default = "default_mongo_db")]
    pub default_db: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: default_mongo_uri(),
            default_db: default_mongo_db(),
        }
    }
}

fn default_mongo_uri() -> String {
    "mongodb://localhost:27017".to_string()
}
fn default_mongo_db() -> String {
    "admin".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    #[serde(default = "default_defradb_bin")]
    pub defradb_bin: PathBuf,
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            defradb_bin: default_defradb_bin(),
            startup_timeout_secs: default_startup_timeout(),
        }
    }
}

pub fn default_defradb_bin() -> PathBuf {
    PathBuf::from("defradb")
}
pub fn default_startup_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RagConfig {
    /// OpenAI-compatible API root (Ollama exposes one under `/v1`).
    #[serde(default = "default_llm_url")]
    pub llm_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_question")]
    pub question: String,
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            llm_url: default_llm_url(),
            llm_model: default_llm_model(),
            embedding_model: default_embedding_model(),
            question: default_question(),
            data_path: default_data_path(),
            similarity_threshold: default_similarity_threshold(),
            top_k: default_top_k(),
        }
    }
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_llm_model() -> String {
    "gemma:2b".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_question() -> String {
    "When did the Monarch Company exist?".to_string()
}
fn default_data_path() -> PathBuf {
    PathBuf::from("wiki.jsonl")
}
fn default_similarity_threshold() -> f64 {
    0.63
}
fn default_top_k() -> usize {
    2
}

/// Loads the config file at `path`, or defaults when `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        None => Config::default(),
    };

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.server.bind.parse::<SocketAddr>().is_err() {
        bail!(
            "server.bind must be a socket address (got '{}')",
            config.server.bind
        );
    }

    for (field, url) in [
        ("defradb.url", &config.defradb.url),
        ("rag.llm_url", &config.rag.llm_url),
    ] {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("{} must be an http(s) URL (got '{}')", field, url);
        }
    }

    if !config.mongodb.uri.starts_with("mongodb://")
        && !config.mongodb.uri.starts_with("mongodb+srv://")
    {
        bail!("mongodb.uri must use the mongodb:// or mongodb+srv:// scheme");
    }

    if !(-1.0..=1.0).contains(&config.rag.similarity_threshold) {
        bail!("rag.similarity_threshold must be in [-1.0, 1.0]");
    }

    if config.rag.top_k < 1 {
        bail!("rag.top_k must be >= 1");
    }

    if config.node.startup_timeout_secs < 1 {
        bail!("node.startup_timeout_secs must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:8787");
        assert_eq!(cfg.defradb.url, "http://localhost:9181/api/v0");
        assert_eq!(cfg.mongodb.default_db, "admin");
        assert_eq!(cfg.rag.top_k, 2);
        assert!((cfg.rag.similarity_threshold - 0.63).abs() < f64::EPSILON);
        assert_eq!(
            cfg.server.spa_entry_path(),
            PathBuf::from("./public/index.html")
        );
    }

    #[test]
    fn test_partial_file_overrides() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("relay.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "127.0.0.1:9000"
static_root = "/srv/www"

[rag]
top_k = 5
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path.as_path())).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
        assert_eq!(cfg.server.static_root, PathBuf::from("/srv/www"));
        assert_eq!(cfg.server.spa_entry, PathBuf::from("index.html"));
        assert_eq!(cfg.rag.top_k, 5);
        assert_eq!(cfg.rag.llm_model, "gemma:2b");
    }

    #[test]
    fn test_rejects_bad_bind() {
        let cfg: Config = toml::from_str("[server]\nbind = \"localhost\"").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let cfg: Config = toml::from_str("[rag]\nsimilarity_threshold = 1.5").unwrap();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    fn test_rejects_non_http_defra_url() {
        let cfg: Config = toml::from_str("[defradb]\nurl = \"localhost:9181\"").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_missing_file_path_errors() {
        let err = load_config(Some(Path::new("/nonexistent/relay.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
