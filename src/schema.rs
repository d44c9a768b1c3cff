//! Schema definitions and idempotent schema setup.

use anyhow::{Context, Result};

use crate::defra::Database;

/// Key-value record type used by the query runner.
pub const KV_SCHEMA: &str = r#"
type KV {
  key: String @index
  value: JSON
  updatedAt: DateTime @index
}
"#;

/// Wiki articles for the RAG demo. `text_v` is filled in by the node's
/// embedding provider whenever `text` is written.
pub const WIKI_SCHEMA: &str = r#"
type Wiki {
  text: String
  category: String
  text_v: [Float32!] @embedding(fields: ["text"], provider: "ollama", model: "nomic-embed-text")
}
"#;

/// True when introspection reports a type called `name`. Any error counts
/// as "absent".
pub async fn schema_exists(db: &dyn Database, name: &str) -> bool {
    let query = format!(r#"query {{ __type(name: "{}") {{ name }} }}"#, name);
    match db.exec_request(&query, None).await {
        Ok(resp) if resp.is_ok() => resp
            .data
            .pointer("/__type/name")
            .and_then(|v| v.as_str())
            .is_some_and(|found| found == name),
        Ok(resp) => {
            tracing::debug!(schema = name, errors = ?resp.errors, "introspection failed");
            false
        }
        Err(e) => {
            tracing::debug!(schema = name, error = %e, "introspection failed");
            false
        }
    }
}

/// Adds `sdl` unless a type called `name` already exists.
pub async fn ensure_schema(db: &dyn Database, name: &str, sdl: &str) -> Result<()> {
    if schema_exists(db, name).await {
        tracing::debug!(schema = name, "schema already present");
        return Ok(());
    }
    db.add_schema(sdl)
        .await
        .with_context(|| format!("{} schema add failed", name))?;
    tracing::info!(schema = name, "schema added");
    Ok(())
}
