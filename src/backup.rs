//! Backup export and import through `POST /backup/export` and
//! `POST /backup/import`. The file path is resolved on the node's host.

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use crate::defra::{read_text, DefraClient};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupConfig {
    pub filepath: PathBuf,
    /// Collections to include; empty means all.
    pub collections: Vec<String>,
    pub format: String,
    pub pretty: bool,
}

impl BackupConfig {
    /// Every collection, pretty JSON.
    pub fn json(filepath: impl Into<PathBuf>) -> Self {
        Self {
            filepath: filepath.into(),
            collections: Vec::new(),
            format: "json".to_string(),
            pretty: true,
        }
    }
}

impl DefraClient {
    pub async fn export_backup(&self, config: &BackupConfig) -> Result<()> {
        let request = self.http().post(self.endpoint("backup/export")).json(config);
        read_text(request, "backup export").await?;
        tracing::debug!(path = %config.filepath.display(), "backup exported");
        Ok(())
    }

    pub async fn import_backup(&self, config: &BackupConfig) -> Result<()> {
        let request = self.http().post(self.endpoint("backup/import")).json(config);
        read_text(request, "backup import").await?;
        Ok(())
    }
}
