//! Client calls for a node's peer-to-peer endpoints.
//!
//! Only the HTTP surface is covered: peer info, replicators, replicated
//! collections and documents, and on-demand document sync. Nodes spawned by
//! this crate run with `--no-p2p`, so these are meant for attached nodes.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::defra::{read_json, read_text, DefraClient};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Addresses", default)]
    pub addresses: Vec<String>,
}

/// Body of replicator add/remove calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicatorParams {
    #[serde(rename = "Info")]
    pub info: PeerInfo,
    #[serde(rename = "Collections")]
    pub collections: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Replicator {
    #[serde(rename = "Info")]
    pub info: PeerInfo,
    #[serde(rename = "CollectionIDs", default)]
    pub collection_ids: Vec<String>,
    #[serde(rename = "Status", default)]
    pub status: u8,
    #[serde(rename = "LastStatusChange", default)]
    pub last_status_change: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRequest {
    #[serde(rename = "collectionName")]
    pub collection_name: String,
    #[serde(rename = "docIDs")]
    pub doc_ids: Vec<String>,
    /// Go duration text, e.g. `"30s"`. Node default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl DefraClient {
    pub async fn peer_info(&self) -> Result<PeerInfo> {
        read_json(self.http().get(self.endpoint("p2p/info")), "peer info").await
    }

    pub async fn add_replicator(&self, params: &ReplicatorParams) -> Result<()> {
        let request = self.http().post(self.endpoint("p2p/replicators")).json(params);
        read_text(request, "add replicator").await?;
        Ok(())
    }

    pub async fn replicators(&self) -> Result<Vec<Replicator>> {
        read_json(self.http().get(self.endpoint("p2p/replicators")), "list replicators").await
    }

    pub async fn remove_replicator(&self, params: &ReplicatorParams) -> Result<()> {
        let request = self.http().delete(self.endpoint("p2p/replicators")).json(params);
        read_text(request, "remove replicator").await?;
        Ok(())
    }

    pub async fn add_peer_collections(&self, collection_ids: &[String]) -> Result<()> {
        let request = self
            .http()
            .post(self.endpoint("p2p/collections"))
            .json(collection_ids);
        read_text(request, "add peer collections").await?;
        Ok(())
    }

    pub async fn peer_collections(&self) -> Result<Vec<String>> {
        read_json(self.http().get(self.endpoint("p2p/collections")), "list peer collections").await
    }

    pub async fn remove_peer_collections(&self, collection_ids: &[String]) -> Result<()> {
        let request = self
            .http()
            .delete(self.endpoint("p2p/collections"))
            .json(collection_ids);
        read_text(request, "remove peer collections").await?;
        Ok(())
    }

    pub async fn add_peer_documents(&self, doc_ids: &[String]) -> Result<()> {
        let request = self.http().post(self.endpoint("p2p/documents")).json(doc_ids);
        read_text(request, "add peer documents").await?;
        Ok(())
    }

    pub async fn peer_documents(&self) -> Result<Vec<String>> {
        read_json(self.http().get(self.endpoint("p2p/documents")), "list peer documents").await
    }

    /// Asks the network for the given documents and waits for the sync.
    pub async fn sync_documents(&self, request: &SyncRequest) -> Result<()> {
        let http_request = self
            .http()
            .post(self.endpoint("p2p/documents/sync"))
            .json(request);
        read_text(http_request, "document sync").await?;
        Ok(())
    }
}
