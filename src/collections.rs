//! Collection endpoints of the node's REST API.
//!
//! | Method | Path | [`DefraClient`] method |
//! |--------|------|------------------------|
//! | `POST` | `/collections/{name}` | [`create_document`](DefraClient::create_document), [`create_documents`](DefraClient::create_documents) |
//! | `GET` | `/collections/{name}/{docID}` | [`get_document`](DefraClient::get_document) |
//! | `GET` | `/collections/{name}` | [`document_ids`](DefraClient::document_ids) (event stream) |
//! | `PATCH` | `/collections/{name}/{docID}` | [`update_document`](DefraClient::update_document) |
//! | `PATCH` | `/collections/{name}` | [`update_with_filter`](DefraClient::update_with_filter) |
//! | `DELETE` | `/collections/{name}/{docID}` | [`delete_document`](DefraClient::delete_document) |
//! | `DELETE` | `/collections/{name}` | [`delete_with_filter`](DefraClient::delete_with_filter) |
//! | `GET` | `/collections` | [`collections`](DefraClient::collections) |
//! | `PATCH` | `/collections` | [`patch_collection`](DefraClient::patch_collection) |

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::defra::{read_json, read_text, DefraClient};

/// Result of a filtered update or delete.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MutationResult {
    #[serde(rename = "Count")]
    pub count: i64,
    #[serde(rename = "DocIDs", default)]
    pub doc_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CollectionDescription {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CollectionID", default)]
    pub collection_id: String,
    #[serde(rename = "VersionID", default)]
    pub version_id: String,
    #[serde(rename = "Fields", default)]
    pub fields: Vec<FieldDescription>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldDescription {
    #[serde(rename = "Name")]
    pub name: String,
    /// Numeric kind id, or a type name for relation fields.
    #[serde(rename = "Kind", default)]
    pub kind: Value,
    #[serde(rename = "FieldID", default)]
    pub field_id: String,
}

/// Narrows `GET /collections`. Empty means every active collection.
#[derive(Debug, Clone, Default)]
pub struct CollectionQuery {
    pub name: Option<String>,
    pub collection_id: Option<String>,
    pub version_id: Option<String>,
    pub get_inactive: bool,
}

impl CollectionQuery {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(name) = &self.name {
            params.push(("name", name.clone()));
        }
        if let Some(id) = &self.collection_id {
            params.push(("collection_id", id.clone()));
        }
        if let Some(id) = &self.version_id {
            params.push(("version_id", id.clone()));
        }
        if self.get_inactive {
            params.push(("get_inactive", "true".to_string()));
        }
        params
    }
}

#[derive(Serialize)]
struct FilterUpdate<'a> {
    filter: &'a Value,
    updater: &'a str,
}

#[derive(Serialize)]
struct FilterDelete<'a> {
    filter: &'a Value,
}

#[derive(Deserialize)]
struct DocIdEvent {
    #[serde(rename = "docID")]
    doc_id: String,
    #[serde(default)]
    error: String,
}

impl DefraClient {
    fn collection_url(&self, name: &str) -> String {
        self.endpoint(&format!("collections/{}", name))
    }

    fn document_url(&self, name: &str, doc_id: &str) -> String {
        self.endpoint(&format!("collections/{}/{}", name, doc_id))
    }

    pub async fn create_document(&self, collection: &str, doc: &Value) -> Result<()> {
        let request = self.http().post(self.collection_url(collection)).json(doc);
        read_text(request, "create document").await?;
        Ok(())
    }

    /// Creates several documents in one call. Returns the node's reply
    /// verbatim.
    pub async fn create_documents(&self, collection: &str, docs: &[Value]) -> Result<String> {
        let request = self.http().post(self.collection_url(collection)).json(docs);
        read_text(request, "create documents").await
    }

    pub async fn get_document(&self, collection: &str, doc_id: &str) -> Result<Value> {
        let request = self.http().get(self.document_url(collection, doc_id));
        read_json(request, "get document").await
    }

    /// Lists every docID in a collection. The node answers with a stream of
    /// `data:` events, one per document.
    pub async fn document_ids(&self, collection: &str) -> Result<Vec<String>> {
        let request = self.http().get(self.collection_url(collection));
        let body = read_text(request, "list documents").await?;
        parse_doc_id_events(&body)
    }

    pub async fn update_document(&self, collection: &str, doc_id: &str, patch: &Value) -> Result<()> {
        let request = self
            .http()
            .patch(self.document_url(collection, doc_id))
            .json(patch);
        read_text(request, "update document").await?;
        Ok(())
    }

    /// Applies `updater` (a JSON object as text) to every match of `filter`.
    pub async fn update_with_filter(
        &self,
        collection: &str,
        filter: &Value,
        updater: &str,
    ) -> Result<MutationResult> {
        let request = self
            .http()
            .patch(self.collection_url(collection))
            .json(&FilterUpdate { filter, updater });
        read_json(request, "update documents").await
    }

    pub async fn delete_document(&self, collection: &str, doc_id: &str) -> Result<()> {
        let request = self.http().delete(self.document_url(collection, doc_id));
        read_text(request, "delete document").await?;
        Ok(())
    }

    pub async fn delete_with_filter(&self, collection: &str, filter: &Value) -> Result<MutationResult> {
        let request = self
            .http()
            .delete(self.collection_url(collection))
            .json(&FilterDelete { filter });
        read_json(request, "delete documents").await
    }

    /// Collection descriptions. The node returns a single object when the
    /// query pins one collection, an array otherwise; both come back as a list.
    pub async fn collections(&self, query: &CollectionQuery) -> Result<Vec<CollectionDescription>> {
        let request = self
            .http()
            .get(self.endpoint("collections"))
            .query(&query.params());
        let value: Value = read_json(request, "list collections").await?;
        let list = match value {
            Value::Array(_) => value,
            Value::Null => Value::Array(Vec::new()),
            single => Value::Array(vec![single]),
        };
        Ok(serde_json::from_value(list)?)
    }

    /// Applies a JSON Patch to the collection definitions, with an optional
    /// Lens migration.
    pub async fn patch_collection(&self, patch: &Value, migration: Option<&Value>) -> Result<()> {
        let body = json!({
            "Patch": patch.to_string(),
            "Migration": migration.cloned().unwrap_or_else(|| json!({})),
        });
        let request = self.http().patch(self.endpoint("collections")).json(&body);
        read_text(request, "patch collection").await?;
        Ok(())
    }
}

/// Collects docIDs from `data:` event lines. A bare JSON string is accepted
/// as a docID; per-document errors fail the whole listing.
pub fn parse_doc_id_events(body: &str) -> Result<Vec<String>> {
    let mut doc_ids = Vec::new();
    let mut errors = Vec::new();

    for line in body.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        match serde_json::from_str::<DocIdEvent>(data) {
            Ok(event) if event.error.is_empty() => doc_ids.push(event.doc_id),
            Ok(event) => errors.push(format!("{}: {}", event.doc_id, event.error)),
            Err(_) => match serde_json::from_str::<String>(data) {
                Ok(doc_id) => doc_ids.push(doc_id),
                Err(e) => tracing::warn!(data, error = %e, "skipping unreadable docID event"),
            },
        }
    }

    if !errors.is_empty() {
        bail!("errors listing documents: {}", errors.join("; "));
    }
    Ok(doc_ids)
}
