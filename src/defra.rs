//! DefraDB HTTP API client.
//!
//! Defines the [`Database`] trait used by the query runner and the RAG
//! pipeline, and [`DefraClient`], its implementation over a node's
//! `/api/v0` endpoints:
//!
//! | Method | Path | Used for |
//! |--------|------|----------|
//! | `POST` | `/graphql` | queries and mutations |
//! | `GET` | `/graphql?query=` | simple queries without variables |
//! | `POST` | `/schema` | adding SDL type definitions (`text/plain`) |
//!
//! The remaining REST surface lives next to it: [`crate::collections`],
//! [`crate::backup`] and [`crate::p2p`] add further `DefraClient` methods
//! built on [`read_json`] and [`read_text`].
//!
//! GraphQL-level failures come back as HTTP 200 with an `errors` array and are
//! returned as data in [`GqlResponse`]; a non-2xx from `/graphql` is folded
//! into a single error the same way. Transport failures and schema
//! rejections are returned as `Err`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One structured GraphQL error. Fields other than `message` are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GqlError {
    pub message: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extra: Map::new(),
        }
    }
}

/// Result of a GraphQL request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GqlResponse {
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GqlError>,
}

impl GqlResponse {
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            data: Value::Null,
            errors: vec![GqlError::new(message)],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The database operations this crate needs from a node.
#[async_trait]
pub trait Database: Send + Sync {
    /// Executes a query or mutation. GraphQL errors are reported inside the
    /// response, not as `Err`.
    async fn exec_request(
        &self,
        query: &str,
        variables: Option<&Map<String, Value>>,
    ) -> Result<GqlResponse>;

    /// Registers one or more SDL type definitions.
    async fn add_schema(&self, sdl: &str) -> Result<Value>;
}

/// Error body returned by the node for non-2xx responses.
#[derive(Debug, Deserialize)]
struct DefraErrorBody {
    error: String,
}

#[derive(Serialize)]
struct GqlRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<&'a Map<String, Value>>,
}

/// Client for one node's HTTP API.
#[derive(Debug, Clone)]
pub struct DefraClient {
    http: reqwest::Client,
    base_url: String,
}

impl DefraClient {
    /// `base_url` includes the API prefix, e.g. `http://localhost:9181/api/v0`.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Runs a query through `GET /graphql`. Unlike
    /// [`Database::exec_request`], a non-2xx status is an `Err`.
    pub async fn exec_get(&self, query: &str) -> Result<GqlResponse> {
        let request = self
            .http
            .get(self.endpoint("graphql"))
            .query(&[("query", query)]);
        read_json(request, "GraphQL GET").await
    }
}

/// Sends `request` and returns the body of a 2xx response. Other statuses
/// become an error carrying the node's message.
pub async fn read_text(request: RequestBuilder, what: &str) -> Result<String> {
    let response = request
        .send()
        .await
        .with_context(|| format!("{} request failed", what))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("failed to read {} response", what))?;
    if !status.is_success() {
        bail!("{} failed with {}: {}", what, status, error_message(&body));
    }
    Ok(body)
}

/// Like [`read_text`], decoding the body as JSON.
pub async fn read_json<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> Result<T> {
    let body = read_text(request, what).await?;
    serde_json::from_str(&body)
        .with_context(|| format!("invalid {} response: {}", what, truncate(&body, 200)))
}

#[async_trait]
impl Database for DefraClient {
    async fn exec_request(
        &self,
        query: &str,
        variables: Option<&Map<String, Value>>,
    ) -> Result<GqlResponse> {
        let response = self
            .http
            .post(self.endpoint("graphql"))
            .json(&GqlRequest { query, variables })
            .send()
            .await
            .context("GraphQL request failed")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read GraphQL response")?;

        if !status.is_success() {
            return Ok(GqlResponse::from_error(format!(
                "{}: {}",
                status,
                error_message(&body)
            )));
        }

        serde_json::from_str(&body)
            .with_context(|| format!("invalid GraphQL response: {}", truncate(&body, 200)))
    }

    async fn add_schema(&self, sdl: &str) -> Result<Value> {
        let response = self
            .http
            .post(self.endpoint("schema"))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(sdl.to_string())
            .send()
            .await
            .context("schema request failed")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("schema rejected with {}: {}", status, error_message(&body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).context("invalid schema response")
    }
}

/// Extracts `error` from a node error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<DefraErrorBody>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_joins_cleanly() {
        let client = DefraClient::new(reqwest::Client::new(), "http://localhost:9181/api/v0/");
        assert_eq!(client.base_url(), "http://localhost:9181/api/v0");
        assert_eq!(
            client.endpoint("/graphql"),
            "http://localhost:9181/api/v0/graphql"
        );
        assert_eq!(client.endpoint("schema"), "http://localhost:9181/api/v0/schema");
    }

    #[test]
    fn test_response_keeps_extra_error_fields() {
        let raw = json!({
            "data": null,
            "errors": [{"message": "boom", "path": ["KV"], "extensions": {"code": 7}}]
        });
        let resp: GqlResponse = serde_json::from_value(raw.clone()).unwrap();
        assert!(!resp.is_ok());
        assert_eq!(resp.errors[0].message, "boom");
        assert_eq!(resp.errors[0].extra["path"], json!(["KV"]));
        assert_eq!(serde_json::to_value(&resp.errors).unwrap(), raw["errors"]);
    }

    #[test]
    fn test_response_without_errors_is_ok() {
        let resp: GqlResponse = serde_json::from_value(json!({"data": {"KV": []}})).unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.data, json!({"KV": []}));
    }

    #[test]
    fn test_error_message_prefers_error_field() {
        assert_eq!(error_message(r#"{"error":"no such collection"}"#), "no such collection");
        assert_eq!(error_message(" plain failure \n"), "plain failure");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
