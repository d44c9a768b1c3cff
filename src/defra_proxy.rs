//! Passthrough of `/defradb` requests to the node's HTTP API.
//!
//! The inbound body's shape selects the upstream endpoint, first match wins:
//!
//! | Body has | Variant | Upstream call |
//! |----------|---------|---------------|
//! | `query` | [`DefraRequest::Query`] | `POST /graphql`, whole body as JSON |
//! | `schema` | [`DefraRequest::Schema`] | `POST /schema`, SDL as `text/plain` |
//! | `purge` | [`DefraRequest::Purge`] | `POST /purge`, empty body |
//! | none of these | [`DefraRequest::Unrecognized`] | `POST /graphql` with a `null` body |

use axum::body::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;

use crate::defra::DefraClient;

/// Request headers never copied upstream. `accept-encoding` is dropped
/// because the relay returns the upstream body without its
/// `content-encoding`, so it must arrive uncompressed.
pub const HEADER_DENYLIST: [&str; 6] = [
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "expect",
    "accept-encoding",
];

/// Header name prefixes never copied upstream.
pub const HEADER_DENY_PREFIXES: [&str; 2] = ["sec-", "cf-"];

/// Returned for a successful upstream call with an empty body.
pub const EMPTY_SUCCESS_BODY: &str = r#"{"result":true}"#;

#[derive(Debug, Clone, PartialEq)]
pub enum DefraRequest {
    Query(Value),
    Schema(String),
    Purge,
    /// No recognised key; still sent to `/graphql`, with a `null` body.
    Unrecognized,
}

impl DefraRequest {
    pub fn from_body(body: Value) -> Self {
        let Some(map) = body.as_object() else {
            return DefraRequest::Unrecognized;
        };
        if map.contains_key("query") {
            DefraRequest::Query(body)
        } else if let Some(schema) = map.get("schema") {
            let sdl = match schema {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            DefraRequest::Schema(sdl)
        } else if map.contains_key("purge") {
            DefraRequest::Purge
        } else {
            DefraRequest::Unrecognized
        }
    }

    pub fn mode(&self) -> Option<&'static str> {
        match self {
            DefraRequest::Query(_) => Some("query"),
            DefraRequest::Schema(_) => Some("schema"),
            DefraRequest::Purge => Some("purge"),
            DefraRequest::Unrecognized => None,
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            DefraRequest::Query(_) | DefraRequest::Unrecognized => "graphql",
            DefraRequest::Schema(_) => "schema",
            DefraRequest::Purge => "purge",
        }
    }
}

pub fn is_forwardable(name: &HeaderName) -> bool {
    let name = name.as_str();
    !HEADER_DENYLIST.contains(&name)
        && !HEADER_DENY_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

/// Copies every header not on the denylist. Names are already lowercase.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_forwardable(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

#[derive(Debug)]
pub enum ProxyError {
    /// The node answered with a non-2xx status.
    Upstream { status: u16, body: String },
    /// The node could not be reached or the body could not be read.
    Transport(String),
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyError::Upstream { status, body } => write!(f, "defradb {}: {}", status, body),
            ProxyError::Transport(e) => write!(f, "defradb request failed: {}", e),
        }
    }
}

impl std::error::Error for ProxyError {}

/// Sends `request` upstream and returns the body to relay on success.
pub async fn forward(
    client: &DefraClient,
    request: DefraRequest,
    inbound: &HeaderMap,
) -> Result<Bytes, ProxyError> {
    let url = client.endpoint(request.endpoint());
    let mut headers = forwardable_headers(inbound);

    let body: Bytes = match request {
        DefraRequest::Query(body) => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Bytes::from(body.to_string())
        }
        DefraRequest::Schema(sdl) => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            Bytes::from(sdl)
        }
        DefraRequest::Purge => {
            headers.remove(CONTENT_TYPE);
            Bytes::new()
        }
        DefraRequest::Unrecognized => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Bytes::from_static(b"null")
        }
    };

    let response = client
        .http()
        .post(&url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| ProxyError::Transport(e.to_string()))?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| ProxyError::Transport(e.to_string()))?;

    if !status.is_success() {
        return Err(ProxyError::Upstream {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Bytes::from_static(EMPTY_SUCCESS_BODY.as_bytes()));
    }
    Ok(body)
}
