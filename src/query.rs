//! Single-request query runner behind `defra-kv`.
//!
//! Reads one GraphQL request from a flag or stdin, runs it against a node
//! with a timeout and renders the outcome. Process concerns (signals, exit
//! codes, node lifecycle) stay in the binary.

use anyhow::{bail, Context, Result};
use serde_json::{json, Map, Value};
use std::io::Read;
use std::time::Duration;

use crate::defra::{Database, GqlResponse};

/// One query/mutation with its variables and time budget.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub variables: Option<Map<String, Value>>,
    pub timeout: Duration,
}

/// Returns the trimmed flag value, or the trimmed contents of `stdin` when
/// the flag is empty. `Ok(None)` means neither source held a query.
pub fn read_query(flag: &str, stdin: impl Read) -> Result<Option<String>> {
    let query = flag.trim();
    if !query.is_empty() {
        return Ok(Some(query.to_string()));
    }

    let mut buf = String::new();
    let mut stdin = stdin;
    stdin.read_to_string(&mut buf).context("read stdin")?;
    let query = buf.trim();
    Ok((!query.is_empty()).then(|| query.to_string()))
}

/// Parses `--vars`. Blank input means no variables; anything else must be a
/// JSON object.
pub fn parse_vars(raw: &str) -> Result<Option<Map<String, Value>>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(raw).context("parse --vars")? {
        Value::Object(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        other => bail!("parse --vars: expected a JSON object, got {}", type_name(&other)),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Runs the request, turning a timeout into a GraphQL error.
pub async fn run_query(db: &dyn Database, request: &QueryRequest) -> Result<GqlResponse> {
    let exec = db.exec_request(&request.query, request.variables.as_ref());
    match tokio::time::timeout(request.timeout, exec).await {
        Ok(result) => result,
        Err(_) => Ok(GqlResponse::from_error(format!(
            "request timed out after {}",
            humantime::format_duration(request.timeout)
        ))),
    }
}

/// `{"data": ...}`, indented by two spaces when `pretty`.
pub fn render_data(data: &Value, pretty: bool) -> Result<String> {
    let out = json!({ "data": data });
    let rendered = if pretty {
        serde_json::to_string_pretty(&out)?
    } else {
        serde_json::to_string(&out)?
    };
    Ok(rendered)
}

/// The error list, always indented.
pub fn render_errors(response: &GqlResponse) -> Result<String> {
    Ok(serde_json::to_string_pretty(&response.errors)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn test_read_query_prefers_flag() {
        let q = read_query("  query { KV { key } }  ", "ignored".as_bytes()).unwrap();
        assert_eq!(q.as_deref(), Some("query { KV { key } }"));
    }

    #[test]
    fn test_read_query_falls_back_to_stdin() {
        let q = read_query("", "\n query { KV { value } }\n".as_bytes()).unwrap();
        assert_eq!(q.as_deref(), Some("query { KV { value } }"));
    }

    #[test]
    fn test_read_query_empty_everywhere() {
        assert_eq!(read_query("   ", " \n\t".as_bytes()).unwrap(), None);
    }

    #[test]
    fn test_parse_vars() {
        assert!(parse_vars("").unwrap().is_none());
        assert!(parse_vars("  ").unwrap().is_none());

        let vars = parse_vars(r#"{"key": "a", "value": {"n": 1}}"#).unwrap().unwrap();
        assert_eq!(vars["key"], "a");
        assert_eq!(vars["value"]["n"], 1);
    }

    #[test]
    fn test_parse_vars_rejects_malformed_and_non_objects() {
        assert!(parse_vars("{not json").is_err());
        let err = parse_vars("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_render_data() {
        let data = json!({"KV": [{"key": "a"}]});
        assert_eq!(
            render_data(&data, false).unwrap(),
            r#"{"data":{"KV":[{"key":"a"}]}}"#
        );
        let pretty = render_data(&data, true).unwrap();
        assert!(pretty.starts_with("{\n  \"data\": {"));
    }

    #[test]
    fn test_render_null_data() {
        assert_eq!(render_data(&Value::Null, false).unwrap(), r#"{"data":null}"#);
    }

    struct SlowDb;

    #[async_trait]
    impl Database for SlowDb {
        async fn exec_request(
            &self,
            _query: &str,
            _variables: Option<&Map<String, Value>>,
        ) -> Result<GqlResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(GqlResponse::default())
        }

        async fn add_schema(&self, _sdl: &str) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_timeout_becomes_error() {
        let request = QueryRequest {
            query: "query { KV { key } }".to_string(),
            variables: None,
            timeout: Duration::from_millis(20),
        };
        let resp = run_query(&SlowDb, &request).await.unwrap();
        assert!(!resp.is_ok());
        assert_eq!(resp.errors[0].message, "request timed out after 20ms");
        assert!(render_errors(&resp).unwrap().contains("timed out"));
    }
}
