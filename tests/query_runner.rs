//! Binary-level tests for `defra-kv`.
//!
//! The runner is attached (`--url`) to a stub node serving `/graphql` and
//! `/schema`, so no `defradb` installation is needed.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex};
use tokio::process::Command;

fn defra_kv_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_defra-kv"))
}

#[derive(Default)]
struct StubNode {
    schemas: Mutex<Vec<String>>,
    queries: Mutex<Vec<Value>>,
}

async fn graphql(State(node): State<Arc<StubNode>>, Json(body): Json<Value>) -> Json<Value> {
    node.queries.lock().unwrap().push(body.clone());
    let query = body["query"].as_str().unwrap_or_default();

    if query.contains("__type") {
        let known = node.schemas.lock().unwrap().iter().any(|s| s.contains("type KV"));
        return Json(if known {
            json!({"data": {"__type": {"name": "KV"}}})
        } else {
            json!({"data": {"__type": null}})
        });
    }
    if query.contains("slow") {
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    }
    if query.contains("broken") {
        return Json(json!({"data": null, "errors": [{"message": "Cannot query field \"broken\""}]}));
    }
    Json(json!({"data": {"KV": [{"key": "a", "value": body["variables"]["v"].clone()}]}}))
}

async fn schema(State(node): State<Arc<StubNode>>, body: Bytes) -> Response {
    node.schemas
        .lock()
        .unwrap()
        .push(String::from_utf8_lossy(&body).into_owned());
    (StatusCode::OK, "[]").into_response()
}

async fn start_stub() -> (String, Arc<StubNode>, tokio::task::JoinHandle<()>) {
    let node = Arc::new(StubNode::default());
    let app = Router::new()
        .route("/api/v0/graphql", post(graphql))
        .route("/api/v0/schema", post(schema))
        .with_state(node.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/api/v0", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (url, node, handle)
}

async fn run_kv(args: &[&str]) -> Output {
    Command::new(defra_kv_binary())
        .args(args)
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .output()
        .await
        .expect("Failed to run defra-kv binary")
}

async fn run_kv_with_stdin(args: &[&str], input: &str) -> Output {
    use tokio::io::AsyncWriteExt;

    let mut child = Command::new(defra_kv_binary())
        .args(args)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to run defra-kv binary");
    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(input.as_bytes()).await.unwrap();
    drop(stdin);
    child.wait_with_output().await.unwrap()
}

#[tokio::test]
async fn test_no_query_exits_2() {
    let output = run_kv(&["--query", "   ", "--url", "http://127.0.0.1:1/api/v0"]).await;
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no query provided"), "stderr: {}", stderr);
}

#[tokio::test]
async fn test_non_object_vars_fail_before_connecting() {
    let output = run_kv(&[
        "--query",
        "query { KV { key } }",
        "--vars",
        "[1, 2]",
        "--url",
        "http://127.0.0.1:1/api/v0",
    ])
    .await;
    assert!(!output.status.success());
    assert_ne!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("expected a JSON object"), "stderr: {}", stderr);
}

#[tokio::test]
async fn test_success_prints_data_and_adds_schema_once() {
    let (url, node, handle) = start_stub().await;

    let args = [
        "--url",
        url.as_str(),
        "--query",
        "query { KV { key value } }",
        "--vars",
        r#"{"v": 42}"#,
        "--pretty=false",
    ];
    let output = run_kv(&args).await;
    assert_eq!(output.status.code(), Some(0), "{:?}", output);
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.trim(), r#"{"data":{"KV":[{"key":"a","value":42}]}}"#);

    let output = run_kv(&args).await;
    assert_eq!(output.status.code(), Some(0));

    let schemas = node.schemas.lock().unwrap().clone();
    assert_eq!(schemas.len(), 1);
    assert!(schemas[0].contains("updatedAt: DateTime @index"));

    handle.abort();
}

#[tokio::test]
async fn test_query_from_stdin_pretty_by_default() {
    let (url, _node, handle) = start_stub().await;

    let output = run_kv_with_stdin(&["--url", url.as_str()], "\n  query { KV { key } }\n").await;
    assert_eq!(output.status.code(), Some(0), "{:?}", output);
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("{\n  \"data\": {"), "stdout: {}", stdout);

    handle.abort();
}

#[tokio::test]
async fn test_graphql_errors_exit_1() {
    let (url, _node, handle) = start_stub().await;

    let output = run_kv(&["--url", url.as_str(), "--query", "query { broken }"]).await;
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Cannot query field"), "stderr: {}", stderr);

    handle.abort();
}

#[tokio::test]
async fn test_timeout_reported_as_query_error() {
    let (url, _node, handle) = start_stub().await;

    let output = run_kv(&[
        "--url",
        url.as_str(),
        "--timeout",
        "200ms",
        "--query",
        "query { slow }",
    ])
    .await;
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("request timed out after 200ms"),
        "stderr: {}",
        stderr
    );

    handle.abort();
}

#[cfg(unix)]
#[tokio::test]
async fn test_sigterm_cancels_query_with_exit_1() {
    let (url, node, handle) = start_stub().await;

    let child = Command::new(defra_kv_binary())
        .args(["--url", url.as_str(), "--timeout", "30s", "--query", "query { slow }"])
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to run defra-kv binary");

    // Wait until the slow query is in flight.
    for _ in 0..50 {
        if node.queries.lock().unwrap().iter().any(|q| q["query"] == "query { slow }") {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let pid = child.id().unwrap() as libc::pid_t;
    assert_eq!(unsafe { libc::kill(pid, libc::SIGTERM) }, 0);

    let started = std::time::Instant::now();
    let output = child.wait_with_output().await.unwrap();
    assert!(started.elapsed() < std::time::Duration::from_secs(2));
    assert_eq!(output.status.code(), Some(1), "{:?}", output);
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("request canceled by signal"), "stderr: {}", stderr);

    handle.abort();
}

#[cfg(unix)]
#[tokio::test]
async fn test_sigterm_during_node_startup_exits_1() {
    use std::os::unix::fs::PermissionsExt;

    // A `defradb` that starts but never listens.
    let tmp = tempfile::TempDir::new().unwrap();
    let started = tmp.path().join("started");
    let fake_bin = tmp.path().join("defradb");
    std::fs::write(
        &fake_bin,
        format!(
            "#!/bin/sh\ntouch '{}'\nwhile :; do sleep 0.1; done\n",
            started.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&fake_bin, std::fs::Permissions::from_mode(0o755)).unwrap();

    let child = Command::new(defra_kv_binary())
        .arg("--rootdir")
        .arg(tmp.path().join("data"))
        .arg("--defradb-bin")
        .arg(&fake_bin)
        .args(["--query", "query { KV { key } }"])
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to run defra-kv binary");

    for _ in 0..100 {
        if started.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(started.exists(), "fake node never started");
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let pid = child.id().unwrap() as libc::pid_t;
    assert_eq!(unsafe { libc::kill(pid, libc::SIGTERM) }, 0);

    let output = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait_with_output())
        .await
        .expect("defra-kv kept waiting for the node after SIGTERM")
        .unwrap();
    assert_eq!(output.status.code(), Some(1), "{:?}", output);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("interrupted while starting the node"), "stderr: {}", stderr);
}
