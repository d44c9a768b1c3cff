//! HTTP relay.
//!
//! A stateless dispatcher in front of a DefraDB node and a document store,
//! also serving a static front-end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/defradb` | Passthrough to the node, see [`crate::defra_proxy`] |
//! | `POST` | `/mongodb` | Document-store command protocol, see [`crate::command`] |
//! | `GET`/`HEAD` | anything else | Static files, see [`crate::static_files`] |
//!
//! # Error Contract
//!
//! API errors are JSON objects with a single `error` string:
//!
//! ```json
//! { "error": "db and coll are required" }
//! ```
//!
//! Malformed requests map to 400, upstream and store failures to 500. A
//! panicking handler is caught, logged, and answered with a 500 as well.

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::command::{CommandError, StoreCommand};
use crate::config::Config;
use crate::defra::DefraClient;
use crate::defra_proxy::{self, DefraRequest};
use crate::docstore::{DocumentStore, MongoStore};
use crate::static_files;

/// Content type of every API response.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Shared state handed to every handler. All members are safe to use from
/// concurrent requests.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub defra: DefraClient,
    pub store: Arc<dyn DocumentStore>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn DocumentStore>) -> Self {
        let defra = DefraClient::new(reqwest::Client::new(), config.defradb.url.clone());
        Self {
            config: Arc::new(config),
            defra,
            store,
        }
    }
}

/// Starts the relay with a MongoDB-backed document store.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_relay(config: &Config) -> anyhow::Result<()> {
    let store = MongoStore::connect(&config.mongodb.uri).await?;
    run_relay_with_store(config, Arc::new(store)).await
}

/// Like [`run_relay`], but with a caller-provided document store.
pub async fn run_relay_with_store(
    config: &Config,
    store: Arc<dyn DocumentStore>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config.clone(), store);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(
        addr = %bind_addr,
        static_root = %config.server.static_root.display(),
        defradb = %config.defradb.url,
        "relay listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let static_files = static_files::router(&state.config.server);

    Router::new()
        .route("/defradb", post(handle_defradb))
        .route("/mongodb", post(handle_mongodb))
        .fallback_service(static_files)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============ Responses ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// An API error rendered as `{"error": message}`.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::to_vec(&ErrorBody {
            error: self.message,
        })
        .unwrap_or_else(|_| br#"{"error":"internal error"}"#.to_vec());
        json_response(self.status, Bytes::from(body))
    }
}

impl From<CommandError> for AppError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::BadRequest(msg) => AppError::bad_request(msg),
            CommandError::Store(msg) => AppError::internal(msg),
        }
    }
}

fn json_response(status: StatusCode, body: Bytes) -> Response {
    (
        status,
        [(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
        body,
    )
        .into_response()
}

fn parse_json(body: &[u8]) -> Result<Value, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::bad_request(format!("invalid JSON body: {}", e)))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, backtrace = %std::backtrace::Backtrace::force_capture(), "handler panicked");
    AppError::internal("internal error").into_response()
}

// ============ POST /defradb ============

async fn handle_defradb(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = DefraRequest::from_body(parse_json(&body)?);
    match request.mode() {
        Some(mode) => tracing::debug!(mode, "forwarding to defradb"),
        None => tracing::debug!("no query/schema/purge key; forwarding as plain query"),
    }

    match defra_proxy::forward(&state.defra, request, &headers).await {
        Ok(body) => Ok(json_response(StatusCode::OK, body)),
        Err(e) => {
            tracing::warn!(error = %e, "defradb forward failed");
            Err(AppError::internal(e.to_string()))
        }
    }
}

// ============ POST /mongodb ============

async fn handle_mongodb(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let body = parse_json(&body)?;
    let command = StoreCommand::parse(&body, &state.config.mongodb.default_db)?;
    let op = command.op_name();

    let result = command.execute(state.store.as_ref()).await.map_err(|e| {
        tracing::warn!(op, error = %e, "document store command failed");
        AppError::from(e)
    })?;

    let body = serde_json::to_vec(&result).map_err(|e| AppError::internal(e.to_string()))?;
    Ok(json_response(StatusCode::OK, Bytes::from(body)))
}
