//! JSON command protocol of the relay's `/mongodb` route.
//!
//! A request body names an `op` plus its target:
//!
//! ```json
//! { "op": "find", "db": "app", "coll": "users", "filter": {"active": true}, "limit": 50 }
//! ```
//!
//! | `op` | Needs `db`/`coll` | Extra fields | Response |
//! |------|-------------------|--------------|----------|
//! | `find` | yes | `filter`, `projection`, `sort`, `limit`, `skip` | `{"docs": [...]}` |
//! | `insertOne` | yes | `doc` | `{"insertedId": ...}` |
//! | `updateOne` | yes | `filter`, `update`, `options.upsert` | `{"matchedCount", "modifiedCount", "upsertedId"}` |
//! | `deleteOne` | yes | `filter` | `{"deletedCount": n}` |
//! | `aggregate` | yes | `pipeline` | `{"docs": [...]}` |
//! | `command` | `db` optional | `command`, `commandBody` | `{"result": ...}` |
//! | `purge` | no | | `{"success", "dbCount", "dropCount"}` |
//!
//! Bodies are decoded once into a [`StoreCommand`] and then executed against
//! a [`DocumentStore`].

use serde_json::{json, Map, Value};

use crate::docstore::{DocumentStore, FindQuery, Update, SYSTEM_DATABASES};

pub const DEFAULT_FIND_LIMIT: i64 = 20;
pub const MAX_FIND_LIMIT: i64 = 500;

/// A decoded `/mongodb` request.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    Purge,
    Command {
        db: String,
        command: Map<String, Value>,
    },
    Find {
        db: String,
        coll: String,
        query: FindQuery,
    },
    InsertOne {
        db: String,
        coll: String,
        doc: Map<String, Value>,
    },
    UpdateOne {
        db: String,
        coll: String,
        filter: Map<String, Value>,
        update: Update,
        upsert: bool,
    },
    DeleteOne {
        db: String,
        coll: String,
        filter: Map<String, Value>,
    },
    Aggregate {
        db: String,
        coll: String,
        pipeline: Vec<Map<String, Value>>,
    },
}

/// Why a command could not be served.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    /// The request itself is malformed (HTTP 400).
    BadRequest(String),
    /// The store rejected or failed the operation (HTTP 500).
    Store(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::BadRequest(msg) | CommandError::Store(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for CommandError {}

fn bad_request(message: impl Into<String>) -> CommandError {
    CommandError::BadRequest(message.into())
}

impl StoreCommand {
    /// Decodes a request body. `default_db` is used by `command` when the
    /// body names no database.
    pub fn parse(body: &Value, default_db: &str) -> Result<Self, CommandError> {
        let body = body
            .as_object()
            .ok_or_else(|| bad_request("request body must be a JSON object"))?;
        let op = body.get("op").and_then(Value::as_str).unwrap_or_default();

        match op {
            "purge" => Ok(StoreCommand::Purge),
            "command" => {
                let db = non_empty_str(body, "db").unwrap_or(default_db).to_string();
                let command = command_document(body)?;
                Ok(StoreCommand::Command { db, command })
            }
            "find" | "insertOne" | "updateOne" | "deleteOne" | "aggregate" => {
                let (db, coll) = match (non_empty_str(body, "db"), non_empty_str(body, "coll")) {
                    (Some(db), Some(coll)) => (db.to_string(), coll.to_string()),
                    _ => return Err(bad_request("db and coll are required")),
                };
                parse_collection_op(op, db, coll, body)
            }
            _ => Err(bad_request("unknown op")),
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            StoreCommand::Purge => "purge",
            StoreCommand::Command { .. } => "command",
            StoreCommand::Find { .. } => "find",
            StoreCommand::InsertOne { .. } => "insertOne",
            StoreCommand::UpdateOne { .. } => "updateOne",
            StoreCommand::DeleteOne { .. } => "deleteOne",
            StoreCommand::Aggregate { .. } => "aggregate",
        }
    }

    /// Runs the command and builds the JSON reply.
    pub async fn execute(self, store: &dyn DocumentStore) -> Result<Value, CommandError> {
        let op = self.op_name();
        let store_err = |e: anyhow::Error| CommandError::Store(format!("{}: {:#}", op, e));

        match self {
            StoreCommand::Purge => purge_all(store).await.map_err(store_err),
            StoreCommand::Command { db, command } => {
                let reply = store.run_command(&db, command).await.map_err(store_err)?;
                Ok(json!({ "result": reply }))
            }
            StoreCommand::Find { db, coll, query } => {
                let docs = store.find(&db, &coll, query).await.map_err(store_err)?;
                Ok(json!({ "docs": docs }))
            }
            StoreCommand::InsertOne { db, coll, doc } => {
                let id = store.insert_one(&db, &coll, doc).await.map_err(store_err)?;
                Ok(json!({ "insertedId": id }))
            }
            StoreCommand::UpdateOne {
                db,
                coll,
                filter,
                update,
                upsert,
            } => {
                let summary = store
                    .update_one(&db, &coll, filter, update, upsert)
                    .await
                    .map_err(store_err)?;
                Ok(json!(summary))
            }
            StoreCommand::DeleteOne { db, coll, filter } => {
                let deleted = store.delete_one(&db, &coll, filter).await.map_err(store_err)?;
                Ok(json!({ "deletedCount": deleted }))
            }
            StoreCommand::Aggregate { db, coll, pipeline } => {
                let docs = store
                    .aggregate(&db, &coll, pipeline)
                    .await
                    .map_err(store_err)?;
                Ok(json!({ "docs": docs }))
            }
        }
    }
}

fn parse_collection_op(
    op: &str,
    db: String,
    coll: String,
    body: &Map<String, Value>,
) -> Result<StoreCommand, CommandError> {
    let command = match op {
        "find" => StoreCommand::Find {
            db,
            coll,
            query: FindQuery {
                filter: object_field(body, "filter")?.unwrap_or_default(),
                projection: object_field(body, "projection")?,
                sort: object_field(body, "sort")?,
                limit: clamp_limit(body.get("limit")),
                skip: clamp_skip(body.get("skip")),
            },
        },
        "insertOne" => StoreCommand::InsertOne {
            db,
            coll,
            doc: object_field(body, "doc")?.ok_or_else(|| bad_request("doc is required"))?,
        },
        "updateOne" => {
            let update = match body.get("update") {
                Some(Value::Object(doc)) => Update::Document(doc.clone()),
                Some(Value::Array(_)) => Update::Pipeline(object_list(body, "update")?),
                _ => return Err(bad_request("update must be an object or a pipeline array")),
            };
            let upsert = body
                .get("options")
                .and_then(|o| o.get("upsert"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            StoreCommand::UpdateOne {
                db,
                coll,
                filter: object_field(body, "filter")?.unwrap_or_default(),
                update,
                upsert,
            }
        }
        "deleteOne" => StoreCommand::DeleteOne {
            db,
            coll,
            filter: object_field(body, "filter")?.unwrap_or_default(),
        },
        "aggregate" => StoreCommand::Aggregate {
            db,
            coll,
            pipeline: object_list(body, "pipeline")?,
        },
        _ => return Err(bad_request("unknown op")),
    };
    Ok(command)
}

/// Builds the command document for `op: "command"`.
///
/// `command` is either the full document or a command name; with a name the
/// document is `{<name>: 1}` followed by the keys of `commandBody`. Without
/// `command`, `commandBody` alone is used.
fn command_document(body: &Map<String, Value>) -> Result<Map<String, Value>, CommandError> {
    let extra = object_field(body, "commandBody")?;

    let command = match body.get("command") {
        Some(Value::Object(doc)) => doc.clone(),
        Some(Value::String(name)) if !name.trim().is_empty() => {
            let name = name.trim();
            let mut doc = Map::new();
            doc.insert(name.to_string(), json!(1));
            for (key, value) in extra.into_iter().flatten() {
                if key != name {
                    doc.insert(key, value);
                }
            }
            doc
        }
        None | Some(Value::Null) => extra.unwrap_or_default(),
        Some(_) => return Err(bad_request("command must be an object or a command name")),
    };

    if command.is_empty() {
        return Err(bad_request("command requires at least one key"));
    }
    Ok(command)
}

async fn purge_all(store: &dyn DocumentStore) -> anyhow::Result<Value> {
    let names = store.list_database_names().await?;
    let targets: Vec<String> = names
        .into_iter()
        .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
        .collect();

    let mut dropped = 0usize;
    for name in &targets {
        match store.drop_database(name).await {
            Ok(()) => dropped += 1,
            Err(e) => tracing::warn!(db = %name, error = %e, "drop failed during purge"),
        }
    }

    tracing::info!(db_count = targets.len(), drop_count = dropped, "purge finished");
    Ok(json!({
        "success": dropped == targets.len(),
        "dbCount": targets.len(),
        "dropCount": dropped,
    }))
}

/// Integer from a JSON number (fractions truncated) or a numeric string.
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `limit` clamped to `1..=500`, 20 when absent or not an integer.
pub fn clamp_limit(value: Option<&Value>) -> i64 {
    value
        .and_then(as_integer)
        .map(|n| n.clamp(1, MAX_FIND_LIMIT))
        .unwrap_or(DEFAULT_FIND_LIMIT)
}

/// `skip` as a non-negative integer, 0 when absent, negative or invalid.
pub fn clamp_skip(value: Option<&Value>) -> u64 {
    value
        .and_then(as_integer)
        .filter(|n| *n >= 0)
        .map(|n| n as u64)
        .unwrap_or(0)
}

fn non_empty_str<'a>(body: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// An optional object field; `null` counts as absent.
fn object_field(
    body: &Map<String, Value>,
    key: &str,
) -> Result<Option<Map<String, Value>>, CommandError> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(bad_request(format!("{} must be an object", key))),
    }
}

/// An optional array of objects; absent means empty.
fn object_list(
    body: &Map<String, Value>,
    key: &str,
) -> Result<Vec<Map<String, Value>>, CommandError> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_object()
                    .cloned()
                    .ok_or_else(|| bad_request(format!("{} entries must be objects", key)))
            })
            .collect(),
        Some(_) => Err(bad_request(format!("{} must be an array", key))),
    }
}
