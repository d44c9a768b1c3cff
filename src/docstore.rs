//! Document-store abstraction used by the relay's `/mongodb` route.
//!
//! [`DocumentStore`] speaks plain JSON so the command layer never sees BSON;
//! [`MongoStore`] converts at the boundary, reading extended JSON
//! (`{"$oid": ...}`, `{"$date": ...}`) on the way in and producing relaxed
//! extended JSON on the way out.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use mongodb::options::UpdateModifications;
use mongodb::{Client, Cursor};
use serde::Serialize;
use serde_json::{Map, Value};

/// Databases the store manages itself; never dropped by a purge.
pub const SYSTEM_DATABASES: [&str; 3] = ["admin", "local", "config"];

/// Parameters of a `find`.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub filter: Map<String, Value>,
    pub projection: Option<Map<String, Value>>,
    pub sort: Option<Map<String, Value>>,
    pub limit: i64,
    pub skip: u64,
}

/// An update is either a modifier document or an aggregation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Document(Map<String, Value>),
    Pipeline(Vec<Map<String, Value>>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Value>,
}

/// Operations the relay forwards to the document store. Implementations
/// must be safe to share across request tasks.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_database_names(&self) -> Result<Vec<String>>;

    async fn drop_database(&self, db: &str) -> Result<()>;

    async fn run_command(&self, db: &str, command: Map<String, Value>) -> Result<Value>;

    async fn find(&self, db: &str, coll: &str, query: FindQuery) -> Result<Vec<Value>>;

    /// Returns the inserted document's id.
    async fn insert_one(&self, db: &str, coll: &str, doc: Map<String, Value>) -> Result<Value>;

    async fn update_one(
        &self,
        db: &str,
        coll: &str,
        filter: Map<String, Value>,
        update: Update,
        upsert: bool,
    ) -> Result<UpdateSummary>;

    /// Returns the number of deleted documents (0 or 1).
    async fn delete_one(&self, db: &str, coll: &str, filter: Map<String, Value>) -> Result<u64>;

    async fn aggregate(
        &self,
        db: &str,
        coll: &str,
        pipeline: Vec<Map<String, Value>>,
    ) -> Result<Vec<Value>>;
}

/// [`DocumentStore`] backed by a MongoDB deployment.
///
/// The driver's `Client` holds its own connection pool, so one instance is
/// shared by every request.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    /// Parses `uri` and builds a client. No connection is made until the
    /// first operation.
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .context("invalid MongoDB connection string")?;
        Ok(Self { client })
    }

    fn collection(&self, db: &str, coll: &str) -> mongodb::Collection<Document> {
        self.client.database(db).collection::<Document>(coll)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn list_database_names(&self) -> Result<Vec<String>> {
        Ok(self.client.list_database_names().await?)
    }

    async fn drop_database(&self, db: &str) -> Result<()> {
        self.client.database(db).drop().await?;
        Ok(())
    }

    async fn run_command(&self, db: &str, command: Map<String, Value>) -> Result<Value> {
        let reply = self
            .client
            .database(db)
            .run_command(to_document(command)?)
            .await?;
        Ok(from_document(reply))
    }

    async fn find(&self, db: &str, coll: &str, query: FindQuery) -> Result<Vec<Value>> {
        let collection = self.collection(db, coll);
        let mut find = collection
            .find(to_document(query.filter)?)
            .limit(query.limit)
            .skip(query.skip);
        if let Some(projection) = query.projection {
            find = find.projection(to_document(projection)?);
        }
        if let Some(sort) = query.sort {
            find = find.sort(to_document(sort)?);
        }
        drain(find.await?).await
    }

    async fn insert_one(&self, db: &str, coll: &str, doc: Map<String, Value>) -> Result<Value> {
        let collection = self.collection(db, coll);
        let result = collection.insert_one(to_document(doc)?).await?;
        Ok(result.inserted_id.into_relaxed_extjson())
    }

    async fn update_one(
        &self,
        db: &str,
        coll: &str,
        filter: Map<String, Value>,
        update: Update,
        upsert: bool,
    ) -> Result<UpdateSummary> {
        let modifications = match update {
            Update::Document(doc) => UpdateModifications::Document(to_document(doc)?),
            Update::Pipeline(stages) => UpdateModifications::Pipeline(to_documents(stages)?),
        };
        let collection = self.collection(db, coll);
        let result = collection
            .update_one(to_document(filter)?, modifications)
            .upsert(upsert)
            .await?;
        Ok(UpdateSummary {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id.map(Bson::into_relaxed_extjson),
        })
    }

    async fn delete_one(&self, db: &str, coll: &str, filter: Map<String, Value>) -> Result<u64> {
        let collection = self.collection(db, coll);
        let result = collection.delete_one(to_document(filter)?).await?;
        Ok(result.deleted_count)
    }

    async fn aggregate(
        &self,
        db: &str,
        coll: &str,
        pipeline: Vec<Map<String, Value>>,
    ) -> Result<Vec<Value>> {
        let collection = self.collection(db, coll);
        let cursor = collection.aggregate(to_documents(pipeline)?).await?;
        drain(cursor).await
    }
}

async fn drain(mut cursor: Cursor<Document>) -> Result<Vec<Value>> {
    let mut docs = Vec::new();
    while cursor.advance().await? {
        docs.push(from_document(cursor.deserialize_current()?));
    }
    Ok(docs)
}

/// Converts a JSON object (extended JSON allowed) into a BSON document.
pub fn to_document(map: Map<String, Value>) -> Result<Document> {
    match Bson::try_from(Value::Object(map)).context("invalid extended JSON")? {
        Bson::Document(doc) => Ok(doc),
        other => bail!("expected a document, got {:?}", other.element_type()),
    }
}

fn to_documents(maps: Vec<Map<String, Value>>) -> Result<Vec<Document>> {
    maps.into_iter().map(to_document).collect()
}

/// Renders a BSON document as relaxed extended JSON.
pub fn from_document(doc: Document) -> Value {
    Bson::Document(doc).into_relaxed_extjson()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_extended_json_becomes_native_bson() {
        let doc = to_document(obj(json!({
            "_id": {"$oid": "64b7f0c2a1b2c3d4e5f60718"},
            "n": 3,
        })))
        .unwrap();
        assert!(matches!(doc.get("_id"), Some(Bson::ObjectId(_))));
        assert!(matches!(
            doc.get("n"),
            Some(Bson::Int32(3)) | Some(Bson::Int64(3))
        ));
    }

    #[test]
    fn test_key_order_is_preserved() {
        let doc = to_document(obj(json!({"listCollections": 1, "filter": {}, "nameOnly": true})))
            .unwrap();
        let keys: Vec<&str> = doc.keys().map(String::as_str).collect();
        assert_eq!(keys, ["listCollections", "filter", "nameOnly"]);
    }

    #[test]
    fn test_document_renders_as_relaxed_json() {
        let doc = to_document(obj(json!({"name": "a", "tags": ["x", "y"], "score": 1.5}))).unwrap();
        assert_eq!(
            from_document(doc),
            json!({"name": "a", "tags": ["x", "y"], "score": 1.5})
        );
    }

    #[test]
    fn test_update_summary_serializes_camel_case() {
        let summary = UpdateSummary {
            matched_count: 1,
            modified_count: 0,
            upserted_id: None,
        };
        assert_eq!(
            serde_json::to_value(summary).unwrap(),
            json!({"matchedCount": 1, "modifiedCount": 0, "upsertedId": null})
        );
    }

    // Live tests: need a reachable deployment in MONGODB_URI.
    // Run with `cargo test -- --ignored`.

    async fn live_store() -> Option<MongoStore> {
        let uri = std::env::var("MONGODB_URI").ok()?;
        Some(MongoStore::connect(&uri).await.unwrap())
    }

    fn scratch_db(test: &str) -> String {
        format!("defra_tools_{}_{}", test, std::process::id())
    }

    #[tokio::test]
    #[ignore]
    async fn test_mongo_document_lifecycle() {
        let Some(store) = live_store().await else {
            return;
        };
        let db = scratch_db("lifecycle");

        for (name, n) in [("a", 1), ("b", 2), ("c", 3)] {
            store
                .insert_one(&db, "items", obj(json!({"name": name, "n": n})))
                .await
                .unwrap();
        }

        let docs = store
            .find(
                &db,
                "items",
                FindQuery {
                    filter: obj(json!({"n": {"$gte": 2}})),
                    projection: Some(obj(json!({"_id": 0, "name": 1}))),
                    sort: Some(obj(json!({"n": -1}))),
                    limit: 1,
                    skip: 1,
                },
            )
            .await
            .unwrap();
        assert_eq!(docs, vec![json!({"name": "b"})]);

        let summary = store
            .update_one(
                &db,
                "items",
                obj(json!({"name": "a"})),
                Update::Document(obj(json!({"$set": {"n": 10}}))),
                false,
            )
            .await
            .unwrap();
        assert_eq!((summary.matched_count, summary.modified_count), (1, 1));

        let summary = store
            .update_one(
                &db,
                "items",
                obj(json!({"name": "z"})),
                Update::Pipeline(vec![obj(json!({"$set": {"n": 0}}))]),
                true,
            )
            .await
            .unwrap();
        assert!(summary.upserted_id.is_some());

        let totals = store
            .aggregate(
                &db,
                "items",
                vec![obj(json!({"$group": {"_id": null, "total": {"$sum": "$n"}}}))],
            )
            .await
            .unwrap();
        assert_eq!(totals[0]["total"], json!(15));

        let deleted = store
            .delete_one(&db, "items", obj(json!({"name": "c"})))
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        store.drop_database(&db).await.unwrap();
        assert!(!store.list_database_names().await.unwrap().contains(&db));
    }

    #[tokio::test]
    #[ignore]
    async fn test_mongo_run_command() {
        let Some(store) = live_store().await else {
            return;
        };
        let reply = store
            .run_command("admin", obj(json!({"ping": 1})))
            .await
            .unwrap();
        assert_eq!(reply["ok"].as_f64(), Some(1.0));
    }
}
