//! Shared fixtures: an in-memory `Database` that records statements and replays canned results.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use table_crud_router::sql::Statement;
use table_crud_router::store::Row;
use table_crud_router::{resolve, table_routes, CrudConfig, Database, Session, StoreError};
use tower::ServiceExt;

#[derive(Default)]
struct Log {
    statements: Vec<Statement>,
    replies: VecDeque<Result<Vec<Row>, StoreError>>,
    sessions: Vec<bool>,
    commits: usize,
    rollbacks: usize,
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    log: Arc<Mutex<Log>>,
}

impl MemoryDatabase {
    /// Queue the rows the next statement returns. Unqueued statements return nothing.
    pub fn reply(&self, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .map(|v| match v {
                Value::Object(m) => m,
                other => panic!("reply rows must be objects, got {}", other),
            })
            .collect();
        self.log.lock().unwrap().replies.push_back(Ok(rows));
    }

    pub fn fail(&self, err: StoreError) {
        self.log.lock().unwrap().replies.push_back(Err(err));
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().unwrap().statements.clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    /// Autocommit flag of every session opened so far.
    pub fn sessions(&self) -> Vec<bool> {
        self.log.lock().unwrap().sessions.clone()
    }

    pub fn commits(&self) -> usize {
        self.log.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.log.lock().unwrap().rollbacks
    }
}

struct MemorySession {
    log: Arc<Mutex<Log>>,
}

impl MemorySession {
    fn next(&self, stmt: &Statement) -> Result<Vec<Row>, StoreError> {
        let mut log = self.log.lock().unwrap();
        log.statements.push(stmt.clone());
        log.replies.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn fetch_all(&mut self, stmt: &Statement) -> Result<Vec<Row>, StoreError> {
        self.next(stmt)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.log.lock().unwrap().commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.log.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn session(&self, autocommit: bool) -> Result<Box<dyn Session>, StoreError> {
        self.log.lock().unwrap().sessions.push(autocommit);
        Ok(Box::new(MemorySession { log: self.log.clone() }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// `test_table` with a uuid key, a composite unique over the three numeric columns and a
/// `book`-style child table `note` referencing it.
pub fn config(router: Value) -> CrudConfig {
    serde_json::from_value(json!({
        "schema": "public",
        "tables": [
            {
                "name": "test_table",
                "columns": [
                    {"name": "id", "type": "uuid", "primary_key": true, "nullable": false,
                     "default": {"expression": "gen_random_uuid()"}},
                    {"name": "bool_value", "type": "bool"},
                    {"name": "char_value", "type": "char(10)"},
                    {"name": "float4_value", "type": "float4", "nullable": false},
                    {"name": "int2_value", "type": "int2", "nullable": false},
                    {"name": "int4_value", "type": "int4", "nullable": false},
                    {"name": "text_value", "type": "text"},
                    {"name": "timestamptz_value", "type": "timestamptz"}
                ],
                "unique": [["float4_value", "int2_value", "int4_value"]]
            },
            {
                "name": "note",
                "columns": [
                    {"name": "id", "type": "int4", "primary_key": true, "nullable": false,
                     "default": {"expression": "nextval('note_id_seq')"}},
                    {"name": "parent_id", "type": "uuid", "nullable": false,
                     "references": {"table": "test_table", "column": "id"}},
                    {"name": "body", "type": "text"}
                ]
            }
        ],
        "routers": [router]
    }))
    .expect("test config deserializes")
}

pub fn app(db: &MemoryDatabase, router: Value) -> Router {
    let routers = resolve(&config(router)).expect("test config resolves");
    table_routes(Arc::new(db.clone()), routers).0
}

pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request builds");
    app.clone().oneshot(req).await.expect("router is infallible")
}

pub async fn json_body(res: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("body reads");
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is JSON")
    }
}

pub const ID_A: &str = "0b8f5c3e-6a53-4d3c-9d4c-3b1f0a2e7c11";

pub fn stored_row(id: &str, text: &str) -> Value {
    json!({
        "id": id,
        "bool_value": true,
        "char_value": "abc       ",
        "float4_value": 5.5,
        "int2_value": 1,
        "int4_value": 1,
        "text_value": text,
        "timestamptz_value": null
    })
}
