//! Table handlers: extract path, query and body, then hand the raw parts to the endpoint.

use crate::error::AppError;
use crate::response::Outcome;
use crate::service::RawRequest;
use crate::state::{Endpoint, PostRoot};
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
};
use serde_json::Value;
use std::sync::Arc;

type QueryPairs = Result<Query<Vec<(String, String)>>, QueryRejection>;

fn query_pairs(query: QueryPairs) -> Result<Vec<(String, String)>, AppError> {
    query
        .map(|Query(pairs)| pairs)
        .map_err(|e| AppError::SchemaViolation(format!("query string: {}", e.body_text())))
}

/// An empty body is no body; anything else must be JSON.
fn json_body(bytes: &Bytes) -> Result<Option<Value>, AppError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(bytes)
        .map(Some)
        .map_err(|e| AppError::SchemaViolation(format!("body is not valid JSON: {}", e)))
}

pub async fn collection(
    State(endpoint): State<Arc<Endpoint>>,
    query: QueryPairs,
    body: Bytes,
) -> Result<Outcome, AppError> {
    let raw = RawRequest {
        path_key: None,
        query: query_pairs(query)?,
        body: json_body(&body)?,
    };
    endpoint.handle(raw).await
}

pub async fn item(
    State(endpoint): State<Arc<Endpoint>>,
    Path(key): Path<String>,
    query: QueryPairs,
    body: Bytes,
) -> Result<Outcome, AppError> {
    let raw = RawRequest {
        path_key: Some(key),
        query: query_pairs(query)?,
        body: json_body(&body)?,
    };
    endpoint.handle(raw).await
}

pub async fn post_root(State(post): State<PostRoot>, query: QueryPairs, body: Bytes) -> Result<Outcome, AppError> {
    let body = json_body(&body)?;
    let endpoint = post
        .pick(body.as_ref())
        .ok_or_else(|| AppError::NotFound("no insert operation mounted".into()))?;
    let raw = RawRequest {
        path_key: None,
        query: query_pairs(query)?,
        body,
    };
    endpoint.handle(raw).await
}

/// `GET /{pk}` when FIND_ONE is not mounted but a redirect points there.
pub async fn missing_item(Path(key): Path<String>) -> AppError {
    AppError::NotFound(key)
}
