//! HTTP responses for completed operations.

use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

pub const TOTAL_COUNT_HEADER: HeaderName = HeaderName::from_static("x-total-count");

/// What an operation produced, before it is written to the wire.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// A single row (by-primary-key operations and single inserts).
    One { status: StatusCode, row: Value },
    /// A row collection with the matched-row count for `X-Total-Count`.
    Many {
        status: StatusCode,
        rows: Vec<Value>,
        total: u64,
    },
    /// A collection mutation that matched nothing.
    Empty,
    /// 303 after POST_REDIRECT_GET.
    SeeOther { location: String },
}

impl Outcome {
    pub fn status(&self) -> StatusCode {
        match self {
            Outcome::One { status, .. } | Outcome::Many { status, .. } => *status,
            Outcome::Empty => StatusCode::NO_CONTENT,
            Outcome::SeeOther { .. } => StatusCode::SEE_OTHER,
        }
    }
}

fn total(n: u64) -> (HeaderName, HeaderValue) {
    (TOTAL_COUNT_HEADER, HeaderValue::from(n))
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        match self {
            Outcome::One { status, row } => (status, Json(row)).into_response(),
            Outcome::Many { status, rows, total: n } => (status, [total(n)], Json(rows)).into_response(),
            Outcome::Empty => (StatusCode::NO_CONTENT, [total(0)]).into_response(),
            Outcome::SeeOther { location } => match HeaderValue::from_str(&location) {
                Ok(v) => (StatusCode::SEE_OTHER, [(header::LOCATION, v)]).into_response(),
                Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            },
        }
    }
}
