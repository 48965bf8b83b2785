//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Raised while building descriptors and routers. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("table {table}: multiple primary key columns ({columns})")]
    MultiplePrimaryKey { table: String, columns: String },
    #[error("table {table}: composite primary key ({columns}) is not supported")]
    CompositePrimaryKeyConstraint { table: String, columns: String },
    #[error("table {0}: no primary key column")]
    MissingPrimaryKey(String),
    #[error("table {table}: {reason}")]
    MultipleSingleUnique { table: String, reason: String },
    #[error("table {table}: column {column} has unsupported type {type_name}; exclude it")]
    ColumnTypeNotSupported {
        table: String,
        column: String,
        type_name: String,
    },
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("table {table}: cannot include {include}: {reason}")]
    InvalidForeignInclude {
        table: String,
        include: String,
        reason: String,
    },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Errors surfaced by a statement executor.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unique violation on {}", .constraint.as_deref().unwrap_or("unknown constraint"))]
    UniqueViolation { constraint: Option<String> },
    #[error(transparent)]
    Driver(#[from] sqlx::Error),
}

impl StoreError {
    /// Errors that may succeed when the same idempotent statement is run again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Driver(sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed)
        )
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("unknown order type '{0}'; expected ASC or DESC")]
    UnknownOrderType(String),
    #[error("on_conflict.update_columns must not be empty")]
    UpdateColumnEmpty,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{message}")]
    Conflict { code: &'static str, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::SchemaViolation(_)
            | AppError::UnknownColumn(_)
            | AppError::UnknownOrderType(_)
            | AppError::UpdateColumnEmpty => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Store(StoreError::UniqueViolation { .. }) => StatusCode::CONFLICT,
            AppError::Store(StoreError::Driver(e)) => match e {
                sqlx::Error::RowNotFound => StatusCode::NOT_FOUND,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::SchemaViolation(_) => "schema_violation",
            AppError::UnknownColumn(_) => "unknown_column",
            AppError::UnknownOrderType(_) => "unknown_order_type",
            AppError::UpdateColumnEmpty => "update_column_empty",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict { code, .. } => code,
            AppError::Store(StoreError::UniqueViolation { .. }) => "duplicate",
            AppError::Store(_) => "database_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
