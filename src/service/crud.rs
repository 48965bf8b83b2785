//! CrudService: runs one decoded request through compile, execute and shape inside a session.

use crate::config::{RouterConfig, TableDescriptor};
use crate::error::{AppError, StoreError};
use crate::response::Outcome;
use crate::schema::OperationKind;
use crate::service::decode::NormalizedRequest;
use crate::service::shape;
use crate::sql::{self, Statement, CONFLICT_HIT_COLUMN};
use crate::store::{Database, Row, Session};
use axum::http::StatusCode;
use serde_json::Value;
use std::sync::Arc;

pub const CONFLICT_MISS: &str = "conflict-columns-cannot-hit";
pub const DUPLICATE: &str = "duplicate";

pub struct CrudService {
    db: Arc<dyn Database>,
    table: Arc<TableDescriptor>,
    config: Arc<RouterConfig>,
}

impl CrudService {
    pub fn new(db: Arc<dyn Database>, table: Arc<TableDescriptor>, config: Arc<RouterConfig>) -> Self {
        CrudService { db, table, config }
    }

    /// Run the request, retrying transient store failures when the router marks the operation
    /// as safe to repeat.
    pub async fn run(&self, req: &NormalizedRequest) -> Result<Outcome, AppError> {
        let attempts = self.config.retry_attempts(req.operation);
        let mut attempt = 1;
        loop {
            match self.run_once(req).await {
                Err(AppError::Store(e)) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        table = %self.table.name,
                        operation = %req.operation,
                        attempt,
                        error = %e,
                        "transient store error, retrying"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn run_once(&self, req: &NormalizedRequest) -> Result<Outcome, AppError> {
        let stmt = sql::compile(&self.table, req)?;
        // A conflict miss is only known after the insert, so nominated upserts always run in a
        // transaction that can be rolled back.
        let autocommit = self.config.autocommit && !nominates_conflict_target(req);
        let mut session = self.db.session(autocommit).await?;
        match self.execute(session.as_mut(), req, &stmt).await {
            Ok(outcome) => {
                session.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rb) = session.rollback().await {
                    tracing::warn!(table = %self.table.name, error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        session: &mut dyn Session,
        req: &NormalizedRequest,
        stmt: &Statement,
    ) -> Result<Outcome, AppError> {
        let op = req.operation;
        let rows = session
            .fetch_all(stmt)
            .await
            .map_err(|e| self.store_error(req, e))?;

        if nominates_conflict_target(req) && rows.iter().any(missed_conflict) {
            tracing::warn!(table = %self.table.name, operation = %op, "upsert missed its conflict target");
            return Err(AppError::Conflict {
                code: CONFLICT_MISS,
                message: format!("{}: no row matched the conflict columns", CONFLICT_MISS),
            });
        }

        match op {
            OperationKind::FindMany => {
                let shaped = self.shape(op, &rows);
                let total = if req.limit.is_none() && req.offset.is_none() {
                    shaped.len() as u64
                } else {
                    self.count(session, req).await?
                };
                Ok(Outcome::Many {
                    status: StatusCode::OK,
                    rows: shaped,
                    total,
                })
            }
            OperationKind::PostRedirectGet => {
                let row = rows
                    .first()
                    .ok_or_else(|| AppError::Internal("insert returned no row".into()))?;
                Ok(Outcome::SeeOther {
                    location: self.location(row)?,
                })
            }
            OperationKind::CreateOne | OperationKind::UpsertOne => {
                let row = rows
                    .first()
                    .ok_or_else(|| AppError::Internal("insert returned no row".into()))?;
                Ok(Outcome::One {
                    status: StatusCode::CREATED,
                    row: shape::shape_row(&self.table, row),
                })
            }
            OperationKind::UpsertMany => {
                let shaped = shape::shape_rows(&self.table, &rows);
                Ok(Outcome::Many {
                    status: StatusCode::CREATED,
                    total: shaped.len() as u64,
                    rows: shaped,
                })
            }
            op if op.by_primary_key() => {
                let row = self
                    .shape(op, &rows)
                    .into_iter()
                    .next()
                    .ok_or_else(|| AppError::NotFound(format!("{} row", self.table.name)))?;
                Ok(Outcome::One {
                    status: StatusCode::OK,
                    row,
                })
            }
            op if op.is_bulk_mutation() && rows.is_empty() => Ok(Outcome::Empty),
            _ => {
                let shaped = shape::shape_rows(&self.table, &rows);
                Ok(Outcome::Many {
                    status: StatusCode::OK,
                    total: shaped.len() as u64,
                    rows: shaped,
                })
            }
        }
    }

    fn shape(&self, op: OperationKind, rows: &[Row]) -> Vec<Value> {
        if op.is_read() && !self.table.foreign_includes.is_empty() {
            shape::fold_includes(&self.table, rows)
        } else {
            shape::shape_rows(&self.table, rows)
        }
    }

    async fn count(&self, session: &mut dyn Session, req: &NormalizedRequest) -> Result<u64, AppError> {
        let rows = session.fetch_all(&sql::count(&self.table, req)).await?;
        rows.first()
            .and_then(|r| r.get("count"))
            .and_then(Value::as_u64)
            .ok_or_else(|| AppError::Internal("count returned no value".into()))
    }

    fn location(&self, row: &Row) -> Result<String, AppError> {
        let pk = self.table.primary_key();
        let key = match row.get(&pk.name) {
            Some(Value::String(s)) => s.clone(),
            Some(v) if !v.is_null() => v.to_string(),
            _ => return Err(AppError::Internal("insert returned no primary key".into())),
        };
        Ok(format!(
            "{}/{}",
            self.config.prefix.trim_end_matches('/'),
            urlencoding::encode(&key)
        ))
    }

    fn store_error(&self, req: &NormalizedRequest, e: StoreError) -> AppError {
        match e {
            StoreError::UniqueViolation { constraint } => {
                let constraint = constraint.unwrap_or_else(|| "unique constraint".into());
                tracing::warn!(table = %self.table.name, operation = %req.operation, %constraint, "unique violation");
                if nominates_conflict_target(req) {
                    AppError::Conflict {
                        code: CONFLICT_MISS,
                        message: format!("{}: row collides on {}", CONFLICT_MISS, constraint),
                    }
                } else {
                    AppError::Conflict {
                        code: DUPLICATE,
                        message: format!("duplicate value violates {}", constraint),
                    }
                }
            }
            other => AppError::Store(other),
        }
    }
}

fn nominates_conflict_target(req: &NormalizedRequest) -> bool {
    req.operation.is_upsert() && req.on_conflict.is_some()
}

fn missed_conflict(row: &Row) -> bool {
    matches!(row.get(CONFLICT_HIT_COLUMN), Some(Value::Bool(false)))
}
