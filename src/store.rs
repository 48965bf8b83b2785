//! Statement executor: scoped sessions over PostgreSQL. Rows come back as JSON maps keyed by
//! result label.

use crate::error::StoreError;
use crate::sql::Statement;
use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Postgres, Row as _, Transaction, TypeInfo};

pub type Row = Map<String, Value>;

const UNIQUE_VIOLATION: &str = "23505";

/// One request's database session. Dropping it without `commit` discards any open transaction.
#[async_trait]
pub trait Session: Send {
    async fn fetch_all(&mut self, stmt: &Statement) -> Result<Vec<Row>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Database: Send + Sync + 'static {
    /// With `autocommit` every statement commits on its own; otherwise the session is a
    /// transaction.
    async fn session(&self, autocommit: bool) -> Result<Box<dyn Session>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(PgStore { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PgStore {
    async fn session(&self, autocommit: bool) -> Result<Box<dyn Session>, StoreError> {
        let session = if autocommit {
            PgSession::Connection(self.pool.acquire().await?)
        } else {
            PgSession::Transaction(self.pool.begin().await?)
        };
        Ok(Box::new(session))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

enum PgSession {
    Connection(PoolConnection<Postgres>),
    Transaction(Transaction<'static, Postgres>),
}

fn query(stmt: &Statement) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    tracing::debug!(sql = %stmt.sql, params = ?stmt.params, "query");
    let mut q = sqlx::query(&stmt.sql);
    for v in &stmt.params {
        q = q.bind(v.clone());
    }
    q
}

#[async_trait]
impl Session for PgSession {
    async fn fetch_all(&mut self, stmt: &Statement) -> Result<Vec<Row>, StoreError> {
        let q = query(stmt);
        let rows = match self {
            PgSession::Connection(conn) => q.fetch_all(&mut **conn).await,
            PgSession::Transaction(tx) => q.fetch_all(&mut **tx).await,
        }
        .map_err(driver_error)?;
        rows.iter().map(row_to_json).collect::<Result<_, _>>().map_err(StoreError::Driver)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        match *self {
            PgSession::Connection(_) => Ok(()),
            PgSession::Transaction(tx) => Ok(tx.commit().await?),
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        match *self {
            PgSession::Connection(_) => Ok(()),
            PgSession::Transaction(tx) => Ok(tx.rollback().await?),
        }
    }
}

/// Unique violations carry their constraint name so callers can tell duplicates apart.
fn driver_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::UniqueViolation {
                constraint: db.constraint().map(String::from),
            };
        }
    }
    StoreError::Driver(e)
}

fn row_to_json(row: &PgRow) -> Result<Row, sqlx::Error> {
    let mut map = Map::new();
    for (i, col) in row.columns().iter().enumerate() {
        let value = cell_to_value(row, i, col.type_info().name())?;
        map.insert(col.name().to_string(), value);
    }
    Ok(map)
}

/// Decode one cell by its PostgreSQL type name. The compiler projects numeric, interval, timetz
/// and arrays as text or JSON, so the native set below covers every projected kind.
fn cell_to_value(row: &PgRow, i: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let v = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(i)?.map(Value::Bool),
        "INT2" => row.try_get::<Option<i16>, _>(i)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(i)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(i)?.map(Value::from),
        // Through the shortest decimal form so 5.5::float4 stays 5.5 and 0.1 stays 0.1.
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(i)?
            .and_then(|n| n.to_string().parse::<f64>().ok())
            .map(float),
        "FLOAT8" => row.try_get::<Option<f64>, _>(i)?.map(float),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(i)?
            .map(|u| Value::String(u.to_string())),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(i)?
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(i)?
            .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(i)?
            .map(|t| Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)?
            .map(|t| Value::String(t.to_rfc3339())),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(i)?,
        _ => row.try_get::<Option<String>, _>(i)?.map(Value::String),
    };
    Ok(v.unwrap_or(Value::Null))
}

fn float(n: f64) -> Value {
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}
