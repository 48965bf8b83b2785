//! Bind parameters: every value goes over the wire as text and is cast in SQL (`$n::int4`).

use crate::types::SqlValue;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

/// A compiled statement in driver-neutral form: SQL with `$n::<type>` placeholders plus values.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Accumulates parameters while SQL text is rendered.
#[derive(Default)]
pub struct Params {
    values: Vec<SqlValue>,
}

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    /// Push a value and return its cast placeholder.
    pub fn bind(&mut self, value: SqlValue, cast: &str) -> String {
        self.values.push(value);
        format!("${}::{}", self.values.len(), cast)
    }

    pub fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.values,
        }
    }
}

impl<'q> Encode<'q, Postgres> for SqlValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self.to_pg_text() {
            None => Ok(IsNull::Yes),
            Some(text) => <&str as Encode<Postgres>>::encode_by_ref(&text.as_str(), buf),
        }
    }
}

impl sqlx::Type<Postgres> for SqlValue {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }
}
