//! Column kinds and the SQL type names they map to.

use crate::types::operator::OperatorFamily;
use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntWidth {
    Small,
    Regular,
    Big,
}

impl IntWidth {
    pub fn bounds(self) -> (i64, i64) {
        match self {
            IntWidth::Small => (i16::MIN as i64, i16::MAX as i64),
            IntWidth::Regular => (i32::MIN as i64, i32::MAX as i64),
            IntWidth::Big => (i64::MIN, i64::MAX),
        }
    }

    fn pg_name(self) -> &'static str {
        match self {
            IntWidth::Small => "int2",
            IntWidth::Regular => "int4",
            IntWidth::Big => "int8",
        }
    }
}

/// Canonical scalar kind of a column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum ColumnKind {
    Bool,
    Int(IntWidth),
    Float,
    Numeric,
    Text,
    /// Fixed-width character column; values are space-padded to `n`.
    Char(u32),
    Uuid,
    Date,
    Time,
    TimeTz,
    Timestamp,
    TimestampTz,
    Interval,
    Json,
    Binary,
    Array(Box<ColumnKind>),
}

impl ColumnKind {
    /// Operator families the kind admits. Equality is always first.
    pub fn families(&self) -> &'static [OperatorFamily] {
        use OperatorFamily::*;
        match self {
            ColumnKind::Int(_)
            | ColumnKind::Float
            | ColumnKind::Numeric
            | ColumnKind::Date
            | ColumnKind::Time
            | ColumnKind::TimeTz
            | ColumnKind::Timestamp
            | ColumnKind::TimestampTz
            | ColumnKind::Interval => &[Equality, Range],
            ColumnKind::Text | ColumnKind::Char(_) => &[Equality, StringMatching],
            ColumnKind::Bool
            | ColumnKind::Uuid
            | ColumnKind::Json
            | ColumnKind::Binary
            | ColumnKind::Array(_) => &[Equality],
        }
    }

    /// Binary columns (and arrays of them) cannot be exposed by any operation.
    pub fn is_supported(&self) -> bool {
        match self {
            ColumnKind::Binary => false,
            ColumnKind::Array(inner) => inner.is_supported(),
            _ => true,
        }
    }

    /// Kinds that PostgreSQL hands back in a form we cannot decode directly; they are
    /// projected as text.
    pub fn projects_as_text(&self) -> bool {
        matches!(self, ColumnKind::Numeric | ColumnKind::Interval | ColumnKind::TimeTz)
    }

    /// Type name used in `$n::<name>` casts.
    pub fn pg_name(&self) -> String {
        match self {
            ColumnKind::Bool => "bool".into(),
            ColumnKind::Int(w) => w.pg_name().into(),
            ColumnKind::Float => "float8".into(),
            ColumnKind::Numeric => "numeric".into(),
            ColumnKind::Text => "text".into(),
            ColumnKind::Char(_) => "bpchar".into(),
            ColumnKind::Uuid => "uuid".into(),
            ColumnKind::Date => "date".into(),
            ColumnKind::Time => "time".into(),
            ColumnKind::TimeTz => "timetz".into(),
            ColumnKind::Timestamp => "timestamp".into(),
            ColumnKind::TimestampTz => "timestamptz".into(),
            ColumnKind::Interval => "interval".into(),
            ColumnKind::Json => "jsonb".into(),
            ColumnKind::Binary => "bytea".into(),
            ColumnKind::Array(inner) => format!("{}[]", inner.pg_name()),
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Char(n) => write!(f, "char({})", n),
            ColumnKind::Array(inner) => write!(f, "{}[]", inner),
            other => f.write_str(&other.pg_name()),
        }
    }
}

/// A column's SQL type: its kind plus the exact name used for casts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SqlType {
    pub kind: ColumnKind,
    /// Cast target, e.g. `float4`, `varchar`, `json`, `int4[]`.
    pub cast: String,
    /// Declared length for `varchar(n)` / `char(n)`.
    pub max_length: Option<u32>,
}

impl SqlType {
    /// Parse a SQL type spelling (`int4`, `character varying(20)`, `timestamp with time zone`,
    /// `_int4`, `text[]`, ...). Unknown spellings return `None`.
    pub fn parse(spelling: &str) -> Option<SqlType> {
        let lower = spelling.trim().to_lowercase();
        if let Some(elem) = lower.strip_suffix("[]") {
            return SqlType::parse(elem).map(SqlType::array_of);
        }
        if let Some(elem) = lower.strip_prefix('_') {
            return SqlType::parse(elem).map(SqlType::array_of);
        }

        let (base, params) = match lower.find('(') {
            Some(open) => {
                let close = lower.rfind(')').filter(|&c| c > open)?;
                let params: Vec<u32> = lower[open + 1..close]
                    .split(',')
                    .filter_map(|p| p.trim().parse().ok())
                    .collect();
                (lower[..open].trim().to_string(), params)
            }
            None => (lower.clone(), Vec::new()),
        };
        let length = params.first().copied();

        let (kind, cast) = match base.as_str() {
            "bool" | "boolean" => (ColumnKind::Bool, "bool"),
            "smallint" | "int2" | "smallserial" | "serial2" => (ColumnKind::Int(IntWidth::Small), "int2"),
            "integer" | "int" | "int4" | "serial" | "serial4" => (ColumnKind::Int(IntWidth::Regular), "int4"),
            "bigint" | "int8" | "bigserial" | "serial8" => (ColumnKind::Int(IntWidth::Big), "int8"),
            "real" | "float4" => (ColumnKind::Float, "float4"),
            "double precision" | "float8" | "float" => (ColumnKind::Float, "float8"),
            "numeric" | "decimal" => (ColumnKind::Numeric, "numeric"),
            "text" | "citext" => (ColumnKind::Text, "text"),
            "varchar" | "character varying" => (ColumnKind::Text, "varchar"),
            "char" | "character" | "bpchar" => (ColumnKind::Char(length.unwrap_or(1)), "bpchar"),
            "uuid" => (ColumnKind::Uuid, "uuid"),
            "date" => (ColumnKind::Date, "date"),
            "time" | "time without time zone" => (ColumnKind::Time, "time"),
            "timetz" | "time with time zone" => (ColumnKind::TimeTz, "timetz"),
            "timestamp" | "timestamp without time zone" => (ColumnKind::Timestamp, "timestamp"),
            "timestamptz" | "timestamp with time zone" => (ColumnKind::TimestampTz, "timestamptz"),
            "interval" => (ColumnKind::Interval, "interval"),
            "json" => (ColumnKind::Json, "json"),
            "jsonb" => (ColumnKind::Json, "jsonb"),
            "bytea" | "blob" | "binary" => (ColumnKind::Binary, "bytea"),
            _ => return None,
        };
        let max_length = match kind {
            ColumnKind::Char(n) => Some(n),
            ColumnKind::Text if cast == "varchar" => length,
            _ => None,
        };
        Some(SqlType {
            kind,
            cast: cast.to_string(),
            max_length,
        })
    }

    fn array_of(elem: SqlType) -> SqlType {
        SqlType {
            cast: format!("{}[]", elem.cast),
            kind: ColumnKind::Array(Box::new(elem.kind)),
            max_length: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_spellings() {
        let t = SqlType::parse("character varying(20)").unwrap();
        assert_eq!(t.kind, ColumnKind::Text);
        assert_eq!(t.cast, "varchar");
        assert_eq!(t.max_length, Some(20));

        let t = SqlType::parse("char(10)").unwrap();
        assert_eq!(t.kind, ColumnKind::Char(10));

        let t = SqlType::parse("timestamp with time zone").unwrap();
        assert_eq!(t.kind, ColumnKind::TimestampTz);

        let t = SqlType::parse("_int4").unwrap();
        assert_eq!(t.kind, ColumnKind::Array(Box::new(ColumnKind::Int(IntWidth::Regular))));
        assert_eq!(t.cast, "int4[]");

        assert!(SqlType::parse("geometry").is_none());
    }

    #[test]
    fn misplaced_parentheses_are_unknown() {
        assert!(SqlType::parse("int4)(").is_none());
        assert!(SqlType::parse("varchar)20(").is_none());
        assert!(SqlType::parse("numeric(10").is_none());
    }

    #[test]
    fn families_follow_kind() {
        assert!(ColumnKind::Date.families().contains(&OperatorFamily::Range));
        assert!(!ColumnKind::Date.families().contains(&OperatorFamily::StringMatching));
        assert!(ColumnKind::Char(4).families().contains(&OperatorFamily::StringMatching));
        assert!(!ColumnKind::Bool.families().contains(&OperatorFamily::Range));
        assert!(!ColumnKind::Array(Box::new(ColumnKind::Binary)).is_supported());
    }
}
