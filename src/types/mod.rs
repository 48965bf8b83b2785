//! Type map: SQL column types, the operators each admits, and value codecs.

pub mod kind;
pub mod operator;
pub mod value;

pub use kind::{ColumnKind, IntWidth, SqlType};
pub use operator::{ComparisonOperator, MatchingPattern, OperatorFamily, SortDirection};
pub use value::SqlValue;
