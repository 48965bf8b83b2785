//! Table descriptors: config validated and flattened for runtime use. Immutable once built.

use crate::config::{RouterConfig, ValidationRule};
use crate::types::{ColumnKind, SqlType, SqlValue};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignEdge {
    pub table: String,
    pub column: String,
}

#[derive(Clone, Debug)]
pub struct ColumnDescriptor {
    /// Storage name.
    pub name: String,
    pub alias: Option<String>,
    pub sql_type: SqlType,
    pub nullable: bool,
    /// Client-side default, filled in by the router when the column is omitted.
    pub default: Option<SqlValue>,
    /// Server default expression; the database fills the column when it is omitted.
    pub server_default: Option<String>,
    pub is_primary_key: bool,
    pub unique_membership: BTreeSet<String>,
    pub foreign_edges: Vec<ForeignEdge>,
}

impl ColumnDescriptor {
    pub fn kind(&self) -> &ColumnKind {
        &self.sql_type.kind
    }

    /// Name used on the HTTP surface: the alias when defined.
    pub fn external_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn has_server_default(&self) -> bool {
        self.server_default.is_some()
    }

    pub fn required_in_create(&self) -> bool {
        !self.nullable && !self.has_default() && !self.has_server_default()
    }
}

#[derive(Clone, Debug)]
pub struct UniqueConstraint {
    pub name: String,
    /// Column indexes, ordered by column position.
    pub columns: Vec<usize>,
}

/// A child table whose rows are embedded in this table's read responses.
#[derive(Clone, Debug)]
pub struct ForeignInclude {
    /// Response key holding the child rows.
    pub name: String,
    pub table: Arc<TableDescriptor>,
    /// Child column referencing this table's primary key.
    pub child_column: usize,
}

#[derive(Clone, Debug)]
pub struct TableDescriptor {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: usize,
    pub unique_constraints: Vec<UniqueConstraint>,
    pub foreign_includes: Vec<ForeignInclude>,
    /// External names and storage names to column index.
    by_request_name: HashMap<String, usize>,
}

impl TableDescriptor {
    pub fn new(
        schema: Option<String>,
        name: String,
        columns: Vec<ColumnDescriptor>,
        primary_key: usize,
        unique_constraints: Vec<UniqueConstraint>,
    ) -> Self {
        let mut by_request_name = HashMap::new();
        for (i, c) in columns.iter().enumerate() {
            by_request_name.insert(c.name.clone(), i);
            if let Some(alias) = &c.alias {
                by_request_name.insert(alias.clone(), i);
            }
        }
        TableDescriptor {
            schema,
            name,
            columns,
            primary_key,
            unique_constraints,
            foreign_includes: Vec::new(),
            by_request_name,
        }
    }

    pub fn with_foreign_includes(mut self, includes: Vec<ForeignInclude>) -> Self {
        self.foreign_includes = includes;
        self
    }

    pub fn primary_key(&self) -> &ColumnDescriptor {
        &self.columns[self.primary_key]
    }

    /// Resolve a request-side name (alias or storage name) to a column index.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.by_request_name.get(name).copied()
    }

    /// Unique columns nominated for `ON CONFLICT`: the first composite unique constraint,
    /// else the single-column unique, else the primary key.
    pub fn conflict_target(&self) -> Vec<usize> {
        self.unique_constraints
            .iter()
            .find(|u| u.columns.len() > 1)
            .or_else(|| self.unique_constraints.iter().find(|u| u.columns.len() == 1))
            .map(|u| u.columns.clone())
            .unwrap_or_else(|| vec![self.primary_key])
    }
}

/// One router's config with its table resolved and validation rules keyed by column index.
#[derive(Clone, Debug)]
pub struct ResolvedRouter {
    pub config: RouterConfig,
    pub table: Arc<TableDescriptor>,
    pub rules: HashMap<usize, ValidationRule>,
}
