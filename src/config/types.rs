//! Raw config types: table definitions as a schema source supplies them, plus router options.

use crate::schema::OperationKind;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKeyConfig {
    Single(String),
    Composite(Vec<String>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnTypeConfig {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnTypeConfig {
    /// The type as one SQL spelling, e.g. `varchar(20)`.
    pub fn spelling(&self) -> String {
        match self {
            ColumnTypeConfig::Simple(s) => s.clone(),
            ColumnTypeConfig::Parameterized { name, params: Some(p) } if !p.is_empty() => format!(
                "{}({})",
                name,
                p.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
            ),
            ColumnTypeConfig::Parameterized { name, .. } => name.clone(),
        }
    }
}

/// `Literal` is a client-side default the router fills in; `Expression` is evaluated by the
/// database when the column is omitted.
#[derive(Clone, Debug)]
pub enum ColumnDefaultConfig {
    Literal(serde_json::Value),
    Expression { expression: String },
}

impl Serialize for ColumnDefaultConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            ColumnDefaultConfig::Literal(v) => map.serialize_entry("value", v)?,
            ColumnDefaultConfig::Expression { expression } => map.serialize_entry("expression", expression)?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ColumnDefaultConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::Object(mut obj) => {
                if let Some(serde_json::Value::String(s)) = obj.remove("expression") {
                    return Ok(ColumnDefaultConfig::Expression { expression: s });
                }
                if let Some(lit) = obj.remove("value").or_else(|| obj.remove("literal")) {
                    return Ok(ColumnDefaultConfig::Literal(lit));
                }
                Err(serde::de::Error::custom(format!(
                    "column default must be a literal, {{ \"expression\": \"...\" }}, or {{ \"value\": ... }}; got object with keys: {:?}",
                    obj.keys().collect::<Vec<_>>()
                )))
            }
            serde_json::Value::Null => Err(serde::de::Error::custom(
                "column default must not be null; omit it instead",
            )),
            other => Ok(ColumnDefaultConfig::Literal(other)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceConfig {
    pub table: String,
    pub column: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    /// External name used by the HTTP surface. Requests may use either name.
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(rename = "type")]
    pub type_: ColumnTypeConfig,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<ColumnDefaultConfig>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub references: Option<ReferenceConfig>,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForeignKeyConfig {
    pub column: String,
    pub references: ReferenceConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub primary_key: Option<PrimaryKeyConfig>,
    /// Table-level unique constraints; a one-column entry counts as a single-column unique.
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyConfig>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForeignIncludeConfig {
    Table(String),
    Detailed {
        table: String,
        #[serde(default)]
        exclude_columns: Vec<String>,
    },
}

impl ForeignIncludeConfig {
    pub fn table(&self) -> &str {
        match self {
            ForeignIncludeConfig::Table(t) => t,
            ForeignIncludeConfig::Detailed { table, .. } => table,
        }
    }

    pub fn exclude_columns(&self) -> &[String] {
        match self {
            ForeignIncludeConfig::Table(_) => &[],
            ForeignIncludeConfig::Detailed { exclude_columns, .. } => exclude_columns,
        }
    }
}

/// Operations that are safe to re-run on transient executor failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub operations: Vec<OperationKind>,
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
}

fn default_attempts() -> u32 {
    3
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouterConfig {
    pub table: String,
    pub prefix: String,
    /// Empty means the default set (see `OperationKind::DEFAULT_SET`).
    #[serde(default)]
    pub operations: Vec<OperationKind>,
    #[serde(default)]
    pub exclude_columns: Vec<String>,
    #[serde(default)]
    pub foreign_include: Vec<ForeignIncludeConfig>,
    #[serde(default = "default_true")]
    pub autocommit: bool,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
    #[serde(default)]
    pub body_limit: Option<usize>,
}

impl RouterConfig {
    pub fn new(table: impl Into<String>, prefix: impl Into<String>) -> Self {
        RouterConfig {
            table: table.into(),
            prefix: prefix.into(),
            operations: Vec::new(),
            exclude_columns: Vec::new(),
            foreign_include: Vec::new(),
            autocommit: true,
            retry: None,
            validation: HashMap::new(),
            body_limit: None,
        }
    }

    pub fn operations(&self) -> Vec<OperationKind> {
        if self.operations.is_empty() {
            OperationKind::DEFAULT_SET.to_vec()
        } else {
            let mut ops = Vec::with_capacity(self.operations.len());
            for op in &self.operations {
                if !ops.contains(op) {
                    ops.push(*op);
                }
            }
            ops
        }
    }

    pub fn retry_attempts(&self, op: OperationKind) -> u32 {
        match &self.retry {
            Some(r) if r.operations.contains(&op) => r.max_attempts.max(1),
            _ => 1,
        }
    }
}

/// All config in one document: table definitions plus the routers to mount over them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CrudConfig {
    /// Default schema for tables that do not name one.
    #[serde(default)]
    pub schema: Option<String>,
    pub tables: Vec<TableConfig>,
    #[serde(default)]
    pub routers: Vec<RouterConfig>,
}

impl CrudConfig {
    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }
}
