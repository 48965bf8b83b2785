//! Resolve config into table descriptors; load config from JSON or from the live PostgreSQL catalog.

use crate::config::resolved::{
    ColumnDescriptor, ForeignEdge, ForeignInclude, ResolvedRouter, TableDescriptor, UniqueConstraint,
};
use crate::config::types::*;
use crate::config::validator::{primary_key_column, unique_sets, validate, validate_router};
use crate::error::ConfigError;
use crate::types::{SqlType, SqlValue};
use sqlx::PgPool;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Validate the whole config and resolve every router it declares.
pub fn resolve(config: &CrudConfig) -> Result<Vec<ResolvedRouter>, ConfigError> {
    validate(config)?;
    config
        .routers
        .iter()
        .map(|r| resolve_router(config, r))
        .collect()
}

pub fn resolve_router(config: &CrudConfig, router: &RouterConfig) -> Result<ResolvedRouter, ConfigError> {
    let table_config = config.table(&router.table).ok_or_else(|| ConfigError::MissingReference {
        kind: "table",
        id: router.table.clone(),
    })?;
    validate_router(router, table_config)?;
    let table = resolve_table(config, table_config, &router.exclude_columns)?;

    for c in &table_config.columns {
        let excluded = router
            .exclude_columns
            .iter()
            .any(|e| *e == c.name || Some(e) == c.alias.as_ref());
        let required = !c.nullable && c.default.is_none() && !c.primary_key;
        if excluded && required {
            tracing::warn!(
                table = %table.name,
                column = %c.name,
                "excluded column is required on insert; inserts will fail unless the database fills it"
            );
        }
    }

    let includes = resolve_includes(config, &table, &router.foreign_include)?;
    let table = table.with_foreign_includes(includes);

    let mut rules = HashMap::new();
    for (name, rule) in &router.validation {
        // Rules on excluded columns have nothing to validate.
        if let Some(i) = table.lookup(name) {
            rules.insert(i, rule.clone());
        }
    }

    Ok(ResolvedRouter {
        config: router.clone(),
        table: Arc::new(table),
        rules,
    })
}

/// Build the descriptor for one table, leaving out `exclude` (alias or storage names).
pub fn resolve_table(
    config: &CrudConfig,
    table: &TableConfig,
    exclude: &[String],
) -> Result<TableDescriptor, ConfigError> {
    let pk_name = primary_key_column(table)?;
    let sets = unique_sets(table)?;
    let excluded: HashSet<&str> = table
        .columns
        .iter()
        .filter(|c| exclude.iter().any(|e| *e == c.name || Some(e) == c.alias.as_ref()))
        .map(|c| c.name.as_str())
        .collect();

    let mut unique_constraints = Vec::new();
    for set in &sets {
        let name = format!("{}_{}_key", table.name, set.join("_"));
        if set.iter().any(|c| excluded.contains(c.as_str())) {
            tracing::warn!(table = %table.name, constraint = %name, "unique constraint touches an excluded column; dropped");
            continue;
        }
        unique_constraints.push((name, set.clone()));
    }

    let mut columns = Vec::new();
    for c in table.columns.iter().filter(|c| !excluded.contains(c.name.as_str())) {
        let spelling = c.type_.spelling();
        let sql_type = SqlType::parse(&spelling)
            .filter(|t| t.kind.is_supported())
            .ok_or_else(|| ConfigError::ColumnTypeNotSupported {
                table: table.name.clone(),
                column: c.name.clone(),
                type_name: spelling.clone(),
            })?;
        let (default, server_default) = match &c.default {
            Some(ColumnDefaultConfig::Literal(v)) => {
                let value = SqlValue::from_json(&sql_type.kind, v).map_err(|e| {
                    ConfigError::Validation(format!("table {}: default for {}: {}", table.name, c.name, e))
                })?;
                (Some(value), None)
            }
            Some(ColumnDefaultConfig::Expression { expression }) => (None, Some(expression.clone())),
            None => (None, None),
        };
        let is_primary_key = c.name == pk_name;
        let mut foreign_edges: Vec<ForeignEdge> = c
            .references
            .iter()
            .map(|r| ForeignEdge {
                table: r.table.clone(),
                column: r.column.clone(),
            })
            .collect();
        for fk in table.foreign_keys.iter().filter(|fk| fk.column == c.name) {
            let edge = ForeignEdge {
                table: fk.references.table.clone(),
                column: fk.references.column.clone(),
            };
            if !foreign_edges.contains(&edge) {
                foreign_edges.push(edge);
            }
        }
        columns.push(ColumnDescriptor {
            name: c.name.clone(),
            alias: c.alias.clone(),
            sql_type,
            nullable: c.nullable && !is_primary_key,
            default,
            server_default,
            is_primary_key,
            unique_membership: unique_constraints
                .iter()
                .filter(|(_, set)| set.contains(&c.name))
                .map(|(name, _)| name.clone())
                .collect::<BTreeSet<_>>(),
            foreign_edges,
        });
    }

    let index = |name: &str| columns.iter().position(|c: &ColumnDescriptor| c.name == name);
    let primary_key = index(pk_name).ok_or_else(|| ConfigError::MissingReference {
        kind: "primary key column",
        id: format!("{}.{}", table.name, pk_name),
    })?;
    let unique_constraints = unique_constraints
        .into_iter()
        .map(|(name, set)| UniqueConstraint {
            name,
            columns: set.iter().filter_map(|c| index(c)).collect(),
        })
        .collect();

    Ok(TableDescriptor::new(
        table.schema.clone().or_else(|| config.schema.clone()),
        table.name.clone(),
        columns,
        primary_key,
        unique_constraints,
    ))
}

fn resolve_includes(
    config: &CrudConfig,
    parent: &TableDescriptor,
    includes: &[ForeignIncludeConfig],
) -> Result<Vec<ForeignInclude>, ConfigError> {
    let invalid = |include: &str, reason: &str| ConfigError::InvalidForeignInclude {
        table: parent.name.clone(),
        include: include.to_string(),
        reason: reason.to_string(),
    };
    let pk = &parent.primary_key().name;
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(includes.len());
    for include in includes {
        let name = include.table();
        if name == parent.name {
            return Err(invalid(name, "a table cannot include itself"));
        }
        if !seen.insert(name) {
            return Err(invalid(name, "included twice"));
        }
        let child = config.table(name).ok_or_else(|| ConfigError::MissingReference {
            kind: "included table",
            id: name.to_string(),
        })?;
        let child = resolve_table(config, child, include.exclude_columns())?;
        let child_column = child
            .columns
            .iter()
            .position(|c| c.foreign_edges.iter().any(|e| e.table == parent.name && e.column == *pk))
            .ok_or_else(|| invalid(name, &format!("no visible foreign key onto {}.{}", parent.name, pk)))?;
        out.push(ForeignInclude {
            name: name.to_string(),
            table: Arc::new(child),
            child_column,
        });
    }
    Ok(out)
}

/// Read a config document, or every `*.json` document in a directory (merged in file-name order).
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<CrudConfig, ConfigError> {
    let path = path.as_ref();
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    if !meta.is_dir() {
        return read_document(path).await;
    }

    let mut files = Vec::new();
    let mut dir = tokio::fs::read_dir(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| ConfigError::Load(e.to_string()))?
    {
        let p = entry.path();
        if p.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(p);
        }
    }
    files.sort();

    let mut merged = CrudConfig::default();
    for file in files {
        let doc = read_document(&file).await?;
        if merged.schema.is_none() {
            merged.schema = doc.schema;
        }
        merged.tables.extend(doc.tables);
        merged.routers.extend(doc.routers);
    }
    Ok(merged)
}

async fn read_document(path: &Path) -> Result<CrudConfig, ConfigError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

const COLUMNS_SQL: &str = r#"SELECT column_name::text, is_nullable = 'YES', column_default::text, udt_name::text,
       character_maximum_length::int4
FROM information_schema.columns
WHERE table_schema = $1 AND table_name = $2
ORDER BY ordinal_position"#;

const CONSTRAINTS_SQL: &str = r#"SELECT con.contype::text,
       con.conname::text,
       ARRAY(SELECT a.attname::text
             FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
             JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
             ORDER BY k.ord),
       ref_cls.relname::text,
       ARRAY(SELECT a.attname::text
             FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
             JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
             ORDER BY k.ord)
FROM pg_constraint con
JOIN pg_class cls ON cls.oid = con.conrelid
JOIN pg_namespace ns ON ns.oid = cls.relnamespace
LEFT JOIN pg_class ref_cls ON ref_cls.oid = con.confrelid
WHERE ns.nspname = $1 AND cls.relname = $2 AND con.contype IN ('p', 'u', 'f')
ORDER BY con.conname"#;

type ColumnRow = (String, bool, Option<String>, String, Option<i32>);
type ConstraintRow = (String, String, Vec<String>, Option<String>, Vec<String>);

/// Build a table definition from the live catalog. Columns of types the router cannot expose
/// are still listed; exclude them on the router.
pub async fn reflect_table(pool: &PgPool, schema: &str, table: &str) -> Result<TableConfig, ConfigError> {
    tracing::debug!(schema, table, "reflecting table");
    let columns: Vec<ColumnRow> = sqlx::query_as(COLUMNS_SQL)
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| ConfigError::Load(e.to_string()))?;
    if columns.is_empty() {
        return Err(ConfigError::MissingReference {
            kind: "table",
            id: format!("{}.{}", schema, table),
        });
    }
    let constraints: Vec<ConstraintRow> = sqlx::query_as(CONSTRAINTS_SQL)
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let mut out = TableConfig {
        name: table.to_string(),
        schema: Some(schema.to_string()),
        columns: columns
            .into_iter()
            .map(|(name, nullable, default, udt, length)| {
                let type_ = match (udt.as_str(), length) {
                    ("varchar" | "bpchar", Some(n)) => ColumnTypeConfig::Simple(format!("{}({})", udt, n)),
                    _ => ColumnTypeConfig::Simple(udt),
                };
                ColumnConfig {
                    name,
                    alias: None,
                    type_,
                    nullable,
                    default: default.map(|expression| ColumnDefaultConfig::Expression { expression }),
                    primary_key: false,
                    unique: false,
                    references: None,
                    comment: None,
                }
            })
            .collect(),
        primary_key: None,
        unique: Vec::new(),
        foreign_keys: Vec::new(),
        comment: None,
    };
    for (kind, name, cols, ref_table, ref_cols) in constraints {
        match kind.as_str() {
            "p" if cols.len() == 1 => out.primary_key = Some(PrimaryKeyConfig::Single(cols[0].clone())),
            "p" => out.primary_key = Some(PrimaryKeyConfig::Composite(cols)),
            "u" => out.unique.push(cols),
            "f" => match (cols.as_slice(), ref_table, ref_cols.as_slice()) {
                ([column], Some(ref_table), [ref_column]) => out.foreign_keys.push(ForeignKeyConfig {
                    column: column.clone(),
                    references: ReferenceConfig {
                        table: ref_table,
                        column: ref_column.clone(),
                    },
                }),
                _ => tracing::debug!(constraint = %name, "skipping multi-column foreign key"),
            },
            _ => {}
        }
    }
    Ok(out)
}
