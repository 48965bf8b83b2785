//! Config validation: descriptor invariants and router consistency.

use crate::config::{CrudConfig, PrimaryKeyConfig, RouterConfig, TableConfig};
use crate::error::ConfigError;
use crate::schema::OperationKind;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Keys reserved in request bodies.
pub const RESERVED_BODY_KEYS: [&str; 2] = ["insert", "on_conflict"];

pub fn validate_identifier(name: &str) -> Result<(), ConfigError> {
    if !IDENTIFIER_RE.is_match(name) || name.contains("____") {
        return Err(ConfigError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// The single primary-key column of a table.
pub fn primary_key_column(table: &TableConfig) -> Result<&str, ConfigError> {
    let flagged: Vec<&str> = table
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.as_str())
        .collect();
    if flagged.len() > 1 {
        return Err(ConfigError::MultiplePrimaryKey {
            table: table.name.clone(),
            columns: flagged.join(", "),
        });
    }
    let declared = match &table.primary_key {
        Some(PrimaryKeyConfig::Composite(cols)) if cols.len() > 1 => {
            return Err(ConfigError::CompositePrimaryKeyConstraint {
                table: table.name.clone(),
                columns: cols.join(", "),
            });
        }
        Some(PrimaryKeyConfig::Composite(cols)) => cols.first().map(String::as_str),
        Some(PrimaryKeyConfig::Single(col)) => Some(col.as_str()),
        None => None,
    };
    match (declared, flagged.first().copied()) {
        (Some(d), Some(f)) if d != f => Err(ConfigError::MultiplePrimaryKey {
            table: table.name.clone(),
            columns: format!("{}, {}", f, d),
        }),
        (Some(d), _) => Ok(d),
        (None, Some(f)) => Ok(f),
        (None, None) => Err(ConfigError::MissingPrimaryKey(table.name.clone())),
    }
}

/// Unique column sets after merging column flags with table-level constraints. Single-column
/// sets come first, each set ordered by column position.
pub fn unique_sets(table: &TableConfig) -> Result<Vec<Vec<String>>, ConfigError> {
    let position = |name: &str| table.columns.iter().position(|c| c.name == name);
    let mut sets: Vec<Vec<String>> = table
        .columns
        .iter()
        .filter(|c| c.unique)
        .map(|c| vec![c.name.clone()])
        .collect();
    for set in &table.unique {
        if set.is_empty() {
            return Err(ConfigError::Validation(format!(
                "table {}: empty unique constraint",
                table.name
            )));
        }
        let mut ordered = Vec::with_capacity(set.len());
        for name in set {
            let pos = position(name).ok_or_else(|| ConfigError::MissingReference {
                kind: "unique column",
                id: format!("{}.{}", table.name, name),
            })?;
            ordered.push((pos, name.clone()));
        }
        ordered.sort();
        ordered.dedup();
        let ordered: Vec<String> = ordered.into_iter().map(|(_, n)| n).collect();
        if !sets.contains(&ordered) {
            sets.push(ordered);
        }
    }

    let singles = sets.iter().filter(|s| s.len() == 1).count();
    let composites = sets.len() - singles;
    if singles > 1 {
        return Err(ConfigError::MultipleSingleUnique {
            table: table.name.clone(),
            reason: format!("{} single-column unique constraints", singles),
        });
    }
    if singles == 1 && composites > 0 {
        return Err(ConfigError::MultipleSingleUnique {
            table: table.name.clone(),
            reason: "single-column unique alongside a composite unique constraint".into(),
        });
    }
    sets.sort_by_key(|s| s.len() > 1);
    Ok(sets)
}

pub fn validate_table(table: &TableConfig) -> Result<(), ConfigError> {
    validate_identifier(&table.name)?;
    if let Some(schema) = &table.schema {
        validate_identifier(schema)?;
    }
    let mut external = HashSet::new();
    let mut storage = HashSet::new();
    for c in &table.columns {
        validate_identifier(&c.name)?;
        if !storage.insert(c.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "table {}: duplicate column {}",
                table.name, c.name
            )));
        }
        if let Some(alias) = &c.alias {
            validate_identifier(alias)?;
        }
    }
    for c in &table.columns {
        let ext = c.alias.as_deref().unwrap_or(&c.name);
        let clashes_with_other_storage = ext != c.name && storage.contains(ext);
        if !external.insert(ext) || clashes_with_other_storage {
            return Err(ConfigError::Validation(format!(
                "table {}: external name {} is used twice",
                table.name, ext
            )));
        }
    }

    let pk = primary_key_column(table)?;
    if !storage.contains(pk) {
        return Err(ConfigError::MissingReference {
            kind: "primary key column",
            id: format!("{}.{}", table.name, pk),
        });
    }
    unique_sets(table)?;
    for fk in &table.foreign_keys {
        if !storage.contains(fk.column.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "foreign key column",
                id: format!("{}.{}", table.name, fk.column),
            });
        }
    }
    Ok(())
}

pub fn validate_router(router: &RouterConfig, table: &TableConfig) -> Result<(), ConfigError> {
    if !router.prefix.starts_with('/') || (router.prefix.len() > 1 && router.prefix.ends_with('/')) {
        return Err(ConfigError::Validation(format!(
            "router prefix '{}' must start with '/' and not end with one",
            router.prefix
        )));
    }
    let ops = router.operations();
    let post_root: Vec<&str> = ops
        .iter()
        .filter(|op| op.mounts_on_post_root())
        .map(|op| op.as_str())
        .collect();
    if post_root.len() > 1 {
        return Err(ConfigError::Validation(format!(
            "router {}: {} all claim POST /; mount only one",
            router.prefix,
            post_root.join(", ")
        )));
    }

    let has_column = |name: &str| table.columns.iter().any(|c| c.name == name || c.alias.as_deref() == Some(name));
    let pk = primary_key_column(table)?;
    for name in &router.exclude_columns {
        if !has_column(name) {
            return Err(ConfigError::MissingReference {
                kind: "excluded column",
                id: format!("{}.{}", table.name, name),
            });
        }
        let is_pk = table
            .columns
            .iter()
            .any(|c| c.name == pk && (c.name == *name || c.alias.as_deref() == Some(name)));
        if is_pk {
            return Err(ConfigError::Validation(format!(
                "router {}: the primary key cannot be excluded",
                router.prefix
            )));
        }
    }
    for (name, rule) in &router.validation {
        if !has_column(name) {
            return Err(ConfigError::MissingReference {
                kind: "validated column",
                id: format!("{}.{}", table.name, name),
            });
        }
        if let Some(pattern) = &rule.pattern {
            Regex::new(pattern)
                .map_err(|e| ConfigError::Validation(format!("validation pattern for {}: {}", name, e)))?;
        }
    }

    let uses_reserved_keys = ops
        .iter()
        .any(|op| matches!(op, OperationKind::UpsertOne | OperationKind::UpsertMany));
    if uses_reserved_keys {
        for c in &table.columns {
            let ext = c.alias.as_deref().unwrap_or(&c.name);
            if RESERVED_BODY_KEYS.contains(&ext) {
                return Err(ConfigError::Validation(format!(
                    "table {}: column name '{}' is reserved by upsert bodies",
                    table.name, ext
                )));
            }
        }
    }
    Ok(())
}

pub fn validate(config: &CrudConfig) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for t in &config.tables {
        if !names.insert(t.name.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate table {}", t.name)));
        }
        validate_table(t)?;
    }
    let mut prefixes = HashSet::new();
    for r in &config.routers {
        let table = config.table(&r.table).ok_or_else(|| ConfigError::MissingReference {
            kind: "table",
            id: r.table.clone(),
        })?;
        if !prefixes.insert(r.prefix.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate router prefix {}", r.prefix)));
        }
        validate_router(r, table)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnConfig, ColumnTypeConfig};

    fn col(name: &str) -> ColumnConfig {
        ColumnConfig {
            name: name.into(),
            alias: None,
            type_: ColumnTypeConfig::Simple("int4".into()),
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
            references: None,
            comment: None,
        }
    }

    fn table(columns: Vec<ColumnConfig>) -> TableConfig {
        TableConfig {
            name: "t".into(),
            schema: None,
            columns,
            primary_key: None,
            unique: vec![],
            foreign_keys: vec![],
            comment: None,
        }
    }

    #[test]
    fn rejects_two_primary_key_flags() {
        let mut a = col("a");
        a.primary_key = true;
        let mut b = col("b");
        b.primary_key = true;
        let err = primary_key_column(&table(vec![a, b])).unwrap_err();
        assert!(matches!(err, ConfigError::MultiplePrimaryKey { .. }));
    }

    #[test]
    fn rejects_composite_primary_key() {
        let mut t = table(vec![col("a"), col("b")]);
        t.primary_key = Some(PrimaryKeyConfig::Composite(vec!["a".into(), "b".into()]));
        let err = primary_key_column(&t).unwrap_err();
        assert!(matches!(err, ConfigError::CompositePrimaryKeyConstraint { .. }));
    }

    #[test]
    fn rejects_missing_primary_key() {
        let err = primary_key_column(&table(vec![col("a")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPrimaryKey(_)));
    }

    #[test]
    fn rejects_two_single_uniques() {
        let mut a = col("a");
        a.unique = true;
        let mut t = table(vec![a, col("b")]);
        t.unique = vec![vec!["b".into()]];
        assert!(matches!(unique_sets(&t), Err(ConfigError::MultipleSingleUnique { .. })));
    }

    #[test]
    fn rejects_single_unique_next_to_composite() {
        let mut a = col("a");
        a.unique = true;
        let mut t = table(vec![a, col("b"), col("c")]);
        t.unique = vec![vec!["c".into(), "b".into()]];
        assert!(matches!(unique_sets(&t), Err(ConfigError::MultipleSingleUnique { .. })));
    }

    #[test]
    fn composite_unique_is_ordered_by_position() {
        let mut t = table(vec![col("a"), col("b"), col("c")]);
        t.unique = vec![vec!["c".into(), "a".into()], vec!["b".into(), "c".into()]];
        let sets = unique_sets(&t).unwrap();
        assert_eq!(sets[0], vec!["a".to_string(), "c".to_string()]);
        assert_eq!(sets.len(), 2);
    }

    #[test]
    fn identifiers_cannot_contain_the_filter_separator() {
        assert!(validate_identifier("int4_value").is_ok());
        assert!(validate_identifier("a____b").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("drop table").is_err());
    }

    #[test]
    fn post_root_operations_are_exclusive() {
        let mut a = col("a");
        a.primary_key = true;
        let t = table(vec![a]);
        let mut r = RouterConfig::new("t", "/t");
        r.operations = vec![OperationKind::CreateOne, OperationKind::PostRedirectGet];
        assert!(validate_router(&r, &t).is_err());
        r.operations = vec![OperationKind::CreateOne, OperationKind::UpsertMany];
        assert!(validate_router(&r, &t).is_ok());
    }

    #[test]
    fn primary_key_cannot_be_excluded() {
        let mut a = col("a");
        a.primary_key = true;
        let t = table(vec![a, col("b")]);
        let mut r = RouterConfig::new("t", "/t");
        r.exclude_columns = vec!["a".into()];
        assert!(validate_router(&r, &t).is_err());
    }
}
