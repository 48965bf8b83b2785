//! Result shaping: executor rows to response JSON keyed by external column names.

use crate::config::TableDescriptor;
use crate::sql::{joined_label, PARENT_ALIAS};
use crate::store::Row;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// One row keyed by alias (or storage name). Labels that are not table columns, such as the
/// upsert conflict marker, are dropped.
pub fn shape_row(table: &TableDescriptor, row: &Row) -> Value {
    let mut out = Map::with_capacity(table.columns.len());
    for c in &table.columns {
        let v = row.get(&c.name).cloned().unwrap_or(Value::Null);
        out.insert(c.external_name().to_string(), v);
    }
    Value::Object(out)
}

pub fn shape_rows(table: &TableDescriptor, rows: &[Row]) -> Vec<Value> {
    rows.iter().map(|r| shape_row(table, r)).collect()
}

/// Picks the columns of one join alias out of a joined row. `None` when the alias matched
/// nothing (its primary key is NULL).
fn aliased(table: &TableDescriptor, alias: &str, row: &Row) -> Option<Row> {
    let pk_label = joined_label(alias, table.primary_key());
    if row.get(&pk_label).map_or(true, Value::is_null) {
        return None;
    }
    let mut out = Row::new();
    for c in &table.columns {
        let v = row.get(&joined_label(alias, c)).cloned().unwrap_or(Value::Null);
        out.insert(c.name.clone(), v);
    }
    Some(out)
}

struct Parent {
    row: Value,
    children: Vec<Vec<Value>>,
    seen: Vec<HashSet<String>>,
}

/// Folds a parent-child LEFT JOIN back into one object per parent, each carrying an array per
/// included table. Parents keep the order they first arrive in; children keep arrival order
/// within their group.
pub fn fold_includes(table: &TableDescriptor, rows: &[Row]) -> Vec<Value> {
    let includes = &table.foreign_includes;
    let mut parents: Vec<Parent> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let Some(parent_row) = aliased(table, PARENT_ALIAS, row) else {
            continue;
        };
        let key = parent_row
            .get(&table.primary_key().name)
            .map(Value::to_string)
            .unwrap_or_default();
        let slot = *index.entry(key).or_insert_with(|| {
            parents.push(Parent {
                row: shape_row(table, &parent_row),
                children: vec![Vec::new(); includes.len()],
                seen: vec![HashSet::new(); includes.len()],
            });
            parents.len() - 1
        });
        let parent = &mut parents[slot];

        for (i, include) in includes.iter().enumerate() {
            let alias = format!("t{}", i + 1);
            let Some(child) = aliased(&include.table, &alias, row) else {
                continue;
            };
            let child_key = child
                .get(&include.table.primary_key().name)
                .map(Value::to_string)
                .unwrap_or_default();
            if parent.seen[i].insert(child_key) {
                parent.children[i].push(shape_row(&include.table, &child));
            }
        }
    }

    parents
        .into_iter()
        .map(|p| {
            let mut row = p.row;
            if let Value::Object(map) = &mut row {
                for (include, children) in includes.iter().zip(p.children) {
                    map.insert(include.name.clone(), Value::Array(children));
                }
            }
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_helper::{column, pk_column};
    use crate::config::{ForeignEdge, ForeignInclude};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn row(v: Value) -> Row {
        match v {
            Value::Object(m) => m,
            _ => panic!("row literal must be an object"),
        }
    }

    fn author_with_books() -> TableDescriptor {
        let mut name = column("name", "text");
        name.alias = Some("display_name".into());
        let mut book_author = column("author_id", "int4");
        book_author.foreign_edges.push(ForeignEdge {
            table: "author".into(),
            column: "id".into(),
        });
        let book = TableDescriptor::new(
            None,
            "book".into(),
            vec![pk_column("id", "int4"), book_author, column("title", "text")],
            0,
            Vec::new(),
        );
        TableDescriptor::new(None, "author".into(), vec![pk_column("id", "int4"), name], 0, Vec::new())
            .with_foreign_includes(vec![ForeignInclude {
                name: "book".into(),
                table: Arc::new(book),
                child_column: 1,
            }])
    }

    #[test]
    fn aliases_rename_and_extra_labels_drop() {
        let table = author_with_books();
        let shaped = shape_row(
            &table,
            &row(json!({"id": 1, "name": "Ann", "__conflict_hit": true})),
        );
        assert_eq!(shaped, json!({"id": 1, "display_name": "Ann"}));
    }

    #[test]
    fn joined_rows_group_per_parent() {
        let table = author_with_books();
        let rows = vec![
            row(json!({"t0__id": 2, "t0__name": "Bo", "t1__id": 10, "t1__author_id": 2, "t1__title": "x"})),
            row(json!({"t0__id": 1, "t0__name": "Ann", "t1__id": null, "t1__author_id": null, "t1__title": null})),
            row(json!({"t0__id": 2, "t0__name": "Bo", "t1__id": 11, "t1__author_id": 2, "t1__title": "y"})),
            row(json!({"t0__id": 2, "t0__name": "Bo", "t1__id": 10, "t1__author_id": 2, "t1__title": "x"})),
        ];
        assert_eq!(
            fold_includes(&table, &rows),
            vec![
                json!({"id": 2, "display_name": "Bo", "book": [
                    {"id": 10, "author_id": 2, "title": "x"},
                    {"id": 11, "author_id": 2, "title": "y"}
                ]}),
                json!({"id": 1, "display_name": "Ann", "book": []}),
            ]
        );
    }
}
