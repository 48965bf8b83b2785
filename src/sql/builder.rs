//! Compiles a [`NormalizedRequest`] into one parameterized statement per operation.

use crate::config::{ColumnDescriptor, TableDescriptor};
use crate::error::AppError;
use crate::schema::OperationKind;
use crate::service::decode::{NormalizedRequest, OnConflict, OrderItem, RequestBody, RowValues};
use crate::sql::params::{Params, Statement};
use crate::sql::predicate::{self, Operand, Predicate};
use crate::types::ColumnKind;

/// Extra boolean returned by upserts: true when the row hit the conflict target.
pub const CONFLICT_HIT_COLUMN: &str = "__conflict_hit";
/// Alias of the parent table in joined include queries; children are `t1`, `t2`, ...
pub const PARENT_ALIAS: &str = "t0";

/// Quote identifier for PostgreSQL (identifiers are validated at startup).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub fn qualified_table(table: &TableDescriptor) -> String {
    match &table.schema {
        Some(schema) => format!("{}.{}", quoted(schema), quoted(&table.name)),
        None => quoted(&table.name),
    }
}

fn column_ref(alias: Option<&str>, column: &ColumnDescriptor) -> String {
    match alias {
        Some(a) => format!("{}.{}", quoted(a), quoted(&column.name)),
        None => quoted(&column.name),
    }
}

/// Label of a column in a joined result: `t0__name`.
pub fn joined_label(alias: &str, column: &ColumnDescriptor) -> String {
    format!("{}__{}", alias, column.name)
}

/// Select list. Kinds the row decoder cannot read natively come back as text or JSON.
fn projection(table: &TableDescriptor, alias: Option<&str>) -> String {
    table
        .columns
        .iter()
        .map(|c| {
            let expr = column_ref(alias, c);
            let expr = match c.kind() {
                ColumnKind::Array(_) => format!("to_json({})", expr),
                k if k.projects_as_text() => format!("{}::text", expr),
                _ => expr,
            };
            let label = match alias {
                Some(a) => joined_label(a, c),
                None => c.name.clone(),
            };
            format!("{} AS {}", expr, quoted(&label))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Path key plus every column filter, AND-ed.
fn where_predicate(table: &TableDescriptor, req: &NormalizedRequest, alias: Option<&str>) -> Predicate {
    let mut clauses = Vec::with_capacity(req.filters.len() + 1);
    if let Some(pk) = &req.primary_key {
        let column = table.primary_key();
        let (left, cast) = predicate::comparable(&column_ref(alias, column), column);
        clauses.push(Predicate::Compare {
            left,
            op: "=",
            right: Operand {
                value: pk.clone(),
                cast,
            },
        });
    }
    for f in &req.filters {
        let column = &table.columns[f.column];
        clauses.push(predicate::column_predicate(&column_ref(alias, column), column, f));
    }
    Predicate::and(clauses)
}

fn push_where(sql: &mut String, predicate: &Predicate, params: &mut Params) {
    if let Some(clause) = predicate.render(params) {
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }
}

fn push_order(sql: &mut String, table: &TableDescriptor, order: &[OrderItem], alias: Option<&str>) {
    if order.is_empty() {
        return;
    }
    let items: Vec<String> = order
        .iter()
        .map(|o| format!("{} {}", column_ref(alias, &table.columns[o.column]), o.direction.sql()))
        .collect();
    sql.push_str(" ORDER BY ");
    sql.push_str(&items.join(", "));
}

fn push_page(sql: &mut String, req: &NormalizedRequest) {
    if let Some(limit) = req.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = req.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }
}

/// Statement for any operation. Reads with foreign includes use [`select_with_includes`].
pub fn compile(table: &TableDescriptor, req: &NormalizedRequest) -> Result<Statement, AppError> {
    match req.operation {
        OperationKind::FindOne | OperationKind::FindMany if !table.foreign_includes.is_empty() => {
            Ok(select_with_includes(table, req))
        }
        OperationKind::FindOne | OperationKind::FindMany => Ok(select(table, req)),
        OperationKind::CreateOne
        | OperationKind::UpsertOne
        | OperationKind::UpsertMany
        | OperationKind::PostRedirectGet => insert(table, req),
        OperationKind::UpdateOne
        | OperationKind::UpdateMany
        | OperationKind::PatchOne
        | OperationKind::PatchMany => update(table, req),
        OperationKind::DeleteOne | OperationKind::DeleteMany => Ok(delete(table, req)),
    }
}

pub fn select(table: &TableDescriptor, req: &NormalizedRequest) -> Statement {
    let mut params = Params::new();
    let mut sql = format!("SELECT {} FROM {}", projection(table, None), qualified_table(table));
    push_where(&mut sql, &where_predicate(table, req, None), &mut params);
    push_order(&mut sql, table, &req.order_by, None);
    push_page(&mut sql, req);
    params.finish(sql)
}

/// Matched rows before pagination.
pub fn count(table: &TableDescriptor, req: &NormalizedRequest) -> Statement {
    let mut params = Params::new();
    let mut sql = format!("SELECT COUNT(*) AS \"count\" FROM {}", qualified_table(table));
    push_where(&mut sql, &where_predicate(table, req, None), &mut params);
    params.finish(sql)
}

/// Parent rows are filtered, ordered and paginated in a subquery, then each included child
/// table is LEFT JOINed on its foreign key. The shaper folds the rows back per parent.
pub fn select_with_includes(table: &TableDescriptor, req: &NormalizedRequest) -> Statement {
    let mut params = Params::new();
    let mut inner = format!("SELECT * FROM {}", qualified_table(table));
    push_where(&mut inner, &where_predicate(table, req, None), &mut params);
    push_order(&mut inner, table, &req.order_by, None);
    push_page(&mut inner, req);

    let mut select_list = vec![projection(table, Some(PARENT_ALIAS))];
    let mut joins = String::new();
    for (i, include) in table.foreign_includes.iter().enumerate() {
        let alias = format!("t{}", i + 1);
        let child = &include.table;
        select_list.push(projection(child, Some(&alias)));
        joins.push_str(&format!(
            " LEFT JOIN {} AS {} ON {} = {}",
            qualified_table(child),
            quoted(&alias),
            column_ref(Some(&alias), &child.columns[include.child_column]),
            column_ref(Some(PARENT_ALIAS), table.primary_key()),
        ));
    }
    let mut sql = format!(
        "SELECT {} FROM ({}) AS {}{}",
        select_list.join(", "),
        inner,
        quoted(PARENT_ALIAS),
        joins
    );
    push_order(&mut sql, table, &req.order_by, Some(PARENT_ALIAS));
    params.finish(sql)
}

pub fn insert(table: &TableDescriptor, req: &NormalizedRequest) -> Result<Statement, AppError> {
    let rows: Vec<&RowValues> = match &req.body {
        RequestBody::Row(row) => vec![row],
        RequestBody::Rows(rows) => rows.iter().collect(),
        RequestBody::None => {
            return Err(AppError::Internal(format!("{} compiled without a body", req.operation)));
        }
    };

    // Union of columns over all rows; a row missing one gets DEFAULT.
    let mut columns: Vec<usize> = rows.iter().flat_map(|r| r.iter().map(|(i, _)| *i)).collect();
    columns.sort_unstable();
    columns.dedup();

    let mut params = Params::new();
    let mut sql = format!("INSERT INTO {}", qualified_table(table));
    if columns.is_empty() {
        if rows.len() > 1 {
            return Err(AppError::SchemaViolation("rows carry no columns".into()));
        }
        sql.push_str(" DEFAULT VALUES");
    } else {
        let names: Vec<String> = columns.iter().map(|&i| quoted(&table.columns[i].name)).collect();
        let tuples: Vec<String> = rows
            .iter()
            .map(|row| {
                let values: Vec<String> = columns
                    .iter()
                    .map(|&i| match row.iter().find(|(c, _)| *c == i) {
                        Some((_, v)) => params.bind(v.clone(), &table.columns[i].sql_type.cast),
                        None => "DEFAULT".to_string(),
                    })
                    .collect();
                format!("({})", values.join(", "))
            })
            .collect();
        sql.push_str(&format!(" ({}) VALUES {}", names.join(", "), tuples.join(", ")));
    }

    if let Some(on_conflict) = &req.on_conflict {
        sql.push_str(&on_conflict_clause(table, on_conflict));
    }
    sql.push_str(" RETURNING ");
    sql.push_str(&projection(table, None));
    if req.on_conflict.is_some() {
        // xmax is zero only for freshly inserted tuples.
        sql.push_str(&format!(", (xmax::text <> '0') AS {}", quoted(CONFLICT_HIT_COLUMN)));
    }
    Ok(params.finish(sql))
}

fn on_conflict_clause(table: &TableDescriptor, on_conflict: &OnConflict) -> String {
    let target: Vec<String> = on_conflict
        .target
        .iter()
        .map(|&i| quoted(&table.columns[i].name))
        .collect();
    let sets: Vec<String> = on_conflict
        .update_columns
        .iter()
        .map(|&i| {
            let name = quoted(&table.columns[i].name);
            format!("{} = EXCLUDED.{}", name, name)
        })
        .collect();
    format!(" ON CONFLICT ({}) DO UPDATE SET {}", target.join(", "), sets.join(", "))
}

pub fn update(table: &TableDescriptor, req: &NormalizedRequest) -> Result<Statement, AppError> {
    let RequestBody::Row(row) = &req.body else {
        return Err(AppError::Internal(format!("{} compiled without a row body", req.operation)));
    };
    if row.is_empty() {
        return Err(AppError::SchemaViolation("no fields to update".into()));
    }
    let mut params = Params::new();
    let sets: Vec<String> = row
        .iter()
        .map(|(i, v)| {
            let column = &table.columns[*i];
            format!("{} = {}", quoted(&column.name), params.bind(v.clone(), &column.sql_type.cast))
        })
        .collect();
    let mut sql = format!("UPDATE {} SET {}", qualified_table(table), sets.join(", "));
    push_where(&mut sql, &where_predicate(table, req, None), &mut params);
    sql.push_str(" RETURNING ");
    sql.push_str(&projection(table, None));
    Ok(params.finish(sql))
}

pub fn delete(table: &TableDescriptor, req: &NormalizedRequest) -> Statement {
    let mut params = Params::new();
    let mut sql = format!("DELETE FROM {}", qualified_table(table));
    push_where(&mut sql, &where_predicate(table, req, None), &mut params);
    sql.push_str(" RETURNING ");
    sql.push_str(&projection(table, None));
    params.finish(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_helper::{column, pk_column, sample_table};
    use crate::config::{ForeignEdge, ForeignInclude};
    use crate::service::decode::ColumnFilter;
    use crate::types::{ComparisonOperator, SortDirection, SqlValue};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const PROJECTION: &str = "\"id\" AS \"id\", \"bool_value\" AS \"bool_value\", \"char_value\" AS \"char_value\", \
        \"float4_value\" AS \"float4_value\", \"int2_value\" AS \"int2_value\", \"int4_value\" AS \"int4_value\", \
        \"text_value\" AS \"text_value\", \"timestamptz_value\" AS \"timestamptz_value\"";

    fn request(operation: OperationKind) -> NormalizedRequest {
        NormalizedRequest {
            operation,
            primary_key: None,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            body: RequestBody::None,
            on_conflict: None,
        }
    }

    fn int4_from(v: i64) -> ColumnFilter {
        ColumnFilter {
            column: 5,
            list: Vec::new(),
            list_operator: ComparisonOperator::In,
            from: Some(SqlValue::Int(v)),
            from_operator: ComparisonOperator::GreaterThan,
            to: None,
            to_operator: ComparisonOperator::LessThanOrEqualTo,
            strings: Vec::new(),
            patterns: Vec::new(),
        }
    }

    #[test]
    fn find_many_with_filters_order_and_page() {
        let table = sample_table();
        let mut req = request(OperationKind::FindMany);
        req.filters.push(int4_from(3));
        req.order_by.push(OrderItem {
            column: 0,
            direction: SortDirection::Desc,
        });
        req.limit = Some(5);
        req.offset = Some(10);
        let stmt = compile(&table, &req).unwrap();
        assert_eq!(
            stmt.sql,
            format!(
                "SELECT {} FROM \"public\".\"test_table\" WHERE \"int4_value\" > $1::int4 ORDER BY \"id\" DESC LIMIT 5 OFFSET 10",
                PROJECTION
            )
        );
        assert_eq!(stmt.params, vec![SqlValue::Int(3)]);

        let count = count(&table, &req);
        assert_eq!(
            count.sql,
            "SELECT COUNT(*) AS \"count\" FROM \"public\".\"test_table\" WHERE \"int4_value\" > $1::int4"
        );
    }

    #[test]
    fn missing_filters_render_no_where() {
        let table = sample_table();
        let stmt = delete(&table, &request(OperationKind::DeleteMany));
        assert_eq!(
            stmt.sql,
            format!("DELETE FROM \"public\".\"test_table\" RETURNING {}", PROJECTION)
        );
    }

    #[test]
    fn update_by_key_sets_body_and_narrows() {
        let table = sample_table();
        let mut req = request(OperationKind::PatchOne);
        let id = uuid::Uuid::nil();
        req.primary_key = Some(SqlValue::Uuid(id));
        req.filters.push(int4_from(1));
        req.body = RequestBody::Row(vec![(6, SqlValue::Text("x".into()))]);
        let stmt = compile(&table, &req).unwrap();
        assert_eq!(
            stmt.sql,
            format!(
                "UPDATE \"public\".\"test_table\" SET \"text_value\" = $1::text \
                 WHERE (\"id\" = $2::uuid AND \"int4_value\" > $3::int4) RETURNING {}",
                PROJECTION
            )
        );
        assert_eq!(
            stmt.params,
            vec![SqlValue::Text("x".into()), SqlValue::Uuid(id), SqlValue::Int(1)]
        );
    }

    #[test]
    fn upsert_many_fills_gaps_with_default() {
        let table = sample_table();
        let mut req = request(OperationKind::UpsertMany);
        req.body = RequestBody::Rows(vec![
            vec![(3, SqlValue::Float(1.5)), (4, SqlValue::Int(1)), (5, SqlValue::Int(1))],
            vec![
                (3, SqlValue::Float(2.5)),
                (4, SqlValue::Int(2)),
                (5, SqlValue::Int(2)),
                (6, SqlValue::Text("y".into())),
            ],
        ]);
        req.on_conflict = Some(OnConflict {
            target: vec![3, 4, 5],
            update_columns: vec![6],
        });
        let stmt = compile(&table, &req).unwrap();
        assert_eq!(
            stmt.sql,
            format!(
                "INSERT INTO \"public\".\"test_table\" (\"float4_value\", \"int2_value\", \"int4_value\", \"text_value\") \
                 VALUES ($1::float4, $2::int2, $3::int4, DEFAULT), ($4::float4, $5::int2, $6::int4, $7::text) \
                 ON CONFLICT (\"float4_value\", \"int2_value\", \"int4_value\") DO UPDATE SET \"text_value\" = EXCLUDED.\"text_value\" \
                 RETURNING {}, (xmax::text <> '0') AS \"__conflict_hit\"",
                PROJECTION
            )
        );
        assert_eq!(stmt.params.len(), 7);
    }

    #[test]
    fn includes_join_a_paginated_parent() {
        let mut fk = column("author_id", "int4");
        fk.foreign_edges.push(ForeignEdge {
            table: "author".into(),
            column: "id".into(),
        });
        let book = TableDescriptor::new(None, "book".into(), vec![pk_column("id", "int4"), fk], 0, vec![]);
        let author = TableDescriptor::new(
            None,
            "author".into(),
            vec![pk_column("id", "int4"), column("price", "numeric")],
            0,
            vec![],
        )
        .with_foreign_includes(vec![ForeignInclude {
            name: "book".into(),
            table: Arc::new(book),
            child_column: 1,
        }]);
        let mut req = request(OperationKind::FindMany);
        req.order_by.push(OrderItem {
            column: 0,
            direction: SortDirection::Asc,
        });
        req.limit = Some(2);
        let stmt = compile(&author, &req).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"t0\".\"id\" AS \"t0__id\", \"t0\".\"price\"::text AS \"t0__price\", \
             \"t1\".\"id\" AS \"t1__id\", \"t1\".\"author_id\" AS \"t1__author_id\" \
             FROM (SELECT * FROM \"author\" ORDER BY \"id\" ASC LIMIT 2) AS \"t0\" \
             LEFT JOIN \"book\" AS \"t1\" ON \"t1\".\"author_id\" = \"t0\".\"id\" ORDER BY \"t0\".\"id\" ASC"
        );
    }

    #[test]
    fn arrays_project_through_json() {
        let table = TableDescriptor::new(
            None,
            "t".into(),
            vec![pk_column("id", "int8"), column("tags", "text[]")],
            0,
            vec![],
        );
        let stmt = select(&table, &request(OperationKind::FindMany));
        assert_eq!(
            stmt.sql,
            "SELECT \"id\" AS \"id\", to_json(\"tags\") AS \"tags\" FROM \"t\""
        );
    }
}
