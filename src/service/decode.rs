//! Request decoder: validates raw path/query/body input against an operation schema and yields a
//! typed [`NormalizedRequest`].

use crate::config::TableDescriptor;
use crate::error::AppError;
use crate::schema::filter::{self, FilterSuffix};
use crate::schema::{
    FieldRole, FieldSpec, OperationKind, OperationSchema, INSERT_FIELD, LIMIT_FIELD, OFFSET_FIELD,
    ON_CONFLICT_FIELD,
};
use crate::service::validation::FieldValidator;
use crate::types::{ColumnKind, ComparisonOperator, MatchingPattern, SortDirection, SqlValue};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Column values of one body row, ordered by column position.
pub type RowValues = Vec<(usize, SqlValue)>;

/// Every predicate the request puts on one column.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnFilter {
    pub column: usize,
    pub list: Vec<SqlValue>,
    pub list_operator: ComparisonOperator,
    pub from: Option<SqlValue>,
    pub from_operator: ComparisonOperator,
    pub to: Option<SqlValue>,
    pub to_operator: ComparisonOperator,
    pub strings: Vec<String>,
    pub patterns: Vec<MatchingPattern>,
}

impl ColumnFilter {
    fn new(column: usize) -> Self {
        ColumnFilter {
            column,
            list: Vec::new(),
            list_operator: ComparisonOperator::In,
            from: None,
            from_operator: ComparisonOperator::GreaterThanOrEqualTo,
            to: None,
            to_operator: ComparisonOperator::LessThanOrEqualTo,
            strings: Vec::new(),
            patterns: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty() && self.from.is_none() && self.to.is_none() && self.strings.is_empty()
    }

    /// Selected patterns, or the default `case_sensitive`.
    pub fn effective_patterns(&self) -> Vec<MatchingPattern> {
        if self.patterns.is_empty() {
            vec![MatchingPattern::CaseSensitive]
        } else {
            self.patterns.clone()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderItem {
    pub column: usize,
    pub direction: SortDirection,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OnConflict {
    /// Unique columns nominated as the conflict target.
    pub target: Vec<usize>,
    pub update_columns: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    None,
    Row(RowValues),
    Rows(Vec<RowValues>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedRequest {
    pub operation: OperationKind,
    pub primary_key: Option<SqlValue>,
    pub filters: Vec<ColumnFilter>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub body: RequestBody,
    pub on_conflict: Option<OnConflict>,
}

/// Raw request parts as the HTTP layer extracted them.
#[derive(Clone, Debug, Default)]
pub struct RawRequest {
    pub path_key: Option<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RowMode {
    Create,
    Replace,
    Partial,
}

pub struct RequestDecoder {
    table: Arc<TableDescriptor>,
    schema: Arc<OperationSchema>,
}

impl RequestDecoder {
    pub fn new(table: Arc<TableDescriptor>, schema: Arc<OperationSchema>) -> Self {
        RequestDecoder { table, schema }
    }

    pub fn decode(&self, raw: RawRequest) -> Result<NormalizedRequest, AppError> {
        let op = self.schema.operation;
        let primary_key = match (&raw.path_key, op.by_primary_key()) {
            (Some(key), true) => {
                let pk = self.table.primary_key();
                Some(
                    SqlValue::parse_text(pk.kind(), key)
                        .map_err(|e| AppError::SchemaViolation(format!("{}: {}", pk.external_name(), e)))?,
                )
            }
            (None, true) => {
                return Err(AppError::Internal(format!("{} routed without a primary key", op)));
            }
            _ => None,
        };

        let mut req = NormalizedRequest {
            operation: op,
            primary_key,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            body: RequestBody::None,
            on_conflict: None,
        };
        self.decode_query(&raw.query, &mut req)?;
        self.decode_body(raw.body, &mut req)?;
        Ok(req)
    }

    fn decode_query(&self, query: &[(String, String)], req: &mut NormalizedRequest) -> Result<(), AppError> {
        let mut filters: BTreeMap<usize, ColumnFilter> = BTreeMap::new();
        let mut seen_single: HashSet<String> = HashSet::new();

        for (key, value) in query {
            let field = match self.query_field(key)? {
                Some(f) => f,
                None => continue,
            };
            if !field.repeatable && !seen_single.insert(field.name.clone()) {
                return Err(AppError::SchemaViolation(format!("{} given more than once", field.name)));
            }
            match field.role {
                FieldRole::OrderBy => {
                    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                        req.order_by.push(self.order_item(item)?);
                    }
                }
                FieldRole::Limit => req.limit = Some(parse_unsigned(LIMIT_FIELD, value)?),
                FieldRole::Offset => req.offset = Some(parse_unsigned(OFFSET_FIELD, value)?),
                FieldRole::Filter(suffix) => {
                    let column = field
                        .column
                        .ok_or_else(|| AppError::Internal(format!("filter field {} has no column", field.name)))?;
                    let entry = filters.entry(column).or_insert_with(|| ColumnFilter::new(column));
                    self.apply_filter(entry, field, suffix, value)?;
                }
                _ => {}
            }
        }

        for f in filters.values_mut() {
            let kind = self.table.columns[f.column].kind();
            if let ColumnKind::Array(_) = kind {
                // Repeated values of an array column form one array operand.
                if !f.list.is_empty() {
                    f.list = vec![SqlValue::Array(std::mem::take(&mut f.list))];
                }
            }
        }
        req.filters = filters.into_values().filter(|f| !f.is_empty()).collect();
        Ok(())
    }

    /// Field for a query key. Bare unknown keys are ignored; a known column with a bad suffix is not.
    fn query_field(&self, key: &str) -> Result<Option<&FieldSpec>, AppError> {
        if let Some(f) = self.schema.query_field(key) {
            return Ok(Some(f));
        }
        let Some((column, rest)) = filter::split_key(key) else {
            return Ok(None);
        };
        let Some(index) = self.table.lookup(column) else {
            return Ok(None);
        };
        let external = self.table.columns[index].external_name();
        let canonical = FilterSuffix::parse(rest)
            .map(|s| filter::field_name(external, s))
            .and_then(|name| self.schema.query_field(&name));
        match canonical {
            Some(f) => Ok(Some(f)),
            None => Err(AppError::SchemaViolation(format!(
                "{} is not a valid filter for {}",
                key, self.schema.operation
            ))),
        }
    }

    fn apply_filter(
        &self,
        entry: &mut ColumnFilter,
        field: &FieldSpec,
        suffix: FilterSuffix,
        value: &str,
    ) -> Result<(), AppError> {
        let column = &self.table.columns[entry.column];
        let kind = match column.kind() {
            ColumnKind::Array(elem) => elem.as_ref(),
            k => k,
        };
        let skip_empty = value.is_empty() && !matches!(kind, ColumnKind::Text | ColumnKind::Char(_));
        match suffix {
            FilterSuffix::List => {
                if !skip_empty {
                    entry.list.push(parse_value(&field.name, kind, value)?);
                }
            }
            FilterSuffix::From => {
                if !skip_empty {
                    entry.from = Some(parse_value(&field.name, kind, value)?);
                }
            }
            FilterSuffix::To => {
                if !skip_empty {
                    entry.to = Some(parse_value(&field.name, kind, value)?);
                }
            }
            FilterSuffix::ListOperator => entry.list_operator = parse_operator(field, value)?,
            FilterSuffix::FromOperator => entry.from_operator = parse_operator(field, value)?,
            FilterSuffix::ToOperator => entry.to_operator = parse_operator(field, value)?,
            FilterSuffix::Str => entry.strings.push(value.to_string()),
            FilterSuffix::StrPattern => {
                let pattern: MatchingPattern = value.parse().map_err(AppError::SchemaViolation)?;
                if !entry.patterns.contains(&pattern) {
                    entry.patterns.push(pattern);
                }
            }
        }
        Ok(())
    }

    fn order_item(&self, item: &str) -> Result<OrderItem, AppError> {
        let (name, direction) = match item.split_once(':') {
            Some((name, dir)) => (
                name.trim(),
                dir.trim().parse::<SortDirection>().map_err(AppError::UnknownOrderType)?,
            ),
            None => (item, SortDirection::Asc),
        };
        let column = self
            .table
            .lookup(name)
            .ok_or_else(|| AppError::UnknownColumn(name.to_string()))?;
        Ok(OrderItem { column, direction })
    }

    fn decode_body(&self, body: Option<Value>, req: &mut NormalizedRequest) -> Result<(), AppError> {
        let op = self.schema.operation;
        let mode = match op {
            OperationKind::CreateOne
            | OperationKind::UpsertOne
            | OperationKind::UpsertMany
            | OperationKind::PostRedirectGet => RowMode::Create,
            OperationKind::UpdateOne | OperationKind::UpdateMany => RowMode::Replace,
            OperationKind::PatchOne | OperationKind::PatchMany => RowMode::Partial,
            _ => return Ok(()),
        };
        let body = body.ok_or_else(|| AppError::SchemaViolation("request body is required".into()))?;

        if op == OperationKind::UpsertMany {
            let (rows, on_conflict) = match body {
                Value::Array(rows) => (rows, None),
                Value::Object(mut obj) => {
                    let rows = match obj.remove(INSERT_FIELD) {
                        Some(Value::Array(rows)) => rows,
                        Some(_) => return Err(AppError::SchemaViolation(format!("{} must be a list of rows", INSERT_FIELD))),
                        None => return Err(AppError::SchemaViolation(format!("{} is required", INSERT_FIELD))),
                    };
                    let on_conflict = obj.remove(ON_CONFLICT_FIELD);
                    if let Some(key) = obj.keys().next() {
                        return Err(AppError::SchemaViolation(format!("unknown field {}", key)));
                    }
                    (rows, on_conflict)
                }
                _ => return Err(AppError::SchemaViolation("body must be an object".into())),
            };
            if rows.is_empty() {
                return Err(AppError::SchemaViolation(format!("{} must not be empty", INSERT_FIELD)));
            }
            req.body = RequestBody::Rows(
                rows.into_iter()
                    .map(|row| match row {
                        Value::Object(obj) => self.decode_row(obj, mode),
                        _ => Err(AppError::SchemaViolation("each row must be an object".into())),
                    })
                    .collect::<Result<_, _>>()?,
            );
            req.on_conflict = on_conflict.map(|v| self.decode_on_conflict(v)).transpose()?;
            return Ok(());
        }

        let Value::Object(mut obj) = body else {
            return Err(AppError::SchemaViolation("body must be an object".into()));
        };
        if op == OperationKind::UpsertOne {
            req.on_conflict = obj
                .remove(ON_CONFLICT_FIELD)
                .map(|v| self.decode_on_conflict(v))
                .transpose()?;
        }
        req.body = RequestBody::Row(self.decode_row(obj, mode)?);
        Ok(())
    }

    fn decode_row(&self, obj: Map<String, Value>, mode: RowMode) -> Result<RowValues, AppError> {
        let fields = self.schema.row_fields();
        let field_for = |index: usize| fields.iter().find(|f| f.column == Some(index));

        let mut row: BTreeMap<usize, SqlValue> = BTreeMap::new();
        for (key, v) in obj {
            let field = self
                .table
                .lookup(&key)
                .and_then(field_for)
                .ok_or_else(|| AppError::SchemaViolation(format!("unknown field {}", key)))?;
            let index = field.column.unwrap_or_default();
            let column = &self.table.columns[index];
            if v.is_null() && !field.nullable {
                return Err(AppError::SchemaViolation(format!("{} must not be null", field.name)));
            }
            FieldValidator::check(field, &v)?;
            let value = SqlValue::from_json(column.kind(), &v)
                .map_err(|e| AppError::SchemaViolation(format!("{}: {}", field.name, e)))?;
            if row.insert(index, value).is_some() {
                return Err(AppError::SchemaViolation(format!("{} given more than once", field.name)));
            }
        }

        if mode != RowMode::Partial {
            for field in fields {
                let Some(index) = field.column else { continue };
                if row.contains_key(&index) {
                    continue;
                }
                let column = &self.table.columns[index];
                if let Some(default) = &column.default {
                    row.insert(index, default.clone());
                } else if field.required {
                    return Err(AppError::SchemaViolation(format!("missing required field {}", field.name)));
                } else if mode == RowMode::Replace {
                    row.insert(index, SqlValue::Null);
                }
            }
        } else if row.is_empty() {
            return Err(AppError::SchemaViolation("no fields to update".into()));
        }
        Ok(row.into_iter().collect())
    }

    fn decode_on_conflict(&self, v: Value) -> Result<OnConflict, AppError> {
        let Value::Object(mut obj) = v else {
            return Err(AppError::SchemaViolation(format!("{} must be an object", ON_CONFLICT_FIELD)));
        };
        let columns = obj.remove("update_columns");
        if let Some(key) = obj.keys().next() {
            return Err(AppError::SchemaViolation(format!("unknown field {}.{}", ON_CONFLICT_FIELD, key)));
        }
        let names = match columns {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(AppError::SchemaViolation(format!(
                    "{}.update_columns must be a list of column names",
                    ON_CONFLICT_FIELD
                )))
            }
        };
        if names.is_empty() {
            return Err(AppError::UpdateColumnEmpty);
        }
        let mut update_columns = Vec::with_capacity(names.len());
        for name in names {
            let Value::String(name) = name else {
                return Err(AppError::SchemaViolation(format!(
                    "{}.update_columns must be a list of column names",
                    ON_CONFLICT_FIELD
                )));
            };
            let index = self.table.lookup(&name).ok_or(AppError::UnknownColumn(name))?;
            if !update_columns.contains(&index) {
                update_columns.push(index);
            }
        }
        Ok(OnConflict {
            target: self.table.conflict_target(),
            update_columns,
        })
    }
}

fn parse_value(field: &str, kind: &ColumnKind, value: &str) -> Result<SqlValue, AppError> {
    SqlValue::parse_text(kind, value).map_err(|e| AppError::SchemaViolation(format!("{}: {}", field, e)))
}

/// Non-negative and within PostgreSQL's bigint, since the value is printed into the statement.
fn parse_unsigned(field: &str, value: &str) -> Result<i64, AppError> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|n| *n >= 0)
        .ok_or_else(|| AppError::SchemaViolation(format!("{} must be a non-negative integer", field)))
}

fn parse_operator(field: &FieldSpec, value: &str) -> Result<ComparisonOperator, AppError> {
    if !field.allowed.iter().any(|a| a == value) {
        return Err(AppError::SchemaViolation(format!(
            "{}: '{}' is not one of {}",
            field.name,
            value,
            field.allowed.join(", ")
        )));
    }
    value.parse().map_err(AppError::SchemaViolation)
}

/// Which POST-root operation a body targets when the router mounts `UPSERT_MANY` next to a
/// single-row insert: a list, or an object carrying an `insert` list, is a batch.
pub fn is_batch_body(body: &Value) -> bool {
    match body {
        Value::Array(_) => true,
        Value::Object(obj) => matches!(obj.get(INSERT_FIELD), Some(Value::Array(_))),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_helper::sample_table;
    use serde_json::json;
    use std::collections::HashMap;

    fn decoder(op: OperationKind) -> RequestDecoder {
        let table = Arc::new(sample_table());
        let schema = Arc::new(OperationSchema::build(op, &table, &HashMap::new()));
        RequestDecoder::new(table, schema)
    }

    fn query(pairs: &[(&str, &str)]) -> RawRequest {
        RawRequest {
            query: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn collects_filters_per_column() {
        let req = decoder(OperationKind::FindMany)
            .decode(query(&[
                ("int4_value____from", "1"),
                ("int4_value____to", "10"),
                ("int4_value____to_____comparison_operator", "Less_than"),
                ("char_value____str", "STR%"),
                ("char_value____str_____matching_pattern", "case_insensitive"),
                ("bool_value____list", "true"),
                ("ignored", "x"),
            ]))
            .unwrap();
        assert_eq!(req.filters.len(), 3);
        let int4 = req.filters.iter().find(|f| f.column == 5).unwrap();
        assert_eq!(int4.from, Some(SqlValue::Int(1)));
        assert_eq!(int4.from_operator, ComparisonOperator::GreaterThanOrEqualTo);
        assert_eq!(int4.to, Some(SqlValue::Int(10)));
        assert_eq!(int4.to_operator, ComparisonOperator::LessThan);
        let chars = req.filters.iter().find(|f| f.column == 2).unwrap();
        assert_eq!(chars.effective_patterns(), vec![MatchingPattern::CaseInsensitive]);
    }

    #[test]
    fn rejects_bad_suffix_on_known_column() {
        let err = decoder(OperationKind::FindMany)
            .decode(query(&[("bool_value____from", "true")]))
            .unwrap_err();
        assert!(matches!(err, AppError::SchemaViolation(_)));

        let err = decoder(OperationKind::FindMany)
            .decode(query(&[("int4_value____list_____comparison_operator", "Greater_than")]))
            .unwrap_err();
        assert!(matches!(err, AppError::SchemaViolation(_)));
    }

    #[test]
    fn paging_bounds_fit_bigint() {
        let d = decoder(OperationKind::FindMany);
        let req = d.decode(query(&[("limit", "5"), ("offset", "9223372036854775807")])).unwrap();
        assert_eq!(req.limit, Some(5));
        assert_eq!(req.offset, Some(i64::MAX));
        for bad in ["-1", "9223372036854775808", "18446744073709551615", "1.5"] {
            let err = d.decode(query(&[("limit", bad)])).unwrap_err();
            assert!(matches!(err, AppError::SchemaViolation(_)), "{}", bad);
        }
    }

    #[test]
    fn empty_values_contribute_no_filter() {
        let req = decoder(OperationKind::FindMany)
            .decode(query(&[("int4_value____list", ""), ("order_by_columns", "")]))
            .unwrap();
        assert!(req.filters.is_empty());
        assert!(req.order_by.is_empty());
    }

    #[test]
    fn order_by_errors() {
        let d = decoder(OperationKind::FindMany);
        let req = d.decode(query(&[("order_by_columns", "int4_value:desc,text_value")])).unwrap();
        assert_eq!(
            req.order_by,
            vec![
                OrderItem { column: 5, direction: SortDirection::Desc },
                OrderItem { column: 6, direction: SortDirection::Asc },
            ]
        );
        assert!(matches!(
            d.decode(query(&[("order_by_columns", "nope:ASC")])),
            Err(AppError::UnknownColumn(_))
        ));
        assert!(matches!(
            d.decode(query(&[("order_by_columns", "int4_value:UP")])),
            Err(AppError::UnknownOrderType(_))
        ));
    }

    #[test]
    fn create_requires_non_null_columns_without_defaults() {
        let d = decoder(OperationKind::CreateOne);
        let raw = RawRequest {
            body: Some(json!({ "float4_value": 1.5, "int2_value": 1 })),
            ..Default::default()
        };
        assert!(matches!(d.decode(raw), Err(AppError::SchemaViolation(m)) if m.contains("int4_value")));

        let raw = RawRequest {
            body: Some(json!({ "float4_value": 1.5, "int2_value": 1, "int4_value": 2, "extra": 1 })),
            ..Default::default()
        };
        assert!(matches!(d.decode(raw), Err(AppError::SchemaViolation(m)) if m.contains("extra")));
    }

    #[test]
    fn replacement_nulls_missing_nullable_columns() {
        let d = decoder(OperationKind::UpdateOne);
        let raw = RawRequest {
            path_key: Some("6a1b0e8e-3f8e-4a47-9a77-3d5c4e1e0b11".into()),
            body: Some(json!({ "float4_value": 1.5, "int2_value": 1, "int4_value": 2 })),
            ..Default::default()
        };
        let req = d.decode(raw).unwrap();
        let RequestBody::Row(row) = req.body else { panic!("expected a row") };
        assert_eq!(row.len(), 7);
        assert_eq!(row[0], (1, SqlValue::Null));
        assert!(req.primary_key.is_some());
    }

    #[test]
    fn on_conflict_needs_update_columns() {
        let d = decoder(OperationKind::UpsertOne);
        let body = json!({
            "float4_value": 1.5, "int2_value": 1, "int4_value": 2,
            "on_conflict": { "update_columns": [] }
        });
        let raw = RawRequest { body: Some(body), ..Default::default() };
        assert!(matches!(d.decode(raw), Err(AppError::UpdateColumnEmpty)));

        let body = json!({
            "float4_value": 1.5, "int2_value": 1, "int4_value": 2,
            "on_conflict": { "update_columns": ["missing"] }
        });
        let raw = RawRequest { body: Some(body), ..Default::default() };
        assert!(matches!(d.decode(raw), Err(AppError::UnknownColumn(_))));

        let body = json!({
            "float4_value": 1.5, "int2_value": 1, "int4_value": 2, "text_value": "x",
            "on_conflict": { "update_columns": ["text_value"] }
        });
        let raw = RawRequest { body: Some(body), ..Default::default() };
        let req = d.decode(raw).unwrap();
        assert_eq!(
            req.on_conflict,
            Some(OnConflict { target: vec![3, 4, 5], update_columns: vec![6] })
        );
    }

    #[test]
    fn batch_bodies_are_recognized() {
        assert!(is_batch_body(&json!({ "insert": [] })));
        assert!(is_batch_body(&json!([])));
        assert!(!is_batch_body(&json!({ "insert": 1 })));
        assert!(!is_batch_body(&json!({ "text_value": "x" })));
    }
}
