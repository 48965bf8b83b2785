//! Operation schemas: the typed path/query/body/response fields each CRUD operation accepts.
//!
//! Built once per router from a [`TableDescriptor`] and shared read-only afterwards. The request
//! decoder validates against these fields, and [`OperationSchema`] serializes so the HTTP layer
//! can publish it.

pub mod filter;

use crate::config::{TableDescriptor, ValidationRule};
use crate::types::{ColumnKind, SortDirection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub use filter::FilterSuffix;

pub const ORDER_BY_FIELD: &str = "order_by_columns";
pub const LIMIT_FIELD: &str = "limit";
pub const OFFSET_FIELD: &str = "offset";
pub const INSERT_FIELD: &str = "insert";
pub const ON_CONFLICT_FIELD: &str = "on_conflict";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    FindOne,
    FindMany,
    CreateOne,
    UpsertOne,
    UpsertMany,
    UpdateOne,
    UpdateMany,
    PatchOne,
    PatchMany,
    DeleteOne,
    DeleteMany,
    PostRedirectGet,
}

impl OperationKind {
    /// Mounted when a router names no operations.
    pub const DEFAULT_SET: [OperationKind; 10] = [
        OperationKind::FindOne,
        OperationKind::FindMany,
        OperationKind::UpsertOne,
        OperationKind::UpsertMany,
        OperationKind::UpdateOne,
        OperationKind::UpdateMany,
        OperationKind::PatchOne,
        OperationKind::PatchMany,
        OperationKind::DeleteOne,
        OperationKind::DeleteMany,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::FindOne => "FIND_ONE",
            OperationKind::FindMany => "FIND_MANY",
            OperationKind::CreateOne => "CREATE_ONE",
            OperationKind::UpsertOne => "UPSERT_ONE",
            OperationKind::UpsertMany => "UPSERT_MANY",
            OperationKind::UpdateOne => "UPDATE_ONE",
            OperationKind::UpdateMany => "UPDATE_MANY",
            OperationKind::PatchOne => "PATCH_ONE",
            OperationKind::PatchMany => "PATCH_MANY",
            OperationKind::DeleteOne => "DELETE_ONE",
            OperationKind::DeleteMany => "DELETE_MANY",
            OperationKind::PostRedirectGet => "POST_REDIRECT_GET",
        }
    }

    /// Single-row inserts claiming `POST /`; a router mounts at most one.
    pub fn mounts_on_post_root(self) -> bool {
        matches!(
            self,
            OperationKind::CreateOne | OperationKind::UpsertOne | OperationKind::PostRedirectGet
        )
    }

    /// Operations addressed by `/{pk}`.
    pub fn by_primary_key(self) -> bool {
        matches!(
            self,
            OperationKind::FindOne | OperationKind::UpdateOne | OperationKind::PatchOne | OperationKind::DeleteOne
        )
    }

    pub fn is_insert(self) -> bool {
        matches!(
            self,
            OperationKind::CreateOne
                | OperationKind::UpsertOne
                | OperationKind::UpsertMany
                | OperationKind::PostRedirectGet
        )
    }

    pub fn is_upsert(self) -> bool {
        matches!(self, OperationKind::UpsertOne | OperationKind::UpsertMany)
    }

    pub fn is_read(self) -> bool {
        matches!(self, OperationKind::FindOne | OperationKind::FindMany)
    }

    /// Collection mutations: 204 with `X-Total-Count: 0` when nothing matched.
    pub fn is_bulk_mutation(self) -> bool {
        matches!(
            self,
            OperationKind::UpdateMany | OperationKind::PatchMany | OperationKind::DeleteMany
        )
    }

    pub fn method(self) -> &'static str {
        match self {
            OperationKind::FindOne | OperationKind::FindMany => "GET",
            OperationKind::CreateOne
            | OperationKind::UpsertOne
            | OperationKind::UpsertMany
            | OperationKind::PostRedirectGet => "POST",
            OperationKind::UpdateOne | OperationKind::UpdateMany => "PUT",
            OperationKind::PatchOne | OperationKind::PatchMany => "PATCH",
            OperationKind::DeleteOne | OperationKind::DeleteMany => "DELETE",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a field carries, and where the decoder routes its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "suffix", rename_all = "snake_case")]
pub enum FieldRole {
    PrimaryKey,
    Column,
    Filter(FilterSuffix),
    OrderBy,
    Limit,
    Offset,
    OnConflict,
    InsertRows,
    ForeignInclude,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Column(ColumnKind),
    /// Free text matched against a pattern operator.
    Pattern,
    ComparisonOperator,
    MatchingPattern,
    /// `column[:ASC|:DESC]`
    OrderBy,
    UnsignedInteger,
    /// `{ "update_columns": [..] }`
    OnConflict,
    /// A list of row objects.
    Rows,
}

#[derive(Clone, Debug, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub role: FieldRole,
    /// Column index into the table descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    pub value_type: ValueType,
    pub required: bool,
    pub repeatable: bool,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRule>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, role: FieldRole, value_type: ValueType) -> Self {
        FieldSpec {
            name: name.into(),
            role,
            column: None,
            value_type,
            required: false,
            repeatable: false,
            nullable: false,
            default: None,
            allowed: Vec::new(),
            max_length: None,
            validation: None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct OperationSchema {
    pub operation: OperationKind,
    pub method: &'static str,
    /// Route relative to the router prefix: `/` or `/{pk}`.
    pub path: String,
    pub path_params: Vec<FieldSpec>,
    pub query: Vec<FieldSpec>,
    pub body: Vec<FieldSpec>,
    /// Row fields of each `insert` item; empty unless the body is a row list.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<FieldSpec>,
    pub response: Vec<FieldSpec>,
    pub response_many: bool,
    #[serde(skip)]
    query_index: HashMap<String, usize>,
}

impl OperationSchema {
    /// `rules` are validation facets keyed by column index.
    pub fn build(op: OperationKind, table: &TableDescriptor, rules: &HashMap<usize, ValidationRule>) -> Self {
        let pk = table.primary_key();
        let path = if op.by_primary_key() {
            format!("/{{{}}}", pk.external_name())
        } else {
            "/".to_string()
        };
        let path_params = if op.by_primary_key() {
            let mut f = FieldSpec::new(
                pk.external_name(),
                FieldRole::PrimaryKey,
                ValueType::Column(pk.kind().clone()),
            );
            f.column = Some(table.primary_key);
            f.required = true;
            vec![f]
        } else {
            Vec::new()
        };

        let mut query = Vec::new();
        if !op.is_insert() {
            for (i, c) in table.columns.iter().enumerate() {
                if op.by_primary_key() && i == table.primary_key {
                    continue;
                }
                query.extend(filter::expand(i, c));
            }
        }
        if op == OperationKind::FindMany {
            let mut order = FieldSpec::new(ORDER_BY_FIELD, FieldRole::OrderBy, ValueType::OrderBy);
            order.repeatable = true;
            order.allowed = table
                .columns
                .iter()
                .flat_map(|c| {
                    [SortDirection::Asc, SortDirection::Desc]
                        .into_iter()
                        .map(move |d| format!("{}:{}", c.external_name(), d.sql()))
                })
                .collect();
            query.push(order);
            query.push(FieldSpec::new(LIMIT_FIELD, FieldRole::Limit, ValueType::UnsignedInteger));
            query.push(FieldSpec::new(OFFSET_FIELD, FieldRole::Offset, ValueType::UnsignedInteger));
        }

        let row = row_fields(op, table, rules);
        let on_conflict = || {
            let mut f = FieldSpec::new(ON_CONFLICT_FIELD, FieldRole::OnConflict, ValueType::OnConflict);
            f.allowed = table
                .columns
                .iter()
                .map(|c| c.external_name().to_string())
                .collect();
            f
        };
        let (body, item) = match op {
            OperationKind::UpsertMany => {
                let mut insert = FieldSpec::new(INSERT_FIELD, FieldRole::InsertRows, ValueType::Rows);
                insert.required = true;
                (vec![insert, on_conflict()], row)
            }
            OperationKind::UpsertOne => {
                let mut body = row;
                body.push(on_conflict());
                (body, Vec::new())
            }
            _ => (row, Vec::new()),
        };

        let mut response: Vec<FieldSpec> = table
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut f = FieldSpec::new(c.external_name(), FieldRole::Column, ValueType::Column(c.kind().clone()));
                f.column = Some(i);
                f.nullable = c.nullable;
                f
            })
            .collect();
        if op.is_read() {
            for include in &table.foreign_includes {
                let mut f = FieldSpec::new(&include.name, FieldRole::ForeignInclude, ValueType::Rows);
                f.repeatable = true;
                response.push(f);
            }
        }

        let query_index = query
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        OperationSchema {
            operation: op,
            method: op.method(),
            path,
            path_params,
            query,
            body,
            item,
            response,
            response_many: !op.by_primary_key() && !matches!(op, OperationKind::CreateOne | OperationKind::UpsertOne),
            query_index,
        }
    }

    pub fn query_field(&self, name: &str) -> Option<&FieldSpec> {
        self.query_index.get(name).map(|&i| &self.query[i])
    }

    /// Fields of one body row: the `insert` items for row lists, else the body itself.
    pub fn row_fields(&self) -> &[FieldSpec] {
        if self.item.is_empty() {
            &self.body
        } else {
            &self.item
        }
    }
}

fn row_fields(op: OperationKind, table: &TableDescriptor, rules: &HashMap<usize, ValidationRule>) -> Vec<FieldSpec> {
    let replacement = matches!(op, OperationKind::UpdateOne | OperationKind::UpdateMany);
    let partial = matches!(op, OperationKind::PatchOne | OperationKind::PatchMany);
    if !(op.is_insert() || replacement || partial) {
        return Vec::new();
    }
    table
        .columns
        .iter()
        .enumerate()
        .filter(|(i, _)| op.is_insert() || *i != table.primary_key)
        .map(|(i, c)| {
            let mut f = FieldSpec::new(c.external_name(), FieldRole::Column, ValueType::Column(c.kind().clone()));
            f.column = Some(i);
            f.nullable = c.nullable;
            f.max_length = c.sql_type.max_length;
            f.validation = rules.get(&i).cloned();
            if !partial {
                f.default = c.default.as_ref().map(|d| d.to_json());
                f.required = if op.is_insert() {
                    c.required_in_create()
                } else {
                    !c.nullable && !c.has_default()
                };
            }
            f
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_helper::sample_table;
    use regex::Regex;

    const ALL: [OperationKind; 12] = [
        OperationKind::FindOne,
        OperationKind::FindMany,
        OperationKind::CreateOne,
        OperationKind::UpsertOne,
        OperationKind::UpsertMany,
        OperationKind::UpdateOne,
        OperationKind::UpdateMany,
        OperationKind::PatchOne,
        OperationKind::PatchMany,
        OperationKind::DeleteOne,
        OperationKind::DeleteMany,
        OperationKind::PostRedirectGet,
    ];

    #[test]
    fn query_fields_follow_the_filter_grammar() {
        let table = sample_table();
        let re = Regex::new(r"^(?P<col>\w+)____(list|from|to|str)(_____comparison_operator|_____matching_pattern)?$")
            .unwrap();
        for op in ALL {
            let schema = OperationSchema::build(op, &table, &HashMap::new());
            for f in &schema.query {
                if matches!(f.role, FieldRole::OrderBy | FieldRole::Limit | FieldRole::Offset) {
                    continue;
                }
                let caps = re.captures(&f.name).unwrap_or_else(|| panic!("{} in {}", f.name, op));
                assert!(table.lookup(&caps["col"]).is_some(), "{}", f.name);
            }
        }
    }

    #[test]
    fn by_pk_operations_do_not_filter_on_the_key() {
        let table = sample_table();
        let schema = OperationSchema::build(OperationKind::DeleteOne, &table, &HashMap::new());
        assert_eq!(schema.path, "/{id}");
        assert!(schema.query_field("id____list").is_none());
        assert!(schema.query_field("int4_value____from").is_some());

        let schema = OperationSchema::build(OperationKind::DeleteMany, &table, &HashMap::new());
        assert!(schema.query_field("id____list").is_some());
    }

    #[test]
    fn create_body_marks_required_columns() {
        let table = sample_table();
        let schema = OperationSchema::build(OperationKind::CreateOne, &table, &HashMap::new());
        let required: Vec<&str> = schema
            .body
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(required, ["float4_value", "int2_value", "int4_value"]);
        assert!(schema.query.is_empty());
        assert!(!schema.response_many);
    }

    #[test]
    fn upsert_many_nests_rows_under_insert() {
        let table = sample_table();
        let schema = OperationSchema::build(OperationKind::UpsertMany, &table, &HashMap::new());
        let names: Vec<&str> = schema.body.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, [INSERT_FIELD, ON_CONFLICT_FIELD]);
        assert_eq!(schema.row_fields().len(), table.columns.len());
        assert!(schema.response_many);
    }

    #[test]
    fn patch_fields_are_all_optional() {
        let table = sample_table();
        let schema = OperationSchema::build(OperationKind::PatchOne, &table, &HashMap::new());
        assert!(schema.body.iter().all(|f| !f.required && f.default.is_none()));
        assert!(schema.body.iter().all(|f| f.name != "id"));
    }

    #[test]
    fn find_many_has_ordering_and_pagination() {
        let table = sample_table();
        let schema = OperationSchema::build(OperationKind::FindMany, &table, &HashMap::new());
        for name in [ORDER_BY_FIELD, LIMIT_FIELD, OFFSET_FIELD] {
            assert!(schema.query_field(name).is_some(), "{}", name);
        }
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["operation"], "FIND_MANY");
        assert_eq!(json["method"], "GET");
    }
}
