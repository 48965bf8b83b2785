//! Filter-field naming: `{column}____{suffix}` and the fields each operator family expands to.

use crate::config::ColumnDescriptor;
use crate::schema::{FieldRole, FieldSpec, ValueType};
use crate::types::{ComparisonOperator, MatchingPattern, OperatorFamily};
use serde::Serialize;
use serde_json::{json, Value};

pub const SEPARATOR: &str = "____";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterSuffix {
    List,
    ListOperator,
    From,
    FromOperator,
    To,
    ToOperator,
    Str,
    StrPattern,
}

impl FilterSuffix {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterSuffix::List => "list",
            FilterSuffix::ListOperator => "list_____comparison_operator",
            FilterSuffix::From => "from",
            FilterSuffix::FromOperator => "from_____comparison_operator",
            FilterSuffix::To => "to",
            FilterSuffix::ToOperator => "to_____comparison_operator",
            FilterSuffix::Str => "str",
            FilterSuffix::StrPattern => "str_____matching_pattern",
        }
    }

    pub fn parse(s: &str) -> Option<FilterSuffix> {
        [
            FilterSuffix::List,
            FilterSuffix::ListOperator,
            FilterSuffix::From,
            FilterSuffix::FromOperator,
            FilterSuffix::To,
            FilterSuffix::ToOperator,
            FilterSuffix::Str,
            FilterSuffix::StrPattern,
        ]
        .into_iter()
        .find(|f| f.as_str() == s)
    }

}

pub fn field_name(column: &str, suffix: FilterSuffix) -> String {
    format!("{}{}{}", column, SEPARATOR, suffix.as_str())
}

/// Split a query key at the first separator: `("int4_value", "from")`.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.find(SEPARATOR)
        .map(|i| (&key[..i], &key[i + SEPARATOR.len()..]))
}

/// All query fields a column contributes, in family order.
pub fn expand(index: usize, column: &ColumnDescriptor) -> Vec<FieldSpec> {
    let name = column.external_name();
    let kind = column.kind();
    let mut fields = Vec::new();
    for family in kind.families() {
        match family {
            OperatorFamily::Equality => {
                fields.push(value_field(index, name, FilterSuffix::List, ValueType::Column(kind.clone()), true));
                fields.push(operator_field(
                    index,
                    name,
                    FilterSuffix::ListOperator,
                    &ComparisonOperator::EQUALITY,
                    ComparisonOperator::In,
                ));
            }
            OperatorFamily::Range => {
                fields.push(value_field(index, name, FilterSuffix::From, ValueType::Column(kind.clone()), false));
                fields.push(operator_field(
                    index,
                    name,
                    FilterSuffix::FromOperator,
                    &ComparisonOperator::LOWER_BOUND,
                    ComparisonOperator::GreaterThanOrEqualTo,
                ));
                fields.push(value_field(index, name, FilterSuffix::To, ValueType::Column(kind.clone()), false));
                fields.push(operator_field(
                    index,
                    name,
                    FilterSuffix::ToOperator,
                    &ComparisonOperator::UPPER_BOUND,
                    ComparisonOperator::LessThanOrEqualTo,
                ));
            }
            OperatorFamily::StringMatching => {
                fields.push(value_field(index, name, FilterSuffix::Str, ValueType::Pattern, true));
                let mut pattern = FieldSpec::new(
                    field_name(name, FilterSuffix::StrPattern),
                    FieldRole::Filter(FilterSuffix::StrPattern),
                    ValueType::MatchingPattern,
                );
                pattern.column = Some(index);
                pattern.repeatable = true;
                pattern.default = Some(json!([MatchingPattern::CaseSensitive.as_str()]));
                pattern.allowed = MatchingPattern::ALL.iter().map(|p| p.as_str().to_string()).collect();
                fields.push(pattern);
            }
        }
    }
    fields
}

fn value_field(index: usize, column: &str, suffix: FilterSuffix, value_type: ValueType, repeatable: bool) -> FieldSpec {
    let mut f = FieldSpec::new(field_name(column, suffix), FieldRole::Filter(suffix), value_type);
    f.column = Some(index);
    f.repeatable = repeatable;
    f
}

fn operator_field(
    index: usize,
    column: &str,
    suffix: FilterSuffix,
    allowed: &[ComparisonOperator],
    default: ComparisonOperator,
) -> FieldSpec {
    let mut f = FieldSpec::new(
        field_name(column, suffix),
        FieldRole::Filter(suffix),
        ValueType::ComparisonOperator,
    );
    f.column = Some(index);
    f.default = Some(Value::String(default.as_str().to_string()));
    f.allowed = allowed.iter().map(|op| op.as_str().to_string()).collect();
    f
}
