//! WHERE-clause trees. `and`/`or` simplify as they combine, so an absent filter never renders.

use crate::config::ColumnDescriptor;
use crate::service::decode::ColumnFilter;
use crate::sql::params::Params;
use crate::types::{ColumnKind, ComparisonOperator, SqlValue};

#[derive(Clone, Debug, PartialEq)]
pub struct Operand {
    pub value: SqlValue,
    pub cast: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    True,
    Compare {
        left: String,
        op: &'static str,
        right: Operand,
    },
    InList {
        left: String,
        negated: bool,
        values: Vec<Operand>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn and(items: impl IntoIterator<Item = Predicate>) -> Predicate {
        let mut out = Vec::new();
        for p in items {
            match p {
                Predicate::True => {}
                Predicate::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::True,
            1 => out.remove(0),
            _ => Predicate::And(out),
        }
    }

    /// `or` over nothing is also `True`: an empty value set is an absent filter.
    pub fn or(items: impl IntoIterator<Item = Predicate>) -> Predicate {
        let mut out = Vec::new();
        for p in items {
            match p {
                Predicate::True => return Predicate::True,
                Predicate::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::True,
            1 => out.remove(0),
            _ => Predicate::Or(out),
        }
    }

    /// SQL text, or `None` for `True`.
    pub fn render(&self, params: &mut Params) -> Option<String> {
        match self {
            Predicate::True => None,
            Predicate::Compare { left, op, right } => {
                let ph = params.bind(right.value.clone(), &right.cast);
                Some(format!("{} {} {}", left, op, ph))
            }
            Predicate::InList { left, negated, values } => {
                let phs: Vec<String> = values
                    .iter()
                    .map(|v| params.bind(v.value.clone(), &v.cast))
                    .collect();
                let kw = if *negated { "NOT IN" } else { "IN" };
                Some(format!("{} {} ({})", left, kw, phs.join(", ")))
            }
            Predicate::And(items) => join(items, " AND ", params),
            Predicate::Or(items) => join(items, " OR ", params),
            Predicate::Not(inner) => inner.render(params).map(|s| format!("NOT ({})", s)),
        }
    }
}

fn join(items: &[Predicate], sep: &str, params: &mut Params) -> Option<String> {
    let parts: Vec<String> = items.iter().filter_map(|p| p.render(params)).collect();
    if parts.is_empty() {
        None
    } else {
        Some(format!("({})", parts.join(sep)))
    }
}

/// The predicate for every clause one column's filter carries, AND-ed.
pub fn column_predicate(expr: &str, column: &ColumnDescriptor, filter: &ColumnFilter) -> Predicate {
    let (left, cast) = comparable(expr, column);
    let operand = |value: &SqlValue| Operand {
        value: value.clone(),
        cast: cast.clone(),
    };
    let compare = |op: &'static str, value: &SqlValue| Predicate::Compare {
        left: left.clone(),
        op,
        right: operand(value),
    };

    let mut clauses = Vec::new();
    if !filter.list.is_empty() {
        let op = filter.list_operator;
        let clause = match column.kind() {
            ColumnKind::Array(_) => match op {
                ComparisonOperator::In => Predicate::or(filter.list.iter().map(|v| compare("&&", v))),
                ComparisonOperator::NotIn => {
                    Predicate::Not(Box::new(Predicate::or(filter.list.iter().map(|v| compare("&&", v)))))
                }
                _ => Predicate::or(filter.list.iter().map(|v| compare(op.sql(), v))),
            },
            _ => match op {
                ComparisonOperator::In | ComparisonOperator::NotIn => Predicate::InList {
                    left: left.clone(),
                    negated: op == ComparisonOperator::NotIn,
                    values: filter.list.iter().map(operand).collect(),
                },
                _ => Predicate::or(filter.list.iter().map(|v| compare(op.sql(), v))),
            },
        };
        clauses.push(clause);
    }
    if let Some(v) = &filter.from {
        clauses.push(compare(filter.from_operator.sql(), v));
    }
    if let Some(v) = &filter.to {
        clauses.push(compare(filter.to_operator.sql(), v));
    }
    if !filter.strings.is_empty() {
        let text = match column.kind() {
            ColumnKind::Char(_) => format!("{}::text", expr),
            _ => expr.to_string(),
        };
        let mut alternatives = Vec::new();
        for pattern in filter.effective_patterns() {
            for s in &filter.strings {
                alternatives.push(Predicate::Compare {
                    left: text.clone(),
                    op: pattern.sql(),
                    right: Operand {
                        value: SqlValue::Text(s.clone()),
                        cast: "text".into(),
                    },
                });
            }
        }
        clauses.push(Predicate::or(alternatives));
    }
    Predicate::and(clauses)
}

/// Left-hand expression and cast used to compare a column. `json` has no equality operator, so
/// both sides compare as `jsonb`.
pub fn comparable(expr: &str, column: &ColumnDescriptor) -> (String, String) {
    match column.kind() {
        ColumnKind::Json => (format!("{}::jsonb", expr), "jsonb".into()),
        _ => (expr.to_string(), column.sql_type.cast.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_helper::column;
    use crate::types::MatchingPattern;
    use pretty_assertions::assert_eq;

    fn filter(column: usize) -> ColumnFilter {
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

    fn render(p: &Predicate) -> (Option<String>, usize) {
        let mut params = Params::new();
        let sql = p.render(&mut params);
        (sql, params.finish(String::new()).params.len())
    }

    #[test]
    fn true_disappears_under_and() {
        let p = Predicate::and([Predicate::True, Predicate::True]);
        assert_eq!(p, Predicate::True);
        assert_eq!(render(&p), (None, 0));
    }

    #[test]
    fn equal_over_many_values_is_an_or() {
        let col = column("int4_value", "int4");
        let mut f = filter(0);
        f.list = vec![SqlValue::Int(1), SqlValue::Int(2)];
        f.list_operator = ComparisonOperator::Equal;
        let (sql, n) = render(&column_predicate("\"int4_value\"", &col, &f));
        assert_eq!(
            sql.unwrap(),
            "(\"int4_value\" = $1::int4 OR \"int4_value\" = $2::int4)"
        );
        assert_eq!(n, 2);
    }

    #[test]
    fn range_and_list_combine_with_and() {
        let col = column("int4_value", "int4");
        let mut f = filter(0);
        f.list = vec![SqlValue::Int(3), SqlValue::Int(4)];
        f.list_operator = ComparisonOperator::NotIn;
        f.from = Some(SqlValue::Int(1));
        f.to = Some(SqlValue::Int(9));
        f.to_operator = ComparisonOperator::LessThan;
        let (sql, _) = render(&column_predicate("\"int4_value\"", &col, &f));
        assert_eq!(
            sql.unwrap(),
            "(\"int4_value\" NOT IN ($1::int4, $2::int4) AND \"int4_value\" >= $3::int4 AND \"int4_value\" < $4::int4)"
        );
    }

    #[test]
    fn patterns_times_values_are_or_ed() {
        let col = column("char_value", "char(10)");
        let mut f = filter(0);
        f.strings = vec!["a%".into(), "b%".into()];
        f.patterns = vec![MatchingPattern::CaseSensitive, MatchingPattern::MatchRegexWithCaseInsensitive];
        let (sql, n) = render(&column_predicate("\"char_value\"", &col, &f));
        assert_eq!(
            sql.unwrap(),
            "(\"char_value\"::text LIKE $1::text OR \"char_value\"::text LIKE $2::text \
             OR \"char_value\"::text ~* $3::text OR \"char_value\"::text ~* $4::text)"
        );
        assert_eq!(n, 4);
    }

    #[test]
    fn array_membership_uses_overlap() {
        let col = column("tags", "text[]");
        let mut f = filter(0);
        f.list = vec![SqlValue::Array(vec![SqlValue::Text("a".into())])];
        let (sql, _) = render(&column_predicate("\"tags\"", &col, &f));
        assert_eq!(sql.unwrap(), "\"tags\" && $1::text[]");
    }
}
