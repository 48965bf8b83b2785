//! Comparison operators and string-matching patterns a client may select.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorFamily {
    Equality,
    Range,
    StringMatching,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    In,
    NotIn,
    GreaterThan,
    GreaterThanOrEqualTo,
    LessThan,
    LessThanOrEqualTo,
}

impl ComparisonOperator {
    pub const EQUALITY: [ComparisonOperator; 4] = [
        ComparisonOperator::Equal,
        ComparisonOperator::NotEqual,
        ComparisonOperator::In,
        ComparisonOperator::NotIn,
    ];
    /// Operators accepted by a `____from` bound.
    pub const LOWER_BOUND: [ComparisonOperator; 2] =
        [ComparisonOperator::GreaterThan, ComparisonOperator::GreaterThanOrEqualTo];
    /// Operators accepted by a `____to` bound.
    pub const UPPER_BOUND: [ComparisonOperator; 2] =
        [ComparisonOperator::LessThan, ComparisonOperator::LessThanOrEqualTo];

    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOperator::Equal => "Equal",
            ComparisonOperator::NotEqual => "Not_equal",
            ComparisonOperator::In => "In",
            ComparisonOperator::NotIn => "Not_in",
            ComparisonOperator::GreaterThan => "Greater_than",
            ComparisonOperator::GreaterThanOrEqualTo => "Greater_than_or_equal_to",
            ComparisonOperator::LessThan => "Less_than",
            ComparisonOperator::LessThanOrEqualTo => "Less_than_or_equal_to",
        }
    }

    /// SQL infix for single-value comparisons.
    pub fn sql(self) -> &'static str {
        match self {
            ComparisonOperator::Equal | ComparisonOperator::In => "=",
            ComparisonOperator::NotEqual | ComparisonOperator::NotIn => "<>",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterThanOrEqualTo => ">=",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessThanOrEqualTo => "<=",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = Self::EQUALITY
            .iter()
            .chain(Self::LOWER_BOUND.iter())
            .chain(Self::UPPER_BOUND.iter());
        for op in all {
            if op.as_str() == s {
                return Ok(*op);
            }
        }
        Err(format!("unknown comparison operator '{}'", s))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchingPattern {
    CaseSensitive,
    CaseInsensitive,
    NotCaseSensitive,
    NotCaseInsensitive,
    MatchRegexWithCaseSensitive,
    MatchRegexWithCaseInsensitive,
    DoesNotMatchRegexWithCaseSensitive,
    DoesNotMatchRegexWithCaseInsensitive,
    SimilarTo,
    NotSimilarTo,
}

impl MatchingPattern {
    pub const ALL: [MatchingPattern; 10] = [
        MatchingPattern::CaseSensitive,
        MatchingPattern::CaseInsensitive,
        MatchingPattern::NotCaseSensitive,
        MatchingPattern::NotCaseInsensitive,
        MatchingPattern::MatchRegexWithCaseSensitive,
        MatchingPattern::MatchRegexWithCaseInsensitive,
        MatchingPattern::DoesNotMatchRegexWithCaseSensitive,
        MatchingPattern::DoesNotMatchRegexWithCaseInsensitive,
        MatchingPattern::SimilarTo,
        MatchingPattern::NotSimilarTo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MatchingPattern::CaseSensitive => "case_sensitive",
            MatchingPattern::CaseInsensitive => "case_insensitive",
            MatchingPattern::NotCaseSensitive => "not_case_sensitive",
            MatchingPattern::NotCaseInsensitive => "not_case_insensitive",
            MatchingPattern::MatchRegexWithCaseSensitive => "match_regex_with_case_sensitive",
            MatchingPattern::MatchRegexWithCaseInsensitive => "match_regex_with_case_insensitive",
            MatchingPattern::DoesNotMatchRegexWithCaseSensitive => "does_not_match_regex_with_case_sensitive",
            MatchingPattern::DoesNotMatchRegexWithCaseInsensitive => "does_not_match_regex_with_case_insensitive",
            MatchingPattern::SimilarTo => "similar_to",
            MatchingPattern::NotSimilarTo => "not_similar_to",
        }
    }

    /// PostgreSQL operator implementing the pattern.
    pub fn sql(self) -> &'static str {
        match self {
            MatchingPattern::CaseSensitive => "LIKE",
            MatchingPattern::CaseInsensitive => "ILIKE",
            MatchingPattern::NotCaseSensitive => "NOT LIKE",
            MatchingPattern::NotCaseInsensitive => "NOT ILIKE",
            MatchingPattern::MatchRegexWithCaseSensitive => "~",
            MatchingPattern::MatchRegexWithCaseInsensitive => "~*",
            MatchingPattern::DoesNotMatchRegexWithCaseSensitive => "!~",
            MatchingPattern::DoesNotMatchRegexWithCaseInsensitive => "!~*",
            MatchingPattern::SimilarTo => "SIMILAR TO",
            MatchingPattern::NotSimilarTo => "NOT SIMILAR TO",
        }
    }
}

impl fmt::Display for MatchingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchingPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown matching pattern '{}'", s))
    }
}

/// Direction of one `order_by_columns` item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Ok(SortDirection::Asc),
            "DESC" => Ok(SortDirection::Desc),
            _ => Err(s.to_string()),
        }
    }
}
