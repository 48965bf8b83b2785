//! Value facets on body fields: declared length plus the router's per-column rules.

use crate::config::ValidationRule;
use crate::error::AppError;
use crate::schema::FieldSpec;
use regex::Regex;
use serde_json::Value;

pub struct FieldValidator;

impl FieldValidator {
    /// Check one body value against the field's facets. Nulls pass; nullability is checked by the
    /// decoder.
    pub fn check(field: &FieldSpec, v: &Value) -> Result<(), AppError> {
        if v.is_null() {
            return Ok(());
        }
        if let (Some(max), Some(s)) = (field.max_length, v.as_str()) {
            if s.chars().count() > max as usize {
                return Err(violation(&field.name, format!("must be at most {} characters", max)));
            }
        }
        match &field.validation {
            Some(rule) => check_rule(&field.name, v, rule),
            None => Ok(()),
        }
    }
}

fn violation(name: &str, message: String) -> AppError {
    AppError::SchemaViolation(format!("{} {}", name, message))
}

fn check_rule(name: &str, v: &Value, rule: &ValidationRule) -> Result<(), AppError> {
    if let Some(format) = &rule.format {
        check_format(name, v, format)?;
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length {
            if len > max as usize {
                return Err(violation(name, format!("must be at most {} characters", max)));
            }
        }
        if let Some(min) = rule.min_length {
            if len < min as usize {
                return Err(violation(name, format!("must be at least {} characters", min)));
            }
        }
        if let Some(pattern) = &rule.pattern {
            let re = Regex::new(pattern).map_err(|e| AppError::Internal(format!("pattern for {}: {}", name, e)))?;
            if !re.is_match(s) {
                return Err(violation(name, format!("does not match {}", pattern)));
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(violation(
                name,
                format!("must be one of: {:?}", allowed.iter().take(5).collect::<Vec<_>>()),
            ));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                return Err(violation(name, format!("must be at least {}", min)));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                return Err(violation(name, format!("must be at most {}", max)));
            }
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn check_format(name: &str, v: &Value, format: &str) -> Result<(), AppError> {
    let Some(s) = v.as_str() else {
        return Ok(());
    };
    let ok = match format.to_lowercase().as_str() {
        "email" => s.len() >= 3 && s.split_once('@').is_some_and(|(user, host)| !user.is_empty() && !host.is_empty()),
        "uuid" => uuid::Uuid::parse_str(s).is_ok(),
        "date" => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        "date-time" => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(violation(name, format!("must be a valid {}", format)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldRole, ValueType};
    use crate::types::ColumnKind;
    use serde_json::json;

    fn field(rule: ValidationRule) -> FieldSpec {
        let mut f = FieldSpec::new("title", FieldRole::Column, ValueType::Column(ColumnKind::Text));
        f.validation = Some(rule);
        f
    }

    #[test]
    fn declared_length_applies_without_rules() {
        let mut f = FieldSpec::new("code", FieldRole::Column, ValueType::Column(ColumnKind::Text));
        f.max_length = Some(3);
        assert!(FieldValidator::check(&f, &json!("abc")).is_ok());
        assert!(matches!(
            FieldValidator::check(&f, &json!("abcd")),
            Err(AppError::SchemaViolation(_))
        ));
    }

    #[test]
    fn rule_facets() {
        let f = field(ValidationRule {
            pattern: Some("^[a-z]+$".into()),
            min_length: Some(2),
            ..Default::default()
        });
        assert!(FieldValidator::check(&f, &json!("ok")).is_ok());
        assert!(FieldValidator::check(&f, &json!("a")).is_err());
        assert!(FieldValidator::check(&f, &json!("NO")).is_err());
        assert!(FieldValidator::check(&f, &Value::Null).is_ok());

        let f = field(ValidationRule {
            allowed: Some(vec![json!(1), json!(2)]),
            maximum: Some(2.0),
            ..Default::default()
        });
        assert!(FieldValidator::check(&f, &json!(2.0)).is_ok());
        assert!(FieldValidator::check(&f, &json!(3)).is_err());

        let f = field(ValidationRule {
            format: Some("email".into()),
            ..Default::default()
        });
        assert!(FieldValidator::check(&f, &json!("a@b")).is_ok());
        assert!(FieldValidator::check(&f, &json!("@b")).is_err());
    }
}
