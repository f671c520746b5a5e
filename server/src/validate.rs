use regex::Regex;
use thiserror::Error;

use crate::fields::{FieldKind, FieldSpec, Rule};
use crate::types::FormValue;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{label}: {reason}")]
pub struct Rejection {
    pub field: &'static str,
    pub label: &'static str,
    pub reason: String,
}

fn reject(field: &FieldSpec, reason: impl Into<String>) -> Rejection {
    Rejection {
        field: field.name,
        label: field.label,
        reason: reason.into(),
    }
}

fn matches_shape(pattern: &str, value: &str) -> bool {
    Regex::new(pattern)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Checks `raw` against the field's rules in declaration order; the first
/// failing rule decides the reason.
pub fn validate(field: &FieldSpec, raw: &str) -> Result<FormValue, Rejection> {
    let value = raw.trim();

    for rule in field.rules {
        match rule {
            Rule::Required => {
                if value.is_empty() {
                    return Err(reject(field, "this field is required"));
                }
            }
            Rule::MaxLength(max) => {
                if value.chars().count() > *max {
                    return Err(reject(
                        field,
                        format!("must be at most {max} characters"),
                    ));
                }
            }
            Rule::Min(min) => match value.parse::<f64>() {
                Ok(n) if n < *min => {
                    return Err(reject(field, format!("must be at least {}", FormValue::Number(*min))))
                }
                Ok(_) => {}
                Err(_) => return Err(reject(field, "must be a number")),
            },
            Rule::Max(max) => match value.parse::<f64>() {
                Ok(n) if n > *max => {
                    return Err(reject(field, format!("must be at most {}", FormValue::Number(*max))))
                }
                Ok(_) => {}
                Err(_) => return Err(reject(field, "must be a number")),
            },
            Rule::OneOf(options) => {
                if !value.is_empty()
                    && !options.iter().any(|option| option.eq_ignore_ascii_case(value))
                {
                    return Err(reject(
                        field,
                        format!("must be one of: {}", options.join(", ")),
                    ));
                }
            }
            Rule::DateShape => {
                if !value.is_empty() && !matches_shape(r"^\d{2}/\d{2}/\d{4}$", value) {
                    return Err(reject(field, "use the format DD/MM/YYYY"));
                }
            }
            Rule::TimeShape => {
                if !value.is_empty() && !matches_shape(r"^\d{2}:\d{2}$", value) {
                    return Err(reject(field, "use the format HH:MM"));
                }
            }
        }
    }

    match field.kind {
        FieldKind::Number => match value.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(FormValue::Number(n)),
            _ if value.is_empty() => Ok(FormValue::Text(String::new())),
            _ => Err(reject(field, "must be a number")),
        },
        FieldKind::Choice => Ok(FormValue::Text(value.to_ascii_lowercase())),
        FieldKind::Text | FieldKind::Date | FieldKind::Time => {
            Ok(FormValue::Text(value.to_string()))
        }
    }
}
