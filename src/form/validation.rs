//! Per-field value cleaning: type coercion by column kind and configured rule checks.

use crate::config::{ColumnInfo, ColumnKind, ValidationRule};
use regex::Regex;
use serde_json::Value;

pub const REQUIRED_MESSAGE: &str = "This field is required.";
pub const LIST_REQUIRED_MESSAGE: &str = "Enter a list of values.";

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

/// Empty submission: null or the empty string.
pub fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Coerce a submitted value to the JSON shape of the column kind.
pub fn coerce(kind: ColumnKind, v: &Value) -> Result<Value, String> {
    match kind {
        ColumnKind::Integer => integer(v).map(|n| Value::Number(n.into())),
        ColumnKind::Float => {
            let f = float(v).ok_or_else(|| "Enter a number.".to_string())?;
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| "Enter a number.".to_string())
        }
        ColumnKind::Numeric => match v {
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::String(s) if s.trim().parse::<f64>().is_ok() => Ok(Value::String(s.trim().to_string())),
            _ => Err("Enter a number.".into()),
        },
        ColumnKind::Boolean => boolean(v)
            .map(Value::Bool)
            .ok_or_else(|| format!("'{}' value must be either True or False.", text(v))),
        ColumnKind::Uuid => v
            .as_str()
            .and_then(|s| uuid::Uuid::parse_str(s.trim()).ok())
            .map(|u| Value::String(u.to_string()))
            .ok_or_else(|| "Enter a valid UUID.".to_string()),
        ColumnKind::Date => v
            .as_str()
            .filter(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| "Enter a valid date.".to_string()),
        ColumnKind::Timestamp => v
            .as_str()
            .filter(|s| is_datetime(s))
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| "Enter a valid date/time.".to_string()),
        ColumnKind::Json => Ok(v.clone()),
        ColumnKind::Text => match v {
            Value::String(_) => Ok(v.clone()),
            Value::Number(_) | Value::Bool(_) => Ok(Value::String(v.to_string())),
            _ => Err("Enter a valid value.".into()),
        },
    }
}

fn integer(v: &Value) -> Result<i64, String> {
    let invalid = || "Enter a whole number.".to_string();
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(invalid),
        Value::String(s) => s.trim().parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn float(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn boolean(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Some(true),
            "false" | "0" | "off" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn is_datetime(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || chrono::NaiveTime::parse_from_str(s, "%H:%M:%S%.f").is_ok()
        || chrono::NaiveTime::parse_from_str(s, "%H:%M").is_ok()
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Column constraints and configured rules on a cleaned value. First failure wins.
pub fn check(column: &ColumnInfo, rule: Option<&ValidationRule>, v: &Value) -> Result<(), String> {
    if v.is_null() {
        return Ok(());
    }
    if let (Some(max), Some(s)) = (column.max_length, v.as_str()) {
        max_length(s, max)?;
    }
    let Some(rule) = rule else {
        return Ok(());
    };
    if let Some(format) = &rule.format {
        check_format(v, format)?;
    }
    if let (Some(max), Some(s)) = (rule.max_length, v.as_str()) {
        max_length(s, max)?;
    }
    if let (Some(min), Some(s)) = (rule.min_length, v.as_str()) {
        let len = s.chars().count();
        if len < min as usize {
            return Err(format!(
                "Ensure this value has at least {} characters (it has {}).",
                min, len
            ));
        }
    }
    if let (Some(pattern), Some(s)) = (&rule.pattern, v.as_str()) {
        if let Ok(re) = Regex::new(pattern) {
            if !re.is_match(s) {
                return Err("Enter a valid value.".into());
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(format!(
                "Select a valid choice. {} is not one of the available choices.",
                text(v)
            ));
        }
    }
    if let (Some(min), Some(n)) = (rule.minimum, float(v)) {
        if n < min {
            return Err(format!("Ensure this value is greater than or equal to {}.", min));
        }
    }
    if let (Some(max), Some(n)) = (rule.maximum, float(v)) {
        if n > max {
            return Err(format!("Ensure this value is less than or equal to {}.", max));
        }
    }
    Ok(())
}

fn max_length(s: &str, max: u32) -> Result<(), String> {
    let len = s.chars().count();
    if len > max as usize {
        return Err(format!(
            "Ensure this value has at most {} characters (it has {}).",
            max, len
        ));
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        (Value::String(s), other) | (other, Value::String(s)) if !other.is_string() => *s == other.to_string(),
        _ => a == b,
    }
}

fn check_format(v: &Value, format: &str) -> Result<(), String> {
    let Some(s) = v.as_str() else {
        return Ok(());
    };
    match format.to_lowercase().as_str() {
        "email" => {
            let valid = Regex::new(EMAIL_PATTERN).map(|re| re.is_match(s)).unwrap_or(false);
            if !valid {
                return Err("Enter a valid email address.".into());
            }
        }
        "uuid" => {
            if uuid::Uuid::parse_str(s).is_err() {
                return Err("Enter a valid UUID.".into());
            }
        }
        _ => {}
    }
    Ok(())
}
