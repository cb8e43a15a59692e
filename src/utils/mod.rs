use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{AuditError, Result};

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Time-ordered receipt id: `REC-<unix millis>-<6 random chars>`.
pub fn new_receipt_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("REC-{}-{}", Utc::now().timestamp_millis(), &suffix[..6])
}

pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn format_decimal(value: f64) -> String {
    format!("{:.2}", value)
}

/// Parses receipt-style amounts: `"1180"`, `"1,180.00"`, `"₹ 1,18,000"`, `"12,5"`.
pub fn parse_decimal(value: &str) -> Result<f64> {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();

    let has_dot = cleaned.contains('.');
    let commas = cleaned.matches(',').count();
    let normalized = if has_dot || commas > 1 {
        cleaned.replace(',', "")
    } else if commas == 1 {
        let decimals = cleaned.rsplit(',').next().map(str::len).unwrap_or(0);
        if decimals <= 2 {
            cleaned.replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else {
        cleaned
    };

    normalized
        .parse::<f64>()
        .map_err(|e| AuditError::InvalidInput(format!("Parse decimal {:?}: {}", value, e)))
}

/// Any NaN or infinity becomes 0.
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub fn coerce_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().map(finite_or_zero).unwrap_or(0.0),
        Value::String(s) => parse_decimal(s).map(finite_or_zero).unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Serde adapter: absent, null, non-numeric and non-finite values all become 0.
pub fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(coerce_f64).unwrap_or(0.0))
}

/// Like [`lenient_f64`] but keeps absence (and null) distinguishable.
pub fn lenient_opt_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(v) => Some(coerce_f64(&v)),
    })
}

pub fn lenient_opt_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "valid" => Some(true),
            "false" | "no" | "invalid" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// Strings stay strings, numbers are stringified, blanks become `None`.
pub fn lenient_opt_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let raw = match value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => return Ok(None),
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

pub fn normalize_date(value: Option<String>) -> Option<String> {
    let raw = value?.trim().to_string();
    if raw.is_empty() {
        return None;
    }

    let formats = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in formats.iter() {
        if let Ok(date) = NaiveDate::parse_from_str(&raw, fmt) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    Some(raw)
}
