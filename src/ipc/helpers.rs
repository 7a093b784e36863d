use crate::error::RetiroError;
use serde_json::{json, Value};

fn as_id(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn get_required_id(params: &Value, key: &str) -> Result<i64, RetiroError> {
    params
        .get(key)
        .and_then(as_id)
        .ok_or_else(|| RetiroError::InvalidInput(format!("missing {}", key)))
}

pub fn get_optional_id(params: &Value, key: &str) -> Result<Option<i64>, RetiroError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => as_id(v)
            .map(Some)
            .ok_or_else(|| RetiroError::InvalidInput(format!("{} must be an id", key))),
    }
}

pub fn get_required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, RetiroError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RetiroError::InvalidInput(format!("missing {}", key)))
}

pub fn get_optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn get_optional_bool(params: &Value, key: &str) -> Result<Option<bool>, RetiroError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(RetiroError::InvalidInput(format!("{} must be a boolean", key))),
    }
}

pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, RetiroError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| RetiroError::InvalidInput(format!("{} must be an integer", key))),
    }
}

/// Ids from an array param, keeping order and repeats.
pub fn get_id_list(params: &Value, key: &str) -> Result<Vec<i64>, RetiroError> {
    let Some(raw) = params.get(key) else {
        return Ok(Vec::new());
    };
    let Some(items) = raw.as_array() else {
        return Err(RetiroError::InvalidInput(format!("{} must be an array", key)));
    };
    items
        .iter()
        .map(|v| {
            as_id(v).ok_or_else(|| RetiroError::InvalidInput(format!("{} contains a non-id", key)))
        })
        .collect()
}

/// User-facing notice carried back to the caller.
pub fn message(level: &str, text: impl Into<String>) -> Value {
    json!({ "level": level, "text": text.into() })
}
