use crate::error::RetiroError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn domain_err(id: &str, e: &RetiroError) -> serde_json::Value {
    let details = match e {
        RetiroError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
        RetiroError::AlreadyDelivered { request_id } => Some(json!({ "requestId": request_id })),
        RetiroError::InvalidInput(_) | RetiroError::Sql(_) => None,
    };
    err(id, e.code(), e.to_string(), details)
}

/// Turns a handler result into the response envelope.
pub fn respond(id: &str, result: Result<serde_json::Value, RetiroError>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => {
            if let RetiroError::Sql(inner) = &e {
                tracing::error!(request_id = id, error = %inner, "storage failure");
            }
            domain_err(id, &e)
        }
    }
}
