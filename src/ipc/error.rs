use crate::error::Error;
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

/// Library errors keep their own stable code.
pub fn fail(id: &str, e: &Error) -> serde_json::Value {
    err(id, e.code(), e.to_string(), None)
}

/// Wire form of an optional error, for status payloads.
pub fn describe(e: Option<&Error>) -> serde_json::Value {
    match e {
        Some(e) => json!({ "code": e.code(), "message": e.to_string() }),
        None => serde_json::Value::Null,
    }
}
