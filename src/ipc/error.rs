use serde_json::json;

use crate::error::GradeError;

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

/// Validation failures carry every violation so the client can mark cells.
pub fn grade_err(id: &str, e: &GradeError) -> serde_json::Value {
    let details = match e {
        GradeError::Validation(violations) => Some(json!({ "violations": violations })),
        GradeError::NotFound(student_id) => Some(json!({ "studentId": student_id })),
        _ => None,
    };
    err(id, e.code(), e.to_string(), details)
}
