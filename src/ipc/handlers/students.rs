use crate::ipc::error::{err, ok};
use crate::ipc::handlers::{required_str, str_param, workspace};
use crate::ipc::types::{AppState, Request};
use crate::roster::{normalize_class_name, ClassRosterProvider};
use serde_json::json;

type StudentFields<'a> = (&'a str, &'a str, &'a str, &'a str);

fn student_fields(req: &Request) -> Result<StudentFields<'_>, serde_json::Value> {
    Ok((
        required_str(req, "firstName")?,
        required_str(req, "lastName")?,
        required_str(req, "rollNumber")?,
        required_str(req, "className")?,
    ))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let (first, last, roll, class) = match student_fields(req) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    if first.trim().is_empty() || class.trim().is_empty() {
        return err(&req.id, "bad_params", "firstName and className must not be blank", None);
    }

    match ws.roster.create_student(first, last, roll, class) {
        Ok(student) => ok(&req.id, json!({ "student": student })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

async fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let listed = match str_param(req, "className") {
        Some(class) => ws.roster.list_students(&normalize_class_name(class)).await,
        None => ws.roster.list_all(),
    };
    match listed {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "roster_failed", e.to_string(), None),
    }
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req).await),
        _ => None,
    }
}
