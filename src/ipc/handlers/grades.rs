use crate::config::GradebookConfig;
use crate::ipc::error::{err, grade_err, ok};
use crate::ipc::handlers::{required_str, str_param, workspace};
use crate::ipc::types::{AppState, Request, Workspace};
use crate::model::{ExamType, GradeFilter};
use crate::persist::GradePersistence;
use serde_json::json;

/// Class, exam and year from params; exam and year fall back to the
/// workspace defaults when absent.
pub(crate) fn filter_params(
    req: &Request,
    cfg: &GradebookConfig,
) -> Result<GradeFilter, serde_json::Value> {
    let class_name = required_str(req, "className")?;
    if class_name.trim().is_empty() {
        return Err(err(&req.id, "bad_params", "className must not be blank", None));
    }
    let exam_type = match str_param(req, "examType") {
        Some(raw) => raw
            .parse::<ExamType>()
            .map_err(|e| err(&req.id, "bad_params", e, None))?,
        None => cfg.default_exam_type,
    };
    let academic_year = str_param(req, "academicYear").unwrap_or(cfg.default_academic_year.as_str());
    Ok(GradeFilter::new(class_name, exam_type, academic_year))
}

fn view(ws: &Workspace) -> serde_json::Value {
    json!({ "view": ws.grades.view() })
}

async fn handle_select(ws: &mut Workspace, req: &Request) -> serde_json::Value {
    let filter = match filter_params(req, ws.grades.config()) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let exam_date = str_param(req, "examDate");
    match ws
        .grades
        .select_filters(&filter.class_name, filter.exam_type, &filter.academic_year, exam_date)
        .await
    {
        Ok(()) => ok(&req.id, view(ws)),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_edit_mark(ws: &mut Workspace, req: &Request) -> serde_json::Value {
    let (student_id, subject) = match (required_str(req, "studentId"), required_str(req, "subject")) {
        (Ok(s), Ok(subj)) => (s, subj),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let Some(raw) = req.params.get("value") else {
        return err(&req.id, "bad_params", "missing params.value", None);
    };
    let raw = match raw {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return err(&req.id, "bad_params", "params.value must be a string", None),
    };
    match ws.grades.edit_mark(student_id, subject, &raw) {
        Ok(value) => ok(
            &req.id,
            json!({
                "value": value,
                "hasUnsavedChanges": ws.grades.has_unsaved_changes(),
            }),
        ),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_add_subject(ws: &mut Workspace, req: &Request) -> serde_json::Value {
    let name = match required_str(req, "name") {
        Ok(n) => n,
        Err(resp) => return resp,
    };
    match ws.grades.add_subject(name) {
        Ok(added) => ok(
            &req.id,
            json!({ "added": added, "subjects": ws.grades.subjects() }),
        ),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_effective_mark(ws: &mut Workspace, req: &Request) -> serde_json::Value {
    let (student_id, subject) = match (required_str(req, "studentId"), required_str(req, "subject")) {
        (Ok(s), Ok(subj)) => (s, subj),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    ok(
        &req.id,
        json!({ "value": ws.grades.effective_mark(student_id, subject) }),
    )
}

fn handle_set_exam_date(ws: &mut Workspace, req: &Request) -> serde_json::Value {
    let exam_date = match required_str(req, "examDate") {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    ws.grades.set_exam_date(exam_date);
    ok(&req.id, json!({ "examDate": ws.grades.exam_date() }))
}

fn handle_validate(ws: &mut Workspace, req: &Request) -> serde_json::Value {
    match ws.grades.validate() {
        Ok(report) => ok(
            &req.id,
            json!({ "valid": report.is_valid(), "violations": report.violations }),
        ),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_pending_overwrites(ws: &mut Workspace, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({ "overwrites": ws.grades.pending_overwrites() }),
    )
}

async fn handle_save(ws: &mut Workspace, req: &Request) -> serde_json::Value {
    let saved_by = match required_str(req, "savedBy") {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match ws.grades.save(saved_by).await {
        Ok(saved) => ok(
            &req.id,
            json!({ "saved": saved, "view": ws.grades.view() }),
        ),
        Err(e) => grade_err(&req.id, &e),
    }
}

async fn handle_delete(ws: &mut Workspace, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match ws.grades.delete_grade(student_id).await {
        Ok(()) => ok(
            &req.id,
            json!({ "deleted": true, "view": ws.grades.view() }),
        ),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_discard(ws: &mut Workspace, req: &Request) -> serde_json::Value {
    ws.grades.discard();
    ok(&req.id, view(ws))
}

async fn handle_refresh(ws: &mut Workspace, req: &Request) -> serde_json::Value {
    match ws.grades.refresh().await {
        Ok(()) => ok(&req.id, view(ws)),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_close(ws: &mut Workspace, req: &Request) -> serde_json::Value {
    ws.grades.close();
    ok(&req.id, json!({}))
}

async fn handle_list(ws: &mut Workspace, req: &Request) -> serde_json::Value {
    let filter = match filter_params(req, ws.grades.config()) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    match ws.persistence.list_grades(&filter).await {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => err(&req.id, "persistence_failed", e.to_string(), None),
    }
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("grades.") {
        return None;
    }
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return Some(resp),
    };
    // Pushes that arrived before this request are applied first.
    ws.grades.pump_sync_events();

    let resp = match req.method.as_str() {
        "grades.select" => handle_select(ws, req).await,
        "grades.view" => ok(&req.id, view(ws)),
        "grades.editMark" => handle_edit_mark(ws, req),
        "grades.addSubject" => handle_add_subject(ws, req),
        "grades.effectiveMark" => handle_effective_mark(ws, req),
        "grades.setExamDate" => handle_set_exam_date(ws, req),
        "grades.validate" => handle_validate(ws, req),
        "grades.pendingOverwrites" => handle_pending_overwrites(ws, req),
        "grades.save" => handle_save(ws, req).await,
        "grades.delete" => handle_delete(ws, req).await,
        "grades.discard" => handle_discard(ws, req),
        "grades.refresh" => handle_refresh(ws, req).await,
        "grades.close" => handle_close(ws, req),
        "grades.list" => handle_list(ws, req).await,
        _ => return None,
    };
    Some(resp)
}
