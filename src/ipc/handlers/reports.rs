use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::grades::filter_params;
use crate::ipc::handlers::workspace;
use crate::ipc::types::{AppState, Request};
use crate::persist::GradePersistence;
use serde_json::json;

async fn handle_class_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let filter = match filter_params(req, ws.grades.config()) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let records = match ws.persistence.list_grades(&filter).await {
        Ok(r) => r,
        Err(e) => return err(&req.id, "persistence_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "filter": filter,
            "summary": calc::class_summary(&records),
        }),
    )
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.classSummary" => Some(handle_class_summary(state, req).await),
        _ => None,
    }
}
