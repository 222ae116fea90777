use crate::config;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::workspace;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    ok(&req.id, json!({ "config": ws.grades.config() }))
}

fn handle_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch") else {
        return err(&req.id, "bad_params", "missing params.patch", None);
    };

    let next = match config::apply_patch(ws.grades.config(), patch) {
        Ok(cfg) => cfg,
        Err(e) => return err(&req.id, "bad_params", format!("{e:#}"), None),
    };
    {
        let conn = match ws.db.lock() {
            Ok(c) => c,
            Err(_) => return err(&req.id, "db_update_failed", "connection lock poisoned", None),
        };
        if let Err(e) = config::store(&conn, &next) {
            return err(&req.id, "db_update_failed", format!("{e:#}"), None);
        }
    }
    info!("gradebook config updated");
    ws.grades.set_config(next);
    ok(&req.id, json!({ "config": ws.grades.config() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "config.get" => Some(handle_config_get(state, req)),
        "config.update" => Some(handle_config_update(state, req)),
        _ => None,
    }
}
