use crate::config;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, Workspace};
use crate::persist::{SqliteGradePersistence, SystemClock};
use crate::roster::SqliteRoster;
use crate::store::GradeStore;
use anyhow::Context;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|w| w.path.to_string_lossy().to_string())
        }),
    )
}

fn open_workspace(path: PathBuf) -> anyhow::Result<Workspace> {
    let conn = db::open_db(&path)?;
    let cfg = config::load(&conn).context("failed to read workspace config")?;
    let db = Arc::new(Mutex::new(conn));

    let roster = Arc::new(SqliteRoster::new(db.clone()));
    let persistence = Arc::new(SqliteGradePersistence::new(
        db.clone(),
        Arc::new(SystemClock),
        Duration::from_millis(cfg.sync_poll_ms),
    ));
    let grades = GradeStore::new(roster.clone(), persistence.clone(), cfg);
    Ok(Workspace {
        path,
        db,
        roster,
        persistence,
        grades,
    })
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    // The old session and its subscription go away before the new file opens.
    state.workspace = None;
    match open_workspace(path.clone()) {
        Ok(ws) => {
            info!(path = %path.to_string_lossy(), "workspace opened");
            state.workspace = Some(ws);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
