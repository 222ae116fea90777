use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::db::SharedConn;
use crate::persist::{SqliteGradePersistence, SyncEvent};
use crate::roster::SqliteRoster;
use crate::store::GradeStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Everything bound to one open workspace directory.
pub struct Workspace {
    pub path: PathBuf,
    pub db: SharedConn,
    pub roster: Arc<SqliteRoster>,
    pub persistence: Arc<SqliteGradePersistence>,
    pub grades: GradeStore,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<Workspace>,
}

impl AppState {
    /// Next live update for the open grade session; pends while none is open.
    pub async fn next_sync_event(&mut self) -> Option<SyncEvent> {
        match self.workspace.as_mut() {
            Some(ws) => ws.grades.next_sync_event().await,
            None => std::future::pending().await,
        }
    }

    pub fn apply_sync_event(&mut self, event: SyncEvent) {
        if let Some(ws) = self.workspace.as_mut() {
            ws.grades.apply_sync_event(event);
        }
    }
}
