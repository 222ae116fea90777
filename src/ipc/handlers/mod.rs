pub mod config;
pub mod core;
pub mod grades;
pub mod reports;
pub mod students;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request, Workspace};

pub(crate) fn workspace<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<&'a mut Workspace, serde_json::Value> {
    state
        .workspace
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub(crate) fn str_param<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

pub(crate) fn required_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, serde_json::Value> {
    str_param(req, key).ok_or_else(|| err(&req.id, "bad_params", format!("missing params.{key}"), None))
}
