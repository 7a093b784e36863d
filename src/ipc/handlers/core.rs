use crate::db;
use crate::ipc::error::{err, ok, respond};
use crate::ipc::types::{AppState, Request};
use crate::model::now_and_today;
use crate::reset;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
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

    match db::open_db(&path) {
        Ok(conn) => {
            tracing::info!(workspace = %path.display(), "workspace opened");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_reset_ensure_daily(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (_, today) = now_and_today();
    let result = reset::ensure_daily_reset(conn, today).and_then(|out| {
        Ok(json!({
            "performed": out.performed,
            "studentsReset": out.students_reset,
            "lastResetDate": reset::last_reset_date(conn)?,
        }))
    });
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "reset.ensureDaily" => Some(handle_reset_ensure_daily(state, req)),
        _ => None,
    }
}
