use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_backup_export_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let out = PathBuf::from(&out_path);
    let export = match backup::export_workspace_bundle(&workspace_path, &out) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            )
        }
    };
    tracing::info!(path = %out_path, sha256 = %export.db_sha256, "workspace bundle exported");

    ok(
        &req.id,
        json!({
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256,
        }),
    )
}

fn handle_backup_import_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            // The old database is untouched on failure; reopen it.
            state.db = db::open_db(&workspace_path).ok();
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": src.to_string_lossy() })),
            );
        }
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => state.db = Some(conn),
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
    tracing::info!(path = %in_path, sha256 = %import.db_sha256, "workspace bundle imported");

    ok(
        &req.id,
        json!({
            "workspacePath": workspace_path.to_string_lossy(),
            "bundleFormatDetected": import.bundle_format_detected,
            "dbSha256": import.db_sha256,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_backup_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_backup_import_workspace_bundle(state, req)),
        _ => None,
    }
}
