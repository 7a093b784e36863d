//! Teacher methods: the per-grade pickup queue, its polling endpoints and
//! delivery.

use crate::error::RetiroError;
use crate::ipc::error::{err, respond};
use crate::ipc::helpers::{get_required_id, message};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle;
use crate::model::now_and_today;
use crate::queries;
use rusqlite::Connection;
use serde_json::{json, Value};

type Handler = fn(&Connection, &Request) -> Result<Value, RetiroError>;

fn handle_grades(conn: &Connection, _req: &Request) -> Result<Value, RetiroError> {
    let grades = queries::list_all_active_grades(conn)?;
    Ok(json!({ "grades": grades }))
}

fn handle_pending(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let grade_id = get_required_id(&req.params, "gradeId")?;
    let retiros = queries::list_pending_for_grade(conn, grade_id)?;
    let grade = queries::get_grade(conn, grade_id)?;
    Ok(json!({ "grade": grade, "retiros": retiros }))
}

fn handle_pending_count(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let grade_id = get_required_id(&req.params, "gradeId")?;
    let cantidad = queries::count_pending_for_grade(conn, grade_id)?;
    Ok(json!({ "cantidad": cantidad }))
}

fn handle_pending_list(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let grade_id = get_required_id(&req.params, "gradeId")?;
    let retiros: Vec<Value> = queries::list_pending_for_grade(conn, grade_id)?
        .into_iter()
        .map(|r| json!({ "id": r.id, "nombre": r.student_name }))
        .collect();
    Ok(json!({ "retiros": retiros }))
}

fn handle_deliver(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let request_id = get_required_id(&req.params, "requestId")?;
    let (now, today) = now_and_today();
    let delivery = lifecycle::mark_delivered(conn, request_id, now, today)?;
    Ok(json!({
        "requestId": delivery.request_id,
        "studentId": delivery.student_id,
        "gradeId": delivery.grade_id,
        "redirect": format!("/docente/{}/", delivery.grade_id),
        "messages": [message(
            "success",
            format!("{} fue entregado correctamente.", delivery.student_name),
        )],
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "docente.grades" => handle_grades,
        "docente.pending" => handle_pending,
        "docente.pendingCount" => handle_pending_count,
        "docente.pendingList" => handle_pending_list,
        "retiros.deliver" => handle_deliver,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(respond(&req.id, handler(conn, req)))
}
