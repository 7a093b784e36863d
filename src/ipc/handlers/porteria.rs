//! Front-desk methods: level/grade/student navigation, pickup creation and
//! the global student search.

use crate::error::RetiroError;
use crate::ipc::error::{err, respond};
use crate::ipc::helpers::{get_id_list, get_optional_str, get_required_id, message};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::{self, PickupOutcome};
use crate::model::now_and_today;
use crate::reset::{self, ResetOutcome};
use crate::queries;
use rusqlite::Connection;
use serde_json::{json, Value};

type Handler = fn(&Connection, &Request) -> Result<Value, RetiroError>;

fn reset_json(out: ResetOutcome) -> Value {
    json!({ "performed": out.performed, "studentsReset": out.students_reset })
}

fn handle_roles_home(conn: &Connection, _req: &Request) -> Result<Value, RetiroError> {
    let (_, today) = now_and_today();
    let out = reset::ensure_daily_reset(conn, today)?;
    Ok(json!({
        "roles": ["porteria", "docente"],
        "reset": reset_json(out),
    }))
}

fn handle_levels(conn: &Connection, _req: &Request) -> Result<Value, RetiroError> {
    let (_, today) = now_and_today();
    let out = reset::ensure_daily_reset(conn, today)?;
    let levels = queries::list_active_levels(conn)?;
    Ok(json!({ "levels": levels, "reset": reset_json(out) }))
}

fn handle_grades(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let level_id = get_required_id(&req.params, "levelId")?;
    let grades = queries::list_active_grades(conn, level_id)?;
    let level = queries::get_level(conn, level_id)?;
    Ok(json!({ "level": level, "grades": grades }))
}

fn handle_students(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let grade_id = get_required_id(&req.params, "gradeId")?;
    let students = queries::list_present_students(conn, grade_id)?;
    let grade = queries::get_grade(conn, grade_id)?;
    let level = queries::get_level(conn, grade.level_id)?;
    Ok(json!({
        "grade": grade,
        "level": level,
        "count": students.len(),
        "students": students,
    }))
}

fn handle_create(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let student_id = get_required_id(&req.params, "studentId")?;
    let note = get_optional_str(&req.params, "note");
    let (now, _) = now_and_today();

    Ok(match lifecycle::request_pickup(conn, student_id, note, now)? {
        PickupOutcome::Created {
            request_id,
            student_name,
        } => json!({
            "created": true,
            "requestId": request_id,
            "studentName": student_name,
            "messages": [message("success", format!("Retiro avisado para {student_name}"))],
        }),
        PickupOutcome::Duplicate { student_name } => json!({
            "created": false,
            "studentName": student_name,
            "messages": [message(
                "warning",
                format!("{student_name} ya tiene un retiro pendiente."),
            )],
        }),
    })
}

fn handle_create_bulk(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let ids = get_id_list(&req.params, "studentIds")?;
    if ids.is_empty() {
        return Ok(json!({
            "created": 0,
            "duplicates": 0,
            "missing": 0,
            "messages": [message("warning", "No seleccionó alumnos.")],
        }));
    }

    let (now, _) = now_and_today();
    let out = lifecycle::request_pickup_bulk(conn, &ids, now)?;

    let mut messages = Vec::new();
    if out.created > 0 {
        messages.push(message(
            "success",
            format!("{} retiros creados correctamente.", out.created),
        ));
    }
    if out.duplicates > 0 {
        messages.push(message(
            "warning",
            format!("{} alumnos ya tenían retiro pendiente.", out.duplicates),
        ));
    }
    if out.missing > 0 {
        messages.push(message(
            "warning",
            format!("{} alumnos no existen.", out.missing),
        ));
    }
    Ok(json!({
        "created": out.created,
        "duplicates": out.duplicates,
        "missing": out.missing,
        "messages": messages,
    }))
}

fn handle_search(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let q = get_optional_str(&req.params, "q").unwrap_or("");
    let results: Vec<Value> = queries::search_students(conn, q)?
        .into_iter()
        .map(|hit| {
            json!({
                "id": hit.id,
                "nombre": hit.name,
                "grado": hit.grade_name,
                "tiene_pendiente": hit.has_pending,
            })
        })
        .collect();
    Ok(json!({ "results": results }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "roles.home" => handle_roles_home,
        "porteria.levels" => handle_levels,
        "porteria.grades" => handle_grades,
        "porteria.students" => handle_students,
        "retiros.create" => handle_create,
        "retiros.createBulk" => handle_create_bulk,
        "students.search" => handle_search,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(respond(&req.id, handler(conn, req)))
}
