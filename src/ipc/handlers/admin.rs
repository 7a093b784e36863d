use crate::admin::{self, GradePatch, PickupFilter, StudentFilter, StudentPatch};
use crate::error::RetiroError;
use crate::ipc::error::{err, respond};
use crate::ipc::helpers::{
    get_optional_bool, get_optional_i64, get_optional_id, get_optional_str, get_required_id,
    get_required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{now_and_today, PickupState};
use rusqlite::Connection;
use serde_json::{json, Value};

type Handler = fn(&Connection, &Request) -> Result<Value, RetiroError>;

fn handle_levels_list(conn: &Connection, _req: &Request) -> Result<Value, RetiroError> {
    Ok(json!({ "levels": admin::list_levels(conn)? }))
}

fn handle_levels_create(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let name = get_required_str(&req.params, "name")?;
    Ok(json!({ "level": admin::create_level(conn, name)? }))
}

fn handle_levels_update(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let level_id = get_required_id(&req.params, "levelId")?;
    let name = get_optional_str(&req.params, "name");
    let active = get_optional_bool(&req.params, "active")?;
    Ok(json!({ "level": admin::update_level(conn, level_id, name, active)? }))
}

fn handle_grades_list(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let level_id = get_optional_id(&req.params, "levelId")?;
    Ok(json!({ "grades": admin::list_grades(conn, level_id)? }))
}

fn handle_grades_create(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let level_id = get_required_id(&req.params, "levelId")?;
    let name = get_required_str(&req.params, "name")?;
    let order = get_optional_i64(&req.params, "order")?.unwrap_or(0);
    Ok(json!({ "grade": admin::create_grade(conn, level_id, name, order)? }))
}

fn handle_grades_update(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let grade_id = get_required_id(&req.params, "gradeId")?;
    let patch = GradePatch {
        level_id: get_optional_id(&req.params, "levelId")?,
        name: get_optional_str(&req.params, "name").map(str::to_string),
        order: get_optional_i64(&req.params, "order")?,
        active: get_optional_bool(&req.params, "active")?,
    };
    Ok(json!({ "grade": admin::update_grade(conn, grade_id, &patch)? }))
}

fn handle_students_list(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let filter = StudentFilter {
        level_id: get_optional_id(&req.params, "levelId")?,
        grade_id: get_optional_id(&req.params, "gradeId")?,
        active: get_optional_bool(&req.params, "active")?,
        q: get_optional_str(&req.params, "q").map(str::to_string),
    };
    Ok(json!({ "students": admin::list_students(conn, &filter)? }))
}

fn handle_students_create(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let grade_id = get_required_id(&req.params, "gradeId")?;
    let name = get_required_str(&req.params, "name")?;
    let (_, today) = now_and_today();
    Ok(json!({ "student": admin::create_student(conn, grade_id, name, today)? }))
}

fn handle_students_update(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let student_id = get_required_id(&req.params, "studentId")?;
    let patch = StudentPatch {
        grade_id: get_optional_id(&req.params, "gradeId")?,
        name: get_optional_str(&req.params, "name").map(str::to_string),
        active: get_optional_bool(&req.params, "active")?,
    };
    Ok(json!({ "student": admin::update_student(conn, student_id, &patch)? }))
}

fn handle_retiros_list(conn: &Connection, req: &Request) -> Result<Value, RetiroError> {
    let state = match get_optional_str(&req.params, "state") {
        Some(raw) => Some(PickupState::parse(raw).ok_or_else(|| {
            RetiroError::InvalidInput("state must be PENDING or DELIVERED".to_string())
        })?),
        None => None,
    };
    let limit = match get_optional_i64(&req.params, "limit")? {
        Some(n) if n < 1 => {
            return Err(RetiroError::InvalidInput(
                "limit must be positive".to_string(),
            ))
        }
        Some(n) => Some(n as usize),
        None => None,
    };
    let filter = PickupFilter {
        state,
        grade_id: get_optional_id(&req.params, "gradeId")?,
        student_id: get_optional_id(&req.params, "studentId")?,
        limit,
    };
    Ok(json!({ "retiros": admin::list_pickups(conn, &filter)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "admin.levels.list" => handle_levels_list,
        "admin.levels.create" => handle_levels_create,
        "admin.levels.update" => handle_levels_update,
        "admin.grades.list" => handle_grades_list,
        "admin.grades.create" => handle_grades_create,
        "admin.grades.update" => handle_grades_update,
        "admin.students.list" => handle_students_list,
        "admin.students.create" => handle_students_create,
        "admin.students.update" => handle_students_update,
        "admin.retiros.list" => handle_retiros_list,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(respond(&req.id, handler(conn, req)))
}
