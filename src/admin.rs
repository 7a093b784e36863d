//! Administrator maintenance of levels, grades and students, plus the
//! read-only pickup history.
//!
//! Nothing here deletes rows: reference data is deactivated, and pickup
//! requests are append-only.

use crate::error::{Result, RetiroError};
use crate::model::{date_key, Grade, Level, PickupRequest, PickupState, Student};
use crate::queries::{get_grade, get_level, grade_from_row, level_from_row};
use chrono::NaiveDate;
use rusqlite::types::{Type, Value};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

pub const HISTORY_DEFAULT_LIMIT: usize = 100;
pub const HISTORY_MAX_LIMIT: usize = 500;

#[derive(Debug, Default, Clone)]
pub struct GradePatch {
    pub level_id: Option<i64>,
    pub name: Option<String>,
    pub order: Option<i64>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Clone)]
pub struct StudentPatch {
    pub grade_id: Option<i64>,
    pub name: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Clone)]
pub struct StudentFilter {
    pub level_id: Option<i64>,
    pub grade_id: Option<i64>,
    pub active: Option<bool>,
    pub q: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct PickupFilter {
    pub state: Option<PickupState>,
    pub grade_id: Option<i64>,
    pub student_id: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAdminRow {
    pub id: i64,
    pub name: String,
    pub level_name: String,
    pub grade_id: i64,
    pub grade_name: String,
    pub active: bool,
    pub present: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupHistoryRow {
    #[serde(flatten)]
    pub request: PickupRequest,
    pub student_name: String,
    pub grade_name: String,
}

fn clean_name(raw: &str, what: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(RetiroError::InvalidInput(format!("{what} must not be empty")));
    }
    Ok(name.to_string())
}

// ── Levels ──────────────────────────────────────────────────────────

pub fn list_levels(conn: &Connection) -> Result<Vec<Level>> {
    let mut stmt = conn.prepare("SELECT id, name, active FROM levels ORDER BY name, id")?;
    let rows = stmt
        .query_map([], level_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn create_level(conn: &Connection, name: &str) -> Result<Level> {
    let name = clean_name(name, "name")?;
    conn.execute("INSERT INTO levels(name, active) VALUES(?, 1)", [&name])?;
    let id = conn.last_insert_rowid();
    tracing::info!(level_id = id, "level created");
    get_level(conn, id)
}

pub fn update_level(
    conn: &Connection,
    level_id: i64,
    name: Option<&str>,
    active: Option<bool>,
) -> Result<Level> {
    let current = get_level(conn, level_id)?;
    let name = match name {
        Some(n) => clean_name(n, "name")?,
        None => current.name,
    };
    let active = active.unwrap_or(current.active);
    conn.execute(
        "UPDATE levels SET name = ?, active = ? WHERE id = ?",
        (&name, active as i64, level_id),
    )?;
    get_level(conn, level_id)
}

// ── Grades ──────────────────────────────────────────────────────────

pub fn list_grades(conn: &Connection, level_id: Option<i64>) -> Result<Vec<Grade>> {
    let mut stmt = conn.prepare(
        "SELECT id, level_id, name, sort_order, active
         FROM grades
         WHERE (?1 IS NULL OR level_id = ?1)
         ORDER BY level_id, sort_order, name, id",
    )?;
    let rows = stmt
        .query_map([level_id], grade_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn create_grade(conn: &Connection, level_id: i64, name: &str, order: i64) -> Result<Grade> {
    let name = clean_name(name, "name")?;
    get_level(conn, level_id)?;
    conn.execute(
        "INSERT INTO grades(level_id, name, sort_order, active) VALUES(?, ?, ?, 1)",
        (level_id, &name, order),
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(grade_id = id, level_id, "grade created");
    get_grade(conn, id)
}

pub fn update_grade(conn: &Connection, grade_id: i64, patch: &GradePatch) -> Result<Grade> {
    let current = get_grade(conn, grade_id)?;
    let level_id = match patch.level_id {
        Some(id) => get_level(conn, id)?.id,
        None => current.level_id,
    };
    let name = match patch.name.as_deref() {
        Some(n) => clean_name(n, "name")?,
        None => current.name,
    };
    conn.execute(
        "UPDATE grades SET level_id = ?, name = ?, sort_order = ?, active = ? WHERE id = ?",
        (
            level_id,
            &name,
            patch.order.unwrap_or(current.order),
            patch.active.unwrap_or(current.active) as i64,
            grade_id,
        ),
    )?;
    get_grade(conn, grade_id)
}

// ── Students ────────────────────────────────────────────────────────

pub fn get_student(conn: &Connection, student_id: i64) -> Result<Student> {
    conn.query_row(
        "SELECT id, grade_id, name, active, present, status_date FROM students WHERE id = ?",
        [student_id],
        |r| {
            Ok(Student {
                id: r.get(0)?,
                grade_id: r.get(1)?,
                name: r.get(2)?,
                active: r.get::<_, i64>(3)? != 0,
                present: r.get::<_, i64>(4)? != 0,
                status_date: r.get(5)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| RetiroError::not_found("student", student_id))
}

/// New students start on campus for `today`.
pub fn create_student(
    conn: &Connection,
    grade_id: i64,
    name: &str,
    today: NaiveDate,
) -> Result<Student> {
    let name = clean_name(name, "name")?;
    get_grade(conn, grade_id)?;
    conn.execute(
        "INSERT INTO students(grade_id, name, active, present, status_date) VALUES(?, ?, 1, 1, ?)",
        (grade_id, &name, date_key(today)),
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(student_id = id, grade_id, "student created");
    get_student(conn, id)
}

/// Changing the grade leaves existing pickup requests on their original
/// grade.
pub fn update_student(conn: &Connection, student_id: i64, patch: &StudentPatch) -> Result<Student> {
    let current = get_student(conn, student_id)?;
    let grade_id = match patch.grade_id {
        Some(id) => get_grade(conn, id)?.id,
        None => current.grade_id,
    };
    let name = match patch.name.as_deref() {
        Some(n) => clean_name(n, "name")?,
        None => current.name,
    };
    conn.execute(
        "UPDATE students SET grade_id = ?, name = ?, active = ? WHERE id = ?",
        (
            grade_id,
            &name,
            patch.active.unwrap_or(current.active) as i64,
            student_id,
        ),
    )?;
    get_student(conn, student_id)
}

pub fn list_students(conn: &Connection, filter: &StudentFilter) -> Result<Vec<StudentAdminRow>> {
    let mut sql = String::from(
        "SELECT s.id, s.name, l.name, g.id, g.name, s.active, s.present
         FROM students s
         JOIN grades g ON g.id = s.grade_id
         JOIN levels l ON l.id = g.level_id
         WHERE 1 = 1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(level_id) = filter.level_id {
        sql.push_str(" AND l.id = ?");
        binds.push(Value::Integer(level_id));
    }
    if let Some(grade_id) = filter.grade_id {
        sql.push_str(" AND g.id = ?");
        binds.push(Value::Integer(grade_id));
    }
    if let Some(active) = filter.active {
        sql.push_str(" AND s.active = ?");
        binds.push(Value::Integer(active as i64));
    }
    sql.push_str(" ORDER BY s.name COLLATE NOCASE, s.id");

    let needle = filter
        .q
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(StudentAdminRow {
                id: r.get(0)?,
                name: r.get(1)?,
                level_name: r.get(2)?,
                grade_id: r.get(3)?,
                grade_name: r.get(4)?,
                active: r.get::<_, i64>(5)? != 0,
                present: r.get::<_, i64>(6)? != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(match needle {
        Some(q) => rows
            .into_iter()
            .filter(|row| row.name.to_lowercase().contains(&q))
            .collect(),
        None => rows,
    })
}

// ── Pickup history ──────────────────────────────────────────────────

/// Pickup requests, newest first.
pub fn list_pickups(conn: &Connection, filter: &PickupFilter) -> Result<Vec<PickupHistoryRow>> {
    let mut sql = String::from(
        "SELECT p.id, p.student_id, p.grade_id, p.state, p.requested_at, p.delivered_at, p.note,
                s.name, g.name
         FROM pickup_requests p
         JOIN students s ON s.id = p.student_id
         JOIN grades g ON g.id = p.grade_id
         WHERE 1 = 1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(state) = filter.state {
        sql.push_str(" AND p.state = ?");
        binds.push(Value::Text(state.as_str().to_string()));
    }
    if let Some(grade_id) = filter.grade_id {
        sql.push_str(" AND p.grade_id = ?");
        binds.push(Value::Integer(grade_id));
    }
    if let Some(student_id) = filter.student_id {
        sql.push_str(" AND p.student_id = ?");
        binds.push(Value::Integer(student_id));
    }
    let limit = filter
        .limit
        .unwrap_or(HISTORY_DEFAULT_LIMIT)
        .clamp(1, HISTORY_MAX_LIMIT);
    sql.push_str(" ORDER BY p.requested_at DESC, p.id DESC LIMIT ?");
    binds.push(Value::Integer(limit as i64));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            let state: String = r.get(3)?;
            let parse_state = |raw: &str| {
                PickupState::parse(raw).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        Type::Text,
                        format!("unknown pickup state {raw:?}").into(),
                    )
                })
            };
            Ok(PickupHistoryRow {
                request: PickupRequest {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    grade_id: r.get(2)?,
                    state: parse_state(&state)?,
                    requested_at: r.get(4)?,
                    delivered_at: r.get(5)?,
                    note: r.get(6)?,
                },
                student_name: r.get(7)?,
                grade_name: r.get(8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
