//! Read-only projections for the front desk and teacher views.

use crate::error::{Result, RetiroError};
use crate::model::{Grade, Level, SEARCH_MIN_CHARS, SEARCH_RESULT_LIMIT};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: i64,
    pub name: String,
    pub has_pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRow {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub requested_at: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub id: i64,
    pub name: String,
    pub grade_name: String,
    pub has_pending: bool,
}

const PENDING_EXISTS: &str =
    "EXISTS(SELECT 1 FROM pickup_requests p WHERE p.student_id = s.id AND p.state = 'PENDING')";

pub(crate) fn level_from_row(r: &Row<'_>) -> rusqlite::Result<Level> {
    Ok(Level {
        id: r.get(0)?,
        name: r.get(1)?,
        active: r.get::<_, i64>(2)? != 0,
    })
}

pub(crate) fn grade_from_row(r: &Row<'_>) -> rusqlite::Result<Grade> {
    Ok(Grade {
        id: r.get(0)?,
        level_id: r.get(1)?,
        name: r.get(2)?,
        order: r.get(3)?,
        active: r.get::<_, i64>(4)? != 0,
    })
}

pub fn get_level(conn: &Connection, level_id: i64) -> Result<Level> {
    conn.query_row(
        "SELECT id, name, active FROM levels WHERE id = ?",
        [level_id],
        level_from_row,
    )
    .optional()?
    .ok_or_else(|| RetiroError::not_found("level", level_id))
}

pub fn get_grade(conn: &Connection, grade_id: i64) -> Result<Grade> {
    conn.query_row(
        "SELECT id, level_id, name, sort_order, active FROM grades WHERE id = ?",
        [grade_id],
        grade_from_row,
    )
    .optional()?
    .ok_or_else(|| RetiroError::not_found("grade", grade_id))
}

pub fn list_active_levels(conn: &Connection) -> Result<Vec<Level>> {
    let mut stmt =
        conn.prepare("SELECT id, name, active FROM levels WHERE active = 1 ORDER BY name, id")?;
    let rows = stmt
        .query_map([], level_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Active grades of one level in their configured order.
pub fn list_active_grades(conn: &Connection, level_id: i64) -> Result<Vec<Grade>> {
    get_level(conn, level_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, level_id, name, sort_order, active
         FROM grades
         WHERE level_id = ? AND active = 1
         ORDER BY sort_order, name, id",
    )?;
    let rows = stmt
        .query_map([level_id], grade_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Active grades across all levels, for the teacher entry page.
pub fn list_all_active_grades(conn: &Connection) -> Result<Vec<Grade>> {
    let mut stmt = conn.prepare(
        "SELECT id, level_id, name, sort_order, active
         FROM grades
         WHERE active = 1
         ORDER BY sort_order, name, id",
    )?;
    let rows = stmt
        .query_map([], grade_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list_present_students(conn: &Connection, grade_id: i64) -> Result<Vec<StudentRow>> {
    get_grade(conn, grade_id)?;
    let sql = format!(
        "SELECT s.id, s.name, {PENDING_EXISTS}
         FROM students s
         WHERE s.grade_id = ? AND s.active = 1 AND s.present = 1
         ORDER BY s.name COLLATE NOCASE, s.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([grade_id], |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                name: r.get(1)?,
                has_pending: r.get::<_, i64>(2)? != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Open requests whose grade snapshot is `grade_id`, oldest first.
pub fn list_pending_for_grade(conn: &Connection, grade_id: i64) -> Result<Vec<PendingRow>> {
    get_grade(conn, grade_id)?;
    let mut stmt = conn.prepare(
        "SELECT p.id, p.student_id, s.name, p.requested_at, p.note
         FROM pickup_requests p
         JOIN students s ON s.id = p.student_id
         WHERE p.grade_id = ? AND p.state = 'PENDING'
         ORDER BY p.requested_at, p.id",
    )?;
    let rows = stmt
        .query_map([grade_id], |r| {
            Ok(PendingRow {
                id: r.get(0)?,
                student_id: r.get(1)?,
                student_name: r.get(2)?,
                requested_at: r.get(3)?,
                note: r.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn count_pending_for_grade(conn: &Connection, grade_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM pickup_requests WHERE grade_id = ? AND state = 'PENDING'",
        [grade_id],
        |r| r.get(0),
    )?)
}

/// Lower-cased search tokens, or `None` when the query is too short to run.
///
/// A single character is accepted only when it is a digit, so grade numbers
/// can be looked up directly.
pub fn search_tokens(query: &str) -> Option<Vec<String>> {
    let q = query.trim();
    if q.is_empty() {
        return None;
    }
    let numeric = q.chars().all(|c| c.is_ascii_digit());
    if q.chars().count() < SEARCH_MIN_CHARS && !numeric {
        return None;
    }
    Some(q.split_whitespace().map(str::to_lowercase).collect())
}

/// Active, present students whose name or grade name contains every token.
pub fn search_students(conn: &Connection, query: &str) -> Result<Vec<SearchHit>> {
    let Some(tokens) = search_tokens(query) else {
        return Ok(Vec::new());
    };

    let sql = format!(
        "SELECT s.id, s.name, g.name, {PENDING_EXISTS}
         FROM students s
         JOIN grades g ON g.id = s.grade_id
         WHERE s.active = 1 AND s.present = 1
         ORDER BY s.name COLLATE NOCASE, s.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;

    // SQLite only folds ASCII case, so matching happens here.
    let mut hits = Vec::new();
    while let Some(r) = rows.next()? {
        let name: String = r.get(1)?;
        let grade_name: String = r.get(2)?;
        let (name_lc, grade_lc) = (name.to_lowercase(), grade_name.to_lowercase());
        let matches = tokens
            .iter()
            .all(|t| name_lc.contains(t.as_str()) || grade_lc.contains(t.as_str()));
        if !matches {
            continue;
        }
        hits.push(SearchHit {
            id: r.get(0)?,
            name,
            grade_name,
            has_pending: r.get::<_, i64>(3)? != 0,
        });
        if hits.len() == SEARCH_RESULT_LIMIT {
            break;
        }
    }
    Ok(hits)
}
