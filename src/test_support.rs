use crate::db;
use crate::model::date_key;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;
use std::path::Path;

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub conn: Connection,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = db::open_db(dir.path()).expect("open workspace db");
        Self { dir, conn }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// A day in October 2026.
pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, d).expect("valid day")
}

/// 17 October 2026 at the given UTC time.
pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, h, m, s).unwrap()
}

pub fn seed_level(conn: &Connection, name: &str) -> i64 {
    conn.execute("INSERT INTO levels(name) VALUES(?)", [name])
        .expect("insert level");
    conn.last_insert_rowid()
}

pub fn seed_grade(conn: &Connection, level_id: i64, name: &str, order: i64) -> i64 {
    conn.execute(
        "INSERT INTO grades(level_id, name, sort_order) VALUES(?, ?, ?)",
        (level_id, name, order),
    )
    .expect("insert grade");
    conn.last_insert_rowid()
}

pub fn seed_student(conn: &Connection, grade_id: i64, name: &str, status: NaiveDate) -> i64 {
    conn.execute(
        "INSERT INTO students(grade_id, name, status_date) VALUES(?, ?, ?)",
        (grade_id, name, date_key(status)),
    )
    .expect("insert student");
    conn.last_insert_rowid()
}

pub fn student_presence(conn: &Connection, student_id: i64) -> (bool, String) {
    conn.query_row(
        "SELECT present, status_date FROM students WHERE id = ?",
        [student_id],
        |r| Ok((r.get::<_, i64>(0)? != 0, r.get(1)?)),
    )
    .expect("student presence")
}

pub fn pending_count_for_student(conn: &Connection, student_id: i64) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM pickup_requests WHERE student_id = ? AND state = 'PENDING'",
        [student_id],
        |r| r.get(0),
    )
    .expect("count pending")
}
