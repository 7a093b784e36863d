use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "retiros.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // journal_mode returns a row, so it can't go through execute().
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS levels(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            level_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(level_id) REFERENCES levels(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_level_sort ON grades(level_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            grade_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            present INTEGER NOT NULL DEFAULT 1,
            status_date TEXT NOT NULL,
            FOREIGN KEY(grade_id) REFERENCES grades(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_grade ON students(grade_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_status_date ON students(status_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pickup_requests(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            grade_id INTEGER NOT NULL,
            state TEXT NOT NULL DEFAULT 'PENDING' CHECK(state IN ('PENDING', 'DELIVERED')),
            requested_at TEXT NOT NULL,
            delivered_at TEXT,
            note TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(grade_id) REFERENCES grades(id)
        )",
        [],
    )?;
    // At most one open request per student. Inserts rely on this index to
    // detect duplicates, so it must exist before any pickup is recorded.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_pickup_requests_one_pending
         ON pickup_requests(student_id) WHERE state = 'PENDING'",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pickup_requests_queue
         ON pickup_requests(grade_id, state, requested_at)",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_pickup_requests_delivered_terminal
         BEFORE UPDATE OF state ON pickup_requests
         WHEN OLD.state = 'DELIVERED'
         BEGIN
           SELECT RAISE(ABORT, 'delivered pickup requests are terminal');
         END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_pickup_requests_append_only
         BEFORE DELETE ON pickup_requests
         BEGIN
           SELECT RAISE(ABORT, 'pickup requests are append-only');
         END",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_reset(
            id INTEGER PRIMARY KEY CHECK(id = 1),
            last_reset_date TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

/// True when `err` is the partial unique index on open pickup requests
/// rejecting an insert. Any other UNIQUE violation is a real failure.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, Some(message)) => {
            code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && message.contains("pickup_requests.student_id")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_db_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path()).expect("first open");
        drop(conn);
        let conn = open_db(dir.path()).expect("second open");
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table'
                   AND name IN ('levels', 'grades', 'students', 'pickup_requests', 'daily_reset')",
                [],
                |r| r.get(0),
            )
            .expect("count tables");
        assert_eq!(tables, 5);
    }

    #[test]
    fn pickup_requests_cannot_be_deleted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path()).expect("open");
        conn.execute_batch(
            "INSERT INTO levels(name) VALUES('Primaria');
             INSERT INTO grades(level_id, name) VALUES(1, '1A');
             INSERT INTO students(grade_id, name, status_date) VALUES(1, 'Ana', '2026-10-17');
             INSERT INTO pickup_requests(student_id, grade_id, requested_at)
               VALUES(1, 1, '2026-10-17T12:00:00.000000Z');",
        )
        .expect("seed");
        let res = conn.execute("DELETE FROM pickup_requests", []);
        assert!(res.is_err());
    }

    #[test]
    fn only_the_open_request_index_counts_as_a_duplicate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path()).expect("open");
        conn.execute_batch(
            "INSERT INTO levels(name) VALUES('Primaria');
             INSERT INTO grades(level_id, name) VALUES(1, '1A');
             INSERT INTO students(grade_id, name, status_date) VALUES(1, 'Ana', '2026-10-17');
             INSERT INTO pickup_requests(student_id, grade_id, requested_at)
               VALUES(1, 1, '2026-10-17T12:00:00.000000Z');
             CREATE UNIQUE INDEX idx_levels_name ON levels(name);",
        )
        .expect("seed");

        let pending = conn
            .execute(
                "INSERT INTO pickup_requests(student_id, grade_id, requested_at)
                 VALUES(1, 1, '2026-10-17T12:05:00.000000Z')",
                [],
            )
            .expect_err("second open request");
        assert!(is_unique_violation(&pending));

        let other = conn
            .execute("INSERT INTO levels(name) VALUES('Primaria')", [])
            .expect_err("duplicate level name");
        assert!(!is_unique_violation(&other));
    }
}
