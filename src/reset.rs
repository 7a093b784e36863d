//! Once-per-day restoration of every student to "on campus".

use crate::error::Result;
use crate::model::date_key;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetOutcome {
    /// Whether this call advanced the reset marker to `today`.
    pub performed: bool,
    pub students_reset: usize,
}

/// Marks every student present for `today`, at most once per calendar day.
///
/// The `daily_reset` marker is advanced with a compare-and-set inside an
/// immediate transaction, so concurrent first requests of the day serialize
/// and only one of them runs the bulk update. Students already stamped with
/// `today` (delivered earlier the same day) are left as they are.
pub fn ensure_daily_reset(conn: &Connection, today: NaiveDate) -> Result<ResetOutcome> {
    let day = date_key(today);
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let advanced = tx.execute(
        "INSERT INTO daily_reset(id, last_reset_date) VALUES(1, ?1)
         ON CONFLICT(id) DO UPDATE SET last_reset_date = excluded.last_reset_date
         WHERE daily_reset.last_reset_date < excluded.last_reset_date",
        [&day],
    )?;

    if advanced == 0 {
        tx.commit()?;
        return Ok(ResetOutcome {
            performed: false,
            students_reset: 0,
        });
    }

    let students_reset = tx.execute(
        "UPDATE students SET present = 1, status_date = ?1 WHERE status_date <> ?1",
        [&day],
    )?;
    tx.commit()?;

    tracing::info!(date = %day, students_reset, "daily reset performed");
    Ok(ResetOutcome {
        performed: true,
        students_reset,
    })
}

/// Date of the last reset, if one ever ran.
pub fn last_reset_date(conn: &Connection) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT last_reset_date FROM daily_reset WHERE id = 1",
            [],
            |r| r.get(0),
        )
        .optional()?)
}
