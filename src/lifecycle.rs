//! Creation, de-duplication and closing of pickup requests.
//!
//! "One open request per student" is enforced by the partial unique index
//! `idx_pickup_requests_one_pending`; an insert it rejects is reported as
//! [`PickupOutcome::Duplicate`] instead of being checked up front.

use crate::db;
use crate::error::{Result, RetiroError};
use crate::model::{date_key, timestamp, PickupState};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickupOutcome {
    Created { request_id: i64, student_name: String },
    Duplicate { student_name: String },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BulkOutcome {
    pub created: usize,
    pub duplicates: usize,
    /// Ids in the batch that matched no student.
    pub missing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub request_id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub grade_id: i64,
}

fn student_name(conn: &Connection, student_id: i64) -> Result<String> {
    conn.query_row("SELECT name FROM students WHERE id = ?", [student_id], |r| {
        r.get(0)
    })
    .optional()?
    .ok_or_else(|| RetiroError::not_found("student", student_id))
}

/// Opens a pickup request for one student.
///
/// The grade is copied from the student's current grade in the same
/// statement that inserts the row, and is never re-synced afterwards.
pub fn request_pickup(
    conn: &Connection,
    student_id: i64,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<PickupOutcome> {
    let name = student_name(conn, student_id)?;
    let note = note.map(str::trim).filter(|n| !n.is_empty());

    let inserted = conn.execute(
        "INSERT INTO pickup_requests(student_id, grade_id, state, requested_at, note)
         SELECT id, grade_id, ?2, ?3, ?4 FROM students WHERE id = ?1",
        (
            student_id,
            PickupState::Pending.as_str(),
            timestamp(now),
            note,
        ),
    );

    match inserted {
        Ok(0) => Err(RetiroError::not_found("student", student_id)),
        Ok(_) => {
            let request_id = conn.last_insert_rowid();
            tracing::info!(student_id, request_id, "pickup requested");
            Ok(PickupOutcome::Created {
                request_id,
                student_name: name,
            })
        }
        Err(e) if db::is_unique_violation(&e) => {
            tracing::debug!(student_id, "pickup already pending");
            Ok(PickupOutcome::Duplicate { student_name: name })
        }
        Err(e) => Err(e.into()),
    }
}

/// Applies [`request_pickup`] to each id in order.
///
/// Every id stands on its own: a duplicate or an unknown id is counted and
/// the batch carries on, and nothing already created is rolled back.
pub fn request_pickup_bulk(
    conn: &Connection,
    student_ids: &[i64],
    now: DateTime<Utc>,
) -> Result<BulkOutcome> {
    let mut out = BulkOutcome::default();
    for &student_id in student_ids {
        match request_pickup(conn, student_id, None, now) {
            Ok(PickupOutcome::Created { .. }) => out.created += 1,
            Ok(PickupOutcome::Duplicate { .. }) => out.duplicates += 1,
            Err(RetiroError::NotFound { .. }) => out.missing += 1,
            Err(e) => return Err(e),
        }
    }
    tracing::info!(
        created = out.created,
        duplicates = out.duplicates,
        missing = out.missing,
        "bulk pickup request processed"
    );
    Ok(out)
}

/// Closes a pending request and marks its student as gone for `today`.
///
/// Both writes share one transaction. A request that is already delivered
/// is rejected with [`RetiroError::AlreadyDelivered`] and nothing changes.
pub fn mark_delivered(
    conn: &Connection,
    request_id: i64,
    now: DateTime<Utc>,
    today: NaiveDate,
) -> Result<Delivery> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let row: Option<(i64, i64, String)> = tx
        .query_row(
            "SELECT student_id, grade_id, state FROM pickup_requests WHERE id = ?",
            [request_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((student_id, grade_id, state)) = row else {
        return Err(RetiroError::not_found("pickup request", request_id));
    };
    if PickupState::parse(&state) != Some(PickupState::Pending) {
        return Err(RetiroError::AlreadyDelivered { request_id });
    }

    let changed = tx.execute(
        "UPDATE pickup_requests SET state = ?1, delivered_at = ?2
         WHERE id = ?3 AND state = ?4",
        (
            PickupState::Delivered.as_str(),
            timestamp(now),
            request_id,
            PickupState::Pending.as_str(),
        ),
    )?;
    if changed == 0 {
        return Err(RetiroError::AlreadyDelivered { request_id });
    }

    tx.execute(
        "UPDATE students SET present = 0, status_date = ? WHERE id = ?",
        (date_key(today), student_id),
    )?;
    let student_name: String =
        tx.query_row("SELECT name FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })?;
    tx.commit()?;

    tracing::info!(request_id, student_id, grade_id, "pickup delivered");
    Ok(Delivery {
        request_id,
        student_id,
        student_name,
        grade_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        at, day, pending_count_for_student, seed_grade, seed_level, seed_student,
        student_presence, Fixture,
    };
    use std::sync::{Arc, Barrier};

    fn school(fx: &Fixture) -> (i64, i64, i64) {
        let level = seed_level(&fx.conn, "Primaria");
        let grade = seed_grade(&fx.conn, level, "5A", 1);
        let juan = seed_student(&fx.conn, grade, "Juan Perez", day(17));
        (level, grade, juan)
    }

    #[test]
    fn second_request_for_same_student_is_a_duplicate() {
        let fx = Fixture::new();
        let (_, _, juan) = school(&fx);

        let first = request_pickup(&fx.conn, juan, None, at(12, 0, 0)).expect("first");
        let second = request_pickup(&fx.conn, juan, None, at(12, 1, 0)).expect("second");

        assert!(matches!(first, PickupOutcome::Created { .. }));
        assert_eq!(
            second,
            PickupOutcome::Duplicate {
                student_name: "Juan Perez".to_string()
            }
        );
        assert_eq!(pending_count_for_student(&fx.conn, juan), 1);
    }

    #[test]
    fn unknown_student_is_not_found() {
        let fx = Fixture::new();
        let err = request_pickup(&fx.conn, 999, None, at(12, 0, 0)).unwrap_err();
        assert!(matches!(
            err,
            RetiroError::NotFound {
                entity: "student",
                id: 999
            }
        ));
    }

    #[test]
    fn note_is_trimmed_and_blank_notes_are_dropped() {
        let fx = Fixture::new();
        let (_, grade, juan) = school(&fx);
        let ana = seed_student(&fx.conn, grade, "Ana", day(17));

        request_pickup(&fx.conn, juan, Some("  lo recoge la abuela "), at(12, 0, 0)).expect("juan");
        request_pickup(&fx.conn, ana, Some("   "), at(12, 0, 0)).expect("ana");

        let notes: Vec<Option<String>> = fx
            .conn
            .prepare("SELECT note FROM pickup_requests ORDER BY id")
            .expect("prepare")
            .query_map([], |r| r.get(0))
            .expect("query")
            .collect::<std::result::Result<_, _>>()
            .expect("rows");
        assert_eq!(notes, vec![Some("lo recoge la abuela".to_string()), None]);
    }

    #[test]
    fn bulk_counts_repeated_ids_as_duplicates() {
        let fx = Fixture::new();
        let (_, grade, a) = school(&fx);
        let b = seed_student(&fx.conn, grade, "Beto", day(17));

        let out = request_pickup_bulk(&fx.conn, &[a, a, b], at(12, 0, 0)).expect("bulk");
        assert_eq!(
            out,
            BulkOutcome {
                created: 2,
                duplicates: 1,
                missing: 0
            }
        );
        assert_eq!(pending_count_for_student(&fx.conn, a), 1);
        assert_eq!(pending_count_for_student(&fx.conn, b), 1);
    }

    #[test]
    fn bulk_skips_unknown_ids_without_undoing_others() {
        let fx = Fixture::new();
        let (_, grade, a) = school(&fx);
        let b = seed_student(&fx.conn, grade, "Beto", day(17));
        request_pickup(&fx.conn, b, None, at(11, 0, 0)).expect("existing");

        let out = request_pickup_bulk(&fx.conn, &[a, 4242, b], at(12, 0, 0)).expect("bulk");
        assert_eq!(
            out,
            BulkOutcome {
                created: 1,
                duplicates: 1,
                missing: 1
            }
        );
        assert_eq!(pending_count_for_student(&fx.conn, a), 1);
    }

    #[test]
    fn empty_bulk_is_a_no_op() {
        let fx = Fixture::new();
        school(&fx);
        let out = request_pickup_bulk(&fx.conn, &[], at(12, 0, 0)).expect("bulk");
        assert_eq!(out, BulkOutcome::default());
    }

    #[test]
    fn delivery_closes_request_and_marks_student_absent() {
        let fx = Fixture::new();
        let (_, grade, juan) = school(&fx);
        let PickupOutcome::Created { request_id, .. } =
            request_pickup(&fx.conn, juan, None, at(12, 0, 0)).expect("request")
        else {
            panic!("expected a created request");
        };

        let delivery =
            mark_delivered(&fx.conn, request_id, at(12, 30, 0), day(17)).expect("deliver");
        assert_eq!(
            delivery,
            Delivery {
                request_id,
                student_id: juan,
                student_name: "Juan Perez".to_string(),
                grade_id: grade,
            }
        );

        let (state, delivered_at): (String, Option<String>) = fx
            .conn
            .query_row(
                "SELECT state, delivered_at FROM pickup_requests WHERE id = ?",
                [request_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .expect("request row");
        assert_eq!(state, "DELIVERED");
        assert_eq!(delivered_at.as_deref(), Some("2026-10-17T12:30:00.000000Z"));
        assert_eq!(student_presence(&fx.conn, juan), (false, "2026-10-17".to_string()));
    }

    #[test]
    fn second_delivery_is_rejected_and_changes_nothing() {
        let fx = Fixture::new();
        let (_, _, juan) = school(&fx);
        let PickupOutcome::Created { request_id, .. } =
            request_pickup(&fx.conn, juan, None, at(12, 0, 0)).expect("request")
        else {
            panic!("expected a created request");
        };
        mark_delivered(&fx.conn, request_id, at(12, 30, 0), day(17)).expect("first delivery");
        // Put the student back on campus to detect a second student write.
        fx.conn
            .execute("UPDATE students SET present = 1 WHERE id = ?", [juan])
            .expect("restore");

        let err = mark_delivered(&fx.conn, request_id, at(13, 0, 0), day(17)).unwrap_err();
        assert!(matches!(err, RetiroError::AlreadyDelivered { .. }));

        let delivered_at: String = fx
            .conn
            .query_row(
                "SELECT delivered_at FROM pickup_requests WHERE id = ?",
                [request_id],
                |r| r.get(0),
            )
            .expect("delivered_at");
        assert_eq!(delivered_at, "2026-10-17T12:30:00.000000Z");
        assert!(student_presence(&fx.conn, juan).0);
    }

    #[test]
    fn delivering_unknown_request_is_not_found() {
        let fx = Fixture::new();
        let err = mark_delivered(&fx.conn, 7, at(12, 0, 0), day(17)).unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn a_new_request_can_follow_a_delivered_one() {
        let fx = Fixture::new();
        let (_, _, juan) = school(&fx);
        let PickupOutcome::Created { request_id, .. } =
            request_pickup(&fx.conn, juan, None, at(12, 0, 0)).expect("request")
        else {
            panic!("expected a created request");
        };
        mark_delivered(&fx.conn, request_id, at(12, 30, 0), day(17)).expect("deliver");

        let again = request_pickup(&fx.conn, juan, None, at(14, 0, 0)).expect("again");
        assert!(matches!(again, PickupOutcome::Created { .. }));
    }

    #[test]
    fn grade_snapshot_is_frozen_at_creation() {
        let fx = Fixture::new();
        let (level, grade, juan) = school(&fx);
        let other = seed_grade(&fx.conn, level, "5B", 2);
        let PickupOutcome::Created { request_id, .. } =
            request_pickup(&fx.conn, juan, None, at(12, 0, 0)).expect("request")
        else {
            panic!("expected a created request");
        };

        fx.conn
            .execute("UPDATE students SET grade_id = ? WHERE id = ?", [other, juan])
            .expect("transfer");

        let snapshot: i64 = fx
            .conn
            .query_row(
                "SELECT grade_id FROM pickup_requests WHERE id = ?",
                [request_id],
                |r| r.get(0),
            )
            .expect("grade snapshot");
        assert_eq!(snapshot, grade);
    }

    #[test]
    fn concurrent_requests_for_one_student_create_exactly_one() {
        let fx = Fixture::new();
        let (_, _, juan) = school(&fx);

        const CALLERS: usize = 8;
        let conns: Vec<Connection> = (0..CALLERS)
            .map(|_| db::open_db(fx.path()).expect("open connection"))
            .collect();
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = conns
            .into_iter()
            .map(|conn| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    request_pickup(&conn, juan, None, Utc::now()).expect("request pickup")
                })
            })
            .collect();

        let outcomes: Vec<PickupOutcome> = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect();
        let created = outcomes
            .iter()
            .filter(|o| matches!(o, PickupOutcome::Created { .. }))
            .count();

        assert_eq!(created, 1);
        assert_eq!(outcomes.len() - created, CALLERS - 1);
        assert_eq!(pending_count_for_student(&fx.conn, juan), 1);
    }
}
