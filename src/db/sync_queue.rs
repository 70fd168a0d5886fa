//! Durable queue of enrollment projections
//!
//! A row is written in the same transaction as the version it refers to, so
//! a crash between version creation and projection leaves a pending row for
//! the worker to pick up on restart.

use diesel::prelude::*;
use uuid::Uuid;

use super::diesel_schema::sync_queue;
use super::models::{sync_status, NewSyncQueueEntry, SyncQueueRow};
use crate::error::CourseError;

pub fn enqueue(
    conn: &mut SqliteConnection,
    course_id: &str,
    version: i32,
    now: &str,
) -> Result<String, CourseError> {
    let id = Uuid::new_v4().to_string();

    diesel::insert_into(sync_queue::table)
        .values(&NewSyncQueueEntry {
            id: &id,
            course_id,
            version,
            status: sync_status::PENDING,
            rounds: 0,
            failed_ids_json: "[]",
            created_at: now,
            updated_at: now,
        })
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Sync queue insert failed: {}", e)))?;

    Ok(id)
}

/// Courses with at least one pending projection, oldest first
pub fn pending_course_ids(conn: &mut SqliteConnection) -> Result<Vec<String>, CourseError> {
    sync_queue::table
        .filter(sync_queue::status.eq(sync_status::PENDING))
        .order(sync_queue::created_at.asc())
        .select(sync_queue::course_id)
        .distinct()
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))
}

/// Failed entries that still have reconcile rounds left
pub fn retryable_failures(conn: &mut SqliteConnection, max_rounds: i32) -> Result<Vec<SyncQueueRow>, CourseError> {
    sync_queue::table
        .filter(sync_queue::status.eq(sync_status::FAILED))
        .filter(sync_queue::rounds.lt(max_rounds))
        .order(sync_queue::updated_at.asc())
        .select(SyncQueueRow::as_select())
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))
}

pub fn list_for_course(conn: &mut SqliteConnection, course_id: &str) -> Result<Vec<SyncQueueRow>, CourseError> {
    sync_queue::table
        .filter(sync_queue::course_id.eq(course_id))
        .order(sync_queue::version.asc())
        .select(SyncQueueRow::as_select())
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))
}

/// Settle every open entry of a course up to and including `version`.
///
/// Projection always uses the latest version, so one pass covers all older
/// queued versions as well.
pub fn settle_through(
    conn: &mut SqliteConnection,
    course_id: &str,
    version: i32,
    failed_ids: &[String],
    last_error: Option<&str>,
    now: &str,
) -> Result<usize, CourseError> {
    let status = if failed_ids.is_empty() {
        sync_status::DONE
    } else {
        sync_status::FAILED
    };
    let failed_ids_json = serde_json::to_string(failed_ids)?;

    diesel::update(
        sync_queue::table
            .filter(sync_queue::course_id.eq(course_id))
            .filter(sync_queue::version.le(version))
            .filter(sync_queue::status.ne(sync_status::DONE)),
    )
    .set((
        sync_queue::status.eq(status),
        sync_queue::rounds.eq(sync_queue::rounds + 1),
        sync_queue::failed_ids_json.eq(&failed_ids_json),
        sync_queue::last_error.eq(last_error),
        sync_queue::updated_at.eq(now),
    ))
    .execute(conn)
    .map_err(|e| CourseError::Internal(format!("Sync queue update failed: {}", e)))
}

pub fn delete_for_course(conn: &mut SqliteConnection, course_id: &str) -> Result<usize, CourseError> {
    diesel::delete(sync_queue::table.filter(sync_queue::course_id.eq(course_id)))
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Sync queue delete failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::courses::tests::setup_test_db;
    use crate::db::models::current_timestamp;

    #[test]
    fn test_settle_covers_older_versions() {
        let mut conn = setup_test_db();
        let now = current_timestamp();

        enqueue(&mut conn, "c1", 1, &now).unwrap();
        enqueue(&mut conn, "c1", 2, &now).unwrap();
        enqueue(&mut conn, "c1", 3, &now).unwrap();
        assert_eq!(pending_course_ids(&mut conn).unwrap(), vec!["c1".to_string()]);

        assert_eq!(settle_through(&mut conn, "c1", 2, &[], None, &now).unwrap(), 2);

        let rows = list_for_course(&mut conn, "c1").unwrap();
        assert_eq!(rows[0].status, sync_status::DONE);
        assert_eq!(rows[1].status, sync_status::DONE);
        assert_eq!(rows[2].status, sync_status::PENDING);
    }

    #[test]
    fn test_failed_entries_are_retryable_until_budget_spent() {
        let mut conn = setup_test_db();
        let now = current_timestamp();
        enqueue(&mut conn, "c1", 1, &now).unwrap();

        let failed = vec!["e1".to_string()];
        settle_through(&mut conn, "c1", 1, &failed, Some("locked"), &now).unwrap();

        let retryable = retryable_failures(&mut conn, 2).unwrap();
        assert_eq!(retryable.len(), 1);
        assert_eq!(retryable[0].failed_ids().unwrap(), failed);

        settle_through(&mut conn, "c1", 1, &failed, Some("locked"), &now).unwrap();
        assert!(retryable_failures(&mut conn, 2).unwrap().is_empty());

        assert_eq!(delete_for_course(&mut conn, "c1").unwrap(), 1);
    }
}
