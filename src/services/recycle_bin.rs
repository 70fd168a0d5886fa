//! Recycle bin - soft delete, restore, and guarded permanent deletion
//!
//! A soft-deleted course stays restorable by its owner for the retention
//! period. After that the sweep purges it, unless learners are still
//! enrolled: a course with enrollments is never permanently deleted, by the
//! owner or by the sweep.
//!
//! Purge removes child records before the course row, versions first, all in
//! one transaction. The sweep re-reads the course inside that transaction, so
//! a restore that commits first always wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::db::models::format_timestamp;
use crate::db::{courses, enrollments, lessons, progress, sync_queue, versions, CourseDb};
use crate::error::CourseError;
use crate::model::Course;

use super::events::{CourseEvent, EventBus};

/// A course in its owner's recycle bin
#[derive(Debug, Clone, Serialize)]
pub struct RecycleBinEntry {
    pub course_id: String,
    pub title: String,
    pub deleted_at: DateTime<Utc>,
    pub days_remaining: i64,
}

/// Outcome of one retention sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub purged: Vec<String>,
    /// Expired courses kept because learners are still enrolled
    pub blocked: Vec<String>,
}

/// What the sweep did with one candidate course
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Deleted, with the number of versions removed
    Purged(usize),
    /// Expired but still has this many enrollments
    Blocked(i64),
    /// Restored, already gone, or not expired yet
    Skipped,
}

pub struct RecycleBin {
    db: Arc<CourseDb>,
    events: Arc<EventBus>,
    retention_days: i64,
}

impl RecycleBin {
    pub fn new(db: Arc<CourseDb>, events: Arc<EventBus>, retention_days: i64) -> Self {
        Self {
            db,
            events,
            retention_days,
        }
    }

    /// Whole days left before a course deleted at `deleted_at` expires
    pub fn days_remaining(&self, deleted_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        let days_since = (now - deleted_at).num_days();
        (self.retention_days - days_since).max(0).min(self.retention_days)
    }

    // =========================================================================
    // Soft delete / restore
    // =========================================================================

    pub fn soft_delete(&self, course_id: &str, actor_id: &str) -> Result<(), CourseError> {
        self.soft_delete_at(course_id, actor_id, Utc::now())
    }

    /// Deleting an already deleted course is a no-op and keeps the original
    /// deletion time.
    pub fn soft_delete_at(&self, course_id: &str, actor_id: &str, now: DateTime<Utc>) -> Result<(), CourseError> {
        let deleted_at = format_timestamp(&now);

        let changed = self.db.write(|conn| {
            let course = courses::require_course(conn, course_id)?;
            require_owner(&course, actor_id, "delete")?;
            courses::mark_soft_deleted(conn, course_id, &deleted_at)
        })?;

        if changed {
            info!(course = %course_id, deleted_at = %deleted_at, "Course soft-deleted");
            self.events.emit(CourseEvent::CourseSoftDeleted {
                course_id: course_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn restore(&self, course_id: &str, actor_id: &str) -> Result<(), CourseError> {
        self.restore_at(course_id, actor_id, Utc::now())
    }

    pub fn restore_at(&self, course_id: &str, actor_id: &str, now: DateTime<Utc>) -> Result<(), CourseError> {
        let updated_at = format_timestamp(&now);

        self.db.write(|conn| {
            let course = courses::require_course(conn, course_id)?;
            require_owner(&course, actor_id, "restore")?;

            let deleted_at = match (course.soft_deleted, course.deleted_at) {
                (true, Some(deleted_at)) => deleted_at,
                _ => return Err(CourseError::NotDeleted(course_id.to_string())),
            };
            if self.days_remaining(deleted_at, now) == 0 {
                return Err(CourseError::RetentionExpired {
                    course_id: course_id.to_string(),
                    deleted_at: format_timestamp(&deleted_at),
                });
            }

            if !courses::clear_soft_deleted(conn, course_id, &updated_at)? {
                return Err(CourseError::NotDeleted(course_id.to_string()));
            }
            Ok(())
        })?;

        info!(course = %course_id, "Course restored from recycle bin");
        self.events.emit(CourseEvent::CourseRestored {
            course_id: course_id.to_string(),
        });
        Ok(())
    }

    /// Soft-deleted courses of one owner with their remaining days
    pub fn list_recycle_bin(&self, owner_id: &str, now: DateTime<Utc>) -> Result<Vec<RecycleBinEntry>, CourseError> {
        let deleted = self
            .db
            .with_conn(|conn| courses::list_deleted_for_owner(conn, owner_id))?;

        Ok(deleted
            .into_iter()
            .filter_map(|course| {
                let deleted_at = course.deleted_at?;
                Some(RecycleBinEntry {
                    days_remaining: self.days_remaining(deleted_at, now),
                    course_id: course.id,
                    title: course.title,
                    deleted_at,
                })
            })
            .collect())
    }

    // =========================================================================
    // Permanent deletion
    // =========================================================================

    /// Owner-initiated purge. Refused without any change while enrollments exist.
    pub fn permanent_delete(&self, course_id: &str, actor_id: &str) -> Result<(), CourseError> {
        let versions_removed = self.db.write(|conn| {
            let course = courses::require_course(conn, course_id)?;
            require_owner(&course, actor_id, "permanently delete")?;

            let count = enrollments::count_for_course(conn, course_id)?;
            if count > 0 {
                return Err(CourseError::HasActiveEnrollments {
                    course_id: course_id.to_string(),
                    count,
                });
            }
            if !course.soft_deleted {
                return Err(CourseError::NotDeleted(course_id.to_string()));
            }

            purge(conn, course_id)
        })?;

        self.emit_purged(course_id, versions_removed);
        Ok(())
    }

    /// Purge every course whose retention has run out as of `now`
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<SweepReport, CourseError> {
        let cutoff = format_timestamp(&(now - chrono::Duration::days(self.retention_days)));
        let candidates = self
            .db
            .with_conn(|conn| courses::list_expired_ids(conn, &cutoff))?;

        let mut report = SweepReport::default();

        for course_id in candidates {
            match self.purge_if_expired(&course_id, now) {
                Ok(SweepOutcome::Purged(_)) => report.purged.push(course_id),
                Ok(SweepOutcome::Blocked(count)) => {
                    warn!(course = %course_id, enrollments = count, "Expired course kept, learners still enrolled");
                    report.blocked.push(course_id);
                }
                Ok(SweepOutcome::Skipped) => {
                    debug!(course = %course_id, "Course no longer expired, skipping");
                }
                Err(e) => {
                    error!(course = %course_id, error = %e, "Failed to purge expired course");
                }
            }
        }

        Ok(report)
    }

    /// Purge one course if, read inside the deleting transaction, it is
    /// still soft-deleted, past retention and has no enrollments.
    pub fn purge_if_expired(&self, course_id: &str, now: DateTime<Utc>) -> Result<SweepOutcome, CourseError> {
        let outcome = self.db.write(|conn| {
            let Some(course) = courses::get_course(conn, course_id)? else {
                return Ok(SweepOutcome::Skipped);
            };
            let expired = course.soft_deleted
                && course
                    .deleted_at
                    .map(|deleted_at| self.days_remaining(deleted_at, now) == 0)
                    .unwrap_or(false);
            if !expired {
                return Ok(SweepOutcome::Skipped);
            }

            let count = enrollments::count_for_course(conn, course_id)?;
            if count > 0 {
                return Ok(SweepOutcome::Blocked(count));
            }
            purge(conn, course_id).map(SweepOutcome::Purged)
        })?;

        if let SweepOutcome::Purged(versions_removed) = outcome {
            self.emit_purged(course_id, versions_removed);
        }
        Ok(outcome)
    }

    fn emit_purged(&self, course_id: &str, versions_removed: usize) {
        info!(course = %course_id, versions = versions_removed, "Course permanently deleted");
        self.events.emit(CourseEvent::CoursePurged {
            course_id: course_id.to_string(),
            versions_removed,
        });
    }
}

fn require_owner(course: &Course, actor_id: &str, action: &str) -> Result<(), CourseError> {
    if course.is_owned_by(actor_id) {
        return Ok(());
    }
    Err(CourseError::Unauthorized(format!(
        "only the course owner can {} course {}",
        action, course.id
    )))
}

/// Delete a soft-deleted course and everything hanging off it.
///
/// Versions go first, the course row last; every step is safe to repeat.
fn purge(conn: &mut diesel::SqliteConnection, course_id: &str) -> Result<usize, CourseError> {
    let versions_removed = versions::delete_versions_for_course(conn, course_id)?;
    sync_queue::delete_for_course(conn, course_id)?;
    lessons::delete_for_course(conn, course_id)?;
    progress::delete_facts_for_course(conn, course_id)?;

    if !courses::delete_course(conn, course_id)? {
        return Err(CourseError::NotDeleted(course_id.to_string()));
    }

    debug!(course = %course_id, versions = versions_removed, "Course rows purged");
    Ok(versions_removed)
}

/// Spawn the periodic retention sweep
pub fn spawn_retention_sweeper(bin: Arc<RecycleBin>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            let bin = bin.clone();
            match tokio::task::spawn_blocking(move || bin.sweep_expired_at(Utc::now())).await {
                Ok(Ok(report)) if report.purged.is_empty() && report.blocked.is_empty() => {
                    debug!("Retention sweep found nothing to purge");
                }
                Ok(Ok(report)) => {
                    info!(purged = report.purged.len(), blocked = report.blocked.len(), "Retention sweep finished");
                }
                Ok(Err(e)) => error!(error = %e, "Retention sweep failed"),
                Err(e) => error!(error = %e, "Retention sweep task panicked"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::courses::tests::insert_test_course;
    use crate::db::enrollments::tests::insert_test_enrollment;
    use chrono::TimeZone;

    fn bin() -> (Arc<CourseDb>, RecycleBin) {
        let db = Arc::new(CourseDb::open_in_memory().unwrap());
        {
            let mut conn = db.conn().unwrap();
            insert_test_course(&mut conn, "c1", "instructor");
        }
        let bin = RecycleBin::new(db.clone(), Arc::new(EventBus::new()), 7);
        (db, bin)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_days_remaining() {
        let (_db, bin) = bin();
        let day = chrono::Duration::days(1);

        assert_eq!(bin.days_remaining(t0(), t0()), 7);
        assert_eq!(bin.days_remaining(t0(), t0() + day * 6), 1);
        assert_eq!(bin.days_remaining(t0(), t0() + day * 7), 0);
        assert_eq!(bin.days_remaining(t0(), t0() + day * 30), 0);
        // Clock skew never extends the window
        assert_eq!(bin.days_remaining(t0(), t0() - day), 7);
    }

    #[test]
    fn test_soft_delete_is_idempotent() {
        let (db, bin) = bin();
        bin.soft_delete_at("c1", "instructor", t0()).unwrap();
        bin.soft_delete_at("c1", "instructor", t0() + chrono::Duration::days(3)).unwrap();

        let course = db.with_conn(|conn| courses::require_course(conn, "c1")).unwrap();
        assert_eq!(course.deleted_at, Some(t0()));

        let entries = bin.list_recycle_bin("instructor", t0() + chrono::Duration::days(2)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].days_remaining, 5);
    }

    #[test]
    fn test_only_owner_manages_bin() {
        let (_db, bin) = bin();
        assert!(matches!(
            bin.soft_delete("c1", "student"),
            Err(CourseError::Unauthorized(_))
        ));
        bin.soft_delete("c1", "instructor").unwrap();
        assert!(matches!(bin.restore("c1", "student"), Err(CourseError::Unauthorized(_))));
        assert!(matches!(
            bin.permanent_delete("c1", "student"),
            Err(CourseError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_restore_requires_deleted() {
        let (_db, bin) = bin();
        assert!(matches!(bin.restore("c1", "instructor"), Err(CourseError::NotDeleted(_))));
        assert!(matches!(
            bin.permanent_delete("c1", "instructor"),
            Err(CourseError::NotDeleted(_))
        ));
    }

    #[test]
    fn test_sweep_blocks_enrolled_courses() {
        let (db, bin) = bin();
        {
            let mut conn = db.conn().unwrap();
            insert_test_course(&mut conn, "c2", "instructor");
            insert_test_enrollment(&mut conn, "e1", "learner", "c2");
        }
        bin.soft_delete_at("c1", "instructor", t0()).unwrap();
        bin.soft_delete_at("c2", "instructor", t0()).unwrap();

        let early = bin.sweep_expired_at(t0() + chrono::Duration::days(6)).unwrap();
        assert!(early.purged.is_empty() && early.blocked.is_empty());

        let report = bin.sweep_expired_at(t0() + chrono::Duration::days(8)).unwrap();
        assert_eq!(report.purged, vec!["c1".to_string()]);
        assert_eq!(report.blocked, vec!["c2".to_string()]);

        db.with_conn(|conn| {
            assert!(courses::get_course(conn, "c1")?.is_none());
            assert!(courses::get_course(conn, "c2")?.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_purge_skips_course_restored_after_listing() {
        let (db, bin) = bin();
        let day = chrono::Duration::days(1);
        bin.soft_delete_at("c1", "instructor", t0()).unwrap();

        // The sweep's candidate list still names c1 when the owner restores it
        let cutoff = format_timestamp(&(t0() + day));
        let candidates = db.with_conn(|conn| courses::list_expired_ids(conn, &cutoff)).unwrap();
        assert_eq!(candidates, vec!["c1".to_string()]);
        bin.restore_at("c1", "instructor", t0() + day * 6).unwrap();

        let outcome = bin.purge_if_expired("c1", t0() + day * 8).unwrap();
        assert_eq!(outcome, SweepOutcome::Skipped);
        let course = db.with_conn(|conn| courses::require_course(conn, "c1")).unwrap();
        assert!(!course.soft_deleted);

        // Same for a course that is already gone
        assert_eq!(bin.purge_if_expired("missing", t0()).unwrap(), SweepOutcome::Skipped);
    }

    #[test]
    fn test_purge_if_expired_purges_and_blocks() {
        let (db, bin) = bin();
        let day = chrono::Duration::days(1);
        {
            let mut conn = db.conn().unwrap();
            insert_test_course(&mut conn, "c2", "instructor");
            insert_test_enrollment(&mut conn, "e1", "learner", "c2");
        }
        bin.soft_delete_at("c1", "instructor", t0()).unwrap();
        bin.soft_delete_at("c2", "instructor", t0()).unwrap();

        assert_eq!(bin.purge_if_expired("c1", t0() + day * 6).unwrap(), SweepOutcome::Skipped);
        assert_eq!(bin.purge_if_expired("c2", t0() + day * 8).unwrap(), SweepOutcome::Blocked(1));
        assert_eq!(bin.purge_if_expired("c1", t0() + day * 8).unwrap(), SweepOutcome::Purged(0));
    }
}
