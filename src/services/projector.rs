//! Enrollment projector
//!
//! Keeps the denormalized lesson metadata on every enrollment in step with a
//! course's latest version. Fan-out runs on a bounded pool: a semaphore caps
//! the number of in-flight snapshot writes, and each write gets its own retry
//! budget. Writes only ever touch the snapshot columns, never progress.
//!
//! Work arrives through the durable `sync_queue`:
//!
//! ```text
//! CreateVersion ──(same txn)──► sync_queue row ──notify──► projector worker
//!                                     ▲                          │
//!                                     └──── settle done/failed ◄─┘
//! ```
//!
//! On startup the worker recovers any pending rows, and a reconcile tick
//! retries failed rows until their round budget is spent.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::ProjectorConfig;
use crate::db::models::current_timestamp;
use crate::db::{courses, enrollments, sync_queue, CourseDb};
use crate::error::CourseError;
use crate::lessons::Lesson;
use crate::model::{snapshot_of, CourseSnapshot};

use super::events::{CourseEvent, EventBus};

/// Where projected snapshots are written
pub trait SnapshotTarget: Send + Sync + 'static {
    /// Every enrollment that references the course
    fn list_enrollment_ids(&self, course_id: &str) -> Result<Vec<String>, CourseError>;

    /// Overwrite one enrollment's snapshot with the metadata of `version`
    fn write_snapshot(
        &self,
        enrollment_id: &str,
        snapshot: &CourseSnapshot,
        version: i32,
    ) -> Result<(), CourseError>;
}

/// Snapshot target backed by the `enrollments` table
pub struct DbSnapshotTarget {
    db: Arc<CourseDb>,
}

impl DbSnapshotTarget {
    pub fn new(db: Arc<CourseDb>) -> Self {
        Self { db }
    }
}

impl SnapshotTarget for DbSnapshotTarget {
    fn list_enrollment_ids(&self, course_id: &str) -> Result<Vec<String>, CourseError> {
        self.db
            .with_conn(|conn| enrollments::list_enrollment_ids(conn, course_id))
    }

    fn write_snapshot(
        &self,
        enrollment_id: &str,
        snapshot: &CourseSnapshot,
        version: i32,
    ) -> Result<(), CourseError> {
        let snapshot_json = serde_json::to_string(snapshot)?;
        let now = current_timestamp();

        let written = self.db.write(|conn| {
            enrollments::write_snapshot(conn, enrollment_id, &snapshot_json, version, &now)
        })?;

        if !written {
            // Newer snapshot already in place, or the learner unenrolled
            debug!(enrollment = %enrollment_id, version, "Snapshot write skipped");
        }
        Ok(())
    }
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub course_id: String,
    pub version: i32,
    pub succeeded: usize,
    /// Enrollments whose retry budget ran out
    pub failed_enrollment_ids: Vec<String>,
    pub last_error: Option<String>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed_enrollment_ids.is_empty()
    }
}

/// Request for the projector worker to project a course's latest version
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub course_id: String,
}

pub type SyncReceiver = mpsc::UnboundedReceiver<SyncRequest>;

/// Wakes the projector worker after a version commits
#[derive(Clone)]
pub struct SyncNotifier {
    tx: mpsc::UnboundedSender<SyncRequest>,
}

impl SyncNotifier {
    pub fn notify(&self, course_id: &str) {
        let request = SyncRequest {
            course_id: course_id.to_string(),
        };
        if self.tx.send(request).is_err() {
            // The queue row stays pending and is recovered on next start
            debug!(course = %course_id, "Projector worker not running, sync left queued");
        }
    }
}

/// Create the notification channel between version writes and the worker
pub fn create_sync_channel() -> (SyncNotifier, SyncReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SyncNotifier { tx }, rx)
}

async fn run_blocking<F, T>(f: F) -> Result<T, CourseError>
where
    F: FnOnce() -> Result<T, CourseError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CourseError::Internal(format!("Blocking task failed: {}", e)))?
}

pub struct EnrollmentProjector {
    db: Arc<CourseDb>,
    target: Arc<dyn SnapshotTarget>,
    events: Arc<EventBus>,
    config: ProjectorConfig,
}

impl EnrollmentProjector {
    pub fn new(db: Arc<CourseDb>, events: Arc<EventBus>, config: ProjectorConfig) -> Self {
        let target = Arc::new(DbSnapshotTarget::new(db.clone()));
        Self::with_target(db, target, events, config)
    }

    /// Projector writing to a custom target (queue bookkeeping still uses `db`)
    pub fn with_target(
        db: Arc<CourseDb>,
        target: Arc<dyn SnapshotTarget>,
        events: Arc<EventBus>,
        config: ProjectorConfig,
    ) -> Self {
        Self {
            db,
            target,
            events,
            config,
        }
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    /// Project `lessons` onto every enrollment of the course.
    ///
    /// Individual failures do not stop the others; they come back in the
    /// report once their attempts are used up.
    pub async fn sync_enrollments(
        &self,
        course_id: &str,
        lessons: &[Lesson],
        version: i32,
    ) -> Result<SyncReport, CourseError> {
        let target = self.target.clone();
        let cid = course_id.to_string();
        let ids = run_blocking(move || target.list_enrollment_ids(&cid)).await?;

        self.sync_subset(course_id, ids, lessons, version).await
    }

    /// Project onto a given set of enrollments only
    pub async fn sync_subset(
        &self,
        course_id: &str,
        enrollment_ids: Vec<String>,
        lessons: &[Lesson],
        version: i32,
    ) -> Result<SyncReport, CourseError> {
        let snapshot = Arc::new(snapshot_of(lessons));
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let max_attempts = self.config.max_attempts.max(1);
        let backoff = self.config.retry_backoff();

        debug!(
            course = %course_id,
            version,
            enrollments = enrollment_ids.len(),
            "Projecting course snapshot"
        );

        let mut tasks = JoinSet::new();
        for enrollment_id in enrollment_ids {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| CourseError::Internal(format!("Projector semaphore closed: {}", e)))?;
            let target = self.target.clone();
            let snapshot = snapshot.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let mut attempt = 1;
                loop {
                    let (t, s, id) = (target.clone(), snapshot.clone(), enrollment_id.clone());
                    let result = run_blocking(move || t.write_snapshot(&id, &s, version)).await;

                    match result {
                        Ok(()) => return Ok(enrollment_id),
                        Err(e) if attempt < max_attempts => {
                            warn!(enrollment = %enrollment_id, attempt, error = %e, "Snapshot write failed, retrying");
                            tokio::time::sleep(backoff * attempt).await;
                            attempt += 1;
                        }
                        Err(e) => return Err((enrollment_id, e.to_string())),
                    }
                }
            });
        }

        let mut report = SyncReport {
            course_id: course_id.to_string(),
            version,
            ..Default::default()
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => report.succeeded += 1,
                Ok(Err((enrollment_id, message))) => {
                    report.failed_enrollment_ids.push(enrollment_id);
                    report.last_error = Some(message);
                }
                Err(e) => {
                    return Err(CourseError::Internal(format!("Projector task panicked: {}", e)));
                }
            }
        }
        report.failed_enrollment_ids.sort();

        Ok(report)
    }

    // =========================================================================
    // Queue processing
    // =========================================================================

    /// Project the course's current version and settle its queue rows.
    ///
    /// Returns None when the course no longer exists.
    pub async fn project_latest(&self, course_id: &str) -> Result<Option<SyncReport>, CourseError> {
        let db = self.db.clone();
        let cid = course_id.to_string();
        let course = run_blocking(move || db.with_conn(|conn| courses::get_course(conn, &cid))).await?;

        let Some(course) = course else {
            debug!(course = %course_id, "Course gone, nothing to project");
            return Ok(None);
        };

        let report = self
            .sync_enrollments(&course.id, &course.lessons, course.current_version)
            .await?;
        self.settle(&report).await?;

        Ok(Some(report))
    }

    /// Pick up every pending row (used on startup)
    pub async fn recover_pending(&self) -> Result<usize, CourseError> {
        let db = self.db.clone();
        let course_ids = run_blocking(move || db.with_conn(sync_queue::pending_course_ids)).await?;

        for course_id in &course_ids {
            if let Err(e) = self.project_latest(course_id).await {
                error!(course = %course_id, error = %e, "Recovering queued sync failed");
            }
        }
        Ok(course_ids.len())
    }

    /// Retry failed rows that still have rounds left
    pub async fn reconcile_failed(&self) -> Result<usize, CourseError> {
        let db = self.db.clone();
        let max_rounds = self.config.max_reconcile_rounds;
        let rows = run_blocking(move || {
            db.with_conn(|conn| sync_queue::retryable_failures(conn, max_rounds))
        })
        .await?;

        let mut seen = HashSet::new();
        let mut reconciled = 0;

        for row in rows {
            if !seen.insert(row.course_id.clone()) {
                continue;
            }

            let db = self.db.clone();
            let cid = row.course_id.clone();
            let course = run_blocking(move || db.with_conn(|conn| courses::get_course(conn, &cid))).await?;
            let Some(course) = course else {
                continue;
            };

            let report = if course.current_version > row.version {
                // A newer version supersedes the failed one; project it for everyone
                self.sync_enrollments(&course.id, &course.lessons, course.current_version)
                    .await?
            } else {
                self.sync_subset(&course.id, row.failed_ids()?, &course.lessons, row.version)
                    .await?
            };
            self.settle(&report).await?;
            reconciled += 1;
        }

        Ok(reconciled)
    }

    async fn settle(&self, report: &SyncReport) -> Result<(), CourseError> {
        let db = self.db.clone();
        let settled = report.clone();
        let now = current_timestamp();

        run_blocking(move || {
            db.write(|conn| {
                sync_queue::settle_through(
                    conn,
                    &settled.course_id,
                    settled.version,
                    &settled.failed_enrollment_ids,
                    settled.last_error.as_deref(),
                    &now,
                )
            })
        })
        .await?;

        self.events.emit(CourseEvent::EnrollmentsSynced {
            course_id: report.course_id.clone(),
            version: report.version,
            succeeded: report.succeeded,
            failed: report.failed_enrollment_ids.len(),
        });
        Ok(())
    }
}

/// Spawn the background worker that drains sync notifications
pub fn spawn_projector_worker(
    projector: Arc<EnrollmentProjector>,
    mut requests: SyncReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match projector.recover_pending().await {
            Ok(0) => {}
            Ok(n) => info!(courses = n, "Recovered queued enrollment syncs"),
            Err(e) => error!(error = %e, "Failed to recover queued enrollment syncs"),
        }

        let mut reconcile = tokio::time::interval(projector.config().reconcile_interval());
        // First tick completes immediately; recovery already covered it
        reconcile.tick().await;

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => {
                        if let Err(e) = projector.project_latest(&request.course_id).await {
                            error!(course = %request.course_id, error = %e, "Enrollment sync failed");
                        }
                    }
                    None => {
                        info!("Sync channel closed, projector worker stopping");
                        break;
                    }
                },
                _ = reconcile.tick() => {
                    match projector.reconcile_failed().await {
                        Ok(0) => {}
                        Ok(n) => info!(courses = n, "Reconciled failed enrollment syncs"),
                        Err(e) => error!(error = %e, "Reconcile pass failed"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::db::models::sync_status;
    use crate::lessons::assign_id;

    /// In-memory target that fails a given enrollment a fixed number of times
    struct FlakyTarget {
        ids: Vec<String>,
        failures_left: Mutex<HashMap<String, u32>>,
        written: Mutex<HashMap<String, i32>>,
    }

    impl FlakyTarget {
        fn new(ids: &[&str], failures: &[(&str, u32)]) -> Self {
            Self {
                ids: ids.iter().map(|s| s.to_string()).collect(),
                failures_left: Mutex::new(failures.iter().map(|(id, n)| (id.to_string(), *n)).collect()),
                written: Mutex::new(HashMap::new()),
            }
        }
    }

    impl SnapshotTarget for FlakyTarget {
        fn list_enrollment_ids(&self, _course_id: &str) -> Result<Vec<String>, CourseError> {
            Ok(self.ids.clone())
        }

        fn write_snapshot(&self, id: &str, _snapshot: &CourseSnapshot, version: i32) -> Result<(), CourseError> {
            let mut failures = self.failures_left.lock().unwrap();
            if let Some(left) = failures.get_mut(id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(CourseError::Internal("database is locked".into()));
                }
            }
            self.written.lock().unwrap().insert(id.to_string(), version);
            Ok(())
        }
    }

    fn lessons() -> Vec<Lesson> {
        vec![Lesson {
            id: assign_id(),
            title: "Intro".into(),
            description: String::new(),
            media_ref: None,
            duration_seconds: 300,
            preview_enabled: true,
        }]
    }

    fn projector(target: Arc<FlakyTarget>) -> EnrollmentProjector {
        let db = Arc::new(CourseDb::open_in_memory().unwrap());
        let config = ProjectorConfig {
            max_parallel: 2,
            max_attempts: 3,
            retry_backoff_ms: 1,
            ..Default::default()
        };
        EnrollmentProjector::with_target(db, target, Arc::new(EventBus::new()), config)
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let target = Arc::new(FlakyTarget::new(&["e1", "e2", "e3"], &[("e2", 2)]));
        let projector = projector(target.clone());

        let report = projector.sync_enrollments("c1", &lessons(), 4).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.succeeded, 3);
        assert_eq!(target.written.lock().unwrap().get("e2"), Some(&4));
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_reported_not_raised() {
        let target = Arc::new(FlakyTarget::new(&["e1", "e2", "e3"], &[("e3", 10)]));
        let projector = projector(target.clone());

        let report = projector.sync_enrollments("c1", &lessons(), 2).await.unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed_enrollment_ids, vec!["e3".to_string()]);
        assert!(report.last_error.unwrap().contains("locked"));
        assert!(!target.written.lock().unwrap().contains_key("e3"));
    }

    /// Course c1 at version 0 with one pending queue row
    fn queued_course_db() -> Arc<CourseDb> {
        let db = Arc::new(CourseDb::open_in_memory().unwrap());
        {
            let mut conn = db.conn().unwrap();
            crate::db::courses::tests::insert_test_course(&mut conn, "c1", "instructor");
            sync_queue::enqueue(&mut conn, "c1", 0, &current_timestamp()).unwrap();
        }
        db
    }

    fn reconcile_config() -> ProjectorConfig {
        ProjectorConfig {
            max_parallel: 2,
            max_attempts: 1,
            retry_backoff_ms: 1,
            max_reconcile_rounds: 3,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_reconcile_gives_up_after_round_budget() {
        let db = queued_course_db();
        let target = Arc::new(FlakyTarget::new(&["e1", "e2"], &[("e2", u32::MAX)]));
        let projector = EnrollmentProjector::with_target(db.clone(), target, Arc::new(EventBus::new()), reconcile_config());

        let report = projector.project_latest("c1").await.unwrap().unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed_enrollment_ids, vec!["e2".to_string()]);

        // Rounds two and three, then the budget is spent
        assert_eq!(projector.reconcile_failed().await.unwrap(), 1);
        assert_eq!(projector.reconcile_failed().await.unwrap(), 1);
        assert_eq!(projector.reconcile_failed().await.unwrap(), 0);

        let rows = db.with_conn(|conn| sync_queue::list_for_course(conn, "c1")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, sync_status::FAILED);
        assert_eq!(rows[0].rounds, 3);
        assert_eq!(rows[0].failed_ids().unwrap(), vec!["e2".to_string()]);
        assert!(rows[0].last_error.as_deref().unwrap().contains("locked"));
    }

    #[tokio::test]
    async fn test_reconcile_settles_once_target_recovers() {
        let db = queued_course_db();
        let target = Arc::new(FlakyTarget::new(&["e1", "e2"], &[("e2", 2)]));
        let projector =
            EnrollmentProjector::with_target(db.clone(), target.clone(), Arc::new(EventBus::new()), reconcile_config());

        projector.project_latest("c1").await.unwrap();
        assert_eq!(projector.reconcile_failed().await.unwrap(), 1);
        assert_eq!(projector.reconcile_failed().await.unwrap(), 1);

        let rows = db.with_conn(|conn| sync_queue::list_for_course(conn, "c1")).unwrap();
        assert_eq!(rows[0].status, sync_status::DONE);
        assert!(rows[0].failed_ids().unwrap().is_empty());
        assert_eq!(target.written.lock().unwrap().get("e2"), Some(&0));

        // Nothing left to reconcile
        assert_eq!(projector.reconcile_failed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_notifier_without_worker_does_not_fail() {
        let (notifier, rx) = create_sync_channel();
        drop(rx);
        notifier.notify("c1");
    }
}
