//! Progress service - enrollments and learner progress
//!
//! Each operation runs in one immediate transaction. Progress is recorded as
//! an append-only fact and then OR-merged into the enrollment's progress map,
//! so a lesson that has been completed stays completed no matter what is
//! reported afterwards, and replaying a report changes nothing.

use std::sync::Arc;

use chrono::Utc;
use diesel::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::db::models::{current_timestamp, flag, EnrollmentRow, NewEnrollment, NewProgressFact};
use crate::db::{courses, enrollments, lessons, progress, CourseDb};
use crate::error::CourseError;
use crate::lessons::{completion_threshold, LessonId};
use crate::model::{snapshot_of, CompletionSummary, Course, Enrollment, ProgressFact};

use super::access_gate::access_decision;
use super::events::{CourseEvent, EventBus};

pub struct ProgressService {
    db: Arc<CourseDb>,
    events: Arc<EventBus>,
    completion_ratio: f64,
}

impl ProgressService {
    pub fn new(db: Arc<CourseDb>, events: Arc<EventBus>, config: &Config) -> Self {
        Self {
            db,
            events,
            completion_ratio: config.completion_ratio,
        }
    }

    // =========================================================================
    // Enrollment
    // =========================================================================

    pub fn enroll(&self, user_id: &str, course_id: &str) -> Result<Enrollment, CourseError> {
        if user_id.trim().is_empty() {
            return Err(CourseError::InvalidInput("user_id is required".into()));
        }

        let id = Uuid::new_v4().to_string();
        let now = current_timestamp();

        let enrollment = self.db.write(|conn| {
            let course = courses::require_course(conn, course_id)?;
            if course.is_owned_by(user_id) {
                return Err(CourseError::SelfEnrollmentForbidden);
            }
            access_decision(&course, Utc::now()).into_result(course_id)?;

            let snapshot_json = serde_json::to_string(&snapshot_of(&course.lessons))?;
            enrollments::insert_enrollment(
                conn,
                &NewEnrollment {
                    id: &id,
                    user_id,
                    course_id,
                    snapshot_json: &snapshot_json,
                    snapshot_version: course.current_version,
                    enrolled_at: &now,
                    last_updated: &now,
                },
            )?;

            enrollments::get_enrollment(conn, user_id, course_id)?
                .ok_or_else(|| CourseError::Internal(format!("enrollment {} vanished after insert", id)))
        })?;

        info!(course = %course_id, user = %user_id, "Learner enrolled");
        self.events.emit(CourseEvent::Enrolled {
            course_id: course_id.to_string(),
            user_id: user_id.to_string(),
        });

        Ok(enrollment)
    }

    /// Remove an enrollment and its progress map. Facts stay until purge.
    pub fn unenroll(&self, user_id: &str, course_id: &str) -> Result<(), CourseError> {
        self.db.write(|conn| {
            let row = require_enrollment_row(conn, user_id, course_id)?;
            enrollments::delete_enrollment(conn, &row.id)
        })?;

        info!(course = %course_id, user = %user_id, "Learner unenrolled");
        self.events.emit(CourseEvent::Unenrolled {
            course_id: course_id.to_string(),
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    pub fn get_enrollment(&self, user_id: &str, course_id: &str) -> Result<Enrollment, CourseError> {
        self.db.with_conn(|conn| {
            enrollments::get_enrollment(conn, user_id, course_id)?.ok_or_else(|| not_enrolled(user_id, course_id))
        })
    }

    pub fn list_enrollments_for_course(&self, course_id: &str) -> Result<Vec<Enrollment>, CourseError> {
        self.db
            .with_conn(|conn| enrollments::list_for_course(conn, course_id))
    }

    pub fn enrollment_count(&self, course_id: &str) -> Result<i64, CourseError> {
        self.db
            .with_conn(|conn| enrollments::count_for_course(conn, course_id))
    }

    // =========================================================================
    // Progress
    // =========================================================================

    /// Record watch time against a lesson, returning whether this report
    /// alone reached the completion threshold. The stored progress entry is
    /// OR-merged and never goes back to false.
    ///
    /// The threshold comes from the lesson's current duration, or its last
    /// known duration if the lesson has since been removed from the course.
    pub fn record_progress(
        &self,
        user_id: &str,
        course_id: &str,
        lesson_id: &str,
        watch_seconds: u32,
    ) -> Result<bool, CourseError> {
        self.record(user_id, course_id, lesson_id, watch_seconds, None)
    }

    /// Same as `record_progress` with a caller-supplied threshold
    pub fn record_progress_with_threshold(
        &self,
        user_id: &str,
        course_id: &str,
        lesson_id: &str,
        watch_seconds: u32,
        completed_threshold: u32,
    ) -> Result<bool, CourseError> {
        self.record(user_id, course_id, lesson_id, watch_seconds, Some(completed_threshold))
    }

    fn record(
        &self,
        user_id: &str,
        course_id: &str,
        lesson_id: &str,
        watch_seconds: u32,
        threshold: Option<u32>,
    ) -> Result<bool, CourseError> {
        let lesson_id = LessonId::parse(lesson_id)?;
        let ratio = self.completion_ratio;
        let fact_id = Uuid::new_v4().to_string();
        let now = current_timestamp();

        let completed = self.db.write(|conn| {
            let course = courses::require_course(conn, course_id)?;
            access_decision(&course, Utc::now()).into_result(course_id)?;
            let enrollment = require_enrollment_row(conn, user_id, course_id)?;

            let duration = lesson_duration(conn, &course, &lesson_id)?;
            let threshold = threshold.unwrap_or_else(|| completion_threshold(duration, ratio));
            let completed = watch_seconds >= threshold;

            progress::append_fact(
                conn,
                &NewProgressFact {
                    id: &fact_id,
                    user_id,
                    course_id,
                    lesson_id: lesson_id.as_str(),
                    watch_seconds: i32::try_from(watch_seconds).unwrap_or(i32::MAX),
                    completed: flag(completed),
                    recorded_at: &now,
                },
            )?;
            let merged = progress::merge_completion(conn, &enrollment.id, &lesson_id, completed, &now)?;
            enrollments::touch(conn, &enrollment.id, &now)?;

            debug!(
                course = %course_id,
                user = %user_id,
                lesson = %lesson_id,
                watch_seconds,
                threshold,
                completed,
                merged,
                "Progress fact recorded"
            );
            Ok(completed)
        })?;

        self.events.emit(CourseEvent::ProgressRecorded {
            course_id: course_id.to_string(),
            user_id: user_id.to_string(),
            lesson_id: lesson_id.to_string(),
            completed,
        });

        Ok(completed)
    }

    pub fn list_progress_facts(&self, user_id: &str, course_id: &str) -> Result<Vec<ProgressFact>, CourseError> {
        self.db
            .with_conn(|conn| progress::list_facts(conn, user_id, course_id))
    }

    /// Completion against the course's current lesson set
    pub fn completion_summary(&self, user_id: &str, course_id: &str) -> Result<CompletionSummary, CourseError> {
        self.db.with_conn(|conn| {
            let course = courses::require_course(conn, course_id)?;
            let enrollment =
                enrollments::get_enrollment(conn, user_id, course_id)?.ok_or_else(|| not_enrolled(user_id, course_id))?;
            Ok(CompletionSummary::compute(&course, &enrollment))
        })
    }
}

fn not_enrolled(user_id: &str, course_id: &str) -> CourseError {
    CourseError::NotEnrolled {
        user_id: user_id.to_string(),
        course_id: course_id.to_string(),
    }
}

fn require_enrollment_row(
    conn: &mut SqliteConnection,
    user_id: &str,
    course_id: &str,
) -> Result<EnrollmentRow, CourseError> {
    enrollments::find_enrollment_row(conn, user_id, course_id)?.ok_or_else(|| not_enrolled(user_id, course_id))
}

/// Duration of a lesson this course has owned at some version.
///
/// Ids the course never registered are rejected, so progress keys can only
/// ever name real lessons of the course.
fn lesson_duration(conn: &mut SqliteConnection, course: &Course, lesson_id: &LessonId) -> Result<u32, CourseError> {
    if let Some(lesson) = course.lesson(lesson_id) {
        return Ok(lesson.duration_seconds);
    }

    match lessons::get_registration(conn, lesson_id)? {
        Some(row) if row.course_id == course.id => u32::try_from(row.last_duration_seconds).map_err(|_| {
            CourseError::Internal(format!(
                "lesson {} has invalid stored duration {}",
                lesson_id, row.last_duration_seconds
            ))
        }),
        _ => Err(CourseError::NotFound(format!(
            "lesson {} in course {}",
            lesson_id, course.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lessons::LessonDraft;
    use crate::model::UpdateType;
    use crate::services::projector::create_sync_channel;
    use crate::services::version_service::VersionService;

    struct Fixture {
        versions: VersionService,
        progress: ProgressService,
        course_id: String,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(CourseDb::open_in_memory().unwrap());
        let events = Arc::new(EventBus::new());
        let config = Config::default();
        let (notifier, _requests) = create_sync_channel();

        let versions = VersionService::new(db.clone(), events.clone(), notifier, &config);
        let progress = ProgressService::new(db, events, &config);

        let course = versions.create_course("instructor", "Rust 101", None).unwrap();
        versions
            .create_version(
                &course.id,
                "instructor",
                vec![LessonDraft::new("Intro", 300), LessonDraft::new("Traits", 100)],
                "Initial lessons",
                UpdateType::Major,
            )
            .unwrap();

        Fixture {
            versions,
            progress,
            course_id: course.id,
        }
    }

    #[test]
    fn test_owner_cannot_enroll() {
        let f = fixture();
        let err = f.progress.enroll("instructor", &f.course_id).unwrap_err();
        assert!(matches!(err, CourseError::SelfEnrollmentForbidden));
    }

    #[test]
    fn test_enroll_once() {
        let f = fixture();
        let enrollment = f.progress.enroll("learner", &f.course_id).unwrap();
        assert_eq!(enrollment.snapshot_version, 1);
        assert_eq!(enrollment.course_data_snapshot.len(), 2);
        assert!(enrollment.progress.is_empty());

        let err = f.progress.enroll("learner", &f.course_id).unwrap_err();
        assert!(matches!(err, CourseError::AlreadyEnrolled { .. }));
        assert_eq!(f.progress.enrollment_count(&f.course_id).unwrap(), 1);
    }

    #[test]
    fn test_threshold_from_duration() {
        let f = fixture();
        f.progress.enroll("learner", &f.course_id).unwrap();
        let intro = f.versions.get_course(&f.course_id).unwrap().lessons[0].id.clone();

        // ceil(300 * 0.9) = 270
        assert!(!f
            .progress
            .record_progress("learner", &f.course_id, intro.as_str(), 269)
            .unwrap());
        assert!(f
            .progress
            .record_progress("learner", &f.course_id, intro.as_str(), 270)
            .unwrap());
        assert_eq!(f.progress.list_progress_facts("learner", &f.course_id).unwrap().len(), 2);
    }

    #[test]
    fn test_short_report_after_completion_returns_its_own_result() {
        let f = fixture();
        f.progress.enroll("learner", &f.course_id).unwrap();
        let intro = f.versions.get_course(&f.course_id).unwrap().lessons[0].id.clone();

        assert!(f
            .progress
            .record_progress_with_threshold("learner", &f.course_id, intro.as_str(), 600, 540)
            .unwrap());
        assert!(!f
            .progress
            .record_progress_with_threshold("learner", &f.course_id, intro.as_str(), 0, 540)
            .unwrap());

        // The stored entry stays completed
        let enrollment = f.progress.get_enrollment("learner", &f.course_id).unwrap();
        assert_eq!(enrollment.progress.get(&intro), Some(&true));

        let facts = f.progress.list_progress_facts("learner", &f.course_id).unwrap();
        assert_eq!(facts.len(), 2);
        assert!(facts.iter().any(|fact| fact.completed && fact.watch_seconds == 600));
        assert!(facts.iter().any(|fact| !fact.completed && fact.watch_seconds == 0));
    }

    #[test]
    fn test_retired_lesson_keeps_its_threshold() {
        let f = fixture();
        f.progress.enroll("learner", &f.course_id).unwrap();
        let course = f.versions.get_course(&f.course_id).unwrap();
        let intro = course.lessons[0].id.clone();

        // Drop Intro, keep Traits
        f.versions
            .create_version(
                &f.course_id,
                "instructor",
                vec![LessonDraft::existing(&course.lessons[1])],
                "Remove intro",
                UpdateType::Minor,
            )
            .unwrap();

        // Last known duration is 300s, so the threshold is still 270
        assert!(!f
            .progress
            .record_progress("learner", &f.course_id, intro.as_str(), 0)
            .unwrap());
        assert!(f
            .progress
            .record_progress("learner", &f.course_id, intro.as_str(), 270)
            .unwrap());
    }

    #[test]
    fn test_record_requires_enrollment_and_known_lesson() {
        let f = fixture();
        let intro = f.versions.get_course(&f.course_id).unwrap().lessons[0].id.clone();

        let err = f
            .progress
            .record_progress("learner", &f.course_id, intro.as_str(), 10)
            .unwrap_err();
        assert!(matches!(err, CourseError::NotEnrolled { .. }));

        f.progress.enroll("learner", &f.course_id).unwrap();
        let stranger = crate::lessons::assign_id();
        let err = f
            .progress
            .record_progress("learner", &f.course_id, stranger.as_str(), 10)
            .unwrap_err();
        assert!(matches!(err, CourseError::NotFound(_)));

        let err = f
            .progress
            .record_progress("learner", &f.course_id, "not-a-uuid", 10)
            .unwrap_err();
        assert!(matches!(err, CourseError::InvalidInput(_)));
    }

    #[test]
    fn test_unenroll_clears_progress() {
        let f = fixture();
        f.progress.enroll("learner", &f.course_id).unwrap();
        let intro = f.versions.get_course(&f.course_id).unwrap().lessons[0].id.clone();
        f.progress
            .record_progress_with_threshold("learner", &f.course_id, intro.as_str(), 5, 1)
            .unwrap();

        f.progress.unenroll("learner", &f.course_id).unwrap();
        assert_eq!(f.progress.enrollment_count(&f.course_id).unwrap(), 0);
        assert!(matches!(
            f.progress.unenroll("learner", &f.course_id),
            Err(CourseError::NotEnrolled { .. })
        ));

        // Re-enrolling starts from a clean progress map
        let enrollment = f.progress.enroll("learner", &f.course_id).unwrap();
        assert!(enrollment.progress.is_empty());
    }
}
