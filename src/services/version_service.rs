//! Version service - course creation and content versioning
//!
//! Every content edit produces an immutable `CourseVersion`. The course row's
//! `current_version` is advanced with a compare-and-set; a writer that read a
//! stale version gets `VersionConflict` and has to re-read before trying
//! again. The sync queue row for the enrollment projector is written in the
//! same transaction, so fan-out is never lost even if the process dies right
//! after the commit.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::models::{current_timestamp, parse_timestamp, NewCourse, NewCourseVersion};
use crate::db::{courses, lessons, sync_queue, versions, CourseDb};
use crate::error::CourseError;
use crate::lessons::{resolve_drafts, LessonDraft};
use crate::model::{Accessibility, Course, CourseVersion, HistoryEntry, UpdateType};

use super::events::{CourseEvent, EventBus};
use super::projector::SyncNotifier;

const MAX_COURSE_TITLE_LEN: usize = 500;

pub struct VersionService {
    db: Arc<CourseDb>,
    events: Arc<EventBus>,
    notifier: SyncNotifier,
    max_retries: u32,
    history_limit: usize,
}

impl VersionService {
    pub fn new(db: Arc<CourseDb>, events: Arc<EventBus>, notifier: SyncNotifier, config: &Config) -> Self {
        Self {
            db,
            events,
            notifier,
            max_retries: config.max_version_retries,
            history_limit: config.history_summary_limit,
        }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get a course by ID. Soft-deleted courses are still returned.
    pub fn get_course(&self, course_id: &str) -> Result<Course, CourseError> {
        self.db.with_conn(|conn| courses::require_course(conn, course_id))
    }

    /// Catalog listing, newest first, without soft-deleted courses
    pub fn list_courses(&self, limit: i64, offset: i64) -> Result<Vec<Course>, CourseError> {
        self.db
            .with_conn(|conn| courses::list_active_courses(conn, limit, offset))
    }

    /// All versions, most recent first
    pub fn list_versions(&self, course_id: &str) -> Result<Vec<CourseVersion>, CourseError> {
        self.db.with_conn(|conn| {
            courses::require_course(conn, course_id)?;
            versions::list_versions(conn, course_id)
        })
    }

    pub fn get_version(&self, course_id: &str, version: i32) -> Result<CourseVersion, CourseError> {
        self.db
            .with_conn(|conn| versions::get_version(conn, course_id, version))?
            .ok_or_else(|| CourseError::NotFound(format!("course {} version {}", course_id, version)))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create an empty course at version 0
    pub fn create_course(
        &self,
        owner_id: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<Course, CourseError> {
        let title = title.trim();
        if owner_id.trim().is_empty() {
            return Err(CourseError::InvalidInput("owner_id is required".into()));
        }
        if title.is_empty() {
            return Err(CourseError::InvalidInput("title is required".into()));
        }
        if title.len() > MAX_COURSE_TITLE_LEN {
            return Err(CourseError::InvalidInput(format!(
                "title must be <= {} characters",
                MAX_COURSE_TITLE_LEN
            )));
        }

        let id = Uuid::new_v4().to_string();
        let now = current_timestamp();
        let accessibility_json = serde_json::to_string(&Accessibility::Accessible)?;
        let description = description.map(str::trim).filter(|d| !d.is_empty());

        let course = self.db.write(|conn| {
            courses::insert_course(
                conn,
                &NewCourse {
                    id: &id,
                    owner_id,
                    title,
                    description,
                    current_version: 0,
                    lessons_json: "[]",
                    accessibility_json: &accessibility_json,
                    soft_deleted: 0,
                    history_json: "[]",
                    created_at: &now,
                    updated_at: &now,
                },
            )?;
            courses::require_course(conn, &id)
        })?;

        info!(course = %course.id, owner = %owner_id, "Course created");
        self.events.emit(CourseEvent::CourseCreated {
            course_id: course.id.clone(),
            owner_id: owner_id.to_string(),
        });

        Ok(course)
    }

    /// Create the next version, re-reading and retrying on conflict.
    ///
    /// Gives up with the last `VersionConflict` once the retry budget is spent.
    pub fn create_version(
        &self,
        course_id: &str,
        editor_id: &str,
        drafts: Vec<LessonDraft>,
        changelog: &str,
        update_type: UpdateType,
    ) -> Result<i32, CourseError> {
        let mut retries = 0;

        loop {
            let base_version = self.get_course(course_id)?.current_version;

            match self.create_version_from(
                course_id,
                editor_id,
                base_version,
                drafts.clone(),
                changelog,
                update_type,
            ) {
                Err(CourseError::VersionConflict { current_version, .. }) if retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        course = %course_id,
                        base_version,
                        current_version,
                        retries,
                        "Version conflict, retrying with fresh read"
                    );
                }
                result => return result,
            }
        }
    }

    /// Create version `base_version + 1`, or fail with `VersionConflict` if
    /// the course has moved on since `base_version` was read.
    pub fn create_version_from(
        &self,
        course_id: &str,
        editor_id: &str,
        base_version: i32,
        drafts: Vec<LessonDraft>,
        changelog: &str,
        update_type: UpdateType,
    ) -> Result<i32, CourseError> {
        let changelog = changelog.trim();
        if changelog.is_empty() {
            return Err(CourseError::EmptyChangelog);
        }

        let history_limit = self.history_limit;
        let now = current_timestamp();

        let new_version = self.db.write(|conn| {
            let course = courses::require_course(conn, course_id)?;
            if !course.is_owned_by(editor_id) {
                return Err(CourseError::Unauthorized(format!(
                    "only the course owner can edit course {}",
                    course_id
                )));
            }
            if course.soft_deleted {
                return Err(CourseError::CourseDeleted(course_id.to_string()));
            }
            if course.current_version != base_version {
                return Err(CourseError::VersionConflict {
                    course_id: course_id.to_string(),
                    current_version: course.current_version,
                });
            }

            let known = lessons::known_lesson_ids(conn, course_id)?;
            let new_lessons = resolve_drafts(drafts, &known)?;
            let next = base_version + 1;

            let mut history = course.version_history_summary;
            history.insert(
                0,
                HistoryEntry {
                    version: next,
                    editor_id: editor_id.to_string(),
                    changelog: changelog.to_string(),
                    update_type,
                    created_at: parse_timestamp(&now)?,
                },
            );
            history.truncate(history_limit);

            let lessons_json = serde_json::to_string(&new_lessons)?;
            let history_json = serde_json::to_string(&history)?;

            if !courses::advance_version(conn, course_id, base_version, &lessons_json, &history_json, &now)? {
                // Lost the compare-and-set; report what is there now
                let current = courses::require_course(conn, course_id)?;
                if current.soft_deleted {
                    return Err(CourseError::CourseDeleted(course_id.to_string()));
                }
                return Err(CourseError::VersionConflict {
                    course_id: course_id.to_string(),
                    current_version: current.current_version,
                });
            }

            versions::insert_version(
                conn,
                &NewCourseVersion {
                    course_id,
                    version: next,
                    lessons_json: &lessons_json,
                    changelog,
                    update_type: update_type.as_str(),
                    editor_id,
                    created_at: &now,
                },
            )?;
            lessons::register_version(conn, course_id, next, &new_lessons)?;
            sync_queue::enqueue(conn, course_id, next, &now)?;

            debug!(course = %course_id, version = next, lessons = new_lessons.len(), "Version written");
            Ok(next)
        })?;

        self.notifier.notify(course_id);
        self.events.emit(CourseEvent::VersionCreated {
            course_id: course_id.to_string(),
            version: new_version,
            editor_id: editor_id.to_string(),
        });

        Ok(new_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::projector::create_sync_channel;

    fn service() -> VersionService {
        let db = Arc::new(CourseDb::open_in_memory().unwrap());
        // No worker in these tests; queue rows simply stay pending
        let (notifier, _requests) = create_sync_channel();
        VersionService::new(db, Arc::new(EventBus::new()), notifier, &Config::default())
    }

    #[test]
    fn test_first_version_is_one() {
        let service = service();
        let course = service.create_course("instructor", "Rust 101", None).unwrap();
        assert_eq!(course.current_version, 0);
        assert!(course.lessons.is_empty());

        let v = service
            .create_version(
                &course.id,
                "instructor",
                vec![LessonDraft::new("Ownership", 600)],
                "Initial lessons",
                UpdateType::Major,
            )
            .unwrap();
        assert_eq!(v, 1);

        let course = service.get_course(&course.id).unwrap();
        assert_eq!(course.current_version, 1);
        assert_eq!(course.lessons.len(), 1);
        assert_eq!(course.version_history_summary[0].changelog, "Initial lessons");
    }

    #[test]
    fn test_stale_base_version_conflicts() {
        let service = service();
        let course = service.create_course("instructor", "Rust 101", None).unwrap();
        service
            .create_version_from(&course.id, "instructor", 0, vec![LessonDraft::new("A", 60)], "v1", UpdateType::Minor)
            .unwrap();

        let err = service
            .create_version_from(&course.id, "instructor", 0, vec![LessonDraft::new("B", 60)], "v1 again", UpdateType::Minor)
            .unwrap_err();

        match err {
            CourseError::VersionConflict { current_version, .. } => assert_eq!(current_version, 1),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(service.list_versions(&course.id).unwrap().len(), 1);
    }

    #[test]
    fn test_rejections_leave_no_version() {
        let service = service();
        let course = service.create_course("instructor", "Rust 101", None).unwrap();

        let err = service
            .create_version(&course.id, "instructor", vec![LessonDraft::new("A", 60)], "   ", UpdateType::Minor)
            .unwrap_err();
        assert!(matches!(err, CourseError::EmptyChangelog));

        let err = service
            .create_version(&course.id, "intruder", vec![LessonDraft::new("A", 60)], "hi", UpdateType::Minor)
            .unwrap_err();
        assert!(matches!(err, CourseError::Unauthorized(_)));

        let err = service
            .create_version(&course.id, "instructor", vec![LessonDraft::new("", 60)], "hi", UpdateType::Minor)
            .unwrap_err();
        assert!(matches!(err, CourseError::InvalidInput(_)));

        let err = service
            .create_version(&course.id, "instructor", vec![LessonDraft::new("A", 3_000_000_000)], "hi", UpdateType::Minor)
            .unwrap_err();
        assert!(matches!(err, CourseError::InvalidInput(_)));

        assert!(service.list_versions(&course.id).unwrap().is_empty());
        assert_eq!(service.get_course(&course.id).unwrap().current_version, 0);
    }

    #[test]
    fn test_history_summary_is_bounded() {
        let service = service();
        let course = service.create_course("instructor", "Rust 101", None).unwrap();

        for i in 0..15 {
            service
                .create_version(
                    &course.id,
                    "instructor",
                    vec![LessonDraft::new("A", 60)],
                    &format!("edit {}", i),
                    UpdateType::Minor,
                )
                .unwrap();
        }

        let course = service.get_course(&course.id).unwrap();
        assert_eq!(course.current_version, 15);
        assert_eq!(course.version_history_summary.len(), 10);
        assert_eq!(course.version_history_summary[0].version, 15);
        assert_eq!(service.get_version(&course.id, 3).unwrap().changelog, "edit 2");
    }
}
