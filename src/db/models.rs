//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! Rows keep SQLite's storage shapes (TEXT timestamps, INTEGER flags, JSON
//! columns). `TryFrom` impls turn them into the domain types in `crate::model`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::diesel_schema::*;
use crate::error::CourseError;
use crate::lessons::{Lesson, LessonId};
use crate::model::{
    Accessibility, Course, CourseSnapshot, CourseVersion, Enrollment, HistoryEntry, ProgressFact,
};

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Fixed-width UTC format; sorts lexicographically in timestamp order
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Get current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    format_timestamp(&Utc::now())
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CourseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CourseError::Internal(format!("Bad timestamp '{}': {}", value, e)))
}

pub fn flag(value: bool) -> i32 {
    i32::from(value)
}

// ============================================================================
// Course Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = courses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CourseRow {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub current_version: i32,
    pub lessons_json: String,
    pub accessibility_json: String,
    pub soft_deleted: i32,
    pub deleted_at: Option<String>,
    pub history_json: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = courses)]
pub struct NewCourse<'a> {
    pub id: &'a str,
    pub owner_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub current_version: i32,
    pub lessons_json: &'a str,
    pub accessibility_json: &'a str,
    pub soft_deleted: i32,
    pub history_json: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

impl TryFrom<CourseRow> for Course {
    type Error = CourseError;

    fn try_from(row: CourseRow) -> Result<Self, Self::Error> {
        let lessons: Vec<Lesson> = serde_json::from_str(&row.lessons_json)?;
        let accessibility: Accessibility = serde_json::from_str(&row.accessibility_json)?;
        let version_history_summary: Vec<HistoryEntry> = serde_json::from_str(&row.history_json)?;

        Ok(Course {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            description: row.description,
            current_version: row.current_version,
            lessons,
            accessibility,
            soft_deleted: row.soft_deleted != 0,
            deleted_at: row.deleted_at.as_deref().map(parse_timestamp).transpose()?,
            version_history_summary,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

// ============================================================================
// Version Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = course_versions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CourseVersionRow {
    pub course_id: String,
    pub version: i32,
    pub lessons_json: String,
    pub changelog: String,
    pub update_type: String,
    pub editor_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = course_versions)]
pub struct NewCourseVersion<'a> {
    pub course_id: &'a str,
    pub version: i32,
    pub lessons_json: &'a str,
    pub changelog: &'a str,
    pub update_type: &'a str,
    pub editor_id: &'a str,
    pub created_at: &'a str,
}

impl TryFrom<CourseVersionRow> for CourseVersion {
    type Error = CourseError;

    fn try_from(row: CourseVersionRow) -> Result<Self, Self::Error> {
        Ok(CourseVersion {
            lessons: serde_json::from_str(&row.lessons_json)?,
            update_type: row.update_type.parse()?,
            created_at: parse_timestamp(&row.created_at)?,
            course_id: row.course_id,
            version: row.version,
            changelog: row.changelog,
            editor_id: row.editor_id,
        })
    }
}

// ============================================================================
// Lesson Registry Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = lesson_registry)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LessonRegistryRow {
    pub lesson_id: String,
    pub course_id: String,
    pub introduced_in: i32,
    pub retired_in: Option<i32>,
    pub last_duration_seconds: i32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = lesson_registry)]
pub struct NewLessonRegistration<'a> {
    pub lesson_id: &'a str,
    pub course_id: &'a str,
    pub introduced_in: i32,
    pub last_duration_seconds: i32,
}

// ============================================================================
// Enrollment Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = enrollments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EnrollmentRow {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub snapshot_json: String,
    pub snapshot_version: i32,
    pub enrolled_at: String,
    pub last_updated: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = enrollments)]
pub struct NewEnrollment<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub course_id: &'a str,
    pub snapshot_json: &'a str,
    pub snapshot_version: i32,
    pub enrolled_at: &'a str,
    pub last_updated: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = enrollment_progress)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProgressEntryRow {
    pub enrollment_id: String,
    pub lesson_id: String,
    pub completed: i32,
    pub updated_at: String,
}

impl EnrollmentRow {
    /// Combine with the enrollment's progress rows
    pub fn into_enrollment(self, progress: Vec<ProgressEntryRow>) -> Result<Enrollment, CourseError> {
        let course_data_snapshot: CourseSnapshot = serde_json::from_str(&self.snapshot_json)?;

        let progress = progress
            .into_iter()
            .map(|p| -> Result<_, CourseError> { Ok((LessonId::parse(&p.lesson_id)?, p.completed != 0)) })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(Enrollment {
            progress,
            course_data_snapshot,
            snapshot_version: self.snapshot_version,
            enrolled_at: parse_timestamp(&self.enrolled_at)?,
            last_updated: parse_timestamp(&self.last_updated)?,
            id: self.id,
            user_id: self.user_id,
            course_id: self.course_id,
        })
    }
}

// ============================================================================
// Progress Fact Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = progress_facts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProgressFactRow {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub lesson_id: String,
    pub watch_seconds: i32,
    pub completed: i32,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = progress_facts)]
pub struct NewProgressFact<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub course_id: &'a str,
    pub lesson_id: &'a str,
    pub watch_seconds: i32,
    pub completed: i32,
    pub recorded_at: &'a str,
}

impl TryFrom<ProgressFactRow> for ProgressFact {
    type Error = CourseError;

    fn try_from(row: ProgressFactRow) -> Result<Self, Self::Error> {
        Ok(ProgressFact {
            lesson_id: LessonId::parse(&row.lesson_id)?,
            watch_seconds: row.watch_seconds.max(0) as u32,
            completed: row.completed != 0,
            recorded_at: parse_timestamp(&row.recorded_at)?,
            id: row.id,
            user_id: row.user_id,
            course_id: row.course_id,
        })
    }
}

// ============================================================================
// Sync Queue Models
// ============================================================================

/// Sync queue status values
pub mod sync_status {
    pub const PENDING: &str = "pending";
    pub const DONE: &str = "done";
    pub const FAILED: &str = "failed";
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sync_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncQueueRow {
    pub id: String,
    pub course_id: String,
    pub version: i32,
    pub status: String,
    pub rounds: i32,
    pub failed_ids_json: String,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SyncQueueRow {
    pub fn failed_ids(&self) -> Result<Vec<String>, CourseError> {
        Ok(serde_json::from_str(&self.failed_ids_json)?)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = sync_queue)]
pub struct NewSyncQueueEntry<'a> {
    pub id: &'a str,
    pub course_id: &'a str,
    pub version: i32,
    pub status: &'a str,
    pub rounds: i32,
    pub failed_ids_json: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_round_trip_and_ordering() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();

        let a = format_timestamp(&earlier);
        let b = format_timestamp(&later);
        assert_eq!(a, "2026-01-02T03:04:05Z");
        assert!(a < b);
        assert_eq!(parse_timestamp(&a).unwrap(), earlier);
    }

    #[test]
    fn test_corrupt_failed_ids_is_an_error() {
        let row = SyncQueueRow {
            id: "q1".into(),
            course_id: "c1".into(),
            version: 1,
            status: sync_status::FAILED.into(),
            rounds: 1,
            failed_ids_json: "[\"e1\",".into(),
            last_error: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        assert!(matches!(row.failed_ids(), Err(CourseError::Json(_))));
    }

    #[test]
    fn test_course_row_conversion() {
        let row = CourseRow {
            id: "c1".into(),
            owner_id: "instructor".into(),
            title: "Rust".into(),
            description: None,
            current_version: 0,
            lessons_json: "[]".into(),
            accessibility_json: r#"{"state":"disabled","reason":"paused"}"#.into(),
            soft_deleted: 1,
            deleted_at: Some("2026-01-02T03:04:05Z".into()),
            history_json: "[]".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };

        let course = Course::try_from(row).unwrap();
        assert!(course.soft_deleted);
        assert!(course.deleted_at.is_some());
        assert_eq!(
            course.accessibility,
            Accessibility::Disabled {
                reason: "paused".into()
            }
        );
    }
}
