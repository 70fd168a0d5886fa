//! Course aggregate CRUD operations using Diesel
//!
//! The aggregate's hot fields (`current_version`, `lessons_json`,
//! `accessibility_json`, recycle bin state) are only ever changed through the
//! conditional updates below; callers decide what a zero-row update means.

use diesel::prelude::*;

use super::diesel_schema::courses;
use super::models::{CourseRow, NewCourse};
use crate::error::CourseError;
use crate::model::Course;

// ============================================================================
// Read Operations
// ============================================================================

/// Get a course by ID, including soft-deleted ones
pub fn get_course(conn: &mut SqliteConnection, course_id: &str) -> Result<Option<Course>, CourseError> {
    courses::table
        .filter(courses::id.eq(course_id))
        .select(CourseRow::as_select())
        .first(conn)
        .optional()
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))?
        .map(Course::try_from)
        .transpose()
}

/// Get a course by ID or fail with NotFound
pub fn require_course(conn: &mut SqliteConnection, course_id: &str) -> Result<Course, CourseError> {
    get_course(conn, course_id)?.ok_or_else(|| CourseError::NotFound(format!("course {}", course_id)))
}

/// Catalog listing: soft-deleted courses are not visible here
pub fn list_active_courses(
    conn: &mut SqliteConnection,
    limit: i64,
    offset: i64,
) -> Result<Vec<Course>, CourseError> {
    courses::table
        .filter(courses::soft_deleted.eq(0))
        .order(courses::created_at.desc())
        .limit(limit)
        .offset(offset)
        .select(CourseRow::as_select())
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))?
        .into_iter()
        .map(Course::try_from)
        .collect()
}

/// Soft-deleted courses belonging to one owner, most recently deleted first
pub fn list_deleted_for_owner(
    conn: &mut SqliteConnection,
    owner_id: &str,
) -> Result<Vec<Course>, CourseError> {
    courses::table
        .filter(courses::owner_id.eq(owner_id))
        .filter(courses::soft_deleted.eq(1))
        .order(courses::deleted_at.desc())
        .select(CourseRow::as_select())
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))?
        .into_iter()
        .map(Course::try_from)
        .collect()
}

/// IDs of soft-deleted courses deleted at or before `cutoff`
pub fn list_expired_ids(conn: &mut SqliteConnection, cutoff: &str) -> Result<Vec<String>, CourseError> {
    courses::table
        .filter(courses::soft_deleted.eq(1))
        .filter(courses::deleted_at.le(cutoff))
        .order(courses::deleted_at.asc())
        .select(courses::id)
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))
}

pub fn count_courses(conn: &mut SqliteConnection, soft_deleted: bool) -> Result<i64, CourseError> {
    courses::table
        .filter(courses::soft_deleted.eq(i32::from(soft_deleted)))
        .count()
        .get_result(conn)
        .map_err(|e| CourseError::Internal(format!("Count query failed: {}", e)))
}

// ============================================================================
// Write Operations
// ============================================================================

pub fn insert_course(conn: &mut SqliteConnection, course: &NewCourse<'_>) -> Result<(), CourseError> {
    diesel::insert_into(courses::table)
        .values(course)
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Course insert failed: {}", e)))?;
    Ok(())
}

/// Compare-and-set the live lesson set to the next version.
///
/// Succeeds only if the course is still at `expected_version` and not
/// soft-deleted. Returns false when another writer got there first.
pub fn advance_version(
    conn: &mut SqliteConnection,
    course_id: &str,
    expected_version: i32,
    lessons_json: &str,
    history_json: &str,
    now: &str,
) -> Result<bool, CourseError> {
    let updated = diesel::update(
        courses::table
            .filter(courses::id.eq(course_id))
            .filter(courses::current_version.eq(expected_version))
            .filter(courses::soft_deleted.eq(0)),
    )
    .set((
        courses::current_version.eq(expected_version + 1),
        courses::lessons_json.eq(lessons_json),
        courses::history_json.eq(history_json),
        courses::updated_at.eq(now),
    ))
    .execute(conn)
    .map_err(|e| CourseError::Internal(format!("Version update failed: {}", e)))?;

    Ok(updated == 1)
}

pub fn set_accessibility(
    conn: &mut SqliteConnection,
    course_id: &str,
    accessibility_json: &str,
    now: &str,
) -> Result<bool, CourseError> {
    let updated = diesel::update(courses::table.filter(courses::id.eq(course_id)))
        .set((
            courses::accessibility_json.eq(accessibility_json),
            courses::updated_at.eq(now),
        ))
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Accessibility update failed: {}", e)))?;

    Ok(updated == 1)
}

/// Move an active course into the recycle bin
pub fn mark_soft_deleted(
    conn: &mut SqliteConnection,
    course_id: &str,
    deleted_at: &str,
) -> Result<bool, CourseError> {
    let updated = diesel::update(
        courses::table
            .filter(courses::id.eq(course_id))
            .filter(courses::soft_deleted.eq(0)),
    )
    .set((
        courses::soft_deleted.eq(1),
        courses::deleted_at.eq(Some(deleted_at)),
        courses::updated_at.eq(deleted_at),
    ))
    .execute(conn)
    .map_err(|e| CourseError::Internal(format!("Soft delete failed: {}", e)))?;

    Ok(updated == 1)
}

/// Take a course back out of the recycle bin
pub fn clear_soft_deleted(
    conn: &mut SqliteConnection,
    course_id: &str,
    now: &str,
) -> Result<bool, CourseError> {
    let updated = diesel::update(
        courses::table
            .filter(courses::id.eq(course_id))
            .filter(courses::soft_deleted.eq(1)),
    )
    .set((
        courses::soft_deleted.eq(0),
        courses::deleted_at.eq(None::<String>),
        courses::updated_at.eq(now),
    ))
    .execute(conn)
    .map_err(|e| CourseError::Internal(format!("Restore failed: {}", e)))?;

    Ok(updated == 1)
}

/// Delete the aggregate row. Only soft-deleted courses are eligible.
pub fn delete_course(conn: &mut SqliteConnection, course_id: &str) -> Result<bool, CourseError> {
    let deleted = diesel::delete(
        courses::table
            .filter(courses::id.eq(course_id))
            .filter(courses::soft_deleted.eq(1)),
    )
    .execute(conn)
    .map_err(|e| CourseError::Internal(format!("Course delete failed: {}", e)))?;

    Ok(deleted == 1)
}
