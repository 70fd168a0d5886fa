//! Course version snapshots
//!
//! Versions are insert-only. The only delete is the cascade that runs before
//! a course's permanent deletion.

use diesel::prelude::*;

use super::diesel_schema::course_versions;
use super::models::{CourseVersionRow, NewCourseVersion};
use crate::error::CourseError;
use crate::model::CourseVersion;

pub fn insert_version(conn: &mut SqliteConnection, version: &NewCourseVersion<'_>) -> Result<(), CourseError> {
    diesel::insert_into(course_versions::table)
        .values(version)
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Version insert failed: {}", e)))?;
    Ok(())
}

/// All versions of a course, most recent first
pub fn list_versions(conn: &mut SqliteConnection, course_id: &str) -> Result<Vec<CourseVersion>, CourseError> {
    course_versions::table
        .filter(course_versions::course_id.eq(course_id))
        .order(course_versions::version.desc())
        .select(CourseVersionRow::as_select())
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))?
        .into_iter()
        .map(CourseVersion::try_from)
        .collect()
}

pub fn get_version(
    conn: &mut SqliteConnection,
    course_id: &str,
    version: i32,
) -> Result<Option<CourseVersion>, CourseError> {
    course_versions::table
        .filter(course_versions::course_id.eq(course_id))
        .filter(course_versions::version.eq(version))
        .select(CourseVersionRow::as_select())
        .first(conn)
        .optional()
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))?
        .map(CourseVersion::try_from)
        .transpose()
}

pub fn count_versions(conn: &mut SqliteConnection, course_id: &str) -> Result<i64, CourseError> {
    course_versions::table
        .filter(course_versions::course_id.eq(course_id))
        .count()
        .get_result(conn)
        .map_err(|e| CourseError::Internal(format!("Count query failed: {}", e)))
}

/// Remove every snapshot of a course. Safe to repeat.
pub fn delete_versions_for_course(conn: &mut SqliteConnection, course_id: &str) -> Result<usize, CourseError> {
    diesel::delete(course_versions::table.filter(course_versions::course_id.eq(course_id)))
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Version delete failed: {}", e)))
}
