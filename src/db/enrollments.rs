//! Enrollment CRUD operations
//!
//! The progress map lives in its own table (`enrollment_progress`, see
//! `progress.rs`). Nothing in this file writes to it except the unenroll
//! cascade, so a snapshot refresh has no way to touch recorded progress.

use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use super::diesel_schema::{enrollment_progress, enrollments};
use super::models::{EnrollmentRow, NewEnrollment, ProgressEntryRow};
use crate::error::CourseError;
use crate::model::Enrollment;

// ============================================================================
// Read Operations
// ============================================================================

pub fn find_enrollment_row(
    conn: &mut SqliteConnection,
    user_id: &str,
    course_id: &str,
) -> Result<Option<EnrollmentRow>, CourseError> {
    enrollments::table
        .filter(enrollments::user_id.eq(user_id))
        .filter(enrollments::course_id.eq(course_id))
        .select(EnrollmentRow::as_select())
        .first(conn)
        .optional()
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))
}

/// Attach the progress map to an enrollment row
pub fn hydrate(conn: &mut SqliteConnection, row: EnrollmentRow) -> Result<Enrollment, CourseError> {
    let progress = enrollment_progress::table
        .filter(enrollment_progress::enrollment_id.eq(&row.id))
        .select(ProgressEntryRow::as_select())
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))?;

    row.into_enrollment(progress)
}

pub fn get_enrollment(
    conn: &mut SqliteConnection,
    user_id: &str,
    course_id: &str,
) -> Result<Option<Enrollment>, CourseError> {
    find_enrollment_row(conn, user_id, course_id)?
        .map(|row| hydrate(conn, row))
        .transpose()
}

pub fn list_enrollment_ids(conn: &mut SqliteConnection, course_id: &str) -> Result<Vec<String>, CourseError> {
    enrollments::table
        .filter(enrollments::course_id.eq(course_id))
        .order(enrollments::enrolled_at.asc())
        .select(enrollments::id)
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))
}

pub fn list_for_course(conn: &mut SqliteConnection, course_id: &str) -> Result<Vec<Enrollment>, CourseError> {
    let rows: Vec<EnrollmentRow> = enrollments::table
        .filter(enrollments::course_id.eq(course_id))
        .order(enrollments::enrolled_at.asc())
        .select(EnrollmentRow::as_select())
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))?;

    rows.into_iter().map(|row| hydrate(conn, row)).collect()
}

pub fn count_for_course(conn: &mut SqliteConnection, course_id: &str) -> Result<i64, CourseError> {
    enrollments::table
        .filter(enrollments::course_id.eq(course_id))
        .count()
        .get_result(conn)
        .map_err(|e| CourseError::Internal(format!("Count query failed: {}", e)))
}

// ============================================================================
// Write Operations
// ============================================================================

pub fn insert_enrollment(conn: &mut SqliteConnection, enrollment: &NewEnrollment<'_>) -> Result<(), CourseError> {
    match diesel::insert_into(enrollments::table).values(enrollment).execute(conn) {
        Ok(_) => Ok(()),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            Err(CourseError::AlreadyEnrolled {
                user_id: enrollment.user_id.to_string(),
                course_id: enrollment.course_id.to_string(),
            })
        }
        Err(e) => Err(CourseError::Internal(format!("Enrollment insert failed: {}", e))),
    }
}

/// Overwrite the denormalized lesson metadata of one enrollment.
///
/// Never moves a snapshot backwards: if the stored snapshot came from a newer
/// version than `version`, nothing is written and false is returned.
pub fn write_snapshot(
    conn: &mut SqliteConnection,
    enrollment_id: &str,
    snapshot_json: &str,
    version: i32,
    now: &str,
) -> Result<bool, CourseError> {
    let updated = diesel::update(
        enrollments::table
            .filter(enrollments::id.eq(enrollment_id))
            .filter(enrollments::snapshot_version.le(version)),
    )
    .set((
        enrollments::snapshot_json.eq(snapshot_json),
        enrollments::snapshot_version.eq(version),
        enrollments::last_updated.eq(now),
    ))
    .execute(conn)
    .map_err(|e| CourseError::Internal(format!("Snapshot update failed: {}", e)))?;

    Ok(updated == 1)
}

pub fn touch(conn: &mut SqliteConnection, enrollment_id: &str, now: &str) -> Result<(), CourseError> {
    diesel::update(enrollments::table.filter(enrollments::id.eq(enrollment_id)))
        .set(enrollments::last_updated.eq(now))
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Enrollment update failed: {}", e)))?;
    Ok(())
}

/// Remove an enrollment and its progress map
pub fn delete_enrollment(conn: &mut SqliteConnection, enrollment_id: &str) -> Result<bool, CourseError> {
    diesel::delete(enrollment_progress::table.filter(enrollment_progress::enrollment_id.eq(enrollment_id)))
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Progress delete failed: {}", e)))?;

    let deleted = diesel::delete(enrollments::table.filter(enrollments::id.eq(enrollment_id)))
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Enrollment delete failed: {}", e)))?;

    Ok(deleted == 1)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::courses::tests::setup_test_db;
    use crate::db::models::current_timestamp;

    pub(crate) fn insert_test_enrollment(conn: &mut SqliteConnection, id: &str, user: &str, course: &str) {
        let now = current_timestamp();
        insert_enrollment(
            conn,
            &NewEnrollment {
                id,
                user_id: user,
                course_id: course,
                snapshot_json: "{}",
                snapshot_version: 1,
                enrolled_at: &now,
                last_updated: &now,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_duplicate_enrollment_maps_to_already_enrolled() {
        let mut conn = setup_test_db();
        insert_test_enrollment(&mut conn, "e1", "learner", "c1");

        let now = current_timestamp();
        let err = insert_enrollment(
            &mut conn,
            &NewEnrollment {
                id: "e2",
                user_id: "learner",
                course_id: "c1",
                snapshot_json: "{}",
                snapshot_version: 1,
                enrolled_at: &now,
                last_updated: &now,
            },
        )
        .unwrap_err();

        assert!(matches!(err, CourseError::AlreadyEnrolled { .. }));
        assert_eq!(count_for_course(&mut conn, "c1").unwrap(), 1);
    }

    #[test]
    fn test_snapshot_never_moves_backwards() {
        let mut conn = setup_test_db();
        insert_test_enrollment(&mut conn, "e1", "learner", "c1");
        let now = current_timestamp();

        assert!(write_snapshot(&mut conn, "e1", "{}", 3, &now).unwrap());
        assert!(!write_snapshot(&mut conn, "e1", "{}", 2, &now).unwrap());
        // Re-projecting the same version is allowed
        assert!(write_snapshot(&mut conn, "e1", "{}", 3, &now).unwrap());

        let enrollment = get_enrollment(&mut conn, "learner", "c1").unwrap().unwrap();
        assert_eq!(enrollment.snapshot_version, 3);
    }

    #[test]
    fn test_delete_enrollment() {
        let mut conn = setup_test_db();
        insert_test_enrollment(&mut conn, "e1", "learner", "c1");

        assert!(delete_enrollment(&mut conn, "e1").unwrap());
        assert!(!delete_enrollment(&mut conn, "e1").unwrap());
        assert!(list_enrollment_ids(&mut conn, "c1").unwrap().is_empty());
    }
}
