//! Progress facts and the merged progress map
//!
//! Facts are append-only. The merged map is updated with a single upsert that
//! ORs the new completion into the stored one, so concurrent reports for the
//! same lesson commute and replays are no-ops.

use diesel::prelude::*;
use diesel::sql_types::{Integer, Text};

use super::diesel_schema::{enrollment_progress, progress_facts};
use super::models::{NewProgressFact, ProgressFactRow};
use crate::error::CourseError;
use crate::lessons::LessonId;
use crate::model::ProgressFact;

pub fn append_fact(conn: &mut SqliteConnection, fact: &NewProgressFact<'_>) -> Result<(), CourseError> {
    diesel::insert_into(progress_facts::table)
        .values(fact)
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Progress fact insert failed: {}", e)))?;
    Ok(())
}

/// `progress[lesson] = progress[lesson] OR completed`, returning the merged value
pub fn merge_completion(
    conn: &mut SqliteConnection,
    enrollment_id: &str,
    lesson_id: &LessonId,
    completed: bool,
    now: &str,
) -> Result<bool, CourseError> {
    diesel::sql_query(
        r#"
        INSERT INTO enrollment_progress (enrollment_id, lesson_id, completed, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(enrollment_id, lesson_id) DO UPDATE SET
            completed = MAX(enrollment_progress.completed, excluded.completed),
            updated_at = CASE
                WHEN excluded.completed > enrollment_progress.completed THEN excluded.updated_at
                ELSE enrollment_progress.updated_at
            END
        "#,
    )
    .bind::<Text, _>(enrollment_id)
    .bind::<Text, _>(lesson_id.as_str())
    .bind::<Integer, _>(i32::from(completed))
    .bind::<Text, _>(now)
    .execute(conn)
    .map_err(|e| CourseError::Internal(format!("Progress merge failed: {}", e)))?;

    let merged: i32 = enrollment_progress::table
        .filter(enrollment_progress::enrollment_id.eq(enrollment_id))
        .filter(enrollment_progress::lesson_id.eq(lesson_id.as_str()))
        .select(enrollment_progress::completed)
        .first(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))?;

    Ok(merged != 0)
}

/// Facts for one learner in one course, oldest first
pub fn list_facts(
    conn: &mut SqliteConnection,
    user_id: &str,
    course_id: &str,
) -> Result<Vec<ProgressFact>, CourseError> {
    progress_facts::table
        .filter(progress_facts::user_id.eq(user_id))
        .filter(progress_facts::course_id.eq(course_id))
        .order(progress_facts::recorded_at.asc())
        .select(ProgressFactRow::as_select())
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))?
        .into_iter()
        .map(ProgressFact::try_from)
        .collect()
}

pub fn delete_facts_for_course(conn: &mut SqliteConnection, course_id: &str) -> Result<usize, CourseError> {
    diesel::delete(progress_facts::table.filter(progress_facts::course_id.eq(course_id)))
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Progress fact delete failed: {}", e)))
}
