//! Lesson registry
//!
//! Records which course owns each lesson id. The primary key on `lesson_id`
//! means an id can belong to exactly one course, ever. `retired_in` marks the
//! version in which a lesson left the live set; it is cleared again if a later
//! version brings the lesson back.

use std::collections::HashSet;

use diesel::prelude::*;

use super::diesel_schema::lesson_registry;
use super::models::{LessonRegistryRow, NewLessonRegistration};
use crate::error::CourseError;
use crate::lessons::{Lesson, LessonId};

/// Every lesson id this course has ever owned
pub fn known_lesson_ids(conn: &mut SqliteConnection, course_id: &str) -> Result<HashSet<LessonId>, CourseError> {
    let ids: Vec<String> = lesson_registry::table
        .filter(lesson_registry::course_id.eq(course_id))
        .select(lesson_registry::lesson_id)
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))?;

    ids.iter().map(|id| LessonId::parse(id)).collect()
}

pub fn get_registration(
    conn: &mut SqliteConnection,
    lesson_id: &LessonId,
) -> Result<Option<LessonRegistryRow>, CourseError> {
    lesson_registry::table
        .filter(lesson_registry::lesson_id.eq(lesson_id.as_str()))
        .select(LessonRegistryRow::as_select())
        .first(conn)
        .optional()
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))
}

/// Lessons of this course that are no longer in the live set
pub fn retired_lessons(conn: &mut SqliteConnection, course_id: &str) -> Result<Vec<LessonRegistryRow>, CourseError> {
    lesson_registry::table
        .filter(lesson_registry::course_id.eq(course_id))
        .filter(lesson_registry::retired_in.is_not_null())
        .order(lesson_registry::retired_in.asc())
        .select(LessonRegistryRow::as_select())
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))
}

/// Bring the registry in line with the lesson set of `version`.
pub fn register_version(
    conn: &mut SqliteConnection,
    course_id: &str,
    version: i32,
    lessons: &[Lesson],
) -> Result<(), CourseError> {
    let live: HashSet<&str> = lessons.iter().map(|l| l.id.as_str()).collect();

    for lesson in lessons {
        let duration = i32::try_from(lesson.duration_seconds).map_err(|_| {
            CourseError::InvalidInput(format!(
                "lesson {} duration {} is out of range",
                lesson.id, lesson.duration_seconds
            ))
        })?;

        match get_registration(conn, &lesson.id)? {
            Some(existing) if existing.course_id != course_id => {
                return Err(CourseError::InvalidInput(format!(
                    "lesson id {} belongs to another course",
                    lesson.id
                )));
            }
            Some(_) => {
                diesel::update(lesson_registry::table.filter(lesson_registry::lesson_id.eq(lesson.id.as_str())))
                    .set((
                        lesson_registry::retired_in.eq(None::<i32>),
                        lesson_registry::last_duration_seconds.eq(duration),
                    ))
                    .execute(conn)
                    .map_err(|e| CourseError::Internal(format!("Registry update failed: {}", e)))?;
            }
            None => {
                diesel::insert_into(lesson_registry::table)
                    .values(&NewLessonRegistration {
                        lesson_id: lesson.id.as_str(),
                        course_id,
                        introduced_in: version,
                        last_duration_seconds: duration,
                    })
                    .execute(conn)
                    .map_err(|e| CourseError::Internal(format!("Registry insert failed: {}", e)))?;
            }
        }
    }

    let active: Vec<String> = lesson_registry::table
        .filter(lesson_registry::course_id.eq(course_id))
        .filter(lesson_registry::retired_in.is_null())
        .select(lesson_registry::lesson_id)
        .load(conn)
        .map_err(|e| CourseError::Internal(format!("Query failed: {}", e)))?;

    let removed: Vec<&str> = active
        .iter()
        .map(String::as_str)
        .filter(|id| !live.contains(id))
        .collect();
    if !removed.is_empty() {
        diesel::update(lesson_registry::table.filter(lesson_registry::lesson_id.eq_any(removed)))
            .set(lesson_registry::retired_in.eq(Some(version)))
            .execute(conn)
            .map_err(|e| CourseError::Internal(format!("Registry retire failed: {}", e)))?;
    }

    Ok(())
}

pub fn delete_for_course(conn: &mut SqliteConnection, course_id: &str) -> Result<usize, CourseError> {
    diesel::delete(lesson_registry::table.filter(lesson_registry::course_id.eq(course_id)))
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Registry delete failed: {}", e)))
}
