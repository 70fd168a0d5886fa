//! Domain types shared by the services
//!
//! These are the validated, strongly typed shapes handed to callers. The
//! SQLite row structs in `db::models` convert into them at the repository
//! boundary.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CourseError;
use crate::lessons::{Lesson, LessonId};

/// How significant a content update is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Minor,
    Major,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Minor => "minor",
            UpdateType::Major => "major",
        }
    }
}

impl FromStr for UpdateType {
    type Err = CourseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minor" => Ok(UpdateType::Minor),
            "major" => Ok(UpdateType::Major),
            other => Err(CourseError::InvalidInput(format!(
                "update type '{}' is not valid. Valid values: [\"minor\", \"major\"]",
                other
            ))),
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instructor-controlled accessibility of a course
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Accessibility {
    #[default]
    Accessible,
    Disabled { reason: String },
    Windowed { until: DateTime<Utc> },
}

/// One line of a course's bounded version history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: i32,
    pub editor_id: String,
    pub changelog: String,
    pub update_type: UpdateType,
    pub created_at: DateTime<Utc>,
}

/// Course aggregate
#[derive(Debug, Clone, Serialize)]
pub struct Course {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub current_version: i32,
    /// The live lesson set, equal to the lessons of `current_version`
    pub lessons: Vec<Lesson>,
    pub accessibility: Accessibility,
    pub soft_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Most recent first
    pub version_history_summary: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Course {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    pub fn lesson(&self, lesson_id: &LessonId) -> Option<&Lesson> {
        self.lessons.iter().find(|l| &l.id == lesson_id)
    }

    pub fn lesson_ids(&self) -> HashSet<LessonId> {
        self.lessons.iter().map(|l| l.id.clone()).collect()
    }
}

/// Immutable snapshot of a course's lessons at one version
#[derive(Debug, Clone, Serialize)]
pub struct CourseVersion {
    pub course_id: String,
    pub version: i32,
    pub lessons: Vec<Lesson>,
    pub changelog: String,
    pub update_type: UpdateType,
    pub editor_id: String,
    pub created_at: DateTime<Utc>,
}

/// Display metadata for one lesson, denormalized onto enrollments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonSummary {
    pub title: String,
    pub duration_seconds: u32,
    pub position: u32,
}

/// Denormalized lesson metadata keyed by lesson id
pub type CourseSnapshot = BTreeMap<LessonId, LessonSummary>;

/// Build the denormalized snapshot for a lesson list
pub fn snapshot_of(lessons: &[Lesson]) -> CourseSnapshot {
    lessons
        .iter()
        .enumerate()
        .map(|(i, lesson)| {
            (
                lesson.id.clone(),
                LessonSummary {
                    title: lesson.title.clone(),
                    duration_seconds: lesson.duration_seconds,
                    position: i as u32,
                },
            )
        })
        .collect()
}

/// A learner's enrollment in a course
#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    /// Sticky per-lesson completion; keys may include retired lessons
    pub progress: BTreeMap<LessonId, bool>,
    pub course_data_snapshot: CourseSnapshot,
    /// Course version the snapshot was projected from
    pub snapshot_version: i32,
    pub enrolled_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Append-only record of one progress report
#[derive(Debug, Clone, Serialize)]
pub struct ProgressFact {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub lesson_id: LessonId,
    pub watch_seconds: u32,
    pub completed: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Completion computed against the course's current lesson set
#[derive(Debug, Clone, Serialize)]
pub struct CompletionSummary {
    pub user_id: String,
    pub course_id: String,
    pub completed_lessons: usize,
    pub total_lessons: usize,
    pub percent: f64,
    /// Progress keys whose lessons are no longer in the live set
    pub retired_lesson_ids: Vec<LessonId>,
}

impl CompletionSummary {
    pub fn compute(course: &Course, enrollment: &Enrollment) -> Self {
        let live = course.lesson_ids();

        let completed_lessons = course
            .lessons
            .iter()
            .filter(|l| enrollment.progress.get(&l.id).copied().unwrap_or(false))
            .count();

        let retired_lesson_ids = enrollment
            .progress
            .keys()
            .filter(|id| !live.contains(*id))
            .cloned()
            .collect();

        let total_lessons = course.lessons.len();
        let percent = if total_lessons == 0 {
            0.0
        } else {
            completed_lessons as f64 * 100.0 / total_lessons as f64
        };

        Self {
            user_id: enrollment.user_id.clone(),
            course_id: course.id.clone(),
            completed_lessons,
            total_lessons,
            percent,
            retired_lesson_ids,
        }
    }
}
