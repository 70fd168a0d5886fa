//! Lesson identity
//!
//! A lesson id is the only thing progress records key against, so it is
//! generated exactly once (a random 128-bit UUID) and then carried through
//! every later edit unchanged. Titles, descriptions, media and ordering are
//! free to change between versions.
//!
//! Edits arrive as [`LessonDraft`]s. A draft without an id is a new lesson and
//! gets a fresh id; a draft with an id must name a lesson this course already
//! owns. An id that the course has never seen is rejected rather than adopted,
//! since adopting it could graft progress from an unrelated lesson.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CourseError;

const MAX_TITLE_LEN: usize = 500;

/// Durations are stored in a signed 32-bit column
pub const MAX_DURATION_SECONDS: u32 = i32::MAX as u32;

/// Stable, opaque lesson identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LessonId(String);

impl LessonId {
    /// Parse an id supplied by a caller. Accepts any UUID spelling and
    /// normalizes it to the lowercase hyphenated form ids are stored in.
    pub fn parse(raw: &str) -> Result<Self, CourseError> {
        Uuid::parse_str(raw.trim())
            .map(|uuid| Self(uuid.hyphenated().to_string()))
            .map_err(|_| CourseError::InvalidInput(format!("'{}' is not a valid lesson id", raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LessonId {
    type Error = CourseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LessonId> for String {
    fn from(id: LessonId) -> Self {
        id.0
    }
}

impl fmt::Display for LessonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate an id for a lesson that has never existed before.
pub fn assign_id() -> LessonId {
    LessonId(Uuid::new_v4().hyphenated().to_string())
}

/// Carry an existing lesson's id into the next version.
pub fn preserve_id(existing: &LessonId) -> LessonId {
    existing.clone()
}

/// A lesson as stored in a course version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub media_ref: Option<String>,
    pub duration_seconds: u32,
    #[serde(default)]
    pub preview_enabled: bool,
}

/// A lesson as submitted in an edit
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LessonDraft {
    /// Present for lessons carried over from an earlier version
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub media_ref: Option<String>,
    #[serde(default)]
    pub duration_seconds: u32,
    #[serde(default)]
    pub preview_enabled: bool,
}

impl LessonDraft {
    /// Draft for a brand-new lesson
    pub fn new(title: impl Into<String>, duration_seconds: u32) -> Self {
        Self {
            title: title.into(),
            duration_seconds,
            ..Default::default()
        }
    }

    /// Draft editing a lesson that already exists
    pub fn existing(lesson: &Lesson) -> Self {
        Self {
            id: Some(lesson.id.to_string()),
            title: lesson.title.clone(),
            description: lesson.description.clone(),
            media_ref: lesson.media_ref.clone(),
            duration_seconds: lesson.duration_seconds,
            preview_enabled: lesson.preview_enabled,
        }
    }
}

/// Turn an edit into the lesson list of the next version.
///
/// `known` holds every lesson id the course has ever owned.
pub fn resolve_drafts(
    drafts: Vec<LessonDraft>,
    known: &HashSet<LessonId>,
) -> Result<Vec<Lesson>, CourseError> {
    let mut seen = HashSet::with_capacity(drafts.len());
    let mut lessons = Vec::with_capacity(drafts.len());

    for (i, draft) in drafts.into_iter().enumerate() {
        let title = draft.title.trim().to_string();
        if title.is_empty() {
            return Err(CourseError::InvalidInput(format!("lessons[{}]: title is required", i)));
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(CourseError::InvalidInput(format!(
                "lessons[{}]: title must be <= {} characters",
                i, MAX_TITLE_LEN
            )));
        }

        if draft.duration_seconds > MAX_DURATION_SECONDS {
            return Err(CourseError::InvalidInput(format!(
                "lessons[{}]: duration_seconds must be <= {}",
                i, MAX_DURATION_SECONDS
            )));
        }

        let id = match draft.id.as_deref().map(str::trim) {
            None | Some("") => assign_id(),
            Some(raw) => {
                let id = LessonId::parse(raw)?;
                if !known.contains(&id) {
                    return Err(CourseError::InvalidInput(format!(
                        "lessons[{}]: lesson id {} does not belong to this course",
                        i, id
                    )));
                }
                preserve_id(&id)
            }
        };

        if !seen.insert(id.clone()) {
            return Err(CourseError::InvalidInput(format!(
                "lessons[{}]: duplicate lesson id {}",
                i, id
            )));
        }

        lessons.push(Lesson {
            id,
            title,
            description: draft.description,
            media_ref: draft.media_ref.filter(|m| !m.trim().is_empty()),
            duration_seconds: draft.duration_seconds,
            preview_enabled: draft.preview_enabled,
        });
    }

    Ok(lessons)
}

/// Watch time needed before a lesson counts as completed.
pub fn completion_threshold(duration_seconds: u32, ratio: f64) -> u32 {
    (f64::from(duration_seconds) * ratio).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assigned_ids_are_unique_and_parseable() {
        let ids: HashSet<LessonId> = (0..1000).map(|_| assign_id()).collect();
        assert_eq!(ids.len(), 1000);

        let id = assign_id();
        assert_eq!(LessonId::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn test_parse_normalizes() {
        let id = assign_id();
        let upper = id.as_str().to_uppercase();
        assert_eq!(LessonId::parse(&upper).unwrap(), id);
        assert!(LessonId::parse("lesson-1").is_err());
    }

    #[test]
    fn test_new_drafts_get_fresh_ids() {
        let lessons = resolve_drafts(
            vec![LessonDraft::new("Intro", 60), LessonDraft::new("Basics", 120)],
            &HashSet::new(),
        )
        .unwrap();

        assert_eq!(lessons.len(), 2);
        assert_ne!(lessons[0].id, lessons[1].id);
        assert_eq!(lessons[1].duration_seconds, 120);
    }

    #[test]
    fn test_existing_ids_preserved_through_rename() {
        let first = resolve_drafts(vec![LessonDraft::new("Intro", 60)], &HashSet::new()).unwrap();
        let known: HashSet<LessonId> = first.iter().map(|l| l.id.clone()).collect();

        let mut edit = LessonDraft::existing(&first[0]);
        edit.title = "Introduction".into();

        let second = resolve_drafts(vec![edit], &known).unwrap();
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].title, "Introduction");
    }

    #[test]
    fn test_missing_id_treated_as_new_lesson() {
        let first = resolve_drafts(vec![LessonDraft::new("Intro", 60)], &HashSet::new()).unwrap();
        let known: HashSet<LessonId> = first.iter().map(|l| l.id.clone()).collect();

        // Same title, no id: a new logical lesson
        let second = resolve_drafts(vec![LessonDraft::new("Intro", 60)], &known).unwrap();
        assert_ne!(second[0].id, first[0].id);
    }

    #[test]
    fn test_foreign_id_rejected() {
        let mut draft = LessonDraft::new("Stolen", 30);
        draft.id = Some(assign_id().to_string());

        let err = resolve_drafts(vec![draft], &HashSet::new()).unwrap_err();
        assert!(matches!(err, CourseError::InvalidInput(_)));
    }

    #[test]
    fn test_duplicate_and_blank_rejected() {
        let first = resolve_drafts(vec![LessonDraft::new("Intro", 60)], &HashSet::new()).unwrap();
        let known: HashSet<LessonId> = first.iter().map(|l| l.id.clone()).collect();

        let dup = vec![LessonDraft::existing(&first[0]), LessonDraft::existing(&first[0])];
        assert!(resolve_drafts(dup, &known).is_err());

        let blank = vec![LessonDraft::new("   ", 10)];
        assert!(resolve_drafts(blank, &known).is_err());
    }

    #[test]
    fn test_oversized_duration_rejected() {
        let ok = resolve_drafts(vec![LessonDraft::new("Long", MAX_DURATION_SECONDS)], &HashSet::new()).unwrap();
        assert_eq!(ok[0].duration_seconds, MAX_DURATION_SECONDS);

        let err = resolve_drafts(vec![LessonDraft::new("Too long", 3_000_000_000)], &HashSet::new()).unwrap_err();
        assert!(matches!(err, CourseError::InvalidInput(_)));
    }

    #[test]
    fn test_completion_threshold() {
        assert_eq!(completion_threshold(600, 0.9), 540);
        assert_eq!(completion_threshold(1, 0.9), 1);
        assert_eq!(completion_threshold(0, 0.9), 0);
    }
}
