//! Access gate - decides whether enrolled learners may open a course
//!
//! Decisions are computed from the stored state on every call, there is no
//! cache in between. A windowed course flips to denied the moment `now`
//! passes `until`; a disabled course stays denied until the owner changes it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::db::models::current_timestamp;
use crate::db::{courses, CourseDb};
use crate::error::CourseError;
use crate::model::{Accessibility, Course};

use super::events::{CourseEvent, EventBus};

pub const WINDOW_EXPIRED_REASON: &str = "access window expired";
pub const COURSE_DELETED_REASON: &str = "course deleted";

/// Result of an access check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    /// Turn a denial into `CourseInaccessible`
    pub fn into_result(self, course_id: &str) -> Result<(), CourseError> {
        if self.allowed {
            return Ok(());
        }
        Err(CourseError::CourseInaccessible {
            course_id: course_id.to_string(),
            reason: self.reason.unwrap_or_default(),
        })
    }
}

impl Accessibility {
    /// Evaluate the instructor-set state at `now`
    pub fn evaluate(&self, now: DateTime<Utc>) -> AccessDecision {
        match self {
            Accessibility::Accessible => AccessDecision::allow(),
            Accessibility::Windowed { until } if now <= *until => AccessDecision::allow(),
            Accessibility::Windowed { .. } => AccessDecision::deny(WINDOW_EXPIRED_REASON),
            Accessibility::Disabled { reason } => AccessDecision::deny(reason.clone()),
        }
    }
}

/// Full decision for a course, including the recycle bin
pub fn access_decision(course: &Course, now: DateTime<Utc>) -> AccessDecision {
    if course.soft_deleted {
        return AccessDecision::deny(COURSE_DELETED_REASON);
    }
    course.accessibility.evaluate(now)
}

pub struct AccessGate {
    db: Arc<CourseDb>,
    events: Arc<EventBus>,
}

impl AccessGate {
    pub fn new(db: Arc<CourseDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    pub fn can_access(&self, course_id: &str, now: DateTime<Utc>) -> Result<AccessDecision, CourseError> {
        let course = self.db.with_conn(|conn| courses::require_course(conn, course_id))?;
        Ok(access_decision(&course, now))
    }

    /// Owner-only; visible to the next `can_access` call
    pub fn set_accessibility(
        &self,
        course_id: &str,
        actor_id: &str,
        state: Accessibility,
    ) -> Result<(), CourseError> {
        if let Accessibility::Disabled { reason } = &state {
            if reason.trim().is_empty() {
                return Err(CourseError::InvalidInput("a disabled course needs a reason".into()));
            }
        }

        let state_json = serde_json::to_string(&state)?;
        let now = current_timestamp();

        self.db.write(|conn| {
            let course = courses::require_course(conn, course_id)?;
            if !course.is_owned_by(actor_id) {
                return Err(CourseError::Unauthorized(format!(
                    "only the course owner can change accessibility of {}",
                    course_id
                )));
            }
            courses::set_accessibility(conn, course_id, &state_json, &now)
        })?;

        info!(course = %course_id, state = %state_json, "Course accessibility changed");
        self.events.emit(CourseEvent::AccessibilityChanged {
            course_id: course_id.to_string(),
        });
        Ok(())
    }
}
