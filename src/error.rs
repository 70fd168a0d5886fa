//! Error types for lamad-courses

use thiserror::Error;

/// Coarse classification used by callers to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lost an optimistic compare-and-set race; re-read and retry.
    Conflict,
    /// Rejected before any write.
    Validation,
    /// Caller is not allowed to perform the operation.
    Authorization,
    NotFound,
    AlreadyExists,
    /// The operation is not valid in the aggregate's current state.
    StateConflict,
    Internal,
}

#[derive(Error, Debug)]
pub enum CourseError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("User {user_id} is already enrolled in course {course_id}")]
    AlreadyEnrolled { user_id: String, course_id: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Changelog is required for content updates")]
    EmptyChangelog,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Course {0} is deleted")]
    CourseDeleted(String),

    #[error("Version conflict on course {course_id}: current version is {current_version}")]
    VersionConflict { course_id: String, current_version: i32 },

    #[error("Course {course_id} is not accessible: {reason}")]
    CourseInaccessible { course_id: String, reason: String },

    #[error("Instructors cannot enroll in their own course")]
    SelfEnrollmentForbidden,

    #[error("User {user_id} is not enrolled in course {course_id}")]
    NotEnrolled { user_id: String, course_id: String },

    #[error("Retention period for course {course_id} expired (deleted at {deleted_at})")]
    RetentionExpired { course_id: String, deleted_at: String },

    #[error("Course {0} is not in the recycle bin")]
    NotDeleted(String),

    #[error("Course {course_id} still has {count} active enrollments")]
    HasActiveEnrollments { course_id: String, count: i64 },

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CourseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CourseError::VersionConflict { .. } => ErrorKind::Conflict,
            CourseError::EmptyChangelog | CourseError::InvalidInput(_) => ErrorKind::Validation,
            CourseError::Unauthorized(_) | CourseError::SelfEnrollmentForbidden => {
                ErrorKind::Authorization
            }
            CourseError::NotFound(_) | CourseError::NotEnrolled { .. } => ErrorKind::NotFound,
            CourseError::AlreadyEnrolled { .. } => ErrorKind::AlreadyExists,
            CourseError::CourseDeleted(_)
            | CourseError::CourseInaccessible { .. }
            | CourseError::RetentionExpired { .. }
            | CourseError::NotDeleted(_)
            | CourseError::HasActiveEnrollments { .. } => ErrorKind::StateConflict,
            CourseError::Database(_)
            | CourseError::Pool(_)
            | CourseError::Json(_)
            | CourseError::Io(_)
            | CourseError::Config(_)
            | CourseError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only compare-and-set conflicts are worth an automatic retry.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let conflict = CourseError::VersionConflict {
            course_id: "c1".into(),
            current_version: 6,
        };
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert!(conflict.is_retryable());
        assert!(conflict.to_string().contains("current version is 6"));

        assert_eq!(CourseError::EmptyChangelog.kind(), ErrorKind::Validation);
        assert_eq!(
            CourseError::SelfEnrollmentForbidden.kind(),
            ErrorKind::Authorization
        );
        assert_eq!(
            CourseError::HasActiveEnrollments {
                course_id: "c1".into(),
                count: 2
            }
            .kind(),
            ErrorKind::StateConflict
        );
        assert!(!CourseError::NotDeleted("c1".into()).is_retryable());
    }
}
