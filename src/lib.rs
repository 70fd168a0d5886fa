//! Lamad Courses - versioned course content with durable learner progress
//!
//! Instructors revise a course's lesson list over and over; learners keep
//! accumulating per-lesson completion the whole time. This crate keeps the
//! two consistent.
//!
//! ## Architecture
//!
//! - **Lesson identity** (`lessons`): ids are generated once and carried
//!   through every edit; progress keys against nothing else
//! - **Versions** (`services::version_service`): immutable snapshots behind an
//!   optimistic compare-and-set on `current_version`
//! - **Enrollment projector** (`services::projector`): bounded fan-out that
//!   refreshes denormalized lesson metadata without touching progress
//! - **Progress** (`services::progress_service`): append-only facts OR-merged
//!   into a sticky progress map
//! - **Access gate** (`services::access_gate`): open, windowed or disabled
//! - **Recycle bin** (`services::recycle_bin`): soft delete, retention,
//!   restore and guarded permanent deletion
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/lamad-courses/
//! ├── courses.db             # SQLite (WAL) - courses, versions, enrollments
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod lessons;
pub mod model;
pub mod services;

pub use config::{Config, ProjectorConfig};
pub use db::CourseDb;
pub use error::{CourseError, ErrorKind};
pub use lessons::{assign_id, preserve_id, Lesson, LessonDraft, LessonId};
pub use model::{
    Accessibility, CompletionSummary, Course, CourseVersion, Enrollment, ProgressFact, UpdateType,
};
pub use services::{
    AccessDecision, AccessGate, CourseEvent, EnrollmentProjector, EventBus, ProgressService,
    RecycleBin, Services, SweepReport, SyncReport, VersionService,
};
