//! Service layer for lamad-courses
//!
//! Services encapsulate business logic above the repository functions.
//! Each service wraps database operations with:
//! - Input validation and ownership checks
//! - Transaction boundaries (one immediate transaction per operation)
//! - Event emission for audit/notifications
//!
//! ## Architecture
//!
//! ```text
//! Callers (UI, auth, payments glue)
//!     ↓
//! Service Layer (business logic)
//!     ↓                      ↘
//! Repository Layer (db/*.rs)   EnrollmentProjector (background fan-out)
//!     ↓
//! SQLite Database
//! ```

pub mod access_gate;
pub mod events;
pub mod progress_service;
pub mod projector;
pub mod recycle_bin;
pub mod version_service;

// Re-exports
pub use access_gate::{AccessDecision, AccessGate};
pub use events::{CourseEvent, EventBus, EventListener};
pub use progress_service::ProgressService;
pub use projector::{EnrollmentProjector, SnapshotTarget, SyncReport};
pub use recycle_bin::{RecycleBin, RecycleBinEntry, SweepOutcome, SweepReport};
pub use version_service::VersionService;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db::CourseDb;

use projector::{create_sync_channel, SyncReceiver};

/// Service container for dependency injection
///
/// Holds all services with a shared database and event bus.
pub struct Services {
    pub versions: Arc<VersionService>,
    pub progress: Arc<ProgressService>,
    pub access: Arc<AccessGate>,
    pub recycle_bin: Arc<RecycleBin>,
    pub projector: Arc<EnrollmentProjector>,
    pub events: Arc<EventBus>,
    sync_requests: Mutex<Option<SyncReceiver>>,
}

impl Services {
    /// Create all services with shared database
    pub fn new(db: Arc<CourseDb>, config: &Config) -> Self {
        let events = Arc::new(EventBus::new());
        let (notifier, requests) = create_sync_channel();

        Self {
            versions: Arc::new(VersionService::new(db.clone(), events.clone(), notifier, config)),
            progress: Arc::new(ProgressService::new(db.clone(), events.clone(), config)),
            access: Arc::new(AccessGate::new(db.clone(), events.clone())),
            recycle_bin: Arc::new(RecycleBin::new(db.clone(), events.clone(), config.retention_days)),
            projector: Arc::new(EnrollmentProjector::new(db, events.clone(), config.projector.clone())),
            events,
            sync_requests: Mutex::new(Some(requests)),
        }
    }

    /// Start the projector worker. Only the first call spawns anything.
    pub fn spawn_projector(&self) -> Option<JoinHandle<()>> {
        let requests = self.sync_requests.lock().ok()?.take()?;
        Some(projector::spawn_projector_worker(self.projector.clone(), requests))
    }

    /// Start the periodic retention sweep
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        recycle_bin::spawn_retention_sweeper(self.recycle_bin.clone(), interval)
    }

    /// Start the audit logging listener
    pub fn spawn_event_logger(&self) -> JoinHandle<()> {
        events::spawn_logging_listener(self.events.clone())
    }
}
