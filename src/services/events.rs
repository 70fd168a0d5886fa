//! Event system for course operations
//!
//! Provides an event bus for notifying listeners about course changes.
//! This is the change-subscription interface for anything that pushes
//! updates to clients:
//! - Audit logging
//! - Real-time notifications
//! - Cache invalidation in front-end collaborators

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Course events emitted by services
#[derive(Debug, Clone)]
pub enum CourseEvent {
    CourseCreated {
        course_id: String,
        owner_id: String,
    },
    VersionCreated {
        course_id: String,
        version: i32,
        editor_id: String,
    },
    EnrollmentsSynced {
        course_id: String,
        version: i32,
        succeeded: usize,
        failed: usize,
    },
    Enrolled {
        course_id: String,
        user_id: String,
    },
    Unenrolled {
        course_id: String,
        user_id: String,
    },
    ProgressRecorded {
        course_id: String,
        user_id: String,
        lesson_id: String,
        completed: bool,
    },
    AccessibilityChanged {
        course_id: String,
    },
    CourseSoftDeleted {
        course_id: String,
    },
    CourseRestored {
        course_id: String,
    },
    CoursePurged {
        course_id: String,
        versions_removed: usize,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &CourseEvent);
}

/// Event bus for broadcasting course events
pub struct EventBus {
    sender: broadcast::Sender<CourseEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: CourseEvent) {
        trace!(event = ?event, "Emitting course event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<CourseEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &CourseEvent) {
        match event {
            CourseEvent::VersionCreated {
                course_id,
                version,
                editor_id,
            } => {
                info!(course = %course_id, version, editor = %editor_id, "Course version created");
            }
            CourseEvent::EnrollmentsSynced {
                course_id,
                version,
                succeeded,
                failed,
            } if *failed > 0 => {
                warn!(course = %course_id, version, succeeded, failed, "Enrollment sync partially failed");
            }
            CourseEvent::CourseSoftDeleted { course_id } => {
                info!(course = %course_id, "Course moved to recycle bin");
            }
            CourseEvent::CourseRestored { course_id } => {
                info!(course = %course_id, "Course restored");
            }
            CourseEvent::CoursePurged {
                course_id,
                versions_removed,
            } => {
                info!(course = %course_id, versions = versions_removed, "Course permanently deleted");
            }
            CourseEvent::ProgressRecorded {
                course_id,
                user_id,
                lesson_id,
                completed,
            } => {
                debug!(course = %course_id, user = %user_id, lesson = %lesson_id, completed, "Progress recorded");
            }
            _ => {
                trace!(event = ?event, "Course event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
