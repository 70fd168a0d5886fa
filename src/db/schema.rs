//! Database schema definitions

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::CourseError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

#[derive(QueryableByName)]
struct SchemaVersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), CourseError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version != SCHEMA_VERSION {
        return Err(CourseError::Internal(format!(
            "Unsupported database schema v{} (expected v{})",
            current_version, SCHEMA_VERSION
        )));
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, CourseError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(|e| CourseError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let row = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .get_result::<SchemaVersionRow>(conn)
        .optional()
        .map_err(|e| CourseError::Internal(format!("Failed to read schema_version: {}", e)))?;

    Ok(row.map(|r| r.version).unwrap_or(0))
}

/// Set schema version
fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), CourseError> {
    diesel::sql_query("DELETE FROM schema_version")
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    diesel::sql_query("INSERT INTO schema_version (version) VALUES (?)")
        .bind::<Integer, _>(version)
        .execute(conn)
        .map_err(|e| CourseError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &mut SqliteConnection) -> Result<(), CourseError> {
    conn.batch_execute(COURSE_SCHEMA)
        .map_err(|e| CourseError::Internal(format!("Failed to create course tables: {}", e)))?;

    conn.batch_execute(ENROLLMENT_SCHEMA)
        .map_err(|e| CourseError::Internal(format!("Failed to create enrollment tables: {}", e)))?;

    conn.batch_execute(INDEXES_SCHEMA)
        .map_err(|e| CourseError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Course, version and lesson identity tables
const COURSE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS courses (
    id TEXT PRIMARY KEY NOT NULL,
    owner_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    current_version INTEGER NOT NULL DEFAULT 0,
    lessons_json TEXT NOT NULL DEFAULT '[]',
    accessibility_json TEXT NOT NULL DEFAULT '{"state":"accessible"}',
    soft_deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    history_json TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS course_versions (
    course_id TEXT NOT NULL,
    version INTEGER NOT NULL CHECK (version >= 1),
    lessons_json TEXT NOT NULL,
    changelog TEXT NOT NULL,
    update_type TEXT NOT NULL,
    editor_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (course_id, version)
);

CREATE TABLE IF NOT EXISTS lesson_registry (
    lesson_id TEXT PRIMARY KEY NOT NULL,
    course_id TEXT NOT NULL,
    introduced_in INTEGER NOT NULL,
    retired_in INTEGER,
    last_duration_seconds INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS sync_queue (
    id TEXT PRIMARY KEY NOT NULL,
    course_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    rounds INTEGER NOT NULL DEFAULT 0,
    failed_ids_json TEXT NOT NULL DEFAULT '[]',
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Enrollment, progress map and progress fact tables
const ENROLLMENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS enrollments (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    course_id TEXT NOT NULL,
    snapshot_json TEXT NOT NULL DEFAULT '{}',
    snapshot_version INTEGER NOT NULL DEFAULT 0,
    enrolled_at TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    UNIQUE (user_id, course_id)
);

CREATE TABLE IF NOT EXISTS enrollment_progress (
    enrollment_id TEXT NOT NULL,
    lesson_id TEXT NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (enrollment_id, lesson_id)
);

CREATE TABLE IF NOT EXISTS progress_facts (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    course_id TEXT NOT NULL,
    lesson_id TEXT NOT NULL,
    watch_seconds INTEGER NOT NULL,
    completed INTEGER NOT NULL,
    recorded_at TEXT NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_courses_owner ON courses(owner_id);
CREATE INDEX IF NOT EXISTS idx_courses_deleted ON courses(soft_deleted, deleted_at);
CREATE INDEX IF NOT EXISTS idx_lesson_registry_course ON lesson_registry(course_id);
CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id);
CREATE INDEX IF NOT EXISTS idx_progress_facts_enrollment ON progress_facts(user_id, course_id);
CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status, course_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        init_schema(&mut conn).unwrap();
        init_schema(&mut conn).unwrap();

        assert_eq!(get_schema_version(&mut conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_unknown_schema_version_rejected() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        init_schema(&mut conn).unwrap();
        set_schema_version(&mut conn, SCHEMA_VERSION + 1).unwrap();

        assert!(matches!(init_schema(&mut conn), Err(CourseError::Internal(_))));
    }
}
