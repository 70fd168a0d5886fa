//! SQLite database module for course storage
//!
//! ## Architecture
//!
//! - Course aggregates, immutable versions and the lesson registry
//! - Enrollments with their sticky progress map and denormalized snapshot
//! - Append-only progress facts
//! - Durable sync queue feeding the enrollment projector
//!
//! Every repository function takes `&mut SqliteConnection` so services can
//! compose several of them inside one transaction.
//!
//! ## Tables
//!
//! - `courses` - Course aggregate (live lessons, accessibility, recycle bin state)
//! - `course_versions` - Immutable lesson snapshots, PK (course_id, version)
//! - `lesson_registry` - Which course owns each lesson id, and when it was retired
//! - `enrollments` - Learner enrollments with denormalized lesson metadata
//! - `enrollment_progress` - Per-lesson completion, OR-merged
//! - `progress_facts` - Append-only progress reports
//! - `sync_queue` - Pending/failed enrollment projections

pub mod courses;
pub mod diesel_schema;
pub mod enrollments;
pub mod lessons;
pub mod models;
pub mod progress;
pub mod schema;
pub mod sync_queue;
pub mod versions;

use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::CourseError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Sets the busy timeout on every connection the pool opens
#[derive(Debug)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {};",
            self.busy_timeout.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// SQLite database for courses, enrollments and progress
pub struct CourseDb {
    pool: DbPool,
}

impl CourseDb {
    /// Open or create the course database under the configured storage dir
    pub fn open(config: &Config) -> Result<Self, CourseError> {
        std::fs::create_dir_all(&config.storage_dir)?;
        Self::open_path(
            &config.database_path(),
            config.pool_size,
            Duration::from_millis(config.busy_timeout_ms),
        )
    }

    /// Open or create a database file with an explicit pool size
    pub fn open_path(db_path: &Path, pool_size: u32, busy_timeout: Duration) -> Result<Self, CourseError> {
        info!("Opening SQLite database at {:?}", db_path);

        let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(ConnectionOptions { busy_timeout }))
            .build(manager)
            .map_err(|e| CourseError::Pool(format!("Failed to build pool: {}", e)))?;

        let db = Self { pool };

        // WAL lets readers proceed while a writer holds the lock
        db.conn()?
            .batch_execute("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| CourseError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    ///
    /// Each SQLite in-memory connection is its own database, so the pool is
    /// capped at a single connection.
    pub fn open_in_memory() -> Result<Self, CourseError> {
        debug!("Opening in-memory SQLite database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout: Duration::from_millis(5000),
            }))
            .build(manager)
            .map_err(|e| CourseError::Pool(format!("Failed to build in-memory pool: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), CourseError> {
        let mut conn = self.conn()?;
        schema::init_schema(&mut conn)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<PooledConn, CourseError> {
        self.pool
            .get()
            .map_err(|e| CourseError::Pool(format!("Failed to get connection: {}", e)))
    }

    /// Run read operations on a pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CourseError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, CourseError>,
    {
        let mut conn = self.conn()?;
        f(&mut conn)
    }

    /// Run a write inside `BEGIN IMMEDIATE`, so the writer lock is taken up
    /// front instead of on the first write statement
    pub fn write<F, T>(&self, f: F) -> Result<T, CourseError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, CourseError>,
    {
        let mut conn = self.conn()?;
        conn.immediate_transaction(f)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, CourseError> {
        use diesel_schema::{course_versions, enrollments, progress_facts, sync_queue};

        self.with_conn(|conn| {
            let course_count = courses::count_courses(conn, false)?;
            let deleted_count = courses::count_courses(conn, true)?;
            let version_count: i64 = course_versions::table.count().get_result(conn)?;
            let enrollment_count: i64 = enrollments::table.count().get_result(conn)?;
            let fact_count: i64 = progress_facts::table.count().get_result(conn)?;
            let pending_syncs: i64 = sync_queue::table
                .filter(sync_queue::status.eq(models::sync_status::PENDING))
                .count()
                .get_result(conn)?;

            Ok(DbStats {
                course_count: course_count as u64,
                deleted_course_count: deleted_count as u64,
                version_count: version_count as u64,
                enrollment_count: enrollment_count as u64,
                progress_fact_count: fact_count as u64,
                pending_syncs: pending_syncs as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub course_count: u64,
    pub deleted_course_count: u64,
    pub version_count: u64,
    pub enrollment_count: u64,
    pub progress_fact_count: u64,
    pub pending_syncs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_and_stats() {
        let db = CourseDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.course_count, 0);
        assert_eq!(stats.pending_syncs, 0);
    }

    #[test]
    fn test_pooled_connections_wait_on_busy_lock() {
        #[derive(diesel::QueryableByName)]
        struct BusyTimeout {
            #[diesel(sql_type = diesel::sql_types::Integer)]
            timeout: i32,
        }

        let dir = tempfile::tempdir().unwrap();
        let db = CourseDb::open_path(&dir.path().join("courses.db"), 2, Duration::from_millis(1234)).unwrap();
        let row: BusyTimeout = db
            .with_conn(|conn| Ok(diesel::sql_query("PRAGMA busy_timeout").get_result(conn)?))
            .unwrap();
        assert_eq!(row.timeout, 1234);
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let db = CourseDb::open(&config).unwrap();
        assert!(config.database_path().exists());
        assert_eq!(db.stats().unwrap().version_count, 0);
    }
}
