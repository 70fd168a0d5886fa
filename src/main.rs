//! Lamad Courses Daemon
//!
//! Owns the course database and runs the background work that keeps it
//! consistent: the enrollment projector and the recycle bin sweep.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! lamad-courses
//!
//! # Start with custom config
//! lamad-courses --config /path/to/config.toml
//!
//! # Custom storage directory and a shorter retention period
//! lamad-courses --storage-dir /data/courses --retention-days 3
//!
//! # Run one retention sweep and exit (for cron)
//! lamad-courses --sweep-once
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use lamad_courses::{Config, CourseDb, Services};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lamad-courses")]
#[command(about = "Versioned course content and learner progress for Lamad")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "LAMAD_COURSES_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory (holds courses.db)
    #[arg(long, env = "LAMAD_COURSES_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Days a soft-deleted course stays restorable
    #[arg(long)]
    retention_days: Option<i64>,

    /// Seconds between retention sweeps
    #[arg(long)]
    sweep_interval_secs: Option<u64>,

    /// Run a single retention sweep, then exit
    #[arg(long)]
    sweep_once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lamad_courses=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path).with_context(|| format!("reading {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(days) = args.retention_days {
        config.retention_days = days;
    }
    if let Some(secs) = args.sweep_interval_secs {
        config.sweep_interval_secs = secs;
    }
    config.validate()?;

    info!(
        storage_dir = %config.storage_dir.display(),
        retention_days = config.retention_days,
        "Starting lamad-courses"
    );

    let db = Arc::new(CourseDb::open(&config)?);

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let services = Services::new(db.clone(), &config);

    if args.sweep_once {
        let report = services.recycle_bin.sweep_expired_at(Utc::now())?;
        info!(
            purged = report.purged.len(),
            blocked = report.blocked.len(),
            "Retention sweep complete"
        );
        return Ok(());
    }

    let stats = db.stats()?;
    info!(
        courses = stats.course_count,
        in_recycle_bin = stats.deleted_course_count,
        enrollments = stats.enrollment_count,
        pending_syncs = stats.pending_syncs,
        "Course database ready"
    );

    let logger = services.spawn_event_logger();
    let projector = services.spawn_projector();
    let sweeper = services.spawn_sweeper(config.sweep_interval());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    sweeper.abort();
    if let Some(projector) = projector {
        projector.abort();
    }
    logger.abort();

    info!("lamad-courses stopped");
    Ok(())
}
