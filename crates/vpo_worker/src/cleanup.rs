//! Cleanup of terminal job records and orphaned scratch artifacts.

use crate::worker::WorkerError;
use chrono::{Duration, Utc};
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;
use vpo_db::{JobStatus, JobStore};

#[derive(Debug, Clone)]
pub struct CleanupOptions {
    /// Terminal records older than this are removed.
    pub retention: Duration,
    pub scratch_dir: PathBuf,
    /// Report what would be removed without removing it.
    pub dry_run: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            retention: Duration::days(14),
            scratch_dir: std::env::temp_dir().join("vpo-scratch"),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupReport {
    pub records_removed: u64,
    pub artifacts_removed: u64,
}

/// Remove terminal job records past retention and scratch entries whose
/// job-id prefix no longer maps to a live job.
pub async fn run_cleanup(
    store: &JobStore,
    options: &CleanupOptions,
) -> Result<CleanupReport, WorkerError> {
    let mut report = CleanupReport::default();
    let cutoff = Utc::now() - options.retention;

    if !options.dry_run {
        report.records_removed = store
            .purge_older_than(
                cutoff,
                &[JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled],
            )
            .await?;
    }

    let entries = match std::fs::read_dir(&options.scratch_dir) {
        Ok(entries) => entries,
        // Nothing to clean if the scratch dir does not exist yet.
        Err(_) => return Ok(report),
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(job_id) = job_id_prefix(&name) else {
            continue;
        };

        let live = match store.get(job_id).await? {
            Some(job) => !job.status.is_terminal(),
            None => false,
        };
        if live {
            continue;
        }

        debug!("Removing orphan scratch entry {}", name);
        if !options.dry_run {
            let path = entry.path();
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path).is_ok()
            } else {
                std::fs::remove_file(&path).is_ok()
            };
            if removed {
                report.artifacts_removed += 1;
            }
        } else {
            report.artifacts_removed += 1;
        }
    }

    info!(
        "Cleanup: {} record(s), {} artifact(s){}",
        report.records_removed,
        report.artifacts_removed,
        if options.dry_run { " (dry run)" } else { "" }
    );
    Ok(report)
}

/// Scratch entries are named `<job-id>` or `<job-id>-<suffix>`.
fn job_id_prefix(name: &str) -> Option<Uuid> {
    if name.len() < 36 {
        return None;
    }
    Uuid::parse_str(&name[..36]).ok()
}
