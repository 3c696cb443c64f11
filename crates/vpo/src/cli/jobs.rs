//! `vpo jobs` - queue inspection and the worker runner.

use super::error::CliError;
use super::output;
use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, Utc};
use clap::{Args, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use vpo_db::{CancelOutcome, JobStatus, JobStore};
use vpo_worker::{run_cleanup, CleanupOptions, Worker, WorkerOptions};

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// List jobs and queue statistics
    List {
        /// all|queued|running|completed|failed|cancelled
        #[arg(long, default_value = "all")]
        status: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },

    /// Show one job
    Status {
        job_id: String,
        /// Poll until the job reaches a terminal state
        #[arg(long)]
        follow: bool,
        #[arg(long)]
        json: bool,
    },

    /// Run the worker loop until the queue drains or a budget is hit
    Start(StartArgs),

    /// Cancel a job
    Cancel {
        job_id: String,
        /// Finalize a running job immediately instead of waiting for
        /// the worker's next checkpoint
        #[arg(long)]
        force: bool,
    },

    /// Remove old terminal records and orphan scratch artifacts
    Cleanup {
        /// Retention window, e.g. 14d, 48h (default 14d)
        #[arg(long, default_value = "14d")]
        older_than: String,
        #[arg(long)]
        include_backups: bool,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Stop after N processed files
    #[arg(long)]
    max_files: Option<u64>,

    /// Stop after a duration budget, e.g. 2h, 90m
    #[arg(long)]
    max_duration: Option<String>,

    /// Stop claiming new jobs at this local time (HH:MM)
    #[arg(long)]
    end_by: Option<String>,

    /// CPU cores handed to external tools
    #[arg(long)]
    cpu_cores: Option<u32>,

    /// Keep polling when the queue is empty
    #[arg(long)]
    watch: bool,
}

pub async fn run(command: JobsCommand, db_path: &Path) -> Result<(), CliError> {
    let store = JobStore::open(db_path).await?;
    match command {
        JobsCommand::List {
            status,
            limit,
            json,
        } => list(&store, &status, limit, json).await,
        JobsCommand::Status {
            job_id,
            follow,
            json,
        } => status_cmd(&store, &job_id, follow, json).await,
        JobsCommand::Start(args) => start(&store, args).await,
        JobsCommand::Cancel { job_id, force } => cancel(&store, &job_id, force).await,
        JobsCommand::Cleanup {
            older_than,
            include_backups,
            dry_run,
        } => cleanup(&store, &older_than, include_backups, dry_run).await,
    }
}

async fn list(store: &JobStore, status: &str, limit: i64, json: bool) -> Result<(), CliError> {
    let filter = match status {
        "all" => None,
        other => Some(
            other
                .parse::<JobStatus>()
                .map_err(|e| CliError::Generic(anyhow!(e)))?,
        ),
    };
    let jobs = store.list(filter, limit).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&jobs).context("serializing job list")?
        );
    } else {
        let stats = store.stats().await?;
        output::print_queue_stats(&stats);
        println!();
        output::print_jobs_table(&jobs);
    }
    Ok(())
}

async fn status_cmd(
    store: &JobStore,
    job_id: &str,
    follow: bool,
    json: bool,
) -> Result<(), CliError> {
    let id = parse_job_id(job_id)?;
    loop {
        let job = store
            .get(id)
            .await?
            .ok_or_else(|| CliError::Generic(anyhow!("no such job: {}", job_id)))?;

        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&job).context("serializing job")?
            );
        } else {
            output::print_job_detail(&job);
        }

        if !follow || job.status.is_terminal() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        if !json {
            println!();
        }
    }
}

async fn start(store: &JobStore, args: StartArgs) -> Result<(), CliError> {
    let max_duration = args
        .max_duration
        .as_deref()
        .map(parse_duration)
        .transpose()
        .map_err(CliError::Generic)?;
    let end_by = args
        .end_by
        .as_deref()
        .map(parse_end_by)
        .transpose()
        .map_err(CliError::Generic)?;

    let options = WorkerOptions {
        scratch_dir: vpo_logging::scratch_dir(),
        max_files: args.max_files,
        max_duration,
        end_by,
        exit_when_empty: !args.watch,
        ..Default::default()
    };

    let adapter = Arc::new(crate::tools::ProcessExecutionAdapter::from_env(
        args.cpu_cores,
    ));
    let inspector = Arc::new(crate::tools::ProbeInspectionProvider::from_env());
    let worker = Worker::new(store.clone(), adapter, inspector, options);
    let shutdown = worker.shutdown_token();

    let signal = shutdown_signal();
    tokio::pin!(signal);

    let run = worker.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            let summary = result.map_err(|e| CliError::Generic(anyhow!(e)))?;
            println!(
                "processed {} job(s): {} completed, {} failed, {} cancelled",
                summary.processed, summary.completed, summary.failed, summary.cancelled
            );
            Ok(())
        }
        which = &mut signal => {
            // First signal: graceful drain. The worker finishes (or
            // cancels) the in-flight job, then the loop exits.
            shutdown.cancel();
            let _ = (&mut run).await;
            Err(which)
        }
    }
}

async fn cancel(store: &JobStore, job_id: &str, force: bool) -> Result<(), CliError> {
    let id = parse_job_id(job_id)?;
    match store.cancel_request(id).await? {
        CancelOutcome::Acknowledged => {
            if force {
                // Do not wait for the worker's next checkpoint.
                if let Some(job) = store.get(id).await? {
                    if job.status == JobStatus::Running {
                        store
                            .finalize(id, JobStatus::Cancelled, Some("force-cancelled"))
                            .await?;
                    }
                }
            }
            println!("cancelled {}", job_id);
            Ok(())
        }
        CancelOutcome::AlreadyTerminal => {
            println!("job {} is already finished", job_id);
            Ok(())
        }
        CancelOutcome::NotFound => Err(CliError::Generic(anyhow!("no such job: {}", job_id))),
    }
}

async fn cleanup(
    store: &JobStore,
    older_than: &str,
    include_backups: bool,
    dry_run: bool,
) -> Result<(), CliError> {
    let retention = parse_duration(older_than).map_err(CliError::Generic)?;
    let retention = ChronoDuration::from_std(retention)
        .map_err(|e| CliError::Generic(anyhow!("retention out of range: {}", e)))?;

    let options = CleanupOptions {
        retention,
        scratch_dir: vpo_logging::scratch_dir(),
        dry_run,
    };
    let report = run_cleanup(store, &options)
        .await
        .map_err(|e| CliError::Generic(anyhow!(e)))?;
    println!(
        "removed {} record(s), {} artifact(s){}",
        report.records_removed,
        report.artifacts_removed,
        if dry_run { " (dry run)" } else { "" }
    );

    if include_backups {
        let removed = sweep_backups(&vpo_logging::vpo_home().join("backups"), retention, dry_run)
            .map_err(CliError::Generic)?;
        println!("removed {} backup file(s)", removed);
    }
    Ok(())
}

fn sweep_backups(
    dir: &Path,
    retention: ChronoDuration,
    dry_run: bool,
) -> Result<u64, anyhow::Error> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Ok(0);
    };
    let cutoff = Utc::now() - retention;
    let mut removed = 0;
    for entry in entries.flatten() {
        let metadata = entry.metadata()?;
        let modified: DateTime<Utc> = metadata.modified()?.into();
        if modified < cutoff {
            if !dry_run {
                std::fs::remove_file(entry.path())?;
            }
            removed += 1;
        }
    }
    Ok(removed)
}

fn parse_job_id(text: &str) -> Result<Uuid, CliError> {
    Uuid::parse_str(text).map_err(|_| CliError::Generic(anyhow!("invalid job id: {}", text)))
}

/// Parse durations like `2h`, `90m`, `45s`, `14d` or `1h30m`.
pub fn parse_duration(text: &str) -> Result<Duration, anyhow::Error> {
    let text = text.trim();
    if text.is_empty() {
        return Err(anyhow!("empty duration"));
    }
    if let Ok(seconds) = text.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| anyhow!("invalid duration: {}", text))?;
        digits.clear();
        let unit = match ch {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            other => return Err(anyhow!("unknown duration unit '{}'", other)),
        };
        total += value * unit;
    }
    if !digits.is_empty() {
        return Err(anyhow!("duration missing unit: {}", text));
    }
    Ok(Duration::from_secs(total))
}

/// `HH:MM` in local time; rolls over to tomorrow when already past.
fn parse_end_by(text: &str) -> Result<DateTime<Utc>, anyhow::Error> {
    let time = NaiveTime::parse_from_str(text, "%H:%M")
        .map_err(|_| anyhow!("invalid end time '{}', expected HH:MM", text))?;
    let now = Local::now();
    let today = now.date_naive().and_time(time);
    let local = if today > now.naive_local() {
        today
    } else {
        today + ChronoDuration::days(1)
    };
    let resolved = local
        .and_local_timezone(Local)
        .single()
        .ok_or_else(|| anyhow!("ambiguous local time '{}'", text))?;
    Ok(resolved.with_timezone(&Utc))
}

async fn shutdown_signal() -> CliError {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return CliError::Interrupted;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => CliError::Interrupted,
            _ = term.recv() => CliError::Terminated,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        CliError::Interrupted
    }
}
