//! Worker loop.
//!
//! One job in flight at a time. The claim is atomic in the store; while
//! a job runs, a background heartbeat task updates liveness and
//! progress, polls the cancel flag, and enforces the shutdown drain
//! timeout. Panics inside job execution are caught at the top of the
//! loop and finalized as FAILED; the loop continues.

use crate::adapters::{
    ExecutionAdapter, ExecutionOutcome, InspectionProvider, PluginMetadataProvider,
};
use crate::cancel::CancellationToken;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};
use vpo_db::{JobKind, JobRecord, JobStatus, JobStore};
use vpo_policy::load_policy_str;

/// Worker loop errors. Job-level failures never surface here; they are
/// persisted on the job record instead.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] vpo_db::StoreError),

    #[error("worker setup error: {0}")]
    Setup(String),
}

/// Runtime options. Defaults follow the service configuration: 10 s
/// heartbeat, 5x staleness with a 60 s floor, 3 attempts, 30 s drain.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub worker_id: String,
    pub scratch_dir: PathBuf,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub stale_multiplier: u32,
    pub max_attempts: i64,
    pub drain_timeout: Duration,
    /// Optional overall per-job timeout.
    pub job_timeout: Option<Duration>,
    pub max_files: Option<u64>,
    pub max_duration: Option<Duration>,
    /// Wall-clock end time; no new job is claimed past it.
    pub end_by: Option<DateTime<Utc>>,
    /// Stop when the queue is empty instead of polling forever.
    pub exit_when_empty: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            worker_id: format!("vpo-worker-{}", std::process::id()),
            scratch_dir: std::env::temp_dir().join("vpo-scratch"),
            poll_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(10),
            stale_multiplier: 5,
            max_attempts: 3,
            drain_timeout: Duration::from_secs(30),
            job_timeout: None,
            max_files: None,
            max_duration: None,
            end_by: None,
            exit_when_empty: true,
        }
    }
}

impl WorkerOptions {
    /// Heartbeats older than this mark a worker as crashed.
    pub fn stale_threshold(&self) -> ChronoDuration {
        let threshold = self.heartbeat_interval * self.stale_multiplier.max(1);
        let floored = threshold.max(Duration::from_secs(60));
        ChronoDuration::from_std(floored).unwrap_or_else(|_| ChronoDuration::seconds(60))
    }
}

/// Tally of one worker run.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerSummary {
    pub processed: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct ProgressState {
    percent: f64,
    detail: String,
}

/// Plugin metadata source plus the plugin names to query per file.
type MetadataSource = (Arc<dyn PluginMetadataProvider>, Vec<String>);

pub struct Worker {
    store: JobStore,
    adapter: Arc<dyn ExecutionAdapter>,
    inspector: Arc<dyn InspectionProvider>,
    metadata: Option<MetadataSource>,
    options: WorkerOptions,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        store: JobStore,
        adapter: Arc<dyn ExecutionAdapter>,
        inspector: Arc<dyn InspectionProvider>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            store,
            adapter,
            inspector,
            metadata: None,
            options,
            shutdown: CancellationToken::new(),
        }
    }

    /// Populate inspections with plugin metadata before evaluation.
    pub fn with_plugin_metadata(
        mut self,
        provider: Arc<dyn PluginMetadataProvider>,
        plugins: Vec<String>,
    ) -> Self {
        self.metadata = Some((provider, plugins));
        self
    }

    /// Token that requests a graceful shutdown: the in-flight job gets
    /// the drain timeout to finish, then is cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until an exit condition holds: queue empty (when configured),
    /// max files, duration budget, wall-clock end time, or shutdown.
    pub async fn run(&self) -> Result<WorkerSummary, WorkerError> {
        // One-shot recovery sweep before claiming anything.
        let swept = self
            .store
            .reset_stale(
                Utc::now(),
                self.options.stale_threshold(),
                self.options.max_attempts,
            )
            .await?;
        if swept > 0 {
            info!("Recovered {} stale job(s) on startup", swept);
        }

        std::fs::create_dir_all(&self.options.scratch_dir)
            .map_err(|e| WorkerError::Setup(format!("scratch dir: {}", e)))?;

        let started = Instant::now();
        let mut summary = WorkerSummary::default();
        let mut claim_errors: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                info!("Shutdown requested; worker loop exiting");
                break;
            }
            if let Some(max) = self.options.max_files {
                if summary.processed >= max {
                    info!("Max files ({}) reached", max);
                    break;
                }
            }
            if let Some(budget) = self.options.max_duration {
                if started.elapsed() >= budget {
                    info!("Duration budget exhausted");
                    break;
                }
            }
            if let Some(end_by) = self.options.end_by {
                if Utc::now() >= end_by {
                    info!("Wall-clock end time reached");
                    break;
                }
            }

            match self.store.claim_next(&self.options.worker_id).await {
                Ok(Some(job)) => {
                    claim_errors = 0;
                    let status = self.process(job).await;
                    summary.processed += 1;
                    match status {
                        JobStatus::Completed => summary.completed += 1,
                        JobStatus::Cancelled => summary.cancelled += 1,
                        _ => summary.failed += 1,
                    }
                }
                Ok(None) => {
                    claim_errors = 0;
                    if self.options.exit_when_empty {
                        info!("Queue empty; worker loop exiting");
                        break;
                    }
                    tokio::time::sleep(self.options.poll_interval).await;
                }
                Err(e) => {
                    claim_errors = claim_errors.saturating_add(1);
                    let backoff = Duration::from_secs(2u64.pow(claim_errors.min(5)));
                    warn!("Claim failed ({}); backing off {:?}", e, backoff);
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        info!(
            "Worker done: {} processed ({} completed, {} failed, {} cancelled)",
            summary.processed, summary.completed, summary.failed, summary.cancelled
        );
        Ok(summary)
    }

    /// Drive one claimed job to a terminal state. Never returns an
    /// error: every failure path is persisted on the record.
    async fn process(&self, job: JobRecord) -> JobStatus {
        let job_id = job.id;
        let job_cancel = CancellationToken::new();
        let progress = Arc::new(Mutex::new(ProgressState::default()));

        let heartbeat = self.spawn_heartbeat(job_id, job_cancel.clone(), Arc::clone(&progress));

        // Execution runs in its own task so a panic is contained.
        let body = {
            let adapter = Arc::clone(&self.adapter);
            let inspector = Arc::clone(&self.inspector);
            let metadata = self.metadata.clone();
            let options = self.options.clone();
            let job = job.clone();
            let cancel = job_cancel.clone();
            let progress = Arc::clone(&progress);
            tokio::spawn(async move {
                run_job(job, adapter, inspector, metadata, options, cancel, progress).await
            })
        };

        let outcome = body.await;
        heartbeat.abort();

        let (status, message) = match outcome {
            Ok(JobResult::Done(ExecutionOutcome::Success { .. })) => {
                if job_cancel.is_cancelled() {
                    (JobStatus::Cancelled, None)
                } else {
                    (JobStatus::Completed, None)
                }
            }
            Ok(JobResult::Done(ExecutionOutcome::Failure { kind, message })) => {
                if job_cancel.is_cancelled() {
                    (JobStatus::Cancelled, None)
                } else {
                    (
                        JobStatus::Failed,
                        Some(format!("{}: {}", kind.as_str(), message)),
                    )
                }
            }
            Ok(JobResult::Cancelled) => (JobStatus::Cancelled, None),
            Ok(JobResult::Error(message)) => (JobStatus::Failed, Some(message)),
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    format!("unexpected_error: job task panicked: {}", join_error)
                } else {
                    format!("unexpected_error: job task aborted: {}", join_error)
                };
                error!("Job {}: {}", job_id, message);
                (JobStatus::Failed, Some(message))
            }
        };

        if let Err(e) = self
            .store
            .finalize(job_id, status, message.as_deref())
            .await
        {
            // Typically the job was cancelled out from under us.
            warn!("Failed to finalize job {}: {}", job_id, e);
        }

        // Completed jobs do not keep scratch artifacts around.
        if status == JobStatus::Completed {
            let scratch = self.options.scratch_dir.join(job_id.to_string());
            if scratch.exists() {
                let _ = std::fs::remove_dir_all(&scratch);
            }
        }

        status
    }

    /// Heartbeat task: liveness + progress piggyback, cancel-flag
    /// polling, and drain-timeout enforcement after shutdown.
    fn spawn_heartbeat(
        &self,
        job_id: uuid::Uuid,
        job_cancel: CancellationToken,
        progress: Arc<Mutex<ProgressState>>,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let shutdown = self.shutdown.clone();
        let drain_timeout = self.options.drain_timeout;
        let interval = self.options.heartbeat_interval.min(Duration::from_secs(10));

        tokio::spawn(async move {
            let mut shutdown_at: Option<Instant> = None;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;

                let (percent, detail) = {
                    let state = progress.lock().expect("progress lock");
                    (state.percent, state.detail.clone())
                };
                let detail = if detail.is_empty() {
                    None
                } else {
                    Some(detail)
                };
                if let Err(e) = store.heartbeat(job_id, percent, detail.as_deref()).await {
                    // Heartbeat store errors are logged, not fatal.
                    warn!("Heartbeat for job {} failed: {}", job_id, e);
                }

                match store.cancel_requested(job_id).await {
                    Ok(true) => job_cancel.cancel(),
                    Ok(false) => {}
                    Err(e) => warn!("Cancel poll for job {} failed: {}", job_id, e),
                }

                if shutdown.is_cancelled() {
                    let since = shutdown_at.get_or_insert_with(Instant::now);
                    if since.elapsed() >= drain_timeout {
                        job_cancel.cancel();
                    }
                }
            }
        })
    }
}

enum JobResult {
    Done(ExecutionOutcome),
    Cancelled,
    Error(String),
}

async fn run_job(
    job: JobRecord,
    adapter: Arc<dyn ExecutionAdapter>,
    inspector: Arc<dyn InspectionProvider>,
    metadata: Option<MetadataSource>,
    options: WorkerOptions,
    cancel: CancellationToken,
    progress: Arc<Mutex<ProgressState>>,
) -> JobResult {
    info!("Processing job {} ({} {})", job.id, job.kind, job.source_path);

    let report = |percent: f64, detail: &str| {
        let mut state = progress.lock().expect("progress lock");
        // Progress never regresses within a run.
        state.percent = state.percent.max(percent.clamp(0.0, 100.0));
        state.detail = detail.to_string();
    };

    match job.kind {
        JobKind::Move => move_file(&job, &report).await,
        JobKind::Transcode | JobKind::PlanExecute => {
            execute_plan(&job, adapter, inspector, metadata, &options, &cancel, &report).await
        }
    }
}

async fn move_file(job: &JobRecord, report: &(dyn Fn(f64, &str) + Send + Sync)) -> JobResult {
    let Some(target) = job.target_path.as_deref() else {
        return JobResult::Error("move job has no target path".to_string());
    };
    if let Some(parent) = std::path::Path::new(target).parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return JobResult::Error(format!("io_error: create target dir: {}", e));
        }
    }
    report(10.0, "moving");
    match tokio::fs::rename(&job.source_path, target).await {
        Ok(()) => {}
        Err(_) => {
            // Cross-device move: copy then remove.
            if let Err(e) = tokio::fs::copy(&job.source_path, target).await {
                return JobResult::Error(format!("io_error: copy: {}", e));
            }
            if let Err(e) = tokio::fs::remove_file(&job.source_path).await {
                return JobResult::Error(format!("io_error: remove source: {}", e));
            }
        }
    }
    report(100.0, "moved");
    JobResult::Done(ExecutionOutcome::Success {
        output_paths: vec![PathBuf::from(target)],
    })
}

async fn execute_plan(
    job: &JobRecord,
    adapter: Arc<dyn ExecutionAdapter>,
    inspector: Arc<dyn InspectionProvider>,
    metadata: Option<MetadataSource>,
    options: &WorkerOptions,
    cancel: &CancellationToken,
    report: &(dyn Fn(f64, &str) + Send + Sync),
) -> JobResult {
    let policy_text = match tokio::fs::read_to_string(&job.policy_ref).await {
        Ok(text) => text,
        Err(e) => return JobResult::Error(format!("policy '{}': {}", job.policy_ref, e)),
    };
    let policy = match load_policy_str(&policy_text) {
        Ok(loaded) => {
            for warning in &loaded.warnings {
                warn!("Policy {}: {}", job.policy_ref, warning);
            }
            loaded.policy
        }
        Err(e) => return JobResult::Error(format!("policy '{}': {}", job.policy_ref, e)),
    };

    report(5.0, "inspecting");
    let source = std::path::Path::new(&job.source_path);
    let mut inspection = match inspector.inspect(source) {
        Ok(inspection) => inspection,
        Err(e) => return JobResult::Error(format!("inspect '{}': {}", job.source_path, e)),
    };

    if let Some((provider, plugins)) = &metadata {
        for plugin in plugins {
            let fields = provider.metadata_for(source, plugin);
            if !fields.is_empty() {
                inspection
                    .plugin_metadata
                    .entry(plugin.clone())
                    .or_default()
                    .extend(fields);
            }
        }
    }

    report(10.0, "planning");
    let plan = match vpo_engine::build_plan(&inspection, &policy) {
        Ok(plan) => plan,
        Err(e) => return JobResult::Error(format!("plan: {}", e)),
    };
    for warning in &plan.warnings {
        warn!("Job {}: {}", job.id, warning);
    }
    if plan.is_empty() {
        report(100.0, "nothing to do");
        return JobResult::Done(ExecutionOutcome::Success {
            output_paths: Vec::new(),
        });
    }
    if cancel.is_cancelled() {
        return JobResult::Cancelled;
    }

    let scratch = options.scratch_dir.join(job.id.to_string());
    if let Err(e) = tokio::fs::create_dir_all(&scratch).await {
        return JobResult::Error(format!("io_error: scratch dir: {}", e));
    }

    report(15.0, "executing");
    let execution = adapter.execute(&plan, &inspection, &scratch, report, cancel);
    let outcome = match options.job_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, execution).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                return JobResult::Error(format!(
                    "tool_timeout: job exceeded {:?} overall budget",
                    timeout
                ));
            }
        },
        None => execution.await,
    };

    if cancel.is_cancelled() {
        return JobResult::Cancelled;
    }
    JobResult::Done(outcome)
}
