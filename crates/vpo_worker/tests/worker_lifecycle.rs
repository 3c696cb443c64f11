//! Worker lifecycle integration tests with a mock execution adapter.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vpo_db::{JobKind, JobStatus, JobStore, NewJob};
use vpo_engine::Plan;
use vpo_inspect::{ContainerKind, Inspection, InspectionError, Track};
use vpo_worker::{
    CancellationToken, ExecutionAdapter, ExecutionFailureKind, ExecutionOutcome,
    InspectionProvider, ProgressCallback, Worker, WorkerOptions,
};

struct StaticInspector;

impl InspectionProvider for StaticInspector {
    fn inspect(&self, path: &Path) -> Result<Inspection, InspectionError> {
        Ok(Inspection::new(path, ContainerKind::Mkv).with_tracks(vec![
            Track::video(0, "h264"),
            Track::audio(1, "ac3", "eng").with_channels(6),
            Track::audio(2, "aac", "fra").with_channels(2),
        ]))
    }
}

/// Adapter scripted per test: success, failure, or wait-for-cancel.
enum Script {
    Succeed,
    Fail,
    WaitForCancel,
}

struct MockAdapter {
    script: Script,
    calls: AtomicUsize,
}

impl MockAdapter {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ExecutionAdapter for MockAdapter {
    async fn execute(
        &self,
        _plan: &Plan,
        inspection: &Inspection,
        _scratch_dir: &Path,
        progress: ProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        progress(50.0, "halfway");
        match self.script {
            Script::Succeed => {
                progress(100.0, "done");
                ExecutionOutcome::Success {
                    output_paths: vec![inspection.path.clone()],
                }
            }
            Script::Fail => ExecutionOutcome::Failure {
                kind: ExecutionFailureKind::ToolFailed,
                message: "muxer exited with status 2".to_string(),
            },
            Script::WaitForCancel => {
                while !cancel.is_cancelled() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                ExecutionOutcome::Failure {
                    kind: ExecutionFailureKind::PartialActionFailure,
                    message: "stopped at action boundary".to_string(),
                }
            }
        }
    }
}

const POLICY: &str = r#"
schema_version: 13
audio_language_preference: [eng]
audio_filter:
  languages: [eng]
"#;

fn write_policy(dir: &tempfile::TempDir) -> String {
    let path = dir.path().join("policy.yaml");
    std::fs::write(&path, POLICY).unwrap();
    path.to_string_lossy().into_owned()
}

fn options(scratch: &tempfile::TempDir) -> WorkerOptions {
    WorkerOptions {
        worker_id: "test-worker".to_string(),
        scratch_dir: scratch.path().to_path_buf(),
        poll_interval: Duration::from_millis(20),
        heartbeat_interval: Duration::from_millis(25),
        exit_when_empty: true,
        ..Default::default()
    }
}

async fn enqueue_plan_job(store: &JobStore, policy_ref: &str) -> vpo_db::JobRecord {
    store
        .enqueue(NewJob {
            kind: JobKind::PlanExecute,
            source_path: "/media/film.mkv".to_string(),
            target_path: None,
            policy_ref: policy_ref.to_string(),
            priority: 0,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn successful_job_completes_with_full_progress() {
    let store = JobStore::open_in_memory().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let policy_ref = write_policy(&dir);
    let job = enqueue_plan_job(&store, &policy_ref).await;

    let adapter = MockAdapter::new(Script::Succeed);
    let worker = Worker::new(
        store.clone(),
        adapter.clone(),
        Arc::new(StaticInspector),
        options(&dir),
    );
    let summary = worker.run().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);

    let record = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.progress_percent, 100.0);
    assert!(record.finished_at.is_some());
}

#[tokio::test]
async fn failed_execution_lands_on_the_record() {
    let store = JobStore::open_in_memory().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let policy_ref = write_policy(&dir);
    let job = enqueue_plan_job(&store, &policy_ref).await;

    let worker = Worker::new(
        store.clone(),
        MockAdapter::new(Script::Fail),
        Arc::new(StaticInspector),
        options(&dir),
    );
    let summary = worker.run().await.unwrap();
    assert_eq!(summary.failed, 1);

    let record = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    let message = record.error_message.unwrap();
    assert!(message.starts_with("tool_failed:"), "got: {}", message);
}

#[tokio::test]
async fn bad_policy_fails_the_job_not_the_worker() {
    let store = JobStore::open_in_memory().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let policy_path = dir.path().join("broken.yaml");
    std::fs::write(&policy_path, "schema_version: 99").unwrap();
    let job = enqueue_plan_job(&store, &policy_path.to_string_lossy()).await;

    let worker = Worker::new(
        store.clone(),
        MockAdapter::new(Script::Succeed),
        Arc::new(StaticInspector),
        options(&dir),
    );
    let summary = worker.run().await.unwrap();
    assert_eq!(summary.failed, 1);

    let record = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error_message.unwrap().contains("schema_version"));
}

#[tokio::test]
async fn cancel_request_stops_a_running_job() {
    let store = JobStore::open_in_memory().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let policy_ref = write_policy(&dir);
    let job = enqueue_plan_job(&store, &policy_ref).await;

    let worker = Worker::new(
        store.clone(),
        MockAdapter::new(Script::WaitForCancel),
        Arc::new(StaticInspector),
        options(&dir),
    );

    let store_for_cancel = store.clone();
    let job_id = job.id;
    let canceller = tokio::spawn(async move {
        // Wait for the job to be claimed, then request cancellation.
        loop {
            let record = store_for_cancel.get(job_id).await.unwrap().unwrap();
            if record.status == JobStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        store_for_cancel.cancel_request(job_id).await.unwrap();
    });

    let summary = worker.run().await.unwrap();
    canceller.await.unwrap();

    assert_eq!(summary.cancelled, 1);
    let record = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn crashed_job_is_recovered_and_reprocessed() {
    let store = JobStore::open_in_memory().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let policy_ref = write_policy(&dir);
    let job = enqueue_plan_job(&store, &policy_ref).await;

    // Simulate a worker that claimed the job and died: heartbeat is 10
    // minutes old, attempt_count is 1.
    let claimed = store.claim_next("dead-worker").await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    let stale = Utc::now() - ChronoDuration::minutes(10);
    sqlx::query("UPDATE vpo_jobs SET worker_heartbeat_at = ? WHERE id = ?")
        .bind(stale)
        .bind(job.id)
        .execute(store.pool())
        .await
        .unwrap();

    let worker = Worker::new(
        store.clone(),
        MockAdapter::new(Script::Succeed),
        Arc::new(StaticInspector),
        options(&dir),
    );
    let summary = worker.run().await.unwrap();

    assert_eq!(summary.completed, 1);
    let record = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    // Recovery requeued without touching the count; the reclaim bumped it.
    assert_eq!(record.attempt_count, 2);
}

#[tokio::test]
async fn plugin_metadata_reaches_the_evaluation() {
    use std::collections::BTreeMap;
    use vpo_inspect::MetaValue;
    use vpo_worker::PluginMetadataProvider;

    struct Tagger;
    impl PluginMetadataProvider for Tagger {
        fn metadata_for(&self, _path: &Path, plugin: &str) -> BTreeMap<String, MetaValue> {
            let mut fields = BTreeMap::new();
            if plugin == "tagger" {
                fields.insert("keep".to_string(), MetaValue::String("yes".to_string()));
            }
            fields
        }
    }

    /// Succeeds only when the plan carries the rule-driven action.
    struct AssertingAdapter;
    #[async_trait]
    impl ExecutionAdapter for AssertingAdapter {
        async fn execute(
            &self,
            plan: &Plan,
            _inspection: &Inspection,
            _scratch_dir: &Path,
            _progress: ProgressCallback<'_>,
            _cancel: &CancellationToken,
        ) -> ExecutionOutcome {
            let fired = plan
                .actions
                .iter()
                .any(|a| matches!(a, vpo_policy::Action::SetDefault { .. }));
            if fired {
                ExecutionOutcome::Success {
                    output_paths: vec![],
                }
            } else {
                ExecutionOutcome::Failure {
                    kind: ExecutionFailureKind::PartialActionFailure,
                    message: "rule did not fire".to_string(),
                }
            }
        }
    }

    let store = JobStore::open_in_memory().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let policy_path = dir.path().join("meta.yaml");
    std::fs::write(
        &policy_path,
        r#"
schema_version: 13
rules:
  items:
    - name: tagged_keep
      when:
        plugin_metadata:
          plugin: tagger
          field: keep
          op: eq
          value: "yes"
      then:
        - set_default:
            track_kind: audio
            language: eng
            value: true
"#,
    )
    .unwrap();
    let job = enqueue_plan_job(&store, &policy_path.to_string_lossy()).await;

    let worker = Worker::new(
        store.clone(),
        Arc::new(AssertingAdapter),
        Arc::new(StaticInspector),
        options(&dir),
    )
    .with_plugin_metadata(Arc::new(Tagger), vec!["tagger".to_string()]);
    let summary = worker.run().await.unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(
        store.get(job.id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn max_files_bounds_the_run() {
    let store = JobStore::open_in_memory().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let policy_ref = write_policy(&dir);
    enqueue_plan_job(&store, &policy_ref).await;
    enqueue_plan_job(&store, &policy_ref).await;
    enqueue_plan_job(&store, &policy_ref).await;

    let mut opts = options(&dir);
    opts.max_files = Some(2);
    let worker = Worker::new(
        store.clone(),
        MockAdapter::new(Script::Succeed),
        Arc::new(StaticInspector),
        opts,
    );
    let summary = worker.run().await.unwrap();

    assert_eq!(summary.processed, 2);
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.queued, 1);
}
