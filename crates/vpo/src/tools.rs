//! Process-backed adapter implementations.
//!
//! The external media tools stay opaque: execution delegates the whole
//! plan to a configured runner command, and inspection shells out to a
//! configured probe emitting inspection JSON. Both are read from the
//! environment so deployments can swap tooling without rebuilding.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::{info, warn};
use vpo_engine::Plan;
use vpo_inspect::{Inspection, InspectionError};
use vpo_worker::{
    CancellationToken, ExecutionAdapter, ExecutionFailureKind, ExecutionOutcome,
    InspectionProvider, ProgressCallback,
};

const EXEC_CMD_ENV: &str = "VPO_EXEC_CMD";
const PROBE_CMD_ENV: &str = "VPO_PROBE_CMD";
const TOOL_TIMEOUT_ENV: &str = "VPO_TOOL_TIMEOUT_SECS";
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(4 * 3600);

/// Runs the plan by invoking an external runner:
/// `<cmd> <plan.json> <source>` inside the job's scratch directory.
pub struct ProcessExecutionAdapter {
    command: Option<Vec<String>>,
    invocation_timeout: Duration,
    cpu_cores: Option<u32>,
}

impl ProcessExecutionAdapter {
    pub fn from_env(cpu_cores: Option<u32>) -> Self {
        let command = std::env::var(EXEC_CMD_ENV)
            .ok()
            .map(|raw| raw.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|parts: &Vec<String>| !parts.is_empty());
        let invocation_timeout = std::env::var(TOOL_TIMEOUT_ENV)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT);
        Self {
            command,
            invocation_timeout,
            cpu_cores,
        }
    }
}

#[async_trait]
impl ExecutionAdapter for ProcessExecutionAdapter {
    async fn execute(
        &self,
        plan: &Plan,
        inspection: &Inspection,
        scratch_dir: &Path,
        progress: ProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let Some(command) = &self.command else {
            return ExecutionOutcome::Failure {
                kind: ExecutionFailureKind::ToolMissing,
                message: format!("no execution command configured (set {})", EXEC_CMD_ENV),
            };
        };

        let plan_path = scratch_dir.join("plan.json");
        let payload = serde_json::json!({
            "source": inspection.path,
            "container": inspection.container,
            "actions": plan.actions,
        });
        if let Err(e) = tokio::fs::write(&plan_path, payload.to_string()).await {
            return ExecutionOutcome::Failure {
                kind: ExecutionFailureKind::IoError,
                message: format!("writing plan file: {}", e),
            };
        }

        progress(20.0, "launching external runner");
        let mut builder = tokio::process::Command::new(&command[0]);
        builder
            .args(&command[1..])
            .arg(&plan_path)
            .arg(&inspection.path)
            .current_dir(scratch_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(cores) = self.cpu_cores {
            builder.env("VPO_CPU_CORES", cores.to_string());
        }

        let mut child = match builder.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ExecutionOutcome::Failure {
                    kind: ExecutionFailureKind::ToolMissing,
                    message: format!("runner '{}' not found", command[0]),
                };
            }
            Err(e) => {
                return ExecutionOutcome::Failure {
                    kind: ExecutionFailureKind::IoError,
                    message: format!("spawning runner: {}", e),
                };
            }
        };

        info!("Runner started for {}", inspection.path.display());
        let started = std::time::Instant::now();

        // Child::wait is cancel-safe, so polling it under a short
        // timeout lets us observe cancellation and the invocation
        // deadline between waits.
        let status = loop {
            match tokio::time::timeout(Duration::from_millis(250), child.wait()).await {
                Ok(status) => break status,
                Err(_) => {
                    if cancel.is_cancelled() {
                        warn!("Cancellation observed; killing runner");
                        let _ = child.kill().await;
                        return ExecutionOutcome::Failure {
                            kind: ExecutionFailureKind::PartialActionFailure,
                            message: "cancelled while the runner was active".to_string(),
                        };
                    }
                    if started.elapsed() >= self.invocation_timeout {
                        let _ = child.kill().await;
                        return ExecutionOutcome::Failure {
                            kind: ExecutionFailureKind::ToolTimeout,
                            message: format!(
                                "runner exceeded {:?} invocation timeout",
                                self.invocation_timeout
                            ),
                        };
                    }
                }
            }
        };

        match status {
            Ok(status) if status.success() => {
                progress(100.0, "runner finished");
                ExecutionOutcome::Success {
                    output_paths: vec![scratch_dir.to_path_buf()],
                }
            }
            Ok(status) => ExecutionOutcome::Failure {
                kind: ExecutionFailureKind::ToolFailed,
                message: format!("runner exited with {}", status),
            },
            Err(e) => ExecutionOutcome::Failure {
                kind: ExecutionFailureKind::IoError,
                message: format!("waiting for runner: {}", e),
            },
        }
    }
}

/// Probes a file by running a configured command that prints inspection
/// JSON on stdout.
pub struct ProbeInspectionProvider {
    command: Option<Vec<String>>,
}

impl ProbeInspectionProvider {
    pub fn from_env() -> Self {
        let command = std::env::var(PROBE_CMD_ENV)
            .ok()
            .map(|raw| raw.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|parts: &Vec<String>| !parts.is_empty());
        Self { command }
    }
}

impl InspectionProvider for ProbeInspectionProvider {
    fn inspect(&self, path: &Path) -> Result<Inspection, InspectionError> {
        let Some(command) = &self.command else {
            return Err(InspectionError::ProbeFailed(format!(
                "no probe command configured (set {})",
                PROBE_CMD_ENV
            )));
        };

        let output = std::process::Command::new(&command[0])
            .args(&command[1..])
            .arg(path)
            .output()
            .map_err(|e| InspectionError::ProbeFailed(format!("spawning probe: {}", e)))?;
        if !output.status.success() {
            return Err(InspectionError::ProbeFailed(format!(
                "probe exited with {}",
                output.status
            )));
        }

        let inspection: Inspection = serde_json::from_slice(&output.stdout)
            .map_err(|e| InspectionError::ProbeFailed(format!("parsing probe output: {}", e)))?;
        inspection.validate()?;
        Ok(inspection)
    }
}
