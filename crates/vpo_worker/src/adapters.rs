//! External collaborator contracts.
//!
//! The worker never touches media itself: probing goes through an
//! [`InspectionProvider`], plan execution through an
//! [`ExecutionAdapter`] driving external tools, and plugin data through
//! a [`PluginMetadataProvider`]. All three are narrow, swappable
//! interfaces; tests plug in mocks.

use crate::cancel::CancellationToken;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use vpo_engine::Plan;
use vpo_inspect::{Inspection, InspectionError, MetaValue};

/// Progress callback: `(percent, detail)`. Implementations call it at
/// their own checkpoints; percent must be within `[0, 100]`.
pub type ProgressCallback<'a> = &'a (dyn Fn(f64, &str) + Send + Sync);

/// Why an execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionFailureKind {
    ToolMissing,
    ToolFailed,
    ToolTimeout,
    IoError,
    PartialActionFailure,
}

impl ExecutionFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionFailureKind::ToolMissing => "tool_missing",
            ExecutionFailureKind::ToolFailed => "tool_failed",
            ExecutionFailureKind::ToolTimeout => "tool_timeout",
            ExecutionFailureKind::IoError => "io_error",
            ExecutionFailureKind::PartialActionFailure => "partial_action_failure",
        }
    }
}

/// Terminal result of executing one plan.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Success {
        output_paths: Vec<PathBuf>,
    },
    Failure {
        kind: ExecutionFailureKind,
        message: String,
    },
}

/// Executes a plan against external media tools.
///
/// Implementations must observe `cancel` at least at every action
/// boundary and apply per-invocation timeouts to the tools they spawn.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn execute(
        &self,
        plan: &Plan,
        inspection: &Inspection,
        scratch_dir: &Path,
        progress: ProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome;
}

/// Produces an inspection for a media file. Pure data; must not mutate
/// the target.
pub trait InspectionProvider: Send + Sync {
    fn inspect(&self, path: &Path) -> Result<Inspection, InspectionError>;
}

/// Supplies plugin metadata for a file. Idempotent and side-effect-free
/// within an evaluation.
pub trait PluginMetadataProvider: Send + Sync {
    fn metadata_for(&self, path: &Path, plugin: &str) -> BTreeMap<String, MetaValue>;
}
