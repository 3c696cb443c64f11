//! Job worker for VPO.
//!
//! A single loop claims jobs from the persistent store in priority
//! order, evaluates the policy, hands the plan to the execution adapter,
//! and reports progress over a background heartbeat. Crash recovery,
//! cancellation and cleanup live here too.

pub mod adapters;
pub mod cancel;
pub mod cleanup;
pub mod worker;

pub use adapters::{
    ExecutionAdapter, ExecutionFailureKind, ExecutionOutcome, InspectionProvider,
    PluginMetadataProvider, ProgressCallback,
};
pub use cancel::CancellationToken;
pub use cleanup::{run_cleanup, CleanupOptions, CleanupReport};
pub use worker::{Worker, WorkerError, WorkerOptions, WorkerSummary};
