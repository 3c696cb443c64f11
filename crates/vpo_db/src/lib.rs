//! Persistent job store for VPO.
//!
//! A thin SQLite layer holding the job queue. All mutations are short
//! single-statement transactions; the claim protocol is a CAS-style
//! conditional update so exactly one worker wins a queued job.

pub mod error;
pub mod jobs;

pub use error::{Result, StoreError};
pub use jobs::{
    CancelOutcome, JobKind, JobRecord, JobStatus, JobStore, NewJob, QueueStats,
};
