//! Policy evaluation engine.
//!
//! Pure and synchronous: given an inspection and a loaded policy, produce
//! an ordered plan of actions. No I/O happens on this path; multiple
//! evaluations may run on parallel threads as long as each owns its
//! inputs.

pub mod conditions;
pub mod executor;
pub mod filters;
pub mod plan;
pub mod planner;

pub use conditions::{evaluate, EvalError};
pub use executor::{build_plan, build_plan_with, EvalOptions};
pub use filters::{classify_track, track_matches, CompiledPatterns, TrackClasses};
pub use plan::{Plan, PlanError};
