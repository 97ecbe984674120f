//! Retry-driven pipeline infrastructure.
//!
//! Everything stage-agnostic lives here: the retryable-job state
//! machine, the backoff policy, the concurrency throttle, the storage
//! seam and the generic polling worker. Stage-specific tables, gates
//! and handlers live in `crate::stages`.

mod backoff;
mod error;
mod state;
mod store;
pub mod testing;
mod throttle;
mod worker;

pub use backoff::{BackoffPolicy, Jitter, NoJitter};
pub use error::StageError;
pub use state::{
    decide_failure, truncate_error, FailureKind, FailureOutcome, JobStatus, RetryState, Stage,
    MAX_LAST_ERROR_LEN,
};
pub use store::{ClaimedJob, GateDecision, StageStore};
pub use throttle::{Throttle, ThrottlePermit};
pub use worker::{StageHandler, StageWorker, StageWorkerConfig};
