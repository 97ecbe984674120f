//! Retryable job state machine shared by every pipeline stage.
//!
//! Each stage-bearing row embeds the same shape: a status, a retry
//! counter, the next eligible attempt time and the last diagnostic.
//! Transitions are computed here as pure functions so the Postgres
//! stores and the in-memory test store apply identical semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::backoff::BackoffPolicy;

/// Upper bound for stored diagnostics so repeated failures cannot grow
/// a row without limit.
pub const MAX_LAST_ERROR_LEN: usize = 512;

/// Lifecycle status of a retryable job.
///
/// `Ready` and `Failed` are terminal: once entered, the job never moves
/// again unless an operator re-seeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Ready,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Ready => "ready",
            JobStatus::Failed => "failed",
        }
    }
}

/// The pipeline stages, in flow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcript,
    Metadata,
    Summary,
    Notification,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcript => "transcript",
            Stage::Metadata => "metadata",
            Stage::Summary => "summary",
            Stage::Notification => "notification",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a failure may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// The committed result of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Retries remain; the job stays pending and waits out the backoff.
    Retry {
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
        error: String,
    },
    /// A transient error recurred past `max_retries`.
    Exhausted { retry_count: i32, error: String },
    /// The error can never succeed on retry.
    Permanent { retry_count: i32, error: String },
}

impl FailureOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            FailureOutcome::Retry { .. } => JobStatus::Pending,
            FailureOutcome::Exhausted { .. } | FailureOutcome::Permanent { .. } => {
                JobStatus::Failed
            }
        }
    }

    pub fn retry_count(&self) -> i32 {
        match self {
            FailureOutcome::Retry { retry_count, .. }
            | FailureOutcome::Exhausted { retry_count, .. }
            | FailureOutcome::Permanent { retry_count, .. } => *retry_count,
        }
    }

    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        match self {
            FailureOutcome::Retry {
                next_attempt_at, ..
            } => Some(*next_attempt_at),
            _ => None,
        }
    }

    pub fn error(&self) -> &str {
        match self {
            FailureOutcome::Retry { error, .. }
            | FailureOutcome::Exhausted { error, .. }
            | FailureOutcome::Permanent { error, .. } => error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status() == JobStatus::Failed
    }
}

/// Decide what a failed attempt does to the job.
///
/// `prev_retry_count` is the counter before this failure; the outcome
/// carries the incremented value. A permanent error fails immediately,
/// a transient one either schedules the next attempt via the backoff
/// policy or, once exhausted, fails terminally with no further
/// `next_attempt_at`.
pub fn decide_failure(
    policy: &BackoffPolicy,
    prev_retry_count: i32,
    kind: FailureKind,
    error: &str,
    now: DateTime<Utc>,
) -> FailureOutcome {
    let retry_count = prev_retry_count.saturating_add(1);
    let error = truncate_error(error);

    match kind {
        FailureKind::Permanent => FailureOutcome::Permanent { retry_count, error },
        FailureKind::Transient => {
            if policy.is_exhausted(retry_count) {
                FailureOutcome::Exhausted { retry_count, error }
            } else {
                FailureOutcome::Retry {
                    retry_count,
                    next_attempt_at: policy.next_attempt(retry_count, now),
                    error,
                }
            }
        }
    }
}

/// Bound a diagnostic to [`MAX_LAST_ERROR_LEN`], cutting on a char
/// boundary.
pub fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_LAST_ERROR_LEN {
        return error.to_string();
    }
    let mut end = MAX_LAST_ERROR_LEN;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    error[..end].to_string()
}

/// Embedded retryable-job fields of a stage row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub status: JobStatus,
    pub retry_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl RetryState {
    /// State of a freshly seeded job, due immediately.
    pub fn seeded(now: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Pending,
            retry_count: 0,
            next_attempt_at: Some(now),
            last_error: None,
        }
    }

    /// Eligible for claiming.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.next_attempt_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Successful completion: terminal, diagnostic cleared.
    pub fn apply_ready(&mut self) {
        self.status = JobStatus::Ready;
        self.next_attempt_at = None;
        self.last_error = None;
    }

    /// Commit a failed attempt.
    pub fn apply_failure(&mut self, outcome: &FailureOutcome) {
        self.status = outcome.status();
        self.retry_count = outcome.retry_count();
        self.next_attempt_at = outcome.next_attempt_at();
        self.last_error = Some(outcome.error().to_string());
    }

    /// Administrative reset back to a fresh pending job.
    pub fn apply_reseed(&mut self, now: DateTime<Utc>) {
        *self = Self::seeded(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::minutes(5), Duration::minutes(360), 6)
    }

    #[test]
    fn first_transient_failure_waits_base_interval() {
        let now = Utc::now();
        let outcome = decide_failure(&policy(), 0, FailureKind::Transient, "boom", now);
        assert_eq!(
            outcome,
            FailureOutcome::Retry {
                retry_count: 1,
                next_attempt_at: now + Duration::minutes(5),
                error: "boom".to_string(),
            }
        );
    }

    #[test]
    fn third_failure_waits_four_times_base() {
        // base=5min, cap=360min, three failures so far.
        let now = Utc::now();
        let outcome = decide_failure(&policy(), 2, FailureKind::Transient, "boom", now);
        assert_eq!(outcome.retry_count(), 3);
        assert_eq!(outcome.next_attempt_at(), Some(now + Duration::minutes(20)));
    }

    #[test]
    fn seventh_failure_with_max_six_is_exhausted() {
        let now = Utc::now();
        let outcome = decide_failure(&policy(), 6, FailureKind::Transient, "boom", now);
        assert_eq!(
            outcome,
            FailureOutcome::Exhausted {
                retry_count: 7,
                error: "boom".to_string(),
            }
        );
        assert_eq!(outcome.next_attempt_at(), None);
        assert_eq!(outcome.status(), JobStatus::Failed);
    }

    #[test]
    fn permanent_failure_skips_backoff_entirely() {
        let now = Utc::now();
        let outcome = decide_failure(&policy(), 0, FailureKind::Permanent, "gone", now);
        assert_eq!(outcome.status(), JobStatus::Failed);
        assert_eq!(outcome.retry_count(), 1);
        assert_eq!(outcome.next_attempt_at(), None);
    }

    #[test]
    fn diagnostics_are_bounded() {
        let long = "x".repeat(MAX_LAST_ERROR_LEN * 3);
        let outcome = decide_failure(&policy(), 0, FailureKind::Transient, &long, Utc::now());
        assert_eq!(outcome.error().len(), MAX_LAST_ERROR_LEN);
    }

    #[test]
    fn ready_state_clears_diagnostic() {
        let mut state = RetryState::seeded(Utc::now());
        state.last_error = Some("old".to_string());
        state.retry_count = 2;
        state.apply_ready();
        assert_eq!(state.status, JobStatus::Ready);
        assert_eq!(state.last_error, None);
        assert_eq!(state.retry_count, 2);
        assert!(state.status.is_terminal());
    }

    #[test]
    fn reseed_restores_fresh_pending_state() {
        let now = Utc::now();
        let mut state = RetryState::seeded(now);
        state.apply_failure(&FailureOutcome::Permanent {
            retry_count: 4,
            error: "gone".to_string(),
        });
        assert_eq!(state.status, JobStatus::Failed);

        state.apply_reseed(now);
        assert_eq!(state.status, JobStatus::Pending);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.next_attempt_at, Some(now));
        assert_eq!(state.last_error, None);
    }

    #[test]
    fn due_requires_pending_and_elapsed_attempt_time() {
        let now = Utc::now();
        let mut state = RetryState::seeded(now);
        assert!(state.is_due(now));

        state.next_attempt_at = Some(now + Duration::minutes(1));
        assert!(!state.is_due(now));

        state.next_attempt_at = None;
        assert!(!state.is_due(now));

        state.next_attempt_at = Some(now);
        state.status = JobStatus::Ready;
        assert!(!state.is_due(now));
    }
}
