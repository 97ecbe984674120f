//! Storage seam between the generic stage worker and a stage's table.
//!
//! Each stage implements [`StageStore`] over its own table or column
//! group. The worker only ever sees claimed jobs, gate decisions and
//! outcome commits; all SQL stays behind this trait, which also lets
//! tests swap in the in-memory store from [`super::testing`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::state::{FailureOutcome, Stage};

/// A due job atomically claimed by one worker.
///
/// `retry_count` is the counter at claim time; the worker uses it to
/// decide the failure disposition without re-reading the row.
#[derive(Debug, Clone)]
pub struct ClaimedJob<P> {
    pub id: i64,
    pub retry_count: i32,
    pub payload: P,
}

/// Result of re-checking a job's prerequisites immediately before
/// processing.
///
/// `NotYet` and `Dead` must never be conflated: an upstream record that
/// is merely not ready yet leaves the job pending, while one that can
/// never become ready (deleted parent row) fails it permanently.
#[derive(Debug)]
pub enum GateDecision<I> {
    /// Prerequisites hold; carries the upstream data the handler needs.
    Proceed(I),
    /// Upstream not ready yet; leave the job pending and try later.
    NotYet,
    /// Prerequisites can never be met; fail permanently.
    Dead(String),
}

/// Table access for one pipeline stage.
#[async_trait]
pub trait StageStore: Send + Sync + 'static {
    /// Row data returned by the claim, handed to the handler.
    type Payload: Clone + Send + Sync + 'static;
    /// Prerequisite data assembled by the gate.
    type Input: Send + 'static;
    /// Handler result persisted on success.
    type Output: Send + 'static;

    fn stage(&self) -> Stage;

    /// Atomically claim up to `limit` due jobs
    /// (`status = pending AND next_attempt_at <= now`), pushing each
    /// job's attempt time forward by `lease` so no concurrent claimer
    /// can take the same row. A crash mid-attempt re-exposes the job
    /// once the lease lapses.
    async fn claim_due(
        &self,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<ClaimedJob<Self::Payload>>>;

    /// Re-read the minimal prerequisite state for one claimed job.
    async fn gate(&self, job: &ClaimedJob<Self::Payload>) -> Result<GateDecision<Self::Input>>;

    /// Persist the success transition (`ready`, result fields, cleared
    /// diagnostic, completion stamp) and chain downstream jobs in the
    /// same transaction.
    async fn complete(&self, job: &ClaimedJob<Self::Payload>, output: Self::Output) -> Result<()>;

    /// Commit a failed attempt as computed by
    /// [`super::state::decide_failure`].
    async fn record_failure(
        &self,
        job: &ClaimedJob<Self::Payload>,
        outcome: &FailureOutcome,
    ) -> Result<()>;

    /// Put a gated-out (`NotYet`) job back on the schedule without
    /// consuming a retry.
    async fn defer(
        &self,
        job: &ClaimedJob<Self::Payload>,
        until: DateTime<Utc>,
    ) -> Result<()>;
}
