//! In-memory stage store and scripted handler for pipeline tests.
//!
//! Applies the exact transition helpers from [`super::state`], so
//! worker behaviour can be exercised without a database. Completion
//! fans out into an in-memory pair set with the same uniqueness rule
//! the notification table enforces.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::error::StageError;
use super::state::{FailureOutcome, JobStatus, RetryState, Stage};
use super::store::{ClaimedJob, GateDecision, StageStore};
use super::worker::StageHandler;

/// Scripted gate outcome for one in-memory job.
#[derive(Debug, Clone)]
pub enum MemoryGate {
    Open,
    NotYet,
    Dead(String),
}

#[derive(Debug, Clone)]
pub struct MemoryJob {
    pub state: RetryState,
    pub gate: MemoryGate,
    pub result: Option<String>,
    pub completions: u32,
}

/// In-memory [`StageStore`] with optional fan-out on completion.
pub struct MemoryStage {
    stage: Stage,
    jobs: Mutex<BTreeMap<i64, MemoryJob>>,
    next_id: AtomicI64,
    fan_out: Vec<i64>,
    chained: Mutex<BTreeSet<(i64, i64)>>,
}

impl MemoryStage {
    pub fn new(stage: Stage) -> Self {
        Self::with_fan_out(stage, Vec::new())
    }

    /// A store that, on each completion, chains one downstream pair per
    /// recipient id, subject to (job, recipient) uniqueness.
    pub fn with_fan_out(stage: Stage, fan_out: Vec<i64>) -> Self {
        Self {
            stage,
            jobs: Mutex::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            fan_out,
            chained: Mutex::new(BTreeSet::new()),
        }
    }

    /// Insert a pending job due immediately.
    pub fn seed(&self, gate: MemoryGate) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().unwrap().insert(
            id,
            MemoryJob {
                state: RetryState::seeded(Utc::now()),
                gate,
                result: None,
                completions: 0,
            },
        );
        id
    }

    pub fn job(&self, id: i64) -> MemoryJob {
        self.jobs.lock().unwrap().get(&id).cloned().expect("job exists")
    }

    pub fn set_gate(&self, id: i64, gate: MemoryGate) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.gate = gate;
        }
    }

    pub fn set_retry_count(&self, id: i64, retry_count: i32) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.state.retry_count = retry_count;
        }
    }

    pub fn set_last_error(&self, id: i64, error: &str) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.state.last_error = Some(error.to_string());
        }
    }

    pub fn force_status(&self, id: i64, status: JobStatus) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.state.status = status;
        }
    }

    pub fn make_due_now(&self, id: i64) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.state.next_attempt_at = Some(Utc::now());
        }
    }

    pub fn reseed(&self, id: i64) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.state.apply_reseed(Utc::now());
        }
    }

    pub fn chained_pairs(&self) -> BTreeSet<(i64, i64)> {
        self.chained.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageStore for MemoryStage {
    type Payload = ();
    type Input = ();
    type Output = String;

    fn stage(&self) -> Stage {
        self.stage
    }

    async fn claim_due(&self, limit: i64, lease: Duration) -> Result<Vec<ClaimedJob<()>>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();

        let due: Vec<i64> = jobs
            .iter()
            .filter(|(_, job)| job.state.is_due(now))
            .map(|(id, _)| *id)
            .take(limit.max(0) as usize)
            .collect();

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            let job = jobs.get_mut(&id).expect("due job exists");
            job.state.next_attempt_at = Some(now + lease);
            claimed.push(ClaimedJob {
                id,
                retry_count: job.state.retry_count,
                payload: (),
            });
        }
        Ok(claimed)
    }

    async fn gate(&self, job: &ClaimedJob<()>) -> Result<GateDecision<()>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(match jobs.get(&job.id) {
            None => GateDecision::Dead("job row missing".to_string()),
            Some(row) => match &row.gate {
                MemoryGate::Open => GateDecision::Proceed(()),
                MemoryGate::NotYet => GateDecision::NotYet,
                MemoryGate::Dead(reason) => GateDecision::Dead(reason.clone()),
            },
        })
    }

    async fn complete(&self, job: &ClaimedJob<()>, output: String) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(row) = jobs.get_mut(&job.id) {
            row.state.apply_ready();
            row.result = Some(output);
            row.completions += 1;
        }
        drop(jobs);

        // Idempotent fan-out: re-inserting an existing pair is a no-op.
        let mut chained = self.chained.lock().unwrap();
        for recipient in &self.fan_out {
            chained.insert((job.id, *recipient));
        }
        Ok(())
    }

    async fn record_failure(&self, job: &ClaimedJob<()>, outcome: &FailureOutcome) -> Result<()> {
        if let Some(row) = self.jobs.lock().unwrap().get_mut(&job.id) {
            row.state.apply_failure(outcome);
        }
        Ok(())
    }

    async fn defer(&self, job: &ClaimedJob<()>, until: DateTime<Utc>) -> Result<()> {
        if let Some(row) = self.jobs.lock().unwrap().get_mut(&job.id) {
            row.state.next_attempt_at = Some(until);
        }
        Ok(())
    }
}

/// Scripted behaviour for a [`ScriptedHandler`].
#[derive(Debug, Clone, Copy)]
pub enum HandlerScript {
    Succeed,
    FailTransient,
    FailPermanent,
    /// Transient failures for the first `n` calls, then success.
    FailFirst(u32),
}

/// Stage handler whose outcomes follow a fixed script.
pub struct ScriptedHandler {
    script: HandlerScript,
    calls: AtomicU32,
}

impl ScriptedHandler {
    pub fn new(script: HandlerScript) -> Self {
        Self {
            script,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageHandler<MemoryStage> for ScriptedHandler {
    async fn handle(&self, _payload: &(), _input: ()) -> Result<String, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            HandlerScript::Succeed => Ok("done".to_string()),
            HandlerScript::FailTransient => Err(StageError::transient("upstream rate limited")),
            HandlerScript::FailPermanent => Err(StageError::permanent("referent deleted")),
            HandlerScript::FailFirst(n) if call < n => {
                Err(StageError::transient("upstream rate limited"))
            }
            HandlerScript::FailFirst(_) => Ok("done".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_claims_never_hand_out_the_same_job() {
        let store = Arc::new(MemoryStage::new(Stage::Transcript));
        store.seed(MemoryGate::Open);

        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.claim_due(10, Duration::minutes(5)).await.unwrap() })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.claim_due(10, Duration::minutes(5)).await.unwrap() })
        };

        let total = a.await.unwrap().len() + b.await.unwrap().len();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn claimed_jobs_are_invisible_until_the_lease_lapses() {
        let store = MemoryStage::new(Stage::Transcript);
        let id = store.seed(MemoryGate::Open);

        let first = store.claim_due(10, Duration::minutes(5)).await.unwrap();
        assert_eq!(first.len(), 1);

        // Still pending, but leased out.
        assert_eq!(store.job(id).state.status, JobStatus::Pending);
        assert!(store.claim_due(10, Duration::minutes(5)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fan_out_is_idempotent_across_repeated_chaining() {
        let store = MemoryStage::with_fan_out(Stage::Summary, vec![11, 12, 13]);
        let id = store.seed(MemoryGate::Open);
        let claimed = store.claim_due(1, Duration::minutes(5)).await.unwrap();
        assert_eq!(claimed.len(), 1);

        store.complete(&claimed[0], "brief".to_string()).await.unwrap();
        assert_eq!(store.chained_pairs().len(), 3);

        // The triggering transaction retries: chaining runs again.
        store.complete(&claimed[0], "brief".to_string()).await.unwrap();
        assert_eq!(store.chained_pairs().len(), 3);
        assert!(store.chained_pairs().contains(&(id, 11)));
    }
}
