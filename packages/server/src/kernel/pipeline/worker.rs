//! Generic polling worker, one instance per pipeline stage.
//!
//! The worker repeatedly claims a bounded batch of due jobs from its
//! [`StageStore`], re-checks each job's prerequisites, invokes the
//! injected stage handler and commits the outcome as a state
//! transition. Handler errors never escape this loop; every one turns
//! into a retry schedule or a terminal failure, and the worker keeps
//! polling regardless of any single job's fate.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::backoff::BackoffPolicy;
use super::error::StageError;
use super::state::{decide_failure, truncate_error, FailureOutcome};
use super::store::{ClaimedJob, GateDecision, StageStore};
use crate::kernel::orchestrator::Service;

/// Executes one stage's work for a claimed job.
///
/// Implementations wrap a capability (transcript fetcher, enricher,
/// summarizer, notifier) and must report failures as [`StageError`];
/// internal fallbacks that still produce an output are invisible here.
#[async_trait]
pub trait StageHandler<S: StageStore>: Send + Sync {
    async fn handle(
        &self,
        payload: &S::Payload,
        input: S::Input,
    ) -> Result<S::Output, StageError>;
}

/// Configuration for a stage worker.
#[derive(Debug, Clone)]
pub struct StageWorkerConfig {
    /// Maximum number of jobs to claim per poll.
    pub batch_size: i64,
    /// Pause after a batch that had work.
    pub poll_interval: StdDuration,
    /// Pause when a poll found nothing due.
    pub idle_poll_interval: StdDuration,
    /// Upper bound for a single handler invocation; elapse counts as a
    /// transient failure.
    pub handler_timeout: StdDuration,
    /// How far a claim pushes `next_attempt_at`; a crashed attempt
    /// re-surfaces after this long.
    pub claim_lease: Duration,
    /// Re-check delay for jobs whose prerequisites are not ready yet.
    pub not_yet_defer: Duration,
    /// Worker ID for this instance.
    pub worker_id: String,
}

impl Default for StageWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: StdDuration::from_secs(2),
            idle_poll_interval: StdDuration::from_secs(30),
            handler_timeout: StdDuration::from_secs(60),
            claim_lease: Duration::minutes(5),
            not_yet_defer: Duration::seconds(30),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl StageWorkerConfig {
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// Polling loop for one stage.
pub struct StageWorker<S: StageStore> {
    store: Arc<S>,
    handler: Arc<dyn StageHandler<S>>,
    policy: BackoffPolicy,
    config: StageWorkerConfig,
}

impl<S: StageStore> StageWorker<S> {
    pub fn new(store: Arc<S>, handler: Arc<dyn StageHandler<S>>, policy: BackoffPolicy) -> Self {
        Self {
            store,
            handler,
            policy,
            config: StageWorkerConfig::default(),
        }
    }

    pub fn with_config(
        store: Arc<S>,
        handler: Arc<dyn StageHandler<S>>,
        policy: BackoffPolicy,
        config: StageWorkerConfig,
    ) -> Self {
        Self {
            store,
            handler,
            policy,
            config,
        }
    }

    /// Claim and process one batch. Returns the number of jobs claimed.
    pub async fn tick(&self) -> Result<usize> {
        let jobs = self
            .store
            .claim_due(self.config.batch_size, self.config.claim_lease)
            .await?;

        if jobs.is_empty() {
            return Ok(0);
        }

        debug!(
            stage = %self.store.stage(),
            count = jobs.len(),
            "claimed jobs"
        );

        let claimed = jobs.len();
        let tasks = jobs.into_iter().map(|job| self.process_job(job));
        futures::future::join_all(tasks).await;

        Ok(claimed)
    }

    /// Process one claimed job to its committed outcome.
    async fn process_job(&self, job: ClaimedJob<S::Payload>) {
        let stage = self.store.stage();

        let decision = match self.store.gate(&job).await {
            Ok(decision) => decision,
            Err(e) => {
                // Leave the claim in place; the lease re-exposes the job.
                error!(stage = %stage, job_id = job.id, error = %e, "gate check failed");
                return;
            }
        };

        let input = match decision {
            GateDecision::Proceed(input) => input,
            GateDecision::NotYet => {
                debug!(stage = %stage, job_id = job.id, "prerequisites not ready; deferring");
                let until = Utc::now() + self.config.not_yet_defer;
                if let Err(e) = self.store.defer(&job, until).await {
                    error!(stage = %stage, job_id = job.id, error = %e, "failed to defer job");
                }
                return;
            }
            GateDecision::Dead(reason) => {
                warn!(stage = %stage, job_id = job.id, reason = %reason, "prerequisites missing; failing permanently");
                let outcome = FailureOutcome::Permanent {
                    retry_count: job.retry_count.saturating_add(1),
                    error: truncate_error(&reason),
                };
                self.commit_failure(&job, &outcome).await;
                return;
            }
        };

        let result = match tokio::time::timeout(
            self.config.handler_timeout,
            self.handler.handle(&job.payload, input),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StageError::transient("handler timed out")),
        };

        match result {
            Ok(output) => match self.store.complete(&job, output).await {
                Ok(()) => {
                    info!(stage = %stage, job_id = job.id, "job succeeded");
                }
                Err(e) => {
                    error!(stage = %stage, job_id = job.id, error = %e, "failed to commit success");
                }
            },
            Err(err) => {
                let outcome = decide_failure(
                    &self.policy,
                    job.retry_count,
                    err.kind(),
                    &err.to_string(),
                    Utc::now(),
                );
                warn!(
                    stage = %stage,
                    job_id = job.id,
                    retry_count = outcome.retry_count(),
                    terminal = outcome.is_terminal(),
                    error = %err,
                    "job attempt failed"
                );
                self.commit_failure(&job, &outcome).await;
            }
        }
    }

    async fn commit_failure(&self, job: &ClaimedJob<S::Payload>, outcome: &FailureOutcome) {
        if let Err(e) = self.store.record_failure(job, outcome).await {
            error!(
                stage = %self.store.stage(),
                job_id = job.id,
                error = %e,
                "failed to record job failure"
            );
        }
    }

    /// Run until shutdown is requested. In-flight jobs always finish
    /// their current attempt; cancellation is only observed between
    /// batches.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            stage = %self.store.stage(),
            worker_id = %self.config.worker_id,
            batch_size = self.config.batch_size,
            "stage worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let claimed = match self.tick().await {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(stage = %self.store.stage(), error = %e, "failed to claim jobs");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(StdDuration::from_secs(1)) => {}
                    }
                    continue;
                }
            };

            let pause = if claimed > 0 {
                self.config.poll_interval
            } else {
                self.config.idle_poll_interval
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(
            stage = %self.store.stage(),
            worker_id = %self.config.worker_id,
            "stage worker stopped"
        );
        Ok(())
    }
}

#[async_trait]
impl<S: StageStore> Service for StageWorker<S> {
    fn name(&self) -> &'static str {
        self.store.stage().as_str()
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        (*self).run(shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::pipeline::state::JobStatus;
    use crate::kernel::pipeline::testing::{HandlerScript, MemoryGate, MemoryStage, ScriptedHandler};
    use chrono::Duration;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::minutes(5), Duration::minutes(360), 6)
    }

    fn worker(
        store: Arc<MemoryStage>,
        script: HandlerScript,
        policy: BackoffPolicy,
    ) -> StageWorker<MemoryStage> {
        StageWorker::new(store, Arc::new(ScriptedHandler::new(script)), policy)
    }

    #[tokio::test]
    async fn successful_job_becomes_ready_with_cleared_diagnostic() {
        let store = Arc::new(MemoryStage::new(crate::kernel::pipeline::state::Stage::Transcript));
        let id = store.seed(MemoryGate::Open);
        store.set_last_error(id, "previous attempt noise");

        let worker = worker(store.clone(), HandlerScript::Succeed, policy());
        assert_eq!(worker.tick().await.unwrap(), 1);

        let job = store.job(id);
        assert_eq!(job.state.status, JobStatus::Ready);
        assert_eq!(job.state.last_error, None);
        assert_eq!(job.result.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn transient_failure_schedules_backoff_and_keeps_pending() {
        let store = Arc::new(MemoryStage::new(crate::kernel::pipeline::state::Stage::Transcript));
        let id = store.seed(MemoryGate::Open);

        let worker = worker(store.clone(), HandlerScript::FailTransient, policy());
        worker.tick().await.unwrap();

        let job = store.job(id);
        assert_eq!(job.state.status, JobStatus::Pending);
        assert_eq!(job.state.retry_count, 1);
        assert!(job.state.next_attempt_at.unwrap() > Utc::now() + Duration::minutes(4));
        assert!(job.state.last_error.unwrap().contains("upstream"));
    }

    #[tokio::test]
    async fn transient_failures_past_max_retries_become_terminal() {
        let store = Arc::new(MemoryStage::new(crate::kernel::pipeline::state::Stage::Transcript));
        let id = store.seed(MemoryGate::Open);
        store.set_retry_count(id, 6);

        let worker = worker(
            store.clone(),
            HandlerScript::FailTransient,
            policy(),
        );
        worker.tick().await.unwrap();

        let job = store.job(id);
        assert_eq!(job.state.status, JobStatus::Failed);
        assert_eq!(job.state.retry_count, 7);
        assert_eq!(job.state.next_attempt_at, None);
    }

    #[tokio::test]
    async fn permanent_failure_never_schedules_a_retry() {
        let store = Arc::new(MemoryStage::new(crate::kernel::pipeline::state::Stage::Transcript));
        let id = store.seed(MemoryGate::Open);

        let worker = worker(store.clone(), HandlerScript::FailPermanent, policy());
        worker.tick().await.unwrap();

        let job = store.job(id);
        assert_eq!(job.state.status, JobStatus::Failed);
        assert_eq!(job.state.next_attempt_at, None);
    }

    #[tokio::test]
    async fn dead_gate_fails_with_missing_parent_diagnostic() {
        let store = Arc::new(MemoryStage::new(crate::kernel::pipeline::state::Stage::Summary));
        let id = store.seed(MemoryGate::Dead("video deleted".to_string()));

        let worker = worker(store.clone(), HandlerScript::Succeed, policy());
        worker.tick().await.unwrap();

        let job = store.job(id);
        assert_eq!(job.state.status, JobStatus::Failed);
        assert_eq!(job.state.next_attempt_at, None);
        assert!(job.state.last_error.unwrap().contains("video deleted"));
        // The handler must never have run.
        assert_eq!(job.result, None);
    }

    #[tokio::test]
    async fn dead_gate_diagnostic_is_bounded() {
        use crate::kernel::pipeline::state::MAX_LAST_ERROR_LEN;

        let store = Arc::new(MemoryStage::new(crate::kernel::pipeline::state::Stage::Summary));
        // A gate reason that embeds a large chunk of upstream data.
        let id = store.seed(MemoryGate::Dead(format!("video deleted: {}", "x".repeat(2048))));

        let worker = worker(store.clone(), HandlerScript::Succeed, policy());
        worker.tick().await.unwrap();

        let job = store.job(id);
        assert_eq!(job.state.status, JobStatus::Failed);
        let error = job.state.last_error.unwrap();
        assert!(error.len() <= MAX_LAST_ERROR_LEN);
        assert!(error.starts_with("video deleted:"));
    }

    #[tokio::test]
    async fn not_yet_gate_defers_without_consuming_a_retry() {
        let store = Arc::new(MemoryStage::new(crate::kernel::pipeline::state::Stage::Notification));
        let id = store.seed(MemoryGate::NotYet);

        let worker = worker(store.clone(), HandlerScript::Succeed, policy());
        worker.tick().await.unwrap();

        let job = store.job(id);
        assert_eq!(job.state.status, JobStatus::Pending);
        assert_eq!(job.state.retry_count, 0);
        assert_eq!(job.state.last_error, None);
        assert!(job.state.next_attempt_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn terminal_jobs_are_never_claimed_again() {
        let store = Arc::new(MemoryStage::new(crate::kernel::pipeline::state::Stage::Transcript));
        let ready = store.seed(MemoryGate::Open);
        let failed = store.seed(MemoryGate::Open);
        store.force_status(ready, JobStatus::Ready);
        store.force_status(failed, JobStatus::Failed);

        let worker = worker(store.clone(), HandlerScript::Succeed, policy());
        assert_eq!(worker.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn job_recovers_after_transient_failures_when_reattempted() {
        let store = Arc::new(MemoryStage::new(crate::kernel::pipeline::state::Stage::Transcript));
        let id = store.seed(MemoryGate::Open);

        let worker = worker(store.clone(), HandlerScript::FailFirst(2), policy());

        worker.tick().await.unwrap();
        store.make_due_now(id);
        worker.tick().await.unwrap();
        store.make_due_now(id);
        worker.tick().await.unwrap();

        let job = store.job(id);
        assert_eq!(job.state.status, JobStatus::Ready);
        assert_eq!(job.state.retry_count, 2);
        assert_eq!(job.state.last_error, None);
    }
}
