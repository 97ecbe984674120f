//! Notification stage: deliver one briefing per (video, subscriber).
//!
//! The gate left-joins all three parents in one read. A summary that
//! has not finished yet defers the job; a deleted video or subscriber,
//! or a permanently failed summary, kills it.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};

use crate::kernel::pipeline::{
    ClaimedJob, FailureOutcome, GateDecision, JobStatus, Stage, StageError, StageHandler,
    StageStore,
};
use crate::kernel::traits::{Briefing, Notifier};

pub struct NotificationStage {
    pool: PgPool,
}

impl NotificationStage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationPayload {
    pub job_id: i64,
    pub video_id: i64,
    pub subscriber_id: i64,
}

#[derive(FromRow)]
struct ClaimRow {
    id: i64,
    video_id: i64,
    subscriber_id: i64,
    retry_count: i32,
}

#[derive(FromRow)]
struct GateRow {
    video_title: Option<String>,
    video_external_id: Option<String>,
    email: Option<String>,
    summary_status: Option<JobStatus>,
    tl_dr: Option<String>,
    highlights: Option<String>,
    key_quote: Option<String>,
}

#[async_trait]
impl StageStore for NotificationStage {
    type Payload = NotificationPayload;
    type Input = Briefing;
    type Output = ();

    fn stage(&self) -> Stage {
        Stage::Notification
    }

    async fn claim_due(
        &self,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<ClaimedJob<Self::Payload>>> {
        let rows = sqlx::query_as::<_, ClaimRow>(
            r#"
            WITH due AS (
                SELECT id FROM notification_jobs
                WHERE status = 'pending'
                  AND next_attempt_at <= NOW()
                ORDER BY next_attempt_at, id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE notification_jobs
            SET next_attempt_at = NOW() + ($2 || ' milliseconds')::INTERVAL
            WHERE id IN (SELECT id FROM due)
            RETURNING id, video_id, subscriber_id, retry_count
            "#,
        )
        .bind(limit)
        .bind(lease.num_milliseconds().to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ClaimedJob {
                id: row.id,
                retry_count: row.retry_count,
                payload: NotificationPayload {
                    job_id: row.id,
                    video_id: row.video_id,
                    subscriber_id: row.subscriber_id,
                },
            })
            .collect())
    }

    async fn gate(&self, job: &ClaimedJob<Self::Payload>) -> Result<GateDecision<Briefing>> {
        let row = sqlx::query_as::<_, GateRow>(
            r#"
            SELECT v.title AS video_title,
                   v.external_id AS video_external_id,
                   s.email,
                   su.status AS summary_status,
                   su.tl_dr,
                   su.highlights,
                   su.key_quote
            FROM notification_jobs j
            LEFT JOIN videos v ON v.id = j.video_id
            LEFT JOIN subscribers s ON s.id = j.subscriber_id
            LEFT JOIN summaries su ON su.video_id = j.video_id
            WHERE j.id = $1
            "#,
        )
        .bind(job.payload.job_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(GateDecision::Dead("notification job deleted".to_string()));
        };

        let (Some(video_title), Some(video_external_id)) =
            (row.video_title, row.video_external_id)
        else {
            return Ok(GateDecision::Dead("video deleted".to_string()));
        };

        let Some(email) = row.email else {
            return Ok(GateDecision::Dead("subscriber deleted".to_string()));
        };

        match row.summary_status {
            None | Some(JobStatus::Pending) => return Ok(GateDecision::NotYet),
            Some(JobStatus::Failed) => {
                return Ok(GateDecision::Dead("summary failed permanently".to_string()))
            }
            Some(JobStatus::Ready) => {}
        }

        Ok(GateDecision::Proceed(Briefing {
            video_title,
            video_external_id,
            recipient_email: email,
            tl_dr: row.tl_dr.unwrap_or_default(),
            highlights: row
                .highlights
                .as_deref()
                .unwrap_or_default()
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect(),
            key_quote: row.key_quote,
        }))
    }

    async fn complete(&self, job: &ClaimedJob<Self::Payload>, _output: ()) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_jobs
            SET status = 'ready',
                next_attempt_at = NULL,
                last_error = NULL,
                delivered_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job.payload.job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_failure(
        &self,
        job: &ClaimedJob<Self::Payload>,
        outcome: &FailureOutcome,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_jobs
            SET status = $2,
                retry_count = $3,
                next_attempt_at = $4,
                last_error = $5
            WHERE id = $1
            "#,
        )
        .bind(job.payload.job_id)
        .bind(outcome.status())
        .bind(outcome.retry_count())
        .bind(outcome.next_attempt_at())
        .bind(outcome.error())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn defer(&self, job: &ClaimedJob<Self::Payload>, until: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE notification_jobs SET next_attempt_at = $2 WHERE id = $1 AND status = 'pending'",
        )
        .bind(job.payload.job_id)
        .bind(until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct NotificationStageHandler {
    notifier: Arc<dyn Notifier>,
}

impl NotificationStageHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl StageHandler<NotificationStage> for NotificationStageHandler {
    async fn handle(
        &self,
        _payload: &NotificationPayload,
        input: Briefing,
    ) -> Result<(), StageError> {
        self.notifier.deliver(&input).await
    }
}
