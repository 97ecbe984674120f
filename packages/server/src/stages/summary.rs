//! Summary stage: turn a ready transcript into a briefing summary.
//!
//! The gate re-reads the parent video. A pending transcript defers the
//! job, a permanently failed or missing one kills it. Metadata is
//! opportunistic: if the metadata stage has finished it flows into the
//! summarizer, otherwise the summary proceeds without it. On success
//! the stage fans out one notification job per current subscriber of
//! the video's channel, idempotently.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};

use crate::kernel::pipeline::{
    ClaimedJob, FailureOutcome, GateDecision, JobStatus, Stage, StageError, StageHandler,
    StageStore,
};
use crate::kernel::traits::{join_lines, SummaryDraft, Summarizer, VideoMetadata};

pub struct SummaryStage {
    pool: PgPool,
}

impl SummaryStage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryPayload {
    pub summary_id: i64,
    pub video_id: i64,
}

/// Prerequisite data the gate assembles for the handler.
#[derive(Debug)]
pub struct SummaryInput {
    pub transcript: String,
    pub metadata: Option<VideoMetadata>,
}

#[derive(FromRow)]
struct ClaimRow {
    id: i64,
    video_id: i64,
    retry_count: i32,
}

#[derive(FromRow)]
struct GateRow {
    transcript_status: JobStatus,
    transcript_text: Option<String>,
    metadata_status: JobStatus,
    metadata_tags: Option<String>,
    metadata_clean_description: Option<String>,
    metadata_hashtags: Option<String>,
    metadata_urls: Option<String>,
    metadata_sponsors: Option<String>,
}

#[async_trait]
impl StageStore for SummaryStage {
    type Payload = SummaryPayload;
    type Input = SummaryInput;
    type Output = SummaryDraft;

    fn stage(&self) -> Stage {
        Stage::Summary
    }

    async fn claim_due(
        &self,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<ClaimedJob<Self::Payload>>> {
        let rows = sqlx::query_as::<_, ClaimRow>(
            r#"
            WITH due AS (
                SELECT id FROM summaries
                WHERE status = 'pending'
                  AND next_attempt_at <= NOW()
                ORDER BY next_attempt_at, id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE summaries
            SET next_attempt_at = NOW() + ($2 || ' milliseconds')::INTERVAL
            WHERE id IN (SELECT id FROM due)
            RETURNING id, video_id, retry_count
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
                payload: SummaryPayload {
                    summary_id: row.id,
                    video_id: row.video_id,
                },
            })
            .collect())
    }

    async fn gate(&self, job: &ClaimedJob<Self::Payload>) -> Result<GateDecision<SummaryInput>> {
        let row = sqlx::query_as::<_, GateRow>(
            r#"
            SELECT transcript_status, transcript_text,
                   metadata_status, metadata_tags, metadata_clean_description,
                   metadata_hashtags, metadata_urls, metadata_sponsors
            FROM videos
            WHERE id = $1
            "#,
        )
        .bind(job.payload.video_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(GateDecision::Dead("video deleted".to_string()));
        };

        match row.transcript_status {
            JobStatus::Pending => return Ok(GateDecision::NotYet),
            JobStatus::Failed => {
                return Ok(GateDecision::Dead("transcript failed permanently".to_string()))
            }
            JobStatus::Ready => {}
        }

        let transcript = match row.transcript_text {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Ok(GateDecision::Dead("transcript text missing".to_string())),
        };

        let metadata = match row.metadata_status {
            JobStatus::Ready => Some(VideoMetadata::from_columns(
                row.metadata_tags,
                row.metadata_clean_description,
                row.metadata_hashtags,
                row.metadata_urls,
                row.metadata_sponsors,
            )),
            _ => None,
        };

        Ok(GateDecision::Proceed(SummaryInput {
            transcript,
            metadata,
        }))
    }

    async fn complete(&self, job: &ClaimedJob<Self::Payload>, output: SummaryDraft) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE summaries
            SET tl_dr = $2,
                highlights = $3,
                key_quote = $4,
                topics = $5,
                status = 'ready',
                next_attempt_at = NULL,
                last_error = NULL,
                completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job.payload.summary_id)
        .bind(&output.tl_dr)
        .bind(join_lines(&output.highlights))
        .bind(&output.key_quote)
        .bind(join_lines(&output.topics))
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE videos SET summary_ready_at = NOW() WHERE id = $1")
            .bind(job.payload.video_id)
            .execute(&mut *tx)
            .await?;

        // Fan out one notification job per current subscriber. The
        // unique (video_id, subscriber_id) pair makes re-runs no-ops.
        sqlx::query(
            r#"
            INSERT INTO notification_jobs (video_id, subscriber_id, next_attempt_at)
            SELECT v.id, sc.subscriber_id, NOW()
            FROM videos v
            JOIN subscriber_channels sc ON sc.channel_id = v.channel_id
            WHERE v.id = $1
            ON CONFLICT (video_id, subscriber_id) DO NOTHING
            "#,
        )
        .bind(job.payload.video_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        job: &ClaimedJob<Self::Payload>,
        outcome: &FailureOutcome,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE summaries
            SET status = $2,
                retry_count = $3,
                next_attempt_at = $4,
                last_error = $5
            WHERE id = $1
            "#,
        )
        .bind(job.payload.summary_id)
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
            "UPDATE summaries SET next_attempt_at = $2 WHERE id = $1 AND status = 'pending'",
        )
        .bind(job.payload.summary_id)
        .bind(until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct SummaryStageHandler {
    summarizer: Arc<dyn Summarizer>,
}

impl SummaryStageHandler {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self { summarizer }
    }
}

#[async_trait]
impl StageHandler<SummaryStage> for SummaryStageHandler {
    async fn handle(
        &self,
        _payload: &SummaryPayload,
        input: SummaryInput,
    ) -> Result<SummaryDraft, StageError> {
        self.summarizer
            .summarize(&input.transcript, input.metadata.as_ref())
            .await
    }
}
