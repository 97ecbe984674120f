//! Transcript stage: fetch captions for newly recorded videos.
//!
//! Claims due transcript jobs off the videos table, fetches the
//! transcript through the throttled fetcher, and on success chains the
//! metadata stage and seeds the summary row in the same transaction.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};

use crate::kernel::pipeline::{
    ClaimedJob, FailureOutcome, GateDecision, Stage, StageError, StageHandler, StageStore, Throttle,
};
use crate::kernel::traits::{Transcript, TranscriptFetcher};

pub struct TranscriptStage {
    pool: PgPool,
}

impl TranscriptStage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptPayload {
    pub video_id: i64,
    pub external_id: String,
}

#[derive(FromRow)]
struct ClaimRow {
    id: i64,
    external_id: String,
    transcript_retry_count: i32,
}

#[async_trait]
impl StageStore for TranscriptStage {
    type Payload = TranscriptPayload;
    type Input = ();
    type Output = Transcript;

    fn stage(&self) -> Stage {
        Stage::Transcript
    }

    async fn claim_due(
        &self,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<ClaimedJob<Self::Payload>>> {
        let rows = sqlx::query_as::<_, ClaimRow>(
            r#"
            WITH due AS (
                SELECT id FROM videos
                WHERE transcript_status = 'pending'
                  AND transcript_next_attempt_at <= NOW()
                ORDER BY transcript_next_attempt_at, id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE videos
            SET transcript_next_attempt_at = NOW() + ($2 || ' milliseconds')::INTERVAL
            WHERE id IN (SELECT id FROM due)
            RETURNING id, external_id, transcript_retry_count
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
                retry_count: row.transcript_retry_count,
                payload: TranscriptPayload {
                    video_id: row.id,
                    external_id: row.external_id,
                },
            })
            .collect())
    }

    async fn gate(&self, job: &ClaimedJob<Self::Payload>) -> Result<GateDecision<()>> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM videos WHERE id = $1")
            .bind(job.payload.video_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match exists {
            Some(_) => GateDecision::Proceed(()),
            None => GateDecision::Dead("video deleted".to_string()),
        })
    }

    async fn complete(&self, job: &ClaimedJob<Self::Payload>, output: Transcript) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE videos
            SET transcript_text = $2,
                transcript_lang = $3,
                transcript_fetched_at = NOW(),
                transcript_status = 'ready',
                transcript_next_attempt_at = NULL,
                transcript_last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(job.payload.video_id)
        .bind(&output.text)
        .bind(&output.language)
        .execute(&mut *tx)
        .await?;

        // Chain the metadata stage. The guard keeps a re-fetched
        // transcript from re-arming a metadata job that already ran.
        sqlx::query(
            r#"
            UPDATE videos
            SET metadata_next_attempt_at = NOW()
            WHERE id = $1
              AND metadata_status = 'pending'
              AND metadata_next_attempt_at IS NULL
            "#,
        )
        .bind(job.payload.video_id)
        .execute(&mut *tx)
        .await?;

        // Seed the summary job; idempotent across transcript re-runs.
        sqlx::query(
            r#"
            INSERT INTO summaries (video_id, next_attempt_at)
            VALUES ($1, NOW())
            ON CONFLICT (video_id) DO NOTHING
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
            UPDATE videos
            SET transcript_status = $2,
                transcript_retry_count = $3,
                transcript_next_attempt_at = $4,
                transcript_last_error = $5
            WHERE id = $1
            "#,
        )
        .bind(job.payload.video_id)
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
            r#"
            UPDATE videos
            SET transcript_next_attempt_at = $2
            WHERE id = $1 AND transcript_status = 'pending'
            "#,
        )
        .bind(job.payload.video_id)
        .bind(until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Fetches through the shared throttle so outbound transcript calls stay
/// bounded and paced across the whole batch.
pub struct TranscriptStageHandler {
    fetcher: Arc<dyn TranscriptFetcher>,
    throttle: Arc<Throttle>,
}

impl TranscriptStageHandler {
    pub fn new(fetcher: Arc<dyn TranscriptFetcher>, throttle: Arc<Throttle>) -> Self {
        Self { fetcher, throttle }
    }
}

#[async_trait]
impl StageHandler<TranscriptStage> for TranscriptStageHandler {
    async fn handle(
        &self,
        payload: &TranscriptPayload,
        _input: (),
    ) -> Result<Transcript, StageError> {
        let _permit = self
            .throttle
            .acquire()
            .await
            .map_err(|e| StageError::transient(format!("throttle unavailable: {e}")))?;

        self.fetcher.fetch(&payload.external_id).await
    }
}
