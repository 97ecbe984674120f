//! Metadata stage: enrich a video from its public watch page.
//!
//! Gated on the transcript stage so enrichment only runs for videos
//! that produced a transcript. Results are stored newline-joined on
//! the video row; the summary stage picks them up opportunistically.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};

use crate::kernel::pipeline::{
    ClaimedJob, FailureOutcome, GateDecision, JobStatus, Stage, StageError, StageHandler,
    StageStore,
};
use crate::kernel::traits::{join_lines, MetadataEnricher, VideoMetadata};

pub struct MetadataStage {
    pool: PgPool,
}

impl MetadataStage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataPayload {
    pub video_id: i64,
    pub external_id: String,
}

#[derive(FromRow)]
struct ClaimRow {
    id: i64,
    external_id: String,
    metadata_retry_count: i32,
}

#[async_trait]
impl StageStore for MetadataStage {
    type Payload = MetadataPayload;
    type Input = ();
    type Output = VideoMetadata;

    fn stage(&self) -> Stage {
        Stage::Metadata
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
                WHERE metadata_status = 'pending'
                  AND metadata_next_attempt_at <= NOW()
                ORDER BY metadata_next_attempt_at, id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE videos
            SET metadata_next_attempt_at = NOW() + ($2 || ' milliseconds')::INTERVAL
            WHERE id IN (SELECT id FROM due)
            RETURNING id, external_id, metadata_retry_count
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
                retry_count: row.metadata_retry_count,
                payload: MetadataPayload {
                    video_id: row.id,
                    external_id: row.external_id,
                },
            })
            .collect())
    }

    async fn gate(&self, job: &ClaimedJob<Self::Payload>) -> Result<GateDecision<()>> {
        let transcript_status: Option<JobStatus> =
            sqlx::query_scalar("SELECT transcript_status FROM videos WHERE id = $1")
                .bind(job.payload.video_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match transcript_status {
            None => GateDecision::Dead("video deleted".to_string()),
            Some(JobStatus::Pending) => GateDecision::NotYet,
            Some(JobStatus::Failed) => {
                GateDecision::Dead("transcript failed permanently".to_string())
            }
            Some(JobStatus::Ready) => GateDecision::Proceed(()),
        })
    }

    async fn complete(&self, job: &ClaimedJob<Self::Payload>, output: VideoMetadata) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE videos
            SET metadata_tags = $2,
                metadata_clean_description = $3,
                metadata_hashtags = $4,
                metadata_urls = $5,
                metadata_sponsors = $6,
                metadata_fetched_at = NOW(),
                metadata_status = 'ready',
                metadata_next_attempt_at = NULL,
                metadata_last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(job.payload.video_id)
        .bind(join_lines(&output.tags))
        .bind(&output.clean_description)
        .bind(join_lines(&output.hashtags))
        .bind(join_lines(&output.urls))
        .bind(join_lines(&output.sponsors))
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
            UPDATE videos
            SET metadata_status = $2,
                metadata_retry_count = $3,
                metadata_next_attempt_at = $4,
                metadata_last_error = $5
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
            SET metadata_next_attempt_at = $2
            WHERE id = $1 AND metadata_status = 'pending'
            "#,
        )
        .bind(job.payload.video_id)
        .bind(until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct MetadataStageHandler {
    enricher: Arc<dyn MetadataEnricher>,
}

impl MetadataStageHandler {
    pub fn new(enricher: Arc<dyn MetadataEnricher>) -> Self {
        Self { enricher }
    }
}

#[async_trait]
impl StageHandler<MetadataStage> for MetadataStageHandler {
    async fn handle(
        &self,
        payload: &MetadataPayload,
        _input: (),
    ) -> Result<VideoMetadata, StageError> {
        self.enricher.enrich(&payload.external_id).await
    }
}
