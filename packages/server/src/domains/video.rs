//! Videos and their embedded transcript/metadata jobs.
//!
//! The transcript and metadata stages live as column groups on this table
//! rather than in a separate jobs table, so a video row carries the full
//! retry state for both stages.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::kernel::pipeline::JobStatus;

#[derive(Debug, Clone, FromRow)]
pub struct Video {
    pub id: i64,
    pub channel_id: i64,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,

    pub transcript_text: Option<String>,
    pub transcript_lang: Option<String>,
    pub transcript_fetched_at: Option<DateTime<Utc>>,
    pub transcript_status: JobStatus,
    pub transcript_retry_count: i32,
    pub transcript_next_attempt_at: Option<DateTime<Utc>>,
    pub transcript_last_error: Option<String>,

    pub metadata_tags: Option<String>,
    pub metadata_clean_description: Option<String>,
    pub metadata_hashtags: Option<String>,
    pub metadata_urls: Option<String>,
    pub metadata_sponsors: Option<String>,
    pub metadata_fetched_at: Option<DateTime<Utc>>,
    pub metadata_status: JobStatus,
    pub metadata_retry_count: i32,
    pub metadata_next_attempt_at: Option<DateTime<Utc>>,
    pub metadata_last_error: Option<String>,

    pub summary_ready_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A new upload as reported by the feed poller or webhook.
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Video {
    /// Record an upload, seeding the transcript job. Re-delivery of a known
    /// video refreshes its fields and re-arms the transcript job instead of
    /// creating a duplicate row.
    pub async fn record_upload(
        pool: &PgPool,
        channel_id: i64,
        upload: &VideoUpload,
    ) -> Result<Self> {
        let video = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO videos (
                channel_id, external_id, title, description, published_at,
                transcript_status, transcript_retry_count, transcript_next_attempt_at
            )
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, NOW())
            ON CONFLICT (channel_id, external_id) DO UPDATE SET
                title = EXCLUDED.title,
                description = COALESCE(EXCLUDED.description, videos.description),
                published_at = COALESCE(EXCLUDED.published_at, videos.published_at),
                transcript_status = 'pending',
                transcript_retry_count = 0,
                transcript_next_attempt_at = NOW(),
                transcript_last_error = NULL
            RETURNING *
            "#,
        )
        .bind(channel_id)
        .bind(&upload.external_id)
        .bind(&upload.title)
        .bind(&upload.description)
        .bind(upload.published_at)
        .fetch_one(pool)
        .await?;

        Ok(video)
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Self>> {
        let video = sqlx::query_as::<_, Self>("SELECT * FROM videos WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(video)
    }

    pub async fn delete(pool: &PgPool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM videos WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
