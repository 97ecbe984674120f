//! Notification jobs, one per (video, subscriber) pair.
//!
//! Uniqueness on (video_id, subscriber_id) is what makes fan-out from the
//! summary stage idempotent. Like summaries, the row has no foreign keys so
//! deleted parents surface through the stage gate.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::kernel::pipeline::JobStatus;

#[derive(Debug, Clone, FromRow)]
pub struct NotificationJob {
    pub id: i64,
    pub video_id: i64,
    pub subscriber_id: i64,
    pub status: JobStatus,
    pub retry_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NotificationJob {
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>("SELECT * FROM notification_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(job)
    }

    pub async fn for_video(pool: &PgPool, video_id: i64) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(
            "SELECT * FROM notification_jobs WHERE video_id = $1 ORDER BY id",
        )
        .bind(video_id)
        .fetch_all(pool)
        .await?;

        Ok(jobs)
    }

    pub async fn count_for_video(pool: &PgPool, video_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notification_jobs WHERE video_id = $1")
                .bind(video_id)
                .fetch_one(pool)
                .await?;

        Ok(count)
    }
}
