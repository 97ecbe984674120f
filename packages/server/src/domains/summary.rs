//! Summary rows, one per video, carrying the summary stage's retry state.
//!
//! The row deliberately has no foreign key back to videos so a deleted
//! video is observed by the stage gate instead of cascading.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::kernel::pipeline::JobStatus;

#[derive(Debug, Clone, FromRow)]
pub struct Summary {
    pub id: i64,
    pub video_id: i64,
    pub tl_dr: String,
    pub highlights: Option<String>,
    pub key_quote: Option<String>,
    pub topics: Option<String>,
    pub status: JobStatus,
    pub retry_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Summary {
    pub async fn find_by_video_id(pool: &PgPool, video_id: i64) -> Result<Option<Self>> {
        let summary = sqlx::query_as::<_, Self>("SELECT * FROM summaries WHERE video_id = $1")
            .bind(video_id)
            .fetch_optional(pool)
            .await?;

        Ok(summary)
    }

    /// Highlights are stored newline-joined; split them back out for callers.
    pub fn highlight_lines(&self) -> Vec<String> {
        self.highlights
            .as_deref()
            .unwrap_or_default()
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect()
    }
}
