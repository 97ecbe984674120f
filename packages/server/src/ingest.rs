//! Entry point for new uploads, as reported by a feed poller or push
//! notification. Recording an upload seeds the transcript job, which
//! drags the rest of the pipeline behind it.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;

use crate::domains::{Channel, Video, VideoUpload};

#[derive(Debug, Clone)]
pub struct UploadEvent {
    pub channel_external_id: String,
    pub channel_title: String,
    pub video_external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Record an upload, creating the channel if needed. Idempotent: a
/// repeated event refreshes the video and re-arms its transcript job.
pub async fn record_upload(pool: &PgPool, event: &UploadEvent) -> Result<Video> {
    let channel = Channel::upsert(pool, &event.channel_external_id, &event.channel_title).await?;

    let video = Video::record_upload(
        pool,
        channel.id,
        &VideoUpload {
            external_id: event.video_external_id.clone(),
            title: event.title.clone(),
            description: event.description.clone(),
            published_at: event.published_at,
        },
    )
    .await?;

    info!(
        channel = %channel.external_id,
        video = %video.external_id,
        video_id = video.id,
        "recorded upload"
    );

    Ok(video)
}
