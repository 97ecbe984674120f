//! Source channels that videos belong to.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, FromRow)]
pub struct Channel {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub feed_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl Channel {
    /// Insert or refresh a channel keyed by its external identifier.
    pub async fn upsert(pool: &PgPool, external_id: &str, title: &str) -> Result<Self> {
        let channel = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO channels (external_id, title)
            VALUES ($1, $2)
            ON CONFLICT (external_id) DO UPDATE SET title = EXCLUDED.title
            RETURNING *
            "#,
        )
        .bind(external_id)
        .bind(title)
        .fetch_one(pool)
        .await?;

        Ok(channel)
    }

    pub async fn find_by_external_id(pool: &PgPool, external_id: &str) -> Result<Option<Self>> {
        let channel = sqlx::query_as::<_, Self>("SELECT * FROM channels WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(pool)
            .await?;

        Ok(channel)
    }

    pub async fn mark_polled(pool: &PgPool, id: i64) -> Result<()> {
        sqlx::query("UPDATE channels SET last_polled_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }
}
