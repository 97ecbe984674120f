//! Subscribers and their channel subscriptions.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, FromRow)]
pub struct Subscriber {
    pub id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl Subscriber {
    /// Create a subscriber, or return the existing row for this email.
    pub async fn upsert(pool: &PgPool, email: &str) -> Result<Self> {
        let subscriber = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO subscribers (email)
            VALUES ($1)
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING *
            "#,
        )
        .bind(email)
        .fetch_one(pool)
        .await?;

        Ok(subscriber)
    }

    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>> {
        let subscriber = sqlx::query_as::<_, Self>("SELECT * FROM subscribers WHERE email = $1")
            .bind(email)
            .fetch_optional(pool)
            .await?;

        Ok(subscriber)
    }

    /// Subscribe to a channel. Returns false when the link already existed.
    pub async fn subscribe(pool: &PgPool, subscriber_id: i64, channel_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriber_channels (subscriber_id, channel_id)
            VALUES ($1, $2)
            ON CONFLICT (subscriber_id, channel_id) DO NOTHING
            "#,
        )
        .bind(subscriber_id)
        .bind(channel_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn unsubscribe(pool: &PgPool, subscriber_id: i64, channel_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM subscriber_channels WHERE subscriber_id = $1 AND channel_id = $2",
        )
        .bind(subscriber_id)
        .bind(channel_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn for_channel(pool: &PgPool, channel_id: i64) -> Result<Vec<Self>> {
        let subscribers = sqlx::query_as::<_, Self>(
            r#"
            SELECT s.*
            FROM subscribers s
            JOIN subscriber_channels sc ON sc.subscriber_id = s.id
            WHERE sc.channel_id = $1
            ORDER BY s.id
            "#,
        )
        .bind(channel_id)
        .fetch_all(pool)
        .await?;

        Ok(subscribers)
    }
}
