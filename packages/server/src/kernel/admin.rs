//! Operator-facing queries over the embedded jobs, plus manual re-seeding.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::kernel::pipeline::{JobStatus, Stage};

/// One job as seen by an operator, regardless of which table it lives in.
#[derive(Debug, Clone)]
pub struct JobOverview {
    pub stage: Stage,
    pub id: i64,
    /// Human-readable owner of the job (video external id, or ids for
    /// rows keyed by more than one parent).
    pub owner: String,
    pub status: JobStatus,
    pub retry_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(FromRow)]
struct OverviewRow {
    id: i64,
    owner: String,
    retry_count: i32,
    next_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// List every job of a stage currently in the given status.
pub async fn jobs_in_status(
    pool: &PgPool,
    stage: Stage,
    status: JobStatus,
) -> Result<Vec<JobOverview>> {
    let sql = match stage {
        Stage::Transcript => {
            r#"
            SELECT id, external_id AS owner,
                   transcript_retry_count AS retry_count,
                   transcript_next_attempt_at AS next_attempt_at,
                   transcript_last_error AS last_error
            FROM videos
            WHERE transcript_status = $1
            ORDER BY id
            "#
        }
        Stage::Metadata => {
            r#"
            SELECT id, external_id AS owner,
                   metadata_retry_count AS retry_count,
                   metadata_next_attempt_at AS next_attempt_at,
                   metadata_last_error AS last_error
            FROM videos
            WHERE metadata_status = $1
            ORDER BY id
            "#
        }
        Stage::Summary => {
            r#"
            SELECT id, 'video:' || video_id AS owner,
                   retry_count, next_attempt_at, last_error
            FROM summaries
            WHERE status = $1
            ORDER BY id
            "#
        }
        Stage::Notification => {
            r#"
            SELECT id, 'video:' || video_id || ' subscriber:' || subscriber_id AS owner,
                   retry_count, next_attempt_at, last_error
            FROM notification_jobs
            WHERE status = $1
            ORDER BY id
            "#
        }
    };

    let rows = sqlx::query_as::<_, OverviewRow>(sql)
        .bind(status)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| JobOverview {
            stage,
            id: row.id,
            owner: row.owner,
            status,
            retry_count: row.retry_count,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
        })
        .collect())
}

/// Re-arm a permanently failed job: back to pending with a fresh retry
/// budget and an immediate next attempt. Only failed jobs are eligible;
/// returns false when the row was missing or not failed.
pub async fn reseed(pool: &PgPool, stage: Stage, id: i64) -> Result<bool> {
    let sql = match stage {
        Stage::Transcript => {
            r#"
            UPDATE videos
            SET transcript_status = 'pending',
                transcript_retry_count = 0,
                transcript_next_attempt_at = NOW(),
                transcript_last_error = NULL
            WHERE id = $1 AND transcript_status = 'failed'
            "#
        }
        Stage::Metadata => {
            r#"
            UPDATE videos
            SET metadata_status = 'pending',
                metadata_retry_count = 0,
                metadata_next_attempt_at = NOW(),
                metadata_last_error = NULL
            WHERE id = $1 AND metadata_status = 'failed'
            "#
        }
        Stage::Summary => {
            r#"
            UPDATE summaries
            SET status = 'pending',
                retry_count = 0,
                next_attempt_at = NOW(),
                last_error = NULL
            WHERE id = $1 AND status = 'failed'
            "#
        }
        Stage::Notification => {
            r#"
            UPDATE notification_jobs
            SET status = 'pending',
                retry_count = 0,
                next_attempt_at = NOW(),
                last_error = NULL
            WHERE id = $1 AND status = 'failed'
            "#
        }
    };

    let result = sqlx::query(sql).bind(id).execute(pool).await?;

    Ok(result.rows_affected() > 0)
}

/// Validate an operator-supplied stage name.
pub fn parse_stage(name: &str) -> Result<Stage> {
    match name {
        "transcript" => Ok(Stage::Transcript),
        "metadata" => Ok(Stage::Metadata),
        "summary" => Ok(Stage::Summary),
        "notification" => Ok(Stage::Notification),
        other => bail!("unknown stage '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stage_accepts_known_names() {
        assert_eq!(parse_stage("transcript").unwrap(), Stage::Transcript);
        assert_eq!(parse_stage("notification").unwrap(), Stage::Notification);
    }

    #[test]
    fn parse_stage_rejects_unknown_names() {
        assert!(parse_stage("transcripts").is_err());
        assert!(parse_stage("").is_err());
    }
}
