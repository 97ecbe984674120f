//! Environment-driven configuration.

use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Duration;
use dotenvy::dotenv;

use crate::kernel::pipeline::BackoffPolicy;

/// Retry tuning for one pipeline stage.
#[derive(Debug, Clone, Copy)]
pub struct StageSettings {
    pub max_retries: i32,
    pub backoff_base_minutes: i64,
    pub batch_size: i64,
}

impl StageSettings {
    pub fn backoff_policy(&self, cap_minutes: i64) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::minutes(self.backoff_base_minutes.max(1)),
            Duration::minutes(cap_minutes.max(1)),
            self.max_retries,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub openai_max_chars: usize,

    pub transcript: StageSettings,
    pub metadata: StageSettings,
    pub summary: StageSettings,
    pub notify: StageSettings,
    /// Upper bound on any computed backoff delay.
    pub backoff_cap_minutes: i64,

    pub transcript_max_concurrency: usize,
    pub transcript_min_interval_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,

            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            openai_model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            openai_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_max_chars: env_parsed("OPENAI_MAX_CHARS", 12_000)?,

            transcript: StageSettings {
                max_retries: env_parsed("TRANSCRIPT_MAX_RETRIES", 6)?,
                backoff_base_minutes: env_parsed("TRANSCRIPT_BACKOFF_MINUTES", 5)?,
                batch_size: env_parsed("TRANSCRIPT_BATCH_SIZE", 10)?,
            },
            metadata: StageSettings {
                max_retries: env_parsed("METADATA_MAX_RETRIES", 4)?,
                backoff_base_minutes: env_parsed("METADATA_BACKOFF_MINUTES", 5)?,
                batch_size: env_parsed("METADATA_BATCH_SIZE", 10)?,
            },
            summary: StageSettings {
                max_retries: env_parsed("SUMMARY_MAX_RETRIES", 5)?,
                backoff_base_minutes: env_parsed("SUMMARY_BACKOFF_MINUTES", 5)?,
                batch_size: env_parsed("SUMMARY_BATCH_SIZE", 10)?,
            },
            notify: StageSettings {
                max_retries: env_parsed("NOTIFY_MAX_RETRIES", 5)?,
                backoff_base_minutes: env_parsed("NOTIFY_BACKOFF_MINUTES", 5)?,
                batch_size: env_parsed("NOTIFY_BATCH_SIZE", 10)?,
            },
            backoff_cap_minutes: env_parsed("BACKOFF_CAP_MINUTES", 360)?,

            transcript_max_concurrency: env_parsed::<usize>("TRANSCRIPT_MAX_CONCURRENCY", 2)?
                .max(1),
            transcript_min_interval_ms: env_parsed("TRANSCRIPT_MIN_INTERVAL_MS", 500)?,
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("invalid value for {name}")),
        Err(_) => Ok(default),
    }
}
