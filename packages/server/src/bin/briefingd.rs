//! Pipeline daemon: runs the four stage workers until shutdown.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use briefing_core::adapters::{
    HeuristicSummarizer, LoggingNotifier, OpenAiConfig, OpenAiSummarizer, TimedTextFetcher,
    WatchPageEnricher,
};
use briefing_core::kernel::pipeline::{StageWorkerConfig, Throttle};
use briefing_core::kernel::traits::Summarizer;
use briefing_core::kernel::{Orchestrator, PipelineDeps};
use briefing_core::stages;
use briefing_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,briefing_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let http = reqwest::Client::builder()
        .timeout(StdDuration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let summarizer: Arc<dyn Summarizer> = match &config.openai_api_key {
        Some(api_key) => {
            tracing::info!(model = %config.openai_model, "using LLM summarizer");
            Arc::new(OpenAiSummarizer::new(
                http.clone(),
                OpenAiConfig {
                    api_key: api_key.clone(),
                    model: config.openai_model.clone(),
                    base_url: config.openai_base_url.clone(),
                    max_chars: config.openai_max_chars,
                },
            ))
        }
        None => {
            tracing::info!("no LLM configured; using heuristic summarizer");
            Arc::new(HeuristicSummarizer)
        }
    };

    let deps = PipelineDeps {
        pool: pool.clone(),
        transcript_throttle: Arc::new(Throttle::new(
            config.transcript_max_concurrency,
            StdDuration::from_millis(config.transcript_min_interval_ms),
        )),
        transcripts: Arc::new(TimedTextFetcher::new(http.clone())),
        metadata: Arc::new(WatchPageEnricher::new(http.clone())),
        summarizer,
        notifier: Arc::new(LoggingNotifier),
    };

    let cap = config.backoff_cap_minutes;

    let mut orchestrator = Orchestrator::new();
    orchestrator.register(stages::transcript_worker(
        &deps,
        config.transcript.backoff_policy(cap),
        worker_config("transcript", config.transcript.batch_size),
    ));
    orchestrator.register(stages::metadata_worker(
        &deps,
        config.metadata.backoff_policy(cap),
        worker_config("metadata", config.metadata.batch_size),
    ));
    orchestrator.register(stages::summary_worker(
        &deps,
        config.summary.backoff_policy(cap),
        worker_config("summary", config.summary.batch_size),
    ));
    orchestrator.register(stages::notification_worker(
        &deps,
        config.notify.backoff_policy(cap),
        worker_config("notification", config.notify.batch_size),
    ));

    orchestrator.run_until_shutdown().await
}

fn worker_config(stage: &str, batch_size: i64) -> StageWorkerConfig {
    StageWorkerConfig {
        batch_size,
        ..StageWorkerConfig::with_worker_id(format!("{stage}-worker"))
    }
}
