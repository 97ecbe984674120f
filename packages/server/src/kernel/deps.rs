//! Shared dependency container threaded into the stage workers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::kernel::pipeline::Throttle;
use crate::kernel::traits::{MetadataEnricher, Notifier, Summarizer, TranscriptFetcher};

#[derive(Clone)]
pub struct PipelineDeps {
    pub pool: PgPool,
    /// Bounds concurrency and pacing of outbound transcript fetches.
    pub transcript_throttle: Arc<Throttle>,
    pub transcripts: Arc<dyn TranscriptFetcher>,
    pub metadata: Arc<dyn MetadataEnricher>,
    pub summarizer: Arc<dyn Summarizer>,
    pub notifier: Arc<dyn Notifier>,
}
