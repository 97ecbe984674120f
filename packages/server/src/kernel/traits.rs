//! Capability contracts the stage handlers are built on.
//!
//! Each trait covers one external concern and reports failures as
//! [`StageError`] so the worker can route them through the retry policy.
//! Concrete implementations live under `adapters`.

use async_trait::async_trait;

use crate::kernel::pipeline::StageError;

/// A fetched transcript.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
}

/// Enrichment extracted from a video's public metadata.
#[derive(Debug, Clone, Default)]
pub struct VideoMetadata {
    pub tags: Vec<String>,
    pub clean_description: Option<String>,
    pub hashtags: Vec<String>,
    pub urls: Vec<String>,
    pub sponsors: Vec<String>,
}

impl VideoMetadata {
    /// Rebuild from the newline-joined columns the metadata stage persists.
    pub fn from_columns(
        tags: Option<String>,
        clean_description: Option<String>,
        hashtags: Option<String>,
        urls: Option<String>,
        sponsors: Option<String>,
    ) -> Self {
        Self {
            tags: split_lines(tags),
            clean_description,
            hashtags: split_lines(hashtags),
            urls: split_lines(urls),
            sponsors: split_lines(sponsors),
        }
    }
}

/// Join a list for storage, returning None when there is nothing to store.
pub fn join_lines(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join("\n"))
    }
}

fn split_lines(stored: Option<String>) -> Vec<String> {
    stored
        .as_deref()
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// A produced summary, before it is persisted.
#[derive(Debug, Clone)]
pub struct SummaryDraft {
    pub tl_dr: String,
    pub highlights: Vec<String>,
    pub key_quote: Option<String>,
    pub topics: Vec<String>,
}

/// Everything the notifier needs to address and render one delivery.
#[derive(Debug, Clone)]
pub struct Briefing {
    pub video_title: String,
    pub video_external_id: String,
    pub recipient_email: String,
    pub tl_dr: String,
    pub highlights: Vec<String>,
    pub key_quote: Option<String>,
}

#[async_trait]
pub trait TranscriptFetcher: Send + Sync {
    async fn fetch(&self, video_external_id: &str) -> Result<Transcript, StageError>;
}

#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    async fn enrich(&self, video_external_id: &str) -> Result<VideoMetadata, StageError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        transcript: &str,
        metadata: Option<&VideoMetadata>,
    ) -> Result<SummaryDraft, StageError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, briefing: &Briefing) -> Result<(), StageError>;
}
