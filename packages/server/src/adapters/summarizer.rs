//! Summarizers: a deterministic heuristic one, and an LLM-backed one
//! that falls back to the heuristic when the provider misbehaves.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::kernel::pipeline::StageError;
use crate::kernel::traits::{SummaryDraft, Summarizer, VideoMetadata};

const MAX_HIGHLIGHTS: usize = 4;
const MAX_TOPICS: usize = 5;

/// Split text into sentences at `.`, `!` or `?` followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = match chars.peek() {
                Some((_, next)) => next.is_whitespace(),
                None => true,
            };
            if at_boundary {
                let end = i + c.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_owned());
                }
                start = end;
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_owned());
    }

    sentences
}

/// Deterministic summarizer used when no LLM is configured.
pub struct HeuristicSummarizer;

impl HeuristicSummarizer {
    fn draft(
        &self,
        transcript: &str,
        metadata: Option<&VideoMetadata>,
    ) -> Result<SummaryDraft, StageError> {
        let sentences = split_sentences(transcript);
        if sentences.is_empty() {
            // An empty transcript will not improve on retry.
            return Err(StageError::permanent("transcript is empty"));
        }

        let tl_dr = if sentences.len() > 1 {
            sentences[..2].join(" ")
        } else {
            sentences[0].clone()
        };

        let highlights = sentences.iter().take(MAX_HIGHLIGHTS).cloned().collect();

        let key_quote = sentences
            .iter()
            .max_by_key(|sentence| sentence.len())
            .cloned();

        Ok(SummaryDraft {
            tl_dr,
            highlights,
            key_quote,
            topics: topics_from(metadata),
        })
    }
}

fn topics_from(metadata: Option<&VideoMetadata>) -> Vec<String> {
    metadata
        .map(|m| m.tags.iter().take(MAX_TOPICS).cloned().collect())
        .unwrap_or_default()
}

#[async_trait]
impl Summarizer for HeuristicSummarizer {
    async fn summarize(
        &self,
        transcript: &str,
        metadata: Option<&VideoMetadata>,
    ) -> Result<SummaryDraft, StageError> {
        self.draft(transcript, metadata)
    }
}

/// Strip a Markdown code fence (with optional `json` tag) wrapping an
/// LLM response.
pub fn strip_code_fence(content: &str) -> &str {
    let content = content.trim();
    let Some(inner) = content.strip_prefix("```") else {
        return content;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    let inner = inner.trim_matches(|c| c == '`' || c == '\n');
    inner.strip_prefix("json").unwrap_or(inner).trim()
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Transcripts are clipped to this many characters before prompting.
    pub max_chars: usize,
}

/// Summarizes via an OpenAI-compatible chat completions endpoint. Any
/// provider or parse failure logs a warning and falls back to the
/// heuristic summarizer, so the stage itself still succeeds.
pub struct OpenAiSummarizer {
    client: reqwest::Client,
    config: OpenAiConfig,
    fallback: HeuristicSummarizer,
}

impl OpenAiSummarizer {
    pub fn new(client: reqwest::Client, config: OpenAiConfig) -> Self {
        Self {
            client,
            config,
            fallback: HeuristicSummarizer,
        }
    }

    async fn summarize_remote(
        &self,
        transcript: &str,
        metadata: Option<&VideoMetadata>,
    ) -> anyhow::Result<SummaryDraft> {
        let clipped: String = transcript.chars().take(self.config.max_chars).collect();

        let mut user_content = format!(
            "Summarise the following transcript. Produce a concise tl_dr under 60 words, \
             a list of 3-5 key highlights, and a single notable quote (or null if unavailable). \
             Return JSON with keys tl_dr (string), highlights (array of strings), \
             key_quote (string or null). Do not include text outside the JSON object.\
             \n\nTranscript:\n{clipped}"
        );
        if let Some(context) = metadata.and_then(metadata_context) {
            user_content.push_str("\n\nMetadata:\n");
            user_content.push_str(&context);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "messages": [
                    {"role": "system", "content": "You are an expert executive briefing assistant."},
                    {"role": "user", "content": user_content},
                ],
            }))
            .send()
            .await?
            .error_for_status()?;

        let completion: ChatCompletion = response.json().await?;
        let content = completion
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .unwrap_or_default();

        let payload: DraftPayload = serde_json::from_str(strip_code_fence(content))?;

        Ok(SummaryDraft {
            tl_dr: payload.tl_dr.trim().to_owned(),
            highlights: payload
                .highlights
                .into_iter()
                .map(|h| h.trim().to_owned())
                .filter(|h| !h.is_empty())
                .collect(),
            key_quote: payload.key_quote.filter(|q| !q.trim().is_empty()),
            topics: topics_from(metadata),
        })
    }
}

fn metadata_context(metadata: &VideoMetadata) -> Option<String> {
    let mut lines = Vec::new();
    if !metadata.tags.is_empty() {
        lines.push(format!("Tags: {}", metadata.tags.join(", ")));
    }
    if !metadata.hashtags.is_empty() {
        lines.push(format!("Hashtags: {}", metadata.hashtags.join(", ")));
    }
    if !metadata.sponsors.is_empty() {
        lines.push(format!("Sponsor mentions: {}", metadata.sponsors.join("; ")));
    }
    if let Some(description) = metadata.clean_description.as_deref() {
        let snippet: String = description.chars().take(1000).collect();
        lines.push(format!("Description snippet: {snippet}"));
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct DraftPayload {
    #[serde(default)]
    tl_dr: String,
    #[serde(default)]
    highlights: Vec<String>,
    #[serde(default)]
    key_quote: Option<String>,
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(
        &self,
        transcript: &str,
        metadata: Option<&VideoMetadata>,
    ) -> Result<SummaryDraft, StageError> {
        match self.summarize_remote(transcript, metadata).await {
            Ok(draft) => Ok(draft),
            Err(e) => {
                warn!(error = %e, "LLM summary failed; falling back to heuristic");
                self.fallback.summarize(transcript, metadata).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sentences_handles_basic_punctuation() {
        let sentences = split_sentences("Hello world. This is a test! Are you sure?");
        assert_eq!(
            sentences,
            vec!["Hello world.", "This is a test!", "Are you sure?"]
        );
    }

    #[test]
    fn split_sentences_keeps_unpunctuated_tail() {
        let sentences = split_sentences("First. and then a trailing fragment");
        assert_eq!(sentences, vec!["First.", "and then a trailing fragment"]);
    }

    #[test]
    fn split_sentences_does_not_break_inside_numbers() {
        let sentences = split_sentences("Version 2.5 shipped today. It is faster.");
        assert_eq!(
            sentences,
            vec!["Version 2.5 shipped today.", "It is faster."]
        );
    }

    #[tokio::test]
    async fn heuristic_summary_returns_key_fields() {
        let draft = HeuristicSummarizer
            .summarize("One. Two. Three. Four. Five.", None)
            .await
            .unwrap();

        assert_eq!(draft.tl_dr, "One. Two.");
        assert_eq!(draft.highlights.len(), 4);
        assert!(draft.key_quote.is_some());
        assert!(draft.topics.is_empty());
    }

    #[tokio::test]
    async fn heuristic_summary_takes_topics_from_metadata() {
        let metadata = VideoMetadata {
            tags: vec!["rust".into(), "async".into()],
            ..Default::default()
        };

        let draft = HeuristicSummarizer
            .summarize("Only one sentence here.", Some(&metadata))
            .await
            .unwrap();

        assert_eq!(draft.tl_dr, "Only one sentence here.");
        assert_eq!(draft.topics, vec!["rust", "async"]);
    }

    #[tokio::test]
    async fn heuristic_summary_rejects_empty_transcript() {
        let result = HeuristicSummarizer.summarize("\n   \n", None).await;
        assert!(result.is_err());
    }

    #[test]
    fn strips_plain_and_tagged_code_fences() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
