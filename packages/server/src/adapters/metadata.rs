//! Metadata enrichment by scraping a video's public watch page.
//!
//! The watch page embeds the player response as inline JSON; the
//! description and keyword list are pulled out of it with regexes
//! rather than a full HTML parse. The cleaning helpers are pure and
//! tested directly.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

use crate::kernel::pipeline::StageError;
use crate::kernel::traits::{MetadataEnricher, VideoMetadata};

lazy_static! {
    static ref TAG_SPLIT_RE: Regex = Regex::new(r",\s*").unwrap();
    static ref TIMESTAMP_RE: Regex = Regex::new(r"^\s*\d{1,2}:\d{2}").unwrap();
    static ref URL_RE: Regex = Regex::new(r"https?://\S+").unwrap();
    static ref HASHTAG_RE: Regex = Regex::new(r"#(\w+)").unwrap();
    static ref SHORT_DESCRIPTION_RE: Regex =
        Regex::new(r#""shortDescription":"((?:[^"\\]|\\.)*)""#).unwrap();
    static ref KEYWORDS_RE: Regex = Regex::new(r#""keywords":\s*(\[[^\]]*\])"#).unwrap();
}

/// Lowercase, trim and deduplicate a comma-separated tag list.
pub fn normalise_tags(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }

    let deduped: BTreeSet<String> = TAG_SPLIT_RE
        .split(raw)
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect();

    deduped.into_iter().collect()
}

/// A raw description split into its useful parts.
#[derive(Debug, Default, PartialEq)]
pub struct CleanedDescription {
    pub clean: String,
    pub hashtags: Vec<String>,
    pub urls: Vec<String>,
    pub sponsors: Vec<String>,
}

/// Drop blank and timestamp (chapter-marker) lines, and collect
/// hashtags, urls and sponsor mentions from the raw text.
pub fn clean_description(raw: &str) -> CleanedDescription {
    if raw.is_empty() {
        return CleanedDescription::default();
    }

    let mut cleaned_lines = Vec::new();
    let mut sponsors = Vec::new();

    for line in raw.lines() {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }
        if TIMESTAMP_RE.is_match(stripped) {
            continue;
        }
        if stripped.to_lowercase().contains("sponsor") {
            sponsors.push(stripped.to_owned());
        }
        cleaned_lines.push(stripped.to_owned());
    }

    let hashtags: BTreeSet<String> = HASHTAG_RE
        .captures_iter(raw)
        .map(|c| c[1].to_lowercase())
        .collect();
    let urls: BTreeSet<String> = URL_RE.find_iter(raw).map(|m| m.as_str().to_owned()).collect();

    CleanedDescription {
        clean: cleaned_lines.join("\n"),
        hashtags: hashtags.into_iter().collect(),
        urls: urls.into_iter().collect(),
        sponsors,
    }
}

/// Pull the player-response description and keywords out of a watch
/// page body.
fn extract_player_fields(body: &str) -> (String, Vec<String>) {
    let description = SHORT_DESCRIPTION_RE
        .captures(body)
        .and_then(|c| serde_json::from_str::<String>(&format!("\"{}\"", &c[1])).ok())
        .unwrap_or_default();

    let keywords = KEYWORDS_RE
        .captures(body)
        .and_then(|c| serde_json::from_str::<Vec<String>>(&c[1]).ok())
        .unwrap_or_default();

    (description, keywords)
}

pub struct WatchPageEnricher {
    client: reqwest::Client,
    base_url: String,
}

impl WatchPageEnricher {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, "https://www.youtube.com")
    }

    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MetadataEnricher for WatchPageEnricher {
    async fn enrich(&self, video_external_id: &str) -> Result<VideoMetadata, StageError> {
        let url = format!("{}/watch?v={}", self.base_url, video_external_id);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(StageError::transient(format!(
                "watch page returned {} for {video_external_id}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let (description, keywords) = extract_player_fields(&body);
        if description.is_empty() && keywords.is_empty() {
            debug!(video = video_external_id, "watch page had no player fields");
        }

        let tags = normalise_tags(&keywords.join(", "));
        let cleaned = clean_description(&description);

        Ok(VideoMetadata {
            tags,
            clean_description: if cleaned.clean.is_empty() {
                None
            } else {
                Some(cleaned.clean)
            },
            hashtags: cleaned.hashtags,
            urls: cleaned.urls,
            sponsors: cleaned.sponsors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalise_tags_deduplicates_and_lowercases() {
        let raw = "Python, AI ,python , Data Science";
        assert_eq!(normalise_tags(raw), vec!["ai", "data science", "python"]);
    }

    #[test]
    fn normalise_tags_handles_empty_input() {
        assert!(normalise_tags("").is_empty());
        assert!(normalise_tags(" , ,").is_empty());
    }

    #[test]
    fn clean_description_strips_timestamps_and_collects_extras() {
        let raw = "\n00:00 Intro\nCheck the sponsor Acme Corp at https://example.com #Coding\nReal content line.\n";

        let cleaned = clean_description(raw);
        assert!(!cleaned.clean.contains("Intro"));
        assert!(cleaned.clean.contains("Real content line."));
        assert_eq!(cleaned.hashtags, vec!["coding"]);
        assert_eq!(cleaned.urls, vec!["https://example.com"]);
        assert_eq!(
            cleaned.sponsors,
            vec!["Check the sponsor Acme Corp at https://example.com #Coding"]
        );
    }

    #[test]
    fn extracts_description_and_keywords_from_watch_page() {
        let body = r#"var ytInitialPlayerResponse = {"videoDetails":{"videoId":"abc","keywords":["Rust","async"],"shortDescription":"Line one\nLine two"}};"#;

        let (description, keywords) = extract_player_fields(body);
        assert_eq!(description, "Line one\nLine two");
        assert_eq!(keywords, vec!["Rust", "async"]);
    }

    #[test]
    fn missing_player_fields_yield_empty_defaults() {
        let (description, keywords) = extract_player_fields("<html></html>");
        assert!(description.is_empty());
        assert!(keywords.is_empty());
    }
}
