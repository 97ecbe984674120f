//! Caption fetching via YouTube's timedtext endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::kernel::pipeline::StageError;
use crate::kernel::traits::{Transcript, TranscriptFetcher};

const PREFERRED_LANGUAGES: &[&str] = &["en", "en-US", "en-GB"];

pub struct TimedTextFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl TimedTextFetcher {
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
impl TranscriptFetcher for TimedTextFetcher {
    async fn fetch(&self, video_external_id: &str) -> Result<Transcript, StageError> {
        for lang in PREFERRED_LANGUAGES {
            let url = format!(
                "{}/api/timedtext?v={}&lang={}&fmt=json3",
                self.base_url, video_external_id, lang
            );

            let response = self.client.get(&url).send().await?;
            if !response.status().is_success() {
                debug!(video = video_external_id, lang, status = %response.status(), "timedtext request unsuccessful");
                continue;
            }

            let body = response.text().await?;
            if body.trim().is_empty() {
                continue;
            }

            let text = match collect_caption_text(&body) {
                Ok(text) => text,
                Err(e) => {
                    debug!(video = video_external_id, lang, error = %e, "timedtext body unparseable");
                    continue;
                }
            };

            if !text.is_empty() {
                return Ok(Transcript {
                    text,
                    language: Some((*lang).to_string()),
                });
            }
        }

        // Captions often appear a while after upload; worth retrying.
        Err(StageError::transient(format!(
            "no transcript available yet for {video_external_id}"
        )))
    }
}

#[derive(Deserialize)]
struct TimedText {
    #[serde(default)]
    events: Vec<TimedTextEvent>,
}

#[derive(Deserialize)]
struct TimedTextEvent {
    #[serde(default)]
    segs: Vec<TimedTextSeg>,
}

#[derive(Deserialize)]
struct TimedTextSeg {
    #[serde(default)]
    utf8: String,
}

/// Flatten a timedtext json3 body into one whitespace-joined string.
fn collect_caption_text(body: &str) -> Result<String, serde_json::Error> {
    let parsed: TimedText = serde_json::from_str(body)?;

    let mut parts = Vec::new();
    for event in parsed.events {
        for seg in event.segs {
            let text = seg.utf8.trim();
            if !text.is_empty() {
                parts.push(text.to_owned());
            }
        }
    }

    Ok(parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_caption_text_across_events() {
        let body = r#"{
            "events": [
                {"segs": [{"utf8": "Hello"}, {"utf8": " world."}]},
                {"tStartMs": 1200},
                {"segs": [{"utf8": "\n"}, {"utf8": "Second line."}]}
            ]
        }"#;

        let text = collect_caption_text(body).unwrap();
        assert_eq!(text, "Hello world. Second line.");
    }

    #[test]
    fn empty_events_produce_empty_text() {
        assert_eq!(collect_caption_text(r#"{"events": []}"#).unwrap(), "");
        assert_eq!(collect_caption_text("{}").unwrap(), "");
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(collect_caption_text("<transcript/>").is_err());
    }
}
