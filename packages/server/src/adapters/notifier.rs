//! Briefing delivery. The logging notifier renders the full email and
//! writes it to the log instead of an outbox; real transport slots in
//! behind the same trait.

use async_trait::async_trait;
use tracing::info;

use crate::kernel::pipeline::StageError;
use crate::kernel::traits::{Briefing, Notifier};

#[derive(Debug, PartialEq)]
pub struct RenderedBriefing {
    pub subject: String,
    pub body: String,
}

pub fn render_briefing(briefing: &Briefing) -> RenderedBriefing {
    let subject = format!("New summary: {}", briefing.video_title);

    let mut body = format!(
        "Hi,\n\nA new video from a channel you follow has been summarised.\n\n{}\n\nTL;DR:\n{}\n",
        briefing.video_title, briefing.tl_dr
    );

    if !briefing.highlights.is_empty() {
        body.push_str("\nHighlights:\n");
        for highlight in &briefing.highlights {
            body.push_str("- ");
            body.push_str(highlight);
            body.push('\n');
        }
    }

    if let Some(quote) = &briefing.key_quote {
        body.push_str(&format!("\nNotable quote:\n\"{quote}\"\n"));
    }

    body.push_str(&format!(
        "\nWatch: https://www.youtube.com/watch?v={}\n",
        briefing.video_external_id
    ));

    RenderedBriefing { subject, body }
}

pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn deliver(&self, briefing: &Briefing) -> Result<(), StageError> {
        let rendered = render_briefing(briefing);

        info!(
            to = %briefing.recipient_email,
            subject = %rendered.subject,
            body = %rendered.body,
            "delivering briefing (log only)"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn briefing() -> Briefing {
        Briefing {
            video_title: "Rust in Production".to_string(),
            video_external_id: "abc123".to_string(),
            recipient_email: "reader@example.com".to_string(),
            tl_dr: "Rust is used in production. It works well.".to_string(),
            highlights: vec!["Point one.".to_string(), "Point two.".to_string()],
            key_quote: Some("It works well.".to_string()),
        }
    }

    #[test]
    fn renders_subject_from_video_title() {
        let rendered = render_briefing(&briefing());
        assert_eq!(rendered.subject, "New summary: Rust in Production");
    }

    #[test]
    fn renders_all_briefing_sections() {
        let rendered = render_briefing(&briefing());
        assert!(rendered.body.contains("TL;DR:"));
        assert!(rendered.body.contains("- Point one."));
        assert!(rendered.body.contains("\"It works well.\""));
        assert!(rendered.body.contains("watch?v=abc123"));
    }

    #[test]
    fn omits_empty_sections() {
        let mut briefing = briefing();
        briefing.highlights.clear();
        briefing.key_quote = None;

        let rendered = render_briefing(&briefing);
        assert!(!rendered.body.contains("Highlights:"));
        assert!(!rendered.body.contains("Notable quote:"));
    }
}
