pub mod metadata;
pub mod notifier;
pub mod summarizer;
pub mod transcript;

pub use metadata::WatchPageEnricher;
pub use notifier::LoggingNotifier;
pub use summarizer::{HeuristicSummarizer, OpenAiConfig, OpenAiSummarizer};
pub use transcript::TimedTextFetcher;
