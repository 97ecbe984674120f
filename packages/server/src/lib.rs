// Briefing pipeline core.
//
// Turns channel uploads into subscriber briefings through four
// retry-driven stages: transcript, metadata, summary, notification.
// The stage-agnostic machinery lives in kernel::pipeline; the concrete
// stages and their external adapters sit on top of it.

pub mod adapters;
pub mod config;
pub mod domains;
pub mod ingest;
pub mod kernel;
pub mod stages;

pub use config::Config;
