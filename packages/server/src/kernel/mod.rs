pub mod admin;
pub mod deps;
pub mod orchestrator;
pub mod pipeline;
pub mod traits;

pub use deps::PipelineDeps;
pub use orchestrator::{Orchestrator, Service};
