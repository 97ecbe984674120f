//! The four concrete pipeline stages, wired from [`PipelineDeps`].

pub mod metadata;
pub mod notify;
pub mod summary;
pub mod transcript;

use std::sync::Arc;

use crate::kernel::pipeline::{BackoffPolicy, StageWorker, StageWorkerConfig};
use crate::kernel::PipelineDeps;

pub use metadata::{MetadataStage, MetadataStageHandler};
pub use notify::{NotificationStage, NotificationStageHandler};
pub use summary::{SummaryStage, SummaryStageHandler};
pub use transcript::{TranscriptStage, TranscriptStageHandler};

pub fn transcript_worker(
    deps: &PipelineDeps,
    policy: BackoffPolicy,
    config: StageWorkerConfig,
) -> StageWorker<TranscriptStage> {
    StageWorker::with_config(
        Arc::new(TranscriptStage::new(deps.pool.clone())),
        Arc::new(TranscriptStageHandler::new(
            deps.transcripts.clone(),
            deps.transcript_throttle.clone(),
        )),
        policy,
        config,
    )
}

pub fn metadata_worker(
    deps: &PipelineDeps,
    policy: BackoffPolicy,
    config: StageWorkerConfig,
) -> StageWorker<MetadataStage> {
    StageWorker::with_config(
        Arc::new(MetadataStage::new(deps.pool.clone())),
        Arc::new(MetadataStageHandler::new(deps.metadata.clone())),
        policy,
        config,
    )
}

pub fn summary_worker(
    deps: &PipelineDeps,
    policy: BackoffPolicy,
    config: StageWorkerConfig,
) -> StageWorker<SummaryStage> {
    StageWorker::with_config(
        Arc::new(SummaryStage::new(deps.pool.clone())),
        Arc::new(SummaryStageHandler::new(deps.summarizer.clone())),
        policy,
        config,
    )
}

pub fn notification_worker(
    deps: &PipelineDeps,
    policy: BackoffPolicy,
    config: StageWorkerConfig,
) -> StageWorker<NotificationStage> {
    StageWorker::with_config(
        Arc::new(NotificationStage::new(deps.pool.clone())),
        Arc::new(NotificationStageHandler::new(deps.notifier.clone())),
        policy,
        config,
    )
}
