// Workflow orchestration: per-stage retry, the fixed pipeline, and wave batching
pub mod batch;
pub mod collaborators;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod stages;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{BatchCoordinator, BatchItemOutcome, BatchReport, WaveProgress};
pub use collaborators::{
    ArtifactGenerator, AudioExtractor, Collaborators, Downloader, PodcastScriptWriter, Summarizer,
    Transcriber,
};
pub use error::{ErrorClass, PipelineError, StageError, StageFailure};
pub use orchestrator::{PipelineOrchestrator, PipelineReport};
pub use retry::{LinearBackoff, RetryPolicy, RetryingStageRunner, StageOutput};
pub use stages::{pipeline_plan, Branch, InputSelector, StageDescriptor};
