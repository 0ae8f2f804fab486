// src/workflow/error.rs
use thiserror::Error;

use crate::models::StageKind;
use crate::store::StoreError;

/// How the retry runner should treat a collaborator error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth another attempt (network faults, flaky services, bad model output)
    Transient,
    /// Retrying cannot help
    Permanent,
}

/// Errors raised by the collaborators behind each stage.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Source not found: {0}")]
    NotFound(String),
    #[error("Transfer failed: {0}")]
    Transfer(String),
    #[error("Audio extraction failed: {0}")]
    Extraction(String),
    #[error("Transcription failed: {0}")]
    Transcription(String),
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Missing configuration: {0}")]
    Configuration(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StageError::Configuration(_) => ErrorClass::Permanent,
            _ => ErrorClass::Transient,
        }
    }
}

impl From<reqwest::Error> for StageError {
    fn from(err: reqwest::Error) -> Self {
        StageError::Transfer(err.to_string())
    }
}

/// A stage that reached `Failed` after its attempts were used up.
#[derive(Error, Debug)]
#[error("Stage {kind} failed after {attempts} attempt(s): {source}")]
pub struct StageFailure {
    pub kind: StageKind,
    pub attempts: u32,
    #[source]
    pub source: StageError,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageFailure),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Stage {kind} has no input available")]
    MissingInput { kind: StageKind },
}

impl PipelineError {
    /// The stage that aborted the pipeline, if the failure came from a stage.
    pub fn failed_stage(&self) -> Option<StageKind> {
        match self {
            PipelineError::Stage(failure) => Some(failure.kind),
            PipelineError::MissingInput { kind } => Some(*kind),
            PipelineError::Store(_) => None,
        }
    }
}
