// src/workflow/collaborators.rs
//! The I/O services a pipeline drives. Implementations live in `crate::clients`;
//! each maps its own failures into `StageError` so the retry runner can classify them.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::StageError;

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch `source_url` into `dest_dir`, naming the file after `name_hint`.
    async fn download(
        &self,
        source_url: &str,
        dest_dir: &Path,
        name_hint: &str,
    ) -> Result<PathBuf, StageError>;
}

#[async_trait]
pub trait AudioExtractor: Send + Sync {
    async fn extract(&self, video_path: &Path, dest_dir: &Path) -> Result<PathBuf, StageError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path, correlation_id: &str)
        -> Result<String, StageError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, StageError>;
}

#[async_trait]
pub trait PodcastScriptWriter: Send + Sync {
    async fn write_script(&self, summary: &str) -> Result<String, StageError>;
}

/// Produces a derived artifact from text and publishes it, returning its URL.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate_and_publish(
        &self,
        text: &str,
        correlation_id: &str,
    ) -> Result<String, StageError>;
}

#[derive(Clone)]
pub struct Collaborators {
    pub downloader: Arc<dyn Downloader>,
    pub audio_extractor: Arc<dyn AudioExtractor>,
    pub transcriber: Arc<dyn Transcriber>,
    pub summarizer: Arc<dyn Summarizer>,
    pub study_guide: Arc<dyn ArtifactGenerator>,
    pub podcast_script: Arc<dyn PodcastScriptWriter>,
    pub podcast_audio: Arc<dyn ArtifactGenerator>,
}
