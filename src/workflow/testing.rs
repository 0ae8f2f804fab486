// src/workflow/testing.rs
//! In-process doubles for the pipeline collaborators.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use super::collaborators::{
    ArtifactGenerator, AudioExtractor, Collaborators, Downloader, PodcastScriptWriter,
    Summarizer, Transcriber,
};
use super::error::StageError;
use super::orchestrator::PipelineOrchestrator;
use super::retry::RetryPolicy;
use crate::config::DirectoryConfig;
use crate::store::{MemoryStore, MemoryStoreProvider};

/// Fails the first `n` calls, then succeeds.
pub struct Flaky {
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl Flaky {
    pub fn new(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    /// Returns true when this call should fail.
    pub fn trip(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub struct FakeDownloader {
    delay: Duration,
    events: EventLog,
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(
        &self,
        source_url: &str,
        dest_dir: &Path,
        name_hint: &str,
    ) -> Result<PathBuf, StageError> {
        self.events.lock().unwrap().push(format!("start:{}", source_url));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.events.lock().unwrap().push(format!("end:{}", source_url));

        if source_url.contains("missing") {
            return Err(StageError::NotFound(format!("{} returned 404", source_url)));
        }
        let path = dest_dir.join(format!("{}.mp4", name_hint));
        std::fs::write(&path, b"fake video bytes")?;
        Ok(path)
    }
}

pub struct FakeAudioExtractor;

#[async_trait]
impl AudioExtractor for FakeAudioExtractor {
    async fn extract(&self, video_path: &Path, dest_dir: &Path) -> Result<PathBuf, StageError> {
        if !video_path.exists() {
            return Err(StageError::Extraction(format!(
                "{} does not exist",
                video_path.display()
            )));
        }
        let stem = video_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        let path = dest_dir.join(format!("{}.mp3", stem));
        std::fs::write(&path, b"fake audio bytes")?;
        Ok(path)
    }
}

pub struct FakeTranscriber {
    pub flaky: Flaky,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, audio_path: &Path, correlation_id: &str) -> Result<String, StageError> {
        if self.flaky.trip() {
            return Err(StageError::Transcription("speech job failed".into()));
        }
        Ok(format!(
            "Transcript of {} for session {}. Today we cover ownership and borrowing in depth.",
            audio_path.display(),
            correlation_id
        ))
    }
}

pub struct FakeSummarizer;

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, StageError> {
        Ok(format!("# Summary\n{}", text))
    }
}

pub struct FakeScriptWriter {
    pub flaky: Flaky,
}

#[async_trait]
impl PodcastScriptWriter for FakeScriptWriter {
    async fn write_script(&self, summary: &str) -> Result<String, StageError> {
        if self.flaky.trip() {
            return Err(StageError::Generation("model returned no script".into()));
        }
        Ok(format!("Welcome to the podcast. {}", summary))
    }
}

pub struct FakeArtifact {
    pub flaky: Flaky,
    pub extension: &'static str,
}

#[async_trait]
impl ArtifactGenerator for FakeArtifact {
    async fn generate_and_publish(&self, _text: &str, correlation_id: &str) -> Result<String, StageError> {
        if self.flaky.trip() {
            return Err(StageError::Publish("blob storage unavailable".into()));
        }
        Ok(format!(
            "https://blob.example/{}/artifact.{}",
            correlation_id, self.extension
        ))
    }
}

/// Failure counts per collaborator; 0 means always healthy.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub transcribe: u32,
    pub study_guide: u32,
    pub podcast_script: u32,
    pub podcast_audio: u32,
    pub download_delay: Duration,
}

pub const ALWAYS: u32 = u32::MAX;

pub struct Fixture {
    _dir: TempDir,
    pub directories: DirectoryConfig,
    pub store: MemoryStore,
    pub provider: Arc<MemoryStoreProvider>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub events: EventLog,
    pub transcriber: Arc<FakeTranscriber>,
    pub study_guide: Arc<FakeArtifact>,
    pub podcast_script: Arc<FakeScriptWriter>,
    pub podcast_audio: Arc<FakeArtifact>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_faults(Faults::default())
    }

    pub fn with_faults(faults: Faults) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let directories = DirectoryConfig {
            input_video_dir: dir.path().join("videos"),
            temp_audio_dir: dir.path().join("audios"),
            transcripts_dir: dir.path().join("transcripts"),
            artifacts_dir: dir.path().join("artifacts"),
        };
        for path in directories.all() {
            std::fs::create_dir_all(path).unwrap();
        }

        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let transcriber = Arc::new(FakeTranscriber {
            flaky: Flaky::new(faults.transcribe),
        });
        let study_guide = Arc::new(FakeArtifact {
            flaky: Flaky::new(faults.study_guide),
            extension: "pdf",
        });
        let podcast_script = Arc::new(FakeScriptWriter {
            flaky: Flaky::new(faults.podcast_script),
        });
        let podcast_audio = Arc::new(FakeArtifact {
            flaky: Flaky::new(faults.podcast_audio),
            extension: "mp3",
        });

        let collaborators = Collaborators {
            downloader: Arc::new(FakeDownloader {
                delay: faults.download_delay,
                events: events.clone(),
            }),
            audio_extractor: Arc::new(FakeAudioExtractor),
            transcriber: transcriber.clone(),
            summarizer: Arc::new(FakeSummarizer),
            study_guide: study_guide.clone(),
            podcast_script: podcast_script.clone(),
            podcast_audio: podcast_audio.clone(),
        };

        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(1),
        };
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            collaborators,
            directories.clone(),
            policy,
        ));

        let store = MemoryStore::new();
        let provider = Arc::new(MemoryStoreProvider::new(store.clone()));

        Self {
            _dir: dir,
            directories,
            store,
            provider,
            orchestrator,
            events,
            transcriber,
            study_guide,
            podcast_script,
            podcast_audio,
        }
    }

    pub fn files_in(&self, dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect()
    }
}
