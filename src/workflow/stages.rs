// src/workflow/stages.rs
//! The fixed stage plan and the values flowing between stages.

use std::path::PathBuf;

use super::retry::StageOutput;
use crate::models::{OutputKind, StageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    /// Mandatory stages; a failure aborts the pipeline
    Core,
    StudyGuide,
    Podcast,
}

/// Which previously produced value a stage consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSelector {
    SourceUrl,
    VideoPath,
    AudioPath,
    Transcript,
    Summary,
    PodcastScript,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub kind: StageKind,
    pub branch: Branch,
    pub input: InputSelector,
    /// Stored as result text when the stage has nothing better to record
    pub success_label: &'static str,
}

const CORE_STAGES: [StageDescriptor; 4] = [
    StageDescriptor {
        kind: StageKind::Download,
        branch: Branch::Core,
        input: InputSelector::SourceUrl,
        success_label: "Video downloaded",
    },
    StageDescriptor {
        kind: StageKind::ExtractAudio,
        branch: Branch::Core,
        input: InputSelector::VideoPath,
        success_label: "Audio extracted",
    },
    StageDescriptor {
        kind: StageKind::Transcribe,
        branch: Branch::Core,
        input: InputSelector::AudioPath,
        success_label: "Transcription completed",
    },
    StageDescriptor {
        kind: StageKind::Summarize,
        branch: Branch::Core,
        input: InputSelector::Transcript,
        success_label: "Summary generated",
    },
];

/// Build the ordered stage list for a request. Optional branches are only
/// included when their output kind was requested.
pub fn pipeline_plan(outputs: &[OutputKind]) -> Vec<StageDescriptor> {
    let mut plan = CORE_STAGES.to_vec();

    if outputs.contains(&OutputKind::Pdf) {
        plan.push(StageDescriptor {
            kind: StageKind::StudyGuidePdf,
            branch: Branch::StudyGuide,
            input: InputSelector::Summary,
            success_label: "Study guide published",
        });
    }

    if outputs.contains(&OutputKind::Podcast) {
        plan.push(StageDescriptor {
            kind: StageKind::PodcastScript,
            branch: Branch::Podcast,
            input: InputSelector::Summary,
            success_label: "Podcast script written",
        });
        plan.push(StageDescriptor {
            kind: StageKind::PodcastAudio,
            branch: Branch::Podcast,
            input: InputSelector::PodcastScript,
            success_label: "Podcast published",
        });
    }

    plan
}

/// Owned input handed to a stage's unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageInput {
    Url(String),
    Path(PathBuf),
    Text(String),
}

/// Output of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageValue {
    Path(PathBuf),
    Text(String),
    Url(String),
}

impl StageOutput for StageValue {
    fn record_text(&self) -> Option<String> {
        match self {
            StageValue::Path(path) => path.record_text(),
            StageValue::Text(text) | StageValue::Url(text) => text.record_text(),
        }
    }
}

/// Everything a pipeline run has produced so far.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub source_url: String,
    pub video_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub podcast_script: Option<String>,
    pub pdf_url: Option<String>,
    pub podcast_url: Option<String>,
}

impl PipelineContext {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            ..Default::default()
        }
    }

    pub fn select(&self, selector: InputSelector) -> Option<StageInput> {
        match selector {
            InputSelector::SourceUrl => Some(StageInput::Url(self.source_url.clone())),
            InputSelector::VideoPath => self.video_path.clone().map(StageInput::Path),
            InputSelector::AudioPath => self.audio_path.clone().map(StageInput::Path),
            InputSelector::Transcript => self.transcript.clone().map(StageInput::Text),
            InputSelector::Summary => self.summary.clone().map(StageInput::Text),
            InputSelector::PodcastScript => self.podcast_script.clone().map(StageInput::Text),
        }
    }

    /// Store a stage's output in the slot that stage owns.
    pub fn absorb(&mut self, kind: StageKind, value: StageValue) {
        let text = match value {
            StageValue::Path(path) => {
                match kind {
                    StageKind::Download => self.video_path = Some(path),
                    StageKind::ExtractAudio => self.audio_path = Some(path),
                    _ => tracing::warn!("Stage {} produced an unexpected path", kind),
                }
                return;
            }
            StageValue::Text(text) | StageValue::Url(text) => text,
        };

        match kind {
            StageKind::Transcribe => self.transcript = Some(text),
            StageKind::Summarize => self.summary = Some(text),
            StageKind::PodcastScript => self.podcast_script = Some(text),
            StageKind::StudyGuidePdf => self.pdf_url = Some(text),
            StageKind::PodcastAudio => self.podcast_url = Some(text),
            StageKind::Download | StageKind::ExtractAudio => {
                tracing::warn!("Stage {} produced text instead of a path", kind)
            }
        }
    }

    /// Local files that should not outlive the run.
    pub fn transient_files(&self) -> Vec<PathBuf> {
        self.video_path
            .iter()
            .chain(self.audio_path.iter())
            .cloned()
            .collect()
    }
}
