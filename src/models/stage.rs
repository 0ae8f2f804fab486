use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::session::{OutputKind, SessionId};

pub type StageId = i64;

/// Fixed pipeline steps. The ordinal is what gets persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Download,
    ExtractAudio,
    Transcribe,
    Summarize,
    StudyGuidePdf,
    PodcastScript,
    PodcastAudio,
}

impl StageKind {
    pub const ALL: [StageKind; 7] = [
        StageKind::Download,
        StageKind::ExtractAudio,
        StageKind::Transcribe,
        StageKind::Summarize,
        StageKind::StudyGuidePdf,
        StageKind::PodcastScript,
        StageKind::PodcastAudio,
    ];

    pub fn ordinal(self) -> i16 {
        match self {
            StageKind::Download => 1,
            StageKind::ExtractAudio => 2,
            StageKind::Transcribe => 3,
            StageKind::Summarize => 4,
            StageKind::StudyGuidePdf => 5,
            StageKind::PodcastScript => 6,
            StageKind::PodcastAudio => 7,
        }
    }

    pub fn from_ordinal(ordinal: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.ordinal() == ordinal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Download => "download",
            StageKind::ExtractAudio => "extract_audio",
            StageKind::Transcribe => "transcribe",
            StageKind::Summarize => "summarize",
            StageKind::StudyGuidePdf => "study_guide_pdf",
            StageKind::PodcastScript => "podcast_script",
            StageKind::PodcastAudio => "podcast_audio",
        }
    }

    /// The published deliverable this stage produces, if any.
    pub fn deliverable(self) -> Option<OutputKind> {
        match self {
            StageKind::StudyGuidePdf => Some(OutputKind::Pdf),
            StageKind::PodcastAudio => Some(OutputKind::Podcast),
            _ => None,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage lifecycle: Pending/InProgress -> Completed | Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn code(self) -> i16 {
        match self {
            StageStatus::Pending => 1,
            StageStatus::InProgress => 2,
            StageStatus::Completed => 3,
            StageStatus::Failed => 4,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(StageStatus::Pending),
            2 => Some(StageStatus::InProgress),
            3 => Some(StageStatus::Completed),
            4 => Some(StageStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub id: StageId,
    pub session_id: SessionId,
    pub kind: StageKind,
    pub status: StageStatus,
    /// Output on success, error description on terminal failure, progress note otherwise
    pub result_text: String,
    pub error_count: u32,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_follow_execution_order() {
        let ordinals: Vec<i16> = StageKind::ALL.iter().map(|k| k.ordinal()).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(StageKind::from_ordinal(3), Some(StageKind::Transcribe));
        assert_eq!(StageKind::from_ordinal(0), None);
    }

    #[test]
    fn test_only_completed_and_failed_are_terminal() {
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::InProgress.is_terminal());
        assert!(StageStatus::Completed.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
        assert_eq!(StageStatus::from_code(9), None);
    }
}
