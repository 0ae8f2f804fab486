// Audio extraction via the ffmpeg command-line tool

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::truncate_chars;
use crate::workflow::{AudioExtractor, StageError};

/// Mono 16 kHz 32 kbps MP3: small uploads, plenty for speech recognition.
pub struct FfmpegAudioExtractor {
    binary: String,
}

impl Default for FfmpegAudioExtractor {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegAudioExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn output_path(video_path: &Path, dest_dir: &Path) -> PathBuf {
        let stem = video_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        dest_dir.join(format!("{}.mp3", stem))
    }

    fn args(video_path: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".into(),
            "-i".into(),
            video_path.display().to_string(),
            "-vn".into(),
            "-ac".into(),
            "1".into(),
            "-ar".into(),
            "16000".into(),
            "-c:a".into(),
            "libmp3lame".into(),
            "-b:a".into(),
            "32k".into(),
            "-f".into(),
            "mp3".into(),
            output.display().to_string(),
        ]
    }
}

#[async_trait]
impl AudioExtractor for FfmpegAudioExtractor {
    async fn extract(&self, video_path: &Path, dest_dir: &Path) -> Result<PathBuf, StageError> {
        if !tokio::fs::try_exists(video_path).await.unwrap_or(false) {
            return Err(StageError::Extraction(format!(
                "Video file {} does not exist",
                video_path.display()
            )));
        }
        tokio::fs::create_dir_all(dest_dir).await?;

        let output_path = Self::output_path(video_path, dest_dir);
        tracing::info!("🎵 Extracting audio from {}", video_path.display());

        let output = Command::new(&self.binary)
            .args(Self::args(video_path, &output_path))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                StageError::Extraction(format!(
                    "Failed to execute {}: {}. Make sure ffmpeg is installed.",
                    self.binary, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(5)..].join(" | ");
            tracing::error!("ffmpeg error: {}", stderr);
            return Err(StageError::Extraction(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                truncate_chars(&tail, 500)
            )));
        }

        tracing::info!("✅ Audio written to {}", output_path.display());
        Ok(output_path)
    }
}
