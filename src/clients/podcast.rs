// Podcast audio: chunked TTS synthesis, MP3 concatenation, blob publication

use async_trait::async_trait;
use std::path::PathBuf;

use super::{truncate_chars, BlobStorageClient, ElevenLabsClient};
use crate::workflow::{ArtifactGenerator, StageError};

/// Upper bound per TTS request
pub const TTS_CHUNK_CHARS: usize = 4_000;

/// Split `text` into chunks of at most `max_chars` characters, breaking on
/// whitespace. A single word longer than the limit is cut hard.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let mut word = word;
        let mut word_len = word.chars().count();

        while word_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let head = truncate_chars(word, max_chars);
            chunks.push(head.to_string());
            word = &word[head.len()..];
            word_len -= max_chars;
        }
        if word.is_empty() {
            continue;
        }

        let needed = current_len + word_len + usize::from(current_len > 0);
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub struct PodcastAudioGenerator {
    tts: ElevenLabsClient,
    blob: BlobStorageClient,
    subfolder: String,
    work_dir: PathBuf,
}

impl PodcastAudioGenerator {
    pub fn new(
        tts: ElevenLabsClient,
        blob: BlobStorageClient,
        subfolder: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tts,
            blob,
            subfolder: subfolder.into(),
            work_dir: work_dir.into(),
        }
    }

    async fn synthesize(&self, script: &str) -> Result<Vec<u8>, StageError> {
        let chunks = split_text(script, TTS_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(StageError::Generation("Podcast script is empty".to_string()));
        }

        let mut audio = Vec::new();
        let mut previous: Option<&str> = None;
        for (i, chunk) in chunks.iter().enumerate() {
            tracing::info!("🔊 Synthesizing podcast chunk {}/{}", i + 1, chunks.len());
            // MP3 frames are self-delimiting, so plain concatenation plays back
            let bytes = self.tts.text_to_speech(chunk, previous).await?;
            audio.extend_from_slice(&bytes);
            previous = Some(chunk.as_str());
        }
        Ok(audio)
    }
}

#[async_trait]
impl ArtifactGenerator for PodcastAudioGenerator {
    async fn generate_and_publish(&self, text: &str, correlation_id: &str) -> Result<String, StageError> {
        if !self.tts.is_configured() {
            return Err(StageError::Configuration("ELEVEN_LABS_API_KEY must be set".to_string()));
        }
        if !self.blob.is_configured() {
            return Err(StageError::Configuration(
                "Blob storage is required to publish podcasts".to_string(),
            ));
        }

        let audio = self.synthesize(text).await?;

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let path = self.work_dir.join(format!("podcast_{}.mp3", correlation_id));
        tokio::fs::write(&path, &audio).await?;

        let uploaded = self.blob.upload_file(&path, &self.subfolder, "audio/mpeg").await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("Could not remove local podcast {}: {}", path.display(), e);
        }

        let url = uploaded?;
        tracing::info!("✅ Podcast published for session {}", correlation_id);
        Ok(url)
    }
}
