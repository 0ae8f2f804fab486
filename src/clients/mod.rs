// External service clients behind the pipeline collaborator traits
pub mod audio;
pub mod blob_storage;
pub mod downloader;
pub mod elevenlabs_client;
pub mod openai_client;
pub mod podcast;
pub mod speech;
pub mod study_guide;

pub use audio::FfmpegAudioExtractor;
pub use blob_storage::BlobStorageClient;
pub use downloader::HttpDownloader;
pub use elevenlabs_client::ElevenLabsClient;
pub use openai_client::OpenAiClient;
pub use podcast::PodcastAudioGenerator;
pub use speech::AzureSpeechTranscriber;
pub use study_guide::StudyGuideGenerator;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::workflow::Collaborators;

/// The longest prefix of `text` with at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// First bytes of an error body, enough for a log line.
pub(crate) fn snippet(body: &str) -> &str {
    truncate_chars(body, 300)
}

/// Wire the production clients behind every collaborator seam.
pub fn build_collaborators(config: &AppConfig) -> Collaborators {
    let blob = BlobStorageClient::new(&config.blob);
    let llm = Arc::new(OpenAiClient::new(&config.llm));

    Collaborators {
        downloader: Arc::new(HttpDownloader::new(config.vimeo.clone())),
        audio_extractor: Arc::new(FfmpegAudioExtractor::default()),
        transcriber: Arc::new(AzureSpeechTranscriber::new(
            config.speech.clone(),
            blob.clone(),
            config.blob.audio_subfolder.clone(),
            config.directories.transcripts_dir.clone(),
        )),
        summarizer: llm.clone(),
        study_guide: Arc::new(StudyGuideGenerator::new(
            llm.clone(),
            blob.clone(),
            config.blob.pdf_subfolder.clone(),
        )),
        podcast_script: llm,
        podcast_audio: Arc::new(PodcastAudioGenerator::new(
            ElevenLabsClient::new(&config.tts),
            blob,
            config.blob.podcast_subfolder.clone(),
            config.directories.artifacts_dir.clone(),
        )),
    }
}
