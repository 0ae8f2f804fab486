// Azure AI Speech batch transcription client

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};

use super::{snippet, BlobStorageClient};
use crate::config::SpeechConfig;
use crate::workflow::{StageError, Transcriber};

const MIN_TRANSCRIPT_CHARS: usize = 10;
/// At the default 100 s interval this is a little over 8 hours
const MAX_POLLS: u32 = 300;

#[derive(Deserialize, Debug)]
struct TranscriptionJob {
    #[serde(rename = "self")]
    self_url: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    links: Option<JobLinks>,
    #[serde(default)]
    properties: Option<JobProperties>,
}

#[derive(Deserialize, Debug)]
struct JobLinks {
    #[serde(default)]
    files: Option<String>,
}

#[derive(Deserialize, Debug)]
struct JobProperties {
    #[serde(default)]
    error: Option<JobError>,
}

#[derive(Deserialize, Debug)]
struct JobError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct FileList {
    #[serde(default)]
    values: Vec<ResultFile>,
}

#[derive(Deserialize, Debug)]
struct ResultFile {
    kind: String,
    links: ResultFileLinks,
}

#[derive(Deserialize, Debug)]
struct ResultFileLinks {
    #[serde(rename = "contentUrl")]
    content_url: String,
}

#[derive(Deserialize, Debug)]
struct TranscriptionResult {
    #[serde(rename = "combinedRecognizedPhrases", default)]
    combined_recognized_phrases: Vec<CombinedPhrase>,
}

#[derive(Deserialize, Debug)]
struct CombinedPhrase {
    #[serde(default)]
    display: String,
}

pub struct AzureSpeechTranscriber {
    client: Client,
    config: SpeechConfig,
    blob: BlobStorageClient,
    audio_subfolder: String,
    transcripts_dir: PathBuf,
}

impl AzureSpeechTranscriber {
    pub fn new(
        config: SpeechConfig,
        blob: BlobStorageClient,
        audio_subfolder: impl Into<String>,
        transcripts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client: Client::new(),
            config,
            blob,
            audio_subfolder: audio_subfolder.into(),
            transcripts_dir: transcripts_dir.into(),
        }
    }

    fn credentials(&self) -> Result<(&str, &str), StageError> {
        match (&self.config.key, &self.config.region) {
            (Some(key), Some(region)) => Ok((key.expose(), region.as_str())),
            _ => Err(StageError::Configuration(
                "AZURE_SPEECH_KEY and AZURE_SPEECH_REGION must be set".to_string(),
            )),
        }
    }

    async fn submit(&self, audio_url: &str, correlation_id: &str) -> Result<TranscriptionJob, StageError> {
        let (key, region) = self.credentials()?;
        let url = format!(
            "https://{}.api.cognitive.microsoft.com/speechtotext/transcriptions:submit?api-version={}",
            region, self.config.api_version
        );
        let body = json!({
            "contentUrls": [audio_url],
            "locale": self.config.locale,
            "displayName": format!("transcription_{}", correlation_id),
            "properties": {
                "diarizationEnabled": true,
                "wordLevelTimestampsEnabled": false,
                "punctuationMode": "DictatedAndAutomatic",
                "profanityFilterMode": "Masked",
                "timeToLiveHours": 48
            }
        });

        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(StageError::Configuration("AZURE_SPEECH_KEY was rejected".to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StageError::Transcription(format!(
                "Job submission failed ({}): {}",
                status,
                snippet(&text)
            )));
        }

        response
            .json()
            .await
            .map_err(|e| StageError::Transcription(format!("Invalid submission response: {}", e)))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, authed: bool) -> Result<T, StageError> {
        let mut request = self.client.get(url);
        if authed {
            let (key, _) = self.credentials()?;
            request = request.header("Ocp-Apim-Subscription-Key", key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StageError::Transcription(format!(
                "GET {} failed ({}): {}",
                url,
                status,
                snippet(&text)
            )));
        }
        response
            .json()
            .await
            .map_err(|e| StageError::Transcription(format!("Invalid response from {}: {}", url, e)))
    }

    async fn wait_for_completion(&self, job: TranscriptionJob) -> Result<TranscriptionJob, StageError> {
        let mut job = job;
        for poll in 1..=MAX_POLLS {
            match job.status.as_deref() {
                Some("Succeeded") => return Ok(job),
                Some("Failed") => {
                    let detail = job
                        .properties
                        .as_ref()
                        .and_then(|p| p.error.as_ref())
                        .map(|e| {
                            format!(
                                "{}: {}",
                                e.code.as_deref().unwrap_or("unknown"),
                                e.message.as_deref().unwrap_or("no message")
                            )
                        })
                        .unwrap_or_else(|| "no error details".to_string());
                    return Err(StageError::Transcription(format!("Speech job failed: {}", detail)));
                }
                status => {
                    tracing::info!(
                        "⏳ Transcription job status {} (poll {}), checking again in {:?}",
                        status.unwrap_or("unknown"),
                        poll,
                        self.config.poll_interval
                    );
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
            job = self.get_json(&job.self_url, true).await?;
        }

        Err(StageError::Transcription(format!(
            "Speech job {} did not finish after {} polls",
            job.self_url, MAX_POLLS
        )))
    }

    async fn fetch_transcript(&self, job: &TranscriptionJob) -> Result<String, StageError> {
        let files_url = job
            .links
            .as_ref()
            .and_then(|l| l.files.clone())
            .unwrap_or_else(|| format!("{}/files", job.self_url));
        let files: FileList = self.get_json(&files_url, true).await?;

        let content_url = files
            .values
            .into_iter()
            .find(|f| f.kind == "Transcription")
            .map(|f| f.links.content_url)
            .ok_or_else(|| StageError::Transcription("Job produced no transcription file".to_string()))?;

        // contentUrl carries its own SAS
        let result: TranscriptionResult = self.get_json(&content_url, false).await?;
        Ok(join_phrases(&result))
    }

    async fn delete_job(&self, job: &TranscriptionJob) {
        let Ok((key, _)) = self.credentials() else {
            return;
        };
        match self
            .client
            .delete(&job.self_url)
            .header("Ocp-Apim-Subscription-Key", key)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("Deleted transcription job {}", job.self_url)
            }
            Ok(response) => tracing::warn!(
                "Could not delete transcription job {} ({})",
                job.self_url,
                response.status()
            ),
            Err(e) => tracing::warn!("Could not delete transcription job {}: {}", job.self_url, e),
        }
    }

    async fn save_backup(&self, correlation_id: &str, transcript: &str) {
        let path = self
            .transcripts_dir
            .join(format!("transcription_{}.txt", correlation_id));
        let result = async {
            tokio::fs::create_dir_all(&self.transcripts_dir).await?;
            tokio::fs::write(&path, transcript).await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!("Could not save transcript backup {}: {}", path.display(), e);
        }
    }
}

fn join_phrases(result: &TranscriptionResult) -> String {
    result
        .combined_recognized_phrases
        .iter()
        .map(|p| p.display.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Transcriber for AzureSpeechTranscriber {
    async fn transcribe(&self, audio_path: &Path, correlation_id: &str) -> Result<String, StageError> {
        self.credentials()?;

        let audio_url = self
            .blob
            .upload_file(audio_path, &self.audio_subfolder, "audio/mpeg")
            .await?;

        tracing::info!("🗣️ Submitting transcription job for session {}", correlation_id);
        let job = self.submit(&audio_url, correlation_id).await?;
        let job = self.wait_for_completion(job).await?;
        let transcript = self.fetch_transcript(&job).await;
        self.delete_job(&job).await;
        let transcript = transcript?;

        if transcript.chars().count() < MIN_TRANSCRIPT_CHARS {
            return Err(StageError::Transcription(
                "Transcript is empty or too short".to_string(),
            ));
        }

        self.save_backup(correlation_id, &transcript).await;
        tracing::info!("✅ Transcript received ({} chars)", transcript.chars().count());
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_join_phrases_uses_display_text() {
        let result: TranscriptionResult = serde_json::from_str(
            r#"{
                "combinedRecognizedPhrases": [
                    {"channel": 0, "lexical": "hola", "display": "Hola a todos."},
                    {"channel": 0, "display": "  "},
                    {"channel": 1, "display": "Hoy veremos Rust."}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(join_phrases(&result), "Hola a todos.\nHoy veremos Rust.");
    }

    #[test]
    fn test_job_parsing_reads_self_and_files_link() {
        let job: TranscriptionJob = serde_json::from_str(
            r#"{
                "self": "https://eastus.api.cognitive.microsoft.com/speechtotext/transcriptions/abc",
                "status": "Running",
                "links": {"files": "https://eastus.api.cognitive.microsoft.com/speechtotext/transcriptions/abc/files"}
            }"#,
        )
        .unwrap();
        assert_eq!(job.status.as_deref(), Some("Running"));
        assert!(job.links.unwrap().files.unwrap().ends_with("/files"));
    }

    #[tokio::test]
    async fn test_failed_job_surfaces_error_details() {
        let config = AppConfig::default();
        let transcriber = AzureSpeechTranscriber::new(
            config.speech.clone(),
            BlobStorageClient::new(&config.blob),
            "AudioSesion",
            "/tmp",
        );
        let job: TranscriptionJob = serde_json::from_str(
            r#"{"self": "https://x/t/1", "status": "Failed",
                "properties": {"error": {"code": "InvalidData", "message": "audio unreadable"}}}"#,
        )
        .unwrap();

        let err = transcriber.wait_for_completion(job).await.unwrap_err();
        assert!(err.to_string().contains("InvalidData: audio unreadable"));
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_upload() {
        let config = AppConfig::default();
        let transcriber = AzureSpeechTranscriber::new(
            config.speech.clone(),
            BlobStorageClient::new(&config.blob),
            "AudioSesion",
            "/tmp",
        );
        let err = transcriber
            .transcribe(Path::new("/nonexistent.mp3"), "1")
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Configuration(_)));
    }
}
