// src/config.rs
//! Immutable application configuration, loaded once from the environment in
//! `main` and handed to component constructors.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::workflow::retry::RetryPolicy;

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***HIDDEN***")
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// When unset the service falls back to the in-memory store
    pub url: Option<Secret>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub input_video_dir: PathBuf,
    pub temp_audio_dir: PathBuf,
    pub transcripts_dir: PathBuf,
    pub artifacts_dir: PathBuf,
}

impl DirectoryConfig {
    pub fn all(&self) -> [&PathBuf; 4] {
        [
            &self.input_video_dir,
            &self.temp_audio_dir,
            &self.transcripts_dir,
            &self.artifacts_dir,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct VimeoConfig {
    pub access_token: Option<Secret>,
    pub api_base_url: String,
}

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub key: Option<Secret>,
    pub region: Option<String>,
    pub locale: String,
    pub api_version: String,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// e.g. https://account.blob.core.windows.net/container
    pub container_url: Option<String>,
    pub sas_token: Option<Secret>,
    pub audio_subfolder: String,
    pub pdf_subfolder: String,
    pub podcast_subfolder: String,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<Secret>,
    pub model: String,
    pub base_url: String,
    pub output_language: String,
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub api_key: Option<Secret>,
    pub voice_id: String,
    pub model_id: String,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub wave_size: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub directories: DirectoryConfig,
    pub vimeo: VimeoConfig,
    pub speech: SpeechConfig,
    pub blob: BlobConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub retry: RetryPolicy,
    pub batch: BatchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0:3000".to_string(),
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                acquire_timeout_seconds: 30,
            },
            directories: DirectoryConfig {
                input_video_dir: PathBuf::from("data/input/videos"),
                temp_audio_dir: PathBuf::from("data/temp/audios"),
                transcripts_dir: PathBuf::from("data/output/transcriptions"),
                artifacts_dir: PathBuf::from("data/output/artifacts"),
            },
            vimeo: VimeoConfig {
                access_token: None,
                api_base_url: "https://api.vimeo.com".to_string(),
            },
            speech: SpeechConfig {
                key: None,
                region: None,
                locale: "es-PE".to_string(),
                api_version: "2024-11-15".to_string(),
                poll_interval: Duration::from_secs(100),
            },
            blob: BlobConfig {
                container_url: None,
                sas_token: None,
                audio_subfolder: "AudioSesion".to_string(),
                pdf_subfolder: "GuiaEstudio".to_string(),
                podcast_subfolder: "ResumenAudio".to_string(),
            },
            llm: LlmConfig {
                api_key: None,
                model: "gpt-4o".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                output_language: "Spanish".to_string(),
            },
            tts: TtsConfig {
                api_key: None,
                voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
                model_id: "eleven_multilingual_v2".to_string(),
            },
            retry: RetryPolicy::default(),
            batch: BatchConfig { wave_size: 10 },
        }
    }
}

impl AppConfig {
    /// Build the configuration from process environment variables.
    /// Call `dotenvy::dotenv()` first if a `.env` file should be honoured.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup; unset or
    /// unparsable keys fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let secret = |key: &str| get(key).map(Secret::new);

        Self {
            server: ServerConfig {
                bind_addr: get("BIND_ADDR").unwrap_or(defaults.server.bind_addr),
            },
            database: DatabaseConfig {
                url: secret("DATABASE_URL"),
                max_connections: parsed(&get, "DATABASE_MAX_CONNECTIONS")
                    .unwrap_or(defaults.database.max_connections),
                acquire_timeout_seconds: parsed(&get, "DATABASE_ACQUIRE_TIMEOUT_SECONDS")
                    .unwrap_or(defaults.database.acquire_timeout_seconds),
            },
            directories: DirectoryConfig {
                input_video_dir: get("INPUT_VIDEO_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.directories.input_video_dir),
                temp_audio_dir: get("TEMP_AUDIOS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.directories.temp_audio_dir),
                transcripts_dir: get("TRANSCRIPTIONS_OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.directories.transcripts_dir),
                artifacts_dir: get("ARTIFACTS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.directories.artifacts_dir),
            },
            vimeo: VimeoConfig {
                access_token: secret("VIMEO_ACCESS_TOKEN"),
                api_base_url: get("VIMEO_API_BASE_URL").unwrap_or(defaults.vimeo.api_base_url),
            },
            speech: SpeechConfig {
                key: secret("AZURE_SPEECH_KEY"),
                region: get("AZURE_SPEECH_REGION"),
                locale: get("AZURE_SPEECH_LOCALE").unwrap_or(defaults.speech.locale),
                api_version: get("AZURE_SPEECH_API_VERSION").unwrap_or(defaults.speech.api_version),
                poll_interval: parsed(&get, "AZURE_SPEECH_POLL_SECONDS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.speech.poll_interval),
            },
            blob: BlobConfig {
                container_url: get("AZURE_BLOB_CONTAINER_URL"),
                sas_token: secret("AZURE_BLOB_SAS_TOKEN"),
                audio_subfolder: get("AZURE_BLOB_SUBFOLDER_AUDIOSESION")
                    .unwrap_or(defaults.blob.audio_subfolder),
                pdf_subfolder: get("AZURE_BLOB_SUBFOLDER_PDF").unwrap_or(defaults.blob.pdf_subfolder),
                podcast_subfolder: get("AZURE_BLOB_SUBFOLDER_AUDIO")
                    .unwrap_or(defaults.blob.podcast_subfolder),
            },
            llm: LlmConfig {
                api_key: secret("OPENAI_API_KEY"),
                model: get("OPENAI_MODEL").unwrap_or(defaults.llm.model),
                base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.llm.base_url),
                output_language: get("OUTPUT_LANGUAGE").unwrap_or(defaults.llm.output_language),
            },
            tts: TtsConfig {
                api_key: secret("ELEVEN_LABS_API_KEY"),
                voice_id: get("ELEVEN_LABS_VOICE_ID").unwrap_or(defaults.tts.voice_id),
                model_id: get("ELEVEN_LABS_MODEL_ID").unwrap_or(defaults.tts.model_id),
            },
            retry: RetryPolicy {
                max_attempts: parsed(&get, "STAGE_MAX_ATTEMPTS").unwrap_or(defaults.retry.max_attempts),
                backoff_unit: parsed(&get, "STAGE_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.backoff_unit),
            },
            batch: BatchConfig {
                wave_size: parsed(&get, "BATCH_WAVE_SIZE").unwrap_or(defaults.batch.wave_size),
            },
        }
    }

    /// One-line summary of which integrations are configured, for startup logs.
    pub fn integration_summary(&self) -> String {
        let flag = |configured: bool| if configured { "✅" } else { "❌" };
        format!(
            "Database: {}, Vimeo: {}, Azure Speech: {}, Blob Storage: {}, OpenAI: {}, ElevenLabs: {}",
            flag(self.database.url.is_some()),
            flag(self.vimeo.access_token.is_some()),
            flag(self.speech.key.is_some() && self.speech.region.is_some()),
            flag(self.blob.container_url.is_some() && self.blob.sas_token.is_some()),
            flag(self.llm.api_key.is_some()),
            flag(self.tts.api_key.is_some()),
        )
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|raw| parse_value(key, &raw))
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable value for {}: {:?}", key, raw);
            None
        }
    }
}
