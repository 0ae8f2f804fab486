// Video downloader: Vimeo links through the Vimeo API, everything else direct

use async_trait::async_trait;
use futures::StreamExt;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{snippet, truncate_chars};
use crate::config::VimeoConfig;
use crate::workflow::{Downloader, StageError};

lazy_static! {
    static ref VIMEO_ID: Regex = Regex::new(r"vimeo\.com/(?:video/|.*/)?(\d+)").unwrap();
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_\-]+").unwrap();
}

const MAX_TITLE_CHARS: usize = 80;

#[derive(Deserialize, Debug)]
struct VimeoVideo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    files: Vec<VimeoFile>,
    #[serde(default)]
    download: Vec<VimeoFile>,
}

#[derive(Deserialize, Debug, Clone)]
struct VimeoFile {
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    link: Option<String>,
}

/// Where to fetch the bytes from and what to call the file.
#[derive(Debug, Clone, PartialEq)]
struct ResolvedSource {
    link: String,
    title: String,
}

#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
    config: VimeoConfig,
}

impl HttpDownloader {
    pub fn new(config: VimeoConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn resolve(&self, source_url: &str) -> Result<ResolvedSource, StageError> {
        if let Some(video_id) = vimeo_video_id(source_url) {
            return self.resolve_vimeo(&video_id).await;
        }

        let parsed = reqwest::Url::parse(source_url)
            .map_err(|e| StageError::NotFound(format!("Invalid video URL {}: {}", source_url, e)))?;
        let title = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(|last| last.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(last))
            .filter(|stem| !stem.is_empty())
            .unwrap_or("video")
            .to_string();

        Ok(ResolvedSource {
            link: source_url.to_string(),
            title,
        })
    }

    async fn resolve_vimeo(&self, video_id: &str) -> Result<ResolvedSource, StageError> {
        let token = self.config.access_token.as_ref().ok_or_else(|| {
            StageError::Configuration("VIMEO_ACCESS_TOKEN must be set for Vimeo links".to_string())
        })?;

        let url = format!("{}/videos/{}", self.config.api_base_url.trim_end_matches('/'), video_id);
        tracing::info!("🔎 Resolving Vimeo video {}", video_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token.expose())
            .header("Accept", "application/vnd.vimeo.*+json;version=3.4")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
            return Err(StageError::NotFound(format!(
                "Vimeo video {} is not accessible ({})",
                video_id, status
            )));
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(StageError::Configuration(
                "VIMEO_ACCESS_TOKEN was rejected".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::Transfer(format!(
                "Vimeo API error ({}): {}",
                status,
                snippet(&body)
            )));
        }

        let video: VimeoVideo = response
            .json()
            .await
            .map_err(|e| StageError::Transfer(format!("Invalid Vimeo API response: {}", e)))?;

        let link = pick_smallest_rendition(&video).ok_or_else(|| {
            StageError::NotFound(format!("Vimeo video {} has no downloadable file", video_id))
        })?;

        Ok(ResolvedSource {
            link,
            title: video.name.unwrap_or_else(|| format!("vimeo_{}", video_id)),
        })
    }

    async fn stream_to_file(&self, link: &str, path: &Path) -> Result<u64, StageError> {
        let response = self.client.get(link).send().await?;
        let status = response.status();
        if matches!(
            status,
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::GONE
        ) {
            return Err(StageError::NotFound(format!("{} returned {}", link, status)));
        }
        if !status.is_success() {
            return Err(StageError::Transfer(format!("{} returned {}", link, status)));
        }

        let mut file = tokio::fs::File::create(path).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        source_url: &str,
        dest_dir: &Path,
        name_hint: &str,
    ) -> Result<PathBuf, StageError> {
        let source = self.resolve(source_url).await?;
        tokio::fs::create_dir_all(dest_dir).await?;

        let file_name = format!("{}_{}.mp4", safe_name(name_hint), safe_name(&source.title));
        let path = dest_dir.join(file_name);

        tracing::info!("📥 Downloading {} to {}", source_url, path.display());

        match self.stream_to_file(&source.link, &path).await {
            Ok(bytes) => {
                tracing::info!("✅ Downloaded {} bytes to {}", bytes, path.display());
                Ok(path)
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(
                            "Could not remove partial download {}: {}",
                            path.display(),
                            remove_err
                        );
                    }
                }
                Err(e)
            }
        }
    }
}

fn vimeo_video_id(url: &str) -> Option<String> {
    VIMEO_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Lowest-height rendition that actually has a link; transcription only needs audio.
fn pick_smallest_rendition(video: &VimeoVideo) -> Option<String> {
    video
        .files
        .iter()
        .chain(video.download.iter())
        .filter(|file| file.link.is_some())
        .min_by_key(|file| file.height.unwrap_or(u32::MAX))
        .and_then(|file| file.link.clone())
}

fn safe_name(raw: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(raw.trim(), "_");
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        truncate_chars(cleaned, MAX_TITLE_CHARS).to_string()
    }
}
