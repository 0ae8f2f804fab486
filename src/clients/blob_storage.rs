// Azure Blob Storage client (REST, container-level SAS token)

use reqwest::Client;
use std::path::Path;

use super::snippet;
use crate::config::{BlobConfig, Secret};
use crate::workflow::StageError;

const STORAGE_API_VERSION: &str = "2021-08-06";

#[derive(Clone)]
pub struct BlobStorageClient {
    client: Client,
    container_url: Option<String>,
    sas_token: Option<Secret>,
}

impl BlobStorageClient {
    pub fn new(config: &BlobConfig) -> Self {
        Self {
            client: Client::new(),
            container_url: config
                .container_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            sas_token: config.sas_token.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.container_url.is_some() && self.sas_token.is_some()
    }

    fn credentials(&self) -> Result<(&str, &str), StageError> {
        match (&self.container_url, &self.sas_token) {
            (Some(url), Some(sas)) => Ok((url.as_str(), sas.expose().trim_start_matches('?'))),
            _ => Err(StageError::Configuration(
                "AZURE_BLOB_CONTAINER_URL and AZURE_BLOB_SAS_TOKEN must be set".to_string(),
            )),
        }
    }

    /// Blob URL without the SAS query. Each path segment is URL-encoded.
    pub fn blob_url(&self, subfolder: &str, name: &str) -> Result<String, StageError> {
        let (container, _) = self.credentials()?;
        Ok(blob_url(container, subfolder, name))
    }

    /// Upload a local file as `{subfolder}/{file name}` and return the SAS URL.
    pub async fn upload_file(
        &self,
        path: &Path,
        subfolder: &str,
        content_type: &str,
    ) -> Result<String, StageError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StageError::Publish(format!("{} has no file name", path.display())))?;
        // Block blob PUT needs a Content-Length, so the body is read whole
        let bytes = tokio::fs::read(path).await?;
        self.upload_bytes(bytes, subfolder, &name, content_type).await
    }

    pub async fn upload_bytes(
        &self,
        bytes: Vec<u8>,
        subfolder: &str,
        name: &str,
        content_type: &str,
    ) -> Result<String, StageError> {
        let (container, sas) = self.credentials()?;
        let url = blob_url(container, subfolder, name);
        let size = bytes.len();

        tracing::info!("☁️ Uploading {} ({} bytes) to blob storage", name, size);

        let response = self
            .client
            .put(format!("{}?{}", url, sas))
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| StageError::Publish(format!("Blob upload request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::Publish(format!(
                "Blob upload of {} failed ({}): {}",
                name,
                status,
                snippet(&body)
            )));
        }

        tracing::info!("✅ Uploaded {}", url);
        Ok(format!("{}?{}", url, sas))
    }
}

fn blob_url(container: &str, subfolder: &str, name: &str) -> String {
    let subfolder = subfolder.trim_matches('/');
    if subfolder.is_empty() {
        format!("{}/{}", container, urlencoding::encode(name))
    } else {
        let encoded_folder: Vec<String> = subfolder
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!(
            "{}/{}/{}",
            container,
            encoded_folder.join("/"),
            urlencoding::encode(name)
        )
    }
}
