use crate::config::StorageConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Artifacts larger than this are refused on download.
const MAX_DOWNLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct DownloadedObject {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `bytes` under `bucket/path`, overwriting, and returns the public URL.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> AppResult<String>;

    /// Fetches an arbitrary URL, used to pull provider artifacts.
    async fn download(&self, url: &str) -> AppResult<DownloadedObject>;
}

/// Supabase-style storage REST API.
#[derive(Clone)]
pub struct HttpObjectStorage {
    http: Client,
    config: StorageConfig,
}

impl HttpObjectStorage {
    pub fn new(config: StorageConfig) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent("genmeter-backend/storage")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| AppError::ConfigError(format!("storage http client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.public_base_url.trim_end_matches('/'),
            bucket,
            path
        )
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> AppResult<String> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            bucket,
            path
        );
        let size = bytes.len();

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.service_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("upload {bucket}/{path}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApiError(format!(
                "upload {bucket}/{path}: HTTP {status}: {text}"
            )));
        }

        log::debug!("Stored {size} bytes at {bucket}/{path}");
        Ok(self.public_url(bucket, path))
    }

    async fn download(&self, url: &str) -> AppResult<DownloadedObject> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("download {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ExternalApiError(format!(
                "download {url}: HTTP {status}"
            )));
        }
        if let Some(len) = response.content_length()
            && len as usize > MAX_DOWNLOAD_BYTES
        {
            return Err(AppError::ExternalApiError(format!(
                "download {url}: artifact of {len} bytes exceeds limit"
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("download {url}: {e}")))?;
        if bytes.len() > MAX_DOWNLOAD_BYTES {
            return Err(AppError::ExternalApiError(format!(
                "download {url}: artifact exceeds limit"
            )));
        }

        Ok(DownloadedObject {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
