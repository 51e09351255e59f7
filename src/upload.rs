use crate::config::Config;
use crate::error::LoggerError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use uuid::Uuid;

/// Object storage collaborator: takes bytes, hands back an opaque URI.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, bytes: Bytes, content_type: &str) -> Result<String, LoggerError>;
}

/// GCS JSON-API media upload. Object names follow the capture scheme the
/// dashboard expects: `<folder>/capture_<YYYYmmdd_HHMMSS>_<8-char-id>.<ext>`.
pub struct GcsUploader {
    http: Client,
    base: String,
    bucket: String,
    folder: String,
    token: Option<String>,
    timeout: Duration,
}

impl GcsUploader {
    /// Returns `None` when no bucket is configured; the caller disables the
    /// image cadence in that case.
    pub fn from_config(config: &Config) -> Option<Self> {
        let bucket = config.gcs_bucket.clone()?;
        Some(Self {
            http: Client::new(),
            base: config.storage_base.clone(),
            bucket,
            folder: config.capture_folder.clone(),
            token: config.storage_token.clone(),
            timeout: config.image_timeout,
        })
    }
}

#[async_trait]
impl BlobStore for GcsUploader {
    async fn upload(&self, bytes: Bytes, content_type: &str) -> Result<String, LoggerError> {
        let name = object_name(&self.folder, Utc::now(), &Uuid::new_v4(), content_type);
        let url = format!("{}/upload/storage/v1/b/{}/o", self.base, self.bucket);

        let mut request = self
            .http
            .post(&url)
            .query(&[("uploadType", "media"), ("name", name.as_str())])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .timeout(self.timeout)
            .body(bytes);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| LoggerError::upload(format!("{}: {err}", self.bucket)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoggerError::upload(format!(
                "{}: unexpected status {status}",
                self.bucket
            )));
        }

        Ok(format!("gs://{}/{name}", self.bucket))
    }
}

fn object_name(folder: &str, at: DateTime<Utc>, id: &Uuid, content_type: &str) -> String {
    let extension = content_type.rsplit('/').next().unwrap_or("jpeg");
    let short_id = &id.simple().to_string()[..8];
    let stamp = at.format("%Y%m%d_%H%M%S");
    let file = format!("capture_{stamp}_{short_id}.{extension}");
    match folder.trim_end_matches('/') {
        "" => file,
        folder => format!("{folder}/{file}"),
    }
}
