// src/store/gcs.rs

use anyhow::{Context, Result};
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use std::path::Path;
use tracing::debug;

use super::ObjectStore;
use crate::error::EtlError;

/// Google Cloud Storage bucket, authenticated with application default credentials.
pub struct GcsBucket {
    client: Client,
    bucket: String,
}

impl GcsBucket {
    pub async fn connect(bucket: impl Into<String>) -> Result<Self> {
        let cfg = ClientConfig::default()
            .with_auth()
            .await
            .context("authenticating to GCS")?;
        Ok(Self {
            client: Client::new(cfg),
            bucket: bucket.into(),
        })
    }
}

impl ObjectStore for GcsBucket {
    fn describe(&self) -> String {
        format!("gs://{}", self.bucket)
    }

    async fn upload(&self, local: &Path, key: &str) -> Result<()> {
        let body = tokio::fs::read(local)
            .await
            .with_context(|| format!("reading {}", local.display()))?;
        let len = body.len() as u64;

        let mut media = Media::new(key.to_string());
        media.content_length = Some(len);
        let req = UploadObjectRequest {
            bucket: self.bucket.clone(),
            ..Default::default()
        };

        self.client
            .upload_object(&req, body, &UploadType::Simple(media))
            .await
            .map_err(|e| EtlError::write_failure(format!("gs://{}/{}", self.bucket, key), e))?;
        debug!(key, bytes = len, "uploaded to GCS");
        Ok(())
    }
}
