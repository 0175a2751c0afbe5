// src/store/mod.rs

use anyhow::Result;
use std::{
    future::Future,
    path::{Component, Path, PathBuf},
};
use tracing::{info, instrument};

use crate::config::{UploadBackend, UploadConfig};
use crate::error::EtlError;

#[cfg(feature = "gcs")]
pub mod gcs;
pub mod local;

#[cfg(feature = "gcs")]
pub use gcs::GcsBucket;
pub use local::LocalMirror;

/// Somewhere a finished artifact can be copied to, verbatim, under `key`.
pub trait ObjectStore {
    fn describe(&self) -> String;

    fn upload(&self, local: &Path, key: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Object key for `artifact`: its path relative to the parent of `store`,
/// `/`-separated, optionally under `prefix`. For the default store `data`
/// this is exactly the local relative path, e.g.
/// `data/2023/07/22/202307220426_coins.parquet`.
pub fn object_key(store: &Path, artifact: &Path, prefix: Option<&str>) -> String {
    let base = store.parent().unwrap_or_else(|| Path::new(""));
    let rel = artifact.strip_prefix(base).unwrap_or(artifact);
    let mut parts: Vec<String> = Vec::new();
    if let Some(p) = prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        parts.push(p.to_string());
    }
    parts.extend(rel.components().filter_map(|c| match c {
        Component::Normal(s) => Some(s.to_string_lossy().to_string()),
        _ => None,
    }));
    parts.join("/")
}

/// The configured upload target.
pub enum RemoteStore {
    Local(LocalMirror),
    #[cfg(feature = "gcs")]
    Gcs(GcsBucket),
}

impl RemoteStore {
    pub async fn from_config(cfg: &UploadConfig) -> Result<Self> {
        match cfg.backend {
            UploadBackend::Local => {
                let root: PathBuf = cfg
                    .root
                    .clone()
                    .ok_or_else(|| EtlError::Config("upload.root is required for local".into()))?;
                Ok(RemoteStore::Local(LocalMirror::new(root)))
            }
            #[cfg(feature = "gcs")]
            UploadBackend::Gcs => {
                let bucket = cfg
                    .bucket
                    .clone()
                    .ok_or_else(|| EtlError::Config("upload.bucket is required for gcs".into()))?;
                Ok(RemoteStore::Gcs(GcsBucket::connect(bucket).await?))
            }
            #[cfg(not(feature = "gcs"))]
            UploadBackend::Gcs => Err(EtlError::Config(
                "the gcs upload backend needs the `gcs` cargo feature".into(),
            )
            .into()),
        }
    }
}

impl ObjectStore for RemoteStore {
    fn describe(&self) -> String {
        match self {
            RemoteStore::Local(s) => s.describe(),
            #[cfg(feature = "gcs")]
            RemoteStore::Gcs(s) => s.describe(),
        }
    }

    async fn upload(&self, local: &Path, key: &str) -> Result<()> {
        match self {
            RemoteStore::Local(s) => s.upload(local, key).await,
            #[cfg(feature = "gcs")]
            RemoteStore::Gcs(s) => s.upload(local, key).await,
        }
    }
}

/// Upload step: push `artifact` to `remote` under its [`object_key`].
#[instrument(level = "info", skip(remote, store), fields(artifact = %artifact.display()))]
pub async fn write_remote<S: ObjectStore>(
    remote: &S,
    store: &Path,
    artifact: &Path,
    prefix: Option<&str>,
) -> Result<String> {
    let key = object_key(store, artifact, prefix);
    remote.upload(artifact, &key).await?;
    info!(target_store = %remote.describe(), key = %key, "uploaded artifact");
    Ok(key)
}
