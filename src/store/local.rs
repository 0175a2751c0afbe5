// src/store/local.rs

use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::ObjectStore;
use crate::error::EtlError;

/// A directory standing in for a bucket: objects land at `<root>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalMirror {
    root: PathBuf,
}

impl LocalMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |p, part| p.join(part))
    }
}

/// Removes a partially copied `<key>.tmp` when the upload fails or its
/// future is dropped before the rename.
struct TmpGuard {
    path: PathBuf,
    armed: bool,
}

impl TmpGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TmpGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl ObjectStore for LocalMirror {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn upload(&self, local: &Path, key: &str) -> Result<()> {
        let dest = self.object_path(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| EtlError::write_failure(parent, e))?;
        }

        let mut tmp = dest.as_os_str().to_owned();
        tmp.push(".tmp");
        let guard = TmpGuard::new(PathBuf::from(tmp));

        fs::copy(local, &guard.path)
            .await
            .map_err(|e| EtlError::write_failure(&dest, e))?;
        fs::rename(&guard.path, &dest)
            .await
            .map_err(|e| EtlError::write_failure(&dest, e))?;
        guard.disarm();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::write_remote;
    use std::fs as stdfs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_upload_is_verbatim_at_same_relative_path() -> Result<()> {
        let tmp = tempdir()?;
        let store = tmp.path().join("data");
        let artifact = store.join("2023/07/22/202307220426_coins.parquet");
        stdfs::create_dir_all(artifact.parent().unwrap())?;
        stdfs::write(&artifact, b"PAR1....PAR1")?;

        let mirror = LocalMirror::new(tmp.path().join("bucket"));
        let key = write_remote(&mirror, &store, &artifact, None).await?;
        assert_eq!(key, "data/2023/07/22/202307220426_coins.parquet");
        assert_eq!(stdfs::read(mirror.object_path(&key))?, b"PAR1....PAR1");
        Ok(())
    }

    #[test]
    fn test_tmp_guard_removes_leftover_unless_disarmed() -> Result<()> {
        let tmp = tempdir()?;
        let left = tmp.path().join("coins.parquet.tmp");
        stdfs::write(&left, b"partial")?;
        drop(TmpGuard::new(left.clone()));
        assert!(!left.exists());

        let kept = tmp.path().join("kept.tmp");
        stdfs::write(&kept, b"done")?;
        TmpGuard::new(kept.clone()).disarm();
        assert!(kept.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_artifact_is_write_failure() {
        let tmp = tempdir().unwrap();
        let mirror = LocalMirror::new(tmp.path());
        let err = mirror
            .upload(&tmp.path().join("nope.parquet"), "data/nope.parquet")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EtlError>(),
            Some(EtlError::WriteFailure { .. })
        ));
        assert!(!mirror.object_path("data/nope.parquet").exists());
        assert!(!mirror.object_path("data/nope.parquet.tmp").exists());
    }
}
