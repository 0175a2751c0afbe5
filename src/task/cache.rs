// src/task/cache.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use glob::glob;
use serde::{de::DeserializeOwned, de::IgnoredAny, Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::load::write_atomic;

#[derive(Serialize, Deserialize)]
struct Entry<T> {
    created_at: DateTime<Utc>,
    value: T,
}

/// Task results on disk, one `<key>.json` per entry. Entries carry their
/// creation time; freshness is decided by the caller's TTL at lookup.
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

fn is_fresh(created_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    let age = now.signed_duration_since(created_at);
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => age >= chrono::Duration::zero() && age < ttl,
        Err(_) => true,
    }
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating cache directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// BLAKE3 over the task name and the JSON encoding of its inputs.
    pub fn key<I: Serialize + ?Sized>(task: &str, inputs: &I) -> Result<String> {
        let json = serde_json::to_vec(inputs).context("serializing task inputs")?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(task.as_bytes());
        hasher.update(&[0]);
        hasher.update(&json);
        Ok(hasher.finalize().to_hex().to_string())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// The stored value if it is younger than `ttl` at `now`. Missing,
    /// expired and unreadable entries are all a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Option<T> {
        let path = self.entry_path(key);
        let bytes = fs::read(&path).ok()?;
        let entry: Entry<T> = match serde_json::from_slice(&bytes) {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable cache entry");
                return None;
            }
        };
        if !is_fresh(entry.created_at, ttl, now) {
            debug!(key, created_at = %entry.created_at, "cache entry expired");
            return None;
        }
        Some(entry.value)
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T, now: DateTime<Utc>) -> Result<()> {
        let entry = Entry {
            created_at: now,
            value,
        };
        write_atomic(&self.entry_path(key), |w| {
            serde_json::to_writer(w, &entry)?;
            Ok(())
        })
    }

    /// Delete entries that are expired at `now` or cannot be read.
    pub fn prune(&self, ttl: Duration, now: DateTime<Utc>) -> Result<usize> {
        let pattern = format!("{}/*.json", self.dir.display());
        let mut removed = 0;
        for entry in glob(&pattern).context("invalid glob pattern for cache prune")? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "cannot read cache entry");
                    continue;
                }
            };
            let stale = match fs::read(&path)
                .ok()
                .and_then(|b| serde_json::from_slice::<Entry<IgnoredAny>>(&b).ok())
            {
                Some(e) => !is_fresh(e.created_at, ttl, now),
                None => true,
            };
            if stale {
                fs::remove_file(&path)
                    .with_context(|| format!("removing cache entry {}", path.display()))?;
                removed += 1;
            }
        }
        info!(removed, dir = %self.dir.display(), "pruned task cache");
        Ok(removed)
    }
}
