// src/task/mod.rs

use anyhow::Result;
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::{future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

pub mod cache;

pub use cache::ResultCache;

/// How a unit of work is retried and memoized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPolicy {
    pub name: String,
    /// Total tries including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Fixed pause between tries.
    pub retry_delay: Duration,
    /// Reuse a stored result this young; `None` disables caching.
    pub cache_ttl: Option<Duration>,
}

impl TaskPolicy {
    /// One attempt, no cache.
    pub fn once(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_attempts: 1,
            retry_delay: Duration::ZERO,
            cache_ttl: None,
        }
    }
}

/// Runs task closures under a [`TaskPolicy`].
#[derive(Debug, Clone, Default)]
pub struct TaskRunner {
    cache: Option<ResultCache>,
}

impl TaskRunner {
    pub fn new(cache: Option<ResultCache>) -> Self {
        Self { cache }
    }

    /// Return the cached result for `(policy.name, inputs)` if it is still
    /// fresh; otherwise call `task` until it succeeds or attempts run out.
    /// A fresh success is stored when the policy has a TTL.
    #[instrument(level = "info", skip_all, fields(task = %policy.name))]
    pub async fn run<I, T, F, Fut>(&self, policy: &TaskPolicy, inputs: &I, mut task: F) -> Result<T>
    where
        I: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cached = match (&self.cache, policy.cache_ttl) {
            (Some(cache), Some(ttl)) => {
                Some((cache, ttl, ResultCache::key(&policy.name, inputs)?))
            }
            _ => None,
        };

        if let Some((cache, ttl, key)) = &cached {
            if let Some(v) = cache.get(key, *ttl, Utc::now()) {
                info!(key = %key, "cache hit");
                return Ok(v);
            }
            debug!(key = %key, "cache miss");
        }

        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        let value = loop {
            attempt += 1;
            match task().await {
                Ok(v) => break v,
                Err(e) if attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = policy.retry_delay.as_millis() as u64,
                        error = %e,
                        "retrying"
                    );
                    sleep(policy.retry_delay).await;
                }
                Err(e) => {
                    error!(attempt, error = %e, "exhausted retries");
                    return Err(e.context(format!(
                        "task `{}` failed after {} attempt(s)",
                        policy.name, attempt
                    )));
                }
            }
        };

        if let Some((cache, _, key)) = &cached {
            if let Err(e) = cache.put(key, &value, Utc::now()) {
                warn!(error = %e, "could not store task result");
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use anyhow::bail;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    fn policy(attempts: u32, delay_ms: u64, ttl: Option<u64>) -> TaskPolicy {
        TaskPolicy {
            name: "extract".into(),
            max_attempts: attempts,
            retry_delay: Duration::from_millis(delay_ms),
            cache_ttl: ttl.map(Duration::from_secs),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() -> Result<()> {
        let calls = AtomicU32::new(0);
        let runner = TaskRunner::default();
        let start = tokio::time::Instant::now();
        let v = runner
            .run(&policy(4, 10, None), "in", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        bail!("flaky {}", n);
                    }
                    Ok::<_, anyhow::Error>(n)
                }
            })
            .await?;
        assert_eq!(v, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(20));
        Ok(())
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let err = TaskRunner::default()
            .run(&policy(3, 0, None), "in", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<u32, _>(anyhow::Error::from(EtlError::source_unavailable(
                        "http://x", "HTTP 500",
                    )))
                }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("after 3 attempt(s)"));
        assert!(matches!(
            err.downcast_ref::<EtlError>(),
            Some(EtlError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() -> Result<()> {
        let calls = AtomicU32::new(0);
        TaskRunner::default()
            .run(&policy(0, 0, None), &1, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, anyhow::Error>(()) }
            })
            .await?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_once_policy_does_not_retry() {
        let calls = AtomicU32::new(0);
        let err = TaskRunner::default()
            .run(&TaskPolicy::once("extract_table"), "in", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(anyhow::anyhow!("bad csv")) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("`extract_table` failed after 1 attempt(s)"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_task() -> Result<()> {
        let tmp = tempdir()?;
        let runner = TaskRunner::new(Some(ResultCache::new(tmp.path())?));
        let p = policy(1, 0, Some(60));
        let calls = AtomicU32::new(0);
        let task = || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, anyhow::Error>(format!("result-{}", n)) }
        };

        let first = runner.run(&p, &("https://x", "coins.json"), task).await?;
        let second = runner.run(&p, &("https://x", "coins.json"), task).await?;
        assert_eq!(first, "result-0");
        assert_eq!(second, "result-0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let other = runner.run(&p, &("https://y", "coins.json"), task).await?;
        assert_eq!(other, "result-1");
        Ok(())
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() -> Result<()> {
        let tmp = tempdir()?;
        let runner = TaskRunner::new(Some(ResultCache::new(tmp.path())?));
        let p = policy(1, 0, Some(60));
        let r: Result<u32> = runner.run(&p, "in", || async { Err::<u32, _>(anyhow::anyhow!("down")) }).await;
        assert!(r.is_err());
        let v = runner.run(&p, "in", || async { Ok::<_, anyhow::Error>(7u32) }).await?;
        assert_eq!(v, 7);
        Ok(())
    }
}
