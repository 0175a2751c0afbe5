// src/fetch/feed.rs

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

use super::{read_source, Source};
use crate::error::EtlError;
use crate::load::write_atomic;

/// The asset feed as served: one observation time for the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeed {
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Entries kept as raw JSON; each one is read on its own during transform.
    pub data: Vec<serde_json::Value>,
}

fn parse_feed(source_name: &str, body: &[u8]) -> Result<RawFeed> {
    serde_json::from_slice(body).map_err(|e| {
        EtlError::source_unavailable(source_name, format!("invalid feed body: {}", e)).into()
    })
}

/// Fetch and parse the feed. Returns the parsed payload and the exact bytes received.
pub async fn fetch_feed(client: &Client, source: &Source) -> Result<(RawFeed, Vec<u8>)> {
    let body = read_source(client, source).await?;
    let feed = parse_feed(&source.to_string(), &body)?;
    Ok((feed, body))
}

/// Persist `body` byte-for-byte as `<raw_dir>/<timestamp>_<filename>`.
/// Overwrites an existing file of the same name.
pub fn save_raw(raw_dir: &Path, filename: &str, timestamp: i64, body: &[u8]) -> Result<PathBuf> {
    let path = raw_dir.join(format!("{}_{}", timestamp, filename));
    write_atomic(&path, |w| {
        w.write_all(body)?;
        Ok(())
    })?;
    Ok(path)
}

/// Extract step of the feed pipeline. `raw` is `(raw_dir, filename)` when the
/// payload should be kept for audit/replay.
#[instrument(level = "info", skip(client, raw), fields(source = %source))]
pub async fn extract_feed(
    client: &Client,
    source: &Source,
    raw: Option<(&Path, &str)>,
) -> Result<RawFeed> {
    let (feed, body) = fetch_feed(client, source).await?;
    info!(
        timestamp = feed.timestamp,
        assets = feed.data.len(),
        bytes = body.len(),
        "fetched feed"
    );

    if let Some((raw_dir, filename)) = raw {
        let path = save_raw(raw_dir, filename, feed.timestamp, &body)?;
        info!(path = %path.display(), "saved raw payload");
    }

    Ok(feed)
}

/// Re-read a payload written by [`save_raw`].
pub fn load_raw(path: &Path) -> Result<RawFeed> {
    let body = fs::read(path).with_context(|| format!("reading raw payload {}", path.display()))?;
    parse_feed(&path.display().to_string(), &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::test_server;
    use tempfile::tempdir;

    const BODY: &str = r#"{"timestamp":1690000000000,"data":[{"id":"bitcoin","rank":"1","symbol":"BTC","name":"Bitcoin","supply":"19000000","marketCapUsd":"5e11","volumeUsd24Hr":"1e10","priceUsd":"26000","changePercent24Hr":"0.5","explorer":"https://blockchain.info/","vwap24Hr":"25950.1"}]}"#;

    #[tokio::test]
    async fn test_extract_feed_saves_raw_verbatim() -> Result<()> {
        let server = test_server::serve(vec![(200, BODY.to_string())]).await;
        let tmp = tempdir()?;
        let raw_dir = tmp.path().join("raw");

        let feed = extract_feed(
            &Client::new(),
            &Source::parse(&server.url),
            Some((&raw_dir, "cryptocoin.json")),
        )
        .await?;

        assert_eq!(feed.timestamp, 1_690_000_000_000);
        assert_eq!(feed.data.len(), 1);
        let saved = raw_dir.join("1690000000000_cryptocoin.json");
        assert_eq!(fs::read_to_string(&saved)?, BODY);
        assert_eq!(load_raw(&saved)?, feed);
        Ok(())
    }

    #[test]
    fn test_save_raw_is_idempotent() -> Result<()> {
        let tmp = tempdir()?;
        let a = save_raw(tmp.path(), "x.json", 42, b"first")?;
        let b = save_raw(tmp.path(), "x.json", 42, b"second")?;
        assert_eq!(a, b);
        assert_eq!(fs::read(&a)?, b"second");
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_body_is_unavailable() {
        let server = test_server::serve(vec![(200, "<html>oops</html>".into())]).await;
        let err = fetch_feed(&Client::new(), &Source::parse(&server.url))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EtlError>(),
            Some(EtlError::SourceUnavailable { .. })
        ));
    }
}
