// src/fetch/mod.rs

use anyhow::Result;
use reqwest::Client;
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;
use url::Url;

use crate::error::EtlError;

pub mod feed;
pub mod table;

pub use feed::{extract_feed, fetch_feed, load_raw, save_raw, RawFeed};
pub use table::{extract_table, import_csv, Table};

/// Where raw data comes from: an HTTP(S) endpoint or a local file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    Url(Url),
    File(PathBuf),
}

impl Source {
    pub fn parse(s: &str) -> Self {
        match Url::parse(s) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Source::Url(u),
            _ => Source::File(PathBuf::from(s)),
        }
    }
}

impl FromStr for Source {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Source::parse(s))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Url(u) => write!(f, "{}", u),
            Source::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Read the whole body of `source`. Anything short of a success response
/// (or a readable file) is `EtlError::SourceUnavailable`.
pub async fn read_source(client: &Client, source: &Source) -> Result<Vec<u8>> {
    match source {
        Source::Url(url) => {
            debug!(%url, "GET");
            let resp = client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| EtlError::source_unavailable(url.as_str(), e))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(
                    EtlError::source_unavailable(url.as_str(), format!("HTTP {}", status)).into(),
                );
            }
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| EtlError::source_unavailable(url.as_str(), e))?;
            Ok(bytes.to_vec())
        }
        Source::File(path) => read_file(path).await,
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    debug!(path = %path.display(), "read");
    tokio::fs::read(path)
        .await
        .map_err(|e| EtlError::source_unavailable(path.display().to_string(), e).into())
}

/// Minimal HTTP/1.1 responder for exercising the extractors without network.
#[cfg(test)]
pub(crate) mod test_server {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    pub(crate) struct TestServer {
        pub url: String,
        hits: Arc<AtomicUsize>,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl TestServer {
        pub(crate) fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        /// Raw text (head and body) of every request received so far.
        pub(crate) fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn content_length(head: &str) -> usize {
        head.lines()
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Serve `responses` in order, one per connection; the last one repeats.
    pub(crate) async fn serve(responses: Vec<(u16, String)>) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (counter, log) = (hits.clone(), requests.clone());

        tokio::spawn(async move {
            loop {
                let (mut sock, _) = match listener.accept().await {
                    Ok(c) => c,
                    Err(_) => return,
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (code, body) = responses[n.min(responses.len() - 1)].clone();

                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let mut expected = None;
                loop {
                    if expected.is_none() {
                        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                            let head = String::from_utf8_lossy(&buf[..end]).to_string();
                            expected = Some(end + 4 + content_length(&head));
                        }
                    }
                    if matches!(expected, Some(total) if buf.len() >= total) {
                        break;
                    }
                    match sock.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(k) => buf.extend_from_slice(&chunk[..k]),
                    }
                }
                log.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&buf).to_string());

                let reason = if code == 200 { "OK" } else { "Error" };
                let head = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    code,
                    reason,
                    body.len()
                );
                let _ = sock.write_all(head.as_bytes()).await;
                let _ = sock.write_all(body.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });

        TestServer {
            url: format!("http://{}/", addr),
            hits,
            requests,
        }
    }
}
