// src/fetch.rs
//! Source fetchers: plain HTTP (reqwest) and a headless-browser backend.
//! Both return page content or a per-source `FetchError`; neither aborts a run.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::process::Command;

use crate::signal::{ObservationSet, SourceResult};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("timed out")]
    Timeout,
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("fetch backend unavailable: {0}")]
    BackendUnavailable(String),
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
    fn name(&self) -> &'static str;
}

/// Plain HTTP GET. Fast, executes no JavaScript.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("slot-watcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::BackendUnavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = err.status() {
        FetchError::HttpStatus(status.as_u16())
    } else {
        FetchError::Network(err.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        resp.text().await.map_err(map_reqwest_error)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Flags passed before the URL. The browser keeps its own sandbox.
const BROWSER_ARGS: [&str; 3] = ["--headless", "--disable-gpu", "--dump-dom"];

/// Renders pages through a headless Chromium-compatible binary (`--dump-dom`),
/// for sources that only fill their calendars in with JavaScript.
#[derive(Debug, Clone)]
pub struct BrowserFetcher {
    binary: String,
    timeout: Duration,
}

impl BrowserFetcher {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let child = Command::new(&self.binary)
            .args(BROWSER_ARGS)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    FetchError::BackendUnavailable(format!("{}: {e}", self.binary))
                }
                _ => FetchError::Network(e.to_string()),
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::Network(format!(
                "browser exited with {}: {}",
                output.status,
                stderr.lines().last().unwrap_or_default()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

/// Fetch every URL concurrently, each bounded by `per_source`. Results keep the
/// order of `urls`; a failed or timed-out source becomes an error entry.
pub async fn fetch_all(
    fetcher: &dyn Fetcher,
    urls: &[String],
    per_source: Duration,
) -> ObservationSet {
    let futs = urls.iter().map(|url| async move {
        let res = match tokio::time::timeout(per_source, fetcher.fetch(url)).await {
            Ok(r) => r,
            Err(_) => Err(FetchError::Timeout),
        };
        match res {
            Ok(content) => {
                tracing::debug!(url = %url, bytes = content.len(), backend = fetcher.name(), "fetched");
                SourceResult::ok(url.clone(), content)
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, backend = fetcher.name(), "source fetch failed");
                SourceResult::failed(url.clone(), e)
            }
        }
    });
    join_all(futs).await
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowThenFast;

    #[async_trait]
    impl Fetcher for SlowThenFast {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            if url.contains("slow") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if url.contains("down") {
                return Err(FetchError::HttpStatus(503));
            }
            Ok(format!("page {url}"))
        }
        fn name(&self) -> &'static str {
            "test"
        }
    }

    #[tokio::test]
    async fn fetch_all_keeps_order_and_isolates_failures() {
        let urls = vec![
            "https://slow.test".to_string(),
            "https://ok.test".to_string(),
            "https://down.test".to_string(),
        ];
        let out = fetch_all(&SlowThenFast, &urls, Duration::from_millis(50)).await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].source_url, "https://slow.test");
        assert_eq!(out[0].error, Some(FetchError::Timeout));
        assert_eq!(out[1].content.as_deref(), Some("page https://ok.test"));
        assert!(out[1].error.is_none());
        assert_eq!(out[2].error, Some(FetchError::HttpStatus(503)));
        assert!(out[2].content.is_none());
    }

    struct Sleeper;

    #[async_trait]
    impl Fetcher for Sleeper {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(url.to_string())
        }
        fn name(&self) -> &'static str {
            "sleeper"
        }
    }

    #[tokio::test]
    async fn sources_are_fetched_concurrently() {
        let urls = vec!["https://a.test".to_string(), "https://b.test".to_string()];
        let started = std::time::Instant::now();
        let out = fetch_all(&Sleeper, &urls, Duration::from_secs(1)).await;
        let elapsed = started.elapsed();

        assert!(out.iter().all(|r| r.error.is_none()), "{out:?}");
        assert!(elapsed < Duration::from_millis(180), "took {elapsed:?}");
    }

    #[test]
    fn browser_argv_keeps_the_sandbox() {
        assert_eq!(BROWSER_ARGS, ["--headless", "--disable-gpu", "--dump-dom"]);
        assert!(!BROWSER_ARGS.contains(&"--no-sandbox"));
    }

    #[tokio::test]
    async fn missing_browser_binary_is_backend_unavailable() {
        let f = BrowserFetcher::new(
            "/nonexistent/definitely-not-a-browser",
            Duration::from_secs(1),
        );
        let err = f.fetch("https://example.test").await.unwrap_err();
        assert!(matches!(err, FetchError::BackendUnavailable(_)), "{err:?}");
    }
}
