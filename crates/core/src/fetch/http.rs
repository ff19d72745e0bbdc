//! HTTP transport for remote archives.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;
use url::Url;

use crate::error::{Error, Phase, Result};
use crate::progress::{Progress, ProgressEvent};

/// Bytes between two [`ProgressEvent::FetchProgress`] events.
const REPORT_INTERVAL: u64 = 1024 * 1024;

/// Transport that writes the body of a URL into a sink.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Stream `url` into `sink` and return the number of bytes written.
    ///
    /// Implementations must check `progress` for cancellation while the body
    /// is being received.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] for transport failures, error statuses and
    /// oversized bodies, or [`Error::Cancelled`] in the fetch phase.
    async fn download(
        &self,
        url: &Url,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        progress: &Progress,
    ) -> Result<u64>;
}

/// [`Downloader`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    max_bytes: Option<u64>,
}

impl HttpDownloader {
    /// Create a downloader with a request timeout and an optional size limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration, max_bytes: Option<u64>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("unbox/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, max_bytes })
    }

    fn check_size(&self, url: &Url, size: u64) -> Result<()> {
        match self.max_bytes {
            Some(max) if size > max => Err(Error::fetch(
                url.as_str(),
                format!("download exceeds the limit of {max} bytes"),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        url: &Url,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        progress: &Progress,
    ) -> Result<u64> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::fetch(
                url.as_str(),
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        debug!(%url, "Requesting archive");

        let request = self.client.get(url.clone()).send();
        let mut response = tokio::select! {
            biased;
            () = progress.token().cancelled() => return Err(Error::cancelled(Phase::Fetch)),
            result = request => result.map_err(|e| Error::fetch(url.as_str(), e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(url.as_str(), format!("HTTP {status}")));
        }

        let total_bytes = response.content_length();
        if let Some(total) = total_bytes {
            self.check_size(url, total)?;
        }
        progress.report(ProgressEvent::FetchStarted {
            url: url.to_string(),
            total_bytes,
        });

        let mut downloaded = 0u64;
        let mut last_report = 0u64;
        loop {
            let chunk = tokio::select! {
                biased;
                () = progress.token().cancelled() => return Err(Error::cancelled(Phase::Fetch)),
                chunk = response.chunk() => chunk.map_err(|e| Error::fetch(url.as_str(), e.to_string()))?,
            };
            let Some(chunk) = chunk else {
                break;
            };

            downloaded += chunk.len() as u64;
            self.check_size(url, downloaded)?;
            sink.write_all(&chunk)
                .await
                .map_err(|e| Error::io_no_path(e, "write download"))?;

            if downloaded - last_report >= REPORT_INTERVAL {
                last_report = downloaded;
                progress.report(ProgressEvent::FetchProgress {
                    url: url.to_string(),
                    downloaded,
                    total_bytes,
                });
            }
        }

        sink.flush()
            .await
            .map_err(|e| Error::io_no_path(e, "flush download"))?;
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn downloader(max_bytes: Option<u64>) -> HttpDownloader {
        HttpDownloader::new(Duration::from_secs(10), max_bytes).unwrap()
    }

    #[tokio::test]
    async fn test_download_writes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bundle.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"archive bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/bundle.zip", server.uri())).unwrap();
        let mut sink = Vec::new();
        let bytes = downloader(None)
            .download(&url, &mut sink, &Progress::new())
            .await
            .unwrap();

        assert_eq!(bytes, 13);
        assert_eq!(sink, b"archive bytes");
    }

    #[tokio::test]
    async fn test_http_error_status_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing.zip", server.uri())).unwrap();
        let mut sink = Vec::new();
        let err = downloader(None)
            .download(&url, &mut sink, &Progress::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Fetch { ref reason, .. } if reason.contains("404")));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_size_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/big.zip", server.uri())).unwrap();
        let mut sink = Vec::new();
        let err = downloader(Some(1024))
            .download(&url, &mut sink, &Progress::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let progress = Progress::new();
        progress.cancel();

        let url = Url::parse("http://127.0.0.1:9/never.zip").unwrap();
        let mut sink = Vec::new();
        let err = downloader(None)
            .download(&url, &mut sink, &progress)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled { phase: Phase::Fetch }));
    }

    #[tokio::test]
    async fn test_rejects_unsupported_scheme() {
        let url = Url::parse("ftp://example.org/bundle.zip").unwrap();
        let mut sink = Vec::new();
        let err = downloader(None)
            .download(&url, &mut sink, &Progress::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Fetch { .. }));
    }
}
