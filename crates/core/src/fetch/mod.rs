//! Obtaining archive files for resource identifiers.
//!
//! Local identifiers resolve to a file path without any I/O beyond an
//! existence check. Remote identifiers go through the [`DownloadCache`]: a hit
//! valid under the requested [`RetentionPolicy`] is returned as is, a miss is
//! downloaded into a temporary file next to its cache location and renamed
//! into place once complete.

mod cache;
mod http;

pub use cache::{CommittedFile, DownloadCache, RetentionPolicy};
pub use http::{Downloader, HttpDownloader};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use url::Url;

use crate::config::Settings;
use crate::error::{Error, Phase, Result};
use crate::identifier::{IdentifierKind, ResourceIdentifier};
use crate::lock::KeyedLocks;
use crate::progress::{Progress, ProgressEvent};

/// Where a [`CachedArtifact`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    /// A local file named by the identifier.
    Local,
    /// A previous download reused from the cache.
    Cached,
    /// Downloaded by this fetch.
    Downloaded,
}

/// An archive file ready to be fingerprinted and extracted.
///
/// For [`RetentionPolicy::None`] the file is temporary and is deleted when the
/// artifact is dropped.
#[derive(Debug)]
pub struct CachedArtifact {
    path: PathBuf,
    origin: ArtifactOrigin,
    policy: Option<RetentionPolicy>,
    _transient: Option<TempPath>,
}

impl CachedArtifact {
    fn local(path: PathBuf) -> Self {
        Self {
            path,
            origin: ArtifactOrigin::Local,
            policy: None,
            _transient: None,
        }
    }

    fn cached(path: PathBuf, policy: RetentionPolicy) -> Self {
        Self {
            path,
            origin: ArtifactOrigin::Cached,
            policy: Some(policy),
            _transient: None,
        }
    }

    fn downloaded(file: CommittedFile, policy: RetentionPolicy) -> Self {
        let (path, transient) = match file {
            CommittedFile::Stored(path) => (path, None),
            CommittedFile::Transient(temp) => (temp.to_path_buf(), Some(temp)),
        };
        Self {
            path,
            origin: ArtifactOrigin::Downloaded,
            policy: Some(policy),
            _transient: transient,
        }
    }

    /// Location of the archive file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the file came from.
    #[must_use]
    pub fn origin(&self) -> ArtifactOrigin {
        self.origin
    }

    /// Whether the file was reused from the download cache.
    #[must_use]
    pub fn is_cache_hit(&self) -> bool {
        self.origin == ArtifactOrigin::Cached
    }

    /// Retention the file was fetched under; `None` for local files.
    #[must_use]
    pub fn policy(&self) -> Option<RetentionPolicy> {
        self.policy
    }
}

/// Fetches archives for identifiers, deduplicating downloads per URL.
pub struct ContentFetcher {
    cache: DownloadCache,
    downloader: Arc<dyn Downloader>,
    locks: KeyedLocks,
}

impl std::fmt::Debug for ContentFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentFetcher")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl ContentFetcher {
    /// Create a fetcher over a cache and a transport.
    #[must_use]
    pub fn new(cache: DownloadCache, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            cache,
            downloader,
            locks: KeyedLocks::new(),
        }
    }

    /// Create a fetcher using the HTTP transport configured by `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let downloader =
            HttpDownloader::new(settings.http_timeout(), settings.max_download_bytes)?;
        Ok(Self::new(
            DownloadCache::new(&settings.downloads_dir),
            Arc::new(downloader),
        ))
    }

    /// The download cache.
    #[must_use]
    pub fn cache(&self) -> &DownloadCache {
        &self.cache
    }

    /// Obtain the archive named by `identifier`.
    ///
    /// # Errors
    ///
    /// - [`Error::Fetch`] if a local file does not exist or a download fails
    /// - [`Error::InvalidIdentifier`] if a `file:` URI has no local path
    /// - [`Error::Cancelled`] if `progress` is cancelled before or during a download
    /// - [`Error::Io`] if the cache cannot be written
    #[instrument(skip(self, progress), fields(identifier = %identifier))]
    pub async fn fetch(
        &self,
        identifier: &ResourceIdentifier,
        policy: RetentionPolicy,
        progress: &Progress,
    ) -> Result<CachedArtifact> {
        progress.check(Phase::Fetch)?;

        match (identifier.kind(), identifier.url()) {
            (IdentifierKind::RemoteUri, Some(url)) => self.fetch_remote(url, policy, progress).await,
            _ => {
                let path = identifier.local_path()?;
                match tokio::fs::metadata(&path).await {
                    Ok(meta) if meta.is_file() => {
                        debug!(?path, "Using local archive");
                        Ok(CachedArtifact::local(path))
                    }
                    Ok(_) => Err(Error::fetch(identifier.as_str(), "not a regular file")),
                    Err(e) => Err(Error::fetch(identifier.as_str(), e.to_string())),
                }
            }
        }
    }

    async fn fetch_remote(
        &self,
        url: &Url,
        policy: RetentionPolicy,
        progress: &Progress,
    ) -> Result<CachedArtifact> {
        let _guard = self.locks.lock(&DownloadCache::key_for(url)).await;

        if let Some(path) = self.cache.lookup(url, policy) {
            progress.report(ProgressEvent::CacheHit {
                url: url.to_string(),
                path: path.clone(),
            });
            return Ok(CachedArtifact::cached(path, policy));
        }

        let staged = self.cache.staging_file(url, policy)?;
        let file = staged
            .as_file()
            .try_clone()
            .map_err(|e| Error::io(e, staged.path(), "open temporary file"))?;
        let mut sink = tokio::fs::File::from_std(file);

        // Dropping `staged` on error removes the partial download.
        let bytes = self.downloader.download(url, &mut sink, progress).await?;
        sink.flush()
            .await
            .map_err(|e| Error::io(e, staged.path(), "flush"))?;
        drop(sink);
        progress.check(Phase::Fetch)?;

        let committed = self.cache.commit(url, policy, staged)?;
        progress.report(ProgressEvent::FetchFinished {
            url: url.to_string(),
            bytes,
        });
        Ok(CachedArtifact::downloaded(committed, policy))
    }
}
