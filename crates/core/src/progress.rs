//! Progress reporting and cancellation for long-running resolve calls.
//!
//! A [`Progress`] handle is threaded through every fetch, hash and extract
//! call. It carries a [`CancellationToken`] the caller can trigger from any
//! thread, and a [`ProgressReporter`] that receives coarse phase events.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Phase, Result};

/// Coarse progress events emitted while resolving a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A download started.
    FetchStarted {
        /// The URL being downloaded
        url: String,
        /// Content length, when the server announced one
        total_bytes: Option<u64>,
    },
    /// Bytes received so far for the current download.
    FetchProgress {
        /// The URL being downloaded
        url: String,
        /// Bytes written to disk so far
        downloaded: u64,
        /// Content length, when known
        total_bytes: Option<u64>,
    },
    /// A download completed and was committed to the cache.
    FetchFinished {
        /// The URL that was downloaded
        url: String,
        /// Final size in bytes
        bytes: u64,
    },
    /// A cached artifact was reused without downloading.
    CacheHit {
        /// The URL whose cached copy was used
        url: String,
        /// Location of the cached file
        path: PathBuf,
    },
    /// Extraction into a version folder started.
    ExtractStarted {
        /// The archive being extracted
        archive: PathBuf,
        /// The destination folder
        destination: PathBuf,
    },
    /// Extraction completed.
    ExtractFinished {
        /// The populated destination folder
        destination: PathBuf,
        /// Number of files written
        files: u64,
    },
    /// A version folder without an entry point is being rebuilt.
    Repairing {
        /// The folder that failed verification
        folder: PathBuf,
    },
}

/// Receives [`ProgressEvent`]s.
pub trait ProgressReporter: Send + Sync {
    /// Handle a single event.
    fn report(&self, event: &ProgressEvent);
}

/// Reporter that forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::FetchStarted { url, total_bytes } => {
                info!(%url, ?total_bytes, "Download started");
            }
            ProgressEvent::FetchProgress {
                url,
                downloaded,
                total_bytes,
            } => {
                debug!(%url, downloaded, ?total_bytes, "Download progress");
            }
            ProgressEvent::FetchFinished { url, bytes } => {
                info!(%url, bytes, "Download finished");
            }
            ProgressEvent::CacheHit { url, path } => {
                debug!(%url, ?path, "Using cached download");
            }
            ProgressEvent::ExtractStarted {
                archive,
                destination,
            } => {
                info!(?archive, ?destination, "Extraction started");
            }
            ProgressEvent::ExtractFinished { destination, files } => {
                info!(?destination, files, "Extraction finished");
            }
            ProgressEvent::Repairing { folder } => {
                warn!(?folder, "Entry point missing, rebuilding folder");
            }
        }
    }
}

/// Progress and cancellation handle.
///
/// Cheap to clone; clones share the same token and reporter, so cancelling
/// one cancels all of them.
#[derive(Clone)]
pub struct Progress {
    token: CancellationToken,
    reporter: Arc<dyn ProgressReporter>,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Progress {
    /// Create a handle with a fresh token that reports through `tracing`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Create a handle bound to an existing cancellation token.
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Replace the reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// The underlying cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] for `phase` once the token is cancelled.
    pub fn check(&self, phase: Phase) -> Result<()> {
        if self.token.is_cancelled() {
            debug!(%phase, "Cancellation observed");
            return Err(Error::cancelled(phase));
        }
        Ok(())
    }

    /// Emit an event to the reporter.
    pub fn report(&self, event: ProgressEvent) {
        self.reporter.report(&event);
    }
}
