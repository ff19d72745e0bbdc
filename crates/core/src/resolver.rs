//! Resolution of identifiers into verified local entry points.
//!
//! ```text
//! START ─► CLASSIFIED ─► FETCHED ─► FINGERPRINTED ─► EXTRACTED-OR-CACHED ─► VERIFIED ─► DONE
//!              │                                            ▲                   │
//!              └─► DONE (direct, entry point appended)      └──── retry once ───┘
//! ```
//!
//! Only a missing entry point is retried, and only once: the folder is
//! deleted and the archive extracted again. A second miss fails with
//! [`Error::EntryPointMissing`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::config::{PropertySource, Settings, SystemProperties};
use crate::digest::{Fingerprint, fingerprint_file};
use crate::error::{Error, Phase, Result};
use crate::extract::ExtractorRegistry;
use crate::fetch::{ContentFetcher, DownloadCache, Downloader};
use crate::identifier::{ResourceIdentifier, append_entry_point};
use crate::layout::VersionFolderLayout;
use crate::lock::KeyedLocks;
use crate::progress::{Progress, ProgressEvent};

/// Result of a successful resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedEntry {
    /// A non-archive identifier with the entry point appended; not checked on
    /// disk.
    Direct(String),
    /// An entry point inside a verified version folder.
    Extracted {
        /// The entry point file
        path: PathBuf,
        /// Fingerprint of the archive the folder was built from
        fingerprint: Fingerprint,
        /// Whether this call populated the folder
        freshly_extracted: bool,
    },
}

impl ResolvedEntry {
    /// The resolved location as a string.
    #[must_use]
    pub fn location(&self) -> String {
        match self {
            Self::Direct(location) => location.clone(),
            Self::Extracted { path, .. } => path.display().to_string(),
        }
    }

    /// The entry point path, for extracted archives.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Direct(_) => None,
            Self::Extracted { path, .. } => Some(path),
        }
    }
}

impl std::fmt::Display for ResolvedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.location())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

/// Builder for [`ResourceResolver`].
#[derive(Default)]
pub struct ResourceResolverBuilder {
    settings: Option<Settings>,
    fetcher: Option<ContentFetcher>,
    downloader: Option<Arc<dyn Downloader>>,
    extractors: Option<ExtractorRegistry>,
    layout: Option<VersionFolderLayout>,
    entry_point: Option<String>,
}

impl ResourceResolverBuilder {
    /// Creates a builder; unset parts are derived from the settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use explicit settings instead of reading system properties.
    #[must_use]
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Use a preconfigured fetcher.
    #[must_use]
    pub fn fetcher(mut self, fetcher: ContentFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Use another transport with a cache at the configured cache directory.
    /// Ignored when a fetcher is set.
    #[must_use]
    pub fn downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Replace the default zip and tar extractors.
    #[must_use]
    pub fn extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = Some(extractors);
        self
    }

    /// Extract into another versions root.
    #[must_use]
    pub fn layout(mut self, layout: VersionFolderLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Expect another entry point file name.
    #[must_use]
    pub fn entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    /// Build the resolver
    ///
    /// # Errors
    ///
    /// Returns an error if settings are not given and cannot be loaded, or if
    /// the HTTP client cannot be created.
    pub fn build(self) -> Result<ResourceResolver> {
        let mut settings = match self.settings {
            Some(settings) => settings,
            None => Settings::load(&SystemProperties)?,
        };
        if let Some(entry_point) = self.entry_point {
            settings.entry_point = entry_point;
        }

        let fetcher = match (self.fetcher, self.downloader) {
            (Some(fetcher), _) => fetcher,
            (None, Some(downloader)) => {
                ContentFetcher::new(DownloadCache::new(&settings.downloads_dir), downloader)
            }
            (None, None) => ContentFetcher::from_settings(&settings)?,
        };
        let layout = self
            .layout
            .unwrap_or_else(|| VersionFolderLayout::new(&settings.versions_dir));
        let extractors = self.extractors.unwrap_or_else(ExtractorRegistry::with_defaults);

        Ok(ResourceResolver {
            settings,
            fetcher,
            extractors: Arc::new(extractors),
            layout,
            locks: KeyedLocks::new(),
        })
    }
}

/// Turns identifiers into verified local entry points.
///
/// Cheap to share behind an [`Arc`]; concurrent resolves of the same content
/// extract it once.
pub struct ResourceResolver {
    settings: Settings,
    fetcher: ContentFetcher,
    extractors: Arc<ExtractorRegistry>,
    layout: VersionFolderLayout,
    locks: KeyedLocks,
}

impl std::fmt::Debug for ResourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceResolver")
            .field("entry_point", &self.settings.entry_point)
            .field("layout", &self.layout)
            .field("extractors", &self.extractors)
            .finish_non_exhaustive()
    }
}

impl ResourceResolver {
    /// Create a new builder
    #[must_use]
    pub fn builder() -> ResourceResolverBuilder {
        ResourceResolverBuilder::new()
    }

    /// Resolver with the HTTP transport and default extractors.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        Self::builder().settings(settings).build()
    }

    /// Resolver configured from a property source.
    ///
    /// # Errors
    ///
    /// Returns an error if the properties hold invalid values.
    pub fn from_properties(props: &dyn PropertySource) -> Result<Self> {
        Self::from_settings(Settings::load(props)?)
    }

    /// Effective settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The content fetcher.
    #[must_use]
    pub fn fetcher(&self) -> &ContentFetcher {
        &self.fetcher
    }

    /// The version folder layout.
    #[must_use]
    pub fn layout(&self) -> &VersionFolderLayout {
        &self.layout
    }

    /// The registered extractors.
    #[must_use]
    pub fn extractors(&self) -> &ExtractorRegistry {
        &self.extractors
    }

    /// Resolve the configured source URL.
    ///
    /// # Errors
    ///
    /// See [`ResourceResolver::resolve`].
    pub async fn resolve_configured(&self, progress: &Progress) -> Result<ResolvedEntry> {
        let source = self.settings.source_url.clone();
        self.resolve(&source, progress).await
    }

    /// Resolve `identifier` into an entry point.
    ///
    /// Identifiers that do not name an archive are returned with the entry
    /// point appended and are not touched. Archives are fetched, fingerprinted
    /// and extracted into their version folder unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `progress` is cancelled, otherwise an
    /// [`Error::Resolve`] naming the failed phase; [`Error::root`] gives the
    /// underlying error.
    #[instrument(skip(self, progress), fields(entry_point = %self.settings.entry_point))]
    pub async fn resolve(&self, identifier: &str, progress: &Progress) -> Result<ResolvedEntry> {
        let id = ResourceIdentifier::parse(identifier)
            .map_err(|e| e.in_phase(identifier, Phase::Classify))?;
        let entry_point = self.settings.entry_point.as_str();

        let is_archive = id
            .file_name()
            .is_some_and(|name| self.extractors.handles_name(name));
        if !is_archive {
            let location = append_entry_point(id.as_str(), entry_point);
            debug!(%location, "Not an archive, resolved directly");
            return Ok(ResolvedEntry::Direct(location));
        }

        let policy = self.settings.retention_for(id.as_str());
        let artifact = self
            .fetcher
            .fetch(&id, policy, progress)
            .await
            .map_err(|e| e.in_phase(identifier, Phase::Fetch))?;

        let fingerprint = self
            .fingerprint(artifact.path(), progress)
            .await
            .map_err(|e| e.in_phase(identifier, Phase::Fingerprint))?;

        let _guard = self.locks.lock(fingerprint.short()).await;
        let folder = self.layout.folder_for(&fingerprint);
        let entry = self.layout.entry_point(&fingerprint, entry_point);
        let mut freshly_extracted = false;
        let mut attempt = Attempt::First;

        loop {
            if attempt == Attempt::Retry || !self.layout.is_extracted(&fingerprint) {
                self.extract(artifact.path(), &fingerprint, progress)
                    .await
                    .map_err(|e| e.in_phase(identifier, Phase::Extract))?;
                freshly_extracted = true;
            } else {
                debug!(?folder, "Reusing extracted folder");
            }

            progress
                .check(Phase::Verify)
                .map_err(|e| e.in_phase(identifier, Phase::Verify))?;
            if entry.is_file() {
                info!(path = ?entry, %fingerprint, freshly_extracted, "Resolved entry point");
                return Ok(ResolvedEntry::Extracted {
                    path: entry,
                    fingerprint,
                    freshly_extracted,
                });
            }

            match attempt {
                Attempt::First => {
                    progress.report(ProgressEvent::Repairing {
                        folder: folder.clone(),
                    });
                    self.layout
                        .remove(&fingerprint)
                        .map_err(|e| e.in_phase(identifier, Phase::Verify))?;
                    attempt = Attempt::Retry;
                }
                Attempt::Retry => {
                    return Err(Error::entry_point_missing(&entry).in_phase(identifier, Phase::Verify));
                }
            }
        }
    }

    async fn fingerprint(&self, archive: &Path, progress: &Progress) -> Result<Fingerprint> {
        progress.check(Phase::Fingerprint)?;
        let archive = archive.to_path_buf();
        run_blocking(move || fingerprint_file(&archive)).await
    }

    async fn extract(&self, archive: &Path, fingerprint: &Fingerprint, progress: &Progress) -> Result<()> {
        progress.check(Phase::Extract)?;

        let folder = self.layout.folder_for(fingerprint);
        // A stray file where the folder belongs would block the rename.
        if folder.exists() && !folder.is_dir() {
            self.layout.remove(fingerprint)?;
        }
        self.layout.ensure_root()?;

        let extractors = Arc::clone(&self.extractors);
        let archive = archive.to_path_buf();
        let progress = progress.clone();
        run_blocking(move || extractors.extract(&archive, &folder, &progress).map(|_| ())).await
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| Error::io_no_path(std::io::Error::other(e.to_string()), "spawn_blocking"))?
}
