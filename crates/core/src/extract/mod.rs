//! Archive extraction into version folders.
//!
//! Extractors are registered in an [`ExtractorRegistry`] and selected per
//! archive by extension or magic bytes. Every extractor populates its
//! destination atomically: entries are unpacked into a temporary sibling
//! directory that is renamed onto the destination only once complete, so a
//! failed or cancelled extraction never leaves a partial folder behind.

mod tar;
mod zip;

pub use self::tar::TarExtractor;
pub use self::zip::ZipExtractor;

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::progress::{Progress, ProgressEvent};

/// Counts of what an extraction wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Regular files written.
    pub files: u64,
    /// Directories created.
    pub directories: u64,
    /// Total uncompressed bytes written.
    pub bytes: u64,
}

/// An archive format that can be unpacked into a directory.
pub trait ArchiveExtractor: Send + Sync {
    /// Short format name, e.g. `zip`.
    fn name(&self) -> &'static str;

    /// File name suffixes handled by this extractor, lowercase, with the dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Whether the leading bytes of a file identify this format.
    fn matches_magic(&self, header: &[u8]) -> bool;

    /// Unpack `archive` into `destination`.
    ///
    /// `destination` must not be observable until every entry was written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extraction`] for malformed archives and write failures,
    /// or [`Error::Cancelled`] when `progress` is cancelled between entries.
    fn extract(
        &self,
        archive: &Path,
        destination: &Path,
        progress: &Progress,
    ) -> Result<ExtractSummary>;

    /// Whether a file name carries one of [`ArchiveExtractor::extensions`].
    fn handles_name(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.extensions().iter().any(|ext| name.ends_with(ext))
    }

    /// Whether this extractor accepts the archive at `path`, by name or by
    /// content.
    fn can_handle(&self, path: &Path) -> bool {
        if path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.handles_name(name))
        {
            return true;
        }
        read_header(path).is_some_and(|header| self.matches_magic(&header))
    }
}

const HEADER_LEN: usize = 512;

fn read_header(path: &Path) -> Option<Vec<u8>> {
    let file = File::open(path).ok()?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64).read_to_end(&mut header).ok()?;
    Some(header)
}

/// Unpack into a temporary sibling of `destination` with `unpack`, then
/// rename it into place.
///
/// An existing `destination` is replaced. On error the temporary directory is
/// removed and `destination` is left untouched.
pub(crate) fn extract_atomically(
    archive: &Path,
    destination: &Path,
    unpack: impl FnOnce(&Path) -> Result<ExtractSummary>,
) -> Result<ExtractSummary> {
    let parent = destination
        .parent()
        .ok_or_else(|| Error::extraction(archive, "destination has no parent directory"))?;
    std::fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;

    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(parent)
        .map_err(|e| Error::io(e, parent, "create temporary directory"))?;
    trace!(staging = ?staging.path(), "Extracting into staging directory");

    let summary = unpack(staging.path())?;

    if destination.exists() {
        std::fs::remove_dir_all(destination)
            .map_err(|e| Error::io(e, destination, "remove_dir_all"))?;
    }
    let staged = staging.keep();
    if let Err(e) = std::fs::rename(&staged, destination) {
        let _ = std::fs::remove_dir_all(&staged);
        return Err(Error::io(e, destination, "rename"));
    }
    Ok(summary)
}

/// Ordered set of extractors; the first one that accepts an archive wins.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn ArchiveExtractor>>,
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("extractors", &self.names())
            .finish()
    }
}

impl ExtractorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the zip and tar extractors.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ZipExtractor));
        registry.register(Arc::new(TarExtractor));
        registry
    }

    /// Append an extractor.
    pub fn register(&mut self, extractor: Arc<dyn ArchiveExtractor>) {
        debug!(name = extractor.name(), "Registered archive extractor");
        self.extractors.push(extractor);
    }

    /// Names of the registered extractors, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    /// Whether any extractor handles a file name by extension.
    #[must_use]
    pub fn handles_name(&self, name: &str) -> bool {
        self.extractors.iter().any(|e| e.handles_name(name))
    }

    /// First extractor that accepts the archive at `path`.
    #[must_use]
    pub fn find_for(&self, path: &Path) -> Option<&Arc<dyn ArchiveExtractor>> {
        self.extractors.iter().find(|e| e.can_handle(path))
    }

    /// Extract `archive` into `destination` with the matching extractor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedArchive`] if no extractor accepts the
    /// archive, otherwise whatever the extractor returns.
    pub fn extract(
        &self,
        archive: &Path,
        destination: &Path,
        progress: &Progress,
    ) -> Result<ExtractSummary> {
        let extractor = self
            .find_for(archive)
            .ok_or_else(|| Error::unsupported_archive(archive))?;

        progress.report(ProgressEvent::ExtractStarted {
            archive: archive.to_path_buf(),
            destination: destination.to_path_buf(),
        });
        debug!(extractor = extractor.name(), ?archive, ?destination, "Extracting archive");

        let summary = extractor.extract(archive, destination, progress)?;

        progress.report(ProgressEvent::ExtractFinished {
            destination: destination.to_path_buf(),
            files: summary.files,
        });
        Ok(summary)
    }
}
