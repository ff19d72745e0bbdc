//! Download, cache and extract resource bundles for unbox
//!
//! This crate turns a resource identifier (a URL or a file path, usually
//! naming a compressed archive) into a verified entry point file on local
//! disk:
//! - Remote archives are downloaded once and kept according to a retention
//!   policy
//! - Archives are fingerprinted by content, so identical bytes share one
//!   extraction folder
//! - Folders that lost their entry point are deleted and rebuilt
//!
//! # Overview
//!
//! ```no_run
//! use unbox_core::{Progress, ResourceResolver, Settings};
//!
//! # async fn run() -> unbox_core::Result<()> {
//! let settings = Settings::with_dirs("/var/cache/unbox", "/var/lib/unbox/versions");
//! let resolver = ResourceResolver::from_settings(settings)?;
//! let entry = resolver
//!     .resolve("https://example.org/bundle-1.0.zip", &Progress::new())
//!     .await?;
//! println!("{entry}");
//! # Ok(())
//! # }
//! ```
//!
//! Identifiers that do not name an archive are returned with the entry point
//! appended and are never touched on disk.

pub mod config;
pub mod digest;
pub mod extract;
pub mod fetch;
pub mod identifier;
pub mod layout;
pub mod lock;
pub mod paths;
pub mod progress;
pub mod resolver;

mod error;

// Re-export error types at crate root
pub use error::{Error, Phase, Result};

// Re-export main types
pub use config::{
    FileProperties, LayeredProperties, MapProperties, PropertySource, Settings, SystemProperties,
};
pub use digest::{FINGERPRINT_LEN, Fingerprint, fingerprint_file};
pub use extract::{ArchiveExtractor, ExtractSummary, ExtractorRegistry, TarExtractor, ZipExtractor};
pub use fetch::{
    ArtifactOrigin, CachedArtifact, ContentFetcher, DownloadCache, Downloader, HttpDownloader,
    RetentionPolicy,
};
pub use identifier::{IdentifierKind, ResourceIdentifier, append_entry_point};
pub use layout::VersionFolderLayout;
pub use progress::{Progress, ProgressEvent, ProgressReporter, TracingReporter};
pub use resolver::{ResolvedEntry, ResourceResolver, ResourceResolverBuilder};
