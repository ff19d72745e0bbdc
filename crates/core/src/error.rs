//! Error types for resolving, fetching and extracting resources

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Phase of a resolve call, used to give errors their context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Deciding whether the identifier is a direct location or an archive.
    Classify,
    /// Obtaining the archive file, locally or over the network.
    Fetch,
    /// Hashing the archive contents.
    Fingerprint,
    /// Unpacking the archive into its version folder.
    Extract,
    /// Checking that the entry point exists after extraction.
    Verify,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Classify => write!(f, "classify"),
            Self::Fetch => write!(f, "fetch"),
            Self::Fingerprint => write!(f, "fingerprint"),
            Self::Extract => write!(f, "extract"),
            Self::Verify => write!(f, "verify"),
        }
    }
}

/// Error type for unbox operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The identifier is neither a valid URI nor a usable path
    #[error("Invalid resource identifier '{identifier}': {reason}")]
    #[diagnostic(
        code(unbox::identifier),
        help("Use an absolute path, a file:// URI or an http(s):// URL")
    )]
    InvalidIdentifier {
        /// The identifier as given by the caller
        identifier: String,
        /// Why it was rejected
        reason: String,
    },

    /// Network or local failure while obtaining an archive
    #[error("Failed to fetch '{url}': {reason}")]
    #[diagnostic(code(unbox::fetch))]
    Fetch {
        /// The URL or path being fetched
        url: String,
        /// Error message
        reason: String,
    },

    /// The archive could not be read while computing its fingerprint
    #[error("Failed to fingerprint {}", path.display())]
    #[diagnostic(code(unbox::hash))]
    Hash {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// The file being hashed
        path: Box<Path>,
    },

    /// The archive is malformed or could not be written out
    #[error("Failed to extract {}: {reason}", archive.display())]
    #[diagnostic(code(unbox::extract))]
    Extraction {
        /// The archive being extracted
        archive: Box<Path>,
        /// Error message
        reason: String,
    },

    /// No registered extractor handles the archive
    #[error("Unsupported archive format: {}", archive.display())]
    #[diagnostic(
        code(unbox::unsupported_archive),
        help("Supported formats are .zip, .tar, .tar.gz and .tgz")
    )]
    UnsupportedArchive {
        /// The archive that no extractor accepted
        archive: Box<Path>,
    },

    /// Extraction finished but the entry point is absent
    #[error("{} can not be found after extraction", path.display())]
    #[diagnostic(
        code(unbox::entry_point_missing),
        help("The archive does not contain the expected entry point file")
    )]
    EntryPointMissing {
        /// The expected entry point path
        path: Box<Path>,
    },

    /// The caller cancelled the operation
    #[error("Operation cancelled during {phase}")]
    #[diagnostic(code(unbox::cancelled))]
    Cancelled {
        /// Phase that observed the cancellation
        phase: Phase,
    },

    /// I/O error with optional path context
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(unbox::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    #[diagnostic(code(unbox::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Failure while resolving an identifier, with phase context
    #[error("Failed to resolve '{identifier}' during {phase}")]
    #[diagnostic(code(unbox::resolve))]
    Resolve {
        /// The identifier being resolved
        identifier: String,
        /// Phase in which the failure occurred
        phase: Phase,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an invalid identifier error
    #[must_use]
    pub fn invalid_identifier(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// Create a fetch error
    #[must_use]
    pub fn fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a hash error
    #[must_use]
    pub fn hash(source: std::io::Error, path: impl AsRef<Path>) -> Self {
        Self::Hash {
            source,
            path: path.as_ref().into(),
        }
    }

    /// Create an extraction error
    #[must_use]
    pub fn extraction(archive: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            archive: archive.as_ref().into(),
            reason: reason.into(),
        }
    }

    /// Create an unsupported archive error
    #[must_use]
    pub fn unsupported_archive(archive: impl AsRef<Path>) -> Self {
        Self::UnsupportedArchive {
            archive: archive.as_ref().into(),
        }
    }

    /// Create an entry point missing error
    #[must_use]
    pub fn entry_point_missing(path: impl AsRef<Path>) -> Self {
        Self::EntryPointMissing {
            path: path.as_ref().into(),
        }
    }

    /// Create a cancellation error
    #[must_use]
    pub fn cancelled(phase: Phase) -> Self {
        Self::Cancelled { phase }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Wrap this error with the identifier and phase it occurred in.
    ///
    /// Cancellation and already-wrapped errors are returned unchanged.
    #[must_use]
    pub fn in_phase(self, identifier: impl Into<String>, phase: Phase) -> Self {
        match self {
            Self::Cancelled { .. } | Self::Resolve { .. } => self,
            other => Self::Resolve {
                identifier: identifier.into(),
                phase,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through [`Error::Resolve`] wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Resolve { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error (or the error it wraps) is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled { .. })
    }
}

/// Result type for unbox operations
pub type Result<T> = std::result::Result<T, Error>;
