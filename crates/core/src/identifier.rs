//! Classification of resource identifiers.
//!
//! An identifier is a URI or a filesystem path. It is classified once, at
//! resolve time, into a local file path, a `file:` URI, or a remote URI.

use std::path::PathBuf;

use url::Url;

use crate::{Error, Result};

/// How an identifier addresses its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    /// A plain filesystem path without a scheme.
    LocalFile,
    /// A `file:` URI.
    LocalUri,
    /// Any other URI; fetched over the network.
    RemoteUri,
}

/// A parsed, classified resource identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdentifier {
    raw: String,
    kind: IdentifierKind,
    url: Option<Url>,
}

impl ResourceIdentifier {
    /// Parse and classify an identifier.
    ///
    /// Strings without a scheme are local paths. A one-letter scheme is a
    /// Windows drive letter (`C:\bundles\a.zip`), also a local path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] for empty input and for strings that
    /// look like URIs but do not parse as one.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(Error::invalid_identifier(raw, "identifier is empty"));
        }

        match Url::parse(raw) {
            Ok(url) if url.scheme().len() == 1 => Ok(Self::local_file(raw)),
            Ok(url) if url.scheme() == "file" => Ok(Self {
                raw: raw.to_string(),
                kind: IdentifierKind::LocalUri,
                url: Some(url),
            }),
            Ok(url) => Ok(Self {
                raw: raw.to_string(),
                kind: IdentifierKind::RemoteUri,
                url: Some(url),
            }),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Self::local_file(raw)),
            Err(e) => Err(Error::invalid_identifier(raw, e.to_string())),
        }
    }

    fn local_file(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            kind: IdentifierKind::LocalFile,
            url: None,
        }
    }

    /// The identifier exactly as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// How the identifier addresses its resource.
    #[must_use]
    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    /// Whether resolving this identifier needs network access.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.kind == IdentifierKind::RemoteUri
    }

    /// The parsed URI, for `file:` and remote identifiers.
    #[must_use]
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Absolute local path for local identifiers.
    ///
    /// Relative paths are resolved against the current directory; the file
    /// does not need to exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] for remote identifiers and for
    /// `file:` URIs that do not map to a local path.
    pub fn local_path(&self) -> Result<PathBuf> {
        match (self.kind, &self.url) {
            (IdentifierKind::LocalFile, _) => std::path::absolute(&self.raw)
                .map_err(|e| Error::invalid_identifier(&self.raw, e.to_string())),
            (IdentifierKind::LocalUri, Some(url)) => url.to_file_path().map_err(|()| {
                Error::invalid_identifier(&self.raw, "file URI does not name a local path")
            }),
            _ => Err(Error::invalid_identifier(
                &self.raw,
                "remote identifier has no local path",
            )),
        }
    }

    /// Last path segment, used to recognise archives by extension.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        let name = match &self.url {
            Some(url) => url.path().rsplit('/').next(),
            None => self.raw.rsplit(|c| c == '/' || c == '\\').next(),
        }?;
        (!name.is_empty()).then_some(name)
    }
}

impl std::fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Append `entry_point` to `location` unless it already ends with it,
/// inserting a `/` first when needed.
#[must_use]
pub fn append_entry_point(location: &str, entry_point: &str) -> String {
    if location.ends_with(entry_point) {
        return location.to_string();
    }
    let mut result = String::with_capacity(location.len() + entry_point.len() + 1);
    result.push_str(location);
    if !location.ends_with('/') {
        result.push('/');
    }
    result.push_str(entry_point);
    result
}
