//! URL-keyed download cache with a retention policy.
//!
//! Downloads are stored under the URL's SHA-256 so that unrelated URLs never
//! share a file, and keep their original file name so extractors can
//! recognise them by extension.
//!
//! Structure:
//! ```text
//! <root>/
//! ├── persistent/            # RetentionPolicy::Forever, kept across processes
//! │   └── <sha256(url)>/
//! │       └── bundle-1.0.zip
//! ├── session/               # RetentionPolicy::Session, valid for this cache instance
//! │   └── <sha256(url)>/
//! │       └── bundle-1.1-SNAPSHOT.zip
//! └── transient/             # RetentionPolicy::None, deleted after use
//!     └── <sha256(url)>/
//!         └── .download-XXXXXX-bundle.zip
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, trace};
use url::Url;

use crate::{Error, Result};

/// How long a downloaded archive stays valid in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetentionPolicy {
    /// Never expires; reused while the file is present, across processes.
    Forever,
    /// Valid until the process (the owning cache instance) ends.
    Session,
    /// Never cached; every fetch downloads again.
    None,
}

impl RetentionPolicy {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Forever => "persistent",
            Self::Session => "session",
            Self::None => "transient",
        }
    }
}

impl std::fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forever => write!(f, "forever"),
            Self::Session => write!(f, "session"),
            Self::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for RetentionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "forever" => Ok(Self::Forever),
            "session" | "until-exit" => Ok(Self::Session),
            "none" | "no-cache" => Ok(Self::None),
            other => Err(Error::configuration(format!(
                "Unknown retention policy '{other}' (expected forever, session or none)"
            ))),
        }
    }
}

/// A downloaded file placed in the cache.
#[derive(Debug)]
pub enum CommittedFile {
    /// Stored under its cache path; outlives this value.
    Stored(PathBuf),
    /// Temporary file removed when this value is dropped.
    Transient(TempPath),
}

impl CommittedFile {
    /// Location of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Stored(path) => path,
            Self::Transient(temp) => temp,
        }
    }
}

/// Download cache rooted at a directory.
///
/// Session entries are tracked in memory: a `session/` file written by an
/// earlier process is not trusted and will be downloaded again.
#[derive(Debug)]
pub struct DownloadCache {
    root: PathBuf,
    session: Mutex<HashSet<String>>,
}

impl DownloadCache {
    /// Create a cache at the specified root directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            session: Mutex::new(HashSet::new()),
        }
    }

    /// Get the cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalize a URL for use as a cache key: the fragment is dropped.
    #[must_use]
    pub fn normalize(url: &Url) -> Url {
        let mut normalized = url.clone();
        normalized.set_fragment(None);
        normalized
    }

    /// Cache key of a URL (hex SHA-256 of its normalized form).
    #[must_use]
    pub fn key_for(url: &Url) -> String {
        hex::encode(Sha256::digest(Self::normalize(url).as_str().as_bytes()))
    }

    fn entry_dir(&self, url: &Url, policy: RetentionPolicy) -> PathBuf {
        self.root.join(policy.dir_name()).join(Self::key_for(url))
    }

    /// Path a URL is stored at under `policy`.
    #[must_use]
    pub fn path_for(&self, url: &Url, policy: RetentionPolicy) -> PathBuf {
        self.entry_dir(url, policy).join(file_name_for(url))
    }

    /// Get a cached download if it is valid under `policy`.
    #[must_use]
    pub fn lookup(&self, url: &Url, policy: RetentionPolicy) -> Option<PathBuf> {
        let valid = match policy {
            RetentionPolicy::Forever => true,
            RetentionPolicy::Session => self.session.lock().contains(&Self::key_for(url)),
            RetentionPolicy::None => false,
        };
        let path = self.path_for(url, policy);
        if valid && path.is_file() {
            trace!(%url, ?path, "Cache hit for download");
            Some(path)
        } else {
            trace!(%url, %policy, "Cache miss for download");
            None
        }
    }

    /// Create an empty temporary file next to the final location of `url`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory or file cannot be created.
    pub fn staging_file(&self, url: &Url, policy: RetentionPolicy) -> Result<NamedTempFile> {
        let dir = self.entry_dir(url, policy);
        std::fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create_dir_all"))?;
        let suffix = format!("-{}", file_name_for(url));
        tempfile::Builder::new()
            .prefix(".download-")
            .suffix(&suffix)
            .tempfile_in(&dir)
            .map_err(|e| Error::io(e, &dir, "create temporary file"))
    }

    /// Move a fully written staging file into the cache.
    ///
    /// The rename is atomic, so readers see either the previous file or the
    /// complete new one.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be persisted.
    pub fn commit(
        &self,
        url: &Url,
        policy: RetentionPolicy,
        staged: NamedTempFile,
    ) -> Result<CommittedFile> {
        if policy == RetentionPolicy::None {
            return Ok(CommittedFile::Transient(staged.into_temp_path()));
        }

        let dest = self.path_for(url, policy);
        staged
            .persist(&dest)
            .map_err(|e| Error::io(e.error, &dest, "persist"))?;
        if policy == RetentionPolicy::Session {
            self.session.lock().insert(Self::key_for(url));
        }
        debug!(%url, ?dest, %policy, "Stored download in cache");
        Ok(CommittedFile::Stored(dest))
    }

    /// Remove the cached download of `url` under `policy`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the entry exists but cannot be removed.
    pub fn evict(&self, url: &Url, policy: RetentionPolicy) -> Result<()> {
        let dir = self.entry_dir(url, policy);
        self.session.lock().remove(&Self::key_for(url));
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(%url, ?dir, "Evicted download");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(e, &dir, "remove_dir_all")),
        }
    }

    /// Delete session and transient downloads, including leftovers from
    /// earlier processes. Persistent downloads are kept.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory exists but cannot be removed.
    pub fn clear_session(&self) -> Result<()> {
        self.session.lock().clear();
        for policy in [RetentionPolicy::Session, RetentionPolicy::None] {
            let dir = self.root.join(policy.dir_name());
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!(?dir, "Cleared download directory"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(e, &dir, "remove_dir_all")),
            }
        }
        Ok(())
    }
}

/// File name a URL is stored under: its last path segment.
fn file_name_for(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map_or_else(|| "download".to_string(), sanitize)
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn stage(cache: &DownloadCache, url: &Url, policy: RetentionPolicy, data: &[u8]) -> CommittedFile {
        let mut staged = cache.staging_file(url, policy).unwrap();
        staged.write_all(data).unwrap();
        cache.commit(url, policy, staged).unwrap()
    }

    #[test]
    fn test_retention_policy_parse() {
        assert_eq!("forever".parse::<RetentionPolicy>().unwrap(), RetentionPolicy::Forever);
        assert_eq!("until-exit".parse::<RetentionPolicy>().unwrap(), RetentionPolicy::Session);
        assert_eq!(" NO-CACHE ".parse::<RetentionPolicy>().unwrap(), RetentionPolicy::None);
        assert!("weekly".parse::<RetentionPolicy>().is_err());
    }

    #[test]
    fn test_key_ignores_fragment() {
        assert_eq!(
            DownloadCache::key_for(&url("http://example.org/a.zip#frag")),
            DownloadCache::key_for(&url("http://example.org/a.zip"))
        );
        assert_ne!(
            DownloadCache::key_for(&url("http://example.org/a.zip?v=1")),
            DownloadCache::key_for(&url("http://example.org/a.zip?v=2"))
        );
    }

    #[test]
    fn test_key_normalizes_host_case() {
        assert_eq!(
            DownloadCache::key_for(&url("HTTP://Example.ORG:80/a.zip")),
            DownloadCache::key_for(&url("http://example.org/a.zip"))
        );
    }

    #[test]
    fn test_path_keeps_file_name() {
        let cache = DownloadCache::new("/tmp/cache");
        let u = url("http://example.org/bundle-1.0.zip");
        let path = cache.path_for(&u, RetentionPolicy::Forever);
        assert!(path.starts_with("/tmp/cache/persistent"));
        assert!(path.ends_with("bundle-1.0.zip"));

        let dir = url("http://example.org/");
        assert!(cache.path_for(&dir, RetentionPolicy::Forever).ends_with("download"));
    }

    #[test]
    fn test_forever_survives_new_instance() {
        let temp = TempDir::new().unwrap();
        let u = url("http://example.org/bundle.zip");
        {
            let cache = DownloadCache::new(temp.path());
            stage(&cache, &u, RetentionPolicy::Forever, b"zip bytes");
            assert!(cache.lookup(&u, RetentionPolicy::Forever).is_some());
        }
        let cache = DownloadCache::new(temp.path());
        let hit = cache.lookup(&u, RetentionPolicy::Forever).unwrap();
        assert_eq!(std::fs::read(hit).unwrap(), b"zip bytes");
    }

    #[test]
    fn test_session_does_not_survive_new_instance() {
        let temp = TempDir::new().unwrap();
        let u = url("http://example.org/bundle-SNAPSHOT.zip");
        {
            let cache = DownloadCache::new(temp.path());
            stage(&cache, &u, RetentionPolicy::Session, b"zip bytes");
            assert!(cache.lookup(&u, RetentionPolicy::Session).is_some());
        }
        let cache = DownloadCache::new(temp.path());
        assert!(cache.lookup(&u, RetentionPolicy::Session).is_none());
    }

    #[test]
    fn test_none_is_never_a_hit_and_is_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let cache = DownloadCache::new(temp.path());
        let u = url("http://example.org/bundle.zip");

        let committed = stage(&cache, &u, RetentionPolicy::None, b"zip bytes");
        let path = committed.path().to_path_buf();
        assert!(path.is_file());
        assert!(path.to_string_lossy().ends_with("bundle.zip"));
        assert!(cache.lookup(&u, RetentionPolicy::None).is_none());

        drop(committed);
        assert!(!path.exists());
    }

    #[test]
    fn test_evict_and_clear_session() {
        let temp = TempDir::new().unwrap();
        let cache = DownloadCache::new(temp.path());
        let kept = url("http://example.org/kept.zip");
        let session = url("http://example.org/session.zip");

        stage(&cache, &kept, RetentionPolicy::Forever, b"a");
        stage(&cache, &session, RetentionPolicy::Session, b"b");

        cache.clear_session().unwrap();
        assert!(cache.lookup(&session, RetentionPolicy::Session).is_none());
        assert!(!temp.path().join("session").exists());
        assert!(cache.lookup(&kept, RetentionPolicy::Forever).is_some());

        cache.evict(&kept, RetentionPolicy::Forever).unwrap();
        assert!(cache.lookup(&kept, RetentionPolicy::Forever).is_none());
        // Evicting twice is fine
        cache.evict(&kept, RetentionPolicy::Forever).unwrap();
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a:b*c.zip"), "a_b_c.zip");
    }
}
