//! Fingerprint-named version folders.
//!
//! ```text
//! <versions-root>/
//! ├── a1b2c3/          # first FINGERPRINT_LEN hex chars of the archive hash
//! │   └── index.html   # entry point
//! └── 9f8e7d/
//! ```
//!
//! A folder that exists is treated as extracted. A folder whose entry point is
//! missing is corrupt; the resolver removes and rebuilds it.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::digest::Fingerprint;
use crate::{Error, Result, paths};

/// Maps fingerprints to extraction folders under a root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionFolderLayout {
    root: PathBuf,
}

impl VersionFolderLayout {
    /// Layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout rooted at the platform versions directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform data directory cannot be determined.
    pub fn platform_default() -> Result<Self> {
        Ok(Self::new(paths::versions_dir()?))
    }

    /// Layout rooted at `<state_dir>/versions`.
    #[must_use]
    pub fn from_state_dir(state_dir: impl AsRef<Path>) -> Self {
        Self::new(state_dir.as_ref().join("versions"))
    }

    /// The versions root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder an archive with `fingerprint` is extracted into.
    #[must_use]
    pub fn folder_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.short())
    }

    /// Path of `entry_point` inside the folder for `fingerprint`.
    #[must_use]
    pub fn entry_point(&self, fingerprint: &Fingerprint, entry_point: &str) -> PathBuf {
        self.folder_for(fingerprint).join(entry_point)
    }

    /// Whether the folder for `fingerprint` exists.
    #[must_use]
    pub fn is_extracted(&self, fingerprint: &Fingerprint) -> bool {
        self.folder_for(fingerprint).is_dir()
    }

    /// Delete the folder for `fingerprint` and everything in it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the folder exists but cannot be removed.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Result<()> {
        let folder = self.folder_for(fingerprint);
        let result = if folder.is_dir() {
            std::fs::remove_dir_all(&folder)
        } else {
            std::fs::remove_file(&folder)
        };
        match result {
            Ok(()) => {
                debug!(?folder, "Removed version folder");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(e, &folder, "remove")),
        }
    }

    /// Create the versions root if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| Error::io(e, &self.root, "create_dir_all"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_folder_named_after_short_fingerprint() {
        let layout = VersionFolderLayout::new("/state/versions");
        let fp = Fingerprint::from_bytes(b"hello world");
        assert_eq!(layout.folder_for(&fp), PathBuf::from("/state/versions/b94d27"));
        assert_eq!(
            layout.entry_point(&fp, "index.html"),
            PathBuf::from("/state/versions/b94d27/index.html")
        );
    }

    #[test]
    fn test_from_state_dir() {
        let layout = VersionFolderLayout::from_state_dir("/state");
        assert_eq!(layout.root(), Path::new("/state/versions"));
    }

    #[test]
    fn test_platform_default_honours_state_env() {
        temp_env::with_var("UNBOX_STATE_DIR", Some("/custom/state"), || {
            let layout = VersionFolderLayout::platform_default().unwrap();
            assert_eq!(layout.root(), Path::new("/custom/state/versions"));
        });
    }

    #[test]
    fn test_is_extracted_and_remove() {
        let temp = TempDir::new().unwrap();
        let layout = VersionFolderLayout::new(temp.path());
        let fp = Fingerprint::from_bytes(b"bundle");

        assert!(!layout.is_extracted(&fp));
        std::fs::create_dir_all(layout.folder_for(&fp)).unwrap();
        std::fs::write(layout.entry_point(&fp, "index.html"), b"x").unwrap();
        assert!(layout.is_extracted(&fp));

        layout.remove(&fp).unwrap();
        assert!(!layout.is_extracted(&fp));
        // Removing a missing folder is not an error
        layout.remove(&fp).unwrap();
    }

    #[test]
    fn test_file_in_place_of_folder_is_not_extracted() {
        let temp = TempDir::new().unwrap();
        let layout = VersionFolderLayout::new(temp.path());
        let fp = Fingerprint::from_bytes(b"bundle");
        std::fs::write(layout.folder_for(&fp), b"not a directory").unwrap();

        assert!(!layout.is_extracted(&fp));
        layout.remove(&fp).unwrap();
        assert!(!layout.folder_for(&fp).exists());
    }

    #[test]
    fn test_ensure_root() {
        let temp = TempDir::new().unwrap();
        let layout = VersionFolderLayout::from_state_dir(temp.path().join("state"));
        layout.ensure_root().unwrap();
        assert!(layout.root().is_dir());
    }
}
