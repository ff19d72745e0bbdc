//! Content fingerprints of fetched archives.
//!
//! The fingerprint is the SHA-256 of the archive bytes. Version folders are
//! named after its first [`FINGERPRINT_LEN`] hex characters; two archives that
//! share a prefix are treated as the same content.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::trace;

use crate::{Error, Result};

/// Number of hex characters used to name a version folder.
pub const FINGERPRINT_LEN: usize = 6;

const BUFFER_SIZE: usize = 8192;

/// SHA-256 content fingerprint (hex encoded).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an in-memory buffer.
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Create from a full hex digest.
    ///
    /// # Errors
    ///
    /// Returns error if the string is not 64 hex characters.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let s = hex.into();
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::configuration(format!(
                "Fingerprint must be 64 hex characters, got '{s}'"
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Fingerprint everything read from `reader`.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn from_reader(mut reader: impl Read) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// The full hex digest.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// The truncated form used as a directory name.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..FINGERPRINT_LEN]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short())
    }
}

/// Fingerprint the contents of a file.
///
/// # Errors
///
/// Returns [`Error::Hash`] if the file cannot be opened or read.
pub fn fingerprint_file(path: &Path) -> Result<Fingerprint> {
    let file = File::open(path).map_err(|e| Error::hash(e, path))?;
    let fingerprint = Fingerprint::from_reader(file).map_err(|e| Error::hash(e, path))?;
    trace!(?path, %fingerprint, "Fingerprinted file");
    Ok(fingerprint)
}
