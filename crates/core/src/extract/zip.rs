use std::fs::File;
use std::path::Path;

use ::zip::ZipArchive;
use tracing::{trace, warn};

use super::{ArchiveExtractor, ExtractSummary, extract_atomically};
use crate::error::{Error, Phase, Result};
use crate::progress::Progress;

/// Extractor for `.zip` archives.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipExtractor;

impl ArchiveExtractor for ZipExtractor {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".zip"]
    }

    fn matches_magic(&self, header: &[u8]) -> bool {
        // Local file header, or the end record of an empty archive.
        header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06")
    }

    fn extract(
        &self,
        archive: &Path,
        destination: &Path,
        progress: &Progress,
    ) -> Result<ExtractSummary> {
        let file = File::open(archive).map_err(|e| Error::extraction(archive, e.to_string()))?;
        let mut zip = ZipArchive::new(file)
            .map_err(|e| Error::extraction(archive, format!("Failed to open zip: {e}")))?;

        extract_atomically(archive, destination, |staging| {
            let mut summary = ExtractSummary::default();
            for i in 0..zip.len() {
                progress.check(Phase::Extract)?;

                let mut entry = zip.by_index(i).map_err(|e| {
                    Error::extraction(archive, format!("Failed to read zip entry: {e}"))
                })?;
                let Some(relative) = entry.enclosed_name() else {
                    warn!(name = entry.name(), "Skipping zip entry outside the destination");
                    continue;
                };
                let outpath = staging.join(relative);

                if entry.is_dir() {
                    std::fs::create_dir_all(&outpath)
                        .map_err(|e| Error::extraction(archive, e.to_string()))?;
                    summary.directories += 1;
                    continue;
                }

                if let Some(parent) = outpath.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| Error::extraction(archive, e.to_string()))?;
                }
                let mut out = File::create(&outpath)
                    .map_err(|e| Error::extraction(archive, e.to_string()))?;
                let written = std::io::copy(&mut entry, &mut out).map_err(|e| {
                    Error::extraction(archive, format!("{}: {e}", outpath.display()))
                })?;
                trace!(path = ?outpath, written, "Extracted zip entry");

                #[cfg(unix)]
                if let Some(mode) = entry.unix_mode() {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))
                        .map_err(|e| Error::extraction(archive, e.to_string()))?;
                }

                summary.files += 1;
                summary.bytes += written;
            }
            Ok(summary)
        })
    }
}
