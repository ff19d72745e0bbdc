use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use ::tar::{Archive, EntryType};
use flate2::read::GzDecoder;
use tracing::{trace, warn};

use super::{ArchiveExtractor, ExtractSummary, extract_atomically, read_header};
use crate::error::{Error, Phase, Result};
use crate::progress::Progress;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const USTAR_OFFSET: usize = 257;

/// Extractor for `.tar`, `.tar.gz` and `.tgz` archives.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarExtractor;

impl TarExtractor {
    fn is_gzip(archive: &Path) -> bool {
        let by_name = archive
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_ascii_lowercase)
            .is_some_and(|name| name.ends_with(".gz") || name.ends_with(".tgz"));
        by_name || read_header(archive).is_some_and(|h| h.starts_with(&GZIP_MAGIC))
    }
}

impl ArchiveExtractor for TarExtractor {
    fn name(&self) -> &'static str {
        "tar"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".tar", ".tar.gz", ".tgz"]
    }

    fn matches_magic(&self, header: &[u8]) -> bool {
        header.starts_with(&GZIP_MAGIC)
            || header.get(USTAR_OFFSET..USTAR_OFFSET + 5) == Some(b"ustar".as_slice())
    }

    fn extract(
        &self,
        archive: &Path,
        destination: &Path,
        progress: &Progress,
    ) -> Result<ExtractSummary> {
        let file = File::open(archive).map_err(|e| Error::extraction(archive, e.to_string()))?;
        let reader: Box<dyn Read> = if Self::is_gzip(archive) {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        let mut tar = Archive::new(reader);

        extract_atomically(archive, destination, |staging| {
            let mut summary = ExtractSummary::default();
            let entries = tar
                .entries()
                .map_err(|e| Error::extraction(archive, format!("Failed to read tar: {e}")))?;

            for entry in entries {
                progress.check(Phase::Extract)?;

                let mut entry = entry.map_err(|e| {
                    Error::extraction(archive, format!("Failed to read tar entry: {e}"))
                })?;
                let entry_type = entry.header().entry_type();
                let size = entry.size();

                let unpacked = entry
                    .unpack_in(staging)
                    .map_err(|e| Error::extraction(archive, e.to_string()))?;
                if !unpacked {
                    warn!(path = ?entry.path().ok(), "Skipping tar entry outside the destination");
                    continue;
                }
                trace!(path = ?entry.path().ok(), "Extracted tar entry");

                match entry_type {
                    EntryType::Directory => summary.directories += 1,
                    EntryType::Regular | EntryType::Continuous => {
                        summary.files += 1;
                        summary.bytes += size;
                    }
                    _ => {}
                }
            }
            Ok(summary)
        })
    }
}
