use std::fs::File;
use std::io::Read;
use std::path::Path;

use qonvo_format::{ATTACHMENTS_PREFIX, BOARD_ENTRY, REPOSITORIES_PREFIX};
use tracing::{info, warn};
use zip::result::ZipError;

use crate::error::StoreError;

/// Reads a board saved in the legacy ZIP archive format: returns the raw
/// `board.json` bytes and extracts every `attachments/` and `repositories/`
/// member into `staging`.
///
/// Member extraction is best-effort: one bad member is logged and skipped,
/// the rest of the archive still loads. Member data is CRC-checked as it is
/// read, so a corrupt `board.json` fails the load while a corrupt
/// attachment only loses that attachment.
pub(crate) fn extract_legacy(path: &Path, staging: &Path) -> Result<Vec<u8>, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::LegacyArchive {
        path: path.to_path_buf(),
        source: ZipError::Io(e),
    })?;

    let mut archive = zip::ZipArchive::new(file).map_err(|e| StoreError::LegacyArchive {
        path: path.to_path_buf(),
        source: e,
    })?;

    let board_json = {
        let mut entry = match archive.by_name(BOARD_ENTRY) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => {
                return Err(StoreError::MissingBoardEntry {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => {
                return Err(StoreError::LegacyArchive {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let mut buf = Vec::new();
        entry
            .read_to_end(&mut buf)
            .map_err(|e| StoreError::LegacyArchive {
                path: path.to_path_buf(),
                source: ZipError::Io(e),
            })?;
        buf
    };

    let mut extracted = 0u64;
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(index, error = %e, "cannot open archive member, skipping");
                continue;
            }
        };

        let name = entry.name().to_string();
        if !(name.starts_with(ATTACHMENTS_PREFIX) || name.starts_with(REPOSITORIES_PREFIX)) {
            continue;
        }
        if entry.is_dir() {
            continue;
        }

        let enclosed = match entry.enclosed_name() {
            Some(enclosed) => enclosed.to_path_buf(),
            None => {
                warn!(member = %name, "archive member path escapes destination, skipping");
                continue;
            }
        };

        let out_path = staging.join(enclosed);
        if let Some(parent) = out_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(member = %name, error = %e, "cannot create member directory, skipping");
                continue;
            }
        }

        match File::create(&out_path).and_then(|mut out| std::io::copy(&mut entry, &mut out)) {
            Ok(_) => extracted += 1,
            Err(e) => warn!(member = %name, error = %e, "failed to extract member, skipping"),
        }
    }

    info!(
        attachments = extracted,
        staging = %staging.display(),
        "extracted legacy archive members"
    );

    Ok(board_json)
}
