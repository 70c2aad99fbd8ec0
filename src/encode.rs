//! Dispatch to the version-specific encoder and commit its files atomically.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::{BamVersion, ConvertConfig};
use crate::document::FinalDocument;
use crate::encode_v1::encode_v1;
use crate::encode_v2::encode_v2;
use crate::error::BamError;
use crate::progress::Progress;

/// Files an output step produced in memory, keyed by their final path.
pub(crate) type OutputFiles = Vec<(PathBuf, Vec<u8>)>;

/// File name of a V2 texture page.
pub fn pvrz_file_name(page: u32) -> String {
    format!("MOS{page:04}.PVRZ")
}

/// Encode `doc` and write it to `path`. V2 pages are written beside it.
///
/// Everything is encoded in memory first; files are then written to
/// temporary siblings and renamed into place, so a failure leaves no
/// partially written output under the target names.
pub fn write_bam(
    path: &Path,
    doc: &FinalDocument<'_>,
    config: &ConvertConfig,
    progress: &mut dyn Progress,
) -> Result<(), BamError> {
    let files = encode_bam(path, doc, config, progress)?;
    if progress.is_cancelled() {
        return Err(BamError::Cancelled);
    }
    commit(&files)?;
    info!("wrote {} ({} files)", path.display(), files.len());
    Ok(())
}

/// Encode `doc` for `path` without touching the file system.
pub(crate) fn encode_bam(
    path: &Path,
    doc: &FinalDocument<'_>,
    config: &ConvertConfig,
    progress: &mut dyn Progress,
) -> Result<OutputFiles, BamError> {
    config.validate()?;
    let files = match config.version {
        BamVersion::V1 => vec![(path.to_path_buf(), encode_v1(doc, config, progress)?)],
        BamVersion::V2 => {
            let out = encode_v2(doc, config, progress)?;
            let dir = path.parent().unwrap_or_else(|| Path::new(""));
            let mut files: Vec<(PathBuf, Vec<u8>)> = out
                .pages
                .into_iter()
                .map(|(page, data)| (dir.join(pvrz_file_name(page)), data))
                .collect();
            files.push((path.to_path_buf(), out.bam));
            files
        }
    };
    Ok(files)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write every file to a temporary sibling, then rename all into place.
pub(crate) fn commit(files: &[(PathBuf, Vec<u8>)]) -> Result<(), BamError> {
    let temps: Vec<PathBuf> = files.iter().map(|(p, _)| temp_path(p)).collect();
    let written = files
        .iter()
        .zip(&temps)
        .try_for_each(|((_, data), tmp)| fs::write(tmp, data));
    let renamed = written.and_then(|()| {
        files
            .iter()
            .zip(&temps)
            .try_for_each(|((path, _), tmp)| fs::rename(tmp, path))
    });
    if let Err(e) = renamed {
        for tmp in &temps {
            if tmp.exists() && fs::remove_file(tmp).is_err() {
                warn!("could not remove temporary file {}", tmp.display());
            }
        }
        return Err(e.into());
    }
    Ok(())
}
