//! Archive extraction for verified artefacts.
//!
//! Zip archives are unpacked into a staging directory created next to the
//! destination and only merged into the destination once every entry has
//! been read. A corrupt archive therefore fails before the destination is
//! touched. Entry paths are validated to prevent zip-slip attacks.

use log::{debug, info};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};

/// Trait for extracting artefact archives, enabling test mocking.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::artefact::extraction::{ArtefactExtractor, ZipExtractor};
///
/// let extractor: &dyn ArtefactExtractor = &ZipExtractor;
/// # let _ = extractor;
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait ArtefactExtractor {
    /// Extract the archive at `archive_path` into `dest_dir`.
    ///
    /// Returns the archive-relative paths of the extracted files.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::CorruptArchive`] if the archive cannot be
    /// read, [`ExtractionError::PathTraversal`] if any entry attempts to
    /// escape the destination directory, [`ExtractionError::EmptyArchive`]
    /// if no files are found and [`ExtractionError::Io`] on I/O failures.
    fn extract(&self, archive_path: &Path, dest_dir: &Path)
    -> Result<Vec<String>, ExtractionError>;
}

/// Errors arising from archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// The archive is not a readable zip file.
    #[error("corrupt archive {}: {reason}", path.display())]
    CorruptArchive {
        /// The archive path.
        path: PathBuf,
        /// What the zip reader reported.
        reason: String,
    },

    /// I/O error during extraction.
    #[error("extraction I/O error: {0}")]
    Io(#[from] io::Error),

    /// A path in the archive attempts to traverse outside the destination.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path from the archive entry.
        path: String,
    },

    /// The archive contains no files.
    #[error("archive contains no files")]
    EmptyArchive,
}

/// Extractor for zip archives using the `zip` crate.
pub struct ZipExtractor;

impl ArtefactExtractor for ZipExtractor {
    fn extract(
        &self,
        archive_path: &Path,
        dest_dir: &Path,
    ) -> Result<Vec<String>, ExtractionError> {
        let parent = staging_parent(dest_dir);
        std::fs::create_dir_all(&parent)?;
        let staging = tempfile::Builder::new()
            .prefix(".extract-")
            .tempdir_in(&parent)?;

        let extracted = unpack_zip(archive_path, staging.path())?;
        if extracted.is_empty() {
            return Err(ExtractionError::EmptyArchive);
        }

        std::fs::create_dir_all(dest_dir)?;
        merge_tree(staging.path(), dest_dir)?;
        info!(
            "extracted {} files from {} into {}",
            extracted.len(),
            archive_path.display(),
            dest_dir.display()
        );
        Ok(extracted)
    }
}

fn staging_parent(dest_dir: &Path) -> PathBuf {
    match dest_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn corrupt(archive_path: &Path, err: &zip::result::ZipError) -> ExtractionError {
    ExtractionError::CorruptArchive {
        path: archive_path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn unpack_zip(archive_path: &Path, staging: &Path) -> Result<Vec<String>, ExtractionError> {
    let file = File::open(archive_path)?;
    let mut archive =
        zip::ZipArchive::new(BufReader::new(file)).map_err(|err| corrupt(archive_path, &err))?;
    let mut extracted = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| corrupt(archive_path, &err))?;
        let name = entry.name().to_owned();
        let relative = Path::new(&name);
        validate_entry_path(relative)?;

        let out_path = staging.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out_file = File::create(&out_path)?;
        io::copy(&mut entry, &mut out_file).map_err(|err| {
            // Decompression and CRC failures surface as I/O errors while copying.
            if err.kind() == io::ErrorKind::InvalidData {
                ExtractionError::CorruptArchive {
                    path: archive_path.to_path_buf(),
                    reason: err.to_string(),
                }
            } else {
                ExtractionError::Io(err)
            }
        })?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))?;
        }

        debug!("staged {name}");
        extracted.push(name);
    }

    Ok(extracted)
}

/// Move every entry of `from` into `to`, merging directories and replacing
/// files that already exist.
fn merge_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        let is_dir = entry.file_type()?.is_dir();
        if is_dir && target.is_dir() {
            merge_tree(&entry.path(), &target)?;
            continue;
        }
        if is_dir {
            std::fs::rename(entry.path(), &target)?;
            continue;
        }
        if target.is_dir() {
            std::fs::remove_dir_all(&target)?;
        }
        std::fs::rename(entry.path(), &target)?;
    }
    Ok(())
}

/// Validate that an entry path does not escape the destination directory
/// via `..` components or absolute paths.
fn validate_entry_path(path: &Path) -> Result<(), ExtractionError> {
    let escapes = path.is_absolute()
        || path.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
    if escapes {
        return Err(ExtractionError::PathTraversal {
            path: path.display().to_string(),
        });
    }
    Ok(())
}
