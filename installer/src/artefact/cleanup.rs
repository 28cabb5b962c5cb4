//! Scoped ownership of downloaded files that must not outlive a run.
//!
//! The archive, its checksum manifest, and its detached signature are all
//! transient. [`TransientFiles`] records each one as soon as it is fetched
//! and removes every recorded file when dropped, so they are released on
//! success, on a verification or extraction failure, and on cancellation
//! alike.

use log::{debug, warn};
use std::io;
use std::path::{Path, PathBuf};

/// Guard that deletes the files it tracks when dropped.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::artefact::cleanup::TransientFiles;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("httpd.zip");
/// std::fs::write(&path, b"zip").unwrap();
/// {
///     let mut transient = TransientFiles::new();
///     transient.track(&path);
/// }
/// assert!(!path.exists());
/// ```
#[derive(Debug, Default)]
pub struct TransientFiles {
    paths: Vec<PathBuf>,
}

impl TransientFiles {
    /// Create an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of the file at `path`.
    ///
    /// Tracking a path twice removes it once.
    pub fn track(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if !self.paths.iter().any(|tracked| tracked == path) {
            self.paths.push(path.to_path_buf());
        }
    }

    /// Return the tracked paths in the order they were recorded.
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove every tracked file now and return how many were deleted.
    ///
    /// Files that are already gone are skipped silently; other failures
    /// are logged and do not stop the remaining removals.
    pub fn release(&mut self) -> usize {
        let mut removed = 0;
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!("removed transient file {}", path.display());
                    removed += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("failed to remove {}: {err}", path.display()),
            }
        }
        removed
    }
}

impl Drop for TransientFiles {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name).expect("write file");
        path
    }

    #[test]
    fn drop_removes_every_tracked_file() {
        let temp = tempfile::tempdir().expect("temp dir");
        let archive = touch(temp.path(), "php.zip");
        let manifest = touch(temp.path(), "SHA256SUMS");
        let signature = touch(temp.path(), "php.zip.asc");
        {
            let mut transient = TransientFiles::new();
            transient.track(&archive);
            transient.track(&manifest);
            transient.track(&signature);
        }
        assert!(!archive.exists());
        assert!(!manifest.exists());
        assert!(!signature.exists());
    }

    #[test]
    fn release_skips_missing_files_and_counts_removals() {
        let temp = tempfile::tempdir().expect("temp dir");
        let present = touch(temp.path(), "present.zip");
        let mut transient = TransientFiles::new();
        transient.track(&present);
        transient.track(temp.path().join("never-downloaded.asc"));
        transient.track(&present);

        assert_eq!(transient.paths().len(), 2);
        assert_eq!(transient.release(), 1);
        assert!(transient.paths().is_empty());
    }

    #[test]
    fn untracked_files_survive() {
        let temp = tempfile::tempdir().expect("temp dir");
        let keep = touch(temp.path(), "httpd.conf");
        drop(TransientFiles::new());
        assert!(keep.exists());
    }
}
