//! SHA-256 checksum computation and manifest lookup.
//!
//! Digests are computed by streaming the file through the hasher in
//! 4 KiB blocks, so memory use does not depend on archive size.
//!
//! Manifest lookup follows the long-standing `SHA256SUMS` convention used by
//! release pages: the expected digest is the first whitespace-delimited
//! token on the first line that mentions the file name. By default the
//! mention is a plain substring test, so `php-8.3.zip` also matches a line
//! for `php-8.3.zip.asc` if that line comes first. [`ManifestMatch::ExactField`]
//! compares the file-name column instead.

use super::sha256_digest::Sha256Digest;
use log::{debug, warn};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read block size used while hashing.
const READ_CHUNK: usize = 4096;

/// Errors raised while computing a digest.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    /// The file could not be opened or read.
    #[error("failed to read {} for hashing: {source}", path.display())]
    Read {
        /// The file being hashed.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Result of comparing a file against an expected digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumComparison {
    /// The file hashes to the expected digest.
    Match,
    /// The file hashes to a different digest.
    Mismatch {
        /// The digest actually computed.
        actual: Sha256Digest,
    },
    /// The file does not exist.
    Absent,
}

/// Computes and compares SHA-256 digests of local files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Compute the SHA-256 digest of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumError::Read`] if the file cannot be read.
    pub fn digest(&self, path: &Path) -> Result<Sha256Digest, ChecksumError> {
        let read_error = |source| ChecksumError::Read {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(read_error)?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; READ_CHUNK];
        loop {
            let read = file.read(&mut buffer).map_err(read_error)?;
            let Some(chunk) = buffer.get(..read).filter(|chunk| !chunk.is_empty()) else {
                break;
            };
            hasher.update(chunk);
        }
        Ok(Sha256Digest::from_bytes(hasher.finalize().as_slice()))
    }

    /// Compare the file at `path` with `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumError::Read`] for read failures other than the
    /// file being absent.
    pub fn compare(
        &self,
        path: &Path,
        expected: &Sha256Digest,
    ) -> Result<ChecksumComparison, ChecksumError> {
        let actual = match self.digest(path) {
            Ok(actual) => actual,
            Err(ChecksumError::Read { source, .. })
                if source.kind() == io::ErrorKind::NotFound =>
            {
                return Ok(ChecksumComparison::Absent);
            }
            Err(err) => return Err(err),
        };
        debug!("{}: expected {expected}, got {actual}", path.display());
        if &actual == expected {
            Ok(ChecksumComparison::Match)
        } else {
            Ok(ChecksumComparison::Mismatch { actual })
        }
    }

    /// Return true only if the file exists and hashes to `expected`.
    ///
    /// An absent file is a normal negative result, not an error.
    #[must_use]
    pub fn verify(&self, path: &Path, expected: &Sha256Digest) -> bool {
        match self.compare(path, expected) {
            Ok(comparison) => comparison == ChecksumComparison::Match,
            Err(err) => {
                warn!("{err}");
                false
            }
        }
    }
}

/// How a manifest line is matched against a file name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestMatch {
    /// The line contains the file name anywhere.
    #[default]
    Substring,
    /// The file-name column (after an optional `*` binary marker) equals
    /// the file name.
    #[serde(rename = "exact")]
    ExactField,
}

/// A manifest line that matched a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestEntry<'a> {
    /// The first whitespace-delimited token of the line, unvalidated.
    pub digest_token: &'a str,
    /// One-based line number within the manifest.
    pub line_number: usize,
}

/// The text lines of a checksum manifest.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::artefact::checksum::{ChecksumManifest, ManifestMatch};
///
/// let manifest = ChecksumManifest::parse("abc123  httpd-2.4.zip\ndef456  php-8.3.zip\n");
/// let entry = manifest.lookup("php-8.3.zip", ManifestMatch::Substring).unwrap();
/// assert_eq!(entry.digest_token, "def456");
/// assert_eq!(entry.line_number, 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumManifest {
    lines: Vec<String>,
}

impl ChecksumManifest {
    /// Split manifest text into lines.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self::from_lines(text.lines())
    }

    /// Build a manifest from already-split lines.
    #[must_use]
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Read and split the manifest file at `path`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while reading. Invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn read(path: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::parse(&String::from_utf8_lossy(&bytes)))
    }

    /// Find the expected digest for `file_name`.
    ///
    /// The first matching line wins; later lines are never consulted.
    #[must_use]
    pub fn lookup(&self, file_name: &str, mode: ManifestMatch) -> Option<ManifestEntry<'_>> {
        if file_name.is_empty() {
            return None;
        }
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line_matches(line, file_name, mode))
            .find_map(|(index, line)| {
                line.split_whitespace()
                    .next()
                    .map(|digest_token| ManifestEntry {
                        digest_token,
                        line_number: index + 1,
                    })
            })
    }

    /// Return the number of lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Return true if the manifest has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

fn line_matches(line: &str, file_name: &str, mode: ManifestMatch) -> bool {
    match mode {
        ManifestMatch::Substring => line.contains(file_name),
        ManifestMatch::ExactField => line
            .split_whitespace()
            .nth(1)
            .map(|field| field.strip_prefix('*').unwrap_or(field))
            .is_some_and(|field| field == file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sha256_hex;
    use rstest::rstest;

    fn write_temp(contents: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("payload.bin");
        std::fs::write(&path, contents).expect("write payload");
        (temp, path)
    }

    fn flip_first_bit(digest: &Sha256Digest) -> Sha256Digest {
        let mut chars: Vec<char> = digest.as_str().chars().collect();
        let first = chars.first().copied().expect("non-empty digest");
        let value = first.to_digit(16).expect("hex digit") ^ 1;
        chars[0] = char::from_digit(value, 16).expect("hex digit");
        Sha256Digest::try_from(chars.into_iter().collect::<String>()).expect("valid digest")
    }

    #[rstest]
    #[case::empty(b"".as_slice())]
    #[case::short(b"hello world".as_slice())]
    #[case::spans_many_chunks(&[7u8; READ_CHUNK * 3 + 17])]
    fn digest_matches_one_shot_hash(#[case] contents: &[u8]) {
        let (_temp, path) = write_temp(contents);
        let digest = ChecksumVerifier.digest(&path).expect("digest");
        assert_eq!(digest.as_str(), sha256_hex(contents));
    }

    #[test]
    fn verify_accepts_own_digest_and_rejects_flipped_bit() {
        let (_temp, path) = write_temp(b"archive bytes");
        let digest = ChecksumVerifier.digest(&path).expect("digest");

        assert!(ChecksumVerifier.verify(&path, &digest));
        assert!(!ChecksumVerifier.verify(&path, &flip_first_bit(&digest)));
    }

    #[test]
    fn absent_file_is_a_negative_result() {
        let temp = tempfile::tempdir().expect("temp dir");
        let missing = temp.path().join("missing.zip");
        let digest = Sha256Digest::try_from("0".repeat(64)).expect("valid digest");

        assert!(!ChecksumVerifier.verify(&missing, &digest));
        assert_eq!(
            ChecksumVerifier.compare(&missing, &digest).expect("compare"),
            ChecksumComparison::Absent
        );
    }

    #[test]
    fn compare_reports_actual_digest_on_mismatch() {
        let (_temp, path) = write_temp(b"tampered");
        let expected = Sha256Digest::try_from("0".repeat(64)).expect("valid digest");
        let comparison = ChecksumVerifier.compare(&path, &expected).expect("compare");
        assert_eq!(
            comparison,
            ChecksumComparison::Mismatch {
                actual: Sha256Digest::try_from(sha256_hex(b"tampered")).expect("valid"),
            }
        );
    }

    #[test]
    fn lookup_finds_single_entry() {
        let manifest = ChecksumManifest::from_lines([
            "1111  httpd-2.4.62-win64.zip",
            "2222  php-8.3.10-Win32-vs16-x64.zip",
        ]);
        let entry = manifest
            .lookup("php-8.3.10-Win32-vs16-x64.zip", ManifestMatch::Substring)
            .expect("entry");
        assert_eq!(entry.digest_token, "2222");
    }

    #[test]
    fn substring_lookup_returns_first_of_several_matches() {
        // Inherited tie-break: the first line mentioning the name wins,
        // even when it belongs to a longer file name.
        let manifest = ChecksumManifest::from_lines([
            "aaaa  php-8.3.zip.asc",
            "bbbb  php-8.3.zip",
        ]);
        let entry = manifest
            .lookup("php-8.3.zip", ManifestMatch::Substring)
            .expect("entry");
        assert_eq!(entry.digest_token, "aaaa");
        assert_eq!(entry.line_number, 1);
    }

    #[test]
    fn exact_lookup_skips_longer_names_and_binary_marker() {
        let manifest = ChecksumManifest::from_lines([
            "aaaa  php-8.3.zip.asc",
            "bbbb *php-8.3.zip",
        ]);
        let entry = manifest
            .lookup("php-8.3.zip", ManifestMatch::ExactField)
            .expect("entry");
        assert_eq!(entry.digest_token, "bbbb");
    }

    #[rstest]
    #[case::substring(ManifestMatch::Substring)]
    #[case::exact(ManifestMatch::ExactField)]
    fn lookup_misses_absent_names(#[case] mode: ManifestMatch) {
        let manifest = ChecksumManifest::parse("aaaa  other.zip\n\n");
        assert!(manifest.lookup("php.zip", mode).is_none());
        assert!(manifest.lookup("", mode).is_none());
    }

    #[test]
    fn read_tolerates_invalid_utf8() {
        let (_temp, path) = write_temp(b"cccc  app.zip\n\xff\xfe junk\n");
        let manifest = ChecksumManifest::read(&path).expect("read manifest");
        assert_eq!(manifest.len(), 2);
        assert_eq!(
            manifest
                .lookup("app.zip", ManifestMatch::Substring)
                .map(|e| e.digest_token),
            Some("cccc")
        );
    }
}
