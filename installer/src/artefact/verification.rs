//! Layered integrity verification for fetched artefacts.
//!
//! Verification runs in a fixed order: checksum manifest, then key import,
//! then detached signature. Each stage only runs when the source carries
//! the material for it. What happens when material is absent is decided by
//! an explicit [`VerificationPolicy`] the caller must supply; there is no
//! default. A policy that requires nothing reproduces the historical
//! behaviour of accepting unverified artefacts, and a warning is logged
//! whenever that happens.

use super::checksum::{ChecksumComparison, ChecksumError, ChecksumManifest, ChecksumVerifier, ManifestMatch};
use super::cleanup::TransientFiles;
use super::download::{FetchError, FetchResult, RetryingFetcher};
use super::sha256_digest::Sha256Digest;
use super::signature::{SignatureError, SignatureVerifier};
use super::source::{ArtefactSource, KeyFingerprint, SignedFile, file_name_from_url};
use log::{info, warn};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Rules for artefacts that lack verification material.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::artefact::verification::VerificationPolicy;
///
/// let policy = VerificationPolicy::strict();
/// assert!(policy.require_checksum());
/// assert!(policy.require_signature());
/// assert_eq!(policy.to_string(), "checksum required, signature required");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationPolicy {
    require_checksum: bool,
    require_signature: bool,
    #[serde(default)]
    manifest_match: ManifestMatch,
}

impl VerificationPolicy {
    /// Accept sources without verification material, verifying whatever
    /// material they do carry.
    #[must_use]
    pub const fn permissive() -> Self {
        Self {
            require_checksum: false,
            require_signature: false,
            manifest_match: ManifestMatch::Substring,
        }
    }

    /// Reject sources lacking either a checksum manifest or a signature.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            require_checksum: true,
            require_signature: true,
            manifest_match: ManifestMatch::Substring,
        }
    }

    /// Return a copy using `mode` for manifest lookups.
    #[must_use]
    pub const fn with_manifest_match(mut self, mode: ManifestMatch) -> Self {
        self.manifest_match = mode;
        self
    }

    /// Return whether a checksum manifest is mandatory.
    #[must_use]
    pub const fn require_checksum(&self) -> bool {
        self.require_checksum
    }

    /// Return whether a detached signature is mandatory.
    #[must_use]
    pub const fn require_signature(&self) -> bool {
        self.require_signature
    }

    /// Return how manifest lines are matched.
    #[must_use]
    pub const fn manifest_match(&self) -> ManifestMatch {
        self.manifest_match
    }
}

impl fmt::Display for VerificationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = |required| if required { "required" } else { "optional" };
        write!(
            f,
            "checksum {}, signature {}",
            word(self.require_checksum),
            word(self.require_signature)
        )
    }
}

/// The verdict on one fetched artefact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Every applicable stage passed.
    Verified,
    /// The archive does not hash to the manifest's digest.
    ChecksumMismatch {
        /// Digest token taken from the manifest.
        expected: String,
        /// Digest computed from the downloaded file.
        actual: String,
    },
    /// No checksum could be found for the file.
    ChecksumMissing {
        /// The file name that was looked up.
        file_name: String,
    },
    /// The signature is absent, bad, or made by an untrusted key.
    SignatureInvalid,
    /// A trusted key could not be imported.
    SignatureKeyUnavailable {
        /// The key that could not be imported.
        fingerprint: KeyFingerprint,
    },
}

impl VerificationOutcome {
    /// Return true for [`VerificationOutcome::Verified`].
    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified => f.write_str("verified"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            Self::ChecksumMissing { file_name } => {
                write!(f, "no checksum found for {file_name}")
            }
            Self::SignatureInvalid => f.write_str("signature invalid"),
            Self::SignatureKeyUnavailable { fingerprint } => {
                write!(f, "public key {fingerprint} unavailable")
            }
        }
    }
}

/// Problems that prevent a verdict from being reached at all.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// Verification material could not be fetched.
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        /// The manifest or signature URL.
        url: String,
        /// The retry failure.
        #[source]
        source: FetchError,
    },

    /// A verification URL has no usable file name.
    #[error(transparent)]
    Source(#[from] super::error::ArtefactError),

    /// The manifest could not be read after download.
    #[error("failed to read checksum manifest {}: {source}", path.display())]
    ManifestRead {
        /// The manifest path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The downloaded artefact vanished before it could be hashed.
    #[error("artefact {} disappeared before verification", path.display())]
    ArtefactMissing {
        /// The artefact path.
        path: PathBuf,
    },

    /// The artefact could not be hashed.
    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    /// The signature tool failed or the run was cancelled during import.
    #[error(transparent)]
    Signature(SignatureError),
}

/// Composes checksum and signature verification into one gate.
pub struct IntegrityVerifier<'a> {
    fetcher: &'a RetryingFetcher<'a>,
    signatures: &'a dyn SignatureVerifier,
    checksums: ChecksumVerifier,
    policy: VerificationPolicy,
}

impl<'a> IntegrityVerifier<'a> {
    /// Create a verifier.
    #[must_use]
    pub fn new(
        fetcher: &'a RetryingFetcher<'a>,
        signatures: &'a dyn SignatureVerifier,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            fetcher,
            signatures,
            checksums: ChecksumVerifier,
            policy,
        }
    }

    /// Return the active policy.
    #[must_use]
    pub fn policy(&self) -> VerificationPolicy {
        self.policy
    }

    /// Verify `fetched` against the material named by `source`.
    ///
    /// Manifest and signature files are downloaded next to the artefact and
    /// handed to `transient` for removal.
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError`] when a verdict cannot be reached, for
    /// example because the manifest cannot be fetched.
    pub fn verify(
        &self,
        fetched: &FetchResult,
        source: &ArtefactSource,
        transient: &mut TransientFiles,
    ) -> Result<VerificationOutcome, VerificationError> {
        if let Some(outcome) = self.check_policy(source) {
            return Ok(outcome);
        }
        if source.is_unverifiable() {
            warn!(
                "{} has no checksum manifest, signature or trusted key; accepting it unverified",
                source.file_name()
            );
            return Ok(VerificationOutcome::Verified);
        }

        let work_dir = fetched
            .local_path
            .parent()
            .map_or_else(PathBuf::new, Path::to_path_buf);

        let mut manifest_path = None;
        if let Some(url) = source.checksum_manifest_url() {
            let path = self.fetch_material(url, &work_dir, transient)?;
            let outcome = self.check_manifest(&path, fetched, source)?;
            if !outcome.is_verified() {
                return Ok(outcome);
            }
            manifest_path = Some(path);
        }

        for fingerprint in source.trusted_key_fingerprints() {
            match self.signatures.import_key(fingerprint) {
                Ok(()) => {}
                Err(SignatureError::KeyUnavailable { message, .. }) => {
                    warn!("{message}");
                    return Ok(VerificationOutcome::SignatureKeyUnavailable {
                        fingerprint: fingerprint.clone(),
                    });
                }
                Err(err) => return Err(VerificationError::Signature(err)),
            }
        }

        if let Some(url) = source.signature_url() {
            let signature_path = self.fetch_material(url, &work_dir, transient)?;
            let subject = match (source.signature_covers(), &manifest_path) {
                (SignedFile::Manifest, Some(path)) => path.as_path(),
                _ => fetched.local_path.as_path(),
            };
            let good = self
                .signatures
                .verify(subject, &signature_path, source.trusted_key_fingerprints())
                .map_err(VerificationError::Signature)?;
            if !good {
                return Ok(VerificationOutcome::SignatureInvalid);
            }
            info!("signature verified for {}", subject.display());
        }

        Ok(VerificationOutcome::Verified)
    }

    fn check_policy(&self, source: &ArtefactSource) -> Option<VerificationOutcome> {
        if self.policy.require_checksum && source.checksum_manifest_url().is_none() {
            warn!("{} has no checksum manifest but policy requires one", source);
            return Some(VerificationOutcome::ChecksumMissing {
                file_name: source.file_name().to_owned(),
            });
        }
        if self.policy.require_signature && source.signature_url().is_none() {
            warn!("{} has no signature but policy requires one", source);
            return Some(VerificationOutcome::SignatureInvalid);
        }
        None
    }

    fn fetch_material(
        &self,
        url: &str,
        work_dir: &Path,
        transient: &mut TransientFiles,
    ) -> Result<PathBuf, VerificationError> {
        let path = work_dir.join(file_name_from_url(url)?);
        transient.track(&path);
        self.fetcher
            .fetch(url, &path)
            .map_err(|source| VerificationError::Fetch {
                url: url.to_owned(),
                source,
            })?;
        Ok(path)
    }

    fn check_manifest(
        &self,
        manifest_path: &Path,
        fetched: &FetchResult,
        source: &ArtefactSource,
    ) -> Result<VerificationOutcome, VerificationError> {
        let manifest =
            ChecksumManifest::read(manifest_path).map_err(|err| VerificationError::ManifestRead {
                path: manifest_path.to_path_buf(),
                source: err,
            })?;
        let Some(entry) = manifest.lookup(source.file_name(), self.policy.manifest_match) else {
            return Ok(VerificationOutcome::ChecksumMissing {
                file_name: source.file_name().to_owned(),
            });
        };

        let Ok(expected) = Sha256Digest::parse_manifest_token(entry.digest_token) else {
            let actual = self.checksums.digest(&fetched.local_path)?;
            warn!(
                "manifest line {} has a malformed digest for {}",
                entry.line_number,
                source.file_name()
            );
            return Ok(VerificationOutcome::ChecksumMismatch {
                expected: entry.digest_token.to_owned(),
                actual: actual.into_inner(),
            });
        };

        match self.checksums.compare(&fetched.local_path, &expected)? {
            ChecksumComparison::Match => {
                info!("checksum verified for {}", source.file_name());
                Ok(VerificationOutcome::Verified)
            }
            ChecksumComparison::Mismatch { actual } => Ok(VerificationOutcome::ChecksumMismatch {
                expected: expected.into_inner(),
                actual: actual.into_inner(),
            }),
            ChecksumComparison::Absent => Err(VerificationError::ArtefactMissing {
                path: fetched.local_path.clone(),
            }),
        }
    }
}

#[cfg(test)]
#[path = "verification_tests.rs"]
mod tests;
