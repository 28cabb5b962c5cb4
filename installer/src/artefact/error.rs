//! Error types for artefact source and digest validation.
//!
//! Each variant provides a descriptive message identifying the invalid input
//! and the constraint that was violated.

use thiserror::Error;

/// Errors arising from invalid artefact-related values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtefactError {
    /// A URL has no final path segment to name the local file after.
    #[error("cannot derive a file name from URL \"{url}\"")]
    UnnamedUrl {
        /// The rejected URL.
        url: String,
    },

    /// A key fingerprint is empty or contains characters other than hex
    /// digits (an optional `0x` prefix and embedded spaces are accepted).
    #[error("invalid key fingerprint \"{value}\": {reason}")]
    InvalidFingerprint {
        /// The rejected fingerprint string.
        value: String,
        /// Description of the validation failure.
        reason: String,
    },

    /// The source asks for a manifest signature but names no manifest.
    #[error("source {url} signs its checksum manifest but has no checksum_manifest_url")]
    SignedManifestMissing {
        /// The artefact URL of the offending source.
        url: String,
    },

    /// A SHA-256 digest is not a valid 64-character hex string.
    #[error("invalid SHA-256 digest: {reason}")]
    InvalidSha256Digest {
        /// Description of the validation failure.
        reason: String,
    },
}

/// Result type alias using [`ArtefactError`].
pub type Result<T> = std::result::Result<T, ArtefactError>;
