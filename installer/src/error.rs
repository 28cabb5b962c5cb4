//! Error types for a provisioning run.
//!
//! Every fatal condition names the artefact and the pipeline stage it
//! happened in, so an operator can tell which download or which step to
//! look at. [`ProvisionError::category`] groups failures the way retry and
//! reporting decisions need them.

use crate::artefact::download::DownloadError;
use crate::artefact::extraction::ExtractionError;
use crate::artefact::verification::{VerificationError, VerificationOutcome};
use crate::config::ConfigError;
use crate::patch::PatchError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A step of the per-artefact pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Downloading the artefact.
    Fetch,
    /// Checking checksum and signature.
    Verify,
    /// Unpacking into the destination.
    Materialize,
    /// Rewriting the server configuration.
    Patch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Verify => "verify",
            Self::Materialize => "materialize",
            Self::Patch => "patch",
        })
    }
}

/// Broad failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Network or transfer failure that outlasted the retry policy.
    Transient,
    /// Checksum, signature or key problem. Never retried.
    IntegrityFailure,
    /// The archive could not be unpacked.
    CorruptArchive,
    /// A local file operation failed.
    IoFailure,
    /// The run was cancelled.
    Cancelled,
    /// The configuration or command line is invalid.
    Configuration,
}

/// Errors that abort a provisioning run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The artefact could not be downloaded within the retry policy.
    #[error("fetching {artefact} failed after {attempts} attempts: {source}")]
    FetchExhausted {
        /// File name of the artefact.
        artefact: String,
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        source: DownloadError,
    },

    /// The artefact failed verification.
    #[error("{artefact} failed verification: {outcome}")]
    Integrity {
        /// File name of the artefact.
        artefact: String,
        /// The failing verdict.
        outcome: VerificationOutcome,
    },

    /// Verification could not reach a verdict.
    #[error("verifying {artefact} failed: {source}")]
    VerificationIncomplete {
        /// File name of the artefact.
        artefact: String,
        /// What stopped verification.
        #[source]
        source: Box<VerificationError>,
    },

    /// The artefact could not be unpacked.
    #[error("materializing {artefact} failed: {source}")]
    CorruptArchive {
        /// File name of the artefact.
        artefact: String,
        /// The extraction error.
        #[source]
        source: ExtractionError,
    },

    /// The configuration patch pass failed.
    #[error("patching the server configuration failed: {0}")]
    PatchIo(#[source] PatchError),

    /// The run was cancelled before `stage` could start or finish.
    #[error("{} cancelled during {stage}", artefact.as_deref().unwrap_or("run"))]
    Cancelled {
        /// The stage that was about to run.
        stage: Stage,
        /// The artefact being processed, if any.
        artefact: Option<String>,
    },

    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A working directory could not be prepared.
    #[error("failed to prepare {}: {source}", path.display())]
    Io {
        /// The directory involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    /// Return the failure class.
    ///
    /// # Examples
    ///
    /// ```
    /// use artefact_provisioner::error::{ErrorCategory, ProvisionError, Stage};
    ///
    /// let err = ProvisionError::Cancelled { stage: Stage::Fetch, artefact: None };
    /// assert_eq!(err.category(), ErrorCategory::Cancelled);
    /// ```
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::FetchExhausted { .. } => ErrorCategory::Transient,
            Self::Integrity { .. } => ErrorCategory::IntegrityFailure,
            Self::VerificationIncomplete { source, .. } => match source.as_ref() {
                VerificationError::Fetch { .. } => ErrorCategory::Transient,
                VerificationError::ManifestRead { .. } | VerificationError::ArtefactMissing { .. } => {
                    ErrorCategory::IoFailure
                }
                _ => ErrorCategory::IntegrityFailure,
            },
            Self::CorruptArchive { source, .. } => match source {
                ExtractionError::Io(_) => ErrorCategory::IoFailure,
                _ => ErrorCategory::CorruptArchive,
            },
            Self::PatchIo(_) | Self::Io { .. } => ErrorCategory::IoFailure,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::Config(_) => ErrorCategory::Configuration,
        }
    }

    /// Return the pipeline stage the failure belongs to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::FetchExhausted { .. } => Some(Stage::Fetch),
            Self::Integrity { .. } | Self::VerificationIncomplete { .. } => Some(Stage::Verify),
            Self::CorruptArchive { .. } => Some(Stage::Materialize),
            Self::PatchIo(_) => Some(Stage::Patch),
            Self::Cancelled { stage, .. } => Some(*stage),
            Self::Config(_) | Self::Io { .. } => None,
        }
    }

    /// Return the file name of the artefact involved, if any.
    #[must_use]
    pub fn artefact(&self) -> Option<&str> {
        match self {
            Self::FetchExhausted { artefact, .. }
            | Self::Integrity { artefact, .. }
            | Self::VerificationIncomplete { artefact, .. }
            | Self::CorruptArchive { artefact, .. } => Some(artefact),
            Self::Cancelled { artefact, .. } => artefact.as_deref(),
            Self::PatchIo(_) | Self::Config(_) | Self::Io { .. } => None,
        }
    }
}

/// Result type alias using [`ProvisionError`].
pub type Result<T> = std::result::Result<T, ProvisionError>;
