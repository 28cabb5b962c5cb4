//! Provisioning orchestration.
//!
//! For each artefact source in order the pipeline runs fetch, verify and
//! materialize, aborting on the first fatal failure. Sources that were
//! materialized before the failure stay in place. Once every source has
//! been handled, a single patch pass rewrites the server configuration.
//!
//! Downloaded files (archive, checksum manifest, detached signature) are
//! tracked by a [`TransientFiles`] guard per source and removed on every
//! exit path, including failures and cancellation.

use crate::artefact::cleanup::TransientFiles;
use crate::artefact::download::{ArtefactDownloader, FetchResult, RetryingFetcher};
use crate::artefact::extraction::ArtefactExtractor;
use crate::artefact::signature::{SignatureError, SignatureVerifier};
use crate::artefact::source::ArtefactSource;
use crate::artefact::verification::{IntegrityVerifier, VerificationError, VerificationPolicy};
use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, Result, Stage};
use crate::output::write_stderr_line;
use crate::patch::injected::InjectedBlock;
use crate::patch::rules::RuleSet;
use crate::patch::spec::PatchSpec;
use crate::patch::{ConfigPatcher, PatchReport};
use crate::retry::{CancellationToken, RetryError, RetryPolicy, Sleeper};
use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use serde::Serialize;
use std::io::Write;

/// The external collaborators a provisioning run drives.
///
/// Production code passes the HTTP downloader, zip extractor, `gpg`
/// verifier and a thread sleeper; tests inject doubles.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Transport used for every download.
    pub downloader: &'a dyn ArtefactDownloader,
    /// Archive unpacker.
    pub extractor: &'a dyn ArtefactExtractor,
    /// Key import and signature checks.
    pub signatures: &'a dyn SignatureVerifier,
    /// Delay between retry attempts.
    pub sleeper: &'a dyn Sleeper,
}

/// What to provision and where.
#[derive(Debug, Clone, Copy)]
pub struct ProvisionRequest<'a> {
    /// Sources to fetch, verify and unpack, in order.
    pub sources: &'a [ArtefactSource],
    /// Directory archives are extracted into.
    pub destination: &'a Utf8Path,
    /// Directory downloads are written to.
    pub download_dir: &'a Utf8Path,
    /// Directories whose joint presence means the stack is installed.
    pub installed_marker_dirs: &'a [Utf8PathBuf],
    /// Configuration file to patch.
    pub config_path: &'a Utf8Path,
    /// Settings for the patch pass.
    pub patch: &'a PatchSpec,
    /// Provision even when the stack is already installed.
    pub force: bool,
}

impl<'a> ProvisionRequest<'a> {
    /// Build a request from loaded configuration.
    #[must_use]
    pub fn from_config(config: &'a ProvisionConfig, force: bool) -> Self {
        Self {
            sources: &config.artefacts,
            destination: &config.install_dir,
            download_dir: &config.download_dir,
            installed_marker_dirs: &config.installed_marker_dirs,
            config_path: &config.config_path,
            patch: &config.patch,
            force,
        }
    }

    /// Return whether every installed-marker directory exists.
    ///
    /// An empty marker list never counts as installed.
    #[must_use]
    pub fn already_installed(&self) -> bool {
        !self.installed_marker_dirs.is_empty()
            && self.installed_marker_dirs.iter().all(|dir| dir.is_dir())
    }
}

/// Per-artefact entry of the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtefactReport {
    /// File name derived from the primary URL.
    pub file_name: String,
    /// Size of the downloaded archive.
    pub byte_size: u64,
    /// Attempt on which the download succeeded.
    pub attempt_count: u32,
    /// Verification verdict.
    pub verification: String,
    /// Number of files extracted.
    pub extracted_entries: usize,
}

/// Terminal report of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionOutcome {
    /// True when fetching and extraction were skipped because the stack was
    /// already installed.
    pub skipped_install: bool,
    /// One entry per provisioned artefact.
    pub artefacts: Vec<ArtefactReport>,
    /// The patch pass.
    pub patch: PatchReport,
}

/// Drives sources through fetch, verify and materialize, then patches.
pub struct Provisioner<'a> {
    collaborators: Collaborators<'a>,
    retry: RetryPolicy,
    verification: VerificationPolicy,
    cancel: CancellationToken,
    patcher: ConfigPatcher,
    quiet: bool,
}

impl<'a> Provisioner<'a> {
    /// Create a provisioner.
    #[must_use]
    pub fn new(
        collaborators: Collaborators<'a>,
        retry: RetryPolicy,
        verification: VerificationPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            collaborators,
            retry,
            verification,
            cancel,
            patcher: ConfigPatcher::new(),
            quiet: false,
        }
    }

    /// Suppress progress lines.
    #[must_use]
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Provision every source in `request`, then patch the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first fatal [`ProvisionError`]; no later source is
    /// processed and the patch pass does not run.
    pub fn provision(
        &mut self,
        request: &ProvisionRequest<'_>,
        stderr: &mut dyn Write,
    ) -> Result<ProvisionOutcome> {
        let skipped_install = !request.force && request.already_installed();
        let mut artefacts = Vec::new();

        if skipped_install {
            info!("all installed-marker directories exist; skipping fetch and extraction");
            self.progress(stderr, "Already installed; skipping downloads.");
        } else {
            std::fs::create_dir_all(request.download_dir).map_err(|source| ProvisionError::Io {
                path: request.download_dir.as_std_path().to_path_buf(),
                source,
            })?;
            for source in request.sources {
                artefacts.push(self.provision_source(source, request, stderr)?);
            }
        }

        self.check_cancelled(Stage::Patch, None)?;
        self.progress(stderr, format!("Patching {}...", request.config_path));
        let patch = self
            .patcher
            .patch(
                request.config_path,
                &RuleSet::apache(request.patch),
                &InjectedBlock::php(request.patch),
            )
            .map_err(ProvisionError::PatchIo)?;

        Ok(ProvisionOutcome {
            skipped_install,
            artefacts,
            patch,
        })
    }

    fn provision_source(
        &self,
        source: &ArtefactSource,
        request: &ProvisionRequest<'_>,
        stderr: &mut dyn Write,
    ) -> Result<ArtefactReport> {
        let name = source.file_name();
        let mut transient = TransientFiles::new();
        let local_path = request.download_dir.join(name);
        transient.track(&local_path);

        self.check_cancelled(Stage::Fetch, Some(name))?;
        self.progress(stderr, format!("Downloading {name}..."));
        let fetcher = RetryingFetcher::new(
            self.collaborators.downloader,
            self.collaborators.sleeper,
            self.retry,
            self.cancel.clone(),
        );
        let fetched = fetch_artefact(&fetcher, source, local_path.as_std_path())?;

        self.check_cancelled(Stage::Verify, Some(name))?;
        self.progress(stderr, format!("Verifying {name}..."));
        let verifier =
            IntegrityVerifier::new(&fetcher, self.collaborators.signatures, self.verification);
        let outcome = verifier
            .verify(&fetched, source, &mut transient)
            .map_err(|err| verification_failure(name, err))?;
        if !outcome.is_verified() {
            return Err(ProvisionError::Integrity {
                artefact: name.to_owned(),
                outcome,
            });
        }

        self.check_cancelled(Stage::Materialize, Some(name))?;
        self.progress(stderr, format!("Extracting {name} into {}...", request.destination));
        let extracted = self
            .collaborators
            .extractor
            .extract(&fetched.local_path, request.destination.as_std_path())
            .map_err(|source| ProvisionError::CorruptArchive {
                artefact: name.to_owned(),
                source,
            })?;
        transient.release();

        Ok(ArtefactReport {
            file_name: name.to_owned(),
            byte_size: fetched.byte_size,
            attempt_count: fetched.attempt_count,
            verification: outcome.to_string(),
            extracted_entries: extracted.len(),
        })
    }

    fn check_cancelled(&self, stage: Stage, artefact: Option<&str>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled {
                stage,
                artefact: artefact.map(str::to_owned),
            });
        }
        Ok(())
    }

    fn progress(&self, stderr: &mut dyn Write, message: impl std::fmt::Display) {
        if !self.quiet {
            write_stderr_line(stderr, message);
        }
    }
}

fn fetch_artefact(
    fetcher: &RetryingFetcher<'_>,
    source: &ArtefactSource,
    local_path: &std::path::Path,
) -> Result<FetchResult> {
    let name = source.file_name();
    fetcher
        .fetch(source.primary_url(), local_path)
        .map_err(|err| match err {
            RetryError::Exhausted { attempts, last } => ProvisionError::FetchExhausted {
                artefact: name.to_owned(),
                attempts,
                source: last,
            },
            RetryError::Cancelled { .. } => ProvisionError::Cancelled {
                stage: Stage::Fetch,
                artefact: Some(name.to_owned()),
            },
        })
}

fn verification_failure(name: &str, err: VerificationError) -> ProvisionError {
    match err {
        VerificationError::Fetch {
            source: RetryError::Cancelled { .. },
            ..
        }
        | VerificationError::Signature(SignatureError::Cancelled { .. }) => {
            ProvisionError::Cancelled {
                stage: Stage::Verify,
                artefact: Some(name.to_owned()),
            }
        }
        other => ProvisionError::VerificationIncomplete {
            artefact: name.to_owned(),
            source: Box::new(other),
        },
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
