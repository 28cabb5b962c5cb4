//! Idempotent rewriting of the web server configuration.
//!
//! A patch pass backs the document up to `<path>.backup`, rewrites the
//! directive lines recognised by a [`RuleSet`], appends an
//! [`InjectedBlock`] and replaces the file atomically. The backup is the
//! only rollback mechanism: there is no transactional rewrite, and two runs
//! patching the same file concurrently must be serialised by the caller.
//!
//! # Sub-modules
//!
//! - [`spec`] - Caller-supplied settings (`PatchSpec`, `ListenPort`).
//! - [`rules`] - Prefix-matched directive rewrites.
//! - [`injected`] - The appended directive block.
//! - [`document`] - Line-preserving document with backup and atomic flush.

pub mod document;
pub mod injected;
pub mod rules;
pub mod spec;

use camino::{Utf8Path, Utf8PathBuf};
use document::{ConfigDocument, backup_path_for, write_backup};
use injected::InjectedBlock;
use log::{info, warn};
use rules::RuleSet;
use serde::Serialize;
use std::collections::HashSet;
use std::io;

/// Errors raised by a patch pass.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// The document could not be copied to its backup location.
    #[error("failed to back up {path}: {source}")]
    Backup {
        /// The document path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The document could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The document path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The rewritten document could not be written back.
    #[error("failed to write {path}: {source}")]
    Write {
        /// The document path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// What a patch pass changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    /// The patched document.
    pub config_path: Utf8PathBuf,
    /// Where the pre-patch document was copied.
    pub backup_path: Utf8PathBuf,
    /// False when an earlier pass by the same patcher already wrote the
    /// backup.
    pub backup_created: bool,
    /// Number of directive lines rewritten.
    pub rewritten_lines: usize,
    /// True when the document already carried an injected block before
    /// this pass appended another one.
    pub injected_block_already_present: bool,
}

/// Applies rule sets and injected blocks to configuration documents.
///
/// The patcher remembers which documents it has backed up. Patching the
/// same path twice with one patcher keeps the first backup, so it still
/// holds the original document. A document that already carries an
/// injected block from an earlier run keeps its existing backup as well.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::patch::ConfigPatcher;
/// use artefact_provisioner::patch::injected::InjectedBlock;
/// use artefact_provisioner::patch::rules::{DirectiveRule, RuleSet};
/// use camino::Utf8PathBuf;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = Utf8PathBuf::from_path_buf(dir.path().join("httpd.conf")).unwrap();
/// std::fs::write(&path, "Listen 80\n").unwrap();
///
/// let rules = RuleSet::new(vec![DirectiveRule::new("listen", "Listen ", "Listen 8080")]);
/// let report = ConfigPatcher::new()
///     .patch(&path, &rules, &InjectedBlock::new(["ServerTokens Prod"]))
///     .unwrap();
///
/// assert_eq!(report.rewritten_lines, 1);
/// assert_eq!(
///     std::fs::read_to_string(&path).unwrap(),
///     "Listen 8080\n\n# PHP Configuration\nServerTokens Prod\n"
/// );
/// ```
#[derive(Debug, Default)]
pub struct ConfigPatcher {
    backed_up: HashSet<Utf8PathBuf>,
}

impl ConfigPatcher {
    /// Create a patcher that has not backed anything up yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Back up, rewrite and extend the document at `document_path`.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Backup`] before touching the document if the
    /// backup copy fails, and [`PatchError::Read`] or [`PatchError::Write`]
    /// for later failures. The backup stays in place in every case.
    pub fn patch(
        &mut self,
        document_path: &Utf8Path,
        rules: &RuleSet,
        injected: &InjectedBlock,
    ) -> Result<PatchReport, PatchError> {
        let (backup_path, backup_created) = self.ensure_backup(document_path)?;

        let mut document = ConfigDocument::read(document_path).map_err(|source| PatchError::Read {
            path: document_path.to_path_buf(),
            source,
        })?;
        let injected_block_already_present = document.has_injected_block();
        if injected_block_already_present {
            warn!("{document_path} already contains an injected block; appending another");
        }

        let rewritten_lines = document.apply(rules);
        document.append(injected);
        document.flush().map_err(|source| PatchError::Write {
            path: document_path.to_path_buf(),
            source,
        })?;
        info!("patched {document_path}: {rewritten_lines} directive lines rewritten");

        Ok(PatchReport {
            config_path: document_path.to_path_buf(),
            backup_path,
            backup_created,
            rewritten_lines,
            injected_block_already_present,
        })
    }

    fn ensure_backup(&mut self, path: &Utf8Path) -> Result<(Utf8PathBuf, bool), PatchError> {
        if self.backed_up.contains(path) {
            return Ok((backup_path_for(path), false));
        }
        let existing = backup_path_for(path);
        if existing.is_file() && already_patched(path) {
            info!("{path} was patched by an earlier run; keeping {existing}");
            self.backed_up.insert(path.to_path_buf());
            return Ok((existing, false));
        }
        let backup = write_backup(path).map_err(|source| PatchError::Backup {
            path: path.to_path_buf(),
            source,
        })?;
        self.backed_up.insert(path.to_path_buf());
        Ok((backup, true))
    }
}

/// Return whether the document at `path` already carries an injected
/// block. Unreadable documents count as unpatched.
fn already_patched(path: &Utf8Path) -> bool {
    ConfigDocument::read(path).is_ok_and(|document| document.has_injected_block())
}
