//! In-memory configuration document with backup and atomic flush.

use super::injected::{INJECTED_HEADER, InjectedBlock};
use super::rules::RuleSet;
use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use std::io::{self, Write};

/// Return the backup location for `path`: the same path with `.backup`
/// appended.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::patch::document::backup_path_for;
/// use camino::Utf8Path;
///
/// assert_eq!(
///     backup_path_for(Utf8Path::new("/etc/httpd/httpd.conf")),
///     "/etc/httpd/httpd.conf.backup"
/// );
/// ```
#[must_use]
pub fn backup_path_for(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}.backup"))
}

/// Copy `path` to its backup location, replacing any earlier backup.
///
/// # Errors
///
/// Returns the I/O error from the copy.
pub fn write_backup(path: &Utf8Path) -> io::Result<Utf8PathBuf> {
    let backup = backup_path_for(path);
    std::fs::copy(path, &backup)?;
    debug!("backed up {path} to {backup}");
    Ok(backup)
}

/// A text configuration file held as lines with their terminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDocument {
    path: Utf8PathBuf,
    lines: Vec<String>,
}

impl ConfigDocument {
    /// Read the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be read or is not UTF-8.
    pub fn read(path: &Utf8Path) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_text(path, &text))
    }

    /// Build a document from `text` as if read from `path`.
    #[must_use]
    pub fn from_text(path: &Utf8Path, text: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            lines: text.split_inclusive('\n').map(str::to_owned).collect(),
        }
    }

    /// Return the document's path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Return the lines, each with its original terminator.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Return whether a line equal to the injected header already exists.
    #[must_use]
    pub fn has_injected_block(&self) -> bool {
        self.lines.iter().any(|line| line.trim() == INJECTED_HEADER)
    }

    /// Rewrite every line matched by `rules` and return the number of
    /// rewritten lines.
    ///
    /// A rewritten line keeps a CRLF terminator if it had one and gains
    /// `\n` otherwise. Unmatched lines are left byte-identical.
    pub fn apply(&mut self, rules: &RuleSet) -> usize {
        let mut rewritten = 0;
        for line in &mut self.lines {
            let Some(rule) = rules.first_match(line) else {
                continue;
            };
            let ending = if line.ends_with("\r\n") { "\r\n" } else { "\n" };
            debug!("rule {} rewrites {:?}", rule.name(), line.trim_end());
            *line = format!("{}{ending}", rule.replacement());
            rewritten += 1;
        }
        rewritten
    }

    /// Append `block` after the last line.
    pub fn append(&mut self, block: &InjectedBlock) {
        self.lines.push(block.render());
    }

    /// Return the full document text.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.concat()
    }

    /// Replace the file on disk with this document.
    ///
    /// The text is written to a temporary file in the same directory, which
    /// then replaces the original in one rename. The original permissions
    /// are kept when they can be read.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from writing or renaming.
    pub fn flush(&self) -> io::Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        let mut staged = tempfile::NamedTempFile::new_in(parent)?;
        staged.write_all(self.text().as_bytes())?;
        staged.as_file().sync_all()?;
        if let Ok(metadata) = std::fs::metadata(&self.path) {
            std::fs::set_permissions(staged.path(), metadata.permissions())?;
        }
        staged.persist(&self.path).map_err(|err| err.error)?;
        debug!("wrote {}", self.path);
        Ok(())
    }
}
