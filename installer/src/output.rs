//! Output formatting for the provisioner CLI.
//!
//! Progress and summary lines are written to an injected stderr handle so
//! tests can capture them. The machine-readable run report is JSON written
//! to whatever sink the caller passes, normally stdout.

use crate::artefact::source::ArtefactSource;
use crate::config::ProvisionConfig;
use crate::error::{ErrorCategory, ProvisionError, Stage};
use crate::pipeline::{ProvisionOutcome, ProvisionRequest};
use camino::Utf8Path;
use serde::Serialize;
use std::fmt::Display;
use std::io::{self, Write};

/// Write one line to `stderr`, ignoring write failures.
///
/// # Example
///
/// ```
/// use artefact_provisioner::output::write_stderr_line;
///
/// let mut stderr = Vec::new();
/// write_stderr_line(&mut stderr, "Downloading php.zip...");
/// assert_eq!(stderr, b"Downloading php.zip...\n");
/// ```
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort logging; ignore write failures.
    }
}

/// Format the summary printed after a successful run.
#[must_use]
pub fn success_message(outcome: &ProvisionOutcome) -> String {
    let patched = format!(
        "patched {} ({} {} rewritten, backup at {})",
        outcome.patch.config_path,
        outcome.patch.rewritten_lines,
        if outcome.patch.rewritten_lines == 1 { "line" } else { "lines" },
        outcome.patch.backup_path,
    );
    if outcome.skipped_install {
        return format!("Already installed; {patched}");
    }
    let count = outcome.artefacts.len();
    let plural = if count == 1 { "artefact" } else { "artefacts" };
    format!("Successfully provisioned {count} {plural}; {patched}")
}

/// Describe a source's verification material for the dry-run plan.
fn verification_material(source: &ArtefactSource) -> String {
    let mut parts = Vec::new();
    if source.checksum_manifest_url().is_some() {
        parts.push("checksum manifest".to_owned());
    }
    if source.signature_url().is_some() {
        parts.push(format!("signature over {}", source.signature_covers()));
    }
    let keys = source.trusted_key_fingerprints().len();
    if keys > 0 {
        parts.push(format!("{keys} trusted key(s)"));
    }
    if parts.is_empty() {
        "unverified".to_owned()
    } else {
        parts.join(", ")
    }
}

/// Settings shown by `--dry-run`.
///
/// # Example
///
/// ```no_run
/// use artefact_provisioner::config::{ProvisionConfig, SystemBaseDirs};
/// use artefact_provisioner::output::DryRunInfo;
/// use camino::Utf8Path;
///
/// let path = Utf8Path::new("provision.toml");
/// let config = ProvisionConfig::load(path, &SystemBaseDirs)?;
/// let info = DryRunInfo { config_file: path, config: &config, force: false };
/// assert!(info.display_text().starts_with("Dry run"));
/// # Ok::<(), artefact_provisioner::config::ConfigError>(())
/// ```
#[derive(Debug)]
pub struct DryRunInfo<'a> {
    /// The configuration file that was loaded.
    pub config_file: &'a Utf8Path,
    /// The effective configuration, overrides applied.
    pub config: &'a ProvisionConfig,
    /// Whether `--force` was given.
    pub force: bool,
}

impl DryRunInfo<'_> {
    /// Format the plan for display.
    #[must_use]
    pub fn display_text(&self) -> String {
        let config = self.config;
        let installed = ProvisionRequest::from_config(config, self.force).already_installed();
        let mut lines = vec![
            "Dry run - no files will be modified".to_owned(),
            String::new(),
            format!("Configuration file: {}", self.config_file),
            format!("Install directory: {}", config.install_dir),
            format!("Download directory: {}", config.download_dir),
            format!("Server configuration: {}", config.config_path),
            format!("Listen port: {}", config.patch.listen_port()),
            format!("Document root: {}", config.patch.document_root()),
            format!("PHP ini directory: {}", config.patch.config_search_dir()),
            format!("PHP module: {}", config.patch.module_path()),
            format!("Verification: {}", config.verification),
            format!(
                "Retry: {} attempt(s), {:?} apart",
                config.retry.max_attempts(),
                config.retry.delay()
            ),
            format!("Keyserver: {}", config.keyserver),
            format!("Force: {}", self.force),
            format!("Already installed: {installed}"),
            String::new(),
        ];

        if config.artefacts.is_empty() {
            lines.push("Artefacts: (none)".to_owned());
        } else {
            lines.push("Artefacts:".to_owned());
            for source in &config.artefacts {
                lines.push(format!(
                    "  - {} ({})",
                    source.file_name(),
                    verification_material(source)
                ));
            }
        }

        lines.join("\n")
    }
}

/// JSON shape of a failed run.
#[derive(Debug, Serialize)]
struct ErrorReport<'a> {
    status: &'static str,
    category: ErrorCategory,
    stage: Option<Stage>,
    artefact: Option<&'a str>,
    message: String,
}

/// JSON shape of a successful run.
#[derive(Debug, Serialize)]
struct SuccessReport<'a> {
    status: &'static str,
    #[serde(flatten)]
    outcome: &'a ProvisionOutcome,
}

/// Write the run report for `outcome` as pretty-printed JSON.
///
/// # Errors
///
/// Returns any error raised while serialising or writing to `out`.
pub fn write_json_report(out: &mut dyn Write, outcome: &ProvisionOutcome) -> io::Result<()> {
    let report = SuccessReport {
        status: "ok",
        outcome,
    };
    serde_json::to_writer_pretty(&mut *out, &report)?;
    writeln!(out)
}

/// Write a JSON description of a failed run.
///
/// # Errors
///
/// Returns any error raised while serialising or writing to `out`.
pub fn write_json_error(out: &mut dyn Write, err: &ProvisionError) -> io::Result<()> {
    let report = ErrorReport {
        status: "failed",
        category: err.category(),
        stage: err.stage(),
        artefact: err.artefact(),
        message: err.to_string(),
    };
    serde_json::to_writer_pretty(&mut *out, &report)?;
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchReport;
    use crate::pipeline::ArtefactReport;
    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};

    #[fixture]
    fn patch_report() -> PatchReport {
        PatchReport {
            config_path: Utf8PathBuf::from("/opt/stack/Apache24/conf/httpd.conf"),
            backup_path: Utf8PathBuf::from("/opt/stack/Apache24/conf/httpd.conf.bak"),
            backup_created: true,
            rewritten_lines: 4,
            injected_block_already_present: false,
        }
    }

    fn artefact(name: &str) -> ArtefactReport {
        ArtefactReport {
            file_name: name.to_owned(),
            byte_size: 1024,
            attempt_count: 2,
            verification: "verified".to_owned(),
            extracted_entries: 7,
        }
    }

    #[rstest]
    #[case::single(vec![artefact("php.zip")], "1 artefact;")]
    #[case::several(vec![artefact("php.zip"), artefact("httpd.zip")], "2 artefacts;")]
    fn success_message_counts_artefacts(
        patch_report: PatchReport,
        #[case] artefacts: Vec<ArtefactReport>,
        #[case] expected: &str,
    ) {
        let outcome = ProvisionOutcome {
            skipped_install: false,
            artefacts,
            patch: patch_report,
        };
        let message = success_message(&outcome);
        assert!(message.contains(expected), "{message}");
        assert!(message.contains("4 lines rewritten"), "{message}");
        assert!(message.contains("httpd.conf.bak"), "{message}");
    }

    #[rstest]
    fn success_message_reports_skipped_install(mut patch_report: PatchReport) {
        patch_report.rewritten_lines = 1;
        let outcome = ProvisionOutcome {
            skipped_install: true,
            artefacts: Vec::new(),
            patch: patch_report,
        };
        let message = success_message(&outcome);
        assert!(message.starts_with("Already installed;"), "{message}");
        assert!(message.contains("1 line rewritten"), "{message}");
    }

    #[rstest]
    fn json_report_flattens_outcome(patch_report: PatchReport) {
        let outcome = ProvisionOutcome {
            skipped_install: false,
            artefacts: vec![artefact("php.zip")],
            patch: patch_report,
        };
        let mut out = Vec::new();
        write_json_report(&mut out, &outcome).expect("write report");

        let value: serde_json::Value = serde_json::from_slice(&out).expect("valid json");
        assert_eq!(value["status"], "ok");
        assert_eq!(value["skipped_install"], false);
        assert_eq!(value["artefacts"][0]["file_name"], "php.zip");
        assert_eq!(value["artefacts"][0]["attempt_count"], 2);
        assert_eq!(value["patch"]["rewritten_lines"], 4);
    }

    #[test]
    fn json_error_names_stage_and_artefact() {
        let err = ProvisionError::Cancelled {
            stage: Stage::Materialize,
            artefact: Some("php.zip".to_owned()),
        };
        let mut out = Vec::new();
        write_json_error(&mut out, &err).expect("write report");

        let value: serde_json::Value = serde_json::from_slice(&out).expect("valid json");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["category"], "cancelled");
        assert_eq!(value["stage"], "materialize");
        assert_eq!(value["artefact"], "php.zip");
    }

    #[test]
    fn write_stderr_line_ignores_broken_sinks() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        write_stderr_line(&mut Broken, "ignored");
    }

    #[test]
    fn unverified_sources_are_labelled() {
        let source = ArtefactSource::builder("https://x.test/httpd.zip")
            .build()
            .expect("source");
        assert_eq!(verification_material(&source), "unverified");

        let signed = ArtefactSource::builder("https://x.test/php.zip")
            .checksum_manifest("https://x.test/SUMS")
            .signature("https://x.test/php.zip.asc")
            .trusted_key("ABCD1234")
            .build()
            .expect("source");
        let text = verification_material(&signed);
        assert!(text.starts_with("checksum manifest, signature over"), "{text}");
        assert!(text.ends_with("1 trusted key(s)"), "{text}");
    }
}
