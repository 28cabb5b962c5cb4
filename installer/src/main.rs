//! Artefact provisioner CLI entrypoint.
//!
//! This binary loads the provisioning configuration, fetches and verifies
//! each listed artefact, unpacks it into the install directory, and patches
//! the web server configuration. Progress goes to stderr; `--json` writes
//! the run report to stdout.

use artefact_provisioner::artefact::download::HttpDownloader;
use artefact_provisioner::artefact::extraction::ZipExtractor;
use artefact_provisioner::artefact::signature::GpgVerifier;
use artefact_provisioner::cli::Cli;
use artefact_provisioner::command::SystemCommandExecutor;
use artefact_provisioner::config::{
    BaseDirs, CONFIG_ENV_VAR, ConfigError, ProvisionConfig, SystemBaseDirs,
};
use artefact_provisioner::error::{ErrorCategory, ProvisionError, Result};
use artefact_provisioner::output::{
    DryRunInfo, success_message, write_json_error, write_json_report, write_stderr_line,
};
use artefact_provisioner::pipeline::{Collaborators, ProvisionRequest, Provisioner};
use artefact_provisioner::retry::{CancellationToken, ThreadSleeper};
use camino::Utf8PathBuf;
use clap::Parser;
use log::debug;
use std::io::Write;
use tempfile::TempDir;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    let mut stdout = std::io::stdout().lock();
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &SystemBaseDirs, &mut stdout, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, cli.json, &mut stdout, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Installs `env_logger`; `RUST_LOG` overrides the `-v` derived level.
fn init_logging(cli: &Cli) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .format_timestamp(None)
        .init();
}

fn run(
    cli: &Cli,
    dirs: &dyn BaseDirs,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<()> {
    let config_file = resolve_config_file(cli)?;
    debug!("loading configuration from {config_file}");
    let config =
        ProvisionConfig::load(&config_file, dirs)?.with_patch_overrides(cli.patch_overrides());

    // Dry-run mode: show what would be done without side effects
    if cli.dry_run {
        let info = DryRunInfo {
            config_file: &config_file,
            config: &config,
            force: cli.force,
        };
        write_stderr_line(stderr, info.display_text());
        return Ok(());
    }

    let executor = SystemCommandExecutor::with_timeout(config.command_timeout);
    let sleeper = ThreadSleeper;
    let cancel = CancellationToken::new();
    // Held for the whole run; the keyring is deleted when it drops.
    let (_keyring, keyring_dir) = isolated_keyring()?;
    let signatures = GpgVerifier::new(&executor, &sleeper, config.retry, cancel.clone())
        .with_keyserver(config.keyserver.clone())
        .with_homedir(keyring_dir);
    let collaborators = Collaborators {
        downloader: &HttpDownloader,
        extractor: &ZipExtractor,
        signatures: &signatures,
        sleeper: &sleeper,
    };

    let mut provisioner =
        Provisioner::new(collaborators, config.retry, config.verification, cancel)
            .quiet(cli.quiet);
    let outcome =
        provisioner.provision(&ProvisionRequest::from_config(&config, cli.force), stderr)?;

    if cli.json {
        if let Err(err) = write_json_report(stdout, &outcome) {
            write_stderr_line(stderr, format!("failed to write JSON report: {err}"));
        }
    } else if !cli.quiet {
        write_stderr_line(stderr, "");
        write_stderr_line(stderr, success_message(&outcome));
    }
    Ok(())
}

/// Picks `--config`, else the path named by [`CONFIG_ENV_VAR`].
fn resolve_config_file(cli: &Cli) -> std::result::Result<Utf8PathBuf, ConfigError> {
    if let Some(path) = &cli.config {
        return Ok(path.clone());
    }
    match std::env::var(CONFIG_ENV_VAR) {
        Ok(value) if !value.trim().is_empty() => Ok(Utf8PathBuf::from(value)),
        _ => Err(ConfigError::NotSpecified {
            env_var: CONFIG_ENV_VAR,
        }),
    }
}

/// Creates an empty per-run gpg home so only the configured keys are trusted.
fn isolated_keyring() -> Result<(TempDir, Utf8PathBuf)> {
    let dir = tempfile::Builder::new()
        .prefix("artefact-provisioner-gnupg-")
        .tempdir()
        .map_err(|source| ProvisionError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).map_err(|path| {
        ConfigError::NonUtf8Path {
            what: "keyring directory",
            path,
        }
    })?;
    debug!("using isolated keyring at {path}");
    Ok((dir, path))
}

fn exit_code_for_run_result(
    result: Result<()>,
    json: bool,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_stderr_line(stderr, format!("error: {err}"));
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                write_stderr_line(stderr, format!("  caused by: {cause}"));
                source = cause.source();
            }
            if json && write_json_error(stdout, &err).is_err() {
                // Best-effort; the error is already on stderr.
            }
            exit_code_for_error(&err)
        }
    }
}

fn exit_code_for_error(err: &ProvisionError) -> i32 {
    match err.category() {
        ErrorCategory::Configuration => 2,
        _ => 1,
    }
}
