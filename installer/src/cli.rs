//! CLI argument definitions for the artefact provisioner.
//!
//! This module defines the command-line interface using clap. It is separated
//! from the main entrypoint to keep the binary small and focused on
//! orchestration.

use crate::config::PatchOverrides;
use crate::patch::spec::ListenPort;
use camino::Utf8PathBuf;
use clap::Parser;

/// Fetch, verify, unpack and wire up a web server stack.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "artefact-provisioner")]
#[command(version, about)]
#[command(long_about = concat!(
    "Fetch, verify, unpack, and wire up software artefacts.\n\n",
    "Each artefact listed in the configuration file is downloaded with a ",
    "bounded retry policy, checked against its checksum manifest and detached ",
    "signature when they are provided, and extracted into the install ",
    "directory. The web server configuration is then backed up and patched to ",
    "listen on the requested port, serve the requested document root, and load ",
    "the PHP module.",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Provision from a configuration file:\n",
    "    $ artefact-provisioner --config provision.toml\n\n",
    "  Serve on port 8080 from a different document root:\n",
    "    $ artefact-provisioner -c provision.toml --port 8080 --document-root /srv/www\n\n",
    "  Preview the plan without downloading anything:\n",
    "    $ artefact-provisioner -c provision.toml --dry-run\n\n",
    "  Emit a machine-readable report:\n",
    "    $ artefact-provisioner -c provision.toml --json\n\n",
    "The configuration file may also be named by ARTEFACT_PROVISIONER_CONFIG.",
))]
pub struct Cli {
    /// Configuration file [default: $ARTEFACT_PROVISIONER_CONFIG].
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Port the web server listens on (1-65535).
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<ListenPort>,

    /// Directory served as the document root.
    #[arg(long, value_name = "DIR")]
    pub document_root: Option<Utf8PathBuf>,

    /// Directory searched for php.ini.
    #[arg(long, value_name = "DIR")]
    pub php_ini_dir: Option<Utf8PathBuf>,

    /// PHP module loaded by the web server.
    #[arg(long, value_name = "FILE")]
    pub module_path: Option<Utf8PathBuf>,

    /// Provision even when the stack is already installed.
    #[arg(short, long)]
    pub force: bool,

    /// Show the plan and exit without downloading or patching.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Suppress progress output (errors still shown).
    #[arg(short, long, conflicts_with = "verbosity")]
    pub quiet: bool,
}

impl Cli {
    /// Collect the patch settings given on the command line.
    ///
    /// # Examples
    ///
    /// ```
    /// use artefact_provisioner::cli::Cli;
    /// use clap::Parser;
    ///
    /// let cli = Cli::parse_from(["artefact-provisioner", "--port", "8080"]);
    /// let overrides = cli.patch_overrides();
    /// assert_eq!(overrides.listen_port.map(|p| p.get()), Some(8080));
    /// assert!(overrides.document_root.is_none());
    /// ```
    #[must_use]
    pub fn patch_overrides(&self) -> PatchOverrides {
        PatchOverrides {
            listen_port: self.port,
            document_root: self.document_root.clone(),
            config_search_dir: self.php_ini_dir.clone(),
            module_path: self.module_path.clone(),
        }
    }

    /// Return the default log filter for the chosen verbosity.
    ///
    /// `RUST_LOG`, when set, takes precedence over this value.
    #[must_use]
    pub fn log_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
