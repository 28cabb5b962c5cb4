//! Provisioning configuration loaded from TOML.
//!
//! The file is parsed once into an immutable [`ProvisionConfig`] that is
//! handed to the orchestrator. Inner components never consult environment
//! variables; platform directories are resolved here through the
//! [`BaseDirs`] seam.
//!
//! ```toml
//! install_dir = "/opt/stack"
//! installed_marker_dirs = ["/opt/stack/Apache24", "/opt/stack/php"]
//!
//! [verification]
//! require_checksum = true
//! require_signature = false
//!
//! [patch]
//! listen_port = 8080
//!
//! [[artefact]]
//! url = "https://downloads.example/php-8.3.zip"
//! checksum_manifest_url = "https://downloads.example/SHA256SUMS"
//! ```

use crate::artefact::error::ArtefactError;
use crate::artefact::signature::DEFAULT_KEYSERVER;
use crate::artefact::source::{ArtefactSource, SignedFile};
use crate::artefact::verification::VerificationPolicy;
use crate::command::DEFAULT_COMMAND_TIMEOUT;
use crate::patch::spec::{ListenPort, PatchSpec};
use crate::retry::RetryPolicy;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the configuration file when `--config` is
/// absent.
pub const CONFIG_ENV_VAR: &str = "ARTEFACT_PROVISIONER_CONFIG";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No configuration file was named.
    #[error("no configuration file given; pass --config or set {env_var}")]
    NotSpecified {
        /// The environment variable consulted.
        env_var: &'static str,
    },

    /// The file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    Read {
        /// The configuration path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration TOML.
    #[error("invalid configuration {path}: {source}")]
    Parse {
        /// The configuration path.
        path: Utf8PathBuf,
        /// The TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// An `[[artefact]]` entry is invalid.
    #[error("invalid artefact entry {index} in {path}: {source}")]
    Artefact {
        /// The configuration path.
        path: Utf8PathBuf,
        /// Zero-based index of the entry.
        index: usize,
        /// The validation error.
        #[source]
        source: ArtefactError,
    },

    /// A directory path is not valid UTF-8.
    #[error("{what} {path:?} is not valid UTF-8")]
    NonUtf8Path {
        /// Which directory was being resolved.
        what: &'static str,
        /// The offending path.
        path: PathBuf,
    },
}

/// Platform directory lookup.
#[cfg_attr(test, mockall::automock)]
pub trait BaseDirs {
    /// Return the user's download directory, if the platform has one.
    fn download_dir(&self) -> Option<PathBuf>;
}

/// [`BaseDirs`] backed by `directories-next`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBaseDirs;

impl BaseDirs for SystemBaseDirs {
    fn download_dir(&self) -> Option<PathBuf> {
        directories_next::UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(std::path::Path::to_path_buf))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    install_dir: Utf8PathBuf,
    download_dir: Option<Utf8PathBuf>,
    config_path: Option<Utf8PathBuf>,
    #[serde(default)]
    installed_marker_dirs: Vec<Utf8PathBuf>,
    #[serde(default)]
    retry: RawRetry,
    #[serde(default)]
    keyserver: RawKeyserver,
    verification: VerificationPolicy,
    #[serde(default)]
    patch: RawPatch,
    #[serde(default, rename = "artefact")]
    artefacts: Vec<RawArtefact>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRetry {
    #[serde(default = "default_max_attempts")]
    max_attempts: NonZeroU32,
    #[serde(default = "default_delay_secs")]
    delay_secs: u64,
}

impl Default for RawRetry {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}

fn default_max_attempts() -> NonZeroU32 {
    RetryPolicy::DEFAULT_MAX_ATTEMPTS
}

fn default_delay_secs() -> u64 {
    RetryPolicy::DEFAULT_DELAY.as_secs()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawKeyserver {
    #[serde(default = "default_keyserver")]
    url: String,
    #[serde(default = "default_command_timeout_secs")]
    command_timeout_secs: u64,
}

impl Default for RawKeyserver {
    fn default() -> Self {
        Self {
            url: default_keyserver(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

fn default_keyserver() -> String {
    DEFAULT_KEYSERVER.to_owned()
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_secs()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPatch {
    #[serde(default = "default_listen_port")]
    listen_port: ListenPort,
    document_root: Option<Utf8PathBuf>,
    config_search_dir: Option<Utf8PathBuf>,
    module_path: Option<Utf8PathBuf>,
}

impl Default for RawPatch {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            document_root: None,
            config_search_dir: None,
            module_path: None,
        }
    }
}

fn default_listen_port() -> ListenPort {
    ListenPort::HTTP
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawArtefact {
    url: String,
    checksum_manifest_url: Option<String>,
    signature_url: Option<String>,
    #[serde(default)]
    trusted_key_fingerprints: Vec<String>,
    #[serde(default)]
    signature_covers: SignedFile,
}

impl RawArtefact {
    fn build(self) -> Result<ArtefactSource, ArtefactError> {
        let mut builder = ArtefactSource::builder(self.url).signature_covers(self.signature_covers);
        if let Some(url) = self.checksum_manifest_url {
            builder = builder.checksum_manifest(url);
        }
        if let Some(url) = self.signature_url {
            builder = builder.signature(url);
        }
        for fingerprint in self.trusted_key_fingerprints {
            builder = builder.trusted_key(fingerprint);
        }
        builder.build()
    }
}

/// Command-line replacements for `[patch]` settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchOverrides {
    /// Replaces `listen_port`.
    pub listen_port: Option<ListenPort>,
    /// Replaces `document_root`.
    pub document_root: Option<Utf8PathBuf>,
    /// Replaces `config_search_dir`.
    pub config_search_dir: Option<Utf8PathBuf>,
    /// Replaces `module_path`.
    pub module_path: Option<Utf8PathBuf>,
}

/// Immutable settings for one provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Destination directory archives are extracted into.
    pub install_dir: Utf8PathBuf,
    /// Directory downloads are written to before verification.
    pub download_dir: Utf8PathBuf,
    /// The web server configuration file to patch.
    pub config_path: Utf8PathBuf,
    /// Directories whose joint presence means the stack is installed.
    pub installed_marker_dirs: Vec<Utf8PathBuf>,
    /// Retry policy for downloads and key imports.
    pub retry: RetryPolicy,
    /// Keyserver trusted keys are imported from.
    pub keyserver: String,
    /// Upper bound on a single `gpg` invocation.
    pub command_timeout: Duration,
    /// How missing verification material is treated.
    pub verification: VerificationPolicy,
    /// Settings for the patch pass.
    pub patch: PatchSpec,
    /// Artefacts to provision, in order.
    pub artefacts: Vec<ArtefactSource>,
}

impl ProvisionConfig {
    /// Read and parse the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load(path: &Utf8Path, dirs: &dyn BaseDirs) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path, dirs)
    }

    /// Parse configuration `text`; `origin` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML or an artefact entry is invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// use artefact_provisioner::config::{ProvisionConfig, SystemBaseDirs};
    /// use camino::Utf8Path;
    ///
    /// let text = r#"
    /// install_dir = "/opt/stack"
    /// download_dir = "/tmp/downloads"
    ///
    /// [verification]
    /// require_checksum = false
    /// require_signature = false
    /// "#;
    /// let config = ProvisionConfig::from_toml(text, Utf8Path::new("demo.toml"), &SystemBaseDirs)?;
    /// assert_eq!(config.config_path, "/opt/stack/Apache24/conf/httpd.conf");
    /// assert_eq!(config.patch.listen_port().get(), 80);
    /// # Ok::<(), artefact_provisioner::config::ConfigError>(())
    /// ```
    pub fn from_toml(text: &str, origin: &Utf8Path, dirs: &dyn BaseDirs) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

        let download_dir = match raw.download_dir {
            Some(dir) => dir,
            None => default_download_dir(dirs)?,
        };
        let install_dir = raw.install_dir;
        let config_path = raw
            .config_path
            .unwrap_or_else(|| install_dir.join("Apache24").join("conf").join("httpd.conf"));
        let patch = PatchSpec::new(
            raw.patch.listen_port,
            raw.patch
                .document_root
                .unwrap_or_else(|| install_dir.join("Apache24").join("htdocs")),
            raw.patch
                .config_search_dir
                .unwrap_or_else(|| install_dir.join("php")),
            raw.patch
                .module_path
                .unwrap_or_else(|| install_dir.join("php").join("libphp.so")),
        );

        let artefacts = raw
            .artefacts
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                entry.build().map_err(|source| ConfigError::Artefact {
                    path: origin.to_path_buf(),
                    index,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            install_dir,
            download_dir,
            config_path,
            installed_marker_dirs: raw.installed_marker_dirs,
            retry: RetryPolicy::new(
                raw.retry.max_attempts,
                Duration::from_secs(raw.retry.delay_secs),
            ),
            keyserver: raw.keyserver.url,
            command_timeout: Duration::from_secs(raw.keyserver.command_timeout_secs),
            verification: raw.verification,
            patch,
            artefacts,
        })
    }

    /// Return a copy with the overrides that are set applied to the patch
    /// settings.
    #[must_use]
    pub fn with_patch_overrides(mut self, overrides: PatchOverrides) -> Self {
        let current = &self.patch;
        self.patch = PatchSpec::new(
            overrides.listen_port.unwrap_or(current.listen_port()),
            overrides
                .document_root
                .unwrap_or_else(|| current.document_root().to_path_buf()),
            overrides
                .config_search_dir
                .unwrap_or_else(|| current.config_search_dir().to_path_buf()),
            overrides
                .module_path
                .unwrap_or_else(|| current.module_path().to_path_buf()),
        );
        self
    }
}

/// Resolve the download directory: the user's download folder, else the
/// system temporary directory.
///
/// # Errors
///
/// Returns [`ConfigError::NonUtf8Path`] if the chosen directory is not
/// valid UTF-8.
pub fn default_download_dir(dirs: &dyn BaseDirs) -> Result<Utf8PathBuf, ConfigError> {
    let dir = dirs.download_dir().unwrap_or_else(std::env::temp_dir);
    Utf8PathBuf::from_path_buf(dir).map_err(|path| ConfigError::NonUtf8Path {
        what: "download directory",
        path,
    })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
