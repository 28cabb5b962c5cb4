//! Caller-supplied patch settings.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A TCP port in the range 1-65535.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::patch::spec::ListenPort;
///
/// let port: ListenPort = "8080".parse().unwrap();
/// assert_eq!(port.get(), 8080);
/// assert!(ListenPort::new(0).is_err());
/// assert!(ListenPort::new(65_536).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u16")]
pub struct ListenPort(u16);

/// A listen port outside 1-65535 or not a number.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("listen port must be an integer between 1 and 65535, got {value}")]
pub struct InvalidListenPort {
    /// The rejected input.
    pub value: String,
}

impl ListenPort {
    /// The standard HTTP port, 80.
    pub const HTTP: Self = Self(80);

    /// Validate `value` as a listen port.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidListenPort`] for 0 or values above 65535.
    pub fn new(value: u32) -> Result<Self, InvalidListenPort> {
        match u16::try_from(value) {
            Ok(port) if port != 0 => Ok(Self(port)),
            _ => Err(InvalidListenPort {
                value: value.to_string(),
            }),
        }
    }

    /// Return the port number.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u32> for ListenPort {
    type Error = InvalidListenPort;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ListenPort> for u16 {
    fn from(port: ListenPort) -> Self {
        port.0
    }
}

impl FromStr for ListenPort {
    type Err = InvalidListenPort;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidListenPort {
            value: s.to_owned(),
        };
        s.trim().parse::<u32>().map_err(|_| invalid())?.try_into().map_err(|_| invalid())
    }
}

impl fmt::Display for ListenPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Settings applied by the config patch pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchSpec {
    listen_port: ListenPort,
    document_root: Utf8PathBuf,
    config_search_dir: Utf8PathBuf,
    module_path: Utf8PathBuf,
}

impl PatchSpec {
    /// Create a patch spec.
    ///
    /// `config_search_dir` is the directory searched for `php.ini`;
    /// `module_path` is the PHP module loaded by the web server.
    #[must_use]
    pub fn new(
        listen_port: ListenPort,
        document_root: Utf8PathBuf,
        config_search_dir: Utf8PathBuf,
        module_path: Utf8PathBuf,
    ) -> Self {
        Self {
            listen_port,
            document_root,
            config_search_dir,
            module_path,
        }
    }

    /// Return the port the server listens on.
    #[must_use]
    pub fn listen_port(&self) -> ListenPort {
        self.listen_port
    }

    /// Return the served content root.
    #[must_use]
    pub fn document_root(&self) -> &Utf8Path {
        &self.document_root
    }

    /// Return the directory searched for `php.ini`.
    #[must_use]
    pub fn config_search_dir(&self) -> &Utf8Path {
        &self.config_search_dir
    }

    /// Return the PHP module path.
    #[must_use]
    pub fn module_path(&self) -> &Utf8Path {
        &self.module_path
    }
}
