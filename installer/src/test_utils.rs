//! Shared test utilities for the provisioner crate.

use crate::artefact::download::{ArtefactDownloader, DownloadError};
use crate::command::{CommandError, CommandExecutor};
use crate::retry::Sleeper;
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Write};
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::time::Duration;
use zip::write::SimpleFileOptions;

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code as u32)
}

/// Creates a successful command `Output` with empty stdout and stderr.
pub fn success_output() -> Output {
    output_with_stdout(0, "")
}

/// Creates a failed command `Output` with the given stderr message.
pub fn failure_output(stderr: &str) -> Output {
    Output {
        status: exit_status(2),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// Creates a command `Output` with the given exit code and stdout.
pub fn output_with_stdout(code: i32, stdout: &str) -> Output {
    Output {
        status: exit_status(code),
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

/// Represents an expected command invocation for testing.
#[derive(Debug)]
pub struct ExpectedCall {
    /// The command to execute (e.g., "gpg").
    pub cmd: &'static str,
    /// The arguments to pass to the command.
    pub args: Vec<&'static str>,
    /// The result to return when this command is invoked.
    pub result: Result<Output, CommandError>,
}

/// A stub implementation of `CommandExecutor` for testing.
///
/// Records expected command invocations and returns predefined results,
/// allowing tests to verify command execution without side effects.
#[derive(Debug)]
pub struct StubExecutor {
    expected: RefCell<VecDeque<ExpectedCall>>,
}

impl StubExecutor {
    /// Creates a new `StubExecutor` with the given expected calls.
    pub fn new(expected: Vec<ExpectedCall>) -> Self {
        Self {
            expected: RefCell::new(expected.into()),
        }
    }

    /// Asserts that all expected command invocations have been consumed.
    ///
    /// # Panics
    ///
    /// Panics if there are remaining expected calls that were not invoked.
    pub fn assert_finished(&self) {
        assert!(
            self.expected.borrow().is_empty(),
            "expected no further command invocations"
        );
    }
}

impl CommandExecutor for StubExecutor {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<Output, CommandError> {
        let mut expected = self.expected.borrow_mut();
        let call = expected.pop_front().expect("unexpected command invocation");

        assert_eq!(call.cmd, cmd);
        assert_eq!(call.args.as_slice(), args);

        call.result
    }
}

/// Sleeper that returns immediately and records requested delays.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Returns the delays requested so far.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.borrow_mut().push(duration);
    }
}

/// Downloader serving fixed bodies by URL.
///
/// Unknown URLs fail with [`DownloadError::NotFound`]. URLs registered with
/// [`StaticDownloader::failing_first`] fail that many times before serving.
#[derive(Debug, Default)]
pub struct StaticDownloader {
    bodies: HashMap<String, Vec<u8>>,
    failures: RefCell<HashMap<String, u32>>,
    requests: RefCell<Vec<String>>,
}

impl StaticDownloader {
    /// Creates a downloader with nothing to serve.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` for `url`.
    #[must_use]
    pub fn serving(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_owned(), body.into());
        self
    }

    /// Makes the first `count` requests for `url` fail with an HTTP error.
    #[must_use]
    pub fn failing_first(self, url: &str, count: u32) -> Self {
        self.failures.borrow_mut().insert(url.to_owned(), count);
        self
    }

    /// Returns every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl ArtefactDownloader for StaticDownloader {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        self.requests.borrow_mut().push(url.to_owned());
        if let Some(remaining) = self.failures.borrow_mut().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DownloadError::HttpError {
                    url: url.to_owned(),
                    reason: "503 Service Unavailable".to_owned(),
                });
            }
        }
        let Some(body) = self.bodies.get(url) else {
            return Err(DownloadError::NotFound {
                url: url.to_owned(),
            });
        };
        std::fs::write(dest, body)?;
        Ok(())
    }
}

/// Computes the hex-encoded SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Builds an in-memory zip archive containing `entries`.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(contents).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Writes a zip archive containing `entries` to `path`.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    std::fs::write(path, zip_bytes(entries)).expect("write zip");
}

/// Writes a single-entry zip archive whose entry carries Unix `mode` bits.
pub fn write_zip_with_mode(path: &Path, name: &str, contents: &[u8], mode: u32) {
    let file = std::fs::File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().unix_permissions(mode);
    writer.start_file(name, options).expect("start zip entry");
    writer.write_all(contents).expect("write zip entry");
    writer.finish().expect("finish zip");
}

/// A representative stock `httpd.conf` fragment.
pub const SAMPLE_HTTPD_CONF: &str = "\
# Apache configuration
ServerRoot \"C:/Apache24\"
Listen 80
LoadModule rewrite_module modules/mod_rewrite.so
<VirtualHost _default_:80>
    ServerName localhost
</VirtualHost>
DocumentRoot \"C:/Apache24/htdocs\"
<Directory \"C:/Apache24/htdocs\">
    Options Indexes FollowSymLinks
    Require all granted
</Directory>
";
