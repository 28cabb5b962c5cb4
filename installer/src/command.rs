//! External command execution with a bounded wait.
//!
//! The signature backend shells out to `gpg`. Key imports talk to a remote
//! keyserver and can hang on network issues, so every command runs under a
//! timeout and is killed when the timeout elapses.

use std::io::{self, Read};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Default timeout for a single external command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors raised while running an external command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The program could not be spawned or its output could not be read.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// The program that was invoked.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The program did not finish within the timeout and was killed.
    #[error("{program} timed out after {} seconds", timeout.as_secs())]
    TimedOut {
        /// The program that was invoked.
        program: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

/// Abstraction for running external commands.
pub trait CommandExecutor {
    /// Runs a command with arguments and returns the captured output.
    ///
    /// A non-zero exit status is not an error at this layer; callers
    /// inspect [`Output::status`].
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if the command cannot be spawned or does
    /// not finish in time.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use artefact_provisioner::command::{CommandExecutor, SystemCommandExecutor};
    ///
    /// let executor = SystemCommandExecutor::default();
    /// let output = executor.run("gpg", &["--version"])?;
    /// assert!(output.status.success());
    /// # Ok::<(), artefact_provisioner::command::CommandError>(())
    /// ```
    fn run(&self, cmd: &str, args: &[&str]) -> Result<Output, CommandError>;
}

/// Executes commands on the host system.
#[derive(Debug, Clone, Copy)]
pub struct SystemCommandExecutor {
    timeout: Duration,
}

impl SystemCommandExecutor {
    /// Create an executor that kills commands after `timeout`.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemCommandExecutor {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl CommandExecutor for SystemCommandExecutor {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<Output, CommandError> {
        let spawn_error = |source| CommandError::Spawn {
            program: cmd.to_owned(),
            source,
        };

        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        // Both pipes are drained while waiting; a full pipe would stall the child.
        let stdout = child.stdout.take().map(drain_pipe);
        let stderr = child.stderr.take().map(drain_pipe);

        match child.wait_timeout(self.timeout).map_err(spawn_error)? {
            Some(status) => Ok(Output {
                status,
                stdout: collect_pipe(stdout).map_err(spawn_error)?,
                stderr: collect_pipe(stderr).map_err(spawn_error)?,
            }),
            None => {
                // Best effort: the child may already have exited.
                child.kill().ok();
                child.wait().ok();
                Err(CommandError::TimedOut {
                    program: cmd.to_owned(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

/// Read `pipe` to its end on a helper thread.
fn drain_pipe<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        pipe.read_to_end(&mut bytes)?;
        Ok(bytes)
    })
}

/// Wait for a helper started by [`drain_pipe`] and return what it read.
fn collect_pipe(reader: Option<JoinHandle<io::Result<Vec<u8>>>>) -> io::Result<Vec<u8>> {
    match reader {
        Some(handle) => handle
            .join()
            .map_err(|_| io::Error::other("pipe reader thread panicked"))?,
        None => Ok(Vec::new()),
    }
}

/// Return trimmed stderr, falling back to stdout when stderr is empty.
pub(crate) fn diagnostic_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout)
    } else {
        stderr
    };
    text.trim().to_owned()
}
