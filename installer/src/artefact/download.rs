//! Artefact transfer with bounded, fixed-delay retry.
//!
//! [`ArtefactDownloader`] is the single-attempt transport seam; the
//! production implementation speaks HTTP(S) through `ureq`. The
//! [`RetryingFetcher`] wraps any downloader with the shared
//! [`RetryPolicy`](crate::retry::RetryPolicy) and treats an attempt that
//! reports success but leaves no file behind as a failed attempt.

use crate::retry::{CancellationToken, RetryError, RetryPolicy, Sleeper, retry};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Network timeout for a single transfer attempt.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Single-attempt transport for remote resources.
///
/// Abstractions allow tests to mock HTTP behaviour without network access.
#[cfg_attr(test, mockall::automock)]
pub trait ArtefactDownloader {
    /// Transfer the resource at `url` into `dest`, replacing any file
    /// already there.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer or the file write fails.
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), DownloadError>;
}

/// Errors arising from a single transfer attempt.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// HTTP request failed.
    #[error("download failed for {url}: {reason}")]
    HttpError {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The requested resource was not found (HTTP 404).
    #[error("resource not found: {url}")]
    NotFound {
        /// The URL that returned 404.
        url: String,
    },

    /// The transport reported success but the destination file is absent.
    #[error("download of {url} left no file at {}", path.display())]
    Missing {
        /// The URL that was requested.
        url: String,
        /// Where the file was expected.
        path: PathBuf,
    },

    /// I/O error writing the downloaded file.
    #[error("I/O error writing download: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a retried fetch.
pub type FetchError = RetryError<DownloadError>;

/// HTTP-based downloader using `ureq`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpDownloader;

impl ArtefactDownloader for HttpDownloader {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        let response = http_agent()
            .get(url)
            .call()
            .map_err(|e| map_ureq_error(url, &e))?;
        let mut file = std::fs::File::create(dest)?;
        std::io::copy(&mut response.into_body().as_reader(), &mut file)?;
        Ok(())
    }
}

/// Shared `ureq` agent with request timeout configuration.
fn http_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(DOWNLOAD_TIMEOUT))
            .build();
        ureq::Agent::new_with_config(config)
    })
}

/// Map a ureq error to a [`DownloadError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> DownloadError {
    match err {
        ureq::Error::StatusCode(404) => DownloadError::NotFound {
            url: url.to_owned(),
        },
        other => DownloadError::HttpError {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}

/// A file fetched by the pipeline.
///
/// The file is owned by the pipeline until it is explicitly removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// Where the file was written.
    pub local_path: PathBuf,
    /// Size of the file in bytes.
    pub byte_size: u64,
    /// One-based number of the attempt that succeeded.
    pub attempt_count: u32,
}

/// Downloader wrapped in the shared retry policy.
pub struct RetryingFetcher<'a> {
    downloader: &'a dyn ArtefactDownloader,
    sleeper: &'a dyn Sleeper,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<'a> RetryingFetcher<'a> {
    /// Create a fetcher.
    #[must_use]
    pub fn new(
        downloader: &'a dyn ArtefactDownloader,
        sleeper: &'a dyn Sleeper,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            downloader,
            sleeper,
            policy,
            cancel,
        }
    }

    /// Fetch `url` into `destination`.
    ///
    /// A partial file left by a failed attempt is overwritten by the next
    /// attempt; it is not removed here.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Exhausted`] carrying the last
    /// [`DownloadError`] when every attempt fails, or
    /// [`RetryError::Cancelled`] when the run is cancelled between attempts.
    pub fn fetch(&self, url: &str, destination: &Path) -> Result<FetchResult, FetchError> {
        info!("fetching {url} -> {}", destination.display());
        let outcome = retry(&self.policy, self.sleeper, &self.cancel, |attempt| {
            debug!("fetch attempt {attempt} for {url}");
            self.downloader.fetch(url, destination)?;
            match std::fs::metadata(destination) {
                Ok(meta) if meta.is_file() => Ok(meta.len()),
                _ => Err(DownloadError::Missing {
                    url: url.to_owned(),
                    path: destination.to_path_buf(),
                }),
            }
        })?;

        debug!(
            "fetched {url}: {} bytes on attempt {}",
            outcome.value, outcome.attempts
        );
        Ok(FetchResult {
            local_path: destination.to_path_buf(),
            byte_size: outcome.value,
            attempt_count: outcome.attempts,
        })
    }
}
