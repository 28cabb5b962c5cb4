//! Fixed-delay retry for transient operations.
//!
//! Every retryable step in the pipeline (artefact transfer, manifest and
//! signature transfer, keyserver import) shares the same policy: a fixed
//! attempt ceiling with a constant delay between attempts. Backoff is not
//! exponential. The sleep is routed through a [`Sleeper`] so tests can
//! observe the delays without waiting for them, and a
//! [`CancellationToken`] is consulted before every attempt.

use log::warn;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Attempt ceiling and delay shared by every retryable operation.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts().get(), 3);
/// assert_eq!(policy.delay(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    delay: Duration,
}

impl RetryPolicy {
    /// Attempts made before a retryable operation is declared exhausted.
    pub const DEFAULT_MAX_ATTEMPTS: NonZeroU32 = NonZeroU32::MIN.saturating_add(2);

    /// Pause between consecutive attempts.
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

    /// Create a policy with an explicit ceiling and delay.
    #[must_use]
    pub const fn new(max_attempts: NonZeroU32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Return the attempt ceiling.
    #[must_use]
    pub const fn max_attempts(&self) -> NonZeroU32 {
        self.max_attempts
    }

    /// Return the delay between attempts.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_DELAY)
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempts, {}s apart",
            self.max_attempts,
            self.delay.as_secs_f32()
        )
    }
}

/// Blocks the calling thread between retry attempts.
#[cfg_attr(test, mockall::automock)]
pub trait Sleeper {
    /// Pause for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Sleeper backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Shared flag that lets a caller stop a run between attempts or stages.
///
/// Clones observe the same flag.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::retry::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a live (not cancelled) token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Return whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A successful result together with the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    /// The value returned by the successful attempt.
    pub value: T,
    /// One-based number of the successful attempt.
    pub attempts: u32,
}

/// Why a retried operation did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed.
    #[error("all {attempts} attempts failed; last error: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error raised by the final attempt.
        #[source]
        last: E,
    },

    /// The cancellation token was tripped before the next attempt.
    #[error("cancelled after {attempts} attempts")]
    Cancelled {
        /// Number of attempts made before cancellation was observed.
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Return the number of attempts made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// The closure receives the one-based attempt number. The delay is slept
/// between attempts only, never after the final one. Cancellation is
/// checked before every attempt.
///
/// # Errors
///
/// Returns [`RetryError::Exhausted`] carrying the last error when every
/// attempt fails, or [`RetryError::Cancelled`] if `cancel` was tripped.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::retry::{retry, CancellationToken, RetryPolicy, ThreadSleeper};
/// use std::num::NonZeroU32;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(NonZeroU32::MIN, Duration::ZERO);
/// let result = retry(&policy, &ThreadSleeper, &CancellationToken::new(), |_| {
///     Ok::<_, std::io::Error>(7)
/// });
/// assert_eq!(result.map(|ok| ok.value).ok(), Some(7));
/// ```
pub fn retry<T, E, F>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<Attempted<T>, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let ceiling = policy.max_attempts().get();
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled {
                attempts: attempt - 1,
            });
        }
        match operation(attempt) {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                });
            }
            Err(err) if attempt >= ceiling => {
                warn!("attempt {attempt}/{ceiling} failed: {err}; giving up");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }
            Err(err) => {
                warn!("attempt {attempt}/{ceiling} failed: {err}; retrying");
                sleeper.sleep(policy.delay());
                attempt += 1;
            }
        }
    }
}
