//! Detached OpenPGP signature verification through `gpg`.
//!
//! Public keys are imported from a keyserver on demand under the shared
//! retry policy; exhausting the retries is fatal for the run. Verifying a
//! signature, by contrast, reports `false` for a bad signature, an unknown
//! key, or a good signature whose `VALIDSIG` fingerprint is not one of the
//! source's trusted keys, so the caller can decide how to treat it.
//! Pointing the verifier at a dedicated `--homedir` keeps the keyring
//! limited to the keys this run imported.

use crate::command::{CommandError, CommandExecutor, diagnostic_text};
use crate::retry::{CancellationToken, RetryError, RetryPolicy, Sleeper, retry};
use super::source::KeyFingerprint;
use camino::Utf8PathBuf;
use log::{debug, info, warn};
use std::path::Path;

/// Keyserver used when none is configured.
pub const DEFAULT_KEYSERVER: &str = "hkps://keys.openpgp.org";

/// Status line `gpg --status-fd 1` prints for a cryptographically good
/// signature.
const GOODSIG_STATUS: &str = "[GNUPG:] GOODSIG ";

/// Status line prefix carrying the signer's full fingerprint.
const VALIDSIG_STATUS: &str = "[GNUPG:] VALIDSIG ";

/// Errors raised by signature handling.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// Every import attempt for a key failed.
    #[error("public key {fingerprint} unavailable after {attempts} attempts: {message}")]
    KeyUnavailable {
        /// The key that could not be imported.
        fingerprint: KeyFingerprint,
        /// Number of attempts made.
        attempts: u32,
        /// Diagnostic from the final attempt.
        message: String,
    },

    /// The run was cancelled while importing a key.
    #[error("key import for {fingerprint} cancelled")]
    Cancelled {
        /// The key being imported.
        fingerprint: KeyFingerprint,
    },

    /// `gpg` could not be run at all.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Validates detached signatures against imported public keys.
#[cfg_attr(test, mockall::automock)]
pub trait SignatureVerifier {
    /// Import the public key with `fingerprint`, retrying under the shared
    /// policy.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::KeyUnavailable`] once every attempt has
    /// failed, or [`SignatureError::Cancelled`].
    fn import_key(&self, fingerprint: &KeyFingerprint) -> Result<(), SignatureError>;

    /// Check that `signature` is a valid detached signature over exactly
    /// the bytes of `file`, made by one of the `trusted` keys.
    ///
    /// Returns `Ok(false)` for a bad signature, an unknown key, a signer
    /// outside `trusted`, or an empty `trusted` set.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Command`] if the verifier cannot run.
    fn verify(
        &self,
        file: &Path,
        signature: &Path,
        trusted: &[KeyFingerprint],
    ) -> Result<bool, SignatureError>;
}

/// Failure of one key import attempt.
#[derive(Debug, thiserror::Error)]
enum ImportAttemptError {
    #[error("gpg exited with {status}: {message}")]
    Rejected { status: String, message: String },

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// [`SignatureVerifier`] backed by the `gpg` command-line tool.
pub struct GpgVerifier<'a> {
    executor: &'a dyn CommandExecutor,
    sleeper: &'a dyn Sleeper,
    policy: RetryPolicy,
    cancel: CancellationToken,
    keyserver: String,
    homedir: Option<Utf8PathBuf>,
}

impl<'a> GpgVerifier<'a> {
    /// Create a verifier that imports keys from [`DEFAULT_KEYSERVER`] into
    /// the user's default keyring.
    #[must_use]
    pub fn new(
        executor: &'a dyn CommandExecutor,
        sleeper: &'a dyn Sleeper,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            sleeper,
            policy,
            cancel,
            keyserver: DEFAULT_KEYSERVER.to_owned(),
            homedir: None,
        }
    }

    /// Use `keyserver` for key imports.
    #[must_use]
    pub fn with_keyserver(mut self, keyserver: impl Into<String>) -> Self {
        self.keyserver = keyserver.into();
        self
    }

    /// Use an isolated keyring directory.
    #[must_use]
    pub fn with_homedir(mut self, homedir: Utf8PathBuf) -> Self {
        self.homedir = Some(homedir);
        self
    }

    fn base_args(&self) -> Vec<&str> {
        let mut args = vec!["--batch", "--no-tty"];
        if let Some(homedir) = &self.homedir {
            args.push("--homedir");
            args.push(homedir.as_str());
        }
        args
    }

    fn import_once(&self, fingerprint: &KeyFingerprint) -> Result<(), ImportAttemptError> {
        let mut args = self.base_args();
        args.extend([
            "--keyserver",
            self.keyserver.as_str(),
            "--recv-keys",
            fingerprint.as_str(),
        ]);
        let output = self.executor.run("gpg", &args)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ImportAttemptError::Rejected {
                status: output.status.to_string(),
                message: diagnostic_text(&output),
            })
        }
    }
}

impl SignatureVerifier for GpgVerifier<'_> {
    fn import_key(&self, fingerprint: &KeyFingerprint) -> Result<(), SignatureError> {
        info!("importing public key {fingerprint} from {}", self.keyserver);
        match retry(&self.policy, self.sleeper, &self.cancel, |_| {
            self.import_once(fingerprint)
        }) {
            Ok(_) => {
                debug!("imported public key {fingerprint}");
                Ok(())
            }
            Err(RetryError::Exhausted { attempts, last }) => Err(SignatureError::KeyUnavailable {
                fingerprint: fingerprint.clone(),
                attempts,
                message: last.to_string(),
            }),
            Err(RetryError::Cancelled { .. }) => Err(SignatureError::Cancelled {
                fingerprint: fingerprint.clone(),
            }),
        }
    }

    fn verify(
        &self,
        file: &Path,
        signature: &Path,
        trusted: &[KeyFingerprint],
    ) -> Result<bool, SignatureError> {
        if trusted.is_empty() {
            warn!(
                "no trusted keys for signature {}; rejecting it",
                signature.display()
            );
            return Ok(false);
        }
        let file_arg = file.to_string_lossy();
        let signature_arg = signature.to_string_lossy();
        let mut args = self.base_args();
        args.extend([
            "--status-fd",
            "1",
            "--verify",
            signature_arg.as_ref(),
            file_arg.as_ref(),
        ]);
        info!("verifying signature {signature_arg} over {file_arg}");
        let output = self.executor.run("gpg", &args)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() || !stdout.lines().any(|l| l.starts_with(GOODSIG_STATUS)) {
            debug!("signature rejected: {}", diagnostic_text(&output));
            return Ok(false);
        }

        let signers = valid_signers(&stdout);
        let trusted_signer = signers
            .iter()
            .any(|signer| trusted.iter().any(|key| key.identifies(signer)));
        if !trusted_signer {
            warn!(
                "signature {signature_arg} was not made by a trusted key (signers: [{}])",
                signers.join(", ")
            );
        }
        Ok(trusted_signer)
    }
}

/// Collect the signing-key and primary-key fingerprints from the
/// `VALIDSIG` status lines in `status`.
fn valid_signers(status: &str) -> Vec<&str> {
    status
        .lines()
        .filter_map(|line| line.strip_prefix(VALIDSIG_STATUS))
        .flat_map(|fields| {
            let fields: Vec<&str> = fields.split_whitespace().collect();
            // Field 10 is the primary key when a subkey made the signature.
            [fields.first().copied(), fields.get(9).copied()]
        })
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::MockSleeper;
    use crate::test_utils::{ExpectedCall, StubExecutor, failure_output, output_with_stdout};
    use rstest::rstest;
    use std::num::NonZeroU32;
    use std::time::Duration;

    const FPR: &str = "D94AA3F0EFE21092";

    fn fingerprint() -> KeyFingerprint {
        KeyFingerprint::parse(FPR).expect("valid fingerprint")
    }

    fn recv_call(result: Result<std::process::Output, CommandError>) -> ExpectedCall {
        ExpectedCall {
            cmd: "gpg",
            args: vec![
                "--batch",
                "--no-tty",
                "--keyserver",
                DEFAULT_KEYSERVER,
                "--recv-keys",
                FPR,
            ],
            result,
        }
    }

    fn sleeper(times: usize) -> MockSleeper {
        let mut sleeper = MockSleeper::new();
        sleeper.expect_sleep().times(times).return_const(());
        sleeper
    }

    #[test]
    fn import_succeeds_after_transient_failure() {
        let executor = StubExecutor::new(vec![
            recv_call(Ok(failure_output("keyserver receive failed: timeout"))),
            recv_call(Ok(output_with_stdout(0, ""))),
        ]);
        let sleeper = sleeper(1);
        let verifier = GpgVerifier::new(
            &executor,
            &sleeper,
            RetryPolicy::default(),
            CancellationToken::new(),
        );

        verifier.import_key(&fingerprint()).expect("import succeeds");
        executor.assert_finished();
    }

    #[test]
    fn import_exhaustion_reports_key_unavailable() {
        let executor = StubExecutor::new(
            (0..3)
                .map(|_| recv_call(Ok(failure_output("no data"))))
                .collect(),
        );
        let sleeper = sleeper(2);
        let verifier = GpgVerifier::new(
            &executor,
            &sleeper,
            RetryPolicy::default(),
            CancellationToken::new(),
        );

        let err = verifier
            .import_key(&fingerprint())
            .expect_err("import must fail");
        match err {
            SignatureError::KeyUnavailable {
                fingerprint,
                attempts,
                message,
            } => {
                assert_eq!(fingerprint.as_str(), FPR);
                assert_eq!(attempts, 3);
                assert!(message.contains("no data"), "message: {message}");
            }
            other => panic!("expected KeyUnavailable, got {other:?}"),
        }
        executor.assert_finished();
    }

    #[test]
    fn homedir_and_keyserver_are_passed_through() {
        let executor = StubExecutor::new(vec![ExpectedCall {
            cmd: "gpg",
            args: vec![
                "--batch",
                "--no-tty",
                "--homedir",
                "/tmp/keys",
                "--keyserver",
                "hkps://keyserver.ubuntu.com",
                "--recv-keys",
                FPR,
            ],
            result: Ok(output_with_stdout(0, "")),
        }]);
        let sleeper = sleeper(0);
        let verifier = GpgVerifier::new(
            &executor,
            &sleeper,
            RetryPolicy::new(NonZeroU32::MIN, Duration::ZERO),
            CancellationToken::new(),
        )
        .with_keyserver("hkps://keyserver.ubuntu.com")
        .with_homedir(Utf8PathBuf::from("/tmp/keys"));

        verifier.import_key(&fingerprint()).expect("import succeeds");
        executor.assert_finished();
    }

    const SIGNER: &str = "843938DF228D22F7B3742BC0D94AA3F0EFE21092";

    fn verify_call(code: i32, status: String) -> ExpectedCall {
        ExpectedCall {
            cmd: "gpg",
            args: vec![
                "--batch",
                "--no-tty",
                "--status-fd",
                "1",
                "--verify",
                "/d/a.zip.asc",
                "/d/a.zip",
            ],
            result: Ok(output_with_stdout(code, &status)),
        }
    }

    fn good_status(signing_fpr: &str, primary_fpr: &str) -> String {
        format!(
            "[GNUPG:] NEWSIG\n\
             [GNUPG:] GOODSIG {} Release Signing\n\
             [GNUPG:] VALIDSIG {signing_fpr} 2024-01-01 1704067200 0 4 0 1 10 00 {primary_fpr}\n",
            signing_fpr.get(24..).unwrap_or(signing_fpr)
        )
    }

    fn verify_with(call: ExpectedCall, trusted: &[&str]) -> bool {
        let executor = StubExecutor::new(vec![call]);
        let sleeper = sleeper(0);
        let verifier = GpgVerifier::new(
            &executor,
            &sleeper,
            RetryPolicy::default(),
            CancellationToken::new(),
        );
        let trusted: Vec<KeyFingerprint> = trusted
            .iter()
            .map(|fpr| KeyFingerprint::parse(fpr).expect("valid fingerprint"))
            .collect();
        let verdict = verifier
            .verify(Path::new("/d/a.zip"), Path::new("/d/a.zip.asc"), &trusted)
            .expect("gpg runs");
        executor.assert_finished();
        verdict
    }

    #[rstest]
    #[case::full_fingerprint(SIGNER)]
    #[case::long_key_id(FPR)]
    #[case::spaced_and_prefixed("0x8439 38DF 228D 22F7 B374 2BC0 D94A A3F0 EFE2 1092")]
    fn trusted_signer_is_accepted(#[case] trusted: &str) {
        assert!(verify_with(
            verify_call(0, good_status(SIGNER, SIGNER)),
            &[trusted]
        ));
    }

    #[test]
    fn subkey_signature_is_matched_by_primary_key() {
        let subkey = "1111222233334444555566667777888899990000";
        assert!(verify_with(
            verify_call(0, good_status(subkey, SIGNER)),
            &[FPR]
        ));
    }

    #[test]
    fn good_signature_from_untrusted_key_is_rejected() {
        let mallory = "FFFFEEEEDDDDCCCCBBBBAAAA0123456789ABCDEF";
        assert!(!verify_with(
            verify_call(0, good_status(mallory, mallory)),
            &[FPR]
        ));
    }

    #[test]
    fn goodsig_without_validsig_is_rejected() {
        let status = format!("[GNUPG:] GOODSIG {FPR} Release Signing\n");
        assert!(!verify_with(verify_call(0, status), &[FPR]));
    }

    #[test]
    fn bad_signature_is_rejected() {
        let status = format!("[GNUPG:] BADSIG {FPR} Release Signing\n");
        assert!(!verify_with(verify_call(1, status), &[FPR]));
    }

    #[test]
    fn empty_trust_set_rejects_without_running_gpg() {
        let executor = StubExecutor::new(Vec::new());
        let sleeper = sleeper(0);
        let verifier = GpgVerifier::new(
            &executor,
            &sleeper,
            RetryPolicy::default(),
            CancellationToken::new(),
        );
        let verdict = verifier
            .verify(Path::new("/d/a.zip"), Path::new("/d/a.zip.asc"), &[])
            .expect("no command needed");
        assert!(!verdict);
        executor.assert_finished();
    }

    #[test]
    fn valid_signers_reads_signing_and_primary_fingerprints() {
        let status = good_status("AAAA", SIGNER);
        assert_eq!(valid_signers(&status), ["AAAA", SIGNER]);
        assert!(valid_signers("[GNUPG:] NEWSIG\n").is_empty());
    }
}
