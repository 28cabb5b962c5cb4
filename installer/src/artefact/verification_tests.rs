//! Unit tests for layered integrity verification.

use super::*;
use crate::artefact::download::{DownloadError, MockArtefactDownloader};
use crate::artefact::signature::MockSignatureVerifier;
use crate::retry::{CancellationToken, RetryPolicy, Sleeper};
use crate::test_utils::sha256_hex;
use rstest::{fixture, rstest};
use std::num::NonZeroU32;
use std::time::Duration;

const PAYLOAD: &[u8] = b"php binaries";
const ARCHIVE_URL: &str = "https://downloads.test/php-8.3.zip";
const MANIFEST_URL: &str = "https://downloads.test/SHA256SUMS";
const SIGNATURE_URL: &str = "https://downloads.test/php-8.3.zip.asc";

struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

struct Sandbox {
    _temp: tempfile::TempDir,
    fetched: FetchResult,
}

#[fixture]
fn sandbox() -> Sandbox {
    let temp = tempfile::tempdir().expect("temp dir");
    let local_path = temp.path().join("php-8.3.zip");
    std::fs::write(&local_path, PAYLOAD).expect("write artefact");
    Sandbox {
        _temp: temp,
        fetched: FetchResult {
            local_path,
            byte_size: PAYLOAD.len() as u64,
            attempt_count: 1,
        },
    }
}

/// Downloader serving a manifest with `manifest_body` and a dummy signature.
fn serving(manifest_body: String) -> MockArtefactDownloader {
    let mut downloader = MockArtefactDownloader::new();
    downloader.expect_fetch().returning(move |url, dest| {
        let body = if url == MANIFEST_URL {
            manifest_body.as_bytes().to_vec()
        } else {
            b"-----BEGIN PGP SIGNATURE-----".to_vec()
        };
        std::fs::write(dest, body).map_err(DownloadError::Io)
    });
    downloader
}

fn good_manifest() -> String {
    format!(
        "{}  httpd-2.4.zip\n{}  php-8.3.zip\n",
        "0".repeat(64),
        sha256_hex(PAYLOAD)
    )
}

fn one_shot_policy() -> RetryPolicy {
    RetryPolicy::new(NonZeroU32::MIN, Duration::ZERO)
}

fn run(
    downloader: &MockArtefactDownloader,
    signatures: &MockSignatureVerifier,
    policy: VerificationPolicy,
    fetched: &FetchResult,
    source: &ArtefactSource,
) -> (Result<VerificationOutcome, VerificationError>, Vec<PathBuf>) {
    let fetcher = RetryingFetcher::new(
        downloader,
        &NoSleep,
        one_shot_policy(),
        CancellationToken::new(),
    );
    let verifier = IntegrityVerifier::new(&fetcher, signatures, policy);
    let mut transient = TransientFiles::new();
    let result = verifier.verify(fetched, source, &mut transient);
    let tracked = transient.paths().to_vec();
    (result, tracked)
}

#[rstest]
fn security_gap_unverified_source_is_accepted_under_permissive_policy(sandbox: Sandbox) {
    // Not a guarantee: a source with no manifest and no signature passes
    // when the caller opts into the permissive policy.
    let source = ArtefactSource::builder(ARCHIVE_URL).build().expect("source");
    let mut downloader = MockArtefactDownloader::new();
    downloader.expect_fetch().never();
    let signatures = MockSignatureVerifier::new();

    let (result, tracked) = run(
        &downloader,
        &signatures,
        VerificationPolicy::permissive(),
        &sandbox.fetched,
        &source,
    );

    assert_eq!(result.expect("verdict"), VerificationOutcome::Verified);
    assert!(tracked.is_empty());
}

#[rstest]
#[case::checksum_required(
    VerificationPolicy::strict(),
    VerificationOutcome::ChecksumMissing { file_name: "php-8.3.zip".to_owned() },
)]
fn strict_policy_rejects_source_without_material(
    sandbox: Sandbox,
    #[case] policy: VerificationPolicy,
    #[case] expected: VerificationOutcome,
) {
    let source = ArtefactSource::builder(ARCHIVE_URL).build().expect("source");
    let downloader = MockArtefactDownloader::new();
    let signatures = MockSignatureVerifier::new();

    let (result, _) = run(&downloader, &signatures, policy, &sandbox.fetched, &source);

    assert_eq!(result.expect("verdict"), expected);
}

#[rstest]
fn required_signature_missing_is_invalid(sandbox: Sandbox) {
    let source = ArtefactSource::builder(ARCHIVE_URL)
        .checksum_manifest(MANIFEST_URL)
        .build()
        .expect("source");
    let downloader = MockArtefactDownloader::new();
    let signatures = MockSignatureVerifier::new();

    let (result, _) = run(
        &downloader,
        &signatures,
        VerificationPolicy::strict(),
        &sandbox.fetched,
        &source,
    );

    assert_eq!(result.expect("verdict"), VerificationOutcome::SignatureInvalid);
}

#[rstest]
fn matching_checksum_is_verified_and_manifest_is_tracked(sandbox: Sandbox) {
    let source = ArtefactSource::builder(ARCHIVE_URL)
        .checksum_manifest(MANIFEST_URL)
        .build()
        .expect("source");
    let downloader = serving(good_manifest());
    let signatures = MockSignatureVerifier::new();

    let (result, tracked) = run(
        &downloader,
        &signatures,
        VerificationPolicy::permissive(),
        &sandbox.fetched,
        &source,
    );

    assert_eq!(result.expect("verdict"), VerificationOutcome::Verified);
    assert_eq!(tracked.len(), 1);
    assert!(tracked[0].ends_with("SHA256SUMS"));
}

#[rstest]
fn mismatching_checksum_reports_both_digests(sandbox: Sandbox) {
    let source = ArtefactSource::builder(ARCHIVE_URL)
        .checksum_manifest(MANIFEST_URL)
        .build()
        .expect("source");
    let wrong = "a".repeat(64);
    let downloader = serving(format!("{wrong}  php-8.3.zip\n"));
    let signatures = MockSignatureVerifier::new();

    let (result, _) = run(
        &downloader,
        &signatures,
        VerificationPolicy::permissive(),
        &sandbox.fetched,
        &source,
    );

    assert_eq!(
        result.expect("verdict"),
        VerificationOutcome::ChecksumMismatch {
            expected: wrong,
            actual: sha256_hex(PAYLOAD),
        }
    );
}

#[rstest]
fn absent_manifest_entry_is_checksum_missing(sandbox: Sandbox) {
    let source = ArtefactSource::builder(ARCHIVE_URL)
        .checksum_manifest(MANIFEST_URL)
        .build()
        .expect("source");
    let downloader = serving(format!("{}  httpd-2.4.zip\n", "b".repeat(64)));
    let signatures = MockSignatureVerifier::new();

    let (result, _) = run(
        &downloader,
        &signatures,
        VerificationPolicy::permissive(),
        &sandbox.fetched,
        &source,
    );

    assert_eq!(
        result.expect("verdict"),
        VerificationOutcome::ChecksumMissing {
            file_name: "php-8.3.zip".to_owned()
        }
    );
}

#[rstest]
fn key_import_failure_stops_before_signature_download(sandbox: Sandbox) {
    let source = ArtefactSource::builder(ARCHIVE_URL)
        .signature(SIGNATURE_URL)
        .trusted_key("AAAA1111")
        .trusted_key("BBBB2222")
        .build()
        .expect("source");
    let mut downloader = MockArtefactDownloader::new();
    downloader.expect_fetch().never();
    let mut signatures = MockSignatureVerifier::new();
    signatures
        .expect_import_key()
        .withf(|fpr| fpr.as_str() == "AAAA1111")
        .times(1)
        .returning(|_| Ok(()));
    signatures
        .expect_import_key()
        .withf(|fpr| fpr.as_str() == "BBBB2222")
        .times(1)
        .returning(|fpr| {
            Err(SignatureError::KeyUnavailable {
                fingerprint: fpr.clone(),
                attempts: 3,
                message: "keyserver timeout".to_owned(),
            })
        });
    signatures.expect_verify().never();

    let (result, _) = run(
        &downloader,
        &signatures,
        VerificationPolicy::permissive(),
        &sandbox.fetched,
        &source,
    );

    assert_eq!(
        result.expect("verdict"),
        VerificationOutcome::SignatureKeyUnavailable {
            fingerprint: KeyFingerprint::parse("BBBB2222").expect("fingerprint"),
        }
    );
}

#[rstest]
fn trusted_keys_without_signature_are_still_imported(sandbox: Sandbox) {
    let source = ArtefactSource::builder(ARCHIVE_URL)
        .trusted_key("AAAA1111")
        .build()
        .expect("source");
    let mut downloader = MockArtefactDownloader::new();
    downloader.expect_fetch().never();
    let mut signatures = MockSignatureVerifier::new();
    signatures.expect_import_key().times(1).returning(|fpr| {
        Err(SignatureError::KeyUnavailable {
            fingerprint: fpr.clone(),
            attempts: 3,
            message: "keyserver timeout".to_owned(),
        })
    });
    signatures.expect_verify().never();

    let (result, tracked) = run(
        &downloader,
        &signatures,
        VerificationPolicy::permissive(),
        &sandbox.fetched,
        &source,
    );

    assert_eq!(
        result.expect("verdict"),
        VerificationOutcome::SignatureKeyUnavailable {
            fingerprint: KeyFingerprint::parse("AAAA1111").expect("fingerprint"),
        }
    );
    assert!(tracked.is_empty());
}

#[rstest]
fn trusted_keys_without_signature_verify_once_imported(sandbox: Sandbox) {
    let source = ArtefactSource::builder(ARCHIVE_URL)
        .trusted_key("AAAA1111")
        .build()
        .expect("source");
    let mut downloader = MockArtefactDownloader::new();
    downloader.expect_fetch().never();
    let mut signatures = MockSignatureVerifier::new();
    signatures
        .expect_import_key()
        .withf(|fpr| fpr.as_str() == "AAAA1111")
        .times(1)
        .returning(|_| Ok(()));
    signatures.expect_verify().never();

    let (result, _) = run(
        &downloader,
        &signatures,
        VerificationPolicy::permissive(),
        &sandbox.fetched,
        &source,
    );

    assert_eq!(result.expect("verdict"), VerificationOutcome::Verified);
}

#[rstest]
#[case::good(true, VerificationOutcome::Verified)]
#[case::bad(false, VerificationOutcome::SignatureInvalid)]
fn signature_verdict_over_artefact(
    sandbox: Sandbox,
    #[case] good: bool,
    #[case] expected: VerificationOutcome,
) {
    let source = ArtefactSource::builder(ARCHIVE_URL)
        .signature(SIGNATURE_URL)
        .trusted_key("AAAA1111")
        .build()
        .expect("source");
    let downloader = serving(String::new());
    let mut signatures = MockSignatureVerifier::new();
    signatures.expect_import_key().times(1).returning(|_| Ok(()));
    signatures
        .expect_verify()
        .withf(|file, sig, trusted| {
            file.ends_with("php-8.3.zip")
                && sig.ends_with("php-8.3.zip.asc")
                && trusted.first().map(KeyFingerprint::as_str) == Some("AAAA1111")
                && trusted.len() == 1
        })
        .times(1)
        .returning(move |_, _, _| Ok(good));

    let (result, tracked) = run(
        &downloader,
        &signatures,
        VerificationPolicy::permissive(),
        &sandbox.fetched,
        &source,
    );

    assert_eq!(result.expect("verdict"), expected);
    assert_eq!(tracked.len(), 1);
}

#[rstest]
fn manifest_signature_is_checked_against_the_manifest(sandbox: Sandbox) {
    let source = ArtefactSource::builder(ARCHIVE_URL)
        .checksum_manifest(MANIFEST_URL)
        .signature("https://downloads.test/SHA256SUMS.gpg")
        .signature_covers(SignedFile::Manifest)
        .build()
        .expect("source");
    let downloader = serving(good_manifest());
    let mut signatures = MockSignatureVerifier::new();
    signatures
        .expect_verify()
        .withf(|file, sig, _| file.ends_with("SHA256SUMS") && sig.ends_with("SHA256SUMS.gpg"))
        .times(1)
        .returning(|_, _, _| Ok(true));

    let (result, tracked) = run(
        &downloader,
        &signatures,
        VerificationPolicy::strict(),
        &sandbox.fetched,
        &source,
    );

    assert_eq!(result.expect("verdict"), VerificationOutcome::Verified);
    assert_eq!(tracked.len(), 2);
}

#[rstest]
fn unreachable_manifest_is_an_error_and_still_tracked(sandbox: Sandbox) {
    let source = ArtefactSource::builder(ARCHIVE_URL)
        .checksum_manifest(MANIFEST_URL)
        .build()
        .expect("source");
    let mut downloader = MockArtefactDownloader::new();
    downloader.expect_fetch().returning(|url, _| {
        Err(DownloadError::NotFound {
            url: url.to_owned(),
        })
    });
    let signatures = MockSignatureVerifier::new();

    let (result, tracked) = run(
        &downloader,
        &signatures,
        VerificationPolicy::permissive(),
        &sandbox.fetched,
        &source,
    );

    assert!(matches!(result, Err(VerificationError::Fetch { .. })));
    assert_eq!(tracked.len(), 1);
}

#[test]
fn policy_deserialises_exact_matching() {
    let policy: VerificationPolicy = toml::from_str(
        "require_checksum = true\nrequire_signature = false\nmanifest_match = \"exact\"\n",
    )
    .expect("valid policy");
    assert!(policy.require_checksum());
    assert!(!policy.require_signature());
    assert_eq!(policy.manifest_match(), ManifestMatch::ExactField);
}

#[test]
fn policy_table_must_name_both_requirements() {
    let err = toml::from_str::<VerificationPolicy>("require_checksum = true\n")
        .expect_err("incomplete policy");
    assert!(err.to_string().contains("require_signature"), "{err}");
}
