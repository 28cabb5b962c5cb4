//! SHA-256 digest newtype shared by the checksum verifier and manifests.
//!
//! The canonical form is 64 lowercase hexadecimal characters. Publishers
//! are not consistent about case in their `SHA256SUMS` files, so
//! [`Sha256Digest::parse_manifest_token`] folds case before validating,
//! while the `TryFrom` conversions insist on the canonical form.

use super::error::{ArtefactError, Result};
use std::fmt;

/// Expected length of a hex-encoded SHA-256 digest.
const DIGEST_HEX_LEN: usize = 64;

/// A validated, lowercase hex-encoded SHA-256 digest.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::artefact::sha256_digest::Sha256Digest;
///
/// let digest = Sha256Digest::parse_manifest_token(&"AB".repeat(32)).unwrap();
/// assert_eq!(digest.as_str(), "ab".repeat(32));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Encode raw 32-byte hash output as a digest.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
    }

    /// Parse the digest column of a checksum manifest line.
    ///
    /// Upper-case hex is folded to lower case before validation.
    ///
    /// # Errors
    ///
    /// Returns [`ArtefactError::InvalidSha256Digest`] if the token is not
    /// 64 hex characters.
    pub fn parse_manifest_token(token: &str) -> Result<Self> {
        Self::try_from(token.to_ascii_lowercase())
    }

    /// Return the digest as a hex string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the wrapper and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<&str> for Sha256Digest {
    type Error = ArtefactError;

    fn try_from(value: &str) -> Result<Self> {
        validate_sha256(value)?;
        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for Sha256Digest {
    type Error = ArtefactError;

    fn try_from(value: String) -> Result<Self> {
        validate_sha256(&value)?;
        Ok(Self(value))
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate that `value` is a well-formed hex-encoded SHA-256 digest.
fn validate_sha256(value: &str) -> Result<()> {
    if value.len() != DIGEST_HEX_LEN {
        return Err(ArtefactError::InvalidSha256Digest {
            reason: format!(
                "expected {DIGEST_HEX_LEN} hex characters, got {}",
                value.len()
            ),
        });
    }
    if let Some(bad) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(ArtefactError::InvalidSha256Digest {
            reason: format!("non-hex character '{bad}'"),
        });
    }
    if value.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ArtefactError::InvalidSha256Digest {
            reason: "digest must be lowercase".to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn from_bytes_encodes_lowercase_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xAB;
        bytes[31] = 0x01;
        let digest = Sha256Digest::from_bytes(&bytes);
        assert!(digest.as_str().starts_with("ab00"));
        assert!(digest.as_str().ends_with("01"));
        assert_eq!(digest.as_str().len(), 64);
    }

    #[test]
    fn from_bytes_matches_known_sha256_vector() {
        use sha2::{Digest, Sha256};

        let digest = Sha256Digest::from_bytes(&Sha256::digest(b"abc"));
        assert_eq!(
            digest.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[rstest]
    #[case::too_short("abcdef")]
    #[case::too_long(&"a".repeat(65))]
    #[case::non_hex(&format!("{}g", "a".repeat(63)))]
    #[case::uppercase(&"A".repeat(64))]
    fn strict_conversion_rejects(#[case] value: &str) {
        assert!(Sha256Digest::try_from(value).is_err(), "{value}");
    }

    #[test]
    fn manifest_token_folds_case() {
        let digest = Sha256Digest::parse_manifest_token(&"F0".repeat(32)).expect("valid token");
        assert_eq!(digest.as_str(), "f0".repeat(32));
    }

    #[test]
    fn manifest_token_still_rejects_garbage() {
        let result = Sha256Digest::parse_manifest_token("not-a-digest");
        assert!(matches!(
            result,
            Err(ArtefactError::InvalidSha256Digest { .. })
        ));
    }

    #[test]
    fn display_shows_full_digest() {
        let hex = "c".repeat(64);
        let digest = Sha256Digest::try_from(hex.clone()).expect("known good");
        assert_eq!(digest.to_string(), hex);
    }
}
