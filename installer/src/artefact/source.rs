//! Downloadable artefact descriptions.
//!
//! An [`ArtefactSource`] names one archive plus the optional material used
//! to verify it: a checksum manifest, a detached signature, and the key
//! fingerprints trusted to have produced that signature. Sources are
//! validated once by [`ArtefactSourceBuilder::build`] and are immutable
//! afterwards.

use super::error::{ArtefactError, Result};
use serde::Deserialize;
use std::fmt;

/// Which downloaded file a detached signature covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignedFile {
    /// The signature covers the archive itself.
    #[default]
    Artefact,
    /// The signature covers the checksum manifest (for example
    /// `SHA256SUMS.gpg` over `SHA256SUMS`).
    Manifest,
}

impl fmt::Display for SignedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Artefact => "artefact",
            Self::Manifest => "manifest",
        })
    }
}

/// A validated OpenPGP key fingerprint or key ID.
///
/// Stored upper-case without spaces or a `0x` prefix.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::artefact::source::KeyFingerprint;
///
/// let fpr = KeyFingerprint::parse("0xd94a a3f0 efe2 1092").unwrap();
/// assert_eq!(fpr.as_str(), "D94AA3F0EFE21092");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyFingerprint(String);

impl KeyFingerprint {
    /// Normalise and validate a fingerprint string.
    ///
    /// # Errors
    ///
    /// Returns [`ArtefactError::InvalidFingerprint`] if the value is empty
    /// after normalisation or contains non-hex characters.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let without_prefix = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let normalised: String = without_prefix
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalised.is_empty() {
            return Err(ArtefactError::InvalidFingerprint {
                value: value.to_owned(),
                reason: "fingerprint is empty".to_owned(),
            });
        }
        if let Some(bad) = normalised.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(ArtefactError::InvalidFingerprint {
                value: value.to_owned(),
                reason: format!("non-hex character '{bad}'"),
            });
        }
        Ok(Self(normalised))
    }

    /// Return the normalised fingerprint.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return whether the full fingerprint `full` names this key.
    ///
    /// Short key IDs match the tail of the full fingerprint.
    ///
    /// # Examples
    ///
    /// ```
    /// use artefact_provisioner::artefact::source::KeyFingerprint;
    ///
    /// let key_id = KeyFingerprint::parse("D94AA3F0EFE21092").unwrap();
    /// assert!(key_id.identifies("843938DF228D22F7B3742BC0D94AA3F0EFE21092"));
    /// assert!(!key_id.identifies("843938DF228D22F7B3742BC00123456789ABCDEF"));
    /// ```
    #[must_use]
    pub fn identifies(&self, full: &str) -> bool {
        full.to_ascii_uppercase().ends_with(&self.0)
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One downloadable unit plus its optional verification material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtefactSource {
    primary_url: String,
    file_name: String,
    checksum_manifest_url: Option<String>,
    signature_url: Option<String>,
    trusted_key_fingerprints: Vec<KeyFingerprint>,
    signature_covers: SignedFile,
}

impl ArtefactSource {
    /// Start describing the artefact served at `primary_url`.
    ///
    /// # Examples
    ///
    /// ```
    /// use artefact_provisioner::artefact::source::ArtefactSource;
    ///
    /// let source = ArtefactSource::builder("https://example.test/dist/php-8.3.zip")
    ///     .checksum_manifest("https://example.test/dist/SHA256SUMS")
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(source.file_name(), "php-8.3.zip");
    /// assert!(source.signature_url().is_none());
    /// ```
    #[must_use]
    pub fn builder(primary_url: impl Into<String>) -> ArtefactSourceBuilder {
        ArtefactSourceBuilder {
            primary_url: primary_url.into(),
            checksum_manifest_url: None,
            signature_url: None,
            fingerprints: Vec::new(),
            signature_covers: SignedFile::Artefact,
        }
    }

    /// Return the archive URL.
    #[must_use]
    pub fn primary_url(&self) -> &str {
        &self.primary_url
    }

    /// Return the archive file name derived from the URL.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Return the checksum manifest URL, if any.
    #[must_use]
    pub fn checksum_manifest_url(&self) -> Option<&str> {
        self.checksum_manifest_url.as_deref()
    }

    /// Return the detached signature URL, if any.
    #[must_use]
    pub fn signature_url(&self) -> Option<&str> {
        self.signature_url.as_deref()
    }

    /// Return the fingerprints to import before signature verification.
    #[must_use]
    pub fn trusted_key_fingerprints(&self) -> &[KeyFingerprint] {
        &self.trusted_key_fingerprints
    }

    /// Return which file the detached signature covers.
    #[must_use]
    pub fn signature_covers(&self) -> SignedFile {
        self.signature_covers
    }

    /// Return true when the source carries no verification material: no
    /// checksum manifest, no signature and no trusted keys.
    #[must_use]
    pub fn is_unverifiable(&self) -> bool {
        self.checksum_manifest_url.is_none()
            && self.signature_url.is_none()
            && self.trusted_key_fingerprints.is_empty()
    }
}

impl fmt::Display for ArtefactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name)
    }
}

/// Incremental constructor for [`ArtefactSource`].
#[derive(Debug, Clone)]
pub struct ArtefactSourceBuilder {
    primary_url: String,
    checksum_manifest_url: Option<String>,
    signature_url: Option<String>,
    fingerprints: Vec<String>,
    signature_covers: SignedFile,
}

impl ArtefactSourceBuilder {
    /// Attach a checksum manifest URL.
    #[must_use]
    pub fn checksum_manifest(mut self, url: impl Into<String>) -> Self {
        self.checksum_manifest_url = Some(url.into());
        self
    }

    /// Attach a detached signature URL.
    #[must_use]
    pub fn signature(mut self, url: impl Into<String>) -> Self {
        self.signature_url = Some(url.into());
        self
    }

    /// Trust an additional key fingerprint. Order is preserved.
    #[must_use]
    pub fn trusted_key(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprints.push(fingerprint.into());
        self
    }

    /// Declare which file the signature covers.
    #[must_use]
    pub fn signature_covers(mut self, covers: SignedFile) -> Self {
        self.signature_covers = covers;
        self
    }

    /// Validate and freeze the source.
    ///
    /// # Errors
    ///
    /// Returns [`ArtefactError::UnnamedUrl`] if any URL lacks a file name,
    /// [`ArtefactError::InvalidFingerprint`] for malformed fingerprints,
    /// and [`ArtefactError::SignedManifestMissing`] if the signature is
    /// declared to cover a manifest the source does not name.
    pub fn build(self) -> Result<ArtefactSource> {
        let file_name = file_name_from_url(&self.primary_url)?;
        for url in [&self.checksum_manifest_url, &self.signature_url]
            .into_iter()
            .flatten()
        {
            file_name_from_url(url)?;
        }
        if self.signature_covers == SignedFile::Manifest && self.checksum_manifest_url.is_none()
        {
            return Err(ArtefactError::SignedManifestMissing {
                url: self.primary_url,
            });
        }
        let trusted_key_fingerprints = self
            .fingerprints
            .iter()
            .map(|fpr| KeyFingerprint::parse(fpr))
            .collect::<Result<Vec<_>>>()?;

        Ok(ArtefactSource {
            primary_url: self.primary_url,
            file_name,
            checksum_manifest_url: self.checksum_manifest_url,
            signature_url: self.signature_url,
            trusted_key_fingerprints,
            signature_covers: self.signature_covers,
        })
    }
}

/// Derive a local file name from the last path segment of `url`.
///
/// Query strings and fragments are ignored.
///
/// # Errors
///
/// Returns [`ArtefactError::UnnamedUrl`] when the path ends in `/` or has
/// no segment at all.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::artefact::source::file_name_from_url;
///
/// let name = file_name_from_url("https://example.test/a/httpd-2.4.zip?mirror=1").unwrap();
/// assert_eq!(name, "httpd-2.4.zip");
/// ```
pub fn file_name_from_url(url: &str) -> Result<String> {
    let without_fragment = url.split('#').next().unwrap_or_default();
    let path = without_fragment.split('?').next().unwrap_or_default();
    let after_scheme = path.split_once("://").map_or(path, |(_, rest)| rest);
    let name = after_scheme
        .split_once('/')
        .and_then(|(_, rest)| rest.rsplit('/').next())
        .unwrap_or_default();

    if name.is_empty() || name == "." || name == ".." {
        return Err(ArtefactError::UnnamedUrl {
            url: url.to_owned(),
        });
    }
    Ok(name.to_owned())
}
