//! Fetching, verifying and unpacking downloadable artefacts.
//!
//! # Sub-modules
//!
//! - [`source`] - Artefact sources and their verification material.
//! - [`download`] - Download trait, HTTP implementation and retrying fetcher.
//! - [`sha256_digest`] - SHA-256 digest newtype (`Sha256Digest`).
//! - [`checksum`] - Streaming digests and checksum manifest lookup.
//! - [`signature`] - Key import and detached signature checks via `gpg`.
//! - [`verification`] - Verification policy, outcomes and the layered verifier.
//! - [`extraction`] - Zip extraction with path traversal protection.
//! - [`cleanup`] - Scoped removal of downloaded files.
//! - [`error`] - Validation errors for artefact value types.

pub mod checksum;
pub mod cleanup;
pub mod download;
pub mod error;
pub mod extraction;
pub mod sha256_digest;
pub mod signature;
pub mod source;
pub mod verification;
