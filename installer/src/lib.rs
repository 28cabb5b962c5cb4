//! Artefact provisioner library.
//!
//! This crate fetches software archives over HTTP with a bounded retry
//! policy, verifies them against checksum manifests and detached OpenPGP
//! signatures, unpacks them into an install directory, and patches an
//! Apache-style server configuration to load the result. It is used by the
//! `artefact-provisioner` CLI binary and can be driven programmatically with
//! injected transports for testing or embedding.
//!
//! # Modules
//!
//! - [`artefact`] - Artefact sources, downloads, integrity checks and extraction
//! - [`cli`] - Command-line argument definitions
//! - [`command`] - External command execution with bounded waits
//! - [`config`] - TOML configuration loading and platform directories
//! - [`error`] - Run-level error taxonomy naming stage and artefact
//! - [`output`] - Progress lines, dry-run plan and JSON run report
//! - [`patch`] - Line-oriented server configuration patching
//! - [`pipeline`] - Provisioning orchestration
//! - [`retry`] - Fixed-delay retry with cancellation

pub mod artefact;
pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod output;
pub mod patch;
pub mod pipeline;
pub mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
