//! Tests for provisioner CLI parsing and default behaviours.

use super::*;
use rstest::rstest;

#[test]
fn cli_parses_defaults() {
    let cli = Cli::parse_from(["artefact-provisioner"]);
    assert!(cli.config.is_none());
    assert!(cli.port.is_none());
    assert!(!cli.force);
    assert!(!cli.dry_run);
    assert!(!cli.json);
    assert_eq!(cli.verbosity, 0);
    assert!(!cli.quiet);
    assert_eq!(cli.patch_overrides(), PatchOverrides::default());
}

#[test]
fn cli_parses_config_path() {
    let cli = Cli::parse_from(["artefact-provisioner", "-c", "/etc/provision.toml"]);
    assert_eq!(cli.config, Some(Utf8PathBuf::from("/etc/provision.toml")));
}

#[test]
fn cli_maps_patch_flags_to_overrides() {
    let cli = Cli::parse_from([
        "artefact-provisioner",
        "--port",
        "8443",
        "--document-root",
        "/srv/www",
        "--php-ini-dir",
        "/etc/php",
        "--module-path",
        "/usr/lib/php/libphp.so",
    ]);
    let overrides = cli.patch_overrides();
    assert_eq!(overrides.listen_port.map(ListenPort::get), Some(8443));
    assert_eq!(overrides.document_root, Some(Utf8PathBuf::from("/srv/www")));
    assert_eq!(overrides.config_search_dir, Some(Utf8PathBuf::from("/etc/php")));
    assert_eq!(
        overrides.module_path,
        Some(Utf8PathBuf::from("/usr/lib/php/libphp.so"))
    );
}

#[rstest]
#[case::zero("0")]
#[case::too_large("65536")]
#[case::not_a_number("http")]
fn cli_rejects_invalid_ports(#[case] port: &str) {
    let result = Cli::try_parse_from(["artefact-provisioner", "--port", port]);
    assert!(result.is_err());
}

#[test]
fn cli_rejects_quiet_with_verbose() {
    let result = Cli::try_parse_from(["artefact-provisioner", "--quiet", "-v"]);
    assert!(result.is_err());
}

#[rstest]
#[case::default(&["artefact-provisioner"], "warn")]
#[case::verbose(&["artefact-provisioner", "-v"], "info")]
#[case::very_verbose(&["artefact-provisioner", "-vv"], "debug")]
#[case::maximum(&["artefact-provisioner", "-vvvv"], "trace")]
fn log_filter_follows_verbosity(#[case] args: &[&str], #[case] expected: &str) {
    let cli = Cli::parse_from(args);
    assert_eq!(cli.log_filter(), expected);
}

#[test]
fn cli_definition_is_consistent() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}
