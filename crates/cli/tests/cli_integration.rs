//! CLI integration tests for the `lastmile` binary.
//!
//! Uses `assert_cmd` to spawn the binary and verify exit codes, stdout
//! content, and stderr content.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use lastmile_auth::{Role, TokenCodec};
use predicates::prelude::*;

/// Helper: create a Command for the `lastmile` binary with a clean
/// environment for the variables it reads.
fn lastmile() -> Command {
    let mut cmd = cargo_bin_cmd!("lastmile");
    cmd.env_remove("LASTMILE_JWT_SECRET");
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_0_with_description() {
    lastmile()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Delivery tracking and dispatch server"));
}

#[test]
fn version_exits_0() {
    lastmile()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("lastmile"));
}

#[test]
fn token_is_verifiable_with_the_same_secret() {
    let output = lastmile()
        .args(["token", "--subject", "d7", "--role", "Driver", "--secret", "s3cret"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let token = String::from_utf8(output).unwrap();
    let claims = TokenCodec::new("s3cret").verify(token.trim()).unwrap();

    assert_eq!(claims.sub, "d7");
    assert_eq!(Role::parse(&claims.role), Some(Role::Driver));
    assert_eq!(claims.driver_id.as_deref(), Some("d7"));
    assert!(claims.exp > claims.iat);
}

#[test]
fn token_secret_from_environment() {
    lastmile()
        .env("LASTMILE_JWT_SECRET", "env-secret")
        .args(["token", "--subject", "a1", "--role", "admin"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^[\w-]+\.[\w-]+\.[\w-]+\n$").unwrap());
}

#[test]
fn token_without_secret_fails() {
    lastmile()
        .args(["token", "--subject", "a1", "--role", "admin"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("LASTMILE_JWT_SECRET"));
}

#[test]
fn token_with_unknown_role_fails() {
    lastmile()
        .args(["token", "--subject", "a1", "--role", "owner", "--secret", "s"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown role 'owner'"));
}

#[test]
fn serve_without_secret_fails() {
    lastmile()
        .args(["serve", "--port", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("jwt_secret"));
}

#[test]
fn serve_with_half_tls_flags_fails() {
    lastmile()
        .args(["serve", "--tls-cert", "cert.pem"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--tls-cert and --tls-key"));
}

#[test]
fn serve_with_missing_config_file_fails() {
    lastmile()
        .args(["serve", "--config", "/nonexistent/lastmile.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}
