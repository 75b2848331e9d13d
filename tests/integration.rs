use std::{fs, os::unix::fs::PermissionsExt};

use anyhow::Result;
use assert_fs::TempDir;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::Value;

/// Invalid invocations report a JSON error object on stdout and exit nonzero.
#[rstest]
#[case::no_command(&[], "No command given")]
#[case::unknown_command(&["frobnicate"], "unrecognized subcommand")]
#[case::missing_public_key(&["delete"], "required arguments")]
#[case::invalid_public_key(&["delete", "not-a-valid-key"], "Invalid public key")]
#[case::invalid_subnet(&["add", "--ipv4-subnet", "not-a-subnet"], "--ipv4-subnet")]
#[case::invalid_keepalive(&["add", "--keepalive", "never"], "--keepalive")]
#[tokio::test]
async fn invalid_invocations_report_json_errors(
    #[case] args: &[&str],
    #[case] expected: &str,
) -> Result<()> {
    let output = assert_cmd::Command::cargo_bin("wgraven")?
        .args(args)
        .output()?;

    assert!(!output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout)?;
    let message = value["error"].as_str().unwrap();
    assert!(
        message.contains(expected),
        "{message:?} doesn't mention {expected:?}"
    );

    Ok(())
}

/// Failures past argument parsing come out as JSON errors as well.
#[tokio::test]
async fn runtime_failures_report_json_errors() -> Result<()> {
    let output = assert_cmd::Command::cargo_bin("wgraven")?
        .arg("--interface")
        .arg("wgraven-does-not-exist")
        .arg("delete")
        .arg("MkgQcW7mlCtqWIV3JrtIrBRgG9efxwSvnXOsU1R7x2c=")
        .output()?;

    assert!(!output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout)?;
    let message = value["error"].as_str().unwrap();
    assert!(message.contains("wg set"), "unexpected error: {message:?}");

    Ok(())
}

/// When a subnet has no free host left, add reports the exhaustion as a
/// JSON error without ever invoking wg set.
#[tokio::test]
async fn exhausted_subnet_aborts_add_without_registering() -> Result<()> {
    let tmpdir = TempDir::new()?;
    let set_marker = tmpdir.join("wg-set-called");

    // Stand-in wg that reports a fully allocated /30 and records set calls.
    let wg_stub = tmpdir.join("wg");
    fs::write(
        &wg_stub,
        format!(
            "#!/bin/sh\n\
             if [ \"$1\" = \"show\" ]; then\n\
             \tprintf 'peerA\\t10.0.0.1/32 fd00::1/128\\npeerB\\t10.0.0.2/32 fd00::2/128\\n'\n\
             else\n\
             \ttouch \"{}\"\n\
             fi\n",
            set_marker.display()
        ),
    )?;
    fs::set_permissions(&wg_stub, fs::Permissions::from_mode(0o755))?;

    let output = assert_cmd::Command::cargo_bin("wgraven")?
        .env(
            "PATH",
            format!("{}:{}", tmpdir.display(), std::env::var("PATH")?),
        )
        .arg("add")
        .arg("--ipv4-subnet")
        .arg("10.0.0.0/30")
        .arg("--ipv6-subnet")
        .arg("fd00::/126")
        .output()?;

    assert!(!output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(value["error"], "No free IPv4 address left in 10.0.0.0/30");
    assert!(
        !set_marker.exists(),
        "wg set was invoked for an exhausted subnet"
    );

    Ok(())
}

#[tokio::test]
async fn version_goes_to_stdout() -> Result<()> {
    let output = assert_cmd::Command::cargo_bin("wgraven")?
        .arg("--version")
        .output()?;

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("wgraven"));
    assert_eq!(String::from_utf8_lossy(&output.stderr), "");

    Ok(())
}

#[tokio::test]
async fn help_lists_the_commands() -> Result<()> {
    let output = assert_cmd::Command::cargo_bin("wgraven")?
        .arg("--help")
        .output()?;

    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout).to_string();
    for command in ["add", "delete", "transfer"] {
        assert!(help.contains(command), "help doesn't mention {command}");
    }

    Ok(())
}

#[tokio::test]
async fn prints_shell_completions() -> Result<()> {
    let output = assert_cmd::Command::cargo_bin("wgraven")?
        .arg("--print-completions")
        .arg("bash")
        .output()?;

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("wgraven"));

    Ok(())
}

#[tokio::test]
async fn prints_manpage() -> Result<()> {
    let output = assert_cmd::Command::cargo_bin("wgraven")?
        .arg("--print-manpage")
        .output()?;

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(".TH"));

    Ok(())
}
