//! Command-line behavior: exit codes, `--check` output and startup diagnostics.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const DEFS: &str = r#"
role reader
role editor : reader

allow reader read,list /docs
deny  reader read /docs/secret
allow editor write,create,delete /docs

bind gid:100 reader
bind uid:1000 editor
"#;

fn rbacfs(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rbacfs"))
        .args(args)
        .env_remove("RUST_LOG")
        .env("RBACFS_LOG", "off")
        .output()
        .expect("failed to run rbacfs")
}

fn write_defs(dir: &Path, text: &str) -> String {
    let path = dir.join("rbac.defs");
    std::fs::write(&path, text).unwrap();
    path.to_string_lossy().into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_missing_arguments_exit_1() {
    let output = rbacfs(&[]);
    assert_eq!(output.status.code(), Some(1));

    let output = rbacfs(&["/mnt", "/srv"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_help_and_version_exit_0() {
    let output = rbacfs(&["--help"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("--check"));

    let output = rbacfs(&["--version"]);
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_check_prints_summary() {
    let dir = TempDir::new().unwrap();
    let defs = write_defs(dir.path(), DEFS);

    let output = rbacfs(&["--check", &defs]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["rules"].as_array().unwrap().len(), 3);
    assert_eq!(summary["roles"].as_array().unwrap().len(), 2);
    assert_eq!(summary["bindings"].as_array().unwrap().len(), 2);
}

#[test]
fn test_check_reports_parse_error() {
    let dir = TempDir::new().unwrap();
    let defs = write_defs(dir.path(), "role reader\nallow reader fly /docs\n");

    let output = rbacfs(&["--check", &defs]);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("error: invalid definitions file:"), "{err}");
    assert!(err.contains("line 2"), "{err}");
}

#[test]
fn test_check_reports_compile_error() {
    let dir = TempDir::new().unwrap();
    let defs = write_defs(dir.path(), "role a : b\nrole b : a\n");

    let output = rbacfs(&["--check", &defs]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error: invalid definitions file:"));
}

#[test]
fn test_unreadable_defs_exit_1() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.defs");
    let mountpoint = dir.path().to_string_lossy().into_owned();

    let output = rbacfs(&[&mountpoint, &mountpoint, &missing.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error: invalid definitions file:"));
}

#[test]
fn test_missing_root_exit_1() {
    let dir = TempDir::new().unwrap();
    let defs = write_defs(dir.path(), DEFS);
    let mountpoint = dir.path().to_string_lossy().into_owned();
    let root = dir.path().join("missing").to_string_lossy().into_owned();

    let output = rbacfs(&[&mountpoint, &root, &defs]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("invalid backing directory"));
}

#[test]
fn test_unknown_mount_option_exit_1() {
    let dir = TempDir::new().unwrap();
    let defs = write_defs(dir.path(), DEFS);
    let mountpoint = dir.path().to_string_lossy().into_owned();

    let output = rbacfs(&["-o", "noexec", &mountpoint, &mountpoint, &defs]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("unknown mount option: noexec"));
}

#[cfg(not(feature = "fuse"))]
#[test]
fn test_mount_without_fuse_support_exit_1() {
    let dir = TempDir::new().unwrap();
    let defs = write_defs(dir.path(), DEFS);
    let mountpoint = dir.path().to_string_lossy().into_owned();

    let output = rbacfs(&[&mountpoint, &mountpoint, &defs]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("no FUSE support"));
}
