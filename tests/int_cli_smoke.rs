#![cfg(unix)]

mod support;

use std::path::Path;
use std::process::Command;

use als_exec::ContainerEngine;
use support::FakeEngine;

fn als_exec(root: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_als-exec"));
    cmd.env("ALS_EXEC_CACHE_DIR", root.join("cache"))
        .env_remove("ALS_EE_ENABLED")
        .env_remove("ALS_EXEC_LOG")
        .env_remove("RUST_LOG")
        .arg("--workspace")
        .arg(root);
    cmd
}

#[test]
fn int_cli_run_passes_through_output_and_exit_code() {
    let td = tempfile::tempdir().expect("tmpdir");
    let out = als_exec(td.path())
        .args(["run", "sh", "-c", "echo hi; echo oops >&2; exit 4"])
        .output()
        .expect("spawn als-exec");
    assert_eq!(out.status.code(), Some(4));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hi");
    assert!(String::from_utf8_lossy(&out.stderr).contains("oops"));
}

#[test]
fn int_cli_cache_path_honours_env() {
    let td = tempfile::tempdir().expect("tmpdir");
    let out = als_exec(td.path())
        .args(["cache", "path"])
        .output()
        .expect("spawn als-exec");
    assert!(out.status.success());
    assert_eq!(
        String::from_utf8_lossy(&out.stdout).trim(),
        td.path().join("cache").display().to_string()
    );
}

#[test]
fn int_cli_doctor_json_reports_fake_engine() {
    let td = tempfile::tempdir().expect("tmpdir");
    let fe = FakeEngine::install(td.path(), ContainerEngine::Podman);
    let path = format!("{}:/usr/bin:/bin", fe.bin_dir().display());
    let out = als_exec(td.path())
        .env("PATH", path)
        .env("ALS_CONTAINER_ENGINE", "podman")
        .args(["doctor", "--json"])
        .output()
        .expect("spawn als-exec");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json");
    assert_eq!(v["engine"], "podman");
    assert_eq!(v["imagePresent"], false);
    assert_eq!(v["engineVersion"], "podman version 9.9.9-fake");
    // doctor never pulls
    assert!(!fe.calls().iter().any(|c| c.starts_with("pull")));
}

#[test]
fn int_cli_rejects_invalid_pull_policy() {
    let td = tempfile::tempdir().expect("tmpdir");
    let out = als_exec(td.path())
        .env("ALS_PULL_POLICY", "sometimes")
        .args(["cache", "path"])
        .output()
        .expect("spawn als-exec");
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("ALS_PULL_POLICY"));
}
