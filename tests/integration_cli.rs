/// CLI integration tests for gbdt-fixture.
///
/// These tests invoke the compiled binary end-to-end. `generate` and
/// `verify` need a C compiler on PATH and are skipped gracefully without one;
/// `compare` and the argument checks run everywhere.
use std::process::Command;

use tempfile::tempdir;

/// Returns true if `gcc` is available on PATH.
fn gcc_available() -> bool {
    Command::new("gcc")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[test]
fn generate_then_verify_round_trip() {
    if !gcc_available() {
        eprintln!("SKIP: gcc not available on PATH");
        return;
    }

    let bin = env!("CARGO_BIN_EXE_gbdt-fixture");
    let tmp = tempdir().expect("tempdir");
    let out = tmp.path().join("fixture");

    let output = Command::new(bin)
        .args([
            "generate",
            "--output",
            out.to_str().unwrap(),
            "--rounds",
            "5",
            "--nthread",
            "2",
        ])
        .output()
        .expect("failed to spawn gbdt-fixture binary");
    assert!(
        output.status.success(),
        "generate failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("114/114 within"), "unexpected summary:\n{stdout}");
    assert!(out.join("feature.csv").exists());
    assert!(out.join("score-treelite.csv").exists());

    let status = Command::new(bin)
        .args(["verify", "--dir", out.to_str().unwrap(), "--nthread", "2"])
        .status()
        .expect("failed to spawn gbdt-fixture binary");
    assert!(status.success(), "verify failed");
}

#[test]
fn compare_accepts_close_scores() {
    let bin = env!("CARGO_BIN_EXE_gbdt-fixture");
    let tmp = tempdir().expect("tempdir");
    let a = tmp.path().join("a.csv");
    let b = tmp.path().join("b.csv");
    std::fs::write(&a, "0.5\n0.25\n").expect("write");
    std::fs::write(&b, "0.500001\n0.25\n").expect("write");

    let output = Command::new(bin)
        .args(["compare", a.to_str().unwrap(), b.to_str().unwrap()])
        .output()
        .expect("failed to spawn gbdt-fixture binary");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("2/2 within"));
}

#[test]
fn compare_rejects_distant_scores() {
    let bin = env!("CARGO_BIN_EXE_gbdt-fixture");
    let tmp = tempdir().expect("tempdir");
    let a = tmp.path().join("a.csv");
    let b = tmp.path().join("b.csv");
    std::fs::write(&a, "0.5\n0.25\n").expect("write");
    std::fs::write(&b, "0.5\n0.35\n").expect("write");

    let output = Command::new(bin)
        .args(["compare", a.to_str().unwrap(), b.to_str().unwrap()])
        .output()
        .expect("failed to spawn gbdt-fixture binary");
    assert!(!output.status.success(), "expected non-zero exit");
    assert!(String::from_utf8_lossy(&output.stderr).contains("Mismatched elements: 1 / 2"));

    // The looser tolerance accepts the same pair.
    let status = Command::new(bin)
        .args([
            "compare",
            a.to_str().unwrap(),
            b.to_str().unwrap(),
            "--decimal",
            "0",
        ])
        .status()
        .expect("failed to spawn gbdt-fixture binary");
    assert!(status.success());
}

#[test]
fn generate_rejects_unknown_toolchain() {
    let bin = env!("CARGO_BIN_EXE_gbdt-fixture");
    let tmp = tempdir().expect("tempdir");

    let status = Command::new(bin)
        .args([
            "generate",
            "--output",
            tmp.path().to_str().unwrap(),
            "--toolchain",
            "msvc",
        ])
        .status()
        .expect("failed to spawn gbdt-fixture binary");
    assert!(!status.success(), "expected non-zero exit for msvc toolchain");
}

#[test]
fn verify_missing_fixture_exits_nonzero() {
    let bin = env!("CARGO_BIN_EXE_gbdt-fixture");
    let tmp = tempdir().expect("tempdir");

    let status = Command::new(bin)
        .args(["verify", "--dir", tmp.path().to_str().unwrap()])
        .status()
        .expect("failed to spawn gbdt-fixture binary");
    assert!(!status.success());
}
