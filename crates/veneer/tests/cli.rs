use std::process::Command;

#[test]
fn help_exits_successfully() {
    // Arrange
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_veneer"));
    cmd.arg("--help");

    // Act
    let output = cmd.output().expect("failed to execute veneer");

    // Assert
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("native title"));
    assert!(!stdout.contains("watchdog"));
}

#[test]
fn version_exits_successfully() {
    // Arrange
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_veneer"));
    cmd.arg("--version");

    // Act
    let output = cmd.output().expect("failed to execute veneer");

    // Assert
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("veneer"));
}

#[test]
fn run_help_lists_overrides() {
    // Arrange
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_veneer"));
    cmd.args(["run", "--help"]);

    // Act
    let output = cmd.output().expect("failed to execute veneer");

    // Assert
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--extended-logging", "--ignore-launcher", "--window", "--disable-watchdog"] {
        assert!(stdout.contains(flag), "missing {flag}");
    }
}

#[test]
fn unknown_priority_is_rejected() {
    // Arrange
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_veneer"));
    cmd.args(["priority", "turbo"]);

    // Act
    let output = cmd.output().expect("failed to execute veneer");

    // Assert
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("above-normal"));
}
