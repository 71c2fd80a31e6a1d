use std::process::Command;

fn rtu_client() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rtu_client"));
    // debug builds log to ./rtu_client_*.log otherwise
    cmd.env(
        "RTU_CLIENT_LOG_FILE",
        std::env::temp_dir().join("rtu_client_cli_tests.log"),
    );
    cmd
}

#[test]
fn help_lists_subcommands() {
    let output = rtu_client().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: rtu_client"));
    for sub in ["read", "write-coil", "write-register", "write-multiple", "shell"] {
        assert!(stdout.contains(sub), "missing {sub} in help:\n{stdout}");
    }
}

#[test]
fn list_ports_as_json() {
    let output = rtu_client()
        .args(["--list-ports", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let ports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(ports.is_array());
}

#[test]
fn read_without_port_fails() {
    let output = rtu_client()
        .args(["read", "holding", "--address", "0", "--count", "4"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No serial port given"), "stderr was:\n{stderr}");
}

#[test]
fn out_of_range_unit_id_is_rejected() {
    let output = rtu_client()
        .args(["--port", "/dev/null", "--unit-id", "0", "read", "coils"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
