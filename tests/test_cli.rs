// tests/test_cli.rs
//
// The gcsfs binary keeps stdout for command output; logs go to stderr.
// Runs against an emulator address with nothing listening, so no network
// or credentials are needed.

#![cfg(feature = "gcs")]

use std::process::Command;

#[test]
fn test_logs_stay_off_stdout() {
    let output = Command::new(env!("CARGO_BIN_EXE_gcsfs"))
        .args(["-vv", "exists", "gs://no-such-bucket/no-such-object"])
        .env_remove("RUST_LOG")
        .env_remove("GCS_ENDPOINT_URL")
        .env("STORAGE_EMULATOR_HOST", "127.0.0.1:9")
        .output()
        .expect("run gcsfs");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(stdout, "false\n", "stderr was: {stderr}");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("http://127.0.0.1:9"), "stderr was: {stderr}");
}
