use std::path::Path;
use std::process::{Command, Output};

/// Run the tierline binary against an isolated home directory
pub fn tierline(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tierline"))
        .args(args)
        .env("TIERLINE_HOME", home)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run tierline binary")
}

pub fn stdout_json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "tierline failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}
