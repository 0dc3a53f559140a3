use std::path::Path;
use std::process::{Command, Output};

use chrono::{Duration, Utc};
use serde_json::{Value, json};

/// Run the CLI with an isolated data directory and optional endpoint.
pub async fn run_cli(args: &[&str], data_dir: &Path, endpoint: Option<&str>) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tripdesk"));
    cmd.args(args);
    cmd.env("TRIPDESK_DATA_DIR", data_dir);
    cmd.env_remove("TRIPDESK_PASSWORD");
    cmd.env_remove("RUST_LOG");
    match endpoint {
        Some(endpoint) => cmd.env("TRIPDESK_ENDPOINT", endpoint),
        None => cmd.env_remove("TRIPDESK_ENDPOINT"),
    };
    // The mock server runs on this runtime, so keep it free while the CLI runs.
    tokio::task::spawn_blocking(move || cmd.output().expect("Failed to execute CLI"))
        .await
        .expect("CLI task panicked")
}

/// Run the CLI and expect success.
pub async fn run_cli_success(args: &[&str], data_dir: &Path, endpoint: Option<&str>) -> String {
    let output = run_cli(args, data_dir, endpoint).await;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!("CLI command failed: {:?}\nstderr: {}", args, stderr);
    }
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Token payload as returned by the sign-in and refresh mutations.
pub fn token_payload(access: &str, refresh: &str, access_ttl: Duration) -> Value {
    let now = Utc::now();
    json!({
        "token": access,
        "refreshToken": refresh,
        "tokenExpiresAt": (now + access_ttl).to_rfc3339(),
        "refreshExpiresAt": (now + Duration::days(7)).to_rfc3339(),
    })
}

/// Write a persisted credential straight into `data_dir`.
pub fn write_session(data_dir: &Path, access: &str, refresh: &str, access_ttl: Duration) {
    let now = Utc::now();
    let payload = json!({
        "accessToken": access,
        "refreshToken": refresh,
        "accessExpiresAt": (now + access_ttl).to_rfc3339(),
        "refreshExpiresAt": (now + Duration::days(7)).to_rfc3339(),
    });
    std::fs::create_dir_all(data_dir).unwrap();
    std::fs::write(
        data_dir.join("tripdesk.session.json"),
        serde_json::to_string(&payload).unwrap(),
    )
    .unwrap();
}
