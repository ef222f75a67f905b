//! Integration tests for warp-nextdns.
//!
//! Each test runs the built binary with HOME, the config file and the log
//! directory pointed into a temporary directory. Tests that touch real
//! services require root and are marked with #[ignore].
//! Run with: `sudo cargo test --release -- --ignored`

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Helper to get the path to the compiled binary
fn get_binary_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // Remove test binary name
    path.pop(); // Remove deps directory
    path.push(if cfg!(windows) {
        "warp-nextdns.exe"
    } else {
        "warp-nextdns"
    });
    path
}

/// Check if running as root
#[cfg(unix)]
fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

/// Run warp-nextdns isolated under `home`
fn run_in(home: &Path, args: &[&str]) -> std::process::Output {
    let config = home.join("config.yaml");
    Command::new(get_binary_path())
        .args(args)
        .arg("--config")
        .arg(&config)
        .env("HOME", home)
        .env("USERPROFILE", home)
        .env("WARP_NEXTDNS_LOG_DIR", home.join("logs"))
        .env_remove("WARP_NEXTDNS_PROFILE")
        .output()
        .expect("Failed to execute warp-nextdns")
}

fn run(args: &[&str]) -> (TempDir, std::process::Output) {
    let home = TempDir::new().unwrap();
    let output = run_in(home.path(), args);
    (home, output)
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_version_command() {
    let (_home, output) = run(&["version"]);
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.starts_with("warp-nextdns "));
    assert!(out.trim().ends_with(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_command() {
    let output = Command::new(get_binary_path())
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let out = stdout(&output);
    for cmd in ["setup", "status", "monitor", "backup", "security", "uninstall"] {
        assert!(out.contains(cmd), "help is missing {}", cmd);
    }
    assert!(out.contains("--auto"));
}

#[test]
fn test_invalid_command() {
    let (_home, output) = run(&["frobnicate"]);
    assert!(!output.status.success());
}

#[test]
fn test_backup_without_action() {
    let (_home, output) = run(&["backup"]);
    assert!(!output.status.success());
}

#[test]
fn test_default_config_written_on_first_use() {
    let (home, output) = run(&["backup", "list"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let config = std::fs::read_to_string(home.path().join("config.yaml")).unwrap();
    assert!(config.contains("nextdns"));
    assert!(config.contains("max_backups"));
    assert!(stdout(&output).contains("No backups found"));
}

#[test]
fn test_invalid_config_fails() {
    let home = TempDir::new().unwrap();
    std::fs::write(
        home.path().join("config.yaml"),
        "wgcf:\n  interface: \"this-name-is-far-too-long\"\n",
    )
    .unwrap();
    let output = run_in(home.path(), &["backup", "list"]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
}

#[test]
fn test_backup_create_list_verify() {
    let home = TempDir::new().unwrap();
    let output = run_in(home.path(), &["backup", "create", "--description", "it", "--no-logs"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let output = run_in(home.path(), &["backup", "list"]);
    let out = stdout(&output);
    assert!(out.contains("warp_nextdns_backup_"));
    assert!(out.contains("it"));

    let name = std::fs::read_dir(home.path().join(".warp").join("backups"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .find(|n| n.starts_with("warp_nextdns_backup_"))
        .unwrap();
    let output = run_in(home.path(), &["backup", "verify", &name]);
    assert!(output.status.success());
}

#[test]
fn test_backup_verify_missing_archive() {
    let (_home, output) = run(&["backup", "verify", "does_not_exist.tar.gz"]);
    assert!(!output.status.success());
}

#[test]
fn test_security_encrypt_decrypt() {
    let home = TempDir::new().unwrap();
    let output = run_in(home.path(), &["security", "encrypt", "abc123"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let ciphertext = stdout(&output).trim().to_string();
    assert_ne!(ciphertext, "abc123");

    let output = run_in(home.path(), &["security", "decrypt", &ciphertext]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "abc123");
}

#[test]
fn test_security_report() {
    let (_home, output) = run(&["security", "report"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("SECURITY REPORT"));
}

#[test]
fn test_security_audit_flags_plaintext_secret() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("settings.json");
    std::fs::write(&file, r#"{"api_key": "plaintext"}"#).unwrap();
    let output = run_in(home.path(), &["security", "audit", file.to_str().unwrap()]);
    assert!(!output.status.success());
}

#[test]
fn test_security_secure_encrypts_named_keys() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("settings.json");
    std::fs::write(&file, r#"{"api_key": "plaintext", "name": "home"}"#).unwrap();
    let output = run_in(
        home.path(),
        &["security", "secure", file.to_str().unwrap(), "--key", "api_key"],
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
    assert!(value["api_key"].as_str().unwrap().starts_with("encrypted:"));
    assert_eq!(value["name"], "home");
}

#[test]
fn test_security_token() {
    let (_home, output) = run(&["security", "token", "--bytes", "16"]);
    assert!(output.status.success());
    // 16 bytes, unpadded URL-safe base64
    assert_eq!(stdout(&output).trim().len(), 22);
}

#[test]
fn test_logs_without_log_file_content() {
    let (_home, output) = run(&["logs", "--lines", "5"]);
    assert!(output.status.success());
}

#[test]
fn test_logs_clear() {
    let home = TempDir::new().unwrap();
    let log_dir = home.path().join("logs");
    std::fs::create_dir_all(&log_dir).unwrap();
    let log_file = log_dir.join("warp-nextdns.log");
    std::fs::write(&log_file, "old line\n").unwrap();

    let output = run_in(home.path(), &["logs", "--clear"]);
    assert!(output.status.success());
    assert!(!std::fs::read_to_string(&log_file).unwrap().contains("old line"));
}

#[test]
#[ignore] // Requires root and network
fn test_status_command() {
    if !is_root() {
        eprintln!("Skipping test_status_command: requires root");
        return;
    }
    let (_home, output) = run(&["status"]);
    let out = stdout(&output);
    assert!(out.contains("WARP Service"));
    assert!(out.contains("Last Updated"));
}

#[test]
#[ignore] // Requires root and network
fn test_status_json() {
    if !is_root() {
        eprintln!("Skipping test_status_json: requires root");
        return;
    }
    let (_home, output) = run(&["status", "--json"]);
    let value: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(value["components"].as_array().unwrap().len(), 9);
}

#[cfg(unix)]
#[test]
fn test_stop_requires_root() {
    if is_root() {
        return;
    }
    let (_home, output) = run(&["stop"]);
    assert!(!output.status.success());
}
