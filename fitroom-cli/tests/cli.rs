use assert_cmd::Command;
use predicates::prelude::*;

fn fitroom(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("fitroom").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("RUST_LOG")
        .env_remove("FITROOM_CONFIG")
        .env_remove("FITROOM_DB")
        .env_remove("GEMINI_API_KEY");
    cmd
}

#[test]
fn init_writes_default_config() {
    let dir = tempfile::tempdir().unwrap();
    fitroom(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote default config"));

    let raw = std::fs::read_to_string(dir.path().join("fitroom.toml")).unwrap();
    assert!(raw.contains("[oracle]"));
    assert!(raw.contains("gemini-3-pro-image-preview"));
    assert!(raw.contains("max_attempts = 2"));

    // A second init refuses to overwrite.
    fitroom(&dir)
        .arg("init")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--force"));
    fitroom(&dir).args(["init", "--force"]).assert().success();
}

#[test]
fn broken_config_exits_with_config_code() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("fitroom.toml"), "[retry]\nmax_attempts = 0\n").unwrap();
    fitroom(&dir)
        .arg("costs")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("max_attempts"));
}

#[test]
fn costs_on_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    fitroom(&dir)
        .arg("costs")
        .assert()
        .success()
        .stdout(predicate::str::contains("Generations:  0"))
        .stdout(predicate::str::contains("$0.00"));

    let output = fitroom(&dir).args(["costs", "stats", "--json"]).output().unwrap();
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["total_try_ons"], 0);

    fitroom(&dir)
        .args(["costs", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared 0 cost records"));
}

#[test]
fn wardrobe_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    fitroom(&dir)
        .args(["wardrobe", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No saved outfits."));

    fitroom(&dir)
        .args(["wardrobe", "delete", "outfit_1_abc"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No saved outfit"));
}

#[test]
fn missing_api_key_is_an_oracle_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("me.jpg"), b"not really a jpeg").unwrap();
    fitroom(&dir)
        .args(["estimate", "me.jpg"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("GEMINI_API_KEY is not set"));
}

#[test]
fn try_on_without_garments_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("me.jpg"), b"jpeg").unwrap();
    fitroom(&dir)
        .args(["try-on", "--photo", "me.jpg"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("At least one garment"));
}

#[test]
fn unknown_pose_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    fitroom(&dir)
        .args(["try-on", "--photo", "me.jpg", "--pose", "Sideways"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown pose: Sideways"));
}
