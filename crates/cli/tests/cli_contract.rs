use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;

const ENV_VARS: [&str; 4] = [
    "ANNOTATOR_CACHE_CAPACITY_MB",
    "ANNOTATOR_CACHE_BLOCK_MB",
    "ANNOTATOR_PRELOAD_RADIUS",
    "ANNOTATOR_PREFETCH_WORKERS",
];

/// Command with no cache settings leaking in from the environment
fn annotator(home: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("annotator");
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.env("HOME", home).env("XDG_CONFIG_HOME", home.join(".config"));
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout should contain valid json")
}

#[test]
fn version_prints_package_version() {
    let home = tempfile::tempdir().expect("temp dir should be created");
    annotator(home.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn simulate_emits_report_within_capacity() {
    let home = tempfile::tempdir().expect("temp dir should be created");
    let report = json_stdout(annotator(home.path()).args([
        "simulate",
        "--frames",
        "50",
        "--width",
        "16",
        "--height",
        "16",
        "--channels",
        "1",
        "--capacity-mb",
        "4",
        "--block-mb",
        "1",
        "--radius",
        "2",
        "--workers",
        "1",
        "--steps",
        "40",
    ]));

    assert_eq!(report["frames"], 50);
    assert_eq!(report["frame_bytes"], 256);
    assert_eq!(report["steps"], 40);

    let switches = &report["switches"];
    let served = ["hits", "loaded", "uncached", "failed"]
        .iter()
        .map(|key| switches[*key].as_u64().unwrap())
        .sum::<u64>();
    assert_eq!(served, 40);
    assert_eq!(switches["failed"], 0);

    let cache = &report["cache"];
    assert!(cache["usage_bytes"].as_u64().unwrap() <= cache["capacity_bytes"].as_u64().unwrap());
    assert!(cache["entry_count"].as_u64().unwrap() <= 4);
    assert_eq!(cache["total_blocks"], 4);
    assert_eq!(cache["pinned_blocks"], 0);

    assert_eq!(report["prefetch"]["radius"], 2);
    assert_eq!(report["prefetch"]["workers"], 1);
}

#[test]
fn simulate_prefetch_turns_switches_into_hits() {
    let home = tempfile::tempdir().expect("temp dir should be created");
    let report = json_stdout(annotator(home.path()).args([
        "simulate",
        "--frames",
        "100",
        "--width",
        "32",
        "--height",
        "32",
        "--channels",
        "3",
        "--capacity-mb",
        "64",
        "--block-mb",
        "1",
        "--radius",
        "3",
        "--workers",
        "2",
        "--steps",
        "10",
        "--decode-delay-ms",
        "5",
        "--step-delay-ms",
        "60",
    ]));

    assert!(report["switches"]["hits"].as_u64().unwrap() > 0);
    assert!(report["prefetch"]["completed"].as_u64().unwrap() > 0);
    assert!(report["cache"]["hits"].as_u64().unwrap() > 0);
}

#[test]
fn simulate_backwards_wraps_around() {
    let home = tempfile::tempdir().expect("temp dir should be created");
    let report = json_stdout(annotator(home.path()).args([
        "simulate",
        "--frames",
        "5",
        "--width",
        "8",
        "--height",
        "8",
        "--channels",
        "1",
        "--capacity-mb",
        "8",
        "--block-mb",
        "1",
        "--radius",
        "0",
        "--workers",
        "1",
        "--steps",
        "10",
        "--stride",
        "-1",
    ]));

    // Two passes over five frames: first pass decodes, second pass hits
    assert_eq!(report["stride"], -1);
    assert_eq!(report["switches"]["loaded"], 5);
    assert_eq!(report["switches"]["hits"], 5);
}

#[test]
fn simulate_rejects_invalid_configuration() {
    let home = tempfile::tempdir().expect("temp dir should be created");
    annotator(home.path())
        .args(["simulate", "--workers", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid cache configuration"));
}

#[test]
fn simulate_rejects_empty_source() {
    let home = tempfile::tempdir().expect("temp dir should be created");
    annotator(home.path())
        .args(["simulate", "--frames", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--frames must be >= 1"));
}

#[test]
fn simulate_rejects_unaddressable_frame_dimensions() {
    let home = tempfile::tempdir().expect("temp dir should be created");
    annotator(home.path())
        .args([
            "simulate",
            "--width",
            "4294967295",
            "--height",
            "4294967295",
            "--channels",
            "4294967295",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("are too large"));
}

#[test]
fn config_prints_defaults_without_file() {
    let home = tempfile::tempdir().expect("temp dir should be created");
    let config = json_stdout(annotator(home.path()).arg("config"));

    assert_eq!(config["path"], Value::Null);
    assert_eq!(config["capacity_mb"], 20 * 1024);
    assert_eq!(config["block_size_mb"], 50);
    assert_eq!(config["preload_radius"], 100);
    assert_eq!(config["worker_count"], 4);
    assert_eq!(config["block_size_bytes"], 50 * 1024 * 1024);
}

#[test]
fn config_reads_file_and_env_overrides() {
    let home = tempfile::tempdir().expect("temp dir should be created");
    let file = home.path().join("cache.toml");
    fs::write(&file, "capacity_mb = 1024\nblock_size_mb = 8\npreload_radius = 20\n")
        .expect("config file should be written");

    let config = json_stdout(
        annotator(home.path())
            .arg("config")
            .arg("--file")
            .arg(&file)
            .env("ANNOTATOR_PREFETCH_WORKERS", "6"),
    );

    assert_eq!(config["path"], file.display().to_string());
    assert_eq!(config["capacity_mb"], 1024);
    assert_eq!(config["block_size_mb"], 8);
    assert_eq!(config["preload_radius"], 20);
    assert_eq!(config["worker_count"], 6);
}

#[test]
fn config_save_writes_loadable_file() {
    let home = tempfile::tempdir().expect("temp dir should be created");
    let saved = home.path().join("out").join("cache.toml");

    annotator(home.path())
        .arg("config")
        .arg("--save")
        .arg(&saved)
        .env("ANNOTATOR_PRELOAD_RADIUS", "42")
        .assert()
        .success();

    let contents = fs::read_to_string(&saved).expect("saved config should exist");
    assert!(contents.contains("preload_radius = 42"));

    let config = json_stdout(annotator(home.path()).arg("config").arg("--file").arg(&saved));
    assert_eq!(config["preload_radius"], 42);
}

#[test]
fn config_fails_for_missing_file() {
    let home = tempfile::tempdir().expect("temp dir should be created");
    annotator(home.path())
        .args(["config", "--file"])
        .arg(home.path().join("missing.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file does not exist"));
}

#[test]
fn config_fails_for_unparsable_env() {
    let home = tempfile::tempdir().expect("temp dir should be created");
    annotator(home.path())
        .arg("config")
        .env("ANNOTATOR_CACHE_BLOCK_MB", "lots")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"))
        .stderr(predicate::str::contains("ANNOTATOR_CACHE_BLOCK_MB"));
}
