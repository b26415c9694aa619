#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use portmesh::{DurableStore, SqliteDurableStore};
use serde_json::Value;
use tempfile::TempDir;

fn write_config(dir: &Path) -> (PathBuf, PathBuf) {
    let durable = dir.join("durable.db");
    let config = dir.join("portmesh.toml");
    fs::write(
        &config,
        format!(
            "[durable]\npath = {:?}\n\n[reconciler]\nbatch_size = 100\n",
            durable
        ),
    )
    .expect("write config");
    (config, durable)
}

#[test]
fn load_persists_every_owner_it_touched() {
    let dir = TempDir::new().expect("tempdir");
    let (config, durable) = write_config(dir.path());

    let output = cargo_bin_cmd!("portmesh")
        .args(["--format", "json", "load", "--widgets", "25", "--associations", "300"])
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let summary: Value = serde_json::from_slice(&output).expect("json summary");
    assert_eq!(summary["widgets_created"], 25);
    assert_eq!(summary["associations"], 300);
    assert_eq!(summary["reconciler"]["persist_failures"], 0);
    assert!(summary["reconciler"]["records_persisted"].as_u64().unwrap() > 0);

    let store = SqliteDurableStore::open(&durable).expect("open durable store");
    assert!(store.get_widget("widget_sn_0").unwrap().is_some());
    assert_eq!(store.connection_count().unwrap(), 25);
}

#[test]
fn text_summary_lists_reconciler_counters() {
    let dir = TempDir::new().expect("tempdir");
    let (config, _) = write_config(dir.path());

    let output = cargo_bin_cmd!("portmesh")
        .args(["--quiet", "load", "--widgets", "5", "--associations", "20", "--seed", "9"])
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("Reconciler"));
    assert!(text.contains("records persisted"));
}

#[test]
fn malformed_config_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let config = dir.path().join("bad.toml");
    fs::write(&config, "[reconciler]\nfailure_policy = \"retry\"\n").expect("write config");

    let output = cargo_bin_cmd!("portmesh")
        .args(["load", "--associations", "1"])
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("failed to parse config"), "stderr: {stderr}");
}

#[test]
fn completions_are_generated() {
    let output = cargo_bin_cmd!("portmesh")
        .args(["completions", "bash"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("portmesh"));
}
