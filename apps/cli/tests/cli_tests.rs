//! CLI 端到端测试
//!
//! 总线相关命令都在 `--virtual` 模式下运行，配置文件指向临时目录。

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn cli(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("vesc-cli").unwrap();
    cmd.arg("--config").arg(config);
    cmd
}

fn virtual_cli(config: &Path, nodes: u8) -> Command {
    let mut cmd = cli(config);
    cmd.args(["--node-id", "100", "--virtual", &nodes.to_string()]);
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("vesc-cli")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("monitor"))
        .stdout(predicate::str::contains("duty"));
}

#[test]
fn test_config_set_and_get() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    cli(&path)
        .args(["config", "set", "--channel", "vcan3", "--node-id", "90"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vcan3"));

    cli(&path)
        .args(["config", "get", "channel"])
        .assert()
        .success()
        .stdout(predicate::str::diff("vcan3\n"));
    cli(&path)
        .args(["config", "get", "node_id"])
        .assert()
        .success()
        .stdout(predicate::str::diff("90\n"));

    let saved = std::fs::read_to_string(&path).unwrap();
    assert!(saved.contains("channel = \"vcan3\""));
}

#[test]
fn test_config_rejects_broadcast_node_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    cli(&path)
        .args(["config", "set", "--node-id", "255"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("reserved for broadcast"));
    assert!(!path.exists());
}

#[test]
fn test_scan_virtual_bus() {
    let dir = tempfile::tempdir().unwrap();
    virtual_cli(&dir.path().join("config.toml"), 3)
        .args(["scan", "--wait-ms", "300"])
        .assert()
        .success()
        .stdout(predicate::str::contains("发现 3 个控制器"));
}

#[test]
fn test_scan_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = virtual_cli(&dir.path().join("config.toml"), 2)
        .args(["scan", "--wait-ms", "300", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["node_id"], 1);
    assert_eq!(entries[1]["kind"], "controller");
}

#[test]
fn test_duty_on_virtual_controller() {
    let dir = tempfile::tempdir().unwrap();
    virtual_cli(&dir.path().join("config.toml"), 1)
        .args(["duty", "0.2", "--target", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("占空比 0.200"));
}

#[test]
fn test_duty_hold_then_stop() {
    let dir = tempfile::tempdir().unwrap();
    virtual_cli(&dir.path().join("config.toml"), 1)
        .args(["duty", "-0.1", "--hold-ms", "250"])
        .assert()
        .success()
        .stdout(predicate::str::contains("电机已停止"));
}

#[test]
fn test_out_of_range_duty_fails() {
    let dir = tempfile::tempdir().unwrap();
    virtual_cli(&dir.path().join("config.toml"), 1)
        .args(["duty", "1.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("超出范围"));
}

#[test]
fn test_missing_target_fails() {
    let dir = tempfile::tempdir().unwrap();
    virtual_cli(&dir.path().join("config.toml"), 1)
        .args(["stop", "--target", "9", "--wait-ms", "300"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("未找到控制器 9"));
}

#[test]
fn test_status_and_monitor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    virtual_cli(&path, 2)
        .args(["status", "--target", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ID: 2"))
        .stdout(predicate::str::contains("本机节点 ID: 100"));

    virtual_cli(&path, 2)
        .args(["monitor", "--count", "2", "--frequency", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("监控已结束"));
}
