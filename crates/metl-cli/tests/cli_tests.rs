//! CLI integration tests for metl.
//!
//! These tests verify command-line argument parsing, help output,
//! command output and exit codes against scratch storage directories.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Scratch job-files and storage directories.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("jobs")).unwrap();
        Self { dir }
    }

    fn jobs(&self) -> std::path::PathBuf {
        self.dir.path().join("jobs")
    }

    fn storage(&self) -> std::path::PathBuf {
        self.dir.path().join("storage")
    }

    /// Command with storage and job files pointed at this workspace.
    fn cmd(&self) -> Command {
        let mut cmd = cmd();
        cmd.arg("--local-storage")
            .arg(self.storage())
            .arg("--job-files")
            .arg(self.jobs());
        cmd
    }

    /// Write `<jobs>/<name>.yaml` reading `csv` through the stdout engine.
    fn add_job(&self, name: &str, csv: &str, columns: &str) {
        let columns = if columns.is_empty() {
            " []\n".to_string()
        } else {
            format!("\n{}", columns)
        };
        let input = self.dir.path().join(format!("{}.csv", name));
        std::fs::write(&input, csv).unwrap();
        let yaml = format!(
            "name: {name}\ndescription: Nightly {name}\nauthor: ops\njob:\n  fetching:\n    file: file://{input}\n  parsing:\n    engine: csv\n    options:\n      header: true\n  processing:\n    workers: 2\n    columns:{columns}  outputting:\n    engine: stdout\n",
            name = name,
            input = input.display(),
            columns = columns,
        );
        write(&self.jobs().join(format!("{}.yaml", name)), &yaml);
    }
}

fn write(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

/// Get a command for the metl binary with no METL_* environment.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("metl").unwrap();
    cmd.env_remove("METL_LOCAL_STORAGE")
        .env_remove("METL_JOB_FILES")
        .env_remove("METL_LOG_LEVEL")
        .env_remove("METL_LOG_DIR")
        .env_remove("METL_RUN_COMMAND");
    cmd
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("unlock"))
        .stdout(predicate::str::contains("add"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("list"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--workers"));
}

#[test]
fn test_list_subcommand_help() {
    cmd()
        .args(["list", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--all"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("metl"));
}

#[test]
fn test_global_flags_documented() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--local-storage"))
        .stdout(predicate::str::contains("--job-files"))
        .stdout(predicate::str::contains("--log"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("--log-dir"))
        .stdout(predicate::str::contains("--run-command"));
}

#[test]
fn test_missing_subcommand_fails() {
    cmd().assert().failure();
}

#[test]
fn test_run_requires_job_name() {
    cmd()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("<JOB>"));
}

// =============================================================================
// Run
// =============================================================================

#[test]
fn test_run_writes_json_rows_to_stdout() {
    let ws = Workspace::new();
    ws.add_job(
        "orders",
        "A,B,C,D,E\n1,b1,c1,d1,e1\n2,b2,c2,d2,e2\n",
        "      - name: D\n        discard: true\n      - name: A\n        mapping: INT\n        type: int\n",
    );

    let output = ws.cmd().args(["run", "orders"]).output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8(output.stdout).unwrap();
    let mut lines: Vec<&str> = stdout.lines().collect();
    lines.sort();
    assert_eq!(
        lines,
        vec![
            r#"{"B":"b1","C":"c1","E":"e1","INT":"1"}"#,
            r#"{"B":"b2","C":"c2","E":"e2","INT":"2"}"#,
        ]
    );
}

#[test]
fn test_run_releases_lock() {
    let ws = Workspace::new();
    ws.add_job("orders", "A\n1\n", "");

    ws.cmd().args(["run", "orders"]).assert().success();
    ws.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains(">>").not());
}

#[test]
fn test_run_missing_job_exits_one() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["run", "absent"])
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("error: "));
}

#[test]
fn test_run_locked_job_exits_one() {
    let ws = Workspace::new();
    ws.add_job("orders", "A\n1\n", "");
    std::fs::create_dir_all(ws.storage()).unwrap();
    write(&ws.storage().join("state.lock"), "orders|1700000000\n");

    ws.cmd()
        .args(["run", "orders"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("error: Job orders is already running"));
}

#[test]
fn test_run_unknown_engine_exits_one() {
    let ws = Workspace::new();
    ws.add_job("orders", "A\n1\n", "");
    let path = ws.jobs().join("orders.yaml");
    let yaml = std::fs::read_to_string(&path).unwrap().replace("engine: stdout", "engine: kafka");
    write(&path, &yaml);

    ws.cmd()
        .args(["run", "orders"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("output engine 'kafka' does not exist"));
}

// =============================================================================
// Status and Unlock
// =============================================================================

#[test]
fn test_status_lists_active_jobs() {
    let ws = Workspace::new();
    std::fs::create_dir_all(ws.storage()).unwrap();
    write(&ws.storage().join("state.lock"), "orders|1700000000\nusers|1700000100\n");

    ws.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("The following jobs are active:\n"))
        .stdout(predicate::str::contains(">> orders: since "))
        .stdout(predicate::str::contains(">> users: since "));
}

#[test]
fn test_status_without_lock_file() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout("The following jobs are active:\n");
}

#[test]
fn test_unlock_removes_entry() {
    let ws = Workspace::new();
    std::fs::create_dir_all(ws.storage()).unwrap();
    write(&ws.storage().join("state.lock"), "orders|1700000000\nusers|1700000100\n");

    ws.cmd().args(["unlock", "orders"]).assert().success();

    let contents = std::fs::read_to_string(ws.storage().join("state.lock")).unwrap();
    assert_eq!(contents, "users|1700000100\n");
}

// =============================================================================
// Add and List
// =============================================================================

#[test]
fn test_add_then_list() {
    let ws = Workspace::new();
    ws.add_job("orders", "A\n1\n", "");

    ws.cmd()
        .args(["add", "orders"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Job orders added"));

    let crontab = std::fs::read_to_string(ws.storage().join("crontab")).unwrap();
    assert_eq!(
        crontab,
        "@daily /usr/bin/env metl run orders >> /var/log/metl/orders.log\n"
    );

    ws.cmd().arg("list").assert().success().stdout("orders\n");
}

#[test]
fn test_add_uses_log_dir_and_run_command_flags() {
    let ws = Workspace::new();
    ws.add_job("orders", "A\n1\n", "");

    ws.cmd()
        .args(["--log-dir", "/srv/logs", "--run-command", "/opt/metl/bin/metl"])
        .args(["add", "orders"])
        .assert()
        .success();

    let crontab = std::fs::read_to_string(ws.storage().join("crontab")).unwrap();
    assert_eq!(
        crontab,
        "@daily /opt/metl/bin/metl run orders >> /srv/logs/orders.log\n"
    );
}

#[test]
fn test_add_twice_fails() {
    let ws = Workspace::new();
    ws.add_job("orders", "A\n1\n", "");

    ws.cmd().args(["add", "orders"]).assert().success();
    ws.cmd()
        .args(["add", "orders"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Job orders is already added"));
}

#[test]
fn test_list_all_shows_job_files() {
    let ws = Workspace::new();
    ws.add_job("orders", "A\n1\n", "");
    ws.add_job("billing", "A\n1\n", "");
    write(&ws.jobs().join("broken.yaml"), "name: [");

    ws.cmd()
        .args(["list", "-a"])
        .assert()
        .success()
        .stdout("billing (by ops) Nightly billing\norders (by ops) Nightly orders\n");
}
