//! Integration tests for the assayer CLI.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const ORDERS: &str = "\
id,customer,total
1,ada,9.5
2,,12
3,grace,-1
";

const PROJECT: &str = r#"
experiment: quality
run_id: r1
stores:
  - name: data
    type: local
    uri: data
resources:
  - name: orders
    path: orders.csv
    store: data
run:
  num_worker: 2
  inference:
    - library: tabular
  validation:
    - library: tabular
    - library: sqlite
  profiling:
    - library: tabular
  metric:
    - library: tabular
constraints:
  - name: positive-total
    type: tabular
    resources: [orders]
    check: { column: total, minimum: 0 }
  - name: no-negative
    type: sqlite
    resources: [orders]
    check:
      query: SELECT id FROM orders WHERE total < 0
metrics:
  - name: rows
    type: tabular
    resources: [orders]
    metric: row_count
metadata_store:
  name: out
  type: local
  uri: runs
persist_data: true
"#;

fn assayer() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_assayer"));
    cmd.env_remove("RUST_LOG");
    cmd
}

fn workspace(project: &str) -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::create_dir_all(dir.path().join("data")).expect("Failed to create data dir");
    std::fs::write(dir.path().join("data/orders.csv"), ORDERS).expect("Failed to write orders");
    std::fs::write(dir.path().join("project.yaml"), project).expect("Failed to write project");
    dir
}

fn run_in(dir: &Path, args: &[&str]) -> Output {
    assayer()
        .current_dir(dir)
        .args(["--config", "no-config.toml"])
        .args(args)
        .output()
        .expect("Failed to run assayer")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn run_dir(dir: &Path) -> PathBuf {
    dir.join("runs/quality/r1")
}

fn read_json(path: &Path) -> serde_json::Value {
    let bytes = std::fs::read(path).expect("Failed to read file");
    serde_json::from_slice(&bytes).expect("Failed to parse JSON")
}

#[test]
fn test_libraries() {
    let output = assayer().arg("libraries").output().expect("Failed to run assayer");
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("tabular"));
    assert!(out.contains("sqlite"));
}

#[test]
fn test_check_valid_project() {
    let dir = workspace(PROJECT);
    let output = run_in(dir.path(), &["check", "project.yaml"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("1 resources, 2 constraints"));
}

#[test]
fn test_check_rejects_unknown_library() {
    let dir = workspace(&PROJECT.replace("library: sqlite", "library: great_expectations"));
    let output = run_in(dir.path(), &["check", "project.yaml"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("great_expectations"));
}

#[test]
fn test_check_rejects_duplicate_stores() {
    let project = PROJECT.replace(
        "resources:\n",
        "  - name: data\n    type: local\nresources:\n",
    );
    let dir = workspace(&project);
    let output = run_in(dir.path(), &["check", "project.yaml"]);
    assert!(!output.status.success());
}

#[test]
fn test_run_writes_run_directory() {
    let dir = workspace(PROJECT);
    let output = run_in(dir.path(), &["run", "project.yaml"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let out = stdout(&output);
    assert!(out.contains("Status: FINISHED"));
    assert!(out.contains("invalid (1 errors)"));

    let run = run_dir(dir.path());
    assert_eq!(read_json(&run.join("metadata/run.json"))["status"], "FINISHED");
    assert!(run.join("metadata/run_env.json").is_file());
    assert!(run.join("metadata/schema_0.json").is_file());
    assert!(run.join("metadata/report_1.json").is_file());
    assert!(run.join("metadata/profile_0.json").is_file());
    assert_eq!(read_json(&run.join("metadata/metric_0.json"))["value"], 3);
    assert!(run.join("artifacts/schema_0.json").is_file());
    assert!(run.join("artifacts/report_0.json").is_file());
    assert!(run.join("artifacts/report_1.json").is_file());
    assert!(run.join("artifacts/orders_0.csv").is_file());
}

#[test]
fn test_run_id_collision_and_overwrite() {
    let dir = workspace(PROJECT);
    assert!(run_in(dir.path(), &["run", "project.yaml"]).status.success());

    let again = run_in(dir.path(), &["run", "project.yaml"]);
    assert!(!again.status.success());
    assert!(String::from_utf8_lossy(&again.stderr).contains("already exists"));

    let overwrite = run_in(dir.path(), &["run", "project.yaml", "--overwrite"]);
    assert!(overwrite.status.success());
}

#[test]
fn test_strict_fails_on_plugin_errors() {
    let project =
        PROJECT.replace("check: { column: total, minimum: 0 }", "check: { colum: total }");
    let dir = workspace(&project);

    let lenient = run_in(dir.path(), &["run", "project.yaml"]);
    assert!(lenient.status.success());
    assert!(stdout(&lenient).contains("ERR"));

    let strict = run_in(dir.path(), &["run", "project.yaml", "--strict", "--overwrite"]);
    assert!(!strict.status.success());
    assert!(String::from_utf8_lossy(&strict.stderr).contains("plugin(s) reported errors"));
}

#[test]
fn test_subprocess_isolation() {
    let dir = workspace(PROJECT);
    let output = run_in(dir.path(), &["run", "project.yaml", "--isolation", "subprocess"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let profile = read_json(&run_dir(dir.path()).join("metadata/profile_0.json"));
    assert_eq!(profile["stats"]["rows"], 3);
    assert!(!stdout(&output).contains("ERR"));
}

#[test]
fn test_in_process_isolation_on_request() {
    let dir = workspace(PROJECT);
    let output = run_in(dir.path(), &["run", "project.yaml", "--isolation", "isolated"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let run = read_json(&run_dir(dir.path()).join("metadata/run.json"));
    assert_eq!(run["config"]["isolation"]["mode"], "isolated");
    let profile = read_json(&run_dir(dir.path()).join("metadata/profile_0.json"));
    assert_eq!(profile["stats"]["rows"], 3);
}

#[test]
fn test_default_isolation_uses_worker_processes() {
    let dir = workspace(PROJECT);
    let output = run_in(dir.path(), &["run", "project.yaml"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let run = read_json(&run_dir(dir.path()).join("metadata/run.json"));
    assert_eq!(run["config"]["isolation"]["mode"], "subprocess");
    assert_eq!(run["config"]["isolation"]["args"], serde_json::json!(["worker"]));
}

#[test]
fn test_data_glob_adds_resources() {
    let project = r#"
experiment: adhoc
run_id: r1
run:
  inference:
    - library: tabular
"#;
    let dir = workspace(project);
    std::fs::write(dir.path().join("data/users.csv"), "id,name\n1,ada\n")
        .expect("Failed to write users");

    let output = run_in(dir.path(), &["run", "project.yaml", "--data", "data/*.csv"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("(2 resources)"));

    let metadata = dir.path().join("assayer-runs/adhoc/r1/metadata");
    assert!(metadata.join("schema_0.json").is_file());
    assert!(metadata.join("schema_1.json").is_file());
}

#[test]
fn test_worker_answers_unknown_library() {
    use std::io::Write;
    use std::process::Stdio;

    let request = serde_json::json!({
        "spec": {
            "id": "p-1",
            "operation": "profiling",
            "library": "missing",
            "affinity": "multi_process",
            "resource": {"name": "orders", "path": "orders.csv", "store": "local"},
            "store": {"name": "local", "type": "local"},
            "reader": "table"
        }
    });
    let mut child = assayer()
        .args(["--config", "no-config.toml", "worker"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("Failed to spawn worker");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(request.to_string().as_bytes())
        .expect("Failed to write request");
    let output = child.wait_with_output().expect("Failed to wait for worker");
    assert!(output.status.success());

    let answer: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("Failed to parse output");
    assert_eq!(answer["operation"]["status"], "error");
    assert!(answer["operation"]["errors"][0].as_str().unwrap().contains("not registered"));
}
