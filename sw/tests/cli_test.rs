//! Integration tests for the sw binary

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;

fn sw(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sw").expect("binary built");
    cmd.current_dir(dir.path())
        .env("XDG_DATA_HOME", dir.path().join("data"))
        .env("XDG_CONFIG_HOME", dir.path().join("config"))
        .env("NO_COLOR", "1");
    cmd
}

fn write_json(dir: &TempDir, name: &str, value: serde_json::Value) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).expect("write fixture");
    path
}

fn object_schema(fields: &[&str]) -> serde_json::Value {
    let properties: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|f| (f.to_string(), json!({"type": "array", "items": {"type": "string"}})))
        .collect();
    json!({"type": "object", "properties": properties})
}

fn valid_plan() -> serde_json::Value {
    json!({
        "steps": [
            {"step_id": "s1", "tool": "search", "input": {"q": "x"}, "output_schema": object_schema(&["results"]), "reason": "find"},
            {"step_id": "s2", "tool": "lookup", "input": {"term": "y"}, "output_schema": object_schema(&["entries"]), "reason": "look up"},
            {"step_id": "s3", "tool": "fetch", "input": {"urls": "{{s1.results}}", "more": "{{s2.entries}}"}, "output_schema": object_schema(&["pages"]), "reason": "read"}
        ]
    })
}

#[test]
fn test_validate_accepts_valid_plan() {
    let dir = TempDir::new().unwrap();
    let plan = write_json(&dir, "plan.json", valid_plan());

    sw(&dir)
        .arg("validate")
        .arg(&plan)
        .assert()
        .success()
        .stdout(predicate::str::contains("Plan is valid"));
}

#[test]
fn test_validate_rejects_nested_path_with_exit_code() {
    let dir = TempDir::new().unwrap();
    let plan = write_json(
        &dir,
        "plan.json",
        json!([
            {"id": "s1", "tool": "search", "input": {"q": "x"}, "output_schema": object_schema(&["results"])},
            {"id": "s2", "tool": "fetch", "input": {"urls": "{{s1.output.results}}"}, "output_schema": {"type": "object"}}
        ]),
    );

    sw(&dir)
        .arg("validate")
        .arg(&plan)
        .assert()
        .failure()
        .stdout(predicate::str::contains("nested-field-path"))
        .stdout(predicate::str::contains("Plan is invalid"));
}

#[test]
fn test_validate_checks_tool_catalog() {
    let dir = TempDir::new().unwrap();
    let plan = write_json(&dir, "plan.json", valid_plan());
    let tools = write_json(&dir, "tools.json", json!([{"name": "search"}, {"name": "fetch"}]));

    sw(&dir)
        .arg("validate")
        .arg(&plan)
        .arg("--tools")
        .arg(&tools)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Tool 'lookup' is not available"));
}

#[test]
fn test_order_prints_layers_in_dag_mode() {
    let dir = TempDir::new().unwrap();
    let plan = write_json(&dir, "plan.json", valid_plan());

    sw(&dir)
        .args(["order", "--mode", "dag", "--format", "json"])
        .arg(&plan)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""layers""#))
        .stdout(predicate::str::is_match(r#"\[\s*"s1",\s*"s2"\s*\],\s*\[\s*"s3"\s*\]"#).unwrap());
}

#[test]
fn test_order_rejects_cycle() {
    let dir = TempDir::new().unwrap();
    let plan = write_json(
        &dir,
        "plan.json",
        json!([
            {"id": "s1", "tool": "a", "input": {"x": "{{s2.y}}"}, "output_schema": object_schema(&["y"])},
            {"id": "s2", "tool": "b", "input": {"y": "{{s1.y}}"}, "output_schema": object_schema(&["y"])}
        ]),
    );

    sw(&dir)
        .arg("order")
        .arg(&plan)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cycle"));
}

#[test]
fn test_simulate_completes_with_stub_outputs() {
    let dir = TempDir::new().unwrap();
    let plan = write_json(&dir, "plan.json", valid_plan());

    sw(&dir)
        .args(["simulate", "--mode", "dag"])
        .arg(&plan)
        .assert()
        .success()
        .stdout(predicate::str::contains("stub-results"))
        .stdout(predicate::str::contains("status: completed"));
}

#[test]
fn test_simulate_skips_failing_tool() {
    let dir = TempDir::new().unwrap();
    let plan = write_json(&dir, "plan.json", valid_plan());

    sw(&dir)
        .args(["simulate", "--fail-tool", "lookup", "--format", "json"])
        .arg(&plan)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""skipped": true"#))
        .stdout(predicate::str::contains("simulated failure"));
}

#[test]
fn test_simulate_abort_policy_halts() {
    let dir = TempDir::new().unwrap();
    let plan = write_json(&dir, "plan.json", valid_plan());

    sw(&dir)
        .args(["simulate", "--fail-tool", "search", "--on-failure", "abort"])
        .arg(&plan)
        .assert()
        .failure()
        .stdout(predicate::str::contains("halted at s1"));
}

#[test]
fn test_config_file_sets_mode() {
    let dir = TempDir::new().unwrap();
    let plan = write_json(&dir, "plan.json", valid_plan());
    std::fs::write(dir.path().join(".stepweave.yml"), "engine:\n  mode: dag\n").unwrap();

    sw(&dir)
        .args(["order", "--format", "json"])
        .arg(&plan)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""mode": "dag""#));
}

#[test]
fn test_invalid_config_fails_fast() {
    let dir = TempDir::new().unwrap();
    let plan = write_json(&dir, "plan.json", valid_plan());
    let config = dir.path().join("bad.yml");
    std::fs::write(&config, "engine:\n  tool-timeout-ms: 0\n").unwrap();

    sw(&dir)
        .arg("-c")
        .arg(&config)
        .arg("order")
        .arg(&plan)
        .assert()
        .failure()
        .stderr(predicate::str::contains("tool-timeout-ms"));
}
