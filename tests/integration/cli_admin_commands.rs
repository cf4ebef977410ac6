#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use pmgraph::primitives::region::META_OFFSET;
use pmgraph::{props, Pool, PropValue};
use serde_json::Value;
use tempfile::TempDir;

fn setup_pool(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.pool"));
    seed_demo(&path).expect("seed demo data");
    (dir, path)
}

fn seed_demo(path: &Path) -> pmgraph::Result<()> {
    let pool = Pool::create(path, 1 << 20)?;
    let graph = pool.create_graph("people", 64)?;
    let mut txn = graph.begin()?;
    graph.create_node(
        &mut txn,
        "Person",
        props([("name", PropValue::from("Alice")), ("age", PropValue::from(31))]),
    )?;
    graph.create_node(
        &mut txn,
        "Person",
        props([("name", PropValue::from("Bob")), ("age", PropValue::from(45))]),
    )?;
    graph.create_node(&mut txn, "City", props([("name", PropValue::from("Oslo"))]))?;
    graph.commit(&mut txn)?;
    pool.create_graph("empty", 8)?;
    pool.close()
}

fn stdout_json(args: &[&str], path: &Path) -> Value {
    let output = cargo_bin_cmd!("pmgraph")
        .args(["--format", "json"])
        .args(args.iter().take(1))
        .arg(path)
        .args(args.iter().skip(1))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

fn stdout_text(args: &[&str], path: &Path) -> String {
    let output = cargo_bin_cmd!("pmgraph")
        .args(args.iter().take(1))
        .arg(path)
        .args(args.iter().skip(1))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8(output).expect("utf8 stdout")
}

#[test]
fn info_emits_json() {
    let (_dir, path) = setup_pool("info");
    let json = stdout_json(&["info"], &path);
    assert_eq!(json["pool_size"].as_u64(), Some(1 << 20));
    assert_eq!(json["segment"]["state"], "applied");
    let graphs = json["graphs"].as_array().expect("graphs array");
    assert_eq!(graphs.len(), 2);
    assert_eq!(graphs[0]["name"], "empty");
    assert_eq!(graphs[1]["name"], "people");
    assert_eq!(graphs[1]["nodes"].as_u64(), Some(3));
    assert_eq!(graphs[1]["capacity"].as_u64(), Some(64));
    assert!(json["problem"].is_null());
}

#[test]
fn info_text_lists_graphs() {
    let (_dir, path) = setup_pool("info_text");
    let text = stdout_text(&["info"], &path);
    assert!(text.contains("Graphs (2):"), "{text}");
    assert!(text.contains("people (id="), "{text}");
    assert!(text.contains("nodes=3/64"), "{text}");
}

#[test]
fn verify_succeeds_on_a_healthy_pool() {
    let (_dir, path) = setup_pool("verify");
    let json = stdout_json(&["verify"], &path);
    assert!(json["success"].as_bool().unwrap_or(false));
    assert_eq!(json["counts"]["graphs"].as_u64(), Some(2));
    assert_eq!(json["counts"]["nodes"].as_u64(), Some(3));

    let text = stdout_text(&["verify"], &path);
    assert!(text.starts_with("Verify => success=true"), "{text}");
}

#[test]
fn verify_exits_nonzero_on_damage() {
    let (_dir, path) = setup_pool("damaged");
    let mut file = OpenOptions::new().write(true).open(&path).expect("open");
    file.seek(SeekFrom::Start(META_OFFSET + 8)).expect("seek");
    file.write_all(&[0xFF; 4]).expect("poke");
    drop(file);

    let output = cargo_bin_cmd!("pmgraph")
        .args(["--format", "json", "verify"])
        .arg(&path)
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["success"], false);
    let findings = json["findings"].as_array().expect("findings");
    assert!(findings.iter().any(|f| f["severity"] == "error"));
}

#[test]
fn log_shows_the_last_commit() {
    let (_dir, path) = setup_pool("log");
    let json = stdout_json(&["log"], &path);
    assert_eq!(json["state"], "applied");
    let kinds: Vec<&str> = json["records"]
        .as_array()
        .expect("records")
        .iter()
        .filter_map(|r| r["kind"].as_str())
        .collect();
    assert!(kinds.contains(&"put_directory"), "{kinds:?}");
    assert_eq!(kinds.last(), Some(&"meta"));

    let text = stdout_text(&["log", "--hex"], &path);
    assert!(text.starts_with("Segment: Applied"), "{text}");
    assert!(text.contains("put_directory"), "{text}");
}

#[test]
fn nodes_lists_committed_nodes() {
    let (_dir, path) = setup_pool("nodes");
    let text = stdout_text(&["nodes", "people"], &path);
    assert!(text.contains(":Person"), "{text}");
    assert!(text.contains("name=\"Oslo\""), "{text}");
    assert!(text.trim_end().ends_with("(3 nodes)"), "{text}");

    let json = stdout_json(&["nodes", "people", "--label", "City"], &path);
    let nodes = json.as_array().expect("node array");
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["label"], "City");
    assert_eq!(nodes[0]["properties"]["name"], "Oslo");
}

#[test]
fn missing_pool_and_graph_fail() {
    let (dir, path) = setup_pool("missing");
    cargo_bin_cmd!("pmgraph")
        .arg("info")
        .arg(dir.path().join("absent.pool"))
        .assert()
        .failure();
    cargo_bin_cmd!("pmgraph")
        .args(["nodes"])
        .arg(&path)
        .arg("nobody")
        .assert()
        .code(1);
}
