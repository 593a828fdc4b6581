#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use arbor::project::Project;
use arbor::remote::MemoryStore;
use arbor::state::EntityRef;
use arbor::task::Task;
use assert_cmd::Command;
use serde_json::{Map, Value};
use tempfile::TempDir;

/// Temporary data home driven through the `arbor` binary.
pub struct TestHome {
    dir: TempDir,
}

impl TestHome {
    /// Empty home, not initialized.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        Self { dir }
    }

    /// Home with `arbor init` already run.
    pub fn init() -> Self {
        let home = Self::new();
        home.cmd().arg("init").assert().success();
        home
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn store_dir(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(".arbor.toml");
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// `arbor` with this home and logging off.
    pub fn cmd(&self) -> Command {
        let mut cmd = arbor_cmd();
        cmd.env("ARBOR_HOME", self.dir.path());
        cmd
    }

    /// Run with `--json`, assert success, return the envelope.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self
            .cmd()
            .args(args)
            .arg("--json")
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&output).expect("json envelope")
    }

    /// Raw stored document of a project.
    pub fn project_document(&self, id: &str) -> Value {
        let path = self.store_dir().join("projects").join(format!("{id}.json"));
        let raw = fs::read_to_string(path).expect("project document");
        serde_json::from_str(&raw).expect("project json")
    }
}

pub fn arbor_cmd() -> Command {
    let mut cmd = Command::cargo_bin("arbor").expect("arbor binary");
    cmd.env_remove("RUST_LOG");
    cmd.env_remove("ARBOR_HOME");
    cmd
}

pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// Memory store holding `P1 = [X{X1}]`, `P2 = []`.
pub fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    let p1 = Project::new("p1", "One").with_tasks(vec![
        Task::new("x", "X").with_subtasks(vec![Task::new("x1", "X1")]),
    ]);
    let p2 = Project::new("p2", "Two");
    store.put_document(&EntityRef::project("p1"), p1.to_fields());
    store.put_document(&EntityRef::project("p2"), p2.to_fields());
    store
}

/// Ids of a project's tree in pre-order.
pub fn tree_ids(tasks: &[Task]) -> Vec<String> {
    arbor::tree::collect_ids(tasks)
}
