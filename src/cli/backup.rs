//! arbor export / import command implementations.

use std::path::{Path, PathBuf};

use crate::backup::{self, Backup};
use crate::cli::{Globals, Session};
use crate::error::Result;
use crate::lock;
use crate::output::{emit_success, HumanOutput};

#[derive(serde::Serialize)]
struct ExportOutput {
    path: PathBuf,
    projects: usize,
    groups: usize,
}

pub fn run_export(globals: &Globals, output: Option<PathBuf>) -> Result<()> {
    let session = Session::open(globals)?;
    let backup = backup::export(&session.engine.current());

    let Some(path) = output else {
        if globals.output.json {
            return emit_success(globals.output, "export", &backup, None);
        }
        println!("{}", serde_json::to_string_pretty(&backup)?);
        return Ok(());
    };

    let content = serde_json::to_string_pretty(&backup)?;
    lock::write_atomic(&path, content.as_bytes())?;

    let mut human = HumanOutput::new(format!("arbor export: {}", path.display()));
    human.push_summary("projects", backup.projects.len().to_string());
    human.push_summary("groups", backup.groups.len().to_string());
    let report = ExportOutput {
        path,
        projects: backup.projects.len(),
        groups: backup.groups.len(),
    };
    emit_success(globals.output, "export", &report, Some(&human))
}

pub fn run_import(globals: &Globals, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)?;
    let mut session = Session::open(globals)?;
    let backup = Backup::parse(&raw, &session.config.tasks.placeholder_name)?;

    let result = session.block_on(backup::import(&session.engine, backup));
    session.flush_events()?;
    let report = result?;

    let mut human = HumanOutput::new(format!("arbor import: {}", file.display()));
    human.push_summary("deleted", report.deleted.to_string());
    human.push_summary("written", report.written.to_string());
    human.push_summary("batches", report.batches.to_string());
    human.push_detail(format!("store: {}", session.storage.store_dir().display()));
    emit_success(globals.output, "import", &report, Some(&human))
}
