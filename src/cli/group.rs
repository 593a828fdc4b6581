//! arbor group command implementations.

use crate::cli::{Globals, Session};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::project::{GroupPatch, ProjectGroup};
use crate::task::new_id;

pub struct AddOptions {
    pub name: String,
    pub color: Option<String>,
    pub order: Option<i64>,
}

pub struct EditOptions {
    pub id: String,
    pub name: Option<String>,
    pub color: Option<String>,
    pub order: Option<i64>,
}

#[derive(serde::Serialize)]
struct GroupListEntry<'a> {
    #[serde(flatten)]
    group: &'a ProjectGroup,
    projects: usize,
}

#[derive(serde::Serialize)]
struct GroupListOutput<'a> {
    total: usize,
    groups: Vec<GroupListEntry<'a>>,
}

#[derive(serde::Serialize)]
struct GroupRemoveOutput {
    id: String,
    orphaned_projects: usize,
}

pub fn run_add(globals: &Globals, options: AddOptions) -> Result<()> {
    let name = options.name.trim();
    if name.is_empty() {
        return Err(Error::InvalidArgument("group name cannot be empty".to_string()));
    }

    let mut session = Session::open(globals)?;
    let order = options.order.unwrap_or_else(|| {
        session
            .engine
            .current()
            .groups
            .iter()
            .map(|group| group.order + 1)
            .max()
            .unwrap_or(0)
    });
    let mut group = ProjectGroup::new(new_id(), name, order);
    if let Some(color) = options.color {
        group = group.with_color(color);
    }

    let created = group.clone();
    session.mutate(move |engine| engine.add_group(group))?;

    let mut human = HumanOutput::new(format!("arbor group add: {}", created.name));
    human.push_summary("id", created.id.clone());
    human.push_summary("order", created.order.to_string());
    human.push_next_step(format!("arbor project add <name> --group {}", created.id));
    emit_success(globals.output, "group add", &created, Some(&human))
}

pub fn run_ls(globals: &Globals) -> Result<()> {
    let session = Session::open(globals)?;
    let state = session.engine.current();

    let entries: Vec<GroupListEntry<'_>> = state
        .groups
        .iter()
        .map(|group| GroupListEntry {
            group,
            projects: state.projects_in_group(&group.id, true).count(),
        })
        .collect();

    let mut human = HumanOutput::new(format!("arbor group ls: {} group(s)", entries.len()));
    for entry in &entries {
        human.push_detail(format!(
            "{}  {} ({}, {} project(s))",
            entry.group.id, entry.group.name, entry.group.color, entry.projects
        ));
    }

    let output = GroupListOutput {
        total: entries.len(),
        groups: entries,
    };
    emit_success(globals.output, "group ls", &output, Some(&human))
}

pub fn run_edit(globals: &Globals, options: EditOptions) -> Result<()> {
    let patch = GroupPatch {
        name: options.name.map(|name| name.trim().to_string()),
        color: options.color,
        order: options.order,
    };
    if patch.is_empty() {
        return Err(Error::InvalidArgument(
            "nothing to change; pass --name, --color or --order".to_string(),
        ));
    }
    if patch.name.as_deref() == Some("") {
        return Err(Error::InvalidArgument("group name cannot be empty".to_string()));
    }

    let mut session = Session::open(globals)?;
    let id = options.id;
    session.mutate(|engine| engine.update_group(&id, patch))?;

    let state = session.engine.current();
    let group = state.require_group(&id)?;
    let mut human = HumanOutput::new(format!("arbor group edit: {}", group.name));
    human.push_summary("id", group.id.clone());
    emit_success(globals.output, "group edit", group, Some(&human))
}

pub fn run_rm(globals: &Globals, id: &str) -> Result<()> {
    let mut session = Session::open(globals)?;
    let orphaned_projects = session.engine.current().projects_in_group(id, true).count();
    session.mutate(|engine| engine.delete_group(id))?;

    let mut human = HumanOutput::new(format!("arbor group rm: {id}"));
    if orphaned_projects > 0 {
        human.push_warning(format!(
            "{orphaned_projects} project(s) still reference this group"
        ));
    }
    let output = GroupRemoveOutput {
        id: id.to_string(),
        orphaned_projects,
    };
    emit_success(globals.output, "group rm", &output, Some(&human))
}
