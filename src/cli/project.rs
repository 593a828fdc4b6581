//! arbor project command implementations.

use crate::cli::{Globals, Session};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::progress::Progress;
use crate::project::{Project, ProjectPatch};
use crate::task::new_id;

pub struct AddOptions {
    pub name: String,
    pub group: Option<String>,
    pub icon: Option<String>,
}

pub struct ListOptions {
    pub all: bool,
    pub group: Option<String>,
}

pub struct EditOptions {
    pub id: String,
    pub name: Option<String>,
    pub icon: Option<String>,
    pub group: Option<Option<String>>,
    pub archived: Option<bool>,
    pub hidden: Option<bool>,
}

#[derive(serde::Serialize)]
struct ProjectSummary<'a> {
    id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<&'a str>,
    is_archived: bool,
    is_hidden: bool,
    progress: Progress,
    percent: u8,
}

#[derive(serde::Serialize)]
struct ProjectListOutput<'a> {
    total: usize,
    projects: Vec<ProjectSummary<'a>>,
}

#[derive(serde::Serialize)]
struct ProjectRemoveOutput {
    id: String,
    tasks_removed: usize,
}

pub fn run_add(globals: &Globals, options: AddOptions) -> Result<()> {
    let name = options.name.trim();
    if name.is_empty() {
        return Err(Error::InvalidArgument("project name cannot be empty".to_string()));
    }

    let mut session = Session::open(globals)?;
    let mut warnings = Vec::new();
    if let Some(group_id) = options.group.as_deref() {
        if session.engine.current().group(group_id).is_none() {
            warnings.push(format!("group {group_id} does not exist; the project will be ungrouped in listings"));
        }
    }

    let mut project = Project::new(new_id(), name);
    project.group_id = options.group;
    project.icon = options.icon;
    let created = project.clone();
    session.mutate(move |engine| engine.add_project(project))?;

    let mut human = HumanOutput::new(format!("arbor project add: {}", created.name));
    human.push_summary("id", created.id.clone());
    for warning in warnings {
        human.push_warning(warning);
    }
    human.push_next_step(format!("arbor task add {} <name>", created.id));
    emit_success(globals.output, "project add", &created, Some(&human))
}

pub fn run_ls(globals: &Globals, options: ListOptions) -> Result<()> {
    let session = Session::open(globals)?;
    let state = session.engine.current();

    let projects: Vec<ProjectSummary<'_>> = state
        .projects
        .iter()
        .filter(|project| options.all || !(project.is_archived || project.is_hidden))
        .filter(|project| match options.group.as_deref() {
            Some(group_id) => project.group_id.as_deref() == Some(group_id),
            None => true,
        })
        .map(|project| {
            let progress = project.progress();
            ProjectSummary {
                id: &project.id,
                name: &project.name,
                group_id: project.group_id.as_deref(),
                group: project
                    .group_id
                    .as_deref()
                    .and_then(|id| state.group(id))
                    .map(|group| group.name.as_str()),
                is_archived: project.is_archived,
                is_hidden: project.is_hidden,
                progress,
                percent: progress.percent(),
            }
        })
        .collect();

    let mut human = HumanOutput::new(format!("arbor project ls: {} project(s)", projects.len()));
    for project in &projects {
        let mut flags = Vec::new();
        if project.is_archived {
            flags.push("archived");
        }
        if project.is_hidden {
            flags.push("hidden");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        human.push_detail(format!(
            "{}  {} {}/{} ({}%){}{}",
            project.id,
            project.name,
            project.progress.completed,
            project.progress.total,
            project.percent,
            project
                .group
                .map(|group| format!(" in {group}"))
                .unwrap_or_default(),
            flags
        ));
    }

    let output = ProjectListOutput {
        total: projects.len(),
        projects,
    };
    emit_success(globals.output, "project ls", &output, Some(&human))
}

pub fn run_edit(globals: &Globals, options: EditOptions) -> Result<()> {
    let patch = ProjectPatch {
        name: options.name.map(|name| name.trim().to_string()),
        icon: options.icon.map(Some),
        group_id: options.group,
        is_archived: options.archived,
        is_hidden: options.hidden,
    };
    if patch.is_empty() {
        return Err(Error::InvalidArgument("nothing to change".to_string()));
    }
    if patch.name.as_deref() == Some("") {
        return Err(Error::InvalidArgument("project name cannot be empty".to_string()));
    }

    let mut session = Session::open(globals)?;
    let id = options.id;
    session.mutate(|engine| engine.update_project(&id, patch))?;

    let state = session.engine.current();
    let project = state.require_project(&id)?;
    let mut human = HumanOutput::new(format!("arbor project edit: {}", project.name));
    human.push_summary("id", project.id.clone());
    emit_success(globals.output, "project edit", project, Some(&human))
}

pub fn run_rm(globals: &Globals, id: &str) -> Result<()> {
    let mut session = Session::open(globals)?;
    let tasks_removed = session.engine.current().require_project(id)?.progress().total;
    session.mutate(|engine| engine.delete_project(id))?;

    let mut human = HumanOutput::new(format!("arbor project rm: {id}"));
    human.push_summary("tasks removed", tasks_removed.to_string());
    let output = ProjectRemoveOutput {
        id: id.to_string(),
        tasks_removed,
    };
    emit_success(globals.output, "project rm", &output, Some(&human))
}
