//! arbor task command implementations.
//!
//! Lookups here are strict: an unknown task id is reported as
//! `TaskNotFound` before any mutation starts, even though the engine itself
//! would treat it as a no-op.

use serde::Serialize;

use crate::cli::{parse_date_arg, Globals, Session};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::progress::{self, Progress};
use crate::schedule::{self, SchedulePatch};
use crate::state::State;
use crate::task::{new_id, Task, TaskPatch};
use crate::tree;

pub struct AddOptions {
    pub project: String,
    pub name: String,
    pub parent: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

pub struct EditOptions {
    pub project: String,
    pub task: String,
    pub name: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub clear_dates: bool,
}

#[derive(Serialize)]
struct TaskOutput<'a> {
    project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<&'a str>,
    task: &'a Task,
}

#[derive(Serialize)]
struct RemoveOutput<'a> {
    project: &'a str,
    id: &'a str,
    removed: usize,
}

#[derive(Serialize)]
struct ReparentOutput<'a> {
    project: &'a str,
    id: &'a str,
    parent: Option<&'a str>,
}

#[derive(Serialize)]
struct MoveOutput<'a> {
    id: &'a str,
    from: &'a str,
    to: &'a str,
}

#[derive(Serialize)]
struct ShiftOutput<'a> {
    project: &'a str,
    id: &'a str,
    days: i64,
    shifted: Vec<SchedulePatch>,
}

#[derive(Serialize)]
struct TreeOutput<'a> {
    project: &'a str,
    name: &'a str,
    progress: Progress,
    tasks: &'a [Task],
}

fn require_task<'a>(state: &'a State, project_id: &str, task_id: &str) -> Result<&'a Task> {
    let project = state.require_project(project_id)?;
    tree::find(&project.tasks, task_id).ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
}

fn describe(task: &Task) -> String {
    let mark = if task.completed { "[x]" } else { "[ ]" };
    let dates = match (task.start_date, task.end_date) {
        (Some(start), Some(end)) => format!("  {start} .. {end}"),
        (Some(start), None) => format!("  from {start}"),
        (None, Some(end)) => format!("  until {end}"),
        (None, None) => String::new(),
    };
    format!("{mark} {}  ({}){dates}", task.name, task.id)
}

pub fn run_add(globals: &Globals, options: AddOptions) -> Result<()> {
    let name = options.name.trim();
    if name.is_empty() {
        return Err(Error::InvalidArgument("task name cannot be empty".to_string()));
    }
    let start = parse_date_arg(options.start.as_deref(), "start")?;
    let end = parse_date_arg(options.end.as_deref(), "end")?;

    let mut session = Session::open(globals)?;
    {
        let state = session.engine.current();
        state.require_project(&options.project)?;
        if let Some(parent) = options.parent.as_deref() {
            require_task(&state, &options.project, parent)?;
        }
    }

    let task = Task::new(new_id(), name).with_dates(start, end);
    let created = task.clone();
    let project = options.project.as_str();
    let parent = options.parent.as_deref();
    session.mutate(move |engine| match parent {
        Some(parent) => engine.add_subtask(project, parent, task),
        None => engine.add_task(project, task),
    })?;

    let mut human = HumanOutput::new(format!("arbor task add: {}", created.name));
    human.push_summary("id", created.id.clone());
    human.push_summary("project", project);
    if let Some(parent) = parent {
        human.push_summary("parent", parent);
    }
    human.push_next_step(format!("arbor task tree {project}"));
    let output = TaskOutput {
        project,
        parent,
        task: &created,
    };
    emit_success(globals.output, "task add", &output, Some(&human))
}

pub fn run_edit(globals: &Globals, options: EditOptions) -> Result<()> {
    let name = options.name.map(|name| name.trim().to_string());
    if name.as_deref() == Some("") {
        return Err(Error::InvalidArgument("task name cannot be empty".to_string()));
    }
    let mut patch = TaskPatch {
        name,
        ..TaskPatch::default()
    };
    if options.clear_dates {
        patch.start_date = Some(None);
        patch.end_date = Some(None);
    } else {
        if let Some(start) = parse_date_arg(options.start.as_deref(), "start")? {
            patch.start_date = Some(Some(start));
        }
        if let Some(end) = parse_date_arg(options.end.as_deref(), "end")? {
            patch.end_date = Some(Some(end));
        }
    }
    if patch.is_empty() {
        return Err(Error::InvalidArgument(
            "nothing to change; pass --name, --start, --end or --clear-dates".to_string(),
        ));
    }

    let mut session = Session::open(globals)?;
    let updated = patch.apply(require_task(&session.engine.current(), &options.project, &options.task)?);
    let replacement = updated.clone();
    session.mutate(|engine| engine.update_task(&options.project, replacement))?;

    let mut human = HumanOutput::new(format!("arbor task edit: {}", updated.name));
    human.push_summary("id", updated.id.clone());
    let output = TaskOutput {
        project: &options.project,
        parent: None,
        task: &updated,
    };
    emit_success(globals.output, "task edit", &output, Some(&human))
}

pub fn run_done(globals: &Globals, project: &str, task_id: &str) -> Result<()> {
    let mut session = Session::open(globals)?;
    require_task(&session.engine.current(), project, task_id)?;
    session.mutate(|engine| engine.toggle_task_complete(project, task_id))?;

    let state = session.engine.current();
    let task = require_task(&state, project, task_id)?;
    let affected = progress::aggregate(std::slice::from_ref(task)).total;
    let verb = if task.completed { "completed" } else { "reopened" };

    let mut human = HumanOutput::new(format!("arbor task done: {} {verb}", task.name));
    human.push_summary("id", task.id.clone());
    human.push_summary("tasks updated", affected.to_string());
    let output = TaskOutput {
        project,
        parent: None,
        task,
    };
    emit_success(globals.output, "task done", &output, Some(&human))
}

pub fn run_rm(globals: &Globals, project: &str, task_id: &str) -> Result<()> {
    let mut session = Session::open(globals)?;
    let removed = {
        let state = session.engine.current();
        let task = require_task(&state, project, task_id)?;
        progress::aggregate(std::slice::from_ref(task)).total
    };
    session.mutate(|engine| engine.delete_task(project, task_id))?;

    let mut human = HumanOutput::new(format!("arbor task rm: {task_id}"));
    human.push_summary("tasks removed", removed.to_string());
    let output = RemoveOutput {
        project,
        id: task_id,
        removed,
    };
    emit_success(globals.output, "task rm", &output, Some(&human))
}

pub fn run_reparent(
    globals: &Globals,
    project: &str,
    task_id: &str,
    parent: Option<&str>,
) -> Result<()> {
    let mut session = Session::open(globals)?;
    {
        let state = session.engine.current();
        let tasks = &state.require_project(project)?.tasks;
        require_task(&state, project, task_id)?;
        if let Some(parent) = parent {
            require_task(&state, project, parent)?;
            if parent == task_id || tree::is_descendant_of(tasks, task_id, parent) {
                return Err(Error::InvalidArgument(format!(
                    "cannot move {task_id} under its own subtree"
                )));
            }
        }
    }
    session.mutate(|engine| engine.reparent_task(project, task_id, parent))?;

    let mut human = HumanOutput::new(format!("arbor task reparent: {task_id}"));
    human.push_summary("parent", parent.unwrap_or("(top level)"));
    let output = ReparentOutput {
        project,
        id: task_id,
        parent,
    };
    emit_success(globals.output, "task reparent", &output, Some(&human))
}

pub fn run_mv(globals: &Globals, task_id: &str, from: &str, to: &str) -> Result<()> {
    let mut session = Session::open(globals)?;
    {
        let state = session.engine.current();
        require_task(&state, from, task_id)?;
        state.require_project(to)?;
    }
    session.mutate(|engine| engine.move_task(from, to, task_id))?;

    let mut human = HumanOutput::new(format!("arbor task mv: {task_id}"));
    human.push_summary("from", from);
    human.push_summary("to", to);
    human.push_next_step(format!("arbor task tree {to}"));
    let output = MoveOutput {
        id: task_id,
        from,
        to,
    };
    emit_success(globals.output, "task mv", &output, Some(&human))
}

pub fn run_shift(globals: &Globals, project: &str, task_id: &str, days: i64) -> Result<()> {
    let mut session = Session::open(globals)?;
    let shifted = {
        let state = session.engine.current();
        schedule::cascade(require_task(&state, project, task_id)?, days)?
    };
    session.mutate(|engine| engine.shift_task_schedule(project, task_id, days))?;

    let mut human = HumanOutput::new(format!("arbor task shift: {task_id} by {days} day(s)"));
    human.push_summary("tasks shifted", shifted.len().to_string());
    if shifted.is_empty() {
        human.push_warning("no dated tasks in this subtree");
    }
    let output = ShiftOutput {
        project,
        id: task_id,
        days,
        shifted,
    };
    emit_success(globals.output, "task shift", &output, Some(&human))
}

pub fn run_tree(globals: &Globals, project_id: &str) -> Result<()> {
    let session = Session::open(globals)?;
    let state = session.engine.current();
    let project = state.require_project(project_id)?;
    let progress = project.progress();

    let mut human = HumanOutput::new(format!(
        "{} ({}/{} done, {}%)",
        project.name,
        progress.completed,
        progress.total,
        progress.percent()
    ));
    tree::walk(&project.tasks, &mut |task: &Task, depth: usize| {
        human.push_detail(format!("{}{}", "  ".repeat(depth), describe(task)));
    });

    let output = TreeOutput {
        project: &project.id,
        name: &project.name,
        progress,
        tasks: &project.tasks,
    };
    emit_success(globals.output, "task tree", &output, Some(&human))
}
