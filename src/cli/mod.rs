//! Command-line interface for arbor
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command family is implemented in its own submodule.

use std::future::Future;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{Event, EventDestination, EventSink};
use crate::output::OutputOptions;
use crate::pipeline::{Engine, Mutation, SyncSettings};
use crate::remote::FileStore;
use crate::storage::Storage;

mod backup;
mod group;
mod init;
mod project;
mod task;

/// arbor - nested task trees with optimistic sync
///
/// Organize work as arbitrarily deep task trees grouped into projects.
/// Every change is applied locally first and rolled back if the store
/// rejects it.
#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data home (defaults to the platform data directory)
    #[arg(long, global = true, env = "ARBOR_HOME")]
    pub home: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit sync events as JSON lines ("-" for stdout, or a file path)
    #[arg(long, global = true)]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data home and default configuration
    Init,

    /// Project group management
    #[command(subcommand)]
    Group(GroupCommands),

    /// Project management
    #[command(subcommand)]
    Project(ProjectCommands),

    /// Task tree editing
    #[command(subcommand)]
    Task(TaskCommands),

    /// Write every project and group to a backup file
    Export {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace all data with the contents of a backup file
    Import {
        /// Backup file produced by `arbor export`
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum GroupCommands {
    /// Create a group
    Add {
        name: String,

        /// Display color (e.g. "#3b82f6")
        #[arg(long)]
        color: Option<String>,

        /// Sort position (defaults to after the last group)
        #[arg(long)]
        order: Option<i64>,
    },

    /// List groups in display order
    Ls,

    /// Change a group
    Edit {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        color: Option<String>,

        #[arg(long)]
        order: Option<i64>,
    },

    /// Delete a group (its projects are kept)
    Rm { id: String },
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Create a project
    Add {
        name: String,

        /// Group id
        #[arg(long)]
        group: Option<String>,

        #[arg(long)]
        icon: Option<String>,
    },

    /// List projects with progress
    Ls {
        /// Include archived and hidden projects
        #[arg(long)]
        all: bool,

        /// Only projects in this group
        #[arg(long)]
        group: Option<String>,
    },

    /// Change project metadata
    Edit {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        icon: Option<String>,

        /// Move to a group
        #[arg(long, conflicts_with = "no_group")]
        group: Option<String>,

        /// Remove from its group
        #[arg(long)]
        no_group: bool,

        #[arg(long, conflicts_with = "unarchive")]
        archive: bool,

        #[arg(long)]
        unarchive: bool,

        #[arg(long, conflicts_with = "unhide")]
        hide: bool,

        #[arg(long)]
        unhide: bool,
    },

    /// Delete a project and all its tasks
    Rm { id: String },
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Add a task at the top level or under a parent
    Add {
        /// Project id
        project: String,

        name: String,

        /// Parent task id
        #[arg(long)]
        parent: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },

    /// Change a task's fields
    Edit {
        project: String,

        task: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,

        /// Remove both dates
        #[arg(long, conflicts_with_all = ["start", "end"])]
        clear_dates: bool,
    },

    /// Toggle completion for a task and its subtree
    Done { project: String, task: String },

    /// Delete a task and its subtree
    Rm { project: String, task: String },

    /// Move a task under another task in the same project
    Reparent {
        project: String,

        task: String,

        /// New parent id (omit for top level)
        #[arg(long)]
        parent: Option<String>,
    },

    /// Move a task to the top level of another project
    Mv {
        task: String,

        /// Source project id
        #[arg(long)]
        from: String,

        /// Target project id
        #[arg(long)]
        to: String,
    },

    /// Shift a task and its dated subtasks by whole days
    Shift {
        project: String,

        task: String,

        /// Days to shift by (negative moves earlier)
        #[arg(allow_negative_numbers = true)]
        days: i64,
    },

    /// Print a project's task tree
    Tree { project: String },
}

/// Options every command receives.
#[derive(Debug, Clone)]
pub struct Globals {
    pub home: Option<PathBuf>,
    pub output: OutputOptions,
    pub events: Option<String>,
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let globals = Globals {
            home: self.home,
            output: OutputOptions {
                json: self.json,
                quiet: self.quiet,
            },
            events: self.events,
        };

        match self.command {
            Commands::Init => init::run(&globals),
            Commands::Group(cmd) => match cmd {
                GroupCommands::Add { name, color, order } => {
                    group::run_add(&globals, group::AddOptions { name, color, order })
                }
                GroupCommands::Ls => group::run_ls(&globals),
                GroupCommands::Edit {
                    id,
                    name,
                    color,
                    order,
                } => group::run_edit(
                    &globals,
                    group::EditOptions {
                        id,
                        name,
                        color,
                        order,
                    },
                ),
                GroupCommands::Rm { id } => group::run_rm(&globals, &id),
            },
            Commands::Project(cmd) => match cmd {
                ProjectCommands::Add { name, group, icon } => {
                    project::run_add(&globals, project::AddOptions { name, group, icon })
                }
                ProjectCommands::Ls { all, group } => {
                    project::run_ls(&globals, project::ListOptions { all, group })
                }
                ProjectCommands::Edit {
                    id,
                    name,
                    icon,
                    group,
                    no_group,
                    archive,
                    unarchive,
                    hide,
                    unhide,
                } => project::run_edit(
                    &globals,
                    project::EditOptions {
                        id,
                        name,
                        icon,
                        group: match (group, no_group) {
                            (Some(group), _) => Some(Some(group)),
                            (None, true) => Some(None),
                            (None, false) => None,
                        },
                        archived: flag_pair(archive, unarchive),
                        hidden: flag_pair(hide, unhide),
                    },
                ),
                ProjectCommands::Rm { id } => project::run_rm(&globals, &id),
            },
            Commands::Task(cmd) => match cmd {
                TaskCommands::Add {
                    project,
                    name,
                    parent,
                    start,
                    end,
                } => task::run_add(
                    &globals,
                    task::AddOptions {
                        project,
                        name,
                        parent,
                        start,
                        end,
                    },
                ),
                TaskCommands::Edit {
                    project,
                    task,
                    name,
                    start,
                    end,
                    clear_dates,
                } => task::run_edit(
                    &globals,
                    task::EditOptions {
                        project,
                        task,
                        name,
                        start,
                        end,
                        clear_dates,
                    },
                ),
                TaskCommands::Done { project, task } => task::run_done(&globals, &project, &task),
                TaskCommands::Rm { project, task } => task::run_rm(&globals, &project, &task),
                TaskCommands::Reparent {
                    project,
                    task,
                    parent,
                } => task::run_reparent(&globals, &project, &task, parent.as_deref()),
                TaskCommands::Mv { task, from, to } => task::run_mv(&globals, &task, &from, &to),
                TaskCommands::Shift {
                    project,
                    task,
                    days,
                } => task::run_shift(&globals, &project, &task, days),
                TaskCommands::Tree { project } => task::run_tree(&globals, &project),
            },
            Commands::Export { output } => backup::run_export(&globals, output),
            Commands::Import { file } => backup::run_import(&globals, &file),
        }
    }
}

fn flag_pair(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}

/// One command's view of the store: configuration, an engine seeded from
/// the file store, and the runtime that drives it.
pub(crate) struct Session {
    pub storage: Storage,
    pub config: Config,
    pub engine: Engine<FileStore>,
    runtime: tokio::runtime::Runtime,
    events: broadcast::Receiver<Event>,
    sink: Option<EventSink>,
}

impl Session {
    pub fn open(globals: &Globals) -> Result<Self> {
        let storage = Storage::discover(globals.home.clone())?;
        if !storage.is_initialized() {
            return Err(Error::NotInitialized(storage.home().to_path_buf()));
        }
        let config = Config::load_or_default(&storage.config_file())?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let engine = Engine::new(FileStore::new(storage.clone()), SyncSettings::from(&config));
        runtime.block_on(engine.sync_from_remote())?;

        let sink = match EventDestination::parse(globals.events.as_deref()) {
            Some(destination) => Some(destination.open()?),
            None => None,
        };
        let events = engine.events();

        Ok(Self {
            storage,
            config,
            engine,
            runtime,
            events,
            sink,
        })
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Start one mutation, wait for it to settle, and forward its events.
    pub fn mutate<F>(&mut self, start: F) -> Result<()>
    where
        F: FnOnce(&Engine<FileStore>) -> Result<Mutation>,
    {
        let engine = self.engine.clone();
        let result = self
            .runtime
            .block_on(async move { start(&engine)?.settle().await });
        self.flush_events()?;
        result
    }

    /// Write pending engine events to the `--events` sink, if any.
    pub fn flush_events(&mut self) -> Result<()> {
        while let Ok(event) = self.events.try_recv() {
            if let Some(sink) = self.sink.as_mut() {
                sink.emit(&event)?;
            }
        }
        Ok(())
    }
}

/// Parse an optional `YYYY-MM-DD` argument.
pub(crate) fn parse_date_arg(
    raw: Option<&str>,
    flag: &str,
) -> Result<Option<chrono::NaiveDate>> {
    match raw {
        None => Ok(None),
        Some(raw) => crate::task::parse_day_str(raw).map(Some).ok_or_else(|| {
            Error::InvalidArgument(format!("--{flag} expects YYYY-MM-DD, got '{raw}'"))
        }),
    }
}
