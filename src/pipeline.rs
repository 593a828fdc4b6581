//! Optimistic mutation pipeline.
//!
//! Every entry point on [`Engine`] follows the same two-state machine:
//!
//! 1. **Applying** (synchronous): capture the current state, compute the next
//!    one with a tree algorithm, and publish it to every subscriber before
//!    returning. Nothing suspends here, so two computations never interleave.
//! 2. **Settled** (asynchronous): a spawned task writes the touched entities
//!    to the remote store. On success nothing else happens. On failure or
//!    timeout the captured snapshot is republished according to the
//!    configured [`RevertPolicy`] and the error is handed to the caller
//!    through [`Mutation::settle`].
//!
//! Remote snapshots are held back while any mutation is in flight, so a
//! broadcast can never overwrite an optimistic change that has not settled.
//! When the last pending mutation settles after such a snapshot was held
//! back, the engine reloads from the store before reporting the outcome.
//!
//! There is no queue and no retry. A failed mutation is gone; the caller
//! re-issues it if it still wants it. Remote writes of independent
//! mutations are not ordered against each other.
//!
//! Entry points must be called from inside a tokio runtime.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::config::{Config, RevertPolicy};
use crate::error::{Error, Result};
use crate::events::{Event, EventKind};
use crate::project::{GroupPatch, Project, ProjectGroup, ProjectPatch};
use crate::remote::{BatchOp, RemoteSnapshot, RemoteStore};
use crate::schedule;
use crate::state::{EntityRef, State, StateStore};
use crate::task::{Task, TaskId, TaskPatch};
use crate::tree;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    AddTask,
    AddSubtask,
    UpdateTask,
    UpdateMultipleTasks,
    DeleteTask,
    ToggleTaskComplete,
    ShiftTaskSchedule,
    ReparentTask,
    MoveTask,
    AddProject,
    UpdateProject,
    DeleteProject,
    AddGroup,
    UpdateGroup,
    DeleteGroup,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::AddTask => "add_task",
            MutationKind::AddSubtask => "add_subtask",
            MutationKind::UpdateTask => "update_task",
            MutationKind::UpdateMultipleTasks => "update_multiple_tasks",
            MutationKind::DeleteTask => "delete_task",
            MutationKind::ToggleTaskComplete => "toggle_task_complete",
            MutationKind::ShiftTaskSchedule => "shift_task_schedule",
            MutationKind::ReparentTask => "reparent_task",
            MutationKind::MoveTask => "move_task",
            MutationKind::AddProject => "add_project",
            MutationKind::UpdateProject => "update_project",
            MutationKind::DeleteProject => "delete_project",
            MutationKind::AddGroup => "add_group",
            MutationKind::UpdateGroup => "update_group",
            MutationKind::DeleteGroup => "delete_group",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a mutation that has been applied locally.
///
/// Dropping it is fine: persistence and rollback still happen, only the
/// outcome is discarded.
#[derive(Debug)]
pub struct Mutation {
    pub id: String,
    pub kind: MutationKind,
    outcome: oneshot::Receiver<Result<()>>,
}

impl Mutation {
    /// Wait for the remote write. `Err` means local state was reverted.
    pub async fn settle(self) -> Result<()> {
        self.outcome.await.map_err(|_| {
            Error::OperationFailed(format!("persistence of {} was aborted", self.id))
        })?
    }
}

/// Runtime settings the pipeline reads from [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub timeout: Duration,
    pub revert: RevertPolicy,
    pub batch_limit: usize,
    pub placeholder_name: String,
}

impl From<&Config> for SyncSettings {
    fn from(config: &Config) -> Self {
        Self {
            timeout: Duration::from_millis(config.store.timeout_ms),
            revert: config.sync.revert,
            batch_limit: config.store.batch_limit,
            placeholder_name: config.tasks.placeholder_name.clone(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Remote work a mutation needs once it is applied locally.
#[derive(Debug, Clone)]
enum Persist {
    Write {
        entity: EntityRef,
        fields: Map<String, Value>,
    },
    Delete {
        entity: EntityRef,
    },
    Batch(Vec<BatchOp>),
}

impl Persist {
    fn touched(&self) -> Vec<EntityRef> {
        match self {
            Persist::Write { entity, .. } | Persist::Delete { entity } => vec![entity.clone()],
            Persist::Batch(ops) => ops.iter().map(|op| op.entity().clone()).collect(),
        }
    }
}

/// In-flight bookkeeping for remote snapshots.
#[derive(Debug, Default)]
struct RemoteGate {
    in_flight: usize,
    stale: bool,
}

struct EngineInner<R> {
    state: StateStore,
    gate: Mutex<RemoteGate>,
    remote: R,
    settings: SyncSettings,
    events: broadcast::Sender<Event>,
}

/// Cloneable handle to the shared state and its remote store.
pub struct Engine<R> {
    inner: Arc<EngineInner<R>>,
}

impl<R> Clone for Engine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteStore> Engine<R> {
    pub fn new(remote: R, settings: SyncSettings) -> Self {
        Self::with_state(remote, settings, State::default())
    }

    pub fn with_state(remote: R, settings: SyncSettings, initial: State) -> Self {
        let (events, _receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                state: StateStore::new(initial),
                gate: Mutex::new(RemoteGate::default()),
                remote,
                settings,
                events,
            }),
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.inner.state
    }

    /// Shorthand for `state().current()`.
    pub fn current(&self) -> Arc<State> {
        self.inner.state.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<State>> {
        self.inner.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub(crate) fn emit(&self, event: Event) {
        let _ = self.inner.events.send(event);
    }

    /// Run a remote call under the configured timeout.
    pub(crate) async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.inner.settings.timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(millis(timeout))),
        }
    }

    /// Mutations applied locally whose remote write has not settled yet.
    pub fn pending(&self) -> usize {
        self.gate().in_flight
    }

    fn gate(&self) -> MutexGuard<'_, RemoteGate> {
        self.inner.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Task entry points
    // =========================================================================

    /// Append `task` to the project's top level.
    pub fn add_task(&self, project_id: &str, task: Task) -> Result<Mutation> {
        self.edit_tree(MutationKind::AddTask, project_id, move |tasks| {
            let mut next = tasks.to_vec();
            next.push(task);
            next
        })
    }

    /// Append `task` under `parent_id`. A missing parent leaves the tree as is.
    pub fn add_subtask(&self, project_id: &str, parent_id: &str, task: Task) -> Result<Mutation> {
        self.edit_tree(MutationKind::AddSubtask, project_id, move |tasks| {
            tree::insert_as_child(tasks, parent_id, task)
        })
    }

    /// Replace the task with `task.id` wholesale, subtasks included.
    pub fn update_task(&self, project_id: &str, task: Task) -> Result<Mutation> {
        self.edit_tree(MutationKind::UpdateTask, project_id, move |tasks| {
            tree::update_in_place(tasks, &task)
        })
    }

    /// Merge field patches into many tasks in one pass.
    pub fn update_multiple_tasks(
        &self,
        project_id: &str,
        updates: HashMap<TaskId, TaskPatch>,
    ) -> Result<Mutation> {
        self.edit_tree(MutationKind::UpdateMultipleTasks, project_id, move |tasks| {
            tree::update_multiple(tasks, &updates)
        })
    }

    /// Remove a task and its whole subtree.
    pub fn delete_task(&self, project_id: &str, task_id: &str) -> Result<Mutation> {
        self.edit_tree(MutationKind::DeleteTask, project_id, move |tasks| {
            tree::delete_subtree(tasks, task_id)
        })
    }

    /// Flip a task's completion and force the new value onto its subtree,
    /// stamping every node with the same completion time.
    pub fn toggle_task_complete(&self, project_id: &str, task_id: &str) -> Result<Mutation> {
        let at = Utc::now();
        self.edit_tree(MutationKind::ToggleTaskComplete, project_id, move |tasks| {
            match tree::find(tasks, task_id) {
                Some(task) => tree::update_in_place(tasks, &task.with_completion(!task.completed, at)),
                None => tasks.to_vec(),
            }
        })
    }

    /// Shift a task and every dated descendant by `delta_days`.
    ///
    /// The cascade and the batch update are one mutation: they persist or
    /// revert together.
    pub fn shift_task_schedule(
        &self,
        project_id: &str,
        task_id: &str,
        delta_days: i64,
    ) -> Result<Mutation> {
        self.try_edit_tree(MutationKind::ShiftTaskSchedule, project_id, move |tasks| {
            match tree::find(tasks, task_id) {
                Some(task) => {
                    let patches = schedule::cascade(task, delta_days)?;
                    Ok(tree::update_multiple(tasks, &schedule::patches_to_updates(&patches)))
                }
                None => Ok(tasks.to_vec()),
            }
        })
    }

    /// Detach a task and reinsert it under `new_parent`, or at the top level
    /// when `None`.
    pub fn reparent_task(
        &self,
        project_id: &str,
        task_id: &str,
        new_parent: Option<&str>,
    ) -> Result<Mutation> {
        self.edit_tree(MutationKind::ReparentTask, project_id, move |tasks| {
            tree::reparent(tasks, task_id, new_parent)
        })
    }

    /// Move a task, with its subtree, to the top level of another project.
    ///
    /// Both projects are written in one batch. If the batch fails, both are
    /// reverted locally even when the store kept part of it.
    pub fn move_task(&self, source_id: &str, target_id: &str, task_id: &str) -> Result<Mutation> {
        if source_id == target_id {
            return Err(Error::InvalidArgument(format!(
                "task {task_id} is already in project {source_id}; use reparent"
            )));
        }
        self.run(MutationKind::MoveTask, |state| {
            let source = state.require_project(source_id)?;
            let target = state.require_project(target_id)?;

            let (found, remaining) = tree::find_and_remove(&source.tasks, task_id);
            let mut next_source = source.clone();
            let mut next_target = target.clone();
            match found {
                Some(task) => {
                    next_source.tasks = remaining;
                    next_target.tasks.push(task);
                }
                None => {
                    tracing::debug!(task = task_id, project = source_id, "move source has no such task");
                }
            }

            let plan = Persist::Batch(vec![
                BatchOp::Set {
                    entity: EntityRef::project(&next_source.id),
                    fields: next_source.tasks_fields(),
                },
                BatchOp::Set {
                    entity: EntityRef::project(&next_target.id),
                    fields: next_target.tasks_fields(),
                },
            ]);
            Ok((state.with_project(next_source).with_project(next_target), plan))
        })
    }

    // =========================================================================
    // Project and group entry points
    // =========================================================================

    pub fn add_project(&self, project: Project) -> Result<Mutation> {
        self.run(MutationKind::AddProject, move |state| {
            if state.project(&project.id).is_some() {
                return Err(Error::InvalidArgument(format!(
                    "project {} already exists",
                    project.id
                )));
            }
            let plan = Persist::Write {
                entity: EntityRef::project(&project.id),
                fields: project.to_fields(),
            };
            Ok((state.with_project(project), plan))
        })
    }

    /// Change project metadata. Only the patched fields are written.
    pub fn update_project(&self, project_id: &str, patch: ProjectPatch) -> Result<Mutation> {
        self.run(MutationKind::UpdateProject, move |state| {
            let project = state.require_project(project_id)?;
            let plan = Persist::Write {
                entity: EntityRef::project(project_id),
                fields: patch.to_fields(),
            };
            Ok((state.with_project(patch.apply(project)), plan))
        })
    }

    pub fn delete_project(&self, project_id: &str) -> Result<Mutation> {
        self.run(MutationKind::DeleteProject, move |state| {
            state.require_project(project_id)?;
            let plan = Persist::Delete {
                entity: EntityRef::project(project_id),
            };
            Ok((state.without_project(project_id), plan))
        })
    }

    pub fn add_group(&self, group: ProjectGroup) -> Result<Mutation> {
        self.run(MutationKind::AddGroup, move |state| {
            if state.group(&group.id).is_some() {
                return Err(Error::InvalidArgument(format!(
                    "group {} already exists",
                    group.id
                )));
            }
            let plan = Persist::Write {
                entity: EntityRef::group(&group.id),
                fields: group.to_fields(),
            };
            Ok((state.with_group(group), plan))
        })
    }

    pub fn update_group(&self, group_id: &str, patch: GroupPatch) -> Result<Mutation> {
        self.run(MutationKind::UpdateGroup, move |state| {
            let group = state.require_group(group_id)?;
            let plan = Persist::Write {
                entity: EntityRef::group(group_id),
                fields: patch.to_fields(),
            };
            Ok((state.with_group(patch.apply(group)), plan))
        })
    }

    /// Remove a group. Its projects keep their now dangling `group_id`.
    pub fn delete_group(&self, group_id: &str) -> Result<Mutation> {
        self.run(MutationKind::DeleteGroup, move |state| {
            state.require_group(group_id)?;
            let plan = Persist::Delete {
                entity: EntityRef::group(group_id),
            };
            Ok((state.without_group(group_id), plan))
        })
    }

    // =========================================================================
    // Remote snapshots
    // =========================================================================

    /// Replace local state with a sanitised remote snapshot.
    pub fn apply_remote(&self, snapshot: &RemoteSnapshot) {
        let placeholder = &self.inner.settings.placeholder_name;
        let projects: Vec<Project> = snapshot
            .projects
            .iter()
            .map(|document| Project::from_document(document, placeholder))
            .collect();
        let groups: Vec<ProjectGroup> = snapshot
            .groups
            .iter()
            .map(ProjectGroup::from_document)
            .collect();
        let counts = json!({ "projects": projects.len(), "groups": groups.len() });

        self.inner.state.replace(Arc::new(State::new(projects, groups)));
        tracing::info!(
            projects = snapshot.projects.len(),
            groups = snapshot.groups.len(),
            "remote snapshot applied"
        );
        let mut event = Event::new(EventKind::RemoteSnapshotApplied);
        event.data = Some(counts);
        self.emit(event);
    }

    /// Seed local state from the remote store.
    pub async fn sync_from_remote(&self) -> Result<()> {
        let snapshot = self.bounded(self.inner.remote.load()).await?;
        self.apply_remote(&snapshot);
        Ok(())
    }

    /// Apply every snapshot the remote store broadcasts until it closes.
    ///
    /// Snapshots arriving while mutations are pending are deferred; see
    /// [`Engine::receive_remote`].
    pub fn watch_remote(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let mut receiver = self.inner.remote.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(snapshot) => {
                        engine.receive_remote(&snapshot);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "remote watcher lagged; waiting for next snapshot");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Apply `snapshot` unless a mutation is pending; returns whether it was
    /// applied.
    ///
    /// A deferred snapshot is dropped, and the store is reloaded once the
    /// last pending mutation settles.
    pub fn receive_remote(&self, snapshot: &RemoteSnapshot) -> bool {
        let mut gate = self.gate();
        if gate.in_flight > 0 {
            gate.stale = true;
            tracing::debug!(pending = gate.in_flight, "remote snapshot deferred");
            return false;
        }
        self.apply_remote(snapshot);
        true
    }

    /// Mark one mutation settled. True when it was the last one pending and
    /// a snapshot was deferred meanwhile.
    fn release(&self) -> bool {
        let mut gate = self.gate();
        gate.in_flight = gate.in_flight.saturating_sub(1);
        gate.in_flight == 0 && std::mem::take(&mut gate.stale)
    }

    /// Reload the store after a deferred snapshot.
    async fn reload(&self) {
        match self.bounded(self.inner.remote.load()).await {
            Ok(snapshot) => {
                self.receive_remote(&snapshot);
            }
            Err(err) => tracing::warn!(error = %err, "reload after deferred snapshot failed"),
        }
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    /// Rebuild one project's forest with `edit` and persist its `tasks`.
    ///
    /// Unknown task ids inside the project are not errors; the unchanged
    /// forest is still written.
    fn edit_tree<F>(&self, kind: MutationKind, project_id: &str, edit: F) -> Result<Mutation>
    where
        F: FnOnce(&[Task]) -> Vec<Task>,
    {
        self.try_edit_tree(kind, project_id, move |tasks| Ok(edit(tasks)))
    }

    /// Like `edit_tree`, but an edit error aborts before anything is published.
    fn try_edit_tree<F>(&self, kind: MutationKind, project_id: &str, edit: F) -> Result<Mutation>
    where
        F: FnOnce(&[Task]) -> Result<Vec<Task>>,
    {
        self.run(kind, move |state| {
            let project = state.require_project(project_id)?;
            let mut next = project.clone();
            next.tasks = edit(&project.tasks)?;
            if next.tasks == project.tasks {
                tracing::debug!(project = project_id, %kind, "tree unchanged");
            }
            let plan = Persist::Write {
                entity: EntityRef::project(project_id),
                fields: next.tasks_fields(),
            };
            Ok((state.with_project(next), plan))
        })
    }

    /// Apply locally, publish, then persist in the background.
    fn run<F>(&self, kind: MutationKind, compute: F) -> Result<Mutation>
    where
        F: FnOnce(&State) -> Result<(State, Persist)>,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::OperationFailed("mutations need a tokio runtime".to_string())
        })?;

        self.gate().in_flight += 1;
        let mut plan = None;
        let applied = self.inner.state.apply(|current| {
            let (next, persist) = compute(current)?;
            plan = Some(persist);
            Ok(next)
        });
        let (snapshot, plan) = match (applied, plan) {
            (Ok((snapshot, _next)), Some(plan)) => (snapshot, plan),
            (result, _) => {
                let err = result.err().unwrap_or_else(|| {
                    Error::OperationFailed("mutation produced no remote plan".to_string())
                });
                if self.release() {
                    let engine = self.clone();
                    runtime.spawn(async move { engine.reload().await });
                }
                return Err(err);
            }
        };

        let id = Ulid::new().to_string();
        tracing::debug!(mutation = %id, %kind, "applied locally");
        self.emit(Event::for_mutation(EventKind::MutationApplied, &id, kind));

        let (sender, outcome) = oneshot::channel();
        let engine = self.clone();
        let mutation_id = id.clone();
        runtime.spawn(async move {
            let result = engine.persist(&mutation_id, kind, snapshot, plan).await;
            if engine.release() {
                engine.reload().await;
            }
            let _ = sender.send(result);
        });

        Ok(Mutation { id, kind, outcome })
    }

    async fn persist(
        &self,
        id: &str,
        kind: MutationKind,
        snapshot: Arc<State>,
        plan: Persist,
    ) -> Result<()> {
        let remote = &self.inner.remote;
        let touched = plan.touched();
        let result = match plan {
            Persist::Write { entity, fields } => self.bounded(remote.write(&entity, fields)).await,
            Persist::Delete { entity } => self.bounded(remote.delete(&entity)).await,
            Persist::Batch(ops) => self.bounded(remote.batch_write(ops)).await,
        };

        match result {
            Ok(()) => {
                tracing::info!(mutation = id, %kind, "persisted");
                self.emit(Event::for_mutation(EventKind::MutationPersisted, id, kind));
                Ok(())
            }
            Err(err) => {
                tracing::warn!(mutation = id, %kind, error = %err, "persistence failed; reverting");
                self.revert(&snapshot, &touched);

                let entities: Vec<String> = touched.iter().map(ToString::to_string).collect();
                let mut event = Event::for_mutation(EventKind::MutationReverted, id, kind);
                event.data = Some(json!({
                    "reason": err.to_string(),
                    "policy": self.inner.settings.revert,
                    "entities": entities,
                }));
                self.emit(event);
                Err(err)
            }
        }
    }

    fn revert(&self, snapshot: &Arc<State>, touched: &[EntityRef]) {
        match self.inner.settings.revert {
            RevertPolicy::Snapshot => self.inner.state.replace(Arc::clone(snapshot)),
            RevertPolicy::Entity => self.inner.state.restore_entities(snapshot, touched),
        }
        tracing::info!(policy = ?self.inner.settings.revert, "local state reverted");
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
