//! In-memory registry of projects and groups, and the store that publishes it.
//!
//! [`StateStore`] is the single shared resource: views read snapshots from it
//! and subscribe to changes, and only the mutation pipeline writes to it.
//! Each published state is an immutable `Arc<State>`, so a captured snapshot
//! stays valid no matter what is published afterwards.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::project::{sort_groups, Project, ProjectGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Group,
}

impl EntityKind {
    /// Collection name used by stores.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Project => "projects",
            EntityKind::Group => "groups",
        }
    }
}

/// Address of one remotely persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn project(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Project,
            id: id.into(),
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Group,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.collection(), self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub projects: Vec<Project>,
    pub groups: Vec<ProjectGroup>,
}

impl State {
    pub fn new(projects: Vec<Project>, mut groups: Vec<ProjectGroup>) -> Self {
        sort_groups(&mut groups);
        Self { projects, groups }
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&ProjectGroup> {
        self.groups.iter().find(|group| group.id == id)
    }

    pub fn require_project(&self, id: &str) -> Result<&Project> {
        self.project(id)
            .ok_or_else(|| Error::ProjectNotFound(id.to_string()))
    }

    pub fn require_group(&self, id: &str) -> Result<&ProjectGroup> {
        self.group(id)
            .ok_or_else(|| Error::GroupNotFound(id.to_string()))
    }

    /// Projects in a group, skipping archived ones unless asked.
    pub fn projects_in_group<'a>(
        &'a self,
        group_id: &'a str,
        include_archived: bool,
    ) -> impl Iterator<Item = &'a Project> + 'a {
        self.projects.iter().filter(move |project| {
            project.group_id.as_deref() == Some(group_id)
                && (include_archived || !project.is_archived)
        })
    }

    /// Copy with `project` inserted, or replacing the project with its id.
    pub fn with_project(&self, project: Project) -> State {
        let mut next = self.clone();
        match next.projects.iter_mut().find(|p| p.id == project.id) {
            Some(slot) => *slot = project,
            None => next.projects.push(project),
        }
        next
    }

    pub fn without_project(&self, id: &str) -> State {
        let mut next = self.clone();
        next.projects.retain(|project| project.id != id);
        next
    }

    pub fn with_group(&self, group: ProjectGroup) -> State {
        let mut next = self.clone();
        match next.groups.iter_mut().find(|g| g.id == group.id) {
            Some(slot) => *slot = group,
            None => next.groups.push(group),
        }
        sort_groups(&mut next.groups);
        next
    }

    pub fn without_group(&self, id: &str) -> State {
        let mut next = self.clone();
        next.groups.retain(|group| group.id != id);
        next
    }

    /// Copy where each listed entity is put back the way `snapshot` had it:
    /// restored if it existed there, removed if it did not.
    pub fn restore_from(&self, snapshot: &State, entities: &[EntityRef]) -> State {
        let mut next = self.clone();
        for entity in entities {
            next = match entity.kind {
                EntityKind::Project => match snapshot.project(&entity.id) {
                    Some(project) => next.with_project(project.clone()),
                    None => next.without_project(&entity.id),
                },
                EntityKind::Group => match snapshot.group(&entity.id) {
                    Some(group) => next.with_group(group.clone()),
                    None => next.without_group(&entity.id),
                },
            };
        }
        next
    }
}

/// Publish/subscribe holder for the current [`State`].
#[derive(Debug)]
pub struct StateStore {
    sender: watch::Sender<Arc<State>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(State::default())
    }
}

impl StateStore {
    pub fn new(initial: State) -> Self {
        let (sender, _receiver) = watch::channel(Arc::new(initial));
        Self { sender }
    }

    /// The state every view should be rendering right now.
    pub fn current(&self) -> Arc<State> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<State>> {
        self.sender.subscribe()
    }

    /// Compute the next state from the current one and publish it.
    ///
    /// The computation runs while the channel is held, so no other `apply`
    /// can interleave with it. Returns `(before, after)`. When `compute`
    /// fails nothing is published.
    pub fn apply<F>(&self, compute: F) -> Result<(Arc<State>, Arc<State>)>
    where
        F: FnOnce(&State) -> Result<State>,
    {
        let mut outcome = None;
        self.sender.send_if_modified(|current| {
            let before = current.clone();
            match compute(&before) {
                Ok(next) => {
                    let next = Arc::new(next);
                    *current = next.clone();
                    outcome = Some(Ok((before, next)));
                    true
                }
                Err(err) => {
                    outcome = Some(Err(err));
                    false
                }
            }
        });
        outcome.unwrap_or_else(|| {
            Err(Error::OperationFailed("state update did not run".to_string()))
        })
    }

    /// Replace the whole state; used for reverts and authoritative reloads.
    pub fn replace(&self, state: Arc<State>) {
        self.sender.send_replace(state);
    }

    /// Put the listed entities back the way `snapshot` had them, keeping
    /// everything else as currently published.
    pub fn restore_entities(&self, snapshot: &State, entities: &[EntityRef]) {
        self.sender.send_modify(|current| {
            *current = Arc::new(current.restore_from(snapshot, entities));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> State {
        State::new(
            vec![Project::new("p1", "One"), Project::new("p2", "Two")],
            vec![ProjectGroup::new("g1", "Group", 0)],
        )
    }

    #[test]
    fn apply_publishes_to_subscribers() {
        let store = StateStore::new(state());
        let mut rx = store.subscribe();
        let (before, after) = store
            .apply(|current| Ok(current.without_project("p1")))
            .expect("apply");
        assert_eq!(before.projects.len(), 2);
        assert_eq!(after.projects.len(), 1);
        assert!(rx.has_changed().expect("channel open"));
        assert_eq!(rx.borrow_and_update().projects.len(), 1);
    }

    #[test]
    fn failed_apply_publishes_nothing() {
        let store = StateStore::new(state());
        let rx = store.subscribe();
        let err = store
            .apply(|current| current.require_project("missing").map(|_| current.clone()))
            .expect_err("missing project");
        assert!(matches!(err, Error::ProjectNotFound(_)));
        assert!(!rx.has_changed().expect("channel open"));
    }

    #[test]
    fn restore_entities_only_touches_listed_entities() {
        let snapshot = state();
        let store = StateStore::new(snapshot.clone());
        store
            .apply(|current| {
                Ok(current
                    .with_project(Project::new("p1", "Renamed"))
                    .with_project(Project::new("p3", "Three")))
            })
            .expect("apply");

        store.restore_entities(&snapshot, &[EntityRef::project("p3")]);
        let current = store.current();
        assert!(current.project("p3").is_none());
        assert_eq!(current.project("p1").map(|p| p.name.as_str()), Some("Renamed"));
    }

    #[test]
    fn entity_ref_displays_path() {
        assert_eq!(EntityRef::group("g1").to_string(), "groups/g1");
    }
}
