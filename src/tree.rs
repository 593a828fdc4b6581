//! Structural operations over a task tree.
//!
//! Every function takes the tree by reference and returns a freshly built
//! tree; input nodes are never mutated. Traversal is depth-first pre-order
//! over `subtasks` in stored order and the first node with a matching id
//! wins. An id that is not in the tree is not an error: the tree comes back
//! unchanged.

use std::collections::{HashMap, HashSet};

use crate::task::{Task, TaskId, TaskPatch};

/// Find the first node with `id`.
pub fn find<'a>(tree: &'a [Task], id: &str) -> Option<&'a Task> {
    for task in tree {
        if task.id == id {
            return Some(task);
        }
        if let Some(found) = find(&task.subtasks, id) {
            return Some(found);
        }
    }
    None
}

pub fn contains(tree: &[Task], id: &str) -> bool {
    find(tree, id).is_some()
}

/// True when `id` sits somewhere below the first node with `ancestor`.
pub fn is_descendant_of(tree: &[Task], ancestor: &str, id: &str) -> bool {
    find(tree, ancestor).is_some_and(|node| contains(&node.subtasks, id))
}

/// Parent of the first node with `id`; `None` for top-level or missing nodes.
pub fn parent_of<'a>(tree: &'a [Task], id: &str) -> Option<&'a Task> {
    for task in tree {
        if task.subtasks.iter().any(|child| child.id == id) {
            return Some(task);
        }
        if let Some(parent) = parent_of(&task.subtasks, id) {
            return Some(parent);
        }
    }
    None
}

/// Visit every node in pre-order together with its depth (0 for top level).
pub fn walk<F>(tree: &[Task], visit: &mut F)
where
    F: FnMut(&Task, usize),
{
    walk_at(tree, 0, visit);
}

fn walk_at<F>(tree: &[Task], depth: usize, visit: &mut F)
where
    F: FnMut(&Task, usize),
{
    for task in tree {
        visit(task, depth);
        walk_at(&task.subtasks, depth + 1, visit);
    }
}

/// All ids in pre-order, duplicates included.
pub fn collect_ids(tree: &[Task]) -> Vec<TaskId> {
    let mut ids = Vec::new();
    walk(tree, &mut |task, _| ids.push(task.id.clone()));
    ids
}

/// Detach the first node with `id` together with its subtree.
pub fn find_and_remove(tree: &[Task], id: &str) -> (Option<Task>, Vec<Task>) {
    let mut found = None;
    let next = remove_first(tree, id, &mut found);
    (found, next)
}

fn remove_first(tree: &[Task], id: &str, found: &mut Option<Task>) -> Vec<Task> {
    let mut out = Vec::with_capacity(tree.len());
    for task in tree {
        if found.is_some() {
            out.push(task.clone());
        } else if task.id == id {
            *found = Some(task.clone());
        } else {
            let subtasks = remove_first(&task.subtasks, id, found);
            out.push(rebuild(task, subtasks));
        }
    }
    out
}

/// Replace the first node whose id matches `updated.id` wholesale,
/// including its subtasks.
pub fn update_in_place(tree: &[Task], updated: &Task) -> Vec<Task> {
    let mut done = false;
    replace_first(tree, updated, &mut done)
}

fn replace_first(tree: &[Task], updated: &Task, done: &mut bool) -> Vec<Task> {
    tree.iter()
        .map(|task| {
            if *done {
                task.clone()
            } else if task.id == updated.id {
                *done = true;
                updated.clone()
            } else {
                rebuild(task, replace_first(&task.subtasks, updated, done))
            }
        })
        .collect()
}

/// Shallow-merge patches into many nodes in one traversal.
///
/// Unlike [`update_in_place`] the node's own fields are merged with the
/// patch and its (recursively updated) subtasks are kept.
pub fn update_multiple(tree: &[Task], updates: &HashMap<TaskId, TaskPatch>) -> Vec<Task> {
    if updates.is_empty() {
        return tree.to_vec();
    }
    let mut applied = HashSet::new();
    patch_each(tree, updates, &mut applied)
}

fn patch_each(
    tree: &[Task],
    updates: &HashMap<TaskId, TaskPatch>,
    applied: &mut HashSet<TaskId>,
) -> Vec<Task> {
    tree.iter()
        .map(|task| {
            let own = match updates.get(&task.id) {
                Some(patch) if applied.insert(task.id.clone()) => patch.apply(task),
                _ => task.clone(),
            };
            let subtasks = patch_each(&task.subtasks, updates, applied);
            Task { subtasks, ..own }
        })
        .collect()
}

/// Append `child` to the subtasks of the first node with `parent_id`.
pub fn insert_as_child(tree: &[Task], parent_id: &str, child: Task) -> Vec<Task> {
    let mut pending = Some(child);
    append_first(tree, parent_id, &mut pending)
}

fn append_first(tree: &[Task], parent_id: &str, pending: &mut Option<Task>) -> Vec<Task> {
    tree.iter()
        .map(|task| {
            if pending.is_none() {
                return task.clone();
            }
            if task.id == parent_id {
                let mut subtasks = task.subtasks.clone();
                subtasks.extend(pending.take());
                return rebuild(task, subtasks);
            }
            rebuild(task, append_first(&task.subtasks, parent_id, pending))
        })
        .collect()
}

/// Remove the first node with `id` and its whole subtree.
pub fn delete_subtree(tree: &[Task], id: &str) -> Vec<Task> {
    find_and_remove(tree, id).1
}

/// Detach the node and reinsert it at top level (`None`) or as the last
/// child of `new_parent`.
///
/// Returns the tree unchanged when the node is missing, when the new parent
/// does not exist, or when the new parent is the node itself or one of its
/// descendants; any of those would otherwise drop the subtree.
pub fn reparent(tree: &[Task], id: &str, new_parent: Option<&str>) -> Vec<Task> {
    if !contains(tree, id) {
        return tree.to_vec();
    }
    if let Some(parent_id) = new_parent {
        if parent_id == id || is_descendant_of(tree, id, parent_id) || !contains(tree, parent_id) {
            tracing::debug!(task = id, parent = parent_id, "reparent target rejected");
            return tree.to_vec();
        }
    }

    let (detached, mut rest) = find_and_remove(tree, id);
    let Some(detached) = detached else {
        return tree.to_vec();
    };
    match new_parent {
        Some(parent_id) => insert_as_child(&rest, parent_id, detached),
        None => {
            rest.push(detached);
            rest
        }
    }
}

/// Copy `task` with a new list of children.
fn rebuild(task: &Task, subtasks: Vec<Task>) -> Task {
    Task {
        id: task.id.clone(),
        name: task.name.clone(),
        completed: task.completed,
        completion_date: task.completion_date,
        start_date: task.start_date,
        end_date: task.end_date,
        start_time: task.start_time.clone(),
        duration: task.duration,
        image_url: task.image_url.clone(),
        dependencies: task.dependencies.clone(),
        resource_ids: task.resource_ids.clone(),
        subtasks,
        extras: task.extras.clone(),
    }
}
