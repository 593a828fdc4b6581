mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arbor::config::RevertPolicy;
use arbor::events::EventKind;
use arbor::project::{GroupPatch, Project, ProjectGroup};
use arbor::remote::{MemoryStore, RemoteStore};
use arbor::state::EntityRef;
use arbor::task::{Task, TaskPatch};
use arbor::{tree, Engine, Error, SyncSettings};
use chrono::NaiveDate;
use serde_json::json;

use support::{fields, seeded_store, tree_ids};

async fn engine_with(settings: SyncSettings) -> (Engine<MemoryStore>, MemoryStore) {
    let store = seeded_store();
    let engine = Engine::new(store.clone(), settings);
    engine.sync_from_remote().await.expect("seed from store");
    (engine, store)
}

async fn engine() -> (Engine<MemoryStore>, MemoryStore) {
    engine_with(SyncSettings::default()).await
}

fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
}

fn tasks_of(engine: &Engine<MemoryStore>, project: &str) -> Vec<Task> {
    engine
        .current()
        .project(project)
        .map(|p| p.tasks.clone())
        .expect("project")
}

#[tokio::test]
async fn failed_write_restores_exact_snapshot() {
    let (engine, store) = engine().await;
    let before = engine.current();
    let mut rx = engine.subscribe();
    store.fail_next(1);

    let mutation = engine
        .update_task("p1", Task::new("x", "Renamed"))
        .expect("applied locally");
    assert_eq!(tree::find(&tasks_of(&engine, "p1"), "x").map(|t| t.name.clone()), Some("Renamed".to_string()));
    assert!(rx.has_changed().expect("open"));
    let _ = rx.borrow_and_update();

    let err = mutation.settle().await.expect_err("write rejected");
    assert!(matches!(err, Error::Persistence { .. }));

    let after = engine.current();
    assert_eq!(*after, *before);
    assert!(Arc::ptr_eq(&after, &before));
    assert!(rx.has_changed().expect("open"));
}

#[tokio::test]
async fn cross_project_move_updates_both_projects() {
    let (engine, store) = engine().await;
    engine
        .move_task("p1", "p2", "x")
        .expect("applied")
        .settle()
        .await
        .expect("persisted");

    assert!(tasks_of(&engine, "p1").is_empty());
    assert_eq!(tree_ids(&tasks_of(&engine, "p2")), vec!["x", "x1"]);

    let p1 = store.document(&EntityRef::project("p1")).expect("p1");
    let p2 = store.document(&EntityRef::project("p2")).expect("p2");
    assert_eq!(p1["tasks"], json!([]));
    assert_eq!(p2["tasks"][0]["id"], json!("x"));
    assert_eq!(p2["tasks"][0]["subtasks"][0]["id"], json!("x1"));
}

#[tokio::test]
async fn failed_move_reverts_both_projects() {
    let (engine, store) = engine().await;
    let before = engine.current();
    store.fail_entity("p2");

    let err = engine
        .move_task("p1", "p2", "x")
        .expect("applied")
        .settle()
        .await
        .expect_err("target write rejected");
    assert!(matches!(err, Error::PartialTransaction { applied: 1, total: 2, .. }));

    assert_eq!(*engine.current(), *before);
    assert_eq!(tree_ids(&tasks_of(&engine, "p1")), vec!["x", "x1"]);
    assert!(tasks_of(&engine, "p2").is_empty());

    // The store kept the source write; local state does not show it.
    let p1 = store.document(&EntityRef::project("p1")).expect("p1");
    assert_eq!(p1["tasks"], json!([]));
}

#[tokio::test]
async fn snapshot_revert_discards_interleaved_success() {
    let (engine, store) = engine().await;
    store.set_latency(Duration::from_millis(20));
    store.fail_entity("p1");

    let first = engine.add_task("p1", Task::new("a", "A")).expect("A applied");
    let second = engine.add_task("p2", Task::new("b", "B")).expect("B applied");
    assert_eq!(tree_ids(&tasks_of(&engine, "p2")), vec!["b"]);

    assert!(first.settle().await.is_err());
    second.settle().await.expect("B persisted");

    assert!(!tree::contains(&tasks_of(&engine, "p1"), "a"));
    assert!(tasks_of(&engine, "p2").is_empty());
    let p2 = store.document(&EntityRef::project("p2")).expect("p2");
    assert_eq!(p2["tasks"][0]["id"], json!("b"));
}

#[tokio::test]
async fn entity_revert_keeps_interleaved_success() {
    let settings = SyncSettings {
        revert: RevertPolicy::Entity,
        ..SyncSettings::default()
    };
    let (engine, store) = engine_with(settings).await;
    store.set_latency(Duration::from_millis(20));
    store.fail_entity("p1");

    let first = engine.add_task("p1", Task::new("a", "A")).expect("A applied");
    let second = engine.add_task("p2", Task::new("b", "B")).expect("B applied");

    assert!(first.settle().await.is_err());
    second.settle().await.expect("B persisted");

    assert_eq!(tree_ids(&tasks_of(&engine, "p1")), vec!["x", "x1"]);
    assert_eq!(tree_ids(&tasks_of(&engine, "p2")), vec!["b"]);
}

#[tokio::test]
async fn timeout_is_a_persistence_failure() {
    let settings = SyncSettings {
        timeout: Duration::from_millis(20),
        ..SyncSettings::default()
    };
    let (engine, store) = engine_with(settings).await;
    let before = engine.current();
    store.set_latency(Duration::from_millis(500));

    let err = engine
        .delete_task("p1", "x")
        .expect("applied")
        .settle()
        .await
        .expect_err("timed out");
    assert!(matches!(err, Error::Timeout(20)));
    assert_eq!(*engine.current(), *before);
}

#[tokio::test]
async fn toggle_complete_cascades_with_one_timestamp() {
    let (engine, store) = engine().await;
    engine
        .add_subtask("p1", "x", Task::new("x2", "X2"))
        .expect("applied")
        .settle()
        .await
        .expect("persisted");

    engine
        .toggle_task_complete("p1", "x")
        .expect("applied")
        .settle()
        .await
        .expect("persisted");

    let tasks = tasks_of(&engine, "p1");
    let parent = tree::find(&tasks, "x").expect("parent");
    assert!(parent.completed);
    let stamp = parent.completion_date.expect("stamped");
    for child in &parent.subtasks {
        assert!(child.completed);
        assert_eq!(child.completion_date, Some(stamp));
    }

    let stored = store.document(&EntityRef::project("p1")).expect("p1");
    assert_eq!(stored["tasks"][0]["subtasks"][1]["completed"], json!(true));

    engine
        .toggle_task_complete("p1", "x")
        .expect("applied")
        .settle()
        .await
        .expect("persisted");
    let tasks = tasks_of(&engine, "p1");
    let mut open = 0;
    tree::walk(&tasks, &mut |task: &Task, _depth: usize| {
        assert!(!task.completed);
        assert!(task.completion_date.is_none());
        open += 1;
    });
    assert_eq!(open, 3);
}

#[tokio::test]
async fn schedule_shift_moves_dated_subtree_in_one_write() {
    let (engine, store) = engine().await;
    let dated = Task::new("x", "X")
        .with_dates(Some(day("2024-07-06")), Some(day("2024-07-10")))
        .with_subtasks(vec![
            Task::new("x1", "X1").with_dates(Some(day("2024-07-07")), Some(day("2024-07-08"))),
            Task::new("x2", "Unscheduled"),
        ]);
    engine
        .update_task("p1", dated)
        .expect("applied")
        .settle()
        .await
        .expect("persisted");
    let writes = store.write_count();

    engine
        .shift_task_schedule("p1", "x", 3)
        .expect("applied")
        .settle()
        .await
        .expect("persisted");
    assert_eq!(store.write_count(), writes + 1);

    let tasks = tasks_of(&engine, "p1");
    let root = tree::find(&tasks, "x").expect("x");
    assert_eq!(root.start_date, Some(day("2024-07-09")));
    assert_eq!(root.end_date, Some(day("2024-07-13")));
    let child = tree::find(&tasks, "x1").expect("x1");
    assert_eq!(child.start_date, Some(day("2024-07-10")));
    assert_eq!(child.end_date, Some(day("2024-07-11")));
    assert!(!tree::find(&tasks, "x2").expect("x2").is_dated());

    let stored = store.document(&EntityRef::project("p1")).expect("p1");
    assert_eq!(stored["tasks"][0]["startDate"], json!("2024-07-09"));
}

#[tokio::test]
async fn failed_shift_reverts_every_shifted_task() {
    let (engine, store) = engine().await;
    let dated = Task::new("x", "X")
        .with_dates(Some(day("2024-07-06")), Some(day("2024-07-10")))
        .with_subtasks(vec![
            Task::new("x1", "X1").with_dates(Some(day("2024-07-07")), Some(day("2024-07-08"))),
        ]);
    engine.update_task("p1", dated).unwrap().settle().await.unwrap();
    let before = engine.current();

    store.fail_next(1);
    assert!(engine.shift_task_schedule("p1", "x", -2).unwrap().settle().await.is_err());
    assert_eq!(*engine.current(), *before);
}

#[tokio::test]
async fn reparent_indents_sibling() {
    let (engine, _store) = engine().await;
    engine.add_task("p2", Task::new("a", "A")).unwrap().settle().await.unwrap();
    engine.add_task("p2", Task::new("b", "B")).unwrap().settle().await.unwrap();

    engine
        .reparent_task("p2", "b", Some("a"))
        .unwrap()
        .settle()
        .await
        .unwrap();

    let tasks = tasks_of(&engine, "p2");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, "a");
    assert_eq!(tree_ids(&tasks[0].subtasks), vec!["b"]);

    engine.reparent_task("p2", "b", None).unwrap().settle().await.unwrap();
    assert_eq!(tree_ids(&tasks_of(&engine, "p2")), vec!["a", "b"]);
}

#[tokio::test]
async fn batch_update_merges_fields_and_keeps_children() {
    let (engine, _store) = engine().await;
    let mut updates = HashMap::new();
    updates.insert(
        "x".to_string(),
        TaskPatch {
            name: Some("Renamed".to_string()),
            ..TaskPatch::default()
        },
    );
    updates.insert(
        "x1".to_string(),
        TaskPatch {
            end_date: Some(Some(day("2024-08-01"))),
            ..TaskPatch::default()
        },
    );
    engine
        .update_multiple_tasks("p1", updates)
        .unwrap()
        .settle()
        .await
        .unwrap();

    let tasks = tasks_of(&engine, "p1");
    assert_eq!(tasks[0].name, "Renamed");
    assert_eq!(tasks[0].subtasks[0].end_date, Some(day("2024-08-01")));
    assert_eq!(tasks[0].subtasks[0].name, "X1");
}

#[tokio::test]
async fn dropped_handle_still_persists() {
    let (engine, store) = engine().await;
    let mut events = engine.events();
    drop(engine.delete_task("p1", "x1").expect("applied"));

    loop {
        let event = events.recv().await.expect("event");
        if event.event == EventKind::MutationPersisted {
            break;
        }
    }
    let stored = store.document(&EntityRef::project("p1")).expect("p1");
    assert_eq!(stored["tasks"][0]["subtasks"], json!([]));
}

#[tokio::test]
async fn groups_follow_the_same_pipeline() {
    let (engine, store) = engine().await;
    engine
        .add_group(ProjectGroup::new("g1", "Work", 0))
        .unwrap()
        .settle()
        .await
        .unwrap();
    let mut project = Project::new("p3", "Grouped");
    project.group_id = Some("g1".to_string());
    engine.add_project(project).unwrap().settle().await.unwrap();

    let patch = GroupPatch {
        color: Some("#ff0000".to_string()),
        ..GroupPatch::default()
    };
    engine.update_group("g1", patch).unwrap().settle().await.unwrap();
    assert_eq!(
        store.document(&EntityRef::group("g1")).expect("g1")["color"],
        json!("#ff0000")
    );

    assert!(matches!(
        engine.update_group("missing", GroupPatch::default()),
        Err(Error::GroupNotFound(_))
    ));

    engine.delete_group("g1").unwrap().settle().await.unwrap();
    let state = engine.current();
    assert!(state.group("g1").is_none());
    assert_eq!(
        state.project("p3").and_then(|p| p.group_id.clone()),
        Some("g1".to_string())
    );
    assert!(store.document(&EntityRef::group("g1")).is_none());
}

#[tokio::test]
async fn failed_project_delete_restores_project() {
    let (engine, store) = engine().await;
    store.fail_next(1);
    assert!(engine.delete_project("p1").unwrap().settle().await.is_err());
    assert!(engine.current().project("p1").is_some());
    assert!(store.document(&EntityRef::project("p1")).is_some());
}

#[tokio::test]
async fn remote_changes_are_sanitised_and_authoritative() {
    let (engine, store) = engine().await;
    let watcher = engine.watch_remote();
    let mut rx = engine.subscribe();

    store.put_document(
        &EntityRef::project("p2"),
        fields(json!({
            "id": "p2",
            "name": "Two",
            "tasks": [
                { "id": "r1", "name": "", "completed": "nope", "subtasks": 7 },
                { "name": "No id" },
            ],
        })),
    );

    tokio::time::timeout(Duration::from_secs(2), rx.changed())
        .await
        .expect("snapshot applied in time")
        .expect("open");

    let tasks = tasks_of(&engine, "p2");
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].name, "Untitled task");
    assert!(!tasks[0].completed);
    assert!(tasks[0].subtasks.is_empty());
    assert!(!tasks[1].id.is_empty());

    watcher.abort();
    let loaded = store.load().await.unwrap();
    assert_eq!(loaded.projects.len(), 2);
}

#[tokio::test]
async fn failed_move_stays_reverted_while_watching_remote() {
    let (engine, store) = engine().await;
    let watcher = engine.watch_remote();
    let before = engine.current();
    store.fail_entity("p2");

    let err = engine
        .move_task("p1", "p2", "x")
        .expect("applied")
        .settle()
        .await
        .expect_err("target write rejected");
    assert!(matches!(err, Error::PartialTransaction { .. }));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*engine.current(), *before);
    assert_eq!(engine.pending(), 0);
    watcher.abort();
}

#[tokio::test]
async fn outside_change_waits_for_pending_mutation() {
    let (engine, store) = engine().await;
    let watcher = engine.watch_remote();
    store.set_latency(Duration::from_millis(100));

    let mutation = engine.add_task("p1", Task::new("y", "Y")).expect("applied");
    store.put_document(
        &EntityRef::project("p2"),
        fields(json!({ "id": "p2", "name": "Two", "tasks": [{ "id": "r1", "name": "R1" }] })),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The broadcast has arrived but must not wipe the unsettled task.
    assert_eq!(engine.pending(), 1);
    assert_eq!(tree_ids(&tasks_of(&engine, "p1")), vec!["x", "x1", "y"]);
    assert!(tasks_of(&engine, "p2").is_empty());

    mutation.settle().await.expect("persisted");
    assert_eq!(engine.pending(), 0);
    assert_eq!(tree_ids(&tasks_of(&engine, "p1")), vec!["x", "x1", "y"]);
    assert_eq!(tree_ids(&tasks_of(&engine, "p2")), vec!["r1"]);
    watcher.abort();
}
