use std::collections::HashSet;

use arbor::progress;
use arbor::schedule;
use arbor::task::Task;
use arbor::tree;
use chrono::{NaiveDate, Utc};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Shape(Vec<Shape>);

#[derive(Debug, Clone)]
enum Op {
    Insert { parent: Option<usize> },
    Delete(usize),
    Reparent { task: usize, parent: Option<usize> },
    Toggle(usize),
}

fn shape() -> impl Strategy<Value = Shape> {
    Just(Shape(Vec::new())).prop_recursive(4, 32, 4, |inner| {
        proptest::collection::vec(inner, 0..4).prop_map(Shape)
    })
}

fn build(shape: &Shape, next: &mut usize) -> Task {
    let id = format!("t{next}");
    *next += 1;
    let subtasks = shape.0.iter().map(|child| build(child, next)).collect();
    Task::new(id.clone(), id).with_subtasks(subtasks)
}

/// Random forest whose ids are unique by construction.
fn forest() -> impl Strategy<Value = Vec<Task>> {
    proptest::collection::vec(shape(), 0..5).prop_map(|shapes| {
        let mut next = 0;
        shapes.iter().map(|shape| build(shape, &mut next)).collect()
    })
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        proptest::option::of(any::<usize>()).prop_map(|parent| Op::Insert { parent }),
        any::<usize>().prop_map(Op::Delete),
        (any::<usize>(), proptest::option::of(any::<usize>()))
            .prop_map(|(task, parent)| Op::Reparent { task, parent }),
        any::<usize>().prop_map(Op::Toggle),
    ]
}

fn pick(ids: &[String], index: usize) -> Option<String> {
    (!ids.is_empty()).then(|| ids[index % ids.len()].clone())
}

fn id_set(tree: &[Task]) -> HashSet<String> {
    tree::collect_ids(tree).into_iter().collect()
}

fn apply(tree: &[Task], op: &Op, inserted: &mut usize) -> (Vec<Task>, Option<String>) {
    let ids = tree::collect_ids(tree);
    match op {
        Op::Insert { parent } => {
            let id = format!("new{inserted}");
            *inserted += 1;
            let task = Task::new(id.clone(), "new");
            let next = match parent.and_then(|index| pick(&ids, index)) {
                Some(parent) => tree::insert_as_child(tree, &parent, task),
                None => {
                    let mut next = tree.to_vec();
                    next.push(task);
                    next
                }
            };
            (next, Some(id))
        }
        Op::Delete(index) => match pick(&ids, *index) {
            Some(id) => (tree::delete_subtree(tree, &id), None),
            None => (tree.to_vec(), None),
        },
        Op::Reparent { task, parent } => match pick(&ids, *task) {
            Some(id) => {
                let parent = parent.and_then(|index| pick(&ids, index));
                (tree::reparent(tree, &id, parent.as_deref()), None)
            }
            None => (tree.to_vec(), None),
        },
        Op::Toggle(index) => match pick(&ids, *index).and_then(|id| tree::find(tree, &id).cloned()) {
            Some(task) => {
                let toggled = task.with_completion(!task.completed, Utc::now());
                (tree::update_in_place(tree, &toggled), None)
            }
            None => (tree.to_vec(), None),
        },
    }
}

proptest! {
    #[test]
    fn operations_keep_ids_unique_and_known(
        start in forest(),
        ops in proptest::collection::vec(op(), 0..24),
    ) {
        let mut known = id_set(&start);
        let mut current = start;
        let mut inserted = 0;

        for op in &ops {
            let (next, added) = apply(&current, op, &mut inserted);
            if let Some(id) = added {
                known.insert(id);
            }
            let ids = tree::collect_ids(&next);
            let unique: HashSet<_> = ids.iter().cloned().collect();
            prop_assert_eq!(ids.len(), unique.len(), "duplicate id after {:?}", op);
            prop_assert!(unique.is_subset(&known), "unknown id after {:?}", op);
            current = next;
        }
    }

    #[test]
    fn delete_then_reinsert_restores_parent(start in forest(), index in any::<usize>()) {
        let ids = tree::collect_ids(&start);
        if let Some(id) = pick(&ids, index) {
            if let Some(parent) = tree::parent_of(&start, &id).map(|task| task.id.clone()) {
                let (detached, rest) = tree::find_and_remove(&start, &id);
                let detached = detached.expect("node exists");
                prop_assert!(!tree::contains(&rest, &id));

                let restored = tree::insert_as_child(&rest, &parent, detached.clone());
                prop_assert_eq!(id_set(&restored), id_set(&start));
                prop_assert_eq!(
                    tree::parent_of(&restored, &id).map(|task| task.id.clone()),
                    Some(parent)
                );
                prop_assert_eq!(tree::find(&restored, &id), Some(&detached));
            }
        }
    }

    #[test]
    fn reparent_never_loses_nodes(
        start in forest(),
        task in any::<usize>(),
        parent in proptest::option::of(any::<usize>()),
    ) {
        let ids = tree::collect_ids(&start);
        if let Some(id) = pick(&ids, task) {
            let parent = parent.and_then(|index| pick(&ids, index));
            let next = tree::reparent(&start, &id, parent.as_deref());
            let mut before = ids.clone();
            let mut after = tree::collect_ids(&next);
            before.sort();
            after.sort();
            prop_assert_eq!(before, after);
        }
    }

    #[test]
    fn aggregate_counts_every_node(start in forest(), index in any::<usize>()) {
        let total = tree::collect_ids(&start).len();
        let counts = progress::aggregate(&start);
        prop_assert_eq!(counts.total, total);
        prop_assert_eq!(counts.completed, 0);

        if let Some(id) = pick(&tree::collect_ids(&start), index) {
            let task = tree::find(&start, &id).cloned().expect("node exists");
            let subtree = progress::aggregate(std::slice::from_ref(&task)).total;
            let done = tree::update_in_place(&start, &task.with_completion(true, Utc::now()));
            let counts = progress::aggregate(&done);
            prop_assert_eq!(counts.total, total);
            prop_assert_eq!(counts.completed, subtree);
            prop_assert!(counts.percent() <= 100);
        }
    }

    #[test]
    fn cascade_keeps_durations(
        offsets in proptest::collection::vec((0i64..60, 0i64..10), 1..6),
        delta in -30i64..30,
    ) {
        let base = NaiveDate::from_ymd_opt(2024, 7, 1).expect("date");
        let children: Vec<Task> = offsets
            .iter()
            .enumerate()
            .map(|(index, (offset, length))| {
                let start = base + chrono::Duration::days(*offset);
                Task::new(format!("c{index}"), "child")
                    .with_dates(Some(start), Some(start + chrono::Duration::days(*length)))
            })
            .collect();
        let root = Task::new("root", "root")
            .with_dates(Some(base), Some(base + chrono::Duration::days(60)))
            .with_subtasks(children);

        let patches = schedule::cascade(&root, delta).expect("shift in range");
        prop_assert_eq!(patches.len(), offsets.len() + 1);
        for patch in &patches {
            let original = tree::find(std::slice::from_ref(&root), &patch.id).expect("patched node");
            let (Some(start), Some(end)) = (patch.start_date, patch.end_date) else {
                return Err(TestCaseError::fail("dated task lost a date"));
            };
            prop_assert_eq!(Some(start - chrono::Duration::days(delta)), original.start_date);
            prop_assert_eq!(Some(end - start), original.end_date.zip(original.start_date).map(|(e, s)| e - s));
        }
    }
}

fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("date")
}

#[test]
fn indent_moves_sibling_under_previous() {
    let forest = vec![Task::new("a", "A"), Task::new("b", "B")];
    let next = tree::reparent(&forest, "b", Some("a"));
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].id, "a");
    assert_eq!(tree::collect_ids(&next[0].subtasks), vec!["b"]);
}

#[test]
fn outdent_appends_to_top_level() {
    let forest = vec![
        Task::new("a", "A").with_subtasks(vec![Task::new("b", "B")]),
        Task::new("c", "C"),
    ];
    let next = tree::reparent(&forest, "b", None);
    assert_eq!(tree::collect_ids(&next), vec!["a", "c", "b"]);
}

#[test]
fn cascade_shifts_parent_and_dated_children() {
    let task = Task::new("x", "X")
        .with_dates(Some(day("2024-07-06")), Some(day("2024-07-10")))
        .with_subtasks(vec![
            Task::new("y", "Y").with_dates(Some(day("2024-07-07")), None),
            Task::new("z", "Z"),
        ]);

    let patches = schedule::cascade(&task, 3).expect("shift in range");
    assert_eq!(patches.len(), 2);
    assert_eq!(patches[0].start_date, Some(day("2024-07-09")));
    assert_eq!(patches[0].end_date, Some(day("2024-07-13")));
    assert_eq!(patches[1].id, "y");
    assert_eq!(patches[1].start_date, Some(day("2024-07-10")));
    assert_eq!(patches[1].end_date, None);

    let updated = tree::update_multiple(
        std::slice::from_ref(&task),
        &schedule::patches_to_updates(&patches),
    );
    assert_eq!(tree::find(&updated, "z").map(Task::is_dated), Some(false));
    assert_eq!(tree::find(&updated, "y").and_then(|t| t.start_date), Some(day("2024-07-10")));
}
