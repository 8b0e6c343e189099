//! Dynamic expansion: reconciliation keeps identity of surviving children.

use slotgraph::harness::TestEngine;
use slotgraph::ledger::DeltaKind;
use slotgraph::samples::repeat_document;
use slotgraph::{EngineConfig, EngineError, NodeId, Value};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn list(t: &mut TestEngine) -> NodeId {
    t.engine().resolve_path("/list").expect("list node")
}

fn item_ids(t: &mut TestEngine) -> Vec<(u64, NodeId)> {
    let list = list(t);
    t.engine().expansion_children(list)
}

#[test]
fn initial_generation() {
    init();
    let mut t = TestEngine::new(&repeat_document());
    t.assert_eq("/list:total", Value::int(3));
    t.assert_eq("/list:first", Value::int(0));
    t.assert_eq("/list/#1:value", Value::int(1));
    t.assert_eq("/list/#2:doubled", Value::int(4));
    t.assert_eq("/summary:second", Value::int(1));
    t.assert_eq("/summary:items", Value::int(3));
    assert_eq!(item_ids(&mut t).iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
    t.assert_consistent();
}

#[test]
fn regenerating_an_unchanged_generation_keeps_everything() {
    init();
    let mut t = TestEngine::new(&repeat_document());
    let before = item_ids(&mut t);
    assert!(t.set("/list/#1:value", Value::int(10)).is_applied());

    let list = list(&mut t);
    let diff = t.engine().regenerate(list).expect("regenerate");
    assert!(diff.is_unchanged());
    assert_eq!(diff.kept, vec![0, 1, 2]);
    assert_eq!(item_ids(&mut t), before);
    t.assert_eq("/list/#1:value", Value::int(10));
}

#[test]
fn growing_keeps_existing_children_and_overrides() {
    init();
    let mut t = TestEngine::new(&repeat_document());
    let before = item_ids(&mut t);
    t.set("/list/#1:value", Value::int(10));
    t.assert_eq("/list:total", Value::int(12));

    t.set("/list:count", Value::int(5));
    t.assert_eq("/list:total", Value::int(19));
    t.assert_eq("/summary:items", Value::int(5));

    let after = item_ids(&mut t);
    assert_eq!(after.len(), 5);
    assert_eq!(&after[..3], &before[..]);
    t.assert_eq("/list/#1:value", Value::int(10));
    t.assert_eq("/list/#4:value", Value::int(4));
    t.assert_consistent();
}

#[test]
fn shrinking_destroys_and_regrowing_starts_fresh() {
    init();
    let mut t = TestEngine::new(&repeat_document());
    t.set("/list/#1:value", Value::int(10));
    t.assert_eq("/summary:second", Value::int(10));
    t.assert_eq("/summary:second_or_default", Value::int(10));
    let first = item_ids(&mut t)[0];

    t.dispatch("/list", "resize", Value::object([("count", Value::int(1))]));
    t.assert_eq("/list:total", Value::int(0));
    t.assert_eq("/summary:items", Value::int(1));
    t.assert_eq("/summary:second", Value::Empty);
    t.assert_eq("/summary:second_or_default", Value::int(-1));
    assert_eq!(item_ids(&mut t), vec![first]);
    t.assert_consistent();

    t.dispatch("/list", "resize", Value::object([("count", Value::int(3))]));
    t.assert_eq("/list/#1:value", Value::int(1));
    t.assert_eq("/list/#2:value", Value::int(2));
    t.assert_eq("/summary:second", Value::int(1));
    t.assert_eq("/summary:second_or_default", Value::int(1));
    t.assert_eq("/list:total", Value::int(3));
    assert_eq!(item_ids(&mut t)[0], first);
    t.assert_consistent();
}

#[test]
fn generated_children_read_their_parent() {
    init();
    let mut t = TestEngine::new(&repeat_document());
    t.assert_eq("/list/#2:share", Value::float(2.0 / 3.0));
    t.set("/list/#0:value", Value::int(3));
    t.assert_eq("/list/#2:share", Value::float(2.0 / 6.0));
}

#[test]
fn positional_paths_reach_generated_children() {
    init();
    let mut t = TestEngine::new(&repeat_document());
    t.assert_eq("$list[1]:value", Value::int(1));
    assert!(t.set("$list[2]:doubled", Value::int(8)).is_applied());
    t.assert_eq("/list/#2:value", Value::int(4));
}

#[test]
fn reconciliation_is_recorded_in_the_ledger() {
    init();
    let mut t = TestEngine::with_config(&repeat_document(), EngineConfig::debugging());
    t.read("/list:total");
    t.set("/list:count", Value::int(2));
    t.read("/list:total");

    let reconciled: Vec<_> = t
        .engine()
        .ledger()
        .entries()
        .iter()
        .filter_map(|e| match &e.kind {
            DeltaKind::ExpansionReconciled {
                kept, created, removed, ..
            } => Some((*kept, *created, *removed)),
            _ => None,
        })
        .collect();
    assert_eq!(reconciled, vec![(0, 3, 0), (2, 0, 1)]);
    assert!(
        t.engine()
            .ledger()
            .entries()
            .iter()
            .any(|e| matches!(&e.kind, DeltaKind::NodeRemoved { path, .. } if path == "/list/#2"))
    );
}

#[test]
fn resize_requires_a_count() {
    init();
    let mut t = TestEngine::new(&repeat_document());
    let err = t
        .engine()
        .dispatch_at("/list", "resize", Value::Empty)
        .expect_err("missing argument");
    assert!(matches!(err, EngineError::InvalidArguments { ref missing, .. } if missing == "count"));
    t.assert_eq("/list:count", Value::int(3));
}

#[test]
fn collection_queries_follow_the_current_generation() {
    init();
    let mut t = TestEngine::new(&repeat_document());
    let root = t.engine().tree().root();
    let query = slotgraph::DependencyQuery::children("/list", Some("item"), "value");
    assert_eq!(t.engine().resolve(&query, root).expect("resolve").len(), 3);

    t.set("/list:count", Value::int(5));
    let slots = t.engine().resolve(&query, root).expect("resolve");
    assert_eq!(slots.len(), 5);
    assert_eq!(t.engine().slot_path(slots[4]), "/list/#4:value");
}

#[test]
fn host_inserted_children_join_collection_queries() {
    init();
    let mut t = TestEngine::new(&repeat_document());
    t.assert_eq("/list:total", Value::int(3));

    let list = list(&mut t);
    let extra = t
        .engine()
        .insert_node(list, &slotgraph::NodeSpec::new("item").attr("index", 10i64))
        .expect("insert");
    t.assert_eq("/list:total", Value::int(13));
    assert_eq!(t.engine().tree().parent(extra), Some(list));
    t.assert_consistent();
}
