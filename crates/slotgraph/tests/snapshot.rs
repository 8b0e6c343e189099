//! Snapshot and restore.

use slotgraph::harness::TestEngine;
use slotgraph::samples::{counter_document, repeat_document, Sample};
use slotgraph::snapshot::SNAPSHOT_VERSION;
use slotgraph::{Engine, EngineConfig, EngineError, Snapshot, Value};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn restore(sample: &Sample, snapshot: &Snapshot) -> TestEngine {
    let engine = Engine::from_snapshot(
        sample.schemas.clone(),
        sample.root.clone(),
        EngineConfig::default(),
        snapshot,
    )
    .expect("restore");
    TestEngine::from_engine(engine)
}

#[test]
fn restored_counter_reads_the_same() {
    init();
    let sample = counter_document();
    let mut t = TestEngine::new(&sample);
    t.dispatch("/counter", "add", Value::object([("amount", Value::int(4))]));
    t.set("/counter:label", Value::text("four"));

    let snapshot = t.engine().snapshot();
    assert_eq!(snapshot.version, SNAPSHOT_VERSION);
    assert_eq!(snapshot.value("/counter:count"), Some(&Value::int(4)));
    assert_eq!(snapshot.value("/counter:label"), Some(&Value::text("four")));
    assert_eq!(snapshot.value("/counter:doubled"), None);

    let mut restored = restore(&sample, &snapshot);
    assert_eq!(
        restored.engine().get_all_values_by_path(true),
        t.engine().get_all_values_by_path(true)
    );
    restored.assert_eq("/counter:doubled", Value::int(8));
}

#[test]
fn restored_expansion_keeps_topology_and_overrides() {
    init();
    let sample = repeat_document();
    let mut t = TestEngine::new(&sample);
    t.set("/list:count", Value::int(5));
    t.set("/list/#1:value", Value::int(10));
    t.assert_eq("/list:total", Value::int(19));

    let snapshot = t.engine().snapshot();
    assert!(snapshot.essential.iter().all(|e| !e.slot.ends_with(":total")));
    assert_eq!(snapshot.expansions.len(), 1);
    let list = &snapshot.expansions[0];
    assert_eq!(list.node, "/list");
    assert_eq!(
        list.children.iter().map(|c| c.index).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4]
    );
    assert_eq!(list.children[3].name, "#3");

    let mut restored = restore(&sample, &snapshot);
    restored.assert_eq("/list:total", Value::int(19));
    restored.assert_eq("/list/#1:value", Value::int(10));
    restored.assert_eq("/summary:second", Value::int(10));
    assert_eq!(
        restored.engine().get_all_values_by_path(true),
        t.engine().get_all_values_by_path(true)
    );
    restored.assert_consistent();

    // The restored context keeps working.
    restored.set("/list:count", Value::int(2));
    restored.assert_eq("/list:total", Value::int(10));
}

#[test]
fn snapshot_of_an_untouched_document_is_topology_only() {
    init();
    let mut t = TestEngine::new(&repeat_document());
    let snapshot = t.engine().snapshot();
    assert!(snapshot.essential.is_empty());
    assert_eq!(snapshot.expansions[0].children.len(), 3);
}

#[test]
fn unknown_version_is_rejected() {
    init();
    let sample = counter_document();
    let mut snapshot = TestEngine::new(&sample).engine().snapshot();
    snapshot.version = SNAPSHOT_VERSION + 1;
    let result = Engine::from_snapshot(sample.schemas.clone(), sample.root.clone(), EngineConfig::default(), &snapshot);
    assert!(matches!(result, Err(EngineError::Snapshot(_))));
}

#[test]
fn derived_entries_are_refused() {
    init();
    let sample = counter_document();
    let mut snapshot = TestEngine::new(&sample).engine().snapshot();
    snapshot.essential.push(slotgraph::snapshot::EssentialEntry {
        slot: "/counter:doubled".to_string(),
        value: Value::int(2),
    });
    let result = Engine::from_snapshot(sample.schemas.clone(), sample.root.clone(), EngineConfig::default(), &snapshot);
    assert!(matches!(result, Err(EngineError::Snapshot(_))));
}

#[cfg(feature = "json")]
#[test]
fn json_round_trip() {
    init();
    let sample = repeat_document();
    let mut t = TestEngine::new(&sample);
    t.set("/list/#2:value", Value::int(7));
    let snapshot = t.engine().snapshot();

    let json = snapshot.to_json().unwrap();
    let parsed = Snapshot::from_json(&json).unwrap();
    assert_eq!(parsed, snapshot);

    let mut restored = restore(&sample, &parsed);
    restored.assert_eq("/list:total", Value::int(8));
}
