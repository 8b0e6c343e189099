//! Evaluator: memoization, invalidation, cycles and unresolvable queries.

use slotgraph::harness::TestEngine;
use slotgraph::samples::{counter_document, cycle_document, vector_document};
use slotgraph::value::ops;
use slotgraph::{
    DependencyQuery, Engine, EngineConfig, EngineError, Freshness, NodeSchema, NodeSpec, SchemaRegistry, SlotSchema,
    Value,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn fresh_reads_do_not_rerun_definitions() {
    init();
    let mut t = TestEngine::new(&vector_document());
    t.assert_eq("/v:displacement", Value::vector([3.0, 4.0]));
    t.assert_eq("/v:displacement", Value::vector([3.0, 4.0]));
    assert_eq!(t.definition_calls("/v:displacement"), 1);

    t.assert_eq("/v:length", Value::float(5.0));
    t.assert_eq("/v:length", Value::float(5.0));
    assert_eq!(t.definition_calls("/v:length"), 1);
    assert_eq!(t.definition_calls("/v:displacement"), 1);
}

#[test]
fn mutation_reaches_every_transitive_subscriber_and_nothing_else() {
    init();
    let mut t = TestEngine::new(&vector_document());
    t.assert_eq("/v:length", Value::float(5.0));
    t.assert_eq("/p:total", Value::int(3));

    assert!(t.set("/v:head", Value::vector([6.0, 8.0])).is_applied());

    let displacement = t.slot("/v:displacement");
    let length = t.slot("/v:length");
    let total = t.slot("/p:total");
    assert_eq!(t.engine().freshness(displacement), Some(Freshness::Stale));
    assert_eq!(t.engine().freshness(length), Some(Freshness::Stale));
    assert_eq!(t.engine().freshness(total), Some(Freshness::Fresh));

    t.assert_eq("/v:length", Value::float(10.0));
    t.assert_eq("/v:displacement", Value::vector([6.0, 8.0]));
    t.assert_eq("/p:total", Value::int(3));
    assert_eq!(t.definition_calls("/p:total"), 1);
    assert_eq!(t.definition_calls("/v:displacement"), 2);
    t.assert_consistent();
}

#[test]
fn cycle_falls_back_and_is_recorded() {
    init();
    let mut t = TestEngine::new(&cycle_document());
    t.assert_eq("/k:x", Value::Empty);
    t.assert_eq("/k:after", Value::Empty);

    let errors: Vec<_> = t.engine().diagnostics().errors().cloned().collect();
    assert!(
        errors
            .iter()
            .any(|d| matches!(&d.error, EngineError::CyclicDependency { slot } if slot == "/k:x")),
        "expected a cycle on /k:x, got {errors:?}"
    );
    t.assert_consistent();
}

/// `s0` is essential; every `s{i}` is `s{i-1} + 1`.
fn chain(len: usize, config: EngineConfig) -> TestEngine {
    let mut schema = NodeSchema::new("chain").slot(SlotSchema::essential("s0", 0i64));
    for i in 1..=len {
        schema = schema.slot(SlotSchema::derived(
            format!("s{i}"),
            vec![DependencyQuery::own(format!("s{}", i - 1))],
            |d| ops::add(d.get(0), &Value::int(1)),
        ));
    }
    let engine = Engine::with_config(SchemaRegistry::new().with(schema), NodeSpec::new("chain"), config);
    TestEngine::from_engine(engine)
}

fn depth_errors(t: &mut TestEngine) -> Vec<String> {
    t.engine()
        .diagnostics()
        .errors()
        .filter_map(|d| match &d.error {
            EngineError::CyclicDependency { slot } => Some(slot.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn long_chains_freshen_without_deep_recursion() {
    init();
    let mut t = chain(3000, EngineConfig::default());
    t.assert_eq("/:s3000", Value::int(3000));
    assert!(t.set("/:s0", Value::int(10)).is_applied());
    t.assert_eq("/:s3000", Value::int(3010));
    assert_eq!(t.definition_calls("/:s1500"), 2);
    assert!(depth_errors(&mut t).is_empty());
    t.assert_consistent();
}

#[test]
fn chain_longer_than_the_depth_bound_falls_back() {
    init();
    let mut t = chain(5000, EngineConfig::default());
    t.assert_eq("/:s5000", Value::Empty);
    assert_eq!(depth_errors(&mut t).len(), 1);
    t.assert_eq("/:s100", Value::int(100));
}

#[test]
fn depth_overflow_leaves_readers_recomputable() {
    init();
    let config = EngineConfig {
        max_evaluation_depth: 2,
        ..EngineConfig::default()
    };
    let mut t = chain(3, config);
    t.assert_eq("/:s3", Value::Empty);
    assert_eq!(depth_errors(&mut t), vec!["/:s1".to_string()]);
    let s3 = t.slot("/:s3");
    assert_ne!(t.engine().freshness(s3), Some(Freshness::Fresh));

    assert!(t.set("/:s0", Value::int(100)).is_applied());
    t.assert_eq("/:s1", Value::int(101));
    t.assert_eq("/:s2", Value::int(102));
    t.assert_eq("/:s3", Value::int(103));
    t.assert_consistent();
}

#[test]
fn unresolvable_query_feeds_empty_and_warns() {
    init();
    let mut t = TestEngine::new(&cycle_document());
    t.assert_eq("/k:dangling", Value::text("none"));
    let warned = t
        .engine()
        .diagnostics()
        .warnings()
        .any(|d| d.context == "/k:dangling" && matches!(d.error, EngineError::UnresolvableQuery { .. }));
    assert!(warned);
}

#[test]
fn overridable_slot_uses_stored_value_when_dependency_is_missing() {
    init();
    let mut t = TestEngine::new(&cycle_document());
    t.assert_eq("/k:guess", Value::int(7));
}

#[test]
fn essential_slot_with_definition_keeps_stored_value() {
    init();
    let mut t = TestEngine::new(&cycle_document());
    t.assert_eq("/k:shadowed", Value::int(5));
    assert!(t.set("/k:shadowed", Value::int(6)).is_applied());
    t.assert_eq("/k:shadowed", Value::int(6));
}

#[test]
fn overridable_slot_switches_to_stored_value_once_set() {
    init();
    let mut t = TestEngine::new(&counter_document());
    t.assert_eq("/counter:label", Value::text("count: 0"));
    t.dispatch("/counter", "increment", Value::Empty);
    t.assert_eq("/counter:label", Value::text("count: 1"));

    assert!(t.set("/counter:label", Value::text("custom")).is_applied());
    t.assert_eq("/counter:label", Value::text("custom"));
    t.dispatch("/counter", "increment", Value::Empty);
    t.assert_eq("/counter:count", Value::int(2));
    t.assert_eq("/counter:label", Value::text("custom"));
}

#[test]
fn why_did_change_names_the_changed_dependency() {
    init();
    let mut t = TestEngine::with_config(&vector_document(), EngineConfig::debugging());
    t.read("/v:displacement");
    t.set("/v:tail", Value::vector([1.0, 1.0]));
    t.assert_eq("/v:displacement", Value::vector([2.0, 3.0]));

    let displacement = t.slot("/v:displacement");
    let tail = t.slot("/v:tail");
    let head = t.slot("/v:head");
    let reason = t.engine().why_did_change(displacement).expect("displacement changed");
    assert!(reason.triggered_by.contains(&tail));
    assert!(!reason.triggered_by.contains(&head));

    let chain = t.engine().change_chain(displacement);
    assert!(chain.iter().any(|r| r.slot == tail && r.written));
    assert!(!t.engine().diagnostics().changes().is_empty());
}

#[test]
fn bulk_read_freshens_everything_when_forced() {
    init();
    let mut t = TestEngine::new(&vector_document());
    let lazy = t.engine().get_all_slot_values(false);
    assert!(lazy.is_empty());

    let values = t.engine().get_all_values_by_path(true);
    assert_eq!(values.get("/v:displacement"), Some(&Value::vector([3.0, 4.0])));
    assert_eq!(values.get("/p:total"), Some(&Value::int(3)));
    assert_eq!(values.len(), 7);

    let by_id = t.engine().get_all_slot_values(false);
    assert_eq!(by_id.len(), 7);
    t.assert_consistent();
}
