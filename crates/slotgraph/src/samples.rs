//! Sample documents.
//!
//! Programmatically built schemas and trees, used by the integration tests,
//! the benchmarks and the command-line host. Nothing here is parsed.

use crate::action::TriggerSpec;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::query::{DependencyQuery, NodeRef};
use crate::schema::{
    ActionPath, ActionSchema, ExpansionSchema, InverseResult, NodeSchema, ProposedChange, SchemaRegistry,
    SlotSchema, SlotUpdate, Validation,
};
use crate::tree::NodeSpec;
use crate::value::{ops, Value};

/// Schemas plus the initial document.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: &'static str,
    pub schemas: SchemaRegistry,
    pub root: NodeSpec,
}

impl Sample {
    pub fn engine(&self) -> Engine {
        Engine::new(self.schemas.clone(), self.root.clone())
    }

    pub fn engine_with(&self, config: EngineConfig) -> Engine {
        Engine::with_config(self.schemas.clone(), self.root.clone(), config)
    }
}

/// Every sample, by name.
pub fn all() -> Vec<Sample> {
    vec![
        vector_document(),
        counter_document(),
        repeat_document(),
        trigger_document(),
        cycle_document(),
    ]
}

pub fn by_name(name: &str) -> Option<Sample> {
    all().into_iter().find(|s| s.name == name)
}

fn bump(action: &'static str, slot: &'static str) -> ActionSchema {
    ActionSchema::new(action, vec![DependencyQuery::own(slot)], move |input| {
        vec![SlotUpdate::own(slot, ops::add(input.deps.get(0), &Value::int(1)))]
    })
}

fn this(action: &str) -> ActionPath {
    ActionPath::new(NodeRef::This, action)
}

/// A vector with `head`, `tail` and an invertible `displacement`, next to
/// a pair of numbers whose `total` cannot be inverted.
///
/// `/v:displacement` is `head - tail`; setting it moves `head` and keeps
/// `tail`. `/p:total` is `a + b`.
pub fn vector_document() -> Sample {
    let vector = NodeSchema::new("vector")
        .slot(SlotSchema::essential("head", Value::vector([0.0, 0.0])).default_from("head"))
        .slot(SlotSchema::essential("tail", Value::vector([0.0, 0.0])).default_from("tail"))
        .slot(
            SlotSchema::derived(
                "displacement",
                vec![DependencyQuery::own("head"), DependencyQuery::own("tail")],
                |d| ops::sub(d.get(0), d.get(1)),
            )
            .with_inverse(|requested, d| match ops::add(d.get(1), requested) {
                Value::Empty => InverseResult::Reject(format!("{requested} is not a vector")),
                head => InverseResult::Propose(vec![ProposedChange::new(0, head)]),
            }),
        )
        .slot(SlotSchema::derived(
            "length",
            vec![DependencyQuery::own("displacement")],
            |d| match d.get(0).as_vector() {
                Some(v) => Value::float(v.iter().map(|c| c * c).sum::<f64>().sqrt()),
                None => Value::Empty,
            },
        ));

    let pair = NodeSchema::new("pair")
        .slot(SlotSchema::essential("a", 1i64))
        .slot(SlotSchema::essential("b", 2i64))
        .slot(SlotSchema::derived(
            "total",
            vec![DependencyQuery::own("a"), DependencyQuery::own("b")],
            |d| ops::add(d.get(0), d.get(1)),
        ))
        .action(ActionSchema::new("reset", vec![], |_| {
            vec![
                SlotUpdate::own("total", Value::int(0)),
                SlotUpdate::own("a", Value::int(0)),
            ]
        }));

    Sample {
        name: "vector",
        schemas: SchemaRegistry::new().with(vector).with(pair),
        root: NodeSpec::new("document")
            .child(
                NodeSpec::new("vector")
                    .named("v")
                    .attr("head", Value::vector([3.0, 4.0]))
                    .attr("tail", Value::vector([0.0, 0.0])),
            )
            .child(NodeSpec::new("pair").named("p")),
    }
}

/// A counter with a validated `count`, a `doubled` view whose inverse only
/// honours even requests fully, and a `label` that can be overridden.
pub fn counter_document() -> Sample {
    let counter = NodeSchema::new("counter")
        .slot(
            SlotSchema::essential("count", 0i64)
                .default_from("start")
                .validated(|v| match v.as_int() {
                    Some(n) if n < 0 => Validation::Adjust(Value::int(0)),
                    Some(_) => Validation::Accept,
                    None => Validation::Reject(format!("{v} is not an integer")),
                }),
        )
        .slot(
            SlotSchema::derived("doubled", vec![DependencyQuery::own("count")], |d| {
                ops::mul(d.get(0), &Value::int(2))
            })
            .with_inverse(|requested, _| match requested.as_int() {
                Some(n) if n % 2 == 0 => InverseResult::Propose(vec![ProposedChange::new(0, Value::int(n / 2))]),
                Some(n) => InverseResult::Partial(vec![ProposedChange::new(0, Value::int(n.div_euclid(2)))]),
                None => InverseResult::Reject(format!("{requested} is not an integer")),
            }),
        )
        .slot(
            SlotSchema::derived("label", vec![DependencyQuery::own("count")], |d| {
                Value::text(format!("count: {}", d.get(0)))
            })
            .overridable(""),
        )
        .action(
            ActionSchema::new("increment", vec![DependencyQuery::own("count")], |input| {
                let by = input.arg("by").cloned().unwrap_or(Value::int(1));
                vec![SlotUpdate::own("count", ops::add(input.deps.get(0), &by))]
            }),
        )
        .action(
            ActionSchema::new("add", vec![DependencyQuery::own("count")], |input| {
                let amount = input.arg("amount").cloned().unwrap_or_default();
                vec![SlotUpdate::own("count", ops::add(input.deps.get(0), &amount))]
            })
            .requires("amount"),
        )
        .action(ActionSchema::new("reset", vec![], |_| {
            vec![SlotUpdate::own("count", Value::int(0))]
        }));

    Sample {
        name: "counter",
        schemas: SchemaRegistry::new().with(counter),
        root: NodeSpec::new("document").child(NodeSpec::new("counter").named("counter")),
    }
}

/// A dynamic expansion: `/list` generates `count` items, each with an
/// essential `value` defaulting to its index. `/summary` reads into the
/// generated set by source index and by collection.
pub fn repeat_document() -> Sample {
    let list = NodeSchema::new("repeat")
        .slot(SlotSchema::essential("count", 3i64).default_from("count"))
        .slot(SlotSchema::derived(
            "total",
            vec![DependencyQuery::descendants(".", Some("item"), "value")],
            |d| ops::sum(&d.list(0)),
        ))
        .slot(SlotSchema::derived(
            "first",
            vec![DependencyQuery::nth(".", 0, "value")],
            |d| d.get(0).clone(),
        ))
        .expansion(ExpansionSchema::counted(DependencyQuery::own("count"), |item| {
            NodeSpec::new("item").attr("index", item.index as i64)
        }))
        .action(
            ActionSchema::new("resize", vec![], |input| {
                vec![SlotUpdate::own("count", input.arg("count").cloned().unwrap_or_default())]
            })
            .requires("count"),
        );

    let item = NodeSchema::new("item")
        .slot(SlotSchema::essential("value", 0i64).default_from("index"))
        .slot(
            SlotSchema::derived("doubled", vec![DependencyQuery::own("value")], |d| {
                ops::mul(d.get(0), &Value::int(2))
            })
            .with_inverse(|requested, _| match requested.as_int() {
                Some(n) if n % 2 == 0 => InverseResult::Propose(vec![ProposedChange::new(0, Value::int(n / 2))]),
                _ => InverseResult::Reject(format!("{requested} is not an even integer")),
            }),
        )
        .slot(SlotSchema::derived(
            "share",
            vec![DependencyQuery::own("value"), DependencyQuery::parent("total")],
            |d| match (d.get(0).as_f64(), d.get(1).as_f64()) {
                (Some(v), Some(t)) if t != 0.0 => Value::float(v / t),
                _ => Value::Empty,
            },
        ));

    let summary = NodeSchema::new("summary")
        .slot(SlotSchema::derived(
            "second",
            vec![DependencyQuery::source_index("$list", 1, "value")],
            |d| d.get(0).clone(),
        ))
        .slot(SlotSchema::derived(
            "items",
            vec![DependencyQuery::children("$list", Some("item"), "value")],
            |d| Value::int(d.all(0).len() as i64),
        ))
        .slot(
            SlotSchema::derived(
                "second_or_default",
                vec![DependencyQuery::source_index("$list", 1, "value")],
                |d| d.get(0).clone(),
            )
            .overridable(-1i64),
        );

    Sample {
        name: "repeat",
        schemas: SchemaRegistry::new().with(list).with(item).with(summary),
        root: NodeSpec::new("document")
            .child(NodeSpec::new("repeat").named("list").attr("count", 3i64))
            .child(NodeSpec::new("summary").named("summary")),
    }
}

/// A panel of counters wired with triggers:
///
/// - `b` is chained from `a`, `c` fires when `ready` (`clicks >= 2`) turns
///   true.
/// - `group` is a composite of `x` and `y`; `after_group` is chained from
///   `group` and `after_x` from `x`.
/// - `z` is chained from `a` but is a member of the conditional composite
///   `guarded`, so its chain is superseded.
/// - `ping` and `pong` are chained from each other.
pub fn trigger_document() -> Sample {
    let counters = [
        "clicks",
        "b_runs",
        "c_runs",
        "x_runs",
        "y_runs",
        "after_group_runs",
        "after_x_runs",
        "z_runs",
        "ping_runs",
        "pong_runs",
    ];
    let mut panel = counters
        .iter()
        .fold(NodeSchema::new("panel"), |schema, name| {
            schema.slot(SlotSchema::essential(*name, 0i64))
        })
        .slot(SlotSchema::derived("ready", vec![DependencyQuery::own("clicks")], |d| {
            ops::at_least(d.get(0), &Value::int(2))
        }));
    for (action, slot) in [
        ("a", "clicks"),
        ("b", "b_runs"),
        ("c", "c_runs"),
        ("x", "x_runs"),
        ("y", "y_runs"),
        ("after_group", "after_group_runs"),
        ("after_x", "after_x_runs"),
        ("z", "z_runs"),
        ("ping", "ping_runs"),
        ("pong", "pong_runs"),
    ] {
        panel = panel.action(bump(action, slot));
    }
    panel = panel
        .action(ActionSchema::composite("group", vec![this("x"), this("y")]))
        .action(ActionSchema::composite("guarded", vec![this("z")]));

    let root = NodeSpec::new("document").child(
        NodeSpec::new("panel")
            .named("panel")
            .trigger(TriggerSpec::new("b").chained_from(this("a")))
            .trigger(TriggerSpec::new("c").when(DependencyQuery::own("ready")))
            .trigger(TriggerSpec::new("after_group").chained_from(this("group")))
            .trigger(TriggerSpec::new("after_x").chained_from(this("x")))
            .trigger(TriggerSpec::new("z").chained_from(this("a")))
            .trigger(TriggerSpec::new("guarded").when(DependencyQuery::own("ready")))
            .trigger(TriggerSpec::new("pong").chained_from(this("ping")))
            .trigger(TriggerSpec::new("ping").chained_from(this("pong"))),
    );

    Sample {
        name: "triggers",
        schemas: SchemaRegistry::new().with(panel),
        root,
    }
}

/// Problem cases: `x` and `y` read each other, `dangling` reads a node that
/// does not exist, `guess` is overridable with an unresolvable dependency,
/// and `shadowed` is essential with a definition but no override flag.
pub fn cycle_document() -> Sample {
    let knot = NodeSchema::new("knot")
        .slot(SlotSchema::derived("x", vec![DependencyQuery::own("y")], |d| {
            ops::add(d.get(0), &Value::int(1))
        }))
        .slot(SlotSchema::derived("y", vec![DependencyQuery::own("x")], |d| {
            ops::add(d.get(0), &Value::int(1))
        }))
        .slot(SlotSchema::derived("after", vec![DependencyQuery::own("x")], |d| {
            d.get(0).clone()
        }))
        .slot(SlotSchema::derived(
            "dangling",
            vec![DependencyQuery::slot("/missing", "value")],
            |d| match d.get(0) {
                Value::Empty => Value::text("none"),
                other => other.clone(),
            },
        ))
        .slot(
            SlotSchema::derived("guess", vec![DependencyQuery::slot("/missing", "value")], |d| {
                d.get(0).clone()
            })
            .overridable(7i64),
        )
        .slot(
            SlotSchema::essential("shadowed", 5i64).with_definition(vec![], |_| Value::int(99)),
        );

    Sample {
        name: "cycle",
        schemas: SchemaRegistry::new().with(knot),
        root: NodeSpec::new("document").child(NodeSpec::new("knot").named("k")),
    }
}
