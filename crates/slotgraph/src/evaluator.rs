//! Evaluator: pull-based, memoized freshening and push-based staleness.
//!
//! `get_value` freshens a slot by first freshening everything in its
//! resolved dependency set. The walk down the dependency graph uses an
//! explicit work stack, so a long chain costs heap, not native stack.
//! `mark_stale` walks the reverse subscriber index from a mutated slot; it
//! never scans the whole graph.

use crate::arena::{Freshness, SlotId};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::expansion::GENERATION_SLOT;
use crate::schema::{DependencyValue, DependencyValues, SlotMode};
use crate::tree::NodeId;
use crate::value::Value;
use rustc_hash::FxHashSet;

/// How a bottom-up freshen of a slot's dependencies ended.
enum Walk {
    /// Every non-Fresh dependency was evaluated, or a cycle was found and
    /// is left to `evaluate`.
    Done,
    /// The dependency path grew past `max_evaluation_depth`.
    TooDeep,
}

impl Engine {
    /// Current value of `slot`, recomputing it if it is not Fresh.
    ///
    /// A Fresh slot returns its memoized value without running its
    /// definition. A destroyed slot reads as `Value::Empty`.
    pub fn get_value(&mut self, slot: SlotId) -> Value {
        let Some(entry) = self.slots.get(slot) else {
            return Value::Empty;
        };
        if entry.freshness == Freshness::Fresh {
            return entry.value.clone();
        }
        if !self.on_stack.contains(&slot) {
            if let Walk::TooDeep = self.freshen_dependencies(slot) {
                return self.slots.get(slot).map(|s| s.fallback()).unwrap_or_default();
            }
        }
        self.evaluate(slot)
    }

    /// Evaluate, leaves first, every non-Fresh slot `root` transitively
    /// reads, leaving `root` itself to the caller.
    ///
    /// Each slot is evaluated only after its dependencies are Fresh, so
    /// `evaluate` recurses at most one level for it. On a back edge the
    /// walk stops and `evaluate` finds and records the cycle.
    fn freshen_dependencies(&mut self, root: SlotId) -> Walk {
        let limit = self.config.max_evaluation_depth.saturating_sub(self.evaluating.len());
        let mut work = vec![(root, false)];
        let mut open: FxHashSet<SlotId> = FxHashSet::default();
        while let Some((slot, expanded)) = work.pop() {
            if expanded {
                open.remove(&slot);
                if slot != root {
                    self.evaluate(slot);
                }
                continue;
            }
            if open.contains(&slot) || self.on_stack.contains(&slot) {
                return Walk::Done;
            }
            if !self.needs_evaluation(slot) {
                continue;
            }
            if open.len() >= limit {
                self.depth_exceeded(slot);
                return Walk::TooDeep;
            }
            open.insert(slot);
            work.push((slot, true));
            self.ensure_resolved(slot);
            let deps = self.graph.dependencies(slot);
            work.extend(deps.iter().rev().map(|&dep| (dep, false)));
        }
        Walk::Done
    }

    /// Derived or unwritten overridable, and not Fresh.
    fn needs_evaluation(&self, slot: SlotId) -> bool {
        let Some(entry) = self.slots.get(slot) else {
            return false;
        };
        if entry.freshness == Freshness::Fresh {
            return false;
        }
        match entry.mode() {
            SlotMode::Derived => true,
            SlotMode::Overridable => !entry.written,
            SlotMode::Essential | SlotMode::Shadowed => false,
        }
    }

    /// Record an evaluation depth overflow at `slot`.
    ///
    /// The slot gets its graph edges so later writes reach it. Every slot
    /// being evaluated around it is stored non-Fresh.
    fn depth_exceeded(&mut self, slot: SlotId) {
        self.ensure_resolved(slot);
        self.truncated += 1;
        let path = self.slot_path(slot);
        self.diagnostics.error(&path, EngineError::CyclicDependency { slot: path.clone() });
    }

    /// Compute `slot` from its dependencies and memoize the result.
    fn evaluate(&mut self, slot: SlotId) -> Value {
        let Some(entry) = self.slots.get(slot) else {
            return Value::Empty;
        };
        if entry.freshness == Freshness::Fresh {
            return entry.value.clone();
        }
        let mode = entry.mode();

        if self.on_stack.contains(&slot) {
            self.cycle_hits.insert(slot);
            return entry.fallback();
        }
        if self.evaluating.len() >= self.config.max_evaluation_depth {
            let fallback = entry.fallback();
            self.depth_exceeded(slot);
            return fallback;
        }

        let truncated = self.truncated;
        let value = match mode {
            SlotMode::Essential | SlotMode::Shadowed => entry.stored.clone().unwrap_or_default(),
            SlotMode::Overridable if entry.written => entry.stored.clone().unwrap_or_default(),
            SlotMode::Derived | SlotMode::Overridable => {
                self.on_stack.insert(slot);
                self.evaluating.push(slot);
                let mut deps = self.dependency_values(slot);
                if self.slots.get(slot).is_some_and(|s| s.resolved.is_none()) {
                    // The tree changed shape under its queries while they were read.
                    deps = self.dependency_values(slot);
                }
                self.evaluating.pop();
                self.on_stack.remove(&slot);

                let Some(entry) = self.slots.get(slot) else {
                    // Destroyed by a regeneration it triggered.
                    return Value::Empty;
                };
                if self.cycle_hits.remove(&slot) {
                    let fallback = entry.fallback();
                    let path = self.slot_path(slot);
                    self.diagnostics.error(&path, EngineError::CyclicDependency { slot: path.clone() });
                    fallback
                } else if mode == SlotMode::Overridable && !deps.all_resolved() {
                    entry.stored.clone().unwrap_or_default()
                } else {
                    match &entry.schema.definition {
                        Some(definition) => {
                            let definition = definition.clone();
                            if let Some(entry) = self.slots.get_mut(slot) {
                                entry.definition_calls += 1;
                            }
                            definition(&deps)
                        }
                        None => Value::Empty,
                    }
                }
            }
        };
        if self.truncated != truncated {
            // Computed from a fallback below the depth bound.
            return value;
        }
        self.store_computed(slot, value)
    }

    fn store_computed(&mut self, slot: SlotId, value: Value) -> Value {
        let revision = self.revision;
        let Some(entry) = self.slots.get_mut(slot) else {
            return value;
        };
        let changed = entry.freshness == Freshness::Unresolved || entry.value != value;
        let old = std::mem::replace(&mut entry.value, value.clone());
        if changed {
            entry.changed_since = entry.computed_at;
            entry.changed_at = revision;
        }
        entry.computed_at = revision;
        entry.freshness = Freshness::Fresh;
        if changed {
            self.diagnostics.record_change(revision, slot, old, value.clone());
        }
        value
    }

    /// Freshen and collect the values of every dependency of `slot`,
    /// resolving its queries first if needed.
    pub(crate) fn dependency_values(&mut self, slot: SlotId) -> DependencyValues {
        self.ensure_resolved(slot);
        let resolved = match self.slots.get(slot).and_then(|s| s.resolved.clone()) {
            Some(resolved) => resolved,
            None => return DependencyValues::default(),
        };
        let entries = resolved
            .iter()
            .map(|dep| DependencyValue {
                values: dep.slots.iter().map(|&s| self.get_value(s)).collect(),
                resolved: dep.resolved,
            })
            .collect();
        DependencyValues::new(entries)
    }

    /// Resolve the dependency queries of `slot` against the current tree
    /// if they are not resolved yet, and record the graph edges.
    pub(crate) fn ensure_resolved(&mut self, slot: SlotId) {
        let Some(entry) = self.slots.get(slot) else {
            return;
        };
        if entry.resolved.is_some() {
            return;
        }
        let node = entry.node;
        let queries = entry.schema.dependencies.clone();
        let owner = self.slot_path(slot);
        let (resolved, watches) = self.resolve_all(node, &queries, &owner);
        if !self.slots.contains(slot) {
            return;
        }
        let flat: Vec<SlotId> = resolved.iter().flat_map(|r| r.slots.iter().copied()).collect();
        self.graph.set_dependencies(slot, flat);
        self.graph.set_watches(slot, watches);
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.resolved = Some(resolved);
        }
    }

    /// Mark `slot` and, transitively, every Fresh subscriber Stale.
    ///
    /// Propagation stops at subscribers that are already Stale: their own
    /// subscribers were marked when they became Stale.
    pub(crate) fn mark_stale(&mut self, slot: SlotId) {
        let mut work = vec![slot];
        let mut structural = Vec::new();
        let mut first = true;
        while let Some(id) = work.pop() {
            let Some(entry) = self.slots.get_mut(id) else {
                continue;
            };
            if !first && entry.freshness != Freshness::Fresh {
                continue;
            }
            first = false;
            if entry.freshness == Freshness::Fresh {
                entry.freshness = Freshness::Stale;
            }
            if &*entry.name == GENERATION_SLOT {
                structural.push(entry.node);
            }
            work.extend(self.graph.subscribers(id));
        }
        for node in structural {
            self.invalidate_structural(node);
        }
    }

    /// Re-resolve, before their next evaluation, every query that read the
    /// child list of `node`.
    pub fn invalidate_structural(&mut self, node: NodeId) {
        for watcher in self.graph.structural_watchers(node) {
            self.invalidate_resolution(watcher);
        }
    }

    /// Re-resolve every query that looked up the explicit name `name`.
    pub(crate) fn invalidate_name(&mut self, name: &str) {
        for watcher in self.graph.name_watchers(name) {
            self.invalidate_resolution(watcher);
        }
    }

    /// Forget the resolved dependencies of `slot` and mark it Stale.
    pub(crate) fn invalidate_resolution(&mut self, slot: SlotId) {
        let Some(entry) = self.slots.get_mut(slot) else {
            return;
        };
        entry.resolved = None;
        self.mark_stale(slot);
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::query::DependencyQuery;
    use crate::schema::{NodeSchema, SchemaRegistry, SlotSchema};
    use crate::tree::NodeSpec;
    use crate::value::{ops, Value};
    use crate::Freshness;

    fn chain() -> Engine {
        let schemas = SchemaRegistry::new().with(
            NodeSchema::new("chain")
                .slot(SlotSchema::essential("a", 1i64))
                .slot(SlotSchema::derived("b", vec![DependencyQuery::own("a")], |d| {
                    ops::add(d.get(0), &Value::int(1))
                }))
                .slot(SlotSchema::derived("c", vec![DependencyQuery::own("b")], |d| {
                    ops::add(d.get(0), &Value::int(1))
                }))
                .slot(SlotSchema::derived("other", vec![], |_| Value::int(0))),
        );
        Engine::new(schemas, NodeSpec::new("chain"))
    }

    #[test]
    fn fresh_reads_do_not_recompute() {
        let mut engine = chain();
        let c = engine.slot_at("/:c").unwrap();
        assert_eq!(engine.get_value(c), Value::int(3));
        assert_eq!(engine.get_value(c), Value::int(3));
        assert_eq!(engine.definition_calls(c), 1);
    }

    #[test]
    fn mark_stale_follows_subscribers_only() {
        let mut engine = chain();
        let c = engine.slot_at("/:c").unwrap();
        let other = engine.slot_at("/:other").unwrap();
        engine.get_value(c);
        engine.get_value(other);
        let a = engine.slot_at("/:a").unwrap();
        engine.mark_stale(a);
        assert_eq!(engine.freshness(c), Some(Freshness::Stale));
        assert_eq!(engine.freshness(other), Some(Freshness::Fresh));
    }
}
