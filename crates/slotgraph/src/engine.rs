//! Evaluation context.
//!
//! One `Engine` owns a tree, its slots, the dependency graph, expansion
//! state and the action dispatcher. There is no process-wide state:
//! independent documents use independent engines.
//!
//! The engine is single-threaded. Every operation runs to completion
//! before returning; hosts serialize requests (see `enqueue`).

use crate::action::Dispatcher;
use crate::arena::{Freshness, Slot, SlotArena, SlotId};
use crate::config::EngineConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{EngineError, Result};
use crate::expansion::Expansion;
use crate::graph::DependencyGraph;
use crate::ledger::{DeltaKind, Ledger};
use crate::query::split_slot_path;
use crate::schema::{NodeSchema, SchemaRegistry, SlotMode};
use crate::tree::{NodeId, NodeSpec, Tree};
use crate::value::Value;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) schemas: SchemaRegistry,
    pub(crate) tree: Tree,
    pub(crate) slots: SlotArena,
    pub(crate) graph: DependencyGraph,
    pub(crate) expansions: FxHashMap<NodeId, Expansion>,
    /// Expansions currently being reconciled
    pub(crate) expanding: FxHashSet<NodeId>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) ledger: Ledger,
    /// Slots currently being freshened, innermost last
    pub(crate) evaluating: Vec<SlotId>,
    pub(crate) on_stack: FxHashSet<SlotId>,
    /// Slots re-entered while on the stack during the current freshen
    pub(crate) cycle_hits: FxHashSet<SlotId>,
    /// Count of evaluation depth overflows; results computed across one
    /// are not memoized
    pub(crate) truncated: u64,
    /// Bumped by every essential write and structural change
    pub(crate) revision: u64,
}

impl Engine {
    /// Build a context from a schema registry and the initial document.
    pub fn new(schemas: SchemaRegistry, root: NodeSpec) -> Self {
        Self::with_config(schemas, root, EngineConfig::default())
    }

    pub fn with_config(schemas: SchemaRegistry, root: NodeSpec, config: EngineConfig) -> Self {
        let mut engine = Self::bare(schemas, &root, config);
        for child in &root.children {
            engine.instantiate(engine.tree.root(), child, None);
        }
        engine.prime_conditions();
        log::debug!(
            "engine ready: {} nodes, {} schemas",
            engine.tree.len(),
            engine.schemas.len()
        );
        engine
    }

    /// Context holding only the root node, with its triggers registered.
    pub(crate) fn bare(schemas: SchemaRegistry, root: &NodeSpec, config: EngineConfig) -> Self {
        let tree = Tree::new(root.type_tag.clone(), root.name.clone(), root.attributes.clone());
        let mut engine = Self {
            diagnostics: Diagnostics::new(config.track_changes),
            ledger: Ledger::new(config.record_ledger),
            config,
            schemas,
            tree,
            slots: SlotArena::new(),
            graph: DependencyGraph::new(),
            expansions: FxHashMap::default(),
            expanding: FxHashSet::default(),
            dispatcher: Dispatcher::default(),
            evaluating: Vec::new(),
            on_stack: FxHashSet::default(),
            cycle_hits: FxHashSet::default(),
            truncated: 0,
            revision: 1,
        };
        let root_id = engine.tree.root();
        engine.register_node(root_id, root);
        engine
    }

    /// Create the subtree described by `spec` as the last child of `parent`.
    pub(crate) fn instantiate(&mut self, parent: NodeId, spec: &NodeSpec, source_index: Option<u64>) -> NodeId {
        let id = self.tree.insert(
            parent,
            spec.type_tag.clone(),
            spec.name.clone(),
            spec.attributes.clone(),
            source_index,
        );
        self.register_node(id, spec);
        if let Some(name) = &spec.name {
            self.invalidate_name(name);
        }
        for child in &spec.children {
            self.instantiate(id, child, None);
        }
        id
    }

    fn register_node(&mut self, id: NodeId, spec: &NodeSpec) {
        if self.schema_of(id).is_some_and(|s| s.expansion.is_some()) {
            self.expansions.insert(id, Expansion::default());
        }
        for trigger in &spec.triggers {
            self.dispatcher.register(id, trigger.clone());
        }
        if self.ledger.is_enabled() {
            let path = self.tree.path_of(id);
            self.ledger.record(self.revision, DeltaKind::NodeCreated { node: id, path });
        }
    }

    /// Insert a subtree under `parent` from the host side.
    pub fn insert_node(&mut self, parent: NodeId, spec: &NodeSpec) -> Result<NodeId> {
        if !self.tree.contains(parent) {
            return Err(EngineError::UnknownNode(parent.to_string()));
        }
        self.revision += 1;
        let id = self.instantiate(parent, spec, None);
        self.invalidate_structural(parent);
        Ok(id)
    }

    /// Remove a node and its subtree, cascading to every slot and edge.
    pub fn remove_node(&mut self, node: NodeId) -> Result<()> {
        if node == self.tree.root() {
            return Err(EngineError::InvalidPath {
                path: "/".to_string(),
                reason: "the root cannot be removed".to_string(),
            });
        }
        if !self.tree.contains(node) {
            return Err(EngineError::UnknownNode(node.to_string()));
        }
        self.revision += 1;
        self.destroy_subtree(node);
        Ok(())
    }

    pub(crate) fn destroy_subtree(&mut self, node: NodeId) {
        let parent = self.tree.parent(node);
        let paths: FxHashMap<NodeId, String> = if self.ledger.is_enabled() {
            std::iter::once(node)
                .chain(self.tree.descendants(node))
                .map(|id| (id, self.tree.path_of(id)))
                .collect()
        } else {
            FxHashMap::default()
        };

        let removed = self.tree.remove_subtree(node);
        let mut orphans = Vec::new();
        let mut names = Vec::new();
        for n in &removed {
            for &slot in n.slots.values() {
                orphans.extend(self.graph.remove_slot(slot));
                self.slots.remove(slot);
            }
            orphans.extend(self.graph.forget_node(n.id));
            self.expansions.remove(&n.id);
            self.dispatcher.forget_node(n.id);
            if n.explicit_name {
                names.push(n.name.clone());
            }
            if let Some(path) = paths.get(&n.id) {
                self.ledger.record(
                    self.revision,
                    DeltaKind::NodeRemoved {
                        node: n.id,
                        path: path.clone(),
                    },
                );
            }
        }
        log::debug!("removed {} nodes under {node}", removed.len());

        if let Some(parent) = parent {
            if let Some(expansion) = self.expansions.get_mut(&parent) {
                expansion.children.retain(|_, child| *child != node);
            }
        }
        orphans.sort_unstable();
        orphans.dedup();
        for slot in orphans {
            self.invalidate_resolution(slot);
        }
        if let Some(parent) = parent {
            self.invalidate_structural(parent);
        }
        for name in names {
            self.invalidate_name(&name);
        }
    }

    pub(crate) fn schema_of(&self, node: NodeId) -> Option<Arc<NodeSchema>> {
        let tag = self.tree.type_tag(node)?;
        self.schemas.get(tag).cloned()
    }

    /// Slot `name` of `node`, created on first reference.
    pub(crate) fn slot_id(&mut self, node: NodeId, name: &str) -> Result<SlotId> {
        let Some(n) = self.tree.get(node) else {
            return Err(EngineError::UnknownNode(node.to_string()));
        };
        if let Some(&id) = n.slots.get(name) {
            return Ok(id);
        }
        let unknown = || EngineError::UnknownSlot {
            node: self.tree.path_of(node),
            slot: name.to_string(),
        };
        let schema = self.schema_of(node).ok_or_else(unknown)?;
        let (key, slot_schema) = schema.slots.get_key_value(name).ok_or_else(unknown)?;
        let stored = slot_schema.essential.as_ref().map(|default| {
            slot_schema
                .default_attribute
                .as_ref()
                .and_then(|attr| n.attributes.get(attr))
                .unwrap_or(default)
                .clone()
        });
        if slot_schema.mode() == SlotMode::Shadowed {
            log::warn!(
                "{}:{name} is essential with a forward definition but no override flag; using the stored value",
                self.tree.path_of(node)
            );
        }
        let key = key.clone();
        let id = self.slots.alloc(Slot::new(node, key.clone(), slot_schema.clone(), stored));
        if let Some(n) = self.tree.get_mut(node) {
            n.slots.insert(key, id);
        }
        Ok(id)
    }

    /// Slot `name` of `node`.
    pub fn slot(&mut self, node: NodeId, name: &str) -> Result<SlotId> {
        self.slot_id(node, name)
    }

    /// Slot addressed by `<node path>:<slot>`.
    pub fn slot_at(&mut self, path: &str) -> Result<SlotId> {
        let (node_path, slot) = split_slot_path(path)?;
        let node = self.resolve_path(node_path)?;
        self.slot_id(node, slot)
    }

    /// Fresh value of the slot at `path`.
    pub fn value(&mut self, path: &str) -> Result<Value> {
        let slot = self.slot_at(path)?;
        Ok(self.get_value(slot))
    }

    /// `<node path>:<slot>` of a live slot.
    pub fn slot_path(&self, slot: SlotId) -> String {
        match self.slots.get(slot) {
            Some(s) => format!("{}:{}", self.tree.path_of(s.node), s.name),
            None => format!("<destroyed {slot}>"),
        }
    }

    /// Realize every dynamic expansion reachable from the root.
    pub fn realize_all(&mut self) {
        let mut stack = vec![self.tree.root()];
        while let Some(node) = stack.pop() {
            self.ensure_expanded(node);
            stack.extend(self.tree.children(node).iter().rev().copied());
        }
    }

    /// Values of every slot keyed by `(node, slot name)`.
    ///
    /// With `force`, every declared slot of every node is freshened first
    /// (realizing expansions). Without it, only already created slots are
    /// reported, with whatever value they currently memoize.
    pub fn get_all_slot_values(&mut self, force: bool) -> BTreeMap<(NodeId, Arc<str>), Value> {
        if force {
            self.freshen_all();
        }
        self.slots
            .iter()
            .filter(|(_, s)| !s.name.starts_with('@'))
            .map(|(_, s)| ((s.node, s.name.clone()), s.value.clone()))
            .collect()
    }

    /// Like `get_all_slot_values`, keyed by slot path.
    pub fn get_all_values_by_path(&mut self, force: bool) -> BTreeMap<String, Value> {
        if force {
            self.freshen_all();
        }
        self.slots
            .iter()
            .filter(|(_, s)| !s.name.starts_with('@'))
            .map(|(id, s)| (self.slot_path(id), s.value.clone()))
            .collect()
    }

    fn freshen_all(&mut self) {
        self.realize_all();
        for node in self.tree.preorder() {
            let Some(schema) = self.schema_of(node) else {
                continue;
            };
            for name in schema.public_slots() {
                if !self.tree.contains(node) {
                    break;
                }
                if let Ok(slot) = self.slot_id(node, name) {
                    self.get_value(slot);
                }
            }
        }
        // Reading a slot may regenerate an expansion and stale earlier reads.
        let stale: Vec<SlotId> = self
            .slots
            .iter()
            .filter(|(_, s)| s.freshness != Freshness::Fresh && !s.name.starts_with('@'))
            .map(|(id, _)| id)
            .collect();
        for slot in stale {
            self.get_value(slot);
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn slots(&self) -> &SlotArena {
        &self.slots
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn freshness(&self, slot: SlotId) -> Option<Freshness> {
        self.slots.freshness(slot)
    }

    /// Number of times the slot's definition has run.
    pub fn definition_calls(&self, slot: SlotId) -> u64 {
        self.slots.get(slot).map(|s| s.definition_calls).unwrap_or(0)
    }

    /// Problems with the graph's internal invariants; empty when sound.
    pub fn check_consistency(&self) -> Vec<String> {
        let mut problems = self.graph.check_consistency(|slot| self.slots.contains(slot));
        for (id, slot) in self.slots.iter() {
            if !self.tree.contains(slot.node) {
                problems.push(format!("{id} belongs to destroyed node {}", slot.node));
            }
            if let Some(resolved) = &slot.resolved {
                for dep in resolved.iter().flat_map(|r| r.slots.iter()) {
                    if !self.graph.dependencies(id).contains(dep) {
                        problems.push(format!("{id} resolved {dep} without a graph edge"));
                    }
                }
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::DependencyQuery;
    use crate::schema::SlotSchema;
    use crate::value::ops;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().with(
            NodeSchema::new("cell")
                .slot(SlotSchema::essential("input", 1i64).default_from("start"))
                .slot(SlotSchema::derived(
                    "double",
                    vec![DependencyQuery::own("input")],
                    |d| ops::mul(d.get(0), &Value::int(2)),
                )),
        )
    }

    #[test]
    fn slots_are_created_lazily() {
        let doc = NodeSpec::new("doc").child(NodeSpec::new("cell").named("c"));
        let mut engine = Engine::new(registry(), doc);
        assert!(engine.slots().is_empty());
        let double = engine.slot_at("/c:double").unwrap();
        assert_eq!(engine.freshness(double), Some(Freshness::Unresolved));
        assert_eq!(engine.get_value(double), Value::int(2));
        assert_eq!(engine.slots().len(), 2);
    }

    #[test]
    fn attributes_feed_essential_defaults() {
        let doc = NodeSpec::new("doc").child(NodeSpec::new("cell").named("c").attr("start", 5i64));
        let mut engine = Engine::new(registry(), doc);
        assert_eq!(engine.value("/c:double").unwrap(), Value::int(10));
    }

    #[test]
    fn unknown_slot_and_node_are_errors() {
        let doc = NodeSpec::new("doc").child(NodeSpec::new("cell").named("c"));
        let mut engine = Engine::new(registry(), doc);
        assert!(matches!(engine.slot_at("/c:nope"), Err(EngineError::UnknownSlot { .. })));
        assert!(matches!(engine.slot_at("/d:input"), Err(EngineError::UnknownNode(_))));
    }

    #[test]
    fn remove_node_cascades_to_slots_and_edges() {
        let doc = NodeSpec::new("doc").child(NodeSpec::new("cell").named("c"));
        let mut engine = Engine::new(registry(), doc);
        engine.value("/c:double").unwrap();
        let c = engine.resolve_path("/c").unwrap();
        engine.remove_node(c).unwrap();
        assert!(engine.slots().is_empty());
        assert_eq!(engine.graph().edge_count(), 0);
        assert!(engine.check_consistency().is_empty());
        assert!(engine.remove_node(engine.tree().root()).is_err());
    }
}
