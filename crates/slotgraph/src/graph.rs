//! Dependency graph.
//!
//! Forward edges (slot -> the slots its definition reads) and the reverse
//! subscriber index are kept side by side and only ever updated together,
//! so the subscriber set of a slot is always the exact inverse of the
//! dependency sets. Structural watches record which nodes' child lists and
//! which explicit names a slot's query resolution looked at.

use crate::arena::SlotId;
use crate::tree::NodeId;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::sync::Arc;

/// Tree shape a query resolution depended on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Watches {
    /// Nodes whose child list was read.
    pub nodes: SmallVec<[NodeId; 4]>,
    /// Explicit names looked up with `$name`.
    pub names: SmallVec<[Arc<str>; 2]>,
}

impl Watches {
    pub fn node(&mut self, id: NodeId) {
        if !self.nodes.contains(&id) {
            self.nodes.push(id);
        }
    }

    pub fn name(&mut self, name: &Arc<str>) {
        if !self.names.contains(name) {
            self.names.push(name.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.names.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    dependencies: FxHashMap<SlotId, SmallVec<[SlotId; 4]>>,
    subscribers: FxHashMap<SlotId, FxHashSet<SlotId>>,
    watches: FxHashMap<SlotId, Watches>,
    node_watchers: FxHashMap<NodeId, FxHashSet<SlotId>>,
    name_watchers: FxHashMap<Arc<str>, FxHashSet<SlotId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the dependency set of `slot`, updating subscriber edges.
    pub fn set_dependencies(&mut self, slot: SlotId, dependencies: impl IntoIterator<Item = SlotId>) {
        self.clear_dependencies(slot);
        let mut deps: SmallVec<[SlotId; 4]> = SmallVec::new();
        for dep in dependencies {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        for &dep in &deps {
            self.subscribers.entry(dep).or_default().insert(slot);
        }
        if !deps.is_empty() {
            self.dependencies.insert(slot, deps);
        }
    }

    fn clear_dependencies(&mut self, slot: SlotId) {
        if let Some(old) = self.dependencies.remove(&slot) {
            for dep in old {
                if let Some(subs) = self.subscribers.get_mut(&dep) {
                    subs.remove(&slot);
                    if subs.is_empty() {
                        self.subscribers.remove(&dep);
                    }
                }
            }
        }
    }

    pub fn dependencies(&self, slot: SlotId) -> &[SlotId] {
        self.dependencies.get(&slot).map(|d| d.as_slice()).unwrap_or(&[])
    }

    /// Slots whose dependency set contains `slot`, in id order.
    pub fn subscribers(&self, slot: SlotId) -> Vec<SlotId> {
        let mut subs: Vec<SlotId> = self
            .subscribers
            .get(&slot)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        subs.sort_unstable();
        subs
    }

    /// Replace the structural watches of `slot`.
    pub fn set_watches(&mut self, slot: SlotId, watches: Watches) {
        self.clear_watches(slot);
        if watches.is_empty() {
            return;
        }
        for &node in &watches.nodes {
            self.node_watchers.entry(node).or_default().insert(slot);
        }
        for name in &watches.names {
            self.name_watchers.entry(name.clone()).or_default().insert(slot);
        }
        self.watches.insert(slot, watches);
    }

    fn clear_watches(&mut self, slot: SlotId) {
        let Some(old) = self.watches.remove(&slot) else {
            return;
        };
        for node in old.nodes {
            if let Some(set) = self.node_watchers.get_mut(&node) {
                set.remove(&slot);
                if set.is_empty() {
                    self.node_watchers.remove(&node);
                }
            }
        }
        for name in old.names {
            if let Some(set) = self.name_watchers.get_mut(&name) {
                set.remove(&slot);
                if set.is_empty() {
                    self.name_watchers.remove(&name);
                }
            }
        }
    }

    /// Slots whose query resolution read the child list of `node`.
    pub fn structural_watchers(&self, node: NodeId) -> Vec<SlotId> {
        sorted(self.node_watchers.get(&node))
    }

    /// Slots whose query resolution looked up `$name`.
    pub fn name_watchers(&self, name: &str) -> Vec<SlotId> {
        sorted(self.name_watchers.get(name))
    }

    /// Drop every edge and watch of `slot`. Returns its former subscribers,
    /// whose resolved dependency sets now point at a destroyed slot.
    pub fn remove_slot(&mut self, slot: SlotId) -> Vec<SlotId> {
        self.clear_dependencies(slot);
        self.clear_watches(slot);
        let former = self.subscribers(slot);
        self.subscribers.remove(&slot);
        for &sub in &former {
            if let Some(deps) = self.dependencies.get_mut(&sub) {
                deps.retain(|d| *d != slot);
                if deps.is_empty() {
                    self.dependencies.remove(&sub);
                }
            }
        }
        former
    }

    /// Forget watches on a destroyed node. Returns the slots that watched it.
    pub fn forget_node(&mut self, node: NodeId) -> Vec<SlotId> {
        let watchers = self.structural_watchers(node);
        self.node_watchers.remove(&node);
        for &slot in &watchers {
            if let Some(w) = self.watches.get_mut(&slot) {
                w.nodes.retain(|n| *n != node);
            }
        }
        watchers
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(|d| d.len()).sum()
    }

    /// Verify that the subscriber index is the exact inverse of the
    /// dependency sets and that every edge endpoint is live.
    pub fn check_consistency(&self, is_live: impl Fn(SlotId) -> bool) -> Vec<String> {
        let mut problems = Vec::new();
        for (&slot, deps) in &self.dependencies {
            if !is_live(slot) {
                problems.push(format!("destroyed slot {slot} still has dependencies"));
            }
            for &dep in deps {
                if !is_live(dep) {
                    problems.push(format!("{slot} depends on destroyed slot {dep}"));
                }
                if !self.subscribers.get(&dep).is_some_and(|s| s.contains(&slot)) {
                    problems.push(format!("{slot} depends on {dep} but is not its subscriber"));
                }
            }
        }
        for (&dep, subs) in &self.subscribers {
            for &sub in subs {
                if !self.dependencies.get(&sub).is_some_and(|d| d.contains(&dep)) {
                    problems.push(format!("{sub} subscribes to {dep} without depending on it"));
                }
            }
        }
        for &slot in self.watches.keys() {
            if !is_live(slot) {
                problems.push(format!("destroyed slot {slot} still watches the tree"));
            }
        }
        problems.sort();
        problems
    }
}

fn sorted(set: Option<&FxHashSet<SlotId>>) -> Vec<SlotId> {
    let mut out: Vec<SlotId> = set.map(|s| s.iter().copied().collect()).unwrap_or_default();
    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_mirror_dependencies() {
        let mut g = DependencyGraph::new();
        g.set_dependencies(SlotId(2), [SlotId(0), SlotId(1), SlotId(0)]);
        g.set_dependencies(SlotId(3), [SlotId(2)]);
        assert_eq!(g.dependencies(SlotId(2)), &[SlotId(0), SlotId(1)]);
        assert_eq!(g.subscribers(SlotId(0)), vec![SlotId(2)]);
        assert_eq!(g.edge_count(), 3);

        g.set_dependencies(SlotId(2), [SlotId(1)]);
        assert!(g.subscribers(SlotId(0)).is_empty());
        assert!(g.check_consistency(|_| true).is_empty());
    }

    #[test]
    fn remove_slot_returns_former_subscribers() {
        let mut g = DependencyGraph::new();
        g.set_dependencies(SlotId(1), [SlotId(0)]);
        g.set_dependencies(SlotId(2), [SlotId(0), SlotId(1)]);
        let former = g.remove_slot(SlotId(0));
        assert_eq!(former, vec![SlotId(1), SlotId(2)]);
        assert_eq!(g.dependencies(SlotId(2)), &[SlotId(1)]);
        assert!(g.check_consistency(|s| s != SlotId(0)).is_empty());
    }

    #[test]
    fn watches_are_replaced() {
        let mut g = DependencyGraph::new();
        let mut w = Watches::default();
        w.node(NodeId(4));
        w.name(&Arc::from("list"));
        g.set_watches(SlotId(7), w);
        assert_eq!(g.structural_watchers(NodeId(4)), vec![SlotId(7)]);
        assert_eq!(g.name_watchers("list"), vec![SlotId(7)]);

        g.set_watches(SlotId(7), Watches::default());
        assert!(g.structural_watchers(NodeId(4)).is_empty());
        assert!(g.name_watchers("list").is_empty());
    }

    #[test]
    fn consistency_reports_dead_endpoints() {
        let mut g = DependencyGraph::new();
        g.set_dependencies(SlotId(1), [SlotId(0)]);
        let problems = g.check_consistency(|s| s != SlotId(0));
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("destroyed"));
    }
}
