//! Dynamic expansion.
//!
//! An expansion node's generated children come from a template applied to
//! every index its generator yields. The generator runs as the definition
//! of a hidden slot, `@generation`, so it takes part in memoization and
//! invalidation like any other slot. When that slot goes stale, queries
//! that read the node's child list are sent back for re-resolution, and the
//! next read reconciles the children: indices present in both generations
//! keep their node (and every override inside it), new indices get fresh
//! subtrees, and vanished indices are destroyed.

use crate::arena::Freshness;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::ledger::DeltaKind;
use crate::schema::GeneratedItem;
use crate::tree::NodeId;
use crate::value::Value;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;

/// Name of the hidden slot holding an expansion's generation index list.
pub const GENERATION_SLOT: &str = "@generation";

/// Identity mapping of one expansion node.
#[derive(Debug, Clone, Default)]
pub(crate) struct Expansion {
    /// Generation index -> child, in generation order.
    pub children: IndexMap<u64, NodeId>,
    /// Whether the children have been built at least once.
    pub realized: bool,
}

/// What a reconciliation did, by generation index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionDiff {
    pub kept: Vec<u64>,
    pub created: Vec<u64>,
    pub removed: Vec<u64>,
}

impl ExpansionDiff {
    pub fn is_unchanged(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

/// Non-negative integers of a generation value, first occurrence wins.
fn generation_indices(value: &Value) -> Vec<u64> {
    let mut seen = FxHashSet::default();
    value
        .as_list()
        .unwrap_or(&[])
        .iter()
        .filter_map(|v| v.as_int())
        .filter(|&i| i >= 0)
        .map(|i| i as u64)
        .filter(|i| seen.insert(*i))
        .collect()
}

impl Engine {
    /// Bring the children of an expansion node in line with its current
    /// generation. No-op for other nodes, for an up-to-date expansion, and
    /// for an expansion already being reconciled further up the stack.
    pub(crate) fn ensure_expanded(&mut self, node: NodeId) -> Option<ExpansionDiff> {
        let realized = self.expansions.get(&node)?.realized;
        if self.expanding.contains(&node) {
            return None;
        }
        let generation = self.slot_id(node, GENERATION_SLOT).ok()?;
        if realized && self.slots.freshness(generation) == Some(Freshness::Fresh) {
            return None;
        }
        Some(self.regenerate_with(node, generation))
    }

    fn regenerate_with(&mut self, node: NodeId, generation: crate::arena::SlotId) -> ExpansionDiff {
        self.expanding.insert(node);
        let value = self.get_value(generation);
        let indices = generation_indices(&value);
        let diff = self.reconcile(node, &indices);
        self.expanding.remove(&node);
        diff
    }

    /// Re-run the generator of `node` and reconcile its children, even if
    /// its generation is up to date.
    pub fn regenerate(&mut self, node: NodeId) -> Result<ExpansionDiff> {
        if !self.expansions.contains_key(&node) {
            return Err(EngineError::UnknownNode(format!(
                "{} is not a dynamic expansion",
                self.tree.path_of(node)
            )));
        }
        let generation = self.slot_id(node, GENERATION_SLOT)?;
        Ok(self.regenerate_with(node, generation))
    }

    /// Current `(generation index, child)` mapping of an expansion node.
    pub fn expansion_children(&mut self, node: NodeId) -> Vec<(u64, NodeId)> {
        self.ensure_expanded(node);
        self.expansions
            .get(&node)
            .map(|e| e.children.iter().map(|(&i, &c)| (i, c)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn expansion_child(&self, node: NodeId, index: u64) -> Option<NodeId> {
        self.expansions.get(&node)?.children.get(&index).copied()
    }

    /// Diff `indices` against the previous generation and rebuild the
    /// children of `node` accordingly.
    pub(crate) fn reconcile(&mut self, node: NodeId, indices: &[u64]) -> ExpansionDiff {
        let mut diff = ExpansionDiff::default();
        let Some(template) = self
            .schema_of(node)
            .and_then(|s| s.expansion.as_ref().map(|e| e.template.clone()))
        else {
            return diff;
        };
        let previous = self
            .expansions
            .get(&node)
            .map(|e| e.children.clone())
            .unwrap_or_default();
        let wanted: FxHashSet<u64> = indices.iter().copied().collect();

        let mut structural = false;
        for (&index, &child) in &previous {
            if !wanted.contains(&index) {
                diff.removed.push(index);
                structural = true;
                self.destroy_subtree(child);
            }
        }

        let mut children = IndexMap::with_capacity(indices.len());
        for (position, &index) in indices.iter().enumerate() {
            let existing = previous.get(&index).copied().filter(|&c| self.tree.contains(c));
            let child = match existing {
                Some(child) => {
                    diff.kept.push(index);
                    child
                }
                None => {
                    let spec = template(&GeneratedItem { index, position });
                    diff.created.push(index);
                    structural = true;
                    self.instantiate(node, &spec, Some(index))
                }
            };
            children.insert(index, child);
        }

        let mut order: Vec<NodeId> = self
            .tree
            .children(node)
            .iter()
            .copied()
            .filter(|&c| self.tree.get(c).is_some_and(|n| n.source_index.is_none()))
            .collect();
        order.extend(children.values().copied());
        if order != self.tree.children(node) {
            structural = true;
            self.tree.reorder_children(node, order);
        }

        if let Some(expansion) = self.expansions.get_mut(&node) {
            expansion.children = children;
            expansion.realized = true;
        }

        if structural {
            self.revision += 1;
            self.invalidate_structural(node);
            self.ledger.record(
                self.revision,
                DeltaKind::ExpansionReconciled {
                    node,
                    kept: diff.kept.len(),
                    created: diff.created.len(),
                    removed: diff.removed.len(),
                },
            );
        }
        log::debug!(
            "reconciled {}: kept {}, created {}, removed {}",
            self.tree.path_of(node),
            diff.kept.len(),
            diff.created.len(),
            diff.removed.len()
        );
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_indices_skip_duplicates_and_negatives() {
        let value = Value::list([Value::int(2), Value::int(-1), Value::int(0), Value::int(2), Value::text("x")]);
        assert_eq!(generation_indices(&value), vec![2, 0]);
        assert!(generation_indices(&Value::Empty).is_empty());
    }
}
