//! Tree store.
//!
//! Nodes live in an arena indexed by `NodeId`. Identifiers are never
//! reused, so a stale `NodeId` held by a host simply stops resolving once
//! its node is removed. Parent links are plain ids (non-owning).

use crate::action::TriggerSpec;
use crate::arena::SlotId;
use crate::value::Value;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Stable identifier of a node within one evaluation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Authoring-time description of a subtree.
///
/// The initial document and every dynamic-expansion template are given as
/// `NodeSpec`s; the engine instantiates them into the tree store.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    pub type_tag: Arc<str>,
    pub name: Option<Arc<str>>,
    pub attributes: BTreeMap<Arc<str>, Value>,
    pub children: Vec<NodeSpec>,
    pub triggers: Vec<TriggerSpec>,
}

impl NodeSpec {
    pub fn new(type_tag: impl Into<Arc<str>>) -> Self {
        Self {
            type_tag: type_tag.into(),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn attr(mut self, key: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = NodeSpec>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn trigger(mut self, trigger: TriggerSpec) -> Self {
        self.triggers.push(trigger);
        self
    }
}

/// A node in the tree store.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub type_tag: Arc<str>,
    /// Path segment of this node under its parent.
    pub name: Arc<str>,
    /// Whether `name` was given by the author (and is therefore addressable
    /// with a `$name` macro).
    pub explicit_name: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub attributes: BTreeMap<Arc<str>, Value>,
    /// Slots created so far, in creation order.
    pub slots: IndexMap<Arc<str>, SlotId>,
    /// Generation index if this node was produced by a dynamic expansion.
    pub source_index: Option<u64>,
}

/// Arena of nodes plus the explicit-name index.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Option<Node>>,
    root: NodeId,
    names: FxHashMap<Arc<str>, SmallVec<[NodeId; 1]>>,
    live: usize,
}

impl Tree {
    /// Create a tree holding only its root node.
    pub fn new(type_tag: Arc<str>, name: Option<Arc<str>>, attributes: BTreeMap<Arc<str>, Value>) -> Self {
        let root = NodeId(0);
        let mut tree = Self {
            nodes: Vec::new(),
            root,
            names: FxHashMap::default(),
            live: 0,
        };
        let explicit_name = name.is_some();
        let name = name.unwrap_or_else(|| Arc::from(""));
        tree.push(Node {
            id: root,
            type_tag,
            name,
            explicit_name,
            parent: None,
            children: Vec::new(),
            attributes,
            slots: IndexMap::new(),
            source_index: None,
        });
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())?.as_mut()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn type_tag(&self, id: NodeId) -> Option<&Arc<str>> {
        self.get(id).map(|n| &n.type_tag)
    }

    pub fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&child| self.get(child).is_some_and(|n| &*n.name == name))
    }

    /// Nodes carrying the explicit name `name`.
    pub fn named(&self, name: &str) -> &[NodeId] {
        self.names.get(name).map(|ids| ids.as_slice()).unwrap_or(&[])
    }

    /// Insert a node as the last child of `parent`.
    pub(crate) fn insert(
        &mut self,
        parent: NodeId,
        type_tag: Arc<str>,
        name: Option<Arc<str>>,
        attributes: BTreeMap<Arc<str>, Value>,
        source_index: Option<u64>,
    ) -> NodeId {
        let explicit_name = name.is_some();
        let name = match (name, source_index) {
            (Some(name), _) => name,
            (None, Some(index)) => Arc::from(format!("#{index}")),
            (None, None) => self.auto_name(parent, &type_tag),
        };
        let id = NodeId(self.nodes.len() as u32);
        if explicit_name {
            self.names.entry(name.clone()).or_default().push(id);
        }
        self.push(Node {
            id,
            type_tag,
            name,
            explicit_name,
            parent: Some(parent),
            children: Vec::new(),
            attributes,
            slots: IndexMap::new(),
            source_index,
        });
        if let Some(parent) = self.get_mut(parent) {
            parent.children.push(id);
        }
        id
    }

    fn push(&mut self, node: Node) {
        self.nodes.push(Some(node));
        self.live += 1;
    }

    /// `_<type><n>` with `n` the 1-based ordinal among unnamed siblings of
    /// the same type.
    fn auto_name(&self, parent: NodeId, type_tag: &str) -> Arc<str> {
        let mut ordinal = 1 + self
            .children(parent)
            .iter()
            .filter_map(|&c| self.get(c))
            .filter(|n| !n.explicit_name && n.source_index.is_none() && &*n.type_tag == type_tag)
            .count();
        loop {
            let candidate = format!("_{type_tag}{ordinal}");
            if self.child_named(parent, &candidate).is_none() {
                return Arc::from(candidate);
            }
            ordinal += 1;
        }
    }

    /// Remove `id` and its whole subtree. Returns the removed nodes in
    /// post-order (children before parents). The root cannot be removed.
    pub(crate) fn remove_subtree(&mut self, id: NodeId) -> Vec<Node> {
        if id == self.root || !self.contains(id) {
            return Vec::new();
        }
        if let Some(parent) = self.parent(id) {
            if let Some(parent) = self.get_mut(parent) {
                parent.children.retain(|&c| c != id);
            }
        }
        let mut order = Vec::new();
        self.collect_post_order(id, &mut order);
        let mut removed = Vec::with_capacity(order.len());
        for node_id in order {
            if let Some(node) = self.nodes.get_mut(node_id.index()).and_then(Option::take) {
                self.live -= 1;
                if node.explicit_name {
                    if let Some(ids) = self.names.get_mut(&node.name) {
                        ids.retain(|n| *n != node_id);
                        if ids.is_empty() {
                            self.names.remove(&node.name);
                        }
                    }
                }
                removed.push(node);
            }
        }
        removed
    }

    fn collect_post_order(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for &child in self.children(id) {
            self.collect_post_order(child, out);
        }
        out.push(id);
    }

    /// Replace the child order of `parent`. `order` must be a permutation
    /// of the current children.
    pub(crate) fn reorder_children(&mut self, parent: NodeId, order: Vec<NodeId>) {
        if let Some(node) = self.get_mut(parent) {
            debug_assert_eq!(node.children.len(), order.len());
            node.children = order;
        }
    }

    /// Descendants of `id` in document (pre-)order, excluding `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Every live node in document order, root first.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = vec![self.root];
        out.extend(self.descendants(self.root));
        out
    }

    /// Document position of every live node.
    pub fn document_positions(&self) -> FxHashMap<NodeId, usize> {
        self.preorder()
            .into_iter()
            .enumerate()
            .map(|(pos, id)| (id, pos))
            .collect()
    }

    /// Whether `ancestor` is `node` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Absolute path of a node: `/` for the root, `/a/b` below it.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == self.root {
                break;
            }
            match self.get(node_id) {
                Some(node) => {
                    segments.push(node.name.clone());
                    current = node.parent;
                }
                None => return format!("<removed {id}>"),
            }
        }
        if segments.is_empty() {
            return "/".to_string();
        }
        segments.iter().rev().fold(String::new(), |mut acc, s| {
            acc.push('/');
            acc.push_str(s);
            acc
        })
    }

    /// Structural lookup of an absolute path by child names only.
    ///
    /// Unlike `Engine::resolve_path` this never realizes dynamic expansions,
    /// which is what snapshot restore needs.
    pub fn find_absolute(&self, path: &str) -> Option<NodeId> {
        let rest = path.strip_prefix('/')?;
        let mut current = self.root;
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            current = self.child_named(current, segment)?;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Tree {
        Tree::new(Arc::from("document"), None, BTreeMap::new())
    }

    #[test]
    fn unnamed_siblings_get_ordinal_names() {
        let mut t = tree();
        let root = t.root();
        let a = t.insert(root, Arc::from("point"), None, BTreeMap::new(), None);
        let b = t.insert(root, Arc::from("point"), None, BTreeMap::new(), None);
        let c = t.insert(root, Arc::from("line"), None, BTreeMap::new(), None);
        assert_eq!(t.path_of(a), "/_point1");
        assert_eq!(t.path_of(b), "/_point2");
        assert_eq!(t.path_of(c), "/_line1");
        assert_eq!(t.find_absolute("/_point2"), Some(b));
    }

    #[test]
    fn generated_children_are_named_by_source_index() {
        let mut t = tree();
        let root = t.root();
        let list = t.insert(root, Arc::from("repeat"), Some(Arc::from("list")), BTreeMap::new(), None);
        let item = t.insert(list, Arc::from("item"), None, BTreeMap::new(), Some(3));
        assert_eq!(t.path_of(item), "/list/#3");
        assert_eq!(t.named("list"), &[list]);
    }

    #[test]
    fn remove_subtree_is_post_order_and_unindexes_names() {
        let mut t = tree();
        let root = t.root();
        let group = t.insert(root, Arc::from("group"), Some(Arc::from("g")), BTreeMap::new(), None);
        let inner = t.insert(group, Arc::from("point"), Some(Arc::from("p")), BTreeMap::new(), None);
        let removed = t.remove_subtree(group);
        let ids: Vec<NodeId> = removed.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![inner, group]);
        assert!(t.named("p").is_empty());
        assert!(t.children(root).is_empty());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn root_cannot_be_removed() {
        let mut t = tree();
        assert!(t.remove_subtree(t.root()).is_empty());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn preorder_follows_child_order() {
        let mut t = tree();
        let root = t.root();
        let a = t.insert(root, Arc::from("x"), Some(Arc::from("a")), BTreeMap::new(), None);
        let a1 = t.insert(a, Arc::from("x"), Some(Arc::from("a1")), BTreeMap::new(), None);
        let b = t.insert(root, Arc::from("x"), Some(Arc::from("b")), BTreeMap::new(), None);
        assert_eq!(t.preorder(), vec![root, a, a1, b]);
        assert!(t.is_ancestor_or_self(root, a1));
        assert!(!t.is_ancestor_or_self(b, a1));
    }
}
