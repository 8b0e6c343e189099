//! Dependency queries and path resolution.
//!
//! A query is resolved against the current tree into concrete slot ids.
//! Resolution realizes dynamic expansions it walks into and records the
//! tree shape it looked at (`Watches`), so structural changes can send the
//! query back for re-resolution.

use crate::arena::{ResolvedDependency, SlotId};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::graph::Watches;
use crate::tree::NodeId;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// A node, relative to the context node a query is resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    This,
    Parent,
    Root,
    /// Node path, see `parse_path`.
    Path(Arc<str>),
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::This => write!(f, "."),
            NodeRef::Parent => write!(f, ".."),
            NodeRef::Root => write!(f, "/"),
            NodeRef::Path(path) => write!(f, "{path}"),
        }
    }
}

/// Declarative description of the slots a definition reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyQuery {
    /// Slot `slot` of one node.
    Slot { node: NodeRef, slot: Arc<str> },
    /// Slot `slot` of every child of `node`, optionally filtered by type.
    Children {
        node: NodeRef,
        type_tag: Option<Arc<str>>,
        slot: Arc<str>,
    },
    /// Slot `slot` of every descendant of `node` in document order,
    /// optionally filtered by type.
    Descendants {
        node: NodeRef,
        type_tag: Option<Arc<str>>,
        slot: Arc<str>,
    },
    /// Slot `slot` of the child at `position` among the current children.
    Nth {
        node: NodeRef,
        position: usize,
        slot: Arc<str>,
    },
    /// Slot `slot` of the generated child with source index `index`.
    SourceIndex {
        node: NodeRef,
        index: u64,
        slot: Arc<str>,
    },
}

impl DependencyQuery {
    /// A slot of the context node itself.
    pub fn own(slot: impl Into<Arc<str>>) -> Self {
        DependencyQuery::Slot {
            node: NodeRef::This,
            slot: slot.into(),
        }
    }

    /// A slot of the node at `path`.
    pub fn slot(path: impl Into<Arc<str>>, slot: impl Into<Arc<str>>) -> Self {
        DependencyQuery::Slot {
            node: NodeRef::Path(path.into()),
            slot: slot.into(),
        }
    }

    pub fn parent(slot: impl Into<Arc<str>>) -> Self {
        DependencyQuery::Slot {
            node: NodeRef::Parent,
            slot: slot.into(),
        }
    }

    pub fn children(path: impl Into<Arc<str>>, type_tag: Option<&str>, slot: impl Into<Arc<str>>) -> Self {
        DependencyQuery::Children {
            node: NodeRef::Path(path.into()),
            type_tag: type_tag.map(Arc::from),
            slot: slot.into(),
        }
    }

    pub fn descendants(path: impl Into<Arc<str>>, type_tag: Option<&str>, slot: impl Into<Arc<str>>) -> Self {
        DependencyQuery::Descendants {
            node: NodeRef::Path(path.into()),
            type_tag: type_tag.map(Arc::from),
            slot: slot.into(),
        }
    }

    pub fn nth(path: impl Into<Arc<str>>, position: usize, slot: impl Into<Arc<str>>) -> Self {
        DependencyQuery::Nth {
            node: NodeRef::Path(path.into()),
            position,
            slot: slot.into(),
        }
    }

    pub fn source_index(path: impl Into<Arc<str>>, index: u64, slot: impl Into<Arc<str>>) -> Self {
        DependencyQuery::SourceIndex {
            node: NodeRef::Path(path.into()),
            index,
            slot: slot.into(),
        }
    }
}

impl fmt::Display for DependencyQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyQuery::Slot { node, slot } => write!(f, "{node}:{slot}"),
            DependencyQuery::Children { node, type_tag, slot } => {
                write!(f, "{node}/*{}:{slot}", TypeFilter(type_tag))
            }
            DependencyQuery::Descendants { node, type_tag, slot } => {
                write!(f, "{node}/**{}:{slot}", TypeFilter(type_tag))
            }
            DependencyQuery::Nth { node, position, slot } => write!(f, "{node}[{position}]:{slot}"),
            DependencyQuery::SourceIndex { node, index, slot } => write!(f, "{node}/#{index}:{slot}"),
        }
    }
}

struct TypeFilter<'a>(&'a Option<Arc<str>>);

impl fmt::Display for TypeFilter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(tag) => write!(f, "<{tag}>"),
            None => Ok(()),
        }
    }
}

/// One step of a parsed node path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    Root,
    Current,
    Parent,
    /// `$name`: explicitly named node anywhere in the document.
    Named(Arc<str>),
    Child(Arc<str>),
    /// `[k]`: k-th current child.
    Position(usize),
}

/// Parse a node path.
///
/// `/` is the root, `/a/b` walks child names from the root, `./x` and `..`
/// are relative to the context node, `$name` starts at an explicitly named
/// node, and `name[k]` selects the k-th (0-based) child of `name`.
pub(crate) fn parse_path(path: &str) -> Result<Vec<Step>> {
    let invalid = |reason: &str| EngineError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    let mut steps = Vec::new();
    let rest = match path.strip_prefix('/') {
        Some(rest) => {
            steps.push(Step::Root);
            rest
        }
        None => path,
    };
    for (i, segment) in rest.split('/').enumerate() {
        if segment.is_empty() {
            continue;
        }
        let (head, positions) = split_positions(segment).ok_or_else(|| invalid("malformed position"))?;
        match head {
            "" => {}
            "." => steps.push(Step::Current),
            ".." => steps.push(Step::Parent),
            name if name.starts_with('$') => {
                if i != 0 || !steps.is_empty() {
                    return Err(invalid("`$name` may only start a path"));
                }
                let name = &name[1..];
                if name.is_empty() {
                    return Err(invalid("empty name after `$`"));
                }
                steps.push(Step::Named(Arc::from(name)));
            }
            name => steps.push(Step::Child(Arc::from(name))),
        }
        steps.extend(positions.into_iter().map(Step::Position));
    }
    Ok(steps)
}

/// Split `name[1][2]` into `("name", [1, 2])`.
fn split_positions(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(open) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };
    let (head, mut rest) = segment.split_at(open);
    let mut positions = Vec::new();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        positions.push(inner[..close].trim().parse().ok()?);
        rest = &inner[close + 1..];
    }
    Some((head, positions))
}

/// Split `<node path>:<slot>` at the last colon.
pub(crate) fn split_slot_path(path: &str) -> Result<(&str, &str)> {
    match path.rsplit_once(':') {
        Some((node, slot)) if !node.is_empty() && !slot.is_empty() => Ok((node, slot)),
        _ => Err(EngineError::InvalidPath {
            path: path.to_string(),
            reason: "expected `<node path>:<slot>`".to_string(),
        }),
    }
}

impl Engine {
    /// Resolve a node reference from `context`, recording what was read.
    pub(crate) fn locate(&mut self, context: NodeId, node: &NodeRef, watches: &mut Watches) -> Result<NodeId> {
        match node {
            NodeRef::This => Ok(context),
            NodeRef::Root => Ok(self.tree.root()),
            NodeRef::Parent => self
                .tree
                .parent(context)
                .ok_or_else(|| EngineError::UnknownNode(format!("parent of {}", self.tree.path_of(context)))),
            NodeRef::Path(path) => {
                let steps = parse_path(path)?;
                self.walk(context, &steps, path, watches)
            }
        }
    }

    fn walk(&mut self, context: NodeId, steps: &[Step], path: &str, watches: &mut Watches) -> Result<NodeId> {
        if !self.tree.contains(context) {
            return Err(EngineError::UnknownNode(format!("{context}")));
        }
        let missing = || EngineError::UnknownNode(path.to_string());
        let mut current = context;
        for step in steps {
            current = match step {
                Step::Root => self.tree.root(),
                Step::Current => current,
                Step::Parent => self.tree.parent(current).ok_or_else(missing)?,
                Step::Named(name) => {
                    watches.name(name);
                    self.closest_named(context, name).ok_or_else(missing)?
                }
                Step::Child(name) => {
                    self.ensure_expanded(current);
                    watches.node(current);
                    self.tree.child_named(current, name).ok_or_else(missing)?
                }
                Step::Position(k) => {
                    self.ensure_expanded(current);
                    watches.node(current);
                    self.tree.children(current).get(*k).copied().ok_or_else(missing)?
                }
            };
        }
        Ok(current)
    }

    /// Among nodes named `name`, the one sharing the deepest ancestor with
    /// `context`; the earliest created wins ties.
    fn closest_named(&self, context: NodeId, name: &str) -> Option<NodeId> {
        let candidates = self.tree.named(name);
        if candidates.len() <= 1 {
            return candidates.first().copied();
        }
        let mut scope = Vec::new();
        let mut current = Some(context);
        while let Some(id) = current {
            scope.push(id);
            current = self.tree.parent(id);
        }
        candidates.iter().copied().min_by_key(|&candidate| {
            let mut up = Some(candidate);
            while let Some(id) = up {
                if let Some(distance) = scope.iter().position(|&s| s == id) {
                    return distance;
                }
                up = self.tree.parent(id);
            }
            usize::MAX
        })
    }

    /// Resolve a node path from the root, realizing expansions on the way.
    pub fn resolve_path(&mut self, path: &str) -> Result<NodeId> {
        let root = self.tree.root();
        self.resolve_path_from(root, path)
    }

    /// Resolve a node path relative to `context`.
    pub fn resolve_path_from(&mut self, context: NodeId, path: &str) -> Result<NodeId> {
        let mut watches = Watches::default();
        self.locate(context, &NodeRef::Path(Arc::from(path)), &mut watches)
    }

    /// Slots a dependency query addresses when evaluated from `context`.
    pub fn resolve(&mut self, query: &DependencyQuery, context: NodeId) -> Result<Vec<SlotId>> {
        let mut watches = Watches::default();
        Ok(self.resolve_query(context, query, &mut watches)?.into_vec())
    }

    /// Resolve one dependency query from `context`.
    pub(crate) fn resolve_query(
        &mut self,
        context: NodeId,
        query: &DependencyQuery,
        watches: &mut Watches,
    ) -> Result<SmallVec<[SlotId; 4]>> {
        let mut out = SmallVec::new();
        match query {
            DependencyQuery::Slot { node, slot } => {
                let node = self.locate(context, node, watches)?;
                out.push(self.slot_id(node, slot)?);
            }
            DependencyQuery::Children { node, type_tag, slot } => {
                let base = self.locate(context, node, watches)?;
                self.ensure_expanded(base);
                watches.node(base);
                let children = self.tree.children(base).to_vec();
                self.collect_matching(&children, type_tag.as_deref(), slot, &mut out);
            }
            DependencyQuery::Descendants { node, type_tag, slot } => {
                let base = self.locate(context, node, watches)?;
                let mut visited = Vec::new();
                let mut stack = vec![base];
                while let Some(next) = stack.pop() {
                    self.ensure_expanded(next);
                    watches.node(next);
                    if next != base {
                        visited.push(next);
                    }
                    stack.extend(self.tree.children(next).iter().rev().copied());
                }
                self.collect_matching(&visited, type_tag.as_deref(), slot, &mut out);
            }
            DependencyQuery::Nth { node, position, slot } => {
                let base = self.locate(context, node, watches)?;
                self.ensure_expanded(base);
                watches.node(base);
                let child = self.tree.children(base).get(*position).copied().ok_or_else(|| {
                    EngineError::UnknownNode(format!("{}[{position}]", self.tree.path_of(base)))
                })?;
                out.push(self.slot_id(child, slot)?);
            }
            DependencyQuery::SourceIndex { node, index, slot } => {
                let base = self.locate(context, node, watches)?;
                self.ensure_expanded(base);
                watches.node(base);
                let child = self.expansion_child(base, *index).ok_or_else(|| {
                    EngineError::UnknownNode(format!("{}/#{index}", self.tree.path_of(base)))
                })?;
                out.push(self.slot_id(child, slot)?);
            }
        }
        Ok(out)
    }

    fn collect_matching(
        &mut self,
        nodes: &[NodeId],
        type_tag: Option<&str>,
        slot: &str,
        out: &mut SmallVec<[SlotId; 4]>,
    ) {
        for &node in nodes {
            let Some(tag) = self.tree.type_tag(node) else {
                continue;
            };
            if type_tag.is_some_and(|wanted| wanted != &**tag) {
                continue;
            }
            // Nodes that do not declare the slot are not part of the collection.
            if let Ok(id) = self.slot_id(node, slot) {
                out.push(id);
            }
        }
    }

    /// Resolve every query of a definition. Failed queries are recorded as
    /// `UnresolvableQuery` warnings and resolve to nothing.
    pub(crate) fn resolve_all(
        &mut self,
        context: NodeId,
        queries: &[DependencyQuery],
        owner: &str,
    ) -> (Vec<ResolvedDependency>, Watches) {
        let mut watches = Watches::default();
        let mut resolved = Vec::with_capacity(queries.len());
        for query in queries {
            match self.resolve_query(context, query, &mut watches) {
                Ok(slots) => resolved.push(ResolvedDependency { slots, resolved: true }),
                Err(err) => {
                    let error = EngineError::UnresolvableQuery {
                        query: query.to_string(),
                        context: owner.to_string(),
                        reason: err.to_string(),
                    };
                    self.diagnostics.warn(owner, error);
                    resolved.push(ResolvedDependency::default());
                }
            }
        }
        (resolved, watches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_and_relative_paths() {
        assert_eq!(parse_path("/").unwrap(), vec![Step::Root]);
        assert_eq!(
            parse_path("/a/b").unwrap(),
            vec![Step::Root, Step::Child(Arc::from("a")), Step::Child(Arc::from("b"))]
        );
        assert_eq!(
            parse_path("../x").unwrap(),
            vec![Step::Parent, Step::Child(Arc::from("x"))]
        );
        assert_eq!(parse_path("./x").unwrap(), vec![Step::Current, Step::Child(Arc::from("x"))]);
    }

    #[test]
    fn parses_macros_and_positions() {
        assert_eq!(
            parse_path("$list[2]/label").unwrap(),
            vec![
                Step::Named(Arc::from("list")),
                Step::Position(2),
                Step::Child(Arc::from("label"))
            ]
        );
        assert_eq!(parse_path("[0]").unwrap(), vec![Step::Position(0)]);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(parse_path("").is_err());
        assert!(parse_path("a/$b").is_err());
        assert!(parse_path("a[x]").is_err());
        assert!(parse_path("a[1").is_err());
        assert!(parse_path("$").is_err());
    }

    #[test]
    fn splits_slot_paths() {
        assert_eq!(split_slot_path("/v:head").unwrap(), ("/v", "head"));
        assert_eq!(split_slot_path("/:count").unwrap(), ("/", "count"));
        assert!(split_slot_path("/v").is_err());
        assert!(split_slot_path("/v:").is_err());
    }

    #[test]
    fn queries_display_compactly() {
        assert_eq!(DependencyQuery::own("head").to_string(), ".:head");
        assert_eq!(
            DependencyQuery::descendants("$list", Some("item"), "value").to_string(),
            "$list/**<item>:value"
        );
        assert_eq!(DependencyQuery::nth("/list", 1, "value").to_string(), "/list[1]:value");
    }
}
