//! Snapshot and restore.
//!
//! A snapshot holds only what cannot be recomputed: the stored values of
//! essential slots that were written, and the generation-index to child
//! mapping of every realized dynamic expansion. Derived values are never
//! serialized. Paths are used instead of ids because node ids are not
//! stable across contexts.

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::query::split_slot_path;
use crate::schema::{GeneratedItem, SchemaRegistry};
use crate::tree::{NodeId, NodeSpec};
use crate::value::Value;
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// Written essential slots in document order
    pub essential: Vec<EssentialEntry>,
    /// Realized expansions in document order, outer before nested
    pub expansions: Vec<ExpansionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EssentialEntry {
    /// `<node path>:<slot>`
    pub slot: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionEntry {
    /// Path of the expansion node
    pub node: String,
    /// Generated children in generation order
    pub children: Vec<GeneratedChild>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedChild {
    pub index: u64,
    /// Path segment of the child
    pub name: String,
}

impl Snapshot {
    pub fn value(&self, slot: &str) -> Option<&Value> {
        self.essential.iter().find(|e| e.slot == slot).map(|e| &e.value)
    }

    #[cfg(feature = "json")]
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[cfg(feature = "json")]
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn snapshot_error(message: impl Into<String>) -> EngineError {
    EngineError::Snapshot(message.into())
}

impl Engine {
    /// Capture written essential values and expansion topology.
    ///
    /// Pending regenerations are carried out first, so the topology is the
    /// one the current essential values produce.
    pub fn snapshot(&mut self) -> Snapshot {
        self.realize_all();
        let mut essential = Vec::new();
        let mut expansions = Vec::new();
        for node in self.tree.preorder() {
            if let Some(expansion) = self.expansions.get(&node).filter(|e| e.realized) {
                let children = expansion
                    .children
                    .iter()
                    .filter_map(|(&index, &child)| {
                        let name = self.tree.get(child)?.name.to_string();
                        Some(GeneratedChild { index, name })
                    })
                    .collect();
                expansions.push(ExpansionEntry {
                    node: self.tree.path_of(node),
                    children,
                });
            }
            let Some(n) = self.tree.get(node) else {
                continue;
            };
            for (name, &slot) in &n.slots {
                let Some(entry) = self.slots.get(slot) else {
                    continue;
                };
                if entry.written && entry.is_essential() && !name.starts_with('@') {
                    essential.push(EssentialEntry {
                        slot: self.slot_path(slot),
                        value: entry.stored.clone().unwrap_or_default(),
                    });
                }
            }
        }
        log::debug!(
            "snapshot: {} essential values, {} expansions",
            essential.len(),
            expansions.len()
        );
        Snapshot {
            version: SNAPSHOT_VERSION,
            essential,
            expansions,
        }
    }

    /// Build a context from the same document and schemas a snapshot was
    /// taken from, rehydrating expansion topology and essential values
    /// before anything is evaluated.
    pub fn from_snapshot(
        schemas: SchemaRegistry,
        root: NodeSpec,
        config: EngineConfig,
        snapshot: &Snapshot,
    ) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(snapshot_error(format!(
                "unsupported version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }
        let mut engine = Self::bare(schemas, &root, config);
        for child in &root.children {
            engine.instantiate(engine.tree.root(), child, None);
        }
        for entry in &snapshot.expansions {
            let node = engine
                .tree
                .find_absolute(&entry.node)
                .ok_or_else(|| snapshot_error(format!("no node at {}", entry.node)))?;
            engine.restore_expansion(node, &entry.node, &entry.children)?;
        }
        for entry in &snapshot.essential {
            let (node_path, slot) = split_slot_path(&entry.slot)?;
            let node = engine
                .tree
                .find_absolute(node_path)
                .ok_or_else(|| snapshot_error(format!("no node at {node_path}")))?;
            let id = engine.slot_id(node, slot)?;
            let Some(target) = engine.slots.get_mut(id) else {
                continue;
            };
            if !target.is_essential() {
                return Err(snapshot_error(format!("{} is not essential", entry.slot)));
            }
            target.stored = Some(entry.value.clone());
            target.written = true;
        }
        engine.prime_conditions();
        log::debug!("restored {} essential values", snapshot.essential.len());
        Ok(engine)
    }

    fn restore_expansion(&mut self, node: NodeId, path: &str, children: &[GeneratedChild]) -> Result<()> {
        let template = self
            .schema_of(node)
            .and_then(|s| s.expansion.as_ref().map(|e| e.template.clone()))
            .ok_or_else(|| snapshot_error(format!("{path} is not a dynamic expansion")))?;
        let mut mapping = indexmap::IndexMap::with_capacity(children.len());
        for (position, child) in children.iter().enumerate() {
            let spec = template(&GeneratedItem {
                index: child.index,
                position,
            });
            let id = self.instantiate(node, &spec, Some(child.index));
            let name = self.tree.get(id).map(|n| n.name.to_string()).unwrap_or_default();
            if name != child.name {
                return Err(snapshot_error(format!(
                    "{path}: generated child {} is named `{name}`, snapshot has `{}`",
                    child.index, child.name
                )));
            }
            mapping.insert(child.index, id);
        }
        if let Some(expansion) = self.expansions.get_mut(&node) {
            expansion.children = mapping;
            expansion.realized = true;
        }
        Ok(())
    }
}
