//! Slot arena.
//!
//! Slots are allocated on first reference and addressed by `SlotId`.
//! Dependency and subscriber edges (see `graph`) are sets of these ids, so
//! the possibly cyclic-looking graph never needs shared references.

use crate::schema::{SlotMode, SlotSchema};
use crate::tree::NodeId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Handle of a slot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl SlotId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Whether a slot's memoized value can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Freshness {
    /// Never computed.
    Unresolved,
    /// Computed once, invalidated since.
    Stale,
    /// Up to date; reads return the memoized value.
    Fresh,
}

/// One dependency query after resolution against the tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedDependency {
    pub slots: SmallVec<[SlotId; 4]>,
    /// `false` when the query failed; the definition then receives
    /// `Value::Empty` for it.
    pub resolved: bool,
}

/// A named property of a node.
#[derive(Debug, Clone)]
pub struct Slot {
    pub node: NodeId,
    pub name: Arc<str>,
    pub schema: SlotSchema,
    pub freshness: Freshness,
    /// Memoized value (or fallback after a cycle).
    pub value: Value,
    /// Directly stored value for essential slots.
    pub stored: Option<Value>,
    /// Set once a request wrote `stored`; overridable slots then ignore
    /// their definition and the slot is included in snapshots.
    pub written: bool,
    /// `None` until the dependency queries are (re-)resolved.
    pub resolved: Option<Vec<ResolvedDependency>>,
    pub definition_calls: u64,
    /// Revision at which the value was last computed.
    pub computed_at: u64,
    /// Revision at which the value last changed.
    pub changed_at: u64,
    /// `computed_at` as it was just before the change at `changed_at`.
    pub changed_since: u64,
}

impl Slot {
    pub(crate) fn new(node: NodeId, name: Arc<str>, schema: SlotSchema, stored: Option<Value>) -> Self {
        Self {
            node,
            name,
            schema,
            freshness: Freshness::Unresolved,
            value: Value::Empty,
            stored,
            written: false,
            resolved: None,
            definition_calls: 0,
            computed_at: 0,
            changed_at: 0,
            changed_since: 0,
        }
    }

    pub fn mode(&self) -> SlotMode {
        self.schema.mode()
    }

    pub fn is_essential(&self) -> bool {
        self.mode().is_essential()
    }

    /// Value used when evaluation cannot produce one: the last known value,
    /// else the stored essential value, else `Empty`.
    pub fn fallback(&self) -> Value {
        if self.freshness != Freshness::Unresolved {
            return self.value.clone();
        }
        self.stored.clone().unwrap_or_default()
    }
}

/// Arena holding every slot of one context.
#[derive(Debug, Default)]
pub struct SlotArena {
    slots: Vec<Option<Slot>>,
    live: usize,
}

impl SlotArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc(&mut self, slot: Slot) -> SlotId {
        let id = SlotId(self.slots.len() as u32);
        self.slots.push(Some(slot));
        self.live += 1;
        id
    }

    pub fn get(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(id.index())?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: SlotId) -> Option<&mut Slot> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn remove(&mut self, id: SlotId) -> Option<Slot> {
        let slot = self.slots.get_mut(id.index()).and_then(Option::take);
        if slot.is_some() {
            self.live -= 1;
        }
        slot
    }

    pub fn freshness(&self, id: SlotId) -> Option<Freshness> {
        self.get(id).map(|s| s.freshness)
    }

    /// Live slots in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (SlotId(i as u32), s)))
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
