//! Delta ledger.
//!
//! Records state changes per revision for debugging. Off unless
//! `EngineConfig::record_ledger` is set.

use crate::arena::SlotId;
use crate::tree::NodeId;
use crate::value::Value;

/// A recorded delta entry
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaEntry {
    /// Revision the change belongs to
    pub revision: u64,
    pub kind: DeltaKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeltaKind {
    /// An essential slot's stored value was written
    EssentialWrite {
        slot: SlotId,
        path: String,
        old_value: Value,
        new_value: Value,
    },
    NodeCreated {
        node: NodeId,
        path: String,
    },
    NodeRemoved {
        node: NodeId,
        path: String,
    },
    /// A dynamic expansion diffed its generation against the previous one
    ExpansionReconciled {
        node: NodeId,
        kept: usize,
        created: usize,
        removed: usize,
    },
    ActionFired {
        node: NodeId,
        action: String,
    },
}

#[derive(Debug, Default)]
pub struct Ledger {
    entries: Vec<DeltaEntry>,
    enabled: bool,
}

impl Ledger {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: Vec::new(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&mut self, revision: u64, kind: DeltaKind) {
        if self.enabled {
            self.entries.push(DeltaEntry { revision, kind });
        }
    }

    pub fn entries(&self) -> &[DeltaEntry] {
        &self.entries
    }

    pub fn entries_for_revision(&self, revision: u64) -> Vec<&DeltaEntry> {
        self.entries.iter().filter(|e| e.revision == revision).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_ledger_records_nothing() {
        let mut ledger = Ledger::new(false);
        ledger.record(
            1,
            DeltaKind::NodeCreated {
                node: NodeId(1),
                path: "/a".into(),
            },
        );
        assert!(ledger.entries().is_empty());
    }

    #[test]
    fn entries_are_grouped_by_revision() {
        let mut ledger = Ledger::new(true);
        ledger.record(
            1,
            DeltaKind::ActionFired {
                node: NodeId(0),
                action: "a".into(),
            },
        );
        ledger.record(
            2,
            DeltaKind::ActionFired {
                node: NodeId(0),
                action: "b".into(),
            },
        );
        assert_eq!(ledger.entries_for_revision(2).len(), 1);
        ledger.clear();
        assert!(ledger.entries().is_empty());
    }
}
