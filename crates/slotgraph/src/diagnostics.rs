//! Diagnostics.
//!
//! Warnings and errors that evaluation records instead of failing, plus
//! value-change events for "why did X change?" queries.

use crate::arena::SlotId;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A recorded problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Slot path or action the problem was recorded on
    pub context: String,
    pub error: EngineError,
}

/// A recorded value change
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub revision: u64,
    pub slot: SlotId,
    pub old_value: Value,
    pub new_value: Value,
}

/// Answer to "why did this slot change?"
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeReason {
    pub slot: SlotId,
    pub changed_at: u64,
    /// Direct dependencies that changed after the slot's previous computation
    pub triggered_by: Vec<SlotId>,
    /// The slot is essential and was written directly
    pub written: bool,
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    changes: Vec<ChangeEvent>,
    track_changes: bool,
}

impl Diagnostics {
    pub fn new(track_changes: bool) -> Self {
        Self {
            track_changes,
            ..Self::default()
        }
    }

    pub fn warn(&mut self, context: &str, error: EngineError) {
        log::warn!("{context}: {error}");
        self.push(Severity::Warning, context, error);
    }

    pub fn error(&mut self, context: &str, error: EngineError) {
        log::error!("{context}: {error}");
        self.push(Severity::Error, context, error);
    }

    fn push(&mut self, severity: Severity, context: &str, error: EngineError) {
        self.entries.push(Diagnostic {
            severity,
            context: context.to_string(),
            error,
        });
    }

    pub(crate) fn record_change(&mut self, revision: u64, slot: SlotId, old_value: Value, new_value: Value) {
        if self.track_changes {
            self.changes.push(ChangeEvent {
                revision,
                slot,
                old_value,
                new_value,
            });
        }
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn changes(&self) -> &[ChangeEvent] {
        &self.changes
    }

    pub fn changes_at(&self, revision: u64) -> Vec<&ChangeEvent> {
        self.changes.iter().filter(|e| e.revision == revision).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.changes.clear();
    }
}

impl Engine {
    /// Why `slot` last changed: the dependencies whose values changed after
    /// its previous computation. `None` if the slot never changed value.
    pub fn why_did_change(&self, slot: SlotId) -> Option<ChangeReason> {
        let entry = self.slots.get(slot)?;
        if entry.changed_at == 0 {
            return None;
        }
        let triggered_by = self
            .graph
            .dependencies(slot)
            .iter()
            .copied()
            .filter(|&dep| {
                self.slots
                    .get(dep)
                    .is_some_and(|d| d.changed_at > entry.changed_since)
            })
            .collect();
        Some(ChangeReason {
            slot,
            changed_at: entry.changed_at,
            triggered_by,
            written: entry.written && entry.is_essential(),
        })
    }

    /// Follow `why_did_change` transitively from `slot`.
    pub fn change_chain(&self, slot: SlotId) -> Vec<ChangeReason> {
        let mut chain = Vec::new();
        let mut visited = rustc_hash::FxHashSet::default();
        let mut queue = vec![slot];
        while let Some(current) = queue.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(reason) = self.why_did_change(current) {
                queue.extend(reason.triggered_by.iter().copied());
                chain.push(reason);
            }
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities_are_split() {
        let mut d = Diagnostics::new(false);
        d.warn("/a:x", EngineError::UnknownNode("/b".into()));
        d.error(
            "/a:y",
            EngineError::CyclicDependency {
                slot: "/a:y".into(),
            },
        );
        assert_eq!(d.warnings().count(), 1);
        assert_eq!(d.errors().count(), 1);
        assert_eq!(d.entries()[0].context, "/a:x");
    }

    #[test]
    fn changes_only_tracked_when_enabled() {
        let mut off = Diagnostics::new(false);
        off.record_change(1, SlotId(0), Value::Empty, Value::int(1));
        assert!(off.changes().is_empty());

        let mut on = Diagnostics::new(true);
        on.record_change(1, SlotId(0), Value::Empty, Value::int(1));
        on.record_change(2, SlotId(0), Value::int(1), Value::int(2));
        assert_eq!(on.changes_at(2).len(), 1);
    }
}
