//! Inverse propagation.
//!
//! A set request on a slot is planned first and committed only if every
//! step of the plan succeeds: the walk through inverse definitions ends in
//! writes to essential slots, and a single rejection anywhere leaves every
//! slot untouched.

use crate::arena::SlotId;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::ledger::DeltaKind;
use crate::schema::{InverseResult, SlotMode, Validation};
use crate::value::Value;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;

/// One essential slot written by a request.
#[derive(Debug, Clone, PartialEq)]
pub struct EssentialWrite {
    pub slot: SlotId,
    pub path: String,
    pub old: Value,
    pub new: Value,
}

/// Essential writes performed by one request, in plan order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub writes: Vec<EssentialWrite>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// New value written to the slot at `path`, if any.
    pub fn written(&self, path: &str) -> Option<&Value> {
        self.writes.iter().find(|w| w.path == path).map(|w| &w.new)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Slot at which the request could not proceed; `None` when the
    /// target itself could not be resolved.
    pub slot: Option<SlotId>,
    pub path: String,
    pub reason: String,
}

/// Result of a set request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied(Diff),
    /// Applied, but a validator adjusted a value or an inverse definition
    /// could only honour part of the request.
    PartiallyApplied(Diff),
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Outcome::PartiallyApplied(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected(_))
    }

    pub fn diff(&self) -> Option<&Diff> {
        match self {
            Outcome::Applied(diff) | Outcome::PartiallyApplied(diff) => Some(diff),
            Outcome::Rejected(_) => None,
        }
    }
}

#[derive(Default)]
struct Plan {
    writes: IndexMap<SlotId, Value>,
    partial: bool,
    visiting: FxHashSet<SlotId>,
}

impl Engine {
    /// Request a new value for `slot`.
    ///
    /// Essential slots (and overridable ones) take the value directly.
    /// Derived slots go through their inverse definition, recursively,
    /// until essential slots are reached.
    pub fn request_set(&mut self, slot: SlotId, value: Value) -> Outcome {
        let mut plan = Plan::default();
        match self.plan_set(slot, value, &mut plan) {
            Ok(()) => {
                let diff = self.commit(plan.writes);
                if plan.partial {
                    Outcome::PartiallyApplied(diff)
                } else {
                    Outcome::Applied(diff)
                }
            }
            Err(rejection) => {
                let target = self.slot_path(slot);
                self.diagnostics.warn(
                    &target,
                    EngineError::InverseRejected {
                        slot: rejection.path.clone(),
                        reason: rejection.reason.clone(),
                    },
                );
                Outcome::Rejected(rejection)
            }
        }
    }

    /// `request_set` on the slot at `<node path>:<slot>`.
    pub fn set(&mut self, path: &str, value: Value) -> crate::Result<Outcome> {
        let slot = self.slot_at(path)?;
        Ok(self.request_set(slot, value))
    }

    fn reject(&self, slot: SlotId, reason: impl Into<String>) -> Rejection {
        Rejection {
            slot: Some(slot),
            path: self.slot_path(slot),
            reason: reason.into(),
        }
    }

    fn plan_set(&mut self, slot: SlotId, value: Value, plan: &mut Plan) -> Result<(), Rejection> {
        let Some(entry) = self.slots.get(slot) else {
            return Err(self.reject(slot, "slot was destroyed"));
        };
        if !plan.visiting.insert(slot) {
            return Err(self.reject(slot, "inverse definitions loop back to this slot"));
        }

        match entry.mode() {
            SlotMode::Essential | SlotMode::Shadowed | SlotMode::Overridable => {
                let value = match &entry.schema.validator {
                    None => value,
                    Some(validator) => match validator(&value) {
                        Validation::Accept => value,
                        Validation::Adjust(adjusted) => {
                            plan.partial = true;
                            adjusted
                        }
                        Validation::Reject(reason) => return Err(self.reject(slot, reason)),
                    },
                };
                if let Some(previous) = plan.writes.get(&slot) {
                    if *previous != value {
                        return Err(self.reject(slot, format!("conflicting proposals {previous} and {value}")));
                    }
                }
                plan.writes.insert(slot, value);
            }
            SlotMode::Derived => {
                let Some(inverse) = entry.schema.inverse.clone() else {
                    return Err(self.reject(slot, "derived slot has no inverse definition"));
                };
                let deps = self.dependency_values(slot);
                let resolved = self
                    .slots
                    .get(slot)
                    .and_then(|s| s.resolved.clone())
                    .unwrap_or_default();
                let changes = match inverse(&value, &deps) {
                    InverseResult::Propose(changes) => changes,
                    InverseResult::Partial(changes) => {
                        plan.partial = true;
                        changes
                    }
                    InverseResult::Reject(reason) => return Err(self.reject(slot, reason)),
                };
                for change in changes {
                    let target = resolved
                        .get(change.dependency)
                        .filter(|dep| dep.resolved)
                        .and_then(|dep| dep.slots.get(change.element).copied());
                    let Some(target) = target else {
                        return Err(self.reject(
                            slot,
                            format!(
                                "proposal for dependency {} element {} has no resolved target",
                                change.dependency, change.element
                            ),
                        ));
                    };
                    self.plan_set(target, change.value, plan)?;
                }
            }
        }
        plan.visiting.remove(&slot);
        Ok(())
    }

    fn commit(&mut self, writes: IndexMap<SlotId, Value>) -> Diff {
        let mut diff = Diff::default();
        if writes.is_empty() {
            return diff;
        }
        self.revision += 1;
        for (slot, new) in writes {
            let path = self.slot_path(slot);
            let Some(entry) = self.slots.get_mut(slot) else {
                continue;
            };
            let old = entry.stored.replace(new.clone()).unwrap_or_default();
            entry.written = true;
            log::debug!("{path} := {new} (was {old})");
            self.ledger.record(
                self.revision,
                DeltaKind::EssentialWrite {
                    slot,
                    path: path.clone(),
                    old_value: old.clone(),
                    new_value: new.clone(),
                },
            );
            self.mark_stale(slot);
            diff.writes.push(EssentialWrite { slot, path, old, new });
        }
        diff
    }
}
