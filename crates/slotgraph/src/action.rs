//! Action dispatcher.
//!
//! An action is a handler on a node that produces an ordered batch of slot
//! updates. The batch is applied entry by entry through `request_set`; a
//! rejected entry is recorded and the rest of the batch still runs.
//!
//! After a batch, actions chained from the completed one fire (document
//! order, recursively), then condition triggers are re-checked and those
//! whose condition went from false to true fire. Every action fires at most
//! once per dispatch (the epoch guard) and nesting is bounded by
//! `EngineConfig::max_trigger_depth`.

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::graph::Watches;
use crate::inverse::{Outcome, Rejection};
use crate::ledger::DeltaKind;
use crate::query::DependencyQuery;
use crate::schema::{ActionBody, ActionInput, ActionPath, ActionSchema, DependencyValue, DependencyValues, SlotUpdate};
use crate::tree::NodeId;
use crate::value::Value;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Trigger configuration of one action, declared on the action's node.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSpec {
    pub action: Arc<str>,
    /// Fire after any of these actions completes.
    pub chained_from: Vec<ActionPath>,
    /// Fire when this boolean slot turns true.
    pub condition: Option<DependencyQuery>,
}

impl TriggerSpec {
    pub fn new(action: impl Into<Arc<str>>) -> Self {
        Self {
            action: action.into(),
            chained_from: Vec::new(),
            condition: None,
        }
    }

    pub fn chained_from(mut self, source: ActionPath) -> Self {
        self.chained_from.push(source);
        self
    }

    pub fn when(mut self, condition: DependencyQuery) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// A concrete action on a live node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionRef {
    pub node: NodeId,
    pub action: Arc<str>,
}

impl ActionRef {
    pub fn new(node: NodeId, action: impl Into<Arc<str>>) -> Self {
        Self {
            node,
            action: action.into(),
        }
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.action)
    }
}

/// External request to run an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub node: NodeId,
    pub action: Arc<str>,
    pub args: Value,
}

impl ActionRequest {
    pub fn new(node: NodeId, action: impl Into<Arc<str>>, args: Value) -> Self {
        Self {
            node,
            action: action.into(),
            args,
        }
    }
}

/// Outcome of one batch entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOutcome {
    /// Action whose batch produced the entry
    pub action: ActionRef,
    /// Slot path of the target
    pub target: String,
    pub outcome: Outcome,
}

/// Everything one dispatch did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub entries: Vec<EntryOutcome>,
    /// Actions in firing order; the dispatched action comes first.
    pub fired: Vec<ActionRef>,
    /// Triggered actions that were not run (epoch guard or depth bound).
    pub suppressed: Vec<ActionRef>,
}

impl DispatchReport {
    /// Actions fired as a consequence of the dispatched one.
    pub fn triggered(&self) -> &[ActionRef] {
        self.fired.get(1..).unwrap_or(&[])
    }

    pub fn rejected(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.entries.iter().filter(|e| e.outcome.is_rejected())
    }
}

#[derive(Debug, Clone)]
struct Registration {
    id: u64,
    node: NodeId,
    trigger: TriggerSpec,
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    registrations: Vec<Registration>,
    next_id: u64,
    epoch: u64,
    /// Actions fired in the current epoch
    fired: FxHashSet<ActionRef>,
    /// Last observed value per condition registration
    conditions: FxHashMap<u64, bool>,
    queue: VecDeque<ActionRequest>,
}

impl Dispatcher {
    pub(crate) fn register(&mut self, node: NodeId, trigger: TriggerSpec) {
        self.next_id += 1;
        self.registrations.push(Registration {
            id: self.next_id,
            node,
            trigger,
        });
    }

    pub(crate) fn forget_node(&mut self, node: NodeId) {
        let conditions = &mut self.conditions;
        self.registrations.retain(|r| {
            if r.node == node {
                conditions.remove(&r.id);
                false
            } else {
                true
            }
        });
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Requests waiting in the queue.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }
}

impl Engine {
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// `<node path>.<action>` for messages.
    fn action_label(&self, action: &ActionRef) -> String {
        format!("{}.{}", self.tree.path_of(action.node), action.action)
    }

    fn action_schema(&self, node: NodeId, action: &str) -> Result<ActionSchema> {
        if !self.tree.contains(node) {
            return Err(EngineError::UnknownNode(node.to_string()));
        }
        self.schema_of(node)
            .and_then(|s| s.actions.get(action).cloned())
            .ok_or_else(|| EngineError::UnknownAction {
                node: self.tree.path_of(node),
                action: action.to_string(),
            })
    }

    fn check_arguments(&self, action: &ActionRef, schema: &ActionSchema, args: &Value) -> Result<()> {
        match schema.required_args.iter().find(|key| args.get(key).is_none()) {
            Some(missing) => Err(EngineError::InvalidArguments {
                action: self.action_label(action),
                missing: missing.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Run an action and everything it triggers, to completion.
    pub fn dispatch(&mut self, request: ActionRequest) -> Result<DispatchReport> {
        let action = ActionRef::new(request.node, request.action);
        let schema = self.action_schema(action.node, &action.action)?;
        self.check_arguments(&action, &schema, &request.args)?;

        self.prime_conditions();
        self.dispatcher.epoch += 1;
        self.dispatcher.fired.clear();
        log::debug!("dispatch {} (epoch {})", self.action_label(&action), self.dispatcher.epoch);

        let mut report = DispatchReport::default();
        self.fire(action, &request.args, 0, &mut report);
        Ok(report)
    }

    /// Dispatch the action `action` of the node at `path`.
    pub fn dispatch_at(&mut self, path: &str, action: &str, args: Value) -> Result<DispatchReport> {
        let node = self.resolve_path(path)?;
        self.dispatch(ActionRequest::new(node, action, args))
    }

    /// Queue a request for `process_queue`.
    pub fn enqueue(&mut self, request: ActionRequest) {
        self.dispatcher.queue.push_back(request);
    }

    /// Dispatch queued requests one at a time, in arrival order. Requests
    /// enqueued while processing are handled in the same call.
    pub fn process_queue(&mut self) -> Vec<Result<DispatchReport>> {
        let mut results = Vec::new();
        while let Some(request) = self.dispatcher.queue.pop_front() {
            results.push(self.dispatch(request));
        }
        results
    }

    fn fire(&mut self, action: ActionRef, args: &Value, depth: usize, report: &mut DispatchReport) {
        if depth > self.config.max_trigger_depth {
            log::warn!(
                "{}: trigger depth {depth} exceeds {}",
                self.action_label(&action),
                self.config.max_trigger_depth
            );
            report.suppressed.push(action);
            return;
        }
        if !self.dispatcher.fired.insert(action.clone()) {
            log::debug!("{} already fired in epoch {}", self.action_label(&action), self.dispatcher.epoch);
            report.suppressed.push(action);
            return;
        }
        let label = self.action_label(&action);
        let schema = match self.action_schema(action.node, &action.action) {
            Ok(schema) => schema,
            Err(err) => {
                self.diagnostics.warn(&label, err);
                report.suppressed.push(action);
                return;
            }
        };
        if depth > 0 {
            if let Err(err) = self.check_arguments(&action, &schema, args) {
                self.diagnostics.warn(&label, err);
                report.suppressed.push(action);
                return;
            }
        }

        report.fired.push(action.clone());
        self.ledger.record(
            self.revision,
            DeltaKind::ActionFired {
                node: action.node,
                action: action.action.to_string(),
            },
        );

        let mut updates = Vec::new();
        let mut visiting = vec![action.clone()];
        self.collect_updates(action.node, &schema, args, &mut visiting, &mut updates);

        let total = updates.len();
        let mut rejected = 0;
        for (context, update) in updates {
            let (target, outcome) = self.apply_update(context, &update);
            if outcome.is_rejected() {
                rejected += 1;
            }
            report.entries.push(EntryOutcome {
                action: action.clone(),
                target,
                outcome,
            });
        }
        if rejected > 0 {
            self.diagnostics.warn(
                &label,
                EngineError::PartialBatchFailure {
                    action: label.clone(),
                    rejected,
                    total,
                },
            );
        }

        for next in self.chained_after(&action) {
            self.fire(next, &Value::Empty, depth + 1, report);
        }
        self.check_conditions(depth, report);
    }

    /// Gather the batch of an action. Composite actions contribute the
    /// batches of their members, in member order, as one batch.
    fn collect_updates(
        &mut self,
        node: NodeId,
        schema: &ActionSchema,
        args: &Value,
        visiting: &mut Vec<ActionRef>,
        out: &mut Vec<(NodeId, SlotUpdate)>,
    ) {
        match &schema.body {
            ActionBody::Handler(handler) => {
                let owner = format!("{}.{}", self.tree.path_of(node), schema.name);
                let (resolved, _) = self.resolve_all(node, &schema.dependencies, &owner);
                let entries = resolved
                    .iter()
                    .map(|dep| DependencyValue {
                        values: dep.slots.iter().map(|&s| self.get_value(s)).collect(),
                        resolved: dep.resolved,
                    })
                    .collect();
                let deps = DependencyValues::new(entries);
                let input = ActionInput {
                    node,
                    args,
                    deps: &deps,
                };
                out.extend(handler(&input).into_iter().map(|u| (node, u)));
            }
            ActionBody::Composite(members) => {
                for member in members {
                    let mut watches = Watches::default();
                    let member_node = match self.locate(node, &member.node, &mut watches) {
                        Ok(id) => id,
                        Err(err) => {
                            let owner = format!("{}.{}", self.tree.path_of(node), schema.name);
                            self.diagnostics.warn(&owner, err);
                            continue;
                        }
                    };
                    let member_ref = ActionRef::new(member_node, member.action.clone());
                    if visiting.contains(&member_ref) {
                        log::warn!("{} is its own member", self.action_label(&member_ref));
                        continue;
                    }
                    let member_schema = match self.action_schema(member_node, &member.action) {
                        Ok(s) => s,
                        Err(err) => {
                            let owner = self.action_label(&member_ref);
                            self.diagnostics.warn(&owner, err);
                            continue;
                        }
                    };
                    visiting.push(member_ref);
                    self.collect_updates(member_node, &member_schema, args, visiting, out);
                    visiting.pop();
                }
            }
        }
    }

    fn apply_update(&mut self, context: NodeId, update: &SlotUpdate) -> (String, Outcome) {
        let mut watches = Watches::default();
        let slot = self
            .locate(context, &update.target.node, &mut watches)
            .and_then(|node| self.slot_id(node, &update.target.slot));
        match slot {
            Ok(slot) => (self.slot_path(slot), self.request_set(slot, update.value.clone())),
            Err(err) => {
                let target = format!("{}:{}", update.target.node, update.target.slot);
                self.diagnostics.warn(&target, err.clone());
                let rejection = Rejection {
                    slot: None,
                    path: target.clone(),
                    reason: err.to_string(),
                };
                (target, Outcome::Rejected(rejection))
            }
        }
    }

    /// Actions whose chain trigger is superseded: those carrying their own
    /// condition trigger, and every (transitive) member of a composite
    /// action that carries one.
    fn superseded_chains(&mut self) -> FxHashSet<ActionRef> {
        let mut out = FxHashSet::default();
        let mut stack: Vec<ActionRef> = self
            .dispatcher
            .registrations
            .iter()
            .filter(|r| r.trigger.condition.is_some())
            .map(|r| ActionRef::new(r.node, r.trigger.action.clone()))
            .collect();
        out.extend(stack.iter().cloned());
        while let Some(action) = stack.pop() {
            let Ok(schema) = self.action_schema(action.node, &action.action) else {
                continue;
            };
            let ActionBody::Composite(members) = &schema.body else {
                continue;
            };
            for member in members {
                let mut watches = Watches::default();
                if let Ok(node) = self.locate(action.node, &member.node, &mut watches) {
                    let member_ref = ActionRef::new(node, member.action.clone());
                    if out.insert(member_ref.clone()) {
                        stack.push(member_ref);
                    }
                }
            }
        }
        out
    }

    /// Actions chained from `completed`, in document order.
    fn chained_after(&mut self, completed: &ActionRef) -> Vec<ActionRef> {
        let candidates: Vec<(NodeId, TriggerSpec)> = self
            .dispatcher
            .registrations
            .iter()
            .filter(|r| r.trigger.condition.is_none() && !r.trigger.chained_from.is_empty())
            .map(|r| (r.node, r.trigger.clone()))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        let superseded = self.superseded_chains();
        let mut out = Vec::new();
        for (node, trigger) in candidates {
            let target = ActionRef::new(node, trigger.action.clone());
            if superseded.contains(&target) || out.contains(&target) {
                continue;
            }
            let matches = trigger.chained_from.iter().any(|source| {
                source.action == completed.action && {
                    let mut watches = Watches::default();
                    self.locate(node, &source.node, &mut watches)
                        .is_ok_and(|id| id == completed.node)
                }
            });
            if matches {
                out.push(target);
            }
        }
        self.sort_by_document_order(&mut out);
        out
    }

    fn sort_by_document_order(&self, actions: &mut [ActionRef]) {
        let positions = self.tree.document_positions();
        actions.sort_by_key(|a| positions.get(&a.node).copied().unwrap_or(usize::MAX));
    }

    fn condition_holds(&mut self, node: NodeId, condition: &DependencyQuery) -> bool {
        let mut watches = Watches::default();
        match self.resolve_query(node, condition, &mut watches) {
            Ok(slots) => !slots.is_empty() && slots.iter().all(|&s| self.get_value(s).as_bool() == Some(true)),
            Err(_) => false,
        }
    }

    fn conditional_registrations(&self) -> Vec<(u64, NodeId, Arc<str>, DependencyQuery)> {
        let positions = self.tree.document_positions();
        let mut regs: Vec<(u64, NodeId, Arc<str>, DependencyQuery)> = self
            .dispatcher
            .registrations
            .iter()
            .filter(|r| self.tree.contains(r.node))
            .filter_map(|r| {
                let condition = r.trigger.condition.clone()?;
                Some((r.id, r.node, r.trigger.action.clone(), condition))
            })
            .collect();
        regs.sort_by_key(|(_, node, _, _)| positions.get(node).copied().unwrap_or(usize::MAX));
        regs
    }

    /// Record the current value of every condition, so an edge is only
    /// seen when the effects of the next dispatch cause it. Host writes
    /// between dispatches move the baseline without firing anything.
    pub(crate) fn prime_conditions(&mut self) {
        for (id, node, _, condition) in self.conditional_registrations() {
            let now = self.condition_holds(node, &condition);
            self.dispatcher.conditions.insert(id, now);
        }
    }

    /// Fire, in document order, the actions whose condition went from
    /// false to true since it was last observed.
    fn check_conditions(&mut self, depth: usize, report: &mut DispatchReport) {
        let mut to_fire = Vec::new();
        for (id, node, action, condition) in self.conditional_registrations() {
            let now = self.condition_holds(node, &condition);
            let before = self.dispatcher.conditions.insert(id, now);
            if before == Some(false) && now {
                to_fire.push(ActionRef::new(node, action));
            }
        }
        for action in to_fire {
            if self.tree.contains(action.node) {
                self.fire(action, &Value::Empty, depth + 1, report);
            }
        }
    }
}
