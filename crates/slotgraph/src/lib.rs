//! slotgraph: lazy, memoized, bidirectional dependency graphs over trees
//! of typed nodes.
//!
//! Nodes carry named slots whose values are either stored (essential) or
//! derived from other slots through per-type definitions. Reads freshen
//! only what is stale; writes to derived slots walk inverse definitions
//! down to the essential slots that determine them. Parts of the tree can
//! be generated from upstream data and regenerated without losing the
//! identity of unchanged children. Actions batch writes and trigger one
//! another through chains and edge-triggered conditions.

pub mod action;
pub mod arena;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod expansion;
pub mod graph;
#[cfg(feature = "test-support")]
pub mod harness;
pub mod inverse;
pub mod ledger;
pub mod query;
#[cfg(feature = "test-support")]
pub mod samples;
pub mod schema;
pub mod snapshot;
pub mod tree;
pub mod value;

pub use action::{ActionRef, ActionRequest, DispatchReport, EntryOutcome, TriggerSpec};
pub use arena::{Freshness, SlotId};
pub use config::EngineConfig;
pub use diagnostics::{ChangeReason, Diagnostic, Severity};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use expansion::{ExpansionDiff, GENERATION_SLOT};
pub use inverse::{Diff, Outcome, Rejection};
pub use query::{DependencyQuery, NodeRef};
pub use schema::{
    ActionPath, ActionSchema, DependencyValues, ExpansionSchema, GeneratedItem, InverseResult, NodeSchema,
    ProposedChange, SchemaRegistry, SlotSchema, SlotUpdate, Validation,
};
pub use snapshot::Snapshot;
pub use tree::{NodeId, NodeSpec};
pub use value::Value;
