//! Test harness: drive an engine by slot and node paths.
//!
//! Panics with a readable message on any path or dispatch error, which is
//! what tests want.

use crate::action::DispatchReport;
use crate::arena::SlotId;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::inverse::Outcome;
use crate::samples::Sample;
use crate::value::Value;

pub struct TestEngine {
    engine: Engine,
}

impl TestEngine {
    pub fn new(sample: &Sample) -> Self {
        Self {
            engine: sample.engine(),
        }
    }

    pub fn with_config(sample: &Sample, config: EngineConfig) -> Self {
        Self {
            engine: sample.engine_with(config),
        }
    }

    pub fn from_engine(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn into_engine(self) -> Engine {
        self.engine
    }

    pub fn slot(&mut self, path: &str) -> SlotId {
        self.engine
            .slot_at(path)
            .unwrap_or_else(|err| panic!("slot '{path}': {err}"))
    }

    /// Fresh value of the slot at `path`.
    pub fn read(&mut self, path: &str) -> Value {
        self.engine
            .value(path)
            .unwrap_or_else(|err| panic!("read '{path}': {err}"))
    }

    /// Assert that a slot path equals an expected value
    pub fn assert_eq(&mut self, path: &str, expected: Value) {
        let actual = self.read(path);
        assert_eq!(
            actual, expected,
            "Path '{}' expected {:?} but got {:?}",
            path, expected, actual
        );
    }

    pub fn set(&mut self, path: &str, value: Value) -> Outcome {
        self.engine
            .set(path, value)
            .unwrap_or_else(|err| panic!("set '{path}': {err}"))
    }

    pub fn dispatch(&mut self, node: &str, action: &str, args: Value) -> DispatchReport {
        self.engine
            .dispatch_at(node, action, args)
            .unwrap_or_else(|err| panic!("dispatch '{node}.{action}': {err}"))
    }

    pub fn definition_calls(&mut self, path: &str) -> u64 {
        let slot = self.slot(path);
        self.engine.definition_calls(slot)
    }

    /// Assert the graph invariants hold.
    pub fn assert_consistent(&self) {
        let problems = self.engine.check_consistency();
        assert!(problems.is_empty(), "inconsistent graph: {problems:#?}");
    }
}
