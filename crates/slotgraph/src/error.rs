use thiserror::Error;

/// Errors raised or recorded by the engine.
///
/// Evaluation-time problems (`UnresolvableQuery`, `CyclicDependency`,
/// `InverseRejected`, `PartialBatchFailure`) are normally recorded as
/// diagnostics on the context rather than returned; host-facing lookups
/// return them directly.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("unresolvable query `{query}` from {context}: {reason}")]
    UnresolvableQuery {
        query: String,
        context: String,
        reason: String,
    },

    #[error("cyclic dependency while freshening {slot}")]
    CyclicDependency { slot: String },

    #[error("set request for {slot} rejected: {reason}")]
    InverseRejected { slot: String, reason: String },

    #[error("action {action}: {rejected} of {total} updates rejected")]
    PartialBatchFailure {
        action: String,
        rejected: usize,
        total: usize,
    },

    #[error("unknown node `{0}`")]
    UnknownNode(String),

    #[error("node {node} has no slot `{slot}`")]
    UnknownSlot { node: String, slot: String },

    #[error("node {node} has no action `{action}`")]
    UnknownAction { node: String, action: String },

    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid arguments for {action}: missing `{missing}`")]
    InvalidArguments { action: String, missing: String },

    #[error("snapshot: {0}")]
    Snapshot(String),

    #[cfg(feature = "json")]
    #[error("json: {0}")]
    Json(String),
}

#[cfg(feature = "json")]
impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Json(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
