//! Crate-wide error type.
//!
//! `WeaveError` covers build-time and run-time failures, plus the
//! [`WeaveError::Interrupted`] variant a node raises to suspend a run.
//! The runner checks for this variant immediately after every node call,
//! before any generic error handling (attribution, `OnError` dispatch,
//! checkpoint-on-failure) runs, so it is never treated as an ordinary
//! node failure.

use thiserror::Error;

/// Errors raised while building, compiling, or running a graph.
#[derive(Debug, Error)]
pub enum WeaveError {
    /// Invalid graph shape: duplicate node, unknown endpoint, cycle in DAG
    /// mode, self-loop, duplicate edge, reserved name misuse.
    #[error("build error: {0}")]
    Build(String),

    /// A data edge connects incompatible types. Carries the two node names
    /// and the offending paths so callers can locate the mismatch.
    #[error("type mismatch on edge {from} -> {to} ({from_path:?} -> {to_path:?}): {detail}")]
    TypeMismatch {
        from: String,
        to: String,
        from_path: Vec<String>,
        to_path: Vec<String>,
        detail: String,
    },

    /// A node's runnable failed. Carries the node path that raised it.
    #[error("runtime error in node '{node}': {source}")]
    Runtime {
        node: String,
        #[source]
        source: Box<WeaveError>,
    },

    /// A node's runnable returned an opaque failure not otherwise classified.
    #[error("node failed: {0}")]
    NodeFailed(String),

    /// A runner exceeded its configured step bound.
    #[error("step limit exceeded: {0} steps")]
    StepLimitExceeded(usize),

    /// The run's cancellation signal was observed.
    #[error("run cancelled")]
    Cancelled,

    /// A value envelope was unpacked with the wrong element type.
    #[error("type tag mismatch: expected {expected}, found {found}")]
    TypeTagMismatch { expected: String, found: String },

    /// Stream→value adaptation needed a concat function for this type and
    /// none was registered.
    #[error("no concat function registered for type {0}")]
    NoConcatFn(String),

    /// `concat` itself rejected the inputs (e.g. mismatched chat-message
    /// roles).
    #[error("concat failed: {0}")]
    ConcatFailed(String),

    /// A branch's condition selected a target outside its declared set.
    #[error("branch '{node}' selected undeclared target '{target}'")]
    UndeclaredBranchTarget { node: String, target: String },

    /// A branch's condition selected no target at all.
    #[error("branch '{0}' selected no target")]
    EmptyBranchSelection(String),

    /// Checkpoint lookup by id found nothing.
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// The user serializer failed to encode or decode a checkpoint.
    #[error("checkpoint serialization failed: {0}")]
    SerializationFailed(String),

    /// A channel received a delivery from an undeclared predecessor, or an
    /// otherwise invalid channel update.
    #[error("invalid channel update: {0}")]
    InvalidUpdate(String),

    /// A node raised an interrupt: the run suspends rather than failing.
    /// Caught and handled specially by the task manager, never surfaced
    /// to [`crate::callback::Callback::on_error`].
    #[error("interrupted: {0:?}")]
    Interrupted(crate::interrupt::Interrupt),
}

impl WeaveError {
    pub fn build(msg: impl Into<String>) -> Self {
        WeaveError::Build(msg.into())
    }

    /// Wraps this error as having originated inside `node`, unless it
    /// already carries node attribution.
    pub fn in_node(self, node: impl Into<String>) -> Self {
        match self {
            WeaveError::Runtime { .. } => self,
            other => WeaveError::Runtime {
                node: node.into(),
                source: Box::new(other),
            },
        }
    }
}
