//! Interrupt & resume: a node may raise an interrupt mid-run to request
//! external input; the run halts, a checkpoint is written, and a later
//! `invoke`/`stream` call carrying the same checkpoint id resumes from it.
//!
//! Carried forward close to the teacher's own `GraphInterrupt`/
//! `InterruptHandler` pair, since that design already treats a raised
//! interrupt as a suspend rather than a failure.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::WeaveError;

/// A single raised interrupt: an opaque payload plus an optional id a
/// resume call can target when several interrupts are outstanding at
/// once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interrupt {
    pub value: serde_json::Value,
    pub id: Option<String>,
    /// The node that raised this interrupt. Filled in by the task manager
    /// when the interrupt crosses out of the node body, since a node has
    /// no reason to know its own name.
    pub node: Option<String>,
}

impl Interrupt {
    pub fn new(value: serde_json::Value) -> Self {
        Interrupt { value, id: None, node: None }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }
}

/// Raises an interrupt from inside a node body. A [`crate::handler::Handler`]
/// or the closure passed to [`crate::runnable::Runnable::from_invoke`]
/// and friends calls this and propagates the resulting error with `?`;
/// the task manager recognizes [`WeaveError::Interrupted`] and suspends
/// the run instead of treating it as a node failure.
pub fn raise(value: serde_json::Value) -> WeaveError {
    WeaveError::Interrupted(Interrupt::new(value))
}

/// What a resumed run needs from the caller to answer an outstanding
/// interrupt.
pub trait InterruptHandler: Send + Sync {
    /// Produces the resume value for a given interrupt id (or the sole
    /// interrupt, when `id` is `None` and only one is outstanding).
    fn resolve(&self, node: &str, interrupt: &Interrupt) -> Result<serde_json::Value, WeaveError>;
}

/// An [`InterruptHandler`] backed by a single precomputed answer, the
/// common case of "the caller already knows what to resume with."
pub struct DefaultInterruptHandler {
    answer: serde_json::Value,
}

impl DefaultInterruptHandler {
    pub fn new(answer: serde_json::Value) -> Arc<dyn InterruptHandler> {
        Arc::new(DefaultInterruptHandler { answer })
    }
}

impl InterruptHandler for DefaultInterruptHandler {
    fn resolve(&self, _node: &str, _interrupt: &Interrupt) -> Result<serde_json::Value, WeaveError> {
        Ok(self.answer.clone())
    }
}
