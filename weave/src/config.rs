//! Per-call run options: the option list accepted by `invoke`/`stream`/
//! `collect`/`transform` alongside the graph's compiled
//! [`crate::graph::builder::CompileOptions`].
//!
//! Grounded on the teacher's `memory::config::RunnableConfig` (a plain
//! struct of optional per-invocation knobs threaded into `invoke`) and
//! `config::build_config_summary` (a debug-oriented projection used for
//! verbose logging), generalized from the teacher's thread/checkpoint
//! fields to this crate's full option list.

use std::sync::Arc;

use crate::callback::Callback;

/// Per-call options accepted by a graph's `invoke`/`stream`/`collect`/
/// `transform` entry points.
pub struct RunOptions<S> {
    /// Extra callbacks merged onto the graph's base chain for this call only.
    pub handlers: Vec<Arc<dyn Callback<S>>>,
    /// Resume from this checkpoint instead of starting fresh.
    pub checkpoint_id: Option<String>,
    /// Use this id (instead of a generated one) when a node interrupts
    /// during this call.
    pub write_to_checkpoint_id: Option<String>,
    /// Ignore any matching in-flight/resumable run and start over.
    pub force_new_run: bool,
}

impl<S> Default for RunOptions<S> {
    fn default() -> Self {
        RunOptions {
            handlers: Vec::new(),
            checkpoint_id: None,
            write_to_checkpoint_id: None,
            force_new_run: false,
        }
    }
}

impl<S> RunOptions<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: Arc<dyn Callback<S>>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_checkpoint_id(mut self, id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(id.into());
        self
    }

    pub fn with_write_to_checkpoint_id(mut self, id: impl Into<String>) -> Self {
        self.write_to_checkpoint_id = Some(id.into());
        self
    }

    pub fn force_new_run(mut self) -> Self {
        self.force_new_run = true;
        self
    }

    /// A short, secret-free line for verbose/debug logging, in the same
    /// `[section] k=v k=v` shape as the teacher's `ConfigSection::print_to_stderr`.
    pub fn summary_line(&self) -> String {
        format!(
            "[run_options] handlers={} checkpoint_id={} write_to_checkpoint_id={} force_new_run={}",
            self.handlers.len(),
            self.checkpoint_id.as_deref().unwrap_or("-"),
            self.write_to_checkpoint_id.as_deref().unwrap_or("-"),
            self.force_new_run,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_handlers_or_checkpoint() {
        let opts: RunOptions<()> = RunOptions::default();
        assert!(opts.handlers.is_empty());
        assert!(opts.checkpoint_id.is_none());
        assert!(!opts.force_new_run);
    }

    #[test]
    fn summary_line_omits_secrets_and_reflects_fields() {
        let opts: RunOptions<()> = RunOptions::new().with_checkpoint_id("c1").force_new_run();
        let line = opts.summary_line();
        assert!(line.contains("checkpoint_id=c1"));
        assert!(line.contains("force_new_run=true"));
    }
}
