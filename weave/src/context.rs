//! Execution context: cancellation signal, callback handler chain,
//! current run-info, user state holder, checkpoint writer, resume data.
//! Realized as `RunContext<S>`, generic over the graph's user-state type
//! the way the teacher's `RunContext<S>`/`Runtime<C,S>` pair is,
//! collapsed into a single struct since the core has no separate
//! "run dependencies" concept the way the teacher's agent layer does.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::callback::CallbackChain;
use crate::checkpoint::CheckpointStore;
use crate::concat::ConcatRegistry;
use crate::interrupt::InterruptHandler;
use crate::state::StateManager;

/// Node path, run id, and component tag for the currently executing node.
#[derive(Debug, Clone, Default)]
pub struct RunInfo {
    pub run_id: Arc<str>,
    pub node_path: Vec<String>,
    pub component: Option<Arc<str>>,
}

/// Opaque resume payload handed back to a graph on `invoke`/`stream` with
/// a checkpoint id set.
#[derive(Debug, Clone)]
pub struct ResumeData {
    pub checkpoint_id: String,
}

/// Created per top-level run, forked per subgraph. Cheap to clone: every
/// field is `Arc`-backed or a handle.
pub struct RunContext<S> {
    pub run_info: RunInfo,
    pub cancellation: CancellationToken,
    pub concat: Arc<ConcatRegistry>,
    pub state: StateManager<S>,
    pub callbacks: CallbackChain<S>,
    pub resume: Option<Arc<ResumeData>>,
    pub checkpoint_store: Option<Arc<dyn CheckpointStore<S>>>,
    pub interrupt_handler: Option<Arc<dyn InterruptHandler>>,
    /// Overrides the generated checkpoint id when a node interrupts during
    /// this run.
    pub write_checkpoint_id: Option<String>,
}

impl<S> Clone for RunContext<S> {
    fn clone(&self) -> Self {
        RunContext {
            run_info: self.run_info.clone(),
            cancellation: self.cancellation.clone(),
            concat: self.concat.clone(),
            state: self.state.clone(),
            callbacks: self.callbacks.clone(),
            resume: self.resume.clone(),
            checkpoint_store: self.checkpoint_store.clone(),
            interrupt_handler: self.interrupt_handler.clone(),
            write_checkpoint_id: self.write_checkpoint_id.clone(),
        }
    }
}

impl<S: Send + Sync + 'static> RunContext<S> {
    pub fn new(run_id: impl Into<Arc<str>>, initial_state: S) -> Self {
        RunContext {
            run_info: RunInfo {
                run_id: run_id.into(),
                node_path: Vec::new(),
                component: None,
            },
            cancellation: CancellationToken::new(),
            concat: Arc::new(ConcatRegistry::with_builtins()),
            state: StateManager::new(initial_state),
            callbacks: CallbackChain::empty(),
            resume: None,
            checkpoint_store: None,
            interrupt_handler: None,
            write_checkpoint_id: None,
        }
    }

    pub fn with_callbacks(mut self, callbacks: CallbackChain<S>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_concat(mut self, concat: Arc<ConcatRegistry>) -> Self {
        self.concat = concat;
        self
    }

    pub fn with_resume(mut self, resume: ResumeData) -> Self {
        self.resume = Some(Arc::new(resume));
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore<S>>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn with_interrupt_handler(mut self, handler: Arc<dyn InterruptHandler>) -> Self {
        self.interrupt_handler = Some(handler);
        self
    }

    pub fn with_write_checkpoint_id(mut self, id: impl Into<String>) -> Self {
        self.write_checkpoint_id = Some(id.into());
        self
    }

    /// A child context scoped to `node`, for callback dispatch and error
    /// attribution. Subgraphs use the same mechanism to push their own
    /// path segment.
    pub fn for_node(&self, node: impl Into<String>) -> Self {
        let mut c = self.clone();
        c.run_info.node_path.push(node.into());
        c
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

#[cfg(test)]
impl<S: Send + Sync + 'static> RunContext<S> {
    /// Minimal context for unit tests that don't need a real run id.
    pub fn for_test(initial_state: S) -> Self {
        RunContext::new("test-run", initial_state)
    }
}
