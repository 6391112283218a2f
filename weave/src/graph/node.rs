//! Node model.

use std::sync::Arc;

use crate::handler::Handler;
use crate::runnable::ErasedRunnable;

/// Fan-in policy for a node's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// A node never fires until every declared predecessor has delivered.
    AllPredecessors,
    /// A node fires once at least one predecessor has delivered and the
    /// scheduler declares no further deliveries possible this step.
    AnyPredecessor,
}

/// Optional compile-time options for a node wrapping a nested graph.
#[derive(Debug, Clone, Default)]
pub struct SubgraphCompileOpts {
    /// When set, the subgraph runs with its own state generator rather
    /// than sharing the parent's.
    pub own_state: bool,
    /// Namespace prefix used when nesting the subgraph's checkpoint under
    /// the parent's.
    pub checkpoint_namespace: Option<String>,
}

pub(crate) struct NodeDef<S> {
    pub name: String,
    pub runnable: Arc<dyn ErasedRunnable<S>>,
    pub trigger: TriggerMode,
    pub pre_handler: Option<Arc<dyn Handler<S>>>,
    pub post_handler: Option<Arc<dyn Handler<S>>>,
    pub subgraph_opts: Option<SubgraphCompileOpts>,
}

/// Build-time description of a node, passed to [`super::GraphBuilder::add_node`].
pub struct NodeSpec<S> {
    pub runnable: Arc<dyn ErasedRunnable<S>>,
    pub trigger: TriggerMode,
    pub pre_handler: Option<Arc<dyn Handler<S>>>,
    pub post_handler: Option<Arc<dyn Handler<S>>>,
    pub subgraph_opts: Option<SubgraphCompileOpts>,
}

impl<S> NodeSpec<S> {
    pub fn new(runnable: Arc<dyn ErasedRunnable<S>>) -> Self {
        NodeSpec {
            runnable,
            trigger: TriggerMode::AllPredecessors,
            pre_handler: None,
            post_handler: None,
            subgraph_opts: None,
        }
    }

    pub fn with_trigger(mut self, trigger: TriggerMode) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_pre_handler(mut self, handler: Arc<dyn Handler<S>>) -> Self {
        self.pre_handler = Some(handler);
        self
    }

    pub fn with_post_handler(mut self, handler: Arc<dyn Handler<S>>) -> Self {
        self.post_handler = Some(handler);
        self
    }

    pub fn with_subgraph_opts(mut self, opts: SubgraphCompileOpts) -> Self {
        self.subgraph_opts = Some(opts);
        self
    }
}
