//! Graph construction: `add_node`/`add_edge`/`add_branch`/`compile`.
//!
//! The builder is an arena: nodes and edges are appended to `Vec`s and
//! referenced by name through an index map, mirroring the teacher's
//! `StateGraph` builder shape but generalized from a single linear chain
//! to an arbitrary node/edge/branch arena.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::WeaveError;
use crate::graph::branch::{BranchDef, BranchFn};
use crate::graph::edge::{EdgeDef, EdgeKind, FieldMapping};
use crate::graph::node::{NodeDef, NodeSpec};
use crate::runnable::ErasedRunnable;

/// Reserved virtual entry node name.
pub const START: &str = "__start__";
/// Reserved virtual exit node name.
pub const END: &str = "__end__";

/// Execution discipline selected at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Acyclic scheduling: each node runs at most once per run.
    Dag,
    /// Superstep scheduling: nodes may re-fire across supersteps until
    /// quiescence or a step limit.
    Pregel,
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub mode: ExecutionMode,
    /// Upper bound on steps/supersteps before `StepLimitExceeded`. Pregel
    /// mode needs this to bound otherwise-unbounded cycles; applied in
    /// Dag mode too as a safety net.
    pub step_limit: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            mode: ExecutionMode::Dag,
            step_limit: 1_000,
        }
    }
}

pub struct GraphBuilder<S> {
    nodes: Vec<NodeDef<S>>,
    name_index: HashMap<String, usize>,
    edges: Vec<EdgeDef>,
    branches: Vec<BranchDef>,
}

impl<S> Default for GraphBuilder<S> {
    fn default() -> Self {
        GraphBuilder {
            nodes: Vec::new(),
            name_index: HashMap::new(),
            edges: Vec::new(),
            branches: Vec::new(),
        }
    }
}

impl<S> GraphBuilder<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: impl Into<String>, spec: NodeSpec<S>) -> Result<(), WeaveError> {
        let name = name.into();
        if name == START || name == END {
            return Err(WeaveError::build(format!("node name '{name}' is reserved")));
        }
        if self.name_index.contains_key(&name) {
            return Err(WeaveError::build(format!("duplicate node '{name}'")));
        }
        let idx = self.nodes.len();
        self.nodes.push(NodeDef {
            name: name.clone(),
            runnable: spec.runnable,
            trigger: spec.trigger,
            pre_handler: spec.pre_handler,
            post_handler: spec.post_handler,
            subgraph_opts: spec.subgraph_opts,
        });
        self.name_index.insert(name, idx);
        Ok(())
    }

    fn node_exists(&self, name: &str) -> bool {
        name == START || name == END || self.name_index.contains_key(name)
    }

    fn runnable_of(&self, name: &str) -> Option<&Arc<dyn ErasedRunnable<S>>> {
        self.name_index.get(name).map(|&i| &self.nodes[i].runnable)
    }

    /// Adds an edge and, for data edges carrying no field mappings,
    /// immediately checks whole-to-whole type compatibility, so a mismatch
    /// is reported at build time rather than surfacing mid-run.
    /// Keyed mappings with paths are accepted without a structural check,
    /// since node payload shapes aren't known until a concrete value
    /// flows through; the same mismatch surfaces at run time instead as a
    /// [`WeaveError::TypeMismatch`] raised by [`FieldMapping::extract`]'s
    /// underlying lookup.
    pub fn add_edge(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        kind: EdgeKind,
        mappings: Vec<FieldMapping>,
    ) -> Result<(), WeaveError> {
        let from = from.into();
        let to = to.into();
        if !self.node_exists(&from) {
            return Err(WeaveError::build(format!("edge source '{from}' does not exist")));
        }
        if !self.node_exists(&to) {
            return Err(WeaveError::build(format!("edge target '{to}' does not exist")));
        }
        if self
            .edges
            .iter()
            .any(|e| e.from == from && e.to == to)
        {
            return Err(WeaveError::build(format!("duplicate edge {from} -> {to}")));
        }

        if kind.is_data && mappings.iter().all(|m| m.from_path.is_empty() && m.to_path.is_empty()) {
            if let (Some(src), Some(dst)) = (self.runnable_of(&from), self.runnable_of(&to)) {
                if src.output_type().id() != dst.input_type().id() {
                    return Err(WeaveError::TypeMismatch {
                        from: from.clone(),
                        to: to.clone(),
                        from_path: Vec::new(),
                        to_path: Vec::new(),
                        detail: format!(
                            "output type '{}' is not assignable to input type '{}'",
                            src.output_type().name(),
                            dst.input_type().name()
                        ),
                    });
                }
            }
        }

        self.edges.push(EdgeDef {
            from,
            to,
            kind,
            mappings,
        });
        Ok(())
    }

    pub fn add_branch(
        &mut self,
        source: impl Into<String>,
        allowed: HashSet<String>,
        condition: BranchFn,
    ) -> Result<(), WeaveError> {
        let source = source.into();
        if !self.node_exists(&source) {
            return Err(WeaveError::build(format!("branch source '{source}' does not exist")));
        }
        for target in &allowed {
            if !self.node_exists(target) {
                return Err(WeaveError::build(format!(
                    "branch target '{target}' does not exist"
                )));
            }
        }
        self.branches.push(BranchDef::new(source, allowed, condition));
        Ok(())
    }

    /// Validates global shape (reachability from `START` and to `END`,
    /// DAG acyclicity in [`ExecutionMode::Dag`]) and freezes the arena
    /// into a [`CompiledGraph`].
    pub fn compile(self, options: CompileOptions) -> Result<CompiledGraph<S>, WeaveError> {
        self.check_reachable()?;
        if options.mode == ExecutionMode::Dag {
            self.check_acyclic()?;
        }
        Ok(CompiledGraph {
            nodes: self.nodes,
            name_index: self.name_index,
            edges: self.edges,
            branches: self.branches,
            options,
        })
    }

    /// A graph with no edge out of `START` or none into `END` can never
    /// run: nothing ever gets the initial input, or nothing ever produces
    /// a final output. Both are build-time mistakes, not run-time ones.
    fn check_reachable(&self) -> Result<(), WeaveError> {
        if !self.edges.iter().any(|e| e.from == START) {
            return Err(WeaveError::build("graph has no edge out of START"));
        }
        if !self.edges.iter().any(|e| e.to == END) {
            return Err(WeaveError::build("graph has no edge into END"));
        }
        Ok(())
    }

    fn check_acyclic(&self) -> Result<(), WeaveError> {
        let n = self.nodes.len();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        for edge in &self.edges {
            if edge.from == START || edge.to == END {
                continue;
            }
            if let (Some(&from_idx), Some(&to_idx)) =
                (self.name_index.get(&edge.from), self.name_index.get(&edge.to))
            {
                adjacency[from_idx].push(to_idx);
            }
        }
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks = vec![Mark::Unvisited; n];

        fn visit(
            i: usize,
            adjacency: &[Vec<usize>],
            marks: &mut Vec<Mark>,
            names: &[String],
        ) -> Result<(), WeaveError> {
            match marks[i] {
                Mark::Done => return Ok(()),
                Mark::InProgress => {
                    return Err(WeaveError::build(format!(
                        "cycle detected through node '{}' in Dag execution mode",
                        names[i]
                    )))
                }
                Mark::Unvisited => {}
            }
            marks[i] = Mark::InProgress;
            for &next in &adjacency[i] {
                visit(next, adjacency, marks, names)?;
            }
            marks[i] = Mark::Done;
            Ok(())
        }

        let names: Vec<String> = self.nodes.iter().map(|n| n.name.clone()).collect();
        for i in 0..n {
            visit(i, &adjacency, &mut marks, &names)?;
        }
        Ok(())
    }
}

/// A validated, immutable graph ready to be run: `invoke`/`stream`/
/// `collect`/`transform` operate on this.
pub struct CompiledGraph<S> {
    pub(crate) nodes: Vec<NodeDef<S>>,
    pub(crate) name_index: HashMap<String, usize>,
    pub(crate) edges: Vec<EdgeDef>,
    pub(crate) branches: Vec<BranchDef>,
    pub(crate) options: CompileOptions,
}

impl<S> std::fmt::Debug for CompiledGraph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("name_index", &self.name_index)
            .field("edge_count", &self.edges.len())
            .field("branch_count", &self.branches.len())
            .field("options", &self.options)
            .finish()
    }
}

impl<S> CompiledGraph<S> {
    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    pub fn node(&self, idx: usize) -> &NodeDef<S> {
        &self.nodes[idx]
    }

    pub fn edges_from<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a EdgeDef> {
        let name = name.to_string();
        self.edges.iter().filter(move |e| e.from == name)
    }

    pub fn edges_to<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a EdgeDef> {
        let name = name.to_string();
        self.edges.iter().filter(move |e| e.to == name)
    }

    pub fn branch_from(&self, name: &str) -> Option<&BranchDef> {
        self.branches.iter().find(|b| b.source == name)
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }
}

/// Graph-level entry points: thin wrappers over [`crate::runner`]
/// that first fold a [`crate::config::RunOptions`] onto the run context
/// (extra handlers merged in, `checkpointId`/`writeToCheckpointId`/
/// `forceNewRun` applied), the way the teacher's `CompiledStateGraph::invoke`
/// folds a `RunnableConfig` onto its `Runtime` before running.
impl<S: Clone + Send + Sync + 'static> CompiledGraph<S> {
    fn with_options(mut ctx: crate::context::RunContext<S>, options: crate::config::RunOptions<S>) -> crate::context::RunContext<S> {
        if !options.handlers.is_empty() {
            ctx.callbacks = ctx.callbacks.merged_with(options.handlers);
        }
        if options.force_new_run {
            ctx.resume = None;
        } else if let Some(id) = options.checkpoint_id {
            ctx = ctx.with_resume(crate::context::ResumeData { checkpoint_id: id });
        }
        if let Some(id) = options.write_to_checkpoint_id {
            ctx = ctx.with_write_checkpoint_id(id);
        }
        ctx
    }

    pub async fn invoke(
        &self,
        ctx: crate::context::RunContext<S>,
        input: crate::value::Envelope,
        options: crate::config::RunOptions<S>,
    ) -> Result<crate::value::Envelope, WeaveError> {
        crate::runner::invoke(self, Self::with_options(ctx, options), input).await
    }

    pub async fn stream(
        &self,
        ctx: crate::context::RunContext<S>,
        input: crate::value::Envelope,
        options: crate::config::RunOptions<S>,
    ) -> Result<crate::value::Envelope, WeaveError> {
        crate::runner::stream(self, Self::with_options(ctx, options), input).await
    }

    pub async fn collect(
        &self,
        ctx: crate::context::RunContext<S>,
        input: crate::stream::Stream<crate::value::Envelope>,
        options: crate::config::RunOptions<S>,
    ) -> Result<crate::value::Envelope, WeaveError> {
        crate::runner::collect(self, Self::with_options(ctx, options), input).await
    }

    pub async fn transform(
        &self,
        ctx: crate::context::RunContext<S>,
        input: crate::stream::Stream<crate::value::Envelope>,
        options: crate::config::RunOptions<S>,
    ) -> Result<crate::value::Envelope, WeaveError> {
        crate::runner::transform(self, Self::with_options(ctx, options), input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::Runnable;

    fn passthrough() -> Arc<dyn ErasedRunnable<()>> {
        Arc::new(Runnable::<(), i32, i32>::from_invoke(|_ctx, i| async move { Ok(i) }))
    }

    #[test]
    fn duplicate_node_name_is_rejected() {
        let mut b = GraphBuilder::<()>::new();
        b.add_node("a", NodeSpec::new(passthrough())).unwrap();
        let err = b.add_node("a", NodeSpec::new(passthrough())).unwrap_err();
        assert!(matches!(err, WeaveError::Build(_)));
    }

    #[test]
    fn edge_to_unknown_node_is_rejected() {
        let mut b = GraphBuilder::<()>::new();
        b.add_node("a", NodeSpec::new(passthrough())).unwrap();
        let err = b
            .add_edge("a", "missing", EdgeKind::data(), vec![FieldMapping::whole()])
            .unwrap_err();
        assert!(matches!(err, WeaveError::Build(_)));
    }

    #[test]
    fn whole_edge_type_mismatch_is_caught_at_add_edge_time() {
        let mut b = GraphBuilder::<()>::new();
        b.add_node(
            "a",
            NodeSpec::new(Arc::new(Runnable::<(), i32, i32>::from_invoke(|_ctx, i| async move {
                Ok(i)
            }))),
        )
        .unwrap();
        b.add_node(
            "b",
            NodeSpec::new(Arc::new(Runnable::<(), String, String>::from_invoke(
                |_ctx, i| async move { Ok(i) },
            ))),
        )
        .unwrap();
        let err = b
            .add_edge("a", "b", EdgeKind::data(), vec![FieldMapping::whole()])
            .unwrap_err();
        assert!(matches!(err, WeaveError::TypeMismatch { .. }));
    }

    #[test]
    fn cycle_is_rejected_in_dag_mode() {
        let mut b = GraphBuilder::<()>::new();
        b.add_node("a", NodeSpec::new(passthrough())).unwrap();
        b.add_node("b", NodeSpec::new(passthrough())).unwrap();
        b.add_edge("a", "b", EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        b.add_edge("b", "a", EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        let err = b.compile(CompileOptions::default()).unwrap_err();
        assert!(matches!(err, WeaveError::Build(_)));
    }

    #[test]
    fn self_loop_is_rejected_in_dag_mode() {
        let mut b = GraphBuilder::<()>::new();
        b.add_node("a", NodeSpec::new(passthrough())).unwrap();
        b.add_edge("a", "a", EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        let err = b.compile(CompileOptions::default()).unwrap_err();
        assert!(matches!(err, WeaveError::Build(_)));
    }

    #[test]
    fn self_loop_compiles_in_pregel_mode() {
        let mut b = GraphBuilder::<()>::new();
        b.add_node("a", NodeSpec::new(passthrough())).unwrap();
        b.add_edge(START, "a", EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        b.add_edge("a", "a", EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        b.add_edge("a", END, EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        let compiled = b.compile(CompileOptions {
            mode: ExecutionMode::Pregel,
            step_limit: 10,
        });
        assert!(compiled.is_ok());
    }

    #[test]
    fn graph_with_no_edge_out_of_start_is_rejected() {
        let mut b = GraphBuilder::<()>::new();
        b.add_node("a", NodeSpec::new(passthrough())).unwrap();
        b.add_edge("a", END, EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        let err = b.compile(CompileOptions::default()).unwrap_err();
        assert!(matches!(err, WeaveError::Build(_)));
    }

    #[test]
    fn graph_with_no_edge_into_end_is_rejected() {
        let mut b = GraphBuilder::<()>::new();
        b.add_node("a", NodeSpec::new(passthrough())).unwrap();
        b.add_edge(START, "a", EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        let err = b.compile(CompileOptions::default()).unwrap_err();
        assert!(matches!(err, WeaveError::Build(_)));
    }

    #[test]
    fn acyclic_graph_compiles() {
        let mut b = GraphBuilder::<()>::new();
        b.add_node("a", NodeSpec::new(passthrough())).unwrap();
        b.add_node("b", NodeSpec::new(passthrough())).unwrap();
        b.add_edge(START, "a", EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        b.add_edge("a", "b", EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        b.add_edge("b", END, EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        let compiled = b.compile(CompileOptions::default()).unwrap();
        assert_eq!(compiled.node_index("a"), Some(0));
    }

    #[tokio::test]
    async fn invoke_method_runs_the_graph_with_default_options() {
        let mut b = GraphBuilder::<()>::new();
        b.add_node("a", NodeSpec::new(passthrough())).unwrap();
        b.add_edge(START, "a", EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        b.add_edge("a", END, EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        let compiled = b.compile(CompileOptions::default()).unwrap();
        let ctx = crate::context::RunContext::for_test(());
        let out = compiled
            .invoke(ctx, crate::value::Envelope::from_value(7i32), crate::config::RunOptions::default())
            .await
            .unwrap();
        assert_eq!(out.as_value::<i32>().unwrap(), 7);
    }

    #[tokio::test]
    async fn invoke_method_with_force_new_run_clears_a_stale_resume() {
        let mut b = GraphBuilder::<()>::new();
        b.add_node("a", NodeSpec::new(passthrough())).unwrap();
        b.add_edge(START, "a", EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        b.add_edge("a", END, EdgeKind::both(), vec![FieldMapping::whole()])
            .unwrap();
        let compiled = b.compile(CompileOptions::default()).unwrap();
        let ctx = crate::context::RunContext::for_test(()).with_resume(crate::context::ResumeData {
            checkpoint_id: "stale".to_string(),
        });
        let options = crate::config::RunOptions::default().force_new_run();
        let out = compiled
            .invoke(ctx, crate::value::Envelope::from_value(3i32), options)
            .await
            .unwrap();
        assert_eq!(out.as_value::<i32>().unwrap(), 3);
    }
}
