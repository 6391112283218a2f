//! DAG execution discipline: each node runs at most once per run; a ready
//! node is any whose channel satisfied its [`TriggerMode`]. Cycles are
//! rejected at compile time ([`crate::graph::builder::GraphBuilder::compile`]),
//! so a simple ready-queue drain always terminates.
//!
//! Grounded on the teacher's `CompiledStateGraph::run_loop_inner` shape
//! (a worklist drained until empty, one node body per iteration), split
//! out from the Pregel runner because "ran once" here is a hard
//! invariant rather than a superstep-local one. Every node ready at once
//! (a "wave") runs concurrently, the same way Pregel batches a superstep
//! — no sibling in a wave can observe another's delivery until the whole
//! wave has finished.

use std::collections::{HashSet, VecDeque};

use futures::future::join_all;

use crate::context::RunContext;
use crate::error::WeaveError;
use crate::graph::builder::{CompiledGraph, END, START};
use crate::interrupt::Interrupt;
use crate::stream::Stream;
use crate::task_manager::{
    checkpoint_on_interrupt, compose, drain_envelope_stream, drain_for, execute_node, init_channels, load_resume,
    route_output,
};
use crate::value::Envelope;

async fn run<S>(
    graph: &CompiledGraph<S>,
    ctx: RunContext<S>,
    input: Envelope,
    want_stream_output: bool,
) -> Result<Envelope, WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    let mut channels = init_channels(graph);
    let mut ready: VecDeque<String> = VecDeque::new();
    let mut fired: HashSet<String> = HashSet::new();
    let streaming_tail = if want_stream_output {
        streaming_tail(graph)
    } else {
        HashSet::new()
    };

    if let Some(resume) = ctx.resume.clone() {
        let resumed = load_resume(graph, &ctx, &resume.checkpoint_id).await?;
        for (node, env) in resumed {
            let output = execute_node(graph, &ctx, &node, env).await?;
            fired.insert(node.clone());
            route_output(graph, &mut channels, &node, output, &mut ready)?;
        }
    } else {
        route_output(graph, &mut channels, START, input, &mut ready)?;
    }

    let mut steps = 0usize;
    while !ready.is_empty() {
        if ctx.is_cancelled() {
            return Err(WeaveError::Cancelled);
        }

        // Take the whole current ready set as one wave: every node in it
        // is independent of the others (none fed it), so they dispatch
        // concurrently rather than one `.await` at a time.
        let mut wave: Vec<(String, Envelope)> = Vec::new();
        while let Some(name) = ready.pop_front() {
            if name == END || fired.contains(&name) {
                continue;
            }
            fired.insert(name.clone());
            steps += 1;
            if steps > graph.options().step_limit {
                return Err(WeaveError::StepLimitExceeded(steps));
            }
            let deliveries = drain_for(&mut channels, &name);
            let composed = compose(graph, &name, deliveries)?;
            wave.push((name, composed));
        }
        if wave.is_empty() {
            continue;
        }

        let outcomes = join_all(wave.into_iter().map(|(name, input)| {
            let ctx = &ctx;
            let streaming_tail = &streaming_tail;
            async move {
                let result = if streaming_tail.contains(&name) {
                    execute_node_streaming(graph, ctx, &name, input).await
                } else {
                    execute_node(graph, ctx, &name, input).await
                };
                (name, result)
            }
        }))
        .await;

        let mut staged: Vec<(String, Envelope)> = Vec::new();
        let mut interrupts: Vec<Interrupt> = Vec::new();
        for (name, result) in outcomes {
            match result {
                Ok(output) => staged.push((name, output)),
                Err(WeaveError::Interrupted(mut interrupt)) => {
                    interrupt.node.get_or_insert(name);
                    interrupts.push(interrupt);
                }
                Err(e) => return Err(e),
            }
        }

        if !interrupts.is_empty() {
            let pending: Vec<String> = interrupts.iter().filter_map(|i| i.node.clone()).collect();
            let checkpoint_id = ctx
                .write_checkpoint_id
                .clone()
                .unwrap_or_else(|| format!("{}-{}", ctx.run_info.run_id, uuid::Uuid::new_v4()));
            checkpoint_on_interrupt(&ctx, checkpoint_id, pending, interrupts.clone()).await?;
            return Err(WeaveError::Interrupted(
                interrupts.into_iter().next().expect("checked non-empty above"),
            ));
        }

        for (name, output) in staged {
            route_output(graph, &mut channels, &name, output, &mut ready)?;
        }
    }

    let end_values = drain_for(&mut channels, END);
    end_values
        .into_iter()
        .next()
        .map(|(_, env)| env)
        .ok_or_else(|| WeaveError::build("graph produced no output at END"))
}

/// The unbroken chain of single-predecessor nodes immediately upstream of
/// `END`, for a graph-level `Stream` call. Every node in this chain runs
/// through [`execute_node_streaming`] instead of [`execute_node`], so a
/// streaming-native source stays a stream all the way to `END` rather than
/// being collapsed to a value the moment it crosses into a second node.
/// The walk stops at the first node with more than one declared
/// predecessor, since a fan-in there requires the usual value-composed
/// input.
fn streaming_tail<S>(graph: &CompiledGraph<S>) -> HashSet<String> {
    let mut tail = HashSet::new();
    let mut current = END.to_string();
    loop {
        let preds: Vec<&str> = graph.edges_to(&current).map(|e| e.from.as_str()).collect();
        if preds.len() != 1 || preds[0] == START {
            break;
        }
        let pred = preds[0].to_string();
        tail.insert(pred.clone());
        current = pred;
    }
    tail
}

/// Like [`execute_node`] but asks the node's runnable for its `stream`
/// form rather than `invoke`, for nodes whose output feeds `END` in a
/// graph-level `Stream` call: the terminal node's native streaming form
/// is preferred over collapsing to a value and re-wrapping it.
async fn execute_node_streaming<S>(
    graph: &CompiledGraph<S>,
    ctx: &RunContext<S>,
    node_name: &str,
    input: Envelope,
) -> Result<Envelope, WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    let idx = graph
        .node_index(node_name)
        .ok_or_else(|| WeaveError::build(format!("unknown node '{node_name}'")))?;
    let node = graph.node(idx);
    let node_ctx = ctx.for_node(node_name);

    let input = match &node.pre_handler {
        Some(h) => crate::handler::run_handler(h.clone(), &node_ctx, input).await?,
        None => input,
    };
    let input = match input {
        Envelope::Stream(raw, tag) => {
            let produced = node_ctx.callbacks.dispatch_start_stream_input(&node_ctx, node_name, raw).await;
            Envelope::Stream(produced, tag)
        }
        other => {
            node_ctx.callbacks.dispatch_start(&node_ctx, node_name, &other).await;
            other
        }
    };
    let output = match node.runnable.stream(node_ctx.clone(), input).await {
        Ok(o) => o,
        Err(WeaveError::Interrupted(mut interrupt)) => {
            interrupt.node.get_or_insert_with(|| node_name.to_string());
            return Err(WeaveError::Interrupted(interrupt));
        }
        Err(e) => {
            let attributed = e.in_node(node_name);
            node_ctx.callbacks.dispatch_error(&node_ctx, node_name, &attributed).await;
            return Err(attributed);
        }
    };
    let output = match &node.post_handler {
        Some(h) => crate::handler::run_handler(h.clone(), &node_ctx, output).await?,
        None => output,
    };
    let output = match output {
        Envelope::Stream(raw, tag) => {
            let produced = node_ctx.callbacks.dispatch_end_stream_output(&node_ctx, node_name, raw).await;
            Envelope::Stream(produced, tag)
        }
        other => {
            node_ctx.callbacks.dispatch_end(&node_ctx, node_name, &other).await;
            other
        }
    };
    Ok(output)
}

pub async fn invoke<S>(graph: &CompiledGraph<S>, ctx: RunContext<S>, input: Envelope) -> Result<Envelope, WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    crate::logging::log_run_start(&ctx.run_info.run_id, "dag");
    let result = run(graph, ctx.clone(), input, false).await;
    log_run_outcome(&ctx, &result);
    result
}

pub async fn stream<S>(graph: &CompiledGraph<S>, ctx: RunContext<S>, input: Envelope) -> Result<Envelope, WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    crate::logging::log_run_start(&ctx.run_info.run_id, "dag");
    let result = run(graph, ctx.clone(), input, true).await;
    log_run_outcome(&ctx, &result);
    result
}

fn log_run_outcome<S>(ctx: &RunContext<S>, result: &Result<Envelope, WeaveError>) {
    match result {
        Ok(_) => crate::logging::log_run_complete(&ctx.run_info.run_id),
        Err(e) => crate::logging::log_run_error(&ctx.run_info.run_id, e),
    }
}

pub async fn collect<S>(
    graph: &CompiledGraph<S>,
    ctx: RunContext<S>,
    input: Stream<Envelope>,
) -> Result<Envelope, WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    let merged = drain_envelope_stream(&ctx, input).await?;
    invoke(graph, ctx, merged).await
}

pub async fn transform<S>(
    graph: &CompiledGraph<S>,
    ctx: RunContext<S>,
    input: Stream<Envelope>,
) -> Result<Envelope, WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    let merged = drain_envelope_stream(&ctx, input).await?;
    stream(graph, ctx, merged).await
}
