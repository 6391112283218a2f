//! Node execution and delivery routing shared by both runners: runs one
//! node's pre-handler/runnable/post-handler/callback sequence, then fans
//! its output out across outgoing edges, applying branch resolution
//! where declared.
//!
//! Grounded on the teacher's `CompiledStateGraph::run_loop_inner`'s
//! per-node step (handler wrapping, middleware dispatch, error
//! attribution), generalized from a single linear successor to arbitrary
//! fan-out across an edge arena.

use std::collections::{HashSet, VecDeque};

use crate::channel::{compose_input, Channel, Delivery};
use crate::checkpoint::Checkpoint;
use crate::context::RunContext;
use crate::error::WeaveError;
use crate::graph::builder::{CompiledGraph, END};
use crate::graph::edge::EdgeKind;
use crate::handler::run_handler;
use crate::interrupt::Interrupt;
use crate::stream::{Next, Stream};
use crate::value::Envelope;

/// Runs a single node: pre-handler, the node's runnable, post-handler,
/// with `OnStart`/`OnEnd`/`OnError` dispatched around the runnable call.
/// On failure the error is attributed to this node via
/// [`WeaveError::in_node`] before propagating.
pub(crate) async fn execute_node<S>(
    graph: &CompiledGraph<S>,
    ctx: &RunContext<S>,
    node_name: &str,
    input: Envelope,
) -> Result<Envelope, WeaveError>
where
    S: Send + Sync + 'static,
{
    let idx = graph
        .node_index(node_name)
        .ok_or_else(|| WeaveError::build(format!("unknown node '{node_name}'")))?;
    let node = graph.node(idx);
    let node_ctx = ctx.for_node(node_name);
    crate::logging::log_node_start(node_name);

    let input = match &node.pre_handler {
        Some(h) => run_handler(h.clone(), &node_ctx, input).await?,
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

    let output = match node.runnable.invoke(node_ctx.clone(), input).await {
        Ok(o) => o,
        Err(WeaveError::Interrupted(mut interrupt)) => {
            // An interrupt is a suspend, not a failure: skip attribution
            // and OnError, just stamp the raising node and propagate.
            interrupt.node.get_or_insert_with(|| node_name.to_string());
            return Err(WeaveError::Interrupted(interrupt));
        }
        Err(e) => {
            let attributed = e.in_node(node_name);
            crate::logging::log_node_error(node_name, &attributed);
            node_ctx.callbacks.dispatch_error(&node_ctx, node_name, &attributed).await;
            return Err(attributed);
        }
    };

    let output = match &node.post_handler {
        Some(h) => run_handler(h.clone(), &node_ctx, output).await?,
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
    crate::logging::log_node_complete(node_name);
    Ok(output)
}

/// Builds the initial per-node channel table: one [`Channel`] per node
/// (plus a virtual one for `END`), seeded with each node's declared
/// predecessor set.
pub(crate) fn init_channels<S>(graph: &CompiledGraph<S>) -> std::collections::HashMap<String, Channel> {
    let mut channels = std::collections::HashMap::new();
    for name in graph.node_names() {
        let preds: HashSet<String> = graph.edges_to(name).map(|e| e.from.clone()).collect();
        let trigger = graph
            .node_index(name)
            .map(|i| graph.node(i).trigger)
            .unwrap_or(crate::graph::node::TriggerMode::AllPredecessors);
        channels.insert(name.to_string(), Channel::new(preds, trigger));
    }
    let end_preds: HashSet<String> = graph.edges_to(END).map(|e| e.from.clone()).collect();
    channels.insert(
        END.to_string(),
        Channel::new(end_preds, crate::graph::node::TriggerMode::AnyPredecessor),
    );
    channels
}

/// Delivers `output` across every outgoing edge of `from`, resolving
/// `from`'s branch (if any) first and sending a [`Delivery::Skipped`]
/// signal down edges a branch didn't select, then enqueues any
/// successor whose channel just became ready.
pub(crate) fn route_output<S>(
    graph: &CompiledGraph<S>,
    channels: &mut std::collections::HashMap<String, Channel>,
    from: &str,
    output: Envelope,
    ready_queue: &mut VecDeque<String>,
) -> Result<(), WeaveError>
where
    S: Send + Sync + 'static,
{
    let targets: Vec<(String, EdgeKind)> = graph
        .edges_from(from)
        .map(|e| (e.to.clone(), e.kind))
        .collect();
    if targets.is_empty() {
        return Ok(());
    }

    let selected = match graph.branch_from(from) {
        Some(branch) => Some(branch.resolve(&output)?),
        None => None,
    };

    let data_targets = targets.iter().filter(|(_, k)| k.is_data).count();
    let mut copies = output.fanout(data_targets.max(1)).into_iter();

    for (to, kind) in &targets {
        let activated = selected.as_ref().map(|s| s.contains(to)).unwrap_or(true);
        let delivery = if !activated {
            Delivery::Skipped
        } else if kind.is_data {
            Delivery::Value(copies.next().expect("fanout produced enough copies"))
        } else {
            Delivery::Skipped
        };
        let channel = channels
            .get_mut(to)
            .ok_or_else(|| WeaveError::build(format!("unknown edge target '{to}'")))?;
        channel.deliver(from, delivery)?;
        if channel.is_ready() && !ready_queue.contains(to) {
            ready_queue.push_back(to.clone());
        }
    }
    Ok(())
}

/// Builds and persists a [`Checkpoint`] when one or more nodes interrupt
/// within the same superstep: captures the current state snapshot, the
/// nodes still waiting to fire (so resume knows what to re-enqueue), and
/// every raised interrupt keyed by its raising node's path, not just the
/// first. A run with no
/// configured [`crate::checkpoint::CheckpointStore`] still suspends, it
/// simply has nowhere to persist the checkpoint; callers resuming such a
/// run must have supplied their own state externally.
pub(crate) async fn checkpoint_on_interrupt<S>(
    ctx: &RunContext<S>,
    checkpoint_id: impl Into<String>,
    pending_nodes: Vec<String>,
    interrupts: Vec<Interrupt>,
) -> Result<(), WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    let Some(store) = ctx.checkpoint_store.as_ref() else {
        return Ok(());
    };
    let mut interrupts_by_node = std::collections::HashMap::new();
    for interrupt in interrupts {
        let node = interrupt.node.clone().unwrap_or_default();
        interrupts_by_node.insert(node, interrupt.value.clone());
    }
    let interrupts = interrupts_by_node;

    let checkpoint = Checkpoint {
        id: checkpoint_id.into(),
        run_id: ctx.run_info.run_id.to_string(),
        state: ctx.state.snapshot().await,
        pending_nodes,
        interrupts,
    };
    let id = checkpoint.id.clone();
    store.put(checkpoint).await?;
    crate::logging::log_checkpoint_saved(&id);
    Ok(())
}

/// Loads a suspended run's checkpoint, restores its state, and resolves
/// every outstanding interrupt back into a ready-to-run envelope for its
/// node. Only the nodes that actually raised an
/// interrupt are reconstructed this way: a sibling that was merely
/// queued (in `pending_nodes` but not `interrupts`) had no input
/// captured anywhere, so resume does not attempt to replay it — a
/// documented scope limit, not an oversight.
pub(crate) async fn load_resume<S>(
    graph: &CompiledGraph<S>,
    ctx: &RunContext<S>,
    checkpoint_id: &str,
) -> Result<Vec<(String, Envelope)>, WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    let store = ctx
        .checkpoint_store
        .as_ref()
        .ok_or_else(|| WeaveError::build("resume requested but no checkpoint store is configured"))?;
    let checkpoint = store.get(checkpoint_id).await?;
    crate::logging::log_checkpoint_loaded(checkpoint_id);
    ctx.state.replace(checkpoint.state).await;

    let handler = ctx
        .interrupt_handler
        .as_ref()
        .ok_or_else(|| WeaveError::build("resume requested but no interrupt handler is configured"))?;

    let mut resumed = Vec::new();
    for (node, value) in checkpoint.interrupts {
        let interrupt = Interrupt::new(value).with_node(node.clone());
        let answer = handler.resolve(&node, &interrupt)?;
        let idx = graph
            .node_index(&node)
            .ok_or_else(|| WeaveError::build(format!("resume: unknown node '{node}'")))?;
        let env = graph.node(idx).runnable.input_from_json(answer)?;
        resumed.push((node, env));
    }
    Ok(resumed)
}

pub(crate) fn drain_for(channels: &mut std::collections::HashMap<String, Channel>, node: &str) -> Vec<(String, Envelope)> {
    channels
        .get_mut(node)
        .map(|c| c.take_values())
        .unwrap_or_default()
}

pub(crate) fn compose<S>(
    graph: &CompiledGraph<S>,
    node: &str,
    deliveries: Vec<(String, Envelope)>,
) -> Result<Envelope, WeaveError> {
    compose_input(graph, node, deliveries)
}

/// Reduces a stream of [`Envelope`]s arriving at the graph boundary into a
/// single one, applying value/stream adaptation at the whole-graph
/// level: one item passes through unchanged, multiple value items of the
/// same type are merged via the run's concat registry, and streaming
/// items may not be merged with others.
pub(crate) async fn drain_envelope_stream<S>(
    ctx: &RunContext<S>,
    mut input: Stream<Envelope>,
) -> Result<Envelope, WeaveError> {
    let mut items = Vec::new();
    loop {
        match input.next().await {
            Next::Value(env) => items.push(env),
            Next::End => break,
            Next::Error(e) => return Err(e),
        }
    }
    if items.len() == 1 {
        return Ok(items.pop().expect("checked len == 1"));
    }
    if items.is_empty() {
        return Err(WeaveError::build("graph received an empty input stream"));
    }
    if items.iter().any(|e| e.is_stream()) {
        return Err(WeaveError::InvalidUpdate(
            "cannot merge multiple streaming envelopes at the graph boundary".to_string(),
        ));
    }
    let tag = items[0].type_tag().clone();
    let to_json = items[0]
        .to_json_fn()
        .expect("already checked no item is a stream");
    let boxed: Vec<_> = items
        .into_iter()
        .map(|e| e.as_value_erased())
        .collect::<Result<Vec<_>, _>>()?;
    let merged = ctx.concat.concat_erased(tag.id(), tag.name(), boxed)?;
    Ok(Envelope::from_erased_value(merged, tag, to_json))
}
