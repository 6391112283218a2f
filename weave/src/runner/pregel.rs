//! Pregel execution discipline: nodes execute in lockstep supersteps. A
//! node re-fires in a later superstep if new deliveries arrive for it; the
//! run ends once a superstep produces no further deliveries (quiescence)
//! or the configured step limit is hit.
//!
//! Every node whose channel is ready at the start of a superstep runs
//! concurrently against the others; none of their outputs are applied to
//! `channels` until the whole superstep's batch has finished, so a sibling
//! can never observe a delivery made earlier in the same superstep.
//!
//! Unlike [`crate::runner::dag`], a node here has no "already ran" gate —
//! cycles are expected and are exactly how iterative agent loops (a
//! planner re-invoking itself until some condition trips a branch toward
//! `END`) are expressed.

use std::collections::VecDeque;

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

async fn run<S>(graph: &CompiledGraph<S>, ctx: RunContext<S>, input: Envelope) -> Result<Envelope, WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    let mut channels = init_channels(graph);
    let mut frontier: VecDeque<String> = VecDeque::new();

    if let Some(resume) = ctx.resume.clone() {
        let resumed = load_resume(graph, &ctx, &resume.checkpoint_id).await?;
        for (node, env) in resumed {
            let output = execute_node(graph, &ctx, &node, env).await?;
            route_output(graph, &mut channels, &node, output, &mut frontier)?;
        }
    } else {
        route_output(graph, &mut channels, START, input, &mut frontier)?;
    }

    let mut superstep = 0usize;
    let mut final_output: Option<Envelope> = None;

    while !frontier.is_empty() {
        superstep += 1;
        if superstep > graph.options().step_limit {
            return Err(WeaveError::StepLimitExceeded(superstep));
        }
        if ctx.is_cancelled() {
            return Err(WeaveError::Cancelled);
        }

        let active: Vec<String> = frontier.into_iter().collect();
        crate::logging::log_superstep(superstep, active.len());
        let mut next_frontier = VecDeque::new();

        let mut runnable: Vec<(String, Envelope)> = Vec::new();
        for name in &active {
            if *name == END {
                if let Some((_, env)) = drain_for(&mut channels, END).into_iter().next() {
                    final_output = Some(env);
                }
                continue;
            }
            let deliveries = drain_for(&mut channels, name);
            if deliveries.is_empty() {
                continue;
            }
            let composed = compose(graph, name, deliveries)?;
            runnable.push((name.clone(), composed));
        }

        // Every node in this superstep runs to completion before any of
        // their outputs reach `channels`, so a sibling started in the
        // same batch can't observe another's delivery mid-superstep.
        let outcomes = join_all(runnable.into_iter().map(|(name, input)| {
            let ctx = &ctx;
            async move {
                let result = execute_node(graph, ctx, &name, input).await;
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
            route_output(graph, &mut channels, &name, output, &mut next_frontier)?;
        }

        frontier = next_frontier;
    }

    final_output.ok_or_else(|| WeaveError::build("graph reached quiescence without delivering to END"))
}

pub async fn invoke<S>(graph: &CompiledGraph<S>, ctx: RunContext<S>, input: Envelope) -> Result<Envelope, WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    crate::logging::log_run_start(&ctx.run_info.run_id, "pregel");
    let result = run(graph, ctx.clone(), input).await;
    log_run_outcome(&ctx, &result);
    result
}

pub async fn stream<S>(graph: &CompiledGraph<S>, ctx: RunContext<S>, input: Envelope) -> Result<Envelope, WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    // Superstep scheduling has no single "last node before END" the way
    // a DAG does when a node can re-fire, so Pregel mode always collapses
    // to a value internally and wraps the final result as a one-element
    // stream on the way out.
    crate::logging::log_run_start(&ctx.run_info.run_id, "pregel");
    let result = run(graph, ctx.clone(), input).await;
    log_run_outcome(&ctx, &result);
    Ok(result?.into_singleton_stream())
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
