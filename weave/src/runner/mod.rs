//! Graph-level entry points (`invoke`/`stream`/`collect`/`transform`):
//! dispatches to the [`dag`] or [`pregel`] runner per the graph's
//! compiled [`crate::graph::builder::ExecutionMode`].

pub mod dag;
pub mod pregel;

use crate::context::RunContext;
use crate::error::WeaveError;
use crate::graph::builder::{CompiledGraph, ExecutionMode};
use crate::stream::Stream;
use crate::value::Envelope;

pub async fn invoke<S>(graph: &CompiledGraph<S>, ctx: RunContext<S>, input: Envelope) -> Result<Envelope, WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    match graph.options().mode {
        ExecutionMode::Dag => dag::invoke(graph, ctx, input).await,
        ExecutionMode::Pregel => pregel::invoke(graph, ctx, input).await,
    }
}

pub async fn stream<S>(graph: &CompiledGraph<S>, ctx: RunContext<S>, input: Envelope) -> Result<Envelope, WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    match graph.options().mode {
        ExecutionMode::Dag => dag::stream(graph, ctx, input).await,
        ExecutionMode::Pregel => pregel::stream(graph, ctx, input).await,
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
    match graph.options().mode {
        ExecutionMode::Dag => dag::collect(graph, ctx, input).await,
        ExecutionMode::Pregel => pregel::collect(graph, ctx, input).await,
    }
}

pub async fn transform<S>(
    graph: &CompiledGraph<S>,
    ctx: RunContext<S>,
    input: Stream<Envelope>,
) -> Result<Envelope, WeaveError>
where
    S: Clone + Send + Sync + 'static,
{
    match graph.options().mode {
        ExecutionMode::Dag => dag::transform(graph, ctx, input).await,
        ExecutionMode::Pregel => pregel::transform(graph, ctx, input).await,
    }
}
