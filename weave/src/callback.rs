//! Callback surface: `OnStart`/`OnEnd`/`OnError` and their streaming
//! variants, wired around every node. Grounded on the teacher's
//! `NodeMiddleware::around_run` (a single around-wrapper) generalized into
//! five named hooks, with the same "swallow and log" discipline the
//! teacher's `LoggingNodeMiddleware` already follows.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::RunContext;
use crate::error::WeaveError;
use crate::value::{AnyBox, Envelope};

/// Identifies one of the five hooks, used by [`Callback::wants`] to let a
/// handler declare a timing-filter so the dispatcher can skip building
/// arguments it doesn't need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Start,
    End,
    Error,
    StartStreamInput,
    EndStreamOutput,
}

/// Implement any subset; unimplemented hooks default to no-ops. A handler
/// returning `Err` from a hook never affects the primary run outcome — the
/// dispatcher logs it and moves on.
#[async_trait]
pub trait Callback<S>: Send + Sync {
    fn wants(&self, _hook: Hook) -> bool {
        true
    }

    async fn on_start(
        &self,
        _ctx: &RunContext<S>,
        _node: &str,
        _input: &Envelope,
    ) -> Result<(), WeaveError> {
        Ok(())
    }

    async fn on_end(
        &self,
        _ctx: &RunContext<S>,
        _node: &str,
        _output: &Envelope,
    ) -> Result<(), WeaveError> {
        Ok(())
    }

    async fn on_error(
        &self,
        _ctx: &RunContext<S>,
        _node: &str,
        _err: &WeaveError,
    ) -> Result<(), WeaveError> {
        Ok(())
    }

    /// A copy of the stream is handed here so callbacks can observe
    /// streaming input without consuming the production path.
    async fn on_start_with_stream_input(
        &self,
        _ctx: &RunContext<S>,
        _node: &str,
        _copy: crate::stream::Stream<AnyBox>,
    ) -> Result<(), WeaveError> {
        Ok(())
    }

    async fn on_end_with_stream_output(
        &self,
        _ctx: &RunContext<S>,
        _node: &str,
        _copy: crate::stream::Stream<AnyBox>,
    ) -> Result<(), WeaveError> {
        Ok(())
    }
}

/// An ordered, append-only list of handlers, dispatched in registration
/// order. Built once at compile/invocation time.
pub struct CallbackChain<S> {
    handlers: Arc<Vec<Arc<dyn Callback<S>>>>,
}

impl<S> Clone for CallbackChain<S> {
    fn clone(&self) -> Self {
        CallbackChain {
            handlers: self.handlers.clone(),
        }
    }
}

impl<S: Send + Sync + 'static> CallbackChain<S> {
    pub fn new(handlers: Vec<Arc<dyn Callback<S>>>) -> Self {
        CallbackChain {
            handlers: Arc::new(handlers),
        }
    }

    pub fn empty() -> Self {
        CallbackChain {
            handlers: Arc::new(Vec::new()),
        }
    }

    pub fn merged_with(&self, extra: Vec<Arc<dyn Callback<S>>>) -> Self {
        let mut all = (*self.handlers).clone();
        all.extend(extra);
        CallbackChain::new(all)
    }

    pub async fn dispatch_start(&self, ctx: &RunContext<S>, node: &str, input: &Envelope) {
        for h in self.handlers.iter().filter(|h| h.wants(Hook::Start)) {
            if let Err(e) = h.on_start(ctx, node, input).await {
                tracing::warn!(node, error = %e, "OnStart callback failed, swallowed");
            }
        }
    }

    pub async fn dispatch_end(&self, ctx: &RunContext<S>, node: &str, output: &Envelope) {
        for h in self.handlers.iter().filter(|h| h.wants(Hook::End)) {
            if let Err(e) = h.on_end(ctx, node, output).await {
                tracing::warn!(node, error = %e, "OnEnd callback failed, swallowed");
            }
        }
    }

    pub async fn dispatch_error(&self, ctx: &RunContext<S>, node: &str, err: &WeaveError) {
        for h in self.handlers.iter().filter(|h| h.wants(Hook::Error)) {
            if let Err(e) = h.on_error(ctx, node, err).await {
                tracing::warn!(node, error = %e, "OnError callback failed, swallowed");
            }
        }
    }

    pub async fn dispatch_start_stream_input(
        &self,
        ctx: &RunContext<S>,
        node: &str,
        source: crate::stream::Stream<AnyBox>,
    ) -> crate::stream::Stream<AnyBox> {
        let watchers: Vec<_> = self
            .handlers
            .iter()
            .filter(|h| h.wants(Hook::StartStreamInput))
            .cloned()
            .collect();
        if watchers.is_empty() {
            return source;
        }
        let mut copies = source.copy(watchers.len() + 1);
        let production = copies.pop().expect("copy returns requested count");
        for (handler, copy) in watchers.into_iter().zip(copies.into_iter()) {
            let ctx = ctx.clone();
            let node = node.to_string();
            tokio::spawn(async move {
                if let Err(e) = handler.on_start_with_stream_input(&ctx, &node, copy).await {
                    tracing::warn!(node, error = %e, "OnStartWithStreamInput callback failed, swallowed");
                }
            });
        }
        production
    }

    pub async fn dispatch_end_stream_output(
        &self,
        ctx: &RunContext<S>,
        node: &str,
        source: crate::stream::Stream<AnyBox>,
    ) -> crate::stream::Stream<AnyBox> {
        let watchers: Vec<_> = self
            .handlers
            .iter()
            .filter(|h| h.wants(Hook::EndStreamOutput))
            .cloned()
            .collect();
        if watchers.is_empty() {
            return source;
        }
        let mut copies = source.copy(watchers.len() + 1);
        let production = copies.pop().expect("copy returns requested count");
        for (handler, copy) in watchers.into_iter().zip(copies.into_iter()) {
            let ctx = ctx.clone();
            let node = node.to_string();
            tokio::spawn(async move {
                if let Err(e) = handler.on_end_with_stream_output(&ctx, &node, copy).await {
                    tracing::warn!(node, error = %e, "OnEndWithStreamOutput callback failed, swallowed");
                }
            });
        }
        production
    }
}
