//! Pre/post handlers: state-bearing wrappers injected around each node's
//! `runnable.method` call.
//!
//! Handlers run synchronously inside [`crate::state::StateManager::process_state`]
//! so "under the state mutex" is literal: the mutex is held for exactly the
//! duration of the handler body, with no `.await` in between, which keeps
//! `process_state` calls trivially totally ordered without needing to
//! hold an async lock guard across arbitrary user code.

use std::sync::Arc;

use crate::context::RunContext;
use crate::error::WeaveError;
use crate::value::Envelope;

/// A pre- or post-handler: inspects/rewrites the payload flowing into or
/// out of a node, with synchronous access to the shared user state.
pub trait Handler<S>: Send + Sync {
    fn call(&self, ctx: &RunContext<S>, payload: &Envelope, state: &mut S) -> Result<Envelope, WeaveError>;
}

/// Runs `handler` under the state mutex and returns its rewritten payload.
pub async fn run_handler<S: Send + 'static>(
    handler: Arc<dyn Handler<S>>,
    ctx: &RunContext<S>,
    payload: Envelope,
) -> Result<Envelope, WeaveError> {
    let ctx_for_handler = ctx.clone();
    ctx.state
        .process_state(move |s| handler.call(&ctx_for_handler, &payload, s))
        .await
}

/// Builds a [`Handler`] from a plain closure, the common case.
pub fn from_fn<S, F>(f: F) -> Arc<dyn Handler<S>>
where
    S: Send + 'static,
    F: Fn(&RunContext<S>, &Envelope, &mut S) -> Result<Envelope, WeaveError> + Send + Sync + 'static,
{
    struct FnHandler<F>(F);
    impl<S, F> Handler<S> for FnHandler<F>
    where
        F: Fn(&RunContext<S>, &Envelope, &mut S) -> Result<Envelope, WeaveError> + Send + Sync,
    {
        fn call(&self, ctx: &RunContext<S>, payload: &Envelope, state: &mut S) -> Result<Envelope, WeaveError> {
            (self.0)(ctx, payload, state)
        }
    }
    Arc::new(FnHandler(f))
}
