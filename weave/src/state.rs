//! State manager: a thread-safe wrapper around an optional user value,
//! with `process_state` as the only access path.

use std::sync::Arc;
use tokio::sync::Mutex;

/// A value behind a mutex. Cloning shares the same mutex, so a
/// `StateManager` can be handed to every node and subgraph in a run and
/// stays shared across the whole run unless a subgraph declares its own
/// generator.
pub struct StateManager<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for StateManager<S> {
    fn clone(&self) -> Self {
        StateManager {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Send + 'static> StateManager<S> {
    pub fn new(initial: S) -> Self {
        StateManager {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    /// The sole external API: acquires the mutex, invokes `f(state)`,
    /// releases. Every pair of calls is totally ordered.
    pub async fn process_state<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut S) -> R + Send,
    {
        let mut guard = self.inner.lock().await;
        f(&mut guard)
    }

    pub async fn snapshot(&self) -> S
    where
        S: Clone,
    {
        self.inner.lock().await.clone()
    }

    pub async fn replace(&self, new: S) {
        *self.inner.lock().await = new;
    }
}
