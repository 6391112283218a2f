//! Checkpoint & resume.
//!
//! A `Checkpoint<S>` captures enough of a suspended run to resume it
//! later: the user state, which nodes were waiting to fire, and every
//! outstanding interrupt keyed by the node path that raised it — every
//! interrupt raised concurrently within a superstep/wave is captured, not
//! just the first one observed. Grounded on the teacher's
//! `Checkpointer<S>::put`/`get_tuple` and `MemorySaver`.

pub mod serializer;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::checkpoint::serializer::{JsonSerializer, Serializer};
use crate::error::WeaveError;

/// A suspended run's full resumable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    pub id: String,
    pub run_id: String,
    pub state: S,
    /// Nodes whose channel was ready (or which were themselves the
    /// source of an interrupt) when the run suspended.
    pub pending_nodes: Vec<String>,
    /// Every outstanding interrupt, keyed by the node path that raised
    /// it.
    pub interrupts: HashMap<String, serde_json::Value>,
}

/// Storage for checkpoints, keyed by id.
#[async_trait::async_trait]
pub trait CheckpointStore<S>: Send + Sync
where
    S: Send + Sync + 'static,
{
    async fn put(&self, checkpoint: Checkpoint<S>) -> Result<(), WeaveError>;
    async fn get(&self, id: &str) -> Result<Checkpoint<S>, WeaveError>;
}

/// An in-memory [`CheckpointStore`], grounded on the teacher's
/// `MemorySaver`. Round-trips every checkpoint through a
/// [`Serializer`] into bytes before storing it, the way a real
/// persistent store (a file, a row in a database) would have to — the
/// in-process `HashMap` just stands in for that durable backend so tests
/// don't need one, but the serialization boundary stays real rather than
/// bypassed. Nothing here is durable across restarts.
pub struct MemoryCheckpointStore<S> {
    serializer: Arc<dyn Serializer>,
    bytes: Mutex<HashMap<String, Vec<u8>>>,
    _marker: std::marker::PhantomData<fn() -> S>,
}

impl<S> Default for MemoryCheckpointStore<S> {
    fn default() -> Self {
        MemoryCheckpointStore {
            serializer: Arc::new(JsonSerializer),
            bytes: Mutex::new(HashMap::new()),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<S> MemoryCheckpointStore<S> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_serializer(serializer: Arc<dyn Serializer>) -> Arc<Self> {
        Arc::new(MemoryCheckpointStore {
            serializer,
            bytes: Mutex::new(HashMap::new()),
            _marker: std::marker::PhantomData,
        })
    }
}

#[async_trait::async_trait]
impl<S> CheckpointStore<S> for MemoryCheckpointStore<S>
where
    S: Clone + Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static,
{
    async fn put(&self, checkpoint: Checkpoint<S>) -> Result<(), WeaveError> {
        let value = serde_json::to_value(&checkpoint).map_err(|e| WeaveError::SerializationFailed(e.to_string()))?;
        let bytes = self.serializer.encode(&value)?;
        self.bytes.lock().await.insert(checkpoint.id.clone(), bytes);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Checkpoint<S>, WeaveError> {
        let bytes = self
            .bytes
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| WeaveError::CheckpointNotFound(id.to_string()))?;
        let value = self.serializer.decode(&bytes)?;
        serde_json::from_value(value).map_err(|e| WeaveError::SerializationFailed(e.to_string()))
    }
}
