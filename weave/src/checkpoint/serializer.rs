//! Pluggable checkpoint encoding: checkpoints are written through a
//! user-supplied serializer rather than a hardcoded format, grounded on
//! the teacher's `memory::serializer::Serializer`/`JsonSerializer` (JSON
//! in, JSON out, with a `CheckpointError::Serialization`-style error on a
//! malformed payload). [`crate::checkpoint::MemoryCheckpointStore`]
//! encodes through this trait rather than keeping typed state in memory
//! directly, so the serialization boundary is real.

use crate::error::WeaveError;

/// Encodes/decodes a checkpoint's serializable state to bytes for
/// storage. Implementors typically wrap `serde_json` or `bincode`.
pub trait Serializer: Send + Sync {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, WeaveError>;
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, WeaveError>;
}

/// The default serializer: plain JSON bytes, human-inspectable and
/// adequate for the in-memory store and most external ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, WeaveError> {
        serde_json::to_vec(value).map_err(|e| WeaveError::SerializationFailed(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, WeaveError> {
        serde_json::from_slice(bytes).map_err(|e| WeaveError::SerializationFailed(e.to_string()))
    }
}
