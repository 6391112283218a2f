//! Logging utilities for graph execution (ambient, grounded on the
//! teacher's `graph::logging` functions).
//!
//! Provides structured logging for graph/run start and completion, node
//! execution start/complete, state updates, superstep boundaries, and
//! checkpoint save/load — called from [`crate::task_manager`] and the two
//! runners rather than inlined at every call site.

use crate::error::WeaveError;

pub fn log_run_start(run_id: &str, mode: &str) {
    tracing::info!(run_id, mode, "starting graph run");
}

pub fn log_run_complete(run_id: &str) {
    tracing::info!(run_id, "graph run complete");
}

pub fn log_run_error(run_id: &str, error: &WeaveError) {
    tracing::error!(run_id, %error, "graph run failed");
}

pub fn log_node_start(node_id: &str) {
    tracing::debug!(node_id, "starting node execution");
}

pub fn log_node_complete(node_id: &str) {
    tracing::debug!(node_id, "node execution complete");
}

pub fn log_node_error(node_id: &str, error: &WeaveError) {
    tracing::warn!(node_id, %error, "node execution failed");
}

pub fn log_superstep(superstep: usize, frontier_size: usize) {
    tracing::debug!(superstep, frontier_size, "pregel superstep");
}

pub fn log_checkpoint_saved(checkpoint_id: &str) {
    tracing::info!(checkpoint_id, "checkpoint saved");
}

pub fn log_checkpoint_loaded(checkpoint_id: &str) {
    tracing::info!(checkpoint_id, "checkpoint loaded for resume");
}
