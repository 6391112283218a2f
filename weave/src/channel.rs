//! Per-node channel/aggregator: collects deliveries from a node's
//! declared predecessors, decides readiness per [`TriggerMode`], and
//! composes the final input envelope by applying each incoming edge's
//! field mappings.
//!
//! Grounded on the teacher's named-barrier channel (seen-set bookkeeping
//! per predecessor), extended here to also carry the delivered payload
//! rather than a bare presence flag, since this engine's edges move data
//! as well as control.

use std::collections::{HashMap, HashSet};

use crate::error::WeaveError;
use crate::graph::builder::{CompiledGraph, START};
use crate::graph::edge::FieldMapping;
use crate::graph::node::TriggerMode;
use crate::value::Envelope;

/// What a predecessor delivered this step.
pub(crate) enum Delivery {
    Value(Envelope),
    /// The predecessor ran but a branch chose not to activate this edge:
    /// recorded so `AllPredecessors` fan-in doesn't wait forever on an
    /// edge that will never carry a value.
    Skipped,
}

/// Tracks one node's incoming slots across a single step/superstep.
pub(crate) struct Channel {
    predecessors: HashSet<String>,
    trigger: TriggerMode,
    slots: HashMap<String, Delivery>,
    /// Set once an `AnyPredecessor` channel has accepted its first value
    /// delivery this step, so later deliveries can be dropped rather than
    /// silently overwriting the winner: `AnyPredecessor` is
    /// first-delivery-wins.
    fired: bool,
}

impl Channel {
    pub fn new(predecessors: HashSet<String>, trigger: TriggerMode) -> Self {
        Channel {
            predecessors,
            trigger,
            slots: HashMap::new(),
            fired: false,
        }
    }

    /// Records a delivery from `from`. Rejects deliveries from
    /// predecessors the node doesn't declare. For an `AnyPredecessor`
    /// channel that has already fired, a further value delivery is
    /// dropped with a warning instead of being recorded.
    pub fn deliver(&mut self, from: &str, delivery: Delivery) -> Result<(), WeaveError> {
        if !self.predecessors.contains(from) {
            return Err(WeaveError::InvalidUpdate(format!(
                "delivery from undeclared predecessor '{from}'"
            )));
        }
        if self.trigger == TriggerMode::AnyPredecessor && self.fired {
            if matches!(delivery, Delivery::Value(_)) {
                tracing::warn!(from, "dropping delivery to an already-fired AnyPredecessor channel");
            }
            return Ok(());
        }
        if self.trigger == TriggerMode::AnyPredecessor && matches!(delivery, Delivery::Value(_)) {
            self.fired = true;
        }
        self.slots.insert(from.to_string(), delivery);
        Ok(())
    }

    fn all_slots_filled(&self) -> bool {
        self.predecessors.iter().all(|p| self.slots.contains_key(p))
    }

    fn any_value_delivered(&self) -> bool {
        self.slots.values().any(|d| matches!(d, Delivery::Value(_)))
    }

    /// Whether the node may fire. `AllPredecessors` requires every
    /// declared predecessor to have resolved (value or skip) and at least
    /// one real value, since a channel where every predecessor skipped
    /// never fires. `AnyPredecessor` fires as soon as a single value has
    /// been delivered, without waiting on the rest.
    pub fn is_ready(&self) -> bool {
        match self.trigger {
            TriggerMode::AllPredecessors => self.all_slots_filled() && self.any_value_delivered(),
            TriggerMode::AnyPredecessor => self.any_value_delivered(),
        }
    }

    /// Drains delivered values (not skips) for input composition and
    /// clears this channel's slots for the next step.
    pub fn take_values(&mut self) -> Vec<(String, Envelope)> {
        self.fired = false;
        let slots = std::mem::take(&mut self.slots);
        slots
            .into_iter()
            .filter_map(|(from, d)| match d {
                Delivery::Value(env) => Some((from, env)),
                Delivery::Skipped => None,
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.slots.clear();
        self.fired = false;
    }
}

/// Composes a node's final input envelope from its predecessor deliveries
/// by applying each incoming edge's field mappings (whole mappings
/// replace, keyed mappings merge into an object).
///
/// Streaming deliveries bypass field-mapping composition and pass
/// through directly: a node with exactly one predecessor delivering a
/// stream receives that stream unchanged, so data flows node-to-node
/// without the JSON bridge whenever a genuine stream is in play.
pub(crate) fn compose_input<S>(
    graph: &CompiledGraph<S>,
    node_name: &str,
    deliveries: Vec<(String, Envelope)>,
) -> Result<Envelope, WeaveError> {
    if deliveries.len() == 1 && deliveries[0].1.is_stream() {
        return Ok(deliveries.into_iter().next().expect("len == 1").1);
    }

    let mut composed = serde_json::Value::Null;
    let mut produced_any = false;

    for (from, env) in deliveries {
        if env.is_stream() {
            return Err(WeaveError::InvalidUpdate(format!(
                "node '{node_name}' received a stream delivery from '{from}' alongside other predecessors; streaming fan-in requires a single predecessor"
            )));
        }
        // `START` is a virtual predecessor with no node/runnable of its own,
        // so it has no `output_to_json` to ask; the envelope carries its
        // own JSON conversion instead.
        let as_json = if from == START {
            env.to_json()?
        } else {
            let src_idx = graph.node_index(&from).ok_or_else(|| {
                WeaveError::InvalidUpdate(format!("unknown predecessor '{from}' delivering to '{node_name}'"))
            })?;
            let src_runnable = &graph.node(src_idx).runnable;
            src_runnable.output_to_json(&env)?
        };

        let edge = graph
            .edges_to(node_name)
            .find(|e| e.from == from)
            .ok_or_else(|| WeaveError::InvalidUpdate(format!("no edge from '{from}' to '{node_name}'")))?;

        let whole = FieldMapping::whole();
        let owned_mappings;
        let mappings: &[FieldMapping] = if edge.mappings.is_empty() {
            owned_mappings = [whole];
            &owned_mappings
        } else {
            &edge.mappings
        };
        for mapping in mappings {
            let extracted = mapping.extract(&as_json)?;
            mapping.assign(&mut composed, extracted)?;
            produced_any = true;
        }
    }

    if !produced_any {
        composed = serde_json::Value::Null;
    }

    let dst_idx = graph
        .node_index(node_name)
        .ok_or_else(|| WeaveError::InvalidUpdate(format!("unknown node '{node_name}'")))?;
    graph.node(dst_idx).runnable.input_from_json(composed)
}
