//! Branch resolution.
//!
//! Generalizes a single-target conditional router to a subset-selecting
//! one: a branch's condition inspects the envelope flowing out of its
//! source node and returns the set of declared targets to activate this
//! step. Every other declared target receives an explicit "not selected"
//! signal so downstream `AnyPredecessor` nodes don't wait forever on a
//! predecessor that will never fire.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::WeaveError;
use crate::value::Envelope;

pub type BranchFn = Arc<dyn Fn(&Envelope) -> HashSet<String> + Send + Sync>;

pub(crate) struct BranchDef {
    pub source: String,
    pub condition: BranchFn,
    pub allowed: HashSet<String>,
}

impl BranchDef {
    pub fn new(source: impl Into<String>, allowed: HashSet<String>, condition: BranchFn) -> Self {
        BranchDef {
            source: source.into(),
            allowed,
            condition,
        }
    }

    /// Evaluates the condition against `output` and validates the result
    /// against the declared target set: selecting a target outside that
    /// set, or selecting nothing at all, is a fatal error rather than a
    /// silent no-op.
    pub fn resolve(&self, output: &Envelope) -> Result<HashSet<String>, WeaveError> {
        let selected = (self.condition)(output);
        if selected.is_empty() {
            return Err(WeaveError::EmptyBranchSelection(self.source.clone()));
        }
        for target in &selected {
            if !self.allowed.contains(target) {
                return Err(WeaveError::UndeclaredBranchTarget {
                    node: self.source.clone(),
                    target: target.clone(),
                });
            }
        }
        Ok(selected)
    }

    /// Targets declared but not selected this step — these deliver a
    /// "skipped" signal rather than a value so `AnyPredecessor` fan-in
    /// doesn't stall waiting on a predecessor that will never fire.
    pub fn skipped(&self, selected: &HashSet<String>) -> HashSet<String> {
        self.allowed.difference(selected).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch() -> BranchDef {
        let allowed: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        BranchDef::new(
            "router",
            allowed,
            Arc::new(|env: &Envelope| {
                let v = env.as_value::<i32>().unwrap();
                if v > 0 {
                    ["a".to_string()].into_iter().collect()
                } else {
                    ["b".to_string()].into_iter().collect()
                }
            }),
        )
    }

    #[test]
    fn resolve_selects_declared_target() {
        let b = branch();
        let out = b.resolve(&Envelope::from_value(1i32)).unwrap();
        assert_eq!(out, ["a".to_string()].into_iter().collect());
    }

    #[test]
    fn skipped_is_complement_of_selected() {
        let b = branch();
        let selected = b.resolve(&Envelope::from_value(1i32)).unwrap();
        let skipped = b.skipped(&selected);
        assert_eq!(skipped, ["b".to_string()].into_iter().collect());
    }

    #[test]
    fn empty_selection_is_fatal() {
        let allowed: HashSet<String> = ["a".to_string()].into_iter().collect();
        let b = BranchDef::new("router", allowed, Arc::new(|_: &Envelope| HashSet::new()));
        let err = b.resolve(&Envelope::from_value(1i32)).unwrap_err();
        assert!(matches!(err, WeaveError::EmptyBranchSelection(_)));
    }

    #[test]
    fn undeclared_target_is_fatal() {
        let allowed: HashSet<String> = ["a".to_string()].into_iter().collect();
        let b = BranchDef::new(
            "router",
            allowed,
            Arc::new(|_: &Envelope| ["z".to_string()].into_iter().collect()),
        );
        let err = b.resolve(&Envelope::from_value(1i32)).unwrap_err();
        assert!(matches!(err, WeaveError::UndeclaredBranchTarget { .. }));
    }
}
