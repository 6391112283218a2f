//! Edge model and field-mapping type checker.
//!
//! Structural field access needs some concrete representation of "a field
//! existing in the structural type at an endpoint." Since node payloads
//! already have to be (de)serializable for checkpointing, this
//! implementation reuses that same JSON representation for field paths:
//! a path is a sequence of object keys (or array indices) walked through
//! `serde_json::Value`. This keeps the type checker's job concrete without
//! adding a second reflection mechanism.

use std::sync::Arc;

use crate::error::WeaveError;

/// A transformer applied to the value extracted by a [`FieldMapping`]'s
/// `from_path`. Operates on the JSON representation, matching
/// [`crate::runnable::ErasedRunnable::output_to_json`]'s bridge.
pub type Transformer = Arc<dyn Fn(serde_json::Value) -> Result<serde_json::Value, WeaveError> + Send + Sync>;

/// `(from-path -> to-path [+ transformer])`.
#[derive(Clone)]
pub struct FieldMapping {
    pub from_path: Vec<String>,
    pub to_path: Vec<String>,
    pub transformer: Option<Transformer>,
}

impl FieldMapping {
    /// Whole-source-to-whole-target (no paths).
    pub fn whole() -> Self {
        FieldMapping {
            from_path: Vec::new(),
            to_path: Vec::new(),
            transformer: None,
        }
    }

    pub fn keyed(from_path: impl Into<PathSpec>, to_path: impl Into<PathSpec>) -> Self {
        FieldMapping {
            from_path: from_path.into().0,
            to_path: to_path.into().0,
            transformer: None,
        }
    }

    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformer = transformer.into();
        self
    }

    /// Extracts the source field (or the whole value if `from_path` is
    /// empty) and runs the transformer if present.
    pub fn extract(&self, source: &serde_json::Value) -> Result<serde_json::Value, WeaveError> {
        let extracted = get_path(source, &self.from_path)?;
        match &self.transformer {
            Some(t) => t(extracted),
            None => Ok(extracted),
        }
    }

    /// Assigns the mapped value into `target` at `to_path` (whole value if
    /// empty). Multiple mappings targeting the same destination accumulate
    /// into the same `target` object rather than overwriting it.
    pub fn assign(&self, target: &mut serde_json::Value, value: serde_json::Value) -> Result<(), WeaveError> {
        set_path(target, &self.to_path, value)
    }
}

/// Accepts either `Vec<String>` or a single dotted string ("a.b.c") for
/// ergonomic call sites.
pub struct PathSpec(pub Vec<String>);

impl From<Vec<String>> for PathSpec {
    fn from(v: Vec<String>) -> Self {
        PathSpec(v)
    }
}
impl From<&str> for PathSpec {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            PathSpec(Vec::new())
        } else {
            PathSpec(s.split('.').map(|p| p.to_string()).collect())
        }
    }
}
impl From<Vec<&str>> for PathSpec {
    fn from(v: Vec<&str>) -> Self {
        PathSpec(v.into_iter().map(|p| p.to_string()).collect())
    }
}

pub(crate) fn get_path(value: &serde_json::Value, path: &[String]) -> Result<serde_json::Value, WeaveError> {
    let mut current = value;
    for key in path {
        current = current.get(key).ok_or_else(|| {
            WeaveError::TypeMismatch {
                from: String::new(),
                to: String::new(),
                from_path: path.to_vec(),
                to_path: Vec::new(),
                detail: format!("path segment '{key}' not found"),
            }
        })?;
    }
    Ok(current.clone())
}

pub(crate) fn set_path(
    target: &mut serde_json::Value,
    path: &[String],
    value: serde_json::Value,
) -> Result<(), WeaveError> {
    if path.is_empty() {
        *target = value;
        return Ok(());
    }
    if !target.is_object() {
        *target = serde_json::Value::Object(Default::default());
    }
    let mut current = target;
    for key in &path[..path.len() - 1] {
        let obj = current
            .as_object_mut()
            .expect("current is always kept an object by construction");
        current = obj
            .entry(key.clone())
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        if !current.is_object() {
            *current = serde_json::Value::Object(Default::default());
        }
    }
    let last = path.last().expect("checked non-empty above");
    current
        .as_object_mut()
        .expect("current is always kept an object by construction")
        .insert(last.clone(), value);
    Ok(())
}

/// Whether `is_control`/`is_data` are set for an edge; at least one should
/// be true for the edge to do anything. An edge carrying only field
/// mappings is implicitly a data edge that also gates readiness.
#[derive(Debug, Clone, Copy)]
pub struct EdgeKind {
    pub is_control: bool,
    pub is_data: bool,
}

impl EdgeKind {
    pub fn data() -> Self {
        EdgeKind {
            is_control: false,
            is_data: true,
        }
    }
    pub fn control() -> Self {
        EdgeKind {
            is_control: true,
            is_data: false,
        }
    }
    pub fn both() -> Self {
        EdgeKind {
            is_control: true,
            is_data: true,
        }
    }
}

pub(crate) struct EdgeDef {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    pub mappings: Vec<FieldMapping>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_path_walks_nested_object() {
        let v = json!({"a": {"b": 3}});
        let out = get_path(&v, &["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(out, json!(3));
    }

    #[test]
    fn get_path_empty_returns_whole_value() {
        let v = json!({"x": 1});
        let out = get_path(&v, &[]).unwrap();
        assert_eq!(out, v);
    }

    #[test]
    fn set_path_builds_intermediate_objects() {
        let mut target = json!({});
        set_path(&mut target, &["a".to_string(), "b".to_string()], json!(5)).unwrap();
        assert_eq!(target, json!({"a": {"b": 5}}));
    }

    #[test]
    fn multiple_mappings_accumulate_into_same_target() {
        let mut target = json!({});
        let m1 = FieldMapping::keyed("", "a");
        let m2 = FieldMapping::keyed("", "b");
        m1.assign(&mut target, json!(1)).unwrap();
        m2.assign(&mut target, json!(2)).unwrap();
        assert_eq!(target, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn transformer_runs_on_extracted_value() {
        let m = FieldMapping::keyed("n", "").with_transformer(Arc::new(|v: serde_json::Value| {
            Ok(json!(v.as_i64().unwrap() * 2))
        }));
        let out = m.extract(&json!({"n": 21})).unwrap();
        assert_eq!(out, json!(42));
    }
}
