//! Attribute paths into structured values.
//!
//! A path is a sequence of steps from the root of a resource value down to a
//! single position. Paths compare structurally; their [`Display`](fmt::Display)
//! form is the lexical key used when sorting requires-replace paths.

use std::fmt;

use crate::value::Value;

/// A single step within an [`AttributePath`].
#[derive(Debug, Clone, PartialEq)]
pub enum PathStep {
    /// An attribute or block name on an object.
    AttributeName(String),
    /// A key of a map.
    ElementKeyString(String),
    /// An index of a list.
    ElementKeyInt(usize),
    /// An element of a set, addressed by its value.
    ElementKeyValue(Value),
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::AttributeName(name) => write!(f, "AttributeName({:?})", name),
            PathStep::ElementKeyString(key) => write!(f, "ElementKeyString({:?})", key),
            PathStep::ElementKeyInt(index) => write!(f, "ElementKeyInt({})", index),
            PathStep::ElementKeyValue(value) => write!(f, "ElementKeyValue({})", value),
        }
    }
}

/// A path from the root of a value to one of its positions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributePath {
    steps: Vec<PathStep>,
}

impl AttributePath {
    /// The empty path, addressing the root value itself.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A path starting with a top level attribute name.
    pub fn root(name: impl Into<String>) -> Self {
        Self::empty().attribute(name)
    }

    /// Build a path from existing steps.
    pub fn from_steps(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    /// Append an attribute name step.
    pub fn attribute(self, name: impl Into<String>) -> Self {
        self.step(PathStep::AttributeName(name.into()))
    }

    /// Append a map key step.
    pub fn key(self, key: impl Into<String>) -> Self {
        self.step(PathStep::ElementKeyString(key.into()))
    }

    /// Append a list index step.
    pub fn index(self, index: usize) -> Self {
        self.step(PathStep::ElementKeyInt(index))
    }

    /// Append a set element step.
    pub fn element(self, value: Value) -> Self {
        self.step(PathStep::ElementKeyValue(value))
    }

    /// Append an arbitrary step.
    pub fn step(mut self, step: PathStep) -> Self {
        self.steps.push(step);
        self
    }

    /// The steps of this path.
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// The last step, if any.
    pub fn last_step(&self) -> Option<&PathStep> {
        self.steps.last()
    }

    /// The path without its last step.
    pub fn parent(&self) -> Option<AttributePath> {
        if self.steps.is_empty() {
            return None;
        }
        Some(Self {
            steps: self.steps[..self.steps.len() - 1].to_vec(),
        })
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether this path addresses the root value.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

/// Sort paths by their lexical form and drop structurally equal duplicates.
///
/// Distinct paths can share a rendering: an unknown set element key and a
/// string element key holding the unknown sentinel both print as the
/// sentinel. Such paths sort next to each other in input order, so each path
/// is checked against every kept path of its rendering, not only the last.
pub fn normalize_paths(paths: Vec<AttributePath>) -> Vec<AttributePath> {
    if paths.len() < 2 {
        return paths;
    }

    let mut keyed: Vec<(String, AttributePath)> = paths.into_iter().map(|p| (p.to_string(), p)).collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut normalized: Vec<AttributePath> = Vec::with_capacity(keyed.len());
    let mut run_start = 0;
    let mut run_key: Option<String> = None;
    for (key, path) in keyed {
        if run_key.as_deref() != Some(key.as_str()) {
            run_start = normalized.len();
            run_key = Some(key);
        }
        if normalized[run_start..].contains(&path) {
            tracing::debug!(
                attribute_path = %path,
                "attribute found multiple times in RequiresReplace, removing duplicate"
            );
            continue;
        }
        normalized.push(path);
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::UNKNOWN_VALUE_SENTINEL;

    #[test]
    fn test_path_display() {
        let path = AttributePath::root("network")
            .index(0)
            .attribute("subnet")
            .key("primary");
        assert_eq!(
            path.to_string(),
            "AttributeName(\"network\").ElementKeyInt(0).AttributeName(\"subnet\").ElementKeyString(\"primary\")"
        );

        let path = AttributePath::root("tags").element(Value::from("a"));
        assert_eq!(
            path.to_string(),
            "AttributeName(\"tags\").ElementKeyValue(\"a\")"
        );

        assert_eq!(AttributePath::empty().to_string(), "");
    }

    #[test]
    fn test_path_parent() {
        let path = AttributePath::root("a").index(2);
        assert_eq!(path.parent(), Some(AttributePath::root("a")));
        assert_eq!(path.len(), 2);
        assert_eq!(path.last_step(), Some(&PathStep::ElementKeyInt(2)));
        assert_eq!(AttributePath::empty().parent(), None);
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let b = AttributePath::root("b");
        let a = AttributePath::root("a");

        let normalized = normalize_paths(vec![b.clone(), a.clone(), a.clone()]);
        assert_eq!(normalized, vec![a, b]);
    }

    #[test]
    fn test_normalize_is_idempotent_and_order_independent() {
        let paths = vec![
            AttributePath::root("c").index(1),
            AttributePath::root("a"),
            AttributePath::root("c").index(0),
            AttributePath::root("a"),
            AttributePath::root("b").key("x"),
            AttributePath::root("c").index(1),
        ];

        let once = normalize_paths(paths.clone());
        assert_eq!(normalize_paths(once.clone()), once);

        let mut reversed = paths.clone();
        reversed.reverse();
        assert_eq!(normalize_paths(reversed), once);

        let mut rotated = paths;
        rotated.rotate_left(2);
        assert_eq!(normalize_paths(rotated), once);

        assert_eq!(once.len(), 4);
    }

    #[test]
    fn test_normalize_same_rendering_different_steps() {
        let unknown = AttributePath::root("tags").element(Value::Unknown);
        let sentinel = AttributePath::root("tags").element(Value::String(UNKNOWN_VALUE_SENTINEL.to_string()));
        assert_eq!(unknown.to_string(), sentinel.to_string());
        assert_ne!(unknown, sentinel);

        let interleaved = normalize_paths(vec![unknown.clone(), sentinel.clone(), unknown.clone()]);
        assert_eq!(interleaved, vec![unknown.clone(), sentinel.clone()]);

        let grouped = normalize_paths(vec![sentinel.clone(), unknown.clone(), sentinel.clone(), unknown.clone()]);
        assert_eq!(grouped.len(), 2);
        assert!(grouped.contains(&unknown) && grouped.contains(&sentinel));
    }

    #[test]
    fn test_normalize_small_inputs() {
        assert!(normalize_paths(vec![]).is_empty());
        let single = vec![AttributePath::root("only")];
        assert_eq!(normalize_paths(single.clone()), single);
    }
}
