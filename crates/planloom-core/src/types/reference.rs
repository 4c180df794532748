//! Reference records embedded in argument trees
//!
//! An argument tree is plain JSON except where a subtree carries the
//! sentinel keys of a dependency reference (`$fromStep` / `$outputKey`)
//! or a template reference (`$fromTemplateString` / `$values`).
//! Recognition is by shape, not by type: any object carrying the full
//! sentinel key set in a well-formed way *is* a reference and is never
//! descended into.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::PathSegment;

/// Sentinel key naming the producing step of a dependency reference.
pub const FROM_STEP_KEY: &str = "$fromStep";
/// Sentinel key naming the path into the producing step's output.
pub const OUTPUT_KEY_KEY: &str = "$outputKey";
/// Sentinel key holding a positional template string.
pub const TEMPLATE_STRING_KEY: &str = "$fromTemplateString";
/// Sentinel key holding a template's dependency values.
pub const VALUES_KEY: &str = "$values";

/// Guard against adversarially deep argument trees.
const MAX_TRAVERSAL_DEPTH: usize = 64;

/// A pointer from one step's argument into another step's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    /// Identifier of the producing step
    #[serde(rename = "$fromStep")]
    pub from_step: String,
    /// Path into the producing step's output ("" selects the whole output)
    #[serde(rename = "$outputKey")]
    pub output_key: String,
}

impl DependencyRef {
    /// Create a reference to `output_key` of step `from_step`
    pub fn new(from_step: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self {
            from_step: from_step.into(),
            output_key: output_key.into(),
        }
    }

    /// Recognize a dependency reference by shape.
    ///
    /// Requires an object carrying both sentinel keys with string
    /// values. Arrays and null never match.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let from_step = map.get(FROM_STEP_KEY)?.as_str()?;
        let output_key = map.get(OUTPUT_KEY_KEY)?.as_str()?;
        Some(Self::new(from_step, output_key))
    }

    /// Render back into the argument-tree representation
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            (FROM_STEP_KEY): self.from_step,
            (OUTPUT_KEY_KEY): self.output_key,
        })
    }
}

/// A positional substitution template whose slots are dependency
/// references: `{0}`, `{1}`, … index into `values`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    /// Template text with positional `{i}` markers
    #[serde(rename = "$fromTemplateString")]
    pub template: String,
    /// One dependency reference per marker, in marker order
    #[serde(rename = "$values")]
    pub values: Vec<DependencyRef>,
}

impl TemplateRef {
    /// Create a template reference
    pub fn new(template: impl Into<String>, values: Vec<DependencyRef>) -> Self {
        Self {
            template: template.into(),
            values,
        }
    }

    /// Recognize a template reference by shape.
    ///
    /// Requires an object with a string template and an array of
    /// well-formed dependency references. A malformed entry disqualifies
    /// the whole record, which then traverses as a plain object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let template = map.get(TEMPLATE_STRING_KEY)?.as_str()?;
        let entries = map.get(VALUES_KEY)?.as_array()?;
        let mut values = Vec::with_capacity(entries.len());
        for entry in entries {
            values.push(DependencyRef::from_value(entry)?);
        }
        Some(Self::new(template, values))
    }

    /// Render back into the argument-tree representation
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            (TEMPLATE_STRING_KEY): self.template,
            (VALUES_KEY): self.values.iter().map(DependencyRef::to_value).collect::<Vec<_>>(),
        })
    }
}

/// Visit every reference embedded in an argument tree.
///
/// Dependency and template references fire their callback with the path
/// from the root and are not descended into. The root value itself may
/// match, in which case the callback sees an empty path.
pub fn traverse_references<D, T>(value: &Value, on_dependency: &mut D, on_template: &mut T)
where
    D: FnMut(&DependencyRef, &[PathSegment]),
    T: FnMut(&TemplateRef, &[PathSegment]),
{
    let mut path = Vec::new();
    walk(value, on_dependency, on_template, &mut path, 0);
}

fn walk<D, T>(
    value: &Value,
    on_dependency: &mut D,
    on_template: &mut T,
    path: &mut Vec<PathSegment>,
    depth: usize,
) where
    D: FnMut(&DependencyRef, &[PathSegment]),
    T: FnMut(&TemplateRef, &[PathSegment]),
{
    if depth > MAX_TRAVERSAL_DEPTH {
        return;
    }
    if let Some(dep) = DependencyRef::from_value(value) {
        on_dependency(&dep, path);
        return;
    }
    if let Some(template) = TemplateRef::from_value(value) {
        on_template(&template, path);
        return;
    }
    match value {
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(idx));
                walk(item, on_dependency, on_template, path, depth + 1);
                path.pop();
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                path.push(PathSegment::Key(key.clone()));
                walk(item, on_dependency, on_template, path, depth + 1);
                path.pop();
            }
        }
        _ => {}
    }
}

/// Collect the producing-step ids an argument tree depends on.
///
/// Covers direct dependency references and every entry of every
/// template's values. First-occurrence order, duplicates removed.
pub fn extract_dependency_step_ids(args: &Value) -> Vec<String> {
    let ids: RefCell<Vec<String>> = RefCell::new(Vec::new());
    let push = |id: &str| {
        let mut ids = ids.borrow_mut();
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    };
    traverse_references(
        args,
        &mut |dep, _| push(&dep.from_step),
        &mut |template, _| {
            for dep in &template.values {
                push(&dep.from_step);
            }
        },
    );
    ids.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::format;
    use serde_json::json;

    #[test]
    fn test_dependency_recognized_by_shape() {
        let value = json!({"$fromStep": "s1", "$outputKey": "a.b"});
        let dep = DependencyRef::from_value(&value).expect("reference");
        assert_eq!(dep.from_step, "s1");
        assert_eq!(dep.output_key, "a.b");

        assert!(DependencyRef::from_value(&json!({"$fromStep": "s1"})).is_none());
        assert!(DependencyRef::from_value(&json!(["$fromStep", "$outputKey"])).is_none());
        assert!(DependencyRef::from_value(&json!(null)).is_none());
    }

    #[test]
    fn test_template_requires_well_formed_values() {
        let good = json!({
            "$fromTemplateString": "hi {0}",
            "$values": [{"$fromStep": "s1", "$outputKey": "name"}]
        });
        assert!(TemplateRef::from_value(&good).is_some());

        let bad = json!({
            "$fromTemplateString": "hi {0}",
            "$values": [{"fromStep": 0, "outputKey": "name"}]
        });
        assert!(TemplateRef::from_value(&bad).is_none());
    }

    #[test]
    fn test_traverse_fires_with_paths_and_does_not_descend() {
        let args = json!({
            "a": {"$fromStep": "s1", "$outputKey": "x"},
            "b": [1, {"$fromStep": "s2", "$outputKey": "y"}],
            "c": {
                "$fromTemplateString": "v={0}",
                "$values": [{"$fromStep": "s3", "$outputKey": ""}]
            }
        });
        let mut deps = Vec::new();
        let mut templates = Vec::new();
        traverse_references(
            &args,
            &mut |dep, path| deps.push((dep.from_step.clone(), format(path))),
            &mut |template, path| templates.push((template.template.clone(), format(path))),
        );
        assert_eq!(
            deps,
            vec![("s1".to_string(), "a".to_string()), ("s2".to_string(), "b[1]".to_string())]
        );
        assert_eq!(templates, vec![("v={0}".to_string(), "c".to_string())]);
    }

    #[test]
    fn test_traverse_matches_root_with_empty_path() {
        let root = json!({"$fromStep": "s1", "$outputKey": ""});
        let mut seen = Vec::new();
        traverse_references(
            &root,
            &mut |dep, path| seen.push((dep.from_step.clone(), path.len())),
            &mut |_, _| panic!("not a template"),
        );
        assert_eq!(seen, vec![("s1".to_string(), 0)]);
    }

    #[test]
    fn test_extract_dependency_step_ids_ordered_unique() {
        let args = json!({
            "first": {"$fromStep": "s2", "$outputKey": "a"},
            "second": {"$fromStep": "s1", "$outputKey": "b"},
            "third": {
                "$fromTemplateString": "{0} {1}",
                "$values": [
                    {"$fromStep": "s2", "$outputKey": "a"},
                    {"$fromStep": "s3", "$outputKey": ""}
                ]
            }
        });
        assert_eq!(extract_dependency_step_ids(&args), vec!["s2", "s1", "s3"]);
    }

    #[test]
    fn test_extract_on_plain_values_is_empty() {
        assert!(extract_dependency_step_ids(&json!({"a": [1, "x", null]})).is_empty());
        assert!(extract_dependency_step_ids(&json!("plain")).is_empty());
    }
}
