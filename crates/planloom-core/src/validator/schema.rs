//! Structural schema model
//!
//! JSON-Schema documents compile into a small structural type tree so
//! the validator can answer two questions without touching raw JSON
//! again: what type lives at a path, and whether one type accepts
//! another. Recognized keywords: `type`, `properties`, `required`,
//! `items`, `prefixItems`, `anyOf`, `oneOf`, `enum`, `const`,
//! `additionalProperties`, `default`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::Value;

use crate::path::{is_numeric_string, PathSegment};

/// A structural type derived from JSON-Schema.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    /// Accepts anything (empty schema, `true`, unrecognized forms)
    Any,
    /// Accepts nothing knowable (`false`, unrecognized type names)
    Unknown,
    String,
    Number,
    Boolean,
    Null,
    /// Homogeneous array
    Array(Box<SchemaNode>),
    /// Positional array from `prefixItems`
    Tuple(Vec<SchemaNode>),
    /// Object with a field map and an optional catch-all
    Object {
        fields: BTreeMap<String, ObjectField>,
        catchall: Option<Box<SchemaNode>>,
    },
    /// `anyOf`
    Union(Vec<SchemaNode>),
    /// `oneOf`
    ExclusiveUnion(Vec<SchemaNode>),
    /// `const`
    Literal(Value),
    /// `enum`
    Enum(Vec<Value>),
    /// Field absent from its object's `required` list
    Optional(Box<SchemaNode>),
    /// Type admitting null alongside one concrete type
    Nullable(Box<SchemaNode>),
    /// Schema carrying a `default`
    Defaulted(Box<SchemaNode>),
}

/// One named field of an object schema
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectField {
    pub schema: SchemaNode,
    pub required: bool,
}

/// Compile a decoded JSON-Schema document.
///
/// Compilation is total: unrecognized constructs become [`SchemaNode::Any`]
/// (the permissive reading models rely on) rather than failing.
pub fn compile(schema: &Value) -> SchemaNode {
    let node = compile_inner(schema);
    let has_default = schema
        .as_object()
        .is_some_and(|map| map.contains_key("default"));
    if has_default {
        SchemaNode::Defaulted(Box::new(node))
    } else {
        node
    }
}

fn compile_inner(schema: &Value) -> SchemaNode {
    let map = match schema {
        Value::Bool(true) => return SchemaNode::Any,
        Value::Bool(false) => return SchemaNode::Unknown,
        Value::Object(map) => map,
        _ => return SchemaNode::Any,
    };

    if let Some(value) = map.get("const") {
        return SchemaNode::Literal(value.clone());
    }
    if let Some(variants) = map.get("enum").and_then(Value::as_array) {
        return SchemaNode::Enum(variants.clone());
    }
    if let Some(options) = map.get("anyOf").and_then(Value::as_array) {
        return SchemaNode::Union(options.iter().map(compile).collect());
    }
    if let Some(options) = map.get("oneOf").and_then(Value::as_array) {
        return SchemaNode::ExclusiveUnion(options.iter().map(compile).collect());
    }

    match map.get("type") {
        Some(Value::String(type_name)) => compile_typed(type_name, map),
        Some(Value::Array(type_names)) => {
            let names: Vec<&str> = type_names.iter().filter_map(Value::as_str).collect();
            match names.as_slice() {
                [] => SchemaNode::Any,
                [single] => compile_typed(single, map),
                [a, b] if *b == "null" => SchemaNode::Nullable(Box::new(compile_typed(a, map))),
                [a, b] if *a == "null" => SchemaNode::Nullable(Box::new(compile_typed(b, map))),
                _ => SchemaNode::Union(
                    names.iter().map(|name| compile_typed(name, map)).collect(),
                ),
            }
        }
        None => {
            if map.contains_key("properties")
                || map.contains_key("required")
                || map.contains_key("additionalProperties")
            {
                compile_object(map)
            } else if map.contains_key("items") || map.contains_key("prefixItems") {
                compile_array(map)
            } else {
                SchemaNode::Any
            }
        }
        Some(_) => SchemaNode::Any,
    }
}

fn compile_typed(type_name: &str, map: &serde_json::Map<String, Value>) -> SchemaNode {
    match type_name {
        "string" => SchemaNode::String,
        "number" | "integer" => SchemaNode::Number,
        "boolean" => SchemaNode::Boolean,
        "null" => SchemaNode::Null,
        "array" => compile_array(map),
        "object" => compile_object(map),
        _ => SchemaNode::Unknown,
    }
}

fn compile_array(map: &serde_json::Map<String, Value>) -> SchemaNode {
    if let Some(prefix) = map.get("prefixItems").and_then(Value::as_array) {
        return SchemaNode::Tuple(prefix.iter().map(compile).collect());
    }
    match map.get("items") {
        Some(items) => SchemaNode::Array(Box::new(compile(items))),
        None => SchemaNode::Array(Box::new(SchemaNode::Any)),
    }
}

fn compile_object(map: &serde_json::Map<String, Value>) -> SchemaNode {
    let required: BTreeSet<&str> = map
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut fields = BTreeMap::new();
    if let Some(properties) = map.get("properties").and_then(Value::as_object) {
        for (name, property) in properties {
            let is_required = required.contains(name.as_str());
            let mut schema = compile(property);
            if !is_required {
                schema = SchemaNode::Optional(Box::new(schema));
            }
            fields.insert(
                name.clone(),
                ObjectField {
                    schema,
                    required: is_required,
                },
            );
        }
    }

    let catchall = map
        .get("additionalProperties")
        .map(|value| Box::new(compile(value)));

    SchemaNode::Object { fields, catchall }
}

/// Strip optional/nullable/default wrappers down to the carried type.
pub fn unwrap_wrappers(node: &SchemaNode) -> &SchemaNode {
    let mut current = node;
    loop {
        match current {
            SchemaNode::Optional(inner)
            | SchemaNode::Nullable(inner)
            | SchemaNode::Defaulted(inner) => current = inner,
            _ => return current,
        }
    }
}

/// Coarse runtime type of a schema, used for mismatch reporting and the
/// fallback compatibility test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeTag {
    Any,
    String,
    Number,
    Boolean,
    Null,
    Array,
    Object,
    Unknown,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Null => "null",
            Self::Array => "array",
            Self::Object => "object",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// The set of runtime types a schema admits.
pub fn type_set(node: &SchemaNode) -> BTreeSet<TypeTag> {
    let node = unwrap_wrappers(node);
    let mut set = BTreeSet::new();
    match node {
        SchemaNode::Any => {
            set.insert(TypeTag::Any);
        }
        SchemaNode::Unknown => {
            set.insert(TypeTag::Unknown);
        }
        SchemaNode::String => {
            set.insert(TypeTag::String);
        }
        SchemaNode::Number => {
            set.insert(TypeTag::Number);
        }
        SchemaNode::Boolean => {
            set.insert(TypeTag::Boolean);
        }
        SchemaNode::Null => {
            set.insert(TypeTag::Null);
        }
        SchemaNode::Array(_) | SchemaNode::Tuple(_) => {
            set.insert(TypeTag::Array);
        }
        SchemaNode::Object { .. } => {
            set.insert(TypeTag::Object);
        }
        SchemaNode::Literal(value) => {
            set.insert(literal_tag(value));
        }
        SchemaNode::Enum(variants) => {
            if !variants.is_empty() && variants.iter().all(Value::is_string) {
                set.insert(TypeTag::String);
            } else {
                for variant in variants {
                    set.insert(literal_tag(variant));
                }
            }
        }
        SchemaNode::Union(options) | SchemaNode::ExclusiveUnion(options) => {
            for option in options {
                set.extend(type_set(option));
            }
        }
        SchemaNode::Optional(_) | SchemaNode::Nullable(_) | SchemaNode::Defaulted(_) => {
            unreachable!("wrappers are stripped above")
        }
    }
    set
}

fn literal_tag(value: &Value) -> TypeTag {
    match value {
        Value::String(_) => TypeTag::String,
        Value::Number(_) => TypeTag::Number,
        Value::Bool(_) => TypeTag::Boolean,
        _ => TypeTag::Unknown,
    }
}

/// Render a type set for error messages, e.g. `"number|string"`.
pub fn describe(set: &BTreeSet<TypeTag>) -> String {
    if set.is_empty() {
        return TypeTag::Unknown.to_string();
    }
    set.iter()
        .map(TypeTag::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

/// Resolve the schema reached by walking `path` from `schema`.
///
/// Wrappers unwrap before every step. Union nodes descend the
/// remaining path into every option and combine the successes; the
/// lookup fails only when no option admits the path. Integer segments
/// (and digit-only keys) advance through arrays and tuples; a tuple's
/// element type is the union of its prefix entries.
pub fn schema_at_path(schema: &SchemaNode, path: &[PathSegment]) -> Option<SchemaNode> {
    let node = unwrap_wrappers(schema);
    if path.is_empty() {
        return Some(node.clone());
    }
    let (segment, rest) = path.split_first().expect("non-empty path");

    match node {
        SchemaNode::Any => Some(SchemaNode::Any),
        SchemaNode::Union(options) | SchemaNode::ExclusiveUnion(options) => {
            let mut hits: Vec<SchemaNode> = options
                .iter()
                .filter_map(|option| schema_at_path(option, path))
                .collect();
            match hits.len() {
                0 => None,
                1 => hits.pop(),
                _ => Some(SchemaNode::Union(hits)),
            }
        }
        SchemaNode::Array(element) => {
            if is_index_segment(segment) {
                schema_at_path(element, rest)
            } else {
                None
            }
        }
        SchemaNode::Tuple(items) => {
            if !is_index_segment(segment) {
                return None;
            }
            let element = match items.as_slice() {
                [] => SchemaNode::Unknown,
                [single] => single.clone(),
                _ => SchemaNode::Union(items.clone()),
            };
            schema_at_path(&element, rest)
        }
        SchemaNode::Object { fields, catchall } => {
            let PathSegment::Key(key) = segment else {
                return None;
            };
            if let Some(field) = fields.get(key) {
                return schema_at_path(&field.schema, rest);
            }
            if let Some(catchall) = catchall {
                let concrete = unwrap_wrappers(catchall);
                if !matches!(concrete, SchemaNode::Any | SchemaNode::Unknown) {
                    return schema_at_path(catchall, rest);
                }
            }
            if fields.is_empty() {
                return schema_at_path(&SchemaNode::Any, rest);
            }
            None
        }
        _ => None,
    }
}

fn is_index_segment(segment: &PathSegment) -> bool {
    match segment {
        PathSegment::Index(_) => true,
        PathSegment::Key(key) => is_numeric_string(key),
    }
}

/// Whether a value of type `actual` is acceptable where `expected` is
/// declared.
///
/// Unions flatten from either side, arrays recurse on elements, and
/// objects check structurally (expected's required fields must exist
/// with assignable types, extras are allowed). Everything else falls
/// back to type-set intersection.
pub fn assignable(expected: &SchemaNode, actual: &SchemaNode) -> bool {
    let expected = unwrap_wrappers(expected);
    let actual = unwrap_wrappers(actual);

    if matches!(expected, SchemaNode::Any) || matches!(actual, SchemaNode::Any) {
        return true;
    }
    if let SchemaNode::Union(options) | SchemaNode::ExclusiveUnion(options) = expected {
        return options.iter().any(|option| assignable(option, actual));
    }
    if let SchemaNode::Union(options) | SchemaNode::ExclusiveUnion(options) = actual {
        return options.iter().any(|option| assignable(expected, option));
    }
    if let (SchemaNode::Array(expected_element), SchemaNode::Array(actual_element)) =
        (expected, actual)
    {
        return assignable(expected_element, actual_element);
    }
    if let (
        SchemaNode::Object {
            fields: expected_fields,
            ..
        },
        SchemaNode::Object {
            fields: actual_fields,
            ..
        },
    ) = (expected, actual)
    {
        for (name, field) in expected_fields {
            match actual_fields.get(name) {
                Some(actual_field) => {
                    if !assignable(&field.schema, &actual_field.schema) {
                        return false;
                    }
                }
                None => {
                    if field.required {
                        return false;
                    }
                }
            }
        }
        return true;
    }

    let expected_set = type_set(expected);
    let actual_set = type_set(actual);
    expected_set.contains(&TypeTag::Any)
        || actual_set.contains(&TypeTag::Unknown)
        || expected_set.intersection(&actual_set).next().is_some()
}

/// The types a template slot accepts: anything that stringifies
/// sensibly when interpolated.
pub fn string_coercible() -> SchemaNode {
    SchemaNode::Union(vec![
        SchemaNode::String,
        SchemaNode::Number,
        SchemaNode::Boolean,
        SchemaNode::Object {
            fields: BTreeMap::new(),
            catchall: None,
        },
        SchemaNode::Array(Box::new(SchemaNode::Any)),
    ])
}
