//! Model-output parsing
//!
//! Turns the raw text of a planning response into a normalized list of
//! [`PlanStep`]s: extracts the `<think>`/`<plan>` payload, decodes the
//! almost-JSON the model produced, assigns fresh step identifiers, and
//! rewrites every raw step reference and template marker into the
//! stable record forms the validator and executor consume.
//!
//! Parsing failures are fatal and returned as [`ParseError`];
//! downstream phases never see a half-normalized plan.

mod lenient;
mod template;

pub use lenient::{from_str as lenient_from_str, LenientError};
pub use template::compile_template;

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::path;
use crate::types::{DependencyRef, PlanStep};

static THINK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("think pattern"));
static PLAN_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<plan>(.*?)</plan>").expect("plan pattern"));

/// Raw-reference key naming a step by original index.
const RAW_FROM_STEP_KEY: &str = "fromStep";
/// Raw-reference key holding the output path.
const RAW_OUTPUT_KEY_KEY: &str = "outputKey";

/// The tagged segments of a planning response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutput {
    /// Trimmed `<think>` content, when present
    pub think: Option<String>,
    /// Trimmed `<plan>` content; absent when the model declined to plan
    pub plan: Option<String>,
}

/// Fatal plan-parsing failures.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The plan text contains no bracket-delimited JSON payload
    #[error("invalid json parsing: no JSON payload found")]
    MissingPayload,
    /// The payload did not decode even with tolerant rules
    #[error("invalid json parsing: {0}")]
    Json(#[from] LenientError),
    /// The decoded payload is not a list of well-formed step entries
    #[error("invalid plan shape: {0}")]
    Shape(String),
    /// A raw reference names a step index that does not exist
    #[error("invalid dependency reference: step index {0} does not exist")]
    DependencyIndex(i64),
}

/// Extract the `<think>` and `<plan>` segments from a raw response.
///
/// An absent plan tag is not an error; the model may refuse to plan.
pub fn parse_model_output(raw: &str) -> ModelOutput {
    let capture = |re: &Regex| {
        re.captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    };
    ModelOutput {
        think: capture(&THINK_TAG),
        plan: capture(&PLAN_TAG),
    }
}

/// Parse plan text into normalized steps.
///
/// Accepts code-fence noise and stray characters around the payload,
/// JSON5-style relaxations inside it, and both raw
/// (`{fromStep, outputKey}`) and template (`"{0.path}"`) reference
/// notations, all of which are rewritten against fresh identifiers.
pub fn parse_plan_steps(text: &str) -> Result<Vec<PlanStep>, ParseError> {
    let payload = locate_payload(text)?;
    let decoded = lenient::from_str(payload)?;

    let entries = decoded
        .as_array()
        .ok_or_else(|| ParseError::Shape("plan payload must be an array of steps".to_string()))?;

    // validate shape up front so identifier assignment sees the full plan
    let mut raw_steps = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        raw_steps.push(RawStep::from_entry(index, entry)?);
    }

    let step_id_by_index: HashMap<usize, String> = (0..raw_steps.len())
        .map(|index| (index, Uuid::new_v4().to_string()))
        .collect();

    let mut steps = Vec::with_capacity(raw_steps.len());
    for (index, raw) in raw_steps.into_iter().enumerate() {
        let arguments = transform_params_value(raw.arguments, &step_id_by_index)?;
        let mut step = PlanStep::with_id(
            step_id_by_index[&index].clone(),
            raw.tool_name,
            arguments,
        );
        if let Some(thought) = raw.thought {
            step = step.with_thought(thought);
        }
        steps.push(step);
    }
    tracing::debug!(step_count = steps.len(), "plan parsed");
    Ok(steps)
}

struct RawStep {
    tool_name: String,
    arguments: Value,
    thought: Option<String>,
}

impl RawStep {
    fn from_entry(index: usize, entry: &Value) -> Result<Self, ParseError> {
        let map = entry
            .as_object()
            .ok_or_else(|| ParseError::Shape(format!("step {} must be an object", index)))?;
        let tool_name = map
            .get("toolName")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ParseError::Shape(format!("step {} is missing a string toolName", index))
            })?
            .to_string();
        let arguments = map
            .get("arguments")
            .filter(|v| v.is_object())
            .cloned()
            .ok_or_else(|| {
                ParseError::Shape(format!("step {} is missing an arguments object", index))
            })?;
        let thought = match map.get("thought") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(_) => {
                return Err(ParseError::Shape(format!(
                    "step {} thought must be a string",
                    index
                )))
            }
        };
        Ok(Self {
            tool_name,
            arguments,
            thought,
        })
    }
}

/// Slice the bracket-delimited JSON payload out of surrounding noise.
fn locate_payload(text: &str) -> Result<&str, ParseError> {
    let trimmed = text.trim();
    let start = [trimmed.find('{'), trimmed.find('[')]
        .into_iter()
        .flatten()
        .min();
    let end = [trimmed.rfind('}'), trimmed.rfind(']')]
        .into_iter()
        .flatten()
        .max();
    match (start, end) {
        (Some(start), Some(end)) if start <= end => Ok(&trimmed[start..=end]),
        _ => Err(ParseError::MissingPayload),
    }
}

/// Normalize one argument value against the index → id map.
///
/// Strings run through the template compiler, raw references become
/// stable dependency records, and containers recurse. After this pass
/// no raw numeric reference remains anywhere in the tree.
fn transform_params_value(
    value: Value,
    step_id_by_index: &HashMap<usize, String>,
) -> Result<Value, ParseError> {
    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(transform_params_value(item, step_id_by_index)?);
            }
            Ok(Value::Array(out))
        }
        Value::String(text) => Ok(match compile_template(&text, step_id_by_index) {
            Some(template) => template.to_value(),
            None => Value::String(text),
        }),
        Value::Object(map) => {
            if let Some((index, output_key)) = as_raw_reference(&map) {
                let step_id = step_id_by_index
                    .get(&usize::try_from(index).map_err(|_| ParseError::DependencyIndex(index))?)
                    .ok_or(ParseError::DependencyIndex(index))?;
                return Ok(DependencyRef::new(step_id, path::normalize(&output_key)).to_value());
            }
            let mut out = Map::new();
            for (key, item) in map {
                out.insert(key, transform_params_value(item, step_id_by_index)?);
            }
            Ok(Value::Object(out))
        }
        primitive => Ok(primitive),
    }
}

/// Detect the raw `{fromStep: integer, outputKey: string}` shape.
fn as_raw_reference(map: &Map<String, Value>) -> Option<(i64, String)> {
    let index = map.get(RAW_FROM_STEP_KEY)?.as_i64()?;
    let output_key = map.get(RAW_OUTPUT_KEY_KEY)?.as_str()?;
    Some((index, output_key.to_string()))
}
