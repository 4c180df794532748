//! Plan validation
//!
//! A pre-flight type check over a parsed plan: every dependency
//! reference must name an existing step and output key, and the
//! referenced value's type must be assignable to the consuming
//! argument's declared type. Violations are collected, never thrown:
//! one coded record per problem, all steps checked.

mod schema;

pub use schema::{
    assignable, compile as compile_schema, describe, schema_at_path, string_coercible, type_set,
    unwrap_wrappers, ObjectField, SchemaNode, TypeTag,
};

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::path::{self, PathSegment};
use crate::types::{
    traverse_references, DependencyRef, PlanStep, TemplateRef, Tool, ToolCatalog,
};

/// Stable identifier for one class of validation problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    SchemaParseError,
    ToolNotFound,
    DependencyStepMissing,
    InputKeyMissing,
    OutputKeyMissing,
    TypeMismatch,
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SchemaParseError => "schema_parse_error",
            Self::ToolNotFound => "tool_not_found",
            Self::DependencyStepMissing => "dependency_step_missing",
            Self::InputKeyMissing => "input_key_missing",
            Self::OutputKeyMissing => "output_key_missing",
            Self::TypeMismatch => "type_mismatch",
        };
        f.write_str(name)
    }
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanValidationError {
    /// Problem class
    pub code: ValidationCode,
    /// Human-readable description
    pub message: String,
    /// Step the finding is attached to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Tool involved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Formatted path into the consumer's input tree
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument_path: Option<String>,
    /// Producing step named by the reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_step_id: Option<String>,
    /// Path into the producer's output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Declared type set at the argument position
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_type: Option<String>,
    /// Type set the reference actually produces
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_type: Option<String>,
}

impl PlanValidationError {
    /// Create a finding with only code and message set
    pub fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            step_id: None,
            tool_name: None,
            argument_path: None,
            from_step_id: None,
            output_path: None,
            expected_type: None,
            actual_type: None,
        }
    }

    /// Attach the step the finding belongs to
    pub fn with_step(mut self, step: &PlanStep) -> Self {
        self.step_id = Some(step.id.clone());
        self.tool_name = Some(step.tool_name.clone());
        self
    }

    /// Attach a tool name without a step
    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Attach the argument path
    pub fn with_argument_path(mut self, argument_path: impl Into<String>) -> Self {
        self.argument_path = Some(argument_path.into());
        self
    }

    /// Attach the referenced producer step
    pub fn with_from_step_id(mut self, from_step_id: impl Into<String>) -> Self {
        self.from_step_id = Some(from_step_id.into());
        self
    }

    /// Attach the output path
    pub fn with_output_path(mut self, output_path: impl Into<String>) -> Self {
        self.output_path = Some(output_path.into());
        self
    }

    /// Attach both type-set descriptions
    pub fn with_types(
        mut self,
        expected_type: impl Into<String>,
        actual_type: impl Into<String>,
    ) -> Self {
        self.expected_type = Some(expected_type.into());
        self.actual_type = Some(actual_type.into());
        self
    }
}

/// The collected outcome of validating a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanValidation {
    /// True when no finding was recorded
    pub valid: bool,
    /// Every finding, in discovery order
    pub errors: Vec<PlanValidationError>,
}

struct CompiledTool {
    input: SchemaNode,
    output: SchemaNode,
}

impl CompiledTool {
    fn compile(tool: &dyn Tool) -> Result<Self, String> {
        let input = compile_one(tool.input_schema())?;
        let output = compile_one(tool.output_schema())?;
        Ok(Self { input, output })
    }
}

fn compile_one(schema_text: &str) -> Result<SchemaNode, String> {
    let decoded: Value = crate::parser::lenient_from_str(schema_text).map_err(|e| e.to_string())?;
    Ok(compile_schema(&decoded))
}

/// Type-check every reference in a plan against the catalog's schemas.
///
/// Findings are collected; nothing here fails fast or panics. Calling
/// twice over the same inputs yields the same report.
pub fn validate_plan(steps: &[PlanStep], tools: &ToolCatalog) -> PlanValidation {
    let mut errors = Vec::new();
    let steps_by_id: HashMap<&str, &PlanStep> =
        steps.iter().map(|step| (step.id.as_str(), step)).collect();

    // compile each referenced tool's schema pair once
    let mut compiled: HashMap<String, Result<CompiledTool, String>> = HashMap::new();
    for step in steps {
        if compiled.contains_key(&step.tool_name) {
            continue;
        }
        let Some(tool) = tools.get(&step.tool_name) else {
            continue;
        };
        let outcome = CompiledTool::compile(tool.as_ref());
        if let Err(message) = &outcome {
            errors.push(
                PlanValidationError::new(
                    ValidationCode::SchemaParseError,
                    format!("Tool \"{}\" has an unparsable schema: {}", step.tool_name, message),
                )
                .with_tool_name(step.tool_name.clone()),
            );
        }
        compiled.insert(step.tool_name.clone(), outcome);
    }

    for step in steps {
        if !tools.contains(&step.tool_name) {
            errors.push(
                PlanValidationError::new(
                    ValidationCode::ToolNotFound,
                    format!("Tool \"{}\" not found", step.tool_name),
                )
                .with_step(step),
            );
            continue;
        }
        let Some(Ok(tool_schemas)) = compiled.get(&step.tool_name) else {
            errors.push(
                PlanValidationError::new(
                    ValidationCode::SchemaParseError,
                    format!("Tool \"{}\" has an unparsable schema", step.tool_name),
                )
                .with_step(step),
            );
            continue;
        };

        let mut dependencies: Vec<(DependencyRef, Vec<PathSegment>)> = Vec::new();
        let mut templates: Vec<(TemplateRef, Vec<PathSegment>)> = Vec::new();
        traverse_references(
            &step.arguments,
            &mut |dep, p| dependencies.push((dep.clone(), p.to_vec())),
            &mut |template, p| templates.push((template.clone(), p.to_vec())),
        );

        for (dep, p) in &dependencies {
            check_dependency(dep, p, step, tool_schemas, &steps_by_id, &compiled, &mut errors);
        }
        for (template, p) in &templates {
            check_template(template, p, step, tool_schemas, &steps_by_id, &compiled, &mut errors);
        }
    }

    if !errors.is_empty() {
        tracing::debug!(error_count = errors.len(), "plan failed validation");
    }
    PlanValidation {
        valid: errors.is_empty(),
        errors,
    }
}

fn check_dependency(
    dep: &DependencyRef,
    p: &[PathSegment],
    step: &PlanStep,
    tool_schemas: &CompiledTool,
    steps_by_id: &HashMap<&str, &PlanStep>,
    compiled: &HashMap<String, Result<CompiledTool, String>>,
    errors: &mut Vec<PlanValidationError>,
) {
    let argument_path = path::format(p);
    let Some(expected) = schema_at_path(&tool_schemas.input, p) else {
        errors.push(
            PlanValidationError::new(
                ValidationCode::InputKeyMissing,
                format!(
                    "Tool \"{}\" declares no input at \"{}\"",
                    step.tool_name, argument_path
                ),
            )
            .with_step(step)
            .with_argument_path(argument_path),
        );
        return;
    };
    let Some(actual) =
        resolve_output_schema(dep, step, &argument_path, steps_by_id, compiled, errors)
    else {
        return;
    };
    if !assignable(&expected, &actual) {
        errors.push(
            PlanValidationError::new(
                ValidationCode::TypeMismatch,
                format!(
                    "Output \"{}\" of step \"{}\" is not assignable to \"{}\"",
                    dep.output_key, dep.from_step, argument_path
                ),
            )
            .with_step(step)
            .with_argument_path(argument_path)
            .with_from_step_id(dep.from_step.clone())
            .with_output_path(dep.output_key.clone())
            .with_types(describe(&type_set(&expected)), describe(&type_set(&actual))),
        );
    }
}

fn check_template(
    template: &TemplateRef,
    p: &[PathSegment],
    step: &PlanStep,
    tool_schemas: &CompiledTool,
    steps_by_id: &HashMap<&str, &PlanStep>,
    compiled: &HashMap<String, Result<CompiledTool, String>>,
    errors: &mut Vec<PlanValidationError>,
) {
    let argument_path = path::format(p);
    let Some(expected) = schema_at_path(&tool_schemas.input, p) else {
        errors.push(
            PlanValidationError::new(
                ValidationCode::InputKeyMissing,
                format!(
                    "Tool \"{}\" declares no input at \"{}\"",
                    step.tool_name, argument_path
                ),
            )
            .with_step(step)
            .with_argument_path(argument_path),
        );
        return;
    };
    // a template always resolves to a string; the slot values are
    // checked independently below
    if !assignable(&expected, &SchemaNode::String) {
        errors.push(
            PlanValidationError::new(
                ValidationCode::TypeMismatch,
                format!(
                    "Template at \"{}\" produces a string, which \"{}\" does not accept",
                    argument_path, step.tool_name
                ),
            )
            .with_step(step)
            .with_argument_path(argument_path.clone())
            .with_types(describe(&type_set(&expected)), "string"),
        );
    }

    let coercible = string_coercible();
    for dep in &template.values {
        let Some(actual) =
            resolve_output_schema(dep, step, &argument_path, steps_by_id, compiled, errors)
        else {
            continue;
        };
        if !assignable(&coercible, &actual) {
            errors.push(
                PlanValidationError::new(
                    ValidationCode::TypeMismatch,
                    format!(
                        "Output \"{}\" of step \"{}\" cannot be interpolated into a template",
                        dep.output_key, dep.from_step
                    ),
                )
                .with_step(step)
                .with_argument_path(argument_path.clone())
                .with_from_step_id(dep.from_step.clone())
                .with_output_path(dep.output_key.clone())
                .with_types(describe(&type_set(&coercible)), describe(&type_set(&actual))),
            );
        }
    }
}

fn resolve_output_schema(
    dep: &DependencyRef,
    step: &PlanStep,
    argument_path: &str,
    steps_by_id: &HashMap<&str, &PlanStep>,
    compiled: &HashMap<String, Result<CompiledTool, String>>,
    errors: &mut Vec<PlanValidationError>,
) -> Option<SchemaNode> {
    let Some(source) = steps_by_id.get(dep.from_step.as_str()) else {
        errors.push(
            PlanValidationError::new(
                ValidationCode::DependencyStepMissing,
                format!("Referenced step \"{}\" is not in the plan", dep.from_step),
            )
            .with_step(step)
            .with_argument_path(argument_path.to_string())
            .with_from_step_id(dep.from_step.clone()),
        );
        return None;
    };
    let output = match compiled.get(&source.tool_name) {
        Some(Ok(tool_schemas)) => &tool_schemas.output,
        _ => {
            errors.push(
                PlanValidationError::new(
                    ValidationCode::SchemaParseError,
                    format!(
                        "Output schema of tool \"{}\" is unavailable",
                        source.tool_name
                    ),
                )
                .with_step(step)
                .with_argument_path(argument_path.to_string())
                .with_from_step_id(dep.from_step.clone()),
            );
            return None;
        }
    };
    let output_path = path::parse(&dep.output_key);
    match schema_at_path(output, &output_path) {
        Some(actual) => Some(actual),
        None => {
            errors.push(
                PlanValidationError::new(
                    ValidationCode::OutputKeyMissing,
                    format!(
                        "Tool \"{}\" output has no key \"{}\"",
                        source.tool_name, dep.output_key
                    ),
                )
                .with_step(step)
                .with_argument_path(argument_path.to_string())
                .with_from_step_id(dep.from_step.clone())
                .with_output_path(dep.output_key.clone()),
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FunctionTool, PlanStep};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn tool(name: &str, input_schema: &str, output_schema: &str) -> Arc<FunctionTool> {
        Arc::new(FunctionTool::new(
            name,
            input_schema,
            output_schema,
            |_| async { Ok(Value::Null) },
        ))
    }

    fn weather_email_catalog() -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        catalog.register(tool(
            "getWeather",
            r#"{"type":"object","properties":{"city":{"type":"string"}},"required":["city"]}"#,
            r#"{"type":"object","properties":{"temperature":{"type":"number"}},"required":["temperature"]}"#,
        ));
        catalog.register(tool(
            "sendEmail",
            r#"{"type":"object","properties":{"body":{"type":"string"}},"required":["body"]}"#,
            r#"{"type":"object","properties":{"sent":{"type":"boolean"}}}"#,
        ));
        catalog
    }

    fn weather_then_email(output_key: &str) -> Vec<PlanStep> {
        vec![
            PlanStep::with_id("step-1", "getWeather", json!({"city": "Oslo"})),
            PlanStep::with_id(
                "step-2",
                "sendEmail",
                json!({"body": {"$fromStep": "step-1", "$outputKey": output_key}}),
            ),
        ]
    }

    #[test]
    fn test_number_output_into_string_input_is_a_mismatch() {
        let report = validate_plan(&weather_then_email("temperature"), &weather_email_catalog());
        assert!(!report.valid);
        let first = &report.errors[0];
        assert_eq!(first.code, ValidationCode::TypeMismatch);
        assert_eq!(first.argument_path.as_deref(), Some("body"));
        assert_eq!(first.expected_type.as_deref(), Some("string"));
        assert_eq!(first.actual_type.as_deref(), Some("number"));
    }

    #[test]
    fn test_missing_output_key_is_reported() {
        let report = validate_plan(&weather_then_email("humidity"), &weather_email_catalog());
        assert!(!report.valid);
        let first = &report.errors[0];
        assert_eq!(first.code, ValidationCode::OutputKeyMissing);
        assert_eq!(first.output_path.as_deref(), Some("humidity"));
        assert_eq!(first.from_step_id.as_deref(), Some("step-1"));
    }

    #[test]
    fn test_union_output_resolves_through_object_branch() {
        let mut catalog = ToolCatalog::new();
        catalog.register(tool(
            "lookupToken",
            r#"{"type":"object","properties":{"symbol":{"type":"string"}}}"#,
            r#"{"type":"object","properties":{"platformInfo":{"anyOf":[
                {"type":"object","properties":{"contractAddress":{"type":"string"}},"required":["platformName"]},
                {"type":"null"}
            ]}}}"#,
        ));
        catalog.register(tool(
            "annotate",
            r#"{"type":"object","properties":{"address":{"type":"string"}}}"#,
            r#"{"type":"object"}"#,
        ));
        let steps = vec![
            PlanStep::with_id("step-1", "lookupToken", json!({"symbol": "ETH"})),
            PlanStep::with_id(
                "step-2",
                "annotate",
                json!({"address": {"$fromStep": "step-1", "$outputKey": "platformInfo.contractAddress"}}),
            ),
        ];
        let report = validate_plan(&steps, &catalog);
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_unknown_tool_is_reported_once_per_step() {
        let steps = vec![PlanStep::with_id("step-1", "nope", json!({}))];
        let report = validate_plan(&steps, &ToolCatalog::new());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, ValidationCode::ToolNotFound);
        assert_eq!(report.errors[0].message, "Tool \"nope\" not found");
    }

    #[test]
    fn test_reference_to_missing_step_is_reported() {
        let mut steps = weather_then_email("temperature");
        steps.remove(0);
        let report = validate_plan(&steps, &weather_email_catalog());
        assert_eq!(report.errors[0].code, ValidationCode::DependencyStepMissing);
        assert_eq!(report.errors[0].from_step_id.as_deref(), Some("step-1"));
    }

    #[test]
    fn test_unknown_input_path_is_reported() {
        let steps = vec![
            PlanStep::with_id("step-1", "getWeather", json!({"city": "Oslo"})),
            PlanStep::with_id(
                "step-2",
                "sendEmail",
                json!({"subject": {"$fromStep": "step-1", "$outputKey": "temperature"}}),
            ),
        ];
        let report = validate_plan(&steps, &weather_email_catalog());
        assert_eq!(report.errors[0].code, ValidationCode::InputKeyMissing);
        assert_eq!(report.errors[0].argument_path.as_deref(), Some("subject"));
    }

    #[test]
    fn test_broken_schema_is_reported_for_tool_and_step() {
        let mut catalog = ToolCatalog::new();
        catalog.register(tool("broken", "{not valid", "{}"));
        let steps = vec![PlanStep::with_id("step-1", "broken", json!({}))];
        let report = validate_plan(&steps, &catalog);
        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .all(|e| e.code == ValidationCode::SchemaParseError));
        // one finding for the tool itself, one tagged with the step
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().any(|e| e.step_id.as_deref() == Some("step-1")));
    }

    #[test]
    fn test_template_into_string_input_checks_values() {
        let mut catalog = weather_email_catalog();
        catalog.register(tool(
            "forecastList",
            r#"{"type":"object"}"#,
            r#"{"type":"object","properties":{"days":{"type":"array","items":{"type":"number"}}}}"#,
        ));
        let steps = vec![
            PlanStep::with_id("step-1", "getWeather", json!({"city": "Oslo"})),
            PlanStep::with_id(
                "step-2",
                "sendEmail",
                json!({"body": {
                    "$fromTemplateString": "It is {0} degrees",
                    "$values": [{"$fromStep": "step-1", "$outputKey": "temperature"}]
                }}),
            ),
        ];
        let report = validate_plan(&steps, &catalog);
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_template_into_number_input_is_a_mismatch_but_values_still_checked() {
        let mut catalog = ToolCatalog::new();
        catalog.register(tool(
            "produce",
            r#"{"type":"object"}"#,
            r#"{"type":"object","properties":{"value":{"type":"number"}},"required":["value"]}"#,
        ));
        catalog.register(tool(
            "strict",
            r#"{"type":"object","properties":{"count":{"type":"number"}},"required":["count"]}"#,
            r#"{"type":"object"}"#,
        ));
        let steps = vec![
            PlanStep::with_id("step-1", "produce", json!({})),
            PlanStep::with_id(
                "step-2",
                "strict",
                json!({"count": {
                    "$fromTemplateString": "{0} and {1}",
                    "$values": [
                        {"$fromStep": "step-1", "$outputKey": "value"},
                        {"$fromStep": "step-1", "$outputKey": "missing"}
                    ]
                }}),
            ),
        ];
        let report = validate_plan(&steps, &catalog);
        assert!(!report.valid);
        let codes: Vec<ValidationCode> = report.errors.iter().map(|e| e.code).collect();
        // template-into-number mismatch plus the missing slot value
        assert!(codes.contains(&ValidationCode::TypeMismatch));
        assert!(codes.contains(&ValidationCode::OutputKeyMissing));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let steps = weather_then_email("temperature");
        let catalog = weather_email_catalog();
        assert_eq!(validate_plan(&steps, &catalog), validate_plan(&steps, &catalog));
    }

    #[test]
    fn test_valid_plan_has_no_errors() {
        let mut catalog = weather_email_catalog();
        catalog.register(tool(
            "describeWeather",
            r#"{"type":"object","properties":{"temperature":{"type":"number"}},"required":["temperature"]}"#,
            r#"{"type":"object","properties":{"text":{"type":"string"}}}"#,
        ));
        let steps = vec![
            PlanStep::with_id("step-1", "getWeather", json!({"city": "Oslo"})),
            PlanStep::with_id(
                "step-2",
                "describeWeather",
                json!({"temperature": {"$fromStep": "step-1", "$outputKey": "temperature"}}),
            ),
        ];
        let report = validate_plan(&steps, &catalog);
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }
}
