//! Plan elicitation
//!
//! Builds the planning prompt from the tool catalog, sends it through
//! an [`LlmClient`], and parses the response into a typed [`Plan`].
//! The model answers with a `<think>` block followed by a `<plan>`
//! block holding a JSON array of steps; an answer without a plan block
//! is a refusal, not an error.

use std::collections::HashSet;
use std::fmt::Write;

use thiserror::Error;
use tracing::{debug, info};

use planloom_core::parser::{parse_model_output, parse_plan_steps, ParseError};
use planloom_core::types::{Plan, Tool, ToolCatalog};

use crate::client::{LlmClient, LlmError, LlmRequest};

const MAX_PROMPT_LOG_CHARS: usize = 4_000;
const MAX_OUTPUT_LOG_CHARS: usize = 8_000;

/// Planning errors
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("No response from model")]
    EmptyResponse,
    #[error("No plan generated")]
    NoPlan,
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Planner configuration
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub model: String,
    pub temperature: f32,
    /// Extra instructions appended to the built-in protocol prompt
    pub system_prompt: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            system_prompt: String::new(),
        }
    }
}

/// LLM-backed planner
pub struct Planner<C: LlmClient> {
    pub client: C,
    pub config: PlannerConfig,
}

impl<C: LlmClient> Planner<C> {
    pub fn new(client: C, config: PlannerConfig) -> Self {
        Self { client, config }
    }

    /// Ask the model for a plan. `Ok(None)` means the model declined
    /// to emit a plan block.
    pub async fn generate_plan(
        &self,
        query: &str,
        tools: &ToolCatalog,
    ) -> Result<Option<Plan>, PlanError> {
        let system = build_system_prompt(&self.config.system_prompt, tools);
        info!(
            model = %self.config.model,
            temperature = self.config.temperature,
            query_len = query.len(),
            tool_count = tools.len(),
            "planner request prepared"
        );
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                system_prompt = %truncate_for_log(&system, MAX_PROMPT_LOG_CHARS),
                user_prompt = %truncate_for_log(query, MAX_PROMPT_LOG_CHARS),
                "planner prompts"
            );
        }

        let response = self
            .client
            .complete(LlmRequest {
                system,
                user: query.to_string(),
                model: self.config.model.clone(),
                temperature: self.config.temperature,
            })
            .await?;
        if response.trim().is_empty() {
            return Err(PlanError::EmptyResponse);
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                llm_output = %truncate_for_log(&response, MAX_OUTPUT_LOG_CHARS),
                "planner raw llm output"
            );
        }

        let output = parse_model_output(&response);
        let Some(plan_text) = output.plan else {
            info!("planner output contained no plan block");
            return Ok(None);
        };
        let steps = parse_plan_steps(&plan_text)?;
        info!(step_count = steps.len(), "planner parsed plan");
        Ok(Some(Plan::new(steps).with_think(output.think)))
    }

    /// Ask the model for a plan, treating a refusal as an error.
    pub async fn plan(&self, query: &str, tools: &ToolCatalog) -> Result<Plan, PlanError> {
        self.generate_plan(query, tools)
            .await?
            .ok_or(PlanError::NoPlan)
    }
}

fn build_system_prompt(extra: &str, tools: &ToolCatalog) -> String {
    let mut system = String::new();
    system.push_str(
        "You are a planning assistant. Decompose the user's request into tool calls.\n\n",
    );
    system.push_str("Answer with exactly two tagged blocks:\n");
    system.push_str("<think>your reasoning</think>\n");
    system.push_str("<plan>a JSON array of steps</plan>\n\n");
    system.push_str("Each step is an object:\n");
    system.push_str(r#"{"toolName": "name", "arguments": {…}, "thought": "why this step"}"#);
    system.push('\n');
    system.push_str("\nPlanning Rules:\n");
    system.push_str("1) Use only tool names listed in the Tool Catalog.\n");
    system.push_str("2) Arguments must satisfy the tool's input schema.\n");
    system.push_str(
        "3) To pass one step's output into another, use {\"fromStep\": <step index>, \"outputKey\": \"dotted.path\"}.\n",
    );
    system.push_str(
        "4) Inside string arguments, interpolate outputs with {<step index>.dotted.path} markers.\n",
    );
    system.push_str("5) Step indices are zero-based positions in the plan array.\n");
    system.push_str("6) If no tool call is needed, omit the <plan> block entirely.\n");
    if !extra.trim().is_empty() {
        system.push('\n');
        system.push_str(extra.trim());
        system.push('\n');
    }
    system.push_str("\nTool Catalog:\n");
    let mut names = tools.names();
    names.sort_unstable();
    for name in names {
        if let Some(tool) = tools.get(&name) {
            append_catalog_entry(&mut system, tool.as_ref());
        }
    }
    system
}

fn append_catalog_entry(buf: &mut String, tool: &dyn Tool) {
    let _ = writeln!(buf, "- name: {}", tool.name());
    if !tool.description().is_empty() {
        let _ = writeln!(buf, "  description: {}", tool.description());
    }
    append_schema_fields(buf, "input_fields", tool.input_schema());
    append_schema_fields(buf, "output_fields", tool.output_schema());
    let _ = writeln!(buf, "  input_schema: {}", tool.input_schema().trim());
    let _ = writeln!(buf, "  output_schema: {}", tool.output_schema().trim());
}

fn append_schema_fields(buf: &mut String, label: &str, schema_text: &str) {
    let Ok(schema) = planloom_core::parser::lenient_from_str(schema_text) else {
        let _ = writeln!(buf, "  {}: []", label);
        return;
    };
    let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) else {
        let _ = writeln!(buf, "  {}: []", label);
        return;
    };

    let required: HashSet<&str> = schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|names| names.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let mut keys: Vec<&str> = properties.keys().map(String::as_str).collect();
    keys.sort_unstable();

    let _ = writeln!(buf, "  {}:", label);
    for key in keys {
        let Some(field) = properties.get(key) else {
            continue;
        };
        let required_label = if required.contains(key) {
            "required"
        } else {
            "optional"
        };
        let _ = writeln!(
            buf,
            "    - {} ({}, {})",
            key,
            schema_type_hint(field),
            required_label
        );
    }
}

fn schema_type_hint(schema: &serde_json::Value) -> String {
    if let Some(type_name) = schema.get("type").and_then(|v| v.as_str()) {
        return type_name.to_string();
    }
    if schema.get("enum").is_some() {
        return "enum".to_string();
    }
    if schema.get("anyOf").is_some() {
        return "anyOf".to_string();
    }
    if schema.get("oneOf").is_some() {
        return "oneOf".to_string();
    }
    "any".to_string()
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}
