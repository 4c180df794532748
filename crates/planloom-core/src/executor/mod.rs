//! Plan execution
//!
//! A wave-based scheduler: every pending step whose dependencies are
//! all done dispatches concurrently, the wave joins, and readiness is
//! recomputed. Failures stay local to their step; dependents of a
//! failed step never become ready and are reaped as skipped once no
//! progress is possible.
//!
//! Argument resolution is pure and happens at dispatch time against
//! the frozen outputs of earlier waves, so no locking is needed: the
//! wave join provides the happens-before edge.

use std::collections::HashMap;

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::path;
use crate::types::{
    extract_dependency_step_ids, DependencyRef, PlanStep, PlanStepStatus, StepResult, TemplateRef,
    ToolCatalog,
};

/// Argument-resolution failure; reported on the step, never thrown.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ResolveError(String);

/// The executor - runs a parsed plan against a tool catalog
pub struct Executor {
    tools: ToolCatalog,
    max_parallel: usize,
}

impl Executor {
    /// Create an executor over a catalog
    pub fn new(tools: ToolCatalog) -> Self {
        Self {
            tools,
            max_parallel: usize::MAX,
        }
    }

    /// Cap how many ready steps one wave may dispatch.
    ///
    /// Readiness is recomputed every iteration, so capping changes
    /// batching, never ordering.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Execute every step, maximally parallel, and return one result
    /// per step in input order.
    pub async fn execute(&self, steps: &[PlanStep]) -> Vec<StepResult> {
        let mut status: HashMap<String, PlanStepStatus> = steps
            .iter()
            .map(|step| (step.id.clone(), PlanStepStatus::Pending))
            .collect();
        let dependencies: HashMap<String, Vec<String>> = steps
            .iter()
            .map(|step| (step.id.clone(), extract_dependency_step_ids(&step.arguments)))
            .collect();
        let mut outputs: HashMap<String, Value> = HashMap::new();
        let mut results: Vec<StepResult> = Vec::new();

        loop {
            let ready: Vec<usize> = steps
                .iter()
                .enumerate()
                .filter(|(_, step)| {
                    status[&step.id] == PlanStepStatus::Pending
                        && dependencies[&step.id]
                            .iter()
                            .all(|dep| status.get(dep) == Some(&PlanStepStatus::Done))
                })
                .map(|(index, _)| index)
                .take(self.max_parallel)
                .collect();
            if ready.is_empty() {
                break;
            }

            let mut in_flight = FuturesUnordered::new();
            for index in ready {
                let step = &steps[index];
                let Some(tool) = self.tools.get(&step.tool_name) else {
                    status.insert(step.id.clone(), PlanStepStatus::Skipped);
                    tracing::warn!(step_id = %step.id, tool = %step.tool_name, "tool not found");
                    results.push(StepResult {
                        step_id: step.id.clone(),
                        tool_name: step.tool_name.clone(),
                        arguments: Value::Object(Map::new()),
                        output: Value::Null,
                        error: Some(format!("Tool \"{}\" not found", step.tool_name)),
                    });
                    continue;
                };
                let resolved = match resolve_value(&step.arguments, &outputs) {
                    Ok(resolved) => resolved,
                    Err(error) => {
                        status.insert(step.id.clone(), PlanStepStatus::Skipped);
                        tracing::warn!(
                            step_id = %step.id,
                            tool = %step.tool_name,
                            error = %error,
                            "argument resolution failed"
                        );
                        results.push(StepResult {
                            step_id: step.id.clone(),
                            tool_name: step.tool_name.clone(),
                            arguments: Value::Object(Map::new()),
                            output: Value::Null,
                            error: Some(format!("Failed to resolve arguments: {}", error)),
                        });
                        continue;
                    }
                };

                status.insert(step.id.clone(), PlanStepStatus::Executing);
                tracing::info!(step_id = %step.id, tool = %step.tool_name, "step started");
                let step_id = step.id.clone();
                let tool_name = step.tool_name.clone();
                in_flight.push(async move {
                    let outcome = tool.call(resolved.clone()).await;
                    (step_id, tool_name, resolved, outcome)
                });
            }

            while let Some((step_id, tool_name, arguments, outcome)) = in_flight.next().await {
                match outcome {
                    Ok(output) => {
                        status.insert(step_id.clone(), PlanStepStatus::Done);
                        outputs.insert(step_id.clone(), output.clone());
                        tracing::info!(step_id = %step_id, tool = %tool_name, "step completed");
                        results.push(StepResult {
                            step_id,
                            tool_name,
                            arguments,
                            output,
                            error: None,
                        });
                    }
                    Err(error) => {
                        status.insert(step_id.clone(), PlanStepStatus::Failed);
                        tracing::error!(
                            step_id = %step_id,
                            tool = %tool_name,
                            error = %error,
                            "step failed"
                        );
                        results.push(StepResult {
                            step_id,
                            tool_name,
                            arguments,
                            output: Value::Null,
                            error: Some(error.to_string()),
                        });
                    }
                }
            }
        }

        // whatever is still pending can never run: its upstream failed
        // or was skipped
        for step in steps {
            if status[&step.id] == PlanStepStatus::Pending {
                status.insert(step.id.clone(), PlanStepStatus::Skipped);
                tracing::info!(step_id = %step.id, tool = %step.tool_name, "step skipped");
                results.push(StepResult {
                    step_id: step.id.clone(),
                    tool_name: step.tool_name.clone(),
                    arguments: step.arguments.clone(),
                    output: Value::Null,
                    error: Some("Skipped: dependencies not satisfied".to_string()),
                });
            }
        }

        let position: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(index, step)| (step.id.as_str(), index))
            .collect();
        results.sort_by_key(|result| position.get(result.step_id.as_str()).copied());
        results
    }
}

/// Replace every reference in an argument tree with concrete values
/// from completed step outputs. Plain JSON passes through untouched.
pub fn resolve_value(
    value: &Value,
    outputs: &HashMap<String, Value>,
) -> Result<Value, ResolveError> {
    if let Some(dep) = DependencyRef::from_value(value) {
        return Ok(resolve_dependency(&dep, outputs)?);
    }
    if let Some(template) = TemplateRef::from_value(value) {
        return Ok(Value::String(resolve_template(&template, outputs)?));
    }
    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value(item, outputs)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, item) in map {
                out.insert(key.clone(), resolve_value(item, outputs)?);
            }
            Ok(Value::Object(out))
        }
        primitive => Ok(primitive.clone()),
    }
}

fn resolve_dependency(
    dep: &DependencyRef,
    outputs: &HashMap<String, Value>,
) -> Result<Value, ResolveError> {
    let output = outputs
        .get(&dep.from_step)
        .ok_or_else(|| ResolveError(format!("Step {} output not found", dep.from_step)))?;
    let segments = path::parse(&dep.output_key);
    Ok(path::get_nested_value(output, &segments)
        .cloned()
        .unwrap_or(Value::Null))
}

fn resolve_template(
    template: &TemplateRef,
    outputs: &HashMap<String, Value>,
) -> Result<String, ResolveError> {
    let mut text = template.template.clone();
    for (slot, dep) in template.values.iter().enumerate() {
        let resolved = resolve_dependency(dep, outputs)?;
        let rendered = stringify(&resolved);
        text = text.replacen(&format!("{{{}}}", slot), &rendered, 1);
    }
    Ok(text)
}

/// Interpolation rendering: strings go in bare, everything else as
/// compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FunctionTool, PlanStep, Tool, ToolError};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::time::sleep;

    const OBJECT_SCHEMA: &str = r#"{"type":"object"}"#;

    fn catalog(tools: Vec<Arc<dyn Tool>>) -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        for tool in tools {
            catalog.register(tool);
        }
        catalog
    }

    fn constant_tool(name: &str, output: Value) -> Arc<dyn Tool> {
        Arc::new(FunctionTool::new(name, OBJECT_SCHEMA, OBJECT_SCHEMA, move |_| {
            let output = output.clone();
            async move { Ok(output) }
        }))
    }

    fn failing_tool(name: &str, message: &str) -> Arc<dyn Tool> {
        let message = message.to_string();
        Arc::new(FunctionTool::new(name, OBJECT_SCHEMA, OBJECT_SCHEMA, move |_| {
            let message = message.clone();
            async move { Err(ToolError::new(message)) }
        }))
    }

    fn echo_tool(name: &str) -> Arc<dyn Tool> {
        Arc::new(FunctionTool::new(name, OBJECT_SCHEMA, OBJECT_SCHEMA, |args| async move {
            Ok(args)
        }))
    }

    #[test]
    fn test_dependency_outputs_flow_into_arguments() {
        tokio_test::block_on(async {
            let executor = Executor::new(catalog(vec![
                constant_tool("produce", json!({"temperature": 21.5})),
                echo_tool("consume"),
            ]));
            let steps = vec![
                PlanStep::with_id("s1", "produce", json!({})),
                PlanStep::with_id(
                    "s2",
                    "consume",
                    json!({"value": {"$fromStep": "s1", "$outputKey": "temperature"}}),
                ),
            ];
            let results = executor.execute(&steps).await;
            assert_eq!(results.len(), 2);
            assert_eq!(results[1].arguments, json!({"value": 21.5}));
            assert_eq!(results[1].output, json!({"value": 21.5}));
            assert!(results[1].error.is_none());
        });
    }

    #[test]
    fn test_independent_steps_run_in_the_same_wave() {
        tokio_test::block_on(async {
            let starts: Arc<std::sync::Mutex<Vec<Instant>>> =
                Arc::new(std::sync::Mutex::new(Vec::new()));
            let starts_ref = starts.clone();
            let slow = Arc::new(FunctionTool::new(
                "slow",
                OBJECT_SCHEMA,
                OBJECT_SCHEMA,
                move |_| {
                    let starts = starts_ref.clone();
                    async move {
                        starts.lock().expect("lock").push(Instant::now());
                        sleep(Duration::from_millis(50)).await;
                        Ok(Value::Null)
                    }
                },
            ));
            let executor = Executor::new(catalog(vec![slow]));
            let steps = vec![
                PlanStep::with_id("s1", "slow", json!({})),
                PlanStep::with_id("s2", "slow", json!({})),
            ];
            let results = executor.execute(&steps).await;
            assert!(results.iter().all(|r| r.error.is_none()));

            let starts = starts.lock().expect("lock");
            assert_eq!(starts.len(), 2);
            let gap = starts[1].duration_since(starts[0]);
            assert!(gap < Duration::from_millis(20), "steps did not overlap: {:?}", gap);
        });
    }

    #[test]
    fn test_failure_skips_transitive_dependents() {
        tokio_test::block_on(async {
            let executor = Executor::new(catalog(vec![
                failing_tool("explode", "boom"),
                echo_tool("consume"),
            ]));
            let steps = vec![
                PlanStep::with_id("s1", "explode", json!({})),
                PlanStep::with_id(
                    "s2",
                    "consume",
                    json!({"value": {"$fromStep": "s1", "$outputKey": ""}}),
                ),
                PlanStep::with_id(
                    "s3",
                    "consume",
                    json!({"value": {"$fromStep": "s2", "$outputKey": ""}}),
                ),
            ];
            let results = executor.execute(&steps).await;
            assert_eq!(results[0].error.as_deref(), Some("boom"));
            assert_eq!(results[0].output, Value::Null);
            assert!(results[1].error.as_deref().unwrap().contains("Skipped"));
            assert!(results[2].error.as_deref().unwrap().contains("Skipped"));
            // skipped steps surface their original, unresolved arguments
            assert_eq!(
                results[1].arguments,
                json!({"value": {"$fromStep": "s1", "$outputKey": ""}})
            );
        });
    }

    #[test]
    fn test_missing_tool_skips_only_its_branch() {
        tokio_test::block_on(async {
            let executor = Executor::new(catalog(vec![constant_tool("ok", json!({"v": 1}))]));
            let steps = vec![
                PlanStep::with_id("s1", "ghost", json!({})),
                PlanStep::with_id(
                    "s2",
                    "ok",
                    json!({"value": {"$fromStep": "s1", "$outputKey": "v"}}),
                ),
                PlanStep::with_id("s3", "ok", json!({})),
            ];
            let results = executor.execute(&steps).await;
            assert_eq!(results[0].error.as_deref(), Some("Tool \"ghost\" not found"));
            assert_eq!(results[0].arguments, json!({}));
            assert!(results[1].error.as_deref().unwrap().contains("Skipped"));
            assert!(results[2].error.is_none());
        });
    }

    #[test]
    fn test_results_come_back_in_input_order() {
        tokio_test::block_on(async {
            let quick = constant_tool("quick", json!({"v": 1}));
            let slow = Arc::new(FunctionTool::new(
                "slow",
                OBJECT_SCHEMA,
                OBJECT_SCHEMA,
                |_| async {
                    sleep(Duration::from_millis(30)).await;
                    Ok(json!({"v": 2}))
                },
            ));
            let executor = Executor::new(catalog(vec![quick, slow]));
            let steps = vec![
                PlanStep::with_id("s1", "slow", json!({})),
                PlanStep::with_id("s2", "quick", json!({})),
                PlanStep::with_id("s3", "quick", json!({})),
            ];
            let results = executor.execute(&steps).await;
            let ids: Vec<&str> = results.iter().map(|r| r.step_id.as_str()).collect();
            assert_eq!(ids, vec!["s1", "s2", "s3"]);
        });
    }

    #[test]
    fn test_max_parallel_one_still_completes_everything() {
        tokio_test::block_on(async {
            let executor =
                Executor::new(catalog(vec![constant_tool("ok", json!({}))])).with_max_parallel(1);
            let steps = vec![
                PlanStep::with_id("s1", "ok", json!({})),
                PlanStep::with_id("s2", "ok", json!({})),
                PlanStep::with_id("s3", "ok", json!({})),
            ];
            let results = executor.execute(&steps).await;
            assert_eq!(results.len(), 3);
            assert!(results.iter().all(|r| r.error.is_none()));
        });
    }

    #[test]
    fn test_template_arguments_interpolate() {
        tokio_test::block_on(async {
            let executor = Executor::new(catalog(vec![
                constant_tool("price", json!({"amount": 42, "currency": "USD"})),
                echo_tool("report"),
            ]));
            let steps = vec![
                PlanStep::with_id("s1", "price", json!({})),
                PlanStep::with_id(
                    "s2",
                    "report",
                    json!({"body": {
                        "$fromTemplateString": "Costs {0} {1}",
                        "$values": [
                            {"$fromStep": "s1", "$outputKey": "amount"},
                            {"$fromStep": "s1", "$outputKey": "currency"}
                        ]
                    }}),
                ),
            ];
            let results = executor.execute(&steps).await;
            assert_eq!(results[1].arguments, json!({"body": "Costs 42 USD"}));
        });
    }

    #[test]
    fn test_resolve_value_is_identity_on_plain_json() {
        let outputs = HashMap::new();
        let value = json!({"a": [1, "two", null, {"b": true}]});
        assert_eq!(resolve_value(&value, &outputs).expect("resolve"), value);
    }

    #[test]
    fn test_resolve_template_leaves_no_bound_markers() {
        let mut outputs = HashMap::new();
        outputs.insert("s1".to_string(), json!({"x": 1, "y": [2, 3]}));
        let template = TemplateRef::new(
            "{0} then {1}",
            vec![
                DependencyRef::new("s1", "x"),
                DependencyRef::new("s1", "y"),
            ],
        );
        let text = resolve_template(&template, &outputs).expect("resolve");
        assert_eq!(text, "1 then [2,3]");
        for slot in 0..template.values.len() {
            assert!(!text.contains(&format!("{{{}}}", slot)));
        }
    }

    #[test]
    fn test_resolve_missing_output_is_an_error() {
        let outputs = HashMap::new();
        let value = json!({"$fromStep": "ghost", "$outputKey": "x"});
        let err = resolve_value(&value, &outputs).expect_err("must fail");
        assert_eq!(err.to_string(), "Step ghost output not found");
    }

    #[test]
    fn test_resolve_missing_nested_key_becomes_null() {
        let mut outputs = HashMap::new();
        outputs.insert("s1".to_string(), json!({"x": 1}));
        let value = json!({"$fromStep": "s1", "$outputKey": "absent.deep"});
        assert_eq!(resolve_value(&value, &outputs).expect("resolve"), Value::Null);
    }
}
