//! Tool abstraction
//!
//! Tools are black boxes to the executor: a name, a pair of textual
//! JSON-Schema documents describing input and output, and an async
//! handler. Identity is by name; a catalog never holds two tools with
//! the same one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

/// Handler failure; the message becomes the step's recorded error.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolError {
    message: String,
}

impl ToolError {
    /// Create an error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ToolError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ToolError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// An executable tool with declared input/output schemas
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name
    fn name(&self) -> &str;

    /// Human/LLM-facing description
    fn description(&self) -> &str {
        ""
    }

    /// JSON-Schema document for the resolved argument object
    fn input_schema(&self) -> &str;

    /// JSON-Schema document for the handler output
    fn output_schema(&self) -> &str;

    /// Run the tool against resolved arguments
    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

type ToolHandler =
    Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// Closure-backed [`Tool`] for callers who do not want a struct per tool
pub struct FunctionTool {
    name: String,
    description: String,
    input_schema: String,
    output_schema: String,
    handler: ToolHandler,
}

impl FunctionTool {
    /// Wrap an async closure as a tool
    pub fn new<F, Fut>(
        name: impl Into<String>,
        input_schema: impl Into<String>,
        output_schema: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: input_schema.into(),
            output_schema: output_schema.into(),
            handler: Box::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> &str {
        &self.input_schema
    }

    fn output_schema(&self) -> &str {
        &self.output_schema
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        (self.handler)(args).await
    }
}

/// Name-keyed registry of tools.
///
/// Read-only once execution starts; clones share the underlying tools,
/// so one catalog can serve many concurrent executions.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// True when a tool with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All registered tool names
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Iterate over registered tools
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True when no tools are registered
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_tool_runs_closure() {
        tokio_test::block_on(async {
            let tool = FunctionTool::new(
                "echo",
                r#"{"type":"object","properties":{"message":{"type":"string"}}}"#,
                r#"{"type":"object","properties":{"echoed":{"type":"string"}}}"#,
                |args: Value| async move {
                    let message = args
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    Ok(json!({"echoed": message}))
                },
            )
            .with_description("echo back the message");

            let out = tool.call(json!({"message": "hi"})).await.expect("call");
            assert_eq!(out, json!({"echoed": "hi"}));
            assert_eq!(tool.description(), "echo back the message");
        });
    }

    #[test]
    fn test_catalog_lookup_by_name() {
        let mut catalog = ToolCatalog::new();
        catalog.register(Arc::new(FunctionTool::new(
            "noop",
            "{}",
            "{}",
            |_| async { Ok(Value::Null) },
        )));
        assert!(catalog.contains("noop"));
        assert!(catalog.get("noop").is_some());
        assert!(catalog.get("missing").is_none());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_tool_error_message() {
        let err = ToolError::from("boom");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.message(), "boom");
    }
}
