//! Plan and step type definitions
//!
//! A plan is an ordered list of steps; each step invokes one named tool
//! with an argument tree. Step order is informational (results come back
//! in it) but never implies execution order: the executor derives
//! ordering from the references embedded in arguments.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a plan step.
///
/// Within one execution a step moves monotonically:
/// pending → (executing → done | failed) | skipped. `Timeout` is
/// reserved for deadline-aware executors and is never assigned here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    Pending,
    Executing,
    Done,
    Failed,
    Skipped,
    Timeout,
}

impl Default for PlanStepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// A single step in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Fresh identifier assigned at parse time, unique within the plan
    pub id: String,
    /// Current lifecycle status
    #[serde(default)]
    pub status: PlanStepStatus,
    /// Name of the tool to invoke
    #[serde(rename = "toolName")]
    pub tool_name: String,
    /// Argument tree; may embed dependency and template references
    #[serde(default)]
    pub arguments: Value,
    /// Model-authored rationale for this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
}

impl PlanStep {
    /// Create a pending step with a fresh identifier
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: PlanStepStatus::default(),
            tool_name: tool_name.into(),
            arguments,
            thought: None,
        }
    }

    /// Create a pending step with a caller-chosen identifier
    pub fn with_id(id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            status: PlanStepStatus::default(),
            tool_name: tool_name.into(),
            arguments,
            thought: None,
        }
    }

    /// Attach the model's rationale
    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }
}

/// An ordered sequence of steps forming a DAG via references
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Ordered steps
    pub steps: Vec<PlanStep>,
    /// The model's reasoning text, when elicited alongside the plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub think: Option<String>,
}

impl Plan {
    /// Create a plan from parsed steps
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps, think: None }
    }

    /// Attach the model's reasoning text
    pub fn with_think(mut self, think: Option<String>) -> Self {
        self.think = think;
        self
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when the plan has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Settled outcome of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Identifier of the step this result belongs to
    #[serde(rename = "stepId")]
    pub step_id: String,
    /// Tool the step named
    #[serde(rename = "toolName")]
    pub tool_name: String,
    /// Arguments as resolved at dispatch time (empty object when
    /// resolution never happened, original tree when skipped at the end)
    pub arguments: Value,
    /// Handler output, or null when the step did not complete
    pub output: Value,
    /// Failure or skip message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
