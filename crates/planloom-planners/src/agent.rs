//! Public pipeline surface
//!
//! [`PlanAgent`] wires the three stages together: elicit a plan from
//! the model, optionally pre-flight validate it against the catalog's
//! schemas, and execute it. Each stage stays independently usable;
//! the agent is only the composition.

use thiserror::Error;

use planloom_core::executor::Executor;
use planloom_core::types::{Plan, StepResult, ToolCatalog};
use planloom_core::validator::{validate_plan, PlanValidation};

use crate::client::LlmClient;
use crate::planner::{PlanError, Planner, PlannerConfig};

/// Agent errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("plan failed validation with {} error(s)", .0.errors.len())]
    InvalidPlan(PlanValidation),
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct PlanAgentConfig {
    pub planner: PlannerConfig,
    /// Run the validator before executing a generated plan
    pub validate_before_execute: bool,
}

impl Default for PlanAgentConfig {
    fn default() -> Self {
        Self {
            planner: PlannerConfig::default(),
            validate_before_execute: true,
        }
    }
}

/// Plan → validate → execute, over one tool catalog
pub struct PlanAgent<C: LlmClient> {
    planner: Planner<C>,
    tools: ToolCatalog,
    validate_before_execute: bool,
}

impl<C: LlmClient> PlanAgent<C> {
    /// Create an agent with default configuration
    pub fn new(client: C, tools: ToolCatalog) -> Self {
        Self::with_config(client, tools, PlanAgentConfig::default())
    }

    /// Create an agent with explicit configuration
    pub fn with_config(client: C, tools: ToolCatalog, config: PlanAgentConfig) -> Self {
        Self {
            planner: Planner::new(client, config.planner),
            tools,
            validate_before_execute: config.validate_before_execute,
        }
    }

    /// The catalog this agent plans against
    pub fn tools(&self) -> &ToolCatalog {
        &self.tools
    }

    /// Elicit a plan; `Ok(None)` when the model declines
    pub async fn generate_plan(&self, query: &str) -> Result<Option<Plan>, AgentError> {
        Ok(self.planner.generate_plan(query, &self.tools).await?)
    }

    /// Elicit a plan, treating a refusal as an error
    pub async fn plan(&self, query: &str) -> Result<Plan, AgentError> {
        Ok(self.planner.plan(query, &self.tools).await?)
    }

    /// Type-check a plan against the catalog's schemas
    pub fn validate(&self, plan: &Plan) -> PlanValidation {
        validate_plan(&plan.steps, &self.tools)
    }

    /// Execute an already-validated (or trusted) plan
    pub async fn execute(&self, plan: &Plan) -> Vec<StepResult> {
        Executor::new(self.tools.clone()).execute(&plan.steps).await
    }

    /// Full pipeline: plan, optionally validate, execute.
    pub async fn run(&self, query: &str) -> Result<Vec<StepResult>, AgentError> {
        let plan = self.plan(query).await?;
        if self.validate_before_execute {
            let report = self.validate(&plan);
            if !report.valid {
                return Err(AgentError::InvalidPlan(report));
            }
        }
        Ok(self.execute(&plan).await)
    }
}
