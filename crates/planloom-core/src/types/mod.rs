//! Core type definitions
//!
//! - Tool: executable handler with declared schemas
//! - Plan / PlanStep: the parsed tool-call DAG
//! - DependencyRef / TemplateRef: dataflow records inside argument trees

mod reference;
mod step;
mod tool;

pub use reference::{
    extract_dependency_step_ids, traverse_references, DependencyRef, TemplateRef, FROM_STEP_KEY,
    OUTPUT_KEY_KEY, TEMPLATE_STRING_KEY, VALUES_KEY,
};
pub use step::{Plan, PlanStep, PlanStepStatus, StepResult};
pub use tool::{FunctionTool, Tool, ToolCatalog, ToolError};
