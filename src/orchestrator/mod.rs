//! Orchestration core
//!
//! Routes a query through manager → planner → executor →
//! (presenter | insight generator) → evaluator → memory writer.

pub mod agents;
pub mod core;
pub mod evaluator;
pub mod executor;
pub mod leverager;
pub mod manager;
pub mod planner;
pub mod types;

pub use agents::{DataPresenter, InsightGenerator, INSIGHT_PLACEHOLDER};
pub use core::{Orchestrator, OOD_RESPONSE, WEEK_CONVENTION_RULE};
pub use evaluator::{EvalSpec, Evaluator};
pub use executor::{Executor, MAX_PLAN_STEPS, TOOL_CACHE_NAMESPACE};
pub use leverager::{Leverager, MemoryCard, Stage};
pub use manager::{Manager, RouteDecision};
pub use planner::{Planner, PlannerInput, PlannerOutput};
pub use types::{
    EvalReport, MemoryMode, Plan, PlanStep, Route, RunConfig, RunResult, SessionState,
    StageLatencies, TimeRange, ToolCallRecord,
};
