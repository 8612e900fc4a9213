//! Shared orchestration types: plans, tool-call records, run results,
//! session state, and the memory-mode configuration axis.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// How much of the memory system a run may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    /// No retrieval, no writes, no tool cache
    Baseline,
    /// Retrieval only
    Read,
    /// Retrieval plus evaluator writes
    Readwrite,
    /// Retrieval, writes, and signature-keyed tool caching
    ReadwriteCache,
}

impl MemoryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryMode::Baseline => "baseline",
            MemoryMode::Read => "read",
            MemoryMode::Readwrite => "readwrite",
            MemoryMode::ReadwriteCache => "readwrite_cache",
        }
    }

    pub fn parse(raw: &str) -> Option<MemoryMode> {
        match raw {
            "baseline" => Some(MemoryMode::Baseline),
            "read" => Some(MemoryMode::Read),
            "readwrite" => Some(MemoryMode::Readwrite),
            "readwrite_cache" => Some(MemoryMode::ReadwriteCache),
            _ => None,
        }
    }

    /// Memory retrieval allowed?
    pub fn reads_enabled(&self) -> bool {
        !matches!(self, MemoryMode::Baseline)
    }

    /// Evaluator writes allowed?
    pub fn writes_enabled(&self) -> bool {
        matches!(self, MemoryMode::Readwrite | MemoryMode::ReadwriteCache)
    }

    /// Tool-result caching allowed?
    pub fn cache_enabled(&self) -> bool {
        matches!(self, MemoryMode::ReadwriteCache)
    }
}

/// Per-run configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub memory_mode: MemoryMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub today_override: Option<NaiveDate>,
}

impl RunConfig {
    pub fn new(memory_mode: MemoryMode) -> Self {
        Self {
            memory_mode,
            today_override: None,
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today_override = Some(today);
        self
    }
}

/// Worker routes behind the in-scope gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    DataPresenter,
    InsightGenerator,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::DataPresenter => "data_presenter",
            Route::InsightGenerator => "insight_generator",
        }
    }

    pub fn parse(raw: &str) -> Option<Route> {
        match raw {
            "data_presenter" => Some(Route::DataPresenter),
            "insight_generator" => Some(Route::InsightGenerator),
            _ => None,
        }
    }
}

/// Inclusive ISO date range carried by a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    #[serde(alias = "start_date")]
    pub start_date: String,
    #[serde(alias = "end_date")]
    pub end_date: String,
}

/// One tool invocation in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// A validated execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub route: Route,
    #[serde(default, alias = "time_range", skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    pub steps: Vec<PlanStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Record of one executed (or cache-served) tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool: String,
    pub args: Value,
    pub signature: String,
    pub cached: bool,
    pub started_at: String,
    pub duration_ms: i64,
    pub result: Value,
}

/// Wall-clock per stage, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageLatencies {
    pub manager_route_ms: i64,
    pub worker_total_ms: i64,
    pub eval_ms: i64,
}

/// Evaluation outcome: three sub-scores, their mean, and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalReport {
    /// Which ground-truth spec was inferred (top_products, timeseries, why_drop_wow)
    pub kind: String,
    pub correctness: f64,
    pub completeness: f64,
    pub relevance: f64,
    pub quality: f64,
    pub notes: Vec<String>,
}

/// Conversational state threaded across scenario steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Product ids selected by the most recent top_products rendering,
    /// referenced by "those products" follow-ups.
    #[serde(default)]
    pub selected_product_ids: Vec<i64>,
}

/// Full record of one query execution. Append-only once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub id: String,
    pub created_at: String,
    pub user_id: String,
    pub config: RunConfig,
    pub query: String,
    pub augmented_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    pub ood: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    pub used_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_plan_text: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval: Option<EvalReport>,
    pub latencies: StageLatencies,
    /// Stage name -> injected card texts
    pub memory_injected: BTreeMap<String, Vec<String>>,
    pub session_after: SessionState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_mode_gates() {
        assert!(!MemoryMode::Baseline.reads_enabled());
        assert!(MemoryMode::Read.reads_enabled());
        assert!(!MemoryMode::Read.writes_enabled());
        assert!(MemoryMode::Readwrite.writes_enabled());
        assert!(!MemoryMode::Readwrite.cache_enabled());
        assert!(MemoryMode::ReadwriteCache.cache_enabled());
    }

    #[test]
    fn test_memory_mode_round_trip() {
        for mode in [
            MemoryMode::Baseline,
            MemoryMode::Read,
            MemoryMode::Readwrite,
            MemoryMode::ReadwriteCache,
        ] {
            assert_eq!(MemoryMode::parse(mode.as_str()), Some(mode));
        }
    }

    #[test]
    fn test_plan_accepts_snake_case_time_range() {
        let plan: Plan = serde_json::from_value(json!({
            "route": "data_presenter",
            "time_range": {"start_date": "2026-01-01", "end_date": "2026-01-31"},
            "steps": [{"tool": "list_products", "args": {}}]
        }))
        .unwrap();
        assert_eq!(plan.time_range.unwrap().start_date, "2026-01-01");
    }

    #[test]
    fn test_route_serializes_snake_case() {
        let json = serde_json::to_string(&Route::InsightGenerator).unwrap();
        assert_eq!(json, r#""insight_generator""#);
    }
}
