//! Scenario-runner integration: per-config isolation, aggregates, cache
//! accounting, and the baseline-vs-memory comparison.

use async_trait::async_trait;
use mnemo::dataset::SellerDataset;
use mnemo::llm::{Completion, CompletionRequest, LLMClient, LLMError};
use mnemo::orchestrator::types::MemoryMode;
use mnemo::scenario::{Scenario, ScenarioRunner};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn dataset() -> Arc<SellerDataset> {
    Arc::new(SellerDataset::generate(42, "2025-10-01".parse().unwrap(), 120))
}

fn scenario(steps: &[&str]) -> Scenario {
    let steps: Vec<serde_json::Value> = steps.iter().map(|q| json!({"query": q})).collect();
    Scenario::from_json(
        &json!({
            "id": "test-scenario",
            "title": "Test",
            "seed": 42,
            "today": "2026-02-04",
            "steps": steps,
        })
        .to_string(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_runner_aggregates_and_session_threading() {
    let temp_dir = TempDir::new().unwrap();
    let runner = ScenarioRunner::new(dataset(), None, temp_dir.path().to_path_buf());

    let scenario = scenario(&[
        "top 5 products by sales last month",
        "show traffic for those products last month",
    ]);

    let report = runner
        .run(&scenario, "demo", &[MemoryMode::Readwrite], 1)
        .await
        .unwrap();

    assert_eq!(report.scenario, "test-scenario");
    assert_eq!(report.summaries.len(), 1);

    let summary = &report.summaries[0];
    assert_eq!(summary.config, "readwrite");
    assert_eq!(summary.runs.len(), 2);
    // Both steps hit their specs exactly with the heuristic planner
    assert!(summary.aggregate.avg_quality > 0.95);
    assert_eq!(summary.aggregate.question_level_acc_rate, 1.0);
    assert_eq!(summary.aggregate.tool_calls_total, 2);
    assert!(summary.aggregate.p90_latency_ms.is_some());

    // Session threading: step 2 planned a timeseries, which only happens
    // when "those products" resolved to step 1's selection
    assert_eq!(summary.runs[1].scores.as_ref().unwrap().kind, "timeseries");
}

#[tokio::test]
async fn test_runner_cache_hits_on_repeated_step() {
    let temp_dir = TempDir::new().unwrap();
    let runner = ScenarioRunner::new(dataset(), None, temp_dir.path().to_path_buf());

    let query = "What were the sales for my top 10 products last month?";
    let scenario = scenario(&[query, query]);

    let report = runner
        .run(&scenario, "demo", &[MemoryMode::ReadwriteCache], 1)
        .await
        .unwrap();

    let summary = &report.summaries[0];
    assert_eq!(summary.runs[0].cached_tool_calls, 0);
    assert!(summary.runs[1].cached_tool_calls >= 1);
    assert!(summary.aggregate.cached_tool_calls_total >= 1);
}

#[tokio::test]
async fn test_runner_isolates_configs() {
    let temp_dir = TempDir::new().unwrap();
    let runner = ScenarioRunner::new(dataset(), None, temp_dir.path().to_path_buf());

    let scenario = scenario(&["top 10 products by sales last month"]);
    runner
        .run(
            &scenario,
            "demo",
            &[MemoryMode::Readwrite, MemoryMode::Baseline],
            1,
        )
        .await
        .unwrap();

    // Each config got its own store file
    assert!(temp_dir.path().join("test-scenario-readwrite.db").exists());
    assert!(temp_dir.path().join("test-scenario-baseline.db").exists());
}

/// Plans the wrong metric unless a memory card reached the prompt.
struct ConfusedPlannerLlm;

#[async_trait]
impl LLMClient for ConfusedPlannerLlm {
    fn name(&self) -> &str {
        "confused"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LLMError> {
        let reminded = request
            .instructions
            .as_deref()
            .map_or(false, |i| i.contains("MEMORY CARD"));
        let metric = if reminded { "sales" } else { "units" };
        let plan = json!({
            "route": "data_presenter",
            "timeRange": {"startDate": "2026-01-01", "endDate": "2026-01-31"},
            "steps": [{
                "tool": "top_products",
                "args": {
                    "metric": metric,
                    "startDate": "2026-01-01",
                    "endDate": "2026-01-31",
                    "limit": 10,
                },
            }],
        });
        Ok(Completion {
            text: plan.to_string(),
            latency_ms: 1,
            usage: None,
        })
    }
}

#[tokio::test]
async fn test_runner_memory_comparison_read_beats_baseline() {
    let temp_dir = TempDir::new().unwrap();
    let runner = ScenarioRunner::new(
        dataset(),
        Some(Arc::new(ConfusedPlannerLlm)),
        temp_dir.path().to_path_buf(),
    );

    let scenario = scenario(&["What were the sales for my top 10 products last month?"]);
    let report = runner
        .run(&scenario, "demo", &[MemoryMode::Baseline, MemoryMode::Read], 1)
        .await
        .unwrap();

    let baseline = &report.summaries[0];
    let read = &report.summaries[1];
    assert_eq!(baseline.config, "baseline");
    assert_eq!(read.config, "read");
    assert!(
        read.aggregate.avg_quality > baseline.aggregate.avg_quality,
        "read {} vs baseline {}",
        read.aggregate.avg_quality,
        baseline.aggregate.avg_quality
    );
}
