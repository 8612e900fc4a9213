//! Scenario runner
//!
//! Replays a scripted multi-step scenario under several memory
//! configurations and aggregates the comparison. Each configuration gets
//! its own physical state store so learned memory never leaks between
//! configurations; session state threads across steps within a pass but
//! not across passes.

use crate::dataset::SellerDataset;
use crate::db::StateStore;
use crate::llm::LLMClient;
use crate::orchestrator::core::Orchestrator;
use crate::orchestrator::types::{EvalReport, MemoryMode, RunConfig, SessionState};
use crate::tools::ToolRegistry;
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A scripted multi-step scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    pub seed: u64,
    pub today: NaiveDate,
    pub steps: Vec<ScenarioStep>,
}

/// One scripted query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub query: String,
}

impl Scenario {
    /// Parse and validate a scenario document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let scenario: Scenario =
            serde_json::from_str(raw).context("Failed to parse scenario JSON")?;
        if scenario.steps.is_empty() {
            bail!("Scenario must contain at least one step");
        }
        Ok(scenario)
    }

    /// Load a scenario from a file.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        Self::from_json(&raw)
    }
}

/// Per-step outcome collected for the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step_id: String,
    pub query: String,
    pub tool_calls: usize,
    pub cached_tool_calls: usize,
    pub latency_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<EvalReport>,
    pub question_level_acc: bool,
}

/// Aggregates over every step of every pass for one configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub avg_quality: f64,
    pub question_level_acc_rate: f64,
    pub tool_calls_total: usize,
    pub cached_tool_calls_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p90_latency_ms: Option<i64>,
}

/// All runs and aggregates for one configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub config: String,
    pub runs: Vec<StepOutcome>,
    pub aggregate: Aggregate,
}

/// The comparison report across configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub summaries: Vec<ConfigSummary>,
}

/// p90 by rank: `sorted[floor((n-1) * 0.9)]`, `None` when empty.
pub fn p90(latencies: &[i64]) -> Option<i64> {
    if latencies.is_empty() {
        return None;
    }
    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();
    let index = ((sorted.len() - 1) as f64 * 0.9).floor() as usize;
    Some(sorted[index])
}

/// Runs scenarios against per-config orchestrators.
pub struct ScenarioRunner {
    dataset: Arc<SellerDataset>,
    llm: Option<Arc<dyn LLMClient>>,
    state_dir: PathBuf,
}

impl ScenarioRunner {
    pub fn new(
        dataset: Arc<SellerDataset>,
        llm: Option<Arc<dyn LLMClient>>,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            dataset,
            llm,
            state_dir,
        }
    }

    /// Run the scenario once per configuration, `repeat` passes each.
    pub async fn run(
        &self,
        scenario: &Scenario,
        user_id: &str,
        configs: &[MemoryMode],
        repeat: usize,
    ) -> Result<ScenarioReport> {
        let mut summaries = Vec::with_capacity(configs.len());

        for mode in configs {
            info!(scenario = %scenario.id, config = mode.as_str(), "running scenario config");
            let summary = self
                .run_config(scenario, user_id, *mode, repeat.max(1))
                .await?;
            summaries.push(summary);
        }

        Ok(ScenarioReport {
            scenario: scenario.id.clone(),
            summaries,
        })
    }

    async fn run_config(
        &self,
        scenario: &Scenario,
        user_id: &str,
        mode: MemoryMode,
        repeat: usize,
    ) -> Result<ConfigSummary> {
        // One store file per config, recreated fresh each invocation
        let db_path = self
            .state_dir
            .join(format!("{}-{}.db", scenario.id, mode.as_str()));
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(db_path.with_file_name(format!(
                "{}{}",
                db_path.file_name().unwrap_or_default().to_string_lossy(),
                suffix
            )));
        }

        let store = Arc::new(StateStore::open(&db_path).await?);
        let registry = Arc::new(ToolRegistry::new(self.dataset.clone()));
        let orchestrator = Orchestrator::new(store, registry, self.llm.clone()).await?;

        let run_config = RunConfig::new(mode).with_today(scenario.today);
        let mut outcomes = Vec::with_capacity(scenario.steps.len() * repeat);

        for pass in 0..repeat {
            let mut session = SessionState::default();
            for (index, step) in scenario.steps.iter().enumerate() {
                let step_id = step
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("step-{}", index + 1));
                let started = Instant::now();

                match orchestrator
                    .run_query(&step.query, user_id, &run_config, session.clone())
                    .await
                {
                    Ok(run) => {
                        session = run.session_after.clone();
                        let scores = run.eval.clone();
                        let question_level_acc = scores.as_ref().map_or(false, |s| {
                            s.correctness > 0.8 && s.completeness > 0.8 && s.relevance > 0.8
                        });
                        outcomes.push(StepOutcome {
                            step_id,
                            query: step.query.clone(),
                            tool_calls: run.tool_calls.len(),
                            cached_tool_calls: run
                                .tool_calls
                                .iter()
                                .filter(|c| c.cached)
                                .count(),
                            latency_ms: started.elapsed().as_millis() as i64,
                            scores,
                            question_level_acc,
                        });
                    }
                    Err(e) => {
                        // The run aborts; the scenario continues
                        warn!(pass, step = %step_id, error = %e, "scenario step failed");
                        outcomes.push(StepOutcome {
                            step_id,
                            query: step.query.clone(),
                            tool_calls: 0,
                            cached_tool_calls: 0,
                            latency_ms: started.elapsed().as_millis() as i64,
                            scores: None,
                            question_level_acc: false,
                        });
                    }
                }
            }
        }

        let aggregate = aggregate(&outcomes);
        Ok(ConfigSummary {
            config: mode.as_str().to_string(),
            runs: outcomes,
            aggregate,
        })
    }
}

/// Unscored steps count as zero quality, so failures drag the average.
fn aggregate(outcomes: &[StepOutcome]) -> Aggregate {
    let total = outcomes.len();
    let quality_sum: f64 = outcomes
        .iter()
        .map(|o| o.scores.as_ref().map_or(0.0, |s| s.quality))
        .sum();
    let acc_count = outcomes.iter().filter(|o| o.question_level_acc).count();
    let latencies: Vec<i64> = outcomes.iter().map(|o| o.latency_ms).collect();

    Aggregate {
        avg_quality: if total == 0 {
            0.0
        } else {
            quality_sum / total as f64
        },
        question_level_acc_rate: if total == 0 {
            0.0
        } else {
            acc_count as f64 / total as f64
        },
        tool_calls_total: outcomes.iter().map(|o| o.tool_calls).sum(),
        cached_tool_calls_total: outcomes.iter().map(|o| o.cached_tool_calls).sum(),
        p90_latency_ms: p90(&latencies),
    }
}
