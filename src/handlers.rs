//! Command handlers
//!
//! Wire configuration, dataset, state store, and orchestrator together for
//! each CLI command.

use crate::clock::Clock;
use crate::config::Config;
use crate::dataset::SellerDataset;
use crate::db::StateStore;
use crate::llm::{LLMClient, OpenAiClient};
use crate::orchestrator::core::Orchestrator;
use crate::orchestrator::types::{MemoryMode, RunConfig, SessionState};
use crate::runlog::RunLogWriter;
use crate::scenario::{Scenario, ScenarioRunner};
use crate::tools::ToolRegistry;
use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Days of synthetic history generated behind "today".
const DATASET_WINDOW_DAYS: u32 = 120;

/// The dataset window ends shortly before "today" so the current week is
/// deliberately sparse, matching the drop-diagnosis scenarios.
const DATASET_LAG_DAYS: i64 = 126;

fn build_llm(config: &Config) -> Option<Arc<dyn LLMClient>> {
    if config.llm_enabled() {
        Some(Arc::new(OpenAiClient::new(config.llm.clone())))
    } else {
        None
    }
}

fn build_dataset(seed: u64, today: NaiveDate) -> Arc<SellerDataset> {
    let start = today - Duration::days(DATASET_LAG_DAYS);
    Arc::new(SellerDataset::generate(seed, start, DATASET_WINDOW_DAYS))
}

/// Answer one query against the configured state store.
pub async fn handle_run(
    query: String,
    mode: &str,
    user: &str,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let Some(mode) = MemoryMode::parse(mode) else {
        bail!("Unknown memory mode: {}", mode);
    };

    let store = Arc::new(StateStore::open(&config.core.state_db).await?);
    let dataset = build_dataset(42, Clock::system().today());
    let registry = Arc::new(ToolRegistry::new(dataset));
    let orchestrator = Orchestrator::new(store, registry, build_llm(config)).await?;

    let run = orchestrator
        .run_query(&query, user, &RunConfig::new(mode), SessionState::default())
        .await?;

    RunLogWriter::new(config.core.runlog_dir.clone())
        .append(&run)
        .await
        .context("Failed to append run log")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&run)?),
        OutputFormat::Text => {
            println!("{}", run.response);
            if let Some(eval) = &run.eval {
                println!(
                    "\n[eval {}: quality {:.2} (c={:.2} p={:.2} r={:.2})]",
                    eval.kind, eval.quality, eval.correctness, eval.completeness, eval.relevance
                );
            }
        }
    }

    Ok(())
}

/// Replay a scenario across memory configurations and report.
pub async fn handle_scenario(
    file: &Path,
    configs: &str,
    repeat: usize,
    out: Option<PathBuf>,
    user: &str,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let scenario = Scenario::load(file).await?;

    let modes: Vec<MemoryMode> = configs
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|raw| MemoryMode::parse(raw).with_context(|| format!("Unknown memory mode: {}", raw)))
        .collect::<Result<_>>()?;
    if modes.is_empty() {
        bail!("At least one memory mode is required");
    }

    let dataset = build_dataset(scenario.seed, scenario.today);
    let state_dir = config
        .core
        .state_db
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let runner = ScenarioRunner::new(dataset, build_llm(config), state_dir);
    let report = runner.run(&scenario, user, &modes, repeat).await?;

    let rendered = serde_json::to_string_pretty(&report)?;
    match out {
        Some(path) => {
            tokio::fs::write(&path, &rendered)
                .await
                .with_context(|| format!("Failed to write report {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => println!("{}", rendered),
    }

    if matches!(format, OutputFormat::Text) {
        for summary in &report.summaries {
            println!(
                "{:>16}: avgQuality={:.3} accRate={:.2} toolCalls={} cached={} p90={}ms",
                summary.config,
                summary.aggregate.avg_quality,
                summary.aggregate.question_level_acc_rate,
                summary.aggregate.tool_calls_total,
                summary.aggregate.cached_tool_calls_total,
                summary
                    .aggregate
                    .p90_latency_ms
                    .map_or("-".to_string(), |v| v.to_string()),
            );
        }
    }

    Ok(())
}

/// Print memory-store item counts.
pub async fn handle_memory_stats(config: &Config, format: OutputFormat) -> Result<()> {
    let store = StateStore::open(&config.core.state_db).await?;
    let stats = store.memory().stats().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            if stats.is_empty() {
                println!("Memory store is empty.");
            }
            for entry in stats {
                println!("{:>24} {:>16} {:>6}", entry.scope, entry.kind, entry.count);
            }
        }
    }

    store.close().await?;
    Ok(())
}
