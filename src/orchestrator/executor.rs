//! Executor
//!
//! Runs a plan's steps in order, deterministically and without parallelism.
//! Each step is fingerprinted under the tool-cache namespace; when caching
//! is enabled a hit short-circuits the tool and the stored result is
//! replayed. At most the first six steps of any plan are processed.

use crate::clock::Clock;
use crate::db::StateStore;
use crate::orchestrator::types::{Plan, ToolCallRecord};
use crate::signature::signature;
use crate::tools::ToolRegistry;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Hard cap on processed plan steps.
pub const MAX_PLAN_STEPS: usize = 6;

/// Namespace under which tool-call signatures are computed.
pub const TOOL_CACHE_NAMESPACE: &str = "tool_cache";

pub struct Executor {
    registry: Arc<ToolRegistry>,
    store: Arc<StateStore>,
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>, store: Arc<StateStore>) -> Self {
        Self { registry, store }
    }

    /// Execute up to the first six steps. Returns the per-step records and
    /// a last-wins collapse of results by tool name (the renderer's view).
    pub async fn execute(
        &self,
        plan: &Plan,
        cache_enabled: bool,
        clock: &Clock,
    ) -> Result<(Vec<ToolCallRecord>, HashMap<String, Value>)> {
        let mut records = Vec::new();
        let mut results_by_tool: HashMap<String, Value> = HashMap::new();

        for step in plan.steps.iter().take(MAX_PLAN_STEPS) {
            let args = self
                .registry
                .normalize_args(&step.tool, &step.args)
                .with_context(|| format!("Invalid plan step for tool {}", step.tool))?;
            let sig = signature(Some(TOOL_CACHE_NAMESPACE), &step.tool, &args);

            let started_at = clock.now_iso();
            let started = Instant::now();

            let (result, cached) = if cache_enabled {
                match self.store.tool_cache().get(&sig).await? {
                    Some(hit) => {
                        debug!(tool = %step.tool, signature = %sig, "tool cache hit");
                        (hit.result, true)
                    }
                    None => {
                        let result = self
                            .registry
                            .execute(&step.tool, &args)
                            .with_context(|| format!("Tool {} failed", step.tool))?;
                        self.store
                            .tool_cache()
                            .set(&step.tool, &sig, &args, &result, &clock.now_iso())
                            .await?;
                        (result, false)
                    }
                }
            } else {
                let result = self
                    .registry
                    .execute(&step.tool, &args)
                    .with_context(|| format!("Tool {} failed", step.tool))?;
                (result, false)
            };

            let duration_ms = started.elapsed().as_millis() as i64;
            info!(
                tool = %step.tool,
                cached,
                duration_ms,
                "executed plan step"
            );

            results_by_tool.insert(step.tool.clone(), result.clone());
            records.push(ToolCallRecord {
                tool: step.tool.clone(),
                args,
                signature: sig,
                cached,
                started_at,
                duration_ms,
                result,
            });
        }

        Ok((records, results_by_tool))
    }
}
