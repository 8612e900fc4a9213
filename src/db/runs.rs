//! Run-record persistence
//!
//! Runs are append-only: one row per executed query, JSON-encoded in the
//! structured columns. Nothing ever updates a run.

use crate::orchestrator::types::RunResult;
use anyhow::{Context, Result};
use serde_json::json;
use sqlx::{Row, SqlitePool};

pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one run record.
    pub async fn insert(&self, run: &RunResult) -> Result<()> {
        let config_json =
            serde_json::to_string(&run.config).context("Failed to serialize run config")?;
        let plan_json = match &run.plan {
            Some(plan) => Some(
                serde_json::to_string(&json!({
                    "plan": plan,
                    "usedFallback": run.used_fallback,
                    "rawText": run.raw_plan_text,
                }))
                .context("Failed to serialize plan")?,
            ),
            None => None,
        };
        let tool_calls_json =
            serde_json::to_string(&run.tool_calls).context("Failed to serialize tool calls")?;
        let eval_json = run
            .eval
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize eval report")?;
        let latencies_json =
            serde_json::to_string(&run.latencies).context("Failed to serialize latencies")?;
        let memory_injected_json = serde_json::to_string(&run.memory_injected)
            .context("Failed to serialize injected memory")?;

        sqlx::query(
            "INSERT INTO runs
               (id, created_at, user_id, config_json, query, augmented_query,
                route, ood, plan_json, tool_calls_json, response, eval_json,
                latencies_json, memory_injected_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id)
        .bind(&run.created_at)
        .bind(&run.user_id)
        .bind(&config_json)
        .bind(&run.query)
        .bind(&run.augmented_query)
        .bind(run.route.map(|r| r.as_str()))
        .bind(run.ood as i64)
        .bind(&plan_json)
        .bind(&tool_calls_json)
        .bind(&run.response)
        .bind(&eval_json)
        .bind(&latencies_json)
        .bind(&memory_injected_json)
        .execute(&self.pool)
        .await
        .context("Failed to insert run record")?;

        Ok(())
    }

    /// Total number of recorded runs.
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM runs")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count runs")?;
        Ok(row.get("count"))
    }
}
