//! Signature-keyed tool-result cache
//!
//! Write-through entries keyed by the canonical call signature. Lifetime is
//! tied to the state-store file; there is no TTL.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{Row, SqlitePool};

/// Cache hit: when it was stored and the stored result.
#[derive(Debug, Clone)]
pub struct ToolCacheHit {
    pub created_at: String,
    pub result: Value,
}

pub struct ToolCacheRepository {
    pool: SqlitePool,
}

impl ToolCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up a cached result by signature.
    pub async fn get(&self, signature: &str) -> Result<Option<ToolCacheHit>> {
        let row = sqlx::query(
            "SELECT created_at, result_json FROM tool_cache WHERE signature = ?",
        )
        .bind(signature)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read tool cache")?;

        row.map(|r| {
            let result_json: String = r.get("result_json");
            let result = serde_json::from_str(&result_json)
                .context("Failed to deserialize cached tool result")?;
            Ok(ToolCacheHit {
                created_at: r.get("created_at"),
                result,
            })
        })
        .transpose()
    }

    /// Upsert a cache entry.
    pub async fn set(
        &self,
        tool: &str,
        signature: &str,
        args: &Value,
        result: &Value,
        now_iso: &str,
    ) -> Result<()> {
        let args_json = serde_json::to_string(args).context("Failed to serialize tool args")?;
        let result_json =
            serde_json::to_string(result).context("Failed to serialize tool result")?;

        sqlx::query(
            "INSERT INTO tool_cache (signature, created_at, tool, args_json, result_json)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(signature) DO UPDATE SET
               created_at = excluded.created_at,
               tool = excluded.tool,
               args_json = excluded.args_json,
               result_json = excluded.result_json",
        )
        .bind(signature)
        .bind(now_iso)
        .bind(tool)
        .bind(&args_json)
        .bind(&result_json)
        .execute(&self.pool)
        .await
        .context("Failed to write tool cache")?;

        Ok(())
    }
}
