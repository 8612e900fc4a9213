//! Memory-item repository
//!
//! Scoped, kind-tagged memory with full-text retrieval. Every item is
//! unique per (scope, kind, dedupe_key); upserting an equivalent text
//! collapses onto the existing row, preserving its id. Search goes through
//! the FTS5 index with bm25 ranking and honors per-item expiry.

use crate::redact::redact;
use crate::signature::sha256_hex;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Scope shared by all users (seed rules, calendar conventions).
pub const GLOBAL_SCOPE: &str = "global";

/// Per-user scope string.
pub fn user_scope(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Characters of normalized text participating in the dedupe key.
const DEDUPE_TEXT_CAP: usize = 256;

/// Taxonomy of memory intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    ToolTemplate,
    QueryPattern,
    DomainRule,
    InsightPattern,
    FailureCase,
    UserPreference,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::ToolTemplate => "tool_template",
            MemoryKind::QueryPattern => "query_pattern",
            MemoryKind::DomainRule => "domain_rule",
            MemoryKind::InsightPattern => "insight_pattern",
            MemoryKind::FailureCase => "failure_case",
            MemoryKind::UserPreference => "user_preference",
        }
    }

    pub fn parse(raw: &str) -> Option<MemoryKind> {
        match raw {
            "tool_template" => Some(MemoryKind::ToolTemplate),
            "query_pattern" => Some(MemoryKind::QueryPattern),
            "domain_rule" => Some(MemoryKind::DomainRule),
            "insight_pattern" => Some(MemoryKind::InsightPattern),
            "failure_case" => Some(MemoryKind::FailureCase),
            "user_preference" => Some(MemoryKind::UserPreference),
            _ => None,
        }
    }
}

/// One stored memory item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryItem {
    pub id: String,
    pub scope: String,
    pub kind: MemoryKind,
    pub text: String,
    pub meta: Value,
    pub dedupe_key: String,
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub use_count: i64,
    pub importance: f64,
    pub quality: f64,
    pub expires_at: Option<String>,
}

/// Input to `upsert`. When `dedupe_key` is absent it is derived from the
/// kind and the normalized text.
#[derive(Debug, Clone)]
pub struct MemoryUpsert {
    pub scope: String,
    pub kind: MemoryKind,
    pub text: String,
    pub meta: Value,
    pub dedupe_key: Option<String>,
    pub importance: f64,
    pub quality: f64,
    pub expires_at: Option<String>,
}

/// One FTS hit with its raw bm25 magnitude and normalized rank.
#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub item: MemoryItem,
    pub bm25: f64,
    pub fts_rank: f64,
}

/// Search parameters for `search`.
#[derive(Debug, Clone)]
pub struct MemorySearch<'a> {
    pub query: &'a str,
    pub scopes: &'a [String],
    pub kinds: Option<&'a [MemoryKind]>,
    pub limit: i64,
    pub now_iso: &'a str,
}

/// Per-(scope, kind) item count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub scope: String,
    pub kind: String,
    pub count: i64,
}

/// Repository for memory items and their FTS rows.
pub struct MemoryRepository {
    pool: SqlitePool,
}

/// Normalize text for dedupe: lowercase, whitespace collapsed, capped.
fn normalize_for_dedupe(text: &str) -> String {
    let collapsed = text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(DEDUPE_TEXT_CAP).collect()
}

/// Dedupe key over (kind, normalized text).
pub fn dedupe_key_for(kind: MemoryKind, text: &str) -> String {
    sha256_hex(&format!("{}:{}", kind.as_str(), normalize_for_dedupe(text)))
}

fn placeholders(count: usize) -> String {
    std::iter::repeat("?").take(count).collect::<Vec<_>>().join(", ")
}

impl MemoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update one memory item, collapsing onto an existing row at
    /// the same (scope, kind, dedupe_key). The stored text is PII-redacted.
    /// On a dedupe hit the existing id is kept and the use counter bumped.
    pub async fn upsert(&self, input: MemoryUpsert, now_iso: &str) -> Result<MemoryItem> {
        let text = redact(&input.text);
        let dedupe_key = input
            .dedupe_key
            .unwrap_or_else(|| dedupe_key_for(input.kind, &text));
        let meta_json = serde_json::to_string(&input.meta).context("Failed to serialize meta")?;

        let existing = sqlx::query(
            "SELECT id, created_at, use_count FROM memory_items
             WHERE scope = ? AND kind = ? AND dedupe_key = ?",
        )
        .bind(&input.scope)
        .bind(input.kind.as_str())
        .bind(&dedupe_key)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up memory item for dedupe")?;

        let item = if let Some(row) = existing {
            let id: String = row.get("id");
            let created_at: String = row.get("created_at");
            let use_count: i64 = row.get::<i64, _>("use_count") + 1;

            sqlx::query(
                "UPDATE memory_items
                 SET text = ?, meta_json = ?, last_used_at = ?, use_count = ?,
                     importance = ?, quality = ?, expires_at = ?
                 WHERE id = ?",
            )
            .bind(&text)
            .bind(&meta_json)
            .bind(now_iso)
            .bind(use_count)
            .bind(input.importance)
            .bind(input.quality)
            .bind(&input.expires_at)
            .bind(&id)
            .execute(&self.pool)
            .await
            .context("Failed to update memory item")?;

            sqlx::query("DELETE FROM memory_fts WHERE id = ?")
                .bind(&id)
                .execute(&self.pool)
                .await
                .context("Failed to drop stale FTS row")?;
            sqlx::query("INSERT INTO memory_fts (id, text, kind, scope) VALUES (?, ?, ?, ?)")
                .bind(&id)
                .bind(&text)
                .bind(input.kind.as_str())
                .bind(&input.scope)
                .execute(&self.pool)
                .await
                .context("Failed to refresh FTS row")?;

            MemoryItem {
                id,
                scope: input.scope,
                kind: input.kind,
                text,
                meta: input.meta,
                dedupe_key,
                created_at,
                last_used_at: Some(now_iso.to_string()),
                use_count,
                importance: input.importance,
                quality: input.quality,
                expires_at: input.expires_at,
            }
        } else {
            let id = Uuid::now_v7().to_string();

            sqlx::query(
                "INSERT INTO memory_items
                   (id, scope, kind, text, meta_json, dedupe_key, created_at,
                    last_used_at, use_count, importance, quality, expires_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, NULL, 0, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&input.scope)
            .bind(input.kind.as_str())
            .bind(&text)
            .bind(&meta_json)
            .bind(&dedupe_key)
            .bind(now_iso)
            .bind(input.importance)
            .bind(input.quality)
            .bind(&input.expires_at)
            .execute(&self.pool)
            .await
            .context("Failed to insert memory item")?;

            sqlx::query("INSERT INTO memory_fts (id, text, kind, scope) VALUES (?, ?, ?, ?)")
                .bind(&id)
                .bind(&text)
                .bind(input.kind.as_str())
                .bind(&input.scope)
                .execute(&self.pool)
                .await
                .context("Failed to insert FTS row")?;

            MemoryItem {
                id,
                scope: input.scope,
                kind: input.kind,
                text,
                meta: input.meta,
                dedupe_key,
                created_at: now_iso.to_string(),
                last_used_at: None,
                use_count: 0,
                importance: input.importance,
                quality: input.quality,
                expires_at: input.expires_at,
            }
        };

        Ok(item)
    }

    /// FTS search filtered by scopes (and optionally kinds), excluding
    /// expired items. Rows come back best-match first (bm25 ascending);
    /// `fts_rank = 1 / (1 + |bm25|)` lands in (0, 1].
    pub async fn search(&self, params: MemorySearch<'_>) -> Result<Vec<MemoryHit>> {
        if params.scopes.is_empty() {
            return Ok(Vec::new());
        }
        let limit = params.limit.clamp(1, 50);

        let mut sql = format!(
            "SELECT m.id, m.scope, m.kind, m.text, m.meta_json, m.dedupe_key,
                    m.created_at, m.last_used_at, m.use_count, m.importance,
                    m.quality, m.expires_at, bm25(memory_fts) AS bm25
             FROM memory_fts
             JOIN memory_items m ON m.id = memory_fts.id
             WHERE memory_fts MATCH ?
               AND m.scope IN ({})",
            placeholders(params.scopes.len())
        );
        if let Some(kinds) = params.kinds {
            if !kinds.is_empty() {
                sql.push_str(&format!(" AND m.kind IN ({})", placeholders(kinds.len())));
            }
        }
        sql.push_str(
            " AND (m.expires_at IS NULL OR m.expires_at > ?)
              ORDER BY bm25(memory_fts) ASC
              LIMIT ?",
        );

        let mut query = sqlx::query(&sql).bind(params.query);
        for scope in params.scopes {
            query = query.bind(scope);
        }
        if let Some(kinds) = params.kinds {
            for kind in kinds {
                query = query.bind(kind.as_str());
            }
        }
        query = query.bind(params.now_iso).bind(limit);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to execute FTS query on memory_fts")?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let bm25_raw: f64 = row.get("bm25");
            let bm25 = bm25_raw.abs();
            let kind_str: String = row.get("kind");
            let meta_json: String = row.get("meta_json");

            hits.push(MemoryHit {
                item: MemoryItem {
                    id: row.get("id"),
                    scope: row.get("scope"),
                    kind: MemoryKind::parse(&kind_str).unwrap_or(MemoryKind::QueryPattern),
                    text: row.get("text"),
                    meta: serde_json::from_str(&meta_json).unwrap_or(Value::Null),
                    dedupe_key: row.get("dedupe_key"),
                    created_at: row.get("created_at"),
                    last_used_at: row.get("last_used_at"),
                    use_count: row.get("use_count"),
                    importance: row.get("importance"),
                    quality: row.get("quality"),
                    expires_at: row.get("expires_at"),
                },
                bm25,
                fts_rank: 1.0 / (1.0 + bm25),
            });
        }

        Ok(hits)
    }

    /// Bump usage signals for the given items.
    pub async fn mark_used(&self, ids: &[String], now_iso: &str) -> Result<()> {
        let mut distinct: Vec<&String> = ids.iter().collect();
        distinct.sort();
        distinct.dedup();
        if distinct.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "UPDATE memory_items SET last_used_at = ?, use_count = use_count + 1
             WHERE id IN ({})",
            placeholders(distinct.len())
        );
        let mut query = sqlx::query(&sql).bind(now_iso);
        for id in distinct {
            query = query.bind(id);
        }
        query
            .execute(&self.pool)
            .await
            .context("Failed to mark memory items used")?;

        Ok(())
    }

    /// Item counts grouped by (scope, kind).
    pub async fn stats(&self) -> Result<Vec<MemoryStats>> {
        let rows = sqlx::query(
            "SELECT scope, kind, COUNT(*) AS count FROM memory_items
             GROUP BY scope, kind ORDER BY scope, kind",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to read memory stats")?;

        Ok(rows
            .into_iter()
            .map(|row| MemoryStats {
                scope: row.get("scope"),
                kind: row.get("kind"),
                count: row.get("count"),
            })
            .collect())
    }

    /// Delete expired items and their FTS rows. Returns how many expired.
    pub async fn maintenance(&self, now_iso: &str) -> Result<u64> {
        sqlx::query(
            "DELETE FROM memory_fts WHERE id IN
               (SELECT id FROM memory_items
                WHERE expires_at IS NOT NULL AND expires_at <= ?)",
        )
        .bind(now_iso)
        .execute(&self.pool)
        .await
        .context("Failed to drop expired FTS rows")?;

        let result = sqlx::query(
            "DELETE FROM memory_items WHERE expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(now_iso)
        .execute(&self.pool)
        .await
        .context("Failed to delete expired memory items")?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_for_dedupe() {
        assert_eq!(
            normalize_for_dedupe("  Top   10\tProducts  "),
            "top 10 products"
        );
    }

    #[test]
    fn test_dedupe_key_stable_across_whitespace_and_case() {
        let a = dedupe_key_for(MemoryKind::QueryPattern, "Top 10 Products last month");
        let b = dedupe_key_for(MemoryKind::QueryPattern, "top  10 products\nlast month");
        assert_eq!(a, b);
    }

    #[test]
    fn test_dedupe_key_differs_by_kind() {
        let a = dedupe_key_for(MemoryKind::QueryPattern, "same text");
        let b = dedupe_key_for(MemoryKind::DomainRule, "same text");
        assert_ne!(a, b);
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            MemoryKind::ToolTemplate,
            MemoryKind::QueryPattern,
            MemoryKind::DomainRule,
            MemoryKind::InsightPattern,
            MemoryKind::FailureCase,
            MemoryKind::UserPreference,
        ] {
            assert_eq!(MemoryKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MemoryKind::parse("bogus"), None);
    }
}
