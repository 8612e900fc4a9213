//! Leverager: memory read path
//!
//! Builds a full-text retrieval query from the user's question, ranks the
//! candidates with a hybrid lexical/recency/importance/usage score, marks
//! the winners used, and renders them as bounded memory cards for prompt
//! injection.

use crate::db::{MemoryHit, MemoryKind, MemorySearch, StateStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Hybrid score weights. Part of the contract; exposed for tuning.
pub const W_FTS: f64 = 0.55;
pub const W_RECENCY: f64 = 0.25;
pub const W_IMPORTANCE: f64 = 0.15;
pub const W_USE: f64 = 0.05;

/// Recency decay constant, in days.
pub const RECENCY_DECAY_DAYS: f64 = 14.0;

/// Default number of cards injected per stage.
pub const DEFAULT_CARD_LIMIT: usize = 6;

/// Default per-card character budget.
pub const DEFAULT_MAX_CARD_CHARS: usize = 600;

/// Candidates pulled from FTS before hybrid re-ranking.
const CANDIDATE_LIMIT: i64 = 30;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "show", "what", "were", "last", "this", "that", "those", "month",
    "week", "products", "product", "top",
];

const PHRASE_HINTS: &[&str] = &["last month", "last week", "top products"];

/// Retrieval stages, each with its own kind filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ManagerRoute,
    WorkflowPlan,
    InsightGenerate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ManagerRoute => "manager_route",
            Stage::WorkflowPlan => "workflow_plan",
            Stage::InsightGenerate => "insight_generate",
        }
    }

    /// Memory kinds consulted at this stage.
    pub fn kinds(&self) -> &'static [MemoryKind] {
        match self {
            Stage::ManagerRoute => &[
                MemoryKind::DomainRule,
                MemoryKind::QueryPattern,
                MemoryKind::UserPreference,
            ],
            Stage::WorkflowPlan => &[
                MemoryKind::ToolTemplate,
                MemoryKind::QueryPattern,
                MemoryKind::DomainRule,
                MemoryKind::FailureCase,
                MemoryKind::UserPreference,
            ],
            Stage::InsightGenerate => &[
                MemoryKind::InsightPattern,
                MemoryKind::UserPreference,
                MemoryKind::DomainRule,
                MemoryKind::FailureCase,
                MemoryKind::QueryPattern,
            ],
        }
    }
}

/// A rendered, injection-ready memory card.
#[derive(Debug, Clone)]
pub struct MemoryCard {
    pub item_id: String,
    pub kind: MemoryKind,
    pub scope: String,
    pub score: f64,
    pub text: String,
}

/// Memory retrieval and card rendering.
pub struct Leverager {
    store: Arc<StateStore>,
    card_limit: usize,
    max_card_chars: usize,
}

impl Leverager {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            card_limit: DEFAULT_CARD_LIMIT,
            max_card_chars: DEFAULT_MAX_CARD_CHARS,
        }
    }

    /// Retrieve, rank, mark used, and render the top cards for a stage.
    pub async fn retrieve(
        &self,
        stage: Stage,
        query: &str,
        scopes: &[String],
        now_iso: &str,
    ) -> Result<Vec<MemoryCard>> {
        let fts_query = build_retrieval_query(query);
        debug!(stage = stage.as_str(), %fts_query, "memory retrieval");

        let hits = self
            .store
            .memory()
            .search(MemorySearch {
                query: &fts_query,
                scopes,
                kinds: Some(stage.kinds()),
                limit: CANDIDATE_LIMIT,
                now_iso,
            })
            .await?;

        let mut scored: Vec<(f64, MemoryHit)> = hits
            .into_iter()
            .map(|hit| (hybrid_score(&hit, now_iso), hit))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.card_limit);

        let ids: Vec<String> = scored.iter().map(|(_, h)| h.item.id.clone()).collect();
        // Usage is bumped before the cards reach the next stage, so
        // use_count reflects intent-to-use.
        self.store.memory().mark_used(&ids, now_iso).await?;

        Ok(scored
            .into_iter()
            .map(|(score, hit)| self.render_card(score, hit))
            .collect())
    }

    fn render_card(&self, score: f64, hit: MemoryHit) -> MemoryCard {
        let item = hit.item;
        let header = format!("MEMORY CARD [{}] ({})", item.kind.as_str(), item.scope);
        let last = item
            .last_used_at
            .as_deref()
            .map(|ts| ts.chars().take(10).collect::<String>())
            .unwrap_or_else(|| "never".to_string());
        let signals = format!(
            "Signals: q={:.2} imp={:.2} used={} last={}",
            item.quality, item.importance, item.use_count, last
        );

        let mut body: String = item.text.split_whitespace().collect::<Vec<_>>().join(" ");
        // +2 newlines between the three lines
        let budget = self
            .max_card_chars
            .saturating_sub(header.chars().count() + signals.chars().count() + 2);
        if body.chars().count() > budget {
            body = body.chars().take(budget.saturating_sub(1)).collect();
            body.push('…');
        }

        MemoryCard {
            item_id: item.id,
            kind: item.kind,
            scope: item.scope,
            score,
            text: format!("{}\n{}\n{}", header, body, signals),
        }
    }
}

/// Hybrid ranking: lexical rank, recency decay, importance, and usage.
pub fn hybrid_score(hit: &MemoryHit, now_iso: &str) -> f64 {
    let recency = recency_score(hit.item.last_used_at.as_deref(), now_iso);
    W_FTS * hit.fts_rank
        + W_RECENCY * recency
        + W_IMPORTANCE * hit.item.importance
        + W_USE * (1.0 + hit.item.use_count as f64).ln()
}

fn recency_score(last_used_at: Option<&str>, now_iso: &str) -> f64 {
    let age_days = match (
        last_used_at.and_then(|ts| DateTime::parse_from_rfc3339(ts).ok()),
        DateTime::parse_from_rfc3339(now_iso).ok(),
    ) {
        (Some(last), Some(now)) => {
            let delta_ms = now.with_timezone(&Utc).timestamp_millis()
                - last.with_timezone(&Utc).timestamp_millis();
            (delta_ms.max(0) as f64) / 86_400_000.0
        }
        // Missing or unparseable timestamps count as a full decay window
        _ => RECENCY_DECAY_DAYS,
    };
    (-age_days / RECENCY_DECAY_DAYS).exp()
}

/// Lowercase and collapse the input, pull in phrase hints, then build an
/// OR query over up to 12 informative tokens.
pub fn build_retrieval_query(query: &str) -> String {
    let cleaned = query.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");

    let mut parts: Vec<String> = Vec::new();
    for phrase in PHRASE_HINTS {
        if cleaned.contains(phrase) {
            parts.push(format!("\"{}\"", phrase));
        }
    }

    let mut seen = std::collections::HashSet::new();
    let mut token = String::new();
    let mut tokens: Vec<String> = Vec::new();
    for ch in cleaned.chars().chain(std::iter::once(' ')) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
            token.push(ch);
        } else if !token.is_empty() {
            let t = std::mem::take(&mut token);
            if t.len() >= 3 && !STOPWORDS.contains(&t.as_str()) && seen.insert(t.clone()) {
                tokens.push(t);
            }
        }
    }
    tokens.truncate(12);
    parts.extend(tokens);

    if parts.is_empty() {
        format!("\"{}\"", cleaned.replace('"', " "))
    } else {
        parts.join(" OR ")
    }
}
