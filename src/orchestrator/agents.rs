//! Worker agents
//!
//! Both agents wrap the same plan → execute spine. The Data Presenter
//! renders deterministically and owns the only session-state mutation in
//! the system (`selected_product_ids`). The Insight Generator asks the LLM
//! for a narrative grounded strictly in the executed tool calls, or emits a
//! fixed placeholder without a model.

use crate::clock::Clock;
use crate::llm::{CompletionRequest, LLMClient};
use crate::orchestrator::executor::Executor;
use crate::orchestrator::leverager::MemoryCard;
use crate::orchestrator::planner::{Planner, PlannerInput};
use crate::orchestrator::types::{Plan, Route, SessionState, ToolCallRecord};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::sync::Arc;

/// Emitted by the Insight Generator when no model is configured.
pub const INSIGHT_PLACEHOLDER: &str =
    "No insight model is configured; inspect the tool results directly.";

/// Product ids remembered from a top_products rendering.
const MAX_SELECTED_PRODUCTS: usize = 20;

/// Everything a worker agent needs for one query.
pub struct AgentInput<'a> {
    pub route: Route,
    pub query: &'a str,
    pub augmented_query: &'a str,
    pub time_context: &'a crate::clock::TimeContext,
    pub session: SessionState,
    pub plan_cards: &'a [MemoryCard],
    pub insight_cards: &'a [MemoryCard],
    pub cache_enabled: bool,
    pub clock: &'a Clock,
}

/// What a worker agent hands back to the orchestrator.
pub struct AgentOutcome {
    pub plan: Plan,
    pub raw_plan_text: Option<String>,
    pub used_fallback: bool,
    pub tool_calls: Vec<ToolCallRecord>,
    pub response: String,
    pub session: SessionState,
}

/// Plan → execute → deterministic rendering.
pub struct DataPresenter {
    planner: Arc<Planner>,
    executor: Arc<Executor>,
}

impl DataPresenter {
    pub fn new(planner: Arc<Planner>, executor: Arc<Executor>) -> Self {
        Self { planner, executor }
    }

    pub async fn handle(&self, input: AgentInput<'_>) -> Result<AgentOutcome> {
        let planned = self
            .planner
            .plan(PlannerInput {
                route: input.route,
                query: input.query,
                augmented_query: input.augmented_query,
                time_context: input.time_context,
                session: &input.session,
                cards: input.plan_cards,
            })
            .await?;

        let (tool_calls, _results) = self
            .executor
            .execute(&planned.plan, input.cache_enabled, input.clock)
            .await?;

        let mut session = input.session;
        let response = render(&tool_calls, &mut session);

        Ok(AgentOutcome {
            plan: planned.plan,
            raw_plan_text: planned.raw_text,
            used_fallback: planned.used_fallback,
            tool_calls,
            response,
            session,
        })
    }
}

/// Render priority: top_products > timeseries > list_products > nothing.
/// The last record of the winning tool is the one shown (last-wins).
fn render(tool_calls: &[ToolCallRecord], session: &mut SessionState) -> String {
    if let Some(record) = tool_calls.iter().rev().find(|r| r.tool == "top_products") {
        return render_top_products(record, session);
    }
    if let Some(record) = tool_calls.iter().rev().find(|r| r.tool == "timeseries") {
        return render_timeseries(record);
    }
    if let Some(record) = tool_calls.iter().rev().find(|r| r.tool == "list_products") {
        return render_products(record);
    }
    "No results.".to_string()
}

fn render_top_products(record: &ToolCallRecord, session: &mut SessionState) -> String {
    let metric = record.args["metric"].as_str().unwrap_or("sales");
    let start = record.args["startDate"].as_str().unwrap_or("?");
    let end = record.args["endDate"].as_str().unwrap_or("?");

    let empty: Vec<Value> = Vec::new();
    let rows = record.result["rows"].as_array().unwrap_or(&empty);
    if rows.is_empty() {
        return format!("No {} data for {} → {}.", metric, start, end);
    }

    session.selected_product_ids = rows
        .iter()
        .filter_map(|r| r["productId"].as_i64())
        .take(MAX_SELECTED_PRODUCTS)
        .collect();

    let mut out = format!("Top products by {} ({} → {})\n", metric, start, end);
    for (i, row) in rows.iter().enumerate() {
        let name = row["productName"].as_str().unwrap_or("?");
        let value = row["metricValue"].as_f64().unwrap_or(0.0);
        out.push_str(&format!("{}. {} — {:.2}\n", i + 1, name, value));
    }
    out.trim_end().to_string()
}

fn render_timeseries(record: &ToolCallRecord) -> String {
    let metric = record.args["metric"].as_str().unwrap_or("?");
    let start = record.args["startDate"].as_str().unwrap_or("?");
    let end = record.args["endDate"].as_str().unwrap_or("?");

    let empty: Vec<Value> = Vec::new();
    let series = record.result["series"].as_array().unwrap_or(&empty);
    if series.is_empty() {
        return format!("No {} series for {} → {}.", metric, start, end);
    }

    let mut out = format!("Daily {} ({} → {})\n", metric, start, end);
    for s in series {
        let name = s["productName"].as_str().unwrap_or("?");
        let points = s["points"].as_array().unwrap_or(&empty);
        match points.last() {
            Some(last) => out.push_str(&format!(
                "{}: {} points, last {} = {:.2}\n",
                name,
                points.len(),
                last["date"].as_str().unwrap_or("?"),
                last["value"].as_f64().unwrap_or(0.0)
            )),
            None => out.push_str(&format!("{}: no data returned\n", name)),
        }
    }
    out.trim_end().to_string()
}

fn render_products(record: &ToolCallRecord) -> String {
    let empty: Vec<Value> = Vec::new();
    let products = record.result["products"].as_array().unwrap_or(&empty);
    if products.is_empty() {
        return "No results.".to_string();
    }
    let mut out = String::from("Products:\n");
    for p in products {
        out.push_str(&format!(
            "- {} ({})\n",
            p["name"].as_str().unwrap_or("?"),
            p["category"].as_str().unwrap_or("?")
        ));
    }
    out.trim_end().to_string()
}

/// Plan → execute → grounded narrative. Never mutates session state.
pub struct InsightGenerator {
    planner: Arc<Planner>,
    executor: Arc<Executor>,
    llm: Option<Arc<dyn LLMClient>>,
}

impl InsightGenerator {
    pub fn new(
        planner: Arc<Planner>,
        executor: Arc<Executor>,
        llm: Option<Arc<dyn LLMClient>>,
    ) -> Self {
        Self {
            planner,
            executor,
            llm,
        }
    }

    pub async fn handle(&self, input: AgentInput<'_>) -> Result<AgentOutcome> {
        let planned = self
            .planner
            .plan(PlannerInput {
                route: input.route,
                query: input.query,
                augmented_query: input.augmented_query,
                time_context: input.time_context,
                session: &input.session,
                cards: input.plan_cards,
            })
            .await?;

        let (tool_calls, _results) = self
            .executor
            .execute(&planned.plan, input.cache_enabled, input.clock)
            .await?;

        let response = match &self.llm {
            Some(llm) => {
                self.narrate(llm.as_ref(), input.query, &planned.plan, &tool_calls, input.insight_cards)
                    .await?
            }
            None => INSIGHT_PLACEHOLDER.to_string(),
        };

        Ok(AgentOutcome {
            plan: planned.plan,
            raw_plan_text: planned.raw_text,
            used_fallback: planned.used_fallback,
            tool_calls,
            response,
            session: input.session,
        })
    }

    async fn narrate(
        &self,
        llm: &dyn LLMClient,
        query: &str,
        plan: &Plan,
        tool_calls: &[ToolCallRecord],
        cards: &[MemoryCard],
    ) -> Result<String> {
        let mut instructions = String::from(
            "You write analytics insights for a seller. Ground every statement \
             strictly in the plan and tool-call JSON provided; never invent \
             figures. Treat empty rows as \"no data returned\". For \
             week-over-week drops, decompose the change via \
             conversion_rate = units / sessions and price = sales / units.",
        );
        for card in cards {
            instructions.push_str("\n\n");
            instructions.push_str(&card.text);
        }

        let evidence = json!({
            "query": query,
            "plan": plan,
            "toolCalls": tool_calls
                .iter()
                .map(|r| json!({"tool": r.tool, "args": r.args, "result": r.result}))
                .collect::<Vec<_>>(),
        });

        let request = CompletionRequest::single_turn(instructions, evidence.to_string());
        let completion = llm
            .complete(request)
            .await
            .context("Insight narrative LLM call failed")?;

        Ok(completion.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(tool: &str, args: Value, result: Value) -> ToolCallRecord {
        ToolCallRecord {
            tool: tool.to_string(),
            args,
            signature: "sig".to_string(),
            cached: false,
            started_at: "2026-02-04T00:00:00.000Z".to_string(),
            duration_ms: 1,
            result,
        }
    }

    #[test]
    fn test_render_top_products_updates_session() {
        let mut session = SessionState::default();
        let calls = vec![record(
            "top_products",
            json!({"metric": "sales", "startDate": "2026-01-01", "endDate": "2026-01-31", "limit": 2}),
            json!({"rows": [
                {"productId": 7, "productName": "Yoga Mat", "metric": "sales", "metricValue": 1200.5},
                {"productId": 3, "productName": "USB-C Hub", "metric": "sales", "metricValue": 900.0},
            ]}),
        )];

        let out = render(&calls, &mut session);
        assert!(out.starts_with("Top products by sales (2026-01-01 → 2026-01-31)"));
        assert!(out.contains("1. Yoga Mat — 1200.50"));
        assert_eq!(session.selected_product_ids, vec![7, 3]);
    }

    #[test]
    fn test_render_priority_prefers_top_products() {
        let mut session = SessionState::default();
        let calls = vec![
            record("list_products", json!({"limit": 5}), json!({"products": []})),
            record(
                "top_products",
                json!({"metric": "units", "startDate": "2026-01-01", "endDate": "2026-01-31"}),
                json!({"rows": [
                    {"productId": 1, "productName": "Smart Speaker", "metric": "units", "metricValue": 10.0},
                ]}),
            ),
        ];
        let out = render(&calls, &mut session);
        assert!(out.contains("Top products by units"));
    }

    #[test]
    fn test_render_timeseries_summary() {
        let mut session = SessionState::default();
        let calls = vec![record(
            "timeseries",
            json!({"metric": "sessions", "startDate": "2026-01-01", "endDate": "2026-01-03", "productIds": [1]}),
            json!({"series": [
                {"productId": 1, "productName": "Smart Speaker", "metric": "sessions", "points": [
                    {"date": "2026-01-01", "value": 120.0},
                    {"date": "2026-01-02", "value": 140.0},
                ]},
            ]}),
        )];
        let out = render(&calls, &mut session);
        assert!(out.contains("Smart Speaker: 2 points, last 2026-01-02 = 140.00"));
        assert!(session.selected_product_ids.is_empty());
    }

    #[test]
    fn test_render_empty_is_no_results() {
        let mut session = SessionState::default();
        assert_eq!(render(&[], &mut session), "No results.");
    }

    #[test]
    fn test_selected_products_capped_at_twenty() {
        let mut session = SessionState::default();
        let rows: Vec<Value> = (1..=30)
            .map(|i| json!({"productId": i, "productName": format!("P{}", i), "metric": "sales", "metricValue": 1.0}))
            .collect();
        let calls = vec![record(
            "top_products",
            json!({"metric": "sales", "startDate": "2026-01-01", "endDate": "2026-01-31"}),
            json!({ "rows": rows }),
        )];
        render(&calls, &mut session);
        assert_eq!(session.selected_product_ids.len(), 20);
        assert_eq!(session.selected_product_ids[0], 1);
    }
}
