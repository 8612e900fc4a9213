//! Planner
//!
//! Produces a validated tool plan for a routed query. The primary path asks
//! the LLM for a JSON plan and scans its free-form reply for balanced
//! object candidates (string-aware, so braces inside quotes don't count).
//! Any candidate that survives JSON parsing, shape checks, and per-step
//! schema validation wins; otherwise a deterministic keyword heuristic
//! builds the plan. Parse failures are never fatal.

use crate::clock::TimeContext;
use crate::llm::{CompletionRequest, LLMClient};
use crate::orchestrator::leverager::MemoryCard;
use crate::orchestrator::types::{Plan, PlanStep, Route, SessionState, TimeRange};
use crate::tools::ToolRegistry;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Marker the prompt plants so replays can find planner transcripts.
pub const PLAN_MARKER: &str = "OUTPUT_JSON_PLAN";

/// Everything the planner needs for one query.
pub struct PlannerInput<'a> {
    pub route: Route,
    pub query: &'a str,
    pub augmented_query: &'a str,
    pub time_context: &'a TimeContext,
    pub session: &'a SessionState,
    pub cards: &'a [MemoryCard],
}

/// A plan plus provenance: raw model text when an LLM was consulted, and
/// whether the heuristic had to step in.
#[derive(Debug, Clone)]
pub struct PlannerOutput {
    pub plan: Plan,
    pub raw_text: Option<String>,
    pub used_fallback: bool,
}

pub struct Planner {
    llm: Option<Arc<dyn LLMClient>>,
    registry: Arc<ToolRegistry>,
}

impl Planner {
    pub fn new(llm: Option<Arc<dyn LLMClient>>, registry: Arc<ToolRegistry>) -> Self {
        Self { llm, registry }
    }

    /// Produce a plan. Errors only on LLM transport failure, which aborts
    /// the run; everything else degrades to the heuristic.
    pub async fn plan(&self, input: PlannerInput<'_>) -> Result<PlannerOutput> {
        let Some(llm) = &self.llm else {
            return Ok(PlannerOutput {
                plan: self.heuristic_plan(&input),
                raw_text: None,
                used_fallback: true,
            });
        };

        let mut request =
            CompletionRequest::single_turn(self.compose_prompt(&input), input.augmented_query);
        request.temperature = Some(0.0);

        let completion = llm
            .complete(request)
            .await
            .context("Planner LLM call failed")?;

        match self.parse_plan(&completion.text) {
            Some(plan) => Ok(PlannerOutput {
                plan,
                raw_text: Some(completion.text),
                used_fallback: false,
            }),
            None => {
                warn!("No valid plan candidate in LLM reply, using heuristic");
                Ok(PlannerOutput {
                    plan: self.heuristic_plan(&input),
                    raw_text: Some(completion.text),
                    used_fallback: true,
                })
            }
        }
    }

    fn compose_prompt(&self, input: &PlannerInput<'_>) -> String {
        let mut prompt = String::new();
        prompt.push_str(
            "You plan tool calls for a seller-analytics assistant. Reply with \
             exactly one JSON object and nothing else. ",
        );
        prompt.push_str(PLAN_MARKER);
        prompt.push_str(
            "\nShape: {\"route\": \"data_presenter\"|\"insight_generator\", \
             \"timeRange\"?: {\"startDate\": \"YYYY-MM-DD\", \"endDate\": \"YYYY-MM-DD\"}, \
             \"steps\": [{\"tool\": string, \"args\": object}], \"notes\"?: string}\n\
             At most 6 steps. Args must match the tool schemas.\n\nTools:\n",
        );
        for spec in self.registry.specs() {
            prompt.push_str(&format!(
                "- {}: {}\n  args: {}\n",
                spec.name, spec.description, spec.schema
            ));
        }

        prompt.push_str(&format!("\nCalendar: {}\n", input.time_context.summary()));

        if !input.session.selected_product_ids.is_empty() {
            prompt.push_str(&format!(
                "Session: selectedProductIds={:?} (use these for \"those products\")\n",
                input.session.selected_product_ids
            ));
        }

        if !input.cards.is_empty() {
            prompt.push_str("\nRelevant memory:\n");
            for card in input.cards {
                prompt.push_str(&card.text);
                prompt.push_str("\n\n");
            }
        }

        prompt.push_str(&format!("Target route: {}\n", input.route.as_str()));
        prompt
    }

    /// Try every balanced-object candidate in the reply, in order.
    fn parse_plan(&self, text: &str) -> Option<Plan> {
        for candidate in scan_json_candidates(text) {
            let cleaned = strip_trailing_commas(candidate);
            match self.validate_candidate(&cleaned) {
                Ok(plan) => return Some(plan),
                Err(reason) => debug!(%reason, "plan candidate rejected"),
            }
        }
        None
    }

    fn validate_candidate(&self, candidate: &str) -> std::result::Result<Plan, String> {
        #[derive(Deserialize)]
        struct RawPlan {
            route: String,
            #[serde(default, alias = "time_range", rename = "timeRange")]
            time_range: Option<TimeRange>,
            steps: Vec<PlanStep>,
            #[serde(default)]
            notes: Option<String>,
        }

        let raw: RawPlan =
            serde_json::from_str(candidate).map_err(|e| format!("not JSON: {}", e))?;

        let route = Route::parse(&raw.route).ok_or_else(|| format!("unknown route {}", raw.route))?;

        if raw.steps.is_empty() {
            return Err("empty steps".to_string());
        }

        if let Some(range) = &raw.time_range {
            if !is_iso_date(&range.start_date) || !is_iso_date(&range.end_date) {
                return Err("timeRange dates must be YYYY-MM-DD".to_string());
            }
        }

        let mut steps = Vec::with_capacity(raw.steps.len());
        for step in raw.steps {
            if !self.registry.contains(&step.tool) {
                return Err(format!("unknown tool {}", step.tool));
            }
            let args = self
                .registry
                .normalize_args(&step.tool, &step.args)
                .map_err(|e| e.to_string())?;
            steps.push(PlanStep {
                tool: step.tool,
                args,
            });
        }

        Ok(Plan {
            route,
            time_range: raw.time_range,
            steps,
            notes: raw.notes,
        })
    }

    /// Deterministic rule-based plan builder.
    pub fn heuristic_plan(&self, input: &PlannerInput<'_>) -> Plan {
        let lowered = input.query.to_lowercase();
        let tc = input.time_context;

        let metric = detect_metric(&lowered);
        let limit = detect_limit(&lowered).unwrap_or(10);
        let (start, end) = detect_range(&lowered, tc);
        let range = TimeRange {
            start_date: start.to_string(),
            end_date: end.to_string(),
        };

        let steps: Vec<PlanStep>;
        let time_range: TimeRange;

        if lowered.contains("those products") && !input.session.selected_product_ids.is_empty() {
            time_range = range;
            steps = vec![PlanStep {
                tool: "timeseries".to_string(),
                args: json!({
                    "metric": metric,
                    "productIds": input.session.selected_product_ids,
                    "startDate": time_range.start_date,
                    "endDate": time_range.end_date,
                    "grain": "day",
                }),
            }];
        } else if lowered.contains("why") && lowered.contains("drop") && lowered.contains("wow") {
            // Week-over-week comparison across the three volume metrics
            time_range = TimeRange {
                start_date: tc.this_week_start.to_string(),
                end_date: tc.this_week_end.to_string(),
            };
            let weeks = [
                (tc.this_week_start, tc.this_week_end),
                (tc.last_week_start, tc.last_week_end),
            ];
            steps = ["sales", "sessions", "units"]
                .iter()
                .flat_map(|m| {
                    weeks.iter().map(move |(ws, we)| PlanStep {
                        tool: "top_products".to_string(),
                        args: json!({
                            "metric": m,
                            "startDate": ws.to_string(),
                            "endDate": we.to_string(),
                            "limit": 50,
                        }),
                    })
                })
                .collect();
        } else if lowered.contains("top") && lowered.contains("product") {
            time_range = range;
            steps = vec![PlanStep {
                tool: "top_products".to_string(),
                args: json!({
                    "metric": metric,
                    "startDate": time_range.start_date,
                    "endDate": time_range.end_date,
                    "limit": limit,
                }),
            }];
        } else {
            time_range = range;
            steps = vec![PlanStep {
                tool: "list_products".to_string(),
                args: json!({ "limit": 20 }),
            }];
        }

        // Canonicalize args so cache signatures match LLM-produced plans
        let steps = steps
            .into_iter()
            .map(|step| {
                let args = self
                    .registry
                    .normalize_args(&step.tool, &step.args)
                    .unwrap_or(step.args);
                PlanStep {
                    tool: step.tool,
                    args,
                }
            })
            .collect();

        Plan {
            route: input.route,
            time_range: Some(time_range),
            steps,
            notes: None,
        }
    }
}

fn detect_metric(lowered: &str) -> &'static str {
    if lowered.contains("traffic") || lowered.contains("session") {
        "sessions"
    } else if lowered.contains("units") {
        "units"
    } else if lowered.contains("conversion") {
        "conversion_rate"
    } else {
        "sales"
    }
}

fn detect_limit(lowered: &str) -> Option<i64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"top\s+(\d{1,3})").expect("valid limit regex"));
    re.captures(lowered)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .map(|n| n.clamp(1, 100))
}

fn detect_range(
    lowered: &str,
    tc: &TimeContext,
) -> (chrono::NaiveDate, chrono::NaiveDate) {
    if lowered.contains("last week") {
        (tc.last_week_start, tc.last_week_end)
    } else if lowered.contains("this week") {
        (tc.this_week_start, tc.this_week_end)
    } else if lowered.contains("this month") {
        (tc.this_month_start, tc.this_month_end)
    } else {
        (tc.last_month_start, tc.last_month_end)
    }
}

fn is_iso_date(raw: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"));
    re.is_match(raw)
}

/// Scan free-form text for top-level balanced `{...}` spans. Braces inside
/// single- or double-quoted strings do not count; backslash escapes are
/// honored inside strings.
pub fn scan_json_candidates(text: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            candidates.push(&text[s..=i]);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    candidates
}

/// Remove commas that directly precede a closing brace or bracket,
/// ignoring commas inside double-quoted strings.
pub fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TimeContext;
    use crate::dataset::SellerDataset;
    use crate::llm::{Completion, CompletionRequest, LLMClient, LLMError};
    use async_trait::async_trait;

    fn registry() -> Arc<ToolRegistry> {
        let start: chrono::NaiveDate = "2025-10-01".parse().unwrap();
        Arc::new(ToolRegistry::new(Arc::new(SellerDataset::generate(
            42, start, 120,
        ))))
    }

    fn tc() -> TimeContext {
        TimeContext::for_today("2026-02-04".parse().unwrap())
    }

    fn input<'a>(
        query: &'a str,
        tc: &'a TimeContext,
        session: &'a SessionState,
    ) -> PlannerInput<'a> {
        PlannerInput {
            route: Route::DataPresenter,
            query,
            augmented_query: query,
            time_context: tc,
            session,
            cards: &[],
        }
    }

    #[test]
    fn test_scan_single_candidate() {
        let found = scan_json_candidates(r#"Sure! {"a": 1} hope that helps"#);
        assert_eq!(found, vec![r#"{"a": 1}"#]);
    }

    #[test]
    fn test_scan_ignores_braces_in_strings() {
        let found = scan_json_candidates(r#"{"text": "closing } inside", "n": 1}"#);
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with(r#""n": 1}"#));
    }

    #[test]
    fn test_scan_handles_single_quotes() {
        let found = scan_json_candidates(r#"{'key': 'va}lue'}"#);
        assert_eq!(found, vec![r#"{'key': 'va}lue'}"#]);
    }

    #[test]
    fn test_scan_handles_escapes() {
        let found = scan_json_candidates(r#"{"a": "quote \" and } brace"}"#);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_scan_multiple_candidates_in_order() {
        let found = scan_json_candidates(r#"first {"a":1} then {"b":2}"#);
        assert_eq!(found, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[test]
    fn test_scan_nested_objects_single_candidate() {
        let found = scan_json_candidates(r#"{"a": {"b": {"c": 3}}}"#);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_scan_unbalanced_is_dropped() {
        assert!(scan_json_candidates(r#"{"a": 1"#).is_empty());
    }

    #[test]
    fn test_strip_trailing_commas() {
        assert_eq!(
            strip_trailing_commas(r#"{"a": [1, 2,], "b": 3,}"#),
            r#"{"a": [1, 2], "b": 3}"#
        );
    }

    #[test]
    fn test_strip_preserves_commas_in_strings() {
        let s = r#"{"a": "x,}", "b": 1}"#;
        assert_eq!(strip_trailing_commas(s), s);
    }

    #[test]
    fn test_strip_handles_whitespace_before_close() {
        assert_eq!(
            strip_trailing_commas("{\"a\": 1,\n  }"),
            "{\"a\": 1\n  }"
        );
    }

    #[test]
    fn test_heuristic_top_products() {
        let planner = Planner::new(None, registry());
        let tc = tc();
        let session = SessionState::default();
        let plan = planner.heuristic_plan(&input(
            "What were the sales for my top 10 products last month?",
            &tc,
            &session,
        ));

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool, "top_products");
        assert_eq!(plan.steps[0].args["metric"], "sales");
        assert_eq!(plan.steps[0].args["limit"], 10);
        assert_eq!(plan.steps[0].args["startDate"], "2026-01-01");
        assert_eq!(plan.steps[0].args["endDate"], "2026-01-31");
    }

    #[test]
    fn test_heuristic_those_products() {
        let planner = Planner::new(None, registry());
        let tc = tc();
        let session = SessionState {
            selected_product_ids: vec![3, 1, 7],
        };
        let plan = planner.heuristic_plan(&input(
            "show traffic for those products last month",
            &tc,
            &session,
        ));

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool, "timeseries");
        assert_eq!(plan.steps[0].args["metric"], "sessions");
        assert_eq!(plan.steps[0].args["productIds"], serde_json::json!([3, 1, 7]));
    }

    #[test]
    fn test_heuristic_wow_six_steps() {
        let planner = Planner::new(None, registry());
        let tc = tc();
        let session = SessionState::default();
        let plan = planner.heuristic_plan(&input("Why did sales drop WoW?", &tc, &session));

        assert_eq!(plan.steps.len(), 6);
        assert!(plan.steps.iter().all(|s| s.tool == "top_products"));
        assert!(plan.steps.iter().all(|s| s.args["limit"] == 50));
        let range = plan.time_range.unwrap();
        assert_eq!(range.start_date, "2026-02-02");
        assert_eq!(range.end_date, "2026-02-08");
    }

    #[test]
    fn test_heuristic_default_list_products() {
        let planner = Planner::new(None, registry());
        let tc = tc();
        let session = SessionState::default();
        let plan = planner.heuristic_plan(&input("how is my conversion trending", &tc, &session));

        assert_eq!(plan.steps[0].tool, "list_products");
        assert_eq!(plan.steps[0].args["limit"], 20);
    }

    struct ScriptedLlm {
        reply: String,
    }

    #[async_trait]
    impl LLMClient for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<Completion, LLMError> {
            Ok(Completion {
                text: self.reply.clone(),
                latency_ms: 1,
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn test_llm_plan_accepted() {
        let reply = r#"Here is the plan:
{"route": "data_presenter", "timeRange": {"startDate": "2026-01-01", "endDate": "2026-01-31"},
 "steps": [{"tool": "top_products", "args": {"metric": "revenue", "start_date": "2026-01-01", "end_date": "2026-01-31", "n": 10,}}],}
Done."#;
        let planner = Planner::new(
            Some(Arc::new(ScriptedLlm {
                reply: reply.to_string(),
            })),
            registry(),
        );
        let tc = tc();
        let session = SessionState::default();
        let out = planner
            .plan(input("top 10 products last month", &tc, &session))
            .await
            .unwrap();

        assert!(!out.used_fallback);
        assert_eq!(out.plan.steps[0].args["metric"], "sales");
        assert_eq!(out.plan.steps[0].args["limit"], 10);
    }

    #[tokio::test]
    async fn test_llm_garbage_falls_back() {
        let planner = Planner::new(
            Some(Arc::new(ScriptedLlm {
                reply: "I cannot produce a plan today {broken".to_string(),
            })),
            registry(),
        );
        let tc = tc();
        let session = SessionState::default();
        let out = planner
            .plan(input("top 10 products last month", &tc, &session))
            .await
            .unwrap();

        assert!(out.used_fallback);
        assert!(out.raw_text.is_some());
        assert_eq!(out.plan.steps[0].tool, "top_products");
    }

    #[tokio::test]
    async fn test_llm_unknown_tool_falls_back() {
        let reply = r#"{"route": "data_presenter", "steps": [{"tool": "drop_tables", "args": {}}]}"#;
        let planner = Planner::new(
            Some(Arc::new(ScriptedLlm {
                reply: reply.to_string(),
            })),
            registry(),
        );
        let tc = tc();
        let session = SessionState::default();
        let out = planner
            .plan(input("top 10 products last month", &tc, &session))
            .await
            .unwrap();

        assert!(out.used_fallback);
    }

    #[tokio::test]
    async fn test_second_candidate_wins() {
        let reply = r#"{"route": "nowhere", "steps": []}
{"route": "data_presenter", "steps": [{"tool": "list_products", "args": {"limit": 5}}]}"#;
        let planner = Planner::new(
            Some(Arc::new(ScriptedLlm {
                reply: reply.to_string(),
            })),
            registry(),
        );
        let tc = tc();
        let session = SessionState::default();
        let out = planner
            .plan(input("list my products by sales", &tc, &session))
            .await
            .unwrap();

        assert!(!out.used_fallback);
        assert_eq!(out.plan.steps[0].tool, "list_products");
    }
}
