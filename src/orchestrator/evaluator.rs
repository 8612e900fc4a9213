//! Evaluator: scoring and memory-write proposals
//!
//! Infers a ground-truth spec from the raw query text and "today"
//! (re-deriving the calendar itself rather than trusting the planner),
//! re-executes the canonical tools, and scores the actual run on
//! correctness / completeness / relevance. Quality is always the arithmetic
//! mean of the three. Depending on quality it then proposes dedupable
//! memory writes for the store.

use crate::clock::TimeContext;
use crate::dataset::{Metric, TopProductRow};
use crate::db::{user_scope, MemoryKind, MemoryUpsert};
use crate::orchestrator::types::{EvalReport, Plan, ToolCallRecord};
use crate::signature::stable_json;
use chrono::{DateTime, Duration, NaiveDate};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::tools::ToolRegistry;

/// Quality at or above which a run seeds reusable pattern memory.
pub const GOOD_QUALITY_THRESHOLD: f64 = 0.8;

/// Quality at or below which a run seeds failure-case memory.
pub const BAD_QUALITY_THRESHOLD: f64 = 0.5;

/// Relative tolerance for metric-value comparison.
const VALUE_TOLERANCE: f64 = 0.01;

/// TTL granted to unverified mid-band patterns.
const LOW_CONFIDENCE_TTL_DAYS: i64 = 30;

/// Ground-truth specification inferred from a query.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalSpec {
    TopProducts {
        metric: Metric,
        limit: usize,
        start: NaiveDate,
        end: NaiveDate,
    },
    Timeseries {
        metric: Metric,
        start: NaiveDate,
        end: NaiveDate,
    },
    WhyDropWow {
        metric: Metric,
        this_week: (NaiveDate, NaiveDate),
        last_week: (NaiveDate, NaiveDate),
    },
}

impl EvalSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            EvalSpec::TopProducts { .. } => "top_products",
            EvalSpec::Timeseries { .. } => "timeseries",
            EvalSpec::WhyDropWow { .. } => "why_drop_wow",
        }
    }
}

/// Infer the ground-truth spec, if the query matches a scorable shape.
pub fn infer_spec(query: &str, today: NaiveDate) -> Option<EvalSpec> {
    let lowered = query.to_lowercase();
    let tc = TimeContext::for_today(today);

    if lowered.contains("why") && lowered.contains("drop") && lowered.contains("wow") {
        return Some(EvalSpec::WhyDropWow {
            metric: detect_metric(&lowered),
            this_week: (tc.this_week_start, tc.this_week_end),
            last_week: (tc.last_week_start, tc.last_week_end),
        });
    }

    if (lowered.contains("traffic") || lowered.contains("session"))
        && lowered.contains("those products")
    {
        let (start, end) = detect_range(&lowered, &tc);
        return Some(EvalSpec::Timeseries {
            metric: Metric::Sessions,
            start,
            end,
        });
    }

    if lowered.contains("top") && lowered.contains("product") {
        let has_range = lowered.contains("last month")
            || lowered.contains("this month")
            || lowered.contains("last week");
        if has_range {
            let (start, end) = detect_range(&lowered, &tc);
            return Some(EvalSpec::TopProducts {
                metric: detect_metric(&lowered),
                limit: detect_limit(&lowered).unwrap_or(10).min(100),
                start,
                end,
            });
        }
    }

    None
}

fn detect_metric(lowered: &str) -> Metric {
    if lowered.contains("traffic") || lowered.contains("session") {
        Metric::Sessions
    } else if lowered.contains("units") {
        Metric::Units
    } else if lowered.contains("conversion") {
        Metric::ConversionRate
    } else {
        Metric::Sales
    }
}

fn detect_limit(lowered: &str) -> Option<usize> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"top\s+(\d{1,3})").expect("valid limit regex"));
    re.captures(lowered)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
}

fn detect_range(lowered: &str, tc: &TimeContext) -> (NaiveDate, NaiveDate) {
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

fn nearly_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= VALUE_TOLERANCE * 1.0f64.max(a.abs()).max(b.abs())
}

fn mean3(a: f64, b: f64, c: f64) -> f64 {
    (a + b + c) / 3.0
}

pub struct Evaluator {
    registry: Arc<ToolRegistry>,
}

impl Evaluator {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Score a run against its inferred ground truth. `None` when the query
    /// has no scorable shape.
    pub fn evaluate(
        &self,
        query: &str,
        today: NaiveDate,
        tool_calls: &[ToolCallRecord],
    ) -> Option<EvalReport> {
        let spec = infer_spec(query, today)?;
        debug!(kind = spec.kind(), "evaluating run");

        let report = match &spec {
            EvalSpec::TopProducts {
                metric,
                limit,
                start,
                end,
            } => self.score_top_products(*metric, *limit, *start, *end, tool_calls),
            EvalSpec::Timeseries { metric, start, end } => {
                self.score_timeseries(*metric, *start, *end, tool_calls)
            }
            EvalSpec::WhyDropWow {
                metric,
                this_week,
                last_week,
            } => self.score_why_drop_wow(*metric, *this_week, *last_week, tool_calls),
        };

        Some(report)
    }

    fn ground_truth_rows(
        &self,
        metric: Metric,
        start: NaiveDate,
        end: NaiveDate,
        limit: usize,
    ) -> Vec<TopProductRow> {
        let args = json!({
            "metric": metric.as_str(),
            "startDate": start.to_string(),
            "endDate": end.to_string(),
            "limit": limit,
        });
        self.registry
            .execute("top_products", &args)
            .ok()
            .and_then(|result| serde_json::from_value(result["rows"].clone()).ok())
            .unwrap_or_default()
    }

    fn score_top_products(
        &self,
        metric: Metric,
        limit: usize,
        start: NaiveDate,
        end: NaiveDate,
        tool_calls: &[ToolCallRecord],
    ) -> EvalReport {
        let mut notes = Vec::new();

        let Some(actual) = tool_calls.iter().find(|r| r.tool == "top_products") else {
            notes.push("expected a top_products call but none was made".to_string());
            return EvalReport {
                kind: "top_products".to_string(),
                correctness: 0.0,
                completeness: 0.0,
                relevance: 0.0,
                quality: 0.0,
                notes,
            };
        };

        let relevance = if args_match_range(&actual.args, metric, start, end) {
            1.0
        } else {
            notes.push(format!(
                "args diverge from inferred spec (expected {} {}..{})",
                metric.as_str(),
                start,
                end
            ));
            0.4
        };

        let actual_rows: Vec<TopProductRow> =
            serde_json::from_value(actual.result["rows"].clone()).unwrap_or_default();

        if actual_rows.is_empty() {
            notes.push("tool returned no rows".to_string());
            return EvalReport {
                kind: "top_products".to_string(),
                correctness: 0.0,
                completeness: 0.0,
                relevance: 0.2,
                quality: mean3(0.0, 0.0, 0.2),
                notes,
            };
        }

        let expected = self.ground_truth_rows(metric, start, end, limit);
        let n = limit.min(expected.len()).min(actual_rows.len());
        let correctness = if n == 0 {
            0.0
        } else {
            let matches = (0..n)
                .filter(|&i| {
                    expected[i].product_id == actual_rows[i].product_id
                        && nearly_equal(expected[i].metric_value, actual_rows[i].metric_value)
                })
                .count();
            if matches < n {
                notes.push(format!("{} of {} ranked rows matched ground truth", matches, n));
            }
            matches as f64 / n as f64
        };

        let completeness = 1.0f64.min(actual_rows.len() as f64 / limit as f64);
        if completeness < 1.0 {
            notes.push(format!(
                "returned {} rows where {} were requested",
                actual_rows.len(),
                limit
            ));
        }

        EvalReport {
            kind: "top_products".to_string(),
            correctness,
            completeness,
            relevance,
            quality: mean3(correctness, completeness, relevance),
            notes,
        }
    }

    fn score_timeseries(
        &self,
        metric: Metric,
        start: NaiveDate,
        end: NaiveDate,
        tool_calls: &[ToolCallRecord],
    ) -> EvalReport {
        let mut notes = Vec::new();

        let Some(actual) = tool_calls.iter().find(|r| r.tool == "timeseries") else {
            notes.push("expected a timeseries call but none was made".to_string());
            return EvalReport {
                kind: "timeseries".to_string(),
                correctness: 0.0,
                completeness: 0.0,
                relevance: 0.0,
                quality: 0.0,
                notes,
            };
        };

        let relevance = if args_match_range(&actual.args, metric, start, end) {
            1.0
        } else {
            notes.push(format!(
                "args diverge from inferred spec (expected {} {}..{})",
                metric.as_str(),
                start,
                end
            ));
            0.4
        };

        let requested = actual
            .args
            .get("productIds")
            .and_then(Value::as_array)
            .map(|a| a.len());

        let empty: Vec<Value> = Vec::new();
        let series = actual.result["series"].as_array().unwrap_or(&empty);

        if series.is_empty() {
            notes.push("no series returned".to_string());
            return EvalReport {
                kind: "timeseries".to_string(),
                correctness: 0.0,
                completeness: 0.0,
                relevance,
                quality: mean3(0.0, 0.0, relevance),
                notes,
            };
        }

        // Completeness counts only series that carry evidence
        let with_points = series
            .iter()
            .filter(|s| {
                s.get("points")
                    .and_then(Value::as_array)
                    .map_or(false, |p| !p.is_empty())
            })
            .count();
        let completeness = match requested {
            Some(requested) if requested > 0 => 1.0f64.min(with_points as f64 / requested as f64),
            _ => {
                notes.push("requested product count unknown".to_string());
                0.5
            }
        };

        let mut total_points = 0usize;
        let mut in_range = 0usize;
        for s in series {
            if let Some(points) = s.get("points").and_then(Value::as_array) {
                for point in points {
                    total_points += 1;
                    let date = point
                        .get("date")
                        .and_then(Value::as_str)
                        .and_then(|d| d.parse::<NaiveDate>().ok());
                    if let Some(date) = date {
                        if date >= start && date <= end {
                            in_range += 1;
                        }
                    }
                }
            }
        }
        let correctness = if total_points == 0 {
            notes.push("series carry no points".to_string());
            0.0
        } else {
            in_range as f64 / total_points as f64
        };

        EvalReport {
            kind: "timeseries".to_string(),
            correctness,
            completeness,
            relevance,
            quality: mean3(correctness, completeness, relevance),
            notes,
        }
    }

    fn score_why_drop_wow(
        &self,
        metric: Metric,
        this_week: (NaiveDate, NaiveDate),
        last_week: (NaiveDate, NaiveDate),
        tool_calls: &[ToolCallRecord],
    ) -> EvalReport {
        let mut notes = Vec::new();

        let week_call = |week: (NaiveDate, NaiveDate)| {
            tool_calls.iter().find(|r| {
                r.tool == "top_products" && args_match_range(&r.args, metric, week.0, week.1)
            })
        };
        let this_week_call = week_call(this_week);
        let last_week_call = week_call(last_week);
        let has_weekly_comparison = this_week_call.is_some() && last_week_call.is_some();

        let timeseries_call = tool_calls.iter().find(|r| r.tool == "timeseries");
        let changes_call = tool_calls.iter().find(|r| r.tool == "compute_changes");
        let has_drilldown = timeseries_call.is_some() && changes_call.is_some();

        let relevance = if has_weekly_comparison || has_drilldown {
            1.0
        } else {
            notes.push("plan neither compares weeks nor drills down".to_string());
            0.5
        };

        let completeness = if has_drilldown {
            0.9
        } else if has_weekly_comparison {
            0.8
        } else if timeseries_call.is_some() {
            notes.push("timeseries present without change computation".to_string());
            0.5
        } else if changes_call.is_some() {
            notes.push("change computation present without timeseries".to_string());
            0.3
        } else {
            0.2
        };

        let correctness = if has_weekly_comparison {
            let mut comparable = 0usize;
            let mut matches = 0usize;
            for (call, week) in [(this_week_call, this_week), (last_week_call, last_week)] {
                let expected_leader = self
                    .ground_truth_rows(metric, week.0, week.1, 1)
                    .first()
                    .map(|r| r.product_id);
                let actual_leader = call
                    .and_then(|r| r.result["rows"].as_array())
                    .and_then(|rows| rows.first())
                    .and_then(|row| row.get("productId"))
                    .and_then(Value::as_i64);
                if let (Some(expected), Some(actual)) = (expected_leader, actual_leader) {
                    comparable += 1;
                    if expected == actual {
                        matches += 1;
                    }
                }
            }
            if comparable > 0 {
                matches as f64 / comparable as f64
            } else {
                notes.push("weekly leaders could not be compared".to_string());
                0.2
            }
        } else if has_drilldown
            && changes_call.map_or(false, |r| r.result.is_object())
        {
            0.6
        } else {
            0.2
        };

        EvalReport {
            kind: "why_drop_wow".to_string(),
            correctness,
            completeness,
            relevance,
            quality: mean3(correctness, completeness, relevance),
            notes,
        }
    }

    /// Propose memory writes for a scored run. All items land in the user's
    /// scope and flow through the deduping upsert.
    pub fn propose_writes(
        &self,
        query: &str,
        user_id: &str,
        plan: Option<&Plan>,
        tool_calls: &[ToolCallRecord],
        report: &EvalReport,
        now_iso: &str,
    ) -> Vec<MemoryUpsert> {
        let scope = user_scope(user_id);
        let canonical = canonicalize_query(query);
        let route = plan.map(|p| p.route.as_str()).unwrap_or("data_presenter");
        let tools: Vec<String> = {
            let mut seen = std::collections::HashSet::new();
            tool_calls
                .iter()
                .filter(|r| seen.insert(r.tool.clone()))
                .map(|r| r.tool.clone())
                .collect()
        };

        let mut writes = Vec::new();

        if report.quality >= GOOD_QUALITY_THRESHOLD {
            writes.push(MemoryUpsert {
                scope: scope.clone(),
                kind: MemoryKind::QueryPattern,
                text: format!(
                    "Pattern: \"{}\" answered via {} using [{}].",
                    canonical,
                    route,
                    tools.join(", ")
                ),
                meta: json!({
                    "route": route,
                    "tools": tools,
                    "quality": report.quality,
                }),
                dedupe_key: None,
                importance: 0.35,
                quality: report.quality,
                expires_at: None,
            });

            if let Some(call) = tool_calls.iter().find(|r| r.tool == "top_products") {
                writes.push(MemoryUpsert {
                    scope: scope.clone(),
                    kind: MemoryKind::ToolTemplate,
                    text: format!(
                        "Template: top_products {} answers \"{}\".",
                        stable_json(&call.args),
                        canonical
                    ),
                    meta: json!({
                        "tool": "top_products",
                        "args": call.args,
                    }),
                    dedupe_key: None,
                    importance: 0.45,
                    quality: report.quality,
                    expires_at: None,
                });
            }
        } else if report.quality <= BAD_QUALITY_THRESHOLD {
            let call_summaries: Vec<Value> = tool_calls
                .iter()
                .map(|r| json!({"tool": r.tool, "args": r.args}))
                .collect();
            writes.push(MemoryUpsert {
                scope,
                kind: MemoryKind::FailureCase,
                text: format!(
                    "Failure: \"{}\" scored {:.2}. {}",
                    canonical,
                    report.quality,
                    report.notes.join("; ")
                ),
                meta: json!({
                    "plan": plan,
                    "toolCalls": call_summaries,
                }),
                dedupe_key: None,
                importance: 0.4,
                quality: report.quality,
                expires_at: None,
            });
        } else {
            writes.push(MemoryUpsert {
                scope,
                kind: MemoryKind::QueryPattern,
                text: format!(
                    "Unverified pattern: \"{}\" via {} (quality {:.2}).",
                    canonical, route, report.quality
                ),
                meta: json!({ "route": route, "quality": report.quality }),
                dedupe_key: None,
                importance: 0.2,
                quality: report.quality,
                expires_at: expiry_after_days(now_iso, LOW_CONFIDENCE_TTL_DAYS),
            });
        }

        writes
    }
}

fn args_match_range(args: &Value, metric: Metric, start: NaiveDate, end: NaiveDate) -> bool {
    args.get("metric").and_then(Value::as_str) == Some(metric.as_str())
        && args.get("startDate").and_then(Value::as_str) == Some(start.to_string().as_str())
        && args.get("endDate").and_then(Value::as_str) == Some(end.to_string().as_str())
}

/// Lowercase, mask ISO dates then bare numbers, and collapse whitespace,
/// so equivalent questions collapse to one dedupe bucket.
pub fn canonicalize_query(query: &str) -> String {
    static DATE_RE: OnceLock<Regex> = OnceLock::new();
    static NUM_RE: OnceLock<Regex> = OnceLock::new();
    let date_re =
        DATE_RE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("valid date regex"));
    let num_re = NUM_RE.get_or_init(|| Regex::new(r"\d+").expect("valid number regex"));

    let lowered = query.to_lowercase();
    let dated = date_re.replace_all(&lowered, "<date>");
    let numbered = num_re.replace_all(&dated, "<n>");
    numbered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn expiry_after_days(now_iso: &str, days: i64) -> Option<String> {
    DateTime::parse_from_rfc3339(now_iso).ok().map(|now| {
        (now + Duration::days(days)).to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    })
}
