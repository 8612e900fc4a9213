//! Typed tool registry
//!
//! Five read-only tools over the seller dataset. Each tool carries a human
//! description and a schema string for planner prompts; arguments pass
//! through a coercion step (key aliases, metric synonyms, timestamp
//! trimming) before strict validation, so planner output and cached
//! signatures always see one canonical argument form.

use crate::dataset::{self, Metric, SellerDataset};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Errors surfaced by tool dispatch. Both kinds are fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArgs { tool: String, reason: String },
}

impl ToolError {
    fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        ToolError::InvalidArgs {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}

/// Prompt-facing description of one tool.
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: &'static str,
}

/// The full tool surface, in dispatch order.
pub const TOOL_SPECS: &[ToolSpec] = &[
    ToolSpec {
        name: "list_products",
        description: "List catalog products, optionally filtered by category.",
        schema: r#"{"category"?: string, "limit"?: int (1..500, default 100)}"#,
    },
    ToolSpec {
        name: "top_products",
        description: "Rank products descending by a metric over a date range.",
        schema: r#"{"metric": "sales"|"units"|"sessions"|"conversion_rate", "startDate": "YYYY-MM-DD", "endDate": "YYYY-MM-DD", "limit": int (1..100, default 10)}"#,
    },
    ToolSpec {
        name: "timeseries",
        description: "Daily metric series for specific products over a date range.",
        schema: r#"{"metric": string, "productIds": [int, ...], "startDate": "YYYY-MM-DD", "endDate": "YYYY-MM-DD", "grain": "day"}"#,
    },
    ToolSpec {
        name: "benchmark",
        description: "Category average of a metric over a date range.",
        schema: r#"{"metric": string, "category": string, "startDate": "YYYY-MM-DD", "endDate": "YYYY-MM-DD"}"#,
    },
    ToolSpec {
        name: "compute_changes",
        description: "Start-to-end absolute and percentage change over an ordered series of points.",
        schema: r#"{"points": [number | {"value": number}, ...] (>= 2)}"#,
    },
];

/// Registry binding tool names to validation and execution over a dataset.
pub struct ToolRegistry {
    dataset: Arc<SellerDataset>,
}

impl ToolRegistry {
    pub fn new(dataset: Arc<SellerDataset>) -> Self {
        Self { dataset }
    }

    /// All tool specs, for prompt assembly.
    pub fn specs(&self) -> &'static [ToolSpec] {
        TOOL_SPECS
    }

    pub fn contains(&self, name: &str) -> bool {
        TOOL_SPECS.iter().any(|s| s.name == name)
    }

    /// Coerce then validate arguments, returning the canonical form used
    /// for execution and cache signatures.
    pub fn normalize_args(&self, tool: &str, args: &Value) -> Result<Value, ToolError> {
        if !self.contains(tool) {
            return Err(ToolError::UnknownTool(tool.to_string()));
        }
        let coerced = coerce_args(args);
        validate_args(tool, &coerced)
    }

    /// Execute a tool with already-normalized arguments.
    pub fn execute(&self, tool: &str, args: &Value) -> Result<Value, ToolError> {
        debug!(tool, %args, "executing tool");
        match tool {
            "list_products" => {
                let category = args.get("category").and_then(Value::as_str);
                let limit = args.get("limit").and_then(Value::as_i64).unwrap_or(100) as usize;
                let products = self.dataset.list_products(category, limit);
                Ok(json!({ "products": products }))
            }
            "top_products" => {
                let metric = arg_metric(tool, args)?;
                let (start, end) = arg_range(tool, args)?;
                let limit = args.get("limit").and_then(Value::as_i64).unwrap_or(10) as usize;
                let rows = self.dataset.top_products(metric, start, end, limit);
                Ok(json!({ "rows": rows }))
            }
            "timeseries" => {
                let metric = arg_metric(tool, args)?;
                let (start, end) = arg_range(tool, args)?;
                let product_ids: Vec<i64> = args
                    .get("productIds")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(Value::as_i64).collect())
                    .unwrap_or_default();
                let series = self.dataset.timeseries(metric, &product_ids, start, end);
                Ok(json!({ "series": series, "grain": "day" }))
            }
            "benchmark" => {
                let metric = arg_metric(tool, args)?;
                let (start, end) = arg_range(tool, args)?;
                let category = args
                    .get("category")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::invalid(tool, "category is required"))?;
                let result = self.dataset.benchmark(metric, category, start, end);
                Ok(serde_json::to_value(result)
                    .map_err(|e| ToolError::invalid(tool, e.to_string()))?)
            }
            "compute_changes" => {
                let values = point_values(tool, args)?;
                let summary = dataset::compute_changes(&values)
                    .ok_or_else(|| ToolError::invalid(tool, "at least 2 points required"))?;
                Ok(serde_json::to_value(summary)
                    .map_err(|e| ToolError::invalid(tool, e.to_string()))?)
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

fn arg_metric(tool: &str, args: &Value) -> Result<Metric, ToolError> {
    args.get("metric")
        .and_then(Value::as_str)
        .and_then(Metric::parse)
        .ok_or_else(|| ToolError::invalid(tool, "metric is required"))
}

fn arg_range(tool: &str, args: &Value) -> Result<(NaiveDate, NaiveDate), ToolError> {
    let start = arg_date(tool, args, "startDate")?;
    let end = arg_date(tool, args, "endDate")?;
    if start > end {
        return Err(ToolError::invalid(tool, "startDate is after endDate"));
    }
    Ok((start, end))
}

fn arg_date(tool: &str, args: &Value, key: &str) -> Result<NaiveDate, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<NaiveDate>().ok())
        .ok_or_else(|| ToolError::invalid(tool, format!("{} must be YYYY-MM-DD", key)))
}

fn point_values(tool: &str, args: &Value) -> Result<Vec<f64>, ToolError> {
    let points = args
        .get("points")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::invalid(tool, "points must be an array"))?;
    let values: Vec<f64> = points
        .iter()
        .filter_map(|p| match p {
            Value::Number(n) => n.as_f64(),
            Value::Object(o) => o.get("value").and_then(Value::as_f64),
            _ => None,
        })
        .collect();
    if values.len() < 2 {
        return Err(ToolError::invalid(tool, "at least 2 numeric points required"));
    }
    Ok(values)
}

/// Key aliases accepted from planners: snake_case argument names, n/topN
/// for limit, "daily" grain, and timestamps where dates are expected.
fn coerce_args(args: &Value) -> Value {
    let Some(map) = args.as_object() else {
        return json!({});
    };

    let mut out = Map::new();
    for (key, value) in map {
        let canonical = match key.as_str() {
            "start_date" => "startDate",
            "end_date" => "endDate",
            "product_ids" => "productIds",
            "n" | "topN" | "top_n" => "limit",
            other => other,
        };
        out.insert(canonical.to_string(), value.clone());
    }

    if let Some(metric) = out.get("metric").and_then(Value::as_str) {
        if let Some(parsed) = Metric::parse(metric) {
            out.insert("metric".to_string(), json!(parsed.as_str()));
        }
    }

    if let Some(grain) = out.get("grain").and_then(Value::as_str) {
        if grain.eq_ignore_ascii_case("daily") {
            out.insert("grain".to_string(), json!("day"));
        }
    }

    for key in ["startDate", "endDate"] {
        if let Some(raw) = out.get(key).and_then(Value::as_str) {
            // "2026-01-01T00:00:00Z" -> "2026-01-01"
            if raw.len() > 10 && raw.as_bytes().get(10) == Some(&b'T') {
                let trimmed = raw[..10].to_string();
                out.insert(key.to_string(), json!(trimmed));
            }
        }
    }

    Value::Object(out)
}

/// Per-tool schema validation over coerced args, producing the canonical
/// argument object.
fn validate_args(tool: &str, args: &Value) -> Result<Value, ToolError> {
    let map = args.as_object().cloned().unwrap_or_default();
    let mut out = Map::new();

    match tool {
        "list_products" => {
            if let Some(category) = map.get("category").filter(|v| !v.is_null()) {
                let c = category
                    .as_str()
                    .ok_or_else(|| ToolError::invalid(tool, "category must be a string"))?;
                out.insert("category".to_string(), json!(c.to_lowercase()));
            }
            let limit = opt_int(tool, &map, "limit")?.unwrap_or(100);
            if !(1..=500).contains(&limit) {
                return Err(ToolError::invalid(tool, "limit must be in 1..=500"));
            }
            out.insert("limit".to_string(), json!(limit));
        }
        "top_products" => {
            out.insert("metric".to_string(), require_metric(tool, &map)?);
            let (start, end) = require_range(tool, &map)?;
            out.insert("startDate".to_string(), json!(start.to_string()));
            out.insert("endDate".to_string(), json!(end.to_string()));
            let limit = opt_int(tool, &map, "limit")?.unwrap_or(10);
            if !(1..=100).contains(&limit) {
                return Err(ToolError::invalid(tool, "limit must be in 1..=100"));
            }
            out.insert("limit".to_string(), json!(limit));
        }
        "timeseries" => {
            out.insert("metric".to_string(), require_metric(tool, &map)?);
            let ids = map
                .get("productIds")
                .and_then(Value::as_array)
                .ok_or_else(|| ToolError::invalid(tool, "productIds must be an array"))?;
            let parsed: Vec<i64> = ids.iter().filter_map(Value::as_i64).collect();
            if parsed.is_empty() || parsed.len() != ids.len() {
                return Err(ToolError::invalid(
                    tool,
                    "productIds must be a non-empty array of integers",
                ));
            }
            out.insert("productIds".to_string(), json!(parsed));
            let (start, end) = require_range(tool, &map)?;
            out.insert("startDate".to_string(), json!(start.to_string()));
            out.insert("endDate".to_string(), json!(end.to_string()));
            if let Some(grain) = map.get("grain") {
                let g = grain
                    .as_str()
                    .ok_or_else(|| ToolError::invalid(tool, "grain must be a string"))?;
                if g != "day" {
                    return Err(ToolError::invalid(tool, "grain must be \"day\""));
                }
            }
            out.insert("grain".to_string(), json!("day"));
        }
        "benchmark" => {
            out.insert("metric".to_string(), require_metric(tool, &map)?);
            let category = map
                .get("category")
                .and_then(Value::as_str)
                .ok_or_else(|| ToolError::invalid(tool, "category is required"))?;
            out.insert("category".to_string(), json!(category.to_lowercase()));
            let (start, end) = require_range(tool, &map)?;
            out.insert("startDate".to_string(), json!(start.to_string()));
            out.insert("endDate".to_string(), json!(end.to_string()));
        }
        "compute_changes" => {
            let values = point_values(tool, args)?;
            out.insert("points".to_string(), json!(values));
        }
        other => return Err(ToolError::UnknownTool(other.to_string())),
    }

    Ok(Value::Object(out))
}

fn require_metric(tool: &str, map: &Map<String, Value>) -> Result<Value, ToolError> {
    let metric = map
        .get("metric")
        .and_then(Value::as_str)
        .and_then(Metric::parse)
        .ok_or_else(|| {
            ToolError::invalid(
                tool,
                "metric must be one of sales, units, sessions, conversion_rate",
            )
        })?;
    Ok(json!(metric.as_str()))
}

fn require_range(tool: &str, map: &Map<String, Value>) -> Result<(NaiveDate, NaiveDate), ToolError> {
    let wrapped = Value::Object(map.clone());
    arg_range(tool, &wrapped)
}

fn opt_int(tool: &str, map: &Map<String, Value>, key: &str) -> Result<Option<i64>, ToolError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| ToolError::invalid(tool, format!("{} must be an integer", key))),
        Some(_) => Err(ToolError::invalid(tool, format!("{} must be an integer", key))),
    }
}
