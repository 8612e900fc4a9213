//! Manager: in-scope gate and route classification
//!
//! A keyword heuristic decides whether a query is answerable with seller
//! analytics and, if so, which worker agent should take it. The heuristic is
//! always confident today; the LLM consultation path exists for future
//! routers and falls back to the heuristic on any parse failure.

use crate::llm::{CompletionRequest, LLMClient};
use crate::orchestrator::leverager::MemoryCard;
use crate::orchestrator::types::Route;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

const ANALYTICS_VOCABULARY: &[&str] = &[
    "sales",
    "revenue",
    "units",
    "sessions",
    "traffic",
    "conversion",
    "benchmark",
    "top",
    "month",
    "week",
    "yoy",
    "mom",
    "wow",
];

const OUT_OF_SCOPE_TOPICS: &[&str] = &[
    "weather", "recipe", "love", "movie", "music", "politics", "medical",
];

const INSIGHT_KEYWORDS: &[&str] = &[
    "why",
    "perform",
    "benchmark",
    "recommend",
    "improve",
    "diagnostic",
    "compare",
    "insight",
];

/// Routing decision for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub ood: bool,
    pub route: Option<Route>,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct LlmRouteReply {
    ood: bool,
    route: Option<String>,
    reason: Option<String>,
}

pub struct Manager {
    llm: Option<Arc<dyn LLMClient>>,
}

impl Manager {
    pub fn new(llm: Option<Arc<dyn LLMClient>>) -> Self {
        Self { llm }
    }

    /// Classify the query. Memory cards are only consulted when the
    /// heuristic is not confident and an LLM is available.
    pub async fn route(&self, query: &str, cards: &[MemoryCard]) -> RouteDecision {
        let (decision, confident) = heuristic_route(query);
        if confident {
            return decision;
        }

        let Some(llm) = &self.llm else {
            return decision;
        };

        match self.consult_llm(llm.as_ref(), query, cards).await {
            Some(llm_decision) => llm_decision,
            None => {
                warn!("LLM route consultation failed to parse, using heuristic");
                decision
            }
        }
    }

    async fn consult_llm(
        &self,
        llm: &dyn LLMClient,
        query: &str,
        cards: &[MemoryCard],
    ) -> Option<RouteDecision> {
        let mut instructions = String::from(
            "You route seller-analytics questions. Respond with JSON only: \
             {\"ood\": bool, \"route\": \"data_presenter\"|\"insight_generator\"|null, \
             \"reason\": string}. A query is out of domain (ood) when it is not \
             about seller analytics.",
        );
        for card in cards {
            instructions.push_str("\n\n");
            instructions.push_str(&card.text);
        }

        let mut request = CompletionRequest::single_turn(instructions, query);
        request.temperature = Some(0.0);

        let completion = llm.complete(request).await.ok()?;
        let reply: LlmRouteReply = serde_json::from_str(completion.text.trim()).ok()?;

        let route = match (&reply.ood, reply.route.as_deref()) {
            (false, Some(raw)) => Some(Route::parse(raw)?),
            _ => None,
        };
        if !reply.ood && route.is_none() {
            return None;
        }

        Some(RouteDecision {
            ood: reply.ood,
            route,
            reason: reply.reason.unwrap_or_else(|| "llm".to_string()),
        })
    }
}

/// Keyword gate. Returns the decision and whether it is confident; the
/// current rules are always confident.
pub fn heuristic_route(query: &str) -> (RouteDecision, bool) {
    let lowered = query.to_lowercase();

    let blacklisted = OUT_OF_SCOPE_TOPICS.iter().find(|t| lowered.contains(**t));
    let has_vocabulary = ANALYTICS_VOCABULARY.iter().any(|t| lowered.contains(t));

    if let Some(topic) = blacklisted {
        debug!(topic, "query blacklisted");
        return (
            RouteDecision {
                ood: true,
                route: None,
                reason: format!("off-topic subject: {}", topic),
            },
            true,
        );
    }
    if !has_vocabulary {
        return (
            RouteDecision {
                ood: true,
                route: None,
                reason: "no analytics vocabulary".to_string(),
            },
            true,
        );
    }

    let route = if INSIGHT_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        Route::InsightGenerator
    } else {
        Route::DataPresenter
    };

    (
        RouteDecision {
            ood: false,
            route: Some(route),
            reason: format!("keyword route: {}", route.as_str()),
        },
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weather_is_ood() {
        let (decision, confident) = heuristic_route("What's the weather tomorrow?");
        assert!(decision.ood);
        assert!(decision.route.is_none());
        assert!(confident);
    }

    #[test]
    fn test_no_vocabulary_is_ood() {
        let (decision, _) = heuristic_route("Tell me a story about dragons");
        assert!(decision.ood);
    }

    #[test]
    fn test_products_alone_is_ood() {
        // "products" is not analytics vocabulary by itself
        let (decision, _) = heuristic_route("tell me about my products");
        assert!(decision.ood);
    }

    #[test]
    fn test_blacklist_beats_vocabulary() {
        let (decision, _) = heuristic_route("best music sales charts");
        assert!(decision.ood);
    }

    #[test]
    fn test_presenter_route() {
        let (decision, _) = heuristic_route("What were the sales for my top 10 products last month?");
        assert!(!decision.ood);
        assert_eq!(decision.route, Some(Route::DataPresenter));
    }

    #[test]
    fn test_insight_route_on_why() {
        let (decision, _) = heuristic_route("Why did my sales drop WoW?");
        assert!(!decision.ood);
        assert_eq!(decision.route, Some(Route::InsightGenerator));
    }

    #[test]
    fn test_insight_route_on_benchmark() {
        let (decision, _) = heuristic_route("benchmark my conversion against the category");
        assert_eq!(decision.route, Some(Route::InsightGenerator));
    }

    #[tokio::test]
    async fn test_manager_without_llm_uses_heuristic() {
        let manager = Manager::new(None);
        let decision = manager.route("top 5 products by units this week", &[]).await;
        assert_eq!(decision.route, Some(Route::DataPresenter));
    }
}
