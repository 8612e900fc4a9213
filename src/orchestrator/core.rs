//! Orchestrator
//!
//! End-to-end state machine for one query:
//! Augment → ManagerRoute → [OOD | WorkerDispatch] → Evaluate →
//! MaybeWrite → Record. Memory retrieval, writes, and tool caching are all
//! gated on the run's memory mode. Every run is recorded, including
//! out-of-domain ones.

use crate::clock::Clock;
use crate::db::{user_scope, MemoryKind, MemoryUpsert, StateStore, GLOBAL_SCOPE};
use crate::llm::LLMClient;
use crate::orchestrator::agents::{AgentInput, AgentOutcome, DataPresenter, InsightGenerator};
use crate::orchestrator::evaluator::Evaluator;
use crate::orchestrator::executor::Executor;
use crate::orchestrator::leverager::{Leverager, MemoryCard, Stage};
use crate::orchestrator::manager::Manager;
use crate::orchestrator::planner::Planner;
use crate::orchestrator::types::{
    Route, RunConfig, RunResult, SessionState, StageLatencies,
};
use crate::redact::redact;
use crate::tools::ToolRegistry;
use anyhow::Result;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fixed reply for out-of-domain queries.
pub const OOD_RESPONSE: &str =
    "Out of scope: I can help with seller analytics (sales, traffic, benchmarks).";

/// Calendar convention seeded into the global scope at construction.
pub const WEEK_CONVENTION_RULE: &str = "Weeks run Monday through Sunday; 'last week' and \
     'last month' refer to the previous calendar week and month.";

pub struct Orchestrator {
    store: Arc<StateStore>,
    leverager: Leverager,
    manager: Manager,
    presenter: DataPresenter,
    insight: InsightGenerator,
    evaluator: Evaluator,
}

impl Orchestrator {
    /// Wire up the pipeline and seed the global calendar rule.
    pub async fn new(
        store: Arc<StateStore>,
        registry: Arc<ToolRegistry>,
        llm: Option<Arc<dyn LLMClient>>,
    ) -> Result<Self> {
        let now_iso = Clock::system().now_iso();
        store
            .memory()
            .upsert(
                MemoryUpsert {
                    scope: GLOBAL_SCOPE.to_string(),
                    kind: MemoryKind::DomainRule,
                    text: WEEK_CONVENTION_RULE.to_string(),
                    meta: json!({ "seeded": true }),
                    dedupe_key: None,
                    importance: 0.6,
                    quality: 0.9,
                    expires_at: None,
                },
                &now_iso,
            )
            .await?;

        let planner = Arc::new(Planner::new(llm.clone(), registry.clone()));
        let executor = Arc::new(Executor::new(registry.clone(), store.clone()));

        Ok(Self {
            leverager: Leverager::new(store.clone()),
            manager: Manager::new(llm.clone()),
            presenter: DataPresenter::new(planner.clone(), executor.clone()),
            insight: InsightGenerator::new(planner, executor, llm),
            evaluator: Evaluator::new(registry),
            store,
        })
    }

    /// Execute one query end-to-end and record the run.
    pub async fn run_query(
        &self,
        query: &str,
        user_id: &str,
        config: &RunConfig,
        session: SessionState,
    ) -> Result<RunResult> {
        let clock = match config.today_override {
            Some(today) => Clock::fixed(today),
            None => Clock::system(),
        };
        let time_context = clock.time_context();
        let augmented_query = format!("{}\n[context] {}", query, time_context.summary());

        let scopes = vec![GLOBAL_SCOPE.to_string(), user_scope(user_id)];
        let reads_enabled = config.memory_mode.reads_enabled();
        let mut memory_injected: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut latencies = StageLatencies::default();

        // ManagerRoute
        let started = Instant::now();
        let manager_cards = self
            .retrieve_cards(reads_enabled, Stage::ManagerRoute, query, &scopes, &clock)
            .await;
        snapshot_cards(&mut memory_injected, Stage::ManagerRoute, &manager_cards);
        let decision = self.manager.route(query, &manager_cards).await;
        latencies.manager_route_ms = started.elapsed().as_millis() as i64;
        debug!(ood = decision.ood, reason = %decision.reason, "manager decision");

        // OOD | WorkerDispatch
        let outcome = if decision.ood {
            None
        } else {
            let route = decision.route.unwrap_or(Route::DataPresenter);
            let started = Instant::now();

            let plan_cards = self
                .retrieve_cards(reads_enabled, Stage::WorkflowPlan, query, &scopes, &clock)
                .await;
            snapshot_cards(&mut memory_injected, Stage::WorkflowPlan, &plan_cards);

            let insight_cards = if route == Route::InsightGenerator {
                let cards = self
                    .retrieve_cards(reads_enabled, Stage::InsightGenerate, query, &scopes, &clock)
                    .await;
                snapshot_cards(&mut memory_injected, Stage::InsightGenerate, &cards);
                cards
            } else {
                Vec::new()
            };

            let agent_input = AgentInput {
                route,
                query,
                augmented_query: &augmented_query,
                time_context: &time_context,
                session: session.clone(),
                plan_cards: &plan_cards,
                insight_cards: &insight_cards,
                cache_enabled: config.memory_mode.cache_enabled(),
                clock: &clock,
            };
            let outcome = match route {
                Route::DataPresenter => self.presenter.handle(agent_input).await?,
                Route::InsightGenerator => self.insight.handle(agent_input).await?,
            };
            latencies.worker_total_ms = started.elapsed().as_millis() as i64;
            Some((route, outcome))
        };

        let (route, plan, used_fallback, raw_plan_text, tool_calls, response, session_after) =
            match outcome {
                Some((route, AgentOutcome {
                    plan,
                    raw_plan_text,
                    used_fallback,
                    tool_calls,
                    response,
                    session,
                })) => (
                    Some(route),
                    Some(plan),
                    used_fallback,
                    raw_plan_text,
                    tool_calls,
                    redact(&response),
                    session,
                ),
                None => (
                    None,
                    None,
                    false,
                    None,
                    Vec::new(),
                    redact(OOD_RESPONSE),
                    session,
                ),
            };

        // Evaluate
        let started = Instant::now();
        let eval = self.evaluator.evaluate(query, clock.today(), &tool_calls);
        latencies.eval_ms = started.elapsed().as_millis() as i64;

        // MaybeWrite: best-effort, never fails the run
        if config.memory_mode.writes_enabled() {
            if let Some(report) = &eval {
                let writes = self.evaluator.propose_writes(
                    query,
                    user_id,
                    plan.as_ref(),
                    &tool_calls,
                    report,
                    &clock.now_iso(),
                );
                for write in writes {
                    if let Err(e) = self.store.memory().upsert(write, &clock.now_iso()).await {
                        warn!(error = %e, "memory write failed");
                    }
                }
            }
            match self.store.memory().maintenance(&clock.now_iso()).await {
                Ok(expired) if expired > 0 => debug!(expired, "memory maintenance"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "memory maintenance failed"),
            }
        }

        // Record
        let run = RunResult {
            id: Uuid::now_v7().to_string(),
            created_at: clock.now_iso(),
            user_id: user_id.to_string(),
            config: config.clone(),
            query: redact(query),
            augmented_query: redact(&augmented_query),
            route,
            ood: decision.ood,
            plan,
            used_fallback,
            raw_plan_text,
            tool_calls,
            response,
            eval,
            latencies,
            memory_injected,
            session_after,
        };
        self.store.runs().insert(&run).await?;

        info!(
            run_id = %run.id,
            ood = run.ood,
            tool_calls = run.tool_calls.len(),
            quality = run.eval.as_ref().map(|e| e.quality),
            "run recorded"
        );
        Ok(run)
    }

    /// Retrieval wrapper honoring the memory mode. Retrieval failures
    /// degrade to no cards rather than failing the run.
    async fn retrieve_cards(
        &self,
        reads_enabled: bool,
        stage: Stage,
        query: &str,
        scopes: &[String],
        clock: &Clock,
    ) -> Vec<MemoryCard> {
        if !reads_enabled {
            return Vec::new();
        }
        match self
            .leverager
            .retrieve(stage, query, scopes, &clock.now_iso())
            .await
        {
            Ok(cards) => cards,
            Err(e) => {
                warn!(stage = stage.as_str(), error = %e, "memory retrieval failed");
                Vec::new()
            }
        }
    }
}

fn snapshot_cards(
    injected: &mut BTreeMap<String, Vec<String>>,
    stage: Stage,
    cards: &[MemoryCard],
) {
    if !cards.is_empty() {
        injected.insert(
            stage.as_str().to_string(),
            cards.iter().map(|c| c.text.clone()).collect(),
        );
    }
}
