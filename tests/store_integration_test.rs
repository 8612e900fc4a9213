//! Integration tests for the state store: dedupe upsert, FTS search with
//! TTL expiry, usage counters, stats, and the tool cache.

use mnemo::db::{
    user_scope, MemoryKind, MemorySearch, MemoryUpsert, StateStore, GLOBAL_SCOPE,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const NOW: &str = "2026-02-04T10:00:00.000Z";
const LATER: &str = "2026-02-04T11:00:00.000Z";

async fn store() -> (TempDir, Arc<StateStore>) {
    let temp_dir = TempDir::new().unwrap();
    let store = StateStore::open(&temp_dir.path().join("state.db"))
        .await
        .unwrap();
    (temp_dir, Arc::new(store))
}

fn upsert_input(scope: &str, kind: MemoryKind, text: &str) -> MemoryUpsert {
    MemoryUpsert {
        scope: scope.to_string(),
        kind,
        text: text.to_string(),
        meta: json!({}),
        dedupe_key: None,
        importance: 0.5,
        quality: 0.5,
        expires_at: None,
    }
}

#[tokio::test]
async fn test_upsert_dedupes_equivalent_text() {
    let (_tmp, store) = store().await;
    let memory = store.memory();

    let first = memory
        .upsert(
            upsert_input(GLOBAL_SCOPE, MemoryKind::DomainRule, "Top 10 Products last month"),
            NOW,
        )
        .await
        .unwrap();

    // Same text up to case and whitespace collapses onto the same row
    let second = memory
        .upsert(
            upsert_input(GLOBAL_SCOPE, MemoryKind::DomainRule, "top  10 products LAST month"),
            LATER,
        )
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.use_count, 1);
    assert_eq!(second.last_used_at.as_deref(), Some(LATER));

    let stats = memory.stats().await.unwrap();
    let rule_count: i64 = stats
        .iter()
        .filter(|s| s.scope == GLOBAL_SCOPE && s.kind == "domain_rule")
        .map(|s| s.count)
        .sum();
    assert_eq!(rule_count, 1);
}

#[tokio::test]
async fn test_upsert_distinct_per_scope_and_kind() {
    let (_tmp, store) = store().await;
    let memory = store.memory();

    memory
        .upsert(upsert_input(GLOBAL_SCOPE, MemoryKind::DomainRule, "same text"), NOW)
        .await
        .unwrap();
    memory
        .upsert(
            upsert_input(&user_scope("demo"), MemoryKind::DomainRule, "same text"),
            NOW,
        )
        .await
        .unwrap();
    memory
        .upsert(upsert_input(GLOBAL_SCOPE, MemoryKind::QueryPattern, "same text"), NOW)
        .await
        .unwrap();

    let stats = memory.stats().await.unwrap();
    let total: i64 = stats.iter().map(|s| s.count).sum();
    assert_eq!(total, 3);
}

#[tokio::test]
async fn test_upsert_redacts_pii() {
    let (_tmp, store) = store().await;
    let item = store
        .memory()
        .upsert(
            upsert_input(
                GLOBAL_SCOPE,
                MemoryKind::UserPreference,
                "prefers replies to seller@example.com about sales",
            ),
            NOW,
        )
        .await
        .unwrap();

    assert!(item.text.contains("[REDACTED_EMAIL]"));
    assert!(!item.text.contains("seller@example.com"));
}

#[tokio::test]
async fn test_search_filters_by_scope_and_kind() {
    let (_tmp, store) = store().await;
    let memory = store.memory();

    memory
        .upsert(
            upsert_input(GLOBAL_SCOPE, MemoryKind::DomainRule, "sales are net of refunds"),
            NOW,
        )
        .await
        .unwrap();
    memory
        .upsert(
            upsert_input(&user_scope("other"), MemoryKind::DomainRule, "sales spike in december"),
            NOW,
        )
        .await
        .unwrap();
    memory
        .upsert(
            upsert_input(GLOBAL_SCOPE, MemoryKind::FailureCase, "sales query went wrong"),
            NOW,
        )
        .await
        .unwrap();

    let scopes = vec![GLOBAL_SCOPE.to_string()];
    let hits = memory
        .search(MemorySearch {
            query: "sales",
            scopes: &scopes,
            kinds: Some(&[MemoryKind::DomainRule]),
            limit: 10,
            now_iso: NOW,
        })
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].item.scope, GLOBAL_SCOPE);
    assert_eq!(hits[0].item.kind, MemoryKind::DomainRule);
    assert!(hits[0].fts_rank > 0.0 && hits[0].fts_rank <= 1.0);
}

#[tokio::test]
async fn test_expired_items_never_surface() {
    let (_tmp, store) = store().await;
    let memory = store.memory();

    let mut expiring = upsert_input(GLOBAL_SCOPE, MemoryKind::DomainRule, "ephemeral sales rule");
    expiring.expires_at = Some("2026-02-04T10:30:00.000Z".to_string());
    memory.upsert(expiring, NOW).await.unwrap();

    let scopes = vec![GLOBAL_SCOPE.to_string()];

    // Alive before the deadline
    let hits = memory
        .search(MemorySearch {
            query: "sales",
            scopes: &scopes,
            kinds: None,
            limit: 10,
            now_iso: NOW,
        })
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    // Invisible after it, even before maintenance runs
    let hits = memory
        .search(MemorySearch {
            query: "sales",
            scopes: &scopes,
            kinds: None,
            limit: 10,
            now_iso: LATER,
        })
        .await
        .unwrap();
    assert!(hits.is_empty());

    // Maintenance physically removes it
    let expired = memory.maintenance(LATER).await.unwrap();
    assert_eq!(expired, 1);

    let stats = memory.stats().await.unwrap();
    assert!(stats.is_empty());
}

#[tokio::test]
async fn test_mark_used_bumps_counters_once_per_id() {
    let (_tmp, store) = store().await;
    let memory = store.memory();

    let item = memory
        .upsert(upsert_input(GLOBAL_SCOPE, MemoryKind::QueryPattern, "traffic question"), NOW)
        .await
        .unwrap();

    // Duplicate ids collapse to one bump
    memory
        .mark_used(&[item.id.clone(), item.id.clone()], LATER)
        .await
        .unwrap();

    let scopes = vec![GLOBAL_SCOPE.to_string()];
    let hits = memory
        .search(MemorySearch {
            query: "traffic",
            scopes: &scopes,
            kinds: None,
            limit: 10,
            now_iso: LATER,
        })
        .await
        .unwrap();

    assert_eq!(hits[0].item.use_count, 1);
    assert_eq!(hits[0].item.last_used_at.as_deref(), Some(LATER));
}

#[tokio::test]
async fn test_search_limit_clamped_to_fifty() {
    let (_tmp, store) = store().await;
    let memory = store.memory();

    for i in 0..60 {
        memory
            .upsert(
                upsert_input(
                    GLOBAL_SCOPE,
                    MemoryKind::QueryPattern,
                    &format!("sales observation number {}", i),
                ),
                NOW,
            )
            .await
            .unwrap();
    }

    let scopes = vec![GLOBAL_SCOPE.to_string()];
    let hits = memory
        .search(MemorySearch {
            query: "sales",
            scopes: &scopes,
            kinds: None,
            limit: 500,
            now_iso: NOW,
        })
        .await
        .unwrap();

    assert_eq!(hits.len(), 50);
}

#[tokio::test]
async fn test_tool_cache_round_trip() {
    let (_tmp, store) = store().await;
    let cache = store.tool_cache();

    let args = json!({"metric": "sales", "limit": 10});
    let result = json!({"rows": [{"productId": 1, "metricValue": 99.5}]});

    assert!(cache.get("top_products:abc").await.unwrap().is_none());

    cache
        .set("top_products", "top_products:abc", &args, &result, NOW)
        .await
        .unwrap();

    let hit = cache.get("top_products:abc").await.unwrap().unwrap();
    assert_eq!(hit.created_at, NOW);
    assert_eq!(hit.result, result);
}

#[tokio::test]
async fn test_tool_cache_upsert_overwrites() {
    let (_tmp, store) = store().await;
    let cache = store.tool_cache();

    let args = json!({"limit": 5});
    cache
        .set("list_products", "list_products:x", &args, &json!({"products": []}), NOW)
        .await
        .unwrap();
    cache
        .set(
            "list_products",
            "list_products:x",
            &args,
            &json!({"products": [{"id": 1}]}),
            LATER,
        )
        .await
        .unwrap();

    let hit = cache.get("list_products:x").await.unwrap().unwrap();
    assert_eq!(hit.created_at, LATER);
    assert_eq!(hit.result["products"].as_array().unwrap().len(), 1);
}
