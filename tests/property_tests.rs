//! Property-based suites for the bug-prone leaves: signature canonical
//! form, the plan-candidate scanner, ranking monotonicity, and the p90
//! rank law.

use mnemo::db::{MemoryHit, MemoryItem, MemoryKind};
use mnemo::orchestrator::evaluator::canonicalize_query;
use mnemo::orchestrator::leverager::hybrid_score;
use mnemo::orchestrator::planner::{scan_json_candidates, strip_trailing_commas};
use mnemo::scenario::p90;
use mnemo::signature::{signature, stable_json};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn small_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(|n| json!(n)),
        any::<bool>().prop_map(|b| json!(b)),
        "[a-z{}\"'\\\\ ]{0,12}".prop_map(|s| json!(s)),
        Just(Value::Null),
    ]
}

fn flat_object() -> impl Strategy<Value = Value> {
    proptest::collection::btree_map("[a-z]{1,6}", small_value(), 0..6).prop_map(|entries| {
        let mut map = Map::new();
        for (k, v) in entries {
            map.insert(k, v);
        }
        Value::Object(map)
    })
}

proptest! {
    // Property 1: signatures ignore object key order.
    #[test]
    fn signature_invariant_under_key_reorder(obj in flat_object()) {
        let map = obj.as_object().unwrap();

        let mut reversed = Map::new();
        for (k, v) in map.iter().rev() {
            reversed.insert(k.clone(), v.clone());
        }
        let reordered = Value::Object(reversed);

        prop_assert_eq!(stable_json(&obj), stable_json(&reordered));
        prop_assert_eq!(
            signature(Some("tool_cache"), "top_products", &obj),
            signature(Some("tool_cache"), "top_products", &reordered)
        );
    }

    // stable_json output is itself valid JSON describing the same value.
    #[test]
    fn stable_json_round_trips(obj in flat_object()) {
        let parsed: Value = serde_json::from_str(&stable_json(&obj)).unwrap();
        prop_assert_eq!(parsed, obj);
    }

    // The scanner never panics on arbitrary brace/quote soup, and every
    // candidate it reports is brace-delimited.
    #[test]
    fn scanner_total_on_arbitrary_text(text in "[{}\"'\\\\a-z0-9:, ]{0,80}") {
        for candidate in scan_json_candidates(&text) {
            prop_assert!(candidate.starts_with('{'), "candidate must start with brace");
            prop_assert!(candidate.ends_with('}'), "candidate must end with brace");
        }
    }

    // A serialized object embedded in prose is recovered verbatim.
    #[test]
    fn scanner_recovers_embedded_object(obj in flat_object()) {
        let serialized = obj.to_string();
        let text = format!("Here is the plan. {} Good luck!", serialized);

        let candidates = scan_json_candidates(&text);
        prop_assert!(!candidates.is_empty());
        let parsed: Value = serde_json::from_str(candidates[0]).unwrap();
        prop_assert_eq!(parsed, obj);
    }

    // Stripping trailing commas from already-valid JSON changes nothing.
    #[test]
    fn strip_is_identity_on_valid_json(obj in flat_object()) {
        let serialized = obj.to_string();
        prop_assert_eq!(strip_trailing_commas(&serialized), serialized);
    }

    // The stripper never panics and never grows its input.
    #[test]
    fn strip_total_on_arbitrary_text(text in "[{}\\[\\],\"a-z0-9 ]{0,80}") {
        let out = strip_trailing_commas(&text);
        prop_assert!(out.len() <= text.len());
    }

    // Property 5: the hybrid score is monotone in each signal.
    #[test]
    fn ranking_monotonicity(
        fts_rank in 0.01f64..1.0,
        importance in 0.0f64..1.0,
        use_count in 0i64..100,
        bump in 0.01f64..0.5,
    ) {
        let hit = |fts: f64, imp: f64, used: i64| MemoryHit {
            item: MemoryItem {
                id: "m".to_string(),
                scope: "global".to_string(),
                kind: MemoryKind::QueryPattern,
                text: "t".to_string(),
                meta: Value::Null,
                dedupe_key: "d".to_string(),
                created_at: "2026-01-01T00:00:00.000Z".to_string(),
                last_used_at: None,
                use_count: used,
                importance: imp,
                quality: 0.5,
                expires_at: None,
            },
            bm25: 0.0,
            fts_rank: fts,
        };
        let now = "2026-02-04T00:00:00.000Z";

        let base = hybrid_score(&hit(fts_rank, importance, use_count), now);
        let better_fts = hybrid_score(&hit((fts_rank + bump).min(1.0), importance, use_count), now);
        let better_imp = hybrid_score(&hit(fts_rank, (importance + bump).min(1.0), use_count), now);
        let more_used = hybrid_score(&hit(fts_rank, importance, use_count + 10), now);

        prop_assert!(better_fts >= base);
        prop_assert!(better_imp >= base);
        prop_assert!(more_used >= base);
    }

    // Property 8: p90 matches the rank law against an oracle.
    #[test]
    fn p90_rank_law(latencies in proptest::collection::vec(0i64..10_000, 0..40)) {
        match p90(&latencies) {
            None => prop_assert!(latencies.is_empty()),
            Some(value) => {
                let mut sorted = latencies.clone();
                sorted.sort_unstable();
                let index = ((sorted.len() - 1) as f64 * 0.9).floor() as usize;
                prop_assert_eq!(value, sorted[index]);
            }
        }
    }

    // Canonicalized queries carry no raw digits.
    #[test]
    fn canonical_query_masks_digits(query in "[a-z0-9 \\-]{0,40}") {
        let canonical = canonicalize_query(&query);
        prop_assert!(!canonical.chars().any(|c| c.is_ascii_digit()));
    }
}
