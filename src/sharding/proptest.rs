//! Property-Based Tests for Routing and Merging
//!
//! # Test Properties
//!
//! 1. **Routing Range**: every id lands in `[0, shard_count)`
//! 2. **Routing Determinism**: the same id always lands on the same shard
//! 3. **Merge Ordering**: output is sorted by score desc, id asc, and at most k long
//! 4. **Merge Optimality**: no dropped candidate outranks a returned one

#![cfg(test)]

use std::cmp::Ordering;

use proptest::prelude::*;

use super::merge::{compare_ranked, merge_ranked, over_fetch_limit};
use super::router::route_entity;

// =============================================================================
// Property Strategies
// =============================================================================

fn id_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9_-]{1,24}"
}

/// Per-shard lists, each already sorted the way a backend returns them.
fn shard_lists_strategy() -> impl Strategy<Value = Vec<Vec<(String, f32)>>> {
    prop::collection::vec(
        prop::collection::vec((id_strategy(), -1.0f32..=1.0), 0..20),
        1..6,
    )
    .prop_map(|lists| {
        lists
            .into_iter()
            .map(|mut list| {
                list.sort_by(compare_ranked);
                list
            })
            .collect()
    })
}

// =============================================================================
// Routing Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_route_in_range(id in id_strategy(), shards in 1usize..64) {
        prop_assert!(route_entity(&id, shards) < shards);
    }

    #[test]
    fn prop_route_deterministic(id in id_strategy(), shards in 1usize..64) {
        prop_assert_eq!(route_entity(&id, shards), route_entity(&id.clone(), shards));
    }

    #[test]
    fn prop_over_fetch_covers_top_k(top_k in 0usize..1000, factor in 0.0f64..8.0) {
        prop_assert!(over_fetch_limit(top_k, factor) >= top_k);
    }
}

// =============================================================================
// Merge Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_merge_sorted_and_bounded(lists in shard_lists_strategy(), k in 0usize..30) {
        let total: usize = lists.iter().map(Vec::len).sum();
        let merged = merge_ranked(lists, k);

        prop_assert_eq!(merged.candidates, total);
        prop_assert_eq!(merged.items.len(), k.min(total));
        for pair in merged.items.windows(2) {
            prop_assert_ne!(compare_ranked(&pair[0], &pair[1]), Ordering::Greater);
        }
    }

    #[test]
    fn prop_merge_keeps_best(lists in shard_lists_strategy(), k in 1usize..30) {
        let mut all: Vec<(String, f32)> = lists.iter().flatten().cloned().collect();
        all.sort_by(compare_ranked);
        let merged = merge_ranked(lists, k);

        if let Some(worst_kept) = merged.items.last() {
            for dropped in all.iter().skip(merged.items.len()) {
                prop_assert_ne!(compare_ranked(dropped, worst_kept), Ordering::Less);
            }
        }
    }
}
