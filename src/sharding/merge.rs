//! Fan-out result merging
//!
//! Shared by the shard router and partitioned index search: partial ranked
//! lists are combined, ordered by descending score with ties broken by
//! ascending id, and truncated.

use std::cmp::Ordering;

use crate::domain::types::SearchHit;

/// Something that can be ranked in a merged answer.
pub trait Ranked {
    fn rank_id(&self) -> &str;
    fn rank_score(&self) -> f32;
}

impl Ranked for SearchHit {
    fn rank_id(&self) -> &str {
        &self.entity_id
    }

    fn rank_score(&self) -> f32 {
        self.score
    }
}

impl Ranked for (String, f32) {
    fn rank_id(&self) -> &str {
        &self.0
    }

    fn rank_score(&self) -> f32 {
        self.1
    }
}

/// Score descending, then id ascending.
pub fn compare_ranked<T: Ranked>(a: &T, b: &T) -> Ordering {
    b.rank_score()
        .total_cmp(&a.rank_score())
        .then_with(|| a.rank_id().cmp(b.rank_id()))
}

/// Output of [`merge_ranked`]
#[derive(Debug, Clone, PartialEq)]
pub struct Merged<T> {
    /// Top results, best first
    pub items: Vec<T>,
    /// Sum of the input list lengths
    pub candidates: usize,
}

/// Merge partial lists and keep the best `k`.
pub fn merge_ranked<T: Ranked>(lists: Vec<Vec<T>>, k: usize) -> Merged<T> {
    let candidates = lists.iter().map(Vec::len).sum();
    let mut items: Vec<T> = lists.into_iter().flatten().collect();
    items.sort_by(compare_ranked);
    items.truncate(k);
    Merged { items, candidates }
}

/// Per-shard request size for a merged answer of `top_k`.
pub fn over_fetch_limit(top_k: usize, factor: f64) -> usize {
    let scaled = (top_k as f64 * factor.max(1.0)).ceil();
    (scaled as usize).max(top_k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(id: &str, score: f32) -> (String, f32) {
        (id.to_string(), score)
    }

    #[test]
    fn test_merge_orders_and_truncates() {
        let merged = merge_ranked(
            vec![
                vec![pair("b", 0.9), pair("d", 0.2)],
                vec![],
                vec![pair("a", 0.9), pair("c", 0.5)],
            ],
            3,
        );
        assert_eq!(merged.candidates, 4);
        let ids: Vec<&str> = merged.items.iter().map(|p| p.0.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_empty() {
        let merged: Merged<(String, f32)> = merge_ranked(vec![vec![], vec![]], 5);
        assert!(merged.items.is_empty());
        assert_eq!(merged.candidates, 0);
    }

    #[test]
    fn test_over_fetch_limit() {
        assert_eq!(over_fetch_limit(10, 2.0), 20);
        assert_eq!(over_fetch_limit(3, 1.5), 5);
        assert_eq!(over_fetch_limit(4, 0.5), 4);
        assert_eq!(over_fetch_limit(0, 2.0), 0);
    }
}
