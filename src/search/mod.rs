//! BM25 keyword search, vector search, and their hybrid fusion.
//!
//! Each is a standalone operation over the `Store`; `hybrid` composes
//! the other two rather than duplicating their query logic.

pub mod bm25;
pub mod hybrid;
pub mod vector;

use serde::Serialize;

/// A single ranked chunk, already joined back to its owning document.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub docid: String,
    pub uri: String,
    pub title: Option<String>,
    pub collection: String,
    pub mirror_hash: String,
    pub seq: i64,
    pub score: f32,
    pub snippet: String,
    pub start_line: i64,
    pub end_line: i64,
}

/// Filters shared by every search mode.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub collection: Option<String>,
    pub tags_all: Vec<String>,
    pub tags_any: Vec<String>,
}

/// Clamps a requested result count to the `[1, 100]` range every mode
/// honors, so a caller-supplied `0` or a runaway `limit` can't turn a
/// search into an unbounded table scan.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, 100)
}

/// Min-max normalizes `scores` into `[0.0, 1.0]`. When every score is
/// equal (including the single-element and empty cases), each one
/// normalizes to `1.0` rather than dividing by a zero range.
pub fn normalize_scores(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if (max - min).abs() < f32::EPSILON {
        return scores.iter().map(|_| 1.0).collect();
    }
    scores.iter().map(|&s| (s - min) / (max - min)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_limit_bounds_both_ends() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(5), 5);
        assert_eq!(clamp_limit(500), 100);
    }

    #[test]
    fn normalize_empty_is_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn normalize_single_is_one() {
        assert_eq!(normalize_scores(&[4.2]), vec![1.0]);
    }

    #[test]
    fn normalize_spans_full_range() {
        let out = normalize_scores(&[1.0, 2.0, 3.0]);
        assert_eq!(out, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn normalize_all_equal_is_one() {
        let out = normalize_scores(&[2.0, 2.0, 2.0]);
        assert_eq!(out, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn normalize_scores_always_in_unit_range() {
        let out = normalize_scores(&[-5.0, 0.0, 3.0, 100.0]);
        for s in out {
            assert!((0.0..=1.0).contains(&s));
        }
    }
}
