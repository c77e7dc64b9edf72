//! Fusion math (spec.md §4.8). Grounded in the teacher's
//! `retrieval-pipeline/src/scoring.rs` (`Scores`/`Scored<T>`/`clamp_unit`
//! vocabulary and `merge_scored_by_id`/`sort_by_fused_desc` shape), with the
//! teacher's multi-signal "golden chunk" bonus dropped — spec.md's fusion
//! formula is a plain weighted sum of three normalized signals, no bonus
//! term — and the tie-break extended from the teacher's two-way
//! `(fused desc, id asc)` to spec.md's three-way
//! `(combined desc, quality desc, id asc)`.

use std::collections::HashMap;

use common::{storage::types::chunk::Chunk, utils::config::ModeWeights};

/// The three signals spec.md §4.8 fuses: `None` means that signal's
/// sub-operation never ran (e.g. no graph search in `SEMANTIC_ONLY`), as
/// opposed to `Some(0.0)` meaning it ran and found nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Scores {
    pub vector: Option<f32>,
    pub graph: Option<f32>,
    pub quality: Option<f32>,
}

pub fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// `(score - threshold) / (1 - threshold)`, clamped to `[0, 1]` (spec.md
/// §4.8's exact vector normalization). A threshold of `1.0` can't produce a
/// meaningful denominator; that case normalizes to `0`.
pub fn normalize_vector_score(raw_score: f32, threshold: f32) -> f32 {
    let denom = 1.0 - threshold;
    if denom <= f32::EPSILON {
        return 0.0;
    }
    clamp_unit((raw_score - threshold) / denom)
}

/// Sum of edge strengths along a path to the nearest anchor, capped at 1
/// (spec.md §4.8: "graph contribution ... capped at 1").
pub fn graph_contribution_from_path(strengths: &[f32]) -> f32 {
    strengths.iter().sum::<f32>().min(1.0)
}

/// One scored candidate plus the raw per-signal scores it was fused from,
/// kept around for the result item's provenance (spec.md §6).
#[derive(Debug, Clone)]
pub struct Scored<T> {
    pub item: T,
    pub scores: Scores,
    pub combined: f32,
}

impl<T> Scored<T> {
    pub fn new(item: T, scores: Scores, weights: ModeWeights) -> Self {
        let combined = fuse(&scores, weights);
        Self { item, scores, combined }
    }
}

/// `combined = w_v * vector + w_g * graph + w_q * quality` (spec.md §4.8).
/// A signal that never ran contributes `0`, same as the weight being `0` for
/// a mode that doesn't use it.
pub fn fuse(scores: &Scores, weights: ModeWeights) -> f32 {
    let vector = scores.vector.unwrap_or(0.0);
    let graph = scores.graph.unwrap_or(0.0);
    let quality = scores.quality.unwrap_or(0.0);
    clamp_unit(weights.vector * vector + weights.graph * graph + weights.quality * quality)
}

/// Provenance entries for a result item: which sub-operations contributed a
/// non-`None` signal, and their raw (pre-fusion) score.
pub fn provenance(scores: &Scores) -> Vec<(&'static str, f32)> {
    let mut entries = Vec::with_capacity(3);
    if let Some(v) = scores.vector {
        entries.push(("vector", v));
    }
    if let Some(g) = scores.graph {
        entries.push(("graph", g));
    }
    if let Some(q) = scores.quality {
        entries.push(("quality", q));
    }
    entries
}

/// Deduplicates by chunk id, keeping the higher-`combined` candidate when
/// the same chunk is reached by more than one sub-operation (spec.md §4.8:
/// "dedup by chunk id, keeping the max combined score").
pub fn dedup_by_chunk_id_keep_max(candidates: Vec<Scored<Chunk>>) -> Vec<Scored<Chunk>> {
    let mut by_id: HashMap<String, Scored<Chunk>> = HashMap::with_capacity(candidates.len());
    for candidate in candidates {
        by_id
            .entry(candidate.item.id.clone())
            .and_modify(|existing| {
                if candidate.combined > existing.combined {
                    *existing = candidate.clone();
                }
            })
            .or_insert(candidate);
    }
    by_id.into_values().collect()
}

/// Three-way tie-break: `(combined desc, chunk quality desc, chunk id asc)`
/// (spec.md §4.8), so the ordering is deterministic even when two chunks
/// fuse to the same score.
pub fn sort_by_combined_desc(items: &mut [Scored<Chunk>]) {
    items.sort_by(|a, b| {
        b.combined
            .partial_cmp(&a.combined)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.item
                    .quality_score
                    .partial_cmp(&a.item.quality_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> ModeWeights {
        ModeWeights {
            vector: 0.5,
            graph: 0.35,
            quality: 0.15,
        }
    }

    fn chunk(id: &str, quality: f32) -> Chunk {
        Chunk::new(
            id.to_string(),
            "doc-1".to_string(),
            "src-a".to_string(),
            None,
            0,
            "text".to_string(),
            10,
            vec![],
            quality,
        )
    }

    #[test]
    fn normalize_vector_score_maps_threshold_to_zero_and_one_to_one() {
        assert_eq!(normalize_vector_score(0.2, 0.2), 0.0);
        assert!((normalize_vector_score(1.0, 0.2) - 1.0).abs() < 1e-6);
        assert_eq!(normalize_vector_score(0.0, 0.2), 0.0, "below threshold clamps to 0");
    }

    #[test]
    fn graph_contribution_caps_at_one() {
        assert_eq!(graph_contribution_from_path(&[0.6, 0.6, 0.6]), 1.0);
        assert!((graph_contribution_from_path(&[0.3, 0.3]) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn fuse_is_plain_weighted_sum_with_no_bonus() {
        let scores = Scores {
            vector: Some(0.8),
            graph: Some(0.4),
            quality: Some(0.9),
        };
        let expected = 0.5 * 0.8 + 0.35 * 0.4 + 0.15 * 0.9;
        assert!((fuse(&scores, weights()) - expected).abs() < 1e-6);
    }

    #[test]
    fn missing_signal_contributes_zero() {
        let scores = Scores {
            vector: Some(0.8),
            graph: None,
            quality: Some(0.9),
        };
        let expected = 0.5 * 0.8 + 0.15 * 0.9;
        assert!((fuse(&scores, weights()) - expected).abs() < 1e-6);
    }

    #[test]
    fn dedup_keeps_the_higher_combined_candidate() {
        let weak = Scored::new(chunk("c1", 0.5), Scores { vector: Some(0.3), ..Default::default() }, weights());
        let strong = Scored::new(chunk("c1", 0.5), Scores { vector: Some(0.9), ..Default::default() }, weights());
        let deduped = dedup_by_chunk_id_keep_max(vec![weak, strong.clone()]);
        assert_eq!(deduped.len(), 1);
        assert!((deduped[0].combined - strong.combined).abs() < 1e-6);
    }

    #[test]
    fn tie_break_falls_back_to_quality_then_id() {
        let a = Scored::new(chunk("b", 0.4), Scores { quality: Some(0.4), ..Default::default() }, weights());
        let b = Scored::new(chunk("a", 0.9), Scores { quality: Some(0.9), ..Default::default() }, weights());
        let c = Scored::new(chunk("z", 0.9), Scores { quality: Some(0.9), ..Default::default() }, weights());
        // Force an explicit combined-score tie so only quality/id break it.
        let mut items = vec![
            Scored { combined: 0.5, ..a },
            Scored { combined: 0.5, ..b },
            Scored { combined: 0.5, ..c },
        ];
        sort_by_combined_desc(&mut items);
        assert_eq!(items[0].item.id, "a");
        assert_eq!(items[1].item.id, "z");
        assert_eq!(items[2].item.id, "b");
    }
}
