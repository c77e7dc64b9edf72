//! Query mode and tuning knobs (spec.md §4.8). The teacher's
//! `retrieval-pipeline/src/pipeline/config.rs` defined its own
//! `RetrievalStrategy`/`RetrievalTuning` pair read out of a crate-local
//! struct; this crate instead builds `RetrievalTuning` from
//! [`common::utils::config::RetrievalConfig`] (the already-established
//! config-loading boundary for C8), so there is exactly one place tuning
//! values are parsed.

use std::{collections::HashMap, fmt, str::FromStr, time::Duration};

use common::utils::config::{ModeWeights, RetrievalConfig};

/// The four retrieval strategies spec.md §4.8 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryMode {
    SemanticOnly,
    GraphOnly,
    HybridBalanced,
    ConceptExpansion,
}

impl QueryMode {
    pub const ALL: [Self; 4] = [Self::SemanticOnly, Self::GraphOnly, Self::HybridBalanced, Self::ConceptExpansion];

    const fn as_str(self) -> &'static str {
        match self {
            Self::SemanticOnly => "SEMANTIC_ONLY",
            Self::GraphOnly => "GRAPH_ONLY",
            Self::HybridBalanced => "HYBRID_BALANCED",
            Self::ConceptExpansion => "CONCEPT_EXPANSION",
        }
    }

    /// Built-in fusion weights, mirroring
    /// `common::utils::config::default_mode_weights` — used when a deployed
    /// `RetrievalConfig` doesn't name this mode.
    const fn default_weights(self) -> ModeWeights {
        match self {
            Self::SemanticOnly => ModeWeights { vector: 0.8, graph: 0.0, quality: 0.2 },
            Self::GraphOnly => ModeWeights { vector: 0.0, graph: 0.8, quality: 0.2 },
            Self::HybridBalanced => ModeWeights { vector: 0.5, graph: 0.35, quality: 0.15 },
            Self::ConceptExpansion => ModeWeights { vector: 0.45, graph: 0.4, quality: 0.15 },
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SEMANTIC_ONLY" => Ok(Self::SemanticOnly),
            "GRAPH_ONLY" => Ok(Self::GraphOnly),
            "HYBRID_BALANCED" => Ok(Self::HybridBalanced),
            "CONCEPT_EXPANSION" => Ok(Self::ConceptExpansion),
            other => Err(format!("unrecognized query mode '{other}'")),
        }
    }
}

/// Fraction of the overall deadline handed to anchor-entity extraction
/// before graph traversal can start (spec.md §4.8: sub-deadlines are
/// "derived from the overall deadline by a static per-mode weight").
pub(crate) const ANCHOR_DEADLINE_FRACTION: f32 = 0.3;
/// Fraction of the overall deadline handed to the vector search and to the
/// graph-neighbor expansion, each running under its own timeout.
pub(crate) const SUBOP_DEADLINE_FRACTION: f32 = 0.9;
/// `CONCEPT_EXPANSION` walks exactly one extra hop past the initial anchors
/// before repeating semantic search (spec.md §4.8).
pub(crate) const CONCEPT_EXPANSION_HOPS: u32 = 1;

/// Resolved tuning for the query engine, parsed once from
/// [`RetrievalConfig`] at construction.
#[derive(Debug, Clone)]
pub struct RetrievalTuning {
    pub default_k: usize,
    pub vector_threshold: f32,
    pub default_deadline_ms: u64,
    pub graph_traversal_depth: u32,
    pub anchor_limit: usize,
    pub cache_ttl: Duration,
    pub mode_weights: HashMap<QueryMode, ModeWeights>,
}

impl RetrievalTuning {
    pub fn from_app_config(cfg: &RetrievalConfig, cache_ttl: Duration) -> Self {
        let mut mode_weights = HashMap::with_capacity(QueryMode::ALL.len());
        for mode in QueryMode::ALL {
            let weights = cfg
                .mode_weights
                .get(mode.as_str())
                .copied()
                .unwrap_or_else(|| mode.default_weights());
            mode_weights.insert(mode, weights);
        }

        Self {
            default_k: cfg.default_k,
            vector_threshold: cfg.vector_threshold,
            default_deadline_ms: cfg.default_deadline_ms,
            graph_traversal_depth: cfg.graph_traversal_depth,
            anchor_limit: 8,
            cache_ttl,
            mode_weights,
        }
    }

    pub fn weights_for(&self, mode: QueryMode) -> ModeWeights {
        self.mode_weights.get(&mode).copied().unwrap_or_else(|| mode.default_weights())
    }
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self::from_app_config(&RetrievalConfig::default(), Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_display_and_from_str() {
        for mode in QueryMode::ALL {
            assert_eq!(mode.to_string().parse::<QueryMode>().unwrap(), mode);
        }
    }

    #[test]
    fn tuning_falls_back_to_built_in_weights_when_config_omits_a_mode() {
        let mut cfg = RetrievalConfig::default();
        cfg.mode_weights.clear();
        let tuning = RetrievalTuning::from_app_config(&cfg, Duration::from_secs(60));
        let weights = tuning.weights_for(QueryMode::HybridBalanced);
        assert!((weights.vector + weights.graph + weights.quality - 1.0).abs() < 1e-6);
    }
}
