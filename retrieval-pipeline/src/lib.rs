//! Hybrid Query Engine (C8, spec.md §4.8).
//!
//! Generalizes the teacher's `retrieval-pipeline/src/pipeline/mod.rs`
//! dispatch-then-fuse shape onto spec.md's four query modes. A [`Query`] is
//! planned, dispatched to one or two sub-operations under their own
//! sub-deadlines, fused through [`scoring`], and answered, degraded to a
//! partial result, or aborted — tracked the whole way by [`state::QueryMachine`].

pub mod config;
pub mod graph;
pub mod scoring;
pub mod state;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    cache::{fingerprint, Cache},
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::{Chunk, ChunkFilters},
            corpus::CorpusVersion,
            graph::GraphNode,
        },
    },
    utils::{config::ModeWeights, embedding::EmbeddingProvider},
};
use tracing::instrument;

pub use config::{QueryMode, RetrievalTuning};
use config::{ANCHOR_DEADLINE_FRACTION, CONCEPT_EXPANSION_HOPS, SUBOP_DEADLINE_FRACTION};
use scoring::{dedup_by_chunk_id_keep_max, graph_contribution_from_path, normalize_vector_score, provenance, sort_by_combined_desc, Scored, Scores};
use state::planned;

const SNIPPET_MAX_CHARS: usize = 240;

/// Filters a caller can narrow a query by (spec.md §4.4/§4.8).
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    pub sources: Vec<String>,
    pub frameworks: Vec<String>,
    pub topics: Vec<String>,
    pub min_quality: Option<f32>,
}

impl QueryFilters {
    fn to_chunk_filters(&self) -> ChunkFilters {
        ChunkFilters {
            sources: self.sources.clone(),
            frameworks: self.frameworks.clone(),
            topics: self.topics.clone(),
            min_quality: self.min_quality,
        }
    }

    fn with_extra_topics(&self, extra: &[String]) -> Self {
        let mut topics = self.topics.clone();
        for topic in extra {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }
        Self {
            sources: self.sources.clone(),
            frameworks: self.frameworks.clone(),
            topics,
            min_quality: self.min_quality,
        }
    }
}

/// A request to the hybrid query engine (spec.md §4.8, §6).
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub filters: QueryFilters,
    pub k: usize,
    pub mode: QueryMode,
    pub deadline_ms: u64,
}

/// One result row (spec.md §6's output shape).
#[derive(Debug, Clone)]
pub struct QueryResultItem {
    pub chunk_id: String,
    pub document_id: String,
    pub source_id: String,
    pub score: f32,
    pub provenance: Vec<(String, f32)>,
    pub snippet: String,
}

/// The engine's answer: a ranked, deduplicated item list plus the corpus
/// version it was computed against and whether any sub-operation degraded
/// (spec.md §6, §7).
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub items: Vec<QueryResultItem>,
    pub partial: bool,
    pub corpus_version: u64,
    pub from_cache: bool,
}

fn chunk_passes_filters(chunk: &Chunk, filters: &ChunkFilters) -> bool {
    if !filters.frameworks.is_empty() && !chunk.framework.as_ref().is_some_and(|f| filters.frameworks.contains(f)) {
        return false;
    }
    if !filters.topics.is_empty() && !chunk.topics.iter().any(|t| filters.topics.contains(t)) {
        return false;
    }
    if let Some(min_quality) = filters.min_quality {
        if chunk.quality_score < min_quality {
            return false;
        }
    }
    if !filters.sources.is_empty() && !filters.sources.contains(&chunk.source_id) {
        return false;
    }
    true
}

fn snippet_of(text: &str) -> String {
    if text.chars().count() <= SNIPPET_MAX_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(SNIPPET_MAX_CHARS).collect();
    format!("{truncated}\u{2026}")
}

fn to_result_item(scored: Scored<Chunk>) -> QueryResultItem {
    let entries = provenance(&scored.scores);
    QueryResultItem {
        chunk_id: scored.item.id.clone(),
        document_id: scored.item.document_id.clone(),
        source_id: scored.item.source_id.clone(),
        score: scored.combined,
        provenance: entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        snippet: snippet_of(&scored.item.text),
    }
}

/// Shrinks the remaining time to `overall_deadline` by `fraction`, so a
/// sub-operation never consumes the whole budget on its own (spec.md §4.8).
fn sub_deadline(overall_deadline: Instant, fraction: f32) -> Duration {
    let remaining = overall_deadline.saturating_duration_since(Instant::now());
    Duration::from_secs_f32(remaining.as_secs_f32() * fraction)
}

/// Dispatches, fuses, and caches queries against the combined vector/graph
/// store (spec.md §4.8).
pub struct HybridQueryEngine {
    db: SurrealDbClient,
    embedding: Arc<dyn EmbeddingProvider>,
    cache: Cache<QueryResult>,
    tuning: RetrievalTuning,
}

impl HybridQueryEngine {
    pub fn new(
        db: SurrealDbClient,
        embedding: Arc<dyn EmbeddingProvider>,
        tuning: RetrievalTuning,
        cache_capacity: usize,
    ) -> Self {
        Self {
            db,
            embedding,
            cache: Cache::new(cache_capacity),
            tuning,
        }
    }

    /// Runs one query end to end: validation, cache lookup, dispatch, fusion,
    /// and cache write-back (spec.md §4.8).
    #[instrument(skip(self, query), fields(mode = %query.mode, k = query.k))]
    pub async fn query(&self, query: Query) -> Result<QueryResult, AppError> {
        if query.deadline_ms == 0 {
            return Err(AppError::DeadlineExceeded);
        }
        if query.text.trim().is_empty() {
            return Err(AppError::InvalidQuery("query text must not be empty".to_string()));
        }

        let corpus_version = CorpusVersion::current(&self.db).await?;
        let key = fingerprint(
            corpus_version,
            "hybrid_search",
            &[
                ("text", query.text.as_str()),
                ("k", &query.k.to_string()),
                ("mode", &query.mode.to_string()),
                ("sources", &query.filters.sources.join(",")),
                ("frameworks", &query.filters.frameworks.join(",")),
                ("topics", &query.filters.topics.join(",")),
                ("min_quality", &query.filters.min_quality.map_or_else(String::new, |q| q.to_string())),
            ],
        );

        if let Some(mut cached) = self.cache.get(&key).await {
            cached.from_cache = true;
            return Ok(cached);
        }

        let machine = planned();
        let machine = machine.dispatch().map_err(|(_, g)| state_error("dispatch", &g))?;

        let overall_deadline = Instant::now() + Duration::from_millis(query.deadline_ms);
        let (mut candidates, degraded) = self.dispatch(&query, overall_deadline).await;

        let machine = machine.fuse().map_err(|(_, g)| state_error("fuse", &g))?;

        if candidates.is_empty() && degraded {
            let _ = machine.abort();
            return Err(AppError::DeadlineExceeded);
        }

        let deduped = {
            let mut deduped = dedup_by_chunk_id_keep_max(std::mem::take(&mut candidates));
            sort_by_combined_desc(&mut deduped);
            deduped.truncate(query.k);
            deduped
        };

        let result = QueryResult {
            items: deduped.into_iter().map(to_result_item).collect(),
            partial: degraded,
            corpus_version,
            from_cache: false,
        };

        if degraded {
            let _ = machine.degrade();
        } else {
            let _ = machine.answer();
            self.cache.put(key, result.clone(), self.tuning.cache_ttl).await;
        }

        Ok(result)
    }

    /// Runs the mode-specific sub-operations and returns the raw candidate
    /// set plus whether any sub-operation degraded (timed out or errored).
    async fn dispatch(&self, query: &Query, overall_deadline: Instant) -> (Vec<Scored<Chunk>>, bool) {
        let weights = self.tuning.weights_for(query.mode);
        let filters = query.filters.to_chunk_filters();
        let mut candidates = Vec::new();
        let mut degraded = false;

        match query.mode {
            QueryMode::SemanticOnly => {
                let deadline = sub_deadline(overall_deadline, SUBOP_DEADLINE_FRACTION);
                match self.run_semantic(&query.text, &filters, query.k, weights, deadline).await {
                    Some(mut v) => candidates.append(&mut v),
                    None => degraded = true,
                }
            }
            QueryMode::GraphOnly => {
                let deadline = sub_deadline(overall_deadline, SUBOP_DEADLINE_FRACTION);
                match self.run_graph(&query.text, &filters, query.k, weights, deadline).await {
                    Some(mut v) => candidates.append(&mut v),
                    None => degraded = true,
                }
            }
            QueryMode::HybridBalanced => {
                let deadline = sub_deadline(overall_deadline, SUBOP_DEADLINE_FRACTION);
                let (semantic, graph) = tokio::join!(
                    self.run_semantic(&query.text, &filters, query.k, weights, deadline),
                    self.run_graph(&query.text, &filters, query.k, weights, deadline),
                );
                match semantic {
                    Some(mut v) => candidates.append(&mut v),
                    None => degraded = true,
                }
                match graph {
                    Some(mut v) => candidates.append(&mut v),
                    None => degraded = true,
                }
            }
            QueryMode::ConceptExpansion => {
                let anchor_deadline = sub_deadline(overall_deadline, ANCHOR_DEADLINE_FRACTION);
                let sub_op_deadline = sub_deadline(overall_deadline, SUBOP_DEADLINE_FRACTION);

                let (graph_candidates, expanded_topics) = tokio::join!(
                    self.run_graph(&query.text, &filters, query.k, weights, sub_op_deadline),
                    self.expand_topics(&query.text, anchor_deadline),
                );
                match graph_candidates {
                    Some(mut v) => candidates.append(&mut v),
                    None => degraded = true,
                }

                let augmented = match expanded_topics {
                    Some(extra) => query.filters.with_extra_topics(&extra).to_chunk_filters(),
                    None => filters.clone(),
                };
                match self.run_semantic(&query.text, &augmented, query.k, weights, sub_op_deadline).await {
                    Some(mut v) => candidates.append(&mut v),
                    None => degraded = true,
                }
            }
        }

        (candidates, degraded)
    }

    async fn run_semantic(
        &self,
        text: &str,
        filters: &ChunkFilters,
        k: usize,
        weights: ModeWeights,
        deadline: Duration,
    ) -> Option<Vec<Scored<Chunk>>> {
        let threshold = self.tuning.vector_threshold;
        let texts = [text.to_string()];
        let fut = async {
            let embeddings = self.embedding.embed(&texts).await?;
            let embedding = embeddings
                .into_iter()
                .next()
                .ok_or_else(|| AppError::InternalError("embedding provider returned no vector".to_string()))?;
            let raw = Chunk::search(&self.db, &embedding, k, threshold, filters).await?;
            Ok::<_, AppError>(
                raw.into_iter()
                    .map(|r| {
                        let vector = normalize_vector_score(r.score, threshold);
                        let quality = r.chunk.quality_score;
                        Scored::new(r.chunk, Scores { vector: Some(vector), graph: None, quality: Some(quality) }, weights)
                    })
                    .collect::<Vec<_>>(),
            )
        };

        match tokio::time::timeout(deadline, fut).await {
            Ok(Ok(candidates)) => Some(candidates),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    async fn run_graph(
        &self,
        text: &str,
        filters: &ChunkFilters,
        k: usize,
        weights: ModeWeights,
        deadline: Duration,
    ) -> Option<Vec<Scored<Chunk>>> {
        let text = text.to_string();
        let fut = async {
            let anchors = graph::extract_anchors(&self.db, &text, self.tuning.anchor_limit).await?;
            if anchors.is_empty() {
                return Ok::<_, AppError>(Vec::new());
            }
            let anchor_ids: Vec<String> = anchors.iter().map(|n| GraphNode::composite_id(n.kind, &n.external_id)).collect();
            let by_document = graph::document_neighbors(&self.db, &anchor_ids, self.tuning.graph_traversal_depth).await?;

            let mut candidates = Vec::new();
            for (document_id, strength) in by_document {
                let chunks = Chunk::top_quality_for_document(&self.db, &document_id, k).await?;
                let contribution = graph_contribution_from_path(&[strength]);
                for chunk in chunks {
                    if !chunk_passes_filters(&chunk, filters) {
                        continue;
                    }
                    let quality = chunk.quality_score;
                    candidates.push(Scored::new(chunk, Scores { vector: None, graph: Some(contribution), quality: Some(quality) }, weights));
                }
            }
            Ok(candidates)
        };

        match tokio::time::timeout(deadline, fut).await {
            Ok(Ok(candidates)) => Some(candidates),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Walks one extra hop past the initial anchors to collect concept and
    /// framework names that augment the semantic re-search (spec.md §4.8
    /// `CONCEPT_EXPANSION`).
    async fn expand_topics(&self, text: &str, deadline: Duration) -> Option<Vec<String>> {
        let text = text.to_string();
        let fut = async {
            let anchors = graph::extract_anchors(&self.db, &text, self.tuning.anchor_limit).await?;
            if anchors.is_empty() {
                return Ok::<_, AppError>(Vec::new());
            }
            let anchor_ids: Vec<String> = anchors.iter().map(|n| GraphNode::composite_id(n.kind, &n.external_id)).collect();
            graph::expand_topics(&self.db, &anchor_ids, CONCEPT_EXPANSION_HOPS).await
        };

        match tokio::time::timeout(deadline, fut).await {
            Ok(Ok(topics)) => Some(topics),
            Ok(Err(_)) | Err(_) => None,
        }
    }
}

fn state_error(event: &str, guard: &state_machines::core::GuardError) -> AppError {
    AppError::InternalError(format!("invalid query transition during {event}: {guard:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::{
        graph::NodeKind,
        relationship::{Relationship, RelationshipKind},
    };
    use common::utils::embedding::FixedEmbeddingProvider;

    async fn seeded_db(namespace: &str) -> SurrealDbClient {
        let db = SurrealDbClient::memory("ns", namespace).await.unwrap();
        db.ensure_initialized().await.unwrap();
        db
    }

    fn engine(db: SurrealDbClient) -> HybridQueryEngine {
        HybridQueryEngine::new(db, Arc::new(FixedEmbeddingProvider::new(16)), RetrievalTuning::default(), 100)
    }

    fn base_query(text: &str, mode: QueryMode) -> Query {
        Query {
            text: text.to_string(),
            filters: QueryFilters::default(),
            k: 5,
            mode,
            deadline_ms: 2_000,
        }
    }

    async fn store_chunk(db: &SurrealDbClient, id: &str, document_id: &str, text: &str, quality: f32, embedding: Vec<f32>) {
        let chunk = Chunk::new(id.to_string(), document_id.to_string(), "src-a".to_string(), None, 0, text.to_string(), 20, vec![], quality);
        Chunk::store_with_embedding(chunk, embedding, "fixed-test", db).await.unwrap();
    }

    #[tokio::test]
    async fn empty_query_text_is_invalid() {
        let db = seeded_db("empty_text").await;
        let engine = engine(db);
        let err = engine.query(base_query("   ", QueryMode::SemanticOnly)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn zero_deadline_is_deadline_exceeded() {
        let db = seeded_db("zero_deadline").await;
        let engine = engine(db);
        let mut query = base_query("routing", QueryMode::SemanticOnly);
        query.deadline_ms = 0;
        let err = engine.query(query).await.unwrap_err();
        assert!(matches!(err, AppError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn semantic_only_returns_stored_chunks_ranked_by_score() {
        let db = seeded_db("semantic_search").await;
        let provider = FixedEmbeddingProvider::new(16);
        let embedding = provider.embed(&["routing guide".to_string()]).await.unwrap().remove(0);
        store_chunk(&db, "c1", "doc-1", "routing guide", 0.9, embedding.clone()).await;
        store_chunk(&db, "c2", "doc-1", "unrelated text about nothing", 0.1, vec![0.0; 16]).await;

        let engine = engine(db);
        let result = engine.query(base_query("routing guide", QueryMode::SemanticOnly)).await.unwrap();

        assert!(!result.partial);
        assert!(!result.items.is_empty());
        assert_eq!(result.items[0].chunk_id, "c1");
        assert!(result.items[0].provenance.iter().any(|(k, _)| k == "vector"));
    }

    #[tokio::test]
    async fn repeat_query_is_served_from_cache() {
        let db = seeded_db("cache_hit").await;
        let provider = FixedEmbeddingProvider::new(16);
        let embedding = provider.embed(&["routing guide".to_string()]).await.unwrap().remove(0);
        store_chunk(&db, "c1", "doc-1", "routing guide", 0.9, embedding).await;

        let engine = engine(db);
        let query = base_query("routing guide", QueryMode::SemanticOnly);
        let first = engine.query(query.clone()).await.unwrap();
        assert!(!first.from_cache);

        let second = engine.query(query).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.items.len(), first.items.len());
    }

    #[tokio::test]
    async fn graph_only_finds_chunks_through_an_anchor() {
        let db = seeded_db("graph_only").await;
        GraphNode::new(NodeKind::Framework, "axum".into(), "Axum".into(), "Rust web framework".into(), None, None)
            .upsert_node(&db)
            .await
            .unwrap();
        let framework_id = GraphNode::composite_id(NodeKind::Framework, "axum");
        let document_id = GraphNode::composite_id(NodeKind::Document, "doc-1");
        Relationship::upsert_edge(&db, RelationshipKind::Documents, &framework_id, &document_id, Some("axum".into()), 0.9, 1)
            .await
            .unwrap();
        store_chunk(&db, "c1", "doc-1", "axum routing chunk", 0.7, vec![0.0; 16]).await;

        let engine = engine(db);
        let result = engine.query(base_query("axum", QueryMode::GraphOnly)).await.unwrap();

        assert!(!result.partial);
        assert_eq!(result.items.len(), 1);
        assert!(result.items[0].provenance.iter().any(|(k, _)| k == "graph"));
    }

    #[tokio::test]
    async fn dedup_prefers_the_higher_combined_candidate() {
        let db = seeded_db("hybrid_dedup").await;
        GraphNode::new(NodeKind::Framework, "axum".into(), "Axum".into(), "Rust web framework".into(), None, None)
            .upsert_node(&db)
            .await
            .unwrap();
        let framework_id = GraphNode::composite_id(NodeKind::Framework, "axum");
        let document_id = GraphNode::composite_id(NodeKind::Document, "doc-1");
        Relationship::upsert_edge(&db, RelationshipKind::Documents, &framework_id, &document_id, Some("axum".into()), 0.9, 1)
            .await
            .unwrap();

        let provider = FixedEmbeddingProvider::new(16);
        let embedding = provider.embed(&["axum routing".to_string()]).await.unwrap().remove(0);
        store_chunk(&db, "c1", "doc-1", "axum routing", 0.9, embedding).await;

        let engine = engine(db);
        let result = engine.query(base_query("axum routing", QueryMode::HybridBalanced)).await.unwrap();

        let matches: Vec<_> = result.items.iter().filter(|i| i.chunk_id == "c1").collect();
        assert_eq!(matches.len(), 1, "the same chunk found by both sub-operations must appear once");
    }
}
