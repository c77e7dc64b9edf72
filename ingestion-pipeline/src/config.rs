//! Recognized-option tuning for the ingestion orchestrator (spec.md §9's
//! "replace string-indexed configuration"). Grounded in the teacher's
//! `ingestion-pipeline/src/pipeline/config.rs` (`IngestionConfig` /
//! `IngestionTuning` retry-backoff knobs), retargeted from LLM-enrichment
//! toggles onto the crawl/chunk/embed/commit knobs spec.md §4.7 and §5 name.

/// Tuning knobs for retries and concurrency (spec.md §4.7's "bounded
/// exponential backoff" and §5's "bounded queues between C6→C5, C5→C1,
/// C1→C3/C4").
#[derive(Clone, Debug)]
pub struct IngestionTuning {
    /// Max attempts for a retryable store/embed call before the document is
    /// marked failed (spec.md §4.7: "Retries ... up to a bounded count").
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// How many documents are chunked/embedded/committed concurrently
    /// across one crawl run (spec.md §5's bounded-queue backpressure,
    /// modeled here as bounded fan-out rather than literal channels since
    /// the orchestrator drains one crawler stream at a time).
    pub document_concurrency: usize,
    /// Max chunks embedded per provider call (spec.md §4.3's "up to B
    /// texts per call").
    pub embed_batch_size: usize,
    /// Minimum interval between progress events per source (spec.md §6:
    /// "Emitted at a bounded rate").
    pub progress_interval_ms: u64,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 10_000,
            document_concurrency: 4,
            embed_batch_size: 16,
            progress_interval_ms: 500,
        }
    }
}

/// Top-level orchestrator configuration (spec.md §4.2's chunk token band
/// plus the tuning above); the chunker/crawler each own their own
/// recognized-option records ([`chunker::ChunkerConfig`],
/// [`crawler::Crawler`]'s constructor args).
#[derive(Clone, Debug)]
pub struct IngestionConfig {
    pub chunker: chunker::ChunkerConfig,
    pub embedding_model: String,
    pub tuning: IngestionTuning,
}

impl IngestionConfig {
    pub fn new(chunker: chunker::ChunkerConfig, embedding_model: String) -> Self {
        Self {
            chunker,
            embedding_model,
            tuning: IngestionTuning::default(),
        }
    }
}
