use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// A single crawl source (spec.md §3, `Source` entity).
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub root_url: String,
    pub category: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_respect_robots")]
    pub respect_robots_txt: bool,
}

const fn default_max_depth() -> u32 {
    3
}
const fn default_max_pages() -> u32 {
    500
}
const fn default_delay_ms() -> u64 {
    250
}
const fn default_respect_robots() -> bool {
    true
}

/// The chunk token band and overlap window (spec.md §4.2).
#[derive(Clone, Deserialize, Debug)]
pub struct ChunkingConfig {
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    #[serde(default = "default_max_topics")]
    pub max_topics: usize,
    /// Framework/concept names topic extraction is seeded with (spec.md
    /// §4.2 step 4's "allowlist of framework/concept names").
    #[serde(default)]
    pub topic_allowlist: Vec<String>,
    /// The subset of `topic_allowlist` the ingestion orchestrator promotes
    /// to `Framework` graph nodes rather than `Concept` nodes (spec.md §3's
    /// `Framework` entity; everything else observed becomes a `Concept`).
    #[serde(default)]
    pub frameworks: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_tokens: default_min_tokens(),
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
            max_topics: default_max_topics(),
            topic_allowlist: Vec::new(),
            frameworks: Vec::new(),
        }
    }
}

const fn default_min_tokens() -> usize {
    128
}
const fn default_max_tokens() -> usize {
    512
}
const fn default_overlap_tokens() -> usize {
    48
}
const fn default_max_topics() -> usize {
    8
}

/// Per-mode fusion weights (spec.md §4.8); must sum to 1.0.
#[derive(Clone, Copy, Deserialize, Debug)]
pub struct ModeWeights {
    pub vector: f32,
    pub graph: f32,
    pub quality: f32,
}

/// Tuning knobs for the hybrid query engine (C8).
#[derive(Clone, Deserialize, Debug)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_k: usize,
    #[serde(default = "default_vector_threshold")]
    pub vector_threshold: f32,
    #[serde(default = "default_deadline_ms")]
    pub default_deadline_ms: u64,
    #[serde(default = "default_graph_depth")]
    pub graph_traversal_depth: u32,
    #[serde(default = "default_mode_weights")]
    pub mode_weights: HashMap<String, ModeWeights>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_top_k(),
            vector_threshold: default_vector_threshold(),
            default_deadline_ms: default_deadline_ms(),
            graph_traversal_depth: default_graph_depth(),
            mode_weights: default_mode_weights(),
        }
    }
}

const fn default_top_k() -> usize {
    10
}
const fn default_vector_threshold() -> f32 {
    0.2
}
const fn default_deadline_ms() -> u64 {
    200
}
const fn default_graph_depth() -> u32 {
    2
}

fn default_mode_weights() -> HashMap<String, ModeWeights> {
    let mut map = HashMap::new();
    map.insert(
        "SEMANTIC_ONLY".to_string(),
        ModeWeights {
            vector: 0.8,
            graph: 0.0,
            quality: 0.2,
        },
    );
    map.insert(
        "GRAPH_ONLY".to_string(),
        ModeWeights {
            vector: 0.0,
            graph: 0.8,
            quality: 0.2,
        },
    );
    map.insert(
        "HYBRID_BALANCED".to_string(),
        ModeWeights {
            vector: 0.5,
            graph: 0.35,
            quality: 0.15,
        },
    );
    map.insert(
        "CONCEPT_EXPANSION".to_string(),
        ModeWeights {
            vector: 0.45,
            graph: 0.4,
            quality: 0.15,
        },
    );
    map
}

/// Bounded TTL cache sizing (C2).
#[derive(Clone, Copy, Deserialize, Debug)]
pub struct CacheConfig {
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

const fn default_cache_entries() -> usize {
    10_000
}
const fn default_cache_ttl_secs() -> u64 {
    300
}

/// Crawler politeness and retry knobs (C6).
#[derive(Clone, Deserialize, Debug)]
pub struct CrawlerConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            max_redirects: default_max_redirects(),
        }
    }
}

fn default_user_agent() -> String {
    "ptolemies-crawler/0.1 (+docs ingestion bot)".to_string()
}
const fn default_request_timeout_ms() -> u64 {
    10_000
}
const fn default_max_retries() -> u32 {
    3
}
const fn default_max_redirects() -> u32 {
    5
}

/// Recognized-option configuration record (spec.md §9's "replace
/// string-indexed configuration" design note). Loaded once per process via
/// [`get_config`]; changes require a restart.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_embedding_concurrency")]
    pub embedding_max_concurrency: usize,
    #[serde(default = "default_embedding_batch")]
    pub embedding_max_batch: usize,

    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

const fn default_embedding_dimensions() -> u32 {
    1536
}

const fn default_embedding_concurrency() -> usize {
    4
}

const fn default_embedding_batch() -> usize {
    16
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_weights_sum_to_one() {
        for (mode, weights) in default_mode_weights() {
            let sum = weights.vector + weights.graph + weights.quality;
            assert!(
                (sum - 1.0).abs() < 1e-6,
                "{mode} weights sum to {sum}, expected 1.0"
            );
        }
    }

    #[test]
    fn chunking_defaults_form_a_valid_band() {
        let cfg = ChunkingConfig::default();
        assert!(cfg.min_tokens < cfg.max_tokens);
        assert!(cfg.overlap_tokens < cfg.min_tokens);
    }
}
