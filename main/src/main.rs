//! Thin CLI wiring for the three boundary commands spec.md §6 names:
//! crawl (full or incremental), targeted re-ingest, and query. The HTTP/RPC
//! façade, dashboard, and hallucination detector the teacher's `main`
//! bootstrapped are out of scope (spec.md §1) — this binary only drives the
//! core crates (`crawler`, `chunker`, `ingestion-pipeline`, `retrieval-pipeline`)
//! directly, the way a batch job or ops script would.

use std::{collections::HashSet, sync::Arc, time::Duration};

use async_openai::{config::OpenAIConfig, Client};
use clap::{Parser, Subcommand};
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::source::Source},
    utils::{
        config::{get_config, AppConfig},
        embedding::{EmbeddingProvider, OpenAiEmbeddingProvider},
    },
};
use crawler::Crawler;
use ingestion_pipeline::{IngestionConfig, IngestionOrchestrator, RunSummary};
use retrieval_pipeline::{HybridQueryEngine, Query, QueryFilters, QueryMode, RetrievalTuning};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Ptolemies: hybrid retrieval engine over a crawled documentation corpus.
#[derive(Parser, Debug)]
#[command(name = "ptolemies", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full or incremental crawl (spec.md §6's ingestion trigger).
    Crawl {
        /// Source ids to crawl; omit to crawl every configured source
        /// (a "full crawl"). Passing a subset is an "incremental crawl".
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,
    },
    /// Re-ingest a specific set of already-crawled document ids (spec.md
    /// §6's "targeted re-ingest of a document id set").
    Reingest {
        #[arg(long)]
        source: String,
        #[arg(long, value_delimiter = ',')]
        document_ids: Vec<String>,
    },
    /// Submit one query to the hybrid query engine (spec.md §4.8, §6).
    Query {
        #[arg(long)]
        text: String,
        #[arg(long, default_value = "HYBRID_BALANCED")]
        mode: String,
        #[arg(long)]
        k: Option<usize>,
        #[arg(long)]
        deadline_ms: Option<u64>,
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        frameworks: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        topics: Vec<String>,
        #[arg(long)]
        min_quality: Option<f32>,
    },
}

async fn connect_db(config: &AppConfig) -> Result<SurrealDbClient, AppError> {
    let db = SurrealDbClient::new(
        &config.surrealdb_address,
        &config.surrealdb_username,
        &config.surrealdb_password,
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await
    .map_err(AppError::Database)?;
    db.ensure_initialized().await?;
    Ok(db)
}

fn build_embedding_provider(config: &AppConfig) -> Arc<dyn EmbeddingProvider> {
    let client = Client::with_config(
        OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );
    Arc::new(OpenAiEmbeddingProvider::new(
        client,
        config.embedding_model.clone(),
        config.embedding_dimensions,
        config.embedding_max_concurrency,
        config.embedding_max_batch,
    ))
}

fn build_ingestion_config(config: &AppConfig) -> IngestionConfig {
    let chunker_config = chunker::ChunkerConfig {
        min_tokens: config.chunking.min_tokens,
        max_tokens: config.chunking.max_tokens,
        overlap_tokens: config.chunking.overlap_tokens,
        max_topics: config.chunking.max_topics,
        topic_allowlist: config.chunking.topic_allowlist.clone(),
    };
    IngestionConfig::new(chunker_config, config.embedding_model.clone())
}

fn print_summary(source_id: &str, summary: &RunSummary) {
    info!(
        source_id,
        documents_seen = summary.documents_seen,
        documents_committed = summary.documents_committed,
        documents_failed = summary.documents_failed,
        corpus_version = summary.corpus_version,
        "crawl summary"
    );
    if !summary.failed_document_ids.is_empty() {
        info!(source_id, failed = ?summary.failed_document_ids, "documents that failed ingestion");
    }
}

async fn run_crawl(config: &AppConfig, source_ids: &[String]) -> Result<(), AppError> {
    let db = connect_db(config).await?;
    let crawler = Arc::new(Crawler::new(
        config.crawler.user_agent.clone(),
        Duration::from_millis(config.crawler.request_timeout_ms),
        config.crawler.max_retries,
        config.crawler.max_redirects,
    )?);
    let embedding = build_embedding_provider(config);
    let frameworks: HashSet<String> = config.chunking.frameworks.iter().cloned().collect();
    let orchestrator = IngestionOrchestrator::new(db.clone(), crawler, embedding, build_ingestion_config(config), frameworks);

    let configured: Vec<Source> = config
        .sources
        .iter()
        .filter(|s| source_ids.is_empty() || source_ids.contains(&s.id))
        .map(|s| {
            let mut source = Source::new(
                s.name.clone(),
                s.root_url.clone(),
                s.category.clone(),
                s.max_depth,
                s.max_pages,
                s.delay_ms,
                s.respect_robots_txt,
            );
            source.id = s.id.clone();
            source
        })
        .collect();

    if configured.is_empty() {
        return Err(AppError::Validation("no matching sources configured".to_string()));
    }

    for source in &configured {
        source.clone().upsert(&db).await?;
    }

    let results = orchestrator.run_crawl(&configured).await;
    for (source_id, summary) in &results {
        print_summary(source_id, summary);
    }
    Ok(())
}

async fn run_reingest(config: &AppConfig, source_id: &str, document_ids: &[String]) -> Result<(), AppError> {
    let db = connect_db(config).await?;
    let crawler = Arc::new(Crawler::new(
        config.crawler.user_agent.clone(),
        Duration::from_millis(config.crawler.request_timeout_ms),
        config.crawler.max_retries,
        config.crawler.max_redirects,
    )?);
    let embedding = build_embedding_provider(config);
    let frameworks: HashSet<String> = config.chunking.frameworks.iter().cloned().collect();
    let orchestrator = IngestionOrchestrator::new(db, crawler, embedding, build_ingestion_config(config), frameworks);

    let source_config = config
        .sources
        .iter()
        .find(|s| s.id == source_id)
        .ok_or_else(|| AppError::Validation(format!("unknown source id {source_id}")))?;
    let mut source = Source::new(
        source_config.name.clone(),
        source_config.root_url.clone(),
        source_config.category.clone(),
        source_config.max_depth,
        source_config.max_pages,
        source_config.delay_ms,
        source_config.respect_robots_txt,
    );
    source.id = source_config.id.clone();

    let summary = orchestrator.reingest(&source, document_ids).await;
    print_summary(&source.id, &summary);
    Ok(())
}

async fn run_query(
    config: &AppConfig,
    text: String,
    mode: String,
    k: Option<usize>,
    deadline_ms: Option<u64>,
    sources: Vec<String>,
    frameworks: Vec<String>,
    topics: Vec<String>,
    min_quality: Option<f32>,
) -> Result<(), AppError> {
    let db = connect_db(config).await?;
    let embedding = build_embedding_provider(config);
    let tuning = RetrievalTuning::from_app_config(&config.retrieval, Duration::from_secs(config.cache.ttl_secs));
    let engine = HybridQueryEngine::new(db, embedding, tuning.clone(), config.cache.max_entries);

    let mode: QueryMode = mode.parse().map_err(AppError::InvalidQuery)?;
    let query = Query {
        text,
        filters: QueryFilters {
            sources,
            frameworks,
            topics,
            min_quality,
        },
        k: k.unwrap_or(tuning.default_k),
        mode,
        deadline_ms: deadline_ms.unwrap_or(tuning.default_deadline_ms),
    };

    let result = engine.query(query).await?;
    info!(
        partial = result.partial,
        corpus_version = result.corpus_version,
        from_cache = result.from_cache,
        item_count = result.items.len(),
        "query result"
    );
    for item in &result.items {
        println!(
            "{:.4}  chunk={}  doc={}  source={}  provenance={:?}\n    {}",
            item.score, item.chunk_id, item.document_id, item.source_id, item.provenance, item.snippet
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config()?;

    let outcome = match cli.command {
        Command::Crawl { sources } => run_crawl(&config, &sources).await,
        Command::Reingest { source, document_ids } => run_reingest(&config, &source, &document_ids).await,
        Command::Query {
            text,
            mode,
            k,
            deadline_ms,
            sources,
            frameworks,
            topics,
            min_quality,
        } => run_query(&config, text, mode, k, deadline_ms, sources, frameworks, topics, min_quality).await,
    };

    if let Err(e) = outcome {
        error!(error = %e, "command failed");
        std::process::exit(1);
    }

    Ok(())
}
