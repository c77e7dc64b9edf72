//! Ingestion Orchestrator (C7, spec.md §4.7): composes the crawler (C6),
//! chunker (C5), embedding provider (C1), vector store, and graph store
//! into one per-document pipeline with deduplication, idempotency, and
//! cross-reference maintenance. Grounded in the teacher's
//! `ingestion-pipeline/src/pipeline/mod.rs` drive loop (per-task state
//! machine, staged timing, retry-with-backoff-then-dead-letter) and
//! `pipeline/stages/mod.rs`'s `store_graph_entities` (persist-embeddings-
//! then-relate-edges ordering), retargeted from "one LLM-enriched note" to
//! "one crawled document, replayable by raw-hash".

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use chunker::{chunk_document, ChunkDraft};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::Chunk,
            chunk_embedding::ChunkEmbedding,
            corpus::CorpusVersion,
            document::Document,
            graph::{GraphNode, NodeKind},
            relationship::{Relationship, RelationshipKind},
            source::Source,
            StoredObject,
        },
    },
    utils::embedding::EmbeddingProvider,
};
use crawler::{CrawledPage, Crawler};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use state_machines::core::GuardError;
use tokio::sync::Mutex as AsyncMutex;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{info, instrument, warn};

use crate::{
    config::IngestionConfig,
    progress::{ProgressEvent, ProgressReporter},
    state::ready,
};

/// Outcome of one orchestrator run (a full crawl, an incremental crawl, or
/// a targeted re-ingest), per spec.md §6's "run summary with counts per
/// outcome and a list of failed document ids".
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub documents_seen: u64,
    pub documents_committed: u64,
    pub documents_failed: u64,
    pub failed_document_ids: Vec<String>,
    pub corpus_version: u64,
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion transition during {event}: {guard:?}"
    ))
}

/// Snapshot of a document's chunks plus embeddings, taken before mutation
/// so a failed document can be restored to its prior state (spec.md §4.7:
/// "if steps 2 and 3 do not both succeed for a document, both are rolled
/// back to the prior state of that document").
struct ChunkSnapshot {
    chunk: Chunk,
    embedding: Vec<f32>,
    model: String,
}

pub struct IngestionOrchestrator {
    db: SurrealDbClient,
    crawler: Arc<Crawler>,
    embedding: Arc<dyn EmbeddingProvider>,
    config: IngestionConfig,
    frameworks: HashSet<String>,
    /// Per-document-id keyed lock (spec.md §5: "mutation is serialized per
    /// document id using a keyed lock"). Lookups into the map itself are
    /// protected by this same mutex; the map never shrinks, which is fine
    /// at this crate's scale (one entry per distinct document ever seen).
    doc_locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl IngestionOrchestrator {
    pub fn new(
        db: SurrealDbClient,
        crawler: Arc<Crawler>,
        embedding: Arc<dyn EmbeddingProvider>,
        config: IngestionConfig,
        frameworks: HashSet<String>,
    ) -> Self {
        Self {
            db,
            crawler,
            embedding,
            config,
            frameworks,
            doc_locks: AsyncMutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, document_id: &str) -> Arc<AsyncMutex<()>> {
        self.doc_locks
            .lock()
            .await
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Runs a full (or incremental, depending on `sources`) crawl across the
    /// given sources concurrently (spec.md §4.1: "Parallel mode interleaves
    /// sources"), returning one summary per source plus a watch receiver
    /// the caller can poll for live progress.
    #[instrument(skip(self, sources), fields(source_count = sources.len()))]
    pub async fn run_crawl(&self, sources: &[Source]) -> Vec<(String, RunSummary)> {
        let mut handles = Vec::with_capacity(sources.len());
        for source in sources {
            let source = source.clone();
            handles.push(self.run_source(source));
        }
        futures::future::join_all(handles)
            .await
            .into_iter()
            .collect()
    }

    /// Targeted re-ingest of a specific document id set (spec.md §6): looks
    /// up each document's source and URL, re-fetches, and re-runs the same
    /// per-document pipeline a crawl would.
    #[instrument(skip(self, document_ids), fields(count = document_ids.len()))]
    pub async fn reingest(&self, source: &Source, document_ids: &[String]) -> RunSummary {
        let (mut reporter, _rx) = ProgressReporter::new(
            source.id.clone(),
            Duration::from_millis(self.config.tuning.progress_interval_ms),
        );
        let mut summary = RunSummary::default();

        for document_id in document_ids {
            let existing: Option<Document> = match self.db.get_item(document_id).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(document_id, error = %e, "reingest lookup failed, skipping");
                    continue;
                }
            };
            let Some(existing) = existing else {
                warn!(document_id, "reingest target not found, skipping");
                continue;
            };

            reporter.record_seen();
            summary.documents_seen += 1;

            match self.crawler.fetch_page(source, &existing.url).await {
                Ok(page) => match self.process_page(source, page).await {
                    Ok(Some(_)) => {
                        summary.documents_committed += 1;
                        reporter.record_committed();
                    }
                    Ok(None) => {}
                    Err(e) => {
                        summary.documents_failed += 1;
                        summary.failed_document_ids.push(document_id.clone());
                        reporter.record_failed(e.kind());
                    }
                },
                Err(e) => {
                    summary.documents_failed += 1;
                    summary.failed_document_ids.push(document_id.clone());
                    reporter.record_failed(e.kind());
                }
            }
        }

        reporter.finish();
        summary.corpus_version = CorpusVersion::current(&self.db).await.unwrap_or_default();
        summary
    }

    #[instrument(skip(self, source), fields(source_id = %source.id, source_name = %source.name))]
    async fn run_source(&self, source: Source) -> (String, RunSummary) {
        let (mut reporter, _rx) = ProgressReporter::new(
            source.id.clone(),
            Duration::from_millis(self.config.tuning.progress_interval_ms),
        );
        let mut summary = RunSummary::default();

        let mut pages = Arc::clone(&self.crawler).crawl_source(source.clone());
        let concurrency = self.config.tuning.document_concurrency.max(1);
        let mut in_flight = futures::stream::FuturesUnordered::new();
        let mut channel_open = true;

        loop {
            tokio::select! {
                page = pages.recv(), if channel_open && in_flight.len() < concurrency => {
                    match page {
                        Some(Ok(page)) => {
                            reporter.record_seen();
                            summary.documents_seen += 1;
                            in_flight.push(self.process_one(&source, page));
                        }
                        Some(Err(e)) => {
                            warn!(source_id = %source.id, error = %e, "per-page crawl failure");
                            reporter.record_failed(e.kind());
                        }
                        None => channel_open = false,
                    }
                }
                Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                    match result {
                        Ok(Some(document_id)) => {
                            summary.documents_committed += 1;
                            info!(source_id = %source.id, document_id, "document committed");
                            reporter.record_committed();
                        }
                        Ok(None) => {
                            // idempotent no-op: identical raw-hash, not a failure.
                        }
                        Err((document_id, e)) => {
                            summary.documents_failed += 1;
                            summary.failed_document_ids.push(document_id);
                            warn!(source_id = %source.id, error = %e, "document ingestion failed");
                            reporter.record_failed(e.kind());
                        }
                    }
                }
                else => break,
            }
        }

        let final_progress: ProgressEvent = reporter.finish();
        let _ = final_progress;
        summary.corpus_version = CorpusVersion::current(&self.db).await.unwrap_or_default();
        (source.id.clone(), summary)
    }

    fn process_one(
        &self,
        source: &Source,
        page: CrawledPage,
    ) -> impl std::future::Future<Output = Result<Option<String>, (String, AppError)>> + '_ {
        let source = source.clone();
        async move {
            let document_id = Document::find_by_source_and_url(&self.db, &source.id, &page.url)
                .await
                .ok()
                .flatten()
                .map_or_else(|| uuid::Uuid::new_v4().to_string(), |d| d.id);

            self.process_page(&source, page)
                .await
                .map_err(|e| (document_id.clone(), e))
        }
    }

    /// The per-document algorithm spec.md §4.7 specifies. Returns
    /// `Ok(Some(document_id))` on a fresh commit, `Ok(None)` on an
    /// idempotent no-op (unchanged raw-hash), `Err` on an isolated
    /// per-document failure. Progress counters are the caller's
    /// responsibility — concurrent callers would otherwise need to share a
    /// `&mut ProgressReporter` across in-flight futures.
    #[instrument(skip(self, page), fields(url = %page.url, source_id = %source.id))]
    async fn process_page(&self, source: &Source, page: CrawledPage) -> Result<Option<String>, AppError> {
        let raw_hash = format!("{:x}", Sha256::digest(&page.raw));

        let existing = Document::find_by_source_and_url(&self.db, &source.id, &page.url).await?;
        if let Some(prior) = &existing {
            if prior.raw_hash == raw_hash {
                return Ok(None);
            }
        }

        let document_id = existing.as_ref().map_or_else(|| uuid::Uuid::new_v4().to_string(), |d| d.id.clone());
        let lock = self.lock_for(&document_id).await;
        let _guard = lock.lock().await;

        let machine = ready();
        let machine = machine.crawl().map_err(|(_, g)| map_guard_error("crawl", &g))?;

        let drafts = chunk_document(&page.raw, &page.content_type, &self.config.chunker)?;
        let machine = machine.chunk().map_err(|(_, g)| map_guard_error("chunk", &g))?;

        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let embeddings = self.embed_with_retry(&texts).await?;
        let machine = machine.embed().map_err(|(_, g)| map_guard_error("embed", &g))?;

        let snapshot = self.snapshot_chunks(&document_id).await?;

        match self
            .commit_document(source, &document_id, &page, &raw_hash, drafts, embeddings)
            .await
        {
            Ok(()) => {
                machine.commit().map_err(|(_, g)| map_guard_error("commit", &g))?;
                Ok(Some(document_id))
            }
            Err(e) => {
                self.restore_snapshot(&document_id, snapshot).await;
                drop(machine);
                Err(e)
            }
        }
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.tuning.embed_batch_size) {
            let batch = batch.to_vec();
            out.extend(self.retry(|| async { self.embedding.embed(&batch).await }).await?);
        }
        Ok(out)
    }

    /// Retries a fallible operation with exponential backoff while its
    /// error kind is retryable (spec.md §4.7, §7's transient-I/O taxonomy);
    /// gives up after `tuning.max_retries` attempts.
    async fn retry<F, Fut, T>(&self, f: F) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, AppError>>,
    {
        let strategy = ExponentialBackoff::from_millis(self.config.tuning.retry_base_delay_ms)
            .max_delay(Duration::from_millis(self.config.tuning.retry_max_delay_ms))
            .map(jitter)
            .take(self.config.tuning.max_retries as usize);

        Retry::spawn(strategy, f).await
    }

    async fn snapshot_chunks(&self, document_id: &str) -> Result<Vec<ChunkSnapshot>, AppError> {
        #[derive(serde::Deserialize)]
        struct Row {
            #[serde(rename = "chunk_id")]
            chunk: Chunk,
            embedding: Vec<f32>,
            model: String,
        }

        let sql = format!(
            "SELECT chunk_id.*, embedding, model FROM {table} WHERE chunk_id.document_id = $document_id;",
            table = ChunkEmbedding::table_name(),
        );
        let mut response = self
            .db
            .client
            .query(sql)
            .bind(("document_id", document_id.to_string()))
            .await
            .map_err(AppError::Database)?;
        let rows: Vec<Row> = response.take(0).map_err(AppError::Database)?;

        Ok(rows
            .into_iter()
            .map(|r| ChunkSnapshot {
                chunk: r.chunk,
                embedding: r.embedding,
                model: r.model,
            })
            .collect())
    }

    async fn restore_snapshot(&self, document_id: &str, snapshot: Vec<ChunkSnapshot>) {
        if snapshot.is_empty() {
            return;
        }
        if let Err(e) = Chunk::delete_by_document(&self.db, document_id).await {
            warn!(document_id, error = %e, "failed to clear partial chunks during rollback");
        }
        for entry in snapshot {
            if let Err(e) = Chunk::store_with_embedding(entry.chunk, entry.embedding, &entry.model, &self.db).await {
                warn!(document_id, error = %e, "failed to restore chunk snapshot during rollback");
            }
        }
    }

    /// Steps 2-5 of spec.md §4.7 once crawl/chunk/embed have already
    /// succeeded: upsert chunks+embeddings, the document graph node and its
    /// concept/framework edges, delete stale ordinals, and bump the corpus
    /// version. All-or-nothing from the caller's perspective via the
    /// snapshot/restore wrapper in [`Self::process_page`].
    async fn commit_document(
        &self,
        source: &Source,
        document_id: &str,
        page: &CrawledPage,
        raw_hash: &str,
        drafts: Vec<ChunkDraft>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<(), AppError> {
        let title = extract_title(&page.raw, &page.content_type).unwrap_or_else(|| page.url.clone());
        let mut topics: HashSet<String> = HashSet::new();
        let chunk_count = drafts.len();

        for (draft, embedding) in drafts.into_iter().zip(embeddings.into_iter()) {
            topics.extend(draft.topics.iter().cloned());
            let framework = draft
                .topics
                .iter()
                .find(|t| self.frameworks.contains(t.as_str()))
                .cloned();

            let chunk_id = format!("{document_id}-{}", draft.ordinal);
            let chunk = Chunk::new(
                chunk_id,
                document_id.to_string(),
                source.id.clone(),
                framework,
                draft.ordinal,
                draft.text,
                draft.token_count,
                draft.topics,
                draft.quality_score,
            );
            self.retry(|| {
                let chunk = chunk.clone();
                let embedding = embedding.clone();
                let model = self.config.embedding_model.clone();
                async move { Chunk::store_with_embedding(chunk, embedding, &model, &self.db).await }
            })
            .await?;
        }

        #[allow(clippy::cast_possible_truncation)]
        Chunk::delete_stale_ordinals(&self.db, document_id, chunk_count as u32).await?;

        let mut document = Document::new(source.id.clone(), page.url.clone(), title.clone(), raw_hash.to_string());
        document.id = document_id.to_string();
        document.fetched_at = page.fetched_at;
        document.upsert(&self.db).await?;

        GraphNode::new(
            NodeKind::Document,
            document_id.to_string(),
            title,
            page.url.clone(),
            Some(source.category.clone()),
            None,
        )
        .upsert_node(&self.db)
        .await?;

        for topic in &topics {
            if self.frameworks.contains(topic) {
                let node = GraphNode::new(NodeKind::Framework, topic.clone(), topic.clone(), String::new(), None, None);
                node.upsert_node(&self.db).await?;
                let framework_id = GraphNode::composite_id(NodeKind::Framework, topic);
                let document_node_id = GraphNode::composite_id(NodeKind::Document, document_id);
                Relationship::upsert_edge(
                    &self.db,
                    RelationshipKind::Documents,
                    &framework_id,
                    &document_node_id,
                    Some(topic.clone()),
                    1.0,
                    1,
                )
                .await?;
            } else {
                let node = GraphNode::new(NodeKind::Concept, topic.clone(), topic.clone(), String::new(), Some(source.category.clone()), None);
                node.upsert_node(&self.db).await?;
                let concept_id = GraphNode::composite_id(NodeKind::Concept, topic);
                let document_node_id = GraphNode::composite_id(NodeKind::Document, document_id);
                Relationship::upsert_edge(
                    &self.db,
                    RelationshipKind::ContainsConcept,
                    &document_node_id,
                    &concept_id,
                    None,
                    1.0,
                    1,
                )
                .await?;
                Relationship::upsert_edge(
                    &self.db,
                    RelationshipKind::AppearsIn,
                    &concept_id,
                    &document_node_id,
                    None,
                    1.0,
                    1,
                )
                .await?;
            }
        }

        CorpusVersion::bump(&self.db).await?;
        Ok(())
    }
}

/// Cheap `<title>` sniff for HTML documents, otherwise `None` (the caller
/// falls back to the URL). Not the chunker's job — the chunker only ever
/// sees extracted prose, never the raw tag soup.
fn extract_title(raw: &[u8], content_type: &str) -> Option<String> {
    if !content_type.contains("html") {
        return None;
    }
    let text = std::str::from_utf8(raw).ok()?;
    let document = scraper::Html::parse_document(text);
    let selector = scraper::Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::embedding::FixedEmbeddingProvider;

    fn make_source() -> Source {
        Source::new(
            "Test Docs".into(),
            "https://example.com".into(),
            "language".into(),
            1,
            10,
            0,
            false,
        )
    }

    fn make_config() -> IngestionConfig {
        let mut chunker_config = chunker::ChunkerConfig {
            min_tokens: 4,
            max_tokens: 64,
            overlap_tokens: 1,
            max_topics: 8,
            topic_allowlist: vec!["axum".to_string()],
        };
        chunker_config.topic_allowlist.push("tokio".to_string());
        IngestionConfig::new(chunker_config, "test-model".to_string())
    }

    async fn new_orchestrator(db: SurrealDbClient) -> IngestionOrchestrator {
        let crawler = Arc::new(Crawler::new("test-agent".into(), Duration::from_secs(5), 1, 3).unwrap());
        let embedding = Arc::new(FixedEmbeddingProvider::new(16));
        let mut frameworks = HashSet::new();
        frameworks.insert("axum".to_string());
        IngestionOrchestrator::new(db, crawler, embedding, make_config(), frameworks)
    }

    fn html_page(source: &Source, url: &str, body: &str) -> CrawledPage {
        CrawledPage {
            source_id: source.id.clone(),
            url: url.to_string(),
            fetched_at: chrono::Utc::now(),
            content_type: "text/html".into(),
            raw: format!("<html><body><main>{body}</main></body></html>").into_bytes(),
        }
    }

    #[tokio::test]
    async fn reingesting_unchanged_bytes_is_a_noop() {
        let db = SurrealDbClient::memory("ns", "orch_noop").await.unwrap();
        db.ensure_initialized().await.unwrap();
        let orchestrator = new_orchestrator(db).await;
        let source = make_source();

        let page = html_page(&source, "https://example.com/a", "<h1>Axum routing</h1><p>Axum is a web framework built on tokio and hyper for building routes.</p>");

        let first = orchestrator.process_page(&source, page.clone()).await.unwrap();
        assert!(first.is_some());

        let second = orchestrator.process_page(&source, page).await.unwrap();
        assert!(second.is_none(), "identical raw-hash must be a no-op");
    }

    #[tokio::test]
    async fn commit_creates_document_and_framework_node() {
        let db = SurrealDbClient::memory("ns", "orch_commit").await.unwrap();
        db.ensure_initialized().await.unwrap();
        let orchestrator = new_orchestrator(db).await;
        let source = make_source();

        let page = html_page(&source, "https://example.com/b", "<h1>Axum routing</h1><p>Axum is a web framework built on tokio for building HTTP routes and handlers.</p>");

        let document_id = orchestrator
            .process_page(&source, page)
            .await
            .unwrap()
            .expect("first ingest commits");

        let doc_node = GraphNode::get(&orchestrator.db, NodeKind::Document, &document_id).await.unwrap();
        assert!(doc_node.is_some());

        let framework_node = GraphNode::get(&orchestrator.db, NodeKind::Framework, "axum").await.unwrap();
        assert!(framework_node.is_some(), "axum should be promoted to a framework node");

        let version = CorpusVersion::current(&orchestrator.db).await.unwrap();
        assert_eq!(version, 1);
    }
}
