//! Chunk + embedding entities (spec.md §3, §4.4). Generalizes the teacher's
//! `text_chunk.rs`/`text_chunk_embedding.rs` pair: one table per half of
//! the 1:1 relationship, joined by a `RecordId` link, written atomically in
//! one transaction (`store_with_embedding`) and searched with cosine
//! similarity plus the filter set spec.md §4.4 names (source, framework,
//! topic, minimum quality).

use surrealdb::RecordId;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::chunk_embedding::ChunkEmbedding;

stored_object!(Chunk, "chunk", {
    document_id: String,
    source_id: String,
    framework: Option<String>,
    ordinal: u32,
    text: String,
    token_count: u32,
    topics: Vec<String>,
    quality_score: f32
});

/// Filters accepted by [`Chunk::search`] (spec.md §4.4).
#[derive(Debug, Default, Clone)]
pub struct ChunkFilters {
    pub sources: Vec<String>,
    pub frameworks: Vec<String>,
    pub topics: Vec<String>,
    pub min_quality: Option<f32>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ChunkSearchResult {
    pub chunk: Chunk,
    pub score: f32,
}

impl Chunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        document_id: String,
        source_id: String,
        framework: Option<String>,
        ordinal: u32,
        text: String,
        token_count: u32,
        topics: Vec<String>,
        quality_score: f32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            document_id,
            source_id,
            framework,
            ordinal,
            text,
            token_count,
            topics,
            quality_score: quality_score.clamp(0.0, 1.0),
        }
    }

    /// Atomically store a chunk and its embedding (spec.md §4.4's "writes
    /// are atomic per chunk; readers never observe a chunk without its
    /// embedding").
    pub async fn store_with_embedding(
        chunk: Chunk,
        embedding: Vec<f32>,
        model: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let chunk_id = chunk.id.clone();
        let source_id = chunk.source_id.clone();
        let dimension = embedding.len() as u32;

        let emb = ChunkEmbedding {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chunk.created_at,
            updated_at: chunk.updated_at,
            chunk_id: RecordId::from_table_key(Chunk::table_name(), chunk_id.clone()),
            source_id,
            embedding,
            dimension,
            model: model.to_string(),
        };

        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "UPSERT type::thing('{chunk_table}', $chunk_id) CONTENT $chunk;",
                chunk_table = Self::table_name(),
            ))
            .query(format!(
                "UPSERT type::thing('{emb_table}', $emb_id) CONTENT $emb;",
                emb_table = ChunkEmbedding::table_name(),
            ))
            .query("COMMIT TRANSACTION;")
            .bind(("chunk_id", chunk_id))
            .bind(("chunk", chunk))
            .bind(("emb_id", emb.id.clone()))
            .bind(("emb", emb))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn get(db: &SurrealDbClient, id: &str) -> Result<Option<Self>, AppError> {
        db.get_item::<Self>(id).await.map_err(AppError::Database)
    }

    /// Filtered top-k cosine similarity search over `chunk_embedding`,
    /// fetching the hydrated chunk row (spec.md §4.4).
    pub async fn search(
        db: &SurrealDbClient,
        query_embedding: &[f32],
        k: usize,
        threshold: f32,
        filters: &ChunkFilters,
    ) -> Result<Vec<ChunkSearchResult>, AppError> {
        #[derive(serde::Deserialize)]
        struct Row {
            chunk_id: Chunk,
            score: f32,
        }

        let ef = (k * 10).max(50);
        let mut clauses = vec![format!("embedding <|{k},{ef}|> $embedding")];
        if !filters.sources.is_empty() {
            clauses.push("source_id IN $sources".to_string());
        }
        if !filters.frameworks.is_empty() {
            clauses.push("chunk_id.framework IN $frameworks".to_string());
        }
        if !filters.topics.is_empty() {
            clauses.push("chunk_id.topics CONTAINSANY $topics".to_string());
        }
        if filters.min_quality.is_some() {
            clauses.push("chunk_id.quality_score >= $min_quality".to_string());
        }

        let sql = format!(
            r#"
            SELECT chunk_id, vector::similarity::cosine(embedding, $embedding) AS score
            FROM {emb_table}
            WHERE {clauses}
            ORDER BY score DESC, chunk_id ASC
            LIMIT {k}
            FETCH chunk_id;
            "#,
            emb_table = ChunkEmbedding::table_name(),
            clauses = clauses.join(" AND "),
            k = k,
        );

        let mut query = db.client.query(sql).bind(("embedding", query_embedding.to_vec()));
        if !filters.sources.is_empty() {
            query = query.bind(("sources", filters.sources.clone()));
        }
        if !filters.frameworks.is_empty() {
            query = query.bind(("frameworks", filters.frameworks.clone()));
        }
        if !filters.topics.is_empty() {
            query = query.bind(("topics", filters.topics.clone()));
        }
        if let Some(min_quality) = filters.min_quality {
            query = query.bind(("min_quality", min_quality));
        }

        let mut response = query.await.map_err(AppError::Database)?;
        response = response.check().map_err(AppError::Database)?;
        let rows: Vec<Row> = response.take(0).map_err(AppError::Database)?;

        Ok(rows
            .into_iter()
            .filter(|r| r.score >= threshold)
            .map(|r| ChunkSearchResult {
                chunk: r.chunk_id,
                score: r.score,
            })
            .collect())
    }

    /// Highest-quality chunks of one document, for graph-anchored retrieval
    /// that never runs a vector search (spec.md §4.8 GRAPH_ONLY mode).
    pub async fn top_quality_for_document(
        db: &SurrealDbClient,
        document_id: &str,
        limit: usize,
    ) -> Result<Vec<Self>, AppError> {
        let sql = format!(
            "SELECT * FROM {table} WHERE document_id = $doc_id ORDER BY quality_score DESC LIMIT $limit;",
            table = Self::table_name()
        );
        let mut response = db
            .client
            .query(sql)
            .bind(("doc_id", document_id.to_owned()))
            .bind(("limit", limit as i64))
            .await
            .map_err(AppError::Database)?;
        response.take(0).map_err(AppError::Database)
    }

    /// Removes all chunks (and their embeddings) for a document — the full
    /// cascade used when a document is replaced wholesale.
    pub async fn delete_by_document(db: &SurrealDbClient, document_id: &str) -> Result<(), AppError> {
        Self::delete_stale_ordinals(db, document_id, 0).await
    }

    /// Deletes chunks of `document_id` whose ordinal is `>= keep_from` —
    /// the "stale chunk deletion by ordinal range" step of the ingestion
    /// commit (spec.md §4.7 step 4): re-ingesting a document with fewer
    /// chunks than before must not leave the tail behind.
    pub async fn delete_stale_ordinals(
        db: &SurrealDbClient,
        document_id: &str,
        keep_from: u32,
    ) -> Result<(), AppError> {
        let stale: Vec<Chunk> = {
            let sql = format!(
                "SELECT * FROM {table} WHERE document_id = $doc_id AND ordinal >= $keep_from;",
                table = Self::table_name()
            );
            let mut response = db
                .client
                .query(sql)
                .bind(("doc_id", document_id.to_owned()))
                .bind(("keep_from", keep_from))
                .await
                .map_err(AppError::Database)?;
            response.take(0).map_err(AppError::Database)?
        };

        for chunk in stale {
            db.client
                .query("BEGIN TRANSACTION;")
                .query(format!(
                    "DELETE type::thing('{chunk_table}', $id);",
                    chunk_table = Self::table_name()
                ))
                .query(format!(
                    "DELETE {emb_table} WHERE chunk_id = type::thing('{chunk_table}', $id);",
                    emb_table = ChunkEmbedding::table_name(),
                    chunk_table = Self::table_name(),
                ))
                .query("COMMIT TRANSACTION;")
                .bind(("id", chunk.id))
                .await
                .map_err(AppError::Database)?
                .check()
                .map_err(AppError::Database)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chunk(id: &str, document_id: &str, ordinal: u32) -> Chunk {
        make_chunk_with_framework(id, document_id, ordinal, "axum")
    }

    fn make_chunk_with_framework(id: &str, document_id: &str, ordinal: u32, framework: &str) -> Chunk {
        Chunk::new(
            id.to_string(),
            document_id.to_string(),
            "src-a".to_string(),
            Some(framework.to_string()),
            ordinal,
            format!("chunk text {ordinal}"),
            100,
            vec!["routing".to_string()],
            0.8,
        )
    }

    #[tokio::test]
    async fn store_with_embedding_is_atomic_and_fetchable() {
        let db = SurrealDbClient::memory("ns", "chunk_test").await.unwrap();
        db.ensure_initialized().await.unwrap();

        let chunk = make_chunk("c1", "doc-1", 0);
        Chunk::store_with_embedding(chunk.clone(), vec![0.1, 0.2, 0.3], "test-model", &db)
            .await
            .unwrap();

        let fetched = Chunk::get(&db, "c1").await.unwrap();
        assert_eq!(fetched.map(|c| c.id), Some("c1".to_string()));
    }

    #[tokio::test]
    async fn search_respects_threshold_and_filters() {
        let db = SurrealDbClient::memory("ns", "chunk_search_test").await.unwrap();
        db.ensure_initialized().await.unwrap();

        Chunk::store_with_embedding(make_chunk("c1", "doc-1", 0), vec![1.0, 0.0, 0.0], "m", &db)
            .await
            .unwrap();
        Chunk::store_with_embedding(make_chunk("c2", "doc-1", 1), vec![0.0, 1.0, 0.0], "m", &db)
            .await
            .unwrap();

        let results = Chunk::search(&db, &[1.0, 0.0, 0.0], 5, 0.5, &ChunkFilters::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, "c1");
    }

    #[tokio::test]
    async fn search_applies_filters_before_the_limit_not_after() {
        let db = SurrealDbClient::memory("ns", "chunk_search_filter_test").await.unwrap();
        db.ensure_initialized().await.unwrap();

        // c1 is nearest the query vector but belongs to the wrong framework.
        // c2 is farther away but is the only chunk matching the filter.
        // A post-filter-after-LIMIT-1 search would return zero results here;
        // filtering inside the query must still surface c2.
        Chunk::store_with_embedding(
            make_chunk_with_framework("c1", "doc-1", 0, "axum"),
            vec![1.0, 0.0, 0.0],
            "m",
            &db,
        )
        .await
        .unwrap();
        Chunk::store_with_embedding(
            make_chunk_with_framework("c2", "doc-1", 1, "react"),
            vec![0.9, 0.1, 0.0],
            "m",
            &db,
        )
        .await
        .unwrap();

        let filters = ChunkFilters {
            frameworks: vec!["react".to_string()],
            ..ChunkFilters::default()
        };
        let results = Chunk::search(&db, &[1.0, 0.0, 0.0], 1, 0.0, &filters)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, "c2");
    }

    #[tokio::test]
    async fn delete_stale_ordinals_removes_tail_only() {
        let db = SurrealDbClient::memory("ns", "chunk_stale_test").await.unwrap();
        db.ensure_initialized().await.unwrap();

        Chunk::store_with_embedding(make_chunk("c0", "doc-1", 0), vec![0.1, 0.1, 0.1], "m", &db)
            .await
            .unwrap();
        Chunk::store_with_embedding(make_chunk("c1", "doc-1", 1), vec![0.2, 0.2, 0.2], "m", &db)
            .await
            .unwrap();
        Chunk::store_with_embedding(make_chunk("c2", "doc-1", 2), vec![0.3, 0.3, 0.3], "m", &db)
            .await
            .unwrap();

        Chunk::delete_stale_ordinals(&db, "doc-1", 1).await.unwrap();

        assert!(Chunk::get(&db, "c0").await.unwrap().is_some());
        assert!(Chunk::get(&db, "c1").await.unwrap().is_none());
        assert!(Chunk::get(&db, "c2").await.unwrap().is_none());
    }
}
