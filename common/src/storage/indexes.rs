//! Schema bootstrap: HNSW vector index (C3) and BM25 full-text indexes
//! (kept as a building block for GRAPH_ONLY anchor-entity text matching,
//! spec.md §10) over the new `chunk`/`chunk_embedding`/`graph_node` tables.
//!
//! Grounded in the teacher's `ensure_runtime_indexes`/`rebuild_indexes`
//! pair: define-then-poll using `INFO FOR INDEX`, overwrite on a dimension
//! mismatch. Simplified to the status field only — the teacher's row-count
//! progress percentage isn't needed at the scale this crate targets.

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::AppError;

use super::db::SurrealDbClient;

const INDEX_POLL_INTERVAL: Duration = Duration::from_millis(50);
const FTS_ANALYZER_NAME: &str = "ptolemies_en_fts_analyzer";

#[derive(Clone, Copy)]
struct HnswIndexSpec {
    index_name: &'static str,
    table: &'static str,
    options: &'static str,
}

const CHUNK_EMBEDDING_INDEX: HnswIndexSpec = HnswIndexSpec {
    index_name: "idx_embedding_chunk_embedding",
    table: "chunk_embedding",
    options: "DIST COSINE TYPE F32 EFC 150 M 12 CONCURRENTLY",
};

#[derive(Clone, Copy)]
struct FtsIndexSpec {
    index_name: &'static str,
    table: &'static str,
    field: &'static str,
}

const fn fts_index_specs() -> [FtsIndexSpec; 4] {
    [
        FtsIndexSpec {
            index_name: "idx_fts_chunk_text",
            table: "chunk",
            field: "text",
        },
        FtsIndexSpec {
            index_name: "idx_fts_document_title",
            table: "document",
            field: "title",
        },
        FtsIndexSpec {
            index_name: "idx_fts_graph_node_name",
            table: "graph_node",
            field: "name",
        },
        FtsIndexSpec {
            index_name: "idx_fts_graph_node_description",
            table: "graph_node",
            field: "description",
        },
    ]
}

impl HnswIndexSpec {
    fn definition_if_not_exists(&self, dimension: usize) -> String {
        format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} \
             FIELDS embedding HNSW DIMENSION {dimension} {options};",
            index = self.index_name,
            table = self.table,
            dimension = dimension,
            options = self.options,
        )
    }

    fn definition_overwrite(&self, dimension: usize) -> String {
        format!(
            "DEFINE INDEX OVERWRITE {index} ON TABLE {table} \
             FIELDS embedding HNSW DIMENSION {dimension} {options};",
            index = self.index_name,
            table = self.table,
            dimension = dimension,
            options = self.options,
        )
    }
}

impl FtsIndexSpec {
    fn definition(&self) -> String {
        format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} \
             FIELDS {field} SEARCH ANALYZER {analyzer} BM25 CONCURRENTLY;",
            index = self.index_name,
            table = self.table,
            field = self.field,
            analyzer = FTS_ANALYZER_NAME,
        )
    }
}

/// Build (or repair) every runtime index this crate relies on. Idempotent:
/// safe to call on every process start (`SurrealDbClient::ensure_initialized`).
pub async fn build_indexes(db: &SurrealDbClient) -> Result<(), AppError> {
    build_indexes_with_dimension(db, 1536).await
}

/// As [`build_indexes`], but with an explicit embedding dimension — used
/// when re-embedding with a different model changes the HNSW width.
pub async fn build_indexes_with_dimension(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<(), AppError> {
    create_fts_analyzer(db).await?;

    for spec in fts_index_specs() {
        if index_exists(db, spec.table, spec.index_name).await? {
            continue;
        }
        create_index_with_polling(db, spec.definition(), spec.index_name, spec.table).await?;
    }

    match existing_hnsw_dimension(db, &CHUNK_EMBEDDING_INDEX).await? {
        None => {
            create_index_with_polling(
                db,
                CHUNK_EMBEDDING_INDEX.definition_if_not_exists(embedding_dimension),
                CHUNK_EMBEDDING_INDEX.index_name,
                CHUNK_EMBEDDING_INDEX.table,
            )
            .await?;
        }
        Some(current) if current == embedding_dimension => {}
        Some(current) => {
            warn!(
                index = CHUNK_EMBEDDING_INDEX.index_name,
                existing_dimension = current,
                target_dimension = embedding_dimension,
                "overwriting HNSW index to match new embedding dimension"
            );
            create_index_with_polling(
                db,
                CHUNK_EMBEDDING_INDEX.definition_overwrite(embedding_dimension),
                CHUNK_EMBEDDING_INDEX.index_name,
                CHUNK_EMBEDDING_INDEX.table,
            )
            .await?;
        }
    }

    Ok(())
}

async fn create_fts_analyzer(db: &SurrealDbClient) -> Result<(), AppError> {
    let snowball = format!(
        "DEFINE ANALYZER IF NOT EXISTS {analyzer} TOKENIZERS class FILTERS lowercase, ascii, snowball(english);",
        analyzer = FTS_ANALYZER_NAME
    );
    if db.client.query(snowball).await.and_then(|r| r.check()).is_ok() {
        return Ok(());
    }

    warn!("snowball analyzer unavailable, falling back to lowercase+ascii only");
    let fallback = format!(
        "DEFINE ANALYZER IF NOT EXISTS {analyzer} TOKENIZERS class FILTERS lowercase, ascii;",
        analyzer = FTS_ANALYZER_NAME
    );
    db.client
        .query(fallback)
        .await
        .map_err(AppError::Database)?
        .check()
        .map_err(AppError::Database)?;
    Ok(())
}

async fn create_index_with_polling(
    db: &SurrealDbClient,
    definition: String,
    index_name: &str,
    table: &str,
) -> Result<(), AppError> {
    const MAX_ATTEMPTS: usize = 3;
    let mut attempts = 0;
    loop {
        attempts += 1;
        let res = db
            .client
            .query(definition.clone())
            .await
            .map_err(AppError::Database)?;
        match res.check() {
            Ok(_) => break,
            Err(err) => {
                let conflict = err.to_string().contains("read or write conflict");
                if conflict && attempts < MAX_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                return Err(AppError::Database(err));
            }
        }
    }

    poll_until_ready(db, index_name, table).await
}

async fn poll_until_ready(
    db: &SurrealDbClient,
    index_name: &str,
    table: &str,
) -> Result<(), AppError> {
    loop {
        tokio::time::sleep(INDEX_POLL_INTERVAL).await;

        let info_query = format!("INFO FOR INDEX {index_name} ON TABLE {table};");
        let mut response = db
            .client
            .query(info_query)
            .await
            .map_err(AppError::Database)?;
        let info: Option<Value> = response.take(0).map_err(AppError::Database)?;

        let status = info
            .as_ref()
            .and_then(|v| v.get("building"))
            .and_then(|b| b.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("ready")
            .to_string();

        debug!(index = index_name, table, status = %status, "index build status");

        if status.eq_ignore_ascii_case("error") {
            return Err(AppError::InternalError(format!(
                "index {index_name} on {table} entered error state while building"
            )));
        }
        if !status.eq_ignore_ascii_case("building") && !status.eq_ignore_ascii_case("started") {
            return Ok(());
        }
    }
}

async fn existing_hnsw_dimension(
    db: &SurrealDbClient,
    spec: &HnswIndexSpec,
) -> Result<Option<usize>, AppError> {
    let indexes = table_index_definitions(db, spec.table).await?;
    let Some(indexes) = indexes else {
        return Ok(None);
    };
    let definition = indexes
        .get(spec.index_name)
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    Ok(definition.and_then(|d| extract_dimension(&d)))
}

fn extract_dimension(definition: &str) -> Option<usize> {
    definition
        .split("DIMENSION")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.trim_end_matches(';').parse::<usize>().ok())
}

async fn table_index_definitions(
    db: &SurrealDbClient,
    table: &str,
) -> Result<Option<Map<String, Value>>, AppError> {
    let info_query = format!("INFO FOR TABLE {table};");
    let mut response = db
        .client
        .query(info_query)
        .await
        .map_err(AppError::Database)?;
    let info: surrealdb::Value = response.take(0).map_err(AppError::Database)?;
    let info_json: Value = serde_json::to_value(info)
        .map_err(|e| AppError::InternalError(format!("serializing table info: {e}")))?;

    Ok(info_json
        .get("Object")
        .and_then(|o| o.get("indexes"))
        .and_then(|i| i.get("Object"))
        .and_then(|i| i.as_object())
        .cloned())
}

async fn index_exists(db: &SurrealDbClient, table: &str, index_name: &str) -> Result<bool, AppError> {
    let indexes = table_index_definitions(db, table).await?;
    Ok(indexes.is_some_and(|map| map.contains_key(index_name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn extracts_dimension_from_definition() {
        let def = "DEFINE INDEX idx ON TABLE chunk_embedding FIELDS embedding HNSW DIMENSION 1536 DIST COSINE;";
        assert_eq!(extract_dimension(def), Some(1536));
    }

    #[test]
    fn missing_dimension_token_returns_none() {
        assert_eq!(extract_dimension("DEFINE INDEX idx ON TABLE x FIELDS y;"), None);
    }

    #[tokio::test]
    async fn build_indexes_is_idempotent_on_memory_db() {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("ns", database)
            .await
            .expect("start in-memory db");
        build_indexes_with_dimension(&db, 8)
            .await
            .expect("first build");
        build_indexes_with_dimension(&db, 8)
            .await
            .expect("second build should be a no-op");
    }
}
