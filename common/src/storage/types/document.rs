//! Document entity (spec.md §3). Generalizes the teacher's `text_content.rs`
//! shape (a fetched unit of text scoped to a source) to a crawled page:
//! `source_id`, `url`, `title`, `fetched_at`, `raw_hash`.

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(Document, "document", {
    source_id: String,
    url: String,
    title: String,
    fetched_at: DateTime<Utc>,
    raw_hash: String
});

impl Document {
    pub fn new(source_id: String, url: String, title: String, raw_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_id,
            url,
            title,
            fetched_at: now,
            raw_hash,
        }
    }

    /// Looks up a document by source + normalized URL — the dedup key the
    /// crawler checks before emitting a raw fetch (spec.md §4.1, §4.7.1).
    pub async fn find_by_source_and_url(
        db: &SurrealDbClient,
        source_id: &str,
        url: &str,
    ) -> Result<Option<Self>, AppError> {
        let sql = format!(
            "SELECT * FROM {table} WHERE source_id = $source_id AND url = $url LIMIT 1;",
            table = Self::table_name()
        );
        let mut response = db
            .client
            .query(sql)
            .bind(("source_id", source_id.to_owned()))
            .bind(("url", url.to_owned()))
            .await
            .map_err(AppError::Database)?;
        let rows: Vec<Self> = response.take(0).map_err(AppError::Database)?;
        Ok(rows.into_iter().next())
    }

    /// Idempotent upsert by id (spec.md §3: "replaced when raw-hash changes").
    pub async fn upsert(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .upsert((Self::table_name(), self.id.clone()))
            .content(self)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    /// Cascades to the document's chunks/embeddings (see
    /// `Chunk::delete_by_document`) and the graph's APPEARS_IN edges (see
    /// `GraphNode::delete_document`); this only removes the document row
    /// itself.
    pub async fn delete(db: &SurrealDbClient, id: &str) -> Result<Option<Self>, AppError> {
        db.delete_item::<Self>(id).await.map_err(AppError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn find_by_source_and_url_matches_only_same_pair() {
        let db = SurrealDbClient::memory("ns", "doc_test").await.unwrap();
        db.ensure_initialized().await.unwrap();

        let doc = Document::new(
            "src-a".into(),
            "https://example.com/page".into(),
            "Page".into(),
            "hash1".into(),
        );
        doc.clone().upsert(&db).await.unwrap();

        let found = Document::find_by_source_and_url(&db, "src-a", "https://example.com/page")
            .await
            .unwrap();
        assert_eq!(found.map(|d| d.id), Some(doc.id));

        let missing = Document::find_by_source_and_url(&db, "src-b", "https://example.com/page")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn replacing_raw_hash_updates_in_place() {
        let db = SurrealDbClient::memory("ns", "doc_test2").await.unwrap();
        db.ensure_initialized().await.unwrap();

        let mut doc = Document::new(
            "src-a".into(),
            "https://example.com/page".into(),
            "Page".into(),
            "hash1".into(),
        );
        let id = doc.id.clone();
        doc.clone().upsert(&db).await.unwrap();

        doc.raw_hash = "hash2".into();
        doc.upsert(&db).await.unwrap();

        let fetched: Option<Document> = db.get_item(&id).await.unwrap();
        assert_eq!(fetched.unwrap().raw_hash, "hash2");
    }
}
