//! Source entity (spec.md §3). No teacher analogue — sources are config
//! in the teacher (`SystemSettings`), here promoted to a persisted record
//! so a crawl run can record its own caps and be queried back by id.

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(Source, "source", {
    name: String,
    root_url: String,
    category: String,
    max_depth: u32,
    max_pages: u32,
    delay_ms: u64,
    respect_robots_txt: bool
});

impl Source {
    pub fn new(
        name: String,
        root_url: String,
        category: String,
        max_depth: u32,
        max_pages: u32,
        delay_ms: u64,
        respect_robots_txt: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name,
            root_url,
            category,
            max_depth,
            max_pages,
            delay_ms,
            respect_robots_txt,
        }
    }

    /// Idempotent upsert by id, matching the config-driven "created by
    /// config, immutable within a crawl run" lifecycle (spec.md §3).
    pub async fn upsert(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .upsert((Self::table_name(), self.id.clone()))
            .content(self)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn all(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        db.get_all_stored_items::<Self>().await.map_err(AppError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariants_hold_for_config_shaped_source() {
        let source = Source::new(
            "Rust Docs".into(),
            "https://doc.rust-lang.org".into(),
            "language".into(),
            3,
            500,
            250,
            true,
        );
        assert!(!source.id.is_empty());
        assert!(source.max_pages >= 1);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let db = SurrealDbClient::memory("ns", "src_test").await.unwrap();
        db.ensure_initialized().await.unwrap();

        let source = Source::new(
            "Docs".into(),
            "https://example.com".into(),
            "misc".into(),
            2,
            10,
            100,
            true,
        );
        let id = source.id.clone();
        source.clone().upsert(&db).await.unwrap();
        source.upsert(&db).await.unwrap();

        let all = Source::all(&db).await.unwrap();
        assert_eq!(all.iter().filter(|s| s.id == id).count(), 1);
    }
}
