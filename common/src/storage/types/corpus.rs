//! Corpus version counter (spec.md §4.6, §4.7 step 5). No teacher
//! analogue — the teacher has no cache to invalidate, so this is new:
//! a singleton row whose monotonically increasing `version` feeds every
//! cache fingerprint ([`crate::cache::fingerprint`]) and is bumped once
//! per successful ingestion commit.

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(CorpusVersion, "corpus_version", {
    version: u64
});

const SINGLETON_ID: &str = "singleton";

impl CorpusVersion {
    /// Current version, or `0` if ingestion has never committed.
    pub async fn current(db: &SurrealDbClient) -> Result<u64, AppError> {
        Ok(db
            .get_item::<Self>(SINGLETON_ID)
            .await
            .map_err(AppError::Database)?
            .map_or(0, |v| v.version))
    }

    /// Atomically increments and returns the new version. Callers must
    /// serialize their own calls (the ingestion orchestrator holds a
    /// single commit-wide lock around this, spec.md §5's "mutation is
    /// serialized"); this alone only guards against a missing row.
    pub async fn bump(db: &SurrealDbClient) -> Result<u64, AppError> {
        let sql = format!(
            "UPDATE type::thing('{table}', '{id}') SET version += 1 RETURN AFTER;",
            table = Self::table_name(),
            id = SINGLETON_ID,
        );
        let mut response = db.client.query(sql).await.map_err(AppError::Database)?;
        let updated: Vec<Self> = response.take(0).map_err(AppError::Database)?;
        if let Some(row) = updated.into_iter().next() {
            return Ok(row.version);
        }

        let now = Utc::now();
        let record = Self {
            id: SINGLETON_ID.to_string(),
            created_at: now,
            updated_at: now,
            version: 1,
        };
        db.client
            .upsert((Self::table_name(), SINGLETON_ID))
            .content(record)
            .await
            .map_err(AppError::Database)?;
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_is_zero_before_any_bump() {
        let db = SurrealDbClient::memory("ns", "corpus_test").await.unwrap();
        db.ensure_initialized().await.unwrap();
        assert_eq!(CorpusVersion::current(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bump_is_monotonically_increasing() {
        let db = SurrealDbClient::memory("ns", "corpus_test2").await.unwrap();
        db.ensure_initialized().await.unwrap();

        assert_eq!(CorpusVersion::bump(&db).await.unwrap(), 1);
        assert_eq!(CorpusVersion::bump(&db).await.unwrap(), 2);
        assert_eq!(CorpusVersion::bump(&db).await.unwrap(), 3);
        assert_eq!(CorpusVersion::current(&db).await.unwrap(), 3);
    }
}
