//! Graph nodes (spec.md §3, §4.5). Generalizes the teacher's
//! `knowledge_entity.rs` (`KnowledgeEntityType` + `vector_search`) to typed,
//! edge-addressable nodes for documents, concepts, frameworks, and topics —
//! this crate's graph has no per-node embedding, only identity + metadata,
//! since graph traversal (not similarity) is how C4 is queried.

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    Document,
    Concept,
    Framework,
    Topic,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Document => "document",
            Self::Concept => "concept",
            Self::Framework => "framework",
            Self::Topic => "topic",
        };
        f.write_str(s)
    }
}

stored_object!(GraphNode, "graph_node", {
    kind: NodeKind,
    external_id: String,
    name: String,
    description: String,
    category: Option<String>,
    language: Option<String>,
    frequency: u32
});

impl GraphNode {
    /// Composite key so `(kind, external_id)` is unique (spec.md §4.5:
    /// "idempotent by (kind, id)").
    pub fn composite_id(kind: NodeKind, external_id: &str) -> String {
        format!("{kind}__{external_id}")
    }

    pub fn new(
        kind: NodeKind,
        external_id: String,
        name: String,
        description: String,
        category: Option<String>,
        language: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Self::composite_id(kind, &external_id),
            created_at: now,
            updated_at: now,
            kind,
            external_id,
            name,
            description,
            category,
            language,
            frequency: 0,
        }
    }

    /// Idempotent upsert; re-observing an existing node bumps its
    /// frequency rather than overwriting it (spec.md §3: "frequency ≥ 0",
    /// accumulated as evidence is observed).
    pub async fn upsert_node(self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let existing: Option<Self> = db.get_item(&self.id).await.map_err(AppError::Database)?;
        let mut record = self;
        if let Some(prior) = existing {
            record.frequency = prior.frequency.saturating_add(1);
            record.created_at = prior.created_at;
        } else {
            record.frequency = 1;
        }

        db.client
            .upsert((Self::table_name(), record.id.clone()))
            .content(record.clone())
            .await
            .map_err(AppError::Database)?;
        Ok(record)
    }

    pub async fn get(db: &SurrealDbClient, kind: NodeKind, external_id: &str) -> Result<Option<Self>, AppError> {
        db.get_item::<Self>(&Self::composite_id(kind, external_id))
            .await
            .map_err(AppError::Database)
    }

    /// Removes the document node; its APPEARS_IN edges are removed
    /// separately by `Relationship::delete_edges_touching` (other node
    /// kinds persist, per spec.md §4.5).
    pub async fn delete_document(db: &SurrealDbClient, document_id: &str) -> Result<(), AppError> {
        let id = Self::composite_id(NodeKind::Document, document_id);
        db.delete_item::<Self>(&id).await.map_err(AppError::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_node_is_idempotent_by_kind_and_external_id() {
        let db = SurrealDbClient::memory("ns", "graph_node_test").await.unwrap();
        db.ensure_initialized().await.unwrap();

        let node = GraphNode::new(
            NodeKind::Framework,
            "axum".into(),
            "Axum".into(),
            "Rust web framework".into(),
            Some("web".into()),
            Some("rust".into()),
        );
        let first = node.clone().upsert_node(&db).await.unwrap();
        assert_eq!(first.frequency, 1);

        let second = node.upsert_node(&db).await.unwrap();
        assert_eq!(second.frequency, 2);
        assert_eq!(second.id, first.id);
    }

    #[tokio::test]
    async fn delete_document_removes_only_the_document_node() {
        let db = SurrealDbClient::memory("ns", "graph_node_del_test").await.unwrap();
        db.ensure_initialized().await.unwrap();

        let doc_node = GraphNode::new(NodeKind::Document, "doc-1".into(), "Page".into(), String::new(), None, None);
        let concept_node = GraphNode::new(
            NodeKind::Concept,
            "routing".into(),
            "Routing".into(),
            String::new(),
            None,
            None,
        );
        doc_node.upsert_node(&db).await.unwrap();
        concept_node.upsert_node(&db).await.unwrap();

        GraphNode::delete_document(&db, "doc-1").await.unwrap();

        assert!(GraphNode::get(&db, NodeKind::Document, "doc-1").await.unwrap().is_none());
        assert!(GraphNode::get(&db, NodeKind::Concept, "routing").await.unwrap().is_some());
    }
}
