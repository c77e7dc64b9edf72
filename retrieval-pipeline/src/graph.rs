//! Anchor-entity extraction and graph-contribution scoring (spec.md §4.8).
//! Anchor extraction retargets the teacher's `retrieval-pipeline/src/fts.rs`
//! (`find_items_by_fts`'s score-then-hydrate BM25 query shape) onto
//! `graph_node.name`/`graph_node.description`, restricted to
//! `kind IN (Framework, Concept)` — the node kinds spec.md §4.8 names as
//! anchor candidates. Neighbor expansion and path scoring call
//! [`common::storage::types::relationship::Relationship`] directly; this
//! crate adds no BFS/graph-walking logic of its own.

use std::collections::HashMap;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::graph::{GraphNode, NodeKind},
    },
};

#[derive(Debug, serde::Deserialize)]
struct AnchorScoreRow {
    id: String,
    fts_score: f32,
}

/// BM25 search over `graph_node.name`/`.description`, limited to
/// `Framework`/`Concept` nodes, ordered by combined field score (spec.md
/// §4.8: "anchor entities are extracted via full-text match against
/// framework and concept names").
pub async fn extract_anchors(
    db: &SurrealDbClient,
    query_text: &str,
    limit: usize,
) -> Result<Vec<GraphNode>, AppError> {
    let kinds = [NodeKind::Framework, NodeKind::Concept];
    let sql = "
        SELECT id,
            (IF search::score(0) != NONE THEN search::score(0) ELSE 0 END)
            + (IF search::score(1) != NONE THEN search::score(1) ELSE 0 END) AS fts_score
        FROM graph_node
        WHERE (name @0@ $terms OR description @1@ $terms)
          AND kind IN $kinds
        ORDER BY fts_score DESC
        LIMIT $limit;
    "
    .to_string();

    let mut response = db
        .client
        .query(sql)
        .bind(("terms", query_text.to_owned()))
        .bind(("kinds", kinds.to_vec()))
        .bind(("limit", limit as i64))
        .await
        .map_err(AppError::Database)?;
    let score_rows: Vec<AnchorScoreRow> = response.take(0).map_err(AppError::Database)?;
    if score_rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut nodes = Vec::with_capacity(score_rows.len());
    for row in &score_rows {
        if let Some(node) = db.get_item::<GraphNode>(&row.id).await.map_err(AppError::Database)? {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

/// Document nodes reachable from `anchors` within `depth` hops, deduped to
/// one entry per document (spec.md §4.8 GRAPH_ONLY: neighbors are fetched,
/// then filtered to documents). Each entry carries the anchor-to-node edge
/// strength used as that document's graph contribution.
pub async fn document_neighbors(
    db: &SurrealDbClient,
    anchors: &[String],
    depth: u32,
) -> Result<HashMap<String, f32>, AppError> {
    use common::storage::types::relationship::RelationshipKind;

    let kinds = [
        RelationshipKind::Documents,
        RelationshipKind::ContainsConcept,
        RelationshipKind::RelatedTo,
        RelationshipKind::AppearsIn,
    ];
    let neighbors = common::storage::types::relationship::Relationship::neighbors(db, anchors, &kinds, depth).await?;

    let mut by_document: HashMap<String, f32> = HashMap::new();
    for (node, node_depth) in neighbors {
        if node.kind != NodeKind::Document {
            continue;
        }
        let strength = 1.0 / (1.0 + node_depth as f32);
        by_document
            .entry(node.external_id)
            .and_modify(|existing| {
                if strength > *existing {
                    *existing = strength;
                }
            })
            .or_insert(strength);
    }
    Ok(by_document)
}

/// Concept/framework names reachable from `anchors` within `hops`, used to
/// augment the filter set before `CONCEPT_EXPANSION` repeats semantic search
/// (spec.md §4.8: "expand anchor concepts by one traversal hop").
pub async fn expand_topics(db: &SurrealDbClient, anchors: &[String], hops: u32) -> Result<Vec<String>, AppError> {
    use common::storage::types::relationship::RelationshipKind;

    let kinds = [
        RelationshipKind::ContainsConcept,
        RelationshipKind::RelatedTo,
        RelationshipKind::AppearsIn,
    ];
    let neighbors = common::storage::types::relationship::Relationship::neighbors(db, anchors, &kinds, hops).await?;

    Ok(neighbors
        .into_iter()
        .filter(|(node, _)| matches!(node.kind, NodeKind::Concept | NodeKind::Framework))
        .map(|(node, _)| node.external_id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::relationship::{Relationship, RelationshipKind};

    async fn seed_node(db: &SurrealDbClient, kind: NodeKind, id: &str, name: &str, description: &str) {
        GraphNode::new(kind, id.into(), name.into(), description.into(), None, None)
            .upsert_node(db)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn extract_anchors_matches_only_framework_and_concept_nodes() {
        let db = SurrealDbClient::memory("ns", "anchor_test").await.unwrap();
        db.ensure_initialized().await.unwrap();

        seed_node(&db, NodeKind::Framework, "axum", "Axum", "Rust web framework").await;
        seed_node(&db, NodeKind::Document, "doc-1", "Axum guide", "Axum routing guide").await;

        let anchors = extract_anchors(&db, "axum", 5).await.unwrap();
        assert!(!anchors.is_empty(), "expected the framework node to match");
        assert!(anchors.iter().all(|n| n.kind != NodeKind::Document));
    }

    #[tokio::test]
    async fn document_neighbors_follows_appears_in_from_a_concept_anchor() {
        let db = SurrealDbClient::memory("ns", "doc_neighbor_test").await.unwrap();
        db.ensure_initialized().await.unwrap();

        seed_node(&db, NodeKind::Concept, "routing", "Routing", "").await;
        seed_node(&db, NodeKind::Document, "doc-1", "Guide", "").await;
        let concept_id = GraphNode::composite_id(NodeKind::Concept, "routing");
        let document_id = GraphNode::composite_id(NodeKind::Document, "doc-1");
        Relationship::upsert_edge(&db, RelationshipKind::AppearsIn, &concept_id, &document_id, None, 0.7, 1)
            .await
            .unwrap();

        let found = document_neighbors(&db, &[concept_id], 1).await.unwrap();
        assert_eq!(found.get("doc-1"), Some(&0.5));
    }

    #[tokio::test]
    async fn expand_topics_collects_related_concept_names() {
        let db = SurrealDbClient::memory("ns", "expand_topics_test").await.unwrap();
        db.ensure_initialized().await.unwrap();

        seed_node(&db, NodeKind::Framework, "axum", "Axum", "").await;
        seed_node(&db, NodeKind::Concept, "routing", "Routing", "").await;
        let framework_id = GraphNode::composite_id(NodeKind::Framework, "axum");
        let concept_id = GraphNode::composite_id(NodeKind::Concept, "routing");
        Relationship::upsert_edge(&db, RelationshipKind::ContainsConcept, &framework_id, &concept_id, Some("axum".into()), 0.8, 1)
            .await
            .unwrap();

        let topics = expand_topics(&db, &[framework_id], 1).await.unwrap();
        assert!(topics.contains(&"routing".to_string()));
    }
}
