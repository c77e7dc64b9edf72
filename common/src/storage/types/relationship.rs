//! Typed graph edges (spec.md §3, §4.5). Generalizes the teacher's
//! `knowledge_relationship.rs` (a single untyped `relates_to` RELATE edge)
//! to the six kinds spec.md names, with commutative merge-on-upsert
//! (`strength = max`, `evidence = sum`) and DEPENDS_ON cycle rejection.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::graph::{GraphNode, NodeKind},
    },
    stored_object,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RelationshipKind {
    Documents,
    DependsOn,
    IntegratesWith,
    RelatedTo,
    ContainsConcept,
    AppearsIn,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Documents => "DOCUMENTS",
            Self::DependsOn => "DEPENDS_ON",
            Self::IntegratesWith => "INTEGRATES_WITH",
            Self::RelatedTo => "RELATED_TO",
            Self::ContainsConcept => "CONTAINS_CONCEPT",
            Self::AppearsIn => "APPEARS_IN",
        };
        f.write_str(s)
    }
}

stored_object!(Relationship, "relationship", {
    kind: RelationshipKind,
    source_id: String,
    target_id: String,
    framework: Option<String>,
    strength: f32,
    evidence_count: u32
});

impl Relationship {
    /// Upserts an edge, merging strength (max) and evidence (sum) with any
    /// existing edge of the same `(kind, source, target)` (spec.md §4.5).
    /// Rejects `DEPENDS_ON` edges that would create a cycle.
    pub async fn upsert_edge(
        db: &SurrealDbClient,
        kind: RelationshipKind,
        source_id: &str,
        target_id: &str,
        framework: Option<String>,
        strength: f32,
        evidence_count: u32,
    ) -> Result<Self, AppError> {
        if kind == RelationshipKind::DependsOn {
            if source_id == target_id {
                return Err(AppError::CycleRejected);
            }
            if Self::would_create_cycle(db, source_id, target_id, framework.as_deref()).await? {
                return Err(AppError::CycleRejected);
            }
        }

        let existing = Self::find(db, kind, source_id, target_id).await?;
        let (id, created_at, merged_strength, merged_evidence) = match existing {
            Some(prior) => (
                prior.id,
                prior.created_at,
                prior.strength.max(strength).clamp(0.0, 1.0),
                prior.evidence_count.saturating_add(evidence_count),
            ),
            None => (
                uuid::Uuid::new_v4().to_string(),
                chrono::Utc::now(),
                strength.clamp(0.0, 1.0),
                evidence_count,
            ),
        };

        let record = Self {
            id,
            created_at,
            updated_at: chrono::Utc::now(),
            kind,
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            framework,
            strength: merged_strength,
            evidence_count: merged_evidence,
        };

        db.client
            .upsert((Self::table_name(), record.id.clone()))
            .content(record.clone())
            .await
            .map_err(AppError::Database)?;

        Ok(record)
    }

    async fn find(
        db: &SurrealDbClient,
        kind: RelationshipKind,
        source_id: &str,
        target_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let sql = format!(
            "SELECT * FROM {table} WHERE kind = $kind AND source_id = $source_id AND target_id = $target_id LIMIT 1;",
            table = Self::table_name()
        );
        let mut response = db
            .client
            .query(sql)
            .bind(("kind", kind))
            .bind(("source_id", source_id.to_owned()))
            .bind(("target_id", target_id.to_owned()))
            .await
            .map_err(AppError::Database)?;
        let rows: Vec<Self> = response.take(0).map_err(AppError::Database)?;
        Ok(rows.into_iter().next())
    }

    async fn depends_on_adjacency(
        db: &SurrealDbClient,
        framework: Option<&str>,
    ) -> Result<HashMap<String, Vec<String>>, AppError> {
        let sql = if framework.is_some() {
            format!(
                "SELECT * FROM {table} WHERE kind = $kind AND framework = $framework;",
                table = Self::table_name()
            )
        } else {
            format!("SELECT * FROM {table} WHERE kind = $kind;", table = Self::table_name())
        };
        let mut query = db.client.query(sql).bind(("kind", RelationshipKind::DependsOn));
        if let Some(f) = framework {
            query = query.bind(("framework", f.to_string()));
        }
        let mut response = query.await.map_err(AppError::Database)?;
        let rows: Vec<Self> = response.take(0).map_err(AppError::Database)?;

        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            adjacency.entry(row.source_id).or_default().push(row.target_id);
        }
        Ok(adjacency)
    }

    /// Bounded DFS from the proposed target back to the proposed source:
    /// if `target` can already reach `source`, adding `source -> target`
    /// would close a cycle. Scoped to edges sharing `framework` when given,
    /// else the whole graph (spec.md §9 Open Question, resolved in DESIGN.md).
    async fn would_create_cycle(
        db: &SurrealDbClient,
        source_id: &str,
        target_id: &str,
        framework: Option<&str>,
    ) -> Result<bool, AppError> {
        const MAX_DEPTH: usize = 64;
        let adjacency = Self::depends_on_adjacency(db, framework).await?;

        let mut visited = HashSet::new();
        let mut frontier = VecDeque::new();
        frontier.push_back((target_id.to_string(), 0usize));
        visited.insert(target_id.to_string());

        while let Some((node, depth)) = frontier.pop_front() {
            if node == source_id {
                return Ok(true);
            }
            if depth >= MAX_DEPTH {
                continue;
            }
            if let Some(next) = adjacency.get(&node) {
                for n in next {
                    if visited.insert(n.clone()) {
                        frontier.push_back((n.clone(), depth + 1));
                    }
                }
            }
        }
        Ok(false)
    }

    /// Bounded-depth neighbor traversal (spec.md §4.5), ordered
    /// `(depth asc, strength desc, target id asc)`. Edges are walked in
    /// both directions — an anchor reaches nodes it points at and nodes
    /// that point at it — matching the teacher's `find_entities_by_relationship_by_id`,
    /// which checks `rel.in_`/`rel.out` against the anchor in either role.
    pub async fn neighbors(
        db: &SurrealDbClient,
        anchors: &[String],
        kinds: &[RelationshipKind],
        depth: u32,
    ) -> Result<Vec<(GraphNode, u32)>, AppError> {
        let sql = format!(
            "SELECT * FROM {table} WHERE kind IN $kinds;",
            table = Self::table_name()
        );
        let mut response = db
            .client
            .query(sql)
            .bind(("kinds", kinds.to_vec()))
            .await
            .map_err(AppError::Database)?;
        let edges: Vec<Self> = response.take(0).map_err(AppError::Database)?;

        let mut adjacency: HashMap<String, Vec<(String, f32)>> = HashMap::new();
        for edge in &edges {
            adjacency
                .entry(edge.source_id.clone())
                .or_default()
                .push((edge.target_id.clone(), edge.strength));
            adjacency
                .entry(edge.target_id.clone())
                .or_default()
                .push((edge.source_id.clone(), edge.strength));
        }

        let mut visited: HashSet<String> = anchors.iter().cloned().collect();
        let mut frontier: VecDeque<(String, u32)> = anchors.iter().map(|a| (a.clone(), 0)).collect();
        let mut found: Vec<(String, u32, f32)> = Vec::new();

        while let Some((node, d)) = frontier.pop_front() {
            if d >= depth {
                continue;
            }
            if let Some(edges) = adjacency.get(&node) {
                for (target, strength) in edges {
                    if visited.insert(target.clone()) {
                        found.push((target.clone(), d + 1, *strength));
                        frontier.push_back((target.clone(), d + 1));
                    }
                }
            }
        }

        found.sort_by(|a, b| {
            a.1.cmp(&b.1)
                .then(b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.0.cmp(&b.0))
        });

        let mut results = Vec::with_capacity(found.len());
        for (id, d, _) in found {
            if let Some(node) = db.get_item::<GraphNode>(&id).await.map_err(AppError::Database)? {
                results.push((node, d));
            }
        }
        Ok(results)
    }

    /// Shortest path by edge count between two nodes, failing with
    /// `NoPath` if none exists within `max_length` hops (spec.md §4.5).
    /// Walked in both directions, same as [`Self::neighbors`].
    pub async fn shortest_path(
        db: &SurrealDbClient,
        source_id: &str,
        target_id: &str,
        max_length: u32,
    ) -> Result<Vec<Self>, AppError> {
        let sql = format!("SELECT * FROM {table};", table = Self::table_name());
        let mut response = db.client.query(sql).await.map_err(AppError::Database)?;
        let edges: Vec<Self> = response.take(0).map_err(AppError::Database)?;

        let mut adjacency: HashMap<String, Vec<Self>> = HashMap::new();
        for edge in edges {
            adjacency.entry(edge.source_id.clone()).or_default().push(edge.clone());
            adjacency.entry(edge.target_id.clone()).or_default().push(edge);
        }

        let mut visited = HashSet::new();
        visited.insert(source_id.to_string());
        let mut frontier = VecDeque::new();
        frontier.push_back((source_id.to_string(), Vec::<Self>::new()));

        while let Some((node, path)) = frontier.pop_front() {
            if node == target_id && !path.is_empty() {
                return Ok(path);
            }
            if path.len() as u32 >= max_length {
                continue;
            }
            if let Some(edges) = adjacency.get(&node) {
                for edge in edges {
                    let next = if edge.source_id == node { edge.target_id.clone() } else { edge.source_id.clone() };
                    if visited.insert(next.clone()) {
                        let mut next_path = path.clone();
                        next_path.push(edge.clone());
                        frontier.push_back((next, next_path));
                    }
                }
            }
        }

        Err(AppError::NoPath)
    }

    /// Removes edges touching `node_id` as either endpoint — used when a
    /// document node is deleted so its APPEARS_IN edges don't dangle.
    pub async fn delete_edges_touching(db: &SurrealDbClient, node_id: &str) -> Result<(), AppError> {
        let sql = format!(
            "DELETE {table} WHERE source_id = $id OR target_id = $id;",
            table = Self::table_name()
        );
        db.client
            .query(sql)
            .bind(("id", node_id.to_owned()))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }
}
