//! `GraphStore`: the single entry point onto the typed memory graph.
//!
//! Wraps `Mutex<Connection>` — one writer at a time, no pool, no async
//! driver. Every method takes `&self` and locks for the duration of its
//! own statement(s).

use std::path::Path;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, instrument};

use crate::db::run_migrations;
use crate::error::{GraphError, Result};
use crate::stemmer::stem_topic_words;
use crate::types::{Edge, Embedding, Node, NodeType, Relationship};
use crate::vector::{decode_vector, encode_vector, search_similar, ScoredNodeId, VectorFilter};

pub struct GraphStore {
    conn: Mutex<Connection>,
}

impl GraphStore {
    /// Open (creating if absent) the SQLite database at `path` and run any
    /// pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Wrap an already-open connection (tests use `Connection::open_in_memory`).
    pub fn from_connection(conn: Connection) -> Result<Self> {
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- mutations --------------------------------------------------

    #[instrument(skip(self, node))]
    pub fn create_node(&self, node: Node) -> Result<Node> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO nodes (id, node_type, subtype, content, salience, confidence,
                source, created_at, valid_from, valid_until, superseded_by, attributes,
                can_summarize, scope)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                node.id,
                node.node_type.to_string(),
                node.subtype,
                node.content,
                node.salience,
                node.confidence,
                node.source.to_string(),
                node.created_at,
                node.valid_from,
                node.valid_until,
                node.superseded_by,
                node.attributes.to_string(),
                node.can_summarize as i64,
                node.scope,
            ],
        )?;
        debug!(id = %node.id, node_type = %node.node_type, "node created");
        Ok(node)
    }

    pub fn create_edge(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: &str,
        attributes: serde_json::Value,
    ) -> Result<Edge> {
        let edge = Edge {
            id: uuid::Uuid::now_v7().to_string(),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            edge_type: edge_type.to_string(),
            attributes,
            created_at: Utc::now().to_rfc3339(),
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO edges (id, source_id, target_id, edge_type, attributes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                edge.id,
                edge.source_id,
                edge.target_id,
                edge.edge_type,
                edge.attributes.to_string(),
                edge.created_at,
            ],
        )?;
        Ok(edge)
    }

    pub fn insert_embedding(&self, node_id: &str, node_type: NodeType, vector: &[f32]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO embeddings (node_id, node_type, vector) VALUES (?1, ?2, ?3)",
            params![node_id, node_type.to_string(), encode_vector(vector)],
        )?;
        Ok(())
    }

    pub fn get_embedding(&self, node_id: &str) -> Result<Option<Embedding>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT node_id, node_type, vector FROM embeddings WHERE node_id = ?1",
            params![node_id],
            |row| {
                let node_type: String = row.get(1)?;
                let blob: Vec<u8> = row.get(2)?;
                Ok(Embedding {
                    node_id: row.get(0)?,
                    node_type: node_type.parse().unwrap_or(NodeType::Entity),
                    vector: decode_vector(&blob),
                })
            },
        )
        .optional()
        .map_err(GraphError::from)
    }

    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM nodes WHERE id = ?1", params![id], row_to_node)
            .optional()
            .map_err(GraphError::from)
    }

    /// Cascading delete: edges incident to the node, its embedding, then the
    /// node itself.
    #[instrument(skip(self))]
    pub fn delete_node(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM edges WHERE source_id = ?1 OR target_id = ?1",
            params![id],
        )?;
        conn.execute("DELETE FROM embeddings WHERE node_id = ?1", params![id])?;
        conn.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
        debug!(id, "node deleted");
        Ok(())
    }

    /// Create a new node carrying `new_content` (same type/subtype/scope as
    /// `old_id`), re-point every edge incident to `old_id` onto the new
    /// node (deduplicated by original edge id, so a node with both an
    /// outgoing and incoming copy of the same edge only gets one new edge
    /// each), and mark `old_id` superseded. Returns the new node (spec §4.1:
    /// supersession, never mutation).
    #[instrument(skip(self, new_content))]
    pub fn supersede_node(&self, old_id: &str, new_content: impl Into<String>) -> Result<Node> {
        let old = self
            .get_node(old_id)?
            .ok_or_else(|| GraphError::NodeNotFound { id: old_id.to_string() })?;
        if let Some(by) = &old.superseded_by {
            return Err(GraphError::AlreadySuperseded {
                id: old_id.to_string(),
                superseded_by: by.clone(),
            });
        }

        let mut new_node = Node::new(old.node_type, new_content.into(), old.source);
        new_node.subtype = old.subtype.clone();
        new_node.scope = old.scope;
        new_node.attributes = old.attributes.clone();
        let new_node = self.create_node(new_node)?;

        let incident = self.relationships(old_id)?;
        for rel in incident {
            let (source_id, target_id) = if rel.outgoing {
                (new_node.id.as_str(), rel.far_node.id.as_str())
            } else {
                (rel.far_node.id.as_str(), new_node.id.as_str())
            };
            self.create_edge(source_id, target_id, &rel.edge.edge_type, rel.edge.attributes)?;
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE nodes SET superseded_by = ?1 WHERE id = ?2",
            params![new_node.id, old_id],
        )?;
        debug!(old_id, new_id = %new_node.id, "node superseded");
        Ok(new_node)
    }

    /// Like `supersede_node`, but the replacement already exists (spec
    /// §4.13: the reconciler runs after a new instruction is stored, so a
    /// SUPERSEDES verdict points at that existing node rather than minting
    /// a third one). Copies `old_id`'s incident edges onto `new_id` and
    /// marks `old_id` superseded.
    #[instrument(skip(self))]
    pub fn supersede_with_existing(&self, old_id: &str, new_id: &str) -> Result<()> {
        let old = self
            .get_node(old_id)?
            .ok_or_else(|| GraphError::NodeNotFound { id: old_id.to_string() })?;
        if let Some(by) = &old.superseded_by {
            return Err(GraphError::AlreadySuperseded {
                id: old_id.to_string(),
                superseded_by: by.clone(),
            });
        }

        let incident = self.relationships(old_id)?;
        for rel in incident {
            let (source_id, target_id) = if rel.outgoing {
                (new_id, rel.far_node.id.as_str())
            } else {
                (rel.far_node.id.as_str(), new_id)
            };
            self.create_edge(source_id, target_id, &rel.edge.edge_type, rel.edge.attributes)?;
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE nodes SET superseded_by = ?1 WHERE id = ?2",
            params![new_id, old_id],
        )?;
        debug!(old_id, new_id, "node superseded by existing node");
        Ok(())
    }

    /// Rewrite a plan node into a completed event in place, preserving its
    /// id (spec §4.1 Open Question: identity survives promotion so existing
    /// edges and references keep working).
    #[instrument(skip(self))]
    pub fn promote_plan_to_event(&self, id: &str) -> Result<Node> {
        let node = self
            .get_node(id)?
            .ok_or_else(|| GraphError::NodeNotFound { id: id.to_string() })?;
        if node.node_type != NodeType::Plan {
            return Err(GraphError::InvalidNodeType(format!(
                "promote_plan_to_event called on a {} node",
                node.node_type
            )));
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE nodes SET node_type = ?1, subtype = ?2 WHERE id = ?3",
            params![
                NodeType::Event.to_string(),
                crate::types::subtype::COMPLETED_PLAN,
                id,
            ],
        )?;
        drop(conn);

        if let Some(emb) = self.get_embedding(id)? {
            self.insert_embedding(id, NodeType::Event, &emb.vector)?;
        }

        self.get_node(id)?
            .ok_or_else(|| GraphError::NodeNotFound { id: id.to_string() })
    }

    // ---- queries ------------------------------------------------------

    /// Every edge touching `node_id`, paired with the node at its other end.
    pub fn relationships(&self, node_id: &str) -> Result<Vec<Relationship>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM edges WHERE source_id = ?1 OR target_id = ?1 ORDER BY created_at",
        )?;
        let edges: Vec<Edge> = stmt
            .query_map(params![node_id], row_to_edge)?
            .collect::<rusqlite::Result<_>>()?;

        let mut out = Vec::with_capacity(edges.len());
        for edge in edges {
            let outgoing = edge.source_id == node_id;
            let far_id = if outgoing { &edge.target_id } else { &edge.source_id };
            let far_node = conn
                .query_row("SELECT * FROM nodes WHERE id = ?1", params![far_id], row_to_node)
                .optional()?;
            if let Some(far_node) = far_node {
                out.push(Relationship { edge, far_node, outgoing });
            }
        }
        Ok(out)
    }

    /// Facts and opinions connected to `entity_id` by any edge, not
    /// superseded, ordered by salience descending (spec §4.1).
    pub fn facts_by_entity(&self, entity_id: &str) -> Result<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT n.* FROM nodes n
             JOIN edges e ON (e.source_id = ?1 AND e.target_id = n.id)
                          OR (e.target_id = ?1 AND e.source_id = n.id)
             WHERE n.superseded_by IS NULL
               AND n.node_type IN ('fact', 'opinion')
             ORDER BY n.salience DESC",
        )?;
        let rows = stmt.query_map(params![entity_id], row_to_node)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(GraphError::from)
    }

    /// Events connected to `entity_id`, optionally restricted to the last
    /// `days` days, newest first (spec §4.1).
    pub fn events_by_entity(&self, entity_id: &str, days: Option<i64>) -> Result<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        let cutoff = days.map(|d| (Utc::now() - Duration::days(d)).to_rfc3339());
        let mut sql = String::from(
            "SELECT DISTINCT n.* FROM nodes n
             JOIN edges e ON (e.source_id = ?1 AND e.target_id = n.id)
                          OR (e.target_id = ?1 AND e.source_id = n.id)
             WHERE n.superseded_by IS NULL AND n.node_type = 'event'",
        );
        if cutoff.is_some() {
            sql.push_str(" AND n.created_at >= ?2");
        }
        sql.push_str(" ORDER BY n.created_at DESC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = if let Some(cutoff) = &cutoff {
            stmt.query_map(params![entity_id, cutoff], row_to_node)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map(params![entity_id], row_to_node)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
    }

    /// Ids of every non-superseded event created in the last `days` days,
    /// newest first. Feeds the retrieval planner's "recent activity" net
    /// (spec §4.5).
    pub fn recent_event_ids(&self, days: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let mut stmt = conn.prepare(
            "SELECT id FROM nodes
             WHERE node_type = 'event' AND superseded_by IS NULL AND created_at >= ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(GraphError::from)
    }

    /// Instructions matching `topic` via the stemmer (spec §4.1): every
    /// word of `topic` longer than 2 characters is stemmed, and instructions
    /// whose content contains any stemmed word (case-insensitive substring)
    /// are returned, best match first. With no topic, every non-superseded
    /// instruction is returned ordered by scope descending.
    pub fn instructions(&self, topic: Option<&str>) -> Result<Vec<Node>> {
        let all = self.all_by_type(NodeType::Instruction)?;
        let Some(topic) = topic else {
            let mut all = all;
            all.sort_by(|a, b| b.scope.partial_cmp(&a.scope).unwrap_or(std::cmp::Ordering::Equal));
            return Ok(all);
        };

        let stems = stem_topic_words(topic);
        if stems.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, Node)> = Vec::new();
        for node in all {
            let lower = node.content.to_lowercase();
            let score = stems.iter().filter(|s| lower.contains(s.as_str())).count();
            if score > 0 {
                scored.push((score, node));
            }
        }
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.salience.partial_cmp(&a.1.salience).unwrap_or(std::cmp::Ordering::Equal))
        });
        Ok(scored.into_iter().map(|(_, n)| n).collect())
    }

    /// Instructions with scope ≥ 0.8 — those that apply regardless of
    /// which entity or topic is in play (spec §4.1).
    pub fn global_instructions(&self) -> Result<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM nodes
             WHERE node_type = 'instruction' AND superseded_by IS NULL AND scope >= 0.8
             ORDER BY scope DESC",
        )?;
        let rows = stmt.query_map([], row_to_node)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(GraphError::from)
    }

    /// Instructions linked to `entity_id` by any edge, scope descending
    /// then salience descending as the tiebreaker (spec §4.1).
    pub fn instructions_by_entity(&self, entity_id: &str) -> Result<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT n.* FROM nodes n
             JOIN edges e ON (e.source_id = ?1 AND e.target_id = n.id)
                          OR (e.target_id = ?1 AND e.source_id = n.id)
             WHERE n.superseded_by IS NULL AND n.node_type = 'instruction'
             ORDER BY n.scope DESC, n.salience DESC",
        )?;
        let rows = stmt.query_map(params![entity_id], row_to_node)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(GraphError::from)
    }

    /// Cosine top-K over the embeddings table (spec §4.2). Thin lock-and-
    /// delegate wrapper so callers never reach for the raw `Connection`.
    pub fn search_similar(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<ScoredNodeId>> {
        let conn = self.conn.lock().unwrap();
        search_similar(&conn, query_vec, top_k, filter)
    }

    fn all_by_type(&self, node_type: NodeType) -> Result<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM nodes WHERE node_type = ?1 AND superseded_by IS NULL",
        )?;
        let rows = stmt.query_map(params![node_type.to_string()], row_to_node)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(GraphError::from)
    }
}

fn row_to_node(row: &Row) -> rusqlite::Result<Node> {
    let node_type: String = row.get("node_type")?;
    let source: String = row.get("source")?;
    let attributes: String = row.get("attributes")?;
    let can_summarize: i64 = row.get("can_summarize")?;
    Ok(Node {
        id: row.get("id")?,
        node_type: node_type.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
        })?,
        subtype: row.get("subtype")?,
        content: row.get("content")?,
        salience: row.get("salience")?,
        confidence: row.get("confidence")?,
        source: source.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
        })?,
        created_at: row.get("created_at")?,
        valid_from: row.get("valid_from")?,
        valid_until: row.get("valid_until")?,
        superseded_by: row.get("superseded_by")?,
        attributes: serde_json::from_str(&attributes).unwrap_or(serde_json::json!({})),
        can_summarize: can_summarize != 0,
        scope: row.get("scope")?,
    })
}

fn row_to_edge(row: &Row) -> rusqlite::Result<Edge> {
    let attributes: String = row.get("attributes")?;
    Ok(Edge {
        id: row.get("id")?,
        source_id: row.get("source_id")?,
        target_id: row.get("target_id")?,
        edge_type: row.get("edge_type")?,
        attributes: serde_json::from_str(&attributes).unwrap_or(serde_json::json!({})),
        created_at: row.get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Source;

    fn store() -> GraphStore {
        GraphStore::from_connection(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn create_and_get_node_roundtrips() {
        let store = store();
        let node = store
            .create_node(Node::new(NodeType::Entity, "Alice", Source::User))
            .unwrap();
        let fetched = store.get_node(&node.id).unwrap().unwrap();
        assert_eq!(fetched.content, "Alice");
        assert_eq!(fetched.node_type, NodeType::Entity);
    }

    #[test]
    fn supersede_node_preserves_edges_and_marks_old() {
        let store = store();
        let entity = store
            .create_node(Node::new(NodeType::Entity, "Bob", Source::User))
            .unwrap();
        let fact = store
            .create_node(Node::new(NodeType::Fact, "Bob likes tea", Source::User))
            .unwrap();
        store
            .create_edge(&fact.id, &entity.id, crate::types::edge_type::ABOUT, serde_json::json!({}))
            .unwrap();

        let replacement = store.supersede_node(&fact.id, "Bob likes coffee").unwrap();
        let old = store.get_node(&fact.id).unwrap().unwrap();
        assert_eq!(old.superseded_by.as_deref(), Some(replacement.id.as_str()));

        let rels = store.relationships(&replacement.id).unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].far_node.id, entity.id);
    }

    #[test]
    fn supersede_already_superseded_fails() {
        let store = store();
        let fact = store
            .create_node(Node::new(NodeType::Fact, "v1", Source::User))
            .unwrap();
        store.supersede_node(&fact.id, "v2").unwrap();
        let err = store.supersede_node(&fact.id, "v3").unwrap_err();
        assert!(matches!(err, GraphError::AlreadySuperseded { .. }));
    }

    #[test]
    fn promote_plan_to_event_preserves_id() {
        let store = store();
        let plan = store
            .create_node(Node::new(NodeType::Plan, "Ship report Friday", Source::Assistant))
            .unwrap();
        let promoted = store.promote_plan_to_event(&plan.id).unwrap();
        assert_eq!(promoted.id, plan.id);
        assert_eq!(promoted.node_type, NodeType::Event);
        assert_eq!(promoted.subtype.as_deref(), Some(crate::types::subtype::COMPLETED_PLAN));
    }

    #[test]
    fn facts_by_entity_excludes_superseded() {
        let store = store();
        let entity = store
            .create_node(Node::new(NodeType::Entity, "Carol", Source::User))
            .unwrap();
        let fact = store
            .create_node(Node::new(NodeType::Fact, "Carol's title is VP", Source::User))
            .unwrap();
        store
            .create_edge(&fact.id, &entity.id, crate::types::edge_type::ABOUT, serde_json::json!({}))
            .unwrap();
        store.supersede_node(&fact.id, "Carol's title is SVP").unwrap();

        let facts = store.facts_by_entity(&entity.id).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "Carol's title is SVP");
    }

    #[test]
    fn instructions_topic_match_ranks_by_hit_count() {
        let store = store();
        store
            .create_node(Node::new(
                NodeType::Instruction,
                "When filing GSC reports, always cc finance",
                Source::User,
            ))
            .unwrap();
        store
            .create_node(Node::new(NodeType::Instruction, "Prefer concise replies", Source::User))
            .unwrap();

        let hits = store.instructions(Some("quarterly GSC reporting")).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("GSC"));
    }

    #[test]
    fn global_instructions_filters_by_scope() {
        let store = store();
        let mut broad = Node::new(NodeType::Instruction, "Never use em dashes", Source::User);
        broad.scope = Some(0.9);
        store.create_node(broad).unwrap();

        let mut narrow = Node::new(NodeType::Instruction, "Use metric units for this project", Source::User);
        narrow.scope = Some(0.4);
        store.create_node(narrow).unwrap();

        let globals = store.global_instructions().unwrap();
        assert_eq!(globals.len(), 1);
        assert!(globals[0].content.contains("em dashes"));
    }

    #[test]
    fn recent_event_ids_respects_window() {
        let store = store();
        let event = store
            .create_node(Node::new(NodeType::Event, "Deployed release", Source::Assistant))
            .unwrap();
        let ids = store.recent_event_ids(7).unwrap();
        assert!(ids.contains(&event.id));
    }

    #[test]
    fn supersede_with_existing_points_at_the_given_node() {
        let store = store();
        let old = store
            .create_node(Node::new(NodeType::Instruction, "Reply in a formal tone", Source::User))
            .unwrap();
        let new = store
            .create_node(Node::new(NodeType::Instruction, "Reply in a casual tone", Source::User))
            .unwrap();

        store.supersede_with_existing(&old.id, &new.id).unwrap();
        let refreshed_old = store.get_node(&old.id).unwrap().unwrap();
        assert_eq!(refreshed_old.superseded_by.as_deref(), Some(new.id.as_str()));
    }

    #[test]
    fn instructions_by_entity_matches_any_edge_type_and_breaks_ties_by_salience() {
        let store = store();
        let entity = store
            .create_node(Node::new(NodeType::Entity, "Marcus", Source::User))
            .unwrap();

        let mut low_salience = Node::new(NodeType::Instruction, "Marcus reviews GSC reports", Source::User);
        low_salience.scope = Some(0.5);
        low_salience.salience = 0.4;
        let low_salience = store.create_node(low_salience).unwrap();
        store
            .create_edge(&low_salience.id, &entity.id, crate::types::edge_type::ABOUT, serde_json::json!({}))
            .unwrap();

        let mut high_salience = Node::new(NodeType::Instruction, "Marcus approves invoices", Source::User);
        high_salience.scope = Some(0.5);
        high_salience.salience = 0.9;
        let high_salience = store.create_node(high_salience).unwrap();
        store
            .create_edge(&entity.id, &high_salience.id, crate::types::edge_type::SEE_ALSO, serde_json::json!({}))
            .unwrap();

        let hits = store.instructions_by_entity(&entity.id).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, high_salience.id);
        assert_eq!(hits[1].id, low_salience.id);
    }
}
