use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Entity, KnowledgeEdge, TemporalFact};

/// Knowledge graph operations, scoped by user. The engine treats the
/// graph as a set of primitives; contradiction scanning and fact
/// supersession are built on top of edge reads and the
/// invalidate/insert pair.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn ensure_user(&self, user_id: &str) -> Result<()>;

    /// Create or refresh an entity node. Existing nodes keep their
    /// `first_mentioned` timestamp; a non-empty description wins.
    async fn upsert_entity(&self, user_id: &str, entity: &Entity) -> Result<()>;
    async fn entities(&self, user_id: &str, limit: u32) -> Result<Vec<Entity>>;

    async fn create_edge(&self, edge: &KnowledgeEdge) -> Result<()>;
    async fn get_edge(&self, user_id: &str, id: &str) -> Result<Option<KnowledgeEdge>>;
    /// Full replacement by id.
    async fn update_edge(&self, edge: &KnowledgeEdge) -> Result<()>;
    async fn delete_edge(&self, user_id: &str, id: &str) -> Result<bool>;

    /// All edges for a user, creation order.
    async fn edges(&self, user_id: &str) -> Result<Vec<KnowledgeEdge>>;
    /// CHOSE/DECIDED edges, newest first, excluding marked-incorrect.
    async fn decision_edges(&self, user_id: &str, limit: u32) -> Result<Vec<KnowledgeEdge>>;
    /// Review queue: unverified edges ordered by ascending confidence.
    async fn unverified_edges(&self, user_id: &str, limit: u32) -> Result<Vec<KnowledgeEdge>>;

    /// Close every open fact for (subject, predicate). Returns how many
    /// facts were closed.
    async fn invalidate_open_facts(
        &self,
        user_id: &str,
        subject: &str,
        predicate: &str,
    ) -> Result<u64>;
    async fn insert_fact(&self, fact: &TemporalFact) -> Result<()>;
    /// Open facts (`valid_to = None`), newest first.
    async fn current_facts(&self, user_id: &str, limit: u32) -> Result<Vec<TemporalFact>>;

    /// Entities reachable within `max_hops` edges of any entity whose
    /// name matches one of the terms (case-insensitive substring).
    async fn related_entities(
        &self,
        user_id: &str,
        terms: &[String],
        max_hops: u32,
        limit: u32,
    ) -> Result<Vec<String>>;
}
