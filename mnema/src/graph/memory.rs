use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{MnemaError, Result};
use crate::graph::GraphStore;
use crate::models::{Entity, KnowledgeEdge, TemporalFact};

#[derive(Default)]
struct GraphData {
    // Keyed by lowercased name for case-insensitive upserts.
    entities: BTreeMap<String, Entity>,
    edges: Vec<KnowledgeEdge>,
    facts: Vec<TemporalFact>,
}

/// In-memory `GraphStore`. The reference backend for tests and
/// single-process deployments; no lock is held across an await.
#[derive(Default)]
pub struct InMemoryGraph {
    users: RwLock<HashMap<String, GraphData>>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> MnemaError {
        MnemaError::Graph("graph lock poisoned".to_string())
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn ensure_user(&self, user_id: &str) -> Result<()> {
        let mut users = self.users.write().map_err(|_| Self::poisoned())?;
        users.entry(user_id.to_string()).or_default();
        Ok(())
    }

    async fn upsert_entity(&self, user_id: &str, entity: &Entity) -> Result<()> {
        let mut users = self.users.write().map_err(|_| Self::poisoned())?;
        let data = users.entry(user_id.to_string()).or_default();

        let key = entity.name.to_lowercase();
        match data.entities.get_mut(&key) {
            Some(existing) => {
                existing.kind = entity.kind;
                if entity.description.is_some() {
                    existing.description = entity.description.clone();
                }
            }
            None => {
                data.entities.insert(key, entity.clone());
            }
        }
        Ok(())
    }

    async fn entities(&self, user_id: &str, limit: u32) -> Result<Vec<Entity>> {
        let users = self.users.read().map_err(|_| Self::poisoned())?;
        Ok(users
            .get(user_id)
            .map(|data| data.entities.values().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn create_edge(&self, edge: &KnowledgeEdge) -> Result<()> {
        let mut users = self.users.write().map_err(|_| Self::poisoned())?;
        users
            .entry(edge.user_id.clone())
            .or_default()
            .edges
            .push(edge.clone());
        Ok(())
    }

    async fn get_edge(&self, user_id: &str, id: &str) -> Result<Option<KnowledgeEdge>> {
        let users = self.users.read().map_err(|_| Self::poisoned())?;
        Ok(users
            .get(user_id)
            .and_then(|data| data.edges.iter().find(|e| e.id == id).cloned()))
    }

    async fn update_edge(&self, edge: &KnowledgeEdge) -> Result<()> {
        let mut users = self.users.write().map_err(|_| Self::poisoned())?;
        let data = users
            .get_mut(&edge.user_id)
            .ok_or_else(|| MnemaError::NotFound(format!("user {}", edge.user_id)))?;

        let slot = data
            .edges
            .iter_mut()
            .find(|e| e.id == edge.id)
            .ok_or_else(|| MnemaError::NotFound(format!("edge {}", edge.id)))?;
        *slot = edge.clone();
        Ok(())
    }

    async fn delete_edge(&self, user_id: &str, id: &str) -> Result<bool> {
        let mut users = self.users.write().map_err(|_| Self::poisoned())?;
        let Some(data) = users.get_mut(user_id) else {
            return Ok(false);
        };
        let before = data.edges.len();
        data.edges.retain(|e| e.id != id);
        Ok(data.edges.len() < before)
    }

    async fn edges(&self, user_id: &str) -> Result<Vec<KnowledgeEdge>> {
        let users = self.users.read().map_err(|_| Self::poisoned())?;
        Ok(users
            .get(user_id)
            .map(|data| data.edges.clone())
            .unwrap_or_default())
    }

    async fn decision_edges(&self, user_id: &str, limit: u32) -> Result<Vec<KnowledgeEdge>> {
        let users = self.users.read().map_err(|_| Self::poisoned())?;
        let mut decisions: Vec<KnowledgeEdge> = users
            .get(user_id)
            .map(|data| {
                data.edges
                    .iter()
                    .filter(|e| e.relation.is_decision() && !e.marked_incorrect)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        decisions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        decisions.truncate(limit as usize);
        Ok(decisions)
    }

    async fn unverified_edges(&self, user_id: &str, limit: u32) -> Result<Vec<KnowledgeEdge>> {
        let users = self.users.read().map_err(|_| Self::poisoned())?;
        let mut pending: Vec<KnowledgeEdge> = users
            .get(user_id)
            .map(|data| {
                data.edges
                    .iter()
                    .filter(|e| !e.verified && !e.marked_incorrect)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // Least certain first: those need review most.
        pending.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn invalidate_open_facts(
        &self,
        user_id: &str,
        subject: &str,
        predicate: &str,
    ) -> Result<u64> {
        let mut users = self.users.write().map_err(|_| Self::poisoned())?;
        let Some(data) = users.get_mut(user_id) else {
            return Ok(0);
        };

        let now = Utc::now();
        let mut closed = 0;
        for fact in data.facts.iter_mut() {
            if fact.valid_to.is_none()
                && fact.subject.eq_ignore_ascii_case(subject)
                && fact.predicate.eq_ignore_ascii_case(predicate)
            {
                fact.valid_to = Some(now);
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn insert_fact(&self, fact: &TemporalFact) -> Result<()> {
        let mut users = self.users.write().map_err(|_| Self::poisoned())?;
        users
            .entry(fact.user_id.clone())
            .or_default()
            .facts
            .push(fact.clone());
        Ok(())
    }

    async fn current_facts(&self, user_id: &str, limit: u32) -> Result<Vec<TemporalFact>> {
        let users = self.users.read().map_err(|_| Self::poisoned())?;
        let mut open: Vec<TemporalFact> = users
            .get(user_id)
            .map(|data| {
                data.facts
                    .iter()
                    .filter(|f| f.valid_to.is_none())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        open.sort_by(|a, b| b.valid_from.cmp(&a.valid_from));
        open.truncate(limit as usize);
        Ok(open)
    }

    async fn related_entities(
        &self,
        user_id: &str,
        terms: &[String],
        max_hops: u32,
        limit: u32,
    ) -> Result<Vec<String>> {
        let users = self.users.read().map_err(|_| Self::poisoned())?;
        let Some(data) = users.get(user_id) else {
            return Ok(Vec::new());
        };

        let lowered: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut ordered: Vec<String> = Vec::new();
        let mut frontier: VecDeque<(String, u32)> = VecDeque::new();

        for entity in data.entities.values() {
            let name_lower = entity.name.to_lowercase();
            if lowered.iter().any(|term| name_lower.contains(term.as_str())) {
                visited.insert(name_lower.clone());
                ordered.push(entity.name.clone());
                frontier.push_back((name_lower, 0));
            }
        }

        while let Some((name, hops)) = frontier.pop_front() {
            if hops >= max_hops {
                continue;
            }
            for edge in &data.edges {
                let (src, dst) = (edge.source.to_lowercase(), edge.target.to_lowercase());
                let neighbor = if src == name {
                    &edge.target
                } else if dst == name {
                    &edge.source
                } else {
                    continue;
                };

                let neighbor_lower = neighbor.to_lowercase();
                if visited.insert(neighbor_lower.clone()) {
                    ordered.push(neighbor.clone());
                    frontier.push_back((neighbor_lower, hops + 1));
                }
            }
        }

        ordered.truncate(limit as usize);
        Ok(ordered)
    }
}
