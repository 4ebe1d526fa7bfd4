//! Knowledge graph curation: human verification of extracted edges,
//! contradiction scanning, decision history, and the review queue.

use std::sync::Arc;

use crate::error::{MnemaError, Result};
use crate::graph::GraphStore;
use crate::intelligence::{self, ContradictionDetector};
use crate::models::{Contradiction, EdgeStatus, Entity, KnowledgeEdge, TemporalFact};

const DEFAULT_LIST_LIMIT: u32 = 50;

/// Fields a caller may change on an edge. Absent fields keep their
/// stored value.
#[derive(Debug, Clone, Default)]
pub struct EdgeUpdate {
    pub status: Option<EdgeStatus>,
    pub confidence: Option<f32>,
    pub reason: Option<String>,
    pub target: Option<String>,
}

pub struct KnowledgeService {
    graph: Arc<dyn GraphStore>,
}

impl KnowledgeService {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    async fn load_edge(&self, user_id: &str, edge_id: &str) -> Result<KnowledgeEdge> {
        self.graph
            .get_edge(user_id, edge_id)
            .await?
            .ok_or_else(|| MnemaError::NotFound(format!("Edge {edge_id} not found")))
    }

    /// The user confirmed or refuted an extracted edge.
    pub async fn verify(
        &self,
        user_id: &str,
        edge_id: &str,
        correct: bool,
    ) -> Result<KnowledgeEdge> {
        let mut edge = self.load_edge(user_id, edge_id).await?;
        if correct {
            intelligence::confirm(&mut edge);
        } else {
            intelligence::reject_incorrect(&mut edge);
        }
        self.graph.update_edge(&edge).await?;
        tracing::info!(user_id, edge_id, correct, "edge verified");
        Ok(edge)
    }

    /// Reclassify an over-eager decision as still being explored.
    pub async fn mark_exploring(&self, user_id: &str, edge_id: &str) -> Result<KnowledgeEdge> {
        let mut edge = self.load_edge(user_id, edge_id).await?;
        intelligence::mark_exploring(&mut edge);
        self.graph.update_edge(&edge).await?;
        Ok(edge)
    }

    /// Confirm an option was ruled out, with an optional stated reason.
    pub async fn mark_rejected(
        &self,
        user_id: &str,
        edge_id: &str,
        reason: Option<String>,
    ) -> Result<KnowledgeEdge> {
        let mut edge = self.load_edge(user_id, edge_id).await?;
        intelligence::mark_rejected(&mut edge, reason);
        self.graph.update_edge(&edge).await?;
        Ok(edge)
    }

    /// Partial edit of an edge's mutable fields.
    pub async fn update_edge(
        &self,
        user_id: &str,
        edge_id: &str,
        update: EdgeUpdate,
    ) -> Result<KnowledgeEdge> {
        let mut edge = self.load_edge(user_id, edge_id).await?;

        if let Some(status) = update.status {
            edge.status = status;
        }
        if let Some(confidence) = update.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(MnemaError::Validation(
                    "Confidence must be between 0.0 and 1.0".to_string(),
                ));
            }
            edge.confidence = confidence;
        }
        if update.reason.is_some() {
            edge.reason = update.reason;
        }
        if let Some(target) = update.target {
            if target.trim().is_empty() {
                return Err(MnemaError::Validation(
                    "Target cannot be empty".to_string(),
                ));
            }
            edge.target = target;
        }

        self.graph.update_edge(&edge).await?;
        Ok(edge)
    }

    pub async fn delete_edge(&self, user_id: &str, edge_id: &str) -> Result<()> {
        if !self.graph.delete_edge(user_id, edge_id).await? {
            return Err(MnemaError::NotFound(format!("Edge {edge_id} not found")));
        }
        Ok(())
    }

    /// Review queue: unverified edges, least confident first.
    pub async fn unverified(
        &self,
        user_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<KnowledgeEdge>> {
        self.graph
            .unverified_edges(user_id, limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .await
    }

    /// Scan the user's full edge set for decision conflicts.
    pub async fn contradictions(&self, user_id: &str) -> Result<Vec<Contradiction>> {
        let edges = self.graph.edges(user_id).await?;
        Ok(ContradictionDetector::detect(&edges))
    }

    /// Every decision edge touching an entity, oldest first, so the
    /// caller can replay how the choice evolved.
    pub async fn decision_history(
        &self,
        user_id: &str,
        entity: &str,
    ) -> Result<Vec<KnowledgeEdge>> {
        let mut history: Vec<KnowledgeEdge> = self
            .graph
            .edges(user_id)
            .await?
            .into_iter()
            .filter(|edge| {
                edge.target.eq_ignore_ascii_case(entity) || edge.source.eq_ignore_ascii_case(entity)
            })
            .filter(|edge| {
                edge.relation.is_decision() || edge.relation == crate::models::RelationType::Rejected
            })
            .collect();
        history.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(history)
    }

    pub async fn decisions(&self, user_id: &str, limit: Option<u32>) -> Result<Vec<KnowledgeEdge>> {
        self.graph
            .decision_edges(user_id, limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .await
    }

    pub async fn current_facts(
        &self,
        user_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<TemporalFact>> {
        self.graph
            .current_facts(user_id, limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .await
    }

    pub async fn entities(&self, user_id: &str, limit: Option<u32>) -> Result<Vec<Entity>> {
        self.graph
            .entities(user_id, limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .await
    }
}
