use std::sync::Arc;

use chrono::Utc;
use nanoid::nanoid;

use crate::error::Result;
use crate::graph::GraphStore;
use crate::intelligence::NormalizedFact;
use crate::models::TemporalFact;

/// Writes temporal facts with supersession: recording a fact first
/// closes every open fact for the same (subject, predicate), so the
/// at-most-one-open invariant holds after every write.
pub struct FactWriter {
    graph: Arc<dyn GraphStore>,
}

impl FactWriter {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    pub async fn record(&self, user_id: &str, fact: &NormalizedFact) -> Result<TemporalFact> {
        let closed = self
            .graph
            .invalidate_open_facts(user_id, &fact.subject, &fact.predicate)
            .await?;
        if closed > 0 {
            tracing::debug!(
                subject = %fact.subject,
                predicate = %fact.predicate,
                closed,
                "superseded open facts"
            );
        }

        let record = TemporalFact {
            id: nanoid!(),
            user_id: user_id.to_string(),
            subject: fact.subject.clone(),
            predicate: fact.predicate.clone(),
            object: fact.object.clone(),
            confidence: fact.confidence,
            valid_from: Utc::now(),
            valid_to: None,
        };
        self.graph.insert_fact(&record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraph;

    fn fact(object: &str) -> NormalizedFact {
        NormalizedFact {
            subject: "User".to_string(),
            predicate: "WORKS_AT".to_string(),
            object: object.to_string(),
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn test_at_most_one_open_fact_per_subject_predicate() {
        let graph = Arc::new(InMemoryGraph::new());
        let writer = FactWriter::new(graph.clone());

        writer.record("u1", &fact("Acme")).await.unwrap();
        writer.record("u1", &fact("Globex")).await.unwrap();
        writer.record("u1", &fact("Initech")).await.unwrap();

        let open = graph.current_facts("u1", 10).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].object, "Initech");
    }

    #[tokio::test]
    async fn test_superseded_facts_are_closed_not_deleted() {
        let graph = Arc::new(InMemoryGraph::new());
        let writer = FactWriter::new(graph.clone());

        let first = writer.record("u1", &fact("Acme")).await.unwrap();
        writer.record("u1", &fact("Globex")).await.unwrap();

        let open = graph.current_facts("u1", 10).await.unwrap();
        assert!(open.iter().all(|f| f.id != first.id));
        // Distinct predicates never interfere
        let other = NormalizedFact {
            predicate: "USES".to_string(),
            ..fact("Rust")
        };
        writer.record("u1", &other).await.unwrap();
        assert_eq!(graph.current_facts("u1", 10).await.unwrap().len(), 2);
    }
}
