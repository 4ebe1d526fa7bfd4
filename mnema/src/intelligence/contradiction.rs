use std::collections::BTreeMap;

use crate::models::{ConflictKind, Contradiction, KnowledgeEdge, RelationType};

/// Scans a user's knowledge edges for decision conflicts. Detection is
/// read-only: nothing is flagged or mutated, and repeated runs over the
/// same edges return identical results.
pub struct ContradictionDetector;

impl ContradictionDetector {
    pub fn detect(edges: &[KnowledgeEdge]) -> Vec<Contradiction> {
        let mut found = Self::changed_decisions(edges);
        found.extend(Self::rejected_then_chose(edges));
        found.sort_by(|a, b| a.new_date.cmp(&b.new_date).then(a.old_date.cmp(&b.old_date)));
        found
    }

    /// Two committed decisions (CHOSE/DECIDED) from the same subject with
    /// different targets: the earlier one was superseded. Consecutive
    /// time-ordered pairs, so each conflict represents one change.
    fn changed_decisions(edges: &[KnowledgeEdge]) -> Vec<Contradiction> {
        let mut by_subject: BTreeMap<&str, Vec<&KnowledgeEdge>> = BTreeMap::new();
        for edge in edges {
            if edge.relation.is_decision() && !edge.marked_incorrect {
                by_subject.entry(&edge.source).or_default().push(edge);
            }
        }

        let mut found = Vec::new();
        for decisions in by_subject.values_mut() {
            decisions.sort_by_key(|e| e.created_at);
            for pair in decisions.windows(2) {
                let (old, new) = (pair[0], pair[1]);
                if !old.target.eq_ignore_ascii_case(&new.target) {
                    found.push(Self::pair(ConflictKind::ChangedDecision, old, new));
                }
            }
        }
        found
    }

    /// A rejection later reversed by a committed decision for the same
    /// target. One conflict per rejection, against the earliest reversal.
    fn rejected_then_chose(edges: &[KnowledgeEdge]) -> Vec<Contradiction> {
        let mut found = Vec::new();

        for rejection in edges {
            if rejection.relation != RelationType::Rejected || rejection.marked_incorrect {
                continue;
            }

            let reversal = edges
                .iter()
                .filter(|e| {
                    e.relation.is_decision()
                        && !e.marked_incorrect
                        && e.source == rejection.source
                        && e.target.eq_ignore_ascii_case(&rejection.target)
                        && e.created_at > rejection.created_at
                })
                .min_by_key(|e| e.created_at);

            if let Some(decision) = reversal {
                found.push(Self::pair(
                    ConflictKind::RejectedThenChose,
                    rejection,
                    decision,
                ));
            }
        }

        found
    }

    fn pair(kind: ConflictKind, old: &KnowledgeEdge, new: &KnowledgeEdge) -> Contradiction {
        Contradiction {
            kind,
            old_edge_id: old.id.clone(),
            new_edge_id: new.id.clone(),
            old_target: old.target.clone(),
            new_target: new.target.clone(),
            old_date: old.created_at,
            new_date: new.created_at,
            old_reason: old.reason.clone(),
            new_reason: new.reason.clone(),
            subject: old.source.clone(),
        }
    }
}
