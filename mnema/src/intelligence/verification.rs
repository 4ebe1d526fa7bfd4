//! Human-in-the-loop verification transitions for knowledge edges. Pure
//! edge mutations; `services::knowledge` persists the result.

use crate::models::{EdgeStatus, KnowledgeEdge};

/// The user confirmed the edge is correct. Confidence is floored at 0.9
/// and never lowered.
pub fn confirm(edge: &mut KnowledgeEdge) {
    edge.verified = true;
    edge.confidence = edge.confidence.max(0.9);
    edge.status = EdgeStatus::Decided;
}

/// The user said the extraction itself is wrong. The edge stays in the
/// graph for audit but drops out of decision scans.
pub fn reject_incorrect(edge: &mut KnowledgeEdge) {
    edge.verified = false;
    edge.confidence = 0.1;
    edge.marked_incorrect = true;
}

/// The user reclassified an over-eager "decision" as still being
/// explored.
pub fn mark_exploring(edge: &mut KnowledgeEdge) {
    edge.status = EdgeStatus::Exploring;
    edge.confidence = 0.4;
    edge.verified = true;
}

/// The user confirmed the option was ruled out.
pub fn mark_rejected(edge: &mut KnowledgeEdge, reason: Option<String>) {
    edge.status = EdgeStatus::Rejected;
    edge.confidence = 0.9;
    edge.verified = true;
    if reason.is_some() {
        edge.reason = reason;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attribution, RelationType, TemporalTag};
    use chrono::Utc;

    fn edge(confidence: f32) -> KnowledgeEdge {
        KnowledgeEdge {
            id: "e1".to_string(),
            user_id: "u1".to_string(),
            source: "User".to_string(),
            target: "Postgres".to_string(),
            relation: RelationType::Chose,
            status: EdgeStatus::Exploring,
            confidence,
            attributed_to: Attribution::User,
            temporal: TemporalTag::Current,
            verified: false,
            marked_incorrect: false,
            reason: None,
            conversation_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_confirm_floors_confidence_at_point_nine() {
        let mut e = edge(0.5);
        confirm(&mut e);
        assert!(e.verified);
        assert_eq!(e.confidence, 0.9);
        assert_eq!(e.status, EdgeStatus::Decided);
    }

    #[test]
    fn test_confirm_never_lowers_confidence() {
        let mut e = edge(0.97);
        confirm(&mut e);
        assert_eq!(e.confidence, 0.97);
    }

    #[test]
    fn test_reject_incorrect_marks_and_floors() {
        let mut e = edge(0.8);
        e.verified = true;
        reject_incorrect(&mut e);
        assert!(!e.verified);
        assert!(e.marked_incorrect);
        assert_eq!(e.confidence, 0.1);
    }

    #[test]
    fn test_mark_exploring() {
        let mut e = edge(0.9);
        mark_exploring(&mut e);
        assert_eq!(e.status, EdgeStatus::Exploring);
        assert_eq!(e.confidence, 0.4);
        assert!(e.verified);
    }

    #[test]
    fn test_mark_rejected_with_reason() {
        let mut e = edge(0.5);
        mark_rejected(&mut e, Some("license concerns".to_string()));
        assert_eq!(e.status, EdgeStatus::Rejected);
        assert_eq!(e.confidence, 0.9);
        assert!(e.verified);
        assert_eq!(e.reason.as_deref(), Some("license concerns"));
    }

    #[test]
    fn test_mark_rejected_keeps_existing_reason_when_none_given() {
        let mut e = edge(0.5);
        e.reason = Some("too slow".to_string());
        mark_rejected(&mut e, None);
        assert_eq!(e.reason.as_deref(), Some("too slow"));
    }
}
