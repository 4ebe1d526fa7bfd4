//! Boundary between untrusted extraction-model output and the typed
//! knowledge model. Everything the model emits is coerced into the
//! closed vocabulary here, before a single write happens.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Attribution, EdgeStatus, EntityKind, RelationType, TemporalTag};

const DEFAULT_RELATIONSHIP_CONFIDENCE: f32 = 0.5;
const DEFAULT_FACT_CONFIDENCE: f32 = 0.8;

/// Raw extraction payload, exactly as the model returned it. Tolerant of
/// missing sections and malformed records; validation happens in
/// [`normalize`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawKnowledge {
    #[serde(default)]
    pub entities: Vec<Value>,
    #[serde(default)]
    pub relationships: Vec<Value>,
    #[serde(default)]
    pub facts: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRelationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub relation: RelationType,
    pub status: EdgeStatus,
    pub confidence: f32,
    pub attributed_to: Attribution,
    pub temporal: TemporalTag,
    pub reason: Option<String>,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEntity {
    pub name: String,
    pub kind: EntityKind,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedKnowledge {
    pub entities: Vec<NormalizedEntity>,
    pub relationships: Vec<NormalizedRelationship>,
    pub facts: Vec<NormalizedFact>,
}

/// Validate and coerce a raw extraction payload. Idempotent: feeding a
/// normalized record back through produces the identical record.
pub fn normalize(raw: &RawKnowledge) -> NormalizedKnowledge {
    NormalizedKnowledge {
        entities: raw.entities.iter().filter_map(normalize_entity).collect(),
        relationships: raw
            .relationships
            .iter()
            .filter_map(normalize_relationship)
            .collect(),
        facts: raw.facts.iter().filter_map(normalize_fact).collect(),
    }
}

fn normalize_relationship(rel: &Value) -> Option<NormalizedRelationship> {
    let target = non_empty_str(rel.get("target"))?;
    let source = non_empty_str(rel.get("source")).unwrap_or_else(|| "User".to_string());

    let relation = rel
        .get("type")
        .and_then(Value::as_str)
        .and_then(RelationType::parse)
        .unwrap_or(RelationType::RelatedTo);

    let raw_status = rel
        .get("status")
        .and_then(Value::as_str)
        .and_then(EdgeStatus::parse);

    // Status follows the relationship type unless the extraction gave a
    // coherent one.
    let status = match relation {
        RelationType::Chose | RelationType::Decided => match raw_status {
            Some(s @ (EdgeStatus::Decided | EdgeStatus::Exploring)) => s,
            _ => EdgeStatus::Decided,
        },
        RelationType::Rejected => EdgeStatus::Rejected,
        RelationType::Considering => EdgeStatus::Exploring,
        _ => raw_status.unwrap_or(EdgeStatus::Exploring),
    };

    let mut temporal = rel
        .get("temporal")
        .and_then(Value::as_str)
        .and_then(TemporalTag::parse)
        .unwrap_or(TemporalTag::Current);
    if relation == RelationType::Used {
        temporal = TemporalTag::Past;
    }

    let attributed_to = rel
        .get("attributed_to")
        .and_then(Value::as_str)
        .and_then(Attribution::parse)
        .unwrap_or(Attribution::User);

    let reason = non_empty_str(rel.get("reason"))
        .or_else(|| non_empty_str(rel.get("properties").and_then(|p| p.get("reason"))));

    Some(NormalizedRelationship {
        source,
        target,
        relation,
        status,
        confidence: parse_confidence(rel.get("confidence"), DEFAULT_RELATIONSHIP_CONFIDENCE),
        attributed_to,
        temporal,
        reason,
        verified: false,
    })
}

fn normalize_fact(fact: &Value) -> Option<NormalizedFact> {
    let object = non_empty_str(fact.get("object"))?;
    let predicate = non_empty_str(fact.get("predicate"))?;
    let subject = non_empty_str(fact.get("subject")).unwrap_or_else(|| "User".to_string());

    Some(NormalizedFact {
        subject,
        predicate: predicate.to_uppercase(),
        object,
        confidence: parse_confidence(fact.get("confidence"), DEFAULT_FACT_CONFIDENCE),
    })
}

fn normalize_entity(entity: &Value) -> Option<NormalizedEntity> {
    let name = non_empty_str(entity.get("name"))?;
    let kind = entity
        .get("type")
        .and_then(Value::as_str)
        .map(EntityKind::parse_or_other)
        .unwrap_or(EntityKind::Other);

    Some(NormalizedEntity {
        name,
        kind,
        description: non_empty_str(entity.get("description")),
    })
}

/// Accept numbers and numeric strings; clamp to [0, 1].
fn parse_confidence(value: Option<&Value>, default: f32) -> f32 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64().map(|v| v as f32),
        Some(Value::String(s)) => s.trim().parse::<f32>().ok(),
        _ => None,
    };
    parsed.unwrap_or(default).clamp(0.0, 1.0)
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
