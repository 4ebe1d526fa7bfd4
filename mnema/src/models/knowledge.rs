use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed relationship vocabulary. Anything else an extraction model
/// emits is coerced to `RelatedTo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Chose,
    Decided,
    Considering,
    Rejected,
    Prefers,
    Uses,
    Builds,
    WorksAt,
    Used,
    RelatedTo,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Chose => "CHOSE",
            RelationType::Decided => "DECIDED",
            RelationType::Considering => "CONSIDERING",
            RelationType::Rejected => "REJECTED",
            RelationType::Prefers => "PREFERS",
            RelationType::Uses => "USES",
            RelationType::Builds => "BUILDS",
            RelationType::WorksAt => "WORKS_AT",
            RelationType::Used => "USED",
            RelationType::RelatedTo => "RELATED_TO",
        }
    }

    /// Case-insensitive parse; `None` for anything outside the vocabulary.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_uppercase().as_str() {
            "CHOSE" => Some(RelationType::Chose),
            "DECIDED" => Some(RelationType::Decided),
            "CONSIDERING" => Some(RelationType::Considering),
            "REJECTED" => Some(RelationType::Rejected),
            "PREFERS" => Some(RelationType::Prefers),
            "USES" => Some(RelationType::Uses),
            "BUILDS" => Some(RelationType::Builds),
            "WORKS_AT" => Some(RelationType::WorksAt),
            "USED" => Some(RelationType::Used),
            "RELATED_TO" => Some(RelationType::RelatedTo),
            _ => None,
        }
    }

    /// CHOSE and DECIDED both express a committed decision; they form one
    /// category for contradiction scanning.
    pub fn is_decision(&self) -> bool {
        matches!(self, RelationType::Chose | RelationType::Decided)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Decided,
    Exploring,
    Rejected,
}

impl EdgeStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "decided" => Some(EdgeStatus::Decided),
            "exploring" => Some(EdgeStatus::Exploring),
            "rejected" => Some(EdgeStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribution {
    User,
    Colleague,
    Article,
    Docs,
    AiSuggestion,
    Other,
}

impl Attribution {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "user" => Some(Attribution::User),
            "colleague" => Some(Attribution::Colleague),
            "article" => Some(Attribution::Article),
            "docs" => Some(Attribution::Docs),
            "ai_suggestion" => Some(Attribution::AiSuggestion),
            "other" => Some(Attribution::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalTag {
    Current,
    Past,
    Future,
}

impl TemporalTag {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "current" => Some(TemporalTag::Current),
            "past" => Some(TemporalTag::Past),
            "future" => Some(TemporalTag::Future),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Tool,
    Project,
    Company,
    Person,
    Concept,
    Technology,
    Other,
}

impl EntityKind {
    /// Unknown kinds collapse to `Other` instead of being rejected.
    pub fn parse_or_other(raw: &str) -> Self {
        match raw {
            "Tool" => EntityKind::Tool,
            "Project" => EntityKind::Project,
            "Company" => EntityKind::Company,
            "Person" => EntityKind::Person,
            "Concept" => EntityKind::Concept,
            "Technology" => EntityKind::Technology,
            _ => EntityKind::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
    pub description: Option<String>,
    pub first_mentioned: DateTime<Utc>,
}

/// A directed, attributed relationship in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEdge {
    pub id: String,
    pub user_id: String,
    pub source: String,
    pub target: String,
    pub relation: RelationType,
    pub status: EdgeStatus,
    pub confidence: f32,
    pub attributed_to: Attribution,
    pub temporal: TemporalTag,
    pub verified: bool,
    pub marked_incorrect: bool,
    pub reason: Option<String>,
    pub conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A bitemporal statement. At most one open fact (`valid_to = None`)
/// exists per (user, subject, predicate); superseded facts are closed,
/// never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalFact {
    pub id: String,
    pub user_id: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    ChangedDecision,
    RejectedThenChose,
}

/// A detected conflict between two edges, with enough context for a
/// human to resolve it.
#[derive(Debug, Clone, Serialize)]
pub struct Contradiction {
    pub kind: ConflictKind,
    pub old_edge_id: String,
    pub new_edge_id: String,
    pub old_target: String,
    pub new_target: String,
    pub old_date: DateTime<Utc>,
    pub new_date: DateTime<Utc>,
    pub old_reason: Option<String>,
    pub new_reason: Option<String>,
    /// Shared subject of the conflicting edges.
    pub subject: String,
}
